use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::http::header::{self, ContentType};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::form_urlencoded;

use super::client_ip::client_ip;
use super::service::LoginForm;
use crate::error::AppError;
use crate::AppState;

const LOGIN_PAGE: &str = include_str!("../../templates/login.html");

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub redirect: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub username: String,
}

/// Registers the login routes. `/auth` and `/verify` answer every method but
/// POST with a 400.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(landing))
        .service(
            web::resource("/auth")
                .route(web::post().to(login))
                .default_service(web::to(unsupported_method)),
        )
        .service(
            web::resource("/verify")
                .route(web::post().to(verify))
                .default_service(web::to(unsupported_method)),
        );
}

pub async fn login(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let ip = client_ip(&req);
    let form: LoginForm = parse_body(&body).map_err(|e| {
        warn!("{} {} from {}: {}", req.method(), req.path(), ip, e);
        e
    })?;

    let outcome = match state.auth_service.login(&ip, &form).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(
                "{} {} from {}: login failed for {}: {}",
                req.method(),
                req.path(),
                ip,
                form.username,
                e
            );
            return Err(e.into());
        }
    };

    let auth = &state.config.auth;
    let mut cookie = Cookie::build(auth.cookie_name.clone(), outcome.token.clone())
        .path("/")
        .max_age(CookieDuration::seconds(state.auth_service.tokens().ttl().num_seconds()))
        .same_site(SameSite::Lax)
        .finish();
    if let Some(domain) = &auth.cookie_domain {
        cookie.set_domain(domain.clone());
    }

    Ok(HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .cookie(cookie)
        .json(LoginResponse {
            redirect: outcome.redirect.to_string(),
            token: outcome.token,
        }))
}

pub async fn verify(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let ip = client_ip(&req);
    let request: VerifyRequest = parse_body(&body).map_err(|e| {
        warn!("{} {} from {}: {}", req.method(), req.path(), ip, e);
        e
    })?;

    match state.auth_service.verify(&request.token).await {
        Ok(claims) => Ok(HttpResponse::Ok()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .json(VerifyResponse { username: claims.aud })),
        Err(e) => {
            warn!("{} {} from {}: token rejected: {}", req.method(), req.path(), ip, e);
            Err(e.into())
        }
    }
}

/// Skips the form when the auth cookie already carries a valid token.
/// Never fails: an unusable query or cookie renders the form.
pub async fn landing(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(cookie) = req.cookie(&state.config.auth.cookie_name) {
        let redirect = redirect_param(req.query_string());
        if let Some(target) = state
            .auth_service
            .resume_session(cookie.value(), &redirect)
            .await
        {
            info!("{} resumed session, redirecting to {}", client_ip(&req), target);
            return HttpResponse::TemporaryRedirect()
                .insert_header((header::LOCATION, target.to_string()))
                .insert_header((header::CACHE_CONTROL, "no-store"))
                .finish();
        }
    }

    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(LOGIN_PAGE)
}

pub async fn unsupported_method(req: HttpRequest) -> Result<HttpResponse, AppError> {
    warn!("{} {} from {}: unsupported method", req.method(), req.path(), client_ip(&req));
    Err(AppError::BadRequest("unsupported method".into()))
}

/// First `redirect` value of the query string, empty when absent.
fn redirect_param(query: &str) -> String {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "redirect")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("failed to parse request body: {}", e)))
}
