//! Client for services that delegate login to this gateway.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid login")]
    LoginInvalid,
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::BadRequest(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct UsernameResponse {
    #[serde(default)]
    username: String,
}

pub struct LoginClient {
    http: reqwest::Client,
    base_url: Url,
}

impl LoginClient {
    pub fn new(base_url: Url) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Endpoints resolve below `base_url`, so `https://host/gw` and
    /// `https://host/gw/` both reach `https://host/gw/verify`.
    pub fn with_client(mut base_url: Url, http: reqwest::Client) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self { http, base_url }
    }

    /// Asks the gateway whether `token` is still valid and returns the
    /// username it was issued to.
    pub async fn check(&self, token: &str) -> Result<String, ClientError> {
        let res = self
            .http
            .post(self.endpoint("verify")?)
            .json(&json!({ "token": token }))
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            return Err(ClientError::LoginInvalid);
        }
        let body: UsernameResponse = res.json().await?;
        Ok(body.username)
    }

    pub async fn request_token(&self, username: &str, password: &str) -> Result<String, ClientError> {
        let res = self
            .http
            .post(self.endpoint("auth")?)
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            return Err(ClientError::LoginInvalid);
        }
        let body: TokenResponse = res.json().await?;
        Ok(body.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::BadRequest(e.to_string()))
    }
}
