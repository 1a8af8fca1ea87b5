use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::blocklist::Blocklist;
use super::token::{Claims, TokenService};
use crate::error::{AuthError, TokenError};
use crate::store::{with_timeout, CredentialStore};

/// Query parameter carrying the token on every redirect.
pub const TOKEN_QUERY_PARAM: &str = "token";

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub redirect: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("redirect", &self.redirect)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub redirect: Url,
}

/// Sequences one login: blocklist gate, credential check, failure
/// bookkeeping, token issuance and redirect construction.
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    tokens: TokenService,
    blocklist: Arc<Blocklist>,
    store_timeout: Duration,
    default_redirect: Url,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: TokenService,
        blocklist: Arc<Blocklist>,
        store_timeout: Duration,
        default_redirect: Url,
    ) -> Self {
        Self {
            store,
            tokens,
            blocklist,
            store_timeout,
            default_redirect,
        }
    }

    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub async fn login(&self, ip: &str, form: &LoginForm) -> Result<LoginOutcome, AuthError> {
        if self.blocklist.should_block(ip) {
            return Err(AuthError::Blocked);
        }

        let valid = with_timeout(
            self.store_timeout,
            self.store.verify_credentials(&form.username, &form.password),
        )
        .await?;
        if !valid {
            self.blocklist.record_failure(ip);
            return Err(AuthError::InvalidCredentials);
        }
        self.blocklist.record_success(ip);

        let token = self.tokens.issue(&form.username)?;
        let redirect = self.redirect_with_token(&form.redirect, &token);
        info!("login succeeded for {} from {}, redirecting to {}", form.username, ip, redirect);

        Ok(LoginOutcome { token, redirect })
    }

    pub async fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.tokens.verify(token).await
    }

    /// Landing-page fast path. Returns where to send a caller whose cookie
    /// already holds a valid token; `None` means show the login form.
    pub async fn resume_session(&self, token: &str, redirect: &str) -> Option<Url> {
        if let Err(e) = self.tokens.verify(token).await {
            warn!("ignoring stored session token: {}", e);
            return None;
        }
        let target = if redirect.is_empty() {
            self.default_redirect.clone()
        } else {
            Url::parse(redirect).ok()?
        };
        Some(attach_token(target, token))
    }

    /// Parses `redirect`, falling back to the default origin when it is empty
    /// or not a valid absolute URL, and attaches `token`.
    pub fn redirect_with_token(&self, redirect: &str, token: &str) -> Url {
        let target = match Url::parse(redirect) {
            Ok(url) if !redirect.is_empty() => url,
            _ => {
                info!("missing or invalid redirect, using {}", self.default_redirect);
                self.default_redirect.clone()
            }
        };
        attach_token(target, token)
    }
}

/// Sets the `token` query parameter, replacing any existing value.
pub fn attach_token(mut url: Url, token: &str) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != TOKEN_QUERY_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(TOKEN_QUERY_PARAM, token);
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::blocklist::BlocklistPolicy;
    use crate::error::StoreError;
    use crate::store::{MemoryCredentialStore, MockCredentialStore};

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn build(store: Arc<dyn CredentialStore>) -> AuthService {
        let tokens = TokenService::new(
            b"test_secret",
            "login-gateway",
            chrono::Duration::days(60),
            store.clone(),
            TIMEOUT,
        );
        AuthService::new(
            store,
            tokens,
            Arc::new(Blocklist::new(BlocklistPolicy::default())),
            TIMEOUT,
            Url::parse("https://example.com").unwrap(),
        )
    }

    fn memory_service() -> AuthService {
        build(Arc::new(MemoryCredentialStore::with_accounts([("alice", "wonderland")])))
    }

    fn form(username: &str, password: &str, redirect: &str) -> LoginForm {
        LoginForm {
            username: username.into(),
            password: password.into(),
            redirect: redirect.into(),
        }
    }

    #[tokio::test]
    async fn test_login_issues_token_and_redirect() {
        let auth = memory_service();
        let outcome = auth
            .login("1.2.3.4", &form("alice", "wonderland", "https://app.example.org/home?tab=1"))
            .await
            .unwrap();

        let claims = auth.verify(&outcome.token).await.unwrap();
        assert_eq!(claims.aud, "alice");
        assert_eq!(outcome.redirect.host_str(), Some("app.example.org"));
        let pairs: Vec<_> = outcome.redirect.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![("tab".to_string(), "1".to_string()), ("token".to_string(), outcome.token.clone())]
        );
    }

    #[tokio::test]
    async fn test_empty_redirect_uses_default() {
        let auth = memory_service();
        let outcome = auth.login("1.2.3.4", &form("alice", "wonderland", "")).await.unwrap();
        assert_eq!(
            outcome.redirect.as_str(),
            format!("https://example.com/?token={}", outcome.token)
        );
    }

    #[test]
    fn test_relative_redirect_uses_default() {
        let auth = memory_service();
        let url = auth.redirect_with_token("/dashboard", "t0k3n");
        assert_eq!(url.as_str(), "https://example.com/?token=t0k3n");

        let url = auth.redirect_with_token("dashboard?tab=2", "t0k3n");
        assert_eq!(url.as_str(), "https://example.com/?token=t0k3n");
    }

    #[tokio::test]
    async fn test_bad_credentials_recorded() {
        let auth = memory_service();
        let err = auth.login("1.2.3.4", &form("alice", "nope", "")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(auth.blocklist().entry("1.2.3.4").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_blocked_ip_never_reaches_store() {
        let mut store = MockCredentialStore::new();
        store.expect_verify_credentials().times(0);
        let auth = build(Arc::new(store));
        for _ in 0..11 {
            auth.blocklist().record_failure("1.2.3.4");
        }

        let err = auth.login("1.2.3.4", &form("alice", "wonderland", "")).await.unwrap_err();
        assert!(matches!(err, AuthError::Blocked));
        // blocked attempts are not counted as new failures
        assert_eq!(auth.blocklist().entry("1.2.3.4").unwrap().failures, 11);
    }

    #[tokio::test]
    async fn test_eleven_failures_then_valid_credentials_still_blocked() {
        let auth = memory_service();
        for _ in 0..11 {
            let err = auth.login("1.2.3.4", &form("alice", "wrong", "")).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
        }
        let err = auth.login("1.2.3.4", &form("alice", "wonderland", "")).await.unwrap_err();
        assert!(matches!(err, AuthError::Blocked));

        // other clients are unaffected
        assert!(auth.login("5.6.7.8", &form("alice", "wonderland", "")).await.is_ok());
    }

    #[tokio::test]
    async fn test_store_error_is_not_a_credential_failure() {
        let mut store = MockCredentialStore::new();
        store
            .expect_verify_credentials()
            .returning(|_, _| Err(StoreError::Backend("connection reset".into())));
        let auth = build(Arc::new(store));

        let err = auth.login("1.2.3.4", &form("alice", "wonderland", "")).await.unwrap_err();
        assert!(matches!(err, AuthError::Store(StoreError::Backend(_))));
        assert!(auth.blocklist().entry("1.2.3.4").is_none());
    }

    #[tokio::test]
    async fn test_resume_session() {
        let auth = memory_service();
        let token = auth.tokens().issue("alice").unwrap();

        let url = auth.resume_session(&token, "https://app.example.org/").await.unwrap();
        assert_eq!(url.as_str(), format!("https://app.example.org/?token={}", token));

        let url = auth.resume_session(&token, "").await.unwrap();
        assert_eq!(url.host_str(), Some("example.com"));

        assert!(auth.resume_session("garbage", "https://app.example.org/").await.is_none());
        assert!(auth.resume_session(&token, "not a url").await.is_none());
    }

    #[tokio::test]
    async fn test_resume_session_leaves_blocklist_alone() {
        let auth = memory_service();
        assert!(auth.resume_session("garbage", "").await.is_none());
        assert!(auth.blocklist().is_empty());
    }

    #[test]
    fn test_attach_token_replaces_existing() {
        let url = Url::parse("https://example.org/cb?token=old&x=y").unwrap();
        let url = attach_token(url, "new");
        assert_eq!(url.as_str(), "https://example.org/cb?x=y&token=new");
    }

    #[test]
    fn test_login_form_debug_hides_password() {
        let rendered = format!("{:?}", form("alice", "wonderland", ""));
        assert!(!rendered.contains("wonderland"));
    }
}
