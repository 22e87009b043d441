//! HTTP identity provider implementation.

use crate::config::IdentityProviderConfig;
use crate::error::{AuthError, Result};
use crate::providers::{AccountClass, AccountProfile, IdentityProvider, TokenResponse};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// OAuth2 identity provider reached over HTTPS.
///
/// Token requests are `application/x-www-form-urlencoded` POSTs to the
/// configured token endpoint; the profile is a bearer-authenticated GET.
/// Every request carries the configured timeout.
///
/// # Example
///
/// ```no_run
/// use sessionguard_auth::config::IdentityProviderConfig;
/// use sessionguard_auth::providers::HttpIdentityProvider;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let idp = HttpIdentityProvider::new(IdentityProviderConfig::new(
///     "https://idp.example.com/oauth/token",
///     "https://idp.example.com/api/me",
///     "client-id",
///     "client-secret",
/// ))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct HttpIdentityProvider {
    config: IdentityProviderConfig,
    http_client: Client,
}

impl HttpIdentityProvider {
    /// Create a new HTTP identity provider.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InternalError` if the HTTP client cannot be built.
    pub fn new(config: IdentityProviderConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::InternalError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    async fn post_token_form(&self, params: &[(&str, &str)], grant: &str) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| transport_error(&e, grant))?;

        let status = response.status();
        if !status.is_success() {
            // Body may echo the submitted code; only the status is logged.
            tracing::warn!(grant = %grant, status = status.as_u16(), "IdP token request rejected");
            return Err(AuthError::ProviderRejected {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| body_error(&e, grant))?;
        serde_json::from_slice(&body)
            .map_err(|e| AuthError::ProviderResponseInvalid(format!("{grant}: {e}")))
    }

    fn classify(&self, raw: &RawProfile) -> AccountClass {
        let typed_operator = raw.account_type.as_deref().is_some_and(|kind| {
            self.config
                .operator_account_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(kind))
        });

        if typed_operator || raw.principal_id.is_some() {
            AccountClass::Operator
        } else {
            AccountClass::Principal
        }
    }
}

fn transport_error(err: &reqwest::Error, grant: &str) -> AuthError {
    tracing::warn!(
        grant = %grant,
        timeout = err.is_timeout(),
        connect = err.is_connect(),
        "IdP request failed at transport level"
    );
    AuthError::ProviderUnavailable(err.to_string())
}

/// A failure while reading a 2xx body. The connection dropping or timing
/// out mid-body is an outage, not an answer.
fn body_error(err: &reqwest::Error, grant: &str) -> AuthError {
    if err.is_timeout() || err.is_request() || err.is_body() {
        transport_error(err, grant)
    } else {
        AuthError::ProviderResponseInvalid(format!("{grant}: {err}"))
    }
}

impl IdentityProvider for HttpIdentityProvider {
    fn has_client_credentials(&self) -> bool {
        self.config.has_credentials()
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        if !self.config.has_credentials() {
            return Err(AuthError::MissingClientCredentials);
        }

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        self.post_token_form(&params, "authorization_code").await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        if !self.config.has_credentials() {
            return Err(AuthError::MissingClientCredentials);
        }

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        self.post_token_form(&params, "refresh_token").await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<AccountProfile> {
        let response = self
            .http_client
            .get(&self.config.profile_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| transport_error(&e, "profile"))?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(AuthError::AccountForbidden);
        }
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "IdP profile request rejected");
            return Err(AuthError::ProviderRejected {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| body_error(&e, "profile"))?;
        let raw: RawProfile = serde_json::from_slice(&body)
            .map_err(|e| AuthError::ProviderResponseInvalid(format!("profile: {e}")))?;

        let account_class = self.classify(&raw);
        let user_id = raw.account_id().ok_or_else(|| {
            AuthError::ProviderResponseInvalid("profile: no account id".to_string())
        })?;

        Ok(AccountProfile {
            user_id,
            email: raw.email,
            display_name: raw.name,
            account_class,
        })
    }
}

/// Profile endpoint response format.
///
/// The account id arrives as `user_id`, `id` or `sub` depending on the IdP,
/// sometimes more than one of them; see [`RawProfile::account_id`].
#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(default)]
    user_id: Option<RawId>,

    #[serde(default)]
    id: Option<RawId>,

    #[serde(default)]
    sub: Option<RawId>,

    email: Option<String>,

    #[serde(alias = "display_name")]
    name: Option<String>,

    /// Account kind, e.g. `"owner"` or `"operator"`.
    #[serde(default)]
    account_type: Option<String>,

    /// Set on operator accounts: the principal they act for.
    #[serde(default)]
    principal_id: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl RawProfile {
    /// First id present, in order `user_id`, `id`, `sub`.
    fn account_id(&self) -> Option<String> {
        [&self.user_id, &self.id, &self.sub]
            .into_iter()
            .flatten()
            .next()
            .map(RawId::to_id_string)
    }
}

impl RawId {
    fn to_id_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn provider() -> HttpIdentityProvider {
        HttpIdentityProvider::new(IdentityProviderConfig::new(
            "http://127.0.0.1:1/token",
            "http://127.0.0.1:1/me",
            "id",
            "secret",
        ))
        .unwrap()
    }

    fn raw(body: &str) -> RawProfile {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_classify_principal() {
        let p = provider();
        let profile = raw(r#"{"id": 42, "email": "a@example.com", "account_type": "owner"}"#);
        assert_eq!(p.classify(&profile), AccountClass::Principal);
        assert_eq!(profile.account_id().as_deref(), Some("42"));
    }

    #[test]
    fn test_account_id_precedence() {
        let profile = raw(r#"{"id": "acct-1", "sub": "oidc-subject"}"#);
        assert_eq!(profile.account_id().as_deref(), Some("acct-1"));

        let profile = raw(r#"{"sub": "oidc-subject", "user_id": 9, "id": "acct-1"}"#);
        assert_eq!(profile.account_id().as_deref(), Some("9"));

        let profile = raw(r#"{"sub": "oidc-subject"}"#);
        assert_eq!(profile.account_id().as_deref(), Some("oidc-subject"));

        let profile = raw(r#"{"email": "a@example.com"}"#);
        assert!(profile.account_id().is_none());
    }

    #[test]
    fn test_classify_operator_by_type() {
        let p = provider();
        let profile = raw(r#"{"id": "u1", "account_type": "Operator"}"#);
        assert_eq!(p.classify(&profile), AccountClass::Operator);
    }

    #[test]
    fn test_classify_operator_by_principal_id() {
        let p = provider();
        let profile = raw(r#"{"sub": "u1", "principal_id": 7}"#);
        assert_eq!(p.classify(&profile), AccountClass::Operator);
    }

    #[test]
    fn test_null_principal_id_is_principal() {
        let p = provider();
        let profile = raw(r#"{"user_id": "u1", "principal_id": null}"#);
        assert_eq!(p.classify(&profile), AccountClass::Principal);
    }

    #[tokio::test]
    async fn test_missing_credentials_short_circuits() {
        let p = HttpIdentityProvider::new(IdentityProviderConfig::new(
            "http://127.0.0.1:1/token",
            "http://127.0.0.1:1/me",
            "",
            "",
        ))
        .unwrap();
        assert!(!p.has_client_credentials());
        let result = p.exchange_code("C1", "V1", "http://localhost/cb").await;
        assert_eq!(result.unwrap_err(), AuthError::MissingClientCredentials);
    }

    #[tokio::test]
    async fn test_unreachable_idp_is_transient() {
        let result = provider().refresh("r0").await;
        assert!(result.unwrap_err().is_transient());
    }

    /// Serves one 2xx response whose body never completes.
    async fn stalled_body_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                      content-length: 64\r\n\r\n{\"access_token\":",
                )
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_body_timeout_is_transient() {
        let base = stalled_body_server().await;
        let p = HttpIdentityProvider::new(
            IdentityProviderConfig::new(format!("{base}/token"), format!("{base}/me"), "id", "secret")
                .with_request_timeout(std::time::Duration::from_millis(200)),
        )
        .unwrap();

        let err = p.refresh("r0").await.unwrap_err();

        assert!(err.is_transient(), "{err:?}");
    }
}
