//! Client for the remote token service.
//!
//! The service issues and validates bearer tokens; this crate never signs
//! anything itself. Every remote call goes through [`retry`] with the
//! client's own policy.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use reqwest::{header::AUTHORIZATION, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::{
    config::TokenServiceConfig,
    retry::{retry, RetryExhausted, RetryPolicy},
};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token service rejected the request: no token issued")]
    Rejected,
    #[error("token service returned an empty token")]
    EmptyToken,
    #[error("token not found in header")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token service at {url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid token payload")]
    InvalidPayload,
}

impl TokenError {
    /// Whether the remote gave a definite "this token is no good" answer.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TokenError::MissingToken | TokenError::InvalidToken)
    }
}

/// Issues a bearer token for an already-authenticated login.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue_token(&self, login: &str) -> Result<String, RetryExhausted<TokenError>>;
}

#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl TokenClient {
    pub fn new(cfg: &TokenServiceConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url(),
            retry: cfg.retry,
        })
    }

    /// Builds the client and pings the service; an unreachable service is a
    /// startup failure.
    pub async fn connect(cfg: &TokenServiceConfig) -> anyhow::Result<Self> {
        let client = Self::new(cfg)?;
        client.ping().await?;
        info!(url = %client.base_url, "token service reachable");
        Ok(client)
    }

    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn ping(&self) -> Result<(), RetryExhausted<TokenError>> {
        let url = format!("{}/ping", self.base_url);
        let url = url.as_str();
        retry(self.retry, move || async move {
            let resp = self.http.get(url).send().await?;
            if resp.status() != StatusCode::OK {
                return Err(TokenError::Status {
                    url: url.to_string(),
                    status: resp.status().as_u16(),
                });
            }
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn issue(&self, login: &str) -> Result<String, RetryExhausted<TokenError>> {
        let url = format!("{}/generate", self.base_url);
        let url = url.as_str();
        let token = retry(self.retry, move || async move {
            let resp = self
                .http
                .get(url)
                .query(&[("login", login)])
                .send()
                .await?;
            match resp.status() {
                StatusCode::OK => {}
                StatusCode::BAD_REQUEST => return Err(TokenError::Rejected),
                other => {
                    return Err(TokenError::Status {
                        url: url.to_string(),
                        status: other.as_u16(),
                    })
                }
            }
            let body = resp.text().await?;
            let token = body.trim().to_string();
            if token.is_empty() {
                return Err(TokenError::EmptyToken);
            }
            Ok(token)
        })
        .await?;
        debug!("token issued");
        Ok(token)
    }

    /// Asks the service whether `token` is currently valid. Holds no state,
    /// so repeated calls with the same token give the same answer.
    #[instrument(skip(self, token), fields(url = %self.base_url))]
    pub async fn validate_token(&self, token: &str) -> Result<(), RetryExhausted<TokenError>> {
        let url = format!("{}/validate", self.base_url);
        let url = url.as_str();
        let header = format!("bearer {token}");
        let header = header.as_str();
        retry(self.retry, move || async move {
            let resp = self
                .http
                .get(url)
                .header(AUTHORIZATION, header)
                .send()
                .await?;
            match resp.status() {
                StatusCode::OK => Ok(()),
                StatusCode::BAD_REQUEST => Err(TokenError::MissingToken),
                StatusCode::UNAUTHORIZED => Err(TokenError::InvalidToken),
                other => Err(TokenError::Status {
                    url: url.to_string(),
                    status: other.as_u16(),
                }),
            }
        })
        .await
    }

    /// Reads the `login` claim WITHOUT checking the signature.
    ///
    /// Only call this after [`TokenClient::validate_token`] succeeded for the
    /// same token in the same request; the remote check is the trust anchor.
    pub fn extract_login(token: &str) -> Result<String, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Map<String, Value>>(token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|_| TokenError::InvalidPayload)?;
        match data.claims.get("login") {
            Some(Value::String(login)) => Ok(login.clone()),
            _ => Err(TokenError::InvalidPayload),
        }
    }
}

#[async_trait]
impl TokenIssuer for TokenClient {
    async fn issue_token(&self, login: &str) -> Result<String, RetryExhausted<TokenError>> {
        self.issue(login).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::prelude::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    use super::*;

    fn client_for(server: &MockServer, attempts: u32) -> TokenClient {
        TokenClient {
            http: reqwest::Client::new(),
            base_url: server.base_url(),
            retry: RetryPolicy::new(attempts, Duration::from_millis(1)),
        }
    }

    fn signed(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"remote-service-secret"),
        )
        .expect("encode")
    }

    #[tokio::test]
    async fn connect_pings_the_service() {
        let server = MockServer::start_async().await;
        let ping = server
            .mock_async(|when, then| {
                when.method(GET).path("/ping");
                then.status(200);
            })
            .await;
        let cfg = TokenServiceConfig {
            host: server.host(),
            port: server.port(),
            request_timeout: Duration::from_secs(2),
            retry: RetryPolicy::new(2, Duration::from_millis(1)),
        };
        TokenClient::connect(&cfg).await.expect("connect");
        ping.assert_async().await;
    }

    #[tokio::test]
    async fn ping_failure_is_reported_with_last_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/ping");
                then.status(503);
            })
            .await;
        let err = client_for(&server, 2).ping().await.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(matches!(err.last, TokenError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn issue_returns_body_as_token() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET).path("/generate").query_param("login", "alice");
                then.status(200).body("abc.def.ghi");
            })
            .await;
        let token = client_for(&server, 1).issue("alice").await.expect("token");
        assert_eq!(token, "abc.def.ghi");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn issue_distinguishes_rejection_from_other_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/generate");
                then.status(400);
            })
            .await;
        let err = client_for(&server, 2).issue("alice").await.unwrap_err();
        assert!(matches!(err.last, TokenError::Rejected));

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/generate");
                then.status(200).body("");
            })
            .await;
        let err = client_for(&server, 1).issue("alice").await.unwrap_err();
        assert!(matches!(err.last, TokenError::EmptyToken));
    }

    #[tokio::test]
    async fn validate_maps_statuses() {
        let expectations: [(u16, fn(&TokenError) -> bool); 3] = [
            (400, |e| matches!(e, TokenError::MissingToken)),
            (401, |e| matches!(e, TokenError::InvalidToken)),
            (500, |e| matches!(e, TokenError::Status { status: 500, .. })),
        ];
        for (status, expected) in expectations {
            let server = MockServer::start_async().await;
            server
                .mock_async(|when, then| {
                    when.method(GET).path("/validate");
                    then.status(status);
                })
                .await;
            let err = client_for(&server, 2).validate_token("t").await.unwrap_err();
            assert!(expected(&err.last), "status {status}: {}", err.last);
        }
    }

    #[tokio::test]
    async fn validate_sends_bearer_header_and_is_repeatable() {
        let server = MockServer::start_async().await;
        let _m = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/validate")
                    .header("authorization", "bearer good-token");
                then.status(200);
            })
            .await;
        let client = client_for(&server, 1);
        let first = client.validate_token("good-token").await;
        let second = client.validate_token("good-token").await;
        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[test]
    fn extract_login_ignores_signature() {
        let token = signed(json!({ "login": "alice", "exp": 1 }));
        assert_eq!(TokenClient::extract_login(&token).unwrap(), "alice");
    }

    #[test]
    fn extract_login_requires_string_claim() {
        let missing = signed(json!({ "sub": "alice" }));
        assert!(matches!(
            TokenClient::extract_login(&missing),
            Err(TokenError::InvalidPayload)
        ));
        let numeric = signed(json!({ "login": 42 }));
        assert!(matches!(
            TokenClient::extract_login(&numeric),
            Err(TokenError::InvalidPayload)
        ));
        assert!(TokenClient::extract_login("not-a-jwt").is_err());
    }
}
