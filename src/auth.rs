//! Caller credential checks.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The verifier could not reach a decision. Distinct from "token invalid".
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity service error (status {status}): {message}")]
    Service { status: u16, message: String },

    #[error("identity service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// `Ok(false)` means the token was checked and refused.
    async fn validate_token(&self, token: &str) -> Result<bool, AuthError>;
}

/// Accepts a fixed set of tokens, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashSet<String>,
}

impl StaticTokenVerifier {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn validate_token(&self, token: &str) -> Result<bool, AuthError> {
        Ok(!token.is_empty() && self.tokens.contains(token))
    }
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
}

/// Delegates validation to a remote identity service.
///
/// `POST {base_url}/validate` with `{"token": ...}`. A 2xx body of
/// `{"valid": bool}` decides; 401 and 403 mean the token is refused.
pub struct HttpTokenVerifier {
    client: Client,
    base_url: String,
}

impl HttpTokenVerifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpTokenVerifier {
    async fn validate_token(&self, token: &str) -> Result<bool, AuthError> {
        if token.is_empty() {
            return Ok(false);
        }

        let response = self
            .client
            .post(format!("{}/validate", self.base_url))
            .json(&ValidateRequest { token })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(false);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AuthError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<ValidateResponse>().await?;
        Ok(body.valid)
    }
}
