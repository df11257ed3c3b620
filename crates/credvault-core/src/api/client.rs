//! Client for the remote authentication API.
//!
//! The vault never talks to the network itself; callers use an [`AuthApi`]
//! to validate, refresh or revoke tokens and then update the local session.

use std::time::Duration;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::ApiError;
use crate::session::UserData;

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair<'a> {
    access_token: &'a str,
    refresh_token: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    /// Fresh profile, when the server sends one
    #[serde(default)]
    pub user: Option<UserData>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl std::fmt::Debug for RefreshResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshResponse")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Remote token operations the session flows depend on.
#[allow(async_fn_in_trait)]
pub trait AuthApi {
    async fn validate_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<ValidateResponse, ApiError>;

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError>;

    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), ApiError>;
}

/// [`AuthApi`] over HTTPS + JSON.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: Client,
    base_url: String,
}

impl HttpAuthApi {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.endpoint(path);
        let mut request = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        debug!(url = %url, status = %response.status(), "Auth API response");
        Self::check_response(response).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.post(path, bearer, body).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{} returned bad JSON: {}", path, e)))
    }
}

impl AuthApi for HttpAuthApi {
    async fn validate_tokens(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<ValidateResponse, ApiError> {
        let body = TokenPair {
            access_token,
            refresh_token,
        };
        self.post_json("validate-tokens", Some(access_token), &body)
            .await
    }

    async fn refresh_tokens(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        self.post_json("refresh-tokens", None, &RefreshRequest { refresh_token })
            .await
    }

    async fn logout(&self, access_token: &str, refresh_token: &str) -> Result<(), ApiError> {
        let body = TokenPair {
            access_token,
            refresh_token,
        };
        self.post("logout", Some(access_token), &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joining() {
        let api = HttpAuthApi::new("https://auth.example.com/api/").unwrap();
        assert_eq!(
            api.endpoint("refresh-tokens"),
            "https://auth.example.com/api/refresh-tokens"
        );
        assert_eq!(api.endpoint("/logout"), "https://auth.example.com/api/logout");
    }

    #[test]
    fn test_response_parsing() {
        let validate: ValidateResponse = serde_json::from_str(
            r#"{"valid":true,"user":{"userId":42,"username":"john#1234","emailVerified":true}}"#,
        )
        .unwrap();
        assert!(validate.valid);
        assert_eq!(validate.user.unwrap().user_id, 42);

        let refresh: RefreshResponse =
            serde_json::from_str(r#"{"accessToken":"A2","expiresIn":900}"#).unwrap();
        assert_eq!(refresh.access_token, "A2");
        assert!(!format!("{:?}", refresh).contains("A2"));
    }

    #[test]
    fn test_request_bodies_are_camel_case() {
        let body = serde_json::to_value(TokenPair {
            access_token: "A1",
            refresh_token: "R1",
        })
        .unwrap();
        assert_eq!(body["accessToken"], "A1");
        assert_eq!(body["refreshToken"], "R1");
    }
}
