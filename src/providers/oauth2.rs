//! OAuth2 Authentication Module
//!
//! Dropbox access tokens are short-lived. The app key, app secret and a
//! long-lived refresh token are exchanged for an access token, which is cached
//! in memory and refreshed shortly before it expires.

use oauth2::{
    basic::BasicClient, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken,
    TokenResponse, TokenUrl,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::ProviderError;

/// Client with only the token endpoint set (v5 typestates)
type RefreshClient = BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Seconds before expiry at which a cached token is considered stale
const EXPIRY_BUFFER_SECS: i64 = 300;

/// Simple error wrapper for the oauth2 HTTP client adapter.
#[derive(Debug)]
struct OAuth2TransportError(String);

impl std::fmt::Display for OAuth2TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for OAuth2TransportError {}

/// Async HTTP client adapter for oauth2 v5.
/// Bridges reqwest 0.13 with oauth2's `AsyncHttpClient` trait, whose built-in
/// reqwest support targets 0.12.
struct OAuth2HttpClient;

impl<'c> oauth2::AsyncHttpClient<'c> for OAuth2HttpClient {
    type Error = oauth2::HttpClientError<OAuth2TransportError>;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<oauth2::HttpResponse, Self::Error>> + Send + Sync + 'c>,
    >;

    fn call(&'c self, request: oauth2::HttpRequest) -> Self::Future {
        Box::pin(async move {
            let client = reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))?;

            let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
                .unwrap_or(reqwest::Method::POST);
            let url = request.uri().to_string();

            let mut builder = client.request(method, &url);
            for (name, value) in request.headers() {
                builder = builder.header(name.as_str(), value.as_bytes());
            }
            builder = builder.body(request.into_body());

            let response = builder
                .send()
                .await
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))?;

            let status = http::StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))?;

            let mut http_response = http::Response::builder().status(status);
            for (name, value) in headers.iter() {
                http_response = http_response.header(name.as_str(), value.as_bytes());
            }
            http_response
                .body(body.to_vec())
                .map_err(|e| oauth2::HttpClientError::Other(e.to_string()))
        })
    }
}

/// OAuth2 configuration for the Dropbox app
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub token_url: String,
}

impl OAuthConfig {
    /// Dropbox token endpoint with the given app key and secret
    pub fn dropbox(app_key: &str, app_secret: &str) -> Self {
        Self {
            client_id: app_key.to_string(),
            client_secret: SecretString::from(app_secret.to_string()),
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
        }
    }
}

/// An access token and when it stops being valid
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: SecretString,
    /// Unix timestamp; `None` means the token does not expire
    pub expires_at: Option<i64>,
}

impl AccessToken {
    /// Check if token is expired (with 5 min buffer)
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    fn is_expired_at(&self, now: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + EXPIRY_BUFFER_SECS,
            None => false,
        }
    }
}

/// Hands out valid access tokens for one refresh token
pub struct OAuth2Manager {
    config: OAuthConfig,
    refresh_token: SecretString,
    cached: RwLock<Option<AccessToken>>,
}

impl OAuth2Manager {
    pub fn new(config: OAuthConfig, refresh_token: SecretString) -> Self {
        Self {
            config,
            refresh_token,
            cached: RwLock::new(None),
        }
    }

    /// Get valid access token (refreshing if needed)
    pub async fn get_valid_token(&self) -> Result<SecretString, ProviderError> {
        if let Some(token) = self.cached.read().await.as_ref() {
            if !token.is_expired() {
                return Ok(token.secret.clone());
            }
        }

        let token = self.refresh().await?;
        let secret = token.secret.clone();
        *self.cached.write().await = Some(token);
        Ok(secret)
    }

    /// Drop the cached token so the next request refreshes
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    /// Exchange the refresh token for a new access token
    async fn refresh(&self) -> Result<AccessToken, ProviderError> {
        debug!("Refreshing Dropbox access token");
        let client = self.create_client()?;

        let token_result = client
            .exchange_refresh_token(&RefreshToken::new(self.refresh_token.expose_secret().to_string()))
            .request_async(&OAuth2HttpClient)
            .await
            .map_err(|e| ProviderError::AuthenticationFailed(format!("Token refresh failed: {}", e)))?;

        let expires_at = token_result
            .expires_in()
            .map(|d| chrono::Utc::now().timestamp() + d.as_secs() as i64);

        info!("OAuth2 access token refreshed");
        Ok(AccessToken {
            secret: SecretString::from(token_result.access_token().secret().clone()),
            expires_at,
        })
    }

    fn create_client(&self) -> Result<RefreshClient, ProviderError> {
        let token_url = TokenUrl::new(self.config.token_url.clone())
            .map_err(|e| ProviderError::InvalidConfig(format!("Invalid token URL: {}", e)))?;

        Ok(BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.config.client_secret.expose_secret().to_string()))
            .set_token_uri(token_url))
    }
}

impl std::fmt::Debug for OAuth2Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Manager")
            .field("client_id", &self.config.client_id)
            .field("token_url", &self.config.token_url)
            .finish_non_exhaustive()
    }
}
