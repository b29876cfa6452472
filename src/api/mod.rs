// Remote access client: one HTTP client, one authentication strategy.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::errors::{ApiError, ApiErrorKind};
use crate::models::{
    AuthMode, ClientConfig, Credentials, GlobalStatistics, SearchConfiguration, Statistics,
};
use crate::storage::{ProfileStorage, SESSION_TOKEN_KEY};
use crate::sync::ConfigBackend;

/// Every backend call the client knows how to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetConfig,
    SaveConfig,
    Statistics,
    AdvancedStatistics,
    StartSession,
    ClearData,
    Login,
    AuthStatus,
}

impl Operation {
    pub fn method(&self) -> Method {
        match self {
            Operation::GetConfig
            | Operation::Statistics
            | Operation::AdvancedStatistics
            | Operation::AuthStatus => Method::GET,
            Operation::SaveConfig | Operation::StartSession | Operation::Login => Method::POST,
            Operation::ClearData => Method::DELETE,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Operation::GetConfig | Operation::SaveConfig => "/config",
            Operation::Statistics => "/statistics",
            Operation::AdvancedStatistics => "/statistics/advanced",
            Operation::StartSession => "/session/start",
            Operation::ClearData => "/data",
            Operation::Login => "/auth/login",
            Operation::AuthStatus => "/auth/status",
        }
    }
}

/// Generic `{"message": ...}` acknowledgement returned by mutating endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token")]
    token: String,
}

fn default_authenticated() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AuthStatusResponse {
    #[serde(default = "default_authenticated")]
    authenticated: bool,
    #[serde(default, alias = "identity")]
    email: Option<String>,
}

#[derive(Debug, Clone)]
struct SessionToken {
    token: String,
    /// Identity the token was issued for, when known.
    identity: Option<String>,
}

/// The authentication strategy, fixed when the client is built.
enum AuthStrategy {
    CredentialPerCall {
        credentials: Option<Credentials>,
    },
    CachedToken {
        storage: Arc<dyn ProfileStorage>,
        session: Option<SessionToken>,
    },
}

/// What gets attached to one outgoing request.
enum AuthMaterial {
    Params(Credentials),
    Bearer(String),
    Anonymous,
}

/// Turn a transport failure into a user-facing ApiError.
fn transport_error(err: reqwest::Error, base_url: &str) -> ApiError {
    if err.is_connect() || err.is_timeout() {
        ApiError::new(
            ApiErrorKind::Network,
            format!("Could not connect to backend at {}. Is it running?", base_url),
        )
        .with_cause(err)
    } else {
        err.into()
    }
}

/// Pull a human-readable message out of an error response body.
/// FastAPI puts it in `detail`; other handlers use `message`.
pub fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        match &json["detail"] {
            Value::String(detail) => return detail.clone(),
            Value::Null => {}
            other => return other.to_string(),
        }
        if let Some(message) = json["message"].as_str() {
            return message.to_string();
        }
    }
    status
        .canonical_reason()
        .unwrap_or("Server error")
        .to_string()
}

/// Inject credential fields into a POST body (stateless mode).
fn merge_credentials(payload: Option<Value>, credentials: &Credentials) -> Result<Value, ApiError> {
    let mut body = match payload {
        None => serde_json::Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(ApiError::new(
                ApiErrorKind::Malformed,
                "Request body must be a JSON object",
            ))
        }
    };
    body.insert("email".to_string(), Value::String(credentials.identity.clone()));
    body.insert(
        "password".to_string(),
        Value::String(credentials.secret.clone()),
    );
    Ok(Value::Object(body))
}

pub struct ApiClient {
    http: Client,
    base_url: String,
    mode: AuthMode,
    strategy: Mutex<AuthStrategy>,
}

impl ApiClient {
    /// Build a client for `config.api_url` using `config.auth_mode`.
    /// `storage` holds the cached token and is only touched in token mode.
    pub fn new(config: &ClientConfig, storage: Arc<dyn ProfileStorage>) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| {
                ApiError::new(ApiErrorKind::Network, "Failed to create HTTP client").with_cause(e)
            })?;

        let strategy = match config.auth_mode {
            AuthMode::CredentialPerCall => AuthStrategy::CredentialPerCall { credentials: None },
            AuthMode::CachedToken => AuthStrategy::CachedToken {
                storage,
                session: None,
            },
        };

        Ok(Self {
            http,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            mode: config.auth_mode,
            strategy: Mutex::new(strategy),
        })
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when a request without explicit credentials would carry auth.
    pub async fn is_authenticated(&self) -> bool {
        match &*self.strategy.lock().await {
            AuthStrategy::CredentialPerCall { credentials } => credentials.is_some(),
            AuthStrategy::CachedToken { session, .. } => session.is_some(),
        }
    }

    /// Make `credentials` the client's current identity. Stateless mode just
    /// remembers them; token mode logs in and caches the token.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<(), ApiError> {
        let mut strategy = self.strategy.lock().await;
        match &mut *strategy {
            AuthStrategy::CredentialPerCall { credentials: held } => {
                *held = Some(credentials.clone());
                Ok(())
            }
            AuthStrategy::CachedToken { storage, session } => {
                let token = self.login(credentials).await?;
                storage.set(SESSION_TOKEN_KEY, &token).await?;
                *session = Some(SessionToken {
                    token,
                    identity: Some(credentials.identity.clone()),
                });
                tracing::info!("Logged in as {}", credentials.identity);
                Ok(())
            }
        }
    }

    /// Try to pick up a previously cached token. Returns true when the
    /// backend confirms it. A rejected token is removed from the cache; a
    /// network failure leaves it in place.
    pub async fn resume(&self) -> Result<bool, ApiError> {
        let mut strategy = self.strategy.lock().await;
        let AuthStrategy::CachedToken { storage, session } = &mut *strategy else {
            return Ok(false);
        };

        let Some(token) = storage.get(SESSION_TOKEN_KEY).await? else {
            tracing::debug!("No cached session token");
            return Ok(false);
        };

        let status_check: Result<AuthStatusResponse, ApiError> = self
            .send(Operation::AuthStatus, AuthMaterial::Bearer(token.clone()), None)
            .await;

        match status_check {
            Ok(status) if status.authenticated => {
                tracing::info!("Resumed cached session");
                *session = Some(SessionToken {
                    token,
                    identity: status.email,
                });
                Ok(true)
            }
            Ok(_) => {
                tracing::info!("Cached session token is no longer valid");
                storage.remove(SESSION_TOKEN_KEY).await?;
                *session = None;
                Ok(false)
            }
            Err(e) if e.is_unauthorized() => {
                tracing::info!("Cached session token was rejected: {}", e);
                storage.remove(SESSION_TOKEN_KEY).await?;
                *session = None;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Forget the current identity and clear the token cache.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let mut strategy = self.strategy.lock().await;
        match &mut *strategy {
            AuthStrategy::CredentialPerCall { credentials } => {
                *credentials = None;
            }
            AuthStrategy::CachedToken { storage, session } => {
                *session = None;
                storage.remove(SESSION_TOKEN_KEY).await?;
            }
        }
        tracing::info!("Logged out");
        Ok(())
    }

    /// Call `operation` as the client's current identity.
    pub async fn request<T: DeserializeOwned>(
        &self,
        operation: Operation,
        payload: Option<Value>,
    ) -> Result<T, ApiError> {
        self.request_as(None, operation, payload).await
    }

    /// Call `operation` pinned to `credentials` when given. In token mode
    /// this logs in again if the cached token belongs to someone else.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        credentials: Option<&Credentials>,
        operation: Operation,
        payload: Option<Value>,
    ) -> Result<T, ApiError> {
        let auth = self.auth_material(credentials).await?;
        let bearer = match &auth {
            AuthMaterial::Bearer(token) => Some(token.clone()),
            _ => None,
        };
        let result = self.send(operation, auth, payload).await;
        if let (Err(e), Some(token)) = (&result, bearer) {
            if e.is_unauthorized() {
                self.drop_session(&token).await;
            }
        }
        result
    }

    /// Forget a cached token the backend no longer accepts. Another caller
    /// may already have replaced it, in which case nothing changes.
    async fn drop_session(&self, token: &str) {
        let mut strategy = self.strategy.lock().await;
        let AuthStrategy::CachedToken { storage, session } = &mut *strategy else {
            return;
        };
        if session.as_ref().is_some_and(|s| s.token == token) {
            tracing::info!("Session token was rejected, clearing it");
            *session = None;
            if let Err(e) = storage.remove(SESSION_TOKEN_KEY).await {
                tracing::warn!("Failed to remove session token: {}", e);
            }
        }
    }

    async fn auth_material(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<AuthMaterial, ApiError> {
        let mut strategy = self.strategy.lock().await;
        match &mut *strategy {
            AuthStrategy::CredentialPerCall { credentials: held } => {
                match credentials.or(held.as_ref()) {
                    Some(creds) => Ok(AuthMaterial::Params(creds.clone())),
                    None => Err(ApiError::new(
                        ApiErrorKind::Unauthorized,
                        "No credentials provided",
                    )),
                }
            }
            AuthStrategy::CachedToken { storage, session } => {
                let Some(creds) = credentials else {
                    return match session {
                        Some(s) => Ok(AuthMaterial::Bearer(s.token.clone())),
                        None => Err(ApiError::new(
                            ApiErrorKind::Unauthorized,
                            "Not logged in (try: autoapply login)",
                        )),
                    };
                };
                if let Some(s) = session {
                    if s.identity.as_deref() == Some(creds.identity.as_str()) {
                        return Ok(AuthMaterial::Bearer(s.token.clone()));
                    }
                }
                // Held across the login so concurrent callers reuse one token.
                let token = self.login(creds).await?;
                storage.set(SESSION_TOKEN_KEY, &token).await?;
                *session = Some(SessionToken {
                    token: token.clone(),
                    identity: Some(creds.identity.clone()),
                });
                tracing::info!("Logged in as {}", creds.identity);
                Ok(AuthMaterial::Bearer(token))
            }
        }
    }

    async fn login(&self, credentials: &Credentials) -> Result<String, ApiError> {
        let payload = serde_json::to_value(credentials)?;
        let response: LoginResponse = self
            .send(Operation::Login, AuthMaterial::Anonymous, Some(payload))
            .await?;
        Ok(response.token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: Operation,
        auth: AuthMaterial,
        payload: Option<Value>,
    ) -> Result<T, ApiError> {
        let method = operation.method();
        let url = format!("{}{}", self.base_url, operation.path());
        tracing::debug!("{} {}", method, url);

        let is_post = method == Method::POST;
        let mut builder = self
            .http
            .request(method, &url)
            .header(CONTENT_TYPE, "application/json");

        let body = match auth {
            AuthMaterial::Params(creds) if is_post => Some(merge_credentials(payload, &creds)?),
            AuthMaterial::Params(creds) => {
                builder = builder.query(&[
                    ("email", creds.identity.as_str()),
                    ("password", creds.secret.as_str()),
                ]);
                payload
            }
            AuthMaterial::Bearer(token) => {
                builder = builder.bearer_auth(token);
                payload
            }
            AuthMaterial::Anonymous => payload,
        };
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, &self.base_url))?;
        decode(response).await
    }

    // -----------------------------------------------------------------------
    // Typed endpoints
    // -----------------------------------------------------------------------

    /// Fetch the saved configuration. `None` means nothing is saved yet.
    pub async fn fetch_config(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<Option<SearchConfiguration>, ApiError> {
        match self
            .request_as::<SearchConfiguration>(credentials, Operation::GetConfig, None)
            .await
        {
            Ok(config) => Ok(Some(config.normalized())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn save_config(
        &self,
        credentials: Option<&Credentials>,
        config: &SearchConfiguration,
    ) -> Result<ApiMessage, ApiError> {
        let payload = serde_json::to_value(config.clone().normalized())?;
        self.request_as(credentials, Operation::SaveConfig, Some(payload))
            .await
    }

    /// Basic counters. A 404 for an identity with no history is empty.
    pub async fn statistics(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<Statistics, ApiError> {
        match self
            .request_as(credentials, Operation::Statistics, None)
            .await
        {
            Err(e) if e.is_not_found() => Ok(Statistics::default()),
            other => other,
        }
    }

    pub async fn advanced_statistics(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<GlobalStatistics, ApiError> {
        match self
            .request_as(credentials, Operation::AdvancedStatistics, None)
            .await
        {
            Err(e) if e.is_not_found() => Ok(GlobalStatistics::default()),
            other => other,
        }
    }

    pub async fn start_session(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<ApiMessage, ApiError> {
        self.request_as(credentials, Operation::StartSession, None)
            .await
    }

    pub async fn clear_data(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<ApiMessage, ApiError> {
        self.request_as(credentials, Operation::ClearData, None)
            .await
    }
}

/// Map a response onto `T`, or onto the single ApiError channel.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        let message = error_message(status, &bytes);
        let kind = match status {
            StatusCode::UNAUTHORIZED => ApiErrorKind::Unauthorized,
            StatusCode::NOT_FOUND => ApiErrorKind::NotFound,
            other => ApiErrorKind::Server {
                status: other.as_u16(),
            },
        };
        tracing::debug!("Backend returned {}: {}", status, message);
        return Err(ApiError::new(kind, message));
    }

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_str("{}")?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl ConfigBackend for ApiClient {
    async fn fetch_config(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<SearchConfiguration>, ApiError> {
        ApiClient::fetch_config(self, Some(credentials)).await
    }

    async fn save_config(
        &self,
        credentials: &Credentials,
        config: &SearchConfiguration,
    ) -> Result<(), ApiError> {
        ApiClient::save_config(self, Some(credentials), config).await?;
        Ok(())
    }
}
