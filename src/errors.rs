use thiserror::Error;

/// What went wrong on the way to (or back from) the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// No response (connection refused or timed out).
    Network,
    /// Non-2xx response other than 401/404.
    Server { status: u16 },
    /// 404. For configuration fetches this means "nothing saved yet".
    NotFound,
    /// 401, or a stateful-mode request with no token.
    Unauthorized,
    /// A 2xx response whose body could not be decoded.
    Malformed,
    /// The local token cache could not be read or written.
    Storage,
}

/// The single failure channel of the remote access client.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ApiErrorKind::NotFound
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == ApiErrorKind::Unauthorized
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ApiError::new(
                ApiErrorKind::Malformed,
                format!("Failed to parse response: {}", err),
            )
            .with_cause(err);
        }
        if let Some(status) = err.status() {
            let kind = match status.as_u16() {
                401 => ApiErrorKind::Unauthorized,
                404 => ApiErrorKind::NotFound,
                code => ApiErrorKind::Server { status: code },
            };
            return ApiError::new(kind, format!("Request failed: {}", err)).with_cause(err);
        }
        ApiError::new(ApiErrorKind::Network, format!("Request failed: {}", err)).with_cause(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError {
            kind: ApiErrorKind::Storage,
            message: format!("Token cache error: {:#}", err),
            cause: Some(err.into()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::new(
            ApiErrorKind::Malformed,
            format!("Failed to parse response: {}", err),
        )
        .with_cause(err)
    }
}

/// Local, structural problems with the draft configuration or credentials.
/// These never reach the network layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Search term {index} is empty")]
    EmptySearchTerm { index: usize },

    #[error("At least one search term is required")]
    NoSearchTerms,

    #[error("The last search term cannot be removed")]
    LastSearchTerm,

    #[error("The last excluded keyword slot cannot be removed")]
    LastExcludedKeyword,

    #[error("Index {index} is out of range (list has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Application message is required")]
    EmptyApplicationMessage,

    #[error("Max applications per session must be between 1 and 1000 (got {0})")]
    MaxApplicationsOutOfRange(u32),

    #[error("Delay between applications must be between 1 and 60 seconds (got {0})")]
    DelayOutOfRange(u32),

    #[error("A valid email address is required")]
    InvalidIdentity,

    #[error("Password is required")]
    MissingSecret,

    #[error("Unknown {field} value: '{value}'")]
    UnknownOption { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// A response arrived after the synchronizer moved on. Never shown to users.
    #[error("Stale result discarded: {0}")]
    StaleResult(String),

    #[error("Synchronizer stopped")]
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatsError {
    #[error("Invalid date in daily statistics: '{0}'")]
    InvalidDate(String),
}
