pub mod profile;

use anyhow::Result;
use async_trait::async_trait;

pub use profile::{JsonProfileStorage, MemoryProfileStorage};

/// Well-known key under which the session token is cached.
pub const SESSION_TOKEN_KEY: &str = "autoapply.session_token";

/// Persistent key/value storage scoped to one user profile.
#[async_trait]
pub trait ProfileStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}
