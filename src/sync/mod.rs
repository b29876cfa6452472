// Configuration synchronizer: keeps the editable draft in step with the backend.

pub mod synchronizer;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::errors::{ApiError, ClientError, ValidationError};
use crate::models::{ConfigDraft, ConfigEdit, Credentials, SearchConfiguration};

pub use synchronizer::ConfigSynchronizer;

/// The two backend calls the synchronizer needs. Implemented by
/// [`crate::api::ApiClient`]; tests substitute an in-memory backend.
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// `Ok(None)` when nothing has been saved for this identity.
    async fn fetch_config(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<SearchConfiguration>, ApiError>;

    async fn save_config(
        &self,
        credentials: &Credentials,
        config: &SearchConfiguration,
    ) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No usable credentials yet.
    Uninitialized,
    /// Fetching the configuration for the current identity.
    Loading,
    Idle,
    /// A validated edit is waiting for the debounce window to close.
    PendingSave,
    Saving,
    /// The last save failed; clears itself after the notice lifetime.
    SaveFailed,
}

impl SyncState {
    /// Nothing left to load or save.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SyncState::Uninitialized | SyncState::Idle | SyncState::SaveFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub state: SyncState,
    pub draft: ConfigDraft,
    pub identity: Option<String>,
    /// Last configuration known to be stored for `identity`.
    pub last_saved: Option<SearchConfiguration>,
    pub field_errors: Vec<ValidationError>,
    /// Transient user-facing message (save failures).
    pub notice: Option<String>,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        let draft = ConfigDraft::default();
        Self {
            state: SyncState::Uninitialized,
            field_errors: draft.errors(),
            draft,
            identity: None,
            last_saved: None,
            notice: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Loaded { identity: String, from_remote: bool },
    Saved { identity: String, version: u64 },
    SaveFailed { message: String },
    NoticeCleared,
}

pub(crate) enum SyncCommand {
    SetCredentials(Option<Credentials>, oneshot::Sender<()>),
    Edit(ConfigEdit, oneshot::Sender<Result<(), ValidationError>>),
    Flush(oneshot::Sender<SyncSnapshot>),
}

/// Cheap, cloneable handle onto a running synchronizer. The synchronizer
/// stops when the last handle is dropped.
#[derive(Clone)]
pub struct SyncHandle {
    pub(crate) commands: mpsc::Sender<SyncCommand>,
    pub(crate) snapshot: watch::Receiver<SyncSnapshot>,
    pub(crate) events: broadcast::Sender<SyncEvent>,
}

impl SyncHandle {
    /// Switch identity (or clear it with `None`). Returns once the
    /// synchronizer has accepted the change; the load runs in the background.
    pub async fn set_credentials(&self, credentials: Option<Credentials>) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SyncCommand::SetCredentials(credentials, tx))
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    pub async fn edit(&self, edit: ConfigEdit) -> Result<(), ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SyncCommand::Edit(edit, tx))
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)??;
        Ok(())
    }

    /// Send any pending save now and wait until nothing is queued or in
    /// flight.
    pub async fn flush(&self) -> Result<SyncSnapshot, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(SyncCommand::Flush(tx))
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    /// Wait for the current load (if any) to finish.
    pub async fn wait_until_settled(&self) -> Result<SyncSnapshot, ClientError> {
        let mut rx = self.snapshot.clone();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if snapshot.state.is_settled() {
                    return Ok(snapshot.clone());
                }
            }
            rx.changed().await.map_err(|_| ClientError::Stopped)?;
        }
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}
