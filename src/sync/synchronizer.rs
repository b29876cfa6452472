use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;

use super::{ConfigBackend, SyncCommand, SyncEvent, SyncHandle, SyncSnapshot, SyncState};
use crate::errors::{ApiError, ClientError};
use crate::models::{ClientConfig, ConfigDraft, ConfigEdit, Credentials, SearchConfiguration};

/// Results of background network calls, tagged with the identity epoch
/// (and save version) that issued them.
enum Outcome {
    Loaded {
        epoch: u64,
        result: Result<Option<SearchConfiguration>, ApiError>,
    },
    Saved {
        epoch: u64,
        version: u64,
        config: SearchConfiguration,
        result: Result<(), ApiError>,
    },
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owns the editable configuration and every piece of sync state. Runs as
/// a single task; callers reach it through a [`SyncHandle`].
pub struct ConfigSynchronizer {
    backend: Arc<dyn ConfigBackend>,
    debounce: Duration,
    notice_ttl: Duration,

    credentials: Option<Credentials>,
    /// Bumped on every identity change. Loads and saves from an older epoch
    /// are stale.
    epoch: u64,
    loading: bool,
    draft: ConfigDraft,
    last_saved: Option<SearchConfiguration>,
    /// Identity whose configuration `draft` and `last_saved` hold.
    loaded_identity: Option<String>,
    /// Edits made before the current identity's configuration arrived.
    queued_edits: Vec<ConfigEdit>,

    save_deadline: Option<Instant>,
    /// (epoch, version) of the one save allowed in flight.
    in_flight: Option<(u64, u64)>,
    /// The debounce fired while a save was in flight.
    resave: bool,
    last_version: u64,

    notice: Option<String>,
    notice_deadline: Option<Instant>,
    flush_waiters: Vec<oneshot::Sender<SyncSnapshot>>,

    outcome_tx: mpsc::UnboundedSender<Outcome>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    events: broadcast::Sender<SyncEvent>,
}

impl ConfigSynchronizer {
    /// Start a synchronizer task on the current runtime.
    pub fn spawn(backend: Arc<dyn ConfigBackend>, config: &ClientConfig) -> SyncHandle {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SyncSnapshot::default());
        let (events, _) = broadcast::channel(256);

        let synchronizer = ConfigSynchronizer {
            backend,
            debounce: config.debounce(),
            notice_ttl: config.notice_ttl(),
            credentials: None,
            epoch: 0,
            loading: false,
            draft: ConfigDraft::default(),
            last_saved: None,
            loaded_identity: None,
            queued_edits: Vec::new(),
            save_deadline: None,
            in_flight: None,
            resave: false,
            last_version: 0,
            notice: None,
            notice_deadline: None,
            flush_waiters: Vec::new(),
            outcome_tx,
            snapshot_tx,
            events: events.clone(),
        };

        tokio::spawn(synchronizer.run(command_rx, outcome_rx));

        SyncHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            events,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SyncCommand>,
        mut outcomes: mpsc::UnboundedReceiver<Outcome>,
    ) {
        loop {
            let save_at = self.save_deadline;
            let notice_at = self.notice_deadline;

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(outcome) = outcomes.recv() => self.handle_outcome(outcome),
                _ = sleep_until_opt(save_at) => self.fire_save(),
                _ = sleep_until_opt(notice_at) => self.clear_notice(),
            }

            self.publish();
        }
        tracing::debug!("Config synchronizer stopped");
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    fn credentials_complete(&self) -> bool {
        self.credentials.as_ref().is_some_and(Credentials::is_complete)
    }

    fn state(&self) -> SyncState {
        if !self.credentials_complete() {
            SyncState::Uninitialized
        } else if self.loading {
            SyncState::Loading
        } else if self.save_deadline.is_some() || self.resave {
            SyncState::PendingSave
        } else if self.in_flight.is_some() {
            SyncState::Saving
        } else if self.notice.is_some() {
            SyncState::SaveFailed
        } else {
            SyncState::Idle
        }
    }

    fn snapshot(&self) -> SyncSnapshot {
        let mut field_errors = Vec::new();
        if let Some(Err(e)) = self.credentials.as_ref().map(Credentials::validate) {
            field_errors.push(e);
        }
        field_errors.extend(self.draft.errors());

        SyncSnapshot {
            state: self.state(),
            draft: self.draft.clone(),
            identity: self.credentials.as_ref().map(|c| c.identity.clone()),
            last_saved: self.last_saved.clone(),
            field_errors,
            notice: self.notice.clone(),
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        if snapshot.state.is_settled() {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(snapshot.clone());
            }
        }
        self.snapshot_tx.send_replace(snapshot);
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn discard_stale(&self, what: &str, epoch: u64) {
        let err = ClientError::StaleResult(format!(
            "{} from epoch {} (current epoch {})",
            what, epoch, self.epoch
        ));
        tracing::debug!("{}", err);
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::SetCredentials(credentials, ack) => {
                self.set_credentials(credentials);
                // Callers observe the new state as soon as they are acknowledged.
                self.publish();
                let _ = ack.send(());
            }
            SyncCommand::Edit(edit, reply) => {
                let result = self.apply_edit(edit);
                self.publish();
                let _ = reply.send(result);
            }
            SyncCommand::Flush(reply) => {
                if self.save_deadline.is_some() {
                    self.fire_save();
                }
                self.flush_waiters.push(reply);
            }
        }
    }

    fn set_credentials(&mut self, credentials: Option<Credentials>) {
        if credentials == self.credentials {
            return;
        }

        // Anything still in flight belongs to the previous identity.
        let had_identity = self.credentials_complete();
        self.epoch += 1;
        self.save_deadline = None;
        self.in_flight = None;
        self.resave = false;
        self.loading = false;
        self.clear_notice_silently();
        if had_identity {
            self.queued_edits.clear();
        }
        let keeps_loaded = match (&self.loaded_identity, &credentials) {
            (None, _) => true,
            (Some(_), Some(creds)) if !creds.is_complete() => true,
            (Some(loaded), Some(creds)) => *loaded == creds.identity,
            (Some(_), None) => false,
        };
        if !keeps_loaded {
            self.draft = ConfigDraft::default();
            self.last_saved = None;
            self.loaded_identity = None;
            self.queued_edits.clear();
        }
        self.credentials = credentials;

        match self.credentials.clone() {
            Some(creds) if creds.is_complete() => {
                tracing::info!("Loading configuration for {}", creds.identity);
                self.loading = true;
                self.spawn_load(creds);
            }
            Some(_) => {
                tracing::debug!("Credentials incomplete, waiting before loading");
            }
            None => {
                tracing::debug!("Credentials cleared");
            }
        }
    }

    fn apply_edit(&mut self, edit: ConfigEdit) -> Result<(), crate::errors::ValidationError> {
        self.draft.apply(edit.clone())?;

        if !self.credentials_complete() || self.loading {
            // Replayed on top of whatever the load produces.
            self.queued_edits.push(edit);
            return Ok(());
        }

        self.schedule_save();
        Ok(())
    }

    /// Restart the debounce timer if the draft can be saved, otherwise
    /// cancel any pending save: only the latest state may be sent.
    fn schedule_save(&mut self) {
        if self.draft.validate().is_ok() {
            self.save_deadline = Some(Instant::now() + self.debounce);
            tracing::debug!("Save scheduled in {:?}", self.debounce);
        } else if self.save_deadline.take().is_some() {
            tracing::debug!("Draft invalid, pending save cancelled");
        }
    }

    fn fire_save(&mut self) {
        self.save_deadline = None;

        if self.in_flight.is_some() {
            self.resave = true;
            return;
        }

        let Some(credentials) = self.credentials.clone().filter(Credentials::is_complete) else {
            return;
        };
        let config = match self.draft.validate() {
            Ok(config) => config,
            Err(errors) => {
                tracing::debug!("Not saving invalid draft: {:?}", errors);
                return;
            }
        };

        self.last_version += 1;
        let version = self.last_version;
        let epoch = self.epoch;
        self.in_flight = Some((epoch, version));
        tracing::debug!("Saving configuration v{} for {}", version, credentials.identity);

        let backend = Arc::clone(&self.backend);
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = backend.save_config(&credentials, &config).await;
            let _ = outcome_tx.send(Outcome::Saved {
                epoch,
                version,
                config,
                result,
            });
        });
    }

    fn spawn_load(&self, credentials: Credentials) {
        let epoch = self.epoch;
        let backend = Arc::clone(&self.backend);
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let result = backend.fetch_config(&credentials).await;
            let _ = outcome_tx.send(Outcome::Loaded { epoch, result });
        });
    }

    // -----------------------------------------------------------------------
    // Outcomes
    // -----------------------------------------------------------------------

    fn handle_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Loaded { epoch, result } => self.on_loaded(epoch, result),
            Outcome::Saved {
                epoch,
                version,
                config,
                result,
            } => self.on_saved(epoch, version, config, result),
        }
    }

    fn on_loaded(&mut self, epoch: u64, result: Result<Option<SearchConfiguration>, ApiError>) {
        if epoch != self.epoch || !self.loading {
            self.discard_stale("configuration load", epoch);
            return;
        }
        self.loading = false;

        let identity = self
            .credentials
            .as_ref()
            .map(|c| c.identity.clone())
            .unwrap_or_default();

        self.loaded_identity = Some(identity.clone());
        let from_remote = match result {
            Ok(Some(config)) => {
                tracing::info!("Loaded saved configuration for {}", identity);
                self.draft = ConfigDraft::from_config(&config);
                self.last_saved = Some(config);
                true
            }
            Ok(None) => {
                tracing::info!("No saved configuration for {}, using defaults", identity);
                self.draft = ConfigDraft::default();
                self.last_saved = None;
                false
            }
            Err(e) => {
                tracing::debug!("Configuration load failed ({}), using defaults", e);
                self.draft = ConfigDraft::default();
                self.last_saved = None;
                false
            }
        };

        let queued = std::mem::take(&mut self.queued_edits);
        let replayed = !queued.is_empty();
        for edit in queued {
            if let Err(e) = self.draft.apply(edit) {
                tracing::debug!("Queued edit no longer applies: {}", e);
            }
        }
        if replayed {
            self.schedule_save();
        }

        self.emit(SyncEvent::Loaded {
            identity,
            from_remote,
        });
    }

    fn on_saved(
        &mut self,
        epoch: u64,
        version: u64,
        config: SearchConfiguration,
        result: Result<(), ApiError>,
    ) {
        if self.in_flight == Some((epoch, version)) {
            self.in_flight = None;
        }

        if epoch != self.epoch {
            self.discard_stale("configuration save", epoch);
            return;
        }

        match result {
            Ok(()) => {
                let identity = self
                    .credentials
                    .as_ref()
                    .map(|c| c.identity.clone())
                    .unwrap_or_default();
                tracing::info!("Configuration v{} saved for {}", version, identity);
                self.last_saved = Some(config);
                self.clear_notice_silently();
                self.emit(SyncEvent::Saved { identity, version });
            }
            Err(e) => {
                tracing::warn!("Failed to save configuration v{}: {}", version, e);
                let message = format!("Failed to save configuration: {}", e);
                self.notice = Some(message.clone());
                self.notice_deadline = Some(Instant::now() + self.notice_ttl);
                self.emit(SyncEvent::SaveFailed { message });
            }
        }

        if self.resave {
            self.resave = false;
            self.fire_save();
        }
    }

    fn clear_notice(&mut self) {
        self.notice_deadline = None;
        if self.notice.take().is_some() {
            self.emit(SyncEvent::NoticeCleared);
        }
    }

    fn clear_notice_silently(&mut self) {
        self.notice = None;
        self.notice_deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ApiErrorKind, ValidationError};
    use crate::models::{ContractType, PublicationTimeframe};
    use crate::sync::ConfigBackend;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    // -----------------------------------------------------------------------
    // InMemoryBackend - test double
    // -----------------------------------------------------------------------

    struct InMemoryBackend {
        configs: Mutex<HashMap<String, SearchConfiguration>>,
        saves: Mutex<Vec<(String, SearchConfiguration)>>,
        fail_saves: AtomicBool,
        fail_loads: AtomicBool,
        gate: Semaphore,
    }

    impl InMemoryBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                configs: Mutex::new(HashMap::new()),
                saves: Mutex::new(Vec::new()),
                fail_saves: AtomicBool::new(false),
                fail_loads: AtomicBool::new(false),
                gate: Semaphore::new(Semaphore::MAX_PERMITS),
            })
        }

        /// Saves block until `release_saves` is called.
        fn gated() -> Arc<Self> {
            Arc::new(Self {
                configs: Mutex::new(HashMap::new()),
                saves: Mutex::new(Vec::new()),
                fail_saves: AtomicBool::new(false),
                fail_loads: AtomicBool::new(false),
                gate: Semaphore::new(0),
            })
        }

        fn release_saves(&self, n: usize) {
            self.gate.add_permits(n);
        }

        fn seed(&self, identity: &str, config: SearchConfiguration) {
            self.configs
                .lock()
                .unwrap()
                .insert(identity.to_string(), config);
        }

        fn saves(&self) -> Vec<(String, SearchConfiguration)> {
            self.saves.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConfigBackend for InMemoryBackend {
        async fn fetch_config(
            &self,
            credentials: &Credentials,
        ) -> Result<Option<SearchConfiguration>, ApiError> {
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(ApiError::new(ApiErrorKind::Network, "offline"));
            }
            Ok(self
                .configs
                .lock()
                .unwrap()
                .get(&credentials.identity)
                .cloned())
        }

        async fn save_config(
            &self,
            credentials: &Credentials,
            config: &SearchConfiguration,
        ) -> Result<(), ApiError> {
            self.gate.acquire().await.expect("gate open").forget();
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(ApiError::new(
                    ApiErrorKind::Server { status: 500 },
                    "disk full",
                ));
            }
            self.saves
                .lock()
                .unwrap()
                .push((credentials.identity.clone(), config.clone()));
            self.seed(&credentials.identity, config.clone());
            Ok(())
        }
    }

    const DEBOUNCE: Duration = Duration::from_millis(1000);

    fn test_config() -> ClientConfig {
        ClientConfig {
            debounce_ms: 1000,
            notice_ttl_ms: 3000,
            ..ClientConfig::default()
        }
    }

    fn alice() -> Credentials {
        Credentials::new("alice@example.com", "pw-a")
    }

    fn bob() -> Credentials {
        Credentials::new("bob@example.com", "pw-b")
    }

    fn saved_config(term: &str) -> SearchConfiguration {
        SearchConfiguration {
            search_terms: vec![term.to_string()],
            contract_types: [ContractType::Contractor].into_iter().collect(),
            remote_types: Default::default(),
            publication_timeframe: PublicationTimeframe::LessThan7Days,
            excluded_keywords: vec!["php".to_string()],
            application_message: "Hello".to_string(),
            max_applications_per_session: 25,
            delay_between_applications_secs: 3,
        }
    }

    async fn loaded_handle(backend: Arc<InMemoryBackend>, creds: Credentials) -> SyncHandle {
        let handle = ConfigSynchronizer::spawn(backend, &test_config());
        handle.set_credentials(Some(creds)).await.unwrap();
        handle.wait_until_settled().await.unwrap();
        handle
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_starts_uninitialized() {
        let handle = ConfigSynchronizer::spawn(InMemoryBackend::new(), &test_config());
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SyncState::Uninitialized);
        assert_eq!(snapshot.draft, ConfigDraft::default());
        assert!(snapshot.identity.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loads_remote_config_on_credentials() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = ConfigSynchronizer::spawn(backend.clone(), &test_config());
        let mut events = handle.subscribe();

        handle.set_credentials(Some(alice())).await.unwrap();
        let snapshot = handle.wait_until_settled().await.unwrap();

        assert_eq!(snapshot.state, SyncState::Idle);
        assert_eq!(snapshot.draft.search_terms, vec!["rust"]);
        assert_eq!(snapshot.last_saved, Some(saved_config("rust")));
        assert!(snapshot.field_errors.is_empty());
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Loaded {
                identity: "alice@example.com".to_string(),
                from_remote: true
            }
        );
        // Loading never writes back.
        assert!(backend.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_falls_back_to_defaults() {
        let handle = loaded_handle(InMemoryBackend::new(), alice()).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SyncState::Idle);
        assert_eq!(snapshot.draft, ConfigDraft::default());
        assert!(snapshot.last_saved.is_none());
        assert!(snapshot.notice.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_is_silent() {
        let backend = InMemoryBackend::new();
        backend.fail_loads.store(true, Ordering::SeqCst);
        let handle = loaded_handle(backend, alice()).await;
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SyncState::Idle);
        assert!(snapshot.notice.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_credentials_do_not_load() {
        let handle = ConfigSynchronizer::spawn(InMemoryBackend::new(), &test_config());
        handle
            .set_credentials(Some(Credentials::new("alice", "pw")))
            .await
            .unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SyncState::Uninitialized);
        assert!(snapshot
            .field_errors
            .contains(&ValidationError::InvalidIdentity));
    }

    // -----------------------------------------------------------------------
    // Debounced saving
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_edits_within_window_produce_one_save_with_latest_state() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;

        for delay in 1..=5 {
            handle.edit(ConfigEdit::SetDelaySecs(delay)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(handle.snapshot().state, SyncState::PendingSave);
        assert!(backend.saves().is_empty());

        tokio::time::sleep(DEBOUNCE * 2).await;

        let saves = backend.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0, "alice@example.com");
        assert_eq!(saves[0].1.delay_between_applications_secs, 5);
        assert_eq!(handle.snapshot().state, SyncState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_edit_restarts_debounce_timer() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;

        handle.edit(ConfigEdit::SetMaxApplications(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        handle.edit(ConfigEdit::SetMaxApplications(40)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(backend.saves().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let saves = backend.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1.max_applications_per_session, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_draft_never_saved() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;

        handle
            .edit(ConfigEdit::SetApplicationMessage("  ".to_string()))
            .await
            .unwrap();
        tokio::time::sleep(DEBOUNCE * 3).await;

        assert!(backend.saves().is_empty());
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SyncState::Idle);
        assert!(snapshot
            .field_errors
            .contains(&ValidationError::EmptyApplicationMessage));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_edit_cancels_pending_save() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;

        handle.edit(ConfigEdit::SetMaxApplications(50)).await.unwrap();
        handle.edit(ConfigEdit::SetMaxApplications(0)).await.unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(backend.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_saves_immediately() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;

        handle
            .edit(ConfigEdit::AddSearchTerm("golang".to_string()))
            .await
            .unwrap();
        let snapshot = handle.flush().await.unwrap();

        assert_eq!(snapshot.state, SyncState::Idle);
        assert_eq!(backend.saves().len(), 1);
        assert_eq!(
            snapshot.last_saved.unwrap().search_terms,
            vec!["rust", "golang"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_then_reload_round_trip() {
        let backend = InMemoryBackend::new();
        let handle = loaded_handle(backend.clone(), alice()).await;

        for edit in [
            ConfigEdit::SetSearchTerm {
                index: 0,
                value: "rust".to_string(),
            },
            ConfigEdit::AddSearchTerm("embedded".to_string()),
            ConfigEdit::SetExcludedKeyword {
                index: 0,
                value: "  ".to_string(),
            },
            ConfigEdit::AddExcludedKeyword("php".to_string()),
            ConfigEdit::SetApplicationMessage("Hi there".to_string()),
            ConfigEdit::SetPublicationTimeframe(PublicationTimeframe::LessThan14Days),
        ] {
            handle.edit(edit).await.unwrap();
        }
        let saved = handle.flush().await.unwrap().last_saved.unwrap();
        assert_eq!(saved.excluded_keywords, vec!["php"]);

        let reloaded = loaded_handle(backend, alice()).await.snapshot();
        assert_eq!(reloaded.last_saved, Some(saved.clone()));
        assert_eq!(reloaded.draft.validate().unwrap(), saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_before_load_are_replayed_and_saved() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = ConfigSynchronizer::spawn(backend.clone(), &test_config());

        handle.edit(ConfigEdit::SetMaxApplications(99)).await.unwrap();
        handle.set_credentials(Some(alice())).await.unwrap();
        handle.wait_until_settled().await.unwrap();
        let snapshot = handle.flush().await.unwrap();

        assert_eq!(snapshot.draft.search_terms, vec!["rust"]);
        assert_eq!(snapshot.draft.max_applications_per_session, 99);
        let saves = backend.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1.max_applications_per_session, 99);
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_save_failure_notifies_then_returns_to_idle() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;
        let mut events = handle.subscribe();
        backend.fail_saves.store(true, Ordering::SeqCst);

        handle.edit(ConfigEdit::SetDelaySecs(9)).await.unwrap();
        let snapshot = handle.flush().await.unwrap();

        assert_eq!(snapshot.state, SyncState::SaveFailed);
        assert!(snapshot.notice.as_deref().unwrap().contains("disk full"));
        // Previously valid state is kept.
        assert_eq!(snapshot.last_saved, Some(saved_config("rust")));
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::SaveFailed { .. }
        ));

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(handle.snapshot().state, SyncState::Idle);
        assert!(handle.snapshot().notice.is_none());
        assert_eq!(events.recv().await.unwrap(), SyncEvent::NoticeCleared);
    }

    // -----------------------------------------------------------------------
    // List editing
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_removing_last_search_term_rejected() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend, alice()).await;

        let err = handle.edit(ConfigEdit::RemoveSearchTerm(0)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Validation(ValidationError::LastSearchTerm)
        ));
        assert_eq!(handle.snapshot().draft.search_terms, vec!["rust"]);
        assert_eq!(handle.snapshot().state, SyncState::Idle);
    }

    // -----------------------------------------------------------------------
    // Identity changes and ordering
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_discards_in_flight_save() {
        let backend = InMemoryBackend::gated();
        backend.seed("alice@example.com", saved_config("rust"));
        backend.seed("bob@example.com", saved_config("python"));
        let handle = loaded_handle(backend.clone(), alice()).await;
        let mut events = handle.subscribe();

        handle.edit(ConfigEdit::SetDelaySecs(42)).await.unwrap();
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(50)).await;
        assert_eq!(handle.snapshot().state, SyncState::Saving);

        handle.set_credentials(Some(bob())).await.unwrap();
        let bob_snapshot = handle.wait_until_settled().await.unwrap();
        assert_eq!(bob_snapshot.draft.search_terms, vec!["python"]);

        // Alice's save completes late.
        backend.release_saves(1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.identity.as_deref(), Some("bob@example.com"));
        assert_eq!(snapshot.last_saved, Some(saved_config("python")));
        assert_eq!(snapshot.draft.delay_between_applications_secs, 3);
        assert_eq!(snapshot.state, SyncState::Idle);

        // The write went to alice, and no Saved event leaked into bob's view.
        let saves = backend.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0, "alice@example.com");
        assert!(matches!(
            events.recv().await.unwrap(),
            SyncEvent::Loaded { ref identity, .. } if identity == "bob@example.com"
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_for_old_identity_not_surfaced() {
        let backend = InMemoryBackend::gated();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;
        backend.fail_saves.store(true, Ordering::SeqCst);

        handle.edit(ConfigEdit::SetDelaySecs(7)).await.unwrap();
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(50)).await;
        handle.set_credentials(Some(bob())).await.unwrap();
        handle.wait_until_settled().await.unwrap();

        backend.release_saves(1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SyncState::Idle);
        assert!(snapshot.notice.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_change_cancels_pending_debounce() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;

        handle.edit(ConfigEdit::SetDelaySecs(11)).await.unwrap();
        handle.set_credentials(Some(bob())).await.unwrap();
        handle.wait_until_settled().await.unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;

        assert!(backend.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_saves_are_strictly_ordered() {
        let backend = InMemoryBackend::gated();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend.clone(), alice()).await;

        handle.edit(ConfigEdit::SetDelaySecs(10)).await.unwrap();
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(50)).await;
        // First save is in flight; a newer edit must wait for it.
        handle.edit(ConfigEdit::SetDelaySecs(20)).await.unwrap();
        tokio::time::sleep(DEBOUNCE + Duration::from_millis(50)).await;
        assert_eq!(handle.snapshot().state, SyncState::PendingSave);

        backend.release_saves(2);
        let snapshot = handle.flush().await.unwrap();

        let delays: Vec<u32> = backend
            .saves()
            .iter()
            .map(|(_, c)| c.delay_between_applications_secs)
            .collect();
        assert_eq!(delays, vec![10, 20]);
        assert_eq!(
            snapshot.last_saved.unwrap().delay_between_applications_secs,
            20
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_credentials_resets_draft() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend, alice()).await;

        handle.set_credentials(None).await.unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SyncState::Uninitialized);
        assert_eq!(snapshot.draft, ConfigDraft::default());
        assert!(snapshot.last_saved.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clearing_after_incomplete_credentials_resets_draft() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend, alice()).await;

        handle
            .set_credentials(Some(Credentials::new("alice@", "pw-a")))
            .await
            .unwrap();
        handle.set_credentials(None).await.unwrap();

        let snapshot = handle.snapshot();
        assert!(snapshot.identity.is_none());
        assert_eq!(snapshot.draft, ConfigDraft::default());
        assert!(snapshot.last_saved.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_against_previous_identity_not_saved_for_next() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        backend.seed("bob@example.com", saved_config("python"));
        let handle = loaded_handle(backend.clone(), alice()).await;

        handle
            .set_credentials(Some(Credentials::new("bob@", "pw-b")))
            .await
            .unwrap();
        handle.edit(ConfigEdit::SetDelaySecs(99)).await.unwrap();
        handle.set_credentials(Some(bob())).await.unwrap();
        let snapshot = handle.wait_until_settled().await.unwrap();
        tokio::time::sleep(DEBOUNCE * 2).await;

        assert_eq!(snapshot.draft.search_terms, vec!["python"]);
        assert_eq!(snapshot.draft.delay_between_applications_secs, 3);
        assert!(backend.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_credentials_do_not_reload() {
        let backend = InMemoryBackend::new();
        backend.seed("alice@example.com", saved_config("rust"));
        let handle = loaded_handle(backend, alice()).await;
        let mut events = handle.subscribe();

        handle.edit(ConfigEdit::SetDelaySecs(8)).await.unwrap();
        handle.set_credentials(Some(alice())).await.unwrap();
        assert_eq!(handle.snapshot().state, SyncState::PendingSave);
        assert!(events.try_recv().is_err());
    }
}
