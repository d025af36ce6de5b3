//! Sync context - dependency injection container
//!
//! One [`SyncContext`] owns the connectivity state, the encrypted store, the
//! outbox and every background worker for one signed-in app instance.
//! Several contexts can live in one process; nothing is global.

use std::sync::Arc;
use std::time::{Duration, Instant};

use haven_core::auth::TokenStore;
use haven_core::store::KeyValueStore;
use haven_core::sync::{
    BackgroundWake, DrainReport, EngineSettings, EnqueueOutcome, OutboxEvent, OutboxQueue,
    OutboxSyncEngine, RemoteApi, RetryPolicy,
};
use haven_core::{
    CacheManager, Clock, ConnectivityMonitor, CredentialVault, ListenerId, LocalStore,
    ReadOptions, RefreshWorker, RequestExecutor, SystemClock,
};
use haven_domain::{
    AuthOutcome, CacheKey, CacheRead, Config, ConnectivityState, EntityData, EntityType, HavenError,
    MutationKind, MutationPayload, OfflineSession, OutboxItem, Result, WriteOutcome,
};
use haven_infra::{
    DbManager, KeyManager, KeychainTokenStore, ReachabilityProbe, RestApiClient,
    SqliteKeyValueStore, SyncTrigger, SyncWorker, SyncWorkerConfig,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::utils::log_operation;

/// Externally provided collaborators for [`SyncContext::from_parts`].
pub struct ContextParts {
    pub store: Arc<dyn KeyValueStore>,
    pub remote: Arc<dyn RemoteApi>,
    pub tokens: Arc<dyn TokenStore>,
    pub clock: Arc<dyn Clock>,
    /// Host background-execution primitive, if the platform has one.
    pub background: Option<Arc<dyn BackgroundWake>>,
}

struct Workers {
    sync: Option<SyncWorker>,
    refresh: RefreshWorker,
    probe: Option<ReachabilityProbe>,
}

/// Entry point for the application: reads, writes, auth and outbox control,
/// all routed by connectivity.
pub struct SyncContext {
    config: Config,
    monitor: ConnectivityMonitor,
    executor: RequestExecutor,
    engine: Arc<OutboxSyncEngine>,
    vault: CredentialVault,
    remote: Arc<dyn RemoteApi>,
    tokens: Arc<dyn TokenStore>,
    trigger: SyncTrigger,
    db: Option<Arc<DbManager>>,
    workers: Mutex<Option<Workers>>,
}

impl SyncContext {
    /// Open the encrypted store and connect to the configured backend.
    ///
    /// The SQLCipher key comes from `database.encryption_key` when set and
    /// from the platform keychain otherwise (generated on first run).
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;

        let encryption_key = match config.database.encryption_key.clone() {
            Some(key) => {
                debug!("using configured database encryption key");
                key
            }
            None => {
                info!("fetching database encryption key from keychain");
                KeyManager::new(&config.auth.keychain_service).get_or_create_key().map_err(
                    |e| {
                        tracing::error!(error = %e, "failed to retrieve encryption key from keychain");
                        e
                    },
                )?
            }
        };

        let db = Arc::new(DbManager::new(
            &config.database.path,
            config.database.pool_size,
            Some(encryption_key.as_str()),
        )?);
        db.run_migrations()?;

        let tokens: Arc<dyn TokenStore> =
            Arc::new(KeychainTokenStore::new(&config.auth.keychain_service));
        let remote: Arc<dyn RemoteApi> =
            Arc::new(RestApiClient::new(&config.api, Arc::clone(&tokens))?);

        let parts = ContextParts {
            store: Arc::new(SqliteKeyValueStore::new(Arc::clone(&db))),
            remote,
            tokens,
            clock: Arc::new(SystemClock),
            background: None,
        };
        let mut context = Self::from_parts(config, parts).await?;
        context.db = Some(db);
        Ok(context)
    }

    /// Assemble a context from explicit collaborators and start its workers.
    pub async fn from_parts(config: Config, parts: ContextParts) -> Result<Self> {
        config.validate()?;
        let ContextParts { store, remote, tokens, clock, background } = parts;

        let store = LocalStore::new(store);
        let monitor = ConnectivityMonitor::new(
            config.connectivity.initially_online,
            Duration::from_millis(config.connectivity.debounce_ms),
            Arc::clone(&clock),
        );

        let (refresh_tx, refresh_rx) = mpsc::channel(config.cache.refresh_queue_capacity.max(1));
        let cache = CacheManager::new(
            store.clone(),
            monitor.clone(),
            Arc::clone(&clock),
            config.cache.default_ttl_ms,
        )
        .with_refresh_sink(refresh_tx);
        let outbox = OutboxQueue::new(store.clone(), Arc::clone(&clock));

        let request_timeout = Duration::from_millis(config.api.request_timeout_ms);
        let executor = RequestExecutor::new(
            Arc::clone(&remote),
            cache.clone(),
            outbox.clone(),
            monitor.clone(),
            Arc::clone(&clock),
            request_timeout,
        )
        .with_retry_policy(RetryPolicy::from_config(&config.sync));

        let settings = EngineSettings {
            policy: RetryPolicy::from_config(&config.sync),
            request_timeout,
            inflight_lease: i64::try_from(config.sync.inflight_lease_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
        };
        let engine = Arc::new(OutboxSyncEngine::new(
            outbox,
            Arc::clone(&remote),
            cache,
            monitor.clone(),
            Arc::clone(&clock),
            settings,
        ));

        let vault = CredentialVault::new(
            store,
            monitor.clone(),
            Arc::clone(&clock),
            chrono::Duration::try_hours(config.auth.offline_session_hours)
                .unwrap_or(chrono::Duration::MAX),
        );

        let mut refresh = RefreshWorker::new(executor.clone(), refresh_rx);
        refresh.start().map_err(HavenError::Internal)?;

        let mut sync = SyncWorker::new(
            Arc::clone(&engine),
            monitor.clone(),
            clock,
            SyncWorkerConfig::from_sync_config(&config.sync),
        );
        let trigger = sync.trigger();
        let sync = if config.sync.enabled {
            sync.start().map_err(HavenError::Internal)?;
            Some(sync)
        } else {
            info!("background sync disabled; outbox drains only on sync_now");
            None
        };

        let probe = if config.connectivity.probe_enabled {
            let mut probe = ReachabilityProbe::new(
                Arc::clone(&remote),
                monitor.clone(),
                Duration::from_secs(config.connectivity.probe_interval_secs.max(1)),
            );
            probe.start().map_err(HavenError::Internal)?;
            Some(probe)
        } else {
            None
        };

        if let Some(background) = background {
            let trigger = trigger.clone();
            background.register(Arc::new(move || trigger.wake()));
        }

        info!(
            base_url = %config.api.base_url,
            sync_enabled = config.sync.enabled,
            probe_enabled = config.connectivity.probe_enabled,
            "sync context initialised"
        );

        Ok(Self {
            config,
            monitor,
            executor,
            engine,
            vault,
            remote,
            tokens,
            trigger,
            db: None,
            workers: Mutex::new(Some(Workers { sync, refresh, probe })),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The monitor hosts feed platform connectivity signals into.
    pub fn connectivity_monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    /* ------------------------------------------------------------------ */
    /* Reads */
    /* ------------------------------------------------------------------ */

    #[instrument(skip(self))]
    pub async fn get_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        options: ReadOptions,
    ) -> Result<CacheRead<EntityData>> {
        let started = Instant::now();
        let result = self.executor.get_entity(entity_type, id, options).await;
        log_operation("get_entity", started.elapsed(), result.as_ref().map(|_| ()));
        result
    }

    #[instrument(skip(self))]
    pub async fn list_entities(
        &self,
        entity_type: EntityType,
        options: ReadOptions,
    ) -> Result<CacheRead<EntityData>> {
        let started = Instant::now();
        let result = self.executor.list_entities(entity_type, options).await;
        log_operation("list_entities", started.elapsed(), result.as_ref().map(|_| ()));
        result
    }

    /// Whether an entity can be shown without the network.
    pub async fn is_available_offline(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        self.executor.cache().is_available_offline(&CacheKey::entity(entity_type, id)).await
    }

    /// Drop every cached read. The outbox and credentials are kept.
    pub async fn clear_cache(&self) -> Result<usize> {
        self.executor.cache().clear().await
    }

    /* ------------------------------------------------------------------ */
    /* Writes */
    /* ------------------------------------------------------------------ */

    #[instrument(skip(self, payload))]
    pub async fn submit_mutation(
        &self,
        kind: MutationKind,
        target_entity_id: &str,
        payload: MutationPayload,
    ) -> Result<WriteOutcome> {
        let started = Instant::now();
        let result = self.executor.submit_mutation(kind, target_entity_id, payload).await;
        log_operation("submit_mutation", started.elapsed(), result.as_ref().map(|_| ()));

        if matches!(result, Ok(WriteOutcome::AcceptedOffline { .. })) && self.monitor.is_online() {
            self.trigger.wake();
        }
        result
    }

    /// Every outbox item in enqueue order, including terminal ones not yet
    /// purged.
    pub async fn outbox_items(&self) -> Result<Vec<OutboxItem>> {
        self.engine.queue().list().await
    }

    /// Items that will not be retried and need the user's attention.
    pub async fn failed_mutations(&self) -> Result<Vec<OutboxItem>> {
        self.engine.queue().failed_items().await
    }

    /// Queue a fresh copy of a failed item. The failed item stays as it is.
    pub async fn resubmit(&self, failed_id: &str) -> Result<EnqueueOutcome> {
        let outcome = self.engine.queue().resubmit(failed_id).await?;
        self.trigger.wake();
        Ok(outcome)
    }

    /// Outbox status changes as they happen.
    pub fn subscribe_outbox(&self) -> broadcast::Receiver<OutboxEvent> {
        self.engine.subscribe()
    }

    /// Run one drain pass now and report what it did.
    pub async fn sync_now(&self) -> Result<DrainReport> {
        let started = Instant::now();
        let result = self.engine.drain().await;
        log_operation("sync_now", started.elapsed(), result.as_ref().map(|_| ()));
        result
    }

    /// Ask the background worker for a pass without waiting for it.
    pub fn wake(&self) {
        self.trigger.wake();
    }

    /* ------------------------------------------------------------------ */
    /* Connectivity */
    /* ------------------------------------------------------------------ */

    pub fn get_connectivity(&self) -> ConnectivityState {
        self.monitor.state()
    }

    pub fn on_connectivity_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        self.monitor.on_change(callback)
    }

    pub fn remove_connectivity_listener(&self, id: ListenerId) -> bool {
        self.monitor.remove_listener(id)
    }

    /* ------------------------------------------------------------------ */
    /* Authentication */
    /* ------------------------------------------------------------------ */

    /// Log in online when possible, offline otherwise.
    ///
    /// An online login refreshes the offline record. If the server cannot be
    /// reached the offline record is tried instead. A 401 from the server
    /// removes the offline record, since the password it was derived from is
    /// no longer valid.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<AuthOutcome> {
        let started = Instant::now();
        let result = self.authenticate_inner(email, password).await;
        log_operation("authenticate", started.elapsed(), result.as_ref().map(|_| ()));
        result
    }

    async fn authenticate_inner(&self, email: &str, password: &str) -> Result<AuthOutcome> {
        if !self.monitor.is_online() {
            let session = self.vault.offline_authenticate(email, password).await?;
            return Ok(AuthOutcome::Offline { session });
        }

        let timeout = Duration::from_millis(self.config.api.request_timeout_ms);
        let login = match tokio::time::timeout(timeout, self.remote.login(email, password)).await {
            Ok(result) => result,
            Err(_) => Err(HavenError::ServerUnavailable {
                status: None,
                message: "login timed out".into(),
            }),
        };

        match login {
            Ok(grant) => {
                self.tokens.save_token(&grant.access_token).await?;
                self.vault.remember(email, password, grant.profile.clone()).await?;
                info!("online login succeeded");
                Ok(AuthOutcome::Online { profile: grant.profile })
            }
            Err(err @ HavenError::ServerRejected { status: 401, .. }) => {
                if self.vault.forget(email).await? {
                    info!("offline record removed after rejected login");
                }
                Err(err)
            }
            Err(err) if is_unreachable(&err) => {
                warn!(error = %err, "server unreachable, trying offline login");
                self.monitor.set_online(false);
                let session = self.vault.offline_authenticate(email, password).await?;
                Ok(AuthOutcome::Offline { session })
            }
            Err(err) => Err(err),
        }
    }

    /// The active offline session, if any.
    pub async fn current_session(&self) -> Result<Option<OfflineSession>> {
        self.vault.current_session().await
    }

    /// End the session and drop the access token. Offline records stay so
    /// the user can log in again without a connection.
    pub async fn logout(&self) -> Result<()> {
        self.tokens.clear_token().await?;
        self.vault.logout().await?;
        info!("logged out");
        Ok(())
    }

    /* ------------------------------------------------------------------ */
    /* Lifecycle */
    /* ------------------------------------------------------------------ */

    /// Verify the local store still answers queries.
    pub fn health_check(&self) -> Result<()> {
        match &self.db {
            Some(db) => db.health_check(),
            None => Ok(()),
        }
    }

    /// Stop every background worker. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(mut workers) = self.workers.lock().await.take() else {
            debug!("shutdown called twice on SyncContext");
            return Ok(());
        };
        info!("shutting down sync context");

        if let Some(probe) = workers.probe.as_mut() {
            if let Err(e) = probe.stop().await {
                warn!(error = %e, "reachability probe did not stop cleanly");
            }
        }
        if let Some(sync) = workers.sync.as_mut() {
            if let Err(e) = sync.stop().await {
                warn!(error = %e, "sync worker did not stop cleanly");
            }
        }
        if let Err(e) = workers.refresh.stop().await {
            warn!(error = %e, "refresh worker did not stop cleanly");
        }
        Ok(())
    }
}

/// A transport failure or a timeout without any HTTP answer.
fn is_unreachable(err: &HavenError) -> bool {
    matches!(
        err,
        HavenError::NetworkUnavailable(_) | HavenError::ServerUnavailable { status: None, .. }
    )
}
