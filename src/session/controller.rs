//! Session state machine.
//!
//! ```text
//!            submit_pairing_code                session created
//!   Idle ─────────────────────────▶ Authenticating ──────────────▶ Active ◀──┐
//!    ▲        (failure: back to Idle)      ▲                       │ pause    │ resume
//!    │                                     │ start_session         ▼          │
//!    │ disconnect                          │                     Paused ──────┘
//!    │                                     │                       │
//!    └──────────────────────────────── Stopped ◀───── stop ────────┘ (or Active)
//! ```
//!
//! The controller is the only writer of the [`SessionStore`]. While a session
//! is live a forwarder thread moves samples from the aggregator into the
//! upload pipeline; it forwards only while the session is `Active`.

use crate::core::aggregator::SensorAggregator;
use crate::core::telemetry::{TelemetrySample, DEVICE_TYPE};
use crate::error::{Result, SessionError};
use crate::gateway::CollectorApi;
use crate::session::store::{AuthToken, SessionStore};
use crate::upload::{UploadPipeline, UploadTask};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Authenticating,
    Active,
    Paused,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Authenticating => "authenticating",
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What pausing a session does to sensor ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PausePolicy {
    /// Keep reading sensors and draining windows; publish nothing.
    #[default]
    ForwardOnly,
    /// Stop the aggregator entirely until resumed.
    HaltIngestion,
}

/// A live telemetry session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub state: SessionState,
}

/// Device identity and policy used by the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub device_id: String,
    pub device_type: String,
    pub pause_policy: PausePolicy,
}

impl ControllerSettings {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_type: DEVICE_TYPE.to_string(),
            pause_policy: PausePolicy::default(),
        }
    }
}

struct Forwarder {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    state: SessionState,
    session: Option<Session>,
    forwarder: Option<Forwarder>,
}

/// Drives pairing, session creation and the Active/Paused/Stopped lifecycle.
pub struct SessionController {
    api: Arc<dyn CollectorApi>,
    store: Arc<SessionStore>,
    aggregator: Arc<SensorAggregator>,
    pipeline: UploadPipeline,
    settings: ControllerSettings,
    /// Held by the forwarder while it enqueues; `true` only while Active.
    gate: Arc<Mutex<bool>>,
    inner: Mutex<Inner>,
}

impl SessionController {
    /// Paired devices (a token in the store) start out `Stopped`, everything
    /// else `Idle`.
    pub fn new(
        api: Arc<dyn CollectorApi>,
        store: Arc<SessionStore>,
        aggregator: Arc<SensorAggregator>,
        pipeline: UploadPipeline,
        settings: ControllerSettings,
    ) -> Self {
        let state = if store.is_authenticated() {
            SessionState::Stopped
        } else {
            SessionState::Idle
        };

        Self {
            api,
            store,
            aggregator,
            pipeline,
            settings,
            gate: Arc::new(Mutex::new(false)),
            inner: Mutex::new(Inner {
                state,
                session: None,
                forwarder: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    /// The live session, if any.
    pub fn session(&self) -> Option<Session> {
        let inner = self.inner();
        inner.session.clone().map(|mut session| {
            session.state = inner.state;
            session
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn aggregator(&self) -> &Arc<SensorAggregator> {
        &self.aggregator
    }

    pub fn pipeline(&self) -> &UploadPipeline {
        &self.pipeline
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Verify a pairing code, store the credentials and open a session.
    ///
    /// A refused code returns to `Idle` with nothing stored. If the code is
    /// accepted but the session cannot be opened the token is kept and the
    /// controller ends up `Stopped`.
    pub async fn submit_pairing_code(&self, code: &str) -> Result<Session> {
        let code = code.trim();
        if code.is_empty() {
            return Err(SessionError::Verification(
                "pairing code is empty".to_string(),
            ));
        }
        self.begin_authenticating("pair", &[SessionState::Idle])?;

        info!(device_id = %self.settings.device_id, "verifying pairing code");
        let token = match self
            .api
            .verify_code(code, &self.settings.device_id, &self.settings.device_type)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!("pairing code rejected: {e}");
                self.set_state(SessionState::Idle);
                return Err(SessionError::verification(&e));
            }
        };

        if let Err(e) = self.store.set_auth(&token) {
            self.set_state(SessionState::Idle);
            return Err(e.into());
        }
        info!(user_id = %token.user_id, token = %token.redacted(), "device paired");

        self.open_session(token).await
    }

    /// Open a session with the stored credentials.
    ///
    /// Fails with [`SessionError::Unauthenticated`], changing nothing, when
    /// no token is stored. A session id left in the store by an earlier run
    /// is reused.
    pub async fn start_session(&self) -> Result<Session> {
        let token = self.store.token().ok_or(SessionError::Unauthenticated)?;
        self.begin_authenticating(
            "start a session",
            &[SessionState::Idle, SessionState::Stopped],
        )?;
        self.open_session(token).await
    }

    /// Stop forwarding samples. Under [`PausePolicy::HaltIngestion`] the
    /// aggregator is stopped as well.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.inner();
        if inner.state != SessionState::Active {
            return Err(SessionError::InvalidTransition {
                action: "pause",
                state: inner.state,
            });
        }

        self.set_gate(false);
        self.aggregator.set_publishing(false);
        if self.settings.pause_policy == PausePolicy::HaltIngestion {
            self.aggregator.stop();
        }
        let discarded = self.aggregator.discard_pending();

        inner.state = SessionState::Paused;
        info!(
            policy = ?self.settings.pause_policy,
            discarded,
            "session paused"
        );
        Ok(())
    }

    /// Resume forwarding. The window in progress during the pause is
    /// discarded so no sample spans the pause.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.inner();
        if inner.state != SessionState::Paused {
            return Err(SessionError::InvalidTransition {
                action: "resume",
                state: inner.state,
            });
        }

        match self.settings.pause_policy {
            // Publication is still suppressed, so this only drains
            PausePolicy::ForwardOnly => {
                self.aggregator.on_window_elapsed();
            }
            PausePolicy::HaltIngestion => self.aggregator.start()?,
        }
        self.aggregator.discard_pending();
        self.aggregator.set_publishing(true);
        self.set_gate(true);

        inner.state = SessionState::Active;
        info!("session resumed");
        Ok(())
    }

    /// End the live session. On return the aggregator is stopped, the
    /// forwarder has exited and no upload for the session remains queued.
    /// The credentials are kept.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner();
        match inner.state {
            SessionState::Active | SessionState::Paused => {}
            state => {
                return Err(SessionError::InvalidTransition {
                    action: "stop",
                    state,
                })
            }
        }
        self.stop_locked(&mut inner)
    }

    /// Forget the device's credentials, stopping any live session first.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.inner();
        match inner.state {
            SessionState::Active | SessionState::Paused => self.stop_locked(&mut inner)?,
            SessionState::Authenticating => {
                return Err(SessionError::InvalidTransition {
                    action: "disconnect",
                    state: inner.state,
                })
            }
            SessionState::Idle | SessionState::Stopped => {}
        }

        self.store.clear()?;
        inner.state = SessionState::Idle;
        inner.session = None;
        info!("device disconnected");
        Ok(())
    }

    fn stop_locked(&self, inner: &mut Inner) -> Result<()> {
        self.set_gate(false);
        self.aggregator.stop();
        if let Some(forwarder) = inner.forwarder.take() {
            let _ = forwarder.stop.send(());
            let _ = forwarder.handle.join();
        }
        self.aggregator.set_publishing(false);
        let discarded = self.aggregator.discard_pending();

        let cancelled = match inner.session.take() {
            Some(session) => self.pipeline.cancel_all(&session.session_id),
            None => 0,
        };
        inner.state = SessionState::Stopped;
        info!(discarded, cancelled, "session stopped");

        self.store.clear_session()?;
        Ok(())
    }

    fn begin_authenticating(&self, action: &'static str, from: &[SessionState]) -> Result<()> {
        let mut inner = self.inner();
        if !from.contains(&inner.state) {
            return Err(SessionError::InvalidTransition {
                action,
                state: inner.state,
            });
        }
        inner.state = SessionState::Authenticating;
        Ok(())
    }

    /// Authenticating -> Active. Any failure lands in `Stopped` with the
    /// token kept.
    async fn open_session(&self, token: AuthToken) -> Result<Session> {
        let (session_id, started_at) = match self.store.session_id() {
            Some(session_id) => {
                info!(session_id = %session_id, "reusing stored session");
                (session_id, Utc::now())
            }
            None => match self
                .api
                .start_session(&token.jwt, &self.settings.device_type)
                .await
            {
                Ok(started) if !started.session_id.is_empty() => {
                    let started_at = started.started_at_utc().unwrap_or_else(Utc::now);
                    (started.session_id, started_at)
                }
                Ok(_) => {
                    self.set_state(SessionState::Stopped);
                    return Err(SessionError::SessionStart(
                        "backend returned an empty session id".to_string(),
                    ));
                }
                Err(e) => {
                    warn!("session start failed: {e}");
                    self.set_state(SessionState::Stopped);
                    return Err(SessionError::session_start(&e));
                }
            },
        };

        let mut inner = self.inner();
        if let Err(e) = self.store.set_session(&session_id) {
            inner.state = SessionState::Stopped;
            return Err(e.into());
        }

        self.aggregator.discard_pending();
        if let Err(e) = self.aggregator.start() {
            inner.state = SessionState::Stopped;
            let _ = self.store.clear_session();
            return Err(e.into());
        }

        self.set_gate(true);
        match self.spawn_forwarder(&session_id, &token.jwt) {
            Ok(forwarder) => {
                inner.forwarder = Some(forwarder);
                self.aggregator.set_publishing(true);
            }
            Err(e) => {
                self.set_gate(false);
                self.aggregator.stop();
                inner.state = SessionState::Stopped;
                let _ = self.store.clear_session();
                return Err(SessionError::Sensor(e));
            }
        }

        let session = Session {
            session_id,
            started_at,
            state: SessionState::Active,
        };
        inner.state = SessionState::Active;
        inner.session = Some(session.clone());
        info!(session_id = %session.session_id, "session active");
        Ok(session)
    }

    fn spawn_forwarder(
        &self,
        session_id: &str,
        bearer_token: &str,
    ) -> std::result::Result<Forwarder, crate::collector::CollectorError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let samples = self.aggregator.receiver().clone();
        let gate = self.gate.clone();
        let pipeline = self.pipeline.clone();
        let session_id = session_id.to_string();
        let bearer_token = bearer_token.to_string();

        let handle = thread::Builder::new()
            .name("sample-forwarder".to_string())
            .spawn(move || {
                forward_samples(samples, stop_rx, gate, pipeline, session_id, bearer_token)
            })
            .map_err(|e| crate::collector::CollectorError::Unavailable(e.to_string()))?;

        Ok(Forwarder {
            stop: stop_tx,
            handle,
        })
    }

    fn set_state(&self, state: SessionState) {
        self.inner().state = state;
    }

    fn set_gate(&self, open: bool) {
        *self.gate.lock().unwrap_or_else(|e| e.into_inner()) = open;
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let mut inner = self.inner();
        if let Some(forwarder) = inner.forwarder.take() {
            let _ = forwarder.stop.send(());
            let _ = forwarder.handle.join();
        }
    }
}

fn forward_samples(
    samples: Receiver<TelemetrySample>,
    stop: Receiver<()>,
    gate: Arc<Mutex<bool>>,
    pipeline: UploadPipeline,
    session_id: String,
    bearer_token: String,
) {
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(samples) -> msg => {
                let Ok(sample) = msg else { break };
                let open = gate.lock().unwrap_or_else(|e| e.into_inner());
                if *open {
                    let request = sample.to_request(&session_id);
                    pipeline.enqueue(UploadTask::new(request, bearer_token.as_str()));
                } else {
                    debug!(window_end = sample.window_end, "session not active, sample dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{ManualSource, SensorReading};
    use crate::core::aggregator::AggregatorConfig;
    use crate::core::telemetry::SensorSampleRequest;
    use crate::gateway::{GatewayError, SampleReceipt, StartedSession};
    use crate::session::store::{StoreError, KEY_SESSION_ID, KEY_USER_ID};
    use crate::session::{KeyValueStore, MemoryStore};
    use crate::transparency::create_shared_log;
    use crate::upload::{NetworkStatus, UploadConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    const GOOD_CODE: &str = "123456";

    struct FakeApi {
        session_ok: bool,
        verify_calls: AtomicUsize,
        session_calls: AtomicUsize,
    }

    impl FakeApi {
        fn new(session_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                session_ok,
                verify_calls: AtomicUsize::new(0),
                session_calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CollectorApi for FakeApi {
        async fn verify_code(
            &self,
            code: &str,
            _device_id: &str,
            _device_type: &str,
        ) -> std::result::Result<AuthToken, GatewayError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            if code == GOOD_CODE {
                Ok(AuthToken {
                    jwt: "jwt-abc".to_string(),
                    user_id: "user-1".to_string(),
                })
            } else {
                Err(GatewayError::Server {
                    status: 400,
                    message: "Invalid or expired code".to_string(),
                })
            }
        }

        async fn start_session(
            &self,
            _bearer_token: &str,
            _device_type: &str,
        ) -> std::result::Result<StartedSession, GatewayError> {
            let n = self.session_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.session_ok {
                Ok(StartedSession {
                    session_id: format!("sess-{n}"),
                    started_at: Some("2024-01-22T10:00:00Z".to_string()),
                    message: None,
                })
            } else {
                Err(GatewayError::Server {
                    status: 500,
                    message: "database unavailable".to_string(),
                })
            }
        }

        async fn ingest_sample(
            &self,
            _bearer_token: &str,
            _sample: &SensorSampleRequest,
        ) -> std::result::Result<SampleReceipt, GatewayError> {
            Ok(SampleReceipt {
                success: true,
                sample_id: None,
                message: None,
            })
        }
    }

    /// Refuses writes to one key, as a full disk would.
    struct FailingStore {
        inner: Arc<MemoryStore>,
        fail_key: &'static str,
    }

    impl KeyValueStore for FailingStore {
        fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: Option<&str>) -> std::result::Result<(), StoreError> {
            if key == self.fail_key {
                return Err(StoreError::IoError("disk full".to_string()));
            }
            self.inner.set(key, value)
        }

        fn clear(&self) -> std::result::Result<(), StoreError> {
            self.inner.clear()
        }
    }

    struct Harness {
        api: Arc<FakeApi>,
        source: Arc<ManualSource>,
        controller: SessionController,
    }

    impl Harness {
        fn pipeline(&self) -> &UploadPipeline {
            self.controller.pipeline()
        }

        /// Close a window with one heart-rate reading in it.
        fn emit_window(&self, bpm: f64) {
            self.source.push(SensorReading::heart_rate(bpm));
            self.controller.aggregator().on_window_elapsed();
        }
    }

    fn harness_with(api: Arc<FakeApi>, store: SessionStore, policy: PausePolicy) -> Harness {
        let source = Arc::new(ManualSource::new());
        let log = create_shared_log();
        let aggregator = Arc::new(SensorAggregator::new(
            AggregatorConfig {
                window_duration: Duration::from_secs(3600),
                ..AggregatorConfig::default()
            },
            source.clone(),
            log.clone(),
        ));
        // Workers are never started, so queued tasks stay observable
        let pipeline = UploadPipeline::new(
            api.clone(),
            &UploadConfig::default(),
            NetworkStatus::new(false),
            log,
        );
        let settings = ControllerSettings {
            pause_policy: policy,
            ..ControllerSettings::new("watch-test-0000")
        };
        let controller =
            SessionController::new(api.clone(), Arc::new(store), aggregator, pipeline, settings);
        Harness {
            api,
            source,
            controller,
        }
    }

    fn harness(policy: PausePolicy) -> Harness {
        harness_with(FakeApi::new(true), SessionStore::in_memory(), policy)
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    /// Give the forwarder a moment to (not) act.
    fn settle() {
        thread::sleep(Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_bad_code_stays_idle() {
        let h = harness(PausePolicy::default());

        let err = h.controller.submit_pairing_code("bad").await.unwrap_err();
        assert!(matches!(err, SessionError::Verification(ref m) if m == "Invalid or expired code"));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.controller.store().is_authenticated());
        assert!(!h.controller.aggregator().is_running());
        assert_eq!(h.api.session_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_code_makes_no_request() {
        let h = harness(PausePolicy::default());
        assert!(h.controller.submit_pairing_code("  ").await.is_err());
        assert_eq!(h.api.verify_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_without_token_has_no_side_effect() {
        let h = harness(PausePolicy::default());

        let err = h.controller.start_session().await.unwrap_err();
        assert!(matches!(err, SessionError::Unauthenticated));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.api.session_calls.load(Ordering::SeqCst), 0);
        assert!(!h.controller.aggregator().is_running());

        h.emit_window(60.0);
        settle();
        assert_eq!(h.pipeline().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_aggregator_started_while_idle_emits_nothing() {
        let h = harness(PausePolicy::default());
        let aggregator = h.controller.aggregator();

        assert!(aggregator.on_window_elapsed().is_none());
        aggregator.start().unwrap();
        h.source.push(SensorReading::heart_rate(60.0));
        assert!(aggregator.on_window_elapsed().is_none());
        assert!(aggregator.receiver().try_recv().is_err());
        aggregator.stop();

        settle();
        assert_eq!(h.pipeline().pending_len(), 0);
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_store_failure_during_pairing_keeps_nothing() {
        let backend = Arc::new(MemoryStore::new());
        let store = SessionStore::open(Box::new(FailingStore {
            inner: backend.clone(),
            fail_key: KEY_USER_ID,
        }));
        let h = harness_with(FakeApi::new(true), store, PausePolicy::default());

        let err = h.controller.submit_pairing_code(GOOD_CODE).await.unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.controller.store().token(), None);
        assert!(!h.controller.store().is_authenticated());
        assert_eq!(backend.get(crate::session::store::KEY_JWT), None);
        assert!(!h.controller.aggregator().is_running());
        assert_eq!(h.api.session_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_window_is_forwarded() {
        let h = harness(PausePolicy::default());
        h.controller.submit_pairing_code(GOOD_CODE).await.unwrap();

        let sample = h.controller.aggregator().on_window_elapsed().unwrap();
        assert_eq!(sample.heart_rate_mean, None);
        assert_eq!(sample.accel_rms, None);
        assert!(wait_for(|| h.pipeline().pending_for("sess-1") == 1));
    }

    #[tokio::test]
    async fn test_pairing_activates_and_forwards() {
        let h = harness(PausePolicy::default());

        let session = h.controller.submit_pairing_code(GOOD_CODE).await.unwrap();
        assert_eq!(session.session_id, "sess-1");
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(h.controller.store().has_active_session());
        assert!(h.controller.aggregator().is_running());

        h.emit_window(62.0);
        assert!(wait_for(|| h.pipeline().pending_for("sess-1") == 1));
    }

    #[tokio::test]
    async fn test_session_start_failure_keeps_token() {
        let h = harness_with(
            FakeApi::new(false),
            SessionStore::in_memory(),
            PausePolicy::default(),
        );

        let err = h.controller.submit_pairing_code(GOOD_CODE).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionStart(_)));
        assert_eq!(h.controller.state(), SessionState::Stopped);
        assert!(h.controller.store().is_authenticated());
        assert_eq!(h.controller.store().session_id(), None);
        assert!(!h.controller.aggregator().is_running());
    }

    #[tokio::test]
    async fn test_pause_forward_only_keeps_ingesting() {
        let h = harness(PausePolicy::ForwardOnly);
        h.controller.submit_pairing_code(GOOD_CODE).await.unwrap();

        h.controller.pause().unwrap();
        assert_eq!(h.controller.state(), SessionState::Paused);
        assert!(h.controller.aggregator().is_running());

        h.emit_window(60.0);
        settle();
        assert_eq!(h.pipeline().pending_len(), 0);

        // A reading taken while paused must not leak into the next window
        h.source.push(SensorReading::heart_rate(200.0));
        h.controller.resume().unwrap();
        assert_eq!(h.controller.state(), SessionState::Active);

        h.source.push(SensorReading::heart_rate(70.0));
        let sample = h.controller.aggregator().on_window_elapsed().unwrap();
        assert_eq!(sample.heart_rate_mean, Some(70.0));
        assert!(wait_for(|| h.pipeline().pending_len() == 1));
    }

    #[tokio::test]
    async fn test_pause_halt_ingestion_stops_aggregator() {
        let h = harness(PausePolicy::HaltIngestion);
        h.controller.submit_pairing_code(GOOD_CODE).await.unwrap();

        h.controller.pause().unwrap();
        assert!(!h.controller.aggregator().is_running());
        assert!(!h.source.is_registered());

        h.controller.resume().unwrap();
        assert!(h.controller.aggregator().is_running());
        h.emit_window(65.0);
        assert!(wait_for(|| h.pipeline().pending_len() == 1));
    }

    #[tokio::test]
    async fn test_stop_purges_and_keeps_token() {
        let h = harness(PausePolicy::default());
        h.controller.submit_pairing_code(GOOD_CODE).await.unwrap();
        h.emit_window(60.0);
        h.emit_window(61.0);
        assert!(wait_for(|| h.pipeline().pending_for("sess-1") == 2));

        h.controller.stop().unwrap();
        assert_eq!(h.controller.state(), SessionState::Stopped);
        assert_eq!(h.pipeline().pending_for("sess-1"), 0);
        assert!(!h.controller.aggregator().is_running());
        assert_eq!(h.controller.session(), None);
        assert_eq!(h.controller.store().session_id(), None);
        assert!(h.controller.store().is_authenticated());

        h.emit_window(62.0);
        settle();
        assert_eq!(h.pipeline().pending_len(), 0);

        let session = h.controller.start_session().await.unwrap();
        assert_eq!(session.session_id, "sess-2");
        assert_eq!(h.api.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_from_active_resets() {
        let h = harness(PausePolicy::default());
        h.controller.submit_pairing_code(GOOD_CODE).await.unwrap();

        h.controller.disconnect().unwrap();
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.controller.aggregator().is_running());
        assert_eq!(
            h.controller.store().snapshot(),
            crate::session::SessionSnapshot::default()
        );
    }

    #[tokio::test]
    async fn test_stored_session_is_reused() {
        let backend = MemoryStore::new();
        backend.set(crate::session::store::KEY_JWT, Some("jwt-old")).unwrap();
        backend
            .set(crate::session::store::KEY_USER_ID, Some("user-1"))
            .unwrap();
        backend.set(KEY_SESSION_ID, Some("sess-restored")).unwrap();
        let store = SessionStore::open(Box::new(backend));

        let h = harness_with(FakeApi::new(true), store, PausePolicy::default());
        assert_eq!(h.controller.state(), SessionState::Stopped);

        let session = h.controller.start_session().await.unwrap();
        assert_eq!(session.session_id, "sess-restored");
        assert_eq!(h.api.session_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let h = harness(PausePolicy::default());
        assert!(matches!(
            h.controller.pause(),
            Err(SessionError::InvalidTransition { action: "pause", state: SessionState::Idle })
        ));
        assert!(h.controller.resume().is_err());
        assert!(h.controller.stop().is_err());

        h.controller.submit_pairing_code(GOOD_CODE).await.unwrap();
        assert!(h.controller.resume().is_err());
        assert!(h.controller.submit_pairing_code(GOOD_CODE).await.is_err());
        assert!(h.controller.start_session().await.is_err());
        assert_eq!(h.controller.state(), SessionState::Active);
    }
}
