//! crates/schedule_rpa_core/src/session.rs
//!
//! The session resource manager. It owns the single shared browser actor and
//! serializes every use of it behind one fair mutex: user operations, the
//! keep-alive probe and recovery all queue on the same lock, in FIFO order.

use crate::auth::AuthGate;
use crate::domain::{Credentials, SessionState};
use crate::error::{RpaError, RpaResult};
use crate::ports::{RemoteUi, UiLauncher};
use crate::vendor::VendorSite;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

//=========================================================================================
// Configuration, status and events
//=========================================================================================

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub keep_alive_interval: Duration,
    /// Default budget for one exclusive-access operation.
    pub request_timeout: Duration,
    pub login_timeout: Duration,
    pub step_timeout: Duration,
    pub probe_timeout: Duration,
}

impl SessionConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            keep_alive_interval: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(180),
            login_timeout: Duration::from_secs(60),
            step_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(30),
        }
    }
}

/// A lock-free snapshot of the session, readable while an operation is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub last_activity: Option<DateTime<Utc>>,
    pub shop_id: Option<String>,
    pub has_credentials: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { shop_id: String },
    Recovered { shop_id: String },
    RecoveryFailed { reason: String },
    Closed,
}

/// How long a caller queued for the lock and how long its operation ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timing {
    pub wait_ms: u64,
    pub run_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub value: T,
    pub timing: Timing,
}

//=========================================================================================
// Manager
//=========================================================================================

/// The resource guarded by the session mutex.
struct SessionSlot {
    actor: Option<Arc<dyn RemoteUi>>,
    credentials: Option<Credentials>,
}

struct SessionInner {
    config: SessionConfig,
    launcher: Arc<dyn UiLauncher>,
    gate: AuthGate,
    slot: Arc<Mutex<SessionSlot>>,
    status: watch::Sender<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
}

/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, launcher: Arc<dyn UiLauncher>) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Uninitialized,
            last_activity: None,
            shop_id: None,
            has_credentials: false,
        });
        let (events, _) = broadcast::channel(32);
        let gate = AuthGate::new(config.login_timeout, config.step_timeout);
        Self {
            inner: Arc::new(SessionInner {
                config,
                launcher,
                gate,
                slot: Arc::new(Mutex::new(SessionSlot {
                    actor: None,
                    credentials: None,
                })),
                status,
                events,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.status.borrow().state
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    //-------------------------------------------------------------------------------------
    // Lifecycle
    //-------------------------------------------------------------------------------------

    /// Builds an authenticated session for `credentials`. A no-op when the session
    /// is already ready for the same credentials; different credentials tear the
    /// current session down first.
    pub async fn start(&self, credentials: Credentials) -> RpaResult<()> {
        let mut slot = self.inner.slot.lock().await;
        self.start_locked(&mut slot, &credentials, false).await
    }

    /// Tears down and re-authenticates unconditionally.
    pub async fn restart(&self, credentials: Credentials) -> RpaResult<()> {
        let mut slot = self.inner.slot.lock().await;
        self.start_locked(&mut slot, &credentials, true).await
    }

    /// Rebuilds the actor with the stored credentials. No-op while a recovery is
    /// already in progress.
    pub async fn recover(&self) -> RpaResult<()> {
        if self.state() == SessionState::Recovering {
            debug!("Recovery already in progress; skipping.");
            return Ok(());
        }
        let mut slot = self.inner.slot.lock().await;
        self.recover_locked(&mut slot).await
    }

    /// Terminal shutdown. `start` may build a new session afterwards.
    pub async fn close(&self) {
        let mut slot = self.inner.slot.lock().await;
        self.teardown(&mut slot).await;
        slot.credentials = None;
        self.inner.status.send_modify(|s| {
            s.state = SessionState::Closed;
            s.shop_id = None;
            s.has_credentials = false;
        });
        let _ = self.inner.events.send(SessionEvent::Closed);
        info!("Session closed.");
    }

    //-------------------------------------------------------------------------------------
    // Exclusive access
    //-------------------------------------------------------------------------------------

    /// Runs `operation` against the actor while holding the session lock.
    ///
    /// On timeout, or when the actor turns out to be lost, the caller gets the
    /// error while the lock stays held by a background recovery; the next
    /// acquirer therefore sees either a ready session or a documented error.
    pub async fn with_exclusive_access<T, F, Fut>(
        &self,
        timeout: Duration,
        operation: F,
    ) -> RpaResult<Timed<T>>
    where
        F: FnOnce(Arc<dyn RemoteUi>) -> Fut + Send,
        Fut: Future<Output = RpaResult<T>> + Send,
        T: Send,
    {
        let requested = Instant::now();
        let guard = self.inner.slot.clone().lock_owned().await;
        self.run_locked(guard, requested, timeout, operation).await
    }

    /// Like `with_exclusive_access`, but first makes sure (under the same lock)
    /// that the session is authenticated for `credentials`.
    pub async fn with_credentials<T, F, Fut>(
        &self,
        credentials: &Credentials,
        timeout: Duration,
        operation: F,
    ) -> RpaResult<Timed<T>>
    where
        F: FnOnce(Arc<dyn RemoteUi>) -> Fut + Send,
        Fut: Future<Output = RpaResult<T>> + Send,
        T: Send,
    {
        let requested = Instant::now();
        let mut guard = self.inner.slot.clone().lock_owned().await;
        self.start_locked(&mut guard, credentials, false).await?;
        self.run_locked(guard, requested, timeout, operation).await
    }

    async fn run_locked<T, F, Fut>(
        &self,
        guard: OwnedMutexGuard<SessionSlot>,
        requested: Instant,
        timeout: Duration,
        operation: F,
    ) -> RpaResult<Timed<T>>
    where
        F: FnOnce(Arc<dyn RemoteUi>) -> Fut + Send,
        Fut: Future<Output = RpaResult<T>> + Send,
        T: Send,
    {
        let state = self.state();
        let actor = match (&guard.actor, state) {
            (Some(actor), SessionState::Ready) => actor.clone(),
            _ => return Err(RpaError::SessionUnavailable(state)),
        };

        let lease = Lease::acquire(self.clone(), guard);
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, operation(actor)).await;
        let timing = Timing {
            wait_ms: millis(started - requested),
            run_ms: millis(started.elapsed()),
            total_ms: millis(requested.elapsed()),
        };

        match outcome {
            Ok(Ok(value)) => {
                lease.release();
                Ok(Timed { value, timing })
            }
            Ok(Err(err)) if err.is_actor_lost() => {
                warn!(error = %err, "Automation actor lost during operation; recovering.");
                lease.recover_in_background();
                Err(err)
            }
            Ok(Err(err)) => {
                lease.release();
                Err(err)
            }
            Err(_) => {
                warn!(?timeout, "Operation exceeded its budget; abandoning and recovering.");
                lease.recover_in_background();
                Err(RpaError::Timeout(format!(
                    "operation exceeded {} ms",
                    timeout.as_millis()
                )))
            }
        }
    }

    //-------------------------------------------------------------------------------------
    // Keep-alive
    //-------------------------------------------------------------------------------------

    /// Spawns the periodic liveness probe. It queues on the session lock like any
    /// other caller and stops when `shutdown` is cancelled.
    pub fn spawn_keep_alive(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let period = self.inner.config.keep_alive_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Keep-alive stopped.");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = manager.keep_alive_tick().await {
                            error!(error = %e, "Keep-alive probe could not restore the session.");
                        }
                    }
                }
            }
        })
    }

    /// One liveness probe: reload, confirm the logged-in marker, recover otherwise.
    pub async fn keep_alive_tick(&self) -> RpaResult<()> {
        if !matches!(self.state(), SessionState::Ready | SessionState::Busy) {
            debug!(state = %self.state(), "Keep-alive skipped.");
            return Ok(());
        }

        let guard = self.inner.slot.clone().lock_owned().await;
        let actor = match (&guard.actor, self.state()) {
            (Some(actor), SessionState::Ready) => actor.clone(),
            _ => return Ok(()),
        };

        let lease = Lease::acquire(self.clone(), guard);
        let gate = self.inner.gate.clone();
        let probe = async {
            actor.reload().await?;
            gate.is_authenticated(actor.as_ref()).await
        };

        match tokio::time::timeout(self.inner.config.probe_timeout, probe).await {
            Ok(Ok(true)) => {
                debug!("Keep-alive probe confirmed the session.");
                lease.release();
                return Ok(());
            }
            Ok(Ok(false)) => info!("Vendor session expired silently; recovering."),
            Ok(Err(e)) => warn!(error = %e, "Keep-alive probe failed; recovering."),
            Err(_) => warn!("Keep-alive probe timed out; recovering."),
        }

        match lease.into_guard() {
            Some(mut guard) => self.recover_locked(&mut guard).await,
            None => Ok(()),
        }
    }

    //-------------------------------------------------------------------------------------
    // Internals (all called with the session lock held)
    //-------------------------------------------------------------------------------------

    async fn start_locked(
        &self,
        slot: &mut SessionSlot,
        credentials: &Credentials,
        force: bool,
    ) -> RpaResult<()> {
        let same_credentials = slot.credentials.as_ref() == Some(credentials);
        let ready = slot.actor.is_some() && self.state() == SessionState::Ready;
        if !force && same_credentials && ready {
            return Ok(());
        }

        if slot.actor.is_some() && !same_credentials {
            info!(
                shop_id = %credentials.target_id,
                "Credentials changed; tearing down current session."
            );
        }
        self.teardown(slot).await;
        slot.credentials = None;
        self.inner.status.send_modify(|s| {
            s.shop_id = Some(credentials.target_id.clone());
            s.has_credentials = true;
        });

        match self.build_actor(credentials, true).await {
            Ok(actor) => {
                slot.actor = Some(actor);
                slot.credentials = Some(credentials.clone());
                self.set_state(SessionState::Ready);
                self.touch();
                let _ = self.inner.events.send(SessionEvent::Started {
                    shop_id: credentials.target_id.clone(),
                });
                info!(shop_id = %credentials.target_id, "Session ready.");
                Ok(())
            }
            Err(e) => {
                error!(shop_id = %credentials.target_id, error = %e, "Session start failed.");
                self.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    async fn recover_locked(&self, slot: &mut SessionSlot) -> RpaResult<()> {
        let credentials = match slot.credentials.clone() {
            Some(c) => c,
            None => return Err(RpaError::SessionUnavailable(self.state())),
        };

        self.set_state(SessionState::Recovering);
        self.teardown(slot).await;

        match self.build_actor(&credentials, false).await {
            Ok(actor) => {
                slot.actor = Some(actor);
                self.set_state(SessionState::Ready);
                self.touch();
                let _ = self.inner.events.send(SessionEvent::Recovered {
                    shop_id: credentials.target_id.clone(),
                });
                info!(shop_id = %credentials.target_id, "Session recovered.");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Session recovery failed.");
                self.set_state(SessionState::Error);
                let _ = self.inner.events.send(SessionEvent::RecoveryFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Launches a fresh actor and authenticates it against the tenant.
    /// `report_progress` drives the starting/authenticating states; recovery
    /// stays in `recovering` until it is done.
    async fn build_actor(
        &self,
        credentials: &Credentials,
        report_progress: bool,
    ) -> RpaResult<Arc<dyn RemoteUi>> {
        let config = &self.inner.config;
        let site = VendorSite::new(&config.base_url, &credentials.target_id);

        if report_progress {
            self.set_state(SessionState::Starting);
        }
        let actor = tokio::time::timeout(config.login_timeout, self.inner.launcher.launch())
            .await
            .map_err(|_| RpaError::Timeout("browser launch".to_string()))??;

        let gate = &self.inner.gate;
        let authenticated = async {
            gate.login(actor.as_ref(), &site, credentials).await?;
            if report_progress {
                self.set_state(SessionState::Authenticating);
            }
            gate.open_tenant(actor.as_ref(), &site).await
        };
        let budget = config.login_timeout + config.step_timeout;
        let result = match tokio::time::timeout(budget, authenticated).await {
            Ok(result) => result,
            Err(_) => Err(RpaError::Timeout("vendor login".to_string())),
        };

        match result {
            Ok(()) => Ok(actor),
            Err(e) => {
                if let Err(close_err) = actor.close().await {
                    debug!(error = %close_err, "Closing half-started actor failed.");
                }
                Err(e)
            }
        }
    }

    async fn teardown(&self, slot: &mut SessionSlot) {
        if let Some(actor) = slot.actor.take() {
            match tokio::time::timeout(self.inner.config.step_timeout, actor.close()).await {
                Ok(Ok(())) => debug!("Automation actor closed."),
                Ok(Err(e)) => debug!(error = %e, "Closing automation actor failed."),
                Err(_) => warn!("Closing automation actor timed out."),
            }
        }
    }

    fn spawn_recovery(&self, guard: OwnedMutexGuard<SessionSlot>) {
        self.set_state(SessionState::Recovering);
        let manager = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut guard = guard;
                    if let Err(e) = manager.recover_locked(&mut guard).await {
                        error!(error = %e, "Background recovery failed.");
                    }
                });
            }
            Err(_) => {
                drop(guard);
                self.set_state(SessionState::Error);
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        self.inner.status.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            debug!(from = %s.state, to = %state, "Session state transition.");
            s.state = state;
            true
        });
    }

    fn touch(&self) {
        self.inner
            .status
            .send_modify(|s| s.last_activity = Some(Utc::now()));
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//=========================================================================================
// Lease
//=========================================================================================

/// The token of one exclusive-access holder. Dropping it without an explicit
/// release (a cancelled caller) hands the lock to a recovery task, since the
/// actor may still be executing an abandoned command.
struct Lease {
    manager: SessionManager,
    guard: Option<OwnedMutexGuard<SessionSlot>>,
}

impl Lease {
    fn acquire(manager: SessionManager, guard: OwnedMutexGuard<SessionSlot>) -> Self {
        manager.set_state(SessionState::Busy);
        manager.touch();
        Self {
            manager,
            guard: Some(guard),
        }
    }

    fn release(mut self) {
        self.manager.set_state(SessionState::Ready);
        self.manager.touch();
        self.guard.take();
    }

    fn recover_in_background(mut self) {
        if let Some(guard) = self.guard.take() {
            self.manager.spawn_recovery(guard);
        }
    }

    fn into_guard(mut self) -> Option<OwnedMutexGuard<SessionSlot>> {
        self.guard.take()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            warn!("Exclusive access abandoned mid-operation; recovering session.");
            self.manager.spawn_recovery(guard);
        }
    }
}
