//! crates/schedule_rpa_core/src/service.rs
//!
//! The application facade the front door talks to. Each call resolves the
//! tenant from the credentials, takes exclusive access to the shared session
//! and runs one workflow operation under it.

use crate::domain::{
    BatchReport, Credentials, JobStatus, ReservationRecord, ReservationRequest, ReservationResult,
    SlotInfo,
};
use crate::error::{RpaError, RpaResult};
use crate::ports::RemoteUi;
use crate::session::{SessionManager, SessionStatus, Timed, Timing};
use crate::vendor::VendorSite;
use crate::workflow::{render_windows, EngineConfig, ScheduleEngine};
use chrono::{Local, NaiveDate};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// A successful call, with its lock timing and an optional diagnostics capture.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub timing: Timing,
    pub screenshot: Option<Vec<u8>>,
}

/// A failed call. The screenshot is present when diagnostics were requested
/// and the session was still usable after the failure.
#[derive(Debug)]
pub struct Failure {
    pub error: RpaError,
    pub screenshot: Option<Vec<u8>>,
}

impl From<RpaError> for Failure {
    fn from(error: RpaError) -> Self {
        Self {
            error,
            screenshot: None,
        }
    }
}

pub type ServiceResult<T> = Result<Outcome<T>, Failure>;

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

#[derive(Clone)]
pub struct SchedulingService {
    session: SessionManager,
    engine_config: EngineConfig,
    clock: Option<Clock>,
}

impl SchedulingService {
    pub fn new(session: SessionManager, engine_config: EngineConfig) -> Self {
        Self {
            session,
            engine_config,
            clock: None,
        }
    }

    /// Replaces the clock used for defaults and same-day decisions.
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(today));
        self
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn today(&self) -> NaiveDate {
        match &self.clock {
            Some(clock) => clock(),
            None => Local::now().date_naive(),
        }
    }

    //-------------------------------------------------------------------------------------
    // Queries
    //-------------------------------------------------------------------------------------

    /// Open slots in `[from, to]`, computed under a single lock acquisition.
    pub async fn fetch_slots(
        &self,
        credentials: &Credentials,
        from: NaiveDate,
        to: NaiveDate,
        diagnostics: bool,
    ) -> ServiceResult<Vec<SlotInfo>> {
        render_windows(from, to)?;
        self.run(credentials, diagnostics, move |engine, ui| async move {
            engine.fetch_available_slots(ui.as_ref(), from, to).await
        })
        .await
    }

    /// Bulk export: one lock acquisition per render window, so other callers and
    /// the keep-alive can interleave between windows.
    pub async fn export_slots(
        &self,
        credentials: &Credentials,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RpaResult<Timed<Vec<SlotInfo>>> {
        let timeout = self.session.config().request_timeout;
        let mut slots = Vec::new();
        let mut timing = Timing::default();

        for window_start in render_windows(from, to)? {
            let engine = self.engine_for(credentials);
            let window = self
                .session
                .with_credentials(credentials, timeout, move |ui| async move {
                    engine
                        .fetch_window_slots(ui.as_ref(), window_start, from, to)
                        .await
                })
                .await?;
            accumulate(&mut timing, window.timing);
            slots.extend(window.value);
        }

        slots.sort_by(|a, b| {
            (a.date, a.start_time, &a.resource_id).cmp(&(b.date, b.start_time, &b.resource_id))
        });
        info!(%from, %to, count = slots.len(), "Slot export finished.");
        Ok(Timed {
            value: slots,
            timing,
        })
    }

    pub async fn search_reservations(
        &self,
        credentials: &Credentials,
        phone: &str,
        from: NaiveDate,
        to: NaiveDate,
        diagnostics: bool,
    ) -> ServiceResult<Vec<ReservationRecord>> {
        let phone = phone.to_string();
        self.run(credentials, diagnostics, move |engine, ui| async move {
            engine
                .search_reservations(ui.as_ref(), &phone, from, to)
                .await
        })
        .await
    }

    //-------------------------------------------------------------------------------------
    // Mutations
    //-------------------------------------------------------------------------------------

    /// Executes one reservation request. Vendor-side failures come back as a
    /// non-success `ReservationResult`, not as an error.
    pub async fn submit(
        &self,
        credentials: &Credentials,
        request: ReservationRequest,
        diagnostics: bool,
    ) -> ServiceResult<ReservationResult> {
        self.run(credentials, diagnostics, move |engine, ui| async move {
            engine.execute(ui.as_ref(), &request).await
        })
        .await
    }

    /// Executes requests in order, each in its own lock acquisition. One failure
    /// never stops the rest.
    pub async fn submit_batch(
        &self,
        credentials: &Credentials,
        requests: Vec<ReservationRequest>,
    ) -> Timed<BatchReport> {
        let timeout = self.session.config().request_timeout;
        let mut timing = Timing::default();
        let mut results = Vec::with_capacity(requests.len());

        for request in requests {
            let engine = self.engine_for(credentials);
            let job = request.clone();
            let outcome = self
                .session
                .with_credentials(credentials, timeout, move |ui| async move {
                    engine.execute(ui.as_ref(), &job).await
                })
                .await;
            match outcome {
                Ok(done) => {
                    accumulate(&mut timing, done.timing);
                    results.push(done.value);
                }
                Err(e) => {
                    warn!(request_id = %request.request_id, error = %e, "Batch request failed.");
                    results.push(ReservationResult::failure(&request, e.code(), e.to_string()));
                }
            }
        }

        let status = JobStatus::from_results(&results);
        info!(?status, total = results.len(), "Batch finished.");
        Timed {
            value: BatchReport { status, results },
            timing,
        }
    }

    //-------------------------------------------------------------------------------------
    // Session control
    //-------------------------------------------------------------------------------------

    /// Forces a fresh login. Without a shop id, the current tenant is reused.
    pub async fn restart(
        &self,
        login_id: &str,
        login_secret: &str,
        shop_id: Option<&str>,
        diagnostics: bool,
    ) -> ServiceResult<()> {
        let shop_id = match shop_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(shop) => shop.to_string(),
            None => self.session.status().shop_id.ok_or_else(|| {
                RpaError::System("no shop id given and no current session".to_string())
            })?,
        };
        let credentials = Credentials::new(login_id, login_secret, shop_id);
        self.session.restart(credentials).await?;

        if !diagnostics {
            return Ok(Outcome {
                value: (),
                timing: Timing::default(),
                screenshot: None,
            });
        }
        let timeout = self.session.config().step_timeout;
        let timed = self
            .session
            .with_exclusive_access(timeout, |ui| async move { Ok(capture(ui.as_ref()).await) })
            .await?;
        Ok(Outcome {
            value: (),
            timing: timed.timing,
            screenshot: timed.value,
        })
    }

    pub async fn close(&self) {
        self.session.close().await;
    }

    //-------------------------------------------------------------------------------------
    // Internals
    //-------------------------------------------------------------------------------------

    fn engine_for(&self, credentials: &Credentials) -> ScheduleEngine {
        let site = VendorSite::new(&self.session.config().base_url, &credentials.target_id);
        let engine = ScheduleEngine::new(site, self.engine_config.clone());
        match &self.clock {
            Some(clock) => {
                let clock = clock.clone();
                engine.with_clock(move || clock())
            }
            None => engine,
        }
    }

    /// Runs `operation` under the session lock and, when asked, captures a
    /// screenshot before the lock is released. A lost actor bypasses the
    /// capture so the session manager can recover it.
    async fn run<T, F, Fut>(
        &self,
        credentials: &Credentials,
        diagnostics: bool,
        operation: F,
    ) -> ServiceResult<T>
    where
        F: FnOnce(ScheduleEngine, Arc<dyn RemoteUi>) -> Fut + Send,
        Fut: Future<Output = RpaResult<T>> + Send,
        T: Send,
    {
        let engine = self.engine_for(credentials);
        let timeout = self.session.config().request_timeout;
        let timed = self
            .session
            .with_credentials(credentials, timeout, move |ui| async move {
                let result = match operation(engine, ui.clone()).await {
                    Err(e) if e.is_actor_lost() => return Err(e),
                    other => other,
                };
                let screenshot = if diagnostics {
                    capture(ui.as_ref()).await
                } else {
                    None
                };
                Ok((result, screenshot))
            })
            .await?;

        let Timed {
            value: (result, screenshot),
            timing,
        } = timed;
        match result {
            Ok(value) => Ok(Outcome {
                value,
                timing,
                screenshot,
            }),
            Err(error) => Err(Failure { error, screenshot }),
        }
    }
}

async fn capture(ui: &dyn RemoteUi) -> Option<Vec<u8>> {
    match ui.screenshot().await {
        Ok(png) => Some(png),
        Err(e) => {
            warn!(error = %e, "Diagnostics screenshot failed.");
            None
        }
    }
}

fn accumulate(total: &mut Timing, part: Timing) {
    total.wait_ms += part.wait_ms;
    total.run_ms += part.run_ms;
    total.total_ms += part.total_ms;
}
