//! crates/schedule_rpa_core/src/workflow/mod.rs
//!
//! The schedule workflow engine: multi-step UI sequences against the vendor
//! schedule, each correlated with the network exchange that backs it.
//! Every function here expects to be called while the session lock is held.

pub mod form;
pub mod reservation;
pub mod slots;

use crate::domain::{ReservationRecord, SlotInfo};
use crate::error::{RpaError, RpaResult};
use crate::ports::{ElementState, RemoteUi};
use crate::vendor::{self, VendorSite};
use chrono::{Duration as DateSpan, Local, NaiveDate};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use self::slots::ScheduleSnapshot;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Budget for waiting on a single element or popup.
    pub step_timeout: Duration,
    /// Budget for the schedule render exchange.
    pub render_timeout: Duration,
    /// Budget for a create/update/cancel/delete exchange.
    pub submit_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            render_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(30),
        }
    }
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Drives the vendor schedule for one tenant.
#[derive(Clone)]
pub struct ScheduleEngine {
    site: VendorSite,
    config: EngineConfig,
    today: Clock,
}

impl ScheduleEngine {
    pub fn new(site: VendorSite, config: EngineConfig) -> Self {
        Self {
            site,
            config,
            today: Arc::new(|| Local::now().date_naive()),
        }
    }

    /// Replaces the clock used for same-day decisions.
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    pub fn site(&self) -> &VendorSite {
        &self.site
    }

    pub fn today(&self) -> NaiveDate {
        (self.today)()
    }

    //-------------------------------------------------------------------------------------
    // Slot discovery
    //-------------------------------------------------------------------------------------

    /// Open slots in `[from, to]`, walking the range in render windows.
    pub async fn fetch_available_slots(
        &self,
        ui: &dyn RemoteUi,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RpaResult<Vec<SlotInfo>> {
        let windows = render_windows(from, to)?;
        let mut slots = Vec::new();
        for window_start in windows {
            slots.extend(self.fetch_window_slots(ui, window_start, from, to).await?);
        }
        slots.sort_by(|a, b| {
            (a.date, a.start_time, &a.resource_id).cmp(&(b.date, b.start_time, &b.resource_id))
        });
        info!(%from, %to, count = slots.len(), "Slot discovery finished.");
        Ok(slots)
    }

    /// Open slots of the single window starting at `window_start`, clamped to `[from, to]`.
    pub async fn fetch_window_slots(
        &self,
        ui: &dyn RemoteUi,
        window_start: NaiveDate,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RpaResult<Vec<SlotInfo>> {
        self.render(ui, window_start).await?;
        let snapshot = self.read_snapshot(ui).await?;
        let slots: Vec<SlotInfo> = snapshot
            .open_slots()
            .into_iter()
            .filter(|slot| slot.date >= from && slot.date <= to)
            .collect();
        debug!(%window_start, count = slots.len(), "Window slots computed.");
        Ok(slots)
    }

    /// Reservations in `[from, to]` whose label carries `phone`.
    pub async fn search_reservations(
        &self,
        ui: &dyn RemoteUi,
        phone: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> RpaResult<Vec<ReservationRecord>> {
        let wanted = form::normalize_phone(phone);
        if wanted.is_empty() {
            return Err(RpaError::System("customer phone has no digits".to_string()));
        }
        let mut found = Vec::new();
        for window_start in render_windows(from, to)? {
            self.render(ui, window_start).await?;
            let snapshot = self.read_snapshot(ui).await?;
            found.extend(snapshot.reservations.into_iter().filter(|r| {
                r.date >= from && r.date <= to && form::normalize_phone(&r.label).contains(&wanted)
            }));
        }
        found.sort_by(|a, b| (a.date, a.start_time).cmp(&(b.date, b.start_time)));
        Ok(found)
    }

    //-------------------------------------------------------------------------------------
    // Page primitives
    //-------------------------------------------------------------------------------------

    /// Renders the window starting at `date` and waits for its backing exchange.
    pub async fn render(&self, ui: &dyn RemoteUi, date: NaiveDate) -> RpaResult<()> {
        self.ensure_schedule_page(ui).await?;

        // Registered before the trigger so a fast response cannot be missed.
        let rendezvous = ui.expect_exchange(vendor::schedule_exchange()).await?;
        ui.invoke(
            vendor::RENDER_ENTRY_POINT,
            vec![json!(vendor::encode_date(date))],
        )
        .await?;
        let exchange = rendezvous.wait(self.config.render_timeout).await?;
        if exchange.status >= 400 {
            return Err(RpaError::System(format!(
                "schedule render for {} answered with HTTP {}",
                date, exchange.status
            )));
        }

        ui.wait_for_element(
            &vendor::locator(vendor::SCHEDULE_GRID),
            ElementState::Visible,
            self.config.step_timeout,
        )
        .await?;
        debug!(%date, "Schedule window rendered.");
        Ok(())
    }

    /// Reads cells, reservations, shifts and resources of the rendered window.
    pub async fn read_snapshot(&self, ui: &dyn RemoteUi) -> RpaResult<ScheduleSnapshot> {
        let cells = ui
            .read_elements(&vendor::locator(vendor::SCHEDULE_CELL))
            .await?;
        let reservations = ui
            .read_elements(&vendor::locator(vendor::RESERVATION_BLOCK))
            .await?;
        let shifts = ui
            .read_elements(&vendor::locator(vendor::SHIFT_RANGE))
            .await?;
        let resources = ui
            .read_elements(&vendor::locator(vendor::RESOURCE_HEADER))
            .await?;
        Ok(ScheduleSnapshot::from_elements(
            &cells,
            &reservations,
            &shifts,
            &resources,
        ))
    }

    async fn ensure_schedule_page(&self, ui: &dyn RemoteUi) -> RpaResult<()> {
        let schedule_url = self.site.schedule_url();
        let current = ui.current_url().await?;
        if current.starts_with(&schedule_url) {
            return Ok(());
        }

        debug!(%current, "Not on the schedule page; navigating.");
        let outcome = ui.navigate(&schedule_url).await?;
        if outcome.status == 404 {
            return Err(RpaError::ShopNotFound(self.site.shop_id.clone()));
        }
        ui.wait_for_element(
            &vendor::locator(vendor::SCHEDULE_GRID),
            ElementState::Visible,
            self.config.step_timeout,
        )
        .await?;
        Ok(())
    }

    /// Brings the page back to a known state after a failed step. Popup state
    /// after a failed submission is not predictable, so nothing continues from it.
    pub async fn reload_to_stable(&self, ui: &dyn RemoteUi) {
        let restore = async {
            ui.reload().await?;
            self.ensure_schedule_page(ui).await
        };
        if let Err(e) = restore.await {
            warn!(error = %e, "Reload to a stable page failed.");
        }
    }
}

/// Start dates of the consecutive render windows covering `[from, to]`.
pub fn render_windows(from: NaiveDate, to: NaiveDate) -> RpaResult<Vec<NaiveDate>> {
    if from > to {
        return Err(RpaError::System(format!(
            "date_from {} is after date_to {}",
            from, to
        )));
    }
    let mut starts = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        starts.push(cursor);
        cursor += DateSpan::days(vendor::RENDER_WINDOW_DAYS);
    }
    Ok(starts)
}
