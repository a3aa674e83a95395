//! crates/schedule_rpa_core/src/workflow/reservation.rs
//!
//! Reservation create / update / cancel / delete. Each is a fixed sequence of UI
//! steps ending in one confirming exchange whose success flag is re-verified.
//! Failures reload the page and produce a result; nothing is retried here.

use super::form::{self, MenuOption};
use super::slots::{parse_reservation, BookingTarget, ScheduleSnapshot};
use super::ScheduleEngine;
use crate::classifier::{self, VendorResponse};
use crate::domain::{ReservationOperation, ReservationRequest, ReservationResult};
use crate::error::{ErrorCode, RpaError, RpaResult};
use crate::ports::{ElementRecord, ElementState, ExchangeMatcher, RemoteUi};
use crate::vendor;
use serde_json::json;
use tracing::{debug, info, warn};

/// Result of the confirming exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    Accepted,
    Rejected { code: ErrorCode, message: String },
}

/// An existing reservation resolved on the grid, with what the edit popup needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ExistingReservation {
    reservation_id: String,
    resource_id: String,
    line: u32,
    line_count: u32,
}

impl ScheduleEngine {
    /// Executes one request and produces exactly one result for it.
    ///
    /// Only a lost automation actor escapes as an error, so the session manager
    /// can recover; every other failure becomes a `failed`/`conflict` result.
    pub async fn execute(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
    ) -> RpaResult<ReservationResult> {
        info!(
            request_id = %request.request_id,
            operation = %request.operation,
            date = %request.date,
            start = %vendor::encode_time(request.start_time),
            "Executing reservation request."
        );

        if let Err(e) = check_request(request) {
            warn!(
                request_id = %request.request_id,
                error = %e,
                "Reservation request rejected before any UI step."
            );
            return Ok(ReservationResult::failure(request, e.code(), e.to_string()));
        }

        let outcome = match request.operation {
            ReservationOperation::Create => self.create(ui, request).await,
            ReservationOperation::Update => self.update(ui, request).await,
            ReservationOperation::Cancel => self.cancel(ui, request).await,
            ReservationOperation::Delete => self.delete(ui, request).await,
        };

        match outcome {
            Ok(result) => {
                if !result.is_success() {
                    self.reload_to_stable(ui).await;
                }
                Ok(result)
            }
            Err(e) if e.is_actor_lost() => Err(e),
            Err(e) => {
                // Structural failures are system errors regardless of their source.
                let code = match &e {
                    RpaError::Port(_) => ErrorCode::SystemError,
                    other => other.code(),
                };
                warn!(
                    request_id = %request.request_id,
                    %code,
                    error = %e,
                    "Reservation request failed."
                );
                if code != ErrorCode::ReservationNotFound {
                    self.reload_to_stable(ui).await;
                }
                Ok(ReservationResult::failure(request, code, e.to_string()))
            }
        }
    }

    //-------------------------------------------------------------------------------------
    // Create
    //-------------------------------------------------------------------------------------

    async fn create(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
    ) -> RpaResult<ReservationResult> {
        self.render(ui, request.date).await?;
        let snapshot = self.read_snapshot(ui).await?;
        let target = snapshot
            .booking_target(request.date, request.start_time, request.end_time())
            .ok_or_else(|| RpaError::System("schedule grid shows no resources".to_string()))?;

        ui.invoke(
            vendor::CREATE_ENTRY_POINT,
            vec![
                json!(vendor::encode_datetime(request.date, request.start_time)),
                json!(target.resource_id),
                json!(target.line),
                json!(target.line_count),
            ],
        )
        .await?;
        self.wait_visible(ui, vendor::SIMPLE_FORM).await?;
        ui.click(&vendor::locator(vendor::TO_DETAIL_BUTTON)).await?;
        self.wait_visible(ui, vendor::DETAIL_FORM).await?;

        let menu_label = self.apply_menu(ui, request.menu_name.as_deref(), true).await?;
        let (last_name, first_name) = form::split_name(&request.customer_name);
        ui.fill(&vendor::locator(vendor::LAST_NAME_INPUT), &last_name)
            .await?;
        ui.fill(&vendor::locator(vendor::FIRST_NAME_INPUT), &first_name)
            .await?;
        ui.fill(&vendor::locator(vendor::PHONE_INPUT), &request.customer_phone)
            .await?;
        ui.fill(
            &vendor::locator(vendor::DURATION_INPUT),
            &request.duration_minutes.to_string(),
        )
        .await?;
        let notes = form::compose_notes(menu_label.as_deref(), request.notes.as_deref());
        ui.fill(&vendor::locator(vendor::NOTES_INPUT), &notes).await?;

        match self
            .submit(ui, vendor::SUBMIT_BUTTON, vendor::register_exchange())
            .await?
        {
            Verdict::Accepted => {}
            Verdict::Rejected { code, message } => {
                return Ok(ReservationResult::failure(request, code, message));
            }
        }

        // The vendor has booked it: only a lost actor may fail the request now.
        let external_id = match self.settle_created(ui, request, &target).await {
            Ok(id) => id,
            Err(e) if e.is_actor_lost() => return Err(e),
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "Reservation created, but its id could not be read back."
                );
                self.reload_to_stable(ui).await;
                None
            }
        };
        info!(request_id = %request.request_id, external_id = ?external_id, "Reservation created.");
        Ok(ReservationResult::success(request, external_id))
    }

    /// Waits for the popup to close and the grid to show the new block.
    async fn settle_created(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
        target: &BookingTarget,
    ) -> RpaResult<Option<String>> {
        ui.wait_for_element(
            &vendor::locator(vendor::DETAIL_FORM),
            ElementState::Hidden,
            self.config.step_timeout,
        )
        .await?;
        self.resolve_created_id(ui, request, target).await
    }

    /// Reads the identifier the vendor assigned to the reservation just created.
    async fn resolve_created_id(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
        target: &BookingTarget,
    ) -> RpaResult<Option<String>> {
        let elements = ui
            .read_elements(&vendor::reservations_at(request.date, request.start_time))
            .await?;
        let snapshot = ScheduleSnapshot::default();
        let candidates: Vec<_> = elements
            .iter()
            .filter_map(|e| parse_reservation(e, &snapshot))
            .collect();

        if candidates.len() == 1 {
            return Ok(candidates[0].external_id.clone());
        }
        let narrowed: Vec<_> = candidates
            .iter()
            .filter(|c| c.end_time == request.end_time() && c.resource_id == target.resource_id)
            .collect();
        if narrowed.len() == 1 {
            return Ok(narrowed[0].external_id.clone());
        }
        warn!(
            request_id = %request.request_id,
            candidates = candidates.len(),
            "Could not resolve the external reservation id unambiguously."
        );
        Ok(None)
    }

    //-------------------------------------------------------------------------------------
    // Update / cancel / delete
    //-------------------------------------------------------------------------------------

    async fn update(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
    ) -> RpaResult<ReservationResult> {
        let existing = self.resolve_existing(ui, request).await?;
        self.open_edit_popup(ui, request, &existing).await?;

        let menu_label = self.apply_menu(ui, request.menu_name.as_deref(), false).await?;
        let notes = form::compose_notes(menu_label.as_deref(), request.notes.as_deref());
        ui.fill(&vendor::locator(vendor::NOTES_INPUT), &notes).await?;

        self.finish(
            ui,
            request,
            existing,
            vendor::SUBMIT_BUTTON,
            vendor::register_exchange(),
        )
        .await
    }

    async fn cancel(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
    ) -> RpaResult<ReservationResult> {
        let existing = self.resolve_existing(ui, request).await?;
        self.open_edit_popup(ui, request, &existing).await?;

        ui.click(&vendor::locator(vendor::CANCEL_BUTTON)).await?;
        self.wait_visible(ui, vendor::CANCEL_DIALOG).await?;
        let reason = self.cancel_reason(request);
        debug!(request_id = %request.request_id, reason, "Selecting cancellation reason.");
        ui.click(&vendor::cancel_reason(reason)).await?;

        self.finish(
            ui,
            request,
            existing,
            vendor::CANCEL_CONFIRM,
            vendor::cancel_exchange(),
        )
        .await
    }

    async fn delete(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
    ) -> RpaResult<ReservationResult> {
        let existing = self.resolve_existing(ui, request).await?;
        self.open_edit_popup(ui, request, &existing).await?;

        ui.click(&vendor::locator(vendor::DELETE_BUTTON)).await?;
        self.wait_visible(ui, vendor::DELETE_DIALOG).await?;

        self.finish(
            ui,
            request,
            existing,
            vendor::DELETE_CONFIRM,
            vendor::delete_exchange(),
        )
        .await
    }

    /// Same-day (or past) reservations need the no-contact reason, later ones the
    /// contacted reason. This is a vendor business rule.
    pub fn cancel_reason(&self, request: &ReservationRequest) -> &'static str {
        if request.date <= self.today() {
            vendor::CANCEL_REASON_NO_CONTACT
        } else {
            vendor::CANCEL_REASON_CONTACTED
        }
    }

    async fn finish(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
        existing: ExistingReservation,
        button: &str,
        matcher: ExchangeMatcher,
    ) -> RpaResult<ReservationResult> {
        match self.submit(ui, button, matcher).await? {
            Verdict::Accepted => {
                info!(
                    request_id = %request.request_id,
                    operation = %request.operation,
                    reservation_id = %existing.reservation_id,
                    "Reservation request confirmed by vendor."
                );
                Ok(ReservationResult::success(
                    request,
                    Some(existing.reservation_id),
                ))
            }
            Verdict::Rejected { code, message } => {
                Ok(ReservationResult::failure(request, code, message))
            }
        }
    }

    /// Finds the reservation at `(date, start)` whose label carries the customer's
    /// name and phone. The first match in DOM order wins.
    async fn resolve_existing(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
    ) -> RpaResult<ExistingReservation> {
        self.render(ui, request.date).await?;
        let elements = ui
            .read_elements(&vendor::reservations_at(request.date, request.start_time))
            .await?;
        let element = form::find_reservation(
            &elements,
            &request.customer_name,
            &request.customer_phone,
        )
        .ok_or_else(|| {
            RpaError::ReservationNotFound(format!(
                "no reservation for the customer at {} {} ({} candidates)",
                request.date,
                vendor::encode_time(request.start_time),
                elements.len()
            ))
        })?;
        existing_from_element(element)
    }

    async fn open_edit_popup(
        &self,
        ui: &dyn RemoteUi,
        request: &ReservationRequest,
        existing: &ExistingReservation,
    ) -> RpaResult<()> {
        ui.invoke(
            vendor::EDIT_ENTRY_POINT,
            vec![
                json!(vendor::encode_datetime(request.date, request.start_time)),
                json!(existing.resource_id),
                json!(existing.line),
                json!(existing.line_count),
                json!(existing.reservation_id),
                json!(true),
            ],
        )
        .await?;
        self.wait_visible(ui, vendor::DETAIL_FORM).await
    }

    //-------------------------------------------------------------------------------------
    // Shared steps
    //-------------------------------------------------------------------------------------

    /// Resolves the requested menu against the option list. When `select` is set
    /// the option is also chosen in the form. Returns the label for the notes.
    async fn apply_menu(
        &self,
        ui: &dyn RemoteUi,
        requested: Option<&str>,
        select: bool,
    ) -> RpaResult<Option<String>> {
        let requested = match requested.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => r,
            None => return Ok(None),
        };

        let options: Vec<MenuOption> = ui
            .read_elements(&vendor::locator(vendor::MENU_OPTION))
            .await?
            .iter()
            .filter_map(MenuOption::from_element)
            .collect();

        match form::resolve_menu(&options, requested) {
            Some(option) => {
                if select {
                    ui.select_option(&vendor::locator(vendor::MENU_SELECT), &option.value)
                        .await?;
                }
                Ok(Some(option.label.clone()))
            }
            None => {
                warn!(menu = requested, "Requested menu not offered; keeping it in notes only.");
                Ok(Some(requested.to_string()))
            }
        }
    }

    /// Clicks `button` with a rendezvous on `matcher` and judges the response.
    async fn submit(
        &self,
        ui: &dyn RemoteUi,
        button: &str,
        matcher: ExchangeMatcher,
    ) -> RpaResult<Verdict> {
        // Drop any stale alert so only this submission's text is classified.
        ui.take_dialog_message().await?;

        let rendezvous = ui.expect_exchange(matcher).await?;
        ui.click(&vendor::locator(button)).await?;
        let exchange = rendezvous.wait(self.config.submit_timeout).await?;
        let alert = ui.take_dialog_message().await?;

        let response = match exchange.json() {
            Ok(body) => VendorResponse::from_json(&body),
            Err(_) => VendorResponse {
                result: false,
                message: Some(format!(
                    "HTTP {} from {} without a JSON body",
                    exchange.status, exchange.url
                )),
            },
        };

        if response.result && exchange.status < 400 {
            return Ok(Verdict::Accepted);
        }
        let code = classifier::classify(&response, alert.as_deref());
        let message = classifier::failure_message(&response, alert.as_deref());
        warn!(%code, %message, "Vendor rejected the submission.");
        Ok(Verdict::Rejected { code, message })
    }

    async fn wait_visible(&self, ui: &dyn RemoteUi, selector: &str) -> RpaResult<()> {
        ui.wait_for_element(
            &vendor::locator(selector),
            ElementState::Visible,
            self.config.step_timeout,
        )
        .await?;
        Ok(())
    }
}

/// Checks that need no page: the interval stays within its day, and every
/// operation but update identifies the customer by phone digits as well as name.
fn check_request(request: &ReservationRequest) -> RpaResult<()> {
    if !request.fits_in_day() {
        return Err(RpaError::SlotNotAvailable(format!(
            "{} minutes from {} does not end by 24:00",
            request.duration_minutes,
            vendor::encode_time(request.start_time)
        )));
    }
    let phone_required = request.operation != ReservationOperation::Update;
    if phone_required && form::normalize_phone(&request.customer_phone).is_empty() {
        let message = format!("customer phone {:?} has no digits", request.customer_phone);
        return Err(match request.operation {
            ReservationOperation::Create => RpaError::System(message),
            _ => RpaError::ReservationNotFound(message),
        });
    }
    Ok(())
}

fn existing_from_element(element: &ElementRecord) -> RpaResult<ExistingReservation> {
    let reservation_id = element
        .attr(vendor::ATTR_RESERVATION_ID)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| RpaError::System("reservation element carries no id".to_string()))?;
    let resource_id = element
        .attr(vendor::ATTR_RESOURCE)
        .ok_or_else(|| RpaError::System("reservation element carries no resource".to_string()))?;
    let number = |name: &str| {
        element
            .attr(name)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(1)
    };
    Ok(ExistingReservation {
        reservation_id: reservation_id.to_string(),
        resource_id: resource_id.to_string(),
        line: number(vendor::ATTR_LINE),
        line_count: number(vendor::ATTR_LINE_COUNT),
    })
}
