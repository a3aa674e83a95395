//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::{ApiError, ErrorBody, ErrorDetail};
use crate::web::middleware::RpaContext;
use crate::web::protocol::*;
use crate::web::state::AppState;
use axum::{
    extract::{Query, State},
    response::Json,
    Extension,
};
use schedule_rpa_core::{ErrorCode, JobStatus, ReservationOperation, ReservationRequest, RpaError};
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        status_handler,
        slots_handler,
        search_reservations_handler,
        create_reservation_handler,
        update_reservation_handler,
        cancel_reservation_handler,
        delete_reservation_handler,
        batch_handler,
        restart_session_handler,
    ),
    components(
        schemas(
            HealthResponse, StatusResponse, SessionView, ConfigView, SlotsResponse, SlotDto,
            SearchResponse, ReservationDto, CreateReservationBody, UpdateReservationBody,
            CancelReservationBody, ReservationResponse, BatchBody, BatchItem, OperationDto,
            BatchResponse, BatchResultDto, RestartResponse, TimingDto, ErrorBody, ErrorDetail
        )
    ),
    tags(
        (name = "Schedule RPA API", description = "Slot discovery and reservation changes on the vendor schedule.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Session
//=========================================================================================

/// Liveness and a one-line view of the shared browser session.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.service.status();
    Json(HealthResponse {
        status: "ok".to_string(),
        session_state: status.state.to_string(),
        has_credentials: status.has_credentials,
        shop_id: status.shop_id,
    })
}

#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Session detail", body = StatusResponse))
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let status = state.service.status();
    let config = state.service.session().config();
    Json(StatusResponse {
        session: SessionView {
            state: status.state.to_string(),
            last_activity: status.last_activity,
            shop_id: status.shop_id,
        },
        config: ConfigView {
            keep_alive_interval_ms: config.keep_alive_interval.as_millis() as u64,
            request_timeout_ms: config.request_timeout.as_millis() as u64,
        },
    })
}

/// Forces a fresh login. Without `X-RPA-Shop-Id` the current shop is kept.
#[utoipa::path(
    post,
    path = "/session/restart",
    responses(
        (status = 200, description = "Session rebuilt", body = RestartResponse),
        (status = 400, description = "Missing login headers", body = ErrorBody),
        (status = 401, description = "Vendor rejected the login", body = ErrorBody),
        (status = 404, description = "Unknown shop", body = ErrorBody),
        (status = 500, description = "Browser could not be started", body = ErrorBody)
    ),
    params(
        ("X-RPA-Login-Id" = String, Header, description = "Vendor login id."),
        ("X-RPA-Login-Password" = String, Header, description = "Vendor password."),
        ("X-RPA-Shop-Id" = Option<String>, Header, description = "Shop to bind; defaults to the current one."),
        ("X-RPA-Test-Mode" = Option<bool>, Header, description = "Return a diagnostics screenshot.")
    )
)]
pub async fn restart_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RpaContext>,
) -> Result<Json<RestartResponse>, ApiError> {
    let outcome = state
        .service
        .restart(
            &ctx.login_id,
            &ctx.login_secret,
            ctx.shop_id.as_deref(),
            ctx.test_mode,
        )
        .await?;
    let shop = state.service.status().shop_id.unwrap_or_default();
    info!(%shop, "Session restarted on request.");
    Ok(Json(RestartResponse {
        success: true,
        message: format!("session restarted for shop {}", shop),
        screenshot: screenshot_field(outcome.screenshot),
    }))
}

//=========================================================================================
// Queries
//=========================================================================================

#[utoipa::path(
    get,
    path = "/slots",
    params(SlotsQuery),
    responses(
        (status = 200, description = "Open slots in the range", body = SlotsResponse),
        (status = 400, description = "Bad headers or dates", body = ErrorBody),
        (status = 504, description = "Vendor did not answer in time", body = ErrorBody)
    )
)]
pub async fn slots_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RpaContext>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<SlotsResponse>, ApiError> {
    let credentials = ctx.credentials()?;
    let today = state.service.today();
    let from = parse_date_or("date_from", query.date_from.as_deref(), today)?;
    let to = parse_date_or("date_to", query.date_to.as_deref(), from)?;
    if to < from {
        return Err(ApiError::BadRequest(
            "date_to must not be before date_from".to_string(),
        ));
    }

    let outcome = state
        .service
        .fetch_slots(&credentials, from, to, ctx.test_mode)
        .await?;
    let available_slots: Vec<SlotDto> = outcome.value.iter().map(SlotDto::from).collect();
    Ok(Json(SlotsResponse {
        success: true,
        count: available_slots.len(),
        available_slots,
        timing: outcome.timing.into(),
        screenshot: screenshot_field(outcome.screenshot),
    }))
}

#[utoipa::path(
    get,
    path = "/reservations/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Reservations whose label carries the phone", body = SearchResponse),
        (status = 400, description = "Missing phone or bad dates", body = ErrorBody)
    )
)]
pub async fn search_reservations_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RpaContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    let credentials = ctx.credentials()?;
    let phone = query
        .customer_phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("customer_phone is required".to_string()))?;
    let today = state.service.today();
    let from = parse_date_or("date_from", query.date_from.as_deref(), today)?;
    let to = parse_date_or("date_to", query.date_to.as_deref(), from)?;
    if to < from {
        return Err(ApiError::BadRequest(
            "date_to must not be before date_from".to_string(),
        ));
    }

    let outcome = state
        .service
        .search_reservations(&credentials, phone, from, to, ctx.test_mode)
        .await?;
    let reservations: Vec<ReservationDto> =
        outcome.value.iter().map(ReservationDto::from).collect();
    Ok(Json(SearchResponse {
        success: true,
        count: reservations.len(),
        reservations,
        timing: outcome.timing.into(),
        screenshot: screenshot_field(outcome.screenshot),
    }))
}

//=========================================================================================
// Mutations
//=========================================================================================

#[utoipa::path(
    post,
    path = "/reservations",
    request_body = CreateReservationBody,
    responses(
        (status = 200, description = "Reservation created", body = ReservationResponse),
        (status = 409, description = "Duplicate booking or slot unavailable", body = ErrorBody)
    )
)]
pub async fn create_reservation_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RpaContext>,
    Json(body): Json<CreateReservationBody>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let request = body.into_request()?;
    submit(&state, &ctx, request).await
}

#[utoipa::path(
    put,
    path = "/reservations",
    request_body = UpdateReservationBody,
    responses(
        (status = 200, description = "Reservation updated", body = ReservationResponse),
        (status = 404, description = "No matching reservation", body = ErrorBody)
    )
)]
pub async fn update_reservation_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RpaContext>,
    Json(body): Json<UpdateReservationBody>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let request = body.into_request()?;
    submit(&state, &ctx, request).await
}

/// Cancels the reservation, keeping it on record as cancelled.
#[utoipa::path(
    delete,
    path = "/reservations",
    request_body = CancelReservationBody,
    responses(
        (status = 200, description = "Reservation cancelled", body = ReservationResponse),
        (status = 404, description = "No matching reservation", body = ErrorBody)
    )
)]
pub async fn cancel_reservation_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RpaContext>,
    Json(body): Json<CancelReservationBody>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let request = body.into_request(ReservationOperation::Cancel)?;
    submit(&state, &ctx, request).await
}

/// Removes the reservation from the vendor entirely.
#[utoipa::path(
    post,
    path = "/reservations/delete",
    request_body = CancelReservationBody,
    responses(
        (status = 200, description = "Reservation deleted", body = ReservationResponse),
        (status = 404, description = "No matching reservation", body = ErrorBody)
    )
)]
pub async fn delete_reservation_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RpaContext>,
    Json(body): Json<CancelReservationBody>,
) -> Result<Json<ReservationResponse>, ApiError> {
    let request = body.into_request(ReservationOperation::Delete)?;
    submit(&state, &ctx, request).await
}

/// Runs the requests in order. Individual failures are reported per item.
#[utoipa::path(
    post,
    path = "/reservations/batch",
    request_body = BatchBody,
    responses(
        (status = 200, description = "Every request was attempted", body = BatchResponse),
        (status = 400, description = "A request in the batch is malformed", body = ErrorBody)
    )
)]
pub async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RpaContext>,
    Json(body): Json<BatchBody>,
) -> Result<Json<BatchResponse>, ApiError> {
    let credentials = ctx.credentials()?;
    let requests = body
        .requests
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            item.into_request().map_err(|e| match e {
                ApiError::BadRequest(message) => {
                    ApiError::BadRequest(format!("requests[{}]: {}", index, message))
                }
                other => other,
            })
        })
        .collect::<Result<Vec<ReservationRequest>, ApiError>>()?;

    let report = state.service.submit_batch(&credentials, requests).await;
    Ok(Json(BatchResponse {
        success: report.value.status == JobStatus::Success,
        status: job_status_str(report.value.status).to_string(),
        results: report.value.results.iter().map(BatchResultDto::from).collect(),
        timing: report.timing.into(),
    }))
}

/// Shared tail of the single-request mutations: a non-success result becomes
/// the error response of its code.
async fn submit(
    state: &AppState,
    ctx: &RpaContext,
    request: ReservationRequest,
) -> Result<Json<ReservationResponse>, ApiError> {
    let credentials = ctx.credentials()?;
    let outcome = state
        .service
        .submit(&credentials, request, ctx.test_mode)
        .await?;
    let result = outcome.value;

    if !result.is_success() {
        let code = result.error_code.unwrap_or(ErrorCode::SystemError);
        let message = result
            .error_message
            .unwrap_or_else(|| format!("{} failed", result.operation));
        return Err(ApiError::Rpa {
            error: RpaError::from_code(code, message),
            screenshot: outcome.screenshot,
        });
    }

    info!(
        request_id = %result.request_id,
        operation = %result.operation,
        external_id = ?result.external_reservation_id,
        "Reservation request succeeded."
    );
    Ok(Json(ReservationResponse {
        success: true,
        reservation_id: result.request_id,
        external_reservation_id: result.external_reservation_id,
        timing: outcome.timing.into(),
        screenshot: screenshot_field(outcome.screenshot),
    }))
}
