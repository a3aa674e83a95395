//! services/api/src/web/middleware.rs
//!
//! Vendor credential extraction for the routes that drive the browser session.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use schedule_rpa_core::Credentials;

use crate::error::ApiError;

pub const LOGIN_ID_HEADER: &str = "x-rpa-login-id";
pub const LOGIN_PASSWORD_HEADER: &str = "x-rpa-login-password";
pub const SHOP_ID_HEADER: &str = "x-rpa-shop-id";
pub const TEST_MODE_HEADER: &str = "x-rpa-test-mode";

/// What the caller sent in the `X-RPA-*` headers.
#[derive(Clone)]
pub struct RpaContext {
    pub login_id: String,
    pub login_secret: String,
    pub shop_id: Option<String>,
    /// Diagnostics screenshot requested.
    pub test_mode: bool,
}

impl RpaContext {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let login_id = header(headers, LOGIN_ID_HEADER)
            .ok_or_else(|| ApiError::BadRequest("X-RPA-Login-Id header is required".to_string()))?;
        let login_secret = header(headers, LOGIN_PASSWORD_HEADER).ok_or_else(|| {
            ApiError::BadRequest("X-RPA-Login-Password header is required".to_string())
        })?;
        let test_mode = header(headers, TEST_MODE_HEADER)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Ok(Self {
            login_id,
            login_secret,
            shop_id: header(headers, SHOP_ID_HEADER),
            test_mode,
        })
    }

    /// Credentials bound to the shop; every route except restart needs one.
    pub fn credentials(&self) -> Result<Credentials, ApiError> {
        let shop_id = self
            .shop_id
            .as_deref()
            .ok_or_else(|| ApiError::BadRequest("X-RPA-Shop-Id header is required".to_string()))?;
        Ok(Credentials::new(&self.login_id, &self.login_secret, shop_id))
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Middleware that validates the vendor login headers.
///
/// If present, inserts an `RpaContext` into the request extensions for handlers to use.
/// If missing, returns 400 Bad Request.
pub async fn require_rpa_headers(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let context = RpaContext::from_headers(req.headers())?;
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}
