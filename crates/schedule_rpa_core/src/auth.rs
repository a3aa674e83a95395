//! crates/schedule_rpa_core/src/auth.rs
//!
//! The authentication gate: submits vendor credentials through the login form,
//! classifies the outcome, and opens the tenant's schedule page.

use crate::domain::Credentials;
use crate::error::{RpaError, RpaResult};
use crate::ports::{ElementState, RemoteUi};
use crate::vendor::{self, VendorSite};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct AuthGate {
    login_timeout: Duration,
    step_timeout: Duration,
}

/// What the page showed after the credentials were submitted.
enum LoginOutcome {
    Authenticated,
    Rejected(String),
}

impl AuthGate {
    pub fn new(login_timeout: Duration, step_timeout: Duration) -> Self {
        Self {
            login_timeout,
            step_timeout,
        }
    }

    /// Submits the credentials. Fails with `AuthFailed` when the vendor shows its
    /// login error, with `Timeout` when neither outcome appears in time.
    ///
    /// The form is always submitted: a login inherited from the browser profile
    /// is cleared first, so only `credentials` can authenticate the session.
    pub async fn login(
        &self,
        ui: &dyn RemoteUi,
        site: &VendorSite,
        credentials: &Credentials,
    ) -> RpaResult<()> {
        self.open_login_page(ui, site).await?;
        if self.is_authenticated(ui).await? {
            debug!("Browser profile carries a previous login; clearing cookies.");
            ui.clear_cookies().await?;
            self.open_login_page(ui, site).await?;
            if self.is_authenticated(ui).await? {
                return Err(RpaError::System(
                    "vendor still reports a login after cookies were cleared".to_string(),
                ));
            }
        }

        ui.wait_for_element(
            &vendor::locator(vendor::LOGIN_ID_INPUT),
            ElementState::Visible,
            self.step_timeout,
        )
        .await?;
        ui.fill(&vendor::locator(vendor::LOGIN_ID_INPUT), &credentials.login_id)
            .await?;
        ui.fill(
            &vendor::locator(vendor::LOGIN_PASSWORD_INPUT),
            &credentials.login_secret,
        )
        .await?;
        ui.click(&vendor::locator(vendor::LOGIN_SUBMIT)).await?;

        match self.await_login_outcome(ui).await? {
            LoginOutcome::Authenticated => {
                info!(login_id = %credentials.login_id, "Vendor login accepted.");
                Ok(())
            }
            LoginOutcome::Rejected(reason) => {
                warn!(login_id = %credentials.login_id, %reason, "Vendor login rejected.");
                Err(RpaError::AuthFailed(reason))
            }
        }
    }

    /// Opens the tenant schedule. A 404 on the tenant URL means the shop id is wrong.
    pub async fn open_tenant(&self, ui: &dyn RemoteUi, site: &VendorSite) -> RpaResult<()> {
        let outcome = ui.navigate(&site.schedule_url()).await?;
        if outcome.status == 404 {
            return Err(RpaError::ShopNotFound(site.shop_id.clone()));
        }
        if outcome.status >= 400 {
            return Err(RpaError::System(format!(
                "schedule page for shop {} answered with HTTP {}",
                site.shop_id, outcome.status
            )));
        }
        if !self.is_authenticated(ui).await? {
            return Err(RpaError::AuthFailed(
                "vendor redirected to login when opening the schedule".to_string(),
            ));
        }
        ui.wait_for_element(
            &vendor::locator(vendor::SCHEDULE_GRID),
            ElementState::Visible,
            self.step_timeout,
        )
        .await?;
        Ok(())
    }

    async fn open_login_page(&self, ui: &dyn RemoteUi, site: &VendorSite) -> RpaResult<()> {
        let outcome = ui.navigate(&site.login_url()).await?;
        if outcome.status >= 400 {
            return Err(RpaError::System(format!(
                "login page answered with HTTP {}",
                outcome.status
            )));
        }
        Ok(())
    }

    /// Cheap check for the logged-in marker on the current page.
    pub async fn is_authenticated(&self, ui: &dyn RemoteUi) -> RpaResult<bool> {
        let markers = ui
            .read_elements(&vendor::locator(vendor::AUTHENTICATED_MARKER))
            .await?;
        Ok(!markers.is_empty())
    }

    async fn await_login_outcome(&self, ui: &dyn RemoteUi) -> RpaResult<LoginOutcome> {
        let deadline = Instant::now() + self.login_timeout;
        loop {
            if self.is_authenticated(ui).await? {
                return Ok(LoginOutcome::Authenticated);
            }
            let errors = ui
                .read_elements(&vendor::locator(vendor::LOGIN_ERROR))
                .await?;
            if let Some(error) = errors.first() {
                let reason = error.text.trim();
                let reason = if reason.is_empty() {
                    "invalid login id or password"
                } else {
                    reason
                };
                return Ok(LoginOutcome::Rejected(reason.to_string()));
            }
            if Instant::now() >= deadline {
                return Err(RpaError::Timeout(format!(
                    "no login outcome within {:?}",
                    self.login_timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
