//! A scripted stand-in for the vendor UI, good enough to drive the REST layer.
//!
//! Every page load succeeds, submitting the login form signs the actor in
//! unless `reject_login` is set, every element wait is satisfied immediately and
//! every exchange resolves as soon as it is registered, with the body scripted
//! for its path (`{}` when nothing was scripted).

#![allow(dead_code)]

use async_trait::async_trait;
use schedule_rpa_core::ports::{
    ElementRecord, ElementState, Exchange, ExchangeMatcher, Locator, NavigationOutcome,
    PortResult, Rendezvous, RemoteUi, UiLauncher,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const BASE_URL: &str = "https://vendor.test";
pub const UNKNOWN_SHOP: &str = "H404404";

#[derive(Default)]
pub struct StubState {
    pub reject_login: bool,
    pub fail_launch: bool,
    pub cells: Vec<ElementRecord>,
    pub reservations: Vec<ElementRecord>,
    pub resources: Vec<ElementRecord>,
    /// Response bodies by exchange path suffix.
    pub responses: HashMap<String, String>,
    pub launches: usize,
    pub actions: Vec<String>,
}

#[derive(Clone, Default)]
pub struct StubVendor {
    inner: Arc<Mutex<StubState>>,
}

fn record(attrs: &[(&str, &str)], text: &str) -> ElementRecord {
    ElementRecord {
        attributes: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        classes: Vec::new(),
        text: text.to_string(),
    }
}

impl StubVendor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, StubState> {
        self.inner.lock().unwrap()
    }

    pub fn add_cell(&self, date: &str, start: &str, end: &str, resource: &str) {
        self.state().cells.push(record(
            &[
                ("data-date", date),
                ("data-start", start),
                ("data-end", end),
                ("data-resource-id", resource),
                ("data-line", "1"),
                ("data-line-count", "1"),
            ],
            "",
        ));
    }

    pub fn add_resource(&self, id: &str, name: &str) {
        self.state()
            .resources
            .push(record(&[("data-resource-id", id)], name));
    }

    pub fn add_reservation(&self, id: &str, date: &str, start: &str, end: &str, label: &str) {
        self.state().reservations.push(record(
            &[
                ("data-date", date),
                ("data-start", start),
                ("data-end", end),
                ("data-resource-id", "1"),
                ("data-reservation-id", id),
                ("data-line", "1"),
                ("data-line-count", "1"),
            ],
            label,
        ));
    }

    pub fn respond(&self, path_suffix: &str, body: Value) {
        self.state()
            .responses
            .insert(path_suffix.to_string(), body.to_string());
    }

    pub fn launcher(&self) -> Arc<StubLauncher> {
        Arc::new(StubLauncher {
            vendor: self.clone(),
        })
    }

    pub fn actions(&self) -> Vec<String> {
        self.state().actions.clone()
    }
}

fn matches(element: &ElementRecord, locator: &Locator) -> bool {
    locator
        .attributes
        .iter()
        .all(|(name, value)| element.attr(name) == Some(value.as_str()))
}

pub struct StubUi {
    vendor: StubVendor,
    url: Mutex<String>,
    signed_in: Mutex<bool>,
    login_submitted: Mutex<bool>,
}

#[async_trait]
impl RemoteUi for StubUi {
    async fn navigate(&self, url: &str) -> PortResult<NavigationOutcome> {
        *self.url.lock().unwrap() = url.to_string();
        let status = if url.contains(&format!("/{}/", UNKNOWN_SHOP)) {
            404
        } else {
            200
        };
        Ok(NavigationOutcome {
            status,
            url: url.to_string(),
        })
    }

    async fn reload(&self) -> PortResult<()> {
        self.vendor.state().actions.push("reload".to_string());
        Ok(())
    }

    async fn current_url(&self) -> PortResult<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn expect_exchange(&self, matcher: ExchangeMatcher) -> PortResult<Rendezvous> {
        let body = self
            .vendor
            .state()
            .responses
            .get(&matcher.path_suffix)
            .cloned()
            .unwrap_or_else(|| "{}".to_string());
        let (tx, rendezvous) = Rendezvous::channel(matcher.clone());
        let _ = tx.send(Ok(Exchange {
            url: format!("{}{}", BASE_URL, matcher.path_suffix),
            method: matcher.method.clone(),
            status: 200,
            body,
        }));
        Ok(rendezvous)
    }

    async fn invoke(&self, entry_point: &str, _args: Vec<Value>) -> PortResult<Value> {
        self.vendor
            .state()
            .actions
            .push(format!("invoke {}", entry_point));
        Ok(Value::Null)
    }

    async fn read_elements(&self, locator: &Locator) -> PortResult<Vec<ElementRecord>> {
        let signed_in = *self.signed_in.lock().unwrap();
        let submitted = *self.login_submitted.lock().unwrap();
        let state = self.vendor.state();
        let pool: Vec<ElementRecord> = match locator.selector.as_str() {
            "#logoutLink" if signed_in => vec![ElementRecord::default()],
            ".login-error" if submitted && state.reject_login => {
                vec![record(&[], "ID or password is incorrect")]
            }
            ".schedule-cell" => state.cells.clone(),
            ".reservation-block" => state.reservations.clone(),
            ".resource-header" => state.resources.clone(),
            _ => Vec::new(),
        };
        Ok(pool.into_iter().filter(|e| matches(e, locator)).collect())
    }

    async fn wait_for_element(
        &self,
        _locator: &Locator,
        _state: ElementState,
        _timeout: Duration,
    ) -> PortResult<()> {
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> PortResult<()> {
        self.vendor
            .state()
            .actions
            .push(format!("fill {} {}", locator, value));
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> PortResult<()> {
        let mut state = self.vendor.state();
        state.actions.push(format!("click {}", locator));
        if locator.selector == "#loginSubmit" {
            *self.login_submitted.lock().unwrap() = true;
            *self.signed_in.lock().unwrap() = !state.reject_login;
        }
        Ok(())
    }

    async fn select_option(&self, _locator: &Locator, _value: &str) -> PortResult<()> {
        Ok(())
    }

    async fn take_dialog_message(&self) -> PortResult<Option<String>> {
        Ok(None)
    }

    async fn screenshot(&self) -> PortResult<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn clear_cookies(&self) -> PortResult<()> {
        *self.signed_in.lock().unwrap() = false;
        Ok(())
    }

    async fn close(&self) -> PortResult<()> {
        Ok(())
    }
}

pub struct StubLauncher {
    vendor: StubVendor,
}

#[async_trait]
impl UiLauncher for StubLauncher {
    async fn launch(&self) -> PortResult<Arc<dyn RemoteUi>> {
        let mut state = self.vendor.state();
        if state.fail_launch {
            return Err(schedule_rpa_core::PortError::ActorLost(
                "Chrome not available".to_string(),
            ));
        }
        state.launches += 1;
        drop(state);
        Ok(Arc::new(StubUi {
            vendor: self.vendor.clone(),
            url: Mutex::new("about:blank".to_string()),
            signed_in: Mutex::new(false),
            login_submitted: Mutex::new(false),
        }))
    }
}
