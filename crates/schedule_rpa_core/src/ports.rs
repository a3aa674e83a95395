//! crates/schedule_rpa_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture: the workflow
//! engine talks to the vendor UI only through `RemoteUi`, and the session
//! manager allocates new browser actors only through `UiLauncher`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors of the automation backend (CDP, WebSocket...).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Element not found: {0}")]
    NotFound(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    /// The browser, its tab, or the protocol channel was torn down.
    #[error("Automation actor lost: {0}")]
    ActorLost(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Element inspection
//=========================================================================================

/// A CSS selector narrowed by exact attribute values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub selector: String,
    pub attributes: Vec<(String, String)>,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Renders the locator as a single CSS selector.
    pub fn to_css(&self) -> String {
        let mut css = self.selector.clone();
        for (name, value) in &self.attributes {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            css.push_str(&format!("[{}=\"{}\"]", name, escaped));
        }
        css
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_css())
    }
}

/// What `read_elements` returns for every matched element, in DOM order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementRecord {
    pub attributes: HashMap<String, String>,
    pub classes: Vec<String>,
    pub text: String,
}

impl ElementRecord {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Attached,
    Visible,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationOutcome {
    pub status: u16,
    pub url: String,
}

//=========================================================================================
// Network rendezvous
//=========================================================================================

/// Selects the outgoing exchange a rendezvous waits for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMatcher {
    pub method: String,
    pub path_suffix: String,
}

impl ExchangeMatcher {
    pub fn new(method: impl Into<String>, path_suffix: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path_suffix: path_suffix.into(),
        }
    }

    pub fn post(path_suffix: impl Into<String>) -> Self {
        Self::new("POST", path_suffix)
    }

    pub fn get(path_suffix: impl Into<String>) -> Self {
        Self::new("GET", path_suffix)
    }

    /// Query strings and fragments are ignored when comparing the path suffix.
    pub fn matches(&self, method: &str, url: &str) -> bool {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        self.method.eq_ignore_ascii_case(method) && path.ends_with(&self.path_suffix)
    }
}

impl fmt::Display for ExchangeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} *{}", self.method, self.path_suffix)
    }
}

/// A completed request/response pair observed on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub body: String,
}

impl Exchange {
    pub fn json(&self) -> PortResult<Value> {
        serde_json::from_str(&self.body).map_err(|e| {
            PortError::Unexpected(format!("Response from {} is not JSON: {}", self.url, e))
        })
    }
}

/// A suspension point registered before the action that causes the exchange,
/// resolved by the adapter once the matching response body is available.
pub struct Rendezvous {
    matcher: ExchangeMatcher,
    rx: oneshot::Receiver<PortResult<Exchange>>,
}

impl Rendezvous {
    /// Creates a rendezvous and the sender the adapter completes it with.
    pub fn channel(matcher: ExchangeMatcher) -> (oneshot::Sender<PortResult<Exchange>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { matcher, rx })
    }

    pub fn matcher(&self) -> &ExchangeMatcher {
        &self.matcher
    }

    pub async fn wait(self, timeout: Duration) -> PortResult<Exchange> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PortError::ActorLost(format!(
                "rendezvous for {} dropped before completion",
                self.matcher
            ))),
            Err(_) => Err(PortError::Timeout(format!(
                "no {} exchange within {:?}",
                self.matcher, timeout
            ))),
        }
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The remote UI adapter: one browser tab driven on behalf of the engine.
///
/// Only implementations of this trait know which automation protocol is in use.
#[async_trait]
pub trait RemoteUi: Send + Sync {
    async fn navigate(&self, url: &str) -> PortResult<NavigationOutcome>;

    async fn reload(&self) -> PortResult<()>;

    async fn current_url(&self) -> PortResult<String>;

    /// Registers a rendezvous for the next exchange matching `matcher`.
    /// Must be called before triggering the action that produces the exchange.
    async fn expect_exchange(&self, matcher: ExchangeMatcher) -> PortResult<Rendezvous>;

    /// Calls a function the page exposes on `window`.
    async fn invoke(&self, entry_point: &str, args: Vec<Value>) -> PortResult<Value>;

    async fn read_elements(&self, locator: &Locator) -> PortResult<Vec<ElementRecord>>;

    async fn wait_for_element(
        &self,
        locator: &Locator,
        state: ElementState,
        timeout: Duration,
    ) -> PortResult<()>;

    async fn fill(&self, locator: &Locator, value: &str) -> PortResult<()>;

    async fn click(&self, locator: &Locator) -> PortResult<()>;

    async fn select_option(&self, locator: &Locator, value: &str) -> PortResult<()>;

    /// Returns (and clears) the text of the last JavaScript dialog, if any.
    async fn take_dialog_message(&self) -> PortResult<Option<String>>;

    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> PortResult<Vec<u8>>;

    /// Drops every cookie and the page's web storage, ending any vendor login.
    async fn clear_cookies(&self) -> PortResult<()>;

    async fn close(&self) -> PortResult<()>;
}

/// Allocates fresh automation actors for the session manager.
#[async_trait]
pub trait UiLauncher: Send + Sync {
    async fn launch(&self) -> PortResult<Arc<dyn RemoteUi>>;
}
