//! services/api/src/adapters/page.rs
//!
//! Implements the `RemoteUi` port on top of one CDP page target.
//!
//! DOM work is done with small `Runtime.evaluate` scripts. Network rendezvous are
//! served from the `Network` domain events: a matching `requestWillBeSent` binds
//! the oldest waiting matcher to that request id, and `loadingFinished` fetches
//! the body and completes it. JavaScript dialogs are accepted as soon as they
//! open and their text is kept for `take_dialog_message`.

use crate::adapters::cdp::{CdpConnection, CdpError, CdpEvent};
use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use schedule_rpa_core::ports::{
    ElementRecord, ElementState, Exchange, ExchangeMatcher, Locator, NavigationOutcome, PortError,
    PortResult, Rendezvous, RemoteUi,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Who the page belongs to, which decides what `close` tears down.
pub enum PageOwner {
    /// The browser was launched for this page and dies with it.
    Process(Child),
    /// A tab opened in a browser somebody else runs.
    Attached,
}

//=========================================================================================
// Network tap
//=========================================================================================

type ExchangeSender = oneshot::Sender<PortResult<Exchange>>;

struct BoundExchange {
    tx: ExchangeSender,
    url: String,
    method: String,
    status: u16,
}

#[derive(Default)]
struct NetworkTap {
    waiting: Vec<(ExchangeMatcher, ExchangeSender)>,
    bound: HashMap<String, BoundExchange>,
}

impl NetworkTap {
    /// Binds the oldest live matcher accepting this request, if any.
    fn on_request(&mut self, request_id: &str, method: &str, url: &str) {
        if let Some(bound) = self.bound.get_mut(request_id) {
            // Redirect hop of an already bound request.
            bound.url = url.to_string();
            return;
        }
        self.waiting.retain(|(_, tx)| !tx.is_closed());
        let Some(index) = self
            .waiting
            .iter()
            .position(|(matcher, _)| matcher.matches(method, url))
        else {
            return;
        };
        let (matcher, tx) = self.waiting.remove(index);
        debug!(%matcher, %url, "Exchange bound to rendezvous.");
        self.bound.insert(
            request_id.to_string(),
            BoundExchange {
                tx,
                url: url.to_string(),
                method: method.to_string(),
                status: 0,
            },
        );
    }

    fn on_response(&mut self, request_id: &str, status: u16, url: &str) {
        if let Some(bound) = self.bound.get_mut(request_id) {
            bound.status = status;
            bound.url = url.to_string();
        }
    }
}

#[derive(Default)]
struct PageShared {
    network: Mutex<NetworkTap>,
    dialog: Mutex<Option<String>>,
}

//=========================================================================================
// CdpPage
//=========================================================================================

pub struct CdpPage {
    conn: Arc<CdpConnection>,
    shared: Arc<PageShared>,
    loads: watch::Receiver<u64>,
    owner: tokio::sync::Mutex<Option<PageOwner>>,
    load_timeout: Duration,
    event_task: JoinHandle<()>,
}

impl CdpPage {
    /// Enables the domains the adapter listens to and starts the event pump.
    pub async fn open(
        conn: CdpConnection,
        events: mpsc::UnboundedReceiver<CdpEvent>,
        owner: PageOwner,
        load_timeout: Duration,
    ) -> Result<Self, CdpError> {
        let conn = Arc::new(conn);
        let shared = Arc::new(PageShared::default());
        let (loads_tx, loads) = watch::channel(0u64);

        let event_task = tokio::spawn(pump_events(
            events,
            Arc::downgrade(&conn),
            shared.clone(),
            loads_tx,
        ));

        for domain in ["Page", "Runtime", "Network", "DOM"] {
            conn.call(&format!("{}.enable", domain), None).await?;
        }

        Ok(Self {
            conn,
            shared,
            loads,
            owner: tokio::sync::Mutex::new(Some(owner)),
            load_timeout,
            event_task,
        })
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, CdpError> {
        let result = self
            .conn
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let text = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("Unknown error");
            return Err(CdpError::JavaScript(text.to_string()));
        }
        Ok(result["result"]["value"].clone())
    }

    /// Sends `method` and waits for the next `Page.loadEventFired`.
    async fn load_after(&self, method: &str, params: Option<Value>) -> PortResult<Value> {
        let mut loads = self.loads.clone();
        loads.borrow_and_update();

        let result = self.conn.call(method, params).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(PortError::Unexpected(format!("{} failed: {}", method, error)));
        }

        match tokio::time::timeout(self.load_timeout, loads.changed()).await {
            Ok(Ok(())) => Ok(result),
            Ok(Err(_)) => Err(PortError::ActorLost("page event stream ended".to_string())),
            Err(_) => Err(PortError::Timeout(format!(
                "page did not finish loading within {:?}",
                self.load_timeout
            ))),
        }
    }

    /// `visible`, `hidden` or `detached` for the first element matching `css`.
    async fn element_state(&self, css: &str) -> Result<String, CdpError> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({css});
                if (!el) return 'detached';
                const style = getComputedStyle(el);
                const shown = style.display !== 'none' && style.visibility !== 'hidden'
                    && el.getClientRects().length > 0;
                return shown ? 'visible' : 'hidden';
            }})()"#,
            css = js_string(css)
        );
        let value = self.evaluate(&script).await?;
        Ok(value.as_str().unwrap_or("detached").to_string())
    }

    /// Runs a script that answers `true` when it found its element.
    async fn on_element(&self, locator: &Locator, body: &str) -> PortResult<()> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({css});
                if (!el) return false;
                {body}
                return true;
            }})()"#,
            css = js_string(&locator.to_css()),
        );
        match self.evaluate(&script).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(PortError::NotFound(locator.to_string())),
        }
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

#[derive(Deserialize)]
struct RawElement {
    #[serde(default)]
    attributes: HashMap<String, String>,
    #[serde(default)]
    classes: Vec<String>,
    #[serde(default)]
    text: String,
}

#[async_trait]
impl RemoteUi for CdpPage {
    async fn navigate(&self, url: &str) -> PortResult<NavigationOutcome> {
        self.load_after("Page.navigate", Some(json!({ "url": url })))
            .await?;

        let value = self
            .evaluate(
                r#"(() => {
                    const nav = performance.getEntriesByType('navigation')[0];
                    return { status: nav && nav.responseStatus ? nav.responseStatus : 0,
                             url: window.location.href };
                })()"#,
            )
            .await?;
        // Browsers without `responseStatus` report 0; a loaded document is taken as 200.
        let status = match value["status"].as_u64() {
            Some(status) if status > 0 => status as u16,
            _ => 200,
        };
        let url = value["url"].as_str().unwrap_or(url).to_string();
        debug!(%url, status, "Navigation finished.");
        Ok(NavigationOutcome { status, url })
    }

    async fn reload(&self) -> PortResult<()> {
        self.load_after("Page.reload", Some(json!({ "ignoreCache": true })))
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> PortResult<String> {
        let value = self.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn expect_exchange(&self, matcher: ExchangeMatcher) -> PortResult<Rendezvous> {
        if self.conn.is_closed() {
            return Err(PortError::ActorLost("CDP connection closed".to_string()));
        }
        let (tx, rendezvous) = Rendezvous::channel(matcher.clone());
        self.shared.network.lock().waiting.push((matcher, tx));
        Ok(rendezvous)
    }

    async fn invoke(&self, entry_point: &str, args: Vec<Value>) -> PortResult<Value> {
        let script = format!(
            r#"(async () => {{
                const fn = window[{name}];
                if (typeof fn !== 'function') throw new Error({name} + ' is not a page function');
                const out = await fn(...{args});
                return out === undefined ? null : out;
            }})()"#,
            name = js_string(entry_point),
            args = Value::Array(args),
        );
        Ok(self.evaluate(&script).await?)
    }

    async fn read_elements(&self, locator: &Locator) -> PortResult<Vec<ElementRecord>> {
        let script = format!(
            r#"Array.from(document.querySelectorAll({css})).map(el => ({{
                attributes: Object.fromEntries(Array.from(el.attributes).map(a => [a.name, a.value])),
                classes: Array.from(el.classList),
                text: (el.innerText || el.textContent || '').trim(),
            }}))"#,
            css = js_string(&locator.to_css())
        );
        let value = self.evaluate(&script).await?;
        let raw: Vec<RawElement> = serde_json::from_value(value)
            .map_err(|e| PortError::Unexpected(format!("element snapshot: {}", e)))?;
        Ok(raw
            .into_iter()
            .map(|r| ElementRecord {
                attributes: r.attributes,
                classes: r.classes,
                text: r.text,
            })
            .collect())
    }

    async fn wait_for_element(
        &self,
        locator: &Locator,
        state: ElementState,
        timeout: Duration,
    ) -> PortResult<()> {
        let css = locator.to_css();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.element_state(&css).await?;
            let satisfied = match state {
                ElementState::Attached => current != "detached",
                ElementState::Visible => current == "visible",
                ElementState::Hidden => current != "visible",
            };
            if satisfied {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PortError::Timeout(format!(
                    "{} not {:?} within {:?} (last seen {})",
                    locator, state, timeout, current
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn fill(&self, locator: &Locator, value: &str) -> PortResult<()> {
        let body = format!(
            r#"el.focus();
               el.value = {value};
               el.dispatchEvent(new Event('input', {{ bubbles: true }}));
               el.dispatchEvent(new Event('change', {{ bubbles: true }}));"#,
            value = js_string(value)
        );
        self.on_element(locator, &body).await
    }

    async fn click(&self, locator: &Locator) -> PortResult<()> {
        self.on_element(locator, "el.scrollIntoView({ block: 'center' }); el.click();")
            .await
    }

    async fn select_option(&self, locator: &Locator, value: &str) -> PortResult<()> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({css});
                if (!el) return 'missing';
                if (!Array.from(el.options || []).some(o => o.value === {value})) return 'no-option';
                el.value = {value};
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return 'ok';
            }})()"#,
            css = js_string(&locator.to_css()),
            value = js_string(value)
        );
        match self.evaluate(&script).await?.as_str() {
            Some("ok") => Ok(()),
            Some("no-option") => Err(PortError::NotFound(format!(
                "option {:?} in {}",
                value, locator
            ))),
            _ => Err(PortError::NotFound(locator.to_string())),
        }
    }

    async fn take_dialog_message(&self) -> PortResult<Option<String>> {
        Ok(self.shared.dialog.lock().take())
    }

    async fn screenshot(&self) -> PortResult<Vec<u8>> {
        let result = self
            .conn
            .call("Page.captureScreenshot", Some(json!({ "format": "png" })))
            .await?;
        let data = result["data"]
            .as_str()
            .ok_or_else(|| PortError::Unexpected("screenshot without data".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| PortError::Unexpected(format!("screenshot decode: {}", e)))
    }

    async fn clear_cookies(&self) -> PortResult<()> {
        self.conn.call("Network.clearBrowserCookies", None).await?;
        self.evaluate("try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}")
            .await?;
        debug!("Browser cookies and page storage cleared.");
        Ok(())
    }

    async fn close(&self) -> PortResult<()> {
        let owner = self.owner.lock().await.take();
        match owner {
            Some(PageOwner::Process(mut child)) => {
                // The profile directory outlives the process; its login must not.
                if let Err(e) = self.conn.call("Network.clearBrowserCookies", None).await {
                    debug!(error = %e, "Clearing cookies before shutdown failed.");
                }
                if let Err(e) = self.conn.call("Browser.close", None).await {
                    debug!(error = %e, "Browser.close failed, killing the process.");
                }
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Browser process already gone.");
                }
                info!("Browser process stopped.");
            }
            Some(PageOwner::Attached) => {
                if let Err(e) = self.conn.call("Page.close", None).await {
                    debug!(error = %e, "Page.close failed.");
                }
                info!("Attached tab closed.");
            }
            None => return Ok(()),
        }
        self.conn.shutdown().await;
        self.event_task.abort();
        Ok(())
    }
}

//=========================================================================================
// Event pump
//=========================================================================================

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    conn: Weak<CdpConnection>,
    shared: Arc<PageShared>,
    loads: watch::Sender<u64>,
) {
    while let Some(event) = events.recv().await {
        let params = &event.params;
        match event.method.as_str() {
            "Page.loadEventFired" => {
                loads.send_modify(|n| *n += 1);
            }
            "Page.javascriptDialogOpening" => {
                let message = params["message"].as_str().unwrap_or_default().to_string();
                debug!(%message, "Dialog opened, accepting.");
                *shared.dialog.lock() = Some(message);
                if let Some(conn) = conn.upgrade() {
                    tokio::spawn(async move {
                        let accepted = conn
                            .call("Page.handleJavaScriptDialog", Some(json!({ "accept": true })))
                            .await;
                        if let Err(e) = accepted {
                            warn!(error = %e, "Failed to accept dialog.");
                        }
                    });
                }
            }
            "Network.requestWillBeSent" => {
                let request_id = params["requestId"].as_str().unwrap_or_default();
                let method = params["request"]["method"].as_str().unwrap_or_default();
                let url = params["request"]["url"].as_str().unwrap_or_default();
                shared.network.lock().on_request(request_id, method, url);
            }
            "Network.responseReceived" => {
                let request_id = params["requestId"].as_str().unwrap_or_default();
                let status = params["response"]["status"].as_u64().unwrap_or(0) as u16;
                let url = params["response"]["url"].as_str().unwrap_or_default();
                shared.network.lock().on_response(request_id, status, url);
            }
            "Network.loadingFinished" => {
                let request_id = params["requestId"].as_str().unwrap_or_default().to_string();
                let Some(bound) = shared.network.lock().bound.remove(&request_id) else {
                    continue;
                };
                let Some(conn) = conn.upgrade() else {
                    break;
                };
                tokio::spawn(complete_exchange(conn, request_id, bound));
            }
            "Network.loadingFailed" => {
                let request_id = params["requestId"].as_str().unwrap_or_default();
                let Some(bound) = shared.network.lock().bound.remove(request_id) else {
                    continue;
                };
                let reason = params["errorText"].as_str().unwrap_or("unknown");
                let _ = bound.tx.send(Err(PortError::Unexpected(format!(
                    "{} {} failed: {}",
                    bound.method, bound.url, reason
                ))));
            }
            "Inspector.targetCrashed" | "Inspector.detached" => {
                warn!(event = %event.method, "Page target lost.");
                break;
            }
            _ => {}
        }
    }
    // Dropping the senders resolves every outstanding rendezvous as a lost actor.
    let mut network = shared.network.lock();
    network.waiting.clear();
    network.bound.clear();
}

async fn complete_exchange(conn: Arc<CdpConnection>, request_id: String, bound: BoundExchange) {
    let body = conn
        .call(
            "Network.getResponseBody",
            Some(json!({ "requestId": request_id })),
        )
        .await
        .map_err(PortError::from)
        .and_then(|result| decode_body(&result));
    let exchange = body.map(|body| Exchange {
        url: bound.url,
        method: bound.method,
        status: bound.status,
        body,
    });
    let _ = bound.tx.send(exchange);
}

fn decode_body(result: &Value) -> PortResult<String> {
    let body = result["body"].as_str().unwrap_or_default();
    if result["base64Encoded"].as_bool().unwrap_or(false) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| PortError::Unexpected(format!("response body decode: {}", e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Ok(body.to_string())
    }
}

/// A JavaScript string literal for `value`.
fn js_string(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}
