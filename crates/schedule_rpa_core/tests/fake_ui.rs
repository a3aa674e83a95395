#![allow(dead_code)]

//! A scripted in-memory vendor site and the `RemoteUi` actors that drive it.

use async_trait::async_trait;
use chrono::{Duration as DateSpan, NaiveDate};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

use schedule_rpa_core::domain::{format_hhmm, parse_hhmm};
use schedule_rpa_core::ports::{
    ElementRecord, ElementState, Exchange, ExchangeMatcher, Locator, NavigationOutcome,
    PortError, PortResult, Rendezvous, RemoteUi, UiLauncher,
};
use schedule_rpa_core::vendor;

pub const BASE_URL: &str = "https://vendor.test";
pub const LOGIN_ID: &str = "operator";
pub const LOGIN_SECRET: &str = "s3cret";
pub const SHOP_ID: &str = "H000123";

pub fn element(attrs: &[(&str, &str)], classes: &[&str], text: &str) -> ElementRecord {
    ElementRecord {
        attributes: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        classes: classes.iter().map(|c| c.to_string()).collect(),
        text: text.to_string(),
    }
}

//=========================================================================================
// Vendor
//=========================================================================================

#[derive(Default)]
pub struct VendorState {
    pub login_id: String,
    pub login_secret: String,
    pub shops: Vec<String>,
    /// Bumping this invalidates every logged-in actor.
    pub epoch: u64,
    pub cells: Vec<ElementRecord>,
    pub reservations: Vec<ElementRecord>,
    pub shifts: Vec<ElementRecord>,
    pub resources: Vec<ElementRecord>,
    pub menu: Vec<ElementRecord>,
    /// Mutation responses, consumed in order; `{"result": true}` when empty.
    pub responses: VecDeque<(Value, Option<String>)>,
    /// Entry point that never completes, once.
    pub hang_on: Option<String>,
    /// Selector whose next read reports a lost actor, once.
    pub lose_actor_on: Option<String>,
    /// The detail popup stays open after an accepted submission.
    pub sticky_popup: bool,
    /// Actors share one cookie jar, as with a reused browser profile.
    pub persistent_profile: bool,
    /// Login epoch held by the shared cookie jar.
    pub profile_login: Option<u64>,
    pub launch_failures: usize,
    pub launches: usize,
    pub closes: usize,
    pub log: Vec<String>,
    next_id: u32,
}

#[derive(Clone)]
pub struct FakeVendor {
    state: Arc<Mutex<VendorState>>,
}

impl FakeVendor {
    pub fn new() -> Self {
        let state = VendorState {
            login_id: LOGIN_ID.to_string(),
            login_secret: LOGIN_SECRET.to_string(),
            shops: vec![SHOP_ID.to_string(), "H000999".to_string()],
            next_id: 100,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, VendorState> {
        self.state.lock().unwrap()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.state().log.push(entry.into());
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.state().log.iter().any(|entry| entry.contains(needle))
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn launches(&self) -> usize {
        self.state().launches
    }

    pub fn expire_sessions(&self) {
        self.state().epoch += 1;
    }

    pub fn add_cell(&self, date: &str, start: &str, end: &str, resource: &str, classes: &[&str]) {
        self.state().cells.push(element(
            &[
                ("data-date", date),
                ("data-start", start),
                ("data-end", end),
                ("data-resource-id", resource),
                ("data-line", "1"),
                ("data-line-count", "1"),
            ],
            classes,
            "",
        ));
    }

    pub fn add_reservation(
        &self,
        id: &str,
        date: &str,
        start: &str,
        end: &str,
        resource: &str,
        label: &str,
    ) {
        self.state().reservations.push(element(
            &[
                ("data-date", date),
                ("data-start", start),
                ("data-end", end),
                ("data-resource-id", resource),
                ("data-reservation-id", id),
                ("data-line", "1"),
                ("data-line-count", "1"),
            ],
            &[],
            label,
        ));
    }

    pub fn add_shift(&self, date: &str, start: &str, end: &str, resource: &str) {
        self.state().shifts.push(element(
            &[
                ("data-date", date),
                ("data-start", start),
                ("data-end", end),
                ("data-resource-id", resource),
            ],
            &[],
            "",
        ));
    }

    pub fn add_resource(&self, id: &str, name: &str) {
        self.state()
            .resources
            .push(element(&[("data-resource-id", id)], &[], name));
    }

    pub fn add_menu(&self, value: &str, label: &str) {
        self.state()
            .menu
            .push(element(&[("value", value)], &[], label));
    }

    pub fn respond(&self, body: Value, alert: Option<&str>) {
        self.state()
            .responses
            .push_back((body, alert.map(str::to_string)));
    }

    pub fn reservation_ids(&self) -> Vec<String> {
        self.state()
            .reservations
            .iter()
            .filter_map(|r| r.attr("data-reservation-id").map(str::to_string))
            .collect()
    }

    fn next_response(&self) -> (Value, Option<String>) {
        self.state()
            .responses
            .pop_front()
            .unwrap_or_else(|| (json!({ "result": true }), None))
    }

    fn allocate_id(&self) -> String {
        let mut state = self.state();
        state.next_id += 1;
        format!("R{}", state.next_id)
    }
}

//=========================================================================================
// Actor
//=========================================================================================

#[derive(Default)]
struct PageState {
    url: String,
    logged_in_epoch: Option<u64>,
    login_error: Option<String>,
    closed: bool,
    rendered: Option<NaiveDate>,
    visible: HashSet<String>,
    form: HashMap<String, String>,
    pending: Vec<(ExchangeMatcher, oneshot::Sender<PortResult<Exchange>>)>,
    dialog: Option<String>,
    /// (date, start, resource) of the open create popup.
    create_target: Option<(String, String, String)>,
    editing: Option<String>,
}

pub struct FakeUi {
    vendor: FakeVendor,
    page: Mutex<PageState>,
}

impl FakeUi {
    pub fn new(vendor: FakeVendor) -> Self {
        let inherited = {
            let state = vendor.state();
            state.profile_login.filter(|_| state.persistent_profile)
        };
        Self {
            vendor,
            page: Mutex::new(PageState {
                url: "about:blank".to_string(),
                logged_in_epoch: inherited,
                ..Default::default()
            }),
        }
    }

    fn page(&self) -> PortResult<MutexGuard<'_, PageState>> {
        let page = self.page.lock().unwrap();
        if page.closed {
            return Err(PortError::ActorLost("Target closed".to_string()));
        }
        Ok(page)
    }

    fn authenticated(&self, page: &PageState) -> bool {
        page.logged_in_epoch == Some(self.vendor.state().epoch)
    }

    fn fire(page: &mut PageState, path: &str, body: &Value) {
        let url = format!("{}/api{}", BASE_URL, path);
        if let Some(index) = page
            .pending
            .iter()
            .position(|(matcher, _)| matcher.matches("POST", &url))
        {
            let (_, tx) = page.pending.remove(index);
            let _ = tx.send(Ok(Exchange {
                url,
                method: "POST".to_string(),
                status: 200,
                body: body.to_string(),
            }));
        }
    }

    fn in_window(page: &PageState, record: &ElementRecord) -> bool {
        let (Some(rendered), Some(date)) = (
            page.rendered,
            record
                .attr("data-date")
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok()),
        ) else {
            return false;
        };
        date >= rendered && date < rendered + DateSpan::days(8)
    }

    fn on_schedule(page: &PageState) -> bool {
        page.url.ends_with("/schedule")
    }
}

fn shop_of(url: &str) -> Option<&str> {
    url.strip_prefix(BASE_URL)?
        .strip_prefix('/')?
        .strip_suffix("/schedule")
}

#[async_trait]
impl RemoteUi for FakeUi {
    async fn navigate(&self, url: &str) -> PortResult<NavigationOutcome> {
        self.vendor.record(format!("navigate {}", url));
        let mut page = self.page()?;
        page.visible.clear();
        page.rendered = None;

        if let Some(shop) = shop_of(url) {
            if !self.vendor.state().shops.iter().any(|s| s == shop) {
                page.url = url.to_string();
                return Ok(NavigationOutcome {
                    status: 404,
                    url: url.to_string(),
                });
            }
            if !self.authenticated(&page) {
                page.url = format!("{}/login", BASE_URL);
                return Ok(NavigationOutcome {
                    status: 200,
                    url: page.url.clone(),
                });
            }
        }
        if url.ends_with("/login") {
            page.login_error = None;
        }
        page.url = url.to_string();
        Ok(NavigationOutcome {
            status: 200,
            url: url.to_string(),
        })
    }

    async fn reload(&self) -> PortResult<()> {
        self.vendor.record("reload");
        let mut page = self.page()?;
        page.visible.clear();
        page.rendered = None;
        page.create_target = None;
        page.editing = None;
        if Self::on_schedule(&page) && !self.authenticated(&page) {
            page.url = format!("{}/login", BASE_URL);
        }
        Ok(())
    }

    async fn current_url(&self) -> PortResult<String> {
        Ok(self.page()?.url.clone())
    }

    async fn expect_exchange(&self, matcher: ExchangeMatcher) -> PortResult<Rendezvous> {
        let (tx, rendezvous) = Rendezvous::channel(matcher.clone());
        self.page()?.pending.push((matcher, tx));
        Ok(rendezvous)
    }

    async fn invoke(&self, entry_point: &str, args: Vec<Value>) -> PortResult<Value> {
        self.vendor.record(format!(
            "invoke {} {}",
            entry_point,
            Value::Array(args.clone())
        ));
        let hang = {
            let mut state = self.vendor.state();
            if state.hang_on.as_deref() == Some(entry_point) {
                state.hang_on = None;
                true
            } else {
                false
            }
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut page = self.page()?;
        let arg = |i: usize| -> String {
            match args.get(i) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            }
        };
        match entry_point {
            vendor::RENDER_ENTRY_POINT => {
                let date = NaiveDate::parse_from_str(&arg(0), "%Y%m%d")
                    .map_err(|e| PortError::Unexpected(e.to_string()))?;
                page.rendered = Some(date);
                page.visible.clear();
                Self::fire(&mut page, vendor::SCHEDULE_EXCHANGE, &json!({}));
            }
            vendor::CREATE_ENTRY_POINT => {
                let datetime = arg(0);
                let date = datetime[..8].to_string();
                let start = format!("{}:{}", &datetime[8..10], &datetime[10..12]);
                page.create_target = Some((date, start, arg(1)));
                page.visible.insert(vendor::SIMPLE_FORM.to_string());
            }
            vendor::EDIT_ENTRY_POINT => {
                page.editing = Some(arg(4));
                page.visible.insert(vendor::DETAIL_FORM.to_string());
            }
            other => {
                return Err(PortError::Unexpected(format!("{} is not a function", other)));
            }
        }
        Ok(Value::Null)
    }

    async fn read_elements(&self, locator: &Locator) -> PortResult<Vec<ElementRecord>> {
        let mut page = self.page()?;
        {
            let mut state = self.vendor.state();
            if state.lose_actor_on.as_deref() == Some(locator.selector.as_str()) {
                state.lose_actor_on = None;
                page.closed = true;
                return Err(PortError::ActorLost("Target closed".to_string()));
            }
        }

        let authenticated = self.authenticated(&page);
        let state = self.vendor.state();
        let windowed = |items: &Vec<ElementRecord>| -> Vec<ElementRecord> {
            items
                .iter()
                .filter(|r| Self::on_schedule(&page) && Self::in_window(&page, r))
                .cloned()
                .collect()
        };
        let found = match locator.selector.as_str() {
            vendor::AUTHENTICATED_MARKER if authenticated => vec![element(&[], &[], "Logout")],
            vendor::LOGIN_ERROR => page
                .login_error
                .iter()
                .map(|text| element(&[], &[], text))
                .collect(),
            vendor::SCHEDULE_CELL => windowed(&state.cells),
            vendor::RESERVATION_BLOCK => windowed(&state.reservations),
            vendor::SHIFT_RANGE => windowed(&state.shifts),
            vendor::RESOURCE_HEADER if page.rendered.is_some() => state.resources.clone(),
            vendor::MENU_OPTION if page.visible.contains(vendor::DETAIL_FORM) => state.menu.clone(),
            _ => Vec::new(),
        };
        Ok(found
            .into_iter()
            .filter(|record| {
                locator
                    .attributes
                    .iter()
                    .all(|(name, value)| record.attr(name) == Some(value.as_str()))
            })
            .collect())
    }

    async fn wait_for_element(
        &self,
        locator: &Locator,
        state: ElementState,
        _timeout: Duration,
    ) -> PortResult<()> {
        let page = self.page()?;
        let shown = match locator.selector.as_str() {
            vendor::LOGIN_ID_INPUT => page.url.ends_with("/login"),
            vendor::SCHEDULE_GRID => Self::on_schedule(&page) && self.authenticated(&page),
            other => page.visible.contains(other),
        };
        let satisfied = match state {
            ElementState::Visible | ElementState::Attached => shown,
            ElementState::Hidden => !shown,
        };
        if satisfied {
            Ok(())
        } else {
            Err(PortError::Timeout(format!(
                "{} did not become {:?}",
                locator, state
            )))
        }
    }

    async fn fill(&self, locator: &Locator, value: &str) -> PortResult<()> {
        self.vendor
            .record(format!("fill {} {}", locator.selector, value));
        self.page()?
            .form
            .insert(locator.selector.clone(), value.to_string());
        Ok(())
    }

    async fn click(&self, locator: &Locator) -> PortResult<()> {
        self.vendor.record(format!("click {}", locator));
        let mut page = self.page()?;
        match locator.selector.as_str() {
            vendor::LOGIN_SUBMIT => {
                let (valid, epoch) = {
                    let mut state = self.vendor.state();
                    let valid = page.form.get(vendor::LOGIN_ID_INPUT) == Some(&state.login_id)
                        && page.form.get(vendor::LOGIN_PASSWORD_INPUT) == Some(&state.login_secret);
                    if valid {
                        state.profile_login = Some(state.epoch);
                    }
                    (valid, state.epoch)
                };
                if valid {
                    page.logged_in_epoch = Some(epoch);
                    page.url = format!("{}/home", BASE_URL);
                } else {
                    page.login_error = Some("ID or password is incorrect".to_string());
                }
            }
            vendor::TO_DETAIL_BUTTON => {
                page.visible.remove(vendor::SIMPLE_FORM);
                page.visible.insert(vendor::DETAIL_FORM.to_string());
            }
            vendor::SUBMIT_BUTTON => {
                let (body, alert) = self.vendor.next_response();
                if body["result"] == json!(true) {
                    if let Some((date, start, resource)) = page.create_target.take() {
                        let duration = page
                            .form
                            .get(vendor::DURATION_INPUT)
                            .and_then(|d| d.parse::<u32>().ok())
                            .unwrap_or(30);
                        let end = format_hhmm(parse_hhmm(&start).unwrap() + duration);
                        let label = format!(
                            "{} {} {}",
                            page.form.get(vendor::LAST_NAME_INPUT).cloned().unwrap_or_default(),
                            page.form.get(vendor::FIRST_NAME_INPUT).cloned().unwrap_or_default(),
                            page.form.get(vendor::PHONE_INPUT).cloned().unwrap_or_default(),
                        );
                        let id = self.vendor.allocate_id();
                        self.vendor
                            .add_reservation(&id, &date, &start, &end, &resource, &label);
                    }
                    if !self.vendor.state().sticky_popup {
                        page.visible.remove(vendor::DETAIL_FORM);
                    }
                }
                page.dialog = alert;
                Self::fire(&mut page, vendor::REGISTER_EXCHANGE, &body);
            }
            vendor::CANCEL_BUTTON => {
                page.visible.insert(vendor::CANCEL_DIALOG.to_string());
            }
            vendor::DELETE_BUTTON => {
                page.visible.insert(vendor::DELETE_DIALOG.to_string());
            }
            vendor::CANCEL_CONFIRM | vendor::DELETE_CONFIRM => {
                let (body, alert) = self.vendor.next_response();
                if body["result"] == json!(true) {
                    if let Some(id) = page.editing.take() {
                        self.vendor.state().reservations.retain(|r| {
                            r.attr(vendor::ATTR_RESERVATION_ID) != Some(id.as_str())
                        });
                    }
                    page.visible.clear();
                }
                page.dialog = alert;
                let path = if locator.selector == vendor::CANCEL_CONFIRM {
                    vendor::CANCEL_EXCHANGE
                } else {
                    vendor::DELETE_EXCHANGE
                };
                Self::fire(&mut page, path, &body);
            }
            _ => {}
        }
        Ok(())
    }

    async fn select_option(&self, locator: &Locator, value: &str) -> PortResult<()> {
        self.vendor
            .record(format!("select {} {}", locator.selector, value));
        self.page()?;
        Ok(())
    }

    async fn take_dialog_message(&self) -> PortResult<Option<String>> {
        Ok(self.page()?.dialog.take())
    }

    async fn screenshot(&self) -> PortResult<Vec<u8>> {
        self.page()?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn clear_cookies(&self) -> PortResult<()> {
        self.vendor.record("clear cookies");
        self.page()?.logged_in_epoch = None;
        self.vendor.state().profile_login = None;
        Ok(())
    }

    async fn close(&self) -> PortResult<()> {
        self.vendor.record("close");
        self.vendor.state().closes += 1;
        let mut page = self.page.lock().unwrap();
        page.closed = true;
        page.pending.clear();
        Ok(())
    }
}

//=========================================================================================
// Launcher
//=========================================================================================

pub struct FakeLauncher {
    pub vendor: FakeVendor,
}

impl FakeLauncher {
    pub fn new(vendor: FakeVendor) -> Arc<Self> {
        Arc::new(Self { vendor })
    }
}

#[async_trait]
impl UiLauncher for FakeLauncher {
    async fn launch(&self) -> PortResult<Arc<dyn RemoteUi>> {
        self.vendor.record("launch");
        {
            let mut state = self.vendor.state();
            state.launches += 1;
            if state.launch_failures > 0 {
                state.launch_failures -= 1;
                return Err(PortError::Unexpected("browser failed to start".to_string()));
            }
        }
        Ok(Arc::new(FakeUi::new(self.vendor.clone())))
    }
}
