//! services/api/src/adapters/chrome.rs
//!
//! The `UiLauncher` behind the session manager: either spawns a private Chrome
//! with remote debugging enabled, or opens a fresh tab in a browser that is
//! already running at `CDP_ENDPOINT`.

use crate::adapters::cdp::{BrowserVersion, CdpConnection, CdpError, TargetEntry};
use crate::adapters::page::{CdpPage, PageOwner};
use async_trait::async_trait;
use schedule_rpa_core::ports::{PortError, PortResult, RemoteUi, UiLauncher};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const READY_POLL: Duration = Duration::from_millis(200);
const TARGET_POLL: Duration = Duration::from_millis(300);
const TARGET_ATTEMPTS: usize = 10;

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Explicit Chrome binary; searched on `PATH` when unset.
    pub chrome_path: Option<PathBuf>,
    /// Attach to this debugging endpoint instead of launching.
    pub cdp_endpoint: Option<String>,
    pub headless: bool,
    pub data_dir: PathBuf,
    /// Budget for the browser to come up, and for each page load.
    pub step_timeout: Duration,
}

pub struct ChromeLauncher {
    config: BrowserConfig,
    http: reqwest::Client,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    async fn spawn_browser(&self) -> Result<CdpPage, CdpError> {
        let binary = find_browser_binary(self.config.chrome_path.as_deref())
            .ok_or_else(|| CdpError::ChromeNotAvailable("no Chrome binary found".to_string()))?;
        let port = find_free_port().await?;
        std::fs::create_dir_all(&self.config.data_dir).map_err(|e| {
            CdpError::ConnectionFailed(format!(
                "cannot create profile dir {}: {}",
                self.config.data_dir.display(),
                e
            ))
        })?;

        let args = build_browser_args(port, &self.config.data_dir, self.config.headless);
        info!(
            binary = %binary.display(),
            port,
            headless = self.config.headless,
            "Launching Chrome."
        );
        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CdpError::ChromeNotAvailable(format!("{}: {}", binary.display(), e)))?;

        match self.connect_local(port, child).await {
            Ok(page) => Ok(page),
            Err((e, Some(mut child))) => {
                warn!(error = %e, "Chrome did not come up, killing it.");
                let _ = child.kill().await;
                Err(e)
            }
            Err((e, None)) => Err(e),
        }
    }

    /// Waits for the freshly spawned browser and connects to its first tab.
    /// On failure the child is handed back so the caller can reap it.
    async fn connect_local(
        &self,
        port: u16,
        child: Child,
    ) -> Result<CdpPage, (CdpError, Option<Child>)> {
        let endpoint = format!("http://127.0.0.1:{}", port);
        if let Err(e) = self.wait_for_cdp_ready(&endpoint).await {
            return Err((e, Some(child)));
        }
        let ws_url = match self.first_page_ws_url(&endpoint).await {
            Ok(url) => url,
            Err(e) => return Err((e, Some(child))),
        };
        let (conn, events) = match CdpConnection::connect(&ws_url, self.config.step_timeout).await
        {
            Ok(pair) => pair,
            Err(e) => return Err((e, Some(child))),
        };
        // From here on the page owns the child; a failed open drops it, which kills it.
        CdpPage::open(
            conn,
            events,
            PageOwner::Process(child),
            self.config.step_timeout,
        )
        .await
        .map_err(|e| (e, None))
    }

    async fn attach(&self, endpoint: &str) -> Result<CdpPage, CdpError> {
        let endpoint = endpoint.trim_end_matches('/');
        let version: BrowserVersion = self
            .http
            .get(format!("{}/json/version", endpoint))
            .send()
            .await
            .map_err(|e| CdpError::ChromeNotAvailable(format!("{}: {}", endpoint, e)))?
            .json()
            .await?;
        debug!(browser = %version.browser, "Attaching to running browser.");

        // Chrome requires PUT for /json/new.
        let target: TargetEntry = self
            .http
            .put(format!("{}/json/new?about:blank", endpoint))
            .send()
            .await?
            .json()
            .await?;
        let ws_url = target.web_socket_debugger_url.ok_or_else(|| {
            CdpError::InvalidResponse(format!("target {} has no debugger url", target.id))
        })?;
        info!(target = %target.id, %endpoint, "Opened tab in attached browser.");

        let (conn, events) = CdpConnection::connect(&ws_url, self.config.step_timeout).await?;
        CdpPage::open(conn, events, PageOwner::Attached, self.config.step_timeout).await
    }

    async fn wait_for_cdp_ready(&self, endpoint: &str) -> Result<(), CdpError> {
        let url = format!("{}/json/version", endpoint);
        let deadline = tokio::time::Instant::now() + self.config.step_timeout;
        loop {
            if let Ok(resp) = self.http.get(&url).send().await {
                if resp.json::<BrowserVersion>().await.is_ok() {
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CdpError::Timeout(format!(
                    "CDP not ready on {} after {:?}",
                    endpoint, self.config.step_timeout
                )));
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn first_page_ws_url(&self, endpoint: &str) -> Result<String, CdpError> {
        let url = format!("{}/json/list", endpoint);
        for attempt in 0..TARGET_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(TARGET_POLL).await;
            }
            let Ok(resp) = self.http.get(&url).send().await else {
                continue;
            };
            let Ok(targets) = resp.json::<Vec<TargetEntry>>().await else {
                continue;
            };
            if let Some(ws_url) = targets
                .into_iter()
                .filter(|t| t.target_type == "page")
                .find_map(|t| t.web_socket_debugger_url)
            {
                return Ok(ws_url);
            }
        }
        Err(CdpError::InvalidResponse(
            "no page target found after retries".to_string(),
        ))
    }
}

#[async_trait]
impl UiLauncher for ChromeLauncher {
    async fn launch(&self) -> PortResult<Arc<dyn RemoteUi>> {
        let page = match &self.config.cdp_endpoint {
            Some(endpoint) => self.attach(endpoint).await,
            None => self.spawn_browser().await,
        }
        .map_err(PortError::from)?;
        Ok(Arc::new(page))
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

fn find_browser_binary(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ]
    };
    candidates.iter().find_map(|candidate| {
        let path = Path::new(candidate);
        if path.is_absolute() {
            path.exists().then(|| path.to_path_buf())
        } else {
            which::which(candidate).ok()
        }
    })
}

async fn find_free_port() -> Result<u16, CdpError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| CdpError::ConnectionFailed(format!("no free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| CdpError::ConnectionFailed(format!("no free port: {}", e)))?
        .port();
    Ok(port)
}

fn build_browser_args(port: u16, data_dir: &Path, headless: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", port),
        format!("--user-data-dir={}", data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
        "--window-size=1280,900".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}
