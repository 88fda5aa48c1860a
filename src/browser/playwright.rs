//! Playwright-backed page driver.
//!
//! A small Node bridge script is written to a temporary directory and kept
//! running for the whole GUI session; requests and replies travel as JSON
//! lines over its stdin/stdout.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};

use super::{PageDriver, WaitState};
use crate::config::BrowserSettings;
use crate::error::{HarnessError, HarnessResult};

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
/// Extra time granted to the bridge on top of the in-browser timeout.
const BRIDGE_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    Chromium,
    #[default]
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }

    pub fn parse(name: &str) -> HarnessResult<Self> {
        match name {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(HarnessError::Browser(format!("Unsupported browser: {}", other))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

pub struct PlaywrightPage {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    element_timeout: Duration,
    closed: bool,
    _workdir: TempDir,
}

/// Where Node should resolve `playwright` from: the configured directory,
/// else `node_modules` under `project_dir` when it exists.
pub fn node_path(settings: &BrowserSettings, project_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = &settings.node_path {
        return Some(path.clone());
    }
    let local = project_dir.join("node_modules");
    local.is_dir().then_some(local)
}

/// The bridge process. The script lives in a temporary directory, so module
/// lookup goes through `NODE_PATH` rather than the script's location.
pub fn bridge_command(
    settings: &BrowserSettings,
    browser: Browser,
    script: &Path,
    project_dir: &Path,
) -> TokioCommand {
    let mut cmd = TokioCommand::new(&settings.node_binary);
    cmd.arg(script)
        .current_dir(project_dir)
        .env("HARNESS_BROWSER", browser.as_str())
        .env("HARNESS_HEADLESS", if settings.headless { "1" } else { "0" })
        .env("HARNESS_VIEWPORT_WIDTH", settings.viewport_width.to_string())
        .env("HARNESS_VIEWPORT_HEIGHT", settings.viewport_height.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    match node_path(settings, project_dir) {
        Some(dir) => {
            let inherited = std::env::var_os("NODE_PATH");
            let paths = std::iter::once(dir.clone())
                .chain(inherited.iter().flat_map(std::env::split_paths));
            match std::env::join_paths(paths) {
                Ok(joined) => {
                    debug!("NODE_PATH for browser bridge: {:?}", joined);
                    cmd.env("NODE_PATH", joined);
                }
                Err(e) => {
                    warn!("Cannot build NODE_PATH from {:?}: {}", dir, e);
                    cmd.env("NODE_PATH", &dir);
                }
            }
        }
        None => warn!(
            "No node_modules found in {:?} and no node_path configured; relying on a global playwright install",
            project_dir
        ),
    }
    cmd
}

impl PlaywrightPage {
    pub async fn launch(settings: &BrowserSettings) -> HarnessResult<Self> {
        let browser = Browser::parse(&settings.browser)?;
        let workdir = tempfile::tempdir()?;
        let script = workdir.path().join("bridge.js");
        std::fs::write(&script, BRIDGE_SCRIPT)?;

        info!("Launching {} via {}", browser.as_str(), settings.node_binary);

        let project_dir = std::env::current_dir()?;
        let mut child = bridge_command(settings, browser, &script, &project_dir)
            .spawn()
            .map_err(|e| {
                HarnessError::ConnectionFailure(format!(
                    "Failed to start browser bridge with {}: {}",
                    settings.node_binary, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Browser("Bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Browser("Bridge stdout unavailable".to_string()))?;

        let mut page = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            element_timeout: Duration::from_secs(settings.element_timeout_secs),
            closed: false,
            _workdir: workdir,
        };

        page.call(json!({"op": "launch"}), LAUNCH_TIMEOUT)
            .await
            .map_err(|e| HarnessError::ConnectionFailure(format!("Browser launch failed: {}", e)))?;
        Ok(page)
    }

    async fn call(&mut self, mut request: Value, budget: Duration) -> HarnessResult<Value> {
        self.next_id += 1;
        let id = self.next_id;
        request["id"] = json!(id);
        request["timeout"] = json!(budget.as_millis() as u64);

        let op = request["op"].as_str().unwrap_or("?").to_string();
        let selector = request["selector"].as_str().map(str::to_string);
        debug!("Bridge request {} {}", op, selector.as_deref().unwrap_or(""));

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let response = tokio::time::timeout(budget + BRIDGE_SLACK, self.read_response(id))
            .await
            .map_err(|_| HarnessError::timeout(format!("browser bridge reply to {}", op), budget))??;

        if response.ok {
            return Ok(response.value);
        }

        let message = response.error.unwrap_or_else(|| "unknown bridge error".to_string());
        Err(match (response.kind.as_deref(), selector) {
            (Some("timeout"), Some(selector)) if op == "wait_for" => {
                HarnessError::timeout(selector, budget)
            }
            (Some("timeout"), Some(selector)) => HarnessError::element(selector),
            (Some("timeout"), None) => HarnessError::timeout(op, budget),
            _ => HarnessError::Browser(message),
        })
    }

    async fn read_response(&mut self, id: u64) -> HarnessResult<BridgeResponse> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| HarnessError::Browser("Browser bridge exited".to_string()))?;

            match serde_json::from_str::<BridgeResponse>(&line) {
                Ok(response) if response.id == id => return Ok(response),
                Ok(response) => debug!("Discarding stale bridge reply {}", response.id),
                Err(_) => debug!("Bridge output: {}", line),
            }
        }
    }
}

#[async_trait]
impl PageDriver for PlaywrightPage {
    async fn goto(&mut self, url: &str) -> HarnessResult<()> {
        info!("Navigating to {}", url);
        self.call(json!({"op": "goto", "url": url}), NAVIGATION_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn wait_for(
        &mut self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> HarnessResult<()> {
        self.call(
            json!({"op": "wait_for", "selector": selector, "state": state.as_str()}),
            timeout,
        )
        .await
        .map(|_| ())
    }

    async fn wait_for_url(&mut self, fragment: &str, timeout: Duration) -> HarnessResult<()> {
        self.call(json!({"op": "wait_for_url", "fragment": fragment}), timeout)
            .await
            .map(|_| ())
    }

    async fn click(&mut self, selector: &str, force: bool) -> HarnessResult<()> {
        let budget = self.element_timeout;
        self.call(
            json!({"op": "click", "selector": selector, "force": force}),
            budget,
        )
        .await
        .map(|_| ())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> HarnessResult<()> {
        let budget = self.element_timeout;
        self.call(
            json!({"op": "fill", "selector": selector, "value": value}),
            budget,
        )
        .await
        .map(|_| ())
    }

    async fn press(&mut self, key: &str) -> HarnessResult<()> {
        let budget = self.element_timeout;
        self.call(json!({"op": "press", "key": key}), budget)
            .await
            .map(|_| ())
    }

    async fn type_text(&mut self, text: &str) -> HarnessResult<()> {
        let budget = self.element_timeout;
        self.call(json!({"op": "type", "text": text}), budget)
            .await
            .map(|_| ())
    }

    async fn get_attribute(&mut self, selector: &str, name: &str) -> HarnessResult<Option<String>> {
        let budget = self.element_timeout;
        let value = self
            .call(
                json!({"op": "get_attribute", "selector": selector, "name": name}),
                budget,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn inner_text(&mut self, selector: &str) -> HarnessResult<String> {
        let budget = self.element_timeout;
        let value = self
            .call(json!({"op": "inner_text", "selector": selector}), budget)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn set_input_files(&mut self, selector: &str, file: &Path) -> HarnessResult<()> {
        let budget = self.element_timeout;
        self.call(
            json!({"op": "set_input_files", "selector": selector, "path": file}),
            budget,
        )
        .await
        .map(|_| ())
    }

    async fn click_role_option(&mut self, name: &str) -> HarnessResult<()> {
        let budget = self.element_timeout;
        self.call(json!({"op": "click_role_option", "name": name}), budget)
            .await
            .map_err(|e| match e {
                HarnessError::ElementNotFound { .. } => {
                    HarnessError::element(format!("option[name=\"{}\"]", name))
                }
                other => other,
            })
            .map(|_| ())
    }

    async fn pause(&mut self, duration: Duration) -> HarnessResult<()> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    async fn close(&mut self) -> HarnessResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.call(json!({"op": "close"}), LAUNCH_TIMEOUT).await {
            warn!("Browser close failed: {}", e);
        }
        if let Err(e) = self.child.wait().await {
            warn!("Browser bridge did not exit cleanly: {}", e);
        }
        Ok(())
    }
}
