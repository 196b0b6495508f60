use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

pub const BROWSER_ERROR_TIMEOUT: &str = "browser_timeout";
pub const BROWSER_ERROR_SELECTOR_NOT_FOUND: &str = "browser_selector_not_found";
pub const BROWSER_ERROR_BACKEND_UNAVAILABLE: &str = "browser_backend_unavailable";
pub const BROWSER_ERROR_NO_CONTEXT: &str = "browser_no_context";

const DEFAULT_DRIVER_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DRIVER_DEADLINE_SLACK_MS: u64 = 5_000;
const MAX_DRIVER_DETAIL_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Whether the browser window is shown to the user.
pub enum DisplayMode {
    Headless,
    Visible,
}

impl DisplayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayMode::Headless => "headless",
            DisplayMode::Visible => "visible",
        }
    }

    pub fn is_headless(self) -> bool {
        self == DisplayMode::Headless
    }

    pub fn opposite(self) -> Self {
        match self {
            DisplayMode::Headless => DisplayMode::Visible,
            DisplayMode::Visible => DisplayMode::Headless,
        }
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Launch parameters for one browsing context.
pub struct ContextOptions {
    pub mode: DisplayMode,
    /// Persisted session blob to restore, when one exists.
    pub storage_state: Option<PathBuf>,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// One layer of the automation stack, innermost first.
pub enum SessionLayer {
    Page,
    Context,
    Browser,
    Runtime,
}

impl SessionLayer {
    pub const TEARDOWN_ORDER: [SessionLayer; 4] = [
        SessionLayer::Page,
        SessionLayer::Context,
        SessionLayer::Browser,
        SessionLayer::Runtime,
    ];

    /// Layers rebuilt on a display-mode switch or reconnect; the runtime survives.
    pub const BROWSING_LAYERS: [SessionLayer; 3] =
        [SessionLayer::Page, SessionLayer::Context, SessionLayer::Browser];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionLayer::Page => "page",
            SessionLayer::Context => "context",
            SessionLayer::Browser => "browser",
            SessionLayer::Runtime => "runtime",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "operation", rename_all = "snake_case")]
/// A single page-level action executed inside the open context.
pub enum BrowserAction {
    Navigate {
        url: String,
        timeout_ms: u64,
    },
    CurrentUrl,
    /// Returns `{"elements":[{"label":..,"text":..}]}` in DOM order.
    QueryTexts {
        selector: String,
        label_attribute: Option<String>,
    },
    /// Waits up to `timeout_ms` for `selector`, then clicks the first match.
    ClickFirst {
        selector: String,
        timeout_ms: u64,
    },
    PressKey {
        key: String,
    },
    Settle {
        duration_ms: u64,
    },
    /// Returns `{"storage_state": {...}}` for the open context.
    SaveStorageState,
}

impl BrowserAction {
    pub fn operation(&self) -> &'static str {
        match self {
            BrowserAction::Navigate { .. } => "navigate",
            BrowserAction::CurrentUrl => "current_url",
            BrowserAction::QueryTexts { .. } => "query_texts",
            BrowserAction::ClickFirst { .. } => "click_first",
            BrowserAction::PressKey { .. } => "press_key",
            BrowserAction::Settle { .. } => "settle",
            BrowserAction::SaveStorageState => "save_storage_state",
        }
    }

    /// Upper bound for the whole driver round trip of this action.
    pub fn deadline_ms(&self, default_timeout_ms: u64) -> u64 {
        let inner = match self {
            BrowserAction::Navigate { timeout_ms, .. }
            | BrowserAction::ClickFirst { timeout_ms, .. } => *timeout_ms,
            BrowserAction::Settle { duration_ms } => *duration_ms,
            _ => 0,
        };
        if inner == 0 {
            return default_timeout_ms.max(1);
        }
        inner
            .saturating_add(DRIVER_DEADLINE_SLACK_MS)
            .max(default_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Outcome reported by the driver for one request.
pub struct BrowserActionResult {
    pub status_code: u16,
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub response_body: Value,
}

impl BrowserActionResult {
    pub fn ok(response_body: Value) -> Self {
        Self {
            status_code: 200,
            error_code: String::new(),
            response_body,
        }
    }

    pub fn failure(status_code: u16, error_code: &str) -> Self {
        Self {
            status_code,
            error_code: error_code.to_string(),
            response_body: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_timeout(&self) -> bool {
        self.status_code == 504 || self.error_code == BROWSER_ERROR_TIMEOUT
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == 404 || self.error_code == BROWSER_ERROR_SELECTOR_NOT_FOUND
    }

    /// Timeouts and backend failures; a rebuilt context may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
            || self.status_code >= 500
            || self.error_code == BROWSER_ERROR_BACKEND_UNAVAILABLE
            || self.error_code == BROWSER_ERROR_NO_CONTEXT
    }

    pub fn string_field(&self, field: &str) -> Option<&str> {
        self.response_body.get(field).and_then(Value::as_str)
    }

    fn describe(&self) -> String {
        let detail = self
            .string_field("detail")
            .map(|detail| truncate_for_log(detail))
            .unwrap_or_default();
        format!(
            "status={} error_code={} {}",
            self.status_code,
            if self.error_code.trim().is_empty() {
                "none"
            } else {
                self.error_code.as_str()
            },
            detail
        )
        .trim_end()
        .to_string()
    }

    fn ensure_success(self, what: &str) -> Result<Self> {
        if !self.is_success() {
            bail!("playwright driver {what} failed: {}", self.describe());
        }
        Ok(self)
    }
}

/// Trait contract for the browser automation backend.
///
/// Implementations keep at most one context and page open; `open_context`
/// is only called after the previous context was torn down.
#[async_trait]
pub trait BrowserExecutor: Send {
    async fn start_runtime(&mut self) -> Result<()>;
    async fn open_context(&mut self, options: &ContextOptions) -> Result<()>;
    async fn execute(&mut self, action: &BrowserAction) -> Result<BrowserActionResult>;
    async fn teardown(&mut self, layer: SessionLayer) -> Result<()>;
}

#[async_trait]
impl<E: BrowserExecutor + ?Sized> BrowserExecutor for Box<E> {
    async fn start_runtime(&mut self) -> Result<()> {
        (**self).start_runtime().await
    }

    async fn open_context(&mut self, options: &ContextOptions) -> Result<()> {
        (**self).open_context(options).await
    }

    async fn execute(&mut self, action: &BrowserAction) -> Result<BrowserActionResult> {
        (**self).execute(action).await
    }

    async fn teardown(&mut self, layer: SessionLayer) -> Result<()> {
        (**self).teardown(layer).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaywrightDriverConfig {
    pub executable: String,
    pub args: Vec<String>,
    /// Floor for every request deadline; actions with their own timeout get that plus slack.
    pub request_timeout_ms: u64,
}

impl PlaywrightDriverConfig {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            request_timeout_ms: DEFAULT_DRIVER_REQUEST_TIMEOUT_MS,
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Hello,
    OpenContext { options: &'a ContextOptions },
    Execute { action: &'a BrowserAction },
    Teardown { layer: SessionLayer },
}

#[derive(Serialize)]
struct DriverRequest<'a> {
    id: u64,
    #[serde(flatten)]
    command: DriverCommand<'a>,
}

#[derive(Deserialize)]
struct DriverResponse {
    #[serde(default)]
    id: Option<u64>,
    status_code: u16,
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    response_body: Value,
}

struct DriverProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl DriverProcess {
    async fn send(&mut self, command: DriverCommand<'_>) -> Result<u64> {
        self.next_id = self.next_id.saturating_add(1);
        let id = self.next_id;
        let mut line = serde_json::to_string(&DriverRequest { id, command })
            .context("serialize playwright driver request")?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .context("write playwright driver request")?;
        self.stdin
            .flush()
            .await
            .context("flush playwright driver request")?;
        Ok(id)
    }

    /// Reads until the response for `id`; stale answers to abandoned requests are dropped.
    async fn read_response(&mut self, id: u64) -> Result<BrowserActionResult> {
        loop {
            let Some(line) = self
                .stdout
                .next_line()
                .await
                .context("read playwright driver response")?
            else {
                bail!("playwright driver closed its output stream");
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response = serde_json::from_str::<DriverResponse>(trimmed).with_context(|| {
                format!(
                    "failed to parse playwright driver response: {}",
                    truncate_for_log(trimmed)
                )
            })?;
            match response.id {
                Some(response_id) if response_id < id => {
                    tracing::debug!(
                        stale_id = response_id,
                        expected_id = id,
                        "dropping stale playwright driver response"
                    );
                    continue;
                }
                Some(response_id) if response_id > id => {
                    bail!("playwright driver answered unknown request {response_id}");
                }
                _ => {}
            }
            if response.status_code == 0 {
                bail!("playwright driver response is missing non-zero status_code");
            }
            return Ok(BrowserActionResult {
                status_code: response.status_code,
                error_code: response.error_code,
                response_body: response.response_body,
            });
        }
    }
}

/// Drives a long-lived Playwright driver process over newline-delimited JSON.
pub struct PlaywrightDriverExecutor {
    config: PlaywrightDriverConfig,
    process: Option<DriverProcess>,
}

impl std::fmt::Debug for PlaywrightDriverExecutor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PlaywrightDriverExecutor")
            .field("config", &self.config)
            .field("running", &self.process.is_some())
            .finish()
    }
}

impl PlaywrightDriverExecutor {
    pub fn new(config: PlaywrightDriverConfig) -> Result<Self> {
        if config.executable.trim().is_empty() {
            bail!("playwright driver executable cannot be empty");
        }
        if config.request_timeout_ms == 0 {
            bail!("playwright driver request timeout must be greater than 0ms");
        }
        Ok(Self {
            config,
            process: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    async fn round_trip(
        &mut self,
        command: DriverCommand<'_>,
        deadline_ms: u64,
    ) -> Result<BrowserActionResult> {
        let process = self
            .process
            .as_mut()
            .context("playwright driver is not running")?;
        let id = process.send(command).await?;
        tokio::time::timeout(
            Duration::from_millis(deadline_ms),
            process.read_response(id),
        )
        .await
        .map_err(|_| anyhow!("playwright driver timed out after {deadline_ms}ms on request {id}"))?
    }

    async fn stop_process(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        if let Ok(id) = process
            .send(DriverCommand::Teardown {
                layer: SessionLayer::Runtime,
            })
            .await
        {
            let _ = tokio::time::timeout(
                Duration::from_millis(self.config.request_timeout_ms.min(2_000)),
                process.read_response(id),
            )
            .await;
        }
        drop(process.stdin);
        match tokio::time::timeout(Duration::from_millis(2_000), process.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(error)) => Err(error).context("wait for playwright driver exit"),
            Err(_) => process
                .child
                .kill()
                .await
                .context("kill unresponsive playwright driver"),
        }
    }
}

#[async_trait]
impl BrowserExecutor for PlaywrightDriverExecutor {
    async fn start_runtime(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }
        let mut command = Command::new(self.config.executable.trim());
        command.kill_on_drop(true);
        command.args(&self.config.args);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::inherit());
        let mut child = command.spawn().with_context(|| {
            format!(
                "failed to launch playwright driver '{}'",
                self.config.executable
            )
        })?;
        let stdin = child
            .stdin
            .take()
            .context("playwright driver stdin is not piped")?;
        let stdout = child
            .stdout
            .take()
            .context("playwright driver stdout is not piped")?;
        self.process = Some(DriverProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
        });

        let deadline_ms = self.config.request_timeout_ms;
        let hello = match self.round_trip(DriverCommand::Hello, deadline_ms).await {
            Ok(hello) => hello,
            Err(error) => {
                let _ = self.stop_process().await;
                return Err(error.context("playwright driver handshake failed"));
            }
        };
        if let Err(error) = hello.ensure_success("handshake") {
            let _ = self.stop_process().await;
            return Err(error);
        }
        tracing::debug!(
            executable = %self.config.executable,
            "playwright driver runtime started"
        );
        Ok(())
    }

    async fn open_context(&mut self, options: &ContextOptions) -> Result<()> {
        let deadline_ms = self.config.request_timeout_ms;
        self.round_trip(DriverCommand::OpenContext { options }, deadline_ms)
            .await?
            .ensure_success("open_context")?;
        Ok(())
    }

    async fn execute(&mut self, action: &BrowserAction) -> Result<BrowserActionResult> {
        let deadline_ms = action.deadline_ms(self.config.request_timeout_ms);
        self.round_trip(DriverCommand::Execute { action }, deadline_ms)
            .await
    }

    async fn teardown(&mut self, layer: SessionLayer) -> Result<()> {
        if layer == SessionLayer::Runtime {
            return self.stop_process().await;
        }
        if self.process.is_none() {
            return Ok(());
        }
        let deadline_ms = self.config.request_timeout_ms;
        self.round_trip(DriverCommand::Teardown { layer }, deadline_ms)
            .await?
            .ensure_success(layer.as_str())?;
        Ok(())
    }
}

fn truncate_for_log(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= MAX_DRIVER_DETAIL_CHARS {
        return trimmed.to_string();
    }
    let mut output = trimmed
        .chars()
        .take(MAX_DRIVER_DETAIL_CHARS)
        .collect::<String>();
    output.push_str("...");
    output
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::{Path, PathBuf};

    use serde_json::json;
    use tempfile::tempdir;

    use super::{
        BrowserAction, BrowserActionResult, BrowserExecutor, ContextOptions, DisplayMode,
        PlaywrightDriverConfig, PlaywrightDriverExecutor, SessionLayer, Viewport,
        BROWSER_ERROR_SELECTOR_NOT_FOUND, BROWSER_ERROR_TIMEOUT,
    };

    #[cfg(unix)]
    pub(crate) fn write_mock_driver(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("mock-playwright-driver.py");
        std::fs::write(&script, body).expect("write mock driver");
        let mut perms = std::fs::metadata(&script).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod");
        script
    }

    const MOCK_DRIVER: &str = r#"#!/usr/bin/env python3
import json
import sys

url = "about:blank"
for raw in sys.stdin:
    request = json.loads(raw)
    command = request.get("command")
    reply = {"id": request["id"], "status_code": 200, "response_body": {}}
    if command == "execute":
        action = request["action"]
        op = action["operation"]
        if op == "navigate":
            url = action["url"]
            reply["response_body"] = {"url": url}
        elif op == "current_url":
            reply["response_body"] = {"url": url}
        elif op == "query_texts":
            reply["response_body"] = {"elements": [{"label": "2pm to 3pm, Team Sync", "text": "Team Sync"}]}
        elif op == "click_first":
            reply = {"id": request["id"], "status_code": 404, "error_code": "browser_selector_not_found"}
    elif command == "teardown" and request.get("layer") == "runtime":
        print(json.dumps(reply), flush=True)
        break
    print(json.dumps(reply), flush=True)
"#;

    #[test]
    fn unit_driver_executor_rejects_empty_executable() {
        let error = PlaywrightDriverExecutor::new(PlaywrightDriverConfig::new("  "))
            .expect_err("empty executable should fail");
        assert!(error.to_string().contains("cannot be empty"));
    }

    #[test]
    fn unit_action_serializes_with_operation_tag() {
        let action = BrowserAction::QueryTexts {
            selector: "[data-eventid]".to_string(),
            label_attribute: Some("aria-label".to_string()),
        };
        let encoded = serde_json::to_value(&action).expect("serialize");
        assert_eq!(
            encoded,
            json!({
                "operation": "query_texts",
                "selector": "[data-eventid]",
                "label_attribute": "aria-label"
            })
        );
    }

    #[test]
    fn unit_action_deadline_adds_slack_over_inner_timeout() {
        let navigate = BrowserAction::Navigate {
            url: "https://calendar.google.com/calendar".to_string(),
            timeout_ms: 15_000,
        };
        assert_eq!(navigate.deadline_ms(1_000), 20_000);
        assert_eq!(BrowserAction::CurrentUrl.deadline_ms(30_000), 30_000);
    }

    #[test]
    fn unit_result_classification_matches_status_and_error_codes() {
        let timeout = BrowserActionResult::failure(504, BROWSER_ERROR_TIMEOUT);
        assert!(timeout.is_timeout());
        assert!(timeout.is_retryable());

        let missing = BrowserActionResult::failure(404, BROWSER_ERROR_SELECTOR_NOT_FOUND);
        assert!(missing.is_not_found());
        assert!(!missing.is_retryable());

        let ok = BrowserActionResult::ok(json!({"url": "https://calendar.google.com/"}));
        assert!(ok.is_success());
        assert_eq!(ok.string_field("url"), Some("https://calendar.google.com/"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn functional_driver_executor_round_trips_actions_over_ndjson() {
        let temp = tempdir().expect("tempdir");
        let script = write_mock_driver(temp.path(), MOCK_DRIVER);
        let mut executor =
            PlaywrightDriverExecutor::new(PlaywrightDriverConfig::new(script.display().to_string()))
                .expect("executor");

        executor.start_runtime().await.expect("start runtime");
        executor
            .open_context(&ContextOptions {
                mode: DisplayMode::Headless,
                storage_state: None,
                viewport: Viewport::default(),
            })
            .await
            .expect("open context");
        let navigated = executor
            .execute(&BrowserAction::Navigate {
                url: "https://calendar.google.com/calendar/r/day/2024/01/05".to_string(),
                timeout_ms: 1_000,
            })
            .await
            .expect("navigate");
        assert!(navigated.is_success());

        let current = executor
            .execute(&BrowserAction::CurrentUrl)
            .await
            .expect("current url");
        assert_eq!(
            current.string_field("url"),
            Some("https://calendar.google.com/calendar/r/day/2024/01/05")
        );

        let click = executor
            .execute(&BrowserAction::ClickFirst {
                selector: "[aria-label=\"Save\"]".to_string(),
                timeout_ms: 100,
            })
            .await
            .expect("click round trip");
        assert!(click.is_not_found());

        executor
            .teardown(SessionLayer::Runtime)
            .await
            .expect("teardown runtime");
        assert!(!executor.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn regression_driver_executor_reports_timeout_when_driver_hangs() {
        let temp = tempdir().expect("tempdir");
        let script = write_mock_driver(
            temp.path(),
            "#!/usr/bin/env python3\nimport json, sys, time\nfor raw in sys.stdin:\n    request = json.loads(raw)\n    if request.get('command') == 'hello':\n        print(json.dumps({'id': request['id'], 'status_code': 200}), flush=True)\n    else:\n        time.sleep(5)\n",
        );
        let mut config = PlaywrightDriverConfig::new(script.display().to_string());
        config.request_timeout_ms = 200;
        let mut executor = PlaywrightDriverExecutor::new(config).expect("executor");
        executor.start_runtime().await.expect("start runtime");

        let error = executor
            .execute(&BrowserAction::CurrentUrl)
            .await
            .expect_err("hung driver should time out");
        assert!(error.to_string().contains("timed out"));
        executor
            .teardown(SessionLayer::Runtime)
            .await
            .expect("teardown runtime");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn integration_driver_executor_surfaces_spawn_failure() {
        let mut executor = PlaywrightDriverExecutor::new(PlaywrightDriverConfig::new(
            "/nonexistent/voxcal-playwright-driver",
        ))
        .expect("executor");
        let error = executor
            .start_runtime()
            .await
            .expect_err("missing driver should fail");
        assert!(format!("{error:#}").contains("failed to launch playwright driver"));
        assert!(!executor.is_running());
    }
}
