use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use voxcal_browser::{
    DisplayMode, PlaywrightDriverConfig, SessionControllerConfig, Viewport,
};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_non_blank(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value cannot be empty".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliDisplayMode {
    Headless,
    Visible,
}

impl From<CliDisplayMode> for DisplayMode {
    fn from(value: CliDisplayMode) -> Self {
        match value {
            CliDisplayMode::Headless => DisplayMode::Headless,
            CliDisplayMode::Visible => DisplayMode::Visible,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "voxcal",
    about = "Schedules calendar events from extracted voice requests",
    version
)]
pub struct AssistantConfig {
    #[arg(
        long = "driver",
        env = "VOXCAL_PLAYWRIGHT_DRIVER",
        default_value = "node",
        value_parser = parse_non_blank,
        help = "Executable that runs the Playwright driver"
    )]
    pub driver: String,

    #[arg(
        long = "driver-arg",
        env = "VOXCAL_PLAYWRIGHT_DRIVER_ARGS",
        value_delimiter = ',',
        default_value = "scripts/playwright-driver.mjs",
        help = "Arguments passed to the driver executable (comma-separated in the environment)"
    )]
    pub driver_args: Vec<String>,

    #[arg(
        long = "driver-request-timeout-ms",
        env = "VOXCAL_DRIVER_REQUEST_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Minimum deadline in milliseconds for one driver request"
    )]
    pub driver_request_timeout_ms: u64,

    #[arg(
        long = "session-path",
        env = "VOXCAL_SESSION_PATH",
        default_value = ".voxcal/auth/calendar-session.json",
        help = "Where the signed-in calendar session is persisted"
    )]
    pub session_path: PathBuf,

    #[arg(
        long = "navigation-timeout-ms",
        env = "VOXCAL_NAVIGATION_TIMEOUT_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64,
        help = "Per-navigation timeout in milliseconds before one reconnect is attempted"
    )]
    pub navigation_timeout_ms: u64,

    #[arg(
        long = "login-timeout-ms",
        env = "VOXCAL_LOGIN_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Timeout in milliseconds for loading the sign-in page"
    )]
    pub login_timeout_ms: u64,

    #[arg(
        long = "confirm-timeout-ms",
        env = "VOXCAL_CONFIRM_TIMEOUT_MS",
        default_value_t = 2_000,
        value_parser = parse_positive_u64,
        help = "How long each save-button selector is waited for"
    )]
    pub confirm_timeout_ms: u64,

    #[arg(
        long = "settle-ms",
        env = "VOXCAL_SETTLE_MS",
        default_value_t = 2_000,
        help = "Pause in milliseconds after navigations and saves (0 disables)"
    )]
    pub settle_ms: u64,

    #[arg(
        long = "display-mode",
        env = "VOXCAL_DISPLAY_MODE",
        value_enum,
        default_value = "headless",
        help = "Browser display mode used when resuming a session"
    )]
    pub display_mode: CliDisplayMode,

    #[arg(
        long = "conversation-ttl-secs",
        env = "VOXCAL_CONVERSATION_TTL_SECS",
        default_value_t = 1_800,
        help = "Idle seconds before a pending conversation is forgotten (0 keeps it forever)"
    )]
    pub conversation_ttl_secs: u64,

    #[arg(
        long = "language",
        env = "VOXCAL_LANGUAGE",
        help = "Conversation language tag (for example en or zh-TW) used to read event times"
    )]
    pub language: Option<String>,

    #[arg(
        long = "conversation-id",
        env = "VOXCAL_CONVERSATION_ID",
        default_value = "default",
        value_parser = parse_non_blank,
        help = "Conversation used for input lines that do not name one"
    )]
    pub conversation_id: String,
}

impl AssistantConfig {
    pub fn session_config(&self) -> SessionControllerConfig {
        SessionControllerConfig {
            persisted_session_path: self.session_path.clone(),
            navigation_timeout_ms: self.navigation_timeout_ms,
            login_timeout_ms: self.login_timeout_ms,
            confirm_timeout_ms: self.confirm_timeout_ms,
            settle_ms: self.settle_ms,
            viewport: Viewport::default(),
        }
    }

    pub fn driver_config(&self) -> PlaywrightDriverConfig {
        let mut config = PlaywrightDriverConfig::new(self.driver.clone());
        config.args = self
            .driver_args
            .iter()
            .map(|arg| arg.trim())
            .filter(|arg| !arg.is_empty())
            .map(str::to_string)
            .collect();
        config.request_timeout_ms = self.driver_request_timeout_ms;
        config
    }

    pub fn preferred_mode(&self) -> DisplayMode {
        self.display_mode.into()
    }

    pub fn language(&self) -> Option<&str> {
        self.language
            .as_deref()
            .map(str::trim)
            .filter(|language| !language.is_empty())
    }
}
