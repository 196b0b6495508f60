use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use voxcal_browser::{
    DisplayMode, PlaywrightDriverConfig, PlaywrightDriverExecutor, SessionController,
    SessionControllerConfig,
};

const LOGIN_POLL_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum HarnessCommand {
    Login { wait_secs: u64 },
    List { date: NaiveDate },
    Check { start: NaiveDateTime, end: NaiveDateTime },
    Create {
        title: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

#[derive(Debug, Clone)]
struct HarnessCli {
    command: HarnessCommand,
    driver: String,
    driver_args: Vec<String>,
    session_path: PathBuf,
    navigation_timeout_ms: u64,
    visible: bool,
}

impl HarnessCli {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let Some(subcommand) = args.next() else {
            print_usage();
            bail!("missing subcommand");
        };
        if matches!(subcommand.as_str(), "--help" | "-h") {
            print_usage();
            std::process::exit(0);
        }

        let mut driver: Option<String> = None;
        let mut driver_args = Vec::new();
        let mut session_path =
            PathBuf::from(voxcal_browser::session_controller::DEFAULT_PERSISTED_SESSION_PATH);
        let mut navigation_timeout_ms =
            voxcal_browser::session_controller::DEFAULT_NAVIGATION_TIMEOUT_MS;
        let mut visible = false;
        let mut wait_secs: u64 = 300;
        let mut date: Option<NaiveDate> = None;
        let mut start: Option<NaiveDateTime> = None;
        let mut end: Option<NaiveDateTime> = None;
        let mut title: Option<String> = None;

        while let Some(flag) = args.next() {
            match flag.as_str() {
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                "--driver" => driver = Some(require_arg_value(&mut args, &flag)?),
                "--driver-arg" => driver_args.push(require_arg_value(&mut args, &flag)?),
                "--session-path" => {
                    session_path = PathBuf::from(require_arg_value(&mut args, &flag)?);
                }
                "--navigation-timeout-ms" => {
                    navigation_timeout_ms =
                        parse_positive_u64(&require_arg_value(&mut args, &flag)?, &flag)?;
                }
                "--wait-secs" => {
                    wait_secs = parse_positive_u64(&require_arg_value(&mut args, &flag)?, &flag)?;
                }
                "--visible" => visible = true,
                "--date" => date = Some(parse_date(&require_arg_value(&mut args, &flag)?, &flag)?),
                "--start" => {
                    start = Some(parse_timestamp(&require_arg_value(&mut args, &flag)?, &flag)?);
                }
                "--end" => end = Some(parse_timestamp(&require_arg_value(&mut args, &flag)?, &flag)?),
                "--title" => title = Some(require_arg_value(&mut args, &flag)?),
                other => bail!("unknown argument '{other}'"),
            }
        }

        let command = match subcommand.as_str() {
            "login" => HarnessCommand::Login { wait_secs },
            "list" => HarnessCommand::List {
                date: date.context("--date is required for list")?,
            },
            "check" => HarnessCommand::Check {
                start: start.context("--start is required for check")?,
                end: end.context("--end is required for check")?,
            },
            "create" => {
                let title = title.context("--title is required for create")?;
                if title.trim().is_empty() {
                    bail!("--title cannot be empty");
                }
                HarnessCommand::Create {
                    title,
                    start: start.context("--start is required for create")?,
                    end: end.context("--end is required for create")?,
                }
            }
            other => bail!("unknown subcommand '{other}'"),
        };
        if let HarnessCommand::Check { start, end } | HarnessCommand::Create { start, end, .. } =
            &command
        {
            if start >= end {
                bail!("--end must be after --start");
            }
        }

        let driver = driver.context("--driver is required")?;
        if driver.trim().is_empty() {
            bail!("--driver cannot be empty");
        }

        Ok(Self {
            command,
            driver,
            driver_args,
            session_path,
            navigation_timeout_ms,
            visible,
        })
    }
}

fn require_arg_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("missing value for {flag}"))
}

fn parse_positive_u64(raw: &str, flag: &str) -> Result<u64> {
    let parsed = raw
        .parse::<u64>()
        .with_context(|| format!("invalid numeric value for {flag}: '{raw}'"))?;
    if parsed == 0 {
        bail!("{flag} must be greater than 0");
    }
    Ok(parsed)
}

fn parse_date(raw: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date for {flag}: '{raw}' (expected YYYY-MM-DD)"))
}

fn parse_timestamp(raw: &str, flag: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M")
        .with_context(|| format!("invalid timestamp for {flag}: '{raw}' (expected YYYY-MM-DDTHH:MM)"))
}

fn print_usage() {
    println!(
        "Usage: calendar_session_harness <login|list|check|create> \
--driver <path> \
[--driver-arg <arg>]... \
[--session-path <path>] \
[--navigation-timeout-ms <n>] \
[--visible] \
[--wait-secs <n>] \
[--date YYYY-MM-DD] \
[--start YYYY-MM-DDTHH:MM] \
[--end YYYY-MM-DDTHH:MM] \
[--title <text>]"
    );
}

async fn run() -> Result<()> {
    let cli = HarnessCli::parse()?;
    let mut driver_config = PlaywrightDriverConfig::new(cli.driver.clone());
    driver_config.args = cli.driver_args.clone();
    let executor = PlaywrightDriverExecutor::new(driver_config)
        .context("failed to initialize playwright driver executor")?;
    let config = SessionControllerConfig {
        persisted_session_path: cli.session_path.clone(),
        navigation_timeout_ms: cli.navigation_timeout_ms,
        ..SessionControllerConfig::default()
    };
    let mut controller = SessionController::new(executor, config);
    let preferred = if cli.visible {
        DisplayMode::Visible
    } else {
        DisplayMode::Headless
    };

    let result = run_command(&mut controller, &cli.command, preferred).await;
    controller.close().await;
    let stats = controller.stats();
    println!(
        "calendar session harness stats: navigations={} reconnects={} contexts_opened={}",
        stats.navigations, stats.reconnects, stats.contexts_opened
    );
    result
}

async fn run_command(
    controller: &mut SessionController<PlaywrightDriverExecutor>,
    command: &HarnessCommand,
    preferred: DisplayMode,
) -> Result<()> {
    let logged_in = controller
        .initialize(preferred)
        .await
        .context("calendar session could not start")?;

    if let HarnessCommand::Login { wait_secs } = command {
        if logged_in {
            println!("login: already authenticated");
            return Ok(());
        }
        let guidance = controller.start_manual_login().await?;
        println!("login: {}", guidance.message);
        let attempts = (wait_secs.saturating_mul(1_000) / LOGIN_POLL_INTERVAL_MS).max(1);
        for _ in 0..attempts {
            tokio::time::sleep(Duration::from_millis(LOGIN_POLL_INTERVAL_MS)).await;
            let poll = controller.poll_login_status().await;
            if poll.logged_in {
                println!(
                    "login: authenticated session_path={}",
                    controller.config().persisted_session_path.display()
                );
                return Ok(());
            }
        }
        bail!("login was not completed within {wait_secs}s");
    }

    if !logged_in {
        bail!("calendar session is not authenticated; run the login subcommand first");
    }
    match command {
        HarnessCommand::Login { .. } => Ok(()),
        HarnessCommand::List { date } => {
            let events = controller.list_events_for_date(*date).await;
            println!("list: date={date} events={}", events.len());
            for (index, event) in events.iter().enumerate() {
                println!("event[{index}] {event}");
            }
            Ok(())
        }
        HarnessCommand::Check { start, end } => {
            let availability = controller.check_availability(*start, *end).await;
            println!(
                "check: available={} conflicting_label={}",
                availability.available,
                availability.conflicting_label.as_deref().unwrap_or("none")
            );
            Ok(())
        }
        HarnessCommand::Create { title, start, end } => {
            if !controller.create_event(title, *start, *end).await {
                bail!("event '{title}' could not be confirmed");
            }
            println!("create: confirmed title={title} start={start} end={end}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("calendar session harness failed: {error:#}");
        std::process::exit(1);
    }
}
