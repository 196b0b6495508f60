use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use voxcal_assistant::{init_tracing, AssistantConfig, SchedulingAssistant};
use voxcal_browser::{
    LocalOverlapJudge, PlaywrightDriverExecutor, SessionController, SharedSessionController,
    TimeLocaleRegistry,
};
use voxcal_slots::{ConversationStore, ExtractionPayload};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TurnCommand {
    Login,
    PollLogin,
    Reset,
    Hint,
}

/// One stdin line: either an extraction payload or a session command.
#[derive(Debug, Deserialize)]
struct TurnLine {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    command: Option<TurnCommand>,
    #[serde(default)]
    payload: Option<ExtractionPayload>,
}

async fn handle_line(
    assistant: &SchedulingAssistant<PlaywrightDriverExecutor>,
    default_conversation: &str,
    raw: &str,
) -> Value {
    let line = match serde_json::from_str::<TurnLine>(raw) {
        Ok(line) => line,
        Err(error) => {
            tracing::debug!(error = %error, "unreadable input line");
            return json!({"success": false, "message": "I couldn't understand that"});
        }
    };
    let conversation_id = line
        .conversation_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(default_conversation);

    match (line.command, line.payload) {
        (Some(TurnCommand::Login), _) => match assistant.start_manual_login().await {
            Ok(guidance) => json!({
                "success": true,
                "message": guidance.message,
                "mode_transition": guidance.transition,
            }),
            Err(error) => json!({"success": false, "message": error.user_message()}),
        },
        (Some(TurnCommand::PollLogin), _) => {
            let poll = assistant.poll_login().await;
            json!({
                "success": poll.logged_in,
                "logged_in": poll.logged_in,
                "mode_transition": poll.transition,
            })
        }
        (Some(TurnCommand::Reset), _) => {
            let existed = assistant.reset_conversation(conversation_id).await;
            json!({"success": true, "reset": existed})
        }
        (Some(TurnCommand::Hint), _) => json!({
            "success": true,
            "hint": assistant.extraction_hint(conversation_id).await,
        }),
        (None, Some(payload)) => {
            let outcome = assistant.handle_turn(conversation_id, &payload).await;
            serde_json::to_value(&outcome)
                .unwrap_or_else(|_| json!({"success": outcome.success, "message": outcome.message}))
        }
        (None, None) => json!({"success": false, "message": "I couldn't understand that"}),
    }
}

async fn run() -> Result<()> {
    let config = AssistantConfig::parse();
    init_tracing();

    let executor = PlaywrightDriverExecutor::new(config.driver_config())
        .context("failed to initialize playwright driver executor")?;
    let judge = LocalOverlapJudge::new(
        TimeLocaleRegistry::default(),
        config.language().map(str::to_string),
    );
    let controller =
        SessionController::new(executor, config.session_config()).with_judge(Arc::new(judge));
    let assistant = SchedulingAssistant::new(
        SharedSessionController::new(controller),
        ConversationStore::new(config.conversation_ttl_secs),
        config.preferred_mode(),
    );

    let logged_in = assistant
        .ensure_session()
        .await
        .context("calendar session could not start")?;
    tracing::info!(logged_in, "voxcal ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(raw) = lines.next_line().await.context("read stdin")? {
        if raw.trim().is_empty() {
            continue;
        }
        let response = handle_line(&assistant, &config.conversation_id, raw.trim()).await;
        println!("{response}");
        assistant.evict_idle_conversations().await;
    }

    assistant.close().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("voxcal failed: {error:#}");
        std::process::exit(1);
    }
}
