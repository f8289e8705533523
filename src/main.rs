//! Demo interaction server.
//!
//! Reads gateway `INTERACTION_CREATE` payloads from stdin, one JSON object
//! per line (either the bare interaction or the full `{"t", "d"}` dispatch),
//! and answers them through the interaction callback endpoint. Pass
//! `--sync` to overwrite the application's commands on startup.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use slash_discord::types::{
    action_row, button, text_input, ApplicationCommandOption, Interaction, MessageOptions, ModalOptions,
};
use slash_discord::util;
use slash_discord::{
    BoxError, CommandContext, CommandOptions, ComponentContext, Creator, CreatorError, CreatorOptions,
    SlashCommand,
};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

struct Ping(CommandOptions);

#[async_trait]
impl SlashCommand for Ping {
    fn options(&self) -> &CommandOptions {
        &self.0
    }

    async fn run(&self, ctx: &CommandContext) -> Result<Option<MessageOptions>, BoxError> {
        let sent_at = util::snowflake_timestamp_ms(ctx.interaction_id()).unwrap_or_default();
        let latency = util::now_unix_ms().saturating_sub(sent_at);
        Ok(Some(format!("Pong! ({} ms)", latency).into()))
    }
}

struct Roll(CommandOptions);

#[async_trait]
impl SlashCommand for Roll {
    fn options(&self) -> &CommandOptions {
        &self.0
    }

    async fn run(&self, ctx: &CommandContext) -> Result<Option<MessageOptions>, BoxError> {
        let sides = ctx.option_i64("sides").unwrap_or(6).max(2);
        let result = rand::thread_rng().gen_range(1..=sides);
        Ok(Some(format!("🎲 You rolled a **{}** (d{})", result, sides).into()))
    }
}

struct Poll(CommandOptions);

#[async_trait]
impl SlashCommand for Poll {
    fn options(&self) -> &CommandOptions {
        &self.0
    }

    async fn run(&self, ctx: &CommandContext) -> Result<Option<MessageOptions>, BoxError> {
        let question = ctx.option_str("question").unwrap_or("Yes or no?").to_string();
        ctx.send(
            MessageOptions::new()
                .content(question)
                .component_row(action_row(vec![button(3, "Yes", "yes"), button(4, "No", "no")])),
        )
        .await?;
        ctx.fetch(None).await?;
        for answer in ["yes", "no"] {
            ctx.register_component(answer, move |press: ComponentContext| async move {
                let voter = press.user().map(|u| u.tag()).unwrap_or_default();
                let reply = MessageOptions::new()
                    .content(format!("{} voted {}", voter, answer))
                    .ephemeral();
                if let Err(e) = press.send(reply).await {
                    warn!(error = %e, "failed to confirm vote");
                }
            })?;
        }
        Ok(None)
    }
}

struct Feedback(CommandOptions);

#[async_trait]
impl SlashCommand for Feedback {
    fn options(&self) -> &CommandOptions {
        &self.0
    }

    async fn run(&self, ctx: &CommandContext) -> Result<Option<MessageOptions>, BoxError> {
        let modal = ModalOptions {
            title: "Feedback".to_string(),
            custom_id: String::new(),
            components: vec![action_row(vec![text_input("text", "What should we improve?", 2, true)])],
        };
        ctx.send_modal_with(modal, |submit| async move {
            let text = submit.value("text").unwrap_or_default().to_string();
            info!(feedback = %text, "received feedback");
            let _ = submit
                .send(MessageOptions::new().content("Thanks for the feedback!").ephemeral())
                .await;
        })
        .await?;
        Ok(None)
    }
}

fn register(creator: &Creator) -> Result<(), CreatorError> {
    creator.register_command(Ping(CommandOptions::new("ping", "Check interaction latency")))?;
    creator.register_command(Roll(
        CommandOptions::new("roll", "Roll a dice")
            .option(ApplicationCommandOption {
                name: "sides".to_string(),
                description: "Number of sides (default: 6)".to_string(),
                kind: 4,
                required: false,
                autocomplete: false,
                choices: Vec::new(),
                options: Vec::new(),
            })
            .throttle(3, Duration::from_secs(10)),
    ))?;
    creator.register_command(Poll(
        CommandOptions::new("poll", "Ask a yes/no question").option(ApplicationCommandOption {
            name: "question".to_string(),
            description: "What to ask".to_string(),
            kind: 3,
            required: true,
            autocomplete: false,
            choices: Vec::new(),
            options: Vec::new(),
        }),
    ))?;
    creator.register_command(Feedback(CommandOptions::new("feedback", "Send feedback")))?;
    Ok(())
}

/// Accept a bare interaction or a gateway dispatch wrapping one.
fn parse_interaction(line: &str) -> Result<Interaction, serde_json::Error> {
    let mut value: Value = serde_json::from_str(line)?;
    if let Some(inner) = value.get_mut("d") {
        value = inner.take();
    }
    serde_json::from_value(value)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Initialise tracing (respects RUST_LOG env, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let options = match CreatorOptions::from_env() {
        Ok(options) => options,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    let creator = Creator::new(options);
    if let Err(e) = register(&creator) {
        error!(error = %e, "failed to register commands");
        std::process::exit(1);
    }

    if std::env::args().any(|arg| arg == "--sync") {
        match creator.sync_commands().await {
            Ok(()) => info!("synced commands"),
            Err(e) => warn!(error = %e, "failed to sync commands"),
        }
    }

    info!("reading interactions from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_interaction(&line) {
            Ok(interaction) => {
                let creator = creator.clone();
                tokio::spawn(async move { creator.handle_gateway_interaction(interaction).await });
            }
            Err(e) => warn!(error = %e, "ignoring malformed interaction"),
        }
    }
}
