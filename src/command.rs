//! The application-command trait and its per-command gates.
//!
//! A command is any type implementing [`SlashCommand`]. The creator runs
//! [`SlashCommand::has_permission`], then the command's [`Throttler`], and
//! only then [`SlashCommand::run`]. A blocked invocation goes to
//! [`SlashCommand::on_block`]; a failed one to [`SlashCommand::on_error`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::context::{AutocompleteContext, CommandContext};
use crate::error::BoxError;
use crate::permissions::{self, Permissions};
use crate::types::{
    ApplicationCommand, ApplicationCommandOption, AutocompleteChoice, CommandType, MessageOptions,
    Snowflake,
};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-user rate limit for one command: at most `usages` runs per `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlingOptions {
    pub usages: u32,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub name: String,
    pub description: String,
    pub kind: CommandType,
    /// Register in these guilds only; empty means global.
    pub guild_ids: Vec<Snowflake>,
    pub options: Vec<ApplicationCommandOption>,
    /// Checked against the invoking member before the command runs.
    pub required_permissions: Option<Permissions>,
    pub throttling: Option<ThrottlingOptions>,
    /// Make the automatic defer ephemeral.
    pub defer_ephemeral: bool,
    /// Sent to Discord so it hides the command from members without them.
    pub default_member_permissions: Option<Permissions>,
}

impl CommandOptions {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// A user or message context-menu command.
    pub fn context_menu(name: impl Into<String>, kind: CommandType) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    pub fn guild(mut self, guild_id: impl Into<Snowflake>) -> Self {
        self.guild_ids.push(guild_id.into());
        self
    }

    pub fn option(mut self, option: ApplicationCommandOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn required_permissions(mut self, permissions: Permissions) -> Self {
        self.required_permissions = Some(permissions);
        self
    }

    pub fn throttle(mut self, usages: u32, duration: Duration) -> Self {
        self.throttling = Some(ThrottlingOptions { usages, duration });
        self
    }

    pub fn defer_ephemeral(mut self, ephemeral: bool) -> Self {
        self.defer_ephemeral = ephemeral;
        self
    }

    pub fn default_member_permissions(mut self, permissions: Permissions) -> Self {
        self.default_member_permissions = Some(permissions);
        self
    }

    /// The registration payload for Discord.
    pub fn to_application_command(&self) -> ApplicationCommand {
        let description = match self.kind {
            CommandType::ChatInput => self.description.clone(),
            _ => String::new(),
        };
        ApplicationCommand {
            id: None,
            name: self.name.clone(),
            description,
            options: self.options.clone(),
            kind: self.kind,
            default_member_permissions: self.default_member_permissions,
        }
    }
}

// ---------------------------------------------------------------------------
// Gates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    Allowed,
    /// Denied, optionally with the message to show the user.
    Denied(Option<String>),
}

/// Why an invocation did not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    Permission {
        response: Option<String>,
    },
    Throttling {
        /// Until the user's window resets.
        remaining: Duration,
        usages: u32,
        duration: Duration,
    },
}

/// The built-in permission check: every flag in `required_permissions`
/// must be held by the invoking member. Invocations outside a guild pass.
pub fn check_permissions(options: &CommandOptions, ctx: &CommandContext) -> PermissionCheck {
    let Some(required) = options.required_permissions else {
        return PermissionCheck::Allowed;
    };
    let Some(member) = ctx.member() else {
        return PermissionCheck::Allowed;
    };
    let held = member.permissions.unwrap_or_else(Permissions::empty);
    let missing = held.missing(required);
    match missing.as_slice() {
        [] => PermissionCheck::Allowed,
        [only] => PermissionCheck::Denied(Some(format!(
            "The `{}` command requires you to have the \"{}\" permission.",
            options.name,
            permissions::display_name(only)
        ))),
        many => PermissionCheck::Denied(Some(format!(
            "The `{}` command requires you to have the following permissions: {}",
            options.name,
            many.iter()
                .map(|name| permissions::display_name(name))
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// The message shown for a blocked invocation when the command does not
/// override [`SlashCommand::on_block`].
pub fn block_message(command: &str, reason: &BlockReason) -> String {
    match reason {
        BlockReason::Permission {
            response: Some(response),
        } => response.clone(),
        BlockReason::Permission { response: None } => {
            format!("You do not have permission to use the `{}` command.", command)
        }
        BlockReason::Throttling { remaining, .. } => format!(
            "You may not use the `{}` command again for another {:.1} seconds.",
            command,
            remaining.as_secs_f64()
        ),
    }
}

pub const ERROR_MESSAGE: &str = "An error occurred while running the command.";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SlashCommand: Send + Sync + 'static {
    fn options(&self) -> &CommandOptions;

    fn has_permission(&self, ctx: &CommandContext) -> PermissionCheck {
        check_permissions(self.options(), ctx)
    }

    /// Tell the user why the command did not run.
    async fn on_block(&self, ctx: &CommandContext, reason: &BlockReason) -> Result<(), BoxError> {
        let message = block_message(&self.options().name, reason);
        ctx.send(MessageOptions::new().content(message).ephemeral()).await?;
        Ok(())
    }

    /// Called when [`run`](Self::run) fails. Does nothing once the
    /// interaction was responded to or has expired.
    async fn on_error(&self, ctx: &CommandContext, _error: &BoxError) -> Result<(), BoxError> {
        if ctx.expired() || ctx.initially_responded() {
            return Ok(());
        }
        ctx.send(MessageOptions::new().content(ERROR_MESSAGE).ephemeral()).await?;
        Ok(())
    }

    /// Suggestions for the focused option; `None` leaves the response to
    /// the handler.
    async fn autocomplete(
        &self,
        _ctx: &AutocompleteContext,
    ) -> Result<Option<Vec<AutocompleteChoice>>, BoxError> {
        Ok(None)
    }

    /// A returned message is sent unless the handler already responded.
    async fn run(&self, ctx: &CommandContext) -> Result<Option<MessageOptions>, BoxError>;
}

// ---------------------------------------------------------------------------
// Throttling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ThrottleEntry {
    start: Instant,
    usages: u32,
}

/// Per-user usage windows for one command. A window opens on first use and
/// is dropped by a timer when `duration` has passed.
#[derive(Clone, Default)]
pub struct Throttler {
    settings: Option<ThrottlingOptions>,
    entries: Arc<Mutex<HashMap<Snowflake, ThrottleEntry>>>,
}

impl Throttler {
    pub fn new(settings: Option<ThrottlingOptions>) -> Self {
        Self {
            settings,
            entries: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Snowflake, ThrottleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one use by `user_id`, or block with the time left in the
    /// user's window.
    pub fn throttle(&self, user_id: &str) -> Result<(), BlockReason> {
        let Some(settings) = self.settings else {
            return Ok(());
        };
        let now = Instant::now();
        let mut entries = self.lock();
        // A window past its end is over even if its timer has not run yet.
        if entries
            .get(user_id)
            .is_some_and(|entry| now >= entry.start + settings.duration)
        {
            entries.remove(user_id);
        }
        let entry = entries.entry(user_id.to_string()).or_insert_with(|| {
            self.schedule_reset(user_id, now, settings.duration);
            ThrottleEntry {
                start: now,
                usages: 0,
            }
        });
        if entry.usages + 1 > settings.usages {
            return Err(BlockReason::Throttling {
                remaining: (entry.start + settings.duration).saturating_duration_since(now),
                usages: settings.usages,
                duration: settings.duration,
            });
        }
        entry.usages += 1;
        Ok(())
    }

    /// Drop the window opened at `start` once it ends. A newer window for
    /// the same user is left alone.
    fn schedule_reset(&self, user_id: &str, start: Instant, duration: Duration) {
        let window = Arc::downgrade(&self.entries);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(start + duration).await;
            if let Some(entries) = window.upgrade() {
                let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
                if entries.get(&user_id).is_some_and(|entry| entry.start == start) {
                    entries.remove(&user_id);
                }
            }
        });
    }

    /// Uses counted in `user_id`'s current window.
    pub fn usages(&self, user_id: &str) -> u32 {
        let Some(settings) = self.settings else {
            return 0;
        };
        let now = Instant::now();
        self.lock()
            .get(user_id)
            .filter(|entry| now < entry.start + settings.duration)
            .map_or(0, |entry| entry.usages)
    }
}

impl fmt::Debug for Throttler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttler")
            .field("settings", &self.settings)
            .field("users", &self.lock().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Where a command is registered: `type:scope:name`, scope being a guild id
/// or `global`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub kind: CommandType,
    pub guild_id: Option<Snowflake>,
    pub name: String,
}

impl CommandKey {
    pub fn global(kind: CommandType, name: impl Into<String>) -> Self {
        Self {
            kind,
            guild_id: None,
            name: name.into(),
        }
    }

    pub fn guild(kind: CommandType, guild_id: impl Into<Snowflake>, name: impl Into<String>) -> Self {
        Self {
            kind,
            guild_id: Some(guild_id.into()),
            name: name.into(),
        }
    }

    /// One key per guild, or the global key.
    pub fn all_for(options: &CommandOptions) -> Vec<Self> {
        if options.guild_ids.is_empty() {
            return vec![Self::global(options.kind, &options.name)];
        }
        options
            .guild_ids
            .iter()
            .map(|guild_id| Self::guild(options.kind, guild_id, &options.name))
            .collect()
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            u8::from(self.kind),
            self.guild_id.as_deref().unwrap_or("global"),
            self.name
        )
    }
}

/// A command together with its throttle state, shared by all its keys.
pub(crate) struct RegisteredCommand {
    pub(crate) command: Arc<dyn SlashCommand>,
    pub(crate) throttler: Throttler,
}

impl RegisteredCommand {
    pub(crate) fn new(command: Arc<dyn SlashCommand>) -> Self {
        let throttler = Throttler::new(command.options().throttling);
        Self { command, throttler }
    }

    pub(crate) fn name(&self) -> &str {
        &self.command.options().name
    }
}
