//! Creator and REST configuration.

use std::fmt;
use std::time::Duration;

use crate::error::CreatorError;

pub const DEFAULT_BASE_URL: &str = "https://discord.com/api/v10";
pub const DEFAULT_USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/slash-discord/slash-discord, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Settings for the rate-limited REST transport.
#[derive(Debug, Clone)]
pub struct RestOptions {
    pub base_url: String,
    pub user_agent: String,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Retries for transport errors, timeouts and 5xx. 429s do not count.
    pub retry_limit: u32,
    /// Added to every computed reset time to absorb clock skew.
    pub ratelimiter_offset: Duration,
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(15),
            retry_limit: 3,
            ratelimiter_offset: Duration::from_millis(50),
        }
    }
}

/// Settings for a [`Creator`](crate::Creator).
#[derive(Clone)]
pub struct CreatorOptions {
    pub application_id: String,
    /// Hex-encoded Ed25519 key used to verify webhook requests.
    pub public_key: Option<String>,
    /// Bot token. `Bot ` is prepended unless it already carries a scheme.
    pub token: Option<String>,
    /// Answer unresolved commands with an ephemeral notice instead of a 400.
    pub unknown_command_response: bool,
    /// Hand resolved commands to `subscribe_commands` listeners instead of
    /// running them.
    pub handle_commands_manually: bool,
    /// Disable the automatic defer/acknowledge timer on contexts.
    pub disable_timeouts: bool,
    /// Arm a timer per registered component so it expires without traffic.
    pub component_timeouts: bool,
    /// Maximum age of a webhook's signature timestamp.
    pub max_signature_timestamp: Duration,
    /// Delay before an unanswered context is deferred automatically.
    pub deferred_timeout: Duration,
    /// Applied to outgoing messages that do not set their own.
    pub allowed_mentions: Option<serde_json::Value>,
    pub rest: RestOptions,
}

impl Default for CreatorOptions {
    fn default() -> Self {
        Self {
            application_id: String::new(),
            public_key: None,
            token: None,
            unknown_command_response: true,
            handle_commands_manually: false,
            disable_timeouts: false,
            component_timeouts: false,
            max_signature_timestamp: Duration::from_secs(5),
            deferred_timeout: Duration::from_secs(2),
            allowed_mentions: None,
            rest: RestOptions::default(),
        }
    }
}

impl CreatorOptions {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            ..Self::default()
        }
    }

    pub fn public_key(mut self, key: impl Into<String>) -> Self {
        self.public_key = Some(key.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn unknown_command_response(mut self, enabled: bool) -> Self {
        self.unknown_command_response = enabled;
        self
    }

    pub fn handle_commands_manually(mut self, enabled: bool) -> Self {
        self.handle_commands_manually = enabled;
        self
    }

    pub fn disable_timeouts(mut self, disabled: bool) -> Self {
        self.disable_timeouts = disabled;
        self
    }

    pub fn component_timeouts(mut self, enabled: bool) -> Self {
        self.component_timeouts = enabled;
        self
    }

    /// How far a webhook's `X-Signature-Timestamp` may be from now.
    pub fn max_signature_timestamp(mut self, window: Duration) -> Self {
        self.max_signature_timestamp = window;
        self
    }

    pub fn deferred_timeout(mut self, timeout: Duration) -> Self {
        self.deferred_timeout = timeout;
        self
    }

    pub fn allowed_mentions(mut self, mentions: serde_json::Value) -> Self {
        self.allowed_mentions = Some(mentions);
        self
    }

    pub fn rest(mut self, rest: RestOptions) -> Self {
        self.rest = rest;
        self
    }

    /// The `Authorization` header value for the configured token.
    pub fn authorization(&self) -> Option<String> {
        self.token.as_deref().map(|token| {
            if token.starts_with("Bot ") || token.starts_with("Bearer ") {
                token.to_string()
            } else {
                format!("Bot {}", token)
            }
        })
    }

    /// Load `DISCORD_APP_ID`, `DISCORD_PUBLIC_KEY` and `DISCORD_TOKEN`,
    /// reading a `.env` file first when one exists.
    #[cfg(feature = "io")]
    pub fn from_env() -> Result<Self, CreatorError> {
        dotenv::dotenv().ok();
        let application_id =
            std::env::var("DISCORD_APP_ID").map_err(|_| CreatorError::MissingOption("DISCORD_APP_ID"))?;
        Ok(Self {
            application_id,
            public_key: std::env::var("DISCORD_PUBLIC_KEY").ok(),
            token: std::env::var("DISCORD_TOKEN").ok(),
            ..Self::default()
        })
    }

    pub(crate) fn require_public_key(&self) -> Result<&str, CreatorError> {
        self.public_key
            .as_deref()
            .ok_or(CreatorError::MissingOption("public_key"))
    }
}

impl fmt::Debug for CreatorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatorOptions")
            .field("application_id", &self.application_id)
            .field("public_key", &self.public_key)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("unknown_command_response", &self.unknown_command_response)
            .field("handle_commands_manually", &self.handle_commands_manually)
            .field("disable_timeouts", &self.disable_timeouts)
            .field("component_timeouts", &self.component_timeouts)
            .field("max_signature_timestamp", &self.max_signature_timestamp)
            .field("deferred_timeout", &self.deferred_timeout)
            .field("rest", &self.rest)
            .finish()
    }
}
