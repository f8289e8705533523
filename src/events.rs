//! Typed notifications for the host application.
//!
//! Instead of string-named emitter events, the creator broadcasts a
//! [`CreatorEvent`] enum so listeners can pattern-match on strongly-typed
//! data. Interaction contexts that a host may want to take over (manually
//! handled commands, components, modal submits) travel on their own
//! channels so that "is anyone listening?" can be answered per kind.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, trace, warn};

use crate::command::BlockReason;
use crate::context::{CommandContext, ComponentContext, ModalInteractionContext};
use crate::rest::HttpMethod;
use crate::types::{Interaction, Snowflake};

const CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// The top-level event enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum CreatorEvent {
    Debug(String),
    Warn(String),
    Error(String),

    /// One REST round trip finished (any status).
    RawRest(RestTelemetry),

    /// An interaction arrived, before dispatch.
    RawInteraction(Box<Interaction>),

    /// A PING was answered with PONG.
    Ping,

    /// Commands were bulk-overwritten on Discord.
    Synced,

    CommandRegister {
        name: String,
        key: String,
    },
    CommandUnregister {
        name: String,
        key: String,
    },
    CommandReregister {
        name: String,
        key: String,
    },

    /// A command was not run because of permissions or throttling.
    CommandBlock {
        command: String,
        user_id: Option<Snowflake>,
        reason: BlockReason,
    },

    /// A command's `run` returned an error.
    CommandError {
        command: String,
        message: String,
    },

    CommandRun {
        command: String,
        user_id: Option<Snowflake>,
    },
}

/// Timing and rate-limit state of one completed REST request.
#[derive(Debug, Clone)]
pub struct RestTelemetry {
    pub method: HttpMethod,
    pub path: String,
    pub route: String,
    pub bucket: String,
    pub status: u16,
    pub latency: Duration,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Broadcast senders shared by the creator, its contexts and the REST layer.
///
/// Cheap to clone. Sends never block; with no subscribers they are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    events: broadcast::Sender<CreatorEvent>,
    commands: broadcast::Sender<CommandContext>,
    components: broadcast::Sender<ComponentContext>,
    modals: broadcast::Sender<ModalInteractionContext>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            events: broadcast::channel(CHANNEL_CAPACITY).0,
            commands: broadcast::channel(CHANNEL_CAPACITY).0,
            components: broadcast::channel(CHANNEL_CAPACITY).0,
            modals: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CreatorEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandContext> {
        self.commands.subscribe()
    }

    pub fn subscribe_components(&self) -> broadcast::Receiver<ComponentContext> {
        self.components.subscribe()
    }

    pub fn subscribe_modals(&self) -> broadcast::Receiver<ModalInteractionContext> {
        self.modals.subscribe()
    }

    /// Log `event` through `tracing` and broadcast it.
    pub fn emit(&self, event: CreatorEvent) {
        match &event {
            CreatorEvent::Debug(message) => debug!("{}", message),
            CreatorEvent::Warn(message) => warn!("{}", message),
            CreatorEvent::Error(message) => error!("{}", message),
            CreatorEvent::RawRest(t) => trace!(
                method = %t.method,
                route = %t.route,
                bucket = %t.bucket,
                status = t.status,
                latency_ms = t.latency.as_millis() as u64,
                remaining = t.remaining,
                limit = t.limit,
                reset_after_ms = t.reset_after.as_millis() as u64,
                "rest request completed"
            ),
            CreatorEvent::CommandBlock {
                command, reason, ..
            } => debug!(command = %command, ?reason, "command blocked"),
            CreatorEvent::CommandError { command, message } => {
                warn!(command = %command, error = %message, "command failed")
            }
            other => trace!(event = ?other, "creator event"),
        }
        let _ = self.events.send(event);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(CreatorEvent::Debug(message.into()));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(CreatorEvent::Warn(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(CreatorEvent::Error(message.into()));
    }

    pub fn command_listeners(&self) -> usize {
        self.commands.receiver_count()
    }

    pub fn component_listeners(&self) -> usize {
        self.components.receiver_count()
    }

    pub(crate) fn send_command(&self, ctx: CommandContext) {
        let _ = self.commands.send(ctx);
    }

    pub(crate) fn send_component(&self, ctx: ComponentContext) {
        let _ = self.components.send(ctx);
    }

    pub(crate) fn send_modal(&self, ctx: ModalInteractionContext) {
        let _ = self.modals.send(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscribers() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.warn("careful");
        match rx.recv().await.unwrap() {
            CreatorEvent::Warn(message) => assert_eq!(message, "careful"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit(CreatorEvent::Ping);
        assert_eq!(bus.component_listeners(), 0);
    }

    #[test]
    fn listener_counts_track_receivers() {
        let bus = EventBus::new();
        let rx = bus.subscribe_components();
        assert_eq!(bus.component_listeners(), 1);
        drop(rx);
        assert_eq!(bus.component_listeners(), 0);
    }
}
