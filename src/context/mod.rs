//! Per-interaction response state machine.
//!
//! Every interaction that needs a reply is wrapped in a
//! [`MessageInteractionContext`]. The context owns the interaction's single
//! initial-response slot (the [`Responder`]), tracks whether it was used
//! (`Unresponded -> Deferred -> Responded`), routes later messages through
//! the interaction webhook, and runs the auto-defer timer.
//!
//! The kind-specific wrappers ([`CommandContext`], [`ComponentContext`],
//! [`ModalInteractionContext`]) deref to the shared context.
//! [`AutocompleteContext`] only exposes the result response.

mod autocomplete;
mod command;
mod component;
mod modal;

pub use self::autocomplete::AutocompleteContext;
pub use self::command::CommandContext;
pub use self::component::ComponentContext;
pub use self::modal::ModalInteractionContext;

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::creator::Creator;
use crate::error::InteractionError;
use crate::permissions::Permissions;
use crate::registry::{component_callback, CallbackOptions, ComponentKey, ModalCallback, ModalKey};
use crate::server::{Responder, TransportResponse};
use crate::types::*;
use crate::util;

/// Discord accepts webhook calls for an interaction token for 15 minutes.
pub const INTERACTION_LIFETIME: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Unresponded,
    Deferred,
    Responded,
}

/// What [`MessageInteractionContext::send`] did.
#[derive(Debug, Clone)]
pub enum Sent {
    /// Used the initial response slot.
    Initial,
    /// Edited the deferred placeholder or created a follow-up.
    Message(Box<Message>),
}

/// What the context's timer sends if nothing was sent in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AutoResponse {
    Defer { ephemeral: bool },
    Acknowledge,
    EmptyChoices,
}

struct ContextState {
    response: ResponseState,
    message_id: Option<Snowflake>,
    timer: Option<AbortHandle>,
}

struct ContextCore {
    creator: Creator,
    interaction: Interaction,
    responder: Responder,
    invoked_at: Instant,
    state: Mutex<ContextState>,
}

/// Shared handle to one interaction's response state. Cheap to clone.
#[derive(Clone)]
pub struct MessageInteractionContext {
    core: Arc<ContextCore>,
}

impl MessageInteractionContext {
    pub(crate) fn new(
        creator: &Creator,
        interaction: Interaction,
        responder: Responder,
        auto: AutoResponse,
    ) -> Self {
        let message_id = interaction.message.as_ref().map(|m| m.id.clone());
        let ctx = Self {
            core: Arc::new(ContextCore {
                creator: creator.clone(),
                interaction,
                responder,
                invoked_at: Instant::now(),
                state: Mutex::new(ContextState {
                    response: ResponseState::Unresponded,
                    message_id,
                    timer: None,
                }),
            }),
        };
        let options = creator.options();
        if !options.disable_timeouts {
            ctx.arm_timer(options.deferred_timeout, auto);
        }
        ctx
    }

    fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        self.core.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn creator(&self) -> &Creator {
        &self.core.creator
    }

    pub fn interaction(&self) -> &Interaction {
        &self.core.interaction
    }

    pub fn interaction_id(&self) -> &str {
        &self.core.interaction.id
    }

    pub fn token(&self) -> &str {
        &self.core.interaction.token
    }

    pub fn guild_id(&self) -> Option<&str> {
        self.core.interaction.guild_id.as_deref()
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.core.interaction.channel_id.as_deref()
    }

    /// The invoking member, for interactions from a guild.
    pub fn member(&self) -> Option<&GuildMember> {
        self.core.interaction.member.as_ref()
    }

    pub fn user(&self) -> Option<&User> {
        self.core.interaction.author()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user().map(|u| u.id.as_str())
    }

    pub fn app_permissions(&self) -> Option<Permissions> {
        self.core.interaction.app_permissions
    }

    pub fn locale(&self) -> Option<&str> {
        self.core.interaction.locale.as_deref()
    }

    pub fn invoked_at(&self) -> Instant {
        self.core.invoked_at
    }

    /// Past the 15 minute token lifetime.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.core.invoked_at + INTERACTION_LIFETIME
    }

    pub fn state(&self) -> ResponseState {
        self.lock_state().response
    }

    pub fn initially_responded(&self) -> bool {
        self.state() != ResponseState::Unresponded
    }

    pub fn deferred(&self) -> bool {
        self.state() == ResponseState::Deferred
    }

    /// Id of the response message, once known (components start with the
    /// id of the message they belong to).
    pub fn message_id(&self) -> Option<Snowflake> {
        self.lock_state().message_id.clone()
    }

    fn ensure_live(&self) -> Result<(), InteractionError> {
        if self.expired() {
            return Err(InteractionError::Expired);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Initial response
    // ------------------------------------------------------------------

    /// Use the initial response slot. Returns `false` without sending
    /// anything if it was already used.
    ///
    /// A rejected response leaves the context `Unresponded`.
    pub(crate) async fn respond(
        &self,
        response: InteractionResponse,
        files: Vec<FileContent>,
        next: ResponseState,
    ) -> Result<bool, InteractionError> {
        {
            let mut state = self.lock_state();
            if state.response != ResponseState::Unresponded {
                return Ok(false);
            }
            state.response = next;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
        match self
            .core
            .responder
            .send(TransportResponse::interaction(&response, files))
            .await
        {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.creator().events().warn(format!(
                    "interaction {} response could not be delivered",
                    self.interaction_id()
                ));
                Ok(true)
            }
            Err(err) => {
                self.lock_state().response = ResponseState::Unresponded;
                Err(err.into())
            }
        }
    }

    /// Acknowledge now and send the message later. Ephemeral deferrals make
    /// the eventual message ephemeral too.
    ///
    /// Returns `false` (and sends nothing) once any response was sent.
    pub async fn defer(&self, ephemeral: bool) -> Result<bool, InteractionError> {
        self.ensure_live()?;
        let response = if ephemeral {
            InteractionResponse::with_data(
                InteractionCallbackType::DeferredChannelMessageWithSource,
                serde_json::json!({ "flags": EPHEMERAL_FLAG }),
            )
        } else {
            InteractionResponse::new(InteractionCallbackType::DeferredChannelMessageWithSource)
        };
        self.respond(response, Vec::new(), ResponseState::Deferred).await
    }

    /// Send a message: the initial response if none was sent yet, an edit of
    /// the deferred placeholder after [`defer`](Self::defer), otherwise a
    /// follow-up.
    pub async fn send(&self, options: impl Into<MessageOptions>) -> Result<Sent, InteractionError> {
        self.ensure_live()?;
        let options = options.into();
        loop {
            match self.state() {
                ResponseState::Unresponded => {
                    let response = InteractionResponse::with_data(
                        InteractionCallbackType::ChannelMessageWithSource,
                        self.message_body(&options)?,
                    );
                    if self
                        .respond(response, options.files.clone(), ResponseState::Responded)
                        .await?
                    {
                        return Ok(Sent::Initial);
                    }
                }
                ResponseState::Deferred => {
                    let message = self.edit_original(options).await?;
                    return Ok(Sent::Message(Box::new(message)));
                }
                ResponseState::Responded => {
                    let message = self.send_follow_up(options).await?;
                    return Ok(Sent::Message(Box::new(message)));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Webhook messages
    // ------------------------------------------------------------------

    /// Create a follow-up message. Follow-ups are independent of the initial
    /// response and each gets its own id.
    pub async fn send_follow_up(&self, options: impl Into<MessageOptions>) -> Result<Message, InteractionError> {
        self.ensure_live()?;
        let options = options.into();
        let body = self.message_body(&options)?;
        let message = self
            .creator()
            .rest()
            .execute_follow_up(
                &self.core.interaction.application_id,
                self.token(),
                body,
                options.files,
            )
            .await?;
        Ok(message)
    }

    /// Edit a message sent through this interaction (`@original` for the
    /// initial response).
    pub async fn edit(
        &self,
        message_id: &str,
        options: impl Into<MessageOptions>,
    ) -> Result<Message, InteractionError> {
        self.ensure_live()?;
        let options = options.into();
        let body = self.message_body(&options)?;
        let message = self
            .creator()
            .rest()
            .edit_webhook_message(
                &self.core.interaction.application_id,
                self.token(),
                message_id,
                body,
                options.files,
            )
            .await?;
        if message_id == "@original" {
            let mut state = self.lock_state();
            state.message_id = Some(message.id.clone());
            if state.response == ResponseState::Deferred {
                state.response = ResponseState::Responded;
            }
        }
        Ok(message)
    }

    pub async fn edit_original(&self, options: impl Into<MessageOptions>) -> Result<Message, InteractionError> {
        self.edit("@original", options).await
    }

    /// Delete a message sent through this interaction, the initial response
    /// when `message_id` is `None`.
    pub async fn delete(&self, message_id: Option<&str>) -> Result<(), InteractionError> {
        self.ensure_live()?;
        self.creator()
            .rest()
            .delete_webhook_message(
                &self.core.interaction.application_id,
                self.token(),
                message_id.unwrap_or("@original"),
            )
            .await?;
        Ok(())
    }

    /// Fetch a message sent through this interaction, the initial response
    /// when `message_id` is `None`. Fetching the original records its id
    /// for component registration.
    pub async fn fetch(&self, message_id: Option<&str>) -> Result<Message, InteractionError> {
        self.ensure_live()?;
        let target = message_id.unwrap_or("@original");
        let message = self
            .creator()
            .rest()
            .get_webhook_message(&self.core.interaction.application_id, self.token(), target)
            .await?;
        if target == "@original" {
            self.lock_state().message_id = Some(message.id.clone());
        }
        Ok(message)
    }

    fn message_body(&self, options: &MessageOptions) -> Result<Value, InteractionError> {
        let mut body = serde_json::to_value(options)?;
        if options.allowed_mentions.is_none() {
            if let (Some(default), Value::Object(map)) =
                (&self.creator().options().allowed_mentions, &mut body)
            {
                map.insert("allowed_mentions".to_string(), default.clone());
            }
        }
        Ok(body)
    }

    // ------------------------------------------------------------------
    // Modals
    // ------------------------------------------------------------------

    /// Show a modal as the initial response. An empty `custom_id` is
    /// replaced by a generated one; the id used is returned.
    pub(crate) async fn show_modal(
        &self,
        mut modal: ModalOptions,
        callback: Option<ModalCallback>,
    ) -> Result<String, InteractionError> {
        self.ensure_live()?;
        if self.initially_responded() {
            return Err(InteractionError::AlreadyResponded);
        }
        if modal.custom_id.is_empty() {
            modal.custom_id = util::generate_id();
        }
        let custom_id = modal.custom_id.clone();

        let key = match callback {
            Some(callback) => {
                let user_id = self
                    .user_id()
                    .ok_or(InteractionError::MissingData("user"))?
                    .to_string();
                let key = ModalKey::User {
                    user_id,
                    custom_id: custom_id.clone(),
                };
                self.creator().registry().register_modal(
                    key.clone(),
                    callback,
                    Some(self.core.invoked_at + INTERACTION_LIFETIME),
                    None,
                );
                Some(key)
            }
            None => None,
        };

        let response = InteractionResponse::with_data(
            InteractionCallbackType::Modal,
            serde_json::to_value(&modal)?,
        );
        let result = match self.respond(response, Vec::new(), ResponseState::Responded).await {
            Ok(true) => return Ok(custom_id),
            Ok(false) => Err(InteractionError::AlreadyResponded),
            Err(err) => Err(err),
        };
        if let Some(key) = key {
            self.creator().registry().unregister_modal(&key);
        }
        result
    }

    // ------------------------------------------------------------------
    // Component registration
    // ------------------------------------------------------------------

    /// Route presses of `custom_id` on this context's message to `callback`
    /// for the next 15 minutes.
    ///
    /// Needs a response with a known message id: send, then
    /// [`fetch`](Self::fetch) or [`edit_original`](Self::edit_original).
    pub fn register_component<F, Fut>(&self, custom_id: impl Into<String>, callback: F) -> Result<(), InteractionError>
    where
        F: Fn(ComponentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register_component_with(custom_id, callback, CallbackOptions::default())
    }

    pub fn register_component_with<F, Fut>(
        &self,
        custom_id: impl Into<String>,
        callback: F,
        options: CallbackOptions,
    ) -> Result<(), InteractionError>
    where
        F: Fn(ComponentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_live()?;
        let message_id = {
            let state = self.lock_state();
            if state.response == ResponseState::Unresponded {
                return Err(InteractionError::NotResponded);
            }
            state.message_id.clone().ok_or(InteractionError::NoMessageId)?
        };
        let key = ComponentKey::Message {
            message_id,
            custom_id: custom_id.into(),
        };
        self.register(key, callback, options);
        Ok(())
    }

    /// Route every component press on `message_id` to `callback`.
    pub fn register_wildcard_component<F, Fut>(
        &self,
        message_id: impl Into<Snowflake>,
        callback: F,
        options: CallbackOptions,
    ) -> Result<(), InteractionError>
    where
        F: Fn(ComponentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ensure_live()?;
        self.register(ComponentKey::Wildcard(message_id.into()), callback, options);
        Ok(())
    }

    fn register<F, Fut>(&self, key: ComponentKey, callback: F, options: CallbackOptions)
    where
        F: Fn(ComponentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let expires = options.expiration.map(|after| self.core.invoked_at + after);
        self.creator().registry().register_component(
            key,
            component_callback(callback),
            expires,
            options.on_expired,
        );
    }

    /// Remove a component callback on `message_id` (this context's message
    /// when `None`). Removing a missing entry is a no-op.
    pub fn unregister_component(&self, custom_id: &str, message_id: Option<&str>) -> bool {
        let Some(message_id) = message_id.map(str::to_string).or_else(|| self.message_id()) else {
            return false;
        };
        self.creator().registry().unregister_component(&ComponentKey::Message {
            message_id,
            custom_id: custom_id.to_string(),
        })
    }

    pub fn unregister_wildcard_component(&self, message_id: &str) -> bool {
        self.creator()
            .registry()
            .unregister_component(&ComponentKey::Wildcard(message_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Auto response
    // ------------------------------------------------------------------

    fn arm_timer(&self, delay: Duration, auto: AutoResponse) {
        let ctx = self.clone();
        // The task clears `timer` through this lock, so store the handle
        // before it can get there.
        let mut state = self.lock_state();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear our own handle so `respond` does not abort this task.
            ctx.lock_state().timer = None;
            if ctx.expired() {
                return;
            }
            debug!(interaction = %ctx.interaction_id(), ?auto, "auto-responding to interaction");
            let response = match auto {
                AutoResponse::Defer { ephemeral } => {
                    if let Err(err) = ctx.defer(ephemeral).await {
                        ctx.creator().events().warn(format!("automatic defer failed: {}", err));
                    }
                    return;
                }
                AutoResponse::Acknowledge => {
                    InteractionResponse::new(InteractionCallbackType::DeferredUpdateMessage)
                }
                AutoResponse::EmptyChoices => InteractionResponse::with_data(
                    InteractionCallbackType::ApplicationCommandAutocompleteResult,
                    serde_json::json!({ "choices": [] }),
                ),
            };
            if let Err(err) = ctx.respond(response, Vec::new(), ResponseState::Responded).await {
                ctx.creator().events().warn(format!("automatic response failed: {}", err));
            }
        });
        state.timer = Some(task.abort_handle());
    }

    /// Whether an auto-response timer is still pending.
    pub fn timer_pending(&self) -> bool {
        self.lock_state().timer.is_some()
    }
}

impl fmt::Debug for MessageInteractionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("MessageInteractionContext")
            .field("interaction_id", &self.core.interaction.id)
            .field("kind", &self.core.interaction.kind)
            .field("state", &state.response)
            .field("message_id", &state.message_id)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::CreatorOptions;
    use crate::rest::testing::{MockReply, MockTransport};
    use crate::server::Deliveries;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    pub(crate) const APP: &str = "1000000000000000001";

    pub(crate) fn creator(transport: &Arc<MockTransport>) -> Creator {
        Creator::with_transport(CreatorOptions::new(APP).token("t"), transport.clone())
    }

    pub(crate) fn command_interaction() -> Interaction {
        serde_json::from_value(json!({
            "id": "2000000000000000002",
            "application_id": APP,
            "type": 2,
            "token": "interaction-token",
            "guild_id": "3000000000000000003",
            "channel_id": "4000000000000000004",
            "member": {
                "user": { "id": "5000000000000000005", "username": "alice" },
                "roles": [],
                "permissions": "0"
            },
            "data": { "id": "6", "name": "ping", "type": 1 }
        }))
        .unwrap()
    }

    /// Acknowledge the delivery as soon as it arrives and hand back what was
    /// sent.
    pub(crate) fn answer(mut deliveries: Deliveries) -> oneshot::Receiver<TransportResponse> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            if let Some(delivery) = deliveries.recv().await {
                let _ = tx.send(delivery.into_response());
            }
        });
        rx
    }

    pub(crate) fn context(creator: &Creator, auto: AutoResponse) -> (MessageInteractionContext, oneshot::Receiver<TransportResponse>) {
        let (responder, deliveries) = Responder::channel();
        let ctx = MessageInteractionContext::new(creator, command_interaction(), responder, auto);
        (ctx, answer(deliveries))
    }

    fn message(id: &str) -> serde_json::Value {
        json!({"id": id, "channel_id": "4000000000000000004", "content": ""})
    }

    // -- send() --

    #[tokio::test(start_paused = true)]
    async fn send_twice_is_one_initial_response_and_one_follow_up() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(200, message("8000000000000000008")));
        let creator = creator(&transport);
        let (ctx, rx) = context(&creator, AutoResponse::Defer { ephemeral: false });

        let first = ctx.send("hello").await.unwrap();
        assert!(matches!(first, Sent::Initial));
        let body = rx.await.unwrap().body.unwrap();
        assert_eq!(body["type"], 4);
        assert_eq!(body["data"]["content"], "hello");

        let second = ctx.send("again").await.unwrap();
        match second {
            Sent::Message(msg) => assert_eq!(msg.id, "8000000000000000008"),
            other => panic!("expected follow-up, got {:?}", other),
        }
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.ends_with(&format!("/webhooks/{}/interaction-token?wait=true", APP)));
        assert_eq!(ctx.state(), ResponseState::Responded);
    }

    #[tokio::test(start_paused = true)]
    async fn defer_after_response_is_a_no_op() {
        let transport = MockTransport::new();
        let creator = creator(&transport);
        let (ctx, rx) = context(&creator, AutoResponse::Defer { ephemeral: false });
        ctx.send("hi").await.unwrap();
        drop(rx);

        assert!(!ctx.defer(false).await.unwrap());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_after_defer_edits_the_original() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(200, message("8000000000000000009")));
        let creator = creator(&transport);
        let (ctx, rx) = context(&creator, AutoResponse::Defer { ephemeral: false });

        assert!(ctx.defer(true).await.unwrap());
        let body = rx.await.unwrap().body.unwrap();
        assert_eq!(body, json!({"type": 5, "data": {"flags": 64}}));
        assert!(ctx.deferred());

        ctx.send("done").await.unwrap();
        let sent = &transport.requests()[0];
        assert_eq!(sent.method, crate::rest::HttpMethod::Patch);
        assert!(sent.url.ends_with("/messages/@original"));
        assert_eq!(ctx.state(), ResponseState::Responded);
        assert_eq!(ctx.message_id().as_deref(), Some("8000000000000000009"));
    }

    #[tokio::test(start_paused = true)]
    async fn default_allowed_mentions_are_applied() {
        let transport = MockTransport::new();
        let creator = Creator::with_transport(
            CreatorOptions::new(APP).allowed_mentions(json!({"parse": []})),
            transport.clone(),
        );
        let (ctx, rx) = context(&creator, AutoResponse::Defer { ephemeral: false });
        ctx.send("@everyone").await.unwrap();
        let body = rx.await.unwrap().body.unwrap();
        assert_eq!(body["data"]["allowed_mentions"], json!({"parse": []}));
    }

    // -- auto-defer --

    #[tokio::test(start_paused = true)]
    async fn unanswered_context_is_deferred_after_two_seconds() {
        let transport = MockTransport::new();
        let creator = creator(&transport);
        let start = Instant::now();
        let (ctx, rx) = context(&creator, AutoResponse::Defer { ephemeral: true });

        let response = rx.await.unwrap();
        assert_eq!(Instant::now() - start, Duration::from_secs(2));
        let body = response.body.unwrap();
        assert_eq!(body["type"], 5);
        assert_eq!(body["data"]["flags"], 64);
        assert!(ctx.deferred());
        assert!(!ctx.timer_pending());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn immediate_auto_defer_clears_its_timer() {
        let transport = MockTransport::new();
        let creator = Creator::with_transport(
            CreatorOptions::new(APP).token("t").deferred_timeout(Duration::ZERO),
            transport.clone(),
        );
        let (ctx, rx) = context(&creator, AutoResponse::Defer { ephemeral: false });

        assert_eq!(rx.await.unwrap().body.unwrap()["type"], 5);
        assert!(ctx.deferred());
        assert!(!ctx.timer_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_send_cancels_the_auto_defer() {
        let transport = MockTransport::new();
        let creator = creator(&transport);
        let (ctx, rx) = context(&creator, AutoResponse::Defer { ephemeral: false });

        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.send("quick").await.unwrap();
        assert!(!ctx.timer_pending());
        let body = rx.await.unwrap().body.unwrap();
        assert_eq!(body["type"], 4);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ctx.state(), ResponseState::Responded);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_timeouts_never_defer() {
        let transport = MockTransport::new();
        let creator = Creator::with_transport(
            CreatorOptions::new(APP).disable_timeouts(true),
            transport.clone(),
        );
        let (ctx, _rx) = context(&creator, AutoResponse::Defer { ephemeral: false });
        assert!(!ctx.timer_pending());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ctx.state(), ResponseState::Unresponded);
    }

    // -- expiry --

    #[tokio::test(start_paused = true)]
    async fn expired_context_fails_fast() {
        let transport = MockTransport::new();
        let creator = creator(&transport);
        let (ctx, _rx) = context(&creator, AutoResponse::Defer { ephemeral: false });
        ctx.send("hi").await.unwrap();

        tokio::time::advance(INTERACTION_LIFETIME).await;
        assert!(ctx.expired());
        assert!(matches!(ctx.send("late").await, Err(InteractionError::Expired)));
        assert!(matches!(ctx.send_follow_up("late").await, Err(InteractionError::Expired)));
        assert!(matches!(ctx.edit_original("late").await, Err(InteractionError::Expired)));
        assert!(matches!(ctx.delete(None).await, Err(InteractionError::Expired)));
        assert!(matches!(ctx.defer(false).await, Err(InteractionError::Expired)));
        assert!(transport.requests().is_empty());
    }

    // -- components --

    #[tokio::test(start_paused = true)]
    async fn component_registration_needs_a_message() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(200, message("8000000000000000010")));
        let creator = creator(&transport);
        let (ctx, _rx) = context(&creator, AutoResponse::Defer { ephemeral: false });

        let noop = |_ctx: ComponentContext| async {};
        assert!(matches!(ctx.register_component("b", noop), Err(InteractionError::NotResponded)));
        ctx.send("pick one").await.unwrap();
        assert!(matches!(ctx.register_component("b", noop), Err(InteractionError::NoMessageId)));

        ctx.fetch(None).await.unwrap();
        ctx.register_component("b", noop).unwrap();
        assert!(creator.registry().contains_component(&ComponentKey::Message {
            message_id: "8000000000000000010".into(),
            custom_id: "b".into(),
        }));
        assert!(ctx.unregister_component("b", None));
        assert!(!ctx.unregister_component("b", None));
    }

    // -- modals --

    #[tokio::test(start_paused = true)]
    async fn show_modal_registers_a_user_callback() {
        let transport = MockTransport::new();
        let creator = creator(&transport);
        let (ctx, rx) = context(&creator, AutoResponse::Defer { ephemeral: false });
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let callback = crate::registry::modal_callback(move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let modal = ModalOptions {
            title: "Feedback".into(),
            custom_id: String::new(),
            components: vec![action_row(vec![text_input("text", "Text", 1, true)])],
        };
        let custom_id = ctx.show_modal(modal, Some(callback)).await.unwrap();
        assert_eq!(custom_id.len(), 16);

        let body = rx.await.unwrap().body.unwrap();
        assert_eq!(body["type"], 9);
        assert_eq!(body["data"]["custom_id"], custom_id.as_str());
        assert!(creator.registry().contains_modal(&ModalKey::User {
            user_id: "5000000000000000005".into(),
            custom_id: custom_id.clone(),
        }));

        let again = ModalOptions {
            title: "Again".into(),
            custom_id: "x".into(),
            components: Vec::new(),
        };
        assert!(matches!(ctx.show_modal(again, None).await, Err(InteractionError::AlreadyResponded)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
