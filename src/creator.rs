//! The creator: command registry, interaction dispatch and sync.
//!
//! A [`Creator`] owns everything an interaction needs: the registered
//! commands, the component and modal callback tables, the REST handler and
//! the event bus. Interactions enter through [`Creator::handle_webhook`] or
//! [`Creator::handle_gateway_interaction`] and are routed by type here.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::FutureExt;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use crate::command::{BlockReason, CommandKey, PermissionCheck, RegisteredCommand, SlashCommand};
use crate::config::CreatorOptions;
use crate::context::{
    AutocompleteContext, CommandContext, ComponentContext, ModalInteractionContext, ResponseState,
};
use crate::error::{BoxError, CreatorError};
use crate::events::{CreatorEvent, EventBus};
use crate::registry::{component_callback, modal_callback, CallbackRegistry, ComponentKey, ModalKey};
use crate::rest::{RequestHandler, Transport};
use crate::server::{Responder, SignatureVerifier, TransportResponse};
use crate::types::*;

pub const UNKNOWN_COMMAND_MESSAGE: &str =
    "This command no longer exists.\nThis command should no longer show up in an hour if it has been deleted.";

struct CreatorInner {
    options: CreatorOptions,
    rest: RequestHandler,
    events: EventBus,
    registry: CallbackRegistry,
    commands: RwLock<HashMap<CommandKey, Arc<RegisteredCommand>>>,
    unknown_command: RwLock<Option<Arc<RegisteredCommand>>>,
    verifier: RwLock<Option<Arc<dyn SignatureVerifier>>>,
}

/// Shared handle to the interaction server. Cheap to clone.
#[derive(Clone)]
pub struct Creator {
    inner: Arc<CreatorInner>,
}

impl Creator {
    /// A creator that talks to Discord over `reqwest`.
    #[cfg(feature = "io")]
    pub fn new(options: CreatorOptions) -> Self {
        Self::with_transport(options, Arc::new(crate::rest::ReqwestTransport::new()))
    }

    pub fn with_transport(options: CreatorOptions, transport: Arc<dyn Transport>) -> Self {
        let events = EventBus::new();
        let rest = RequestHandler::with_events(
            options.rest.clone(),
            options.authorization(),
            transport,
            events.clone(),
        );
        let verifier = Self::build_verifier(&options);
        Self {
            inner: Arc::new(CreatorInner {
                registry: CallbackRegistry::new(options.component_timeouts),
                options,
                rest,
                events,
                commands: RwLock::new(HashMap::new()),
                unknown_command: RwLock::new(None),
                verifier: RwLock::new(verifier),
            }),
        }
    }

    pub fn options(&self) -> &CreatorOptions {
        &self.inner.options
    }

    pub fn rest(&self) -> &RequestHandler {
        &self.inner.rest
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.inner.registry
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CreatorEvent> {
        self.inner.events.subscribe()
    }

    /// Contexts of commands when `handle_commands_manually` is set.
    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandContext> {
        self.inner.events.subscribe_commands()
    }

    /// Every component interaction, before callbacks run. While anyone is
    /// subscribed, unmatched presses are left for the subscriber to answer.
    pub fn subscribe_components(&self) -> broadcast::Receiver<ComponentContext> {
        self.inner.events.subscribe_components()
    }

    pub fn subscribe_modals(&self) -> broadcast::Receiver<ModalInteractionContext> {
        self.inner.events.subscribe_modals()
    }

    /// Replace the webhook signature check.
    pub fn set_verifier(&self, verifier: impl SignatureVerifier + 'static) {
        *self
            .inner
            .verifier
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(verifier));
    }

    pub(crate) fn verifier(&self) -> Option<Arc<dyn SignatureVerifier>> {
        self.inner
            .verifier
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commands_read(&self) -> RwLockReadGuard<'_, HashMap<CommandKey, Arc<RegisteredCommand>>> {
        self.inner.commands.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn commands_write(&self) -> RwLockWriteGuard<'_, HashMap<CommandKey, Arc<RegisteredCommand>>> {
        self.inner.commands.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Command registration
    // ------------------------------------------------------------------

    /// Register a command under every scope it names. Fails if any of its
    /// keys is taken.
    pub fn register_command(&self, command: impl SlashCommand) -> Result<(), CreatorError> {
        let command: Arc<dyn SlashCommand> = Arc::new(command);
        let name = command.options().name.clone();
        let keys = self.insert_command(command, false)?;
        for key in keys {
            self.inner.events.emit(CreatorEvent::CommandRegister {
                name: name.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Replace a registered command of the same type and name.
    pub fn reregister_command(&self, command: impl SlashCommand) -> Result<(), CreatorError> {
        let command: Arc<dyn SlashCommand> = Arc::new(command);
        let name = command.options().name.clone();
        let keys = self.insert_command(command, true)?;
        for key in keys {
            self.inner.events.emit(CreatorEvent::CommandReregister {
                name: name.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn insert_command(&self, command: Arc<dyn SlashCommand>, replace: bool) -> Result<Vec<CommandKey>, CreatorError> {
        let options = command.options();
        if options.name.is_empty() {
            return Err(CreatorError::MissingOption("command name"));
        }
        let keys = CommandKey::all_for(options);
        let (kind, name) = (options.kind, options.name.clone());
        let registered = Arc::new(RegisteredCommand::new(command));

        let mut commands = self.commands_write();
        if replace {
            commands.retain(|key, _| !(key.kind == kind && key.name == name));
        } else if let Some(taken) = keys.iter().find(|key| commands.contains_key(key)) {
            return Err(CreatorError::DuplicateCommand {
                name,
                key: taken.to_string(),
            });
        }
        for key in &keys {
            commands.insert(key.clone(), registered.clone());
        }
        Ok(keys)
    }

    /// Remove a command from every scope. Returns whether anything was
    /// registered.
    pub fn unregister_command(&self, kind: CommandType, name: &str) -> bool {
        let removed: Vec<CommandKey> = {
            let mut commands = self.commands_write();
            let keys: Vec<CommandKey> = commands
                .keys()
                .filter(|key| key.kind == kind && key.name == name)
                .cloned()
                .collect();
            for key in &keys {
                commands.remove(key);
            }
            keys
        };
        for key in &removed {
            self.inner.events.emit(CreatorEvent::CommandUnregister {
                name: name.to_string(),
                key: key.to_string(),
            });
        }
        !removed.is_empty()
    }

    /// Run `command` for application commands that match nothing else.
    pub fn register_unknown_command(&self, command: impl SlashCommand) {
        let registered = Arc::new(RegisteredCommand::new(Arc::new(command)));
        *self
            .inner
            .unknown_command
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(registered);
    }

    pub fn unregister_unknown_command(&self) -> bool {
        self.inner
            .unknown_command
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn command(&self, key: &CommandKey) -> Option<Arc<dyn SlashCommand>> {
        self.commands_read().get(key).map(|c| c.command.clone())
    }

    /// Each registered command once, in no particular order.
    pub fn commands(&self) -> Vec<Arc<dyn SlashCommand>> {
        let commands = self.commands_read();
        let mut unique: Vec<&Arc<RegisteredCommand>> = Vec::new();
        for registered in commands.values() {
            if !unique.iter().any(|seen| Arc::ptr_eq(seen, registered)) {
                unique.push(registered);
            }
        }
        unique.into_iter().map(|r| r.command.clone()).collect()
    }

    /// The command an interaction targets: the guild registration first,
    /// then the global one.
    fn find_command(&self, interaction: &Interaction) -> Option<Arc<RegisteredCommand>> {
        let data = interaction.data.as_ref()?;
        let name = data.name.as_deref()?;
        let kind = data.kind.unwrap_or_default();
        let commands = self.commands_read();
        data.guild_id
            .as_deref()
            .and_then(|guild_id| commands.get(&CommandKey::guild(kind, guild_id, name)))
            .or_else(|| commands.get(&CommandKey::global(kind, name)))
            .cloned()
    }

    fn unknown_command(&self) -> Option<Arc<RegisteredCommand>> {
        self.inner
            .unknown_command
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    fn application_id(&self) -> Result<&str, CreatorError> {
        let id = self.inner.options.application_id.as_str();
        if id.is_empty() {
            return Err(CreatorError::MissingOption("application_id"));
        }
        if self.inner.options.token.is_none() {
            return Err(CreatorError::MissingOption("token"));
        }
        Ok(id)
    }

    /// Registration payloads for one scope, sorted by name.
    pub fn application_commands(&self, guild_id: Option<&str>) -> Vec<ApplicationCommand> {
        let commands = self.commands_read();
        let mut payload: Vec<ApplicationCommand> = commands
            .iter()
            .filter(|(key, _)| key.guild_id.as_deref() == guild_id)
            .map(|(_, registered)| registered.command.options().to_application_command())
            .collect();
        payload.sort_by(|a, b| a.name.cmp(&b.name).then(u8::from(a.kind).cmp(&u8::from(b.kind))));
        payload
    }

    /// Overwrite the global commands on Discord with the registered ones.
    pub async fn sync_global_commands(&self) -> Result<Vec<ApplicationCommand>, CreatorError> {
        let application_id = self.application_id()?;
        let payload = self.application_commands(None);
        Ok(self
            .inner
            .rest
            .bulk_overwrite_global_commands(application_id, &payload)
            .await?)
    }

    /// Overwrite one guild's commands on Discord with the registered ones.
    pub async fn sync_commands_in(&self, guild_id: &str) -> Result<Vec<ApplicationCommand>, CreatorError> {
        let application_id = self.application_id()?;
        let payload = self.application_commands(Some(guild_id));
        Ok(self
            .inner
            .rest
            .bulk_overwrite_guild_commands(application_id, guild_id, &payload)
            .await?)
    }

    /// Sync global commands and every guild a command is registered in.
    pub async fn sync_commands(&self) -> Result<(), CreatorError> {
        self.sync_global_commands().await?;
        let guilds: BTreeSet<Snowflake> = self
            .commands_read()
            .keys()
            .filter_map(|key| key.guild_id.clone())
            .collect();
        for guild_id in guilds {
            self.sync_commands_in(&guild_id).await?;
        }
        self.inner.events.emit(CreatorEvent::Synced);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Global callbacks
    // ------------------------------------------------------------------

    /// Handle `custom_id` on any message. Global callbacks never expire.
    pub fn register_global_component<F, Fut>(&self, custom_id: impl Into<String>, callback: F)
    where
        F: Fn(ComponentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.registry.register_component(
            ComponentKey::Global(custom_id.into()),
            component_callback(callback),
            None,
            None,
        );
    }

    pub fn unregister_global_component(&self, custom_id: &str) -> bool {
        self.inner
            .registry
            .unregister_component(&ComponentKey::Global(custom_id.to_string()))
    }

    /// Handle submits of the modal `custom_id` from any user.
    pub fn register_global_modal<F, Fut>(&self, custom_id: impl Into<String>, callback: F)
    where
        F: Fn(ModalInteractionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.registry.register_modal(
            ModalKey::Global(custom_id.into()),
            modal_callback(callback),
            None,
            None,
        );
    }

    pub fn unregister_global_modal(&self, custom_id: &str) -> bool {
        self.inner
            .registry
            .unregister_modal(&ModalKey::Global(custom_id.to_string()))
    }

    /// Drop expired component and modal callbacks now.
    pub fn clean_registered_components(&self) -> usize {
        self.inner.registry.clean()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Route one verified interaction. The initial response goes through
    /// `responder`.
    pub async fn handle_interaction(&self, interaction: Interaction, responder: Responder) {
        self.inner
            .events
            .emit(CreatorEvent::RawInteraction(Box::new(interaction.clone())));
        match interaction.kind {
            InteractionType::Ping => {
                self.inner.events.emit(CreatorEvent::Ping);
                let pong = InteractionResponse::new(InteractionCallbackType::Pong);
                self.reply(&responder, TransportResponse::interaction(&pong, Vec::new())).await;
            }
            InteractionType::ApplicationCommand => self.dispatch_command(interaction, responder).await,
            InteractionType::MessageComponent => self.dispatch_component(interaction, responder).await,
            InteractionType::ApplicationCommandAutocomplete => {
                self.dispatch_autocomplete(interaction, responder).await
            }
            InteractionType::ModalSubmit => self.dispatch_modal(interaction, responder).await,
            InteractionType::Unknown(kind) => {
                self.inner
                    .events
                    .debug(format!("unknown interaction type {} ({})", kind, interaction.id));
                self.reply(&responder, TransportResponse::status(400)).await;
            }
        }
    }

    /// Answer an interaction without creating a context.
    async fn reply(&self, responder: &Responder, response: TransportResponse) {
        if let Err(err) = responder.send(response).await {
            self.inner
                .events
                .error(format!("failed to answer interaction: {}", err));
        }
    }

    async fn dispatch_command(&self, interaction: Interaction, responder: Responder) {
        if self.inner.options.handle_commands_manually {
            let ctx = CommandContext::new(self, interaction, responder, false);
            self.inner.events.send_command(ctx);
            return;
        }

        let Some(registered) = self.find_command(&interaction).or_else(|| self.unknown_command()) else {
            debug!(interaction = %interaction.id, "no command matches interaction");
            let response = if self.inner.options.unknown_command_response {
                let message = InteractionResponse::with_data(
                    InteractionCallbackType::ChannelMessageWithSource,
                    json!({ "content": UNKNOWN_COMMAND_MESSAGE, "flags": EPHEMERAL_FLAG }),
                );
                TransportResponse::interaction(&message, Vec::new())
            } else {
                TransportResponse::status(400)
            };
            self.reply(&responder, response).await;
            return;
        };

        let ctx = CommandContext::new(
            self,
            interaction,
            responder,
            registered.command.options().defer_ephemeral,
        );
        self.run_command(&registered, ctx).await;
    }

    async fn run_command(&self, registered: &RegisteredCommand, ctx: CommandContext) {
        let command = &registered.command;
        let name = registered.name().to_string();
        let user_id = ctx.user_id().map(str::to_string);

        if let PermissionCheck::Denied(response) = command.has_permission(&ctx) {
            self.block(registered, &ctx, BlockReason::Permission { response }).await;
            return;
        }
        if let Some(user_id) = &user_id {
            if let Err(reason) = registered.throttler.throttle(user_id) {
                self.block(registered, &ctx, reason).await;
                return;
            }
        }

        self.inner.events.emit(CreatorEvent::CommandRun {
            command: name.clone(),
            user_id,
        });
        let result = AssertUnwindSafe(command.run(&ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(BoxError::from("command panicked")));
        match result {
            Ok(Some(message)) if ctx.state() != ResponseState::Responded => {
                if let Err(err) = ctx.send(message).await {
                    self.inner
                        .events
                        .error(format!("sending the result of {} failed: {}", name, err));
                }
            }
            Ok(_) => {}
            Err(err) => {
                self.inner.events.emit(CreatorEvent::CommandError {
                    command: name.clone(),
                    message: err.to_string(),
                });
                if let Err(second) = command.on_error(&ctx, &err).await {
                    self.inner
                        .events
                        .error(format!("error handler of {} failed: {}", name, second));
                }
            }
        }
    }

    async fn block(&self, registered: &RegisteredCommand, ctx: &CommandContext, reason: BlockReason) {
        self.inner.events.emit(CreatorEvent::CommandBlock {
            command: registered.name().to_string(),
            user_id: ctx.user_id().map(str::to_string),
            reason: reason.clone(),
        });
        if let Err(err) = registered.command.on_block(ctx, &reason).await {
            self.inner
                .events
                .error(format!("block handler of {} failed: {}", registered.name(), err));
        }
    }

    async fn dispatch_component(&self, interaction: Interaction, responder: Responder) {
        self.inner.registry.clean();
        let ctx = ComponentContext::new(self, interaction, responder);
        let listeners = self.inner.events.component_listeners();
        self.inner.events.send_component(ctx.clone());

        let message_id = ctx.message().map(|m| m.id.clone()).unwrap_or_default();
        match self.inner.registry.component(&message_id, ctx.custom_id()) {
            Some(callback) => {
                if AssertUnwindSafe(callback(ctx)).catch_unwind().await.is_err() {
                    self.inner.events.error("component callback panicked");
                }
            }
            None if listeners == 0 => {
                self.inner.events.debug(format!(
                    "unhandled component {} on message {}",
                    ctx.custom_id(),
                    message_id
                ));
                if let Err(err) = ctx.acknowledge().await {
                    self.inner.events.warn(format!("acknowledging component failed: {}", err));
                }
            }
            None => {}
        }
    }

    async fn dispatch_autocomplete(&self, interaction: Interaction, responder: Responder) {
        let Some(registered) = self.find_command(&interaction) else {
            self.inner.events.warn(format!(
                "autocomplete for unknown command {:?}",
                interaction.data.as_ref().and_then(|d| d.name.as_deref())
            ));
            self.reply(&responder, TransportResponse::status(400)).await;
            return;
        };
        let ctx = AutocompleteContext::new(self, interaction, responder);
        match registered.command.autocomplete(&ctx).await {
            Ok(Some(choices)) if !ctx.responded() => {
                if let Err(err) = ctx.send_results(choices).await {
                    self.inner.events.error(format!("sending autocomplete results failed: {}", err));
                }
            }
            Ok(_) => {}
            Err(err) => self.inner.events.error(format!(
                "autocomplete of {} failed: {}",
                registered.name(),
                err
            )),
        }
    }

    async fn dispatch_modal(&self, interaction: Interaction, responder: Responder) {
        self.inner.registry.clean();
        let ctx = ModalInteractionContext::new(self, interaction, responder);
        self.inner.events.send_modal(ctx.clone());
        if let Some(callback) = self.inner.registry.take_modal(ctx.user_id(), ctx.custom_id()) {
            if AssertUnwindSafe(callback(ctx)).catch_unwind().await.is_err() {
                self.inner.events.error("modal callback panicked");
            }
        }
    }
}

impl fmt::Debug for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Creator")
            .field("options", &self.inner.options)
            .field("commands", &self.commands_read().len())
            .field("registry", &self.inner.registry)
            .finish()
    }
}
