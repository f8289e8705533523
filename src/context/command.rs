use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;

use serde_json::Value;

use super::{AutoResponse, MessageInteractionContext, ModalInteractionContext};
use crate::creator::Creator;
use crate::error::InteractionError;
use crate::registry::modal_callback;
use crate::server::Responder;
use crate::types::*;

/// An application command invocation (slash or context menu).
#[derive(Debug, Clone)]
pub struct CommandContext {
    base: MessageInteractionContext,
    subcommands: Vec<String>,
    options: HashMap<String, Value>,
}

impl CommandContext {
    pub(crate) fn new(creator: &Creator, interaction: Interaction, responder: Responder, defer_ephemeral: bool) -> Self {
        let (subcommands, options) = interaction
            .data
            .as_ref()
            .map(|data| flatten_options(&data.options))
            .unwrap_or_default();
        let base = MessageInteractionContext::new(
            creator,
            interaction,
            responder,
            AutoResponse::Defer {
                ephemeral: defer_ephemeral,
            },
        );
        Self {
            base,
            subcommands,
            options,
        }
    }

    fn data(&self) -> Option<&InteractionData> {
        self.interaction().data.as_ref()
    }

    pub fn command_name(&self) -> &str {
        self.data().and_then(|d| d.name.as_deref()).unwrap_or_default()
    }

    pub fn command_id(&self) -> Option<&str> {
        self.data().and_then(|d| d.id.as_deref())
    }

    pub fn command_type(&self) -> CommandType {
        self.data().and_then(|d| d.kind).unwrap_or_default()
    }

    /// Selected subcommand group and subcommand names, outermost first.
    pub fn subcommands(&self) -> &[String] {
        &self.subcommands
    }

    /// Values of the leaf options, under the selected subcommand if any.
    pub fn options(&self) -> &HashMap<String, Value> {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options.get(name)
    }

    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.option(name).and_then(Value::as_str)
    }

    pub fn option_i64(&self, name: &str) -> Option<i64> {
        self.option(name).and_then(Value::as_i64)
    }

    pub fn option_bool(&self, name: &str) -> Option<bool> {
        self.option(name).and_then(Value::as_bool)
    }

    /// The user or message a context-menu command was used on.
    pub fn target_id(&self) -> Option<&str> {
        self.data().and_then(|d| d.target_id.as_deref())
    }

    pub fn target_user(&self) -> Option<&User> {
        let target = self.target_id()?;
        self.resolved()?.users.get(target)
    }

    pub fn target_message(&self) -> Option<&Message> {
        let target = self.target_id()?;
        self.resolved()?.messages.get(target)
    }

    pub fn resolved(&self) -> Option<&ResolvedData> {
        self.data().and_then(|d| d.resolved.as_ref())
    }

    /// Show a modal; its submit is handled by global modal callbacks or
    /// [`subscribe_modals`](crate::Creator::subscribe_modals) listeners.
    pub async fn send_modal(&self, modal: ModalOptions) -> Result<String, InteractionError> {
        self.base.show_modal(modal, None).await
    }

    /// Show a modal and route this user's submit of it to `callback`.
    pub async fn send_modal_with<F, Fut>(&self, modal: ModalOptions, callback: F) -> Result<String, InteractionError>
    where
        F: Fn(ModalInteractionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.base.show_modal(modal, Some(modal_callback(callback))).await
    }
}

impl Deref for CommandContext {
    type Target = MessageInteractionContext;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

/// Follow subcommand groups and subcommands down to the leaf options.
pub(crate) fn flatten_options(options: &[CommandOption]) -> (Vec<String>, HashMap<String, Value>) {
    let mut path = Vec::new();
    let mut level = options;
    while let [only] = level {
        if !only.is_subcommand() {
            break;
        }
        path.push(only.name.clone());
        level = &only.options;
    }
    let values = level
        .iter()
        .filter_map(|opt| opt.value.clone().map(|value| (opt.name.clone(), value)))
        .collect();
    (path, values)
}
