use std::collections::HashMap;

use serde_json::{json, Value};

use super::{AutoResponse, MessageInteractionContext, ResponseState};
use crate::creator::Creator;
use crate::error::InteractionError;
use crate::server::Responder;
use crate::types::*;

/// A request for option suggestions while the user types a command.
///
/// Only [`send_results`](Self::send_results) responds; unanswered requests
/// get an empty list after the deferral timeout.
#[derive(Debug, Clone)]
pub struct AutocompleteContext {
    base: MessageInteractionContext,
    subcommands: Vec<String>,
    options: HashMap<String, Value>,
    focused: Option<String>,
}

impl AutocompleteContext {
    pub(crate) fn new(creator: &Creator, interaction: Interaction, responder: Responder) -> Self {
        let (subcommands, options, focused) = interaction
            .data
            .as_ref()
            .map(|data| {
                let (subcommands, options) = super::command::flatten_options(&data.options);
                (subcommands, options, focused_option(&data.options))
            })
            .unwrap_or_default();
        Self {
            base: MessageInteractionContext::new(creator, interaction, responder, AutoResponse::EmptyChoices),
            subcommands,
            options,
            focused,
        }
    }

    pub fn interaction(&self) -> &Interaction {
        self.base.interaction()
    }

    pub fn creator(&self) -> &Creator {
        self.base.creator()
    }

    pub fn user(&self) -> Option<&User> {
        self.base.user()
    }

    pub fn guild_id(&self) -> Option<&str> {
        self.base.guild_id()
    }

    pub fn command_name(&self) -> &str {
        self.interaction()
            .data
            .as_ref()
            .and_then(|d| d.name.as_deref())
            .unwrap_or_default()
    }

    pub fn command_type(&self) -> CommandType {
        self.interaction()
            .data
            .as_ref()
            .and_then(|d| d.kind)
            .unwrap_or_default()
    }

    pub fn subcommands(&self) -> &[String] {
        &self.subcommands
    }

    /// What the user has typed so far, by option name.
    pub fn options(&self) -> &HashMap<String, Value> {
        &self.options
    }

    /// Name of the option being typed.
    pub fn focused(&self) -> Option<&str> {
        self.focused.as_deref()
    }

    pub fn responded(&self) -> bool {
        self.base.initially_responded()
    }

    /// Send the suggestions. Returns `false` if a response was already
    /// sent.
    pub async fn send_results(&self, choices: Vec<AutocompleteChoice>) -> Result<bool, InteractionError> {
        if self.base.expired() {
            return Err(InteractionError::Expired);
        }
        let response = InteractionResponse::with_data(
            InteractionCallbackType::ApplicationCommandAutocompleteResult,
            json!({ "choices": choices }),
        );
        self.base
            .respond(response, Vec::new(), ResponseState::Responded)
            .await
    }
}

fn focused_option(options: &[CommandOption]) -> Option<String> {
    options.iter().find_map(|opt| {
        if opt.focused {
            Some(opt.name.clone())
        } else {
            focused_option(&opt.options)
        }
    })
}
