use std::collections::HashMap;
use std::ops::Deref;

use super::{AutoResponse, MessageInteractionContext};
use crate::creator::Creator;
use crate::server::Responder;
use crate::types::*;

/// A submitted modal.
#[derive(Debug, Clone)]
pub struct ModalInteractionContext {
    base: MessageInteractionContext,
    values: HashMap<String, String>,
}

impl ModalInteractionContext {
    pub(crate) fn new(creator: &Creator, interaction: Interaction, responder: Responder) -> Self {
        let values = interaction
            .data
            .as_ref()
            .map(|data| text_values(&data.components))
            .unwrap_or_default();
        Self {
            base: MessageInteractionContext::new(
                creator,
                interaction,
                responder,
                AutoResponse::Defer { ephemeral: false },
            ),
            values,
        }
    }

    pub fn custom_id(&self) -> &str {
        self.interaction()
            .data
            .as_ref()
            .and_then(|d| d.custom_id.as_deref())
            .unwrap_or_default()
    }

    /// Submitted text, by input `custom_id`.
    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    pub fn value(&self, custom_id: &str) -> Option<&str> {
        self.values.get(custom_id).map(String::as_str)
    }
}

impl Deref for ModalInteractionContext {
    type Target = MessageInteractionContext;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

fn text_values(components: &[Component]) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for component in components {
        if let (Some(id), Some(value)) = (&component.custom_id, &component.value) {
            values.insert(id.clone(), value.clone());
        }
        values.extend(text_values(&component.components));
    }
    values
}
