use std::future::Future;
use std::ops::Deref;

use super::{AutoResponse, MessageInteractionContext, ModalInteractionContext, ResponseState, Sent};
use crate::creator::Creator;
use crate::error::InteractionError;
use crate::registry::modal_callback;
use crate::server::Responder;
use crate::types::*;

/// A button press or select menu choice on a message.
#[derive(Debug, Clone)]
pub struct ComponentContext {
    base: MessageInteractionContext,
}

impl ComponentContext {
    pub(crate) fn new(creator: &Creator, interaction: Interaction, responder: Responder) -> Self {
        Self {
            base: MessageInteractionContext::new(creator, interaction, responder, AutoResponse::Acknowledge),
        }
    }

    fn data(&self) -> Option<&InteractionData> {
        self.interaction().data.as_ref()
    }

    pub fn custom_id(&self) -> &str {
        self.data().and_then(|d| d.custom_id.as_deref()).unwrap_or_default()
    }

    pub fn component_type(&self) -> u8 {
        self.data().and_then(|d| d.component_type).unwrap_or_default()
    }

    /// Chosen values of a select menu.
    pub fn values(&self) -> &[String] {
        self.data().map(|d| d.values.as_slice()).unwrap_or_default()
    }

    /// The message the component is attached to.
    pub fn message(&self) -> Option<&Message> {
        self.interaction().message.as_ref()
    }

    /// Acknowledge without changing the message. Returns `false` once any
    /// response was sent.
    pub async fn acknowledge(&self) -> Result<bool, InteractionError> {
        if self.expired() {
            return Err(InteractionError::Expired);
        }
        self.base
            .respond(
                InteractionResponse::new(InteractionCallbackType::DeferredUpdateMessage),
                Vec::new(),
                ResponseState::Responded,
            )
            .await
    }

    /// Edit the message the component is attached to: as the initial
    /// response when possible, through the webhook otherwise.
    pub async fn edit_parent(&self, options: impl Into<MessageOptions>) -> Result<Sent, InteractionError> {
        if self.expired() {
            return Err(InteractionError::Expired);
        }
        let options = options.into();
        if self.state() == ResponseState::Unresponded {
            let body = self.base.message_body(&options)?;
            let response = InteractionResponse::with_data(InteractionCallbackType::UpdateMessage, body);
            if self
                .base
                .respond(response, options.files.clone(), ResponseState::Responded)
                .await?
            {
                return Ok(Sent::Initial);
            }
        }
        let message = self.edit_original(options).await?;
        Ok(Sent::Message(Box::new(message)))
    }

    pub async fn send_modal(&self, modal: ModalOptions) -> Result<String, InteractionError> {
        self.base.show_modal(modal, None).await
    }

    pub async fn send_modal_with<F, Fut>(&self, modal: ModalOptions, callback: F) -> Result<String, InteractionError>
    where
        F: Fn(ModalInteractionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.base.show_modal(modal, Some(modal_callback(callback))).await
    }
}

impl Deref for ComponentContext {
    type Target = MessageInteractionContext;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}
