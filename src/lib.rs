//! Discord interaction server with a rate-limited REST client.
//!
//! Register [`SlashCommand`]s on a [`Creator`], hand it verified webhook
//! requests ([`Creator::handle_webhook`]) or gateway interaction payloads
//! ([`Creator::handle_gateway_interaction`]), and reply through the
//! per-interaction contexts. Outbound REST calls are queued per rate-limit
//! bucket by [`rest::RequestHandler`].

pub mod command;
pub mod config;
pub mod context;
pub mod creator;
pub mod error;
pub mod events;
pub mod permissions;
pub mod registry;
pub mod rest;
pub mod server;
pub mod types;
pub mod util;

pub use command::{BlockReason, CommandOptions, PermissionCheck, SlashCommand, ThrottlingOptions};
pub use config::{CreatorOptions, RestOptions};
pub use context::{
    AutocompleteContext, CommandContext, ComponentContext, MessageInteractionContext,
    ModalInteractionContext, ResponseState, Sent,
};
pub use creator::Creator;
pub use error::{BoxError, CreatorError, DiscordHttpError, InteractionError, RestError};
pub use events::{CreatorEvent, RestTelemetry};
pub use permissions::Permissions;
pub use registry::CallbackOptions;
pub use server::{Deliveries, Delivery, DeliveryAck, Ed25519Verifier, Responder, SignatureVerifier, TransportResponse};
