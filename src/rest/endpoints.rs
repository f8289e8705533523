//! Interaction webhook endpoints and command registration.
//!
//! Interaction tokens authorize their own webhook routes, so everything
//! here except command sync is sent without the bot token.

use serde_json::Value;

use crate::error::RestError;
use crate::rest::{HttpMethod, RequestHandler, RequestOptions};
use crate::types::{ApplicationCommand, FileContent, InteractionResponse, Message};

pub fn interaction_callback(interaction_id: &str, token: &str) -> String {
    format!("/interactions/{}/{}/callback", interaction_id, token)
}

pub fn webhook(application_id: &str, token: &str) -> String {
    format!("/webhooks/{}/{}", application_id, token)
}

pub fn webhook_message(application_id: &str, token: &str, message_id: &str) -> String {
    format!("/webhooks/{}/{}/messages/{}", application_id, token, message_id)
}

pub fn global_commands(application_id: &str) -> String {
    format!("/applications/{}/commands", application_id)
}

pub fn guild_commands(application_id: &str, guild_id: &str) -> String {
    format!("/applications/{}/guilds/{}/commands", application_id, guild_id)
}

impl RequestHandler {
    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    /// Respond to an interaction (initial response). Used when the
    /// interaction arrived over the gateway rather than the webhook.
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        token: &str,
        response: &InteractionResponse,
        files: Vec<FileContent>,
    ) -> Result<(), RestError> {
        let body = serde_json::to_value(response)?;
        // Discord returns 204 No Content on success.
        self.request(
            HttpMethod::Post,
            interaction_callback(interaction_id, token),
            RequestOptions::unauthenticated().body(body).files(files),
        )
        .await?;
        Ok(())
    }

    /// Create a follow-up message and wait for it to be returned.
    pub async fn execute_follow_up(
        &self,
        application_id: &str,
        token: &str,
        body: Value,
        files: Vec<FileContent>,
    ) -> Result<Message, RestError> {
        self.request_json(
            HttpMethod::Post,
            webhook(application_id, token),
            RequestOptions::unauthenticated()
                .body(body)
                .files(files)
                .query("wait", "true"),
        )
        .await
    }

    pub async fn get_webhook_message(
        &self,
        application_id: &str,
        token: &str,
        message_id: &str,
    ) -> Result<Message, RestError> {
        self.request_json(
            HttpMethod::Get,
            webhook_message(application_id, token, message_id),
            RequestOptions::unauthenticated(),
        )
        .await
    }

    /// Edit a message sent through the interaction webhook; `@original`
    /// targets the initial response.
    pub async fn edit_webhook_message(
        &self,
        application_id: &str,
        token: &str,
        message_id: &str,
        body: Value,
        files: Vec<FileContent>,
    ) -> Result<Message, RestError> {
        self.request_json(
            HttpMethod::Patch,
            webhook_message(application_id, token, message_id),
            RequestOptions::unauthenticated().body(body).files(files),
        )
        .await
    }

    pub async fn delete_webhook_message(
        &self,
        application_id: &str,
        token: &str,
        message_id: &str,
    ) -> Result<(), RestError> {
        self.request(
            HttpMethod::Delete,
            webhook_message(application_id, token, message_id),
            RequestOptions::unauthenticated(),
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Slash command registration
    // ------------------------------------------------------------------

    /// Register (or overwrite) global application commands.
    pub async fn bulk_overwrite_global_commands(
        &self,
        application_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, RestError> {
        let body = serde_json::to_value(commands)?;
        self.request_json(
            HttpMethod::Put,
            global_commands(application_id),
            RequestOptions::new().body(body),
        )
        .await
    }

    /// Register (or overwrite) guild-scoped application commands.
    pub async fn bulk_overwrite_guild_commands(
        &self,
        application_id: &str,
        guild_id: &str,
        commands: &[ApplicationCommand],
    ) -> Result<Vec<ApplicationCommand>, RestError> {
        let body = serde_json::to_value(commands)?;
        self.request_json(
            HttpMethod::Put,
            guild_commands(application_id, guild_id),
            RequestOptions::new().body(body),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RestOptions;
    use crate::rest::testing::{MockReply, MockTransport};
    use crate::types::InteractionCallbackType;
    use serde_json::json;

    fn message(id: &str) -> Value {
        json!({"id": id, "channel_id": "1", "content": "hi"})
    }

    #[tokio::test(start_paused = true)]
    async fn follow_up_waits_and_skips_auth() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(200, message("77")));
        let rest = RequestHandler::new(RestOptions::default(), Some("Bot t".into()), transport.clone());

        let msg = rest
            .execute_follow_up("app", "tok", json!({"content": "hi"}), Vec::new())
            .await
            .unwrap();
        assert_eq!(msg.id, "77");

        let sent = &transport.requests()[0];
        assert!(sent.url.ends_with("/webhooks/app/tok?wait=true"));
        assert_eq!(sent.header("authorization"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_posts_response_body() {
        let transport = MockTransport::new();
        transport.push(MockReply::Response(crate::rest::RawResponse::new(204)));
        let rest = RequestHandler::new(RestOptions::default(), None, transport.clone());
        rest.create_interaction_response(
            "9",
            "tok",
            &InteractionResponse::new(InteractionCallbackType::DeferredUpdateMessage),
            Vec::new(),
        )
        .await
        .unwrap();

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, HttpMethod::Post);
        assert!(sent.url.ends_with("/interactions/9/tok/callback"));
        assert_eq!(sent.body.as_deref(), Some(br#"{"type":6}"#.as_slice()));
    }

    #[tokio::test(start_paused = true)]
    async fn command_sync_is_authenticated() {
        let transport = MockTransport::new();
        transport.push(MockReply::json(200, json!([])));
        let rest = RequestHandler::new(RestOptions::default(), Some("Bot t".into()), transport.clone());
        let synced = rest.bulk_overwrite_guild_commands("app", "5", &[]).await.unwrap();
        assert!(synced.is_empty());

        let sent = &transport.requests()[0];
        assert_eq!(sent.method, HttpMethod::Put);
        assert!(sent.url.ends_with("/applications/app/guilds/5/commands"));
        assert_eq!(sent.header("authorization"), Some("Bot t"));
    }
}
