//! Typed representations of the Discord objects an interaction server sees.
//!
//! These mirror the Discord API docs closely enough to deserialize inbound
//! interaction payloads and the webhook messages returned by follow-ups,
//! without touching `serde_json::Value` in the rest of the codebase.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_repr::Serialize_repr;

use crate::permissions::Permissions;

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Discord IDs are snowflakes transmitted as strings in JSON.
pub type Snowflake = String;

/// Message flag that hides a message from everyone but the invoking user.
pub const EPHEMERAL_FLAG: u64 = 1 << 6;

// ---------------------------------------------------------------------------
// User / member
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: Option<String>,
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
    pub global_name: Option<String>,
}

impl User {
    /// `Username#Discriminator` or just `Username` for the new username system.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some("0") | None => self.username.clone(),
            Some(disc) => format!("{}#{}", self.username, disc),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuildMember {
    pub user: Option<User>,
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    pub joined_at: Option<String>,
    /// Total permissions of the member in the channel, sent with interactions.
    pub permissions: Option<Permissions>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub author: Option<User>,
    #[serde(default)]
    pub content: String,
    pub timestamp: Option<String>,
    pub edited_timestamp: Option<String>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub components: Vec<Component>,
    pub flags: Option<u64>,
    pub webhook_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Attachment {
    pub id: Snowflake,
    pub filename: String,
    pub size: u64,
    pub url: String,
    pub proxy_url: String,
    pub content_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Embed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Embed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

// ---------------------------------------------------------------------------
// Interactions (slash commands, buttons, select menus, modals)
// ---------------------------------------------------------------------------

/// An inbound interaction, received over the webhook or forwarded from a
/// gateway `INTERACTION_CREATE`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Interaction {
    pub id: Snowflake,
    pub application_id: Snowflake,
    #[serde(rename = "type")]
    pub kind: InteractionType,
    pub data: Option<InteractionData>,
    pub guild_id: Option<Snowflake>,
    pub channel_id: Option<Snowflake>,
    pub member: Option<GuildMember>,
    pub user: Option<User>,
    pub token: String,
    #[serde(default)]
    pub version: u8,
    pub message: Option<Message>,
    /// Permissions the application has in the source channel.
    pub app_permissions: Option<Permissions>,
    pub locale: Option<String>,
    pub guild_locale: Option<String>,
}

impl Interaction {
    /// The user who triggered the interaction.
    pub fn author(&self) -> Option<&User> {
        self.member
            .as_ref()
            .and_then(|m| m.user.as_ref())
            .or(self.user.as_ref())
    }
}

/// Interaction type discriminant. Types this crate does not know about are
/// kept as [`InteractionType::Unknown`] so the dispatcher can reject them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "u8", into = "u8")]
pub enum InteractionType {
    Ping,
    ApplicationCommand,
    MessageComponent,
    ApplicationCommandAutocomplete,
    ModalSubmit,
    Unknown(u8),
}

impl From<u8> for InteractionType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Ping,
            2 => Self::ApplicationCommand,
            3 => Self::MessageComponent,
            4 => Self::ApplicationCommandAutocomplete,
            5 => Self::ModalSubmit,
            other => Self::Unknown(other),
        }
    }
}

impl From<InteractionType> for u8 {
    fn from(value: InteractionType) -> Self {
        match value {
            InteractionType::Ping => 1,
            InteractionType::ApplicationCommand => 2,
            InteractionType::MessageComponent => 3,
            InteractionType::ApplicationCommandAutocomplete => 4,
            InteractionType::ModalSubmit => 5,
            InteractionType::Unknown(other) => other,
        }
    }
}

/// Application command type: 1 = CHAT_INPUT (slash), 2 = USER, 3 = MESSAGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "u8", into = "u8")]
pub enum CommandType {
    ChatInput,
    User,
    Message,
    Other(u8),
}

impl From<u8> for CommandType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::ChatInput,
            2 => Self::User,
            3 => Self::Message,
            other => Self::Other(other),
        }
    }
}

impl From<CommandType> for u8 {
    fn from(value: CommandType) -> Self {
        match value {
            CommandType::ChatInput => 1,
            CommandType::User => 2,
            CommandType::Message => 3,
            CommandType::Other(other) => other,
        }
    }
}

impl Default for CommandType {
    fn default() -> Self {
        Self::ChatInput
    }
}

/// The `data` object of an interaction. Which fields are present depends on
/// the interaction type.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InteractionData {
    /// Command ID.
    pub id: Option<Snowflake>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<CommandType>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    pub resolved: Option<ResolvedData>,
    /// Target user / message of a context-menu command.
    pub target_id: Option<Snowflake>,
    pub guild_id: Option<Snowflake>,
    /// For components and modals: the developer-defined `custom_id`.
    pub custom_id: Option<String>,
    /// Component type (for MESSAGE_COMPONENT interactions).
    pub component_type: Option<u8>,
    /// Selected values from a select menu.
    #[serde(default)]
    pub values: Vec<String>,
    /// Modal submit components.
    #[serde(default)]
    pub components: Vec<Component>,
}

/// An option received with a command (possibly a nested subcommand).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandOption {
    pub name: String,
    /// 1=SUB_COMMAND, 2=SUB_COMMAND_GROUP, 3=STRING, 4=INTEGER, 5=BOOLEAN,
    /// 6=USER, 7=CHANNEL, 8=ROLE, 9=MENTIONABLE, 10=NUMBER, 11=ATTACHMENT
    #[serde(rename = "type")]
    pub kind: u8,
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub focused: bool,
}

impl CommandOption {
    pub fn is_subcommand(&self) -> bool {
        self.kind == 1 || self.kind == 2
    }
}

/// Objects referenced by ID in the command options.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResolvedData {
    #[serde(default)]
    pub users: HashMap<Snowflake, User>,
    #[serde(default)]
    pub members: HashMap<Snowflake, serde_json::Value>,
    #[serde(default)]
    pub roles: HashMap<Snowflake, serde_json::Value>,
    #[serde(default)]
    pub channels: HashMap<Snowflake, serde_json::Value>,
    #[serde(default)]
    pub messages: HashMap<Snowflake, Message>,
    #[serde(default)]
    pub attachments: HashMap<Snowflake, Attachment>,
}

// ---------------------------------------------------------------------------
// Interaction responses (what we send back)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: InteractionCallbackType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl InteractionResponse {
    pub fn new(kind: InteractionCallbackType) -> Self {
        Self { kind, data: None }
    }

    pub fn with_data(kind: InteractionCallbackType, data: serde_json::Value) -> Self {
        Self {
            kind,
            data: Some(data),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum InteractionCallbackType {
    Pong = 1,
    ChannelMessageWithSource = 4,
    DeferredChannelMessageWithSource = 5,
    DeferredUpdateMessage = 6,
    UpdateMessage = 7,
    ApplicationCommandAutocompleteResult = 8,
    Modal = 9,
}

// Hand-rolled so unknown values produce a readable error.
impl<'de> Deserialize<'de> for InteractionCallbackType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = u8::deserialize(deserializer)?;
        match v {
            1 => Ok(Self::Pong),
            4 => Ok(Self::ChannelMessageWithSource),
            5 => Ok(Self::DeferredChannelMessageWithSource),
            6 => Ok(Self::DeferredUpdateMessage),
            7 => Ok(Self::UpdateMessage),
            8 => Ok(Self::ApplicationCommandAutocompleteResult),
            9 => Ok(Self::Modal),
            _ => Err(serde::de::Error::custom(format!(
                "unknown InteractionCallbackType: {}",
                v
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound message body (initial responses, follow-ups and edits)
// ---------------------------------------------------------------------------

/// A file uploaded alongside a message.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContent {
    pub name: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

impl FileContent {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            content_type: None,
        }
    }
}

/// The content of a message sent or edited through an interaction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<Vec<Embed>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_mentions: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<Component>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
    /// Uploaded with the message as multipart parts; never part of the JSON.
    #[serde(skip)]
    pub files: Vec<FileContent>,
}

impl MessageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.get_or_insert_with(Vec::new).push(embed);
        self
    }

    pub fn component_row(mut self, row: Component) -> Self {
        self.components.get_or_insert_with(Vec::new).push(row);
        self
    }

    pub fn file(mut self, file: FileContent) -> Self {
        self.files.push(file);
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.flags = Some(self.flags.unwrap_or(0) | EPHEMERAL_FLAG);
        self
    }

    pub fn is_ephemeral(&self) -> bool {
        self.flags.unwrap_or(0) & EPHEMERAL_FLAG != 0
    }
}

impl From<&str> for MessageOptions {
    fn from(text: &str) -> Self {
        Self::new().content(text)
    }
}

impl From<String> for MessageOptions {
    fn from(text: String) -> Self {
        Self::new().content(text)
    }
}

/// A modal pop-up shown in response to a command or component.
#[derive(Debug, Clone, Serialize)]
pub struct ModalOptions {
    pub title: String,
    pub custom_id: String,
    pub components: Vec<Component>,
}

/// One suggestion returned from an autocomplete handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutocompleteChoice {
    pub name: String,
    pub value: serde_json::Value,
}

impl AutocompleteChoice {
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Components (buttons, select menus, action rows, text inputs)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Component {
    /// 1 = ActionRow, 2 = Button, 3 = StringSelect, 4 = TextInput,
    /// 5 = UserSelect, 6 = RoleSelect, 7 = MentionableSelect, 8 = ChannelSelect
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Button style: 1=Primary, 2=Secondary, 3=Success, 4=Danger, 5=Link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

/// Build an Action Row wrapping other components.
pub fn action_row(components: Vec<Component>) -> Component {
    Component {
        kind: 1,
        components,
        ..Default::default()
    }
}

/// Build a button component.
pub fn button(style: u8, label: impl Into<String>, custom_id: impl Into<String>) -> Component {
    Component {
        kind: 2,
        custom_id: Some(custom_id.into()),
        label: Some(label.into()),
        style: Some(style),
        ..Default::default()
    }
}

/// Build a text input for use inside a modal.
pub fn text_input(
    custom_id: impl Into<String>,
    label: impl Into<String>,
    style: u8, // 1 = Short, 2 = Paragraph
    required: bool,
) -> Component {
    Component {
        kind: 4,
        custom_id: Some(custom_id.into()),
        label: Some(label.into()),
        style: Some(style),
        required: Some(required),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Slash command registration payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationCommand {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Snowflake>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ApplicationCommandOption>,
    #[serde(rename = "type", default)]
    pub kind: CommandType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_member_permissions: Option<Permissions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationCommandOption {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub autocomplete: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<AutocompleteChoice>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ApplicationCommandOption>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_test::{assert_ser_tokens, Token};

    #[test]
    fn callback_type_serializes_as_integer() {
        assert_ser_tokens(&InteractionCallbackType::Pong, &[Token::U8(1)]);
        assert_ser_tokens(
            &InteractionCallbackType::DeferredUpdateMessage,
            &[Token::U8(6)],
        );
    }

    #[test]
    fn callback_type_rejects_unknown_values() {
        let err = serde_json::from_value::<InteractionCallbackType>(serde_json::json!(3));
        assert!(err.is_err());
    }

    #[test]
    fn unknown_interaction_type_is_preserved() {
        let kind: InteractionType = serde_json::from_value(serde_json::json!(42)).unwrap();
        assert_eq!(kind, InteractionType::Unknown(42));
        assert_eq!(serde_json::to_value(kind).unwrap(), serde_json::json!(42));
    }

    #[test]
    fn interaction_author_prefers_member_user() {
        let interaction: Interaction = serde_json::from_value(serde_json::json!({
            "id": "1",
            "application_id": "2",
            "type": 2,
            "token": "tok",
            "member": {
                "user": { "id": "10", "username": "member" },
                "roles": [],
                "permissions": "8"
            },
            "user": { "id": "11", "username": "user" }
        }))
        .unwrap();
        assert_eq!(interaction.author().unwrap().id, "10");
        let perms = interaction.member.unwrap().permissions.unwrap();
        assert!(perms.contains(Permissions::ADMINISTRATOR));
    }

    #[test]
    fn ephemeral_sets_flag_without_clobbering() {
        let mut opts = MessageOptions::new().content("hi");
        opts.flags = Some(4);
        let opts = opts.ephemeral();
        assert_eq!(opts.flags, Some(4 | EPHEMERAL_FLAG));
        assert!(opts.is_ephemeral());
    }

    #[test]
    fn message_options_skip_files_in_json() {
        let opts = MessageOptions::from("hello").file(FileContent::new("a.txt", b"abc".to_vec()));
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json, serde_json::json!({ "content": "hello" }));
    }

    #[test]
    fn action_row_wraps_buttons() {
        let row = action_row(vec![button(1, "Go", "go")]);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["type"], 1);
        assert_eq!(json["components"][0]["custom_id"], "go");
    }
}
