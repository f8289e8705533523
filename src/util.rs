//! Small helpers shared by the REST layer and the contexts.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Discord epoch (2015-01-01T00:00:00Z) in unix milliseconds.
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Unix-millis timestamp encoded in a snowflake.
pub fn snowflake_timestamp_ms(snowflake: &str) -> Option<u64> {
    snowflake
        .parse::<u64>()
        .ok()
        .map(|sf| (sf >> 22) + DISCORD_EPOCH_MS)
}

/// Build the smallest snowflake minted at `unix_ms`. Used in tests and to
/// reason about message age.
pub fn snowflake_from_timestamp_ms(unix_ms: u64) -> String {
    (unix_ms.saturating_sub(DISCORD_EPOCH_MS) << 22).to_string()
}

/// Current wall-clock time in unix milliseconds.
pub fn now_unix_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Random identifier for generated custom ids.
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Flatten Discord's nested validation error object into
/// `path.to.field: message` lines.
///
/// ```text
/// {"embeds": {"0": {"title": {"_errors": [{"code": "BASE_TYPE_REQUIRED", "message": "..."}]}}}}
/// ```
/// becomes `embeds[0].title: ...`.
pub fn flatten_errors(errors: &serde_json::Value) -> Vec<String> {
    let mut out = Vec::new();
    flatten_into(errors, String::new(), &mut out);
    out
}

fn flatten_into(value: &serde_json::Value, key: String, out: &mut Vec<String>) {
    let Some(map) = value.as_object() else {
        if let Some(text) = value.as_str() {
            out.push(text.to_string());
        }
        return;
    };

    if let (Some(code), Some(message)) = (map.get("code"), map.get("message")) {
        if let Some(message) = message.as_str() {
            let code = code
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| code.to_string());
            let line = if key.is_empty() {
                format!("{}: {}", code, message)
            } else {
                format!("{}[{}]: {}", key, code, message)
            };
            out.push(line);
            return;
        }
    }

    for (child_key, child) in map {
        let next_key = if child_key.starts_with('_') {
            key.clone()
        } else if key.is_empty() {
            child_key.clone()
        } else if child_key.parse::<u64>().is_ok() {
            format!("{}[{}]", key, child_key)
        } else {
            format!("{}.{}", key, child_key)
        };

        match child {
            serde_json::Value::String(text) => out.push(text.clone()),
            serde_json::Value::Array(items) if child_key == "_errors" => {
                for item in items {
                    flatten_into(item, next_key.clone(), out);
                }
            }
            other => flatten_into(other, next_key, out),
        }
    }
}
