//! System messages.
//!
//! A text sub-protocol carried inside chat-like packets:
//! `@<id>` followed by `\v<key>\v<value>` pairs. `<id>` is either a literal
//! colon-namespaced name (`@dungeon:123`) or a decimal code resolved
//! through the protocol's system message table.

use crate::error::{ProxyError, Result};
use crate::protocol::codec::SysmsgMap;

const PREFIX: char = '@';
const SEPARATOR: char = '\u{000B}';

/// A parsed system message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemMessage {
    /// Resolved name, or the literal namespaced identifier
    pub id: String,
    /// Key/value tokens in wire order
    pub tokens: Vec<(String, String)>,
}

impl SystemMessage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tokens: Vec::new(),
        }
    }

    /// Append a token, returning the message for chaining
    pub fn token(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tokens.push((key.into(), value.into()));
        self
    }

    /// First value stored under `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a raw system message string
pub fn parse(message: &str, map: &SysmsgMap) -> Result<SystemMessage> {
    let Some(body) = message.strip_prefix(PREFIX) else {
        return Err(ProxyError::MalformedMessage(format!(
            "expected '@' in \"{message}\""
        )));
    };

    let mut parts = body.split(SEPARATOR);
    let raw_id = parts.next().unwrap_or("");

    let id = if raw_id.contains(':') {
        raw_id.to_string()
    } else {
        raw_id
            .parse::<u32>()
            .ok()
            .and_then(|code| map.name(code))
            .map(str::to_string)
            .ok_or_else(|| {
                ProxyError::UnmappedMessage(format!("{raw_id} (\"{message}\")"))
            })?
    };

    let rest: Vec<&str> = parts.collect();
    // A dangling key without a value is dropped
    let tokens = rest
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].to_string()))
        .collect();

    Ok(SystemMessage { id, tokens })
}

/// Build the wire string for a system message
pub fn build(message: &SystemMessage, map: &SysmsgMap) -> Result<String> {
    if message.id.is_empty() {
        return Err(ProxyError::InvalidArgument("message id is required".into()));
    }

    let id = if message.id.contains(':') {
        message.id.clone()
    } else {
        map.code(&message.id)
            .map(|code| code.to_string())
            .ok_or_else(|| {
                ProxyError::UnmappedMessage(format!("unknown system message \"{}\"", message.id))
            })?
    };

    let mut out = String::with_capacity(1 + id.len() + message.tokens.len() * 8);
    out.push(PREFIX);
    out.push_str(&id);
    for (key, value) in &message.tokens {
        out.push(SEPARATOR);
        out.push_str(key);
        out.push(SEPARATOR);
        out.push_str(value);
    }
    Ok(out)
}
