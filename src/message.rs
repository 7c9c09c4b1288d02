use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;
use parse_display::Display;
use serde::{Deserialize, Serialize};

use crate::{Result, Value};

#[cfg(test)]
mod tests;

/// Action name of sub-messages that assign a reactive variable directly.
pub const REACTIVE_ACTION: &str = "_reactive";

/// A batch of sub-messages received from the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Inbound {
    pub messages: Vec<SubMessage>,
}

impl Inbound {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawSubMessage")]
pub enum SubMessage {
    Action {
        component: String,
        action: String,
        params: Option<Params>,
    },
    Reactive {
        component: String,
        name: String,
        value: serde_json::Value,
    },
}

impl SubMessage {
    pub fn action(component: impl Into<String>, action: impl Into<String>) -> Self {
        SubMessage::Action {
            component: component.into(),
            action: action.into(),
            params: None,
        }
    }
    pub fn action_with_params(
        component: impl Into<String>,
        action: impl Into<String>,
        params: &str,
    ) -> Self {
        SubMessage::Action {
            component: component.into(),
            action: action.into(),
            params: Some(Params::decode(params)),
        }
    }
    pub fn reactive(
        component: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        SubMessage::Reactive {
            component: component.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn component(&self) -> &str {
        match self {
            SubMessage::Action { component, .. } | SubMessage::Reactive { component, .. } => {
                component
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSubMessage {
    component: String,
    action: String,
    #[serde(default)]
    params: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    value: serde_json::Value,
}

impl TryFrom<RawSubMessage> for SubMessage {
    type Error = String;

    fn try_from(raw: RawSubMessage) -> std::result::Result<Self, Self::Error> {
        if raw.action == REACTIVE_ACTION {
            let name = raw
                .name
                .ok_or_else(|| format!("`{REACTIVE_ACTION}` message without `name`"))?;
            Ok(SubMessage::Reactive {
                component: raw.component,
                name,
                value: raw.value,
            })
        } else {
            Ok(SubMessage::Action {
                component: raw.component,
                action: raw.action,
                params: raw.params.as_deref().map(Params::decode),
            })
        }
    }
}

/// Action parameters decoded from a flat `key=value&...` string.
///
/// A repeated key keeps its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(IndexMap<String, String>);

impl Params {
    pub fn decode(encoded: &str) -> Self {
        Self(
            url::form_urlencoded::parse(encoded.as_bytes())
                .into_owned()
                .collect(),
        )
    }
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
    /// Parses the value of `key`, returning `None` if it is missing or malformed.
    pub fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key)?.parse().ok()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Converts to a tracked map of strings.
    pub fn to_value(&self) -> Value {
        Value::map(self.iter())
    }
}
impl<'de> Deserialize<'de> for Params {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(d)?;
        Ok(Params::decode(&encoded))
    }
}
impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[display(style = "lowercase")]
pub enum Status {
    Subscribed,
    Destroyed,
}

/// Payload sent to one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Render { render: Vec<Option<String>> },
    Status { status: Status },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub component: String,
    #[serde(flatten)]
    pub payload: Outbound,
}

impl Envelope {
    pub fn new(component: impl Into<String>, payload: Outbound) -> Self {
        Self {
            component: component.into(),
            payload,
        }
    }
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Receives envelopes produced by a session.
pub trait Outbox {
    fn send(&mut self, envelope: Envelope);
}
impl<F: FnMut(Envelope)> Outbox for F {
    fn send(&mut self, envelope: Envelope) {
        self(envelope)
    }
}

/// An [`Outbox`] that queues envelopes until they are taken.
///
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct Mailbox(Rc<RefCell<Vec<Envelope>>>);

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn take(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
impl Outbox for Mailbox {
    fn send(&mut self, envelope: Envelope) {
        self.0.borrow_mut().push(envelope);
    }
}
