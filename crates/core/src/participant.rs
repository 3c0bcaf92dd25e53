//! Remote participant a session is started for

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the participant is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    #[default]
    Standard,
    /// Phone call bridged over SIP
    Sip,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Participant {
    pub identity: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: ParticipantKind,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Participant {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }

    pub fn sip(identity: impl Into<String>) -> Self {
        Self {
            kind: ParticipantKind::Sip,
            ..Self::new(identity)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_telephony(&self) -> bool {
        self.kind == ParticipantKind::Sip
    }
}
