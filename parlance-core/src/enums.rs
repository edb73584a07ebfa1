//! Enumerations shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an enum from its string representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub input: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.input)
    }
}

impl std::error::Error for EnumParseError {}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($(#[$vmeta:meta])* $variant:ident => $repr:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Convert to the canonical string representation.
            pub fn as_db_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $repr),+
                }
            }

            /// Parse from the canonical string representation.
            pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
                match s {
                    $($repr => Ok(Self::$variant),)+
                    _ => Err(EnumParseError { kind: $kind, input: s.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_db_str())
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_db_str(s)
            }
        }
    };
}

string_enum!(
    /// What a message records: lifecycle markers and channel of the content.
    MessageAction, "message action", {
        /// Call leg connected
        Call => "call",
        /// Call leg disconnected
        Hangup => "hangup",
        /// Spoken utterance
        Talk => "talk",
        /// Text message
        Sms => "sms",
        /// Transfer to a human agent
        Transfer => "transfer",
        /// Internal annotation, never spoken
        Note => "note",
    }
);

string_enum!(
    /// Who authored a message.
    MessagePersona, "message persona", {
        Human => "human",
        Assistant => "assistant",
        Tool => "tool",
        System => "system",
    }
);

string_enum!(
    /// Emotional style applied to synthesized speech.
    MessageStyle, "message style", {
        None => "none",
        Cheerful => "cheerful",
        Sad => "sad",
    }
);

impl Default for MessageStyle {
    fn default() -> Self {
        Self::None
    }
}

string_enum!(
    /// Declared type of a claim field; values are validated against it.
    ClaimFieldType, "claim field type", {
        Text => "text",
        Email => "email",
        Datetime => "datetime",
        PhoneNumber => "phone_number",
    }
);

string_enum!(
    /// What should happen after the call ends.
    NextAction, "next action", {
        CaseClosed => "case_closed",
        CaseEscalated => "case_escalated",
        CallBack => "call_back",
        Silence => "silence",
    }
);

string_enum!(
    /// Caller satisfaction estimated post-call.
    Satisfaction, "satisfaction", {
        Low => "low",
        Medium => "medium",
        High => "high",
        Unknown => "unknown",
    }
);

string_enum!(
    /// Who owns a reminder.
    ReminderOwner, "reminder owner", {
        Assistant => "assistant",
        Human => "human",
    }
);

string_enum!(
    /// LLM model tier for a completion.
    ModelTier, "model tier", {
        /// Low latency, shorter context
        Fast => "fast",
        /// Higher quality, larger context
        Slow => "slow",
    }
);

impl ModelTier {
    /// The tier used when this one is exhausted.
    pub fn fallback(&self) -> Self {
        match self {
            Self::Fast => Self::Slow,
            Self::Slow => Self::Fast,
        }
    }
}

string_enum!(
    /// Named work queues.
    QueueName, "queue name", {
        CallEvents => "call_events",
        SmsEvents => "sms_events",
        PostCall => "post_call",
        Training => "training",
    }
);

string_enum!(
    /// Kind of background job dispatched after a call closes.
    JobKind, "job kind", {
        /// Synthesis + SMS report
        PostCall => "post_call",
        /// Q/A pair extraction for retrieval
        Training => "training",
    }
);

string_enum!(
    /// Media lifecycle events reported by the telephony gateway.
    MediaEventKind, "media event kind", {
        Connected => "connected",
        Hangup => "hangup",
        Transferred => "transferred",
        RecordingStarted => "recording_started",
        RecordingStopped => "recording_stopped",
    }
);
