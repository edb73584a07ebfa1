//! Call record and its child entities.
//!
//! A `Call` is the root document of one phone conversation: the message
//! history, the structured claim being filled, the reminders, and the
//! post-call outcome. Mutation helpers enforce the append-only message
//! discipline and claim-schema validation; versioning is asserted by the
//! store on save.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::{
    CallId, ClaimFieldType, EntityIdType, MessageAction, MessagePersona, MessageStyle, NextAction,
    PhoneNumber, ReminderOwner, Satisfaction, Timestamp, ValidationError,
};

// ============================================================================
// LANGUAGE
// ============================================================================

/// A language the bot can hold the conversation in, with the synthesis
/// voice bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageEntry {
    /// BCP 47 tag, e.g. "fr-FR"
    pub short_code: String,
    /// TTS voice name for this language
    pub voice: String,
    /// English names callers may use to ask for this language
    pub pronunciations_en: Vec<String>,
}

impl LanguageEntry {
    pub fn new(
        short_code: impl Into<String>,
        voice: impl Into<String>,
        pronunciations_en: Vec<String>,
    ) -> Self {
        Self {
            short_code: short_code.into(),
            voice: voice.into(),
            pronunciations_en,
        }
    }

    /// First English pronunciation, used in prompts.
    pub fn human_name(&self) -> &str {
        self.pronunciations_en
            .first()
            .map(String::as_str)
            .unwrap_or(&self.short_code)
    }
}

// ============================================================================
// CLAIM SCHEMA
// ============================================================================

/// One field of the per-call claim schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: ClaimFieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ClaimField {
    pub fn new(name: impl Into<String>, field_type: ClaimFieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Validate a raw value against a declared claim field type.
///
/// Accepted formats:
/// - `text`: anything non-empty
/// - `email`: `local@domain.tld`
/// - `datetime`: RFC 3339 or `YYYY-MM-DD HH:MM`
/// - `phone_number`: E.164
pub fn validate_claim_value(
    field: &ClaimField,
    value: &str,
) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidValue {
        field: field.name.clone(),
        reason: reason.to_string(),
    };

    if value.trim().is_empty() {
        return Err(invalid("value is empty"));
    }

    match field.field_type {
        ClaimFieldType::Text => Ok(()),
        ClaimFieldType::Email => {
            let (local, domain) = value.split_once('@').ok_or_else(|| invalid("missing @"))?;
            if local.is_empty() || domain.len() < 3 || !domain.contains('.') {
                return Err(invalid("malformed email address"));
            }
            Ok(())
        }
        ClaimFieldType::Datetime => {
            if chrono::DateTime::parse_from_rfc3339(value).is_ok()
                || chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").is_ok()
            {
                Ok(())
            } else {
                Err(invalid("expected RFC 3339 or YYYY-MM-DD HH:MM"))
            }
        }
        ClaimFieldType::PhoneNumber => PhoneNumber::parse(value)
            .map(|_| ())
            .map_err(|_| invalid("expected E.164 phone number")),
    }
}

// ============================================================================
// TOOL CALL
// ============================================================================

/// A structured request the LLM emitted, naming a registered tool.
///
/// Accumulated from stream deltas; `result` or `error` is filled once the
/// dispatch completes and is fed back to the model as a `tool` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-issued call id, echoed back in the tool result
    pub id: String,
    pub name: String,
    /// Raw argument JSON as emitted by the model (post-repair)
    pub arguments: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    /// The text fed back to the LLM for this call.
    pub fn outcome_text(&self) -> String {
        match (&self.result, &self.error) {
            (Some(result), _) => result.clone(),
            (None, Some(error)) => format!("Error: {error}"),
            (None, None) => String::new(),
        }
    }
}

// ============================================================================
// MESSAGE
// ============================================================================

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub created_at: Timestamp,
    #[serde(default = "MessageAction::default_talk")]
    pub action: MessageAction,
    pub persona: MessagePersona,
    pub content: String,
    #[serde(default)]
    pub style: MessageStyle,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl MessageAction {
    fn default_talk() -> Self {
        MessageAction::Talk
    }
}

impl Message {
    pub fn new(persona: MessagePersona, action: MessageAction, content: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            action,
            persona,
            content: content.into(),
            style: MessageStyle::None,
            tool_calls: Vec::new(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(MessagePersona::Human, MessageAction::Talk, content)
    }

    pub fn assistant(content: impl Into<String>, style: MessageStyle) -> Self {
        let mut message = Self::new(MessagePersona::Assistant, MessageAction::Talk, content);
        message.style = style;
        message
    }

    pub fn with_style(mut self, style: MessageStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

// ============================================================================
// REMINDER
// ============================================================================

/// A scheduled follow-up item attached to a Call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub created_at: Timestamp,
    pub title: String,
    pub description: String,
    pub due_at: Timestamp,
    pub owner: ReminderOwner,
}

impl Reminder {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        due_at: Timestamp,
        owner: ReminderOwner,
    ) -> Self {
        Self {
            created_at: Utc::now(),
            title: title.into(),
            description: description.into(),
            due_at,
            owner,
        }
    }
}

// ============================================================================
// POST-CALL OUTCOME
// ============================================================================

/// Decision recorded at call end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStep {
    pub action: NextAction,
    pub justification: String,
}

/// Post-call enrichment produced by the summary job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synthesis {
    pub short: String,
    pub long: String,
    pub satisfaction: Satisfaction,
    #[serde(default)]
    pub improvement_suggestions: String,
}

// ============================================================================
// CALL INITIATE
// ============================================================================

/// Immutable initialization block of a Call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInitiate {
    pub bot_name: String,
    pub bot_company: String,
    pub agent_phone_number: PhoneNumber,
    pub caller_phone_number: PhoneNumber,
    pub language_default: String,
    pub languages_available: Vec<LanguageEntry>,
    pub task_description: String,
    pub claim_schema: Vec<ClaimField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts_overrides: Option<BTreeMap<String, String>>,
}

impl CallInitiate {
    /// The declared schema plus the standard policyholder fields every
    /// claim carries.
    pub fn claim_schema_effective(&self) -> Vec<ClaimField> {
        let mut fields = self.claim_schema.clone();
        for standard in [
            ClaimField::new("policyholder_email", ClaimFieldType::Email)
                .with_description("Email of the customer"),
            ClaimField::new("policyholder_name", ClaimFieldType::Text)
                .with_description("First and last name of the customer"),
            ClaimField::new("policyholder_phone", ClaimFieldType::PhoneNumber)
                .with_description("Phone number of the customer"),
        ] {
            if !fields.iter().any(|f| f.name == standard.name) {
                fields.push(standard);
            }
        }
        fields
    }

    /// Resolve the default language entry; the first available entry is the
    /// last resort when the default tag is missing from the list.
    pub fn default_language(&self) -> Option<&LanguageEntry> {
        self.languages_available
            .iter()
            .find(|lang| lang.short_code == self.language_default)
            .or_else(|| self.languages_available.first())
    }
}

// ============================================================================
// CALL
// ============================================================================

/// Root entity of one phone conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub call_id: CallId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Optimistic-concurrency version; asserted and bumped by the store
    pub version: u64,
    pub initiate: CallInitiate,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub claim: BTreeMap<String, String>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<Synthesis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang_current_short_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_uri: Option<String>,
    /// Webhook callback authentication token, generated at creation
    pub callback_secret: String,
    /// Consecutive silent recognition timeouts
    #[serde(default)]
    pub recognition_retry: u32,
    /// Prosody rate, 0.75..=1.25
    #[serde(default = "default_voice_speed")]
    pub voice_speed: f32,
    /// Fingerprints of queue events already applied to this Call
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub processed_events: BTreeSet<String>,
}

fn default_voice_speed() -> f32 {
    1.0
}

impl Call {
    pub fn new(initiate: CallInitiate) -> Self {
        let now = Utc::now();
        Self {
            call_id: CallId::now_v7(),
            created_at: now,
            updated_at: now,
            version: 0,
            initiate,
            messages: Vec::new(),
            claim: BTreeMap::new(),
            reminders: Vec::new(),
            next: None,
            synthesis: None,
            lang_current_short_code: None,
            recording_uri: None,
            callback_secret: generate_callback_secret(),
            recognition_retry: 0,
            voice_speed: 1.0,
            processed_events: BTreeSet::new(),
        }
    }

    /// Whether the call leg is currently connected, computed from the most
    /// recent `call`/`hangup` marker in the history.
    pub fn in_progress(&self) -> bool {
        for message in self.messages.iter().rev() {
            match message.action {
                MessageAction::Call => return true,
                MessageAction::Hangup => return false,
                _ => {}
            }
        }
        false
    }

    /// The active language entry, falling back to the configured default.
    pub fn language(&self) -> &LanguageEntry {
        let default = self
            .initiate
            .default_language()
            .expect("languages_available must not be empty");
        match &self.lang_current_short_code {
            Some(code) => self
                .initiate
                .languages_available
                .iter()
                .find(|lang| &lang.short_code == code)
                .unwrap_or(default),
            None => default,
        }
    }

    /// Switch the conversation language; the code must be available.
    pub fn set_language(&mut self, short_code: &str) -> Result<(), ValidationError> {
        if !self
            .initiate
            .languages_available
            .iter()
            .any(|lang| lang.short_code == short_code)
        {
            return Err(ValidationError::LanguageNotAvailable {
                short_code: short_code.to_string(),
            });
        }
        self.lang_current_short_code = Some(short_code.to_string());
        Ok(())
    }

    /// Set a claim field after validating the name against the schema and
    /// the value against the declared type. Returns the previous value.
    pub fn set_claim_field(
        &mut self,
        name: &str,
        value: &str,
    ) -> Result<Option<String>, ValidationError> {
        let schema = self.initiate.claim_schema_effective();
        let field = schema
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ValidationError::UnknownClaimField {
                field: name.to_string(),
            })?;
        validate_claim_value(field, value)?;
        Ok(self.claim.insert(name.to_string(), value.to_string()))
    }

    /// Append a message; messages other than the trailing assistant turn
    /// are never rewritten.
    pub fn append_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Commit an assistant turn: amend the trailing assistant talk message
    /// if the turn is still being composed, otherwise append a new one.
    /// Amending replaces the spoken content but keeps earlier tool-call
    /// records of the same turn, extending them with the new ones.
    pub fn commit_assistant_turn(
        &mut self,
        content: String,
        style: MessageStyle,
        tool_calls: Vec<ToolCall>,
    ) {
        match self.messages.last_mut() {
            Some(last)
                if last.persona == MessagePersona::Assistant
                    && last.action == MessageAction::Talk =>
            {
                if !content.trim().is_empty() {
                    last.content = content.trim().to_string();
                }
                last.style = style;
                last.tool_calls.extend(tool_calls);
            }
            _ => {
                let message = Message::assistant(content.trim().to_string(), style)
                    .with_tool_calls(tool_calls);
                self.messages.push(message);
            }
        }
    }

    /// Drop the most recent human `talk`/`sms` message; used when the safety
    /// filter rejects the prompt it produced.
    pub fn remove_last_human_message(&mut self) -> Option<Message> {
        let index = self.messages.iter().rposition(|m| {
            m.persona == MessagePersona::Human
                && matches!(m.action, MessageAction::Talk | MessageAction::Sms)
        })?;
        Some(self.messages.remove(index))
    }

    /// Record an event fingerprint; returns false when it was already
    /// processed (duplicate delivery).
    pub fn mark_event_processed(&mut self, fingerprint: impl Into<String>) -> bool {
        self.processed_events.insert(fingerprint.into())
    }

    /// Record the end-of-call decision. Set exactly once.
    pub fn set_next(&mut self, next: NextStep) -> Result<(), ValidationError> {
        if self.next.is_some() {
            return Err(ValidationError::AlreadySet { field: "next" });
        }
        self.next = Some(next);
        Ok(())
    }

    /// Record the post-call synthesis. Set exactly once.
    pub fn set_synthesis(&mut self, synthesis: Synthesis) -> Result<(), ValidationError> {
        if self.synthesis.is_some() {
            return Err(ValidationError::AlreadySet { field: "synthesis" });
        }
        self.synthesis = Some(synthesis);
        Ok(())
    }

    /// Clamp and set the prosody rate.
    pub fn set_voice_speed(&mut self, speed: f32) -> f32 {
        self.voice_speed = speed.clamp(0.75, 1.25);
        self.voice_speed
    }
}

fn generate_callback_secret() -> String {
    let mut secret = String::with_capacity(32);
    secret.push_str(Uuid::new_v4().simple().to_string().as_str());
    secret.truncate(16);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initiate() -> CallInitiate {
        CallInitiate {
            bot_name: "Esperanza".to_string(),
            bot_company: "Contoso Insurance".to_string(),
            agent_phone_number: PhoneNumber::parse("+33699999999").unwrap(),
            caller_phone_number: PhoneNumber::parse("+33612345678").unwrap(),
            language_default: "fr-FR".to_string(),
            languages_available: vec![
                LanguageEntry::new("fr-FR", "fr-FR-VivienneMultilingualNeural", vec![
                    "French".to_string(),
                ]),
                LanguageEntry::new("en-US", "en-US-ShimmerTurboMultilingualNeural", vec![
                    "English".to_string(),
                ]),
            ],
            task_description: "Help the customer file an insurance claim".to_string(),
            claim_schema: vec![
                ClaimField::new("policy_number", ClaimFieldType::Text)
                    .with_description("Policy number of the customer"),
                ClaimField::new("incident_datetime", ClaimFieldType::Datetime),
            ],
            prompts_overrides: None,
        }
    }

    #[test]
    fn test_in_progress_follows_markers() {
        let mut call = Call::new(initiate());
        assert!(!call.in_progress());

        call.append_message(Message::new(
            MessagePersona::Human,
            MessageAction::Call,
            "",
        ));
        assert!(call.in_progress());

        call.append_message(Message::new(
            MessagePersona::Human,
            MessageAction::Hangup,
            "",
        ));
        assert!(!call.in_progress());
    }

    #[test]
    fn test_claim_field_unknown_name_rejected() {
        let mut call = Call::new(initiate());
        let err = call.set_claim_field("favorite_color", "blue").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownClaimField { .. }));
        assert!(call.claim.is_empty());
    }

    #[test]
    fn test_claim_field_type_checked() {
        let mut call = Call::new(initiate());
        assert!(call
            .set_claim_field("incident_datetime", "not a date")
            .is_err());
        assert!(call
            .set_claim_field("incident_datetime", "2024-02-01 18:58")
            .is_ok());
        assert!(call
            .set_claim_field("incident_datetime", "2024-02-01T18:58:00Z")
            .is_ok());
    }

    #[test]
    fn test_standard_policyholder_fields_accepted() {
        let mut call = Call::new(initiate());
        assert!(call
            .set_claim_field("policyholder_email", "mariejeanne@gmail.com")
            .is_ok());
        assert!(call
            .set_claim_field("policyholder_email", "not-an-email")
            .is_err());
        assert!(call
            .set_claim_field("policyholder_phone", "+33612345678")
            .is_ok());
    }

    #[test]
    fn test_language_switch_validated() {
        let mut call = Call::new(initiate());
        assert_eq!(call.language().short_code, "fr-FR");
        call.set_language("en-US").unwrap();
        assert_eq!(call.language().short_code, "en-US");
        assert!(call.set_language("de-DE").is_err());
    }

    #[test]
    fn test_commit_assistant_turn_amends_trailing() {
        let mut call = Call::new(initiate());
        call.append_message(Message::human("I want to file a claim"));
        call.commit_assistant_turn("Sure, ".to_string(), MessageStyle::None, vec![]);
        call.commit_assistant_turn(
            "Sure, let me help.".to_string(),
            MessageStyle::Cheerful,
            vec![],
        );
        assert_eq!(call.messages.len(), 2);
        assert_eq!(call.messages[1].content, "Sure, let me help.");
        assert_eq!(call.messages[1].style, MessageStyle::Cheerful);
    }

    #[test]
    fn test_commit_assistant_turn_keeps_tool_records_across_iterations() {
        let mut call = Call::new(initiate());
        call.append_message(Message::human("my policy is B01371946"));
        // First iteration carried only a tool call
        call.commit_assistant_turn(
            String::new(),
            MessageStyle::None,
            vec![ToolCall {
                id: "call_1".to_string(),
                name: "update_claim".to_string(),
                arguments: "{}".to_string(),
                result: Some("Updated".to_string()),
                error: None,
            }],
        );
        // Second iteration spoke the confirmation
        call.commit_assistant_turn("C'est noté.".to_string(), MessageStyle::None, vec![]);

        assert_eq!(call.messages.len(), 2);
        let turn = &call.messages[1];
        assert_eq!(turn.content, "C'est noté.");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "update_claim");
    }

    #[test]
    fn test_commit_assistant_turn_never_amends_sms() {
        let mut call = Call::new(initiate());
        call.append_message(Message::human("text me the reference"));
        call.append_message(Message::new(
            MessagePersona::Assistant,
            MessageAction::Sms,
            "Ref: B01371946",
        ));
        call.commit_assistant_turn("I sent it.".to_string(), MessageStyle::None, vec![]);
        assert_eq!(call.messages.len(), 3);
        assert_eq!(call.messages[1].content, "Ref: B01371946");
        assert_eq!(call.messages[2].content, "I sent it.");
    }

    #[test]
    fn test_commit_assistant_turn_appends_after_human() {
        let mut call = Call::new(initiate());
        call.append_message(Message::human("hello"));
        call.commit_assistant_turn("hi".to_string(), MessageStyle::None, vec![]);
        call.append_message(Message::human("next question"));
        call.commit_assistant_turn("answer".to_string(), MessageStyle::None, vec![]);
        assert_eq!(call.messages.len(), 4);
    }

    #[test]
    fn test_event_fingerprint_dedup() {
        let mut call = Call::new(initiate());
        assert!(call.mark_event_processed("evt-1"));
        assert!(!call.mark_event_processed("evt-1"));
        assert!(call.mark_event_processed("evt-2"));
    }

    #[test]
    fn test_next_and_synthesis_set_once() {
        let mut call = Call::new(initiate());
        call.set_next(NextStep {
            action: NextAction::CaseClosed,
            justification: "all fields collected".to_string(),
        })
        .unwrap();
        let err = call
            .set_next(NextStep {
                action: NextAction::CallBack,
                justification: "again".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, ValidationError::AlreadySet { field: "next" }));
    }

    #[test]
    fn test_voice_speed_clamped() {
        let mut call = Call::new(initiate());
        assert_eq!(call.set_voice_speed(2.0), 1.25);
        assert_eq!(call.set_voice_speed(0.1), 0.75);
        assert_eq!(call.set_voice_speed(1.1), 1.1);
    }

    #[test]
    fn test_remove_last_human_skips_markers() {
        let mut call = Call::new(initiate());
        call.append_message(Message::new(
            MessagePersona::Human,
            MessageAction::Call,
            "",
        ));
        call.append_message(Message::human("rude words"));
        call.append_message(Message::assistant("reply", MessageStyle::None));
        let removed = call.remove_last_human_message().unwrap();
        assert_eq!(removed.content, "rude words");
        // The lifecycle marker is not a candidate
        assert!(call.remove_last_human_message().is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let mut call = Call::new(initiate());
        call.append_message(Message::human("bonjour"));
        call.set_claim_field("policy_number", "B01371946").unwrap();
        let json = serde_json::to_string(&call).unwrap();
        let parsed: Call = serde_json::from_str(&json).unwrap();
        assert_eq!(call, parsed);
    }
}
