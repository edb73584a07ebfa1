//! LLM-callable tools.
//!
//! The registry produces the serializable tool descriptions the driver
//! sends with every completion, and dispatches assembled tool calls against
//! the Call. Every tool carries a `customer_response` phrase that is spoken
//! as the acknowledgment cue before the effect is reported back to the
//! model. Failures never panic; they become error results the model can
//! react to.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use parlance_core::{
    Call, MessageStyle, Reminder, ReminderOwner, Timestamp, ToolCall, ToolError,
};
use parlance_llm::ToolSpec;
use parlance_media::{SearchHit, SmsSender, VectorSearch};

/// Spoken acknowledgment cues flow through this channel into the response
/// pipeline.
pub type CueSender = mpsc::Sender<(String, MessageStyle)>;

/// How the orchestrator must proceed after a tool ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolControl {
    /// Keep the conversation going
    Continue,
    /// Speak the closing phrase and hang up
    EndCall,
    /// Speak the transfer phrase and connect the agent number
    TransferToAgent,
    /// Finalize this Call and begin a fresh one for the same caller
    NewClaim,
}

/// Result of one tool dispatch.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Text fed back to the model as the tool result
    pub result: String,
    pub control: ToolControl,
    /// Retrieval hits to inject into the next completion
    pub rag_hits: Vec<SearchHit>,
}

impl ToolOutcome {
    fn ok(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            control: ToolControl::Continue,
            rag_hits: Vec::new(),
        }
    }
}

// ============================================================================
// ARGUMENTS
// ============================================================================

fn default_response() -> String {
    String::new()
}

#[derive(Debug, Deserialize)]
struct UpdateClaimArgs {
    #[serde(default = "default_response")]
    customer_response: String,
    field: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct NewClaimArgs {
    #[serde(default = "default_response")]
    customer_response: String,
}

#[derive(Debug, Deserialize)]
struct NewReminderArgs {
    #[serde(default = "default_response")]
    customer_response: String,
    title: String,
    description: String,
    due_at: String,
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdatedReminderArgs {
    #[serde(default = "default_response")]
    customer_response: String,
    index: usize,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    due_at: Option<String>,
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchDocumentsArgs {
    #[serde(default = "default_response")]
    customer_response: String,
    query: String,
}

#[derive(Debug, Deserialize)]
struct SendSmsArgs {
    #[serde(default = "default_response")]
    customer_response: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChangeLanguageArgs {
    #[serde(default = "default_response")]
    customer_response: String,
    lang: String,
}

#[derive(Debug, Deserialize)]
struct ChangeSpeechSpeedArgs {
    #[serde(default = "default_response")]
    customer_response: String,
    speed: f32,
}

fn parse_args<'a, T: Deserialize<'a>>(name: &str, raw: &'a str) -> Result<T, ToolError> {
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn parse_due_at(name: &str, raw: &str) -> Result<Timestamp, ToolError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M") {
        return Ok(naive.and_utc());
    }
    Err(ToolError::InvalidArguments {
        name: name.to_string(),
        reason: format!("due_at not a datetime: {raw}"),
    })
}

fn parse_owner(raw: Option<&str>) -> ReminderOwner {
    match raw.map(str::trim) {
        Some("assistant") => ReminderOwner::Assistant,
        // "customer", "contact", third parties: the human side owns it
        _ => ReminderOwner::Human,
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// The built-in tool surface.
pub struct ToolRegistry {
    sms: Arc<dyn SmsSender>,
    search: Arc<dyn VectorSearch>,
    /// Top-k retrieval depth for `search_documents`
    search_k: usize,
}

impl ToolRegistry {
    pub fn new(sms: Arc<dyn SmsSender>, search: Arc<dyn VectorSearch>) -> Self {
        Self {
            sms,
            search,
            search_k: 5,
        }
    }

    /// Serializable descriptions for the completion request. Field and
    /// language enumerations are derived from the Call so the model only
    /// sees what this conversation can accept.
    pub fn specs(&self, call: &Call) -> Vec<ToolSpec> {
        let field_list = call
            .initiate
            .claim_schema_effective()
            .iter()
            .map(|field| match &field.description {
                Some(description) => format!("- '{}': {}", field.name, description),
                None => format!("- '{}'", field.name),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let language_list = call
            .initiate
            .languages_available
            .iter()
            .map(|lang| format!("- {} ({})", lang.short_code, lang.human_name()))
            .collect::<Vec<_>>()
            .join("\n");

        let response_schema = || {
            serde_json::json!({
                "type": "string",
                "description": "Phrase spoken to the customer to confirm the action, in the customer's language, one short sentence in the present tense.",
            })
        };

        vec![
            ToolSpec {
                name: "update_claim".to_string(),
                description: format!(
                    "Store one claim field the customer provided. Dates use YYYY-MM-DD HH:MM, phone numbers use E164.\nAvailable fields:\n{field_list}"
                ),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "customer_response": response_schema(),
                        "field": { "type": "string", "description": "Name of the claim field to update." },
                        "value": { "type": "string", "description": "New value for the field." },
                    },
                    "required": ["customer_response", "field", "value"],
                }),
            },
            ToolSpec {
                name: "new_claim".to_string(),
                description: "Finalize the current claim and start a fresh one. Only with the customer's explicit approval, when the subject is totally different.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": { "customer_response": response_schema() },
                    "required": ["customer_response"],
                }),
            },
            ToolSpec {
                name: "talk_to_human".to_string(),
                description: "Transfer the customer to a human agent. Requires the customer's explicit verbal request.".to_string(),
                parameters: serde_json::json!({ "type": "object", "properties": {} }),
            },
            ToolSpec {
                name: "end_call".to_string(),
                description: "Hang up for everyone. Requires the customer's explicit verbal confirmation that the conversation is over.".to_string(),
                parameters: serde_json::json!({ "type": "object", "properties": {} }),
            },
            ToolSpec {
                name: "new_reminder".to_string(),
                description: "Create a follow-up reminder. Titles are short 'Verb + Subject' phrases in English; the due date must be in the future.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "customer_response": response_schema(),
                        "title": { "type": "string", "description": "Short unique title, e.g. 'Call back customer'." },
                        "description": { "type": "string", "description": "Detailed description in English." },
                        "due_at": { "type": "string", "description": "Due datetime, ISO format or YYYY-MM-DD HH:MM." },
                        "owner": { "type": "string", "description": "'assistant' or 'human'." },
                    },
                    "required": ["customer_response", "title", "description", "due_at"],
                }),
            },
            ToolSpec {
                name: "updated_reminder".to_string(),
                description: "Update an existing reminder by its position in the reminder list.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "customer_response": response_schema(),
                        "index": { "type": "integer", "description": "Zero-based position of the reminder to update." },
                        "title": { "type": "string" },
                        "description": { "type": "string" },
                        "due_at": { "type": "string" },
                        "owner": { "type": "string" },
                    },
                    "required": ["customer_response", "index"],
                }),
            },
            ToolSpec {
                name: "search_documents".to_string(),
                description: "Search internal documents (contracts, procedures, regulations) for information you do not have.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "customer_response": response_schema(),
                        "query": { "type": "string", "description": "Search query in English, as specific as possible." },
                    },
                    "required": ["customer_response", "query"],
                }),
            },
            ToolSpec {
                name: "send_sms".to_string(),
                description: "Send a text message to the customer's phone, e.g. to confirm a reference number in writing.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "customer_response": response_schema(),
                        "text": { "type": "string", "description": "Message body." },
                    },
                    "required": ["customer_response", "text"],
                }),
            },
            ToolSpec {
                name: "change_language".to_string(),
                description: format!(
                    "Switch the conversation language when the customer asks for it.\nAvailable short codes:\n{language_list}"
                ),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "customer_response": response_schema(),
                        "lang": { "type": "string", "description": "Language short code, e.g. 'en-US'." },
                    },
                    "required": ["customer_response", "lang"],
                }),
            },
            ToolSpec {
                name: "change_speech_speed".to_string(),
                description: "Change the voice speed when the customer finds it too fast or too slow.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "customer_response": response_schema(),
                        "speed": { "type": "number", "description": "New speed between 0.75 and 1.25, 1.0 is normal." },
                    },
                    "required": ["customer_response", "speed"],
                }),
            },
        ]
    }

    /// Dispatch one assembled tool call against the Call.
    ///
    /// Claim and reminder mutations run on the borrowed Call and therefore
    /// serialize; the acknowledgment cue is queued for speech before the
    /// effect executes.
    pub async fn invoke(
        &self,
        call: &mut Call,
        invocation: &ToolCall,
        style: MessageStyle,
        cues: &CueSender,
    ) -> Result<ToolOutcome, ToolError> {
        let name = invocation.name.as_str();
        tracing::debug!(tool = name, args = %invocation.arguments, "dispatching tool");
        match name {
            "update_claim" => {
                let args: UpdateClaimArgs = parse_args(name, &invocation.arguments)?;
                let previous = call
                    .set_claim_field(&args.field, &args.value)
                    .map_err(|e| ToolError::InvalidArguments {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?;
                speak(cues, &args.customer_response, style).await;
                let result = match previous {
                    Some(old) => format!(
                        "Updated claim field \"{}\" with value \"{}\" (was \"{old}\").",
                        args.field, args.value
                    ),
                    None => format!(
                        "Updated claim field \"{}\" with value \"{}\".",
                        args.field, args.value
                    ),
                };
                Ok(ToolOutcome::ok(result))
            }
            "new_claim" => {
                let args: NewClaimArgs = parse_args(name, &invocation.arguments)?;
                speak(cues, &args.customer_response, style).await;
                Ok(ToolOutcome {
                    result: "Claim, reminders and messages reset".to_string(),
                    control: ToolControl::NewClaim,
                    rag_hits: Vec::new(),
                })
            }
            "talk_to_human" => Ok(ToolOutcome {
                result: "Transferring to a human agent".to_string(),
                control: ToolControl::TransferToAgent,
                rag_hits: Vec::new(),
            }),
            "end_call" => Ok(ToolOutcome {
                result: "Call ended".to_string(),
                control: ToolControl::EndCall,
                rag_hits: Vec::new(),
            }),
            "new_reminder" => {
                let args: NewReminderArgs = parse_args(name, &invocation.arguments)?;
                let due_at = parse_due_at(name, &args.due_at)?;
                if call.reminders.iter().any(|r| r.title == args.title) {
                    return Err(ToolError::InvalidArguments {
                        name: name.to_string(),
                        reason: format!(
                            "a reminder titled \"{}\" already exists, use updated_reminder",
                            args.title
                        ),
                    });
                }
                speak(cues, &args.customer_response, style).await;
                call.reminders.push(Reminder::new(
                    args.title.clone(),
                    args.description,
                    due_at,
                    parse_owner(args.owner.as_deref()),
                ));
                Ok(ToolOutcome::ok(format!("Reminder \"{}\" created.", args.title)))
            }
            "updated_reminder" => {
                let args: UpdatedReminderArgs = parse_args(name, &invocation.arguments)?;
                let due_at = args
                    .due_at
                    .as_deref()
                    .map(|raw| parse_due_at(name, raw))
                    .transpose()?;
                let count = call.reminders.len();
                let reminder = call.reminders.get_mut(args.index).ok_or_else(|| {
                    ToolError::InvalidArguments {
                        name: name.to_string(),
                        reason: format!("index {} out of range, {count} reminders exist", args.index),
                    }
                })?;
                if let Some(title) = args.title {
                    reminder.title = title;
                }
                if let Some(description) = args.description {
                    reminder.description = description;
                }
                if let Some(due_at) = due_at {
                    reminder.due_at = due_at;
                }
                if args.owner.is_some() {
                    reminder.owner = parse_owner(args.owner.as_deref());
                }
                let title = reminder.title.clone();
                speak(cues, &args.customer_response, style).await;
                Ok(ToolOutcome::ok(format!("Reminder \"{title}\" updated.")))
            }
            "search_documents" => {
                let args: SearchDocumentsArgs = parse_args(name, &invocation.arguments)?;
                speak(cues, &args.customer_response, style).await;
                let hits = self
                    .search
                    .search(&args.query, self.search_k)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?;
                let result = if hits.is_empty() {
                    "No documents found.".to_string()
                } else {
                    let mut text = String::from("# Search results");
                    for hit in &hits {
                        text.push_str(&format!("\n- {}", hit.snippet));
                    }
                    text
                };
                Ok(ToolOutcome {
                    result,
                    control: ToolControl::Continue,
                    rag_hits: hits,
                })
            }
            "send_sms" => {
                let args: SendSmsArgs = parse_args(name, &invocation.arguments)?;
                speak(cues, &args.customer_response, style).await;
                self.sms
                    .send(&call.initiate.caller_phone_number, &args.text)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?;
                call.append_message(parlance_core::Message::new(
                    parlance_core::MessagePersona::Assistant,
                    parlance_core::MessageAction::Sms,
                    args.text,
                ));
                Ok(ToolOutcome::ok("SMS sent"))
            }
            "change_language" => {
                let args: ChangeLanguageArgs = parse_args(name, &invocation.arguments)?;
                let previous = call.language().short_code.clone();
                call.set_language(&args.lang)
                    .map_err(|e| ToolError::InvalidArguments {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })?;
                // Confirmation is spoken in the newly selected language
                speak(cues, &args.customer_response, style).await;
                Ok(ToolOutcome::ok(format!(
                    "Voice language set to {} (was {previous})",
                    args.lang
                )))
            }
            "change_speech_speed" => {
                let args: ChangeSpeechSpeedArgs = parse_args(name, &invocation.arguments)?;
                let previous = call.voice_speed;
                let applied = call.set_voice_speed(args.speed);
                speak(cues, &args.customer_response, style).await;
                Ok(ToolOutcome::ok(format!(
                    "Voice speed set to {applied} (was {previous})"
                )))
            }
            _ => Err(ToolError::UnknownTool {
                name: name.to_string(),
            }),
        }
    }
}

async fn speak(cues: &CueSender, text: &str, style: MessageStyle) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    if cues.send((text.to_string(), style)).await.is_err() {
        tracing::debug!("cue channel closed, acknowledgment dropped");
    }
}
