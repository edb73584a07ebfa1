//! Prompt assembly.
//!
//! A pure function of the Call and the turn context: system templates with
//! placeholder substitution, the history window, and the RAG block when the
//! turn produced search results. Canned spoken phrases live here too, so
//! every user-audible string has one home.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use parlance_core::{Call, MessagePersona, MessageStyle};
use parlance_llm::{window_messages, ChatMessage, ToolSpec, WireToolCall};
use parlance_media::SearchHit;

// ============================================================================
// TEMPLATES
// ============================================================================

const DEFAULT_SYSTEM_TPL: &str = "\
Assistant is called {bot_name} and is working in a call center for the company {bot_company} as an expert with 20 years of experience.
Today is {date}. The customer is calling from {phone_number}. The call center number is {bot_phone_number}.
Always answer in {default_lang}. Keep sentences short, this is a phone call.";

const CHAT_SYSTEM_TPL: &str = "\
Your task is: {task}
Answer the customer directly, one step at a time, and use the tools to store what you learn.
Never invent claim data; ask instead.

Current claim:
{claim}

Current reminders:
{reminders}";

const RAG_SYSTEM_TPL: &str = "\
Internal documents retrieved for this turn. Use them when relevant, do not quote them verbatim:
{documents}";

/// Canned user-audible phrases. The caller never hears raw error text,
/// only one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub hello: String,
    pub still_working: String,
    pub apology: String,
    pub goodbye: String,
    pub transfer_coming: String,
    pub re_engage: String,
    pub sms_received: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            hello: "Hello, I am {bot_name} from {bot_company}! How can I help you today?"
                .to_string(),
            still_working: "I am still working on it, one moment please.".to_string(),
            apology: "I am sorry, I ran into a technical issue. Could you repeat that?"
                .to_string(),
            goodbye: "Thank you for calling {bot_company}. Goodbye!".to_string(),
            transfer_coming: "I am connecting you to an agent now, please hold.".to_string(),
            re_engage: "Are you still there? I did not hear anything.".to_string(),
            sms_received: "I received your message, let me read it.".to_string(),
        }
    }
}

impl PromptSet {
    /// Apply per-call overrides from the initiate block.
    pub fn with_overrides(mut self, overrides: Option<&BTreeMap<String, String>>) -> Self {
        let Some(overrides) = overrides else {
            return self;
        };
        for (key, value) in overrides {
            match key.as_str() {
                "hello" => self.hello = value.clone(),
                "still_working" => self.still_working = value.clone(),
                "apology" => self.apology = value.clone(),
                "goodbye" => self.goodbye = value.clone(),
                "transfer_coming" => self.transfer_coming = value.clone(),
                "re_engage" => self.re_engage = value.clone(),
                "sms_received" => self.sms_received = value.clone(),
                other => tracing::debug!(key = other, "ignoring unknown prompt override"),
            }
        }
        self
    }

    /// Substitute call placeholders in a phrase.
    pub fn render(&self, phrase: &str, call: &Call) -> String {
        substitute(phrase, call, Utc::now())
    }
}

// ============================================================================
// ASSEMBLER
// ============================================================================

/// What the current turn contributes to the prompt.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    /// Stable "today" for the whole turn, keeping assembly pure
    pub today: Option<DateTime<Utc>>,
    /// Hits produced by `search_documents` in this turn
    pub rag_hits: Vec<SearchHit>,
}

/// Pure prompt assembler.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    context_window: usize,
    max_completion_tokens: usize,
}

impl PromptAssembler {
    pub fn new(context_window: usize, max_completion_tokens: usize) -> Self {
        Self {
            context_window,
            max_completion_tokens,
        }
    }

    /// Build the ordered message list for one completion.
    pub fn assemble(
        &self,
        call: &Call,
        ctx: &TurnContext,
        tools: &[ToolSpec],
    ) -> Vec<ChatMessage> {
        let today = ctx.today.unwrap_or_else(Utc::now);
        let mut system = vec![
            ChatMessage::system(substitute(DEFAULT_SYSTEM_TPL, call, today)),
            ChatMessage::system(substitute(CHAT_SYSTEM_TPL, call, today)),
        ];
        if !ctx.rag_hits.is_empty() {
            let documents = ctx
                .rag_hits
                .iter()
                .map(|hit| format!("- {}", normalize_whitespace(&hit.snippet)))
                .collect::<Vec<_>>()
                .join("\n");
            system.push(ChatMessage::system(
                RAG_SYSTEM_TPL.replace("{documents}", &documents),
            ));
        }

        let history = render_history(call);
        window_messages(
            self.context_window,
            self.max_completion_tokens,
            &system,
            &history,
            tools,
        )
    }
}

/// Render the persisted history in wire form. Human and assistant contents
/// carry `action=`/`style=` prefixes so the model can track the channel;
/// tool messages follow the assistant message that requested them.
fn render_history(call: &Call) -> Vec<ChatMessage> {
    let mut rendered = Vec::with_capacity(call.messages.len());
    for message in &call.messages {
        let content = normalize_whitespace(&message.content);
        match message.persona {
            MessagePersona::Human => {
                rendered.push(ChatMessage::user(format!(
                    "action={} {}",
                    message.action.as_db_str(),
                    content
                )));
            }
            MessagePersona::Assistant => {
                let mut chat = ChatMessage::assistant(format!(
                    "action={} style={} {}",
                    message.action.as_db_str(),
                    message.style.as_db_str(),
                    content
                ));
                chat.tool_calls = message
                    .tool_calls
                    .iter()
                    .map(|call| WireToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .collect();
                rendered.push(chat);
                for tool_call in &message.tool_calls {
                    rendered.push(ChatMessage::tool(
                        tool_call.id.clone(),
                        tool_call.outcome_text(),
                    ));
                }
            }
            MessagePersona::System | MessagePersona::Tool => {
                // System notes ride along as plain system messages; loose
                // tool messages were already attached above
                if message.persona == MessagePersona::System {
                    rendered.push(ChatMessage::system(content));
                }
            }
        }
    }
    rendered
}

fn substitute(template: &str, call: &Call, today: DateTime<Utc>) -> String {
    let claim = if call.claim.is_empty() {
        "(empty)".to_string()
    } else {
        serde_json::to_string_pretty(&call.claim).unwrap_or_else(|_| "(unavailable)".to_string())
    };
    let reminders = if call.reminders.is_empty() {
        "(none)".to_string()
    } else {
        call.reminders
            .iter()
            .map(|r| {
                format!(
                    "- {} (due {}, owner {}): {}",
                    r.title,
                    r.due_at.format("%Y-%m-%d %H:%M"),
                    r.owner.as_db_str(),
                    r.description
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    template
        .replace("{bot_name}", &call.initiate.bot_name)
        .replace("{bot_company}", &call.initiate.bot_company)
        .replace("{date}", &today.format("%Y-%m-%d").to_string())
        .replace(
            "{phone_number}",
            call.initiate.caller_phone_number.as_str(),
        )
        .replace(
            "{bot_phone_number}",
            call.initiate.agent_phone_number.as_str(),
        )
        .replace("{default_lang}", call.language().human_name())
        .replace("{task}", &call.initiate.task_description)
        .replace("{claim}", &claim)
        .replace("{reminders}", &reminders)
}

/// Collapse whitespace runs into single spaces, dropping control
/// characters; intentional line structure is a prompt concern, not a
/// history one.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// OUTPUT STRIPPERS
// ============================================================================

/// Models sometimes echo the `action=talk` prefix from the history; strip
/// it before anything is spoken or stored.
pub fn strip_action_prefix(text: &str) -> &str {
    strip_kv_prefix(text, "action=")
}

/// Extract a leading `style=...` selector, returning the style and the
/// remaining text.
pub fn extract_style_prefix(text: &str) -> (Option<MessageStyle>, &str) {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix("style=") else {
        return (None, text);
    };
    let value = rest.split_whitespace().next().unwrap_or("");
    let after = rest
        .find(char::is_whitespace)
        .map(|i| rest[i..].trim_start())
        .unwrap_or("");
    (MessageStyle::from_db_str(value).ok(), after)
}

fn strip_kv_prefix<'a>(text: &'a str, key: &str) -> &'a str {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix(key) else {
        return text;
    };
    let after_value = rest
        .find(char::is_whitespace)
        .map(|i| rest[i..].trim_start())
        .unwrap_or("");
    after_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlance_core::{
        CallInitiate, ClaimField, ClaimFieldType, LanguageEntry, Message, PhoneNumber, ToolCall,
    };

    fn call() -> Call {
        Call::new(CallInitiate {
            bot_name: "Esperanza".to_string(),
            bot_company: "Contoso Insurance".to_string(),
            agent_phone_number: PhoneNumber::parse("+33699999999").unwrap(),
            caller_phone_number: PhoneNumber::parse("+33612345678").unwrap(),
            language_default: "fr-FR".to_string(),
            languages_available: vec![LanguageEntry::new(
                "fr-FR",
                "fr-FR-VivienneMultilingualNeural",
                vec!["French".to_string()],
            )],
            task_description: "Help the customer file a claim".to_string(),
            claim_schema: vec![ClaimField::new("policy_number", ClaimFieldType::Text)],
            prompts_overrides: None,
        })
    }

    fn assembler() -> PromptAssembler {
        PromptAssembler::new(16_000, 160)
    }

    #[test]
    fn test_system_placeholders_substituted() {
        let call = call();
        let prompt = assembler().assemble(&call, &TurnContext::default(), &[]);
        let system = &prompt[0].content;
        assert!(system.contains("Esperanza"));
        assert!(system.contains("Contoso Insurance"));
        assert!(system.contains("+33612345678"));
        assert!(system.contains("+33699999999"));
        assert!(system.contains("French"));
        assert!(!system.contains('{'));
    }

    #[test]
    fn test_assembly_is_pure() {
        let mut call = call();
        call.append_message(Message::human("bonjour"));
        let ctx = TurnContext {
            today: Some("2026-08-02T10:00:00Z".parse().unwrap()),
            rag_hits: vec![],
        };
        let a = assembler().assemble(&call, &ctx, &[]);
        let b = assembler().assemble(&call, &ctx, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_history_renders_prefixes_and_tools() {
        let mut call = call();
        call.append_message(Message::human("my policy is B01371946"));
        let tool_call = ToolCall {
            id: "call_1".to_string(),
            name: "update_claim".to_string(),
            arguments: "{}".to_string(),
            result: Some("Updated claim field".to_string()),
            error: None,
        };
        call.commit_assistant_turn(
            "Noted.".to_string(),
            MessageStyle::Cheerful,
            vec![tool_call],
        );

        let prompt = assembler().assemble(&call, &TurnContext::default(), &[]);
        let user = prompt
            .iter()
            .find(|m| m.role == parlance_llm::ChatRole::User)
            .unwrap();
        assert_eq!(user.content, "action=talk my policy is B01371946");

        let assistant = prompt
            .iter()
            .find(|m| m.role == parlance_llm::ChatRole::Assistant)
            .unwrap();
        assert!(assistant.content.starts_with("action=talk style=cheerful"));
        assert_eq!(assistant.tool_calls.len(), 1);

        let tool = prompt
            .iter()
            .find(|m| m.role == parlance_llm::ChatRole::Tool)
            .unwrap();
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool.content, "Updated claim field");
    }

    #[test]
    fn test_rag_block_appended_when_hits_present() {
        let call = call();
        let ctx = TurnContext {
            today: None,
            rag_hits: vec![SearchHit {
                snippet: "Stolen watches are covered\nby the luxury rider.".to_string(),
                score: 0.9,
                source: None,
            }],
        };
        let prompt = assembler().assemble(&call, &ctx, &[]);
        let rag = prompt
            .iter()
            .filter(|m| m.role == parlance_llm::ChatRole::System)
            .last()
            .unwrap();
        assert!(rag.content.contains("Stolen watches are covered by the luxury rider."));
    }

    #[test]
    fn test_claim_and_reminders_rendered() {
        let mut call = call();
        call.set_claim_field("policy_number", "B01371946").unwrap();
        let prompt = assembler().assemble(&call, &TurnContext::default(), &[]);
        assert!(prompt[1].content.contains("B01371946"));
        assert!(prompt[1].content.contains("(none)"));
    }

    #[test]
    fn test_strip_action_prefix() {
        assert_eq!(strip_action_prefix("action=talk Bonjour"), "Bonjour");
        assert_eq!(strip_action_prefix("Bonjour"), "Bonjour");
        assert_eq!(strip_action_prefix("action=talk"), "");
    }

    #[test]
    fn test_extract_style_prefix() {
        let (style, rest) = extract_style_prefix("style=cheerful Bonjour madame");
        assert_eq!(style, Some(MessageStyle::Cheerful));
        assert_eq!(rest, "Bonjour madame");

        let (style, rest) = extract_style_prefix("Bonjour");
        assert_eq!(style, None);
        assert_eq!(rest, "Bonjour");

        // Unknown style values strip but read as None
        let (style, rest) = extract_style_prefix("style=angry Bonjour");
        assert_eq!(style, None);
        assert_eq!(rest, "Bonjour");
    }

    #[test]
    fn test_prompt_set_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("hello".to_string(), "Bienvenue chez {bot_company}!".to_string());
        let prompts = PromptSet::default().with_overrides(Some(&overrides));
        let rendered = prompts.render(&prompts.hello.clone(), &call());
        assert_eq!(rendered, "Bienvenue chez Contoso Insurance!");
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(
            normalize_whitespace("hello\n\n  world\t!"),
            "hello world !"
        );
    }
}
