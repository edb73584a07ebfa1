//! Call creation and inspection.
//!
//! `POST /call` initializes an outbound Call and enqueues the dial event;
//! `GET /call?phone_number=` is the thin read path for recent calls. The
//! read view strips the webhook secret.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use parlance_core::{
    Call, CallId, CallInitiate, ClaimField, NextStep, PhoneNumber, Reminder, Synthesis,
    Timestamp,
};
use parlance_store::{InboundEvent, QueueEnvelope};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /call`.
#[derive(Debug, Deserialize)]
pub struct CreateCallRequest {
    pub phone_number: PhoneNumber,
    #[serde(default)]
    pub bot_company: Option<String>,
    #[serde(default)]
    pub bot_name: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub agent_phone_number: Option<PhoneNumber>,
    #[serde(default)]
    pub claim: Vec<ClaimField>,
    #[serde(default)]
    pub lang: Option<String>,
}

/// Response of `POST /call`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCallResponse {
    pub call_id: CallId,
}

pub async fn create_call(
    State(state): State<AppState>,
    Json(request): Json<CreateCallRequest>,
) -> ApiResult<Json<CreateCallResponse>> {
    let defaults = &state.defaults;
    let language_default = request
        .lang
        .unwrap_or_else(|| defaults.language_default.clone());
    if !defaults
        .languages_available
        .iter()
        .any(|entry| entry.short_code == language_default)
    {
        return Err(ApiError::invalid_input(format!(
            "language {language_default} is not available"
        )));
    }

    let initiate = CallInitiate {
        bot_name: request
            .bot_name
            .unwrap_or_else(|| defaults.bot_name.clone()),
        bot_company: request
            .bot_company
            .unwrap_or_else(|| defaults.bot_company.clone()),
        agent_phone_number: request
            .agent_phone_number
            .unwrap_or_else(|| defaults.agent_phone_number.clone()),
        caller_phone_number: request.phone_number.clone(),
        language_default,
        languages_available: defaults.languages_available.clone(),
        task_description: request
            .task
            .unwrap_or_else(|| defaults.task_description.clone()),
        claim_schema: request.claim,
        prompts_overrides: None,
    };

    let mut call = Call::new(initiate);
    state.store.save(&mut call).await?;

    let envelope = QueueEnvelope::new(InboundEvent::IncomingCall {
        caller_phone: request.phone_number,
        callee_phone: call.initiate.agent_phone_number.clone(),
        correlation_id: call.call_id.to_string(),
    });
    state
        .queue
        .send(
            parlance_core::QueueName::CallEvents,
            &envelope.to_json().map_err(parlance_core::ParlanceError::from)?,
        )
        .await
        .map_err(parlance_core::ParlanceError::from)?;

    tracing::info!(call_id = %call.call_id, "outbound call created");
    Ok(Json(CreateCallResponse {
        call_id: call.call_id,
    }))
}

/// Query of `GET /call`.
#[derive(Debug, Deserialize)]
pub struct ListCallsQuery {
    pub phone_number: PhoneNumber,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Read view of a Call; no secrets, no transient worker fields.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallView {
    pub call_id: CallId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub in_progress: bool,
    pub initiate: CallInitiate,
    pub claim: BTreeMap<String, String>,
    pub messages: Vec<parlance_core::Message>,
    pub reminders: Vec<Reminder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<NextStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<Synthesis>,
}

impl From<Call> for CallView {
    fn from(call: Call) -> Self {
        Self {
            call_id: call.call_id,
            created_at: call.created_at,
            updated_at: call.updated_at,
            in_progress: call.in_progress(),
            initiate: call.initiate.clone(),
            claim: call.claim.clone(),
            messages: call.messages.clone(),
            reminders: call.reminders.clone(),
            next: call.next.clone(),
            synthesis: call.synthesis.clone(),
        }
    }
}

pub async fn list_calls(
    State(state): State<AppState>,
    Query(query): Query<ListCallsQuery>,
) -> ApiResult<Json<Vec<CallView>>> {
    let limit = query.limit.min(100);
    let calls = state
        .store
        .list_by_phone(&query.phone_number, limit)
        .await?;
    Ok(Json(calls.into_iter().map(CallView::from).collect()))
}
