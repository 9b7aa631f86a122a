use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use hiprelay_auth::AccessToken;
use hiprelay_storage::{FlowFields, FlowStore, TRANSACTION_ID_FIELD};
use serde_json::{Map, Value};
use tracing::{Span, debug, error, instrument, warn};

use super::{
    envelope::{Envelope, FlowStep},
    error::FlowError,
    gateway::GatewayResponse,
    request::{
        self, AuthRequest, AuthTarget, FetchModesRequest, LinkCareContextRequest,
        LinkTokenRequest,
    },
};
use crate::server::AppState;

type Payload = Result<Json<Value>, JsonRejection>;

/// Where a step's fields are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistTarget {
    /// The record keyed by this health id, created if absent.
    HealthId(String),
    /// The record whose `transactionId` matches.
    Transaction(String),
}

#[instrument(skip_all, fields(step = %FlowStep::FetchModes, health_id = tracing::field::Empty))]
pub async fn fetch_modes(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<GatewayResponse, FlowError> {
    let target = request::parse::<FetchModesRequest>(payload)?.validate()?;
    Span::current().record("health_id", target.health_id.as_str());

    let token = state.gateway.access_token().await?;
    let mut body = Map::new();
    body.insert("query".into(), Value::Object(target.query()));

    relay(
        &state,
        FlowStep::FetchModes,
        &token,
        body,
        PersistTarget::HealthId(target.health_id),
    )
    .await
}

#[instrument(skip_all, fields(step = %FlowStep::LinkToken, health_id = tracing::field::Empty))]
pub async fn generate_link_token(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<GatewayResponse, FlowError> {
    let target = request::parse::<LinkTokenRequest>(payload)?.validate()?;
    Span::current().record("health_id", target.health_id.as_str());

    let token = state.gateway.access_token().await?;
    let mut body = Map::new();
    body.insert("query".into(), Value::Object(target.query()));

    relay(
        &state,
        FlowStep::LinkToken,
        &token,
        body,
        PersistTarget::HealthId(target.health_id),
    )
    .await
}

#[instrument(skip_all, fields(step = %FlowStep::AuthInit, health_id = tracing::field::Empty))]
pub async fn auth_init(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<GatewayResponse, FlowError> {
    let auth = request::parse::<AuthRequest>(payload)?.validate()?;
    Span::current().record("health_id", auth.target.health_id.as_str());

    let token = state.gateway.access_token().await?;
    let body = auth_body(&auth, None);

    relay(
        &state,
        FlowStep::AuthInit,
        &token,
        body,
        PersistTarget::HealthId(auth.target.health_id),
    )
    .await
}

#[instrument(skip_all, fields(step = %FlowStep::AuthConfirm, health_id = tracing::field::Empty))]
pub async fn confirm_auth(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<GatewayResponse, FlowError> {
    let auth = request::parse::<AuthRequest>(payload)?.validate()?;
    Span::current().record("health_id", auth.target.health_id.as_str());

    let token = state.gateway.access_token().await?;

    let credential = match auth.credential.clone() {
        Some(mut credential) => {
            if let Some(Value::String(code)) = credential.get("authCode") {
                let encrypted = state.gateway.encrypt(&token, code).await?;
                credential.insert("authCode".into(), Value::String(encrypted));
            }
            Some(credential)
        }
        None => None,
    };
    let body = auth_body(&auth, credential);

    relay(
        &state,
        FlowStep::AuthConfirm,
        &token,
        body,
        PersistTarget::HealthId(auth.target.health_id),
    )
    .await
}

#[instrument(skip_all, fields(step = %FlowStep::LinkCareContext, transaction_id = tracing::field::Empty))]
pub async fn link_care_context(
    State(state): State<AppState>,
    payload: Payload,
) -> Result<GatewayResponse, FlowError> {
    let link = request::parse::<LinkCareContextRequest>(payload)?.validate()?;
    Span::current().record("transaction_id", link.transaction_id.as_str());

    let token = state.gateway.access_token().await?;
    let target = match &link.health_id {
        Some(health_id) => PersistTarget::HealthId(health_id.clone()),
        None => PersistTarget::Transaction(link.transaction_id.clone()),
    };

    relay(&state, FlowStep::LinkCareContext, &token, link.body(), target).await
}

fn auth_body(auth: &AuthTarget, credential: Option<Map<String, Value>>) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("query".into(), Value::Object(auth.query()));
    if let Some(transaction_id) = &auth.transaction_id {
        body.insert(
            TRANSACTION_ID_FIELD.into(),
            Value::String(transaction_id.clone()),
        );
    }
    if let Some(credential) = credential {
        body.insert("credential".into(), Value::Object(credential));
    }
    body
}

/// Envelopes `body`, calls the gateway and records the step.
///
/// Nothing is written unless the gateway answered with a success status.
async fn relay(
    state: &AppState,
    step: FlowStep,
    token: &AccessToken,
    body: Map<String, Value>,
    target: PersistTarget,
) -> Result<GatewayResponse, FlowError> {
    let envelope = Envelope::new(body)?;
    let response = state.gateway.post(step, token, &envelope).await?;

    let mut fields = envelope.persisted_fields(step)?;
    if matches!(step, FlowStep::AuthInit | FlowStep::AuthConfirm) {
        if let Some(transaction_id) = response.json().as_ref().and_then(transaction_id_of) {
            fields.insert(TRANSACTION_ID_FIELD.into(), Value::String(transaction_id));
        }
    }

    persist(state.store.as_ref(), step, &target, fields).await?;
    Ok(response)
}

/// Reads the gateway transaction id from an auth response.
fn transaction_id_of(body: &Value) -> Option<String> {
    body.get(TRANSACTION_ID_FIELD)
        .or_else(|| body.pointer("/auth/transactionId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

async fn persist(
    store: &dyn FlowStore,
    step: FlowStep,
    target: &PersistTarget,
    fields: FlowFields,
) -> Result<(), FlowError> {
    let result = match target {
        PersistTarget::HealthId(health_id) => store.upsert(health_id, fields).await.map(Some),
        PersistTarget::Transaction(transaction_id) => {
            store.merge_by_transaction(transaction_id, fields).await
        }
    };

    match result {
        Ok(Some(record)) => {
            debug!(
                %step,
                health_id = %record.health_id,
                revision = record.revision,
                "Flow record updated"
            );
            Ok(())
        }
        Ok(None) => {
            warn!(%step, persist_target = ?target, "No flow record matches transaction, step not recorded");
            Ok(())
        }
        Err(e) if e.is_connection_error() => {
            error!(%step, error = %e, "Flow store connection failed");
            Err(e.into())
        }
        Err(e) => {
            error!(%step, category = %e.category(), error = %e, "Flow store operation failed");
            Err(e.into())
        }
    }
}
