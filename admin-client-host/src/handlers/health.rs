use admin_client::scheduler::{AttemptOutcome, RegistrationState};
use axum::{extract::State, Json};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;

/// Registration progress as published by the scheduler, `None` when the client is disabled.
pub type RegistrationStatus = Option<watch::Receiver<RegistrationState>>;

/// The endpoint advertised to the registry as this instance's health url.
pub async fn health(State(registration): State<RegistrationStatus>) -> Json<Value> {
    let registration = registration.map(|state| registration_json(&state.borrow()));

    Json(json!({
        "status": "UP",
        "registration": registration,
    }))
}

fn registration_json(state: &RegistrationState) -> Value {
    let (outcome, failure) = match &state.last_outcome {
        Some(AttemptOutcome::Success) => (Some("success"), None),
        Some(AttemptOutcome::Failure(reason)) => (Some("failure"), Some(reason.as_str())),
        None => (None, None),
    };

    json!({
        "phase": state.phase.as_str(),
        "id": state.registration_id.as_ref().map(|id| id.as_str()),
        "lastOutcome": outcome,
        "lastFailure": failure,
        "consecutiveFailures": state.consecutive_failures,
        "lastAttemptAt": state
            .last_attempt_at
            .and_then(|at| at.format(&Rfc3339).ok()),
    })
}
