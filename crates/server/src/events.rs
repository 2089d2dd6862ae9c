//! Slack Events API webhook endpoint.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use greeter_core::{ApplicationError, InterfaceError};
use greeter_slack::{
    events::parse_envelope,
    intake::IntakeOutcome,
    signature::{SignatureError, SIGNATURE_HEADER, TIMESTAMP_HEADER},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::AppState;

pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(verifier) = &state.verifier {
        let verified = verifier.verify(
            header_value(&headers, TIMESTAMP_HEADER),
            header_value(&headers, SIGNATURE_HEADER),
            &body,
        );
        if let Err(error) = verified {
            warn!(
                event_name = "ingress.slack.signature_rejected",
                correlation_id = "signature",
                error = %error,
                "rejecting unsigned or mis-signed slack request"
            );
            let message = match error {
                SignatureError::MissingHeaders => error.to_string(),
                SignatureError::InvalidSignature | SignatureError::StaleTimestamp => {
                    SignatureError::InvalidSignature.to_string()
                }
            };
            return Err(InterfaceError::forbidden(message, "signature").into());
        }
    }

    let envelope = parse_envelope(&body).map_err(|error| {
        warn!(
            event_name = "ingress.slack.payload_rejected",
            correlation_id = "payload",
            error = %error,
            "rejecting malformed slack payload"
        );
        ApiError::from(InterfaceError::bad_request(error.to_string(), "payload"))
    })?;

    let correlation_id = envelope.correlation_id().to_owned();
    let outcome = state.intake.accept(envelope).await;
    debug!(
        event_name = "ingress.slack.acknowledged",
        correlation_id = %correlation_id,
        outcome = outcome.as_str(),
        "acknowledging slack delivery"
    );

    let body = match outcome {
        IntakeOutcome::Challenge(challenge) => json!({ "challenge": challenge }),
        IntakeOutcome::QueueClosed => {
            return Err(ApplicationError::Integration("reply queue is closed".to_owned())
                .into_interface(correlation_id)
                .into());
        }
        _ => json!({}),
    };
    Ok(Json(body).into_response())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
