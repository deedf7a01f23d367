use axum::{extract::State, http::StatusCode, Json};
use catalog::MutationOutcome;
use domain::{CreateProductCommand, Product};
use serde::Serialize;
use tracing::info;

use super::error::ApiError;
use crate::state::AppState;

/// Product as returned by the mutation endpoints.
///
/// `event_pending` is set when the write is durable but its change event
/// could not be handed to the broker.
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    #[serde(flatten)]
    pub product: Product,
    pub event_pending: bool,
}

impl From<MutationOutcome> for MutationResponse {
    fn from(outcome: MutationOutcome) -> Self {
        let event_pending = outcome.event_pending();
        Self {
            product: outcome.product,
            event_pending,
        }
    }
}

/// Handle create product command
pub async fn handle(
    State(state): State<AppState>,
    Json(cmd): Json<CreateProductCommand>,
) -> Result<(StatusCode, Json<MutationResponse>), ApiError> {
    info!("Received create product command: {}", cmd.name);

    let outcome = state.service.create(cmd, state.deadline()).await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}
