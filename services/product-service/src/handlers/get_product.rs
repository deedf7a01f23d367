use axum::{
    extract::{Path, Query, State},
    Json,
};
use domain::Product;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GetProductParams {
    /// Lowest revision the caller is willing to accept, typically the one
    /// returned by its own last write
    pub min_revision: Option<i64>,
}

/// Get a single product by ID
pub async fn get_product_handler(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(params): Query<GetProductParams>,
) -> Result<Json<Product>, ApiError> {
    info!("Fetching product: {}", product_id);

    let product = state
        .service
        .get_by_id(product_id, params.min_revision, state.deadline())
        .await?;
    Ok(Json(product))
}
