use axum::{
    extract::{Query, State},
    Json,
};
use domain::{aggregates::product::DEFAULT_PAGE_LIMIT, Pagination, ProductPage};
use serde::Deserialize;
use tracing::info;

use super::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_LIMIT
}

/// Search products by name or description
pub async fn search_products_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ProductPage>, ApiError> {
    info!(
        "Searching products: q={:?} offset={} limit={}",
        params.q, params.offset, params.limit
    );

    let pagination = Pagination::new(params.offset, params.limit)?;
    let page = state
        .service
        .search(&params.q, pagination, state.deadline())
        .await?;
    Ok(Json(page))
}
