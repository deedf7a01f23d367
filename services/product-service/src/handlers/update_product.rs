use axum::{
    extract::{Path, State},
    Json,
};
use domain::UpdateProductCommand;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::create_product::MutationResponse;
use super::error::ApiError;
use crate::state::AppState;

/// Full replacement body; the product id comes from the path
#[derive(Debug, Deserialize)]
pub struct UpdateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub image_url: Option<String>,
    pub revision: i64,
}

impl UpdateProductRequest {
    fn into_command(self, id: Uuid) -> UpdateProductCommand {
        UpdateProductCommand {
            id,
            name: self.name,
            description: self.description,
            price: self.price,
            image_url: self.image_url,
            revision: self.revision,
        }
    }
}

/// Handle update product command
pub async fn handle(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<MutationResponse>, ApiError> {
    info!(
        "Received update product command: {} at revision {}",
        product_id, request.revision
    );

    let outcome = state
        .service
        .update(request.into_command(product_id), state.deadline())
        .await?;
    Ok(Json(outcome.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_takes_id_from_path() {
        let request: UpdateProductRequest =
            serde_json::from_str(r#"{"name":"Widget","price":12.0,"revision":3}"#).unwrap();
        let id = Uuid::new_v4();
        let cmd = request.into_command(id);
        assert_eq!(cmd.id, id);
        assert_eq!(cmd.revision, 3);
        assert_eq!(cmd.description, "");
    }
}
