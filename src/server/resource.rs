// src/server/resource.rs

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::routing::get;
use axum::{Json, Router};

use super::ApiError;
use crate::resource::{DataSource, MeResponse};

/// Routes of the data-source API.
pub fn router(datasource: DataSource) -> Router {
    Router::new()
        .route("/me", get(me))
        .with_state(Arc::new(datasource))
}

async fn me(
    State(datasource): State<Arc<DataSource>>,
    headers: HeaderMap,
) -> Result<Json<MeResponse>, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    Ok(Json(datasource.me(authorization).await?))
}
