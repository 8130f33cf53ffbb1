// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use conjure::{EngineError, ExecutionEngine, OperationKey, OperationSummary, Phase, Value};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    engine: ExecutionEngine,
    categories: Arc<HashSet<String>>,
}

impl AppState {
    pub fn new(engine: ExecutionEngine, categories: impl IntoIterator<Item = String>) -> Self {
        Self {
            engine,
            categories: Arc::new(categories.into_iter().collect()),
        }
    }

    pub const fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub category: String,
    pub operation: String,
    pub request_id: String,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    fn from_engine_error(e: &EngineError) -> Self {
        let status = match e {
            EngineError::ArityMismatch { .. } | EngineError::Coercion { .. } => {
                StatusCode::BAD_REQUEST
            }
            EngineError::Invocation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Synthesis { .. }
            | EngineError::Compilation { .. }
            | EngineError::Resolution { .. } => StatusCode::BAD_GATEWAY,
            EngineError::Aborted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            error: e.to_string(),
            kind: e.kind(),
            phase: Some(e.phase()),
            category: e.key().category().to_string(),
            operation: e.key().name().to_string(),
            request_id: Uuid::new_v4().to_string(),
            status,
        }
    }

    fn unknown_category(category: String, operation: String) -> Self {
        Self {
            error: format!("category '{category}' is not served here"),
            kind: "unknown_category",
            phase: None,
            category,
            operation,
            request_id: Uuid::new_v4().to_string(),
            status: StatusCode::NOT_FOUND,
        }
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(self);
        (status, body).into_response()
    }
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/operations", get(handle_operations))
        .route("/{category}/{operation}", get(handle_nullary))
        .route("/{category}/{operation}/{*args}", get(handle_operation))
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_operations(State(state): State<AppState>) -> Json<Vec<OperationSummary>> {
    Json(state.engine.operations())
}

async fn handle_nullary(
    State(state): State<AppState>,
    Path((category, operation)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    run(&state, category, operation, Vec::new()).await
}

async fn handle_operation(
    State(state): State<AppState>,
    Path((category, operation, args)): Path<(String, String, String)>,
) -> Result<Json<Value>, ApiError> {
    run(&state, category, operation, split_args(&args)).await
}

/// Path tail to argument list; empty segments are dropped.
pub fn split_args(tail: &str) -> Vec<String> {
    tail.split('/')
        .filter(|segment| !segment.is_empty())
        .map(ToString::to_string)
        .collect()
}

async fn run(
    state: &AppState,
    category: String,
    operation: String,
    args: Vec<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.categories.contains(&category) {
        return Err(ApiError::unknown_category(category, operation));
    }
    let key = OperationKey::new(category, operation);

    if state.engine.is_implemented(&key) {
        debug!(%key, args = args.len(), "executing");
    } else {
        info!(%key, args = args.len(), "first request for operation");
        state
            .engine
            .implement(&key, args.len(), vec![args.clone()])
            .await
            .map_err(|e| ApiError::from_engine_error(&e))?;
    }

    state
        .engine
        .execute(&key, &args)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_engine_error(&e))
}
