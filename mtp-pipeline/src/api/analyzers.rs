//! GET /analyzers - selectable analyzer names per stage

use axum::{extract::State, routing::get, Json, Router};
use mtp_common::Stage;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerCatalog {
    pub stage_a: Vec<String>,
    pub stage_b: Vec<String>,
    #[serde(rename = "final")]
    pub final_stage: Vec<String>,
}

pub async fn list_analyzers(State(state): State<AppState>) -> Json<AnalyzerCatalog> {
    let templates = state.orchestrator.templates();
    Json(AnalyzerCatalog {
        stage_a: templates.analyzers(Stage::StageA).to_vec(),
        stage_b: templates.analyzers(Stage::StageB).to_vec(),
        final_stage: templates.analyzers(Stage::Final).to_vec(),
    })
}

pub fn analyzer_routes() -> Router<AppState> {
    Router::new().route("/analyzers", get(list_analyzers))
}
