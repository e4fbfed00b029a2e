use super::JsonBody;
use crate::AppState;
use crate::api::models::cdr::{CdrExportRequest, CdrQuery};
use crate::db::models::cdr::CdrRecord;
use crate::errors::Result;
use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use chrono::Utc;

#[utoipa::path(
    get,
    path = "/cdr",
    tag = "cdr",
    summary = "Query call detail records",
    description = "Newest calls first. `limit` is capped at the configured maximum.",
    params(CdrQuery),
    responses(
        (status = 200, description = "Matching call records", body = Vec<CdrRecord>),
        (status = 400, description = "Invalid paging or date parameter")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn query_cdr(State(state): State<AppState>, Query(query): Query<CdrQuery>) -> Result<Json<Vec<CdrRecord>>> {
    let filter = query.into_filter(&state.config.cdr)?;
    let records = state.cdr.query(&filter).await?;
    tracing::debug!(count = records.len(), "Queried call records");
    Ok(Json(records))
}

#[utoipa::path(
    post,
    path = "/cdr/export",
    tag = "cdr",
    summary = "Export call detail records",
    description = "Returns the matching records as a downloadable JSON file.",
    request_body = CdrExportRequest,
    responses(
        (status = 200, description = "JSON attachment with the matching records", body = Vec<CdrRecord>),
        (status = 400, description = "Invalid filter")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn export_cdr(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CdrExportRequest>,
) -> Result<Response> {
    let filter = body.into_filter(&state.config.cdr)?;
    let records = state.cdr.query(&filter).await?;
    tracing::info!(count = records.len(), "Exported call records");

    let filename = format!("cdr-export-{}.json", Utc::now().format("%Y%m%d-%H%M%S"));
    let disposition = format!("attachment; filename=\"{filename}\"");
    Ok(([(header::CONTENT_DISPOSITION, disposition)], Json(records)).into_response())
}
