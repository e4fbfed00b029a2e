use super::JsonBody;
use crate::AppState;
use crate::api::models::instances::{InstanceCreate, InstanceCreateResponse, InstanceResponse, InstanceUpdate};
use crate::errors::Result;
use crate::types::InstanceId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

#[utoipa::path(
    get,
    path = "/instances",
    tag = "instances",
    summary = "List instances",
    description = "All live instances, oldest first.",
    responses(
        (status = 200, description = "List of instances", body = Vec<InstanceResponse>),
        (status = 503, description = "Storage unavailable")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_instances(State(state): State<AppState>) -> Result<Json<Vec<InstanceResponse>>> {
    let instances = state.manager.list_instances().await?;
    Ok(Json(instances.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/instances/{id}",
    tag = "instances",
    summary = "Get instance",
    params(("id" = uuid::Uuid, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Instance", body = InstanceResponse),
        (status = 404, description = "Instance not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_instance(State(state): State<AppState>, Path(id): Path<InstanceId>) -> Result<Json<InstanceResponse>> {
    Ok(Json(state.manager.get_instance(id).await?.into()))
}

#[utoipa::path(
    post,
    path = "/instances",
    tag = "instances",
    summary = "Create instance",
    description = "Registers a PBX instance. The HTTP port is always `sip_port + http_offset`.
When `seed_default_extensions` is set the configured starter extensions are provisioned;
failures there are returned as `warnings` and do not fail the create.",
    request_body = InstanceCreate,
    responses(
        (status = 201, description = "Instance created", body = InstanceCreateResponse),
        (status = 400, description = "Invalid name or port"),
        (status = 409, description = "Port already in use")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_instance(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<InstanceCreate>,
) -> Result<(StatusCode, Json<InstanceCreateResponse>)> {
    let created = state.manager.create_instance(body.into()).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    method(put, patch),
    path = "/instances/{id}",
    tag = "instances",
    summary = "Update instance",
    description = "Partial update. Omitted fields are unchanged. A port supplied on its own is paired with the current value of the other port, and the pair must still be distinct and free.",
    params(("id" = uuid::Uuid, Path, description = "Instance ID")),
    request_body = InstanceUpdate,
    responses(
        (status = 200, description = "Updated instance", body = InstanceResponse),
        (status = 400, description = "Invalid name, port or field"),
        (status = 404, description = "Instance not found"),
        (status = 409, description = "Port already in use")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_instance(
    State(state): State<AppState>,
    Path(id): Path<InstanceId>,
    JsonBody(body): JsonBody<InstanceUpdate>,
) -> Result<Json<InstanceResponse>> {
    Ok(Json(state.manager.update_instance(id, body.into()).await?.into()))
}

#[utoipa::path(
    delete,
    path = "/instances/{id}",
    tag = "instances",
    summary = "Delete instance",
    description = "Removes the instance together with all of its extensions and frees its ports.",
    params(("id" = uuid::Uuid, Path, description = "Instance ID")),
    responses(
        (status = 204, description = "Instance deleted"),
        (status = 404, description = "Instance not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_instance(State(state): State<AppState>, Path(id): Path<InstanceId>) -> Result<StatusCode> {
    state.manager.delete_instance(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
