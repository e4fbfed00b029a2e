use super::JsonBody;
use crate::AppState;
use crate::api::models::extensions::{ExtensionCreate, ExtensionResponse};
use crate::errors::Result;
use crate::types::{ExtensionId, InstanceId};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

#[utoipa::path(
    get,
    path = "/instances/{id}/users",
    tag = "extensions",
    summary = "List extensions",
    params(("id" = uuid::Uuid, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Extensions of the instance, in creation order", body = Vec<ExtensionResponse>),
        (status = 404, description = "Instance not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_extensions(State(state): State<AppState>, Path(id): Path<InstanceId>) -> Result<Json<Vec<ExtensionResponse>>> {
    let extensions = state.manager.extensions().list(id).await?;
    Ok(Json(extensions.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post,
    path = "/instances/{id}/users",
    tag = "extensions",
    summary = "Create extension",
    params(("id" = uuid::Uuid, Path, description = "Instance ID")),
    request_body = ExtensionCreate,
    responses(
        (status = 201, description = "Extension created", body = ExtensionResponse),
        (status = 400, description = "Invalid field"),
        (status = 404, description = "Instance not found"),
        (status = 409, description = "Username already exists in this instance")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_extension(
    State(state): State<AppState>,
    Path(id): Path<InstanceId>,
    JsonBody(body): JsonBody<ExtensionCreate>,
) -> Result<(StatusCode, Json<ExtensionResponse>)> {
    let extension = state.manager.extensions().create(id, body.into()).await?;
    Ok((StatusCode::CREATED, Json(extension.into())))
}

#[utoipa::path(
    delete,
    path = "/instances/{id}/users/{extension_id}",
    tag = "extensions",
    summary = "Delete extension",
    params(
        ("id" = uuid::Uuid, Path, description = "Instance ID"),
        ("extension_id" = uuid::Uuid, Path, description = "Extension ID"),
    ),
    responses(
        (status = 204, description = "Extension deleted"),
        (status = 404, description = "No such extension under this instance")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_extension(
    State(state): State<AppState>,
    Path((id, extension_id)): Path<(InstanceId, ExtensionId)>,
) -> Result<StatusCode> {
    state.manager.extensions().delete(id, extension_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::models::extensions::ExtensionResponse;
    use crate::api::models::instances::InstanceCreateResponse;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use uuid::Uuid;

    async fn create_instance(app: &TestServer, name: &str, sip_port: u16) -> Uuid {
        let created: InstanceCreateResponse = app
            .post("/instances")
            .json(&json!({"name": name, "sip_port": sip_port}))
            .await
            .json();
        created.instance.id
    }

    fn extension(username: &str) -> Value {
        json!({"username": username, "password": "Secr3tPass", "caller_id": format!("Desk {username}")})
    }

    #[test_log::test(tokio::test)]
    async fn test_create_and_list_without_password() {
        let (app, _) = create_test_app();
        let id = create_instance(&app, "office", 5060).await;

        let response = app.post(&format!("/instances/{id}/users")).json(&extension("200")).await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["username"], "200");
        assert!(body.get("password").is_none());
        assert!(body.get("secret").is_none());

        app.post(&format!("/instances/{id}/users")).json(&extension("201")).await;
        let listed = app.get(&format!("/instances/{id}/users")).await;
        listed.assert_status_ok();
        assert!(!listed.text().contains("Secr3tPass"));
        let usernames: Vec<String> = listed.json::<Vec<ExtensionResponse>>().into_iter().map(|e| e.username).collect();
        assert_eq!(usernames, ["200", "201"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_username_scoped_to_instance() {
        let (app, _) = create_test_app();
        let first = create_instance(&app, "first", 5060).await;
        let second = create_instance(&app, "second", 5070).await;

        app.post(&format!("/instances/{first}/users"))
            .json(&extension("300"))
            .await
            .assert_status(StatusCode::CREATED);
        app.post(&format!("/instances/{second}/users"))
            .json(&extension("300"))
            .await
            .assert_status(StatusCode::CREATED);

        let duplicate = app.post(&format!("/instances/{first}/users")).json(&extension("300")).await;
        duplicate.assert_status(StatusCode::CONFLICT);
        assert_eq!(duplicate.json::<Value>()["kind"], "duplicate_username");
    }

    #[test_log::test(tokio::test)]
    async fn test_create_rejections() {
        let (app, _) = create_test_app();
        let id = create_instance(&app, "office", 5060).await;

        let missing = app
            .post(&format!("/instances/{}/users", Uuid::new_v4()))
            .json(&extension("400"))
            .await;
        missing.assert_status_not_found();
        assert_eq!(missing.json::<Value>()["kind"], "instance_not_found");

        let empty_password = app
            .post(&format!("/instances/{id}/users"))
            .json(&json!({"username": "400", "password": "", "caller_id": "Desk"}))
            .await;
        empty_password.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(empty_password.json::<Value>()["field"], "password");

        let no_username = app
            .post(&format!("/instances/{id}/users"))
            .json(&json!({"password": "Secr3tPass", "caller_id": "Desk"}))
            .await;
        no_username.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(no_username.json::<Value>()["kind"], "invalid_input");
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_extension() {
        let (app, _) = create_test_app();
        let owner = create_instance(&app, "owner", 5060).await;
        let other = create_instance(&app, "other", 5070).await;
        let created: ExtensionResponse = app.post(&format!("/instances/{owner}/users")).json(&extension("500")).await.json();

        app.delete(&format!("/instances/{other}/users/{}", created.id))
            .await
            .assert_status_not_found();
        app.delete(&format!("/instances/{owner}/users/{}", created.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        app.delete(&format!("/instances/{owner}/users/{}", created.id))
            .await
            .assert_status_not_found();
    }
}
