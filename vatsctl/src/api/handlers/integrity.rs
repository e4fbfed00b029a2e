use crate::AppState;
use crate::errors::Result;
use crate::manager::IntegrityReport;
use axum::{Json, extract::State};

#[utoipa::path(
    get,
    path = "/integrity",
    tag = "integrity",
    summary = "Orphaned extension report",
    description = "Lists extensions whose instance no longer exists, grouped by the missing instance. Nothing is repaired.",
    responses(
        (status = 200, description = "Integrity report", body = IntegrityReport)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_integrity(State(state): State<AppState>) -> Result<Json<IntegrityReport>> {
    Ok(Json(state.manager.integrity_report().await?))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::*;
    use serde_json::{Value, json};

    #[test_log::test(tokio::test)]
    async fn test_clean_report() {
        let (app, _) = create_test_app();
        app.post("/instances")
            .json(&json!({"name": "office", "sip_port": 5060, "seed_default_extensions": true}))
            .await;

        let report: Value = app.get("/integrity").await.json();
        assert_eq!(report["instance_count"], 1);
        assert_eq!(report["orphaned_extensions"], 0);
        assert_eq!(report["orphans"], json!([]));
    }
}
