//! OpenAPI document for the management API, served through Scalar at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::db::models::{cdr::CdrRecord, instances::InstanceStatus};
use crate::manager::{IntegrityReport, OrphanGroup};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "vatsctl",
        description = "Lifecycle management for PBX instances and their SIP extensions."
    ),
    paths(
        api::handlers::instances::list_instances,
        api::handlers::instances::get_instance,
        api::handlers::instances::create_instance,
        api::handlers::instances::update_instance,
        api::handlers::instances::delete_instance,
        api::handlers::extensions::list_extensions,
        api::handlers::extensions::create_extension,
        api::handlers::extensions::delete_extension,
        api::handlers::cdr::query_cdr,
        api::handlers::cdr::export_cdr,
        api::handlers::integrity::get_integrity,
    ),
    components(
        schemas(
            api::models::instances::InstanceCreate,
            api::models::instances::InstanceUpdate,
            api::models::instances::InstanceResponse,
            api::models::instances::InstanceCreateResponse,
            api::models::extensions::ExtensionCreate,
            api::models::extensions::ExtensionResponse,
            api::models::cdr::CdrExportRequest,
            api::models::cdr::CdrExportFilters,
            CdrRecord,
            InstanceStatus,
            IntegrityReport,
            OrphanGroup,
        )
    ),
    tags(
        (name = "instances", description = "PBX instances and their port pairs"),
        (name = "extensions", description = "SIP extensions provisioned under an instance"),
        (name = "cdr", description = "Call detail records"),
        (name = "integrity", description = "Consistency checks"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/instances",
            "/instances/{id}",
            "/instances/{id}/users",
            "/instances/{id}/users/{extension_id}",
            "/cdr",
            "/cdr/export",
            "/integrity",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let item = &doc.paths.paths["/instances/{id}"];
        assert!(item.put.is_some() && item.patch.is_some() && item.delete.is_some());
    }
}
