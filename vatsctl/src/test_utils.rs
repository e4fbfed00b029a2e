//! Helpers for handler tests: the full router over in-memory storage.

use std::sync::Arc;

use axum_test::TestServer;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::db::handlers::{InMemoryCdr, InMemoryStore};
use crate::db::models::cdr::CdrRecord;
use crate::{Application, Backends};

/// Handles onto the storage behind a test server, for seeding and inspection.
pub struct TestBackends {
    pub store: InMemoryStore,
    pub cdr: InMemoryCdr,
}

pub fn create_test_config() -> Config {
    Config::default()
}

pub fn create_test_app() -> (TestServer, TestBackends) {
    let store = InMemoryStore::new();
    let cdr = InMemoryCdr::new();
    let backends = Backends::new(Arc::new(store.clone()), Arc::new(store.clone()), Arc::new(cdr.clone()));

    let app = Application::with_backends(create_test_config(), backends).expect("Failed to create application");
    (app.into_test_server(), TestBackends { store, cdr })
}

pub fn cdr_record(instance_name: &str, src: &str, dst: &str, disposition: &str, calldate: DateTime<Utc>) -> CdrRecord {
    CdrRecord {
        id: 0,
        calldate,
        clid: format!("\"Ext {src}\" <{src}>"),
        src: src.to_string(),
        dst: dst.to_string(),
        duration: 42,
        billsec: if disposition == "ANSWERED" { 40 } else { 0 },
        disposition: disposition.to_string(),
        uniqueid: format!("{}.{src}", calldate.timestamp()),
        userfield: String::new(),
        instance_name: instance_name.to_string(),
        accountcode: None,
        dcontext: Some("from-internal".to_string()),
        channel: Some(format!("PJSIP/{src}-00000001")),
        dstchannel: None,
        lastapp: Some("Dial".to_string()),
        lastdata: None,
        amaflags: Some(3),
    }
}
