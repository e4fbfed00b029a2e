//! In-memory storage backend.
//!
//! Instances, their ports and their extensions live behind a single lock, so every
//! repository call is atomic and the cascade in [`InstanceRepository::delete`] removes
//! the instance and its extensions in one step. Suitable for tests, demos and
//! single-process deployments; everything is lost on restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::repository::{CdrSource, ExtensionRepository, InstanceRepository};
use crate::db::errors::{DbError, Result, constraints};
use crate::db::models::{
    cdr::{CdrFilter, CdrRecord},
    extensions::{ExtensionCreateDBRequest, ExtensionDBResponse},
    instances::{InstanceCreateDBRequest, InstanceDBResponse, InstanceUpdateDBRequest},
};
use crate::ports::{PortClaim, PortPair};
use crate::types::{ExtensionId, InstanceId};

#[derive(Debug, Clone)]
struct Stored<T> {
    record: T,
    seq: u64,
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<InstanceId, Stored<InstanceDBResponse>>,
    /// port -> owning instance, mirrors the `instance_ports` table
    ports: HashMap<u16, InstanceId>,
    extensions: HashMap<ExtensionId, Stored<ExtensionDBResponse>>,
    next_seq: u64,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn check_name_free(&self, name: &str, excluding: Option<InstanceId>) -> Result<()> {
        let taken = self
            .instances
            .values()
            .any(|stored| stored.record.name == name && Some(stored.record.id) != excluding);
        if taken {
            return Err(DbError::UniqueViolation {
                constraint: Some(constraints::INSTANCE_NAME.to_string()),
                table: Some("instances".to_string()),
                message: format!("instance name '{name}' already exists"),
                conflicting_value: Some(name.to_string()),
            });
        }
        Ok(())
    }

    fn check_ports_free(&self, ports: &PortPair, excluding: Option<InstanceId>) -> Result<()> {
        if ports.sip_port == ports.http_port {
            return Err(DbError::CheckViolation {
                constraint: Some(constraints::INSTANCE_DISTINCT_PORTS.to_string()),
                table: Some("instances".to_string()),
                message: format!("sip_port and http_port are both {}", ports.sip_port),
            });
        }
        for port in ports.ports() {
            if let Some(owner) = self.ports.get(&port)
                && Some(*owner) != excluding
            {
                return Err(DbError::UniqueViolation {
                    constraint: Some(constraints::INSTANCE_PORT.to_string()),
                    table: Some("instance_ports".to_string()),
                    message: format!("port {port} is already reserved"),
                    conflicting_value: Some(port.to_string()),
                });
            }
        }
        Ok(())
    }

    fn check_extension_insertable(&self, instance_id: InstanceId, username: &str) -> Result<()> {
        if !self.instances.contains_key(&instance_id) {
            return Err(DbError::ForeignKeyViolation {
                constraint: Some(constraints::EXTENSION_INSTANCE.to_string()),
                table: Some("extensions".to_string()),
                message: format!("instance {instance_id} does not exist"),
            });
        }
        let taken = self
            .extensions
            .values()
            .any(|stored| stored.record.instance_id == instance_id && stored.record.username == username);
        if taken {
            return Err(DbError::UniqueViolation {
                constraint: Some(constraints::EXTENSION_USERNAME.to_string()),
                table: Some("extensions".to_string()),
                message: format!("username '{username}' already exists in instance {instance_id}"),
                conflicting_value: Some(username.to_string()),
            });
        }
        Ok(())
    }
}

/// In-memory implementation of the instance and extension repositories.
///
/// Cloning is cheap and clones share the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an extension without checking its owner. Only used to simulate data
    /// corruption in tests.
    #[cfg(test)]
    pub(crate) fn insert_unchecked_extension(&self, record: ExtensionDBResponse) {
        let mut state = self.state.write();
        let seq = state.next_seq();
        state.extensions.insert(record.id, Stored { record, seq });
    }
}

fn sorted<T: Clone>(mut items: Vec<&Stored<T>>, key: impl Fn(&T) -> chrono::DateTime<Utc>) -> Vec<T> {
    items.sort_by_key(|stored| (key(&stored.record), stored.seq));
    items.into_iter().map(|stored| stored.record.clone()).collect()
}

#[async_trait::async_trait]
impl InstanceRepository for InMemoryStore {
    async fn list(&self) -> Result<Vec<InstanceDBResponse>> {
        let state = self.state.read();
        Ok(sorted(state.instances.values().collect(), |i| i.created_at))
    }

    async fn get(&self, id: InstanceId) -> Result<Option<InstanceDBResponse>> {
        Ok(self.state.read().instances.get(&id).map(|stored| stored.record.clone()))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<InstanceDBResponse>> {
        let state = self.state.read();
        Ok(state
            .instances
            .values()
            .find(|stored| stored.record.name == name)
            .map(|stored| stored.record.clone()))
    }

    async fn list_ports_in_use(&self) -> Result<Vec<PortClaim>> {
        let state = self.state.read();
        Ok(state
            .instances
            .values()
            .map(|stored| PortClaim {
                instance_id: stored.record.id,
                ports: stored.record.ports(),
            })
            .collect())
    }

    async fn insert(&self, request: &InstanceCreateDBRequest) -> Result<InstanceDBResponse> {
        let mut state = self.state.write();
        state.check_name_free(&request.name, None)?;
        state.check_ports_free(&request.ports, None)?;

        let now = Utc::now();
        let record = InstanceDBResponse {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            sip_port: request.ports.sip_port,
            http_port: request.ports.http_port,
            status: request.status,
            created_at: now,
            updated_at: now,
        };

        for port in request.ports.ports() {
            state.ports.insert(port, record.id);
        }
        let seq = state.next_seq();
        state.instances.insert(record.id, Stored { record: record.clone(), seq });
        Ok(record)
    }

    async fn update(&self, id: InstanceId, request: &InstanceUpdateDBRequest) -> Result<InstanceDBResponse> {
        let mut state = self.state.write();
        let current = state.instances.get(&id).map(|stored| stored.record.clone()).ok_or(DbError::NotFound)?;

        if let Some(name) = &request.name {
            state.check_name_free(name, Some(id))?;
        }
        if let Some(ports) = &request.ports {
            state.check_ports_free(ports, Some(id))?;
            for port in current.ports().ports() {
                state.ports.remove(&port);
            }
            for port in ports.ports() {
                state.ports.insert(port, id);
            }
        }

        let stored = state.instances.get_mut(&id).ok_or(DbError::NotFound)?;
        let record = &mut stored.record;
        if let Some(name) = &request.name {
            record.name = name.clone();
        }
        if let Some(ports) = request.ports {
            record.sip_port = ports.sip_port;
            record.http_port = ports.http_port;
        }
        if let Some(status) = request.status {
            record.status = status;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete(&self, id: InstanceId) -> Result<bool> {
        let mut state = self.state.write();
        let Some(removed) = state.instances.remove(&id) else {
            return Ok(false);
        };
        for port in removed.record.ports().ports() {
            state.ports.remove(&port);
        }
        // Same effect as ON DELETE CASCADE
        state.extensions.retain(|_, stored| stored.record.instance_id != id);
        Ok(true)
    }
}

#[async_trait::async_trait]
impl ExtensionRepository for InMemoryStore {
    async fn list_by_instance(&self, instance_id: InstanceId) -> Result<Vec<ExtensionDBResponse>> {
        let state = self.state.read();
        let owned = state
            .extensions
            .values()
            .filter(|stored| stored.record.instance_id == instance_id)
            .collect();
        Ok(sorted(owned, |e| e.created_at))
    }

    async fn get(&self, id: ExtensionId) -> Result<Option<ExtensionDBResponse>> {
        Ok(self.state.read().extensions.get(&id).map(|stored| stored.record.clone()))
    }

    async fn get_by_username(&self, instance_id: InstanceId, username: &str) -> Result<Option<ExtensionDBResponse>> {
        let state = self.state.read();
        Ok(state
            .extensions
            .values()
            .find(|stored| stored.record.instance_id == instance_id && stored.record.username == username)
            .map(|stored| stored.record.clone()))
    }

    async fn insert(&self, request: &ExtensionCreateDBRequest) -> Result<ExtensionDBResponse> {
        let mut state = self.state.write();
        state.check_extension_insertable(request.instance_id, &request.username)?;

        let record = ExtensionDBResponse {
            id: Uuid::new_v4(),
            instance_id: request.instance_id,
            username: request.username.clone(),
            secret: request.secret.clone(),
            caller_id: request.caller_id.clone(),
            account_code: request.account_code.clone(),
            context: request.context.clone(),
            created_at: Utc::now(),
        };
        let seq = state.next_seq();
        state.extensions.insert(record.id, Stored { record: record.clone(), seq });
        Ok(record)
    }

    async fn delete(&self, id: ExtensionId) -> Result<bool> {
        Ok(self.state.write().extensions.remove(&id).is_some())
    }

    async fn delete_by_instance(&self, instance_id: InstanceId) -> Result<u64> {
        let mut state = self.state.write();
        let before = state.extensions.len();
        state.extensions.retain(|_, stored| stored.record.instance_id != instance_id);
        Ok((before - state.extensions.len()) as u64)
    }

    async fn restore(&self, records: &[ExtensionDBResponse]) -> Result<()> {
        let mut state = self.state.write();
        // Validate everything first so a failed restore changes nothing
        for record in records {
            if state.extensions.contains_key(&record.id) {
                continue;
            }
            state.check_extension_insertable(record.instance_id, &record.username)?;
        }
        for record in records {
            if state.extensions.contains_key(&record.id) {
                continue;
            }
            let seq = state.next_seq();
            state.extensions.insert(
                record.id,
                Stored {
                    record: record.clone(),
                    seq,
                },
            );
        }
        Ok(())
    }

    async fn list_owner_ids(&self) -> Result<Vec<InstanceId>> {
        let state = self.state.read();
        let owners: HashSet<InstanceId> = state.extensions.values().map(|stored| stored.record.instance_id).collect();
        Ok(owners.into_iter().collect())
    }
}

/// Append-only in-memory call log.
#[derive(Clone, Default)]
pub struct InMemoryCdr {
    records: Arc<RwLock<Vec<CdrRecord>>>,
}

impl InMemoryCdr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, assigning the next ID. Returns the stored record.
    pub fn record(&self, mut record: CdrRecord) -> CdrRecord {
        let mut records = self.records.write();
        record.id = records.len() as i64 + 1;
        records.push(record.clone());
        record
    }
}

#[async_trait::async_trait]
impl CdrSource for InMemoryCdr {
    async fn query(&self, filter: &CdrFilter) -> Result<Vec<CdrRecord>> {
        let records = self.records.read();
        let mut matching: Vec<&CdrRecord> = records.iter().filter(|record| filter.matches(record)).collect();
        matching.sort_by(|a, b| b.calldate.cmp(&a.calldate).then(b.id.cmp(&a.id)));

        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.max(0) as usize;
        Ok(matching.into_iter().skip(offset).take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{extensions::SipSecret, instances::InstanceStatus};
    use chrono::{Duration, TimeZone};

    fn instance_request(name: &str, sip_port: u16) -> InstanceCreateDBRequest {
        InstanceCreateDBRequest {
            name: name.to_string(),
            ports: PortPair::new(sip_port, sip_port + 1000),
            status: InstanceStatus::Running,
        }
    }

    fn extension_request(instance_id: InstanceId, username: &str) -> ExtensionCreateDBRequest {
        ExtensionCreateDBRequest {
            instance_id,
            username: username.to_string(),
            secret: SipSecret::new("secret"),
            caller_id: format!("Ext {username}"),
            account_code: None,
            context: None,
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_name_and_ports() {
        let store = InMemoryStore::new();
        InstanceRepository::insert(&store, &instance_request("alpha", 5060)).await.unwrap();

        let err = InstanceRepository::insert(&store, &instance_request("alpha", 7000)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref constraint, .. } if constraint.as_deref() == Some(constraints::INSTANCE_NAME)
        ));

        // 6060 is alpha's HTTP port
        let err = InstanceRepository::insert(
            &store,
            &InstanceCreateDBRequest {
                name: "beta".to_string(),
                ports: PortPair::new(6060, 7060),
                status: InstanceStatus::Running,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref conflicting_value, .. } if conflicting_value.as_deref() == Some("6060")
        ));
    }

    #[tokio::test]
    async fn test_update_moves_port_reservation() {
        let store = InMemoryStore::new();
        let alpha = InstanceRepository::insert(&store, &instance_request("alpha", 5060)).await.unwrap();

        let update = InstanceUpdateDBRequest {
            ports: Some(PortPair::new(5070, 6070)),
            ..Default::default()
        };
        let updated = InstanceRepository::update(&store, alpha.id, &update).await.unwrap();
        assert_eq!(updated.ports(), PortPair::new(5070, 6070));
        assert_eq!(updated.name, "alpha");

        // The old ports are free again
        InstanceRepository::insert(&store, &instance_request("beta", 5060)).await.unwrap();
        let claims = store.list_ports_in_use().await.unwrap();
        assert_eq!(claims.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_extensions() {
        let store = InMemoryStore::new();
        let alpha = InstanceRepository::insert(&store, &instance_request("alpha", 5060)).await.unwrap();
        let beta = InstanceRepository::insert(&store, &instance_request("beta", 5070)).await.unwrap();
        ExtensionRepository::insert(&store, &extension_request(alpha.id, "100")).await.unwrap();
        ExtensionRepository::insert(&store, &extension_request(beta.id, "100")).await.unwrap();

        assert!(InstanceRepository::delete(&store, alpha.id).await.unwrap());
        assert!(!InstanceRepository::delete(&store, alpha.id).await.unwrap());

        assert!(store.list_by_instance(alpha.id).await.unwrap().is_empty());
        assert_eq!(store.list_by_instance(beta.id).await.unwrap().len(), 1);
        assert_eq!(store.list_owner_ids().await.unwrap(), vec![beta.id]);
    }

    #[tokio::test]
    async fn test_extension_requires_existing_instance() {
        let store = InMemoryStore::new();
        let err = ExtensionRepository::insert(&store, &extension_request(Uuid::new_v4(), "100"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[tokio::test]
    async fn test_extensions_listed_in_creation_order() {
        let store = InMemoryStore::new();
        let alpha = InstanceRepository::insert(&store, &instance_request("alpha", 5060)).await.unwrap();
        for username in ["300", "100", "200"] {
            ExtensionRepository::insert(&store, &extension_request(alpha.id, username)).await.unwrap();
        }

        let usernames: Vec<String> = store
            .list_by_instance(alpha.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.username)
            .collect();
        assert_eq!(usernames, vec!["300", "100", "200"]);
    }

    #[tokio::test]
    async fn test_restore_puts_records_back() {
        let store = InMemoryStore::new();
        let alpha = InstanceRepository::insert(&store, &instance_request("alpha", 5060)).await.unwrap();
        let first = ExtensionRepository::insert(&store, &extension_request(alpha.id, "100")).await.unwrap();
        let second = ExtensionRepository::insert(&store, &extension_request(alpha.id, "101")).await.unwrap();

        let snapshot = store.list_by_instance(alpha.id).await.unwrap();
        assert_eq!(store.delete_by_instance(alpha.id).await.unwrap(), 2);
        assert_eq!(store.delete_by_instance(alpha.id).await.unwrap(), 0);

        store.restore(&snapshot).await.unwrap();
        let restored = store.list_by_instance(alpha.id).await.unwrap();
        assert_eq!(restored, vec![first, second]);
    }

    #[tokio::test]
    async fn test_cdr_query_filters_and_pages_newest_first() {
        let cdr = InMemoryCdr::new();
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        for i in 0..5 {
            cdr.record(CdrRecord {
                id: 0,
                calldate: start + Duration::minutes(i),
                clid: format!("\"Ext 10{i}\" <10{i}>"),
                src: format!("10{i}"),
                dst: "200".to_string(),
                duration: 30,
                billsec: 25,
                disposition: if i % 2 == 0 { "ANSWERED" } else { "NO ANSWER" }.to_string(),
                uniqueid: format!("1740819600.{i}"),
                userfield: String::new(),
                instance_name: if i < 4 { "alpha" } else { "beta" }.to_string(),
                accountcode: None,
                dcontext: None,
                channel: None,
                dstchannel: None,
                lastapp: None,
                lastdata: None,
                amaflags: None,
            });
        }

        let mut filter = CdrFilter::new(2, 0);
        filter.instance_name = Some("alpha".to_string());
        let page = cdr.query(&filter).await.unwrap();
        assert_eq!(page.iter().map(|r| r.src.as_str()).collect::<Vec<_>>(), vec!["103", "102"]);

        filter.offset = 2;
        let page = cdr.query(&filter).await.unwrap();
        assert_eq!(page.iter().map(|r| r.src.as_str()).collect::<Vec<_>>(), vec!["101", "100"]);

        let mut filter = CdrFilter::new(10, 0);
        filter.disposition = Some("answered".to_string());
        assert_eq!(cdr.query(&filter).await.unwrap().len(), 3);

        let mut filter = CdrFilter::new(10, 0);
        filter.search = Some("ext 104".to_string());
        let hits = cdr.query(&filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].instance_name, "beta");
    }
}
