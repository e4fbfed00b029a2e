//! PostgreSQL storage backend.
//!
//! Schema lives in `migrations/`. Port uniqueness across both roles is enforced by the
//! `instance_ports` table, whose primary key is the port itself; instance inserts and
//! port moves write both tables in one transaction.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, query_builder::QueryBuilder};
use tracing::instrument;
use uuid::Uuid;

use super::repository::{CdrSource, ExtensionRepository, InstanceRepository};
use crate::db::errors::{DbError, Result};
use crate::db::models::{
    cdr::{CdrFilter, CdrRecord},
    extensions::{ExtensionCreateDBRequest, ExtensionDBResponse, SipSecret},
    instances::{InstanceCreateDBRequest, InstanceDBResponse, InstanceStatus, InstanceUpdateDBRequest},
};
use crate::ports::{PortClaim, PortPair};
use crate::types::{ExtensionId, InstanceId, abbrev_uuid};

// Database entity models
#[derive(Debug, Clone, FromRow)]
struct Instance {
    id: InstanceId,
    name: String,
    sip_port: i32,
    http_port: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn port_from_db(port: i32) -> Result<u16> {
    u16::try_from(port).map_err(|_| DbError::Other(anyhow!("stored port {port} is out of range")))
}

impl TryFrom<Instance> for InstanceDBResponse {
    type Error = DbError;

    fn try_from(instance: Instance) -> Result<Self> {
        let status = instance.status.parse::<InstanceStatus>().map_err(|e| DbError::Other(anyhow!(e)))?;
        Ok(Self {
            id: instance.id,
            name: instance.name,
            sip_port: port_from_db(instance.sip_port)?,
            http_port: port_from_db(instance.http_port)?,
            status,
            created_at: instance.created_at,
            updated_at: instance.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct Extension {
    id: ExtensionId,
    instance_id: InstanceId,
    username: String,
    secret: String,
    caller_id: String,
    account_code: Option<String>,
    context: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<Extension> for ExtensionDBResponse {
    fn from(extension: Extension) -> Self {
        Self {
            id: extension.id,
            instance_id: extension.instance_id,
            username: extension.username,
            secret: SipSecret::new(extension.secret),
            caller_id: extension.caller_id,
            account_code: extension.account_code,
            context: extension.context,
            created_at: extension.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct Cdr {
    id: i64,
    calldate: DateTime<Utc>,
    clid: String,
    src: String,
    dst: String,
    duration: i32,
    billsec: i32,
    disposition: String,
    uniqueid: String,
    userfield: String,
    instance_name: String,
    accountcode: Option<String>,
    dcontext: Option<String>,
    channel: Option<String>,
    dstchannel: Option<String>,
    lastapp: Option<String>,
    lastdata: Option<String>,
    amaflags: Option<i32>,
}

impl From<Cdr> for CdrRecord {
    fn from(cdr: Cdr) -> Self {
        Self {
            id: cdr.id,
            calldate: cdr.calldate,
            clid: cdr.clid,
            src: cdr.src,
            dst: cdr.dst,
            duration: cdr.duration,
            billsec: cdr.billsec,
            disposition: cdr.disposition,
            uniqueid: cdr.uniqueid,
            userfield: cdr.userfield,
            instance_name: cdr.instance_name,
            accountcode: cdr.accountcode,
            dcontext: cdr.dcontext,
            channel: cdr.channel,
            dstchannel: cdr.dstchannel,
            lastapp: cdr.lastapp,
            lastdata: cdr.lastdata,
            amaflags: cdr.amaflags,
        }
    }
}

const INSTANCE_COLUMNS: &str = "id, name, sip_port, http_port, status, created_at, updated_at";
const EXTENSION_COLUMNS: &str = "id, instance_id, username, secret, caller_id, account_code, context, created_at";

async fn reserve_ports(tx: &mut sqlx::PgConnection, instance_id: InstanceId, ports: &PortPair) -> Result<()> {
    sqlx::query("INSERT INTO instance_ports (port, instance_id) VALUES ($1, $3), ($2, $3)")
        .bind(i32::from(ports.sip_port))
        .bind(i32::from(ports.http_port))
        .bind(instance_id)
        .execute(tx)
        .await?;
    Ok(())
}

/// Instance repository backed by PostgreSQL.
#[derive(Clone)]
pub struct PgInstances {
    pool: PgPool,
}

impl PgInstances {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InstanceRepository for PgInstances {
    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<InstanceDBResponse>> {
        let rows = sqlx::query_as::<_, Instance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances ORDER BY created_at ASC, seq ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InstanceDBResponse::try_from).collect()
    }

    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&id)), err)]
    async fn get(&self, id: InstanceId) -> Result<Option<InstanceDBResponse>> {
        let row = sqlx::query_as::<_, Instance>(&format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(InstanceDBResponse::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn get_by_name(&self, name: &str) -> Result<Option<InstanceDBResponse>> {
        let row = sqlx::query_as::<_, Instance>(&format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE name = $1"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(InstanceDBResponse::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_ports_in_use(&self) -> Result<Vec<PortClaim>> {
        let rows: Vec<(InstanceId, i32, i32)> = sqlx::query_as("SELECT id, sip_port, http_port FROM instances")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(instance_id, sip, http)| {
                Ok(PortClaim {
                    instance_id,
                    ports: PortPair::new(port_from_db(sip)?, port_from_db(http)?),
                })
            })
            .collect()
    }

    #[instrument(skip(self, request), fields(name = %request.name, sip_port = request.ports.sip_port), err)]
    async fn insert(&self, request: &InstanceCreateDBRequest) -> Result<InstanceDBResponse> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Instance>(&format!(
            "INSERT INTO instances (id, name, sip_port, http_port, status)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&request.name)
        .bind(i32::from(request.ports.sip_port))
        .bind(i32::from(request.ports.http_port))
        .bind(request.status.to_db_string())
        .fetch_one(&mut *tx)
        .await?;

        reserve_ports(&mut tx, row.id, &request.ports).await?;
        tx.commit().await?;

        row.try_into()
    }

    #[instrument(skip(self, request), fields(instance_id = %abbrev_uuid(&id)), err)]
    async fn update(&self, id: InstanceId, request: &InstanceUpdateDBRequest) -> Result<InstanceDBResponse> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<(InstanceId,)> = sqlx::query_as("SELECT id FROM instances WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(DbError::NotFound);
        }

        if let Some(ports) = &request.ports {
            sqlx::query("DELETE FROM instance_ports WHERE instance_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            reserve_ports(&mut tx, id, ports).await?;
        }

        let row = sqlx::query_as::<_, Instance>(&format!(
            "UPDATE instances SET
                name = COALESCE($2, name),
                sip_port = COALESCE($3, sip_port),
                http_port = COALESCE($4, http_port),
                status = COALESCE($5, status),
                updated_at = NOW()
             WHERE id = $1
             RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(id)
        .bind(request.name.as_deref())
        .bind(request.ports.map(|p| i32::from(p.sip_port)))
        .bind(request.ports.map(|p| i32::from(p.http_port)))
        .bind(request.status.map(|s| s.to_db_string()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&id)), err)]
    async fn delete(&self, id: InstanceId) -> Result<bool> {
        // Port reservations and any remaining extensions go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Extension repository backed by PostgreSQL.
#[derive(Clone)]
pub struct PgExtensions {
    pool: PgPool,
}

impl PgExtensions {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ExtensionRepository for PgExtensions {
    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&instance_id)), err)]
    async fn list_by_instance(&self, instance_id: InstanceId) -> Result<Vec<ExtensionDBResponse>> {
        let rows = sqlx::query_as::<_, Extension>(&format!(
            "SELECT {EXTENSION_COLUMNS} FROM extensions WHERE instance_id = $1 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self), fields(extension_id = %abbrev_uuid(&id)), err)]
    async fn get(&self, id: ExtensionId) -> Result<Option<ExtensionDBResponse>> {
        let row = sqlx::query_as::<_, Extension>(&format!("SELECT {EXTENSION_COLUMNS} FROM extensions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&instance_id)), err)]
    async fn get_by_username(&self, instance_id: InstanceId, username: &str) -> Result<Option<ExtensionDBResponse>> {
        let row = sqlx::query_as::<_, Extension>(&format!(
            "SELECT {EXTENSION_COLUMNS} FROM extensions WHERE instance_id = $1 AND username = $2"
        ))
        .bind(instance_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, request), fields(instance_id = %abbrev_uuid(&request.instance_id), username = %request.username), err)]
    async fn insert(&self, request: &ExtensionCreateDBRequest) -> Result<ExtensionDBResponse> {
        let row = sqlx::query_as::<_, Extension>(&format!(
            "INSERT INTO extensions (id, instance_id, username, secret, caller_id, account_code, context)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {EXTENSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(request.instance_id)
        .bind(&request.username)
        .bind(request.secret.expose())
        .bind(&request.caller_id)
        .bind(request.account_code.as_deref())
        .bind(request.context.as_deref())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    #[instrument(skip(self), fields(extension_id = %abbrev_uuid(&id)), err)]
    async fn delete(&self, id: ExtensionId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM extensions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(instance_id = %abbrev_uuid(&instance_id)), err)]
    async fn delete_by_instance(&self, instance_id: InstanceId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM extensions WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, records), fields(count = records.len()), err)]
    async fn restore(&self, records: &[ExtensionDBResponse]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "INSERT INTO extensions (id, instance_id, username, secret, caller_id, account_code, context, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(record.id)
            .bind(record.instance_id)
            .bind(&record.username)
            .bind(record.secret.expose())
            .bind(&record.caller_id)
            .bind(record.account_code.as_deref())
            .bind(record.context.as_deref())
            .bind(record.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_owner_ids(&self) -> Result<Vec<InstanceId>> {
        let rows: Vec<(InstanceId,)> = sqlx::query_as("SELECT DISTINCT instance_id FROM extensions")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

/// Call detail records read from the `cdr` table.
#[derive(Clone)]
pub struct PgCdr {
    pool: PgPool,
}

impl PgCdr {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CdrSource for PgCdr {
    #[instrument(skip(self, filter), fields(limit = filter.limit, offset = filter.offset), err)]
    async fn query(&self, filter: &CdrFilter) -> Result<Vec<CdrRecord>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM cdr WHERE 1=1");

        if let Some(name) = &filter.instance_name {
            query.push(" AND instance_name = ").push_bind(name);
        }
        if let Some(src) = &filter.src {
            query.push(" AND src = ").push_bind(src);
        }
        if let Some(dst) = &filter.dst {
            query.push(" AND dst = ").push_bind(dst);
        }
        if let Some(disposition) = &filter.disposition {
            query.push(" AND UPPER(disposition) = UPPER(").push_bind(disposition).push(")");
        }
        if let Some(from) = filter.date_from {
            query.push(" AND calldate >= ").push_bind(from);
        }
        if let Some(to) = filter.date_to {
            query.push(" AND calldate < ").push_bind(to);
        }
        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", search.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_"));
            query
                .push(" AND (src ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR dst ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR clid ILIKE ")
                .push_bind(pattern)
                .push(")");
        }

        query
            .push(" ORDER BY calldate DESC, id DESC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset);

        let rows = query.build_query_as::<Cdr>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::errors::constraints;

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
            secret: SipSecret::new("s3cret"),
            caller_id: format!("Ext {username}"),
            account_code: None,
            context: Some("from-internal".to_string()),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_port_collides_across_roles(pool: PgPool) {
        let instances = PgInstances::new(pool);
        instances.insert(&instance_request("alpha", 5060)).await.unwrap();

        let err = instances
            .insert(&InstanceCreateDBRequest {
                name: "beta".to_string(),
                ports: PortPair::new(6060, 7060),
                status: InstanceStatus::Running,
            })
            .await
            .unwrap_err();
        match err {
            DbError::UniqueViolation {
                constraint,
                conflicting_value,
                ..
            } => {
                assert_eq!(constraint.as_deref(), Some(constraints::INSTANCE_PORT));
                assert_eq!(conflicting_value.as_deref(), Some("6060"));
            }
            other => panic!("expected unique violation, got {other:?}"),
        }

        // The failed insert left nothing behind
        assert_eq!(instances.list().await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_duplicate_name_rejected(pool: PgPool) {
        let instances = PgInstances::new(pool);
        instances.insert(&instance_request("alpha", 5060)).await.unwrap();
        let err = instances.insert(&instance_request("alpha", 5070)).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref constraint, .. } if constraint.as_deref() == Some(constraints::INSTANCE_NAME)
        ));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_update_moves_ports_and_keeps_name(pool: PgPool) {
        let instances = PgInstances::new(pool);
        let alpha = instances.insert(&instance_request("alpha", 5060)).await.unwrap();

        let updated = instances
            .update(
                alpha.id,
                &InstanceUpdateDBRequest {
                    ports: Some(PortPair::new(5060, 6100)),
                    status: Some(InstanceStatus::Stopped),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "alpha");
        assert_eq!(updated.http_port, 6100);
        assert_eq!(updated.status, InstanceStatus::Stopped);

        // 6060 was released
        instances
            .insert(&InstanceCreateDBRequest {
                name: "beta".to_string(),
                ports: PortPair::new(6060, 7060),
                status: InstanceStatus::Running,
            })
            .await
            .unwrap();

        let err = instances
            .update(Uuid::new_v4(), &InstanceUpdateDBRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_extensions_scoped_and_restorable(pool: PgPool) {
        let instances = PgInstances::new(pool.clone());
        let extensions = PgExtensions::new(pool);
        let alpha = instances.insert(&instance_request("alpha", 5060)).await.unwrap();
        let beta = instances.insert(&instance_request("beta", 5070)).await.unwrap();

        extensions.insert(&extension_request(alpha.id, "100")).await.unwrap();
        extensions.insert(&extension_request(alpha.id, "101")).await.unwrap();
        extensions.insert(&extension_request(beta.id, "100")).await.unwrap();

        let err = extensions.insert(&extension_request(alpha.id, "100")).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::UniqueViolation { ref conflicting_value, .. } if conflicting_value.as_deref() == Some("100")
        ));

        let snapshot = extensions.list_by_instance(alpha.id).await.unwrap();
        assert_eq!(snapshot.iter().map(|e| e.username.as_str()).collect::<Vec<_>>(), vec!["100", "101"]);

        assert_eq!(extensions.delete_by_instance(alpha.id).await.unwrap(), 2);
        assert_eq!(extensions.delete_by_instance(alpha.id).await.unwrap(), 0);
        extensions.restore(&snapshot).await.unwrap();
        assert_eq!(extensions.list_by_instance(alpha.id).await.unwrap(), snapshot);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_extension_requires_instance(pool: PgPool) {
        let extensions = PgExtensions::new(pool);
        let err = extensions
            .insert(&extension_request(Uuid::new_v4(), "100"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_cdr_query(pool: PgPool) {
        sqlx::query(
            "INSERT INTO cdr (calldate, clid, src, dst, duration, billsec, disposition, uniqueid, instance_name)
             VALUES
             ('2025-03-01T09:00:00Z', '\"Ext 100\" <100>', '100', '200', 30, 25, 'ANSWERED', 'a.1', 'alpha'),
             ('2025-03-01T09:05:00Z', '\"Ext 101\" <101>', '101', '200', 10, 0, 'NO ANSWER', 'a.2', 'alpha'),
             ('2025-03-01T09:10:00Z', '\"Ext 100\" <100>', '100', '300', 60, 55, 'ANSWERED', 'b.1', 'beta')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let cdr = PgCdr::new(pool);

        let mut filter = CdrFilter::new(10, 0);
        filter.instance_name = Some("alpha".to_string());
        let rows = cdr.query(&filter).await.unwrap();
        assert_eq!(rows.iter().map(|r| r.uniqueid.as_str()).collect::<Vec<_>>(), vec!["a.2", "a.1"]);

        let mut filter = CdrFilter::new(10, 0);
        filter.disposition = Some("answered".to_string());
        filter.search = Some("ext 100".to_string());
        assert_eq!(cdr.query(&filter).await.unwrap().len(), 2);

        let filter = CdrFilter::new(1, 1);
        let rows = cdr.query(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].uniqueid, "a.2");
    }
}
