use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One call detail record, as written by the PBX when a call terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CdrRecord {
    pub id: i64,
    pub calldate: DateTime<Utc>,
    /// Caller id as presented on the call
    pub clid: String,
    pub src: String,
    pub dst: String,
    /// Total call duration in seconds
    pub duration: i32,
    /// Billable (answered) seconds
    pub billsec: i32,
    /// ANSWERED, NO ANSWER, BUSY, FAILED, ...
    pub disposition: String,
    pub uniqueid: String,
    pub userfield: String,
    /// Name of the instance the call went through
    pub instance_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accountcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dcontext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dstchannel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastapp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lastdata: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amaflags: Option<i32>,
}

/// Filter for querying call detail records. All conditions are combined with AND.
#[derive(Debug, Clone, Default)]
pub struct CdrFilter {
    pub instance_name: Option<String>,
    pub src: Option<String>,
    pub dst: Option<String>,
    /// Case-insensitive substring over src, dst and clid
    pub search: Option<String>,
    pub disposition: Option<String>,
    /// Inclusive lower bound on calldate
    pub date_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on calldate
    pub date_to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl CdrFilter {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            ..Default::default()
        }
    }

    /// In-process evaluation of every condition except paging.
    pub fn matches(&self, record: &CdrRecord) -> bool {
        if let Some(name) = &self.instance_name
            && &record.instance_name != name
        {
            return false;
        }
        if let Some(src) = &self.src
            && &record.src != src
        {
            return false;
        }
        if let Some(dst) = &self.dst
            && &record.dst != dst
        {
            return false;
        }
        if let Some(disposition) = &self.disposition
            && !record.disposition.eq_ignore_ascii_case(disposition)
        {
            return false;
        }
        if let Some(from) = self.date_from
            && record.calldate < from
        {
            return false;
        }
        if let Some(to) = self.date_to
            && record.calldate >= to
        {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = [&record.src, &record.dst, &record.clid]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}
