//! API models for querying and exporting call detail records.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

use crate::config::CdrConfig;
use crate::db::models::cdr::CdrFilter;
use crate::errors::{Error, Result};

/// Query parameters for `GET /cdr`.
///
/// `limit` defaults to `cdr.default_limit` and is capped at `cdr.max_limit`. Dates accept
/// RFC 3339 timestamps or `YYYY-MM-DD`; a bare `date_to` day is included in full.
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CdrQuery {
    #[param(minimum = 1)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,
    #[param(default = 0, minimum = 0)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub offset: Option<i64>,
    pub instance_name: Option<String>,
    pub src: Option<String>,
    pub dst: Option<String>,
    /// Substring match over src, dst and caller id
    pub search: Option<String>,
    #[param(example = "ANSWERED")]
    pub disposition: Option<String>,
    #[param(example = "2025-03-01")]
    pub date_from: Option<String>,
    #[param(example = "2025-03-31")]
    pub date_to: Option<String>,
}

impl CdrQuery {
    pub fn into_filter(self, config: &CdrConfig) -> Result<CdrFilter> {
        let limit = match self.limit {
            Some(limit) if limit < 1 => return Err(Error::invalid_input("limit", "must be at least 1")),
            Some(limit) => limit.min(config.max_limit),
            None => config.default_limit,
        };
        let offset = match self.offset {
            Some(offset) if offset < 0 => return Err(Error::invalid_input("offset", "must not be negative")),
            Some(offset) => offset,
            None => 0,
        };

        let date_from = self.date_from.as_deref().map(|raw| parse_bound("date_from", raw, false)).transpose()?;
        let date_to = self.date_to.as_deref().map(|raw| parse_bound("date_to", raw, true)).transpose()?;
        if let (Some(from), Some(to)) = (date_from, date_to)
            && from >= to
        {
            return Err(Error::invalid_input("date_to", "must be later than date_from"));
        }

        Ok(CdrFilter {
            instance_name: non_blank(self.instance_name),
            src: non_blank(self.src),
            dst: non_blank(self.dst),
            search: non_blank(self.search),
            disposition: non_blank(self.disposition),
            date_from,
            date_to,
            limit,
            offset,
        })
    }
}

/// Body of `POST /cdr/export`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CdrExportRequest {
    #[serde(default)]
    pub filters: Option<CdrExportFilters>,
}

/// Export filters as sent by the dashboard.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CdrExportFilters {
    /// Substring match over src, dst and caller id
    #[serde(default, alias = "searchQuery")]
    pub search_query: Option<String>,
    /// Disposition; empty or `all` means any
    #[serde(default)]
    #[schema(example = "ANSWERED")]
    pub status: Option<String>,
    /// A single day, `YYYY-MM-DD`
    #[serde(default)]
    #[schema(example = "2025-03-14")]
    pub date: Option<String>,
}

impl CdrExportRequest {
    /// Exports are returned in one piece, up to `cdr.max_limit` rows.
    pub fn into_filter(self, config: &CdrConfig) -> Result<CdrFilter> {
        let filters = self.filters.unwrap_or_default();
        let mut filter = CdrFilter::new(config.max_limit, 0);
        filter.search = non_blank(filters.search_query);
        filter.disposition = non_blank(filters.status).filter(|status| !status.eq_ignore_ascii_case("all"));

        if let Some(raw) = non_blank(filters.date) {
            let day = parse_day("date", &raw)?;
            filter.date_from = Some(start_of(day));
            filter.date_to = Some(next_midnight("date", day)?);
        }
        Ok(filter)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_day(field: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| Error::invalid_input(field, format!("'{raw}' is not a YYYY-MM-DD date")))
}

fn start_of(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn next_midnight(field: &str, day: NaiveDate) -> Result<DateTime<Utc>> {
    day.checked_add_days(Days::new(1))
        .map(start_of)
        .ok_or_else(|| Error::invalid_input(field, "date out of range"))
}

/// Parse a date bound. `end_of_day` turns a bare date into the following midnight so the
/// exclusive upper bound still covers the whole day.
fn parse_bound(field: &str, raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let day = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| Error::invalid_input(field, format!("'{raw}' is neither RFC 3339 nor YYYY-MM-DD")))?;
    if end_of_day { next_midnight(field, day) } else { Ok(start_of(day)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> CdrConfig {
        CdrConfig {
            default_limit: 100,
            max_limit: 1000,
        }
    }

    #[test]
    fn test_limits_default_and_clamp() {
        let filter = CdrQuery::default().into_filter(&config()).unwrap();
        assert_eq!((filter.limit, filter.offset), (100, 0));

        let query = CdrQuery {
            limit: Some(50_000),
            offset: Some(20),
            ..Default::default()
        };
        let filter = query.into_filter(&config()).unwrap();
        assert_eq!((filter.limit, filter.offset), (1000, 20));

        let zero = CdrQuery {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(zero.into_filter(&config()), Err(Error::InvalidInput { ref field, .. }) if field == "limit"));
    }

    #[test]
    fn test_date_only_upper_bound_covers_whole_day() {
        let query = CdrQuery {
            date_from: Some("2025-03-01".to_string()),
            date_to: Some("2025-03-01".to_string()),
            ..Default::default()
        };
        let filter = query.into_filter(&config()).unwrap();
        assert_eq!(filter.date_from, Some(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(filter.date_to, Some(Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_bad_dates_rejected() {
        let query = CdrQuery {
            date_from: Some("last tuesday".to_string()),
            ..Default::default()
        };
        assert!(matches!(query.into_filter(&config()), Err(Error::InvalidInput { ref field, .. }) if field == "date_from"));

        let inverted = CdrQuery {
            date_from: Some("2025-03-05T00:00:00Z".to_string()),
            date_to: Some("2025-03-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        assert!(inverted.into_filter(&config()).is_err());
    }

    #[test]
    fn test_export_filters_from_dashboard_body() {
        let body: CdrExportRequest =
            serde_json::from_value(serde_json::json!({"filters": {"searchQuery": " 555 ", "status": "all", "date": "2025-03-14"}}))
                .unwrap();
        let filter = body.into_filter(&config()).unwrap();
        assert_eq!(filter.search.as_deref(), Some("555"));
        assert_eq!(filter.disposition, None);
        assert_eq!(filter.date_from, Some(Utc.with_ymd_and_hms(2025, 3, 14, 0, 0, 0).unwrap()));
        assert_eq!(filter.limit, 1000);

        let empty: CdrExportRequest = serde_json::from_str("{}").unwrap();
        let filter = empty.into_filter(&config()).unwrap();
        assert!(filter.search.is_none() && filter.date_from.is_none());
    }
}
