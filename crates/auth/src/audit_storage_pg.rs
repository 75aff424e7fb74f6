//! PostgreSQL storage backend for audit logs.

use backoffice_core::types::{AuditAction, AuditCategory, AuditSeverity, AuditStatus};
use backoffice_core::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::audit::{
    AuditLogEntry, AuditLogFilter, AuditStatistics, AuditStorage, PageWindow, SortField,
    StatisticsPeriod, UserActivity,
};

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, user_email, user_name, user_role, action, resource, details,
           ip_address, user_agent, session_id, request_id, status, severity, category,
           subcategory, metadata, created_at
    FROM audit_logs
"#;

/// ORDER BY clause for a filter. Severity sorts by rank, not by its text.
fn order_by(filter: &AuditLogFilter) -> String {
    let direction = filter.order().as_sql();
    // Sort column comes from a closed enum, never from caller text.
    let key = match filter.sort_field() {
        SortField::Severity => {
            let arms: String = AuditSeverity::ALL
                .iter()
                .enumerate()
                .map(|(rank, severity)| format!(" WHEN '{}' THEN {}", severity.as_str(), rank))
                .collect();
            format!("CASE severity{} END", arms)
        }
        field => field.column().to_string(),
    };
    format!(" ORDER BY {key} {direction}, id {direction}")
}

/// PostgreSQL-backed audit storage.
pub struct PostgresAuditStorage {
    pool: PgPool,
}

impl PostgresAuditStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row for audit entries.
#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    user_id: String,
    user_email: String,
    user_name: Option<String>,
    user_role: String,
    action: String,
    resource: String,
    details: Option<serde_json::Value>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    session_id: Option<String>,
    request_id: Option<String>,
    status: String,
    severity: String,
    category: String,
    subcategory: String,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_entry(self) -> Result<AuditLogEntry> {
        Ok(AuditLogEntry {
            id: self.id,
            user_id: self.user_id,
            user_email: self.user_email,
            user_name: self.user_name,
            user_role: self.user_role,
            action: self.action.parse::<AuditAction>()?,
            resource: self.resource,
            details: self.details.unwrap_or(serde_json::Value::Null),
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            session_id: self.session_id,
            request_id: self.request_id,
            status: self.status.parse::<AuditStatus>()?,
            severity: self.severity.parse::<AuditSeverity>()?,
            category: self.category.parse::<AuditCategory>()?,
            subcategory: self.subcategory,
            metadata: self.metadata.unwrap_or(serde_json::Value::Null),
            created_at: self.created_at,
        })
    }
}

enum Bind {
    Text(String),
    Time(DateTime<Utc>),
    Int(i64),
}

/// WHERE clause with positional parameters, built alongside its bind values.
#[derive(Default)]
struct SqlFilter {
    conditions: Vec<String>,
    binds: Vec<Bind>,
}

impl SqlFilter {
    fn from_filter(filter: &AuditLogFilter) -> Self {
        let mut sql = Self::default();

        sql.push_eq("user_id", filter.user_id.clone());
        if let Some(email) = &filter.user_email {
            let n = sql.bind(Bind::Text(like_pattern(email)));
            sql.conditions.push(format!("user_email ILIKE ${n}"));
        }
        sql.push_eq("user_role", filter.user_role.clone());
        sql.push_eq("action", filter.action.map(|a| a.as_str().to_string()));
        sql.push_eq("resource", filter.resource.clone());
        sql.push_eq("status", filter.status.map(|s| s.as_str().to_string()));
        sql.push_eq("severity", filter.severity.map(|s| s.as_str().to_string()));
        sql.push_eq("category", filter.category.map(|c| c.as_str().to_string()));
        sql.push_eq("subcategory", filter.subcategory.clone());
        sql.push_eq("ip_address", filter.ip_address.clone());
        sql.push_eq("session_id", filter.session_id.clone());
        sql.push_eq("request_id", filter.request_id.clone());

        if let Some(from) = filter.start_date {
            let n = sql.bind(Bind::Time(from));
            sql.conditions.push(format!("created_at >= ${n}"));
        }
        if let Some(to) = filter.end_date {
            let n = sql.bind(Bind::Time(to));
            sql.conditions.push(format!("created_at <= ${n}"));
        }
        if let Some(search) = &filter.search {
            let n = sql.bind(Bind::Text(like_pattern(search)));
            sql.conditions.push(format!(
                "(user_name ILIKE ${n} OR user_email ILIKE ${n} OR action ILIKE ${n})"
            ));
        }

        sql
    }

    fn bind(&mut self, value: Bind) -> usize {
        self.binds.push(value);
        self.binds.len()
    }

    fn push_eq(&mut self, column: &str, value: Option<String>) {
        if let Some(value) = value {
            let n = self.bind(Bind::Text(value));
            self.conditions.push(format!("{column} = ${n}"));
        }
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    fn apply<'q, O>(
        &'q self,
        mut query: QueryAs<'q, Postgres, O, PgArguments>,
    ) -> QueryAs<'q, Postgres, O, PgArguments> {
        for bind in &self.binds {
            query = match bind {
                Bind::Text(v) => query.bind(v),
                Bind::Time(v) => query.bind(v),
                Bind::Int(v) => query.bind(v),
            };
        }
        query
    }
}

/// `%needle%` with LIKE metacharacters escaped.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait::async_trait]
impl AuditStorage for PostgresAuditStorage {
    async fn store(&self, entry: &AuditLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, user_id, user_email, user_name, user_role, action, resource, details,
                ip_address, user_agent, session_id, request_id, status, severity, category,
                subcategory, metadata, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.user_id)
        .bind(&entry.user_email)
        .bind(&entry.user_name)
        .bind(&entry.user_role)
        .bind(entry.action.as_str())
        .bind(&entry.resource)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.session_id)
        .bind(&entry.request_id)
        .bind(entry.status.as_str())
        .bind(entry.severity.as_str())
        .bind(entry.category.as_str())
        .bind(&entry.subcategory)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditLogFilter,
        window: Option<PageWindow>,
    ) -> Result<Vec<AuditLogEntry>> {
        let mut sql = SqlFilter::from_filter(filter);

        let mut query = format!("{}{}{}", SELECT_COLUMNS, sql.where_clause(), order_by(filter));

        if let Some(w) = window {
            let limit = sql.bind(Bind::Int(i64::from(w.limit)));
            let offset = sql.bind(Bind::Int(w.offset as i64));
            query.push_str(&format!(" LIMIT ${limit} OFFSET ${offset}"));
        }

        let rows = sql
            .apply(sqlx::query_as::<_, AuditRow>(&query))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(AuditRow::into_entry).collect()
    }

    async fn count(&self, filter: &AuditLogFilter) -> Result<u64> {
        let sql = SqlFilter::from_filter(filter);
        let query = format!("SELECT COUNT(*) FROM audit_logs{}", sql.where_clause());

        let (count,): (i64,) = sql
            .apply(sqlx::query_as(&query))
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }

    async fn statistics(
        &self,
        period: StatisticsPeriod,
        since: DateTime<Utc>,
    ) -> Result<AuditStatistics> {
        let mut stats = AuditStatistics::empty(period, since);

        let by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM audit_logs WHERE created_at >= $1 GROUP BY status",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        for (status, count) in by_status {
            stats.total += count as u64;
            stats.record_status(status.parse::<AuditStatus>()?, count as u64);
        }

        let by_category: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM audit_logs WHERE created_at >= $1 GROUP BY category",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        stats.by_category = by_category
            .into_iter()
            .map(|(category, count)| (category, count as u64))
            .collect();

        let by_severity: Vec<(String, i64)> = sqlx::query_as(
            "SELECT severity, COUNT(*) FROM audit_logs WHERE created_at >= $1 GROUP BY severity",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        stats.by_severity = by_severity
            .into_iter()
            .map(|(severity, count)| (severity, count as u64))
            .collect();

        let top_users: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT user_id, MAX(user_email), COUNT(*) AS n
            FROM audit_logs
            WHERE created_at >= $1
            GROUP BY user_id
            ORDER BY n DESC, user_id ASC
            LIMIT 10
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        stats.set_top_users(
            top_users
                .into_iter()
                .map(|(user_id, user_email, count)| UserActivity {
                    user_id,
                    user_email,
                    count: count as u64,
                })
                .collect(),
        );

        let hourly: Vec<(i32, i64)> = sqlx::query_as(
            r#"
            SELECT EXTRACT(HOUR FROM created_at AT TIME ZONE 'UTC')::int AS hour, COUNT(*)
            FROM audit_logs
            WHERE created_at >= $1
            GROUP BY hour
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        for (hour, count) in hourly {
            stats.record_hour(hour as u32, count as u64);
        }

        Ok(stats)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::SortOrder;

    #[test]
    fn test_where_clause_numbering() {
        let filter = AuditLogFilter {
            user_id: Some("u-1".to_string()),
            user_email: Some("alice".to_string()),
            action: Some(AuditAction::Login),
            search: Some("bob".to_string()),
            ..Default::default()
        };
        let sql = SqlFilter::from_filter(&filter);

        assert_eq!(
            sql.where_clause(),
            " WHERE user_id = $1 AND user_email ILIKE $2 AND action = $3 \
             AND (user_name ILIKE $4 OR user_email ILIKE $4 OR action ILIKE $4)"
        );
        assert_eq!(sql.binds.len(), 4);
    }

    #[test]
    fn test_empty_filter_has_no_where() {
        assert_eq!(SqlFilter::from_filter(&AuditLogFilter::new()).where_clause(), "");
    }

    #[test]
    fn test_like_pattern_escapes() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_severity_orders_by_rank() {
        let filter = AuditLogFilter::new().sort(SortField::Severity, SortOrder::Asc);
        assert_eq!(
            order_by(&filter),
            " ORDER BY CASE severity WHEN 'LOW' THEN 0 WHEN 'MEDIUM' THEN 1 \
             WHEN 'HIGH' THEN 2 WHEN 'CRITICAL' THEN 3 END ASC, id ASC"
        );
    }

    #[test]
    fn test_plain_columns_order_by_name() {
        assert_eq!(
            order_by(&AuditLogFilter::new()),
            " ORDER BY created_at DESC, id DESC"
        );
        let filter = AuditLogFilter::new().sort(SortField::Status, SortOrder::Asc);
        assert_eq!(order_by(&filter), " ORDER BY status ASC, id ASC");
    }
}
