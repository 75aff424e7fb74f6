//! Audit logging for security and compliance.
//!
//! Entries are written once and only ever removed by the retention purge.
//! Category, severity and subcategory come from the per-action lookup tables
//! in [`AuditAction`] unless a caller overrides them.

use backoffice_core::types::{
    AuditAction, AuditCategory, AuditSeverity, AuditStatus, Permission, Principal, Resource,
};
use backoffice_core::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit_export::ExportFormat;
use crate::context::RequestContext;
use crate::error::{AccessError, AccessResult};
use crate::user_agent::ClientInfo;

/// Placeholder identity for requests without a principal.
pub const ANONYMOUS: &str = "anonymous";

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 1000;
const TOP_USERS: usize = 10;

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub user_email: String,
    pub user_name: Option<String>,
    pub user_role: String,
    pub action: AuditAction,
    pub resource: String,
    pub details: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub status: AuditStatus,
    pub severity: AuditSeverity,
    pub category: AuditCategory,
    pub subcategory: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn builder(action: AuditAction, resource: impl Into<String>) -> AuditLogEntryBuilder {
        AuditLogEntryBuilder {
            action,
            resource: resource.into(),
            user_id: ANONYMOUS.to_string(),
            user_email: ANONYMOUS.to_string(),
            user_name: None,
            user_role: ANONYMOUS.to_string(),
            details: Value::Object(Default::default()),
            ip_address: None,
            user_agent: None,
            session_id: None,
            request_id: None,
            status: AuditStatus::Success,
            severity: None,
            subcategory: None,
            metadata: serde_json::Map::new(),
            created_at: None,
        }
    }
}

/// Builder for audit entries.
pub struct AuditLogEntryBuilder {
    action: AuditAction,
    resource: String,
    user_id: String,
    user_email: String,
    user_name: Option<String>,
    user_role: String,
    details: Value,
    ip_address: Option<String>,
    user_agent: Option<String>,
    session_id: Option<String>,
    request_id: Option<String>,
    status: AuditStatus,
    severity: Option<AuditSeverity>,
    subcategory: Option<String>,
    metadata: serde_json::Map<String, Value>,
    created_at: Option<DateTime<Utc>>,
}

impl AuditLogEntryBuilder {
    pub fn actor(mut self, principal: &Principal) -> Self {
        self.user_id = principal.id.clone();
        self.user_email = principal.email.clone();
        self.user_name = principal.name.clone();
        self.user_role = principal.role.clone();
        self
    }

    /// Attribute the entry to an unauthenticated caller, keeping the email
    /// they claimed when there is one.
    pub fn anonymous(mut self, claimed_email: Option<&str>) -> Self {
        self.user_id = ANONYMOUS.to_string();
        self.user_email = claimed_email.unwrap_or(ANONYMOUS).to_string();
        self.user_name = None;
        self.user_role = ANONYMOUS.to_string();
        self
    }

    /// Copy request metadata, and the principal when one is attached.
    pub fn context(mut self, ctx: &RequestContext) -> Self {
        if let Some(principal) = &ctx.principal {
            self = self.actor(principal);
        }
        self.ip_address = ctx.client_ip.clone();
        self.user_agent = ctx.user_agent.clone();
        self.session_id = ctx.session_id.clone();
        self.request_id = Some(ctx.request_id.clone());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn status(mut self, status: AuditStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as failed and record the reason in `details.error`.
    pub fn failure(mut self, reason: impl Into<String>) -> Self {
        self.status = AuditStatus::Failure;
        let reason = Value::String(reason.into());
        match &mut self.details {
            Value::Object(map) => {
                map.insert("error".to_string(), reason);
            }
            other => {
                *other = json!({ "error": reason, "value": other.take() });
            }
        }
        self
    }

    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn build(self) -> AuditLogEntry {
        let mut metadata = self.metadata;
        let client = ClientInfo::from_user_agent(self.user_agent.as_deref());
        metadata.entry("browser").or_insert(Value::String(client.browser));
        metadata.entry("os").or_insert(Value::String(client.os));
        metadata.entry("device").or_insert(Value::String(client.device));

        AuditLogEntry {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            user_email: self.user_email,
            user_name: self.user_name,
            user_role: self.user_role,
            action: self.action,
            resource: self.resource,
            details: self.details,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            session_id: self.session_id,
            request_id: self.request_id,
            status: self.status,
            severity: self.severity.unwrap_or_else(|| self.action.severity()),
            category: self.action.category(),
            subcategory: self
                .subcategory
                .unwrap_or_else(|| self.action.subcategory().to_string()),
            metadata: Value::Object(metadata),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    Action,
    UserEmail,
    Severity,
    Status,
    Category,
}

impl SortField {
    /// Column name in the `audit_logs` table.
    pub fn column(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::Action => "action",
            SortField::UserEmail => "user_email",
            SortField::Severity => "severity",
            SortField::Status => "status",
            SortField::Category => "category",
        }
    }

    fn compare(&self, a: &AuditLogEntry, b: &AuditLogEntry) -> Ordering {
        match self {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::Action => a.action.as_str().cmp(b.action.as_str()),
            SortField::UserEmail => a.user_email.cmp(&b.user_email),
            SortField::Severity => a.severity.cmp(&b.severity),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
            SortField::Category => a.category.as_str().cmp(b.category.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Query over the audit trail. Unset fields do not constrain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditLogFilter {
    pub user_id: Option<String>,
    /// Case-insensitive substring.
    pub user_email: Option<String>,
    pub user_role: Option<String>,
    pub action: Option<AuditAction>,
    pub resource: Option<String>,
    pub status: Option<AuditStatus>,
    pub severity: Option<AuditSeverity>,
    pub category: Option<AuditCategory>,
    pub subcategory: Option<String>,
    pub ip_address: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Case-insensitive substring over user name, user email and action.
    pub search: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl AuditLogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.start_date = Some(from);
        self
    }

    pub fn time_range(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.start_date = Some(from);
        self.end_date = Some(to);
        self
    }

    pub fn sort(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_by = Some(field);
        self.sort_order = Some(order);
        self
    }

    pub fn paginate(mut self, page: u32, limit: u32) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    pub fn sort_field(&self) -> SortField {
        self.sort_by.unwrap_or_default()
    }

    pub fn order(&self) -> SortOrder {
        self.sort_order.unwrap_or_default()
    }

    /// Page 1-based and at least 1; limit clamped to `1..=1000`.
    pub fn page_window(&self) -> PageWindow {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        PageWindow {
            page,
            limit,
            offset: u64::from(page - 1) * u64::from(limit),
        }
    }

    /// In-process evaluation, matching the WHERE clause the Postgres storage builds.
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().is_none_or(|f| f == value)
        }
        fn eq_opt(filter: &Option<String>, value: &Option<String>) -> bool {
            filter.as_deref().is_none_or(|f| value.as_deref() == Some(f))
        }

        eq(&self.user_id, &entry.user_id)
            && self
                .user_email
                .as_deref()
                .is_none_or(|needle| contains_ignore_case(&entry.user_email, needle))
            && eq(&self.user_role, &entry.user_role)
            && self.action.is_none_or(|a| a == entry.action)
            && eq(&self.resource, &entry.resource)
            && self.status.is_none_or(|s| s == entry.status)
            && self.severity.is_none_or(|s| s == entry.severity)
            && self.category.is_none_or(|c| c == entry.category)
            && eq(&self.subcategory, &entry.subcategory)
            && eq_opt(&self.ip_address, &entry.ip_address)
            && eq_opt(&self.session_id, &entry.session_id)
            && eq_opt(&self.request_id, &entry.request_id)
            && self.start_date.is_none_or(|from| entry.created_at >= from)
            && self.end_date.is_none_or(|to| entry.created_at <= to)
            && self.search.as_deref().is_none_or(|needle| {
                entry
                    .user_name
                    .as_deref()
                    .is_some_and(|name| contains_ignore_case(name, needle))
                    || contains_ignore_case(&entry.user_email, needle)
                    || contains_ignore_case(entry.action.as_str(), needle)
            })
    }

    fn compare(&self, a: &AuditLogEntry, b: &AuditLogEntry) -> Ordering {
        let ordering = self.sort_field().compare(a, b);
        match self.order() {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u32,
    pub limit: u32,
    pub offset: u64,
}

/// Pagination envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    pub data: Vec<AuditLogEntry>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl AuditPage {
    pub fn new(data: Vec<AuditLogEntry>, total: u64, window: PageWindow) -> Self {
        let total_pages = total.div_ceil(u64::from(window.limit));
        Self {
            data,
            total,
            page: window.page,
            limit: window.limit,
            total_pages,
            has_next: u64::from(window.page) < total_pages,
            has_prev: window.page > 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatisticsPeriod {
    Day,
    #[default]
    Week,
    Month,
    Year,
}

impl StatisticsPeriod {
    pub fn days(&self) -> i64 {
        match self {
            StatisticsPeriod::Day => 1,
            StatisticsPeriod::Week => 7,
            StatisticsPeriod::Month => 30,
            StatisticsPeriod::Year => 365,
        }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.days())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatisticsPeriod::Day => "day",
            StatisticsPeriod::Week => "week",
            StatisticsPeriod::Month => "month",
            StatisticsPeriod::Year => "year",
        }
    }
}

impl fmt::Display for StatisticsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatisticsPeriod {
    type Err = backoffice_core::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(StatisticsPeriod::Day),
            "week" => Ok(StatisticsPeriod::Week),
            "month" => Ok(StatisticsPeriod::Month),
            "year" => Ok(StatisticsPeriod::Year),
            _ => Err(backoffice_core::Error::InvalidValue {
                field: "period",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub user_id: String,
    pub user_email: String,
    pub count: u64,
}

/// Aggregates over the trailing statistics period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStatistics {
    pub period: StatisticsPeriod,
    pub since: DateTime<Utc>,
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub warning: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub top_users: Vec<UserActivity>,
    /// Keys `"00"` to `"23"`, always all present.
    pub hourly: BTreeMap<String, u64>,
}

impl AuditStatistics {
    pub fn empty(period: StatisticsPeriod, since: DateTime<Utc>) -> Self {
        Self {
            period,
            since,
            total: 0,
            success: 0,
            failure: 0,
            warning: 0,
            by_category: BTreeMap::new(),
            by_severity: BTreeMap::new(),
            top_users: Vec::new(),
            hourly: (0..24).map(|h| (format!("{:02}", h), 0)).collect(),
        }
    }

    pub fn record_status(&mut self, status: AuditStatus, count: u64) {
        match status {
            AuditStatus::Success => self.success += count,
            AuditStatus::Failure => self.failure += count,
            AuditStatus::Warning => self.warning += count,
        }
    }

    pub fn record_hour(&mut self, hour: u32, count: u64) {
        *self.hourly.entry(format!("{:02}", hour)).or_insert(0) += count;
    }

    /// Keep the busiest users, ties broken by user id.
    pub fn set_top_users(&mut self, mut users: Vec<UserActivity>) {
        users.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.user_id.cmp(&b.user_id)));
        users.truncate(TOP_USERS);
        self.top_users = users;
    }

    pub fn from_entries<'a>(
        period: StatisticsPeriod,
        since: DateTime<Utc>,
        entries: impl IntoIterator<Item = &'a AuditLogEntry>,
    ) -> Self {
        let mut stats = Self::empty(period, since);
        let mut users: HashMap<&str, UserActivity> = HashMap::new();

        for entry in entries {
            stats.total += 1;
            stats.record_status(entry.status, 1);
            *stats.by_category.entry(entry.category.to_string()).or_insert(0) += 1;
            *stats.by_severity.entry(entry.severity.to_string()).or_insert(0) += 1;
            stats.record_hour(entry.created_at.hour(), 1);

            users
                .entry(entry.user_id.as_str())
                .or_insert_with(|| UserActivity {
                    user_id: entry.user_id.clone(),
                    user_email: entry.user_email.clone(),
                    count: 0,
                })
                .count += 1;
        }

        stats.set_top_users(users.into_values().collect());
        stats
    }
}

/// Storage backend for audit logs.
#[async_trait::async_trait]
pub trait AuditStorage: Send + Sync {
    async fn store(&self, entry: &AuditLogEntry) -> Result<()>;

    /// Matching entries in the filter's sort order; `None` returns all of them.
    async fn query(
        &self,
        filter: &AuditLogFilter,
        window: Option<PageWindow>,
    ) -> Result<Vec<AuditLogEntry>>;

    async fn count(&self, filter: &AuditLogFilter) -> Result<u64>;

    async fn statistics(
        &self,
        period: StatisticsPeriod,
        since: DateTime<Utc>,
    ) -> Result<AuditStatistics>;

    /// Hard-delete entries created before `cutoff`.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// In-memory audit storage for testing.
#[derive(Default)]
pub struct MemoryAuditStorage {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl MemoryAuditStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl AuditStorage for MemoryAuditStorage {
    async fn store(&self, entry: &AuditLogEntry) -> Result<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditLogFilter,
        window: Option<PageWindow>,
    ) -> Result<Vec<AuditLogEntry>> {
        let entries = self.entries.read().await;
        let mut matched: Vec<AuditLogEntry> =
            entries.iter().filter(|e| filter.matches(e)).cloned().collect();
        matched.sort_by(|a, b| filter.compare(a, b));

        Ok(match window {
            Some(w) => matched
                .into_iter()
                .skip(w.offset as usize)
                .take(w.limit as usize)
                .collect(),
            None => matched,
        })
    }

    async fn count(&self, filter: &AuditLogFilter) -> Result<u64> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| filter.matches(e)).count() as u64)
    }

    async fn statistics(
        &self,
        period: StatisticsPeriod,
        since: DateTime<Utc>,
    ) -> Result<AuditStatistics> {
        let entries = self.entries.read().await;
        Ok(AuditStatistics::from_entries(
            period,
            since,
            entries.iter().filter(|e| e.created_at >= since),
        ))
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.created_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}

/// Audit logger service.
pub struct AuditLogger {
    storage: Arc<dyn AuditStorage>,
    /// Async channel for non-blocking logging.
    tx: mpsc::Sender<AuditLogEntry>,
}

impl AuditLogger {
    /// Create a logger and spawn its background writer.
    pub fn new(storage: Arc<dyn AuditStorage>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditLogEntry>(capacity.max(1));

        let writer = storage.clone();
        tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = writer.store(&entry).await {
                    error!(
                        error = %e,
                        action = %entry.action,
                        user_id = %entry.user_id,
                        "Failed to store audit entry"
                    );
                }
            }
        });

        Self { storage, tx }
    }

    /// Enqueue an entry without waiting for storage.
    pub fn log(&self, entry: AuditLogEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            warn!(error = %e, "Audit log channel unavailable, entry dropped");
        }
    }

    /// Persist one entry and return its id.
    pub async fn log_activity(&self, entry: AuditLogEntry) -> AccessResult<Uuid> {
        match self.storage.store(&entry).await {
            Ok(()) => Ok(entry.id),
            Err(e) => {
                error!(
                    error = %e,
                    action = %entry.action,
                    user_id = %entry.user_id,
                    "Failed to store audit entry"
                );
                Err(AccessError::AuditWriteFailed(e.to_string()))
            }
        }
    }

    pub async fn log_login(&self, principal: &Principal, ctx: &RequestContext) -> AccessResult<Uuid> {
        let entry = AuditLogEntry::builder(AuditAction::Login, format!("user/{}", principal.id))
            .context(ctx)
            .actor(principal)
            .build();
        self.log_activity(entry).await
    }

    /// Failed logins have no principal; the claimed email is kept.
    pub async fn log_login_failed(
        &self,
        email: &str,
        ctx: &RequestContext,
        reason: &str,
    ) -> AccessResult<Uuid> {
        let entry = AuditLogEntry::builder(AuditAction::LoginFailed, "auth/login")
            .context(ctx)
            .anonymous(Some(email))
            .failure(reason)
            .build();
        self.log_activity(entry).await
    }

    pub async fn log_logout(&self, principal: &Principal, ctx: &RequestContext) -> AccessResult<Uuid> {
        let entry = AuditLogEntry::builder(AuditAction::Logout, format!("user/{}", principal.id))
            .context(ctx)
            .actor(principal)
            .build();
        self.log_activity(entry).await
    }

    pub async fn log_permission_denied(
        &self,
        principal: &Principal,
        ctx: &RequestContext,
        resource: Resource,
        permission: Permission,
    ) -> AccessResult<Uuid> {
        let entry = AuditLogEntry::builder(AuditAction::PermissionDenied, resource.as_str())
            .context(ctx)
            .actor(principal)
            .details(json!({
                "resource": resource,
                "permission": permission,
                "path": ctx.path,
            }))
            .failure(format!("missing {} on {}", permission, resource))
            .build();
        self.log_activity(entry).await
    }

    pub async fn log_user_management(
        &self,
        actor: &Principal,
        ctx: &RequestContext,
        action: AuditAction,
        target_user_id: &str,
        details: Value,
    ) -> AccessResult<Uuid> {
        self.log_targeted(actor, ctx, action, format!("user/{}", target_user_id), details)
            .await
    }

    pub async fn log_wallet_activity(
        &self,
        actor: &Principal,
        ctx: &RequestContext,
        action: AuditAction,
        wallet_id: &str,
        details: Value,
    ) -> AccessResult<Uuid> {
        self.log_targeted(actor, ctx, action, format!("wallet/{}", wallet_id), details)
            .await
    }

    pub async fn log_customer_support(
        &self,
        actor: &Principal,
        ctx: &RequestContext,
        action: AuditAction,
        ticket_id: &str,
        details: Value,
    ) -> AccessResult<Uuid> {
        self.log_targeted(actor, ctx, action, format!("ticket/{}", ticket_id), details)
            .await
    }

    async fn log_targeted(
        &self,
        actor: &Principal,
        ctx: &RequestContext,
        action: AuditAction,
        resource: String,
        details: Value,
    ) -> AccessResult<Uuid> {
        let entry = AuditLogEntry::builder(action, resource)
            .context(ctx)
            .actor(actor)
            .details(details)
            .build();
        self.log_activity(entry).await
    }

    pub async fn find_by_filters(&self, filter: &AuditLogFilter) -> AccessResult<AuditPage> {
        let window = filter.page_window();
        let total = self.storage.count(filter).await?;
        let data = self.storage.query(filter, Some(window)).await?;
        Ok(AuditPage::new(data, total, window))
    }

    pub async fn get_statistics(&self, period: StatisticsPeriod) -> AccessResult<AuditStatistics> {
        let since = period.since(Utc::now());
        Ok(self.storage.statistics(period, since).await?)
    }

    /// Latest entries for a user, newest first.
    pub async fn get_recent_activity(
        &self,
        user_id: &str,
        limit: u32,
    ) -> AccessResult<Vec<AuditLogEntry>> {
        let filter = AuditLogFilter::new()
            .user(user_id)
            .sort(SortField::CreatedAt, SortOrder::Desc)
            .paginate(1, limit);
        Ok(self.storage.query(&filter, Some(filter.page_window())).await?)
    }

    /// HIGH-severity entries for a user in the trailing window, newest first.
    pub async fn detect_suspicious_activity(
        &self,
        user_id: &str,
        window_minutes: i64,
    ) -> AccessResult<Vec<AuditLogEntry>> {
        self.detect_suspicious_activity_at(user_id, window_minutes, Utc::now())
            .await
    }

    pub async fn detect_suspicious_activity_at(
        &self,
        user_id: &str,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> AccessResult<Vec<AuditLogEntry>> {
        if window_minutes <= 0 {
            return Err(AccessError::Validation(
                "window_minutes must be positive".to_string(),
            ));
        }

        let filter = AuditLogFilter::new()
            .user(user_id)
            .severity(AuditSeverity::High)
            .time_range(now - Duration::minutes(window_minutes), now)
            .sort(SortField::CreatedAt, SortOrder::Desc);
        Ok(self.storage.query(&filter, None).await?)
    }

    /// Every matching entry rendered in `format`; pagination is ignored.
    pub async fn export_logs(
        &self,
        filter: &AuditLogFilter,
        format: ExportFormat,
    ) -> AccessResult<Vec<u8>> {
        let entries = self.storage.query(filter, None).await?;
        info!(count = entries.len(), format = %format, "Exporting audit logs");
        Ok(format.render(&entries)?)
    }

    /// Delete entries older than `retention_days`.
    pub async fn delete_old_logs(&self, retention_days: u32) -> AccessResult<u64> {
        self.delete_old_logs_at(retention_days, Utc::now()).await
    }

    pub async fn delete_old_logs_at(
        &self,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> AccessResult<u64> {
        if retention_days == 0 {
            return Err(AccessError::Validation(
                "retention_days must be at least 1".to_string(),
            ));
        }

        let cutoff = now - Duration::days(i64::from(retention_days));
        let deleted = self.storage.delete_before(cutoff).await?;
        info!(retention_days, deleted, cutoff = %cutoff, "Purged old audit logs");
        Ok(deleted)
    }
}
