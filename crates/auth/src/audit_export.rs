//! Audit log export as CSV or JSON.

use backoffice_core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::audit::AuditLogEntry;

/// CSV column order.
pub const CSV_COLUMNS: [&str; 18] = [
    "id",
    "createdAt",
    "userId",
    "userEmail",
    "userName",
    "userRole",
    "action",
    "resource",
    "status",
    "severity",
    "category",
    "subcategory",
    "ipAddress",
    "userAgent",
    "sessionId",
    "requestId",
    "details",
    "metadata",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    /// Attachment file name, e.g. `audit-logs-20240101-120000.csv`.
    pub fn file_name(&self, at: DateTime<Utc>) -> String {
        format!("audit-logs-{}.{}", at.format("%Y%m%d-%H%M%S"), self.extension())
    }

    pub fn render(&self, entries: &[AuditLogEntry]) -> Result<Vec<u8>> {
        match self {
            ExportFormat::Csv => Ok(render_csv(entries).into_bytes()),
            ExportFormat::Json => Ok(serde_json::to_vec_pretty(entries)?),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(Error::InvalidValue {
                field: "format",
                value: s.to_string(),
            }),
        }
    }
}

fn render_csv(entries: &[AuditLogEntry]) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_COLUMNS.iter().map(|c| c.to_string()));

    for entry in entries {
        push_row(
            &mut out,
            [
                entry.id.to_string(),
                entry.created_at.to_rfc3339(),
                entry.user_id.clone(),
                entry.user_email.clone(),
                entry.user_name.clone().unwrap_or_default(),
                entry.user_role.clone(),
                entry.action.to_string(),
                entry.resource.clone(),
                entry.status.to_string(),
                entry.severity.to_string(),
                entry.category.to_string(),
                entry.subcategory.clone(),
                entry.ip_address.clone().unwrap_or_default(),
                entry.user_agent.clone().unwrap_or_default(),
                entry.session_id.clone().unwrap_or_default(),
                entry.request_id.clone().unwrap_or_default(),
                entry.details.to_string(),
                entry.metadata.to_string(),
            ],
        );
    }

    out
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    let row: Vec<String> = fields.into_iter().map(|f| quote(&f)).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Every field is quoted; embedded quotes are doubled.
fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Split one CSV line produced by [`ExportFormat::Csv`] back into fields.
///
/// Only handles the fully-quoted form written here, which is enough for
/// reconciling an export against its source.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            ('"', _) => in_quotes = !in_quotes,
            (',', false) => fields.push(std::mem::take(&mut current)),
            (c, _) => current.push(c),
        }
    }
    fields.push(current);
    fields
}
