//! Per-request metadata shared by the rate limiter and the audit pipeline.

use backoffice_core::types::Principal;
use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;

/// What the pipeline knows about an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub path: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    /// Set once the upstream authenticator has attached a principal.
    pub principal: Option<Principal>,
}

impl RequestContext {
    /// Create a context with a freshly generated request id.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            request_id: generate_request_id(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Use the caller-supplied correlation id when present.
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        if let Some(id) = request_id.filter(|id| !id.trim().is_empty()) {
            self.request_id = id;
        }
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn principal_id(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.id.as_str())
    }
}

/// Fallback request id: `req_{epoch_ms}_{random}`.
pub fn generate_request_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("req_{}_{}", Utc::now().timestamp_millis(), suffix.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_request_id_shape() {
        let id = generate_request_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "req");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(id, generate_request_id());
    }

    #[test]
    fn test_supplied_request_id_wins() {
        let ctx = RequestContext::new("/admin/users").with_request_id(Some("abc-123".into()));
        assert_eq!(ctx.request_id, "abc-123");

        let ctx = RequestContext::new("/admin/users").with_request_id(Some("  ".into()));
        assert!(ctx.request_id.starts_with("req_"));
    }
}
