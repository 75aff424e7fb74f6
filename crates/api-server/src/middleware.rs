//! Request context, rate limiting and audit middleware for API routes.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::USER_AGENT, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use backoffice_core::types::{AuditAction, Permission, Principal, Resource};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

use auth::{
    AuditFailure, AuditInterceptor, AuditLogEntry, AuditedOperation, PermissionStore,
    RequestContext,
};

use crate::error::{apply_headers, ApiError, ApiResult};
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Build the [`RequestContext`] for every request and inject it into
/// request extensions. Any `Principal` already attached by an upstream
/// authenticator is carried over.
pub async fn request_context(mut request: Request<Body>, next: Next) -> Response {
    let headers = request.headers();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let mut ctx = RequestContext::new(request.uri().path()).with_request_id(
        header_str(headers, REQUEST_ID_HEADER)
            .or_else(|| header_str(headers, CORRELATION_ID_HEADER))
            .map(str::to_string),
    );
    if let Some(ip) = client_ip(headers, peer) {
        ctx = ctx.with_client_ip(ip);
    }
    if let Some(ua) = header_str(headers, USER_AGENT.as_str()) {
        ctx = ctx.with_user_agent(ua);
    }
    if let Some(session) = header_str(headers, SESSION_ID_HEADER) {
        ctx = ctx.with_session_id(session);
    }
    if let Some(principal) = request.extensions().get::<Principal>().cloned() {
        ctx = ctx.with_principal(principal);
    }

    let request_id = ctx.request_id.clone();
    request.extensions_mut().insert(ctx);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

/// First hop of `X-Forwarded-For`, else the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<String>) -> Option<String> {
    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or(peer)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Enforce the request quota. Admitted responses carry the
/// `X-RateLimit-*` headers; rejected requests get a 429 and an audit entry.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(ctx) = request.extensions().get::<RequestContext>().cloned() else {
        // request_context is layered outside this middleware
        return next.run(request).await;
    };

    match state.rate_limiter.check(&ctx).await {
        Ok(status) => {
            let mut response = next.run(request).await;
            apply_headers(&mut response, status.headers());
            response
        }
        Err(err) => {
            if let Some(status) = err.rate_limit_status() {
                tracing::warn!(
                    path = %ctx.path,
                    principal_id = ctx.principal_id().unwrap_or("-"),
                    client_ip = ctx.client_ip.as_deref().unwrap_or("-"),
                    count = status.count,
                    limit = status.limit,
                    "Rate limit exceeded"
                );
                let entry = AuditLogEntry::builder(AuditAction::RateLimitExceeded, ctx.path.clone())
                    .context(&ctx)
                    .details(json!({
                        "limit": status.limit,
                        "count": status.count,
                        "windowMs": status.window_ms,
                        "resetAt": status.reset_epoch_secs(),
                    }))
                    .failure(err.to_string())
                    .build();
                state.interceptor.record_detached(entry);
            }
            ApiError::from(err).into_response()
        }
    }
}

/// Per-route audit configuration for [`audit_request`].
#[derive(Clone)]
pub struct AuditRoute {
    interceptor: Arc<AuditInterceptor>,
    op: AuditedOperation,
}

impl AuditRoute {
    pub fn new(state: &AppState, action: AuditAction, resource: &str) -> Self {
        Self {
            interceptor: state.interceptor.clone(),
            op: AuditedOperation::new(action, resource),
        }
    }
}

/// Record the route's outcome once the handler has responded. The write is
/// detached so the response is never held back by audit storage.
pub async fn audit_request(
    State(route): State<AuditRoute>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = request.extensions().get::<RequestContext>().cloned();
    let method = request.method().to_string();
    let response = next.run(request).await;

    let Some(ctx) = ctx else {
        return response;
    };

    let status = response.status();
    let failure = if status.is_success() {
        None
    } else {
        Some(
            response
                .extensions()
                .get::<AuditFailure>()
                .cloned()
                .unwrap_or_else(|| AuditFailure::Failed {
                    reason: status.to_string(),
                }),
        )
    };

    let op = route.op.clone().with_details(json!({
        "method": method,
        "path": ctx.path,
        "status": status.as_u16(),
    }));
    route
        .interceptor
        .record_detached(AuditInterceptor::entry_for(&ctx, &op, failure.as_ref()));

    response
}

/// Resolves a principal id asserted by a trusted gateway header.
#[derive(Clone)]
pub struct GatewayPrincipal {
    pub store: Arc<dyn PermissionStore>,
    pub header: HeaderName,
}

/// Attach the `Principal` named by the gateway header, when present and
/// known. Unknown ids pass through unauthenticated.
pub async fn gateway_principal(
    State(gateway): State<GatewayPrincipal>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let principal_id = request
        .headers()
        .get(&gateway.header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    if let Some(principal_id) = principal_id {
        match gateway.store.find_principal(&principal_id).await {
            Ok(Some(principal)) => {
                tracing::debug!(principal_id = %principal.id, role = %principal.role, "Authenticated request");
                request.extensions_mut().insert(principal);
            }
            Ok(None) => {
                tracing::debug!(principal_id = %principal_id, "Gateway principal not found");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Principal lookup failed");
            }
        }
    }

    next.run(request).await
}

/// The authenticated principal's id, or 401.
pub fn principal_id(ctx: &RequestContext) -> ApiResult<&str> {
    ctx.principal_id()
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))
}

/// Require `permission` on `resource` for the request's principal.
pub async fn require_permission(
    state: &AppState,
    ctx: &RequestContext,
    resource: Resource,
    permission: Permission,
) -> ApiResult<()> {
    let principal_id = principal_id(ctx)?;
    state
        .resolver
        .check_permission(principal_id, resource, permission)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            client_ip(&headers, Some("10.0.0.9".to_string())).as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let headers = HeaderMap::new();
        assert_eq!(
            client_ip(&headers, Some("10.0.0.9".to_string())).as_deref(),
            Some("10.0.0.9")
        );
        assert_eq!(client_ip(&headers, None), None);
    }

    #[test]
    fn test_missing_principal_is_unauthorized() {
        let ctx = RequestContext::new("/admin/roles");
        assert!(matches!(principal_id(&ctx), Err(ApiError::Unauthorized(_))));
    }
}
