//! API route definitions.

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use backoffice_core::types::AuditAction;
use std::sync::Arc;

use crate::handlers::{access, audit_logs, health, roles};
use crate::middleware::{audit_request, rate_limit, request_context, AuditRoute};
use crate::state::AppState;

/// Route layer recording the route's outcome under `action`.
macro_rules! audited {
    ($state:expr, $action:ident, $resource:literal) => {
        middleware::from_fn_with_state(
            AuditRoute::new(&$state, AuditAction::$action, $resource),
            audit_request,
        )
    };
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route(
            "/audit-logs",
            get(audit_logs::list_audit_logs).route_layer(audited!(state, DataViewed, "audit_logs")),
        )
        .route(
            "/audit-logs/statistics",
            get(audit_logs::get_statistics).route_layer(audited!(state, DataViewed, "audit_logs")),
        )
        .route(
            "/audit-logs/export",
            get(audit_logs::export_audit_logs)
                .route_layer(audited!(state, DataExported, "audit_logs")),
        )
        .route(
            "/audit-logs/cleanup",
            post(audit_logs::cleanup_audit_logs)
                .route_layer(audited!(state, AuditLogsPurged, "audit_logs")),
        )
        .route(
            "/audit-logs/users/{user_id}/recent",
            get(audit_logs::get_recent_activity)
                .route_layer(audited!(state, DataViewed, "audit_logs")),
        )
        .route(
            "/audit-logs/users/{user_id}/suspicious",
            get(audit_logs::get_suspicious_activity)
                .route_layer(audited!(state, DataViewed, "audit_logs")),
        )
        .route("/roles", get(roles::list_roles))
        .route(
            "/roles",
            post(roles::create_role).route_layer(audited!(state, RoleCreated, "roles")),
        )
        .route(
            "/roles/{name}",
            delete(roles::delete_role).route_layer(audited!(state, RoleDeleted, "roles")),
        )
        .route("/roles/{name}/permissions", get(roles::get_role_permissions))
        .route("/role-permissions", get(roles::list_role_permissions))
        .route(
            "/role-permissions",
            post(roles::create_role_permission)
                .route_layer(audited!(state, PermissionGranted, "role_permissions")),
        )
        .route(
            "/role-permissions/defaults",
            post(roles::initialize_defaults)
                .route_layer(audited!(state, PermissionGranted, "role_permissions")),
        )
        .route(
            "/role-permissions/{id}",
            put(roles::update_role_permission)
                .route_layer(audited!(state, PermissionUpdated, "role_permissions")),
        )
        .route(
            "/role-permissions/{id}",
            delete(roles::delete_role_permission)
                .route_layer(audited!(state, PermissionRevoked, "role_permissions")),
        );

    let me = Router::new()
        .route("/permissions", get(access::my_permissions))
        .route("/permissions/check", get(access::check_permission))
        .route("/menus/{menu_key}", get(access::check_menu));

    let api = Router::new()
        .nest("/admin", admin)
        .nest("/me", me)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness))
        .merge(api)
        .layer(middleware::from_fn(request_context))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth::rate_limit::{HEADER_LIMIT, HEADER_REMAINING};
    use auth::{
        AuditLogFilter, AuditStorage, MemoryAuditStorage, MemoryPermissionStore, PermissionStore,
    };
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use backoffice_core::config::Config;
    use backoffice_core::types::{AuditCategory, AuditStatus, Principal};
    use backoffice_core::MemoryCache;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        store: Arc<MemoryPermissionStore>,
        audit: Arc<MemoryAuditStorage>,
    }

    async fn test_app() -> TestApp {
        let store = Arc::new(MemoryPermissionStore::new());
        let audit = Arc::new(MemoryAuditStorage::new());
        let state = AppState::from_parts(
            store.clone(),
            audit.clone(),
            Arc::new(MemoryCache::new()),
            Config::test_config(),
        );
        state.resolver.initialize_default_permissions().await.unwrap();

        store
            .insert_principal(Principal::new("u-admin", "admin@example.com", "ADMIN"))
            .await;
        store
            .insert_principal(Principal::new("u-viewer", "viewer@example.com", "VIEWER"))
            .await;

        TestApp {
            router: create_router(Arc::new(state)),
            store,
            audit,
        }
    }

    impl TestApp {
        async fn send(&self, method: &str, uri: &str, principal: Option<&str>) -> Response {
            let mut request = Request::builder()
                .method(method)
                .uri(uri)
                .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0")
                .body(Body::empty())
                .unwrap();
            if let Some(id) = principal {
                let principal = self.store.find_principal(id).await.unwrap().unwrap();
                request.extensions_mut().insert(principal);
            }
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn wait_for_audit(&self, count: usize) {
            for _ in 0..100 {
                if self.audit.len().await >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("expected {count} audit entries");
        }
    }

    #[tokio::test]
    async fn test_health_is_not_rate_limited() {
        let app = test_app().await;
        for _ in 0..3 {
            let response = app.send("GET", "/health", None).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(HEADER_LIMIT).is_none());
            assert!(response.headers().get("x-request-id").is_some());
        }
    }

    #[tokio::test]
    async fn test_admin_lists_audit_logs() {
        let app = test_app().await;
        let response = app.send("GET", "/admin/audit-logs?page=1&limit=10", Some("u-admin")).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[HEADER_LIMIT], "200");
        assert_eq!(response.headers()[HEADER_REMAINING], "199");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let page: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(page["page"], 1);
        assert_eq!(page["limit"], 10);

        app.wait_for_audit(1).await;
        let entries = app.audit.query(&AuditLogFilter::new(), None).await.unwrap();
        assert_eq!(entries[0].action, AuditAction::DataViewed);
        assert_eq!(entries[0].user_id, "u-admin");
    }

    #[tokio::test]
    async fn test_denied_request_is_audited() {
        let app = test_app().await;
        let response = app.send("DELETE", "/admin/roles/OPS", Some("u-viewer")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        app.wait_for_audit(1).await;
        let entries = app.audit.query(&AuditLogFilter::new(), None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::PermissionDenied);
        assert_eq!(entries[0].category, AuditCategory::Authorization);
        assert_eq!(entries[0].status, AuditStatus::Failure);
        assert_eq!(entries[0].user_id, "u-viewer");
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        let app = test_app().await;
        let response = app.send("GET", "/admin/roles", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_back_to_back_requests_are_throttled() {
        let app = test_app().await;
        let first = app.send("GET", "/me/permissions", Some("u-admin")).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.send("GET", "/me/permissions", Some("u-admin")).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().get(HEADER_LIMIT).is_some());

        app.wait_for_audit(1).await;
        let entries = app.audit.query(&AuditLogFilter::new(), None).await.unwrap();
        assert_eq!(entries[0].action, AuditAction::RateLimitExceeded);
    }

    #[tokio::test]
    async fn test_export_sets_attachment_headers() {
        let app = test_app().await;
        let response = app
            .send("GET", "/admin/audit-logs/export?format=json", Some("u-admin"))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "application/json");
        let disposition = response.headers()["content-disposition"].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"audit-logs-"));
        assert!(disposition.ends_with(".json\""));
    }

    #[tokio::test]
    async fn test_menu_check() {
        let app = test_app().await;
        let response = app.send("GET", "/me/menus/audit-logs", Some("u-viewer")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let result: access::MenuAccessResponse = serde_json::from_slice(&body).unwrap();
        assert!(!result.allowed);
    }
}
