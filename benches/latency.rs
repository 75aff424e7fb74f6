//! Latency benchmarks for the per-request access-control path.
//!
//! Run with: `cargo bench --bench latency`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use auth::{
    AuditLogEntry, ExportFormat, MemoryPermissionStore, PermissionResolver, RateLimiter,
    RequestContext,
};
use backoffice_core::config::{PermissionConfig, RateLimitConfig, RateLimitRule};
use backoffice_core::types::{AuditAction, Permission, Principal, Resource};
use backoffice_core::MemoryCache;
use chrono::{TimeZone, Utc};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_permission_check(c: &mut Criterion) {
    let rt = runtime();
    let resolver = rt.block_on(async {
        let store = Arc::new(MemoryPermissionStore::new());
        let resolver =
            PermissionResolver::new(store.clone(), Arc::new(MemoryCache::new()), PermissionConfig::default());
        resolver.initialize_default_permissions().await.unwrap();
        store
            .insert_principal(Principal::new("u-1", "alice@example.com", "ADMIN"))
            .await;
        // Warm the cache
        resolver.get_user_permissions("u-1").await.unwrap();
        resolver
    });

    let mut group = c.benchmark_group("permissions");
    group.bench_function("has_permission_cached", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                resolver
                    .has_permission("u-1", Resource::Users, Permission::Update)
                    .await
                    .unwrap(),
            )
        })
    });
    group.bench_function("has_menu_access_cached", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(resolver.has_menu_access("u-1", "audit-logs").await.unwrap())
        })
    });
    group.finish();
}

fn bench_rate_limit(c: &mut Criterion) {
    let rt = runtime();
    let config = RateLimitConfig {
        rules: Vec::new(),
        default_rule: RateLimitRule::new("default", u32::MAX, Duration::from_secs(3600)),
        ..RateLimitConfig::default()
    };
    let limiter = RateLimiter::new(Arc::new(MemoryCache::new()), config);
    let ctx = RequestContext::new("/admin/users")
        .with_client_ip("203.0.113.7")
        .with_user_agent("Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0");
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    // Synthetic clock advancing past the minimum interval on every call
    let tick = AtomicI64::new(0);

    c.bench_function("rate_limit_admit", |b| {
        b.to_async(&rt).iter(|| async {
            let at = start + chrono::Duration::milliseconds(tick.fetch_add(101, Ordering::Relaxed));
            black_box(limiter.check_at(&ctx, at).await.is_ok())
        })
    });
}

fn bench_export(c: &mut Criterion) {
    let principal = Principal::new("u-1", "alice@example.com", "ADMIN").with_name("Alice");
    let entries: Vec<AuditLogEntry> = (0..1000)
        .map(|i| {
            AuditLogEntry::builder(AuditAction::DataViewed, format!("report/{}", i))
                .actor(&principal)
                .details(serde_json::json!({ "row": i, "note": "quarterly, \"final\"" }))
                .build()
        })
        .collect();

    let mut group = c.benchmark_group("export_1000");
    group.bench_function("csv", |b| {
        b.iter(|| black_box(ExportFormat::Csv.render(&entries).unwrap()))
    });
    group.bench_function("json", |b| {
        b.iter(|| black_box(ExportFormat::Json.render(&entries).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_permission_check, bench_rate_limit, bench_export);
criterion_main!(benches);
