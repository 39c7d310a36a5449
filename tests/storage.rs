mod common;

use common::{create_request, registry_with, seed_tenant, AcceptAll};
use hostctl::models::{ServerStatus, UpdateServerRequest};
use hostctl::services::context::ExecutionContext;
use hostctl::stores::{open_store, StoreError};
use std::sync::Arc;

#[tokio::test]
async fn sqlite_file_survives_reopen_and_repeated_migrations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("hostctl.db").display());

    let (tenant, id) = {
        let store = open_store(&url, 1).await.expect("open");
        store.migrate().await.expect("migrate");
        let tenant = seed_tenant(&store).await;
        let registry = registry_with(store.clone(), Arc::new(AcceptAll));
        let server = registry
            .create(
                &ExecutionContext::new(),
                &create_request("web-01", "10.0.0.1", 22),
                tenant.user_id,
                tenant.organization_id,
            )
            .await
            .expect("create");
        registry
            .update(
                &ExecutionContext::new(),
                &UpdateServerRequest {
                    id: server.id.to_string(),
                    description: Some("edge".to_string()),
                    ..Default::default()
                },
                tenant.user_id,
            )
            .await
            .expect("update");
        (tenant, server.id)
    };

    let store = open_store(&url, 1).await.expect("reopen");
    store.migrate().await.expect("migrate again");
    let stored = store.find_live(id).await.unwrap().expect("persisted");
    assert_eq!(stored.description, "edge");
    assert_eq!(stored.status, ServerStatus::Active);
    assert_eq!(stored.user_id, tenant.user_id);
    assert_eq!(stored.organization_id, tenant.organization_id);
}

#[tokio::test]
async fn unsupported_urls_are_refused() {
    let err = open_store("mysql://localhost/hostctl", 1).await.err().expect("refused");
    assert!(matches!(err, StoreError::UnsupportedUrl(_)));
}
