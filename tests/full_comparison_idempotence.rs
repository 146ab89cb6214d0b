//! Integration coverage for a full comparison run twice in a row being
//! idempotent, exercised through the public `SyncEngine` API rather than
//! `ComparisonOrchestrator` directly, with a fake `SchemaSource` standing in
//! for SQL Server and a real temp directory standing in for the project
//! folder.

use async_trait::async_trait;
use schema_sync_engine::error::Result;
use schema_sync_engine::sync::config::{Configuration, WorkerEnableFlags};
use schema_sync_engine::sync::db_source::{ObjectModifyRow, RawLogin, RawSchemaObject, SchemaSource};
use schema_sync_engine::sync::engine::SyncEngine;
use schema_sync_engine::sync::{AuthKind, ComparisonStatus, DatabaseConnection, LayoutKind, ProjectFolder, SubscriptionOptions};
use std::sync::Arc;

/// Reports one stored procedure whose definition matches a file that the
/// test writes to disk, so the comparison should come back synchronized.
struct MatchingSource;

#[async_trait]
impl SchemaSource for MatchingSource {
    async fn probe_connectivity(&self, _connection: &DatabaseConnection, _timeout: std::time::Duration) -> Result<()> {
        Ok(())
    }

    async fn enumerate_objects(&self, _connection: &DatabaseConnection) -> Result<Vec<RawSchemaObject>> {
        Ok(vec![RawSchemaObject {
            schema_name: "dbo".into(),
            object_name: "GetCustomer".into(),
            object_type: schema_sync_engine::sync::ObjectType::StoredProcedure,
            definition: "CREATE PROCEDURE dbo.GetCustomer AS SELECT 1".into(),
            modify_instant: Some(chrono::Utc::now()),
        }])
    }

    async fn enumerate_logins(&self, _connection: &DatabaseConnection) -> Result<Vec<RawLogin>> {
        Ok(vec![])
    }

    async fn poll_modify_dates(&self, _connection: &DatabaseConnection) -> Result<Vec<ObjectModifyRow>> {
        Ok(vec![])
    }
}

fn no_background_workers(mut config: Configuration) -> Configuration {
    config.workers = WorkerEnableFlags {
        database_polling: false,
        file_watching: false,
        reconciliation: false,
        cache_cleanup: false,
        health_check: false,
    };
    config
}

#[tokio::test]
async fn full_comparison_twice_in_a_row_stays_synchronized_through_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("GetCustomer.sql"), "CREATE PROCEDURE dbo.GetCustomer AS SELECT 1").unwrap();

    let engine = SyncEngine::with_source(no_background_workers(Configuration::default()), Arc::new(MatchingSource));

    let subscription = engine
        .create_subscription(
            "Reporting".into(),
            DatabaseConnection {
                server: "localhost".into(),
                database: "reporting".into(),
                auth_kind: AuthKind::Integrated,
                username: None,
                secret: None,
                trust_certificate: true,
                connect_timeout: std::time::Duration::from_secs(5),
            },
            ProjectFolder {
                root: dir.path().to_path_buf(),
                include_patterns: vec!["**/*.sql".into()],
                exclude_patterns: vec![],
                layout: LayoutKind::Flat,
            },
            SubscriptionOptions::default(),
        )
        .await
        .unwrap();

    let first = engine.trigger_comparison(subscription.id, true).await.unwrap();
    assert_eq!(first.status, ComparisonStatus::Synchronized);
    assert_eq!(first.summary.total_differences, 0);

    let second = engine.trigger_comparison(subscription.id, true).await.unwrap();
    assert_eq!(second.status, ComparisonStatus::Synchronized);
    assert_eq!(second.summary.total_differences, 0);

    let comparisons = engine.list_comparisons(subscription.id).await.unwrap();
    assert_eq!(comparisons.len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn drifted_file_produces_a_single_modify_difference() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("GetCustomer.sql"), "CREATE PROCEDURE dbo.GetCustomer AS SELECT 2 /* drifted */").unwrap();

    let engine = SyncEngine::with_source(no_background_workers(Configuration::default()), Arc::new(MatchingSource));

    let subscription = engine
        .create_subscription(
            "Reporting".into(),
            DatabaseConnection {
                server: "localhost".into(),
                database: "reporting".into(),
                auth_kind: AuthKind::Integrated,
                username: None,
                secret: None,
                trust_certificate: true,
                connect_timeout: std::time::Duration::from_secs(5),
            },
            ProjectFolder {
                root: dir.path().to_path_buf(),
                include_patterns: vec!["**/*.sql".into()],
                exclude_patterns: vec![],
                layout: LayoutKind::Flat,
            },
            SubscriptionOptions::default(),
        )
        .await
        .unwrap();

    let result = engine.trigger_comparison(subscription.id, true).await.unwrap();
    assert_eq!(result.status, ComparisonStatus::HasDifferences);
    assert_eq!(result.summary.total_differences, 1);
    assert_eq!(result.differences[0].object_name, "GetCustomer");

    engine.shutdown().await;
}
