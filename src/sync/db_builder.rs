//! `DatabaseModelBuilder`: assembles a `SchemaSnapshot` from whatever
//! a `SchemaSource` hands back. Owns normalization, hashing, and the
//! unsupported-login channel; delegates the wire protocol entirely.

use crate::error::Result;
use crate::sync::db_source::SchemaSource;
use crate::sync::model::*;
use crate::sync::normalizer::{self, NormalizeOptions};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct DatabaseModelBuilder {
    source: Arc<dyn SchemaSource>,
}

impl DatabaseModelBuilder {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self { source }
    }

    /// Builds a full snapshot for `subscription`. `object_type_filter`
    /// restricts enumeration to a single type for the targeted
    /// `compare-object` path used by polling; `None` builds the
    /// unfiltered snapshot used by full/incremental comparisons.
    pub async fn build(
        &self,
        subscription: &Subscription,
        normalize_options: NormalizeOptions,
        object_type_filter: Option<ObjectType>,
    ) -> Result<SchemaSnapshot> {
        let connection = &subscription.database;

        let raw_objects = self.source.enumerate_objects(connection).await?;
        debug!(subscription = %subscription.id, count = raw_objects.len(), "enumerated database objects");

        let mut objects = Vec::with_capacity(raw_objects.len());
        for raw in raw_objects {
            if let Some(filter) = object_type_filter {
                if raw.object_type != filter {
                    continue;
                }
            }

            let normalized = normalizer::normalize(&raw.definition, normalize_options);
            let hash = normalizer::hash_definition(&normalized);

            objects.push(SchemaObjectSummary {
                schema_name: raw.schema_name,
                object_name: raw.object_name,
                object_type: raw.object_type,
                definition_hash: hash,
                normalized_definition_script: normalized,
                modify_instant: raw.modify_instant,
            });
        }

        let unsupported = match self.source.enumerate_logins(connection).await {
            Ok(logins) => logins
                .into_iter()
                .map(|login| UnsupportedObject {
                    source: ChangeSource::Database,
                    object_type: ObjectType::Login,
                    schema_name: String::new(),
                    object_name: login.name,
                    file_path: None,
                })
                .collect(),
            Err(e) => {
                // A read failure on a secondary channel
                // degrades the snapshot (caller marks the comparison
                // `partial`) rather than failing the whole build.
                warn!(subscription = %subscription.id, error = %e, "failed to enumerate server logins");
                Vec::new()
            }
        };

        let keyed_hashes: Vec<_> = objects.iter().map(|o| (o.key(), o.definition_hash.as_str())).collect();
        let overall_hash = normalizer::compute_snapshot_hash(keyed_hashes);

        Ok(SchemaSnapshot {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            captured_at: chrono::Utc::now(),
            normalization_pipeline_version: NORMALIZATION_PIPELINE_VERSION,
            overall_hash,
            objects,
            unsupported,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::db_source::{ObjectModifyRow, RawLogin, RawSchemaObject};
    use async_trait::async_trait;

    struct FakeSource {
        objects: Vec<RawSchemaObject>,
        logins: Vec<RawLogin>,
    }

    #[async_trait]
    impl SchemaSource for FakeSource {
        async fn probe_connectivity(&self, _connection: &DatabaseConnection, _timeout: std::time::Duration) -> Result<()> {
            Ok(())
        }

        async fn enumerate_objects(&self, _connection: &DatabaseConnection) -> Result<Vec<RawSchemaObject>> {
            Ok(self.objects.clone())
        }

        async fn enumerate_logins(&self, _connection: &DatabaseConnection) -> Result<Vec<RawLogin>> {
            Ok(self.logins.clone())
        }

        async fn poll_modify_dates(&self, _connection: &DatabaseConnection) -> Result<Vec<ObjectModifyRow>> {
            Ok(vec![])
        }
    }

    fn sub() -> Subscription {
        Subscription::new(
            "fixture".into(),
            DatabaseConnection {
                server: "localhost".into(),
                database: "db".into(),
                auth_kind: AuthKind::Integrated,
                username: None,
                secret: None,
                trust_certificate: true,
                connect_timeout: std::time::Duration::from_secs(5),
            },
            ProjectFolder {
                root: "/tmp".into(),
                include_patterns: vec![],
                exclude_patterns: vec![],
                layout: LayoutKind::Flat,
            },
            SubscriptionOptions::default(),
        )
    }

    #[tokio::test]
    async fn snapshot_hash_matches_recomputation_from_objects() {
        let source: Arc<dyn SchemaSource> = Arc::new(FakeSource {
            objects: vec![RawSchemaObject {
                schema_name: "dbo".into(),
                object_name: "Foo".into(),
                object_type: ObjectType::Table,
                definition: "CREATE TABLE dbo.Foo (Id INT)".into(),
                modify_instant: None,
            }],
            logins: vec![RawLogin { name: "sa".into() }],
        });

        let builder = DatabaseModelBuilder::new(source);
        let snapshot = builder.build(&sub(), NormalizeOptions::default(), None).await.unwrap();

        assert_eq!(snapshot.objects.len(), 1);
        assert_eq!(snapshot.unsupported.len(), 1);
        assert_eq!(snapshot.unsupported[0].object_type, ObjectType::Login);

        let keyed: Vec<_> = snapshot.objects.iter().map(|o| (o.key(), o.definition_hash.as_str())).collect();
        assert_eq!(snapshot.overall_hash, normalizer::compute_snapshot_hash(keyed));
    }
}
