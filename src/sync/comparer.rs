//! `SchemaComparer`: consumes a database snapshot and a file cache
//! and emits a difference set plus an unsupported-object set. Pure and
//! synchronous - no I/O, no locking, just set algebra over two keyed maps.

use crate::sync::model::*;
use std::collections::HashMap;

pub struct SchemaComparer;

/// Everything `compare` needs besides the snapshot/cache themselves.
#[derive(Debug, Clone, Copy)]
pub struct CompareOptions<'a> {
    pub allow_set: &'a std::collections::HashSet<ObjectType>,
}

#[derive(Debug, Default)]
pub struct CompareOutcome {
    pub differences: Vec<SchemaDifference>,
    pub unsupported: Vec<UnsupportedObject>,
    /// Supported-typed objects present on at least one side.
    pub objects_compared: usize,
    /// Supported-typed objects identical on both sides.
    pub objects_unchanged: usize,
}

impl SchemaComparer {
    pub fn new() -> Self {
        Self
    }

    /// Differences come out ordered by
    /// `(object_type, schema_name, object_name)` ascending (tie-break rule).
    pub fn compare(&self, snapshot: &SchemaSnapshot, files: &FileModelCache, options: CompareOptions) -> CompareOutcome {
        let mut db_by_key: HashMap<ObjectKey, &SchemaObjectSummary> = HashMap::new();
        let mut unsupported = Vec::new();

        for object in &snapshot.objects {
            if object.object_type.is_supported() && options.allow_set.contains(&object.object_type) {
                db_by_key.insert(object.key(), object);
            } else {
                unsupported.push(UnsupportedObject {
                    source: ChangeSource::Database,
                    object_type: object.object_type,
                    schema_name: object.schema_name.clone(),
                    object_name: object.object_name.clone(),
                    file_path: None,
                });
            }
        }
        for login in &snapshot.unsupported {
            unsupported.push(login.clone());
        }

        let mut file_by_key: HashMap<ObjectKey, &FileObjectEntry> = HashMap::new();
        for entry in files.entries.values() {
            let key = ObjectKey {
                object_type: entry.object_type,
                schema_name: entry.schema_name.to_lowercase(),
                object_name: entry.object_name.to_lowercase(),
            };
            if entry.object_type.is_supported() && options.allow_set.contains(&entry.object_type) {
                file_by_key.insert(key, entry);
            } else {
                unsupported.push(UnsupportedObject {
                    source: ChangeSource::Filesystem,
                    object_type: entry.object_type,
                    schema_name: entry.schema_name.clone(),
                    object_name: entry.object_name.clone(),
                    file_path: Some(entry.path.clone()),
                });
            }
        }

        let mut differences = Vec::new();
        let mut objects_unchanged = 0usize;
        let mut all_keys: Vec<ObjectKey> = db_by_key.keys().chain(file_by_key.keys()).cloned().collect();
        all_keys.sort();
        all_keys.dedup();

        for key in &all_keys {
            match (db_by_key.get(key), file_by_key.get(key)) {
                (Some(db), Some(file)) => {
                    if db.definition_hash == file.content_hash {
                        objects_unchanged += 1;
                    } else {
                        differences.push(SchemaDifference {
                            id: uuid::Uuid::new_v4(),
                            object_type: key.object_type,
                            schema_name: db.schema_name.clone(),
                            object_name: db.object_name.clone(),
                            difference_kind: DifferenceKind::Modify,
                            source: ChangeSource::Database,
                            database_definition: Some(db.normalized_definition_script.clone()),
                            file_definition: Some(file.normalized_script.clone()),
                            file_path: Some(file.path.clone()),
                            property_differences: vec![PropertyDifference {
                                property_name: "DefinitionHash".to_string(),
                                database_value: Some(db.definition_hash.clone()),
                                file_value: Some(file.content_hash.clone()),
                            }],
                        });
                    }
                }
                (Some(db), None) => {
                    differences.push(SchemaDifference {
                        id: uuid::Uuid::new_v4(),
                        object_type: key.object_type,
                        schema_name: db.schema_name.clone(),
                        object_name: db.object_name.clone(),
                        difference_kind: DifferenceKind::Add,
                        source: ChangeSource::Database,
                        database_definition: Some(db.normalized_definition_script.clone()),
                        file_definition: None,
                        file_path: None,
                        property_differences: vec![],
                    });
                }
                (None, Some(file)) => {
                    differences.push(SchemaDifference {
                        id: uuid::Uuid::new_v4(),
                        object_type: key.object_type,
                        schema_name: file.schema_name.clone(),
                        object_name: file.object_name.clone(),
                        difference_kind: DifferenceKind::Add,
                        source: ChangeSource::Filesystem,
                        database_definition: None,
                        file_definition: Some(file.normalized_script.clone()),
                        file_path: Some(file.path.clone()),
                        property_differences: vec![],
                    });
                }
                (None, None) => unreachable!("key collected from one of the two maps"),
            }
        }

        differences.sort_by(|a, b| {
            (a.object_type, &a.schema_name, &a.object_name).cmp(&(b.object_type, &b.schema_name, &b.object_name))
        });

        CompareOutcome {
            objects_compared: all_keys.len(),
            objects_unchanged,
            differences,
            unsupported,
        }
    }
}

impl Default for SchemaComparer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::{HashMap as StdHashMap, HashSet};
    use std::path::PathBuf;

    fn db_object(schema: &str, name: &str, hash: &str) -> SchemaObjectSummary {
        SchemaObjectSummary {
            schema_name: schema.into(),
            object_name: name.into(),
            object_type: ObjectType::Table,
            definition_hash: hash.into(),
            normalized_definition_script: format!("CREATE TABLE {schema}.{name}"),
            modify_instant: None,
        }
    }

    fn file_entry(schema: &str, name: &str, hash: &str) -> FileObjectEntry {
        FileObjectEntry {
            path: PathBuf::from(format!("{schema}.{name}.sql")),
            object_name: name.into(),
            schema_name: schema.into(),
            object_type: ObjectType::Table,
            content_hash: hash.into(),
            normalized_script: format!("CREATE TABLE {schema}.{name}"),
            last_modified: Utc::now(),
        }
    }

    fn snapshot(objects: Vec<SchemaObjectSummary>) -> SchemaSnapshot {
        SchemaSnapshot {
            id: uuid::Uuid::new_v4(),
            subscription_id: uuid::Uuid::new_v4(),
            captured_at: Utc::now(),
            normalization_pipeline_version: 1,
            overall_hash: String::new(),
            objects,
            unsupported: vec![],
        }
    }

    fn cache(entries: Vec<FileObjectEntry>) -> FileModelCache {
        let mut map = StdHashMap::new();
        for e in entries {
            map.insert(e.path.clone(), e);
        }
        FileModelCache {
            subscription_id: uuid::Uuid::new_v4(),
            captured_at: Utc::now(),
            entries: map,
        }
    }

    fn allow_tables() -> HashSet<ObjectType> {
        [ObjectType::Table].into_iter().collect()
    }

    /// db has A, B; files have A (identical) and C.
    #[test]
    fn three_additions_scenario() {
        let snap = snapshot(vec![db_object("dbo", "A", "h1"), db_object("dbo", "B", "h2")]);
        let files = cache(vec![file_entry("dbo", "A", "h1"), file_entry("dbo", "C", "h3")]);

        let outcome = SchemaComparer::new().compare(&snap, &files, CompareOptions { allow_set: &allow_tables() });

        assert_eq!(outcome.objects_compared, 3);
        assert_eq!(outcome.objects_unchanged, 1);
        assert_eq!(outcome.differences.len(), 2);
        assert!(outcome
            .differences
            .iter()
            .any(|d| d.object_name == "B" && d.source == ChangeSource::Database && d.difference_kind == DifferenceKind::Add));
        assert!(outcome
            .differences
            .iter()
            .any(|d| d.object_name == "C" && d.source == ChangeSource::Filesystem && d.difference_kind == DifferenceKind::Add));
    }

    #[test]
    fn matching_hashes_produce_no_difference() {
        let snap = snapshot(vec![db_object("dbo", "A", "same")]);
        let files = cache(vec![file_entry("dbo", "A", "same")]);
        let outcome = SchemaComparer::new().compare(&snap, &files, CompareOptions { allow_set: &allow_tables() });
        assert!(outcome.differences.is_empty());
        assert_eq!(outcome.objects_unchanged, 1);
    }

    #[test]
    fn differing_hashes_produce_modify_with_both_sides_populated() {
        let snap = snapshot(vec![db_object("dbo", "A", "h1")]);
        let files = cache(vec![file_entry("dbo", "A", "h2")]);
        let outcome = SchemaComparer::new().compare(&snap, &files, CompareOptions { allow_set: &allow_tables() });
        assert_eq!(outcome.differences.len(), 1);
        let diff = &outcome.differences[0];
        assert_eq!(diff.difference_kind, DifferenceKind::Modify);
        assert!(diff.database_definition.is_some());
        assert!(diff.file_definition.is_some());
    }

    /// Unsupported objects never become differences.
    #[test]
    fn unsupported_objects_never_become_differences() {
        let mut snap = snapshot(vec![db_object("dbo", "A", "h1")]);
        snap.unsupported = vec![
            UnsupportedObject {
                source: ChangeSource::Database,
                object_type: ObjectType::Login,
                schema_name: String::new(),
                object_name: "sa".into(),
                file_path: None,
            },
            UnsupportedObject {
                source: ChangeSource::Database,
                object_type: ObjectType::Login,
                schema_name: String::new(),
                object_name: "app_user".into(),
                file_path: None,
            },
        ];
        let mut file_entry_unknown = file_entry("dbo", "mystery", "h9");
        file_entry_unknown.object_type = ObjectType::Unknown;
        let files = cache(vec![file_entry("dbo", "A", "h1"), file_entry_unknown]);

        let outcome = SchemaComparer::new().compare(&snap, &files, CompareOptions { allow_set: &allow_tables() });

        assert!(outcome.differences.is_empty());
        assert_eq!(outcome.unsupported.len(), 3);
        let unsupported_db_count = outcome.unsupported.iter().filter(|u| u.source == ChangeSource::Database).count();
        let unsupported_file_count = outcome.unsupported.iter().filter(|u| u.source == ChangeSource::Filesystem).count();
        assert_eq!(unsupported_db_count, 2);
        assert_eq!(unsupported_file_count, 1);
    }

    #[test]
    fn differences_ordered_by_type_schema_name() {
        let snap = snapshot(vec![db_object("bbb", "z", "h1"), db_object("aaa", "a", "h2")]);
        let files = cache(vec![]);
        let outcome = SchemaComparer::new().compare(&snap, &files, CompareOptions { allow_set: &allow_tables() });
        assert_eq!(outcome.differences[0].schema_name, "aaa");
        assert_eq!(outcome.differences[1].schema_name, "bbb");
    }
}
