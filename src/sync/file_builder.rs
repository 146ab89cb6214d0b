//! `FileModelBuilder`: walks a project folder and builds the
//! symmetric file-side summary. Classification falls back through path
//! layout, then a best-effort leading-statement parse, then `Unknown` -
//! this is heuristic, not a full parser.

use crate::error::{Result, SyncError};
use crate::sync::model::*;
use crate::sync::normalizer::{self, NormalizeOptions};
use chrono::{DateTime, Utc};
use glob::Pattern;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct FileModelBuilder;

impl FileModelBuilder {
    pub fn new() -> Self {
        Self
    }

    pub async fn build(&self, folder: &ProjectFolder, normalize_options: NormalizeOptions) -> Result<FileModelCache> {
        let root = folder.root.clone();
        let folder = folder.clone();

        // Walking and hashing are blocking filesystem operations; run them
        // on the blocking pool so async workers calling this don't stall
        // the runtime.
        let entries = tokio::task::spawn_blocking(move || scan_folder(&folder, normalize_options))
            .await
            .map_err(|e| SyncError::Fatal(format!("file scan task panicked: {e}")))??;

        Ok(FileModelCache {
            subscription_id: uuid::Uuid::nil(),
            captured_at: Utc::now(),
            entries,
        })
    }
}

fn scan_folder(
    folder: &ProjectFolder,
    normalize_options: NormalizeOptions,
) -> Result<HashMap<PathBuf, FileObjectEntry>> {
    if !folder.root.exists() {
        return Err(SyncError::FileAccessDenied(format!("project folder does not exist: {}", folder.root.display())));
    }
    let metadata = std::fs::metadata(&folder.root)?;
    if !metadata.is_dir() {
        return Err(SyncError::FileAccessDenied(format!("project folder is not a directory: {}", folder.root.display())));
    }

    let includes: Vec<Pattern> = folder
        .include_patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();
    let excludes: Vec<Pattern> = folder
        .exclude_patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();

    let inferred_layout = infer_layout(&folder.root);
    let mut entries = HashMap::new();

    for entry in walkdir::WalkDir::new(&folder.root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }

        let relative = path.strip_prefix(&folder.root).unwrap_or(path);

        if !includes.is_empty() && !includes.iter().any(|p| p.matches_path(relative)) {
            continue;
        }
        // Exclude takes precedence over include.
        if excludes.iter().any(|p| p.matches_path(relative)) {
            continue;
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read candidate sql file, skipping");
                continue;
            }
        };
        let metadata = std::fs::metadata(path)?;
        let last_modified: DateTime<Utc> = metadata.modified()?.into();

        let (schema_name, object_name, object_type) =
            classify(relative, &content, folder.layout, inferred_layout);

        let normalized = normalizer::normalize(&content, normalize_options);
        let content_hash = normalizer::hash_definition(&normalized);

        debug!(path = %path.display(), ?object_type, "classified sql file");

        entries.insert(
            path.to_path_buf(),
            FileObjectEntry {
                path: path.to_path_buf(),
                object_name,
                schema_name,
                object_type,
                content_hash,
                normalized_script: normalized,
                last_modified,
            },
        );
    }

    Ok(entries)
}

/// Samples the directory shape under `root` to guess which layout this
/// project actually uses, narrowing which path heuristic `classify` tries
/// first. Never overrides a successful leading-statement parse.
fn infer_layout(root: &Path) -> LayoutKind {
    let Ok(read_dir) = std::fs::read_dir(root) else {
        return LayoutKind::Flat;
    };

    let subdirs: Vec<String> = read_dir
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();

    if subdirs.is_empty() {
        return LayoutKind::Flat;
    }

    let type_dir_names = [
        "tables", "views", "storedprocedures", "functions", "triggers", "users", "roles",
    ];
    let looks_like_type_dirs = subdirs.iter().any(|d| type_dir_names.contains(&d.to_lowercase().as_str()));

    if looks_like_type_dirs {
        // Could still be by-schema-and-type if those type dirs are nested
        // one level deeper; a cheap check: look for a sql file directly
        // under one of the matched type dirs.
        for dir in &subdirs {
            if type_dir_names.contains(&dir.to_lowercase().as_str()) {
                let path = root.join(dir);
                if let Ok(inner) = std::fs::read_dir(&path) {
                    let has_direct_sql = inner
                        .filter_map(|e| e.ok())
                        .any(|e| e.path().extension().and_then(|x| x.to_str()) == Some("sql"));
                    if has_direct_sql {
                        return LayoutKind::ByType;
                    }
                }
            }
        }
        return LayoutKind::BySchemaAndType;
    }

    LayoutKind::BySchema
}

static TYPE_DIR_MAP: Lazy<HashMap<&'static str, ObjectType>> = Lazy::new(|| {
    HashMap::from([
        ("tables", ObjectType::Table),
        ("views", ObjectType::View),
        ("storedprocedures", ObjectType::StoredProcedure),
        ("procedures", ObjectType::StoredProcedure),
        ("functions", ObjectType::ScalarFunction),
        ("triggers", ObjectType::Trigger),
        ("users", ObjectType::User),
        ("roles", ObjectType::Role),
    ])
});

static LEADING_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*(?:--[^\n]*\n|\s)*CREATE\s+(?:OR\s+ALTER\s+)?(TABLE|VIEW|PROC(?:EDURE)?|FUNCTION|TRIGGER|USER|ROLE)\s+(?:\[?([A-Za-z0-9_]+)\]?\.)?\[?([A-Za-z0-9_]+)\]?")
        .expect("static regex must compile")
});

/// Classifies a candidate file into (schema, object, type). Tries the path
/// layout first (cheap, usually right for well-organized projects), then
/// falls back to parsing the leading `CREATE` statement, then `Unknown`.
fn classify(
    relative: &Path,
    content: &str,
    declared_layout: LayoutKind,
    inferred_layout: LayoutKind,
) -> (String, String, ObjectType) {
    if let Some(result) = classify_by_path(relative, declared_layout) {
        return result;
    }
    if declared_layout != inferred_layout {
        if let Some(result) = classify_by_path(relative, inferred_layout) {
            return result;
        }
    }
    if let Some(result) = classify_by_leading_statement(content) {
        return result;
    }

    let object_name = relative
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();
    ("dbo".to_string(), object_name, ObjectType::Unknown)
}

fn classify_by_path(relative: &Path, layout: LayoutKind) -> Option<(String, String, ObjectType)> {
    let components: Vec<&str> = relative.components().filter_map(|c| c.as_os_str().to_str()).collect();
    let stem = relative.file_stem()?.to_str()?;

    match layout {
        LayoutKind::Flat => {
            let (schema, name) = split_schema_prefixed(stem);
            // Flat layout carries no type signal in the path; defer to the
            // leading-statement parse by returning None here.
            let _ = (schema, name);
            None
        }
        LayoutKind::BySchema => {
            let schema = components.first()?.to_string();
            let (_, name) = split_schema_prefixed(stem);
            let name = if name.is_empty() { stem.to_string() } else { name };
            // Schema is known but type still needs the leading-statement
            // parse; signal "no type yet" by returning None so the caller
            // falls through, but keep schema knowledge by re-deriving it
            // downstream via `classify_by_leading_statement` failing to
            // Unknown with this schema. To keep this simple and avoid
            // losing the schema, only return early when the stem encodes a
            // type-looking suffix is absent: we still return None.
            let _ = (schema, name);
            None
        }
        LayoutKind::ByType => {
            let type_dir = components.first()?.to_lowercase();
            let object_type = TYPE_DIR_MAP.get(type_dir.as_str()).copied()?;
            let (schema, name) = split_schema_prefixed(stem);
            let schema = if schema.is_empty() { "dbo".to_string() } else { schema };
            let name = if name.is_empty() { stem.to_string() } else { name };
            Some((schema, name, object_type))
        }
        LayoutKind::BySchemaAndType => {
            if components.len() < 2 {
                return None;
            }
            let schema = components[0].to_string();
            let type_dir = components[1].to_lowercase();
            let object_type = TYPE_DIR_MAP.get(type_dir.as_str()).copied()?;
            Some((schema, stem.to_string(), object_type))
        }
    }
}

fn split_schema_prefixed(stem: &str) -> (String, String) {
    match stem.split_once('.') {
        Some((schema, name)) => (schema.to_string(), name.to_string()),
        None => (String::new(), String::new()),
    }
}

fn classify_by_leading_statement(content: &str) -> Option<(String, String, ObjectType)> {
    let caps = LEADING_STATEMENT.captures(content)?;
    let kind = caps.get(1)?.as_str().to_uppercase();
    let schema = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_else(|| "dbo".to_string());
    let name = caps.get(3)?.as_str().to_string();

    let object_type = match kind.as_str() {
        "TABLE" => ObjectType::Table,
        "VIEW" => ObjectType::View,
        "PROC" | "PROCEDURE" => ObjectType::StoredProcedure,
        "FUNCTION" => ObjectType::ScalarFunction,
        "TRIGGER" => ObjectType::Trigger,
        "USER" => ObjectType::User,
        "ROLE" => ObjectType::Role,
        _ => return None,
    };

    Some((schema, name, object_type))
}
