//! SQL normalizer: canonicalizes SQL text before hashing so
//! formatting differences don't produce spurious comparison results. The
//! pipeline is deterministic and pure - same input, same output, forever,
//! for a given pipeline version.

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeOptions {
    pub ignore_whitespace: bool,
    pub ignore_comments: bool,
}

/// Strips `-- ...` line comments and `/* ... */` block comments, respecting
/// string-literal and bracketed-identifier boundaries so a `--` inside a
/// quoted string is left alone.
fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_bracket = false;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if in_single_quote {
            out.push(c);
            if c == '\'' {
                in_single_quote = false;
            }
            i += 1;
            continue;
        }
        if in_double_quote {
            out.push(c);
            if c == '"' {
                in_double_quote = false;
            }
            i += 1;
            continue;
        }
        if in_bracket {
            out.push(c);
            if c == ']' {
                in_bracket = false;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' => {
                in_single_quote = true;
                out.push(c);
                i += 1;
            }
            '"' => {
                in_double_quote = true;
                out.push(c);
                i += 1;
            }
            '[' => {
                in_bracket = true;
                out.push(c);
                i += 1;
            }
            '-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            '/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Collapses runs of whitespace outside string/identifier literals to a
/// single space and trims the ends.
fn collapse_whitespace(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_bracket = false;
    let mut last_was_space = false;

    for c in sql.chars() {
        if in_single_quote {
            out.push(c);
            if c == '\'' {
                in_single_quote = false;
            }
            continue;
        }
        if in_double_quote {
            out.push(c);
            if c == '"' {
                in_double_quote = false;
            }
            continue;
        }
        if in_bracket {
            out.push(c);
            if c == ']' {
                in_bracket = false;
            }
            continue;
        }

        match c {
            '\'' => {
                in_single_quote = true;
                out.push(c);
                last_was_space = false;
            }
            '"' => {
                in_double_quote = true;
                out.push(c);
                last_was_space = false;
            }
            '[' => {
                in_bracket = true;
                out.push(c);
                last_was_space = false;
            }
            c if c.is_whitespace() => {
                if !last_was_space {
                    out.push(' ');
                    last_was_space = true;
                }
            }
            c => {
                out.push(c);
                last_was_space = false;
            }
        }
    }

    out.trim().to_string()
}

/// Normalizes `WITH (...)` option-clause ordering for index definitions by
/// sorting the comma-separated options alphabetically. Best-effort: only
/// rewrites clauses it can parse unambiguously, leaves everything else
/// untouched.
fn normalize_with_clauses(sql: &str) -> String {
    let upper = sql.to_uppercase();
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;

    while let Some(rel) = upper[cursor..].find("WITH (") {
        let start = cursor + rel;
        out.push_str(&sql[cursor..start]);
        let open = start + "WITH (".len() - 1;
        if let Some(close_rel) = sql[open..].find(')') {
            let close = open + close_rel;
            let inner = &sql[open + 1..close];
            let mut opts: Vec<&str> = inner.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
            opts.sort_unstable();
            out.push_str("WITH (");
            out.push_str(&opts.join(", "));
            out.push(')');
            cursor = close + 1;
        } else {
            out.push_str(&sql[start..start + "WITH (".len()]);
            cursor = start + "WITH (".len();
        }
    }

    out.push_str(&sql[cursor..]);
    out
}

/// Applies the full pipeline and returns the canonical text.
pub fn normalize(sql: &str, options: NormalizeOptions) -> String {
    let mut text = sql.replace("\r\n", "\n").replace('\r', "\n");

    if options.ignore_comments {
        text = strip_comments(&text);
    }

    if options.ignore_whitespace {
        text = collapse_whitespace(&text);
    } else {
        text = text.lines().map(|l| l.trim_end()).collect::<Vec<_>>().join("\n");
        text = text.trim().to_string();
    }

    normalize_with_clauses(&text)
}

/// SHA-256 of the normalized bytes, hex-encoded.
pub fn hash_definition(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Concatenation separator used when folding per-object hashes into a
/// snapshot's overall hash.
const SNAPSHOT_HASH_SEPARATOR: u8 = 0x1f; // ASCII unit separator

/// Computes a snapshot's overall hash: SHA-256 of the per-object hashes,
/// sorted by `(type, schema, name)`, joined by a separator byte.
pub fn compute_snapshot_hash<'a>(mut keyed_hashes: Vec<(crate::sync::model::ObjectKey, &'a str)>) -> String {
    keyed_hashes.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Sha256::new();
    for (i, (_, hash)) in keyed_hashes.iter().enumerate() {
        if i > 0 {
            hasher.update([SNAPSHOT_HASH_SEPARATOR]);
        }
        hasher.update(hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_on_already_normalized_text() {
        let opts = NormalizeOptions { ignore_whitespace: true, ignore_comments: true };
        let once = normalize("CREATE  TABLE  dbo.Foo (Id INT)", opts);
        let twice = normalize(&once, opts);
        assert_eq!(once, twice);
    }

    #[test]
    fn whitespace_and_comment_variants_hash_equal() {
        let opts = NormalizeOptions { ignore_whitespace: true, ignore_comments: true };
        let a = normalize("CREATE TABLE dbo.Foo (Id INT) -- comment", opts);
        let b = normalize("CREATE   TABLE\n dbo.Foo (Id  INT)\n/* a comment */", opts);
        assert_eq!(hash_definition(&a), hash_definition(&b));
    }

    #[test]
    fn preserves_string_literal_contents() {
        let opts = NormalizeOptions { ignore_whitespace: true, ignore_comments: true };
        let out = normalize("SELECT '--not a comment'", opts);
        assert!(out.contains("--not a comment"));
    }

    #[test]
    fn snapshot_hash_is_order_independent_of_input_order() {
        use crate::sync::model::{ObjectKey, ObjectType};
        let k1 = ObjectKey { object_type: ObjectType::Table, schema_name: "dbo".into(), object_name: "a".into() };
        let k2 = ObjectKey { object_type: ObjectType::Table, schema_name: "dbo".into(), object_name: "b".into() };
        let h1 = compute_snapshot_hash(vec![(k1.clone(), "hash_a"), (k2.clone(), "hash_b")]);
        let h2 = compute_snapshot_hash(vec![(k2, "hash_b"), (k1, "hash_a")]);
        assert_eq!(h1, h2);
    }
}
