//! Framework migration-marker detection.
//!
//! Migration frameworks record the version they are applying in their own
//! bookkeeping table (`schema_migrations` for Ecto-style tools,
//! `_prisma_migrations` for Prisma). When such an insert passes through an
//! open transaction, the version it carries is reused for the proxy's own
//! version-capture row so downstream ordering matches the tool's.

use std::sync::OnceLock;

/// Matches an insert into a known framework bookkeeping table.
fn marker_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r#"(?is)^\s*insert\s+into\s+"?(?:[a-z_][a-z0-9_]*"?\."?)?(schema_migrations|_prisma_migrations)"?"#,
        )
        .expect("marker regex is valid")
    })
}

/// Extracts the first literal of the VALUES list, quoted or numeric.
fn version_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r#"(?is)values\s*\(\s*(?:'([^']*)'|(\d+))"#)
            .expect("version regex is valid")
    })
}

/// The outcome of scanning one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Not a framework bookkeeping insert.
    None,
    /// A bookkeeping insert carrying its version inline.
    Version(String),
    /// A bookkeeping insert whose version arrives as a bind parameter.
    Parameterized,
}

/// Scan one statement for a framework marker.
pub fn scan(sql: &str) -> Marker {
    if !marker_regex().is_match(sql) {
        return Marker::None;
    }
    match version_regex().captures(sql) {
        Some(captures) => {
            let version = captures
                .get(1)
                .or_else(|| captures.get(2))
                .map(|m| m.as_str().to_string());
            match version {
                Some(v) if !v.is_empty() => Marker::Version(v),
                _ => Marker::Parameterized,
            }
        }
        None => Marker::Parameterized,
    }
}

/// Decode a bound version value: text parameters verbatim, binary int4/int8
/// parameters as their decimal rendering.
pub fn decode_bound_version(format: i16, value: &[u8]) -> Option<String> {
    match format {
        0 => std::str::from_utf8(value).ok().map(|s| s.to_string()),
        1 => match value.len() {
            8 => Some(i64::from_be_bytes(value.try_into().ok()?).to_string()),
            4 => Some(i32::from_be_bytes(value.try_into().ok()?).to_string()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecto_style_inline_version() {
        assert_eq!(
            scan("INSERT INTO \"schema_migrations\" (version) VALUES (20230904142501)"),
            Marker::Version("20230904142501".to_string())
        );
        assert_eq!(
            scan("insert into public.schema_migrations (version, inserted_at) values ('20230904', now())"),
            Marker::Version("20230904".to_string())
        );
    }

    #[test]
    fn test_prisma_marker() {
        assert_eq!(
            scan("INSERT INTO _prisma_migrations (id, migration_name) VALUES ('abc', '0001_init')"),
            Marker::Version("abc".to_string())
        );
    }

    #[test]
    fn test_parameterized_marker() {
        assert_eq!(
            scan("INSERT INTO \"schema_migrations\" (\"version\",\"inserted_at\") VALUES ($1,$2)"),
            Marker::Parameterized
        );
    }

    #[test]
    fn test_ordinary_inserts_ignored() {
        assert_eq!(
            scan("INSERT INTO users (name) VALUES ('schema_migrations')"),
            Marker::None
        );
        assert_eq!(scan("SELECT * FROM schema_migrations"), Marker::None);
    }

    #[test]
    fn test_bound_version_decoding() {
        assert_eq!(
            decode_bound_version(0, b"20230904142501"),
            Some("20230904142501".to_string())
        );
        assert_eq!(
            decode_bound_version(1, &20230904142501i64.to_be_bytes()),
            Some("20230904142501".to_string())
        );
        assert_eq!(decode_bound_version(1, &[1, 2, 3]), None);
    }
}
