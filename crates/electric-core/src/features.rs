//! Proxy feature flags.
//!
//! A process-wide, read-mostly map of `flag name -> bool`. Sessions take a
//! copy-on-write snapshot at startup; the DDLX layer consults the snapshot to
//! reject commands whose feature is disabled.

use std::collections::BTreeMap;
use std::fmt;

/// Flag gating `ELECTRIC GRANT`.
pub const PROXY_DDLX_GRANT: &str = "proxy_ddlx_grant";
/// Flag gating `ELECTRIC REVOKE`.
pub const PROXY_DDLX_REVOKE: &str = "proxy_ddlx_revoke";
/// Flag gating `ELECTRIC ASSIGN`.
pub const PROXY_DDLX_ASSIGN: &str = "proxy_ddlx_assign";
/// Flag gating `ELECTRIC UNASSIGN`.
pub const PROXY_DDLX_UNASSIGN: &str = "proxy_ddlx_unassign";
/// Flag gating `ELECTRIC SQLITE`.
pub const PROXY_DDLX_SQLITE: &str = "proxy_ddlx_sqlite";
/// Flag gating grants that carry write privileges.
pub const PROXY_GRANT_WRITE_PERMISSIONS: &str = "proxy_grant_write_permissions";

/// All flag names the proxy recognizes.
pub const KNOWN_FLAGS: &[&str] = &[
    PROXY_DDLX_GRANT,
    PROXY_DDLX_REVOKE,
    PROXY_DDLX_ASSIGN,
    PROXY_DDLX_UNASSIGN,
    PROXY_DDLX_SQLITE,
    PROXY_GRANT_WRITE_PERMISSIONS,
];

/// The feature flag map. Unset flags are enabled; `ELECTRIC_FEATURES`
/// entries are an operator opt-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    overrides: BTreeMap<String, bool>,
}

impl FeatureFlags {
    /// A map with every flag at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `ELECTRIC_FEATURES` surface: colon-separated `flag=bool`
    /// pairs, e.g. `proxy_ddlx_grant=false:proxy_ddlx_sqlite=true`.
    pub fn parse(spec: &str) -> Result<Self, FeatureParseError> {
        let mut flags = Self::new();
        for entry in spec.split(':').filter(|e| !e.trim().is_empty()) {
            let Some((name, value)) = entry.split_once('=') else {
                return Err(FeatureParseError {
                    entry: entry.to_string(),
                    detail: "expected flag=true|false".to_string(),
                });
            };
            let name = name.trim();
            if !KNOWN_FLAGS.contains(&name) {
                return Err(FeatureParseError {
                    entry: entry.to_string(),
                    detail: format!("unknown flag '{name}'"),
                });
            }
            let value = match value.trim() {
                "true" | "1" => true,
                "false" | "0" => false,
                other => {
                    return Err(FeatureParseError {
                        entry: entry.to_string(),
                        detail: format!("invalid boolean '{other}'"),
                    });
                }
            };
            flags.overrides.insert(name.to_string(), value);
        }
        Ok(flags)
    }

    /// Is the named flag enabled?
    pub fn enabled(&self, flag: &str) -> bool {
        self.overrides.get(flag).copied().unwrap_or(true)
    }

    /// Override a single flag. Live overrides are a testing concern.
    pub fn set(&mut self, flag: impl Into<String>, value: bool) {
        self.overrides.insert(flag.into(), value);
    }
}

/// A malformed `ELECTRIC_FEATURES` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureParseError {
    /// The offending entry verbatim.
    pub entry: String,
    /// What was wrong with it.
    pub detail: String,
}

impl fmt::Display for FeatureParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid entry \"{}\": {}", self.entry, self.detail)
    }
}

impl std::error::Error for FeatureParseError {}
