//! DDLX errors.

use thiserror::Error;

/// Errors raised while classifying or parsing statements.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DdlxError {
    /// Malformed DDLX input.
    #[error("syntax error at or near line {line}, column {col}: {message}")]
    Parse {
        /// 1-based line of the offending token.
        line: u32,
        /// 1-based column of the offending token.
        col: u32,
        /// What the parser expected or saw.
        message: String,
    },

    /// The command's feature flag is disabled.
    #[error("ELECTRIC feature \"{flag}\" is disabled")]
    FeatureDisabled {
        /// The flag that would have to be enabled.
        flag: &'static str,
    },

    /// A query batch mixes an ELECTRIC command with other statements.
    #[error("an ELECTRIC command must be the only statement in its query")]
    MixedBatch,
}
