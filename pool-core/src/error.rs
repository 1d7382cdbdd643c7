//! Error types for the pool core.
//!
//! Two families with very different lifecycles: construction-time parameter
//! errors are fatal and must prevent startup, while share-validation errors
//! are routine and recoverable (every rejected share produces one). Template
//! errors sit in between: they indicate the upstream daemon handed us data we
//! cannot parse.

use thiserror::Error;

/// Fatal configuration errors for the proof-of-work engine.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PowParamsError {
    #[error("k = {0} is not allowed, index generation requires k <= 32")]
    KTooLarge(u32),

    #[error("n = {0} is not allowed, table indexing requires n < 31")]
    NTooLarge(u32),
}

/// Malformed data in a daemon block-template snapshot.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template field {field} is not valid hex")]
    BadHex { field: &'static str },

    #[error("template field {field} must be {expected} bytes, got {actual}")]
    BadLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Share-validation rejection reasons.
///
/// A closed set: the network layer maps these onto stratum error replies and
/// the accounting layer uses them for ban scoring. None of them is fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShareError {
    #[error("job not found")]
    UnknownJob,

    #[error("incorrect size of extranonce2")]
    BadExtraNonce2Size,

    #[error("incorrect size of nonce")]
    BadNonceSize,

    #[error("worker address isn't set properly")]
    MissingAddress,

    #[error("duplicate share")]
    DuplicateShare,

    #[error("low difficulty share of {share_difficulty}")]
    LowDifficulty { share_difficulty: f64 },
}

impl ShareError {
    /// Numeric stratum error code for wire replies.
    ///
    /// These values are a protocol contract with deployed miners: 20 for
    /// malformed submissions, 21 for a stale/unknown job, 22 for duplicates,
    /// 23 for insufficient difficulty.
    pub fn code(&self) -> u32 {
        match self {
            ShareError::UnknownJob => 21,
            ShareError::DuplicateShare => 22,
            ShareError::LowDifficulty { .. } => 23,
            ShareError::BadExtraNonce2Size
            | ShareError::BadNonceSize
            | ShareError::MissingAddress => 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_error_codes() {
        assert_eq!(ShareError::UnknownJob.code(), 21);
        assert_eq!(ShareError::DuplicateShare.code(), 22);
        assert_eq!(
            ShareError::LowDifficulty {
                share_difficulty: 0.5
            }
            .code(),
            23
        );
        assert_eq!(ShareError::BadExtraNonce2Size.code(), 20);
        assert_eq!(ShareError::BadNonceSize.code(), 20);
        assert_eq!(ShareError::MissingAddress.code(), 20);
    }

    #[test]
    fn test_error_messages_match_wire_contract() {
        // Rejection strings are shown verbatim to miners; keep them stable.
        assert_eq!(ShareError::UnknownJob.to_string(), "job not found");
        assert_eq!(ShareError::DuplicateShare.to_string(), "duplicate share");
    }
}
