//! Error taxonomy for NSO <-> ELF conversion
//!
//! Every error is fatal: a conversion either completes or fails as a
//! whole, and partial output is never returned. Heuristic misses
//! (no PLT, no build id, ...) are not errors and do not appear here.

/// Conversion result
pub type Result<T> = core::result::Result<T, ConvertError>;

/// Conversion errors
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// NSO input failed structural validation
    #[error("invalid NSO: {0}")]
    InvalidNso(String),

    /// ELF input failed structural validation
    #[error("invalid ELF: {0}")]
    InvalidElf(String),

    /// LZ4 decode failed or produced the wrong length
    #[error("corrupt {segment} segment: {reason}")]
    CorruptSegment { segment: &'static str, reason: String },

    /// Decompressed image is internally inconsistent (out-of-bounds
    /// MOD0 pointer, unterminated dynamic section, ...)
    #[error("corrupt image: {0}")]
    CorruptImage(String),

    /// Section header table has no free slot for a required section
    #[error("section layout failed: no free slot for {section}")]
    Layout { section: &'static str },
}

impl ConvertError {
    pub(crate) fn corrupt_segment(segment: &'static str, reason: impl Into<String>) -> Self {
        ConvertError::CorruptSegment {
            segment,
            reason: reason.into(),
        }
    }
}
