//! Scanner and processor configuration.

use crate::error::Concern;

/// Limits for a single [`TagScanner`](crate::core::tokenizer::TagScanner).
///
/// # Default
///
/// `max_bookmarks = 10`, `max_seek_ops = 1000`, `flush_threshold = 1000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerOptions {
    /// How many bookmarks may be live at once.
    ///
    /// Every flush walks all bookmarks, so this bounds the bookkeeping cost
    /// of each edit.
    pub max_bookmarks: usize,

    /// How many times `seek()` may be called over the scanner's lifetime.
    ///
    /// Seeking backward re-scans part of the document; the cap stops a
    /// caller loop from reprocessing the same input forever.
    pub max_seek_ops: usize,

    /// Number of queued replacements that triggers an eager flush.
    pub flush_threshold: usize,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        ScannerOptions {
            max_bookmarks: 10,
            max_seek_ops: 1000,
            flush_threshold: 1000,
        }
    }
}

/// Configuration for a [`DocumentProcessor`](crate::processor::DocumentProcessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessorOptions {
    /// Violations at or above this level stop processing; milder ones are
    /// logged and skipped.
    ///
    /// # Default
    ///
    /// [`Concern::Cosmetic`]: every deviation is reported.
    pub concern_threshold: Concern,

    pub scanner: ScannerOptions,
}

impl ProcessorOptions {
    /// Only stop on violations that make further scanning impossible.
    pub fn lenient() -> Self {
        ProcessorOptions {
            concern_threshold: Concern::Catastrophic,
            ..Default::default()
        }
    }
}
