//! ResourceArc Wrappers
//!
//! Persistent state for scanners and processors held by the BEAM.

use crate::core::tokenizer::TagScanner;
use crate::options::{ProcessorOptions, ScannerOptions};
use crate::processor::DocumentProcessor;
use rustler::ResourceArc;
use std::sync::Mutex;

/// Wrapper for TagScanner that can be stored in a ResourceArc
pub struct ScannerResource {
    pub inner: Mutex<TagScanner>,
}

impl ScannerResource {
    pub fn new(xml: String) -> Self {
        ScannerResource {
            inner: Mutex::new(TagScanner::with_options(xml, ScannerOptions::default())),
        }
    }

    pub fn streaming(chunk: String) -> Self {
        ScannerResource {
            inner: Mutex::new(TagScanner::for_streaming(chunk)),
        }
    }

    /// Run `f` against the locked scanner.
    ///
    /// # Errors
    ///
    /// Returns `"mutex_poisoned"` if a previous caller panicked mid-update.
    pub fn with_scanner<F, R>(&self, f: F) -> Result<R, &'static str>
    where
        F: FnOnce(&mut TagScanner) -> R,
    {
        let mut guard = self.inner.lock().map_err(|_| "mutex_poisoned")?;
        Ok(f(&mut guard))
    }
}

#[rustler::resource_impl]
impl rustler::Resource for ScannerResource {}

/// Type alias for the ResourceArc
pub type ScannerRef = ResourceArc<ScannerResource>;

/// Wrapper for DocumentProcessor that can be stored in a ResourceArc
pub struct ProcessorResource {
    pub inner: Mutex<DocumentProcessor>,
}

impl ProcessorResource {
    pub fn new(xml: String, options: ProcessorOptions) -> Self {
        ProcessorResource {
            inner: Mutex::new(DocumentProcessor::with_options(xml, options)),
        }
    }

    /// Run `f` against the locked processor.
    ///
    /// # Errors
    ///
    /// Returns `"mutex_poisoned"` if a previous caller panicked mid-update.
    pub fn with_processor<F, R>(&self, f: F) -> Result<R, &'static str>
    where
        F: FnOnce(&mut DocumentProcessor) -> R,
    {
        let mut guard = self.inner.lock().map_err(|_| "mutex_poisoned")?;
        Ok(f(&mut guard))
    }
}

#[rustler::resource_impl]
impl rustler::Resource for ProcessorResource {}

/// Type alias for processor ResourceArc
pub type ProcessorRef = ResourceArc<ProcessorResource>;
