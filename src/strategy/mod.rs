//! Batch Strategy Module
//!
//! Whole-document helpers built on the processor:
//! - Rewrite: edit every matching tag in one pass
//! - Parallel: evaluate many queries at once with Rayon

pub mod parallel;
pub mod rewrite;

pub use parallel::{attribute_map, attribute_values_parallel, count_parallel};
pub use rewrite::{rewrite_attribute, AttributeEdit};
