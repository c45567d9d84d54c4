//! Parallel Breadcrumb Queries
//!
//! Uses Rayon to evaluate many queries against one document. Processors are
//! single-threaded, so every task walks the document with its own.

use crate::error::BatchError;
use crate::options::ProcessorOptions;
use crate::processor::{DocumentProcessor, TagQuery};
use rayon::prelude::*;

/// Count the tags matching each query, in parallel
pub fn count_parallel(
    xml: &str,
    queries: &[TagQuery],
    options: ProcessorOptions,
) -> Vec<Result<usize, BatchError>> {
    queries
        .par_iter()
        .map(|query| count_matches(xml, query, options))
        .collect()
}

/// Collect the values of `attribute` on the tags matching each query, in
/// parallel. Tags without the attribute, or with a value-less one, are
/// skipped.
pub fn attribute_values_parallel(
    xml: &str,
    queries: &[TagQuery],
    attribute: &str,
    options: ProcessorOptions,
) -> Vec<Result<Vec<String>, BatchError>> {
    queries
        .par_iter()
        .map(|query| attribute_values(xml, query, attribute, options))
        .collect()
}

/// Key each query's attribute values by a caller-chosen name
pub fn attribute_map(
    xml: &str,
    queries: &[(&str, TagQuery)],
    attribute: &str,
    options: ProcessorOptions,
) -> Result<Vec<(String, Vec<String>)>, BatchError> {
    queries
        .par_iter()
        .map(|(key, query)| {
            attribute_values(xml, query, attribute, options).map(|values| (key.to_string(), values))
        })
        .collect()
}

fn count_matches(xml: &str, query: &TagQuery, options: ProcessorOptions) -> Result<usize, BatchError> {
    let mut processor = DocumentProcessor::with_options(xml, options);
    let query = TagQuery { match_offset: 1, ..query.clone() };
    let mut count = 0;
    while processor.next_matching_tag(&query)? {
        count += 1;
    }
    Ok(count)
}

fn attribute_values(
    xml: &str,
    query: &TagQuery,
    attribute: &str,
    options: ProcessorOptions,
) -> Result<Vec<String>, BatchError> {
    let mut processor = DocumentProcessor::with_options(xml, options);
    let query = TagQuery { match_offset: 1, ..query.clone() };
    let mut values = Vec::new();
    while processor.next_matching_tag(&query)? {
        if let Some(value) = processor.get_attribute(attribute)?.as_str() {
            values.push(value.to_owned());
        }
    }
    Ok(values)
}
