//! TagScribe - Streaming XML tag scanning and in-place rewriting
//!
//! Layers:
//! - Scanner: linear token walk with lazy attribute decoding and queued edits
//! - Processor: document grammar, open-element stack, breadcrumb queries
//! - Strategy: whole-document rewrites and parallel queries (Rayon)

pub mod core;
pub mod error;
pub mod options;
pub mod processor;
mod resource;
pub mod strategy;
mod term;

use rustler::{Binary, Encoder, Env, NifResult, ResourceArc, Term};
use std::num::NonZeroUsize;
use std::sync::OnceLock;

use crate::core::encoding::{utf8_chunk, utf8_input};
use crate::error::{BatchError, ParseError};
use crate::options::ProcessorOptions;
use crate::processor::{QueryCache, TagQuery};
use crate::strategy::{attribute_values_parallel, rewrite_attribute as rewrite_document, AttributeEdit};
use resource::{ProcessorRef, ProcessorResource, ScannerRef, ScannerResource};
use term::{
    advance_to_term, attribute_value_to_term, batch_error_to_term, bookmark_error_to_term,
    decode_error_to_term, ok, optional_str_to_term, parse_error_to_term, query_error_to_term,
    resource_error_to_term, str_to_binary, strings_to_list,
};

// ============================================================================
// Allocator Configuration
// ============================================================================

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// ============================================================================
// Query Cache
// ============================================================================

const QUERY_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(size) => size,
    None => panic!("query cache size must be non-zero"),
};

static QUERY_CACHE: OnceLock<QueryCache> = OnceLock::new();

fn query_cache() -> &'static QueryCache {
    QUERY_CACHE.get_or_init(|| QueryCache::new(QUERY_CACHE_SIZE))
}

/// Lift a resource lock failure into an error term
fn settle<'a>(env: Env<'a>, result: Result<Term<'a>, &'static str>) -> NifResult<Term<'a>> {
    Ok(result.unwrap_or_else(|reason| resource_error_to_term(env, reason)))
}

fn processor_options(lenient: bool) -> ProcessorOptions {
    if lenient {
        ProcessorOptions::lenient()
    } else {
        ProcessorOptions::default()
    }
}

// ============================================================================
// Tag Scanner
// ============================================================================

/// Create a scanner over a complete document
#[rustler::nif]
fn scanner_new<'a>(env: Env<'a>, input: Binary<'a>) -> NifResult<Term<'a>> {
    match utf8_input(input.as_slice()) {
        Ok(xml) => {
            let arc = ResourceArc::new(ScannerResource::new(xml.to_owned()));
            Ok((ok(), arc).encode(env))
        }
        Err(err) => Ok(parse_error_to_term(env, &ParseError::Malformed(err))),
    }
}

/// Create a scanner that expects more chunks
#[rustler::nif]
fn scanner_new_streaming<'a>(env: Env<'a>, chunk: Binary<'a>) -> NifResult<Term<'a>> {
    match utf8_input(chunk.as_slice()) {
        Ok(xml) => {
            let arc = ResourceArc::new(ScannerResource::streaming(xml.to_owned()));
            Ok((ok(), arc).encode(env))
        }
        Err(err) => Ok(parse_error_to_term(env, &ParseError::Malformed(err))),
    }
}

/// Append a chunk; false once the input was finished
#[rustler::nif]
fn scanner_append<'a>(env: Env<'a>, scanner: ScannerRef, chunk: Binary<'a>) -> NifResult<Term<'a>> {
    let chunk = match utf8_chunk(chunk.as_slice()) {
        Ok(chunk) => chunk,
        Err(err) => return Ok(parse_error_to_term(env, &ParseError::Malformed(err))),
    };
    settle(env, scanner.with_scanner(|s| s.append_bytes(chunk).encode(env)))
}

#[rustler::nif]
fn scanner_finish<'a>(env: Env<'a>, scanner: ScannerRef) -> NifResult<Term<'a>> {
    settle(
        env,
        scanner.with_scanner(|s| {
            s.input_finished();
            ok().encode(env)
        }),
    )
}

/// Advance: `{:ok, token_type}`, `:complete`, `:incomplete` or an error
#[rustler::nif]
fn scanner_next_token<'a>(env: Env<'a>, scanner: ScannerRef) -> NifResult<Term<'a>> {
    settle(env, scanner.with_scanner(|s| advance_to_term(env, s.advance())))
}

#[rustler::nif]
fn scanner_tag_name<'a>(env: Env<'a>, scanner: ScannerRef) -> NifResult<Term<'a>> {
    settle(env, scanner.with_scanner(|s| optional_str_to_term(env, s.get_tag_name())))
}

#[rustler::nif]
fn scanner_get_attribute<'a>(env: Env<'a>, scanner: ScannerRef, name: &str) -> NifResult<Term<'a>> {
    settle(
        env,
        scanner.with_scanner(|s| match s.get_attribute(name) {
            Ok(value) => (ok(), attribute_value_to_term(env, &value)).encode(env),
            Err(err) => decode_error_to_term(env, &err),
        }),
    )
}

#[rustler::nif]
fn scanner_set_attribute<'a>(env: Env<'a>, scanner: ScannerRef, name: &str, value: &str) -> NifResult<Term<'a>> {
    settle(env, scanner.with_scanner(|s| s.set_attribute(name, value).encode(env)))
}

#[rustler::nif]
fn scanner_remove_attribute<'a>(env: Env<'a>, scanner: ScannerRef, name: &str) -> NifResult<Term<'a>> {
    settle(env, scanner.with_scanner(|s| s.remove_attribute(name).encode(env)))
}

#[rustler::nif]
fn scanner_modifiable_text<'a>(env: Env<'a>, scanner: ScannerRef) -> NifResult<Term<'a>> {
    settle(
        env,
        scanner.with_scanner(|s| match s.get_modifiable_text() {
            Ok(text) => (ok(), str_to_binary(env, &text)).encode(env),
            Err(err) => decode_error_to_term(env, &err),
        }),
    )
}

#[rustler::nif]
fn scanner_set_modifiable_text<'a>(env: Env<'a>, scanner: ScannerRef, text: &str) -> NifResult<Term<'a>> {
    settle(env, scanner.with_scanner(|s| s.set_modifiable_text(text).encode(env)))
}

#[rustler::nif]
fn scanner_set_bookmark<'a>(env: Env<'a>, scanner: ScannerRef, name: &str) -> NifResult<Term<'a>> {
    settle(
        env,
        scanner.with_scanner(|s| match s.set_bookmark(name) {
            Ok(()) => ok().encode(env),
            Err(err) => bookmark_error_to_term(env, &err),
        }),
    )
}

#[rustler::nif]
fn scanner_seek<'a>(env: Env<'a>, scanner: ScannerRef, name: &str) -> NifResult<Term<'a>> {
    settle(
        env,
        scanner.with_scanner(|s| match s.seek(name) {
            Ok(()) => ok().encode(env),
            Err(err) => bookmark_error_to_term(env, &err),
        }),
    )
}

#[rustler::nif]
fn scanner_release_bookmark<'a>(env: Env<'a>, scanner: ScannerRef, name: &str) -> NifResult<Term<'a>> {
    settle(env, scanner.with_scanner(|s| s.release_bookmark(name).encode(env)))
}

/// Flush queued edits and return the document
#[rustler::nif]
fn scanner_updated_text<'a>(env: Env<'a>, scanner: ScannerRef) -> NifResult<Term<'a>> {
    settle(env, scanner.with_scanner(|s| str_to_binary(env, s.get_updated_text())))
}

#[rustler::nif]
fn scanner_declare_opaque<'a>(env: Env<'a>, scanner: ScannerRef, name: &str) -> NifResult<Term<'a>> {
    settle(env, scanner.with_scanner(|s| s.declare_opaque_element(name).encode(env)))
}

// ============================================================================
// Document Processor
// ============================================================================

/// Create a processor; `lenient` only stops on catastrophic violations
#[rustler::nif]
fn processor_new<'a>(env: Env<'a>, input: Binary<'a>, lenient: bool) -> NifResult<Term<'a>> {
    match utf8_input(input.as_slice()) {
        Ok(xml) => {
            let resource = ProcessorResource::new(xml.to_owned(), processor_options(lenient));
            Ok((ok(), ResourceArc::new(resource)).encode(env))
        }
        Err(err) => Ok(parse_error_to_term(env, &ParseError::Malformed(err))),
    }
}

/// Move to the next tag matching a breadcrumb query such as `"a/b/*"`.
///
/// Returns `{:ok, tag_name}` or `:complete` when nothing else matches.
#[rustler::nif]
fn processor_next_tag<'a>(env: Env<'a>, processor: ProcessorRef, query: &str) -> NifResult<Term<'a>> {
    let query = match query_cache().get_or_parse(query) {
        Ok(query) => query,
        Err(err) => return Ok(query_error_to_term(env, &err)),
    };
    settle(
        env,
        processor.with_processor(|p| match p.next_matching_tag(&query) {
            Ok(true) => (ok(), optional_str_to_term(env, p.get_tag_name())).encode(env),
            Ok(false) => term::complete().encode(env),
            Err(err) => parse_error_to_term(env, &err),
        }),
    )
}

#[rustler::nif]
fn processor_breadcrumbs<'a>(env: Env<'a>, processor: ProcessorRef) -> NifResult<Term<'a>> {
    settle(env, processor.with_processor(|p| strings_to_list(env, p.get_breadcrumbs())))
}

#[rustler::nif]
fn processor_get_attribute<'a>(env: Env<'a>, processor: ProcessorRef, name: &str) -> NifResult<Term<'a>> {
    settle(
        env,
        processor.with_processor(|p| match p.get_attribute(name) {
            Ok(value) => (ok(), attribute_value_to_term(env, &value)).encode(env),
            Err(err) => decode_error_to_term(env, &err),
        }),
    )
}

#[rustler::nif]
fn processor_set_attribute<'a>(
    env: Env<'a>,
    processor: ProcessorRef,
    name: &str,
    value: &str,
) -> NifResult<Term<'a>> {
    settle(env, processor.with_processor(|p| p.set_attribute(name, value).encode(env)))
}

#[rustler::nif]
fn processor_remove_attribute<'a>(env: Env<'a>, processor: ProcessorRef, name: &str) -> NifResult<Term<'a>> {
    settle(env, processor.with_processor(|p| p.remove_attribute(name).encode(env)))
}

#[rustler::nif]
fn processor_modifiable_text<'a>(env: Env<'a>, processor: ProcessorRef) -> NifResult<Term<'a>> {
    settle(
        env,
        processor.with_processor(|p| match p.get_modifiable_text() {
            Ok(text) => (ok(), str_to_binary(env, &text)).encode(env),
            Err(err) => decode_error_to_term(env, &err),
        }),
    )
}

#[rustler::nif]
fn processor_updated_text<'a>(env: Env<'a>, processor: ProcessorRef) -> NifResult<Term<'a>> {
    settle(env, processor.with_processor(|p| str_to_binary(env, p.get_updated_text())))
}

// ============================================================================
// Batch Operations
// ============================================================================

/// Collect an attribute's values for many breadcrumb queries in parallel.
///
/// One `{:ok, values}` or error term per query, in query order.
#[rustler::nif(schedule = "DirtyCpu")]
fn query_attribute_parallel<'a>(
    env: Env<'a>,
    input: Binary<'a>,
    queries: Vec<&str>,
    attribute: &str,
) -> NifResult<Term<'a>> {
    let xml = match utf8_input(input.as_slice()) {
        Ok(xml) => xml,
        Err(err) => return Ok(parse_error_to_term(env, &ParseError::Malformed(err))),
    };

    let parsed: Vec<_> = queries.iter().map(|query| query_cache().get_or_parse(query)).collect();
    let valid: Vec<TagQuery> = parsed
        .iter()
        .filter_map(|query| query.as_ref().ok().map(|query| TagQuery::clone(query)))
        .collect();

    let mut values = attribute_values_parallel(xml, &valid, attribute, ProcessorOptions::default()).into_iter();
    let results: Vec<Result<Vec<String>, BatchError>> = parsed
        .into_iter()
        .map(|query| match query {
            Ok(_) => values.next().unwrap_or_else(|| Ok(Vec::new())),
            Err(err) => Err(err.into()),
        })
        .collect();

    let mut list = Term::list_new_empty(env);
    for result in results.iter().rev() {
        let term = match result {
            Ok(values) => (ok(), strings_to_list(env, values)).encode(env),
            Err(err) => batch_error_to_term(env, err),
        };
        list = list.list_prepend(term);
    }
    Ok(list)
}

/// Set one attribute on every tag matching a query; returns the rewritten
/// document as `{:ok, xml}`
#[rustler::nif(schedule = "DirtyCpu")]
fn rewrite_attribute<'a>(
    env: Env<'a>,
    input: Binary<'a>,
    query: &str,
    name: &str,
    value: &str,
) -> NifResult<Term<'a>> {
    let xml = match utf8_input(input.as_slice()) {
        Ok(xml) => xml,
        Err(err) => return Ok(parse_error_to_term(env, &ParseError::Malformed(err))),
    };
    let query = match query_cache().get_or_parse(query) {
        Ok(query) => query,
        Err(err) => return Ok(query_error_to_term(env, &err)),
    };

    match rewrite_document(xml, &query, AttributeEdit::Set(name, value), ProcessorOptions::default()) {
        Ok((text, _)) => Ok((ok(), str_to_binary(env, &text)).encode(env)),
        Err(err) => Ok(parse_error_to_term(env, &err)),
    }
}

// ============================================================================
// NIF Initialization
// ============================================================================

rustler::init!("Elixir.TagScribe.Native");
