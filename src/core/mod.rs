//! Core XML scanning primitives
//!
//! This module contains the fundamental building blocks:
//! - Scanner: SIMD-accelerated delimiter detection using memchr
//! - Tokenizer: the tag scanner state machine
//! - Entities: reference decoding with Cow (zero-copy when possible)
//! - Attributes: attribute tokens and their lexer
//! - Encoding: UTF-16 detection and the XML declaration
//! - Span / Updates: offsets into the document and deferred edits

pub mod attributes;
pub mod encoding;
pub mod entities;
pub mod scanner;
pub mod span;
pub mod tokenizer;
pub mod updates;
