//! Elixir Term Conversion Utilities
//!
//! Converts scanner results and errors to Elixir terms.

use crate::core::attributes::AttributeValue;
use crate::core::tokenizer::TokenType;
use crate::error::{BatchError, BookmarkError, DecodeError, ErrorKind, ParseError, QueryError};
use rustler::{Atom, Encoder, Env, NewBinary, Term};

// Pre-defined atoms for efficiency - created once at compile time
rustler::atoms! {
    ok,
    error,
    incomplete,
    complete,
    syntax,
    unsupported,
    decode,
    bookmark,
    query,
    resource,
    tag,
    text,
    cdata,
    comment,
    processing_instruction,
    xml_declaration,
}

pub fn token_type_atom(token: TokenType) -> Atom {
    match token {
        TokenType::Tag => tag(),
        TokenType::Text => text(),
        TokenType::CData => cdata(),
        TokenType::Comment => comment(),
        TokenType::ProcessingInstruction => processing_instruction(),
        TokenType::XmlDeclaration => xml_declaration(),
    }
}

/// `{:ok, type}`, `:complete` or an error term
pub fn advance_to_term<'a>(env: Env<'a>, result: Result<Option<TokenType>, ParseError>) -> Term<'a> {
    match result {
        Ok(Some(token)) => (ok(), token_type_atom(token)).encode(env),
        Ok(None) => complete().encode(env),
        Err(err) => parse_error_to_term(env, &err),
    }
}

/// `:incomplete` or `{:error, kind, message}`
pub fn parse_error_to_term<'a>(env: Env<'a>, err: &ParseError) -> Term<'a> {
    match err {
        ParseError::Incomplete { .. } => incomplete().encode(env),
        ParseError::Malformed(malformed) => {
            let kind = match malformed.kind {
                ErrorKind::Syntax => syntax(),
                ErrorKind::Unsupported => unsupported(),
            };
            error_tuple(env, kind, &malformed.to_string())
        }
    }
}

pub fn decode_error_to_term<'a>(env: Env<'a>, err: &DecodeError) -> Term<'a> {
    error_tuple(env, decode(), &err.to_string())
}

pub fn bookmark_error_to_term<'a>(env: Env<'a>, err: &BookmarkError) -> Term<'a> {
    error_tuple(env, bookmark(), &err.to_string())
}

pub fn query_error_to_term<'a>(env: Env<'a>, err: &QueryError) -> Term<'a> {
    error_tuple(env, query(), &err.to_string())
}

pub fn batch_error_to_term<'a>(env: Env<'a>, err: &BatchError) -> Term<'a> {
    match err {
        BatchError::Parse(err) => parse_error_to_term(env, err),
        BatchError::Decode(err) => decode_error_to_term(env, err),
        BatchError::Query(err) => query_error_to_term(env, err),
    }
}

/// Lock failures surface as `{:error, :resource, reason}`
pub fn resource_error_to_term<'a>(env: Env<'a>, reason: &str) -> Term<'a> {
    error_tuple(env, resource(), reason)
}

fn error_tuple<'a>(env: Env<'a>, kind: Atom, message: &str) -> Term<'a> {
    (error(), kind, str_to_binary(env, message)).encode(env)
}

/// Present values become binaries, valueless attributes `true`, absent
/// ones `nil`.
pub fn attribute_value_to_term<'a>(env: Env<'a>, value: &AttributeValue<'_>) -> Term<'a> {
    match value {
        AttributeValue::Present(value) => str_to_binary(env, value),
        AttributeValue::Boolean => true.encode(env),
        AttributeValue::Absent => rustler::types::atom::nil().encode(env),
    }
}

/// `nil` when there is no value
pub fn optional_str_to_term<'a>(env: Env<'a>, value: Option<&str>) -> Term<'a> {
    match value {
        Some(value) => str_to_binary(env, value),
        None => rustler::types::atom::nil().encode(env),
    }
}

pub fn strings_to_list<'a, S: AsRef<str>>(env: Env<'a>, values: &[S]) -> Term<'a> {
    let mut list = Term::list_new_empty(env);
    for value in values.iter().rev() {
        list = list.list_prepend(str_to_binary(env, value.as_ref()));
    }
    list
}

/// Convert a string to a binary term (more efficient than .encode())
#[inline]
pub fn str_to_binary<'a>(env: Env<'a>, s: &str) -> Term<'a> {
    let bytes = s.as_bytes();
    let mut binary = NewBinary::new(env, bytes.len());
    binary.as_mut_slice().copy_from_slice(bytes);
    binary.into()
}
