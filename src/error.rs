//! Error Types
//!
//! - `ParseError`: returned from token advancement; separates "need more bytes"
//!   from "this input is broken"
//! - `MalformedInput`: sticky well-formedness failure with a level of concern
//! - `BookmarkError`: bookmark and seek limits, never sticky
//! - `DecodeError`: raised lazily when attribute values or text are read
//! - `QueryError`: a breadcrumb query string that does not parse
//! - `BatchError`: any of the above, for batch helpers that both parse and
//!   read values

use std::borrow::Cow;
use thiserror::Error;

/// How serious a well-formedness violation is.
///
/// Ordered from least to most severe, so a threshold comparison reads
/// naturally: `violation.concern >= threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Concern {
    /// Any deviation at all.
    #[default]
    Cosmetic,
    /// Not well-formed, but scanning can continue without guessing.
    Recoverable,
    /// The document grammar is broken (content outside the root, two roots).
    Structural,
    /// Scanning cannot continue.
    Catastrophic,
}

impl Concern {
    pub fn as_str(self) -> &'static str {
        match self {
            Concern::Cosmetic => "cosmetic",
            Concern::Recoverable => "recoverable",
            Concern::Structural => "structural",
            Concern::Catastrophic => "catastrophic",
        }
    }
}

/// Taxonomy of sticky failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The document is corrupt.
    Syntax,
    /// The document uses a feature this crate does not support.
    Unsupported,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Unsupported => "unsupported",
        }
    }
}

/// A well-formedness violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} error ({}): {message} at byte {at}", kind.as_str(), concern.as_str())]
pub struct MalformedInput {
    pub kind: ErrorKind,
    pub concern: Concern,
    pub message: Cow<'static, str>,
    pub at: usize,
}

impl MalformedInput {
    pub fn syntax(message: impl Into<Cow<'static, str>>, at: usize) -> Self {
        MalformedInput {
            kind: ErrorKind::Syntax,
            concern: Concern::Catastrophic,
            message: message.into(),
            at,
        }
    }

    pub fn unsupported(message: impl Into<Cow<'static, str>>, at: usize) -> Self {
        MalformedInput {
            kind: ErrorKind::Unsupported,
            concern: Concern::Catastrophic,
            message: message.into(),
            at,
        }
    }

    /// Violation detected above the lexical layer.
    pub fn violation(
        concern: Concern,
        message: impl Into<Cow<'static, str>>,
        at: usize,
    ) -> Self {
        MalformedInput {
            kind: ErrorKind::Syntax,
            concern,
            message: message.into(),
            at,
        }
    }
}

/// Why advancing failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input ends inside a token or before the document is complete.
    /// Append more bytes and retry.
    #[error("incomplete input at byte {at}")]
    Incomplete { at: usize },
    #[error(transparent)]
    Malformed(#[from] MalformedInput),
}

impl ParseError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete { .. })
    }

    pub fn malformed(&self) -> Option<&MalformedInput> {
        match self {
            ParseError::Malformed(err) => Some(err),
            ParseError::Incomplete { .. } => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookmarkError {
    #[error("too many bookmarks (limit is {max})")]
    TooManyBookmarks { max: usize },
    #[error("too many seek operations (limit is {max})")]
    TooManySeeks { max: usize },
    #[error("unknown bookmark '{0}'")]
    UnknownBookmark(String),
    #[error("no current token to bookmark")]
    NoCurrentToken,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    #[error("'&' does not start a character reference")]
    BareAmpersand,
    #[error("character reference has no digits")]
    MissingDigits,
    #[error("character reference has too many digits")]
    TooManyDigits,
    #[error("character reference is missing its ';'")]
    Unterminated,
    #[error("character reference is not an XML character")]
    InvalidCodePoint,
}

/// Invalid reference inside a decoded span; `at` is relative to the span.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind} at byte {at}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub at: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("empty query")]
    Empty,
    #[error("invalid query segment '{0}'")]
    InvalidSegment(String),
    #[error("match offset must be at least 1")]
    ZeroOffset,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Query(#[from] QueryError),
}
