//! XML Attribute Parsing
//!
//! Attributes are recorded as spans into the document and only decoded when
//! somebody asks for their value.

use super::scanner::{find_byte, find_byte2, name_len, whitespace_len};
use super::span::Span;
use std::borrow::Cow;

/// A parsed attribute, as offsets into the document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeToken {
    /// Attribute name
    pub name: Span,
    /// Value between the quotes (empty for value-less attributes)
    pub value: Span,
    /// `name="value"`, quotes included
    pub whole: Span,
    /// Whitespace bytes between the previous token part and the name
    pub leading_whitespace: usize,
    /// Written without `=value`
    pub is_boolean: bool,
    /// Value contains `&` or a carriage return
    pub needs_decoding: bool,
}

impl AttributeToken {
    /// Span erased when the attribute is removed, leading whitespace included
    pub fn removal_span(&self) -> Span {
        Span::new(
            self.whole.start - self.leading_whitespace,
            self.whole.length + self.leading_whitespace,
        )
    }

    pub fn name<'a>(&self, input: &'a str) -> &'a str {
        self.name.slice(input)
    }
}

/// Value of an attribute as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue<'a> {
    /// `name="value"`, decoded
    Present(Cow<'a, str>),
    /// `name` with no value
    Boolean,
    Absent,
}

impl<'a> AttributeValue<'a> {
    /// The decoded value, if the attribute has one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_owned(self) -> AttributeValue<'static> {
        match self {
            AttributeValue::Present(value) => AttributeValue::Present(Cow::Owned(value.into_owned())),
            AttributeValue::Boolean => AttributeValue::Boolean,
            AttributeValue::Absent => AttributeValue::Absent,
        }
    }
}

/// Outcome of scanning for one attribute inside a tag opener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeScan {
    /// An attribute, and the offset just past it
    Attribute(AttributeToken, usize),
    /// No more attributes; offset of the `>` or `/` ending the tag
    End(usize),
    /// Ran out of input
    Incomplete,
    /// Not an attribute; message and offset of the offending byte
    Invalid(&'static str, usize),
}

/// Scan the next attribute starting at `at`, just after the tag name or the
/// previous attribute.
pub fn scan_attribute(input: &[u8], at: usize) -> AttributeScan {
    let leading_whitespace = whitespace_len(input, at);
    let name_at = at + leading_whitespace;

    let Some(&first) = input.get(name_at) else {
        return AttributeScan::Incomplete;
    };
    if first == b'>' || first == b'/' {
        return AttributeScan::End(name_at);
    }
    if leading_whitespace == 0 {
        return AttributeScan::Invalid("expected whitespace before attribute", name_at);
    }

    let name_length = name_len(input, name_at);
    if name_length == 0 {
        return AttributeScan::Invalid("invalid attribute name", name_at);
    }
    let name_end = name_at + name_length;

    // Whitespace around '='
    let eq_at = name_end + whitespace_len(input, name_end);
    let Some(&after_name) = input.get(eq_at) else {
        return AttributeScan::Incomplete;
    };

    if after_name != b'=' {
        // Attribute without value
        let name = Span::new(name_at, name_length);
        let token = AttributeToken {
            name,
            value: Span::new(name_end, 0),
            whole: name,
            leading_whitespace,
            is_boolean: true,
            needs_decoding: false,
        };
        return AttributeScan::Attribute(token, name_end);
    }

    let quote_at = eq_at + 1 + whitespace_len(input, eq_at + 1);
    let Some(&quote) = input.get(quote_at) else {
        return AttributeScan::Incomplete;
    };
    if quote != b'"' && quote != b'\'' {
        return AttributeScan::Invalid("attribute value must be quoted", quote_at);
    }

    let value_at = quote_at + 1;
    let Some(close_at) = find_byte(input, quote, value_at) else {
        return AttributeScan::Incomplete;
    };

    let raw = &input[value_at..close_at];
    if let Some(lt) = raw.iter().position(|&b| b == b'<') {
        return AttributeScan::Invalid("'<' is not allowed in attribute values", value_at + lt);
    }

    let token = AttributeToken {
        name: Span::new(name_at, name_length),
        value: Span::new(value_at, close_at - value_at),
        whole: Span::new(name_at, close_at + 1 - name_at),
        leading_whitespace,
        is_boolean: false,
        needs_decoding: find_byte2(raw, b'&', b'\r', 0).is_some(),
    };
    AttributeScan::Attribute(token, close_at + 1)
}
