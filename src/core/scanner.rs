//! SIMD-accelerated byte searching using memchr
//!
//! Offset-based helpers over the document bytes. The tag scanner keeps its
//! cursor as a plain offset because the document it walks can grow
//! (streaming) or be rewritten (flushing edits), so nothing here borrows the
//! input beyond a single call.

use memchr::{memchr, memchr2, memmem};

/// Find next occurrence of a byte at or after `from`
#[inline]
pub fn find_byte(input: &[u8], byte: u8, from: usize) -> Option<usize> {
    input.get(from..).and_then(|rest| memchr(byte, rest)).map(|i| from + i)
}

/// Find next occurrence of either of two bytes at or after `from`
#[inline]
pub fn find_byte2(input: &[u8], b1: u8, b2: u8, from: usize) -> Option<usize> {
    input.get(from..).and_then(|rest| memchr2(b1, b2, rest)).map(|i| from + i)
}

/// Find next occurrence of a byte sequence at or after `from`
#[inline]
pub fn find_seq(input: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    input.get(from..).and_then(|rest| memmem::find(rest, needle)).map(|i| from + i)
}

/// Check if input continues with a byte sequence at `at`
#[inline]
pub fn starts_with_at(input: &[u8], at: usize, needle: &[u8]) -> bool {
    input.get(at..).is_some_and(|rest| rest.starts_with(needle))
}

/// Count whitespace bytes (space, tab, newline, carriage return) from `at`
#[inline]
pub fn whitespace_len(input: &[u8], at: usize) -> usize {
    input
        .get(at..)
        .map(|rest| rest.iter().take_while(|&&b| is_whitespace(b)).count())
        .unwrap_or(0)
}

/// Length of the XML name starting at `at`, or 0 if none starts there
pub fn name_len(input: &[u8], at: usize) -> usize {
    match input.get(at) {
        Some(&first) if is_name_start_char(first) => {
            1 + input[at + 1..].iter().take_while(|&&b| is_name_char(b)).count()
        }
        _ => 0,
    }
}

/// Check if a whole string is an XML name
pub fn is_name(name: &str) -> bool {
    !name.is_empty() && name_len(name.as_bytes(), 0) == name.len()
}

/// Check if byte is whitespace
#[inline]
pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Check if byte is valid XML name start character
/// Allows ASCII letters, underscore, colon, and non-ASCII (UTF-8 Unicode)
#[inline]
pub fn is_name_start_char(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'_' | b':') || b >= 0x80
}

/// Check if byte is valid XML name character
/// Allows ASCII alphanumeric, punctuation, and non-ASCII (UTF-8 Unicode)
#[inline]
pub fn is_name_char(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' | b'.' | b':') || b >= 0x80
}
