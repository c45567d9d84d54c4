//! XML Entity Decoding
//!
//! Handles decoding of XML references:
//! - Predefined entities: &lt; &gt; &amp; &quot; &apos;
//! - Numeric character references: &#123; &#x7B;
//!
//! Uses Cow for zero-copy when nothing needs decoding. Any other use of `&`
//! fails the whole decode; no partially decoded text is ever returned.

use crate::error::{DecodeError, DecodeErrorKind};
use memchr::{memchr, memchr3};
use std::borrow::Cow;

/// Longest significant digit run accepted in `&#DDD;` (U+10FFFF is 1114111).
const MAX_DECIMAL_DIGITS: usize = 7;
/// Longest significant digit run accepted in `&#xHHH;`.
const MAX_HEX_DIGITS: usize = 6;

/// Decode references in a span of XML text.
///
/// Returns Borrowed if no references are present.
pub fn decode(input: &str) -> Result<Cow<'_, str>, DecodeError> {
    let bytes = input.as_bytes();
    let Some(first_amp) = memchr(b'&', bytes) else {
        return Ok(Cow::Borrowed(input));
    };

    let mut result = String::with_capacity(input.len());
    let mut pos = 0;
    let mut amp = first_amp;

    loop {
        result.push_str(&input[pos..amp]);
        let (decoded, consumed) = decode_reference(&bytes[amp..]).map_err(|kind| DecodeError { kind, at: amp })?;
        result.push(decoded);
        pos = amp + consumed;

        match memchr(b'&', &bytes[pos..]) {
            Some(offset) => amp = pos + offset,
            None => break,
        }
    }

    result.push_str(&input[pos..]);
    Ok(Cow::Owned(result))
}

/// Decode one reference starting at `&`; returns the character and the
/// number of bytes consumed, including `&` and `;`.
fn decode_reference(input: &[u8]) -> Result<(char, usize), DecodeErrorKind> {
    debug_assert_eq!(input.first(), Some(&b'&'));
    let rest = &input[1..];

    for (name, ch) in [
        (&b"amp;"[..], '&'),
        (b"lt;", '<'),
        (b"gt;", '>'),
        (b"quot;", '"'),
        (b"apos;", '\''),
    ] {
        if rest.starts_with(name) {
            return Ok((ch, name.len() + 1));
        }
    }

    if rest.first() != Some(&b'#') {
        return Err(DecodeErrorKind::BareAmpersand);
    }

    let (is_hex, digits_at) = match rest.get(1) {
        Some(b'x') => (true, 2),
        _ => (false, 1),
    };
    let digits = &rest[digits_at..];
    let digit_count = digits
        .iter()
        .take_while(|b| if is_hex { b.is_ascii_hexdigit() } else { b.is_ascii_digit() })
        .count();

    if digit_count == 0 {
        return Err(DecodeErrorKind::MissingDigits);
    }
    if digits.get(digit_count) != Some(&b';') {
        return Err(DecodeErrorKind::Unterminated);
    }

    let zeros = digits[..digit_count].iter().take_while(|&&b| b == b'0').count();
    let significant = &digits[zeros..digit_count];
    let max_digits = if is_hex { MAX_HEX_DIGITS } else { MAX_DECIMAL_DIGITS };
    if significant.len() > max_digits {
        return Err(DecodeErrorKind::TooManyDigits);
    }

    let radix = if is_hex { 16 } else { 10 };
    let code_point = significant
        .iter()
        .fold(0u32, |acc, &b| acc * radix + (b as char).to_digit(radix).unwrap_or(0));

    let ch = char::from_u32(code_point)
        .filter(|_| is_valid_xml_char(code_point))
        .ok_or(DecodeErrorKind::InvalidCodePoint)?;

    // '&' + '#' + optional 'x' + digits + ';'
    Ok((ch, 1 + digits_at + digit_count + 1))
}

/// Check if a code point is a valid XML 1.0 Char
/// Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
#[inline]
pub fn is_valid_xml_char(codepoint: u32) -> bool {
    matches!(codepoint,
        0x9 | 0xA | 0xD |
        0x20..=0xD7FF |
        0xE000..=0xFFFD |
        0x10000..=0x10FFFF
    )
}

/// Apply the XML end-of-line rule: CRLF and lone CR become LF.
pub fn normalize_line_endings(input: &str) -> Cow<'_, str> {
    let bytes = input.as_bytes();
    let Some(first_cr) = memchr(b'\r', bytes) else {
        return Cow::Borrowed(input);
    };

    let mut result = String::with_capacity(input.len());
    let mut pos = 0;
    let mut cr = first_cr;

    loop {
        result.push_str(&input[pos..cr]);
        result.push('\n');
        pos = cr + 1;
        if bytes.get(pos) == Some(&b'\n') {
            pos += 1;
        }

        match memchr(b'\r', &bytes[pos..]) {
            Some(offset) => cr = pos + offset,
            None => break,
        }
    }

    result.push_str(&input[pos..]);
    Cow::Owned(result)
}

/// Normalize line endings, then decode.
///
/// Line endings are normalized first so that `&#13;` survives as a literal
/// carriage return. Error offsets refer to the normalized text.
pub fn decode_normalized(input: &str) -> Result<Cow<'_, str>, DecodeError> {
    match normalize_line_endings(input) {
        Cow::Borrowed(text) => decode(text),
        Cow::Owned(text) => decode(&text).map(|decoded| Cow::Owned(decoded.into_owned())),
    }
}

/// Escape text for use inside a double-quoted attribute value
pub fn encode_attribute(input: &str) -> Cow<'_, str> {
    // Fast path: check if any escaping needed
    if !input.bytes().any(|b| matches!(b, b'<' | b'>' | b'&' | b'"' | b'\'' | b'\r')) {
        return Cow::Borrowed(input);
    }

    let mut result = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            // A raw CR would be read back as LF
            '\r' => result.push_str("&#13;"),
            _ => result.push(c),
        }
    }
    Cow::Owned(result)
}

/// Escape text for use as character data
pub fn encode_text(input: &str) -> Cow<'_, str> {
    if memchr3(b'<', b'&', b'\r', input.as_bytes()).is_none() && !input.contains('>') {
        return Cow::Borrowed(input);
    }

    let mut result = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '\r' => result.push_str("&#13;"),
            _ => result.push(c),
        }
    }
    Cow::Owned(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    #[test]
    fn test_no_entities() {
        let result = decode("Hello, World!").unwrap();
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "Hello, World!");
    }

    #[test]
    fn test_basic_entities() {
        let result = decode("&lt;hello&gt; &amp; &quot;world&quot; &apos;").unwrap();
        assert_eq!(result, "<hello> & \"world\" '");
    }

    #[test]
    fn test_mixed_references() {
        assert_eq!(decode("&#65;&amp;&#x42;").unwrap(), "A&B");
    }

    #[rstest]
    #[case("&#65;&#66;&#67;", "ABC")]
    #[case("&#x41;&#x42;&#x43;", "ABC")]
    #[case("&#x1F600;", "😀")]
    #[case("&#0000065;", "A")]
    #[case("&#xFFFD;", "\u{FFFD}")]
    #[case("&#65533;", "\u{FFFD}")]
    #[case("a&#10;b", "a\nb")]
    fn test_numeric(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(decode(input).unwrap(), expected);
    }

    #[rstest]
    #[case("a & b", DecodeErrorKind::BareAmpersand, 2)]
    #[case("&unknown;", DecodeErrorKind::BareAmpersand, 0)]
    #[case("&amp", DecodeErrorKind::BareAmpersand, 0)]
    #[case("x&#;", DecodeErrorKind::MissingDigits, 1)]
    #[case("&#x;", DecodeErrorKind::MissingDigits, 0)]
    #[case("&#65", DecodeErrorKind::Unterminated, 0)]
    #[case("&#X41;", DecodeErrorKind::MissingDigits, 0)]
    #[case("&#12345678;", DecodeErrorKind::TooManyDigits, 0)]
    #[case("&#x1234567;", DecodeErrorKind::TooManyDigits, 0)]
    #[case("&#xD800;", DecodeErrorKind::InvalidCodePoint, 0)]
    #[case("&#x110000;", DecodeErrorKind::InvalidCodePoint, 0)]
    #[case("&#0;", DecodeErrorKind::InvalidCodePoint, 0)]
    #[case("&#xFFFE;", DecodeErrorKind::InvalidCodePoint, 0)]
    fn test_invalid_references(#[case] input: &str, #[case] kind: DecodeErrorKind, #[case] at: usize) {
        assert_eq!(decode(input), Err(DecodeError { kind, at }));
    }

    #[test]
    fn test_error_fails_whole_decode() {
        let err = decode("&amp;&amp;&bogus;").unwrap_err();
        assert_eq!(err.at, 10);
    }

    #[test]
    fn test_normalize_line_endings() {
        assert!(matches!(normalize_line_endings("a\nb"), Cow::Borrowed(_)));
        assert_eq!(normalize_line_endings("a\r\nb\rc\r\r\n"), "a\nb\nc\n\n");
    }

    #[test]
    fn test_decode_normalized() {
        assert_eq!(decode_normalized("a\r\n&amp;&#13;").unwrap(), "a\n&\r");
    }

    #[test]
    fn test_encode_attribute() {
        assert_eq!(encode_attribute("two&three"), "two&amp;three");
        assert_eq!(encode_attribute("<\"'>"), "&lt;&quot;&apos;&gt;");
        assert!(matches!(encode_attribute("plain"), Cow::Borrowed(_)));
        assert_eq!(encode_attribute("a\r\nb"), "a&#13;\nb");
    }

    #[test]
    fn test_encode_text() {
        assert_eq!(encode_text("a < b & c > d \"q\""), "a &lt; b &amp; c &gt; d \"q\"");
        assert_eq!(encode_text("a\r\nb\r"), "a&#13;\nb&#13;");
    }

    #[test]
    fn test_encoded_carriage_return_survives_normalization() {
        assert_eq!(decode_normalized(&encode_attribute("a\rb\r\n")).unwrap(), "a\rb\r\n");
        assert_eq!(decode_normalized(&encode_text("a\r\nb")).unwrap(), "a\r\nb");
    }

    #[quickcheck]
    fn prop_encoded_attribute_decodes_to_itself(value: String) -> bool {
        let value: String = value.chars().filter(|&c| is_valid_xml_char(c as u32)).collect();
        decode(&encode_attribute(&value)).map(|d| d == value).unwrap_or(false)
    }
}
