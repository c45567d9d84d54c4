//! XML Encoding Detection and the XML declaration
//!
//! Only UTF-8 documents are processed. Raw bytes arriving from the host are
//! checked here before they reach the scanner, and the scanner calls back in
//! to validate the pseudo-attributes of `<?xml ...?>`.

use super::scanner::{find_byte, is_whitespace, whitespace_len};
use crate::error::MalformedInput;

/// Detect the encoding of XML input based on BOM or byte patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl XmlEncoding {
    /// Detect encoding from byte order mark or initial bytes
    pub fn detect(input: &[u8]) -> Self {
        if input.len() < 2 {
            return XmlEncoding::Utf8;
        }

        match (input[0], input[1]) {
            (0xFF, 0xFE) => XmlEncoding::Utf16Le,
            (0xFE, 0xFF) => XmlEncoding::Utf16Be,
            // No BOM - '<' next to a null byte
            (0x00, b'<') => XmlEncoding::Utf16Be,
            (b'<', 0x00) => XmlEncoding::Utf16Le,
            _ => XmlEncoding::Utf8,
        }
    }
}

/// Accept host bytes as document text.
///
/// UTF-16 input is unsupported; anything else must be valid UTF-8. A UTF-8
/// byte order mark is kept, the scanner steps over it.
pub fn utf8_input(input: &[u8]) -> Result<&str, MalformedInput> {
    match XmlEncoding::detect(input) {
        XmlEncoding::Utf8 => std::str::from_utf8(input)
            .map_err(|e| MalformedInput::syntax("input is not valid UTF-8", e.valid_up_to())),
        XmlEncoding::Utf16Le | XmlEncoding::Utf16Be => {
            Err(MalformedInput::unsupported("UTF-16 documents are not supported", 0))
        }
    }
}

/// Accept a streamed chunk. Encoding was settled by the first chunk.
pub fn utf8_chunk(chunk: &[u8]) -> Result<&str, MalformedInput> {
    std::str::from_utf8(chunk)
        .map_err(|e| MalformedInput::syntax("chunk is not valid UTF-8", e.valid_up_to()))
}

/// Pseudo-attributes of the XML declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XmlDeclaration<'a> {
    pub version: &'a str,
    pub encoding: Option<&'a str>,
    pub standalone: Option<&'a str>,
}

/// Parse and check the content of `<?xml ...?>` (everything between the
/// `xml` target and `?>`). `base` is the document offset of `content`.
pub fn parse_xml_declaration(content: &str, base: usize) -> Result<XmlDeclaration<'_>, MalformedInput> {
    let mut pseudo = PseudoAttributes { content, at: 0, base };

    let version = match pseudo.next()? {
        Some(("version", value)) => value,
        _ => return Err(MalformedInput::syntax("XML declaration must have version attribute", base)),
    };
    let version_ok = version.len() > 2
        && version.starts_with("1.")
        && version.bytes().skip(2).all(|b| b.is_ascii_digit());
    if !version_ok {
        return Err(MalformedInput::syntax("XML declaration version must be '1.' followed by digits", base));
    }

    let mut declaration = XmlDeclaration { version, encoding: None, standalone: None };
    let mut next = pseudo.next()?;

    if let Some(("encoding", value)) = next {
        if !is_enc_name(value) {
            return Err(MalformedInput::syntax("invalid encoding name in XML declaration", base));
        }
        declaration.encoding = Some(value);
        next = pseudo.next()?;
    }

    if let Some(("standalone", value)) = next {
        if value != "yes" && value != "no" {
            return Err(MalformedInput::syntax("standalone must be 'yes' or 'no'", base));
        }
        declaration.standalone = Some(value);
        next = pseudo.next()?;
    }

    if next.is_some() {
        return Err(MalformedInput::syntax("unexpected pseudo-attribute in XML declaration", base));
    }

    if version != "1.0" {
        return Err(MalformedInput::unsupported("only XML version 1.0 is supported", base));
    }
    if declaration.encoding.is_some_and(|enc| !enc.eq_ignore_ascii_case("UTF-8")) {
        return Err(MalformedInput::unsupported("only UTF-8 documents are supported", base));
    }
    if declaration.standalone == Some("no") {
        return Err(MalformedInput::unsupported("documents with external markup declarations are not supported", base));
    }

    Ok(declaration)
}

/// Validate encoding name: EncName ::= [A-Za-z] ([A-Za-z0-9._] | '-')*
fn is_enc_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes.next().is_some_and(|b| b.is_ascii_alphabetic())
        && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

struct PseudoAttributes<'a> {
    content: &'a str,
    at: usize,
    base: usize,
}

impl<'a> PseudoAttributes<'a> {
    fn error(&self, message: &'static str) -> MalformedInput {
        MalformedInput::syntax(message, self.base + self.at)
    }

    /// Next `name="value"` pair, each preceded by whitespace
    fn next(&mut self) -> Result<Option<(&'a str, &'a str)>, MalformedInput> {
        let bytes = self.content.as_bytes();
        let ws = whitespace_len(bytes, self.at);
        self.at += ws;
        if self.at >= bytes.len() {
            return Ok(None);
        }
        if ws == 0 {
            return Err(self.error("whitespace required between XML declaration attributes"));
        }

        let name_at = self.at;
        while self.at < bytes.len() && bytes[self.at].is_ascii_lowercase() {
            self.at += 1;
        }
        let name = &self.content[name_at..self.at];
        if name.is_empty() {
            return Err(self.error("invalid XML declaration attribute"));
        }

        self.at += whitespace_len(bytes, self.at);
        if bytes.get(self.at) != Some(&b'=') {
            return Err(self.error("XML declaration attribute must have '='"));
        }
        self.at += 1;
        self.at += whitespace_len(bytes, self.at);

        let quote = match bytes.get(self.at) {
            Some(&q @ (b'"' | b'\'')) => q,
            _ => return Err(self.error("XML declaration value must be quoted")),
        };
        let value_at = self.at + 1;
        let Some(close) = find_byte(bytes, quote, value_at) else {
            return Err(self.error("XML declaration value not properly terminated"));
        };
        self.at = close + 1;
        if bytes.get(self.at).is_some_and(|&b| !is_whitespace(b)) {
            return Err(self.error("whitespace required between XML declaration attributes"));
        }

        Ok(Some((name, &self.content[value_at..close])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[test]
    fn test_detect_utf8() {
        assert_eq!(XmlEncoding::detect(b"<root/>"), XmlEncoding::Utf8);
        assert_eq!(XmlEncoding::detect(&[0xEF, 0xBB, 0xBF, b'<']), XmlEncoding::Utf8);
    }

    #[test]
    fn test_detect_utf16() {
        assert_eq!(XmlEncoding::detect(&[0xFF, 0xFE, b'<', 0x00]), XmlEncoding::Utf16Le);
        assert_eq!(XmlEncoding::detect(&[0xFE, 0xFF, 0x00, b'<']), XmlEncoding::Utf16Be);
        assert_eq!(XmlEncoding::detect(&[b'<', 0x00, b'r', 0x00]), XmlEncoding::Utf16Le);
    }

    #[test]
    fn test_utf8_input() {
        assert_eq!(utf8_input(b"<r/>").unwrap(), "<r/>");
        assert_eq!(utf8_input(b"\xEF\xBB\xBF<r/>").unwrap(), "\u{FEFF}<r/>");

        let err = utf8_input(&[0xFF, 0xFE, b'<', 0x00]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unsupported);

        let err = utf8_input(b"<r>\xC3</r>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.at, 3);
    }

    #[test]
    fn test_utf8_chunk() {
        assert_eq!(utf8_chunk(b"<a>\x00").unwrap(), "<a>\0");

        let err = utf8_chunk(b"text \xE2\x82 more").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.at, 5);
    }

    #[test]
    fn test_full_declaration() {
        let decl = parse_xml_declaration(" version=\"1.0\" encoding='utf-8' standalone=\"yes\"", 0).unwrap();
        assert_eq!(decl.version, "1.0");
        assert_eq!(decl.encoding, Some("utf-8"));
        assert_eq!(decl.standalone, Some("yes"));
    }

    #[rstest]
    #[case(" version=\"1.0\"")]
    #[case(" version = '1.0' ")]
    #[case(" version=\"1.0\" standalone=\"yes\"")]
    fn test_accepted(#[case] content: &str) {
        assert!(parse_xml_declaration(content, 0).is_ok());
    }

    #[rstest]
    #[case("", ErrorKind::Syntax)]
    #[case(" encoding=\"UTF-8\"", ErrorKind::Syntax)]
    #[case(" version=\"1.0\"encoding=\"UTF-8\"", ErrorKind::Syntax)]
    #[case(" version=1.0", ErrorKind::Syntax)]
    #[case(" version=\"2.0\"", ErrorKind::Syntax)]
    #[case(" version=\"1.0\" standalone=\"maybe\"", ErrorKind::Syntax)]
    #[case(" version=\"1.0\" standalone=\"yes\" encoding=\"UTF-8\"", ErrorKind::Syntax)]
    #[case(" version=\"1.1\"", ErrorKind::Unsupported)]
    #[case(" version=\"1.0\" encoding=\"ISO-8859-1\"", ErrorKind::Unsupported)]
    #[case(" version=\"1.0\" standalone=\"no\"", ErrorKind::Unsupported)]
    fn test_rejected(#[case] content: &str, #[case] kind: ErrorKind) {
        assert_eq!(parse_xml_declaration(content, 5).unwrap_err().kind, kind);
    }
}
