//! Span - offset and length into the document text
//!
//! Tokens, attributes and bookmarks all refer to the document through spans
//! instead of owning copies of the text.

/// A byte range in the document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset of the first byte
    pub start: usize,
    /// Length in bytes
    pub length: usize,
}

impl Span {
    #[inline]
    pub const fn new(start: usize, length: usize) -> Self {
        Self { start, length }
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Offset one past the last byte
    #[inline]
    pub const fn end(&self) -> usize {
        self.start + self.length
    }

    /// Extract the text covered by this span.
    ///
    /// Returns an empty string if the span does not fit the input or does not
    /// fall on character boundaries.
    #[inline]
    pub fn slice<'a>(&self, input: &'a str) -> &'a str {
        input.get(self.start..self.end()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_basic() {
        let span = Span::new(5, 10);
        assert_eq!(span.start, 5);
        assert_eq!(span.length, 10);
        assert_eq!(span.end(), 15);
        assert!(!span.is_empty());
        assert!(Span::default().is_empty());
    }

    #[test]
    fn test_span_slice() {
        let input = "hello world";
        assert_eq!(Span::new(6, 5).slice(input), "world");
        assert_eq!(Span::new(6, 50).slice(input), "");
    }

    #[test]
    fn test_span_slice_respects_char_boundaries() {
        let input = "né";
        assert_eq!(Span::new(1, 1).slice(input), "");
        assert_eq!(Span::new(1, 2).slice(input), "é");
    }
}
