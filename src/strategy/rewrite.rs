//! Single-pass rewrite
//!
//! Walks a document once, editing every tag a query matches, and returns
//! the rewritten text.

use crate::error::ParseError;
use crate::options::ProcessorOptions;
use crate::processor::{DocumentProcessor, TagQuery};

/// What to do to each matched tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeEdit<'a> {
    Set(&'a str, &'a str),
    Remove(&'a str),
}

/// Apply `edit` to every tag matching `query`.
///
/// Returns the rewritten document and the number of tags edited.
pub fn rewrite_attribute(
    xml: &str,
    query: &TagQuery,
    edit: AttributeEdit<'_>,
    options: ProcessorOptions,
) -> Result<(String, usize), ParseError> {
    let mut processor = DocumentProcessor::with_options(xml, options);
    let query = TagQuery { match_offset: 1, visit_closers: false, ..query.clone() };
    let mut edited = 0;

    while processor.next_matching_tag(&query)? {
        let changed = match edit {
            AttributeEdit::Set(name, value) => processor.set_attribute(name, value),
            AttributeEdit::Remove(name) => processor.remove_attribute(name),
        };
        if changed {
            edited += 1;
        }
    }

    Ok((processor.get_updated_text().to_owned(), edited))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_set_on_every_match() {
        let xml = "<r><a/><b><a x=\"old\"/></b></r>";
        let (text, edited) = rewrite_attribute(
            xml,
            &TagQuery::tag("a"),
            AttributeEdit::Set("x", "new"),
            ProcessorOptions::default(),
        )
        .unwrap();
        assert_eq!(text, "<r><a x=\"new\"/><b><a x=\"new\"/></b></r>");
        assert_eq!(edited, 2);
    }

    #[test]
    fn test_remove_on_nested_match() {
        let xml = "<r><a x=\"1\"/><b><a x=\"2\"/></b></r>";
        let query = TagQuery::parse("b/a").unwrap();
        let (text, edited) =
            rewrite_attribute(xml, &query, AttributeEdit::Remove("x"), ProcessorOptions::default()).unwrap();
        assert_eq!(text, "<r><a x=\"1\"/><b><a/></b></r>");
        assert_eq!(edited, 1);
    }

    #[test]
    fn test_malformed_document() {
        let result = rewrite_attribute(
            "<r><a></r>",
            &TagQuery::tag("a"),
            AttributeEdit::Set("x", "1"),
            ProcessorOptions::default(),
        );
        assert!(result.unwrap_err().malformed().is_some());
    }
}
