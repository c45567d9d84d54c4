//! Document Processor
//!
//! Layers XML's document grammar over the tag scanner: an optional prolog,
//! exactly one root element, then a trailer of comments, PIs and
//! whitespace. Keeps the stack of open elements so tags can be located by
//! breadcrumbs.
//!
//! Violations are graded by [`Concern`]. Those at or above the configured
//! threshold stop processing for good; milder ones are logged and skipped.

pub mod query;

pub use query::{breadcrumbs_match, QueryCache, TagQuery};

use crate::core::attributes::AttributeValue;
use crate::core::scanner::is_whitespace;
use crate::core::tokenizer::{TagScanner, TokenType};
use crate::error::{BookmarkError, Concern, DecodeError, MalformedInput, ParseError};
use crate::options::ProcessorOptions;
use log::warn;
use std::borrow::Cow;
use std::collections::HashMap;

/// Where in the document grammar the processor is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Before the root element
    Prolog,
    /// Inside the root element
    Element,
    /// After the root element closed
    Misc,
}

/// Processor state paired with a scanner bookmark
#[derive(Debug, Clone)]
struct Snapshot {
    stack: Vec<String>,
    context: Context,
    pending_pop: bool,
}

/// XML document processor
pub struct DocumentProcessor {
    scanner: TagScanner,
    options: ProcessorOptions,
    stack: Vec<String>,
    context: Context,
    /// The current token is a closer or self-closing tag; pop when moving on
    pending_pop: bool,
    last_error: Option<MalformedInput>,
    snapshots: HashMap<String, Snapshot>,
}

impl DocumentProcessor {
    pub fn new(xml: impl Into<String>) -> Self {
        Self::with_options(xml, ProcessorOptions::default())
    }

    pub fn with_options(xml: impl Into<String>, options: ProcessorOptions) -> Self {
        Self::wrap(TagScanner::with_options(xml, options.scanner), options)
    }

    pub fn for_streaming(chunk: impl Into<String>) -> Self {
        Self::for_streaming_with_options(chunk, ProcessorOptions::default())
    }

    pub fn for_streaming_with_options(chunk: impl Into<String>, options: ProcessorOptions) -> Self {
        Self::wrap(TagScanner::for_streaming_with_options(chunk, options.scanner), options)
    }

    fn wrap(scanner: TagScanner, options: ProcessorOptions) -> Self {
        DocumentProcessor {
            scanner,
            options,
            stack: Vec::new(),
            context: Context::Prolog,
            pending_pop: false,
            last_error: None,
            snapshots: HashMap::new(),
        }
    }

    /// Read access to the underlying scanner
    pub fn scanner(&self) -> &TagScanner {
        &self.scanner
    }

    pub fn context(&self) -> Context {
        self.context
    }

    /// Names of the open elements, outermost first. On a closer the closed
    /// element is still included.
    pub fn get_breadcrumbs(&self) -> &[String] {
        &self.stack
    }

    pub fn get_current_depth(&self) -> usize {
        self.stack.len()
    }

    /// True if the current token is a tag whose breadcrumbs end with the
    /// given names (`*` matches any name)
    pub fn matches_breadcrumbs<S: AsRef<str>>(&self, breadcrumbs: &[S]) -> bool {
        self.scanner.get_token_type() == Some(TokenType::Tag) && breadcrumbs_match(breadcrumbs, &self.stack)
    }

    pub fn get_last_error(&self) -> Option<&MalformedInput> {
        self.last_error.as_ref().or_else(|| self.scanner.get_last_error())
    }

    /// Move to the next token and check it against the document grammar.
    ///
    /// `Ok(None)` once the root element and trailer are complete. If input
    /// ends earlier the result is [`ParseError::Incomplete`].
    pub fn step(&mut self) -> Result<Option<TokenType>, ParseError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone().into());
        }

        if self.pending_pop {
            self.pending_pop = false;
            self.stack.pop();
            if self.stack.is_empty() && self.context == Context::Element {
                self.context = Context::Misc;
            }
        }

        let token_type = match self.scanner.advance() {
            Ok(Some(token_type)) => token_type,
            Ok(None) if self.context == Context::Misc => return Ok(None),
            Ok(None) => {
                let at = self.scanner.bytes_already_parsed();
                return Err(ParseError::Incomplete { at });
            }
            Err(ParseError::Malformed(err)) => {
                self.last_error = Some(err.clone());
                return Err(err.into());
            }
            Err(err) => return Err(err),
        };

        match token_type {
            TokenType::Tag => self.process_tag()?,
            TokenType::Text => self.process_text()?,
            TokenType::CData if self.context != Context::Element => {
                self.violation(Concern::Structural, "CDATA is only allowed inside the root element")?;
            }
            TokenType::CData
            | TokenType::Comment
            | TokenType::ProcessingInstruction
            | TokenType::XmlDeclaration => {}
        }

        Ok(Some(token_type))
    }

    pub fn next_token(&mut self) -> bool {
        matches!(self.step(), Ok(Some(_)))
    }

    /// Move to the next tag opener, optionally with a given name
    pub fn next_tag(&mut self, name: Option<&str>) -> Result<bool, ParseError> {
        let query = match name {
            Some(name) => TagQuery::tag(name),
            None => TagQuery::any(),
        };
        self.next_matching_tag(&query)
    }

    /// Move to the next tag matching the query.
    ///
    /// `Ok(false)` when the document ends without a match.
    pub fn next_matching_tag(&mut self, query: &TagQuery) -> Result<bool, ParseError> {
        let mut seen = 0;
        loop {
            match self.step()? {
                Some(TokenType::Tag) => {}
                Some(_) => continue,
                None => return Ok(false),
            }

            if self.scanner.is_closing_tag() && !query.visit_closers {
                continue;
            }
            if query.matches(&self.stack) {
                seen += 1;
                if seen >= query.match_offset {
                    return Ok(true);
                }
            }
        }
    }

    fn process_tag(&mut self) -> Result<(), ParseError> {
        let name = self.scanner.get_tag_name().unwrap_or_default().to_owned();

        if self.scanner.is_closing_tag() {
            return match self.stack.last() {
                Some(open) if *open == name => {
                    self.pending_pop = true;
                    Ok(())
                }
                Some(open) => {
                    let message = format!("mismatched closer: expected </{open}>, found </{name}>");
                    self.violation(Concern::Catastrophic, message)
                }
                None => self.violation(Concern::Catastrophic, format!("closer </{name}> has no opener")),
            };
        }

        match self.context {
            Context::Prolog => self.context = Context::Element,
            Context::Element => {}
            Context::Misc => {
                self.violation(Concern::Structural, "a document may only have one root element")?;
                self.context = Context::Element;
            }
        }

        if let Some((attr, at)) = self.scanner.first_boolean_attribute() {
            let message = format!("attribute '{attr}' has no value");
            self.violation_at(Concern::Recoverable, message, at)?;
        }

        self.stack.push(name);
        self.pending_pop = self.scanner.is_self_closing();
        Ok(())
    }

    fn process_text(&mut self) -> Result<(), ParseError> {
        if self.context == Context::Element {
            return Ok(());
        }
        if self.scanner.raw_text().bytes().all(is_whitespace) {
            return Ok(());
        }
        self.violation(Concern::Structural, "text is only allowed inside the root element")
    }

    fn token_start(&self) -> usize {
        self.scanner.token_span().map_or(0, |span| span.start)
    }

    fn violation(&mut self, concern: Concern, message: impl Into<Cow<'static, str>>) -> Result<(), ParseError> {
        let at = self.token_start();
        self.violation_at(concern, message, at)
    }

    /// Report a grammar violation: sticky at or above the threshold, a
    /// warning below it.
    fn violation_at(
        &mut self,
        concern: Concern,
        message: impl Into<Cow<'static, str>>,
        at: usize,
    ) -> Result<(), ParseError> {
        let err = MalformedInput::violation(concern, message, at);
        if concern < self.options.concern_threshold {
            warn!("{err}");
            return Ok(());
        }

        self.scanner.fail(err.clone());
        self.last_error = Some(err.clone());
        Err(err.into())
    }

    // ========================================================================
    // Bookmarks
    // ========================================================================

    fn internal_bookmark(name: &str) -> String {
        format!("_{name}")
    }

    pub fn set_bookmark(&mut self, name: &str) -> Result<(), BookmarkError> {
        self.scanner.set_bookmark(&Self::internal_bookmark(name))?;
        let snapshot = Snapshot {
            stack: self.stack.clone(),
            context: self.context,
            pending_pop: self.pending_pop,
        };
        self.snapshots.insert(name.to_owned(), snapshot);
        Ok(())
    }

    pub fn seek(&mut self, name: &str) -> Result<(), BookmarkError> {
        let internal = Self::internal_bookmark(name);
        let Some(snapshot) = self.snapshots.get(name).cloned() else {
            return Err(BookmarkError::UnknownBookmark(name.to_owned()));
        };

        if let Err(err) = self.scanner.seek(&internal) {
            if !self.scanner.has_bookmark(&internal) {
                self.snapshots.remove(name);
            }
            return Err(err);
        }

        self.stack = snapshot.stack;
        self.context = snapshot.context;
        self.pending_pop = snapshot.pending_pop;
        Ok(())
    }

    pub fn release_bookmark(&mut self, name: &str) -> bool {
        self.snapshots.remove(name);
        self.scanner.release_bookmark(&Self::internal_bookmark(name))
    }

    pub fn has_bookmark(&self, name: &str) -> bool {
        self.snapshots.contains_key(name) && self.scanner.has_bookmark(&Self::internal_bookmark(name))
    }

    // ========================================================================
    // Forwarded scanner operations
    // ========================================================================

    pub fn get_token_type(&self) -> Option<TokenType> {
        self.scanner.get_token_type()
    }

    pub fn get_token_name(&self) -> Option<&str> {
        self.scanner.get_token_name()
    }

    pub fn get_tag_name(&self) -> Option<&str> {
        self.scanner.get_tag_name()
    }

    pub fn is_closing_tag(&self) -> bool {
        self.scanner.is_closing_tag()
    }

    pub fn is_self_closing(&self) -> bool {
        self.scanner.is_self_closing()
    }

    pub fn get_attribute(&self, name: &str) -> Result<AttributeValue<'_>, DecodeError> {
        self.scanner.get_attribute(name)
    }

    pub fn get_attribute_names_with_prefix(&self, prefix: &str) -> Option<Vec<&str>> {
        self.scanner.get_attribute_names_with_prefix(prefix)
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) -> bool {
        self.scanner.set_attribute(name, value)
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.scanner.remove_attribute(name)
    }

    pub fn get_modifiable_text(&self) -> Result<Cow<'_, str>, DecodeError> {
        self.scanner.get_modifiable_text()
    }

    pub fn set_modifiable_text(&mut self, text: &str) -> bool {
        self.scanner.set_modifiable_text(text)
    }

    pub fn get_updated_text(&mut self) -> &str {
        self.scanner.get_updated_text()
    }

    pub fn declare_opaque_element(&mut self, name: &str) -> bool {
        self.scanner.declare_opaque_element(name)
    }

    pub fn append_bytes(&mut self, chunk: &str) -> bool {
        self.scanner.append_bytes(chunk)
    }

    pub fn input_finished(&mut self) {
        self.scanner.input_finished()
    }

    pub fn is_expecting_more_input(&self) -> bool {
        self.scanner.is_expecting_more_input()
    }

    pub fn paused_at_incomplete_token(&self) -> bool {
        self.scanner.paused_at_incomplete_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn run_to_end(processor: &mut DocumentProcessor) -> Result<(), ParseError> {
        while processor.step()?.is_some() {}
        Ok(())
    }

    fn with_threshold(xml: &str, concern_threshold: Concern) -> DocumentProcessor {
        let options = ProcessorOptions { concern_threshold, ..Default::default() };
        DocumentProcessor::with_options(xml, options)
    }

    #[test]
    fn test_find_and_rewrite_attribute() {
        let mut processor = DocumentProcessor::new("<root><a x=\"1\">text</a></root>");
        assert!(processor.next_matching_tag(&TagQuery::path(["root", "a"])).unwrap());
        assert_eq!(processor.get_attribute("x").unwrap().as_str(), Some("1"));

        assert!(processor.set_attribute("x", "two&three"));
        assert_eq!(
            processor.get_updated_text(),
            "<root><a x=\"two&amp;three\">text</a></root>"
        );
        run_to_end(&mut processor).unwrap();
    }

    #[test]
    fn test_mismatched_closer() {
        let mut processor = DocumentProcessor::new("<r><a></b></r>");
        assert!(processor.next_token());
        assert!(processor.next_token());

        let err = processor.step().unwrap_err();
        let malformed = err.malformed().unwrap();
        assert_eq!(malformed.kind, ErrorKind::Syntax);
        assert_eq!(malformed.concern, Concern::Catastrophic);
        assert_eq!(malformed.at, 6);

        assert!(!processor.next_token());
        assert!(processor.get_last_error().is_some());
        assert!(processor.scanner().get_last_error().is_some());
    }

    #[test]
    fn test_closer_without_opener() {
        let err = run_to_end(&mut DocumentProcessor::new("<r/></r>")).unwrap_err();
        assert_eq!(err.malformed().map(|e| e.concern), Some(Concern::Catastrophic));
    }

    #[rstest]
    #[case("<r/>")]
    #[case("<?xml version=\"1.0\"?>\n<!-- c --><?pi x?>\n<r><a b=\"1\"><c/>t<![CDATA[x]]></a></r>\n<!-- trailer -->\n")]
    #[case("<r><r><r/></r></r>")]
    fn test_grammar_stack_invariant(#[case] xml: &str) {
        let mut processor = DocumentProcessor::new(xml);
        run_to_end(&mut processor).unwrap();
        assert!(processor.get_breadcrumbs().is_empty());
        assert_eq!(processor.context(), Context::Misc);
        assert_eq!(processor.get_updated_text(), xml);
    }

    #[test]
    fn test_breadcrumbs_include_closed_element() {
        let mut processor = DocumentProcessor::new("<r><a><b/></a></r>");
        assert!(processor.next_tag(Some("b")).unwrap());
        assert_eq!(processor.get_breadcrumbs(), ["r", "a", "b"]);
        assert_eq!(processor.get_current_depth(), 3);
        assert!(processor.matches_breadcrumbs(&["a", "*"]));
        assert!(!processor.matches_breadcrumbs(&["r", "b"]));

        assert!(processor.next_token());
        assert!(processor.is_closing_tag());
        assert_eq!(processor.get_breadcrumbs(), ["r", "a"]);

        assert!(processor.next_token());
        assert_eq!(processor.get_breadcrumbs(), ["r"]);
        assert_eq!(processor.context(), Context::Element);
        assert_eq!(processor.step().unwrap(), None);
        assert_eq!(processor.context(), Context::Misc);
    }

    #[test]
    fn test_match_offset_and_closers() {
        let xml = "<r><i n=\"1\"/><i n=\"2\"><i n=\"3\"/></i></r>";

        let mut processor = DocumentProcessor::new(xml);
        let second = TagQuery::parse("r/i").unwrap().nth(2).unwrap();
        assert!(processor.next_matching_tag(&second).unwrap());
        assert_eq!(processor.get_attribute("n").unwrap().as_str(), Some("2"));
        assert!(!processor.next_matching_tag(&second).unwrap());

        let mut processor = DocumentProcessor::new(xml);
        let closers = TagQuery::parse("r/i").unwrap().with_closers();
        assert!(processor.next_matching_tag(&closers).unwrap());
        assert!(processor.is_self_closing());
        assert!(processor.next_matching_tag(&closers).unwrap());
        assert_eq!(processor.get_attribute("n").unwrap().as_str(), Some("2"));
        assert!(processor.next_matching_tag(&closers).unwrap());
        assert!(processor.is_closing_tag());
        assert_eq!(processor.get_breadcrumbs(), ["r", "i"]);
    }

    #[rstest]
    #[case("")]
    #[case("<?xml version=\"1.0\"?><!-- only a prolog -->")]
    #[case("<r><a>")]
    fn test_early_end_is_incomplete(#[case] xml: &str) {
        let err = run_to_end(&mut DocumentProcessor::new(xml)).unwrap_err();
        assert!(err.is_incomplete(), "{err:?}");
    }

    #[rstest]
    #[case("x<r/>", Concern::Structural)]
    #[case("<r/>x", Concern::Structural)]
    #[case("<![CDATA[x]]><r/>", Concern::Structural)]
    #[case("<r/><s/>", Concern::Structural)]
    #[case("<r a/>", Concern::Recoverable)]
    fn test_violation_concerns(#[case] xml: &str, #[case] concern: Concern) {
        let err = run_to_end(&mut DocumentProcessor::new(xml)).unwrap_err();
        assert_eq!(err.malformed().map(|e| e.concern), Some(concern));

        let mut lenient = DocumentProcessor::with_options(xml, ProcessorOptions::lenient());
        run_to_end(&mut lenient).unwrap();
        assert!(lenient.get_last_error().is_none());
    }

    #[test]
    fn test_threshold_between_concerns() {
        let mut processor = with_threshold("<r a>t</r>", Concern::Structural);
        run_to_end(&mut processor).unwrap();

        let mut processor = with_threshold("<r/>t", Concern::Structural);
        assert!(run_to_end(&mut processor).is_err());
    }

    #[test]
    fn test_whitespace_outside_root() {
        let mut processor = DocumentProcessor::new(" \n<r/>\r\n\t");
        run_to_end(&mut processor).unwrap();
    }

    #[test]
    fn test_bookmark_restores_stack() {
        let mut processor = DocumentProcessor::new("<r><a><b/></a><c/></r>");
        assert!(processor.next_tag(Some("b")).unwrap());
        processor.set_bookmark("b").unwrap();
        assert!(processor.has_bookmark("b"));

        assert!(processor.next_tag(Some("c")).unwrap());
        assert_eq!(processor.get_breadcrumbs(), ["r", "c"]);

        processor.seek("b").unwrap();
        assert_eq!(processor.get_tag_name(), Some("b"));
        assert_eq!(processor.get_breadcrumbs(), ["r", "a", "b"]);

        assert!(processor.next_tag(None).unwrap());
        assert_eq!(processor.get_tag_name(), Some("c"));
        assert_eq!(processor.get_breadcrumbs(), ["r", "c"]);

        assert!(processor.release_bookmark("b"));
        assert_eq!(processor.seek("b"), Err(BookmarkError::UnknownBookmark("b".into())));
    }

    #[test]
    fn test_streaming_document() {
        let mut processor = DocumentProcessor::for_streaming("<r><a>");
        assert!(processor.next_tag(Some("a")).unwrap());
        assert!(processor.next_tag(None).unwrap_err().is_incomplete());
        assert!(processor.paused_at_incomplete_token());

        assert!(processor.append_bytes("</a><b/></r>"));
        assert!(processor.next_tag(None).unwrap());
        assert_eq!(processor.get_tag_name(), Some("b"));
        assert!(processor.next_token());
        assert!(processor.is_closing_tag());
        assert!(processor.step().unwrap_err().is_incomplete());

        processor.input_finished();
        run_to_end(&mut processor).unwrap();
        assert_eq!(processor.context(), Context::Misc);
    }

    #[test]
    fn test_opaque_content_has_no_tags() {
        let mut processor = DocumentProcessor::new("<r><code><b>not a tag</code><b/></r>");
        assert!(processor.declare_opaque_element("code"));
        assert!(processor.next_tag(Some("b")).unwrap());
        assert_eq!(processor.get_breadcrumbs(), ["r", "b"]);
    }

    #[test]
    fn test_edit_text_through_processor() {
        let mut processor = DocumentProcessor::new("<r><a>old</a></r>");
        processor.next_tag(Some("a")).unwrap();
        processor.step().unwrap();
        assert_eq!(processor.get_token_name(), Some("#text"));
        assert!(processor.set_modifiable_text("new & improved"));
        run_to_end(&mut processor).unwrap();
        assert_eq!(processor.get_updated_text(), "<r><a>new &amp; improved</a></r>");
    }
}
