//! XML Tag Scanner - State machine for XML token extraction
//!
//! Implements a pull-parser style scanner over a document it owns:
//! - Tag openers and closers, with lazily decoded attributes
//! - Text content
//! - CDATA sections
//! - Comments
//! - Processing instructions and the XML declaration
//!
//! Edits to attributes and text are queued as lexical updates and only
//! applied when the document is flushed. Bookmarks remember token spans and
//! follow them through flushes. In streaming mode a token cut off by the end
//! of the available input pauses the scanner instead of failing it.

use super::attributes::{scan_attribute, AttributeScan, AttributeToken, AttributeValue};
use super::encoding::parse_xml_declaration;
use super::entities::{decode_normalized, encode_attribute, encode_text, normalize_line_endings};
use super::scanner::{find_byte, find_seq, is_name, is_whitespace, name_len, starts_with_at, whitespace_len};
use super::span::Span;
use super::updates::{apply_updates, shift_offset, shift_span, sort_updates, LexicalUpdate};
use crate::error::{BookmarkError, DecodeError, MalformedInput, ParseError};
use crate::options::ScannerOptions;
use log::debug;
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

const BYTE_ORDER_MARK: &str = "\u{FEFF}";

/// Current scanner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    /// Between tokens
    Ready,
    /// All input consumed
    Complete,
    /// Stopped inside a token; waiting for more input
    IncompleteInput,
    /// On a tag opener or closer
    MatchedTag,
    /// On a text run
    TextNode,
    /// On a CDATA section: <![CDATA[...]]>
    CDataNode,
    /// On a processing instruction: <?target ...?>
    ProcessingInstruction,
    /// On the XML declaration: <?xml ...?>
    XmlDeclaration,
    /// On a comment: <!--...-->
    Comment,
}

impl ScannerState {
    /// Token type for states that sit on a token
    pub fn token_type(self) -> Option<TokenType> {
        match self {
            ScannerState::MatchedTag => Some(TokenType::Tag),
            ScannerState::TextNode => Some(TokenType::Text),
            ScannerState::CDataNode => Some(TokenType::CData),
            ScannerState::Comment => Some(TokenType::Comment),
            ScannerState::ProcessingInstruction => Some(TokenType::ProcessingInstruction),
            ScannerState::XmlDeclaration => Some(TokenType::XmlDeclaration),
            ScannerState::Ready | ScannerState::Complete | ScannerState::IncompleteInput => None,
        }
    }
}

/// Type of XML token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Tag,
    Text,
    CData,
    Comment,
    ProcessingInstruction,
    XmlDeclaration,
}

impl TokenType {
    fn state(self) -> ScannerState {
        match self {
            TokenType::Tag => ScannerState::MatchedTag,
            TokenType::Text => ScannerState::TextNode,
            TokenType::CData => ScannerState::CDataNode,
            TokenType::Comment => ScannerState::Comment,
            TokenType::ProcessingInstruction => ScannerState::ProcessingInstruction,
            TokenType::XmlDeclaration => ScannerState::XmlDeclaration,
        }
    }
}

/// What a queued token edit rewrites
#[derive(Debug, Clone, PartialEq, Eq)]
enum EditTarget {
    Attribute(String),
    ModifiableText,
}

/// Edit on the current token, keyed so a later edit of the same target
/// replaces it
#[derive(Debug, Clone)]
struct TokenEdit {
    target: EditTarget,
    update: LexicalUpdate,
    /// New value as the caller wrote it; `None` for removals
    value: Option<String>,
}

#[derive(Debug, Clone)]
struct Bookmark {
    span: Span,
    /// Set when the bookmarked token is the content of an opaque element
    opaque_closer: Option<String>,
}

/// XML tag scanner over an owned, editable document
pub struct TagScanner {
    xml: String,
    options: ScannerOptions,
    state: ScannerState,
    bytes_already_parsed: usize,
    expecting_more_input: bool,
    last_error: Option<MalformedInput>,

    // Current token
    token: Span,
    tag_name: Option<Span>,
    text: Option<Span>,
    is_closer: bool,
    is_self_closing: bool,
    attributes: Vec<AttributeToken>,
    opaque_of: Option<String>,

    token_edits: Vec<TokenEdit>,
    lexical_updates: Vec<LexicalUpdate>,
    bookmarks: HashMap<String, Bookmark>,
    seek_count: usize,

    opaque_elements: HashSet<String>,
    /// Name of the opaque element whose content comes next
    opaque_closer: Option<String>,
}

impl TagScanner {
    /// Create a scanner over a complete document
    pub fn new(xml: impl Into<String>) -> Self {
        Self::with_options(xml, ScannerOptions::default())
    }

    pub fn with_options(xml: impl Into<String>, options: ScannerOptions) -> Self {
        TagScanner {
            xml: xml.into(),
            options,
            state: ScannerState::Ready,
            bytes_already_parsed: 0,
            expecting_more_input: false,
            last_error: None,
            token: Span::default(),
            tag_name: None,
            text: None,
            is_closer: false,
            is_self_closing: false,
            attributes: Vec::new(),
            opaque_of: None,
            token_edits: Vec::new(),
            lexical_updates: Vec::new(),
            bookmarks: HashMap::new(),
            seek_count: 0,
            opaque_elements: HashSet::new(),
            opaque_closer: None,
        }
    }

    /// Create a scanner over the first chunk of a document that arrives in
    /// pieces. Call [`input_finished`](Self::input_finished) after the last
    /// chunk.
    pub fn for_streaming(chunk: impl Into<String>) -> Self {
        Self::for_streaming_with_options(chunk, ScannerOptions::default())
    }

    pub fn for_streaming_with_options(chunk: impl Into<String>, options: ScannerOptions) -> Self {
        let mut scanner = Self::with_options(chunk, options);
        scanner.expecting_more_input = true;
        scanner
    }

    pub fn state(&self) -> ScannerState {
        self.state
    }

    pub fn get_last_error(&self) -> Option<&MalformedInput> {
        self.last_error.as_ref()
    }

    pub fn is_expecting_more_input(&self) -> bool {
        self.expecting_more_input
    }

    pub fn paused_at_incomplete_token(&self) -> bool {
        self.state == ScannerState::IncompleteInput
    }

    /// Append the next chunk of a streamed document.
    ///
    /// Returns false once [`input_finished`](Self::input_finished) was called.
    pub fn append_bytes(&mut self, chunk: &str) -> bool {
        if !self.expecting_more_input {
            return false;
        }
        self.xml.push_str(chunk);
        if self.state == ScannerState::IncompleteInput {
            self.state = ScannerState::Ready;
        }
        true
    }

    /// No more chunks will arrive. A token still cut off becomes a syntax
    /// error on the next advance.
    pub fn input_finished(&mut self) {
        self.expecting_more_input = false;
        if self.state == ScannerState::IncompleteInput {
            self.state = ScannerState::Ready;
        }
    }

    /// Register an element whose content is returned as one raw text token
    pub fn declare_opaque_element(&mut self, name: &str) -> bool {
        if !is_name(name) {
            return false;
        }
        self.opaque_elements.insert(name.to_owned());
        true
    }

    /// Move to the next token
    pub fn next_token(&mut self) -> bool {
        matches!(self.advance(), Ok(Some(_)))
    }

    /// Move to the next token.
    ///
    /// `Ok(None)` at the end of a finished document. Syntax errors are sticky:
    /// once one is returned every later call returns it again.
    pub fn advance(&mut self) -> Result<Option<TokenType>, ParseError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone().into());
        }
        match self.state {
            ScannerState::Complete => return Ok(None),
            ScannerState::IncompleteInput => {
                return Err(ParseError::Incomplete { at: self.bytes_already_parsed });
            }
            _ => {}
        }

        self.after_token();
        self.scan_at_cursor()
    }

    /// Record a sticky failure; the first one wins
    pub(crate) fn fail(&mut self, err: MalformedInput) {
        if self.last_error.is_none() {
            self.last_error = Some(err);
        }
    }

    /// Retire the current token: hand its edits to the anonymous queue and
    /// flush if the queue must not wait any longer.
    fn after_token(&mut self) {
        self.lexical_updates
            .extend(self.token_edits.drain(..).map(|edit| edit.update));

        let cursor = self.bytes_already_parsed;
        if self.lexical_updates.len() > self.options.flush_threshold
            || self.lexical_updates.iter().any(|update| update.start >= cursor)
        {
            self.apply_lexical_updates();
        }

        self.clear_token();
        self.state = ScannerState::Ready;
    }

    fn clear_token(&mut self) {
        self.token = Span::default();
        self.tag_name = None;
        self.text = None;
        self.is_closer = false;
        self.is_self_closing = false;
        self.attributes.clear();
        self.opaque_of = None;
    }

    fn scan_at_cursor(&mut self) -> Result<Option<TokenType>, ParseError> {
        let document_start = if self.xml.starts_with(BYTE_ORDER_MARK) {
            BYTE_ORDER_MARK.len()
        } else {
            0
        };
        let at = self.bytes_already_parsed.max(document_start);

        let lexer = Lexer {
            xml: &self.xml,
            bytes: self.xml.as_bytes(),
            expecting_more_input: self.expecting_more_input,
            document_start,
        };
        let scanned = lexer.token(at, self.opaque_closer.as_deref());

        match scanned {
            Ok(Some(token)) => {
                let token_type = token.token_type;
                self.install(token);
                Ok(Some(token_type))
            }
            Ok(None) | Err(Halt::Incomplete(_)) if self.expecting_more_input => {
                self.state = ScannerState::IncompleteInput;
                self.bytes_already_parsed = at;
                Err(ParseError::Incomplete { at })
            }
            Ok(None) => {
                self.state = ScannerState::Complete;
                self.bytes_already_parsed = at;
                Ok(None)
            }
            Err(Halt::Incomplete(what)) => {
                let err = MalformedInput::syntax(format!("unexpected end of input in {what}"), at);
                self.fail(err.clone());
                Err(err.into())
            }
            Err(Halt::Malformed(err)) => {
                self.fail(err.clone());
                Err(err.into())
            }
        }
    }

    fn install(&mut self, token: Scanned) {
        self.state = token.token_type.state();
        self.token = token.span;
        self.bytes_already_parsed = token.span.end();
        self.tag_name = token.name;
        self.text = token.text;
        self.is_closer = token.is_closer;
        self.is_self_closing = token.is_self_closing;
        self.attributes = token.attributes;
        self.opaque_of = token.opaque_of;

        self.opaque_closer = None;
        if self.state == ScannerState::MatchedTag && !self.is_closer && !self.is_self_closing {
            if let Some(name) = self.tag_name.map(|span| span.slice(&self.xml)) {
                if self.opaque_elements.contains(name) {
                    debug!("entering opaque element '{name}' at byte {}", self.token.start);
                    self.opaque_closer = Some(name.to_owned());
                }
            }
        }
    }

    // ========================================================================
    // Token accessors
    // ========================================================================

    pub fn get_token_type(&self) -> Option<TokenType> {
        self.state.token_type()
    }

    /// Tag name, PI target, or a fixed name for the other token types
    pub fn get_token_name(&self) -> Option<&str> {
        match self.state {
            ScannerState::MatchedTag | ScannerState::ProcessingInstruction => {
                self.tag_name.map(|span| span.slice(&self.xml))
            }
            ScannerState::TextNode => Some("#text"),
            ScannerState::CDataNode => Some("#cdata-section"),
            ScannerState::Comment => Some("#comment"),
            ScannerState::XmlDeclaration => Some("xml"),
            _ => None,
        }
    }

    pub fn get_tag_name(&self) -> Option<&str> {
        match self.state {
            ScannerState::MatchedTag => self.tag_name.map(|span| span.slice(&self.xml)),
            _ => None,
        }
    }

    pub fn is_closing_tag(&self) -> bool {
        self.state == ScannerState::MatchedTag && self.is_closer
    }

    pub fn is_self_closing(&self) -> bool {
        self.state == ScannerState::MatchedTag && self.is_self_closing
    }

    /// True while the current token is the content of an opaque element
    pub fn is_opaque_text(&self) -> bool {
        self.state == ScannerState::TextNode && self.opaque_of.is_some()
    }

    /// Span of the current token in the unflushed document
    pub fn token_span(&self) -> Option<Span> {
        self.state.token_type().map(|_| self.token)
    }

    /// Modifiable text of the current token, undecoded and unnormalized
    pub(crate) fn raw_text(&self) -> &str {
        self.text.map_or("", |span| span.slice(&self.xml))
    }

    /// Name and offset of the first attribute of the current opener written
    /// without a value
    pub(crate) fn first_boolean_attribute(&self) -> Option<(&str, usize)> {
        if !self.on_opener() {
            return None;
        }
        self.attributes
            .iter()
            .find(|attr| attr.is_boolean)
            .map(|attr| (attr.name(&self.xml), attr.name.start))
    }

    /// Offset where the next token starts, in the unflushed document
    pub fn bytes_already_parsed(&self) -> usize {
        self.bytes_already_parsed
    }

    fn on_opener(&self) -> bool {
        self.state == ScannerState::MatchedTag && !self.is_closer
    }

    fn find_attribute(&self, name: &str) -> Option<&AttributeToken> {
        self.attributes.iter().find(|attr| attr.name(&self.xml) == name)
    }

    fn attribute_edit(&self, name: &str) -> Option<&TokenEdit> {
        self.token_edits
            .iter()
            .find(|edit| matches!(&edit.target, EditTarget::Attribute(n) if n == name))
    }

    fn text_edit(&self) -> Option<&TokenEdit> {
        self.token_edits
            .iter()
            .find(|edit| edit.target == EditTarget::ModifiableText)
    }

    fn queue_edit(&mut self, target: EditTarget, update: LexicalUpdate, value: Option<String>) {
        self.token_edits.retain(|edit| edit.target != target);
        self.token_edits.push(TokenEdit { target, update, value });
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Value of an attribute on the current tag opener.
    ///
    /// Pending edits are observed. Values are decoded on every call.
    pub fn get_attribute(&self, name: &str) -> Result<AttributeValue<'_>, DecodeError> {
        if !self.on_opener() {
            return Ok(AttributeValue::Absent);
        }

        if let Some(edit) = self.attribute_edit(name) {
            return Ok(match &edit.value {
                Some(value) => AttributeValue::Present(Cow::Borrowed(value)),
                None => AttributeValue::Absent,
            });
        }

        let Some(attr) = self.find_attribute(name) else {
            return Ok(AttributeValue::Absent);
        };
        if attr.is_boolean {
            return Ok(AttributeValue::Boolean);
        }

        let raw = attr.value.slice(&self.xml);
        if !attr.needs_decoding {
            return Ok(AttributeValue::Present(Cow::Borrowed(raw)));
        }
        decode_normalized(raw).map(AttributeValue::Present)
    }

    /// Names of the current opener's attributes starting with `prefix`, in
    /// document order followed by pending insertions. `None` off an opener.
    pub fn get_attribute_names_with_prefix(&self, prefix: &str) -> Option<Vec<&str>> {
        if !self.on_opener() {
            return None;
        }

        let mut names: Vec<&str> = self
            .attributes
            .iter()
            .map(|attr| attr.name(&self.xml))
            .filter(|name| name.starts_with(prefix))
            .filter(|name| !matches!(self.attribute_edit(name), Some(TokenEdit { value: None, .. })))
            .collect();

        for edit in &self.token_edits {
            if let (EditTarget::Attribute(name), Some(_)) = (&edit.target, &edit.value) {
                if name.starts_with(prefix) && !names.contains(&name.as_str()) {
                    names.push(name.as_str());
                }
            }
        }

        Some(names)
    }

    /// Queue setting an attribute on the current tag opener.
    ///
    /// An existing attribute is rewritten in place; a new one is inserted
    /// right after the tag name. Values are always written double-quoted.
    pub fn set_attribute(&mut self, name: &str, value: &str) -> bool {
        if !self.on_opener() || !is_name(name) {
            return false;
        }

        let pair = format!("{name}=\"{}\"", encode_attribute(value));
        let update = match self.find_attribute(name) {
            Some(attr) => LexicalUpdate::new(attr.whole.start, attr.whole.length, pair),
            None => {
                let Some(tag_name) = self.tag_name else {
                    return false;
                };
                LexicalUpdate::insertion(tag_name.end(), format!(" {pair}"))
            }
        };

        self.queue_edit(EditTarget::Attribute(name.to_owned()), update, Some(value.to_owned()));
        true
    }

    /// Queue removal of an attribute from the current tag opener.
    ///
    /// Returns whether there was anything to remove.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        if !self.on_opener() {
            return false;
        }

        match self.find_attribute(name).map(AttributeToken::removal_span) {
            Some(span) => {
                self.queue_edit(EditTarget::Attribute(name.to_owned()), LexicalUpdate::removal(span), None);
                true
            }
            None => {
                let pending = self.token_edits.len();
                self.token_edits
                    .retain(|edit| !matches!(&edit.target, EditTarget::Attribute(n) if n == name));
                self.token_edits.len() != pending
            }
        }
    }

    // ========================================================================
    // Text
    // ========================================================================

    /// Text content of the current token.
    ///
    /// Text nodes are decoded; CDATA, comments, PIs and opaque element
    /// content are returned raw. Line endings are normalized in all cases.
    pub fn get_modifiable_text(&self) -> Result<Cow<'_, str>, DecodeError> {
        let Some(span) = self.text else {
            return Ok(Cow::Borrowed(""));
        };
        if let Some(edit) = self.text_edit() {
            return Ok(Cow::Borrowed(edit.value.as_deref().unwrap_or("")));
        }

        let raw = span.slice(&self.xml);
        if self.state == ScannerState::TextNode && self.opaque_of.is_none() {
            decode_normalized(raw)
        } else {
            Ok(normalize_line_endings(raw))
        }
    }

    /// Queue replacing the text content of the current token.
    ///
    /// Returns false when the token has no modifiable text or the new text
    /// would end the token early.
    pub fn set_modifiable_text(&mut self, text: &str) -> bool {
        let Some(span) = self.text else {
            return false;
        };

        let replacement: Cow<'_, str> = match self.state {
            ScannerState::TextNode => match &self.opaque_of {
                Some(closer) if text.contains(&format!("</{closer}")) => return false,
                Some(_) => Cow::Borrowed(text),
                None => encode_text(text),
            },
            ScannerState::CDataNode if !text.contains("]]>") => Cow::Borrowed(text),
            ScannerState::Comment if !text.contains("--") && !text.ends_with('-') => Cow::Borrowed(text),
            ScannerState::ProcessingInstruction if !text.contains("?>") => {
                let touches_target = self.tag_name.is_some_and(|name| name.end() == span.start);
                if touches_target && !text.is_empty() {
                    Cow::Owned(format!(" {text}"))
                } else {
                    Cow::Borrowed(text)
                }
            }
            _ => return false,
        };

        let update = LexicalUpdate::new(span.start, span.length, replacement);
        self.queue_edit(EditTarget::ModifiableText, update, Some(text.to_owned()));
        true
    }

    // ========================================================================
    // Flushing
    // ========================================================================

    /// Apply every queued edit and return the rewritten document.
    ///
    /// The scanner stays on the current token, re-scanned at its new offsets.
    pub fn get_updated_text(&mut self) -> &str {
        if self.token_edits.is_empty() && self.lexical_updates.is_empty() {
            return &self.xml;
        }

        let current = self.token_span();
        self.lexical_updates
            .extend(self.token_edits.drain(..).map(|edit| edit.update));
        let updates = self.apply_lexical_updates();

        if let Some(span) = current {
            match shift_span(span, &updates) {
                Some(shifted) => {
                    self.bytes_already_parsed = shifted.start;
                    self.opaque_closer = self.opaque_of.clone();
                    if let Err(err) = self.scan_at_cursor() {
                        debug!("re-scanning the current token after a flush failed: {err}");
                    }
                }
                None => {
                    // The edit erased the token; resume right where it was
                    self.bytes_already_parsed = shift_offset(span.start, &updates);
                    self.opaque_closer = self.opaque_of.clone();
                    self.clear_token();
                    self.state = ScannerState::Ready;
                }
            }
        }

        &self.xml
    }

    /// Replay the anonymous queue over the document, carrying the cursor and
    /// bookmarks along. Returns the applied updates in replay order.
    fn apply_lexical_updates(&mut self) -> Vec<LexicalUpdate> {
        let mut updates = std::mem::take(&mut self.lexical_updates);
        if updates.is_empty() {
            return updates;
        }

        sort_updates(&mut updates);
        debug!("applying {} lexical updates", updates.len());

        self.xml = apply_updates(&self.xml, &updates);
        self.bytes_already_parsed = shift_offset(self.bytes_already_parsed, &updates);
        self.bookmarks.retain(|name, bookmark| match shift_span(bookmark.span, &updates) {
            Some(span) => {
                bookmark.span = span;
                true
            }
            None => {
                debug!("releasing bookmark '{name}': its token was removed");
                false
            }
        });

        updates
    }

    // ========================================================================
    // Bookmarks
    // ========================================================================

    /// Remember the current token under `name`, replacing an existing
    /// bookmark of the same name.
    pub fn set_bookmark(&mut self, name: &str) -> Result<(), BookmarkError> {
        let Some(span) = self.token_span() else {
            return Err(BookmarkError::NoCurrentToken);
        };
        if !self.bookmarks.contains_key(name) && self.bookmarks.len() >= self.options.max_bookmarks {
            return Err(BookmarkError::TooManyBookmarks { max: self.options.max_bookmarks });
        }

        let bookmark = Bookmark { span, opaque_closer: self.opaque_of.clone() };
        self.bookmarks.insert(name.to_owned(), bookmark);
        Ok(())
    }

    pub fn release_bookmark(&mut self, name: &str) -> bool {
        self.bookmarks.remove(name).is_some()
    }

    pub fn has_bookmark(&self, name: &str) -> bool {
        self.bookmarks.contains_key(name)
    }

    /// Flush pending edits and move back (or forward) to a bookmarked token
    pub fn seek(&mut self, name: &str) -> Result<(), BookmarkError> {
        if !self.bookmarks.contains_key(name) {
            return Err(BookmarkError::UnknownBookmark(name.to_owned()));
        }
        if self.seek_count >= self.options.max_seek_ops {
            return Err(BookmarkError::TooManySeeks { max: self.options.max_seek_ops });
        }
        self.seek_count += 1;

        self.get_updated_text();
        let Some(bookmark) = self.bookmarks.get(name).cloned() else {
            return Err(BookmarkError::UnknownBookmark(name.to_owned()));
        };
        debug!("seeking to bookmark '{name}' at byte {}", bookmark.span.start);

        self.clear_token();
        self.state = ScannerState::Ready;
        self.bytes_already_parsed = bookmark.span.start;
        self.opaque_closer = bookmark.opaque_closer;
        if let Err(err) = self.scan_at_cursor() {
            debug!("re-scanning bookmark '{name}' failed: {err}");
        }
        Ok(())
    }
}

// ============================================================================
// Lexer
// ============================================================================

/// Why a token could not be scanned
enum Halt {
    /// The input ends inside the named construct
    Incomplete(&'static str),
    Malformed(MalformedInput),
}

impl From<MalformedInput> for Halt {
    fn from(err: MalformedInput) -> Self {
        Halt::Malformed(err)
    }
}

type Scan<T> = Result<T, Halt>;

fn syntax<T>(message: impl Into<Cow<'static, str>>, at: usize) -> Scan<T> {
    Err(Halt::Malformed(MalformedInput::syntax(message, at)))
}

/// A scanned token, detached from the document
#[derive(Debug)]
struct Scanned {
    token_type: TokenType,
    span: Span,
    name: Option<Span>,
    text: Option<Span>,
    is_closer: bool,
    is_self_closing: bool,
    attributes: Vec<AttributeToken>,
    opaque_of: Option<String>,
}

impl Scanned {
    fn new(token_type: TokenType, span: Span) -> Self {
        Scanned {
            token_type,
            span,
            name: None,
            text: None,
            is_closer: false,
            is_self_closing: false,
            attributes: Vec::new(),
            opaque_of: None,
        }
    }
}

/// Markup declarations `<!...` that may still be completed by more input
const MARKUP_DECLARATIONS: [&[u8]; 3] = [b"<!--", b"<![CDATA[", b"<!DOCTYPE"];

struct Lexer<'a> {
    xml: &'a str,
    bytes: &'a [u8],
    expecting_more_input: bool,
    document_start: usize,
}

impl<'a> Lexer<'a> {
    fn token(&self, at: usize, opaque_closer: Option<&str>) -> Scan<Option<Scanned>> {
        if at >= self.bytes.len() {
            return Ok(None);
        }

        if let Some(closer) = opaque_closer {
            if let Some(content) = self.opaque_text(at, closer)? {
                return Ok(Some(content));
            }
        }

        if self.bytes[at] != b'<' {
            return self.text(at).map(Some);
        }

        match self.bytes.get(at + 1) {
            None => Err(Halt::Incomplete("markup")),
            Some(b'!') => self.markup_declaration(at).map(Some),
            Some(b'?') => self.processing_instruction(at).map(Some),
            Some(b'/') => self.closer(at).map(Some),
            Some(_) => self.opener(at).map(Some),
        }
    }

    /// Raw content of an opaque element, up to its closer. `None` when the
    /// closer follows immediately.
    fn opaque_text(&self, at: usize, closer: &str) -> Scan<Option<Scanned>> {
        let b = self.bytes;
        let mut search = at;

        let end = loop {
            let Some(lt) = find_seq(b, b"</", search) else {
                return Err(Halt::Incomplete("opaque element content"));
            };
            let name_at = lt + 2;
            let after = name_at + closer.len();

            if starts_with_at(b, name_at, closer.as_bytes()) {
                match b.get(after) {
                    None => return Err(Halt::Incomplete("opaque element content")),
                    Some(&c) if c == b'>' || is_whitespace(c) => break lt,
                    Some(_) => {}
                }
            } else if b.len() < after && closer.as_bytes().starts_with(&b[name_at..]) {
                return Err(Halt::Incomplete("opaque element content"));
            }
            search = name_at;
        };

        if end == at {
            return Ok(None);
        }

        let span = Span::new(at, end - at);
        let mut token = Scanned::new(TokenType::Text, span);
        token.text = Some(span);
        token.opaque_of = Some(closer.to_owned());
        Ok(Some(token))
    }

    fn text(&self, at: usize) -> Scan<Scanned> {
        let b = self.bytes;
        let end = match find_byte(b, b'<', at) {
            Some(lt) => lt,
            // More text may follow in the next chunk
            None if self.expecting_more_input => return Err(Halt::Incomplete("text")),
            None => b.len(),
        };

        if let Some(cdata_end) = find_seq(&b[..end], b"]]>", at) {
            return syntax("']]>' is not allowed in text", cdata_end);
        }

        let span = Span::new(at, end - at);
        let mut token = Scanned::new(TokenType::Text, span);
        token.text = Some(span);
        Ok(token)
    }

    /// `<!--`, `<![CDATA[` or `<!DOCTYPE`
    fn markup_declaration(&self, at: usize) -> Scan<Scanned> {
        let b = self.bytes;

        if starts_with_at(b, at, b"<!--") {
            let content_at = at + 4;
            let Some(dashes) = find_seq(b, b"--", content_at) else {
                return Err(Halt::Incomplete("comment"));
            };
            match b.get(dashes + 2) {
                None => return Err(Halt::Incomplete("comment")),
                Some(b'>') => {}
                Some(_) => return syntax("comments may not contain '--' or end with '-'", dashes),
            }

            let mut token = Scanned::new(TokenType::Comment, Span::new(at, dashes + 3 - at));
            token.text = Some(Span::new(content_at, dashes - content_at));
            return Ok(token);
        }

        if starts_with_at(b, at, b"<![CDATA[") {
            let content_at = at + 9;
            let Some(close) = find_seq(b, b"]]>", content_at) else {
                return Err(Halt::Incomplete("CDATA section"));
            };

            let mut token = Scanned::new(TokenType::CData, Span::new(at, close + 3 - at));
            token.text = Some(Span::new(content_at, close - content_at));
            return Ok(token);
        }

        if starts_with_at(b, at, b"<!DOCTYPE") {
            return Err(MalformedInput::unsupported("DOCTYPE declarations are not supported", at).into());
        }

        let rest = &b[at..];
        if MARKUP_DECLARATIONS
            .iter()
            .any(|decl| rest.len() < decl.len() && decl.starts_with(rest))
        {
            return Err(Halt::Incomplete("markup declaration"));
        }
        syntax("invalid markup declaration", at)
    }

    /// `<?target ...?>`, including the XML declaration
    fn processing_instruction(&self, at: usize) -> Scan<Scanned> {
        let b = self.bytes;
        let target_at = at + 2;
        let target_length = name_len(b, target_at);
        if target_length == 0 {
            if target_at >= b.len() {
                return Err(Halt::Incomplete("processing instruction"));
            }
            return syntax("processing instruction has no target", target_at);
        }

        let target_end = target_at + target_length;
        if target_end >= b.len() {
            return Err(Halt::Incomplete("processing instruction"));
        }
        let Some(close) = find_seq(b, b"?>", target_end) else {
            return Err(Halt::Incomplete("processing instruction"));
        };
        if close != target_end && !is_whitespace(b[target_end]) {
            return syntax("invalid character after processing instruction target", target_end);
        }

        let target = &self.xml[target_at..target_end];
        let content_at = target_end + whitespace_len(b, target_end);
        let span = Span::new(at, close + 2 - at);

        let token_type = if target.eq_ignore_ascii_case("xml") {
            if at != self.document_start || target != "xml" {
                return syntax("processing instruction target 'xml' is reserved", target_at);
            }
            parse_xml_declaration(&self.xml[target_end..close], target_end)?;
            TokenType::XmlDeclaration
        } else {
            TokenType::ProcessingInstruction
        };

        let mut token = Scanned::new(token_type, span);
        token.name = Some(Span::new(target_at, target_length));
        token.text = Some(Span::new(content_at, close - content_at));
        Ok(token)
    }

    /// `</name>`
    fn closer(&self, at: usize) -> Scan<Scanned> {
        let b = self.bytes;
        let name_at = at + 2;
        let name_length = name_len(b, name_at);
        if name_length == 0 {
            if name_at >= b.len() {
                return Err(Halt::Incomplete("tag closer"));
            }
            return syntax("invalid tag closer name", name_at);
        }

        let name_end = name_at + name_length;
        let gt = name_end + whitespace_len(b, name_end);
        match b.get(gt) {
            None => return Err(Halt::Incomplete("tag closer")),
            Some(b'>') => {}
            Some(_) => return syntax("tag closers cannot have attributes", gt),
        }

        let mut token = Scanned::new(TokenType::Tag, Span::new(at, gt + 1 - at));
        token.name = Some(Span::new(name_at, name_length));
        token.is_closer = true;
        Ok(token)
    }

    /// `<name attr="value" ...>` or `<name .../>`
    fn opener(&self, at: usize) -> Scan<Scanned> {
        let b = self.bytes;
        let name_at = at + 1;
        let name_length = name_len(b, name_at);
        if name_length == 0 {
            return syntax("invalid tag name", name_at);
        }

        let mut attributes: Vec<AttributeToken> = Vec::new();
        let mut pos = name_at + name_length;

        let (end, is_self_closing) = loop {
            match scan_attribute(b, pos) {
                AttributeScan::Attribute(attr, next) => {
                    let attr_name = attr.name(self.xml);
                    if attributes.iter().any(|seen| seen.name(self.xml) == attr_name) {
                        return syntax(format!("duplicate attribute '{attr_name}'"), attr.name.start);
                    }
                    attributes.push(attr);
                    pos = next;
                }
                AttributeScan::End(gt) if b[gt] == b'>' => break (gt + 1, false),
                AttributeScan::End(slash) => match b.get(slash + 1) {
                    None => return Err(Halt::Incomplete("tag")),
                    Some(b'>') => break (slash + 2, true),
                    Some(_) => return syntax("expected '>' after '/'", slash + 1),
                },
                AttributeScan::Incomplete => return Err(Halt::Incomplete("tag")),
                AttributeScan::Invalid(message, offset) => return syntax(message, offset),
            }
        };

        let mut token = Scanned::new(TokenType::Tag, Span::new(at, end - at));
        token.name = Some(Span::new(name_at, name_length));
        token.is_self_closing = is_self_closing;
        token.attributes = attributes;
        Ok(token)
    }
}
