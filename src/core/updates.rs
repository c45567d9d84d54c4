//! Deferred text surgery
//!
//! Edits are queued as `LexicalUpdate`s and replayed in a single linear pass.
//! The scanner is the only producer of updates and never queues two that
//! overlap, so the replay needs no merging: sort by start, copy the gaps,
//! splice in the replacement text.
//!
//! Offsets recorded before a flush (the cursor, bookmarks) are carried over
//! by summing the length deltas of the updates that lie before them.

use super::span::Span;

/// Replace `length` bytes at `start` with `text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalUpdate {
    pub start: usize,
    pub length: usize,
    pub text: String,
}

impl LexicalUpdate {
    pub fn new(start: usize, length: usize, text: impl Into<String>) -> Self {
        LexicalUpdate {
            start,
            length,
            text: text.into(),
        }
    }

    pub fn insertion(at: usize, text: impl Into<String>) -> Self {
        Self::new(at, 0, text)
    }

    pub fn removal(span: Span) -> Self {
        Self::new(span.start, span.length, String::new())
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// Change in document length caused by this update
    #[inline]
    pub fn delta(&self) -> isize {
        self.text.len() as isize - self.length as isize
    }
}

/// Order updates for replay.
///
/// At a shared start, insertions come before the update that consumes text;
/// insertions sharing a start keep queue order.
pub fn sort_updates(updates: &mut [LexicalUpdate]) {
    updates.sort_by_key(|update| (update.start, update.length));
}

/// Replay sorted updates over `source`.
pub fn apply_updates(source: &str, updates: &[LexicalUpdate]) -> String {
    let growth: isize = updates.iter().map(LexicalUpdate::delta).sum();
    let capacity = (source.len() as isize + growth).max(0) as usize;
    let mut output = String::with_capacity(capacity);
    let mut copied_up_to = 0;

    for update in updates {
        debug_assert!(update.start >= copied_up_to, "overlapping lexical updates");
        output.push_str(&source[copied_up_to..update.start]);
        output.push_str(&update.text);
        copied_up_to = update.end();
    }

    output.push_str(&source[copied_up_to..]);
    output
}

/// Where `point` lands after the updates are applied.
///
/// Only updates lying entirely at or before the point move it.
pub fn shift_offset(point: usize, updates: &[LexicalUpdate]) -> usize {
    let delta: isize = updates
        .iter()
        .take_while(|update| update.start <= point)
        .filter(|update| update.end() <= point)
        .map(LexicalUpdate::delta)
        .sum();
    (point as isize + delta) as usize
}

/// Where a tracked span lands after the updates are applied.
///
/// Returns `None` when an update erased the whole span.
pub fn shift_span(span: Span, updates: &[LexicalUpdate]) -> Option<Span> {
    let span_end = span.end();
    let mut head_delta: isize = 0;
    let mut tail_delta: isize = 0;

    for update in updates {
        if update.start > span_end {
            break;
        }

        let covers = update.length > 0 && update.start <= span.start && span_end <= update.end();
        if covers && update.text.is_empty() {
            return None;
        }

        if update.end() <= span.start {
            head_delta += update.delta();
        }
        if update.end() <= span_end {
            tail_delta += update.delta();
        }
    }

    let start = (span.start as isize + head_delta) as usize;
    let end = (span_end as isize + tail_delta) as usize;
    Some(Span::new(start, end - start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut updates: Vec<LexicalUpdate>) -> Vec<LexicalUpdate> {
        sort_updates(&mut updates);
        updates
    }

    #[test]
    fn test_apply_no_updates() {
        assert_eq!(apply_updates("<a/>", &[]), "<a/>");
    }

    #[test]
    fn test_apply_in_offset_order() {
        let source = "<a x=\"1\"><b/></a>";
        let updates = sorted(vec![
            LexicalUpdate::insertion(11, " y=\"2\""),
            LexicalUpdate::new(3, 5, "x=\"one\""),
        ]);
        assert_eq!(apply_updates(source, &updates), "<a x=\"one\"><b y=\"2\"/></a>");
    }

    #[test]
    fn test_insert_and_remove_at_same_start() {
        let source = "<a x=\"1\">";
        let updates = sorted(vec![
            LexicalUpdate::removal(Span::new(2, 6)),
            LexicalUpdate::insertion(2, " y=\"2\""),
        ]);
        assert_eq!(apply_updates(source, &updates), "<a y=\"2\">");
    }

    #[test]
    fn test_shift_offset() {
        let updates = vec![
            LexicalUpdate::new(3, 1, "xyz"),
            LexicalUpdate::new(10, 2, ""),
        ];
        assert_eq!(shift_offset(2, &updates), 2);
        assert_eq!(shift_offset(4, &updates), 6);
        assert_eq!(shift_offset(11, &updates), 13);
        assert_eq!(shift_offset(12, &updates), 12);
    }

    #[test]
    fn test_shift_span_after_earlier_edit() {
        let updates = vec![LexicalUpdate::new(3, 1, "xyz")];
        assert_eq!(shift_span(Span::new(10, 4), &updates), Some(Span::new(12, 4)));
        assert_eq!(shift_span(Span::new(0, 2), &updates), Some(Span::new(0, 2)));
    }

    #[test]
    fn test_shift_span_with_edit_inside() {
        let updates = vec![LexicalUpdate::insertion(2, " x=\"1\"")];
        assert_eq!(shift_span(Span::new(0, 3), &updates), Some(Span::new(0, 9)));
    }

    #[test]
    fn test_shift_span_replaced_whole() {
        let updates = vec![LexicalUpdate::new(5, 4, "longer")];
        assert_eq!(shift_span(Span::new(5, 4), &updates), Some(Span::new(5, 6)));
    }

    #[test]
    fn test_shift_span_deleted() {
        let updates = vec![LexicalUpdate::removal(Span::new(5, 4))];
        assert_eq!(shift_span(Span::new(5, 4), &updates), None);
        assert_eq!(shift_span(Span::new(6, 2), &updates), None);
    }
}
