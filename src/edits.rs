//! Range-anchored text edits
//!
//! Every edit is expressed against byte offsets of the original source, so
//! nested rewrites never invalidate each other's ranges. Edits are applied in
//! a single left-to-right pass. At a shared offset, closing text of deeper
//! constructs is emitted before closing text of outer ones, all closing text
//! comes before opening text, and opening text of outer constructs comes
//! before opening text of inner ones.

use std::cmp::Ordering;
use std::ops::Range;

use crate::error::InstrumentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Anchor {
    Close,
    Open,
}

#[derive(Debug, Clone)]
struct Edit {
    range: Range<usize>,
    text: String,
    anchor: Anchor,
    depth: usize,
    seq: usize,
}

impl Edit {
    fn order(&self, other: &Self) -> Ordering {
        self.range
            .start
            .cmp(&other.range.start)
            .then(self.anchor.cmp(&other.anchor))
            .then_with(|| match self.anchor {
                Anchor::Close => other.depth.cmp(&self.depth),
                Anchor::Open => self.depth.cmp(&other.depth),
            })
            .then(self.seq.cmp(&other.seq))
    }
}

/// Pending edits over one source text
#[derive(Debug)]
pub struct EditBuffer<'src> {
    source: &'src str,
    edits: Vec<Edit>,
}

impl<'src> EditBuffer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            edits: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Insert text that opens a construct owned by a node at `depth`
    pub fn insert_open(&mut self, at: usize, depth: usize, text: impl Into<String>) {
        self.push(at..at, Anchor::Open, depth, text.into());
    }

    /// Insert text that closes a construct owned by a node at `depth`
    pub fn insert_close(&mut self, at: usize, depth: usize, text: impl Into<String>) {
        self.push(at..at, Anchor::Close, depth, text.into());
    }

    /// Replace `range` of the original text
    pub fn replace(&mut self, range: Range<usize>, depth: usize, text: impl Into<String>) {
        self.push(range, Anchor::Open, depth, text.into());
    }

    fn push(&mut self, range: Range<usize>, anchor: Anchor, depth: usize, text: String) {
        let seq = self.edits.len();
        self.edits.push(Edit {
            range,
            text,
            anchor,
            depth,
            seq,
        });
    }

    /// Apply all edits, failing if a replaced range swallows another edit
    pub fn apply(mut self) -> Result<String, InstrumentError> {
        self.edits.sort_by(|a, b| a.order(b));

        let extra: usize = self.edits.iter().map(|e| e.text.len()).sum();
        let mut out = String::with_capacity(self.source.len() + extra);
        let mut cursor = 0;

        for edit in &self.edits {
            if edit.range.start < cursor || edit.range.end > self.source.len() {
                return Err(InstrumentError::Edit(format!(
                    "edit at {}..{} overlaps text already rewritten up to {}",
                    edit.range.start, edit.range.end, cursor
                )));
            }
            out.push_str(&self.source[cursor..edit.range.start]);
            out.push_str(&edit.text);
            cursor = edit.range.end;
        }
        out.push_str(&self.source[cursor..]);

        Ok(out)
    }
}
