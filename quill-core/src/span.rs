//! Source spans.
//!
//! A [`Span`] is a half-open byte range `start..end` into the text of a
//! single file registered in a [`crate::source::SourceMap`].

use std::fmt;

/// Identifier of a file registered in a [`crate::source::SourceMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

impl FileId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Byte range in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub file_id: FileId,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file_id: FileId, start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "span start after end");
        Span {
            file_id,
            start,
            end,
        }
    }

    /// Zero-width span at `offset`.
    pub fn point(file_id: FileId, offset: u32) -> Self {
        Span::new(file_id, offset, offset)
    }

    /// Smallest span covering both `self` and `other`.
    ///
    /// Both spans must belong to the same file.
    pub fn to(self, other: Span) -> Span {
        debug_assert_eq!(self.file_id, other.file_id);
        Span::new(
            self.file_id,
            self.start.min(other.start),
            self.end.max(other.end),
        )
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end as usize
    }

    /// Returns true if `other` lies entirely inside `self`.
    pub fn contains(&self, other: Span) -> bool {
        self.file_id == other.file_id && self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
