//! Source files and position lookup.
//!
//! Every piece of text the pipeline looks at lives in a [`SourceMap`]:
//! the files read from disk (the entry file and anything pulled in by
//! `#include`) and the cleaned text produced by the preprocessor. The
//! cleaned text is registered as a *derived* file whose lines remember
//! where they came from, so a diagnostic raised by the lexer or parser
//! can still point at the user's original file, line and column.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::CoreError;
use crate::span::{FileId, Span};

/// Origin of one line of a derived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOrigin {
    pub file_id: FileId,
    /// 1-based line in the origin file.
    pub line: u32,
    /// Points where the derived line stops matching the origin line byte
    /// for byte, sorted by derived offset. Empty for unchanged lines.
    pub shifts: Vec<Shift>,
}

/// Start of a run of a derived line and where that run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shift {
    /// Byte offset within the derived line.
    pub derived: u32,
    /// Byte offset within the origin line.
    pub origin: u32,
    /// False for substituted text, whose every byte maps to `origin`.
    pub verbatim: bool,
}

impl LineOrigin {
    pub fn new(file_id: FileId, line: u32) -> Self {
        LineOrigin {
            file_id,
            line,
            shifts: Vec::new(),
        }
    }

    /// Map a byte offset within the derived line into the origin line.
    pub fn map_offset(&self, offset: u32) -> u32 {
        match self.shifts.iter().rev().find(|shift| shift.derived <= offset) {
            None => offset,
            Some(shift) if shift.verbatim => shift.origin + (offset - shift.derived),
            Some(shift) => shift.origin,
        }
    }
}

/// An immutable, named source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    name: String,
    text: String,
    line_starts: Vec<u32>,
    origins: Option<Vec<LineOrigin>>,
}

impl SourceFile {
    fn new(name: String, text: String, origins: Option<Vec<LineOrigin>>) -> Self {
        let mut line_starts = vec![0];
        for (index, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(index as u32 + 1);
            }
        }
        SourceFile {
            name,
            text,
            line_starts,
            origins,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> u32 {
        self.text.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Per-line origins when this file was produced by the preprocessor.
    pub fn origins(&self) -> Option<&[LineOrigin]> {
        self.origins.as_deref()
    }

    /// Byte offset where 1-based `line` starts.
    pub fn line_start(&self, line: u32) -> Option<u32> {
        let index = (line as usize).checked_sub(1)?;
        self.line_starts.get(index).copied()
    }

    /// 1-based line and column of a byte offset. Columns count characters.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let offset = offset.min(self.len());
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        let line_start = self.line_starts[line_index] as usize;
        let column = match self.text.get(line_start..offset as usize) {
            Some(prefix) => prefix.chars().count(),
            None => offset as usize - line_start,
        };
        (line_index as u32 + 1, column as u32 + 1)
    }
}

/// A resolved, human-readable position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.line, self.column)
    }
}

/// Registry of all files seen during one pipeline run.
#[derive(Debug, Default, Clone)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        SourceMap { files: Vec::new() }
    }

    /// Register an original source file.
    pub fn add(&mut self, name: impl Into<String>, text: impl Into<String>) -> FileId {
        self.push(SourceFile::new(name.into(), text.into(), None))
    }

    /// Read `path` as UTF-8 and register it under its display name.
    pub fn load(&mut self, path: &Path) -> Result<FileId, CoreError> {
        let text = fs::read_to_string(path).map_err(|source| CoreError::SourceIo {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.add(path.display().to_string(), text))
    }

    /// Register text derived from other files, one origin per line.
    pub fn add_derived(
        &mut self,
        name: impl Into<String>,
        text: impl Into<String>,
        origins: Vec<LineOrigin>,
    ) -> FileId {
        self.push(SourceFile::new(name.into(), text.into(), Some(origins)))
    }

    fn push(&mut self, file: SourceFile) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(file);
        id
    }

    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.index())
    }

    /// Resolve the start of `span` to a position in an original file.
    pub fn locate(&self, span: Span) -> Location {
        let Some(file) = self.get(span.file_id) else {
            return Location {
                name: "<unknown>".into(),
                line: 0,
                column: 0,
            };
        };
        let (line, column) = file.line_col(span.start);
        self.locate_origin(file, line, span.start)
            .unwrap_or_else(|| Location {
                name: file.name.clone(),
                line,
                column,
            })
    }

    /// Map a position in a derived file through its line origins. Offsets
    /// past the last recorded line use the last origin.
    fn locate_origin(&self, file: &SourceFile, line: u32, offset: u32) -> Option<Location> {
        let origins = file.origins()?;
        let origin = origins.get(line as usize - 1).or(origins.last())?;
        let origin_file = self.get(origin.file_id)?;

        let in_line = offset.min(file.len()) - file.line_start(line)?;
        let origin_start = origin_file.line_start(origin.line)?;
        let origin_end = origin_file
            .line_start(origin.line + 1)
            .map_or(origin_file.len(), |next| next - 1);
        let mapped = (origin_start + origin.map_offset(in_line)).min(origin_end);
        let (_, column) = origin_file.line_col(mapped);

        Some(Location {
            name: origin_file.name.clone(),
            line: origin.line,
            column,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_line_and_column() {
        let mut map = SourceMap::new();
        let id = map.add("main.q", "let a = 1;\nlet bé = 2;\n");
        let file = map.get(id).expect("file registered");
        assert_eq!(file.line_col(0), (1, 1));
        assert_eq!(file.line_col(11), (2, 1));
        assert_eq!(file.line_col(18), (2, 7));
        assert_eq!(map.locate(Span::new(id, 4, 5)).to_string(), "main.q:1:5");
    }

    #[test]
    fn locates_through_derived_lines() {
        let mut map = SourceMap::new();
        let main = map.add("main.q", "#include \"lib.q\"\nprint x;\n");
        let lib = map.add("lib.q", "let x = 1;\n");
        let cleaned = map.add_derived(
            "main.q (preprocessed)",
            "let x = 1;\n\nprint x;\n",
            vec![
                LineOrigin::new(lib, 1),
                LineOrigin::new(main, 1),
                LineOrigin::new(main, 2),
            ],
        );
        let location = map.locate(Span::new(cleaned, 12, 17));
        assert_eq!(location.name, "main.q");
        assert_eq!(location.line, 2);
        assert_eq!(location.column, 1);
        assert_eq!(map.locate(Span::new(cleaned, 4, 5)).to_string(), "lib.q:1:5");
    }

    #[test]
    fn shifted_lines_map_columns_back() {
        let origin = LineOrigin {
            file_id: FileId(0),
            line: 1,
            shifts: vec![
                Shift { derived: 6, origin: 6, verbatim: false },
                Shift { derived: 7, origin: 14, verbatim: true },
            ],
        };
        assert_eq!(origin.map_offset(3), 3);
        assert_eq!(origin.map_offset(6), 6);
        assert_eq!(origin.map_offset(7), 14);
        assert_eq!(origin.map_offset(10), 17);
    }

    #[test]
    fn loads_files_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("main.q");
        std::fs::write(&path, "print 1;\n").expect("write source");

        let mut map = SourceMap::new();
        let id = map.load(&path).expect("load source");
        assert_eq!(map.get(id).map(SourceFile::text), Some("print 1;\n"));

        let err = map.load(&dir.path().join("missing.q")).unwrap_err();
        assert!(matches!(err, CoreError::SourceIo { .. }));
        assert!(err.to_string().starts_with("failed to read source"));
    }
}
