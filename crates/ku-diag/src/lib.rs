//! Error reporting and diagnostics for the ku compiler.
//!
//! This crate provides the source-file table, line/column positions, and
//! structured diagnostics used by every semantic pass. Diagnostics are
//! created by other crates (for example `ku-resolve` and `ku-infer`) and
//! rendered here for display.
//!
//! The rendered format is stable:
//!
//! ```text
//! error: [file:line:col] <message>
//! <offending source line>
//!        ^
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// Source files and positions
// ---------------------------------------------------------------------------

/// Identifies a source file in the compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// A line/column position within a source file. Both are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub file: FileId,
    pub line: u32,
    pub col: u32,
}

impl Default for Position {
    fn default() -> Self {
        Position::synthetic()
    }
}

impl Position {
    pub fn new(file: FileId, line: u32, col: u32) -> Self {
        Self { file, line, col }
    }

    /// A position for compiler-generated nodes.
    pub fn synthetic() -> Self {
        Self {
            file: FileId(u32::MAX),
            line: 0,
            col: 0,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.file == FileId(u32::MAX)
    }
}

/// A contiguous region of source, used for multi-character markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

/// Width a tab stop occupies in rendered markers.
const TAB_WIDTH: usize = 4;

/// One source file: its display name and contents.
///
/// The middle-end never reads files from disk; the driver fills these in
/// after lexing and hands the table over.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// File name without directory or extension (e.g. `vec` for `vec.ku`).
    pub name: String,
    /// Full path as given to the driver, used in diagnostics.
    pub path: String,
    contents: String,
    /// Byte offset of the start of each line.
    line_starts: Vec<usize>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, path: impl Into<String>, contents: impl Into<String>) -> Self {
        let contents = contents.into();
        let mut line_starts = vec![0];
        for (idx, byte) in contents.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(idx + 1);
            }
        }
        Self {
            name: name.into(),
            path: path.into(),
            contents,
            line_starts,
        }
    }

    /// The contents of a 1-based line, without its newline.
    pub fn line(&self, line: u32) -> &str {
        let idx = line.saturating_sub(1) as usize;
        let Some(&start) = self.line_starts.get(idx) else {
            return "";
        };
        let end = self
            .line_starts
            .get(idx + 1)
            .map(|&next| next.saturating_sub(1))
            .unwrap_or(self.contents.len());
        &self.contents[start..end.max(start)]
    }

    /// Render the source line at `pos` with a caret under the offending
    /// column. Tabs are expanded to [`TAB_WIDTH`] spaces so the caret
    /// lines up with the rendered text.
    pub fn mark_pos(&self, pos: Position) -> String {
        let line = self.line(pos.line);
        let mut out = String::new();
        out.push_str(&line.replace('\t', &" ".repeat(TAB_WIDTH)));
        out.push('\n');
        let pad = pos.col.saturating_sub(1) as usize;
        for ch in line.chars().take(pad) {
            let spaces = if ch == '\t' { TAB_WIDTH } else { 1 };
            for _ in 0..spaces {
                out.push(' ');
            }
        }
        out.push('^');
        out.push('\n');
        out
    }

    /// Render every line of `span` with `~` markers under the covered
    /// region. A one-character span falls back to [`SourceFile::mark_pos`].
    pub fn mark_span(&self, span: Span) -> String {
        if span.start.line == span.end.line && span.end.col <= span.start.col + 1 {
            return self.mark_pos(span.start);
        }

        let mut out = String::new();
        for line_no in span.start.line..=span.end.line {
            let line = self.line(line_no);
            let chars: Vec<char> = line.chars().collect();
            let pad = if line_no == span.start.line {
                span.start.col.saturating_sub(1) as usize
            } else {
                0
            };
            let len = if line_no == span.end.line {
                (span.end.col.saturating_sub(span.start.col)) as usize
            } else {
                chars.len().saturating_sub(pad)
            };

            out.push_str(&line.replace('\t', &" ".repeat(TAB_WIDTH)));
            out.push('\n');
            for ch in chars.iter().take(pad) {
                let spaces = if *ch == '\t' { TAB_WIDTH } else { 1 };
                for _ in 0..spaces {
                    out.push(' ');
                }
            }
            for idx in 0..len {
                let spaces = match chars.get(pad + idx) {
                    Some('\t') => TAB_WIDTH,
                    _ => 1,
                };
                for _ in 0..spaces {
                    out.push('~');
                }
            }
            out.push('\n');
        }
        out
    }
}

/// The table of all source files in a compilation session.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

impl SourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, file: SourceFile) -> FileId {
        let id = FileId(self.files.len() as u32);
        self.files.push(file);
        id
    }

    pub fn get(&self, id: FileId) -> Option<&SourceFile> {
        self.files.get(id.0 as usize)
    }

    /// The display path for a file; `<synthetic>` for generated positions.
    pub fn path(&self, id: FileId) -> &str {
        self.get(id).map(|f| f.path.as_str()).unwrap_or("<synthetic>")
    }
}

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

/// Broad category for diagnostics. One entry per fatal error kind of the
/// semantic passes, plus the non-semantic kinds the session reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Two types, functions, or variables with the same name in one scope.
    Redeclaration,
    /// Identifier not in scope and not in any used module.
    UnresolvedName,
    /// Cross-module access of a non-public binding.
    Privacy,
    /// Lambda references a local of an enclosing function.
    Capture,
    /// Method defined on a foreign or non-named receiver type.
    ReceiverMismatch,
    /// Unification left an unresolvable constraint.
    TypeMismatch,
    /// Wrong argument count for a call or cast.
    Arity,
    /// Explicit generic arguments disagree with parameters, or extraction failed.
    GenericArguments,
    /// Import cycle detected by the module graph.
    ImportCycle,
    /// Module could not be located or loaded.
    Setup,
    /// Source text did not parse (reported by the external parser).
    Parse,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Redeclaration => "redeclaration",
            Category::UnresolvedName => "unresolved_name",
            Category::Privacy => "privacy",
            Category::Capture => "capture",
            Category::ReceiverMismatch => "receiver_mismatch",
            Category::TypeMismatch => "type_mismatch",
            Category::Arity => "arity",
            Category::GenericArguments => "generic_arguments",
            Category::ImportCycle => "import_cycle",
            Category::Setup => "setup",
            Category::Parse => "parse",
        }
    }

    /// The process exit code class this category maps to.
    pub fn exit_code(self) -> ExitCode {
        match self {
            Category::Setup | Category::ImportCycle => ExitCode::Setup,
            Category::Parse => ExitCode::Parse,
            _ => ExitCode::Semantic,
        }
    }
}

/// Distinguished process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Setup = 1,
    Parse = 2,
    Semantic = 3,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    pub position: Option<Position>,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category,
            message: message.into(),
            position: None,
        }
    }

    pub fn warning(category: Category, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            category,
            message: message.into(),
            position: None,
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    /// Full rendering with file path and caret marker.
    pub fn render(&self, sources: &SourceMap) -> String {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.position {
            Some(pos) if !pos.is_synthetic() => {
                let mut out = format!(
                    "{prefix}: [{}:{}:{}] {}\n",
                    sources.path(pos.file),
                    pos.line,
                    pos.col,
                    self.message
                );
                if let Some(file) = sources.get(pos.file) {
                    out.push_str(&file.mark_pos(pos));
                }
                out
            }
            _ => format!("{prefix}: {}\n", self.message),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.position {
            Some(pos) if !pos.is_synthetic() => {
                write!(f, "{prefix}: [{}:{}] {}", pos.line, pos.col, self.message)
            }
            _ => write!(f, "{prefix}: {}", self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
///
/// Semantic failures are fatal and reported once: passes return this from
/// the first error and do not attempt recovery.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }

    /// The exit code the process should terminate with.
    pub fn exit_code(&self) -> ExitCode {
        self.0
            .first()
            .map(|d| d.category.exit_code())
            .unwrap_or(ExitCode::Semantic)
    }

    pub fn render(&self, sources: &SourceMap) -> String {
        let mut out = String::new();
        for diag in &self.0 {
            out.push_str(&diag.render(sources));
        }
        out
    }
}

impl From<Diagnostic> for DiagnosticError {
    fn from(diag: Diagnostic) -> Self {
        Self::single(diag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with(source: &str) -> (SourceMap, FileId) {
        let mut sources = SourceMap::new();
        let id = sources.add(SourceFile::new("main", "main.ku", source));
        (sources, id)
    }

    #[test]
    fn mark_pos_places_caret_under_column() {
        let (sources, file) = session_with("fun main() int {\n    return x\n}\n");
        let marked = sources.get(file).unwrap().mark_pos(Position::new(file, 2, 12));
        assert_eq!(marked, "    return x\n           ^\n");
    }

    #[test]
    fn mark_pos_expands_tabs() {
        let (sources, file) = session_with("\treturn x\n");
        let marked = sources.get(file).unwrap().mark_pos(Position::new(file, 1, 9));
        // The tab renders as four spaces, and the caret pad expands it too.
        assert!(marked.starts_with("    return x\n"));
        assert!(marked.ends_with("           ^\n"));
    }

    #[test]
    fn render_includes_path_line_and_col() {
        let (sources, file) = session_with("var a = b\n");
        let diag = Diagnostic::error(Category::UnresolvedName, "Cannot resolve `b`")
            .at(Position::new(file, 1, 9));
        let rendered = diag.render(&sources);
        assert!(rendered.starts_with("error: [main.ku:1:9] Cannot resolve `b`\n"));
        assert!(rendered.contains("var a = b\n"));
    }

    #[test]
    fn exit_codes_are_distinct_per_class() {
        assert_eq!(Category::ImportCycle.exit_code().code(), 1);
        assert_eq!(Category::Parse.exit_code().code(), 2);
        assert_eq!(Category::TypeMismatch.exit_code().code(), 3);
    }

    #[test]
    fn mark_span_covers_multi_character_region() {
        let (sources, file) = session_with("use a.b\n");
        let span = Span {
            start: Position::new(file, 1, 5),
            end: Position::new(file, 1, 8),
        };
        let marked = sources.get(file).unwrap().mark_span(span);
        assert_eq!(marked, "use a.b\n    ~~~\n");
    }
}
