//! Maps TOML parse and type errors back to line/column positions in the
//! config file, and renders them with a source excerpt.

use std::fmt::Write;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPosition {
    pub line: usize,
    pub column: usize,
}

/// Text range in 1-based line/column coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start: TextPosition,
    pub end: TextPosition,
}

impl Default for TextRange {
    fn default() -> Self {
        let position = TextPosition { line: 1, column: 1 };
        Self {
            start: position,
            end: position,
        }
    }
}

pub(crate) fn range_for_toml_error(contents: &str, err: &toml::de::Error) -> TextRange {
    err.span()
        .map(|span| text_range_from_span(contents, span))
        .unwrap_or_default()
}

fn text_range_from_span(contents: &str, span: Range<usize>) -> TextRange {
    let start = position_for_offset(contents, span.start);
    let end_index = if span.end > span.start {
        span.end - 1
    } else {
        span.end
    };
    let end = position_for_offset(contents, end_index);
    TextRange { start, end }
}

fn position_for_offset(contents: &str, index: usize) -> TextPosition {
    let bytes = contents.as_bytes();
    if bytes.is_empty() {
        return TextPosition { line: 1, column: 1 };
    }

    let index = index.min(bytes.len() - 1);
    let line_start = bytes[..index]
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |pos| pos + 1);
    let line = bytes[..line_start]
        .iter()
        .filter(|byte| **byte == b'\n')
        .count();
    // Columns count characters, not bytes.
    let column = String::from_utf8_lossy(&bytes[line_start..index])
        .chars()
        .count();

    TextPosition {
        line: line + 1,
        column: column + 1,
    }
}

/// Render `message` at `range` with the offending source line underlined.
pub fn format_config_error(
    path: &std::path::Path,
    range: TextRange,
    message: &str,
    contents: &str,
) -> String {
    let mut output = String::new();
    let start = range.start;
    let _ = writeln!(
        output,
        "{}:{}:{}: {message}",
        path.display(),
        start.line,
        start.column
    );

    let Some(line) = contents.lines().nth(start.line.saturating_sub(1)) else {
        return output.trim_end().to_string();
    };
    let line = line.trim_end_matches('\r');

    let line_number = start.line;
    let gutter = line_number.to_string().len();
    let highlight_len = if range.end.line == start.line && range.end.column >= start.column {
        range.end.column - start.column + 1
    } else {
        1
    };
    let spaces = " ".repeat(start.column.saturating_sub(1));
    let carets = "^".repeat(highlight_len);
    let _ = writeln!(output, "{:width$} |", "", width = gutter);
    let _ = writeln!(output, "{line_number:>gutter$} | {line}");
    let _ = writeln!(output, "{:width$} | {spaces}{carets}", "", width = gutter);
    output.trim_end().to_string()
}
