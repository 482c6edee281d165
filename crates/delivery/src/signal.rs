//! Markdown to Signal styled-text conversion.
//!
//! Signal takes plain text plus style ranges instead of markup, so the
//! generic chunker is bypassed entirely: markdown is converted to
//! `(text, styles)` tuples here, then split with ranges recomputed per
//! chunk. Range offsets are Unicode scalar counts.

use herald_channels::{StyleRange, StyledText, TextStyle};
use herald_config::MarkdownTableMode;

/// Incrementally builds styled text, tracking char offsets.
#[derive(Default)]
struct Builder {
    text: String,
    chars: usize,
    styles: Vec<StyleRange>,
}

impl Builder {
    fn push_char(&mut self, c: char) {
        self.text.push(c);
        self.chars += 1;
    }

    fn push_str(&mut self, s: &str) {
        self.text.push_str(s);
        self.chars += s.chars().count();
    }

    fn mark(&mut self, start: usize, style: TextStyle) {
        let length = self.chars - start;
        if length > 0 {
            self.styles.push(StyleRange {
                start,
                length,
                style,
            });
        }
    }

    fn finish(self) -> StyledText {
        StyledText {
            text: self.text,
            styles: self.styles,
        }
    }
}

/// Convert markdown into Signal styled text.
///
/// Handles bold/italic/strikethrough/inline-code spans, `#` headings
/// (rendered bold), fenced code blocks (monospace), and markdown tables
/// per `table_mode`. Unclosed markers are kept as literal text.
#[must_use]
pub fn markdown_to_styled(markdown: &str, table_mode: MarkdownTableMode) -> StyledText {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut b = Builder::default();
    let mut i = 0;

    while i < lines.len() {
        if i > 0 {
            b.push_char('\n');
        }
        let line = lines[i];
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            let marker = &trimmed[..3];
            let end = lines[i + 1..]
                .iter()
                .position(|l| l.trim_start().starts_with(marker))
                .map(|p| i + 1 + p);
            let body_end = end.unwrap_or(lines.len());
            let start = b.chars;
            for (n, body_line) in lines[i + 1..body_end].iter().enumerate() {
                if n > 0 {
                    b.push_char('\n');
                }
                b.push_str(body_line);
            }
            b.mark(start, TextStyle::Monospace);
            i = end.map_or(lines.len(), |e| e + 1);
            continue;
        }

        if is_table_start(&lines[i..]) {
            let rows = lines[i..]
                .iter()
                .take_while(|l| is_table_row(l))
                .copied()
                .collect::<Vec<_>>();
            render_table(&rows, table_mode, &mut b);
            i += rows.len();
            continue;
        }

        if let Some(heading) = trimmed.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim_start();
            let start = b.chars;
            scan_inline(heading, &mut b);
            b.mark(start, TextStyle::Bold);
            i += 1;
            continue;
        }

        scan_inline(line, &mut b);
        i += 1;
    }

    b.finish()
}

fn is_table_row(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

/// A table needs a header row followed by a separator row.
fn is_table_start(lines: &[&str]) -> bool {
    lines.len() >= 2 && is_table_row(lines[0]) && is_table_row(lines[1]) && is_separator_row(lines[1])
}

fn render_table(rows: &[&str], mode: MarkdownTableMode, b: &mut Builder) {
    match mode {
        MarkdownTableMode::CodeBlock => {
            let start = b.chars;
            for (n, row) in rows.iter().enumerate() {
                if n > 0 {
                    b.push_char('\n');
                }
                b.push_str(row.trim());
            }
            b.mark(start, TextStyle::Monospace);
        },
        MarkdownTableMode::Plain => {
            let mut first = true;
            for row in rows {
                if is_separator_row(row) {
                    continue;
                }
                if !first {
                    b.push_char('\n');
                }
                first = false;
                let cells: Vec<&str> = row
                    .trim()
                    .trim_matches('|')
                    .split('|')
                    .map(str::trim)
                    .collect();
                b.push_str(&cells.join("  "));
            }
        },
    }
}

/// Scan one line for inline markers, appending converted text to `b`.
///
/// Nested styles work (`**bold with *italic***` marks both ranges);
/// inline code is verbatim, never re-scanned.
fn scan_inline(line: &str, b: &mut Builder) {
    let chars: Vec<char> = line.chars().collect();
    scan_chars(&chars, b);
}

fn scan_chars(chars: &[char], b: &mut Builder) {
    let mut i = 0;
    while i < chars.len() {
        if let Some((marker, style)) = marker_at(chars, i) {
            if let Some(close) = find_marker(chars, i + marker.len(), marker) {
                let start = b.chars;
                if style == TextStyle::Monospace {
                    for &c in &chars[i + marker.len()..close] {
                        b.push_char(c);
                    }
                } else {
                    scan_chars(&chars[i + marker.len()..close], b);
                }
                b.mark(start, style);
                i = close + marker.len();
                continue;
            }
        }
        b.push_char(chars[i]);
        i += 1;
    }
}

/// Marker starting at position `i`, longest first so `**` beats `*`.
fn marker_at(chars: &[char], i: usize) -> Option<(&'static [char], TextStyle)> {
    const BOLD: &[char] = &['*', '*'];
    const STRIKE: &[char] = &['~', '~'];
    const ITALIC_STAR: &[char] = &['*'];
    const ITALIC_UNDER: &[char] = &['_'];
    const CODE: &[char] = &['`'];

    let rest = &chars[i..];
    if rest.starts_with(BOLD) {
        Some((BOLD, TextStyle::Bold))
    } else if rest.starts_with(STRIKE) {
        Some((STRIKE, TextStyle::Strikethrough))
    } else if rest.starts_with(CODE) {
        Some((CODE, TextStyle::Monospace))
    } else if rest.starts_with(ITALIC_STAR) {
        Some((ITALIC_STAR, TextStyle::Italic))
    } else if rest.starts_with(ITALIC_UNDER) {
        Some((ITALIC_UNDER, TextStyle::Italic))
    } else {
        None
    }
}

fn find_marker(chars: &[char], from: usize, marker: &[char]) -> Option<usize> {
    let mut i = from;
    while i + marker.len() <= chars.len() {
        if chars[i..].starts_with(marker) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Convert and chunk markdown for Signal.
///
/// With no limit the conversion runs unbounded and produces one chunk.
/// Splits prefer newline/space boundaries; style ranges are recomputed
/// relative to each chunk.
#[must_use]
pub fn chunk_styled(
    markdown: &str,
    limit: Option<usize>,
    table_mode: MarkdownTableMode,
) -> Vec<StyledText> {
    let styled = markdown_to_styled(markdown, table_mode);
    match limit {
        None => vec![styled],
        Some(limit) => split_styled(&styled, limit),
    }
}

fn split_styled(styled: &StyledText, limit: usize) -> Vec<StyledText> {
    if limit == 0 || styled.text.len() <= limit {
        return vec![styled.clone()];
    }

    let chars: Vec<char> = styled.text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let mut bytes = 0usize;
        let mut end = start;
        let mut last_break = None;
        while end < chars.len() {
            let c = chars[end];
            if bytes + c.len_utf8() > limit {
                break;
            }
            bytes += c.len_utf8();
            end += 1;
            if c == '\n' || c == ' ' {
                last_break = Some(end - 1);
            }
        }
        if end == chars.len() {
            pieces.push((start, end));
            break;
        }
        // Prefer the last whitespace inside the window; skip the separator.
        match last_break {
            Some(brk) if brk > start => {
                pieces.push((start, brk));
                start = brk + 1;
            },
            _ => {
                // No break point; hard cut (but always take one char).
                let cut = end.max(start + 1);
                pieces.push((start, cut));
                start = cut;
            },
        }
    }

    pieces
        .into_iter()
        .map(|(lo, hi)| slice_styled(styled, &chars, lo, hi))
        .collect()
}

fn slice_styled(styled: &StyledText, chars: &[char], lo: usize, hi: usize) -> StyledText {
    let text: String = chars[lo..hi].iter().collect();
    let styles = styled
        .styles
        .iter()
        .filter_map(|r| {
            let rs = r.start.max(lo);
            let re = (r.start + r.length).min(hi);
            (rs < re).then_some(StyleRange {
                start: rs - lo,
                length: re - rs,
                style: r.style,
            })
        })
        .collect();
    StyledText { text, styles }
}
