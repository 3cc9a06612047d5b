//! Paragraph-boundary text splitter.
//!
//! The real chunking happens inside the RAG collaborator. This splitter
//! exists so the in-memory indexer reports plausible chunk counts and
//! stores searchable pieces during tests and dry runs.
//!
//! Splitting happens on `\n\n`; paragraphs are packed greedily up to
//! `max_tokens × 4` characters, and a paragraph that is too long on its own
//! is cut at the last newline or space before the limit.

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split `text` into chunks of at most `max_tokens` (approximate) tokens.
///
/// Always returns at least one chunk, even for empty input.
///
/// ```rust
/// use ragbox_core::chunk::split_text;
///
/// let chunks = split_text("Hello world.\n\nSecond paragraph.", 700);
/// assert_eq!(chunks.len(), 1);
/// ```
pub fn split_text(text: &str, max_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let would_be = if buf.is_empty() {
            para.len()
        } else {
            buf.len() + 2 + para.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
        }

        if para.len() > max_chars {
            hard_split(para, max_chars, &mut chunks);
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
    if chunks.is_empty() {
        chunks.push(text.trim().to_string());
    }
    chunks
}

fn hard_split(para: &str, max_chars: usize, chunks: &mut Vec<String>) {
    let mut remaining = para;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            chunks.push(remaining.trim().to_string());
            break;
        }
        let limit = snap_to_char_boundary(remaining, max_chars);
        let cut = remaining[..limit]
            .rfind(|c: char| c == '\n' || c == ' ')
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        // Guarantee progress on a leading multi-byte char wider than the limit.
        let cut = if cut == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            cut
        };
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        remaining = &remaining[cut..];
    }
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
