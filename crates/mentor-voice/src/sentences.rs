//! Sentence segmentation for reply text.
//!
//! A reply is cut after every run of terminal punctuation (`.`, `!`, `?`), so
//! "Wait?! Really..." yields `["Wait?!", "Really..."]`. Trailing text without a
//! terminator is its own segment. Segments are trimmed; empty ones are dropped.

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Split `text` into sentence segments in reading order.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }
        let next_is_terminal = chars.peek().map(|&(_, n)| is_terminal(n)).unwrap_or(false);
        if next_is_terminal {
            continue;
        }
        let end = i + c.len_utf8();
        push_trimmed(&mut segments, &text[start..end]);
        start = end;
    }
    push_trimmed(&mut segments, &text[start..]);
    segments
}

fn push_trimmed(out: &mut Vec<String>, segment: &str) {
    let segment = segment.trim();
    if !segment.is_empty() {
        out.push(segment.to_string());
    }
}
