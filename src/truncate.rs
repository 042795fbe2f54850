//! Bounds a text blob to a maximum character budget while keeping head and
//! tail context, so large process buffers never land in a result verbatim.

const NOTE_RESERVE_CHARS: usize = 160;
const MIN_AVAILABLE_CHARS: usize = 200;
const MIN_SLICE_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedOutput {
    pub text: String,
    pub truncated: bool,
    pub original_chars: usize,
}

/// Truncates `text` to roughly `max_chars` characters. Texts under the budget
/// pass through unchanged. Otherwise the result is a head slice, a `...`
/// separator, a tail slice, and a note stating the original character count.
/// Head and tail keep a minimum size so small budgets still show both ends.
pub fn truncate_output(text: &str, max_chars: usize) -> TruncatedOutput {
    let original_chars = text.chars().count();
    if original_chars <= max_chars {
        return TruncatedOutput {
            text: text.to_string(),
            truncated: false,
            original_chars,
        };
    }

    let available = max_chars
        .saturating_sub(NOTE_RESERVE_CHARS)
        .max(MIN_AVAILABLE_CHARS);
    let head_chars = (available / 2).max(MIN_SLICE_CHARS);
    let tail_chars = (available - head_chars).max(MIN_SLICE_CHARS);

    let head: String = text.chars().take(head_chars).collect();
    let tail: String = text
        .chars()
        .skip(original_chars.saturating_sub(tail_chars))
        .collect();
    let note = format!("\n\n[process output truncated: {original_chars} chars total]");

    TruncatedOutput {
        text: format!("{head}\n...\n{tail}{note}"),
        truncated: true,
        original_chars,
    }
}

/// Middle-truncates a single-line label, keeping the start and end.
pub(crate) fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let head = keep / 2;
    let tail = keep - head;
    let front: String = text.chars().take(head).collect();
    let back: String = text.chars().skip(total - tail).collect();
    format!("{front}…{back}")
}
