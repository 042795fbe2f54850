//! Line-windowed views over an aggregated output buffer, letting a caller
//! page through large logs without re-fetching the whole buffer.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSlice {
    pub slice: String,
    pub total_lines: usize,
    pub total_chars: usize,
}

/// Returns the window `[offset, offset + limit)` of the buffer's lines,
/// clamped to the available range. A trailing newline terminates the final
/// line rather than opening an empty one.
pub fn slice_log_lines(buffer: &str, offset: usize, limit: usize) -> LogSlice {
    let total_chars = buffer.chars().count();
    let mut lines: Vec<&str> = if buffer.is_empty() {
        Vec::new()
    } else {
        buffer.split('\n').collect()
    };
    if lines.last() == Some(&"") {
        lines.pop();
    }
    let total_lines = lines.len();

    let start = offset.min(total_lines);
    let end = start.saturating_add(limit).min(total_lines);
    let slice = lines[start..end].join("\n");

    LogSlice {
        slice,
        total_lines,
        total_chars,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn numbered(count: usize) -> String {
        (1..=count).map(|i| format!("line{i}\n")).collect()
    }

    #[test]
    fn empty_buffer_has_no_lines() {
        let out = slice_log_lines("", 0, 10);
        assert_eq!(out.total_lines, 0);
        assert_eq!(out.total_chars, 0);
        assert_eq!(out.slice, "");
    }

    #[test]
    fn window_respects_offset_and_limit() {
        let buffer = numbered(25);
        let out = slice_log_lines(&buffer, 0, 10);
        assert_eq!(out.total_lines, 25);
        assert_eq!(out.slice.lines().count(), 10);
        assert!(out.slice.starts_with("line1\n"));
        assert!(out.slice.ends_with("line10"));

        let tail = slice_log_lines(&buffer, 20, 10);
        assert_eq!(tail.slice, "line21\nline22\nline23\nline24\nline25");
    }

    #[test]
    fn offset_past_end_yields_empty_window() {
        let buffer = numbered(3);
        let out = slice_log_lines(&buffer, 50, 10);
        assert_eq!(out.slice, "");
        assert_eq!(out.total_lines, 3);
    }

    #[test]
    fn consecutive_windows_reconstruct_the_buffer() {
        let buffer = numbered(25);
        let mut collected = Vec::new();
        let mut offset = 0;
        loop {
            let window = slice_log_lines(&buffer, offset, 7);
            if window.slice.is_empty() {
                break;
            }
            collected.push(window.slice);
            offset += 7;
        }
        let joined = collected.join("\n");
        assert_eq!(format!("{joined}\n"), buffer);
    }

    #[test]
    fn totals_are_stable_across_calls() {
        let buffer = numbered(12);
        let a = slice_log_lines(&buffer, 0, 5);
        let b = slice_log_lines(&buffer, 5, 5);
        assert_eq!(a.total_lines, b.total_lines);
        assert_eq!(a.total_chars, b.total_chars);
    }

    #[test]
    fn unterminated_final_line_counts() {
        let out = slice_log_lines("a\nb\nc", 0, 10);
        assert_eq!(out.total_lines, 3);
        assert_eq!(out.slice, "a\nb\nc");
    }
}
