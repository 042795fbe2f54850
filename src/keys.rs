//! Encodes logical key tokens, hex bytes, and literal text into the raw byte
//! sequences a terminal-attached process expects on stdin.

const BRACKETED_PASTE_START: &[u8] = b"\x1b[200~";
const BRACKETED_PASTE_END: &[u8] = b"\x1b[201~";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedKeys {
    pub data: Vec<u8>,
    pub warnings: Vec<String>,
}

/// Encodes key tokens, hex byte tokens, and a literal string, in that order.
/// Unknown tokens produce a warning but never abort the remaining tokens;
/// partial success is preferred over total failure.
pub fn encode_key_sequence(keys: &[String], hex: &[String], literal: Option<&str>) -> EncodedKeys {
    let mut out = EncodedKeys::default();
    for token in keys {
        match key_bytes(token) {
            Some(bytes) => out.data.extend_from_slice(&bytes),
            None => out.warnings.push(format!("unknown key token: {token}")),
        }
    }
    for token in hex {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        match u8::from_str_radix(digits, 16) {
            Ok(byte) => out.data.push(byte),
            Err(_) => out.warnings.push(format!("invalid hex byte: {token}")),
        }
    }
    if let Some(literal) = literal {
        out.data.extend_from_slice(literal.as_bytes());
    }
    out
}

/// Wraps `text` in bracketed-paste start/end sequences unless disabled.
/// Empty text encodes to nothing regardless of mode.
pub fn encode_paste(text: &str, bracketed: bool) -> Vec<u8> {
    if text.is_empty() {
        return Vec::new();
    }
    if !bracketed {
        return text.as_bytes().to_vec();
    }
    let mut out = Vec::with_capacity(text.len() + 12);
    out.extend_from_slice(BRACKETED_PASTE_START);
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(BRACKETED_PASTE_END);
    out
}

/// Canonical escape sequences for the closed set of logical key names.
/// Control chords accept both `C-x` and `Ctrl+X` spellings.
fn key_bytes(token: &str) -> Option<Vec<u8>> {
    if let Some(byte) = control_chord(token) {
        return Some(vec![byte]);
    }
    let bytes: &[u8] = match token.to_ascii_lowercase().as_str() {
        "enter" | "return" | "cr" => b"\r",
        "newline" | "lf" => b"\n",
        "tab" => b"\t",
        "escape" | "esc" => b"\x1b",
        "space" => b" ",
        "backspace" => b"\x7f",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "insert" => b"\x1b[2~",
        "delete" => b"\x1b[3~",
        "pageup" => b"\x1b[5~",
        "pagedown" => b"\x1b[6~",
        "f1" => b"\x1bOP",
        "f2" => b"\x1bOQ",
        "f3" => b"\x1bOR",
        "f4" => b"\x1bOS",
        "f5" => b"\x1b[15~",
        "f6" => b"\x1b[17~",
        "f7" => b"\x1b[18~",
        "f8" => b"\x1b[19~",
        "f9" => b"\x1b[20~",
        "f10" => b"\x1b[21~",
        "f11" => b"\x1b[23~",
        "f12" => b"\x1b[24~",
        _ => return None,
    };
    Some(bytes.to_vec())
}

fn control_chord(token: &str) -> Option<u8> {
    let suffix = token
        .strip_prefix("C-")
        .or_else(|| token.strip_prefix("c-"))
        .or_else(|| token.strip_prefix("Ctrl+"))
        .or_else(|| token.strip_prefix("ctrl+"))?;
    let mut chars = suffix.chars();
    let ch = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    let lower = ch.to_ascii_lowercase();
    if lower.is_ascii_lowercase() {
        Some(lower as u8 - b'a' + 1)
    } else {
        None
    }
}
