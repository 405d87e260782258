//! Line-render normalization for captured command output.
//!
//! Terminal programs that draw progress bars rewrite the current line with a
//! bare carriage return. A human only ever sees the final state of such a
//! line, so before captured output is handed back to the caller it is reduced
//! to exactly that: every CR-overwritten frame collapses to the last write on
//! its line, while CRLF stays an ordinary line terminator.

/// Collapse carriage-return overwrites into final-state lines.
///
/// Rules:
/// - `\n` terminates the current logical line.
/// - `\r\n` is a single line terminator, not an overwrite.
/// - a bare `\r` resets the current logical line to empty; whatever is
///   written afterwards replaces it.
///
/// The transform is deterministic and idempotent on text that contains no
/// carriage returns.
pub fn normalize_render(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut line = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => {
                out.push_str(&line);
                out.push('\n');
                line.clear();
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                    out.push_str(&line);
                    out.push('\n');
                    line.clear();
                } else {
                    // Cursor returned to column zero: the line starts over.
                    line.clear();
                }
            }
            _ => line.push(ch),
        }
    }

    out.push_str(&line);
    out
}

/// Strip ANSI escape codes from text.
/// Removes color codes, cursor movements, and other terminal control
/// sequences so that text fed back to the model is plain.
pub fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next(); // consume '['
                // Skip until we hit a letter (CSI sequence terminator)
                while let Some(&next_ch) = chars.peek() {
                    chars.next();
                    if next_ch.is_ascii_alphabetic() {
                        break;
                    }
                }
            } else if chars.peek() == Some(&']') {
                // OSC sequence (e.g. OSC 7 for directory reporting)
                chars.next(); // consume ']'
                // Skip until BEL (\x07) or ST (\x1b\\)
                while let Some(&next_ch) = chars.peek() {
                    chars.next();
                    if next_ch == '\x07' {
                        break;
                    }
                    if next_ch == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next(); // consume '\\'
                        break;
                    }
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
