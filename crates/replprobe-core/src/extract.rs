//! Newline framing of captured output.

/// Split `buf` into at most `cap` lines.
///
/// Each `\n` closes one line made of the bytes since the previous `\n` (or
/// the start of the buffer), delimiter excluded. A trailing segment with no
/// terminating `\n` is not emitted. Scanning stops as soon as `cap` lines
/// have been produced.
pub fn extract_lines(buf: &[u8], cap: usize) -> Vec<String> {
    let mut lines = Vec::with_capacity(cap.min(64));
    let mut start = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if lines.len() >= cap {
            break;
        }
        if byte == b'\n' {
            lines.push(String::from_utf8_lossy(&buf[start..i]).into_owned());
            start = i + 1;
        }
    }

    lines
}

/// Count the complete (newline-terminated) lines in `buf`, ignoring any cap.
pub fn count_lines(buf: &[u8]) -> usize {
    buf.iter().filter(|&&b| b == b'\n').count()
}
