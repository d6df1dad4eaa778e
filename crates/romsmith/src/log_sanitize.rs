use std::sync::LazyLock;

use regex::Regex;

const MAX_LOG_CHARS: usize = 4096;

// CSI (`ESC [ ... final`), OSC (`ESC ] ... BEL|ST`), DCS/SOS/PM/APC (`ESC P ... ST`),
// then any other two-byte escape.
static ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[PX^_][^\x1b]*\x1b\\|\x1b.?",
    )
    .expect("escape regex must compile")
});

/// Strips terminal escape sequences and control characters from one line of tool
/// output. `repo sync` and the build system both redraw progress lines with them.
pub fn sanitize_log_line(input: &str) -> String {
    let stripped = ESCAPES.replace_all(input, "");
    let mut out = String::with_capacity(stripped.len().min(MAX_LOG_CHARS));
    let mut count = 0usize;
    for c in stripped.chars() {
        if count >= MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
        match c {
            '\t' => out.push(' '),
            c if c.is_control() || is_bidi_control(c) => continue,
            c => out.push(c),
        }
        count += 1;
    }
    out
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{061C}' | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}
