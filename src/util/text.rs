use std::borrow::Cow;

/// Remove control characters from feed-supplied text.
///
/// ANSI escape sequences (CSI and OSC) are dropped whole; other control
/// characters are dropped individually. Tab, newline, and carriage return
/// survive. Feed text reaches logs and downstream JSON consumers
/// verbatim, so an attacker-controlled title must not be able to smuggle
/// terminal escapes through the engine.
///
/// Returns `Cow::Borrowed` for the common case of clean input.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'));
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.peek() {
                // CSI sequence: skip parameter bytes until the final byte
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC sequence: skip until BEL or ST (ESC \)
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                // Bare ESC: dropped
                _ => {}
            },
            '\t' | '\n' | '\r' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    Cow::Owned(out)
}
