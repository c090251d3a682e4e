//! Detection of mesh-side reaction echoes.
//!
//! Some mesh clients send an emoji reaction as ordinary channel text:
//!
//! ```text
//! [label ":"] pictograph [FE0F | ZWJ pictograph]* "@[" name "]" hash8
//! ```
//!
//! e.g. `😀@[Some User]xp8q7fcc`. These are noise on the Discord side and
//! are never relayed.

use once_cell::sync::Lazy;
use regex::Regex;

static REACTION_ECHO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^\s*",
        r"(?:.*?:\s*)?",
        r"\p{Extended_Pictographic}(?:\x{FE0F}|\x{200D}\p{Extended_Pictographic})*",
        r"@\[[^\]]*\]",
        r"\s*[a-z0-9]{8}\s*$",
    ))
    .expect("static pattern")
});

/// True when `text` is a reaction echo that must not be relayed.
pub fn is_reaction_echo(text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    REACTION_ECHO.is_match(&text.replace("\r\n", "\n"))
}
