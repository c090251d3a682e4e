//! Canonical single-line form for text headed to the mesh.

use once_cell::sync::Lazy;
use regex::Regex;

static LINE_BREAKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\n\t]+").expect("static pattern"));

static WHITESPACE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s{2,}").expect("static pattern"));

/// Collapse line endings, newlines and tabs into single spaces, squeeze
/// whitespace runs and trim. Idempotent; applies no length limit.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");
    let single_line = LINE_BREAKS.replace_all(&unified, " ");
    let squeezed = WHITESPACE_RUNS.replace_all(&single_line, " ");
    squeezed.trim().to_string()
}
