//! # Chunk Encoding
//!
//! Splits normalized text into units that fit the mesh's per-message byte
//! budget.
//!
//! ```text
//! text.len() <= L          ──►  Single(text)             (no suffix)
//!
//! text.len() >  L
//!   1. reserve W = len(" 99/99"), wrap at L - W on whitespace
//!      (hard cut when the break would fall before 40% of the width)
//!   2. n = chunk count; if len(" n/n") != W, wrap again with that width
//!   3. append " i/n"; truncate any payload that still overflows
//!                          ──►  Parts([payload + " i/n", ...])
//! ```
//!
//! Lengths are UTF-8 byte lengths. Cuts never split a character.

/// Worst-case suffix width reserved on the first wrap: `" 99/99"`.
pub const SUFFIX_RESERVE: usize = 6;

/// Whitespace breaks earlier than this fraction of the payload width are
/// ignored in favour of a hard cut.
const MIN_BREAK_RATIO: f64 = 0.4;

/// Upper bound on suffix-width reconciliation passes.
const MAX_PASSES: usize = 4;

/// One numbered segment of a multi-part message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub payload: String,
    /// 1-based position.
    pub part: usize,
    pub total: usize,
}

impl Chunk {
    /// The unit as transmitted: payload followed by `" part/total"`.
    pub fn render(&self) -> String {
        format!("{}{}", self.payload, suffix(self.part, self.total))
    }
}

/// The transmission plan for one logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEnvelope {
    /// Nothing to send.
    Empty,
    /// The text fits as-is and is sent without a positional suffix.
    Single(String),
    Parts(Vec<Chunk>),
}

impl ChunkEnvelope {
    /// Encode already-normalized text for a unit budget of `max_len` bytes.
    ///
    /// Every rendered unit is at most `max_len` bytes as long as `max_len`
    /// exceeds the widest suffix, which config validation guarantees.
    pub fn encode(text: &str, max_len: usize) -> Self {
        if text.is_empty() {
            return ChunkEnvelope::Empty;
        }
        if text.len() <= max_len {
            return ChunkEnvelope::Single(text.to_string());
        }

        let mut width = SUFFIX_RESERVE;
        let mut payloads = split_by_max_len(text, payload_width(max_len, width));

        for _ in 0..MAX_PASSES {
            let actual = suffix_width(payloads.len());
            if actual == width {
                break;
            }
            width = actual;
            payloads = split_by_max_len(text, payload_width(max_len, width));
        }

        if payloads.is_empty() {
            return ChunkEnvelope::Empty;
        }

        let total = payloads.len();
        let chunks = payloads
            .into_iter()
            .enumerate()
            .map(|(i, mut payload)| {
                let part = i + 1;
                let allowed = max_len.saturating_sub(suffix(part, total).len());
                if payload.len() > allowed {
                    let cut = floor_char_boundary(&payload, allowed);
                    payload.truncate(cut);
                }
                Chunk {
                    payload,
                    part,
                    total,
                }
            })
            .collect();

        ChunkEnvelope::Parts(chunks)
    }

    /// Rendered units in transmission order.
    pub fn units(&self) -> Vec<String> {
        match self {
            ChunkEnvelope::Empty => Vec::new(),
            ChunkEnvelope::Single(text) => vec![text.clone()],
            ChunkEnvelope::Parts(chunks) => chunks.iter().map(Chunk::render).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ChunkEnvelope::Empty => 0,
            ChunkEnvelope::Single(_) => 1,
            ChunkEnvelope::Parts(chunks) => chunks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn suffix(part: usize, total: usize) -> String {
    format!(" {}/{}", part, total)
}

fn suffix_width(total: usize) -> usize {
    suffix(total, total).len()
}

fn payload_width(max_len: usize, reserve: usize) -> usize {
    max_len.saturating_sub(reserve).max(1)
}

/// Largest char boundary in `s` that is `<= index`.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Greedy whitespace-aware wrap into pieces of at most `max` bytes.
fn split_by_max_len(text: &str, max: usize) -> Vec<String> {
    let max = max.max(1);
    let min_break = (max as f64 * MIN_BREAK_RATIO).floor() as usize;
    let mut out = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= max {
            out.push(rest.to_string());
            break;
        }

        let end = floor_char_boundary(rest, max);
        let mut cut = match rest[..end].rfind(char::is_whitespace) {
            Some(i) if i >= min_break => i,
            _ => end,
        };
        // A single character wider than the budget still has to move forward.
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }

        out.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }

    out.retain(|piece| !piece.is_empty());
    out
}
