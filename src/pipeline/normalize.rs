//! Deterministic cleanup of raw OCR text.
//!
//! Engines disagree on line endings, leave trailing spaces, split words
//! across lines with a hyphen, and emit zero-width characters that break
//! term matching downstream. Each rule below is a pure `&str → String` pass.
//!
//! ## Rule order
//!
//! Line endings are normalised first so later rules only see `\n`. Hyphen
//! rejoining runs after trailing-whitespace trimming so `"bron-  \nchitis"`
//! is caught, and invisible characters are stripped before blank lines are
//! collapsed so a line holding only a zero-width space counts as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every normalisation rule to one page of OCR output.
///
/// 1. Strip an outer code fence (vision models sometimes add one)
/// 2. CRLF / CR → LF
/// 3. Trim trailing whitespace per line
/// 4. Rejoin words hyphenated across a line break
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Collapse runs of blank lines to a single blank line
/// 7. Exactly one final newline; empty text stays empty
pub fn normalize_text(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = rejoin_hyphenated(&s);
    let s = remove_invisible_chars(&s);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Strip outer code fence ───────────────────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-z]*\n(.*)\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Rejoin hyphenated line breaks ────────────────────────────────────

// Only when a lower-case letter continues the word, so "Type-\nII" and list
// dashes are left alone.
static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\p{L})-\n[ \t]*(\p{Ll})").unwrap());

fn rejoin_hyphenated(input: &str) -> String {
    RE_HYPHEN_BREAK.replace_all(input, "$1$2").into_owned()
}

// ── Rule 5: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{000C}',
        ],
        "",
    )
}

// ── Rule 6: Collapse blank lines ─────────────────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").into_owned()
}

// ── Rule 7: Final newline ────────────────────────────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}
