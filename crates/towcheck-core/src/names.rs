//! Company-name and free-text normalisation.
//!
//! Census names are upper-case legal names with corporate suffixes
//! ("ACME TOWING & RECOVERY, INC."). Search engines and directory sites list
//! the same business as "Acme Towing and Recovery", so names are cleaned
//! before being used as search terms and page text is normalised before
//! substring matching.

use std::sync::LazyLock;

use regex::Regex;

static SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INC|LLC|CORP|CO|LTD|INCORPORATED|CORPORATION)\.?\b")
        .expect("suffix pattern is valid")
});

static NON_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s']").expect("name char pattern is valid"));

static NON_TEXT_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("text char pattern is valid"));

static TOW_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(tow|towing|tows|towed|wrecker|wrecking)\b")
        .expect("tow word pattern is valid")
});

/// Clean a company name for use as a search term.
///
/// 1. Drop corporate suffixes (INC, LLC, CORP, CO, LTD, INCORPORATED, CORPORATION)
/// 2. `&` → `and`
/// 3. Replace punctuation other than apostrophes with spaces
/// 4. Collapse whitespace
///
/// Returns `None` when nothing is left.
pub fn clean_company_name(name: &str) -> Option<String> {
    let name = SUFFIX.replace_all(name, "");
    let name = name.replace('&', "and");
    let name = NON_NAME_CHARS.replace_all(&name, " ");
    let cleaned = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Lower-case and strip punctuation for substring comparison.
pub fn normalize_text(text: &str) -> String {
    NON_TEXT_CHARS
        .replace_all(&text.to_lowercase(), "")
        .trim()
        .to_string()
}

/// True when the legal or DBA name contains a whole towing word.
pub fn has_tow_in_name(legal_name: &str, dba_name: Option<&str>) -> bool {
    TOW_WORD.is_match(legal_name) || dba_name.is_some_and(|dba| TOW_WORD.is_match(dba))
}
