//! Page-level match rules: which search results to visit, and whether a
//! visited page is about this carrier and about towing.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use towcheck_core::{CompanyRecord, normalize_text};

/// Search engines, caches, and app stores; never evidence of a business.
pub const SKIP_DOMAINS: &[&str] = &[
    "duck.ai",
    "duckduckgo.com",
    "bing.com",
    "google.com",
    "apple.com",
    "apps.apple.com",
    "maps.apple.com",
    "webcache.googleusercontent.com",
];

/// Directory sites that usually carry a street address, best first.
pub const PRIORITY_DOMAINS: &[&str] = &[
    "facebook.com",
    "yellowpages.com",
    "mapquest.com",
    "bbb.org",
    "chamberofcommerce.com",
    "manta.com",
];

/// Phrases that on their own mean the page offers towing.
pub const PRIMARY_TOW_KEYWORDS: &[&str] = &[
    "towing service",
    "tow truck",
    "tow service",
    "we tow",
    "our towing",
    "towing company",
    "wrecker service",
    "flatbed tow",
    "24 hour tow",
    "emergency towing",
    "24/7 towing",
    "local towing",
    "towing rates",
    "tow your",
    "towing needs",
    "professional towing",
    "towing available",
    "heavy duty towing",
    "light duty towing",
    "medium duty towing",
    "roadside assistance",
    "vehicle recovery",
    "accident recovery",
    "jump start",
    "lockout service",
    "winch out",
    "winching",
];

pub const SECONDARY_TOW_KEYWORDS: &[&str] = &["towing", "tow", "wrecker", "wrecking"];

/// "Related listings" boilerplate on directory pages that mentions towing
/// without saying anything about this business.
static FALSE_POSITIVES: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"towing in \w+",
        r"towing near \w+",
        r"towing services in \w+",
        r"\w+ towing companies",
        r"more towing",
        r"related.*towing",
        r"see more.*towing",
        r"other towing",
        r"find towing",
        r"search.*towing",
        r"browse.*towing",
        r"people also viewed.*towing",
        r"you might also like.*towing",
        r"similar.*towing",
    ])
    .expect("false-positive patterns are valid")
});

static STREET_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2,})").expect("street number pattern is valid"));

/// Share of the page that must carry a towing keyword when boilerplate
/// is present.
const LEADING_SHARE: f64 = 0.6;

/// Full state names for two-letter codes, lower-case.
pub fn state_names(code: &str) -> &'static [&'static str] {
    match code.trim().to_ascii_uppercase().as_str() {
        "AL" => &["alabama"],
        "AK" => &["alaska"],
        "AZ" => &["arizona"],
        "AR" => &["arkansas"],
        "CA" => &["california"],
        "CO" => &["colorado"],
        "CT" => &["connecticut"],
        "DE" => &["delaware"],
        "DC" => &["district of columbia", "washington dc"],
        "FL" => &["florida"],
        "GA" => &["georgia"],
        "HI" => &["hawaii"],
        "ID" => &["idaho"],
        "IL" => &["illinois"],
        "IN" => &["indiana"],
        "IA" => &["iowa"],
        "KS" => &["kansas"],
        "KY" => &["kentucky"],
        "LA" => &["louisiana"],
        "ME" => &["maine"],
        "MD" => &["maryland"],
        "MA" => &["massachusetts"],
        "MI" => &["michigan"],
        "MN" => &["minnesota"],
        "MS" => &["mississippi"],
        "MO" => &["missouri"],
        "MT" => &["montana"],
        "NE" => &["nebraska"],
        "NV" => &["nevada"],
        "NH" => &["new hampshire"],
        "NJ" => &["new jersey"],
        "NM" => &["new mexico"],
        "NY" => &["new york"],
        "NC" => &["north carolina"],
        "ND" => &["north dakota"],
        "OH" => &["ohio"],
        "OK" => &["oklahoma"],
        "OR" => &["oregon"],
        "PA" => &["pennsylvania"],
        "RI" => &["rhode island"],
        "SC" => &["south carolina"],
        "SD" => &["south dakota"],
        "TN" => &["tennessee"],
        "TX" => &["texas"],
        "UT" => &["utah"],
        "VT" => &["vermont"],
        "VA" => &["virginia"],
        "WA" => &["washington"],
        "WV" => &["west virginia"],
        "WI" => &["wisconsin"],
        "WY" => &["wyoming"],
        "PR" => &["puerto rico"],
        _ => &[],
    }
}

/// An absolute http(s) URL outside the skipped domains.
pub fn is_candidate_url(url: &str) -> bool {
    if !url.starts_with("http") {
        return false;
    }
    let lower = url.to_lowercase();
    !SKIP_DOMAINS.iter().any(|d| lower.contains(d))
}

/// Rank of a URL: index in [`PRIORITY_DOMAINS`], or 100 for anything else.
pub fn domain_priority(url: &str) -> usize {
    let lower = url.to_lowercase();
    PRIORITY_DOMAINS
        .iter()
        .position(|d| lower.contains(d))
        .unwrap_or(100)
}

/// De-duplicate (first occurrence wins), then stable-sort by priority and
/// keep at most `limit`.
pub fn rank_urls(urls: impl IntoIterator<Item = String>, limit: usize) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for url in urls {
        if !unique.contains(&url) {
            unique.push(url);
        }
    }
    unique.sort_by_key(|u| domain_priority(u));
    unique.truncate(limit);
    unique
}

/// Does the page mention this carrier's physical location?
///
/// Either the city with the ZIP or state name, or the ZIP with the street
/// number (two digits or more).
pub fn address_matches(page_text: &str, record: &CompanyRecord) -> bool {
    let page = normalize_text(page_text);

    let city = normalize_text(record.city_or_empty());
    let city_match = city.len() > 2 && page.contains(&city);

    let state_match = state_names(&record.state)
        .iter()
        .any(|name| page.contains(name));

    let zip: String = record
        .zip
        .as_deref()
        .unwrap_or("")
        .trim()
        .chars()
        .take(5)
        .collect();
    let zip_match =
        zip.len() == 5 && zip.chars().all(|c| c.is_ascii_digit()) && page_text.contains(&zip);

    let street_match = record
        .street
        .as_deref()
        .and_then(|s| STREET_NUMBER.captures(s.trim()))
        .is_some_and(|c| page_text.contains(&c[1]));

    (city_match && (zip_match || state_match)) || (zip_match && street_match)
}

/// Does the page offer towing, as opposed to merely listing other towers?
pub fn mentions_towing(page_text: &str) -> bool {
    let page = page_text.to_lowercase();

    if PRIMARY_TOW_KEYWORDS.iter().any(|kw| page.contains(kw)) {
        return true;
    }
    if !SECONDARY_TOW_KEYWORDS.iter().any(|kw| page.contains(kw)) {
        return false;
    }
    if FALSE_POSITIVES.is_match(&page) {
        let leading = leading_share(&page, LEADING_SHARE);
        return SECONDARY_TOW_KEYWORDS.iter().any(|kw| leading.contains(kw));
    }
    true
}

fn leading_share(text: &str, share: f64) -> &str {
    let mut end = (text.len() as f64 * share) as usize;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
