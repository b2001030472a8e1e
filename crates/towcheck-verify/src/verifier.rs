use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use towcheck_core::{CompanyRecord, Evidence, Verdict, clean_company_name, has_tow_in_name};
use tracing::{debug, info};

use crate::error::VerifyError;
use crate::matching::{address_matches, mentions_towing, rank_urls};
use crate::search::{DEFAULT_SEARCH_URL, SearchClient};

/// Results from the exact query below which the broad query also runs.
const BROAD_QUERY_THRESHOLD: usize = 5;

/// Outcome of one existence check.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub verdict: Verdict,
    pub evidence: Option<Evidence>,
    /// False when the verdict was reached offline (name approval), so no
    /// pacing delay is owed.
    pub used_network: bool,
}

impl Verification {
    pub fn positive(evidence: Evidence, used_network: bool) -> Self {
        Self {
            verdict: Verdict::Positive,
            evidence: Some(evidence),
            used_network,
        }
    }

    pub fn negative() -> Self {
        Self {
            verdict: Verdict::Negative,
            evidence: None,
            used_network: true,
        }
    }

    pub fn inconclusive() -> Self {
        Self {
            verdict: Verdict::Inconclusive,
            evidence: None,
            used_network: true,
        }
    }
}

/// Decides whether a carrier is an operating towing business.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, record: &CompanyRecord) -> Result<Verification, VerifyError>;
}

#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Approve carriers whose own name contains a towing word.
    pub name_approval: bool,
    pub search_url: String,
    /// Result pages fetched per search name.
    pub max_urls: usize,
    pub request_timeout: Duration,
    /// Random pause between the exact and broad query.
    pub query_delay: (Duration, Duration),
    /// Pause before each result page fetch.
    pub page_delay: Duration,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            name_approval: true,
            search_url: DEFAULT_SEARCH_URL.to_string(),
            max_urls: 10,
            request_timeout: Duration::from_secs(12),
            query_delay: (Duration::from_secs(2), Duration::from_secs(4)),
            page_delay: Duration::from_millis(500),
        }
    }
}

/// Production verifier: name approval, then web search and page matching.
pub struct WebVerifier {
    search: SearchClient,
    settings: VerifierSettings,
}

impl WebVerifier {
    pub fn new(settings: VerifierSettings) -> Result<Self, VerifyError> {
        let search = SearchClient::new(&settings.search_url, settings.request_timeout)?;
        Ok(Self { search, settings })
    }

    /// Search one name and return the first matching page.
    async fn find_match(
        &self,
        record: &CompanyRecord,
        name: &str,
    ) -> Result<Option<String>, VerifyError> {
        let (exact, broad) = queries(name, record);

        let mut urls = self.search.search(&exact).await?;
        if urls.len() < BROAD_QUERY_THRESHOLD {
            pause(self.settings.query_delay).await;
            urls.extend(self.search.search(&broad).await?);
        }
        if urls.is_empty() {
            debug!(dot_number = record.dot_number, name, "no search results");
            return Ok(None);
        }

        let ranked = rank_urls(urls, self.settings.max_urls);
        debug!(dot_number = record.dot_number, name, count = ranked.len(), "checking result pages");

        for url in ranked {
            tokio::time::sleep(self.settings.page_delay).await;
            let Some(text) = self.search.fetch_text(&url).await else {
                continue;
            };
            if !address_matches(&text, record) {
                debug!(url = %url, "address mismatch");
                continue;
            }
            if !mentions_towing(&text) {
                debug!(url = %url, "address ok, no towing mention");
                continue;
            }
            debug!(url = %url, "match");
            return Ok(Some(url));
        }
        Ok(None)
    }
}

#[async_trait]
impl Verifier for WebVerifier {
    async fn verify(&self, record: &CompanyRecord) -> Result<Verification, VerifyError> {
        if self.settings.name_approval
            && let Some(name) = towing_name(record)
        {
            info!(dot_number = record.dot_number, name, "approved by name");
            return Ok(Verification::positive(Evidence::name_match(name), false));
        }

        for name in search_names(record) {
            if let Some(url) = self.find_match(record, &name).await? {
                return Ok(Verification::positive(Evidence::website(url, name), true));
            }
        }
        Ok(Verification::negative())
    }
}

/// The legal or DBA name carrying a towing word, if either does.
pub fn towing_name(record: &CompanyRecord) -> Option<&str> {
    if has_tow_in_name(&record.legal_name, None) {
        return Some(&record.legal_name);
    }
    record
        .dba_name
        .as_deref()
        .filter(|dba| has_tow_in_name(dba, None))
}

/// Cleaned legal name, then the cleaned DBA name when it differs.
pub fn search_names(record: &CompanyRecord) -> Vec<String> {
    let mut names: Vec<String> = clean_company_name(&record.legal_name).into_iter().collect();
    if let Some(dba) = record.dba_name.as_deref().and_then(clean_company_name)
        && !names.contains(&dba)
    {
        names.push(dba);
    }
    names
}

/// Exact (quoted) and broad query for a name in the carrier's city.
pub fn queries(name: &str, record: &CompanyRecord) -> (String, String) {
    let place = format!("{} {}", record.city_or_empty(), record.state);
    let place = place.split_whitespace().collect::<Vec<_>>().join(" ");
    (
        format!("\"{name}\" {place}").trim().to_string(),
        format!("{name} {place}").trim().to_string(),
    )
}

async fn pause((min, max): (Duration, Duration)) {
    let delay = if max > min {
        rand::rng().random_range(min..=max)
    } else {
        min
    };
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CompanyRecord {
        let mut r = CompanyRecord::new(42, "SMITH ENTERPRISES LLC", "MA");
        r.city = Some("Worcester".into());
        r
    }

    #[test]
    fn search_names_cleaned_and_distinct() {
        let mut r = record();
        assert_eq!(search_names(&r), vec!["SMITH ENTERPRISES"]);

        r.dba_name = Some("SMITH ENTERPRISES, INC.".into());
        assert_eq!(search_names(&r), vec!["SMITH ENTERPRISES"]);

        r.dba_name = Some("CENTRAL MASS RECOVERY".into());
        assert_eq!(
            search_names(&r),
            vec!["SMITH ENTERPRISES", "CENTRAL MASS RECOVERY"]
        );
    }

    #[test]
    fn search_names_empty_when_nothing_left() {
        let r = CompanyRecord::new(1, "LLC", "MA");
        assert!(search_names(&r).is_empty());
    }

    #[test]
    fn query_forms() {
        let (exact, broad) = queries("SMITH ENTERPRISES", &record());
        assert_eq!(exact, "\"SMITH ENTERPRISES\" Worcester MA");
        assert_eq!(broad, "SMITH ENTERPRISES Worcester MA");

        let no_city = CompanyRecord::new(1, "X", "NH");
        assert_eq!(queries("X", &no_city).0, "\"X\" NH");
    }

    #[test]
    fn towing_name_prefers_legal() {
        let mut r = record();
        assert_eq!(towing_name(&r), None);
        r.dba_name = Some("SMITH TOWING".into());
        assert_eq!(towing_name(&r), Some("SMITH TOWING"));
        r.legal_name = "SMITH WRECKER SERVICE".into();
        assert_eq!(towing_name(&r), Some("SMITH WRECKER SERVICE"));
    }

    #[tokio::test]
    async fn name_approval_needs_no_network() {
        let settings = VerifierSettings {
            // Nothing listens here; any request would fail.
            search_url: "http://127.0.0.1:9/html/".into(),
            ..VerifierSettings::default()
        };
        let verifier = WebVerifier::new(settings).unwrap();

        let mut r = record();
        r.dba_name = Some("SMITH TOWING".into());
        let v = verifier.verify(&r).await.unwrap();
        assert_eq!(v.verdict, Verdict::Positive);
        assert!(!v.used_network);
        assert_eq!(v.evidence.unwrap().website_column(), "AUTO_APPROVED");
    }

    #[test]
    fn verification_constructors() {
        assert_eq!(Verification::negative().verdict, Verdict::Negative);
        assert!(Verification::inconclusive().evidence.is_none());
        let v = Verification::positive(Evidence::website("https://a.example/", "A"), true);
        assert_eq!(v.verdict, Verdict::Positive);
    }
}
