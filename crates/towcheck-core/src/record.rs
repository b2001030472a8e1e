//! Company records and the verification outcomes attached to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// USDOT carrier number, the unique regulatory identifier of a carrier.
pub type DotNumber = u64;

/// One carrier from the filtered census table.
///
/// Immutable once produced by the census filter. Field names follow the
/// census columns they come from (`PHY_CITY` → `city`, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub dot_number: DotNumber,
    pub legal_name: String,
    pub dba_name: Option<String>,
    pub officer_1: Option<String>,
    pub officer_2: Option<String>,
    pub truck_units: Option<i64>,
    pub power_units: Option<i64>,
    pub total_cdl: Option<i64>,
    pub total_drivers: Option<i64>,
    pub street: Option<String>,
    pub city: Option<String>,
    /// Two-letter state code, upper-cased.
    pub state: String,
    pub zip: Option<String>,
    pub county: Option<String>,
    pub email: Option<String>,
    /// Census cargo columns (e.g. `CRGO_DRIVETOW`) this carrier is marked for.
    pub cargo_classes: Vec<String>,
}

impl CompanyRecord {
    /// Minimal record for tests and fixtures; every optional field is `None`.
    pub fn new(
        dot_number: DotNumber,
        legal_name: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            dot_number,
            legal_name: legal_name.into(),
            dba_name: None,
            officer_1: None,
            officer_2: None,
            truck_units: None,
            power_units: None,
            total_cdl: None,
            total_drivers: None,
            street: None,
            city: None,
            state: state.into(),
            zip: None,
            county: None,
            email: None,
            cargo_classes: Vec::new(),
        }
    }

    pub fn city_or_empty(&self) -> &str {
        self.city.as_deref().unwrap_or("")
    }
}

/// Result of one existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Positive,
    Negative,
    Inconclusive,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Inconclusive => "inconclusive",
        }
    }
}

/// Where a positive verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// A fetched web page matched the address and mentioned towing.
    Website,
    /// The carrier's own legal or DBA name contains a towing word.
    NameMatch,
}

impl EvidenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::NameMatch => "name_match",
        }
    }
}

/// Marker written to `WEBSITE_URL` for name-approved carriers.
pub const AUTO_APPROVED: &str = "AUTO_APPROVED";

/// Supporting evidence for a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: EvidenceSource,
    /// The matching page; `None` for name matches.
    pub url: Option<String>,
    /// The (cleaned) company name that produced the match.
    pub matched_name: String,
}

impl Evidence {
    pub fn website(url: impl Into<String>, matched_name: impl Into<String>) -> Self {
        Self {
            source: EvidenceSource::Website,
            url: Some(url.into()),
            matched_name: matched_name.into(),
        }
    }

    pub fn name_match(matched_name: impl Into<String>) -> Self {
        Self {
            source: EvidenceSource::NameMatch,
            url: None,
            matched_name: matched_name.into(),
        }
    }

    /// Value for the `WEBSITE_URL` output column.
    pub fn website_column(&self) -> &str {
        match (&self.source, &self.url) {
            (EvidenceSource::NameMatch, _) => AUTO_APPROVED,
            (EvidenceSource::Website, Some(url)) => url,
            (EvidenceSource::Website, None) => "",
        }
    }
}

/// Outcome persisted in the checkpoint for a processed carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Verified,
    Rejected,
    Inconclusive,
}

impl Outcome {
    /// Terminal outcomes are never re-verified.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Rejected)
    }

    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Positive => Self::Verified,
            Verdict::Negative => Self::Rejected,
            Verdict::Inconclusive => Self::Inconclusive,
        }
    }
}

/// One line of the checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub dot_number: DotNumber,
    pub outcome: Outcome,
    pub recorded_at: DateTime<Utc>,
}

impl CheckpointEntry {
    pub fn now(dot_number: DotNumber, outcome: Outcome) -> Self {
        Self {
            dot_number,
            outcome,
            recorded_at: Utc::now(),
        }
    }
}

/// A positively verified carrier, ready for the output table.
///
/// Only constructible from a record plus evidence, so every row in the
/// output carries a positive verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCompanyRow {
    pub record: CompanyRecord,
    pub evidence: Option<Evidence>,
    pub verified_at: DateTime<Utc>,
}

impl VerifiedCompanyRow {
    pub fn new(record: CompanyRecord, evidence: Option<Evidence>) -> Self {
        Self {
            record,
            evidence,
            verified_at: Utc::now(),
        }
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::Positive
    }
}
