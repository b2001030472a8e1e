//! Parameters of the census filter: region, industry, and size predicates.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::census;

/// New England plus New York.
pub const DEFAULT_REGIONS: &[&str] = &["ME", "NH", "VT", "MA", "RI", "CT", "NY"];

/// Value marking a carrier as active in a census cargo class.
pub const CARGO_MARKER: &str = "X";

pub const DEFAULT_MIN_SIZE: f64 = 5.0;

/// Census count column used as the size predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeMetric {
    TotalDrivers,
    PowerUnits,
    TruckUnits,
    TotalCdl,
}

impl SizeMetric {
    pub fn column(&self) -> &'static str {
        match self {
            Self::TotalDrivers => census::TOTAL_DRIVERS,
            Self::PowerUnits => census::POWER_UNITS,
            Self::TruckUnits => census::TRUCK_UNITS,
            Self::TotalCdl => census::TOTAL_CDL,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TotalDrivers => "total-drivers",
            Self::PowerUnits => "power-units",
            Self::TruckUnits => "truck-units",
            Self::TotalCdl => "total-cdl",
        }
    }
}

impl fmt::Display for SizeMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error(
    "unknown size metric {0:?} (expected total-drivers, power-units, truck-units, or total-cdl)"
)]
pub struct UnknownSizeMetric(String);

impl FromStr for SizeMetric {
    type Err = UnknownSizeMetric;

    /// Accepts the kebab-case name or the census column name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('_', "-");
        match key.as_str() {
            "total-drivers" => Ok(Self::TotalDrivers),
            "power-units" => Ok(Self::PowerUnits),
            "truck-units" => Ok(Self::TruckUnits),
            "total-cdl" => Ok(Self::TotalCdl),
            _ => Err(UnknownSizeMetric(s.to_string())),
        }
    }
}

/// The three predicates a census row must satisfy to become a candidate.
///
/// Serialised into the filtered table's metadata so a later run can tell
/// whether the table was produced with the same parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParams {
    /// Upper-cased two-letter state codes.
    pub regions: BTreeSet<String>,
    /// Census cargo columns; a row matches if any of them is marked.
    pub cargo_classes: Vec<String>,
    pub size_metric: SizeMetric,
    pub min_size: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self::new(
            DEFAULT_REGIONS.iter().copied(),
            [census::CRGO_DRIVETOW],
            SizeMetric::TotalDrivers,
            DEFAULT_MIN_SIZE,
        )
    }
}

impl FilterParams {
    /// Build parameters, normalising region codes and de-duplicating cargo
    /// columns (first occurrence wins).
    pub fn new<R, C>(
        regions: impl IntoIterator<Item = R>,
        cargo_classes: impl IntoIterator<Item = C>,
        size_metric: SizeMetric,
        min_size: f64,
    ) -> Self
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        let regions = regions
            .into_iter()
            .map(|r| r.as_ref().trim().to_ascii_uppercase())
            .filter(|r| !r.is_empty())
            .collect();

        let mut classes: Vec<String> = Vec::new();
        for class in cargo_classes {
            let class = class.as_ref().trim();
            if !class.is_empty() && !classes.iter().any(|c| c == class) {
                classes.push(class.to_string());
            }
        }

        Self {
            regions,
            cargo_classes: classes,
            size_metric,
            min_size,
        }
    }

    pub fn region_matches(&self, state: &str) -> bool {
        self.regions.contains(&state.trim().to_ascii_uppercase())
    }

    /// True when the count parses and meets the threshold.
    pub fn size_matches(&self, value: &str) -> bool {
        parse_count(value).is_some_and(|n| n >= self.min_size)
    }

    /// Stable JSON form stored alongside the filtered table.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// True when a cargo cell holds the census marker.
pub fn is_cargo_marked(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(CARGO_MARKER)
}

/// Lenient numeric parse: blanks and non-numbers are `None`.
pub fn parse_count(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}
