pub mod filter;
pub mod names;
pub mod record;
pub mod schema;

pub use filter::{FilterParams, SizeMetric};
pub use names::{clean_company_name, has_tow_in_name, normalize_text};
pub use record::{
    CheckpointEntry, CompanyRecord, DotNumber, Evidence, EvidenceSource, Outcome, Verdict,
    VerifiedCompanyRow,
};
pub use schema::census;
