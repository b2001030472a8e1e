//! Existence check for towing carriers: name approval, then web search for a
//! page that matches the carrier's address and mentions towing.

mod error;
pub use error::VerifyError;

pub mod matching;
pub mod search;
pub mod verifier;

pub use verifier::{Verification, Verifier, VerifierSettings, WebVerifier};
