//! The verification state machine.
//!
//! Each carrier moves `Pending → InProgress → {Verified, Rejected,
//! Inconclusive}`. Only the terminal transitions touch disk: a verified
//! carrier's output row is appended first and its checkpoint entry second,
//! so a crash between the two can duplicate a row but never lose one.
//! `InProgress` lives only in memory; a carrier interrupted mid-check is
//! still pending on the next run.

use tokio::sync::watch;
use towcheck_core::{CompanyRecord, DotNumber, Outcome, Verdict, VerifiedCompanyRow};
use towcheck_store::{CheckpointStore, OutputWriter};
use towcheck_verify::{Verification, Verifier};
use tracing::{debug, info, warn};

use crate::PipelineError;
use crate::policy::PipelineConfig;
use crate::progress::RunStats;

/// Counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records handed to the run.
    pub total: usize,
    /// Records already settled by the checkpoint (or out of inconclusive runs).
    pub skipped: usize,
    pub processed: usize,
    pub verified: usize,
    pub rejected: usize,
    pub inconclusive: usize,
    /// Verified carriers whose output row was already present.
    pub duplicate_rows: usize,
    /// The run stopped early on a shutdown signal.
    pub interrupted: bool,
}

impl RunSummary {
    pub fn remaining(&self) -> usize {
        self.total - self.skipped - self.processed
    }
}

pub struct Pipeline<V, C, O> {
    verifier: V,
    checkpoint: C,
    output: O,
    config: PipelineConfig,
}

impl<V, C, O> Pipeline<V, C, O>
where
    V: Verifier,
    C: CheckpointStore,
    O: OutputWriter,
{
    pub fn new(
        verifier: V,
        checkpoint: C,
        output: O,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            verifier,
            checkpoint,
            output,
            config,
        })
    }

    pub fn checkpoint(&self) -> &C {
        &self.checkpoint
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Whether `id` needs no verification this run.
    fn is_settled(&self, id: DotNumber) -> bool {
        self.checkpoint.contains(id)
            || self
                .config
                .inconclusive
                .exhausted(self.checkpoint.inconclusive_runs(id))
    }

    /// Verify every unsettled record in order.
    ///
    /// Stops at the next row boundary once `shutdown` turns true; the row in
    /// flight is abandoned and stays pending. Storage errors abort the run.
    pub async fn run(
        &mut self,
        records: &[CompanyRecord],
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, PipelineError> {
        let pending: Vec<&CompanyRecord> = records
            .iter()
            .filter(|r| !self.is_settled(r.dot_number))
            .collect();

        let mut summary = RunSummary {
            total: records.len(),
            skipped: records.len() - pending.len(),
            ..RunSummary::default()
        };
        info!(
            total = summary.total,
            skipped = summary.skipped,
            pending = pending.len(),
            "starting verification"
        );

        let mut stats = RunStats::new(pending.len());
        let mut owe_delay = false;

        for record in pending {
            if *shutdown.borrow() {
                summary.interrupted = true;
                break;
            }
            // Repeated identifiers in the input.
            if self.is_settled(record.dot_number) {
                summary.skipped += 1;
                continue;
            }

            if owe_delay {
                let delay = self.config.pacing.next_delay();
                debug!(delay_ms = delay.as_millis() as u64, "pacing");
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancelled(&mut shutdown) => {
                        summary.interrupted = true;
                        break;
                    }
                }
            }

            let Some(verification) = self.verify_with_retry(record, &mut shutdown).await else {
                summary.interrupted = true;
                break;
            };
            owe_delay = verification.used_network;
            let positive = verification.verdict == Verdict::Positive;

            self.commit(record, verification, &mut summary)?;
            summary.processed += 1;
            stats.record(positive);

            if stats.processed() % self.config.progress_every == 0 {
                stats.report();
            }
        }

        stats.report();
        if summary.interrupted {
            warn!(
                processed = summary.processed,
                remaining = summary.remaining(),
                "interrupted; progress saved"
            );
        } else {
            info!(
                processed = summary.processed,
                verified = summary.verified,
                rejected = summary.rejected,
                inconclusive = summary.inconclusive,
                "verification complete"
            );
        }
        Ok(summary)
    }

    /// Call the verifier, retrying transient errors with backoff. Exhausted
    /// or permanent errors yield an inconclusive verification. `None` means
    /// shutdown was requested.
    async fn verify_with_retry(
        &self,
        record: &CompanyRecord,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Verification> {
        let id = record.dot_number;
        let max_attempts = self.config.retry.max_attempts;
        let mut attempt = 1;

        loop {
            let result = tokio::select! {
                biased;
                r = self.verifier.verify(record) => r,
                _ = cancelled(shutdown) => return None,
            };

            match result {
                Ok(v) => return Some(v),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry.delay(attempt);
                    warn!(
                        dot_number = id,
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "verification failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancelled(shutdown) => return None,
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        dot_number = id,
                        attempt,
                        retryable = e.is_retryable(),
                        error = %e,
                        "verification inconclusive"
                    );
                    return Some(Verification::inconclusive());
                }
            }
        }
    }

    /// Durable writes for one finished carrier.
    fn commit(
        &mut self,
        record: &CompanyRecord,
        verification: Verification,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let id = record.dot_number;
        let outcome = Outcome::from_verdict(verification.verdict);
        match verification.verdict {
            Verdict::Positive => {
                let source = verification.evidence.as_ref().map(|e| e.source.as_str());
                let row = VerifiedCompanyRow::new(record.clone(), verification.evidence);
                if !self.output.append(&row)? {
                    summary.duplicate_rows += 1;
                    debug!(dot_number = id, "output row already present");
                }
                self.checkpoint.record(id, outcome)?;
                summary.verified += 1;
                info!(dot_number = id, name = %record.legal_name, source, "verified");
            }
            Verdict::Negative => {
                self.checkpoint.record(id, outcome)?;
                summary.rejected += 1;
                info!(dot_number = id, name = %record.legal_name, "rejected");
            }
            Verdict::Inconclusive => {
                if self.config.inconclusive.records() {
                    self.checkpoint.record(id, outcome)?;
                }
                summary.inconclusive += 1;
            }
        }
        Ok(())
    }
}

/// Resolves once shutdown is requested. A dropped sender never requests it.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
