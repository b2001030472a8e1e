//! Append-only table of verified towing carriers.
//!
//! The CSV form carries the filtered census columns plus `VERDICT`,
//! `EVIDENCE_SOURCE`, `WEBSITE_URL`, and `VERIFIED_AT`. The header is
//! written exactly once, when the file is new or empty. Every append is
//! synced before it returns. DOT numbers already present are loaded on open
//! and later appends for them are skipped, so a row written just before a
//! crash is not duplicated when the carrier is processed again.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::csv::WriterBuilder;
use arrow::csv::reader::Format;
use arrow::record_batch::RecordBatch;
use chrono::SecondsFormat;
use towcheck_core::{DotNumber, VerifiedCompanyRow, census};
use tracing::{debug, info, warn};

use crate::StoreError;
use crate::census::{parse_dot_number, read_csv_as_text, record_columns};

/// Sink for positively verified carriers.
pub trait OutputWriter {
    /// Durably append `row`. Returns `false` without writing when the
    /// carrier is already in the output.
    fn append(&mut self, row: &VerifiedCompanyRow) -> Result<bool, StoreError>;

    fn contains(&self, id: DotNumber) -> bool;

    /// Rows in the output, including those present before this run.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build a one-or-more row batch with [`census::output_schema`].
pub fn rows_to_batch(rows: &[VerifiedCompanyRow]) -> Result<RecordBatch, StoreError> {
    let records: Vec<_> = rows.iter().map(|r| r.record.clone()).collect();
    let mut columns = record_columns(&records);

    let verdict: ArrayRef = Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.verdict().as_str()),
    ));
    let source: ArrayRef = Arc::new(StringArray::from_iter(
        rows.iter()
            .map(|r| r.evidence.as_ref().map(|e| e.source.as_str())),
    ));
    let website: ArrayRef = Arc::new(StringArray::from_iter(
        rows.iter()
            .map(|r| r.evidence.as_ref().map(|e| e.website_column())),
    ));
    let verified_at: ArrayRef = Arc::new(StringArray::from_iter_values(
        rows.iter()
            .map(|r| r.verified_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    ));
    columns.extend([verdict, source, website, verified_at]);

    Ok(RecordBatch::try_new(
        Arc::new(census::output_schema()),
        columns,
    )?)
}

// ── CSV file ──

pub struct CsvOutput {
    path: PathBuf,
    file: File,
    ids: HashSet<DotNumber>,
    header_pending: bool,
}

impl CsvOutput {
    /// Open (or create) the output file and index the carriers already in it.
    ///
    /// A partial last row left by a crash mid-append is truncated away. An
    /// existing file whose header is not exactly [`census::output_schema`]
    /// is rejected before anything is written to it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::storage(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::storage(path, e))?;

        truncate_partial_row(path, &file)?;

        let header_pending = file
            .metadata()
            .map_err(|e| StoreError::storage(path, e))?
            .len()
            == 0;
        let ids = if header_pending {
            HashSet::new()
        } else {
            check_header(path)?;
            existing_ids(path)?
        };

        info!(path = %path.display(), existing = ids.len(), "opened output");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            ids,
            header_pending,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputWriter for CsvOutput {
    fn append(&mut self, row: &VerifiedCompanyRow) -> Result<bool, StoreError> {
        let id = row.record.dot_number;
        if self.ids.contains(&id) {
            debug!(dot_number = id, "already in output");
            return Ok(false);
        }

        let batch = rows_to_batch(std::slice::from_ref(row))?;
        let mut writer = WriterBuilder::new()
            .with_header(self.header_pending)
            .build(&mut self.file);
        writer.write(&batch)?;
        drop(writer);

        self.file
            .sync_data()
            .map_err(|e| StoreError::storage(&self.path, e))?;
        self.header_pending = false;
        self.ids.insert(id);
        Ok(true)
    }

    fn contains(&self, id: DotNumber) -> bool {
        self.ids.contains(&id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

fn truncate_partial_row(path: &Path, file: &File) -> Result<(), StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::storage(path, e))?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let keep = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "truncating partial output row"
    );
    file.set_len(keep as u64)
        .and_then(|()| file.sync_data())
        .map_err(|e| StoreError::storage(path, e))
}

/// The header row must list the output columns in schema order.
fn check_header(path: &Path) -> Result<(), StoreError> {
    let mut file = File::open(path).map_err(|e| StoreError::storage(path, e))?;
    let (found, _) = Format::default()
        .with_header(true)
        .infer_schema(&mut file, Some(0))?;
    let found: Vec<&str> = found.fields().iter().map(|f| f.name().as_str()).collect();

    let expected = census::output_schema();
    let expected: Vec<&str> = expected.fields().iter().map(|f| f.name().as_str()).collect();
    if found == expected {
        return Ok(());
    }

    let missing: Vec<String> = expected
        .iter()
        .filter(|name| !found.contains(name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::MissingColumns {
            path: path.to_path_buf(),
            columns: missing,
        });
    }
    Err(StoreError::DataFormat(format!(
        "{}: output header does not match; expected {}, found {}",
        path.display(),
        expected.join(","),
        found.join(",")
    )))
}

fn existing_ids(path: &Path) -> Result<HashSet<DotNumber>, StoreError> {
    let table = read_csv_as_text(path)?;
    let mut ids = HashSet::new();
    for batch in &table.batches {
        let Some(col) = batch
            .column_by_name(census::DOT_NUMBER)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        else {
            continue;
        };
        for value in col.iter().flatten() {
            match parse_dot_number(value.trim()) {
                Some(id) => {
                    ids.insert(id);
                }
                None => warn!(path = %path.display(), value, "unparseable DOT_NUMBER in output"),
            }
        }
    }
    Ok(ids)
}

// ── In-memory ──

/// Output held in memory; used in tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryOutput {
    rows: Vec<VerifiedCompanyRow>,
    ids: HashSet<DotNumber>,
    fail_writes: bool,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// An output whose every append fails.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> &[VerifiedCompanyRow] {
        &self.rows
    }

    pub fn dot_numbers(&self) -> Vec<DotNumber> {
        self.rows.iter().map(|r| r.record.dot_number).collect()
    }
}

impl OutputWriter for MemoryOutput {
    fn append(&mut self, row: &VerifiedCompanyRow) -> Result<bool, StoreError> {
        if self.fail_writes {
            return Err(StoreError::storage(
                "<memory>",
                std::io::Error::other("output writes disabled"),
            ));
        }
        if !self.ids.insert(row.record.dot_number) {
            return Ok(false);
        }
        self.rows.push(row.clone());
        Ok(true)
    }

    fn contains(&self, id: DotNumber) -> bool {
        self.ids.contains(&id)
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use towcheck_core::{CompanyRecord, Evidence};

    fn row(dot: DotNumber, evidence: Evidence) -> VerifiedCompanyRow {
        let mut record = CompanyRecord::new(dot, format!("CARRIER {dot} LLC"), "MA");
        record.city = Some("Worcester".into());
        record.zip = Some("01608".into());
        record.total_drivers = Some(7);
        record.cargo_classes = vec!["CRGO_DRIVETOW".into()];
        VerifiedCompanyRow::new(record, Some(evidence))
    }

    fn read_back(path: &Path) -> RecordBatch {
        let table = read_csv_as_text(path).unwrap();
        arrow::compute::concat_batches(&table.schema, &table.batches).unwrap()
    }

    fn column<'a>(batch: &'a RecordBatch, name: &str) -> &'a StringArray {
        batch
            .column_by_name(name)
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
    }

    #[test]
    fn batch_has_output_schema() {
        let batch = rows_to_batch(&[row(1, Evidence::name_match("ACME TOWING"))]).unwrap();
        assert_eq!(batch.schema().as_ref(), &census::output_schema());
        assert_eq!(batch.num_rows(), 1);
    }

    #[test]
    fn appends_rows_with_single_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join("verified.csv");

        let mut out = CsvOutput::open(&path).unwrap();
        assert!(out.is_empty());
        assert!(out.append(&row(10, Evidence::website("https://a.example/", "ACME"))).unwrap());
        assert!(out.append(&row(20, Evidence::name_match("BOB TOWING"))).unwrap());
        drop(out);

        // Reopen and continue; no second header.
        let mut out = CsvOutput::open(&path).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.append(&row(30, Evidence::name_match("CITY WRECKER"))).unwrap());
        drop(out);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("DOT_NUMBER").count(), 1);
        assert_eq!(content.lines().count(), 4);

        let batch = read_back(&path);
        let dots: Vec<_> = column(&batch, census::DOT_NUMBER).iter().flatten().collect();
        assert_eq!(dots, vec!["10", "20", "30"]);
    }

    #[test]
    fn evidence_columns() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("verified.csv");

        let mut out = CsvOutput::open(&path).unwrap();
        out.append(&row(1, Evidence::website("https://acme.example/contact", "ACME")))
            .unwrap();
        out.append(&row(2, Evidence::name_match("BOB TOWING"))).unwrap();
        drop(out);

        let batch = read_back(&path);
        let verdict = column(&batch, census::VERDICT);
        let source = column(&batch, census::EVIDENCE_SOURCE);
        let url = column(&batch, census::WEBSITE_URL);
        assert_eq!(verdict.value(0), "positive");
        assert_eq!(verdict.value(1), "positive");
        assert_eq!(source.value(0), "website");
        assert_eq!(source.value(1), "name_match");
        assert_eq!(url.value(0), "https://acme.example/contact");
        assert_eq!(url.value(1), "AUTO_APPROVED");
        assert!(column(&batch, census::VERIFIED_AT).value(0).ends_with('Z'));
        assert_eq!(column(&batch, census::PHY_CITY).value(0), "Worcester");
    }

    #[test]
    fn duplicate_dot_number_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("verified.csv");

        let mut out = CsvOutput::open(&path).unwrap();
        assert!(out.append(&row(7, Evidence::name_match("A TOWING"))).unwrap());
        assert!(!out.append(&row(7, Evidence::name_match("A TOWING"))).unwrap());
        drop(out);

        let mut out = CsvOutput::open(&path).unwrap();
        assert!(out.contains(7));
        assert!(!out.append(&row(7, Evidence::name_match("A TOWING"))).unwrap());
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn partial_last_row_is_truncated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("verified.csv");

        let mut out = CsvOutput::open(&path).unwrap();
        out.append(&row(1, Evidence::name_match("A TOWING"))).unwrap();
        drop(out);

        let mut bytes = fs::read(&path).unwrap();
        bytes.extend_from_slice(b"2,CARRIER 2 LL");
        fs::write(&path, &bytes).unwrap();

        let mut out = CsvOutput::open(&path).unwrap();
        assert_eq!(out.len(), 1);
        assert!(!out.contains(2));
        assert!(out.append(&row(2, Evidence::name_match("B TOWING"))).unwrap());
        drop(out);

        let batch = read_back(&path);
        assert_eq!(batch.num_rows(), 2);
    }

    #[test]
    fn foreign_file_without_dot_column_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("verified.csv");
        fs::write(&path, "name,city\nacme,worcester\n").unwrap();

        let err = CsvOutput::open(&path).err().unwrap();
        assert!(matches!(err, StoreError::MissingColumns { .. }));
    }

    #[test]
    fn foreign_header_is_rejected_and_left_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("towing_companies_verified.csv");
        let legacy = "DOT_NUMBER,LEGAL_NAME,WEBSITE_URL\n1,OLD CO,https://old.example/\n";
        fs::write(&path, legacy).unwrap();

        let err = CsvOutput::open(&path).err().unwrap();
        match err {
            StoreError::MissingColumns { columns, .. } => {
                assert!(columns.contains(&census::VERDICT.to_string()));
                assert!(!columns.contains(&census::DOT_NUMBER.to_string()));
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), legacy);
    }

    #[test]
    fn reordered_header_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("verified.csv");

        let mut out = CsvOutput::open(&path).unwrap();
        out.append(&row(1, Evidence::name_match("A TOWING"))).unwrap();
        drop(out);

        let content = fs::read_to_string(&path).unwrap();
        let (header, body) = content.split_once('\n').unwrap();
        let mut names: Vec<&str> = header.split(',').collect();
        names.swap(0, 1);
        fs::write(&path, format!("{}\n{body}", names.join(","))).unwrap();

        let err = CsvOutput::open(&path).err().unwrap();
        assert!(matches!(err, StoreError::DataFormat(_)), "{err:?}");
    }

    #[test]
    fn memory_output_dedupes() {
        let mut out = MemoryOutput::new();
        assert!(out.append(&row(1, Evidence::name_match("A TOWING"))).unwrap());
        assert!(!out.append(&row(1, Evidence::name_match("A TOWING"))).unwrap());
        assert_eq!(out.dot_numbers(), vec![1]);
    }
}
