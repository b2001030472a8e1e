//! Census table I/O and the candidate filter.
//!
//! The raw FMCSA Company Census is read as text (CSV, or Parquet cast to
//! Utf8), reduced to towing carriers in the configured regions, and written
//! as a typed Parquet table in source row order. The filter parameters are
//! stored in the Parquet key-value metadata so callers can detect a stale
//! table.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Int64Array, Int64Builder, StringArray, StringBuilder, UInt64Array,
    UInt64Builder,
};
use arrow::compute::cast;
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use towcheck_core::filter::{is_cargo_marked, parse_count};
use towcheck_core::{CompanyRecord, DotNumber, FilterParams, census};
use tracing::{info, warn};

use crate::StoreError;

/// Parquet key-value metadata key holding the JSON filter parameters.
pub const FILTER_PARAMS_KEY: &str = "towcheck.filter_params";

const CARGO_SEPARATOR: &str = ";";

/// A table read from disk: its schema plus all record batches.
///
/// The schema is kept separately because a header-only CSV or an empty
/// Parquet file yields no batches.
pub struct Table {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl Table {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }
}

/// Counts reported by a filter run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSummary {
    pub raw_rows: usize,
    pub kept_rows: usize,
    pub duplicates: usize,
}

// ── Reading ──

/// Read a raw census table. `.parquet` files are read as Parquet; anything
/// else is treated as CSV with a header row, every column as text.
pub fn read_table(path: &Path) -> Result<Table, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    if is_parquet(path) {
        read_parquet(path)
    } else {
        read_csv_as_text(path)
    }
}

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet(path: &Path) -> Result<Table, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::storage(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(Table {
        schema,
        batches: batches?,
    })
}

pub(crate) fn read_csv_as_text(path: &Path) -> Result<Table, StoreError> {
    let mut file = File::open(path).map_err(|e| StoreError::storage(path, e))?;
    let (inferred, _) = Format::default()
        .with_header(true)
        .infer_schema(&mut file, Some(1))?;
    file.rewind().map_err(|e| StoreError::storage(path, e))?;

    // Census CSVs are read as text, like the upstream `dtype=str` conversion.
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| Field::new(f.name(), DataType::Utf8, true))
        .collect();
    let schema: SchemaRef = Arc::new(Schema::new(fields));

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(file)?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(Table {
        schema,
        batches: batches?,
    })
}

fn is_parquet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("parquet"))
}

// ── Filtering ──

/// Apply the region, industry, and size predicates to a raw census table.
///
/// Returns matching carriers in source order. A repeated DOT_NUMBER keeps its
/// first occurrence. Fails with [`StoreError::MissingColumns`] before looking
/// at any row if a required column is absent.
pub fn filter_table(
    table: &Table,
    params: &FilterParams,
    source: &Path,
) -> Result<(Vec<CompanyRecord>, FilterSummary), StoreError> {
    let required = required_columns(params);
    let missing: Vec<String> = required
        .iter()
        .filter(|c| table.schema.field_with_name(c).is_err())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::MissingColumns {
            path: source.to_path_buf(),
            columns: missing,
        });
    }

    let mut records = Vec::new();
    let mut seen: HashSet<DotNumber> = HashSet::new();
    let mut duplicates = 0usize;
    let mut row_offset = 0usize;

    for batch in &table.batches {
        let cols = RawColumns::from_batch(batch, params)?;

        for row in 0..batch.num_rows() {
            let source_row = row_offset + row;
            let Some(record) = cols.candidate(row, source_row, params)? else {
                continue;
            };
            if !seen.insert(record.dot_number) {
                duplicates += 1;
                warn!(
                    dot_number = record.dot_number,
                    row = source_row,
                    "duplicate DOT_NUMBER in census, keeping first occurrence"
                );
                continue;
            }
            records.push(record);
        }
        row_offset += batch.num_rows();
    }

    let summary = FilterSummary {
        raw_rows: row_offset,
        kept_rows: records.len(),
        duplicates,
    };
    Ok((records, summary))
}

fn required_columns(params: &FilterParams) -> Vec<String> {
    let mut cols: Vec<String> = census::REQUIRED_RAW.iter().map(|c| c.to_string()).collect();
    let size = params.size_metric.column().to_string();
    if !cols.contains(&size) {
        cols.push(size);
    }
    for class in &params.cargo_classes {
        if !cols.contains(class) {
            cols.push(class.clone());
        }
    }
    cols
}

/// Raw batch columns cast to text, looked up once per batch.
struct RawColumns {
    dot: StringArray,
    legal_name: StringArray,
    state: StringArray,
    city: StringArray,
    size: StringArray,
    cargo: Vec<(String, StringArray)>,
    text: Vec<Option<StringArray>>,
    counts: Vec<Option<StringArray>>,
}

impl RawColumns {
    fn from_batch(batch: &RecordBatch, params: &FilterParams) -> Result<Self, StoreError> {
        let required = |name: &str| -> Result<StringArray, StoreError> {
            text_column(batch, name)?
                .ok_or_else(|| StoreError::DataFormat(format!("batch is missing column {name}")))
        };

        let mut cargo = Vec::with_capacity(params.cargo_classes.len());
        for class in &params.cargo_classes {
            cargo.push((class.clone(), required(class)?));
        }

        let text = census::OPTIONAL_TEXT
            .iter()
            .map(|c| text_column(batch, c))
            .collect::<Result<Vec<_>, _>>()?;
        let counts = census::COUNT_COLUMNS
            .iter()
            .map(|c| text_column(batch, c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dot: required(census::DOT_NUMBER)?,
            legal_name: required(census::LEGAL_NAME)?,
            state: required(census::PHY_STATE)?,
            city: required(census::PHY_CITY)?,
            size: required(params.size_metric.column())?,
            cargo,
            text,
            counts,
        })
    }

    /// Build the record for `row` if it passes every predicate.
    fn candidate(
        &self,
        row: usize,
        source_row: usize,
        params: &FilterParams,
    ) -> Result<Option<CompanyRecord>, StoreError> {
        let Some(state) = cell(&self.state, row) else {
            return Ok(None);
        };
        if !params.region_matches(state) {
            return Ok(None);
        }
        if !cell(&self.size, row).is_some_and(|v| params.size_matches(v)) {
            return Ok(None);
        }
        let cargo_classes: Vec<String> = self
            .cargo
            .iter()
            .filter(|(_, col)| cell(col, row).is_some_and(is_cargo_marked))
            .map(|(name, _)| name.clone())
            .collect();
        if cargo_classes.is_empty() {
            return Ok(None);
        }

        let dot_raw = cell(&self.dot, row).ok_or_else(|| {
            StoreError::DataFormat(format!("row {source_row}: empty DOT_NUMBER"))
        })?;
        let dot_number = parse_dot_number(dot_raw).ok_or_else(|| {
            StoreError::DataFormat(format!("row {source_row}: invalid DOT_NUMBER {dot_raw:?}"))
        })?;

        let text = |i: usize| self.text[i].as_ref().and_then(|c| cell(c, row)).map(str::to_string);
        let count = |i: usize| {
            self.counts[i]
                .as_ref()
                .and_then(|c| cell(c, row))
                .and_then(parse_count)
                .map(|n| n as i64)
        };

        // Index order follows census::OPTIONAL_TEXT and census::COUNT_COLUMNS.
        Ok(Some(CompanyRecord {
            dot_number,
            legal_name: cell(&self.legal_name, row).unwrap_or_default().to_string(),
            dba_name: text(0),
            officer_1: text(1),
            officer_2: text(2),
            truck_units: count(0),
            power_units: count(1),
            total_cdl: count(2),
            total_drivers: count(3),
            street: text(3),
            city: cell(&self.city, row).map(str::to_string),
            state: state.to_ascii_uppercase(),
            zip: text(4),
            county: text(5),
            email: text(6),
            cargo_classes,
        }))
    }
}

fn text_column(batch: &RecordBatch, name: &str) -> Result<Option<StringArray>, StoreError> {
    let Some(col) = batch.column_by_name(name) else {
        return Ok(None);
    };
    let casted = cast(col, &DataType::Utf8)?;
    let strings = casted
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| StoreError::DataFormat(format!("column {name} is not castable to text")))?;
    Ok(Some(strings.clone()))
}

/// Trimmed non-empty cell value.
fn cell(col: &StringArray, row: usize) -> Option<&str> {
    if col.is_null(row) {
        return None;
    }
    let v = col.value(row).trim();
    if v.is_empty() { None } else { Some(v) }
}

/// Parse a DOT number, tolerating a float rendering such as `"1234567.0"`.
pub(crate) fn parse_dot_number(raw: &str) -> Option<DotNumber> {
    if let Ok(n) = raw.parse::<DotNumber>() {
        return Some(n);
    }
    let f = raw.parse::<f64>().ok()?;
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64).then(|| f as DotNumber)
}

// ── Filtered table ──

/// Convert candidate records into a batch with [`census::filtered_schema`].
pub fn records_to_batch(records: &[CompanyRecord]) -> Result<RecordBatch, StoreError> {
    let schema = Arc::new(census::filtered_schema());
    let columns = record_columns(records);
    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Column arrays for the filtered schema, in schema order.
pub(crate) fn record_columns(records: &[CompanyRecord]) -> Vec<ArrayRef> {
    let mut dot = UInt64Builder::with_capacity(records.len());
    for r in records {
        dot.append_value(r.dot_number);
    }

    vec![
        Arc::new(dot.finish()),
        text_array(records, |r| Some(r.legal_name.as_str())),
        text_array(records, |r| r.dba_name.as_deref()),
        text_array(records, |r| r.officer_1.as_deref()),
        text_array(records, |r| r.officer_2.as_deref()),
        count_array(records, |r| r.truck_units),
        count_array(records, |r| r.power_units),
        count_array(records, |r| r.total_cdl),
        count_array(records, |r| r.total_drivers),
        text_array(records, |r| r.street.as_deref()),
        text_array(records, |r| r.city.as_deref()),
        text_array(records, |r| Some(r.state.as_str())),
        text_array(records, |r| r.zip.as_deref()),
        text_array(records, |r| r.county.as_deref()),
        text_array(records, |r| r.email.as_deref()),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.cargo_classes.join(CARGO_SEPARATOR)),
        )),
    ]
}

fn text_array<'a>(
    records: &'a [CompanyRecord],
    f: impl Fn(&'a CompanyRecord) -> Option<&'a str>,
) -> ArrayRef {
    let mut b = StringBuilder::new();
    for r in records {
        b.append_option(f(r));
    }
    Arc::new(b.finish())
}

fn count_array(records: &[CompanyRecord], f: impl Fn(&CompanyRecord) -> Option<i64>) -> ArrayRef {
    let mut b = Int64Builder::with_capacity(records.len());
    for r in records {
        b.append_option(f(r));
    }
    Arc::new(b.finish())
}

/// Convert a filtered-table batch back into records.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<CompanyRecord>, StoreError> {
    let dot = typed::<UInt64Array>(batch, census::DOT_NUMBER)?;
    let legal_name = typed::<StringArray>(batch, census::LEGAL_NAME)?;
    let dba = typed::<StringArray>(batch, census::DBA_NAME)?;
    let officer_1 = typed::<StringArray>(batch, census::COMPANY_OFFICER_1)?;
    let officer_2 = typed::<StringArray>(batch, census::COMPANY_OFFICER_2)?;
    let truck_units = typed::<Int64Array>(batch, census::TRUCK_UNITS)?;
    let power_units = typed::<Int64Array>(batch, census::POWER_UNITS)?;
    let total_cdl = typed::<Int64Array>(batch, census::TOTAL_CDL)?;
    let total_drivers = typed::<Int64Array>(batch, census::TOTAL_DRIVERS)?;
    let street = typed::<StringArray>(batch, census::PHY_STREET)?;
    let city = typed::<StringArray>(batch, census::PHY_CITY)?;
    let state = typed::<StringArray>(batch, census::PHY_STATE)?;
    let zip = typed::<StringArray>(batch, census::PHY_ZIP)?;
    let county = typed::<StringArray>(batch, census::PHY_CNTY)?;
    let email = typed::<StringArray>(batch, census::EMAIL_ADDRESS)?;
    let cargo = typed::<StringArray>(batch, census::CARGO_CLASSES)?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if dot.is_null(i) {
            return Err(StoreError::DataFormat(format!(
                "filtered row {i}: null DOT_NUMBER"
            )));
        }
        records.push(CompanyRecord {
            dot_number: dot.value(i),
            legal_name: opt_str(legal_name, i).unwrap_or_default(),
            dba_name: opt_str(dba, i),
            officer_1: opt_str(officer_1, i),
            officer_2: opt_str(officer_2, i),
            truck_units: opt_i64(truck_units, i),
            power_units: opt_i64(power_units, i),
            total_cdl: opt_i64(total_cdl, i),
            total_drivers: opt_i64(total_drivers, i),
            street: opt_str(street, i),
            city: opt_str(city, i),
            state: opt_str(state, i).unwrap_or_default(),
            zip: opt_str(zip, i),
            county: opt_str(county, i),
            email: opt_str(email, i),
            cargo_classes: opt_str(cargo, i)
                .map(|s| {
                    s.split(CARGO_SEPARATOR)
                        .filter(|c| !c.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        });
    }
    Ok(records)
}

fn typed<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, StoreError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::DataFormat(format!("filtered table is missing column {name}")))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| {
            StoreError::DataFormat(format!("filtered column {name} has unexpected type"))
        })
}

fn opt_str(col: &StringArray, i: usize) -> Option<String> {
    if col.is_null(i) {
        None
    } else {
        Some(col.value(i).to_string())
    }
}

fn opt_i64(col: &Int64Array, i: usize) -> Option<i64> {
    if col.is_null(i) { None } else { Some(col.value(i)) }
}

/// Write the filtered table atomically (temp file, then rename).
pub fn write_filtered(
    path: &Path,
    records: &[CompanyRecord],
    params: &FilterParams,
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::storage(parent, e))?;
    }

    let batch = records_to_batch(records)?;
    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue::new(
            FILTER_PARAMS_KEY.to_string(),
            params.fingerprint(),
        )]))
        .build();

    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(|e| StoreError::storage(&tmp, e))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    let file = writer.into_inner()?;
    file.sync_all().map_err(|e| StoreError::storage(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| StoreError::storage(path, e))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Filter parameters stored in a filtered table, if any.
///
/// Unreadable or unparseable metadata is reported as `None` so the caller
/// regenerates the table.
pub fn stored_filter_params(path: &Path) -> Result<Option<FilterParams>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).map_err(|e| StoreError::storage(path, e))?;
    let Ok(builder) = ParquetRecordBatchReaderBuilder::try_new(file) else {
        return Ok(None);
    };
    let stored = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kvs| kvs.iter().find(|kv| kv.key == FILTER_PARAMS_KEY))
        .and_then(|kv| kv.value.as_deref())
        .and_then(|json| serde_json::from_str(json).ok());
    Ok(stored)
}

/// Read the raw census, filter it, and write the candidate table.
pub fn filter_census(
    raw: &Path,
    filtered: &Path,
    params: &FilterParams,
) -> Result<FilterSummary, StoreError> {
    let table = read_table(raw)?;
    info!(rows = table.num_rows(), path = %raw.display(), "read raw census");

    let (records, summary) = filter_table(&table, params, raw)?;
    write_filtered(filtered, &records, params)?;
    info!(
        raw_rows = summary.raw_rows,
        kept_rows = summary.kept_rows,
        duplicates = summary.duplicates,
        path = %filtered.display(),
        "wrote filtered census"
    );
    Ok(summary)
}

/// Load candidate records from a filtered table, in file order.
pub fn load_records(path: &Path) -> Result<Vec<CompanyRecord>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let table = read_parquet(path)?;
    let mut records = Vec::with_capacity(table.num_rows());
    for batch in &table.batches {
        records.extend(batch_to_records(batch)?);
    }
    Ok(records)
}
