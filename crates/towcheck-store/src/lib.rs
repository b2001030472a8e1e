//! Storage layer: census filter (Arrow/Parquet), JSON-lines checkpoint, CSV output.

mod error;
pub use error::StoreError;

pub mod census;
pub mod checkpoint;
pub mod output;

pub use census::{FilterSummary, Table, filter_census, load_records, stored_filter_params};
pub use checkpoint::{CheckpointStore, JsonlCheckpoint, MemoryCheckpoint};
pub use output::{CsvOutput, MemoryOutput, OutputWriter};
