//! Event storage (Arrow/Parquet)
//!
//! Event tables are Parquet files read whole into memory: a training run
//! touches every surviving row several times (cut, weight, fit, score), so
//! there is nothing to gain from streaming. All record batches of a file are
//! concatenated into a single [`RecordBatch`] up front.
//!
//! Parquet has no multi-table container, so a [`DatasetRef`]'s table name is
//! matched against the file's `"table"` key-value metadata entry when the
//! writer recorded one. Files without the entry are accepted as-is.

use crate::config::DatasetRef;
use crate::{Error, Result};
use arrow::array::{Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array};
use arrow::compute;
use arrow::datatypes::{DataType, SchemaRef};
use arrow::record_batch::RecordBatch;

/// Metadata key carrying the event-table name inside a Parquet file.
pub const TABLE_METADATA_KEY: &str = "table";

/// One loaded class of events: the named table of a Parquet file, flattened
/// into a single record batch.
pub struct EventTable {
    name: String,
    batch: RecordBatch,
}

impl std::fmt::Debug for EventTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTable")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl EventTable {
    /// Load the referenced event table.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the file does not exist or carries a
    /// `"table"` metadata entry that does not match `dataset.table`, and
    /// [`Error::Storage`] if the file cannot be parsed as Parquet.
    pub fn load(dataset: &DatasetRef) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use std::fs::File;

        let file = File::open(&dataset.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("input file {}", dataset.path.display()))
            } else {
                Error::Storage(format!(
                    "failed to open {}: {e}",
                    dataset.path.display()
                ))
            }
        })?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            Error::Storage(format!(
                "failed to parse {} as Parquet: {e}",
                dataset.path.display()
            ))
        })?;

        let stored_table = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kv| {
                kv.iter()
                    .find(|entry| entry.key == TABLE_METADATA_KEY)
                    .and_then(|entry| entry.value.clone())
            });
        match stored_table {
            Some(ref stored) if stored != &dataset.table => {
                return Err(Error::NotFound(format!(
                    "table '{}' in {} (file carries table '{stored}')",
                    dataset.table,
                    dataset.path.display()
                )));
            }
            Some(_) => {}
            None => {
                tracing::debug!(
                    path = %dataset.path.display(),
                    table = %dataset.table,
                    "file carries no table metadata; accepting as requested table"
                );
            }
        }

        let schema = builder.schema().clone();
        let reader = builder.build().map_err(|e| {
            Error::Storage(format!(
                "failed to create Parquet reader for {}: {e}",
                dataset.path.display()
            ))
        })?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| {
                Error::Storage(format!(
                    "failed to read record batch from {}: {e}",
                    dataset.path.display()
                ))
            })?;
            batches.push(batch);
        }

        let batch = combine_batches(&schema, &batches)?;
        Ok(Self {
            name: dataset.table.clone(),
            batch,
        })
    }

    /// Build an event table directly from a record batch (tests, tools).
    #[must_use]
    pub fn from_batch(name: impl Into<String>, batch: RecordBatch) -> Self {
        Self {
            name: name.into(),
            batch,
        }
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table schema.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    /// Total number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// The flattened record batch.
    #[must_use]
    pub const fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

/// Concatenate batches into one; an empty file yields an empty batch with the
/// file's schema.
fn combine_batches(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch> {
    match batches.len() {
        0 => Ok(RecordBatch::new_empty(schema.clone())),
        1 => Ok(batches[0].clone()),
        _ => compute::concat_batches(schema, batches)
            .map_err(|e| Error::Storage(format!("failed to combine batches: {e}"))),
    }
}

/// Keep only the rows selected by `mask`.
///
/// # Errors
/// Returns [`Error::Storage`] if the mask length does not match the batch.
pub fn apply_mask(batch: &RecordBatch, mask: &BooleanArray) -> Result<RecordBatch> {
    compute::filter_record_batch(batch, mask)
        .map_err(|e| Error::Storage(format!("failed to apply selection: {e}")))
}

/// Read a numeric column as `f64` values. Null entries read as 0.
///
/// # Errors
/// Returns [`Error::Configuration`] if the column does not exist or is not
/// one of the supported numeric types (Int32/Int64/Float32/Float64).
#[allow(clippy::cast_precision_loss)]
pub fn column_as_f64(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let schema = batch.schema();
    let index = schema
        .fields()
        .iter()
        .position(|f| f.name() == name)
        .ok_or_else(|| Error::Configuration(format!("column '{name}' not found in schema")))?;

    let column = batch.column(index);
    let values = match column.data_type() {
        DataType::Int32 => {
            let array = downcast::<Int32Array>(column, name)?;
            (0..array.len())
                .map(|i| if array.is_null(i) { 0.0 } else { f64::from(array.value(i)) })
                .collect()
        }
        DataType::Int64 => {
            let array = downcast::<Int64Array>(column, name)?;
            (0..array.len())
                .map(|i| if array.is_null(i) { 0.0 } else { array.value(i) as f64 })
                .collect()
        }
        DataType::Float32 => {
            let array = downcast::<Float32Array>(column, name)?;
            (0..array.len())
                .map(|i| if array.is_null(i) { 0.0 } else { f64::from(array.value(i)) })
                .collect()
        }
        DataType::Float64 => {
            let array = downcast::<Float64Array>(column, name)?;
            (0..array.len())
                .map(|i| if array.is_null(i) { 0.0 } else { array.value(i) })
                .collect()
        }
        dt => {
            return Err(Error::Configuration(format!(
                "column '{name}' has non-numeric type {dt:?}"
            )))
        }
    };
    Ok(values)
}

fn downcast<'a, T: 'static>(
    column: &'a arrow::array::ArrayRef,
    name: &str,
) -> Result<&'a T> {
    column
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Storage(format!("failed to downcast column '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float32Array, Int32Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn test_batch(num_rows: usize) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("nJets", DataType::Int32, false),
            Field::new("HT_jets", DataType::Float32, false),
            Field::new("sample", DataType::Utf8, false),
        ]);
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let jets = Int32Array::from_iter_values((0..num_rows).map(|i| (i % 8) as i32));
        #[allow(clippy::cast_precision_loss)]
        let ht = Float32Array::from_iter_values((0..num_rows).map(|i| i as f32 * 10.0));
        let sample = StringArray::from_iter_values((0..num_rows).map(|i| format!("evt_{i}")));
        RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(jets), Arc::new(ht), Arc::new(sample)],
        )
        .unwrap()
    }

    #[test]
    fn test_column_as_f64_int_and_float() {
        let batch = test_batch(4);
        let jets = column_as_f64(&batch, "nJets").unwrap();
        assert_eq!(jets, vec![0.0, 1.0, 2.0, 3.0]);
        let ht = column_as_f64(&batch, "HT_jets").unwrap();
        assert_eq!(ht, vec![0.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_column_as_f64_missing_column() {
        let batch = test_batch(4);
        let err = column_as_f64(&batch, "nBTags_70").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("nBTags_70"));
    }

    #[test]
    fn test_column_as_f64_rejects_strings() {
        let batch = test_batch(4);
        let err = column_as_f64(&batch, "sample").unwrap_err();
        assert!(err.to_string().contains("non-numeric"));
    }

    #[test]
    fn test_apply_mask_keeps_selected_rows() {
        let batch = test_batch(4);
        let mask = BooleanArray::from(vec![true, false, true, false]);
        let filtered = apply_mask(&batch, &mask).unwrap();
        assert_eq!(filtered.num_rows(), 2);
        let jets = column_as_f64(&filtered, "nJets").unwrap();
        assert_eq!(jets, vec![0.0, 2.0]);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dataset = DatasetRef::new("/nonexistent/events.parquet", "nominal_Loose");
        let err = EventTable::load(&dataset).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_from_batch_accessors() {
        let table = EventTable::from_batch("nominal_Loose", test_batch(7));
        assert_eq!(table.name(), "nominal_Loose");
        assert_eq!(table.num_rows(), 7);
        assert_eq!(table.schema().fields().len(), 3);
    }
}
