use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
    TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde_json::json;

use storywatch_common::StoryMetricRecord;

use super::{StoreError, DATASET};

/// Bumped whenever a column is added, removed, renamed or retyped.
pub const SCHEMA_VERSION: u32 = 2;

fn utc_micros() -> DataType {
    DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
}

fn story_metrics_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("account_id", DataType::Utf8, false),
        Field::new("story_id", DataType::Utf8, false),
        Field::new("run_date", DataType::Date32, false),
        Field::new("fetched_at", utc_micros(), false),
        Field::new("posted_at", utc_micros(), true),
        Field::new("media_type", DataType::Utf8, true),
        Field::new("permalink", DataType::Utf8, true),
        Field::new("views", DataType::Int64, false),
        Field::new("reach", DataType::Int64, false),
        Field::new("navigation_total", DataType::Int64, false),
        Field::new("navigation_taps_forward", DataType::Int64, true),
        Field::new("navigation_taps_back", DataType::Int64, true),
        Field::new("navigation_taps_exit", DataType::Int64, true),
        Field::new("navigation_swipe_forward", DataType::Int64, true),
        Field::new("navigation_provenance", DataType::Utf8, false),
        Field::new("navigation_mismatch", DataType::Boolean, false),
        Field::new("replies", DataType::Int64, false),
        Field::new("shares", DataType::Int64, false),
        Field::new("total_interactions", DataType::Int64, false),
        Field::new("profile_visits", DataType::Int64, false),
        Field::new("follows", DataType::Int64, false),
        Field::new("exit_rate", DataType::Float64, true),
        Field::new("reply_rate", DataType::Float64, true),
        Field::new("forward_rate", DataType::Float64, true),
        Field::new("back_rate", DataType::Float64, true),
    ]))
}

/// The sidecar written next to every data object.
pub fn schema_document() -> serde_json::Value {
    let schema = story_metrics_schema();
    let fields: Vec<serde_json::Value> = schema
        .fields()
        .iter()
        .map(|f| {
            json!({
                "name": f.name(),
                "type": f.data_type().to_string(),
                "nullable": f.is_nullable(),
            })
        })
        .collect();

    json!({
        "type": "struct",
        "dataset": DATASET,
        "schema_version": SCHEMA_VERSION,
        "fields": fields,
    })
}

fn writer_properties() -> WriterProperties {
    let version = KeyValue {
        key: "storywatch.schema_version".to_string(),
        value: Some(SCHEMA_VERSION.to_string()),
    };
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![version]))
        .build()
}

fn int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    date.signed_duration_since(epoch).num_days() as i32
}

/// Encode records as a single-row-group Parquet file.
pub fn encode_records(records: &[StoryMetricRecord], run_date: NaiveDate) -> Result<Bytes, StoreError> {
    let schema = story_metrics_schema();
    let ints = |f: fn(&StoryMetricRecord) -> u64| -> ArrayRef {
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| int(f(r)))))
    };
    let opt_ints = |f: fn(&StoryMetricRecord) -> Option<u64>| -> ArrayRef {
        Arc::new(Int64Array::from(records.iter().map(|r| f(r).map(int)).collect::<Vec<_>>()))
    };
    let floats = |f: fn(&StoryMetricRecord) -> Option<f64>| -> ArrayRef {
        Arc::new(Float64Array::from(records.iter().map(f).collect::<Vec<_>>()))
    };
    let strings = |f: fn(&StoryMetricRecord) -> Option<&str>| -> ArrayRef {
        Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>()))
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.account_id.as_str()))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.story_id.as_str()))),
        Arc::new(Date32Array::from(vec![days_since_epoch(run_date); records.len()])),
        Arc::new(
            TimestampMicrosecondArray::from(
                records.iter().map(|r| r.fetched_at.timestamp_micros()).collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        ),
        Arc::new(
            TimestampMicrosecondArray::from(
                records
                    .iter()
                    .map(|r| r.posted_at.map(|t| t.timestamp_micros()))
                    .collect::<Vec<_>>(),
            )
            .with_timezone("UTC"),
        ),
        strings(|r| r.media_type.as_deref()),
        strings(|r| r.permalink.as_deref()),
        ints(|r| r.views),
        ints(|r| r.reach),
        ints(|r| r.navigation_total),
        opt_ints(|r| r.navigation_taps_forward),
        opt_ints(|r| r.navigation_taps_back),
        opt_ints(|r| r.navigation_taps_exit),
        opt_ints(|r| r.navigation_swipe_forward),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.navigation_provenance.as_str()),
        )),
        Arc::new(BooleanArray::from(
            records.iter().map(|r| r.navigation_mismatch).collect::<Vec<_>>(),
        )),
        ints(|r| r.replies),
        ints(|r| r.shares),
        ints(|r| r.total_interactions),
        ints(|r| r.profile_visits),
        ints(|r| r.follows),
        floats(|r| r.exit_rate),
        floats(|r| r.reply_rate),
        floats(|r| r.forward_rate),
        floats(|r| r.back_rate),
    ];

    let batch = RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| StoreError::Encode(format!("record batch build failed: {e}")))?;

    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(writer_properties()))
        .map_err(|e| StoreError::Encode(format!("parquet writer init failed: {e}")))?;
    writer
        .write(&batch)
        .map_err(|e| StoreError::Encode(format!("parquet write failed: {e}")))?;
    writer
        .close()
        .map_err(|e| StoreError::Encode(format!("parquet close failed: {e}")))?;
    Ok(Bytes::from(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use arrow::array::Array;
    use chrono::Utc;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use storywatch_common::{Account, NavigationProvenance};

    use super::*;

    fn record(id: &str, breakdown: Option<[u64; 4]>) -> StoryMetricRecord {
        StoryMetricRecord {
            account_id: Account::Lt,
            story_id: id.to_string(),
            fetched_at: Utc::now(),
            posted_at: None,
            media_type: Some("VIDEO".into()),
            permalink: None,
            views: 100,
            reach: 90,
            navigation_total: breakdown.map(|b| b.iter().sum()).unwrap_or(12),
            navigation_taps_forward: breakdown.map(|b| b[0]),
            navigation_taps_back: breakdown.map(|b| b[1]),
            navigation_taps_exit: breakdown.map(|b| b[2]),
            navigation_swipe_forward: breakdown.map(|b| b[3]),
            navigation_provenance: if breakdown.is_some() {
                NavigationProvenance::Breakdown
            } else {
                NavigationProvenance::TotalOnly
            },
            navigation_mismatch: false,
            replies: 1,
            shares: 0,
            total_interactions: 1,
            profile_visits: 0,
            follows: 0,
            exit_rate: None,
            reply_rate: Some(1.0),
            forward_rate: None,
            back_rate: None,
        }
    }

    fn read_back(bytes: Bytes) -> Vec<RecordBatch> {
        ParquetRecordBatchReaderBuilder::try_new(bytes)
            .unwrap()
            .build()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn empty_input_still_produces_a_readable_file() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let bytes = encode_records(&[], date).unwrap();
        assert!(!bytes.is_empty());

        let rows: usize = read_back(bytes).iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 0);
    }

    #[test]
    fn unknown_breakdown_is_written_as_null() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let bytes = encode_records(&[record("a", Some([1, 2, 3, 4])), record("b", None)], date).unwrap();
        let batches = read_back(bytes);
        let batch = &batches[0];

        let fwd = batch
            .column_by_name("navigation_taps_forward")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(fwd.value(0), 1);
        assert!(fwd.is_null(1));

        let total = batch
            .column_by_name("navigation_total")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(total.value(0), 10);
        assert_eq!(total.value(1), 12);
    }

    #[test]
    fn schema_document_lists_every_column() {
        let doc = schema_document();
        let fields = doc["fields"].as_array().unwrap();
        assert_eq!(fields.len(), story_metrics_schema().fields().len());
        assert_eq!(doc["schema_version"], SCHEMA_VERSION);
        assert_eq!(fields[0]["name"], "account_id");
        assert_eq!(fields[0]["nullable"], false);
    }

    #[test]
    fn epoch_day_conversion() {
        assert_eq!(days_since_epoch(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap()), 1);
    }
}
