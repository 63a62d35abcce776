//! Typed epoch and class records built from raw table rows.

use serde::{Deserialize, Serialize};

use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::schema::{Schema, CLASS_SCHEMA, EPOCH_SCHEMA};
use crate::table::RawRecord;

/// Fields the normalizer reads from the epoch schema.
pub const EPOCH_FIELDS: &[&str] = &[
    "epoch",
    "train_loss",
    "val_loss",
    "train_accuracy",
    "val_accuracy",
    "epoch_time_secs",
    "test_accuracy",
    "total_training_secs",
    "inference_ms",
    "model_size_mb",
    "parameter_count",
];

/// Fields the normalizer reads from the class schema.
pub const CLASS_FIELDS: &[&str] = &["class_name", "precision", "recall", "f1_score"];

/// One training epoch of one model. Accuracies are percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: u32,
    pub train_loss: f64,
    pub val_loss: f64,
    pub train_accuracy: f64,
    pub val_accuracy: f64,
    /// Wall time of this epoch in seconds
    pub epoch_time_secs: f64,
    pub test_accuracy: f64,
    /// Cumulative training time in seconds
    pub total_training_secs: f64,
    pub inference_ms: f64,
    pub model_size_mb: f64,
    pub parameter_count: u64,
}

impl EpochRecord {
    pub fn from_raw(raw: &RawRecord) -> Self {
        let row = EPOCH_SCHEMA.row(raw);
        Self {
            epoch: u32::try_from(row.integer("epoch")).unwrap_or(0),
            train_loss: row.number("train_loss"),
            val_loss: row.number("val_loss"),
            train_accuracy: row.number("train_accuracy"),
            val_accuracy: row.number("val_accuracy"),
            epoch_time_secs: row.number("epoch_time_secs"),
            test_accuracy: row.number("test_accuracy"),
            total_training_secs: row.number("total_training_secs"),
            inference_ms: row.number("inference_ms"),
            model_size_mb: row.number("model_size_mb"),
            parameter_count: row.integer("parameter_count"),
        }
    }
}

/// Per-class scores of one model. Scores are percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub class_name: String,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl ClassRecord {
    pub fn from_raw(raw: &RawRecord) -> Self {
        let row = CLASS_SCHEMA.row(raw);
        Self {
            class_name: row.text("class_name"),
            precision: row.number("precision"),
            recall: row.number("recall"),
            f1_score: row.number("f1_score"),
        }
    }
}

fn log_normalized(table: &str, rows: usize) {
    log(
        Level::Debug,
        Domain::Normalize,
        "normalized",
        obj(&[("table", v_str(table)), ("rows", v_num(rows as f64))]),
    );
}

pub fn normalize_epochs(rows: &[RawRecord]) -> Vec<EpochRecord> {
    log_normalized(EPOCH_SCHEMA.name, rows.len());
    rows.iter().map(EpochRecord::from_raw).collect()
}

pub fn normalize_classes(rows: &[RawRecord]) -> Vec<ClassRecord> {
    log_normalized(CLASS_SCHEMA.name, rows.len());
    rows.iter().map(ClassRecord::from_raw).collect()
}

/// Check both schemas against the fields read above.
pub fn validate_schemas() -> anyhow::Result<()> {
    let pairs: [(&Schema, &[&str]); 2] = [(&EPOCH_SCHEMA, EPOCH_FIELDS), (&CLASS_SCHEMA, CLASS_FIELDS)];
    for (schema, fields) in pairs {
        schema.validate(fields)?;
    }
    Ok(())
}
