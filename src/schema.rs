//! Column schemas for the two table kinds.
//!
//! Each schema is a fixed mapping table: source column → record field →
//! coercion rule. The normalizer reads fields through a [`SchemaRow`], so the
//! table is the single place that knows column names and unit conversions.

use anyhow::{anyhow, Result};
use std::collections::HashSet;

use crate::registry::TableKind;
use crate::table::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    /// Leading integer; negative or unparseable → 0
    Integer,
    /// Float passed through unchanged
    Float,
    /// Float in 0..1 stored as a 0..100 percentage
    Fraction,
    /// Raw string; missing → ""
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub column: &'static str,
    pub field: &'static str,
    pub coercion: Coercion,
}

const fn col(column: &'static str, field: &'static str, coercion: Coercion) -> ColumnSpec {
    ColumnSpec {
        column,
        field,
        coercion,
    }
}

#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
}

pub static EPOCH_SCHEMA: Schema = Schema {
    name: "epochs",
    columns: &[
        col("Epoch", "epoch", Coercion::Integer),
        col("Train_Loss", "train_loss", Coercion::Float),
        col("Val_Loss", "val_loss", Coercion::Float),
        col("Train_Accuracy", "train_accuracy", Coercion::Fraction),
        col("Val_Accuracy", "val_accuracy", Coercion::Fraction),
        col("Epoch_Train_Time_sec", "epoch_time_secs", Coercion::Float),
        col("Final_Test_Accuracy", "test_accuracy", Coercion::Fraction),
        col("Total_Training_Time_sec", "total_training_secs", Coercion::Float),
        col("Inference_Time_ms", "inference_ms", Coercion::Float),
        col("Model_Size_MB", "model_size_mb", Coercion::Float),
        col("Parameter_Count", "parameter_count", Coercion::Integer),
    ],
};

pub static CLASS_SCHEMA: Schema = Schema {
    name: "classes",
    columns: &[
        col("Class", "class_name", Coercion::Text),
        col("Precision", "precision", Coercion::Fraction),
        col("Recall", "recall", Coercion::Fraction),
        col("F1_Score", "f1_score", Coercion::Fraction),
    ],
};

impl Schema {
    pub fn for_table(table: TableKind) -> &'static Schema {
        match table {
            TableKind::Epochs => &EPOCH_SCHEMA,
            TableKind::Classes => &CLASS_SCHEMA,
        }
    }

    pub fn spec(&self, field: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.field == field)
    }

    /// Schema columns absent from a parsed header.
    pub fn missing_columns(&self, headers: &[String]) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|c| !headers.iter().any(|h| h == c.column))
            .map(|c| c.column)
            .collect()
    }

    /// Columns and fields are unique, and every field in `required` is mapped.
    pub fn validate(&self, required: &[&str]) -> Result<()> {
        let mut columns = HashSet::new();
        let mut fields = HashSet::new();
        for c in self.columns {
            if !columns.insert(c.column) {
                return Err(anyhow!("{} schema: duplicate column {}", self.name, c.column));
            }
            if !fields.insert(c.field) {
                return Err(anyhow!("{} schema: duplicate field {}", self.name, c.field));
            }
        }
        for field in required {
            if !fields.contains(field) {
                return Err(anyhow!("{} schema: field {} is not mapped", self.name, field));
            }
        }
        Ok(())
    }

    pub fn row<'a>(&'a self, raw: &'a RawRecord) -> SchemaRow<'a> {
        SchemaRow { schema: self, raw }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(u64),
    Num(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Int(v) => *v as f64,
            FieldValue::Num(v) => *v,
            FieldValue::Text(_) => 0.0,
        }
    }

    pub fn as_u64(&self) -> u64 {
        match self {
            FieldValue::Int(v) => *v,
            FieldValue::Num(v) if *v >= 0.0 => v.trunc() as u64,
            _ => 0,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            FieldValue::Text(s) => s,
            _ => String::new(),
        }
    }
}

/// Apply a coercion rule to a raw cell. Never fails.
pub fn coerce(coercion: Coercion, raw: Option<&str>) -> FieldValue {
    let raw = raw.unwrap_or("");
    match coercion {
        Coercion::Integer => FieldValue::Int(
            parse_int_lenient(raw)
                .filter(|v| *v >= 0)
                .map(|v| v as u64)
                .unwrap_or(0),
        ),
        Coercion::Float => FieldValue::Num(parse_float_lenient(raw).unwrap_or(0.0)),
        Coercion::Fraction => FieldValue::Num(parse_float_lenient(raw).unwrap_or(0.0) * 100.0),
        Coercion::Text => FieldValue::Text(raw.to_string()),
    }
}

/// A raw record viewed through a schema.
pub struct SchemaRow<'a> {
    schema: &'a Schema,
    raw: &'a RawRecord,
}

impl SchemaRow<'_> {
    /// Coerced value of a field; an unmapped field reads as missing text.
    pub fn value(&self, field: &str) -> FieldValue {
        match self.schema.spec(field) {
            Some(spec) => coerce(spec.coercion, self.raw.get(spec.column).map(String::as_str)),
            None => FieldValue::Text(String::new()),
        }
    }

    pub fn number(&self, field: &str) -> f64 {
        self.value(field).as_f64()
    }

    pub fn integer(&self, field: &str) -> u64 {
        self.value(field).as_u64()
    }

    pub fn text(&self, field: &str) -> String {
        self.value(field).into_text()
    }
}

/// Float from the longest leading numeric prefix (`"12.5s"` → 12.5).
pub fn parse_float_lenient(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if let Ok(v) = s.parse::<f64>() {
        return v.is_finite().then_some(v);
    }
    let end = float_prefix_len(s);
    if end == 0 {
        return None;
    }
    s[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Integer from the leading sign and digits (`"1.2e7"` → 1).
pub fn parse_int_lenient(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    s[..end].parse::<i64>().ok()
}

fn float_prefix_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i = 1;
    }
    let mut digits = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
        digits += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        let mut frac = 0;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
            frac += 1;
        }
        if digits + frac > 0 {
            i = j;
            digits += frac;
        }
    }
    if digits == 0 {
        return 0;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    i
}
