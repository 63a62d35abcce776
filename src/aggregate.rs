//! Per-model summary: class-averaged scores, the terminal-epoch snapshot and
//! display strings.

use serde::{Deserialize, Serialize};

use crate::normalize::{ClassRecord, EpochRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassMetric {
    Precision,
    Recall,
    F1Score,
}

impl ClassMetric {
    pub const ALL: [ClassMetric; 3] = [ClassMetric::Precision, ClassMetric::Recall, ClassMetric::F1Score];

    pub fn of(&self, class: &ClassRecord) -> f64 {
        match self {
            ClassMetric::Precision => class.precision,
            ClassMetric::Recall => class.recall,
            ClassMetric::F1Score => class.f1_score,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ClassMetric::Precision => "Precision",
            ClassMetric::Recall => "Recall",
            ClassMetric::F1Score => "F1-Score",
        }
    }
}

/// Arithmetic mean of one metric across classes; 0 for an empty table.
pub fn mean_metric(classes: &[ClassRecord], metric: ClassMetric) -> f64 {
    if classes.is_empty() {
        return 0.0;
    }
    let sum: f64 = classes.iter().map(|c| metric.of(c)).sum();
    sum / classes.len() as f64
}

/// Last epoch of the sequence, or an all-zero record.
pub fn final_epoch(epochs: &[EpochRecord]) -> EpochRecord {
    epochs.last().copied().unwrap_or_default()
}

/// Fixed-point text with ties rounded away from zero (`42.25` → `"42.3"`).
pub fn fixed(value: f64, places: usize) -> String {
    let scale = 10f64.powi(places as i32);
    let rounded = (value * scale).round() / scale;
    format!("{:.*}", places, rounded)
}

pub fn format_millions(count: u64) -> String {
    format!("{}M", fixed(count as f64 / 1_000_000.0, 1))
}

pub fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{} sec", fixed(secs, 1))
    } else if secs < 3600.0 {
        format!("{} min", fixed(secs / 60.0, 1))
    } else {
        format!("{} hr", fixed(secs / 3600.0, 1))
    }
}

pub fn format_inference_ms(ms: f64) -> String {
    format!("{} ms", fixed(ms, 2))
}

pub fn format_size_mb(mb: f64) -> String {
    format!("{} MB", fixed(mb, 1))
}

/// Snapshot shown for one model once its tables are loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalMetrics {
    pub test_accuracy: f64,
    /// Validation loss of the final epoch
    pub final_loss: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub parameters: String,
    pub training_time: String,
    pub inference_time: String,
    pub model_size: String,
    pub parameter_count: u64,
    pub total_training_secs: f64,
    pub inference_ms: f64,
    pub model_size_mb: f64,
}

impl FinalMetrics {
    pub fn compute(epochs: &[EpochRecord], classes: &[ClassRecord]) -> Self {
        let last = final_epoch(epochs);
        Self {
            test_accuracy: last.test_accuracy,
            final_loss: last.val_loss,
            precision: mean_metric(classes, ClassMetric::Precision),
            recall: mean_metric(classes, ClassMetric::Recall),
            f1_score: mean_metric(classes, ClassMetric::F1Score),
            parameters: format_millions(last.parameter_count),
            training_time: format_duration(last.total_training_secs),
            inference_time: format_inference_ms(last.inference_ms),
            model_size: format_size_mb(last.model_size_mb),
            parameter_count: last.parameter_count,
            total_training_secs: last.total_training_secs,
            inference_ms: last.inference_ms,
            model_size_mb: last.model_size_mb,
        }
    }

    pub fn score(&self, metric: ClassMetric) -> f64 {
        match metric {
            ClassMetric::Precision => self.precision,
            ClassMetric::Recall => self.recall,
            ClassMetric::F1Score => self.f1_score,
        }
    }
}

impl Default for FinalMetrics {
    fn default() -> Self {
        Self::compute(&[], &[])
    }
}
