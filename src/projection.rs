//! Row-oriented views of [`CombinedMetrics`] for charts.
//!
//! Rows are keyed by a shared x-axis with one column per model. Models may
//! have different sequence lengths; a missing side is `None`, never zero.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::aggregate::ClassMetric;
use crate::loader::CombinedMetrics;
use crate::normalize::ClassRecord;

const CLASS_LABEL_MAX_CHARS: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesRow {
    pub epoch: u32,
    pub cnn_accuracy: Option<f64>,
    pub vit_accuracy: Option<f64>,
    pub cnn_loss: Option<f64>,
    pub vit_loss: Option<f64>,
}

/// Validation accuracy and loss per epoch, x = 1-based position.
pub fn to_time_series(combined: &CombinedMetrics) -> Vec<TimeSeriesRow> {
    let cnn = &combined.cnn.epochs;
    let vit = &combined.vit.epochs;
    let len = cnn.len().max(vit.len());

    (0..len)
        .map(|i| TimeSeriesRow {
            epoch: (i + 1) as u32,
            cnn_accuracy: cnn.get(i).map(|e| e.val_accuracy),
            vit_accuracy: vit.get(i).map(|e| e.val_accuracy),
            cnn_loss: cnn.get(i).map(|e| e.val_loss),
            vit_loss: vit.get(i).map(|e| e.val_loss),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRow {
    pub metric: &'static str,
    pub cnn: f64,
    pub vit: f64,
}

/// Accuracy, Precision, Recall, F1-Score side by side.
pub fn overall_scores(combined: &CombinedMetrics) -> Vec<ScoreRow> {
    let cnn = &combined.cnn.final_metrics;
    let vit = &combined.vit.final_metrics;
    let mut rows = vec![ScoreRow {
        metric: "Accuracy",
        cnn: cnn.test_accuracy,
        vit: vit.test_accuracy,
    }];
    rows.extend(ClassMetric::ALL.iter().map(|m| ScoreRow {
        metric: m.label(),
        cnn: cnn.score(*m),
        vit: vit.score(*m),
    }));
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarAxis {
    pub subject: &'static str,
    pub cnn: f64,
    pub vit: f64,
    pub full_mark: f64,
}

pub fn radar_axes(combined: &CombinedMetrics) -> Vec<RadarAxis> {
    overall_scores(combined)
        .into_iter()
        .map(|row| RadarAxis {
            subject: row.metric,
            cnn: row.cnn,
            vit: row.vit,
            full_mark: 100.0,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassComparisonRow {
    pub class_name: String,
    pub cnn: Option<f64>,
    pub vit: Option<f64>,
}

/// Per-class recall, index-aligned across models, first `limit` rows.
pub fn per_class_recall(combined: &CombinedMetrics, limit: usize) -> Vec<ClassComparisonRow> {
    let cnn = &combined.cnn.classes;
    let vit = &combined.vit.classes;
    let len = cnn.len().max(vit.len()).min(limit);

    (0..len)
        .map(|i| {
            let name = cnn
                .get(i)
                .or_else(|| vit.get(i))
                .map(|c| c.class_name.as_str())
                .unwrap_or_default();
            ClassComparisonRow {
                class_name: display_class_name(name),
                cnn: cnn.get(i).map(|c| c.recall),
                vit: vit.get(i).map(|c| c.recall),
            }
        })
        .collect()
}

fn index_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]+-").expect("class prefix regex must compile"))
}

/// `"001-ak47"` → `"ak47"`, cut to 15 characters.
pub fn display_class_name(raw: &str) -> String {
    index_prefix()
        .replace(raw, "")
        .chars()
        .take(CLASS_LABEL_MAX_CHARS)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassLeader {
    pub class_name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassLeaders {
    pub precision: Option<ClassLeader>,
    pub recall: Option<ClassLeader>,
    pub f1_score: Option<ClassLeader>,
}

fn leader(classes: &[ClassRecord], metric: ClassMetric) -> Option<ClassLeader> {
    let mut best: Option<&ClassRecord> = None;
    for class in classes {
        // strict > so the first class wins a tie
        if best.map_or(true, |b| metric.of(class) > metric.of(b)) {
            best = Some(class);
        }
    }
    best.map(|c| ClassLeader {
        class_name: c.class_name.clone(),
        value: metric.of(c),
    })
}

/// Best class for each score of one model.
pub fn class_leaders(classes: &[ClassRecord]) -> ClassLeaders {
    ClassLeaders {
        precision: leader(classes, ClassMetric::Precision),
        recall: leader(classes, ClassMetric::Recall),
        f1_score: leader(classes, ClassMetric::F1Score),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Highlights {
    /// ViT test accuracy minus CNN test accuracy, in points
    pub accuracy_gap: f64,
    /// CNN parameters per ViT parameter
    pub parameter_ratio: Option<f64>,
    /// How much shorter CNN training is than ViT training, in percent
    pub training_time_saving_pct: Option<f64>,
}

pub fn highlights(combined: &CombinedMetrics) -> Highlights {
    let cnn = &combined.cnn.final_metrics;
    let vit = &combined.vit.final_metrics;
    Highlights {
        accuracy_gap: vit.test_accuracy - cnn.test_accuracy,
        parameter_ratio: (vit.parameter_count > 0)
            .then(|| cnn.parameter_count as f64 / vit.parameter_count as f64),
        training_time_saving_pct: (vit.total_training_secs > 0.0)
            .then(|| (1.0 - cnn.total_training_secs / vit.total_training_secs) * 100.0),
    }
}
