//! Per-dataset orchestration: fetch the four tables concurrently, normalize,
//! aggregate, and report which tables came back degraded.
//!
//! A table that cannot be fetched becomes empty; a table with dropped rows or
//! missing columns keeps what survived. Neither stops the load. The only hard
//! failure is asking for a dataset the registry does not know.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::aggregate::FinalMetrics;
use crate::logging::{log, obj, v_num, v_str, Domain, Level, ProfileScope};
use crate::normalize::{self, ClassRecord, EpochRecord};
use crate::registry::{DatasetId, ModelKind, Registry, TableKind};
use crate::schema::{Schema, CLASS_SCHEMA, EPOCH_SCHEMA};
use crate::source::TableSource;
use crate::table::{parse_table_detailed, RawRecord};

// =============================================================================
// Degradation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// Table could not be fetched; treated as empty
    FetchFailure { location: String, reason: String },
    /// Table parsed with dropped rows or missing columns
    ParseDegradation {
        location: String,
        dropped_rows: usize,
        missing_columns: Vec<String>,
    },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::FetchFailure { location, reason } => {
                write!(f, "fetch failed for {}: {}", location, reason)
            }
            Degradation::ParseDegradation {
                location,
                dropped_rows,
                missing_columns,
            } => write!(
                f,
                "{}: {} dropped rows, missing columns {:?}",
                location, dropped_rows, missing_columns
            ),
        }
    }
}

/// A value that may have been produced from incomplete input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradable<T> {
    pub value: T,
    pub degraded: bool,
    pub cause: Option<Degradation>,
}

impl<T> Degradable<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            degraded: false,
            cause: None,
        }
    }

    pub fn degraded(value: T, cause: Degradation) -> Self {
        Self {
            value,
            degraded: true,
            cause: Some(cause),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Degradable<U> {
        Degradable {
            value: f(self.value),
            degraded: self.degraded,
            cause: self.cause,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStatus {
    pub model: ModelKind,
    pub table: TableKind,
    pub location: String,
    pub rows: usize,
    pub degraded: bool,
    pub cause: Option<Degradation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub tables: Vec<TableStatus>,
}

impl LoadReport {
    pub fn is_degraded(&self) -> bool {
        self.tables.iter().any(|t| t.degraded)
    }

    /// Every table failed to fetch.
    pub fn all_failed(&self) -> bool {
        !self.tables.is_empty()
            && self
                .tables
                .iter()
                .all(|t| matches!(t.cause, Some(Degradation::FetchFailure { .. })))
    }

    pub fn degradations(&self) -> impl Iterator<Item = &Degradation> {
        self.tables.iter().filter_map(|t| t.cause.as_ref())
    }

    pub fn status(&self, model: ModelKind, table: TableKind) -> Option<&TableStatus> {
        self.tables.iter().find(|t| t.model == model && t.table == table)
    }
}

// =============================================================================
// Metrics
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub epochs: Vec<EpochRecord>,
    pub classes: Vec<ClassRecord>,
    pub final_metrics: FinalMetrics,
}

impl ModelMetrics {
    pub fn new(epochs: Vec<EpochRecord>, classes: Vec<ClassRecord>) -> Self {
        let final_metrics = FinalMetrics::compute(&epochs, &classes);
        Self {
            epochs,
            classes,
            final_metrics,
        }
    }
}

impl Default for ModelMetrics {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinedMetrics {
    pub cnn: ModelMetrics,
    pub vit: ModelMetrics,
}

impl CombinedMetrics {
    pub fn model(&self, kind: ModelKind) -> &ModelMetrics {
        match kind {
            ModelKind::Cnn => &self.cnn,
            ModelKind::Vit => &self.vit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedDataset {
    pub dataset_id: DatasetId,
    pub metrics: CombinedMetrics,
    pub report: LoadReport,
}

// =============================================================================
// Loader
// =============================================================================

#[async_trait]
pub trait MetricsLoader: Send + Sync {
    async fn load(&self, id: &DatasetId) -> Result<LoadedDataset>;
}

pub struct DatasetMetricsLoader<S> {
    registry: Arc<Registry>,
    source: S,
}

impl<S: TableSource> DatasetMetricsLoader<S> {
    /// Fails only if the column schemas do not cover the normalizer.
    pub fn new(registry: Arc<Registry>, source: S) -> Result<Self> {
        normalize::validate_schemas()?;
        Ok(Self { registry, source })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub async fn load_epochs(&self, location: &str) -> Degradable<Vec<EpochRecord>> {
        self.load_table(location, &EPOCH_SCHEMA)
            .await
            .map(|rows| normalize::normalize_epochs(&rows))
    }

    pub async fn load_classes(&self, location: &str) -> Degradable<Vec<ClassRecord>> {
        self.load_table(location, &CLASS_SCHEMA)
            .await
            .map(|rows| normalize::normalize_classes(&rows))
    }

    async fn load_table(&self, location: &str, schema: &Schema) -> Degradable<Vec<RawRecord>> {
        let text = match self.source.fetch_text(location).await {
            Ok(text) => text,
            Err(err) => {
                log(
                    Level::Warn,
                    Domain::Loader,
                    "fetch_failed",
                    obj(&[
                        ("location", v_str(location)),
                        ("table", v_str(schema.name)),
                        ("error", v_str(&err.to_string())),
                    ]),
                );
                return Degradable::degraded(
                    Vec::new(),
                    Degradation::FetchFailure {
                        location: location.to_string(),
                        reason: err.to_string(),
                    },
                );
            }
        };

        let parsed = parse_table_detailed(&text);
        let missing: Vec<String> = if parsed.headers.is_empty() {
            Vec::new()
        } else {
            schema
                .missing_columns(&parsed.headers)
                .into_iter()
                .map(str::to_string)
                .collect()
        };

        if parsed.dropped_rows == 0 && missing.is_empty() {
            return Degradable::clean(parsed.rows);
        }

        log(
            Level::Warn,
            Domain::Parse,
            "table_degraded",
            obj(&[
                ("location", v_str(location)),
                ("table", v_str(schema.name)),
                ("rows", v_num(parsed.rows.len() as f64)),
                ("dropped_rows", v_num(parsed.dropped_rows as f64)),
                ("missing_columns", v_str(&missing.join(","))),
            ]),
        );
        Degradable::degraded(
            parsed.rows,
            Degradation::ParseDegradation {
                location: location.to_string(),
                dropped_rows: parsed.dropped_rows,
                missing_columns: missing,
            },
        )
    }
}

fn table_status<T>(model: ModelKind, table: TableKind, location: &str, d: &Degradable<Vec<T>>) -> TableStatus {
    TableStatus {
        model,
        table,
        location: location.to_string(),
        rows: d.value.len(),
        degraded: d.degraded,
        cause: d.cause.clone(),
    }
}

#[async_trait]
impl<S: TableSource> MetricsLoader for DatasetMetricsLoader<S> {
    async fn load(&self, id: &DatasetId) -> Result<LoadedDataset> {
        let descriptor = self
            .registry
            .get(id)
            .ok_or_else(|| anyhow!("unknown dataset: {}", id))?;
        let _scope = ProfileScope::with_context("load_dataset", &[("dataset", v_str(id.as_str()))]);

        let paths = &descriptor.paths;
        let cnn_epochs_at = paths.location(ModelKind::Cnn, TableKind::Epochs);
        let vit_epochs_at = paths.location(ModelKind::Vit, TableKind::Epochs);
        let cnn_classes_at = paths.location(ModelKind::Cnn, TableKind::Classes);
        let vit_classes_at = paths.location(ModelKind::Vit, TableKind::Classes);

        let (cnn_epochs, vit_epochs, cnn_classes, vit_classes) = tokio::join!(
            self.load_epochs(cnn_epochs_at),
            self.load_epochs(vit_epochs_at),
            self.load_classes(cnn_classes_at),
            self.load_classes(vit_classes_at),
        );

        let report = LoadReport {
            tables: vec![
                table_status(ModelKind::Cnn, TableKind::Epochs, cnn_epochs_at, &cnn_epochs),
                table_status(ModelKind::Vit, TableKind::Epochs, vit_epochs_at, &vit_epochs),
                table_status(ModelKind::Cnn, TableKind::Classes, cnn_classes_at, &cnn_classes),
                table_status(ModelKind::Vit, TableKind::Classes, vit_classes_at, &vit_classes),
            ],
        };

        let metrics = CombinedMetrics {
            cnn: ModelMetrics::new(cnn_epochs.value, cnn_classes.value),
            vit: ModelMetrics::new(vit_epochs.value, vit_classes.value),
        };

        if report.all_failed() {
            log(
                Level::Warn,
                Domain::Loader,
                "all_sources_failed",
                obj(&[("dataset", v_str(id.as_str()))]),
            );
        }
        log(
            Level::Info,
            Domain::Loader,
            "dataset_loaded",
            obj(&[
                ("dataset", v_str(id.as_str())),
                ("cnn_epochs", v_num(metrics.cnn.epochs.len() as f64)),
                ("vit_epochs", v_num(metrics.vit.epochs.len() as f64)),
                ("cnn_classes", v_num(metrics.cnn.classes.len() as f64)),
                ("vit_classes", v_num(metrics.vit.classes.len() as f64)),
                ("degraded", serde_json::Value::Bool(report.is_degraded())),
            ]),
        );

        Ok(LoadedDataset {
            dataset_id: id.clone(),
            metrics,
            report,
        })
    }
}
