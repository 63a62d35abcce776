//! Dataset registry: which benchmark datasets exist and where each model's
//! tables live.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::logging::{log, obj, v_num, v_str, Domain, Level};

pub const DEFAULT_DATASET: &str = "cifar10";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DatasetId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two architectures being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Cnn,
    Vit,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::Cnn, ModelKind::Vit];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Cnn => "cnn",
            ModelKind::Vit => "vit",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Cnn => "ResNet-18",
            ModelKind::Vit => "DeiT-tiny",
        }
    }

    /// Prefix used by the conventional table file names.
    pub fn file_stem(&self) -> &'static str {
        match self {
            ModelKind::Cnn => "resnet18",
            ModelKind::Vit => "deit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Epochs,
    Classes,
}

impl TableKind {
    pub const ALL: [TableKind; 2] = [TableKind::Epochs, TableKind::Classes];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Epochs => "epochs",
            TableKind::Classes => "classes",
        }
    }
}

/// Locations of the four source tables of one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePaths {
    pub cnn_epochs: String,
    pub vit_epochs: String,
    pub cnn_classes: String,
    pub vit_classes: String,
}

impl SourcePaths {
    /// `<dataset>/<model>_<kind>.csv` for every model and table.
    pub fn conventional(id: &str) -> Self {
        let path = |model: ModelKind, table: TableKind| {
            format!("{}/{}_{}.csv", id, model.file_stem(), table.as_str())
        };
        Self {
            cnn_epochs: path(ModelKind::Cnn, TableKind::Epochs),
            vit_epochs: path(ModelKind::Vit, TableKind::Epochs),
            cnn_classes: path(ModelKind::Cnn, TableKind::Classes),
            vit_classes: path(ModelKind::Vit, TableKind::Classes),
        }
    }

    pub fn location(&self, model: ModelKind, table: TableKind) -> &str {
        match (model, table) {
            (ModelKind::Cnn, TableKind::Epochs) => &self.cnn_epochs,
            (ModelKind::Vit, TableKind::Epochs) => &self.vit_epochs,
            (ModelKind::Cnn, TableKind::Classes) => &self.cnn_classes,
            (ModelKind::Vit, TableKind::Classes) => &self.vit_classes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub id: DatasetId,
    pub name: String,
    pub class_count: u32,
    pub description: String,
    pub paths: SourcePaths,
}

#[derive(Debug, Clone)]
pub struct Registry {
    datasets: Vec<DatasetDescriptor>,
}

impl Registry {
    /// CIFAR-10 and Caltech-256, tables under the conventional paths.
    pub fn builtin() -> Self {
        Self {
            datasets: vec![
                DatasetDescriptor {
                    id: DatasetId::new("cifar10"),
                    name: "CIFAR-10".to_string(),
                    class_count: 10,
                    description: "60,000 32x32 colour images in 10 balanced classes".to_string(),
                    paths: SourcePaths::conventional("cifar10"),
                },
                DatasetDescriptor {
                    id: DatasetId::new("caltech256"),
                    name: "Caltech-256".to_string(),
                    class_count: 257,
                    description: "30,607 variable-size images across 256 object categories plus clutter"
                        .to_string(),
                    paths: SourcePaths::conventional("caltech256"),
                },
            ],
        }
    }

    pub fn new(datasets: Vec<DatasetDescriptor>) -> Result<Self> {
        if datasets.is_empty() {
            return Err(anyhow!("registry has no datasets"));
        }
        let mut seen = HashSet::new();
        for d in &datasets {
            if !seen.insert(d.id.clone()) {
                return Err(anyhow!("duplicate dataset id: {}", d.id));
            }
        }
        Ok(Self { datasets })
    }

    /// Parse a JSON array of descriptors.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let datasets: Vec<DatasetDescriptor> =
            serde_json::from_str(text).context("invalid registry json")?;
        Self::new(datasets)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read registry {}", path.display()))?;
        let registry = Self::from_json_str(&text)?;
        log(
            Level::Info,
            Domain::Registry,
            "registry_loaded",
            obj(&[
                ("location", v_str(&path.display().to_string())),
                ("datasets", v_num(registry.datasets.len() as f64)),
            ]),
        );
        Ok(registry)
    }

    pub fn datasets(&self) -> &[DatasetDescriptor] {
        &self.datasets
    }

    pub fn get(&self, id: &DatasetId) -> Option<&DatasetDescriptor> {
        self.datasets.iter().find(|d| &d.id == id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_both_datasets() {
        let registry = Registry::builtin();
        let ids: Vec<&str> = registry.datasets().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["cifar10", "caltech256"]);
        assert!(registry.get(&DatasetId::from(DEFAULT_DATASET)).is_some());
        assert_eq!(registry.get(&"caltech256".into()).unwrap().class_count, 257);
    }

    #[test]
    fn conventional_paths_cover_all_tables() {
        let paths = SourcePaths::conventional("cifar10");
        assert_eq!(paths.location(ModelKind::Cnn, TableKind::Epochs), "cifar10/resnet18_epochs.csv");
        assert_eq!(paths.location(ModelKind::Vit, TableKind::Classes), "cifar10/deit_classes.csv");
    }

    #[test]
    fn model_names_for_display() {
        assert_eq!(ModelKind::Cnn.display_name(), "ResNet-18");
        assert_eq!(ModelKind::Vit.display_name(), "DeiT-tiny");
    }

    #[test]
    fn unknown_id_is_absent() {
        assert!(Registry::builtin().get(&"mnist".into()).is_none());
    }

    #[test]
    fn json_registry_rejects_duplicates() {
        let one = serde_json::to_value(&Registry::builtin().datasets()[0]).unwrap();
        let text = serde_json::to_string(&vec![one.clone(), one]).unwrap();
        assert!(Registry::from_json_str(&text).is_err());
    }

    #[test]
    fn json_registry_round_trips_builtin() {
        let text = serde_json::to_string(Registry::builtin().datasets()).unwrap();
        let registry = Registry::from_json_str(&text).unwrap();
        assert_eq!(registry.datasets(), Registry::builtin().datasets());
    }

    #[test]
    fn empty_registry_is_rejected() {
        assert!(Registry::from_json_str("[]").is_err());
    }
}
