//! Content fingerprints for the tables behind a dataset.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::registry::{DatasetDescriptor, ModelKind, TableKind};
use crate::schema::Schema;
use crate::source::TableSource;
use crate::table::parse_table_detailed;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableManifest {
    pub model: ModelKind,
    pub table: TableKind,
    pub location: String,
    pub hash_sha256: Option<String>,
    pub bytes: usize,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub dropped_rows: usize,
    pub missing_columns: Vec<String>,
    /// Set when the table could not be fetched
    pub error: Option<String>,
}

impl TableManifest {
    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.dropped_rows == 0 && self.missing_columns.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub dataset_id: String,
    pub name: String,
    pub tables: Vec<TableManifest>,
    pub generated_at: String,
}

impl DatasetManifest {
    pub fn is_complete(&self) -> bool {
        self.tables.iter().all(TableManifest::is_complete)
    }
}

pub fn text_sha256(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Describe one table as its source serves it.
pub fn describe_table(model: ModelKind, table: TableKind, location: &str, text: &str) -> TableManifest {
    let parsed = parse_table_detailed(text);
    let missing_columns = if parsed.headers.is_empty() {
        Vec::new()
    } else {
        Schema::for_table(table)
            .missing_columns(&parsed.headers)
            .into_iter()
            .map(str::to_string)
            .collect()
    };
    TableManifest {
        model,
        table,
        location: location.to_string(),
        hash_sha256: Some(text_sha256(text)),
        bytes: text.len(),
        columns: parsed.headers,
        row_count: parsed.rows.len(),
        dropped_rows: parsed.dropped_rows,
        missing_columns,
        error: None,
    }
}

/// Fetch every table of a dataset and describe it. Fetch failures are
/// recorded per table, not returned.
pub async fn build_manifest<S: TableSource + ?Sized>(
    source: &S,
    descriptor: &DatasetDescriptor,
) -> DatasetManifest {
    let _scope = ProfileScope::new("build_manifest");
    let mut tables = Vec::with_capacity(4);
    for model in ModelKind::ALL {
        for table in TableKind::ALL {
            let location = descriptor.paths.location(model, table);
            let entry = match source.fetch_text(location).await {
                Ok(text) => describe_table(model, table, location, &text),
                Err(err) => {
                    log(
                        Level::Warn,
                        Domain::Source,
                        "manifest_fetch_failed",
                        obj(&[("location", v_str(location)), ("error", v_str(&err.to_string()))]),
                    );
                    TableManifest {
                        model,
                        table,
                        location: location.to_string(),
                        hash_sha256: None,
                        bytes: 0,
                        columns: Vec::new(),
                        row_count: 0,
                        dropped_rows: 0,
                        missing_columns: Vec::new(),
                        error: Some(err.to_string()),
                    }
                }
            };
            tables.push(entry);
        }
    }

    DatasetManifest {
        dataset_id: descriptor.id.to_string(),
        name: descriptor.name.clone(),
        tables,
        generated_at: chrono::Utc::now().to_rfc3339(),
    }
}
