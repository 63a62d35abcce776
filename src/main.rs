use anyhow::Result;
use serde_json::json;
use std::sync::Arc;

use cnnvit::config::Config;
use cnnvit::loader::{DatasetMetricsLoader, MetricsLoader};
use cnnvit::logging::{log, obj, v_num, v_str, Domain, Level};
use cnnvit::projection::{class_leaders, highlights, overall_scores, per_class_recall, to_time_series};
use cnnvit::registry::{DatasetId, ModelKind, Registry};
use cnnvit::source;
use cnnvit::store::{LoadPhase, MetricsStore};

const CLASS_ROWS: usize = 10;

fn load_registry(cfg: &Config) -> Result<Registry> {
    match &cfg.registry_path {
        Some(path) => Registry::from_json_file(path),
        None => Ok(Registry::builtin()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let dataset = DatasetId::new(std::env::args().nth(1).unwrap_or_else(|| cfg.default_dataset.clone()));

    let registry = Arc::new(load_registry(&cfg)?);
    let source = source::from_config(&cfg)?;
    let loader: Arc<dyn MetricsLoader> = Arc::new(DatasetMetricsLoader::new(registry.clone(), source)?);

    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("dataset", v_str(dataset.as_str())),
            ("datasets", v_num(registry.datasets().len() as f64)),
            ("source", v_str(&format!("{:?}", cfg.source).to_lowercase())),
        ]),
    );

    let store = MetricsStore::create(dataset, registry, loader)?;
    let snapshot = store.settled().await;
    store.dispose();

    if snapshot.phase == LoadPhase::Error {
        eprintln!(
            "load failed: {}",
            snapshot.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    let Some(metrics) = snapshot.metrics.as_deref() else {
        eprintln!("load finished without metrics");
        std::process::exit(1);
    };

    let degradations: Vec<String> = snapshot
        .report
        .as_deref()
        .map(|r| r.degradations().map(|d| d.to_string()).collect())
        .unwrap_or_default();

    let payload = json!({
        "dataset": snapshot.dataset_id,
        "models": {
            "cnn": ModelKind::Cnn.display_name(),
            "vit": ModelKind::Vit.display_name(),
        },
        "final_metrics": {
            "cnn": metrics.cnn.final_metrics,
            "vit": metrics.vit.final_metrics,
        },
        "overall_scores": overall_scores(metrics),
        "highlights": highlights(metrics),
        "class_leaders": {
            "cnn": class_leaders(&metrics.cnn.classes),
            "vit": class_leaders(&metrics.vit.classes),
        },
        "per_class_recall": per_class_recall(metrics, CLASS_ROWS),
        "time_series": to_time_series(metrics),
        "report": snapshot.report.as_deref(),
        "degradations": degradations,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);

    if snapshot.report.as_deref().map_or(false, |r| r.all_failed()) {
        std::process::exit(2);
    }
    Ok(())
}
