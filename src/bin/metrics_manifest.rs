use cnnvit::config::Config;
use cnnvit::logging::{json_log, obj, v_num, v_str};
use cnnvit::manifest::build_manifest;
use cnnvit::registry::{DatasetId, Registry};
use cnnvit::source;

#[tokio::main]
async fn main() {
    let cfg = Config::from_env();
    let dataset = DatasetId::new(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| cfg.default_dataset.clone()),
    );

    let registry = match &cfg.registry_path {
        Some(path) => match Registry::from_json_file(path) {
            Ok(r) => r,
            Err(err) => {
                eprintln!("registry load failed: {:#}", err);
                std::process::exit(1);
            }
        },
        None => Registry::builtin(),
    };

    let Some(descriptor) = registry.get(&dataset) else {
        eprintln!("unknown dataset: {}", dataset);
        let known: Vec<&str> = registry.datasets().iter().map(|d| d.id.as_str()).collect();
        eprintln!("known datasets: {:?}", known);
        std::process::exit(2);
    };

    let source = match source::from_config(&cfg) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("source setup failed: {:#}", err);
            std::process::exit(3);
        }
    };

    let manifest = build_manifest(source.as_ref(), descriptor).await;
    let failed = manifest.tables.iter().filter(|t| t.error.is_some()).count();
    json_log(
        "manifest",
        obj(&[
            ("dataset", v_str(dataset.as_str())),
            ("tables", v_num(manifest.tables.len() as f64)),
            ("failed", v_num(failed as f64)),
            ("complete", serde_json::Value::Bool(manifest.is_complete())),
        ]),
    );

    match serde_json::to_string_pretty(&manifest) {
        Ok(text) => println!("{}", text),
        Err(err) => {
            eprintln!("failed to encode manifest: {}", err);
            std::process::exit(4);
        }
    }
    if failed == manifest.tables.len() {
        std::process::exit(5);
    }
}
