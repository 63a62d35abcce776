use cnnvit::loader::{DatasetMetricsLoader, Degradation, MetricsLoader};
use cnnvit::registry::{DatasetId, ModelKind, Registry, TableKind};
use cnnvit::source::FsSource;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const EPOCH_HEADER: &str = "Epoch,Train_Loss,Val_Loss,Train_Accuracy,Val_Accuracy,Epoch_Train_Time_sec,Final_Test_Accuracy,Total_Training_Time_sec,Inference_Time_ms,Model_Size_MB,Parameter_Count";
const CLASS_HEADER: &str = "Class,Precision,Recall,F1_Score";

fn write_csv(path: &Path, header: &str, rows: &[&str]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut out = String::new();
    out.push_str(header);
    out.push('\n');
    for row in rows {
        out.push_str(row);
        out.push('\n');
    }
    fs::write(path, out).unwrap();
}

fn write_cifar(root: &Path) {
    write_csv(
        &root.join("cifar10/resnet18_epochs.csv"),
        EPOCH_HEADER,
        &[
            "1,0.9,0.8,0.70,0.68,40.0,0.90,40.0,0.8,42.7,11200000",
            "2,0.5,0.6,0.85,0.80,41.0,0.95,81.0,0.8,42.7,11200000",
        ],
    );
    write_csv(
        &root.join("cifar10/deit_epochs.csv"),
        EPOCH_HEADER,
        &[
            "1,1.1,1.0,0.60,0.58,60.0,0.91,60.0,1.4,21.9,5600000",
            "2,0.7,0.7,0.80,0.76,61.0,0.91,121.0,1.4,21.9,5600000",
            "3,0.5,0.5,0.88,0.84,60.0,0.91,181.0,1.4,21.9,5600000",
        ],
    );
    write_csv(
        &root.join("cifar10/resnet18_classes.csv"),
        CLASS_HEADER,
        &["airplane,0.80,0.90,0.85", "automobile,0.90,0.70,0.79"],
    );
    write_csv(
        &root.join("cifar10/deit_classes.csv"),
        CLASS_HEADER,
        &["airplane,0.95,0.92,0.93", "automobile,0.85,0.88,0.86"],
    );
}

fn loader_for(root: &Path) -> DatasetMetricsLoader<FsSource> {
    DatasetMetricsLoader::new(Arc::new(Registry::builtin()), FsSource::new(root)).unwrap()
}

#[tokio::test]
async fn loads_dataset_from_disk() {
    let dir = TempDir::new().unwrap();
    write_cifar(dir.path());

    let loaded = loader_for(dir.path()).load(&DatasetId::from("cifar10")).await.unwrap();
    assert!(!loaded.report.is_degraded());

    let cnn = &loaded.metrics.cnn.final_metrics;
    assert!((cnn.test_accuracy - 95.0).abs() < 1e-9);
    assert!((cnn.precision - 85.0).abs() < 1e-9);
    assert!((cnn.recall - 80.0).abs() < 1e-9);
    assert_eq!(cnn.parameters, "11.2M");
    assert_eq!(cnn.training_time, "1.4 min");
    assert_eq!(cnn.final_loss, 0.6);

    let vit = &loaded.metrics.vit;
    assert_eq!(vit.epochs.len(), 3);
    assert_eq!(vit.final_metrics.training_time, "3.0 min");
    assert_eq!(vit.final_metrics.parameters, "5.6M");
}

#[tokio::test]
async fn missing_file_degrades_without_failing() {
    let dir = TempDir::new().unwrap();
    write_cifar(dir.path());
    fs::remove_file(dir.path().join("cifar10/deit_classes.csv")).unwrap();

    let loaded = loader_for(dir.path()).load(&DatasetId::from("cifar10")).await.unwrap();
    assert!(loaded.report.is_degraded());
    assert!(!loaded.report.all_failed());

    let status = loaded.report.status(ModelKind::Vit, TableKind::Classes).unwrap();
    assert!(status.degraded);
    assert!(matches!(status.cause, Some(Degradation::FetchFailure { .. })));
    assert!(loaded.metrics.vit.classes.is_empty());
    assert_eq!(loaded.metrics.vit.final_metrics.precision, 0.0);
    assert_eq!(loaded.metrics.cnn.classes.len(), 2);
}

#[tokio::test]
async fn malformed_rows_are_dropped_and_reported() {
    let dir = TempDir::new().unwrap();
    write_cifar(dir.path());
    write_csv(
        &dir.path().join("cifar10/resnet18_classes.csv"),
        CLASS_HEADER,
        &["airplane,0.80,0.90,0.85", "automobile,0.90", "bird,0.60,0.50,0.55"],
    );

    let loaded = loader_for(dir.path()).load(&DatasetId::from("cifar10")).await.unwrap();
    let classes = &loaded.metrics.cnn.classes;
    assert_eq!(classes.len(), 2);
    assert_eq!(classes[1].class_name, "bird");

    let status = loaded.report.status(ModelKind::Cnn, TableKind::Classes).unwrap();
    match &status.cause {
        Some(Degradation::ParseDegradation { dropped_rows, .. }) => assert_eq!(*dropped_rows, 1),
        other => panic!("unexpected cause {:?}", other),
    }
}

#[tokio::test]
async fn empty_root_yields_empty_metrics() {
    let dir = TempDir::new().unwrap();

    let loaded = loader_for(dir.path()).load(&DatasetId::from("caltech256")).await.unwrap();
    assert!(loaded.report.all_failed());
    assert!(loaded.metrics.cnn.epochs.is_empty());
    assert_eq!(loaded.metrics.vit.final_metrics.parameters, "0.0M");
}

#[tokio::test]
async fn registry_override_points_at_custom_paths() {
    let dir = TempDir::new().unwrap();
    write_cifar(dir.path());
    let registry_json = r#"[{
        "id": "mini",
        "name": "Mini",
        "class_count": 2,
        "description": "two-class subset",
        "paths": {
            "cnn_epochs": "cifar10/resnet18_epochs.csv",
            "vit_epochs": "cifar10/deit_epochs.csv",
            "cnn_classes": "cifar10/resnet18_classes.csv",
            "vit_classes": "cifar10/deit_classes.csv"
        }
    }]"#;
    let path = dir.path().join("registry.json");
    fs::write(&path, registry_json).unwrap();

    let registry = Registry::from_json_file(&path).unwrap();
    let loader = DatasetMetricsLoader::new(Arc::new(registry), FsSource::new(dir.path())).unwrap();

    let loaded = loader.load(&DatasetId::from("mini")).await.unwrap();
    assert_eq!(loaded.dataset_id.as_str(), "mini");
    assert!(!loaded.report.is_degraded());
    assert!(loader.load(&DatasetId::from("cifar10")).await.is_err());
}
