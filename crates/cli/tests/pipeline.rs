use medirisk_core::config::AppConfig;
use medirisk_core::features::{PatientInput, Thalassemia};
use medirisk_core::pipeline::{self, RunOptions};
use medirisk_core::report::TEMPLATE_WRITER;
use medirisk_core::risk::RiskCategory;
use medirisk_core::training;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// Cleveland-shaped rows where disease follows `chol > 260 || age > 62`.
fn write_dataset(path: &Path) {
    let mut csv = String::from(
        "age,sex,cp,trestbps,chol,fbs,restecg,thalach,exang,oldpeak,slope,ca,thal,target\n",
    );
    let thal = [3, 6, 7];
    for i in 0..200u32 {
        let age = 30 + (i * 7) % 45;
        let chol = 150 + (i * 17) % 200;
        let target = u32::from(chol > 260 || age > 62);
        let ca = if i % 25 == 0 {
            "?".to_string()
        } else {
            (i % 4).to_string()
        };
        writeln!(
            csv,
            "{age},{},{},{},{chol},{},{},{},{},{:.1},{},{ca},{},{target}",
            i % 2,
            1 + i % 4,
            100 + (i * 13) % 90,
            u32::from(i % 5 == 0),
            i % 3,
            100 + (i * 11) % 90,
            u32::from(i % 4 == 0),
            f64::from((i * 3) % 40) / 10.0,
            1 + i % 3,
            thal[(i % 3) as usize],
        )
        .unwrap();
    }
    fs::write(path, csv).unwrap();
}

fn config(root: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.database.path = root.join("db/medirisk.db").to_string_lossy().into_owned();
    cfg.models.dir = root.join("models").to_string_lossy().into_owned();
    cfg.models.default = Some("Decision Tree".to_string());
    cfg.training.forest.n_trees = 10;
    cfg.training.logistic.iterations = 300;
    cfg
}

fn train(cfg: &AppConfig, root: &Path) {
    let data_path = root.join("heart.csv");
    write_dataset(&data_path);
    let dataset = training::load_dataset(&data_path).unwrap();
    assert_eq!(dataset.len(), 192, "rows with a missing value are dropped");
    let trained = training::train_all(&dataset, &cfg.training).unwrap();
    assert_eq!(trained.len(), 3);
    for t in &trained {
        training::save_artifact(Path::new(&cfg.models.dir), t.file, &t.artifact).unwrap();
        let metrics = t.artifact.metadata.metrics.as_ref().unwrap();
        assert!(metrics.roc_auc > 0.7, "{} roc_auc {}", t.name, metrics.roc_auc);
    }
}

fn risky_patient() -> PatientInput {
    PatientInput {
        age: 70,
        cholesterol: 320,
        resting_bp: 160,
        exercise_angina: true,
        thalassemia: Thalassemia::ReversibleDefect,
        ..PatientInput::default()
    }
}

#[tokio::test]
async fn train_assess_store_and_report() {
    let temp = tempdir().unwrap();
    let cfg = config(temp.path());
    train(&cfg, temp.path());

    let models = pipeline::load_models(&cfg);
    assert_eq!(
        models.names(),
        vec!["Logistic Regression", "Decision Tree", "Random Forest"]
    );

    let outcome = pipeline::run_assessment(
        &cfg,
        &risky_patient(),
        None,
        RunOptions {
            store: true,
            report: true,
        },
    )
    .await
    .unwrap();
    let a = &outcome.assessment;
    assert_eq!(a.model, "Decision Tree");
    assert_eq!(a.category, RiskCategory::High);
    assert_eq!(a.top_factors.len(), 5);
    let id = a.id.expect("stored assessment has an id");

    let report = outcome.report.expect("report requested");
    assert_eq!(report.generated_by, TEMPLATE_WRITER);
    assert_eq!(report.assessment_id, Some(id));
    assert!(report.findings.iter().any(|f| f.key == "cholesterol"));
    assert!(report.to_markdown().contains("## Recommendations"));

    let healthy = PatientInput {
        age: 40,
        cholesterol: 180,
        ..PatientInput::default()
    };
    let low = pipeline::run_assessment(&cfg, &healthy, Some("Decision Tree"), RunOptions::default())
        .await
        .unwrap();
    assert_eq!(low.assessment.category, RiskCategory::Low);
    assert!(low.report.is_none());

    let history = pipeline::history(&cfg, 10, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, low.assessment.id);
    assert_eq!(history[1].input, risky_patient());

    let high_only = pipeline::history(&cfg, 10, Some("high")).await.unwrap();
    assert_eq!(high_only.len(), 1);

    let regenerated = pipeline::report_for(&cfg, id).await.unwrap();
    assert_eq!(regenerated.percent, a.percent);
    assert!(pipeline::report_for(&cfg, 9999).await.is_err());

    let stored = pipeline::stored_report(&cfg, id).await.unwrap();
    assert_eq!(stored.assessment_id, Some(id));
    assert_eq!(stored.created_at, regenerated.created_at);
    let unreported = low.assessment.id.unwrap();
    assert!(pipeline::stored_report(&cfg, unreported).await.is_err());

    let counts = pipeline::category_counts(&cfg).await.unwrap();
    assert_eq!(
        counts,
        vec![("HIGH".to_string(), 1), ("LOW".to_string(), 1)]
    );
}

#[tokio::test]
async fn broken_rules_leave_no_stored_assessment() {
    let temp = tempdir().unwrap();
    let mut cfg = config(temp.path());
    train(&cfg, temp.path());
    let rules_dir = temp.path().join("rules");
    fs::create_dir_all(&rules_dir).unwrap();
    fs::write(rules_dir.join("bad.toml"), "name = \"x\"\n").unwrap();
    cfg.report.rules_path = Some(rules_dir.to_string_lossy().into_owned());

    let err = pipeline::run_assessment(
        &cfg,
        &risky_patient(),
        None,
        RunOptions {
            store: true,
            report: true,
        },
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("load recommendation rules"));
    assert!(pipeline::history(&cfg, 10, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn unstored_assessment_skips_database() {
    let temp = tempdir().unwrap();
    let cfg = config(temp.path());
    train(&cfg, temp.path());

    let outcome = pipeline::run_assessment(
        &cfg,
        &risky_patient(),
        Some("Random Forest"),
        RunOptions {
            store: false,
            report: true,
        },
    )
    .await
    .unwrap();
    assert!(outcome.assessment.id.is_none());
    assert!(outcome.report.unwrap().assessment_id.is_none());
    assert!(!temp.path().join("db/medirisk.db").exists());
}

#[tokio::test]
async fn missing_models_are_reported() {
    let temp = tempdir().unwrap();
    let cfg = config(temp.path());
    let err = pipeline::run_assessment(&cfg, &PatientInput::default(), None, RunOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Model not loaded properly"));
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let temp = tempdir().unwrap();
    let cfg = config(temp.path());
    train(&cfg, temp.path());
    let input = PatientInput {
        cholesterol: 50,
        ..PatientInput::default()
    };
    assert!(pipeline::run_assessment(&cfg, &input, None, RunOptions::default())
        .await
        .is_err());
}
