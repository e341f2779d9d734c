use std::path::Path;

use email_discriminator::config::Config;
use email_discriminator::dataset::{ArticleRecord, Dataset};
use email_discriminator::store::{DatasetKind, DatasetStore, LocalDatasetStore};
use email_discriminator::workflow;

fn labelled(title: &str, relevant: bool) -> ArticleRecord {
    let section = if relevant {
        "PROGRAMMING, DESIGN & DATA SCIENCE"
    } else {
        "MISCELLANEOUS"
    };
    ArticleRecord::new(section, format!("{title}\r\n\r\n3 MINUTE READ")).labelled(u8::from(relevant))
}

fn seed_store(store: &LocalDatasetStore) {
    let original: Dataset = (0..20)
        .flat_map(|i| {
            [
                labelled(&format!("rust borrow checker deep dive part{i}"), true),
                labelled(&format!("celebrity gossip roundup issue{i}"), false),
            ]
        })
        .collect();
    store.save_original(&original).expect("save original");

    // 学習データに残った予測列は学習時に取り除かれる
    let mut reviewed = labelled("compiler internals explained", true);
    reviewed.predicted_is_relevant = Some(0);
    store
        .save(DatasetKind::Training, &Dataset::new(vec![reviewed]))
        .expect("save training");
}

fn with_config<R>(root: &Path, f: impl FnOnce(Config) -> R) -> R {
    let data_dir = root.join("data");
    let model_path = root.join("models").join("model.json");
    temp_env::with_vars(
        [
            ("EMAIL_DISCRIMINATOR_DATA_DIR", Some(data_dir.to_string_lossy().into_owned())),
            ("EMAIL_DISCRIMINATOR_MODEL_PATH", Some(model_path.to_string_lossy().into_owned())),
            ("EMAIL_DISCRIMINATOR_GRID_N_ESTIMATORS", Some("5,10".to_string())),
            ("EMAIL_DISCRIMINATOR_GRID_LEARNING_RATES", Some("0.3".to_string())),
            ("EMAIL_DISCRIMINATOR_CV_FOLDS", Some("2".to_string())),
            ("EMAIL_DISCRIMINATOR_MIN_F1", None),
            ("EMAIL_DISCRIMINATOR_THRESHOLD_STEP", None),
            ("EMAIL_DISCRIMINATOR_TEST_SIZE", None),
            ("EMAIL_DISCRIMINATOR_RANDOM_SEED", None),
            ("EMAIL_DISCRIMINATOR_OVERSAMPLE", None),
        ],
        || f(Config::from_env().expect("config")),
    )
}

#[test]
fn train_then_predict_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_config(dir.path(), |config| {
        let store = LocalDatasetStore::new(config.data_dir());
        seed_store(&store);

        let outcome = workflow::train(&config, &store).expect("train");
        assert_eq!(outcome.train_rows + outcome.test_rows, 41);
        assert_eq!(outcome.test_rows, 9);
        assert!(config.model_path().exists());
        assert!((0.0..=1.0).contains(&outcome.report.accuracy));
        assert!([5, 10].contains(&outcome.best_params.n_estimators));

        let incoming = Dataset::new(vec![
            ArticleRecord::new(
                "PROGRAMMING, DESIGN & DATA SCIENCE",
                "rust borrow checker tricks\r\n\r\n4 MINUTE READ",
            ),
            ArticleRecord::new("MISCELLANEOUS", "celebrity gossip weekly\r\n\r\n1 MINUTE READ"),
        ]);
        let predicted = workflow::predict(&config, &store, incoming.clone()).expect("predict");

        assert_eq!(predicted.predicted.len(), 2);
        assert!(
            predicted
                .predicted
                .records()
                .iter()
                .all(|r| matches!(r.predicted_is_relevant, Some(0 | 1)))
        );
        let stored = store
            .load(DatasetKind::Predicted, &predicted.predicted_hash)
            .expect("load predicted");
        assert_eq!(stored, predicted.predicted);
        let unlabelled = store
            .load(DatasetKind::Unlabelled, &predicted.unlabelled_hash)
            .expect("load unlabelled");
        assert_eq!(unlabelled, incoming);
    });
}

#[test]
fn training_without_data_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_config(dir.path(), |config| {
        let store = LocalDatasetStore::new(config.data_dir());
        let error = workflow::train(&config, &store).expect_err("no data");
        assert!(error.to_string().contains("no training data"));
    });
}

#[test]
fn predicting_without_a_model_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    with_config(dir.path(), |config| {
        let store = LocalDatasetStore::new(config.data_dir());
        let dataset = Dataset::new(vec![ArticleRecord::new("QUICK LINKS", "x\r\n\r\nGITHUB REPO")]);
        let error = workflow::predict(&config, &store, dataset).expect_err("no model");
        assert!(error.to_string().contains("failed to load model"));
    });
}
