use email_discriminator::dataset::{ArticleRecord, Dataset, Table};
use email_discriminator::model::{
    BoosterParams, Classifier, GradientBoostingClassifier, RandomOverSampler, RelevancePipeline,
    TextSelector, Transformer,
};
use tempfile::tempdir;

fn corpus() -> (Dataset, Vec<u8>) {
    let topics = [
        ("PROGRAMMING, DESIGN & DATA SCIENCE", "rust async runtime scheduler", 1),
        ("PROGRAMMING, DESIGN & DATA SCIENCE", "compiler optimisation passes explained", 1),
        ("BIG TECH & STARTUPS", "database startup raises funding", 1),
        ("MISCELLANEOUS", "celebrity podcast gossip", 0),
        ("MISCELLANEOUS", "travel tips summer holidays", 0),
        ("QUICK LINKS", "fashion retailer discount sale", 0),
        ("QUICK LINKS", "celebrity sneaker collection", 0),
    ];
    let mut records = Vec::new();
    for edition in 0..4 {
        for (section, title, label) in topics {
            records.push(
                ArticleRecord::new(section, format!("{title} edition{edition}\r\n\r\n3 MINUTE READ"))
                    .labelled(label),
            );
        }
    }
    let dataset = Dataset::new(records);
    let labels = dataset.labels().expect("labels");
    (dataset, labels)
}

fn pipeline() -> RelevancePipeline {
    let booster = GradientBoostingClassifier::new(BoosterParams {
        n_estimators: 20,
        ..BoosterParams::default()
    });
    RelevancePipeline::new(Classifier::new(booster)).with_oversampler(RandomOverSampler::new(42))
}

#[test]
fn predictions_are_binary_and_probabilities_bounded() {
    let (dataset, labels) = corpus();
    let mut pipeline = pipeline();
    pipeline.fit(&dataset, &labels).expect("fit");

    let predictions = pipeline.predict(&dataset).expect("predict");
    assert_eq!(predictions.len(), dataset.len());
    assert!(predictions.iter().all(|&p| p == 0 || p == 1));

    let proba = pipeline.predict_proba(&dataset).expect("predict_proba");
    assert!(proba.column(1).iter().all(|p| (0.0..=1.0).contains(p)));
    assert_eq!(pipeline.classifier().classes().expect("classes"), &[0, 1]);
}

#[test]
fn saved_pipeline_reproduces_predictions() {
    let (dataset, labels) = corpus();
    let mut pipeline = pipeline();
    pipeline.fit(&dataset, &labels).expect("fit");

    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("pipeline.json");
    pipeline.save(&path).expect("save");
    let loaded = RelevancePipeline::<GradientBoostingClassifier>::load(&path).expect("load");

    assert_eq!(loaded.predict(&dataset).expect("loaded"), pipeline.predict(&dataset).expect("original"));
    let before = pipeline.predict_proba(&dataset).expect("proba");
    let after = loaded.predict_proba(&dataset).expect("proba");
    assert!(before.iter().zip(after.iter()).all(|(a, b)| a.to_bits() == b.to_bits()));
}

#[test]
fn unseen_section_is_rejected_at_predict() {
    let (dataset, labels) = corpus();
    let mut pipeline = pipeline();
    pipeline.fit(&dataset, &labels).expect("fit");

    let unseen = Dataset::new(vec![ArticleRecord::new(
        "SCIENCE & FUTURISTIC TECHNOLOGY",
        "rust on mars\r\n\r\n2 MINUTE READ",
    )]);
    let error = pipeline.predict(&unseen).expect_err("unknown category");
    assert!(error.is_configuration());
}

#[test]
fn loosely_typed_table_can_be_predicted() {
    let (dataset, labels) = corpus();
    let mut pipeline = pipeline();
    pipeline.fit(&dataset, &labels).expect("fit");

    let table = Table::new()
        .with_column("article", ["rust compiler release\r\n\r\n4 MINUTE READ"])
        .and_then(|t| t.with_column("section", ["QUICK LINKS"]))
        .expect("table");
    assert_eq!(pipeline.predict(&table).expect("predict").len(), 1);
}

#[test]
fn selector_reports_available_columns() {
    let table = Table::new()
        .with_column("a", ["1"])
        .and_then(|t| t.with_column("b", ["2"]))
        .expect("table");
    let error = TextSelector::new("c").transform(&table).expect_err("missing column");
    assert!(error.to_string().contains("available columns: a, b"));
}
