//! 学習・推論・初回取り込みのユースケース。
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::config::Config;
use crate::dataset::Dataset;
use crate::dataset::builder::{DatasetBuilder, MessageSource};
use crate::model::{
    BoosterParams, Classifier, ClassificationReport, GradientBoostingClassifier, GridSearch, KFold,
    RandomOverSampler, RelevancePipeline, ThresholdGrid, train_test_split,
};
use crate::parser::ContentParser;
use crate::store::{DatasetKind, DatasetStore};

/// 学習の結果。
#[derive(Debug, Clone, Serialize)]
pub struct TrainOutcome {
    pub report: ClassificationReport,
    pub best_params: BoosterParams,
    /// 交差検証での正例再現率の平均
    pub best_score: f64,
    pub threshold: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub model_path: PathBuf,
}

/// 推論の結果。
#[derive(Debug, Clone)]
pub struct PredictOutcome {
    pub unlabelled_hash: String,
    pub predicted_hash: String,
    pub predicted: Dataset,
}

/// 関連・非関連のクエリから元データを作り、保存する。
///
/// # Errors
/// メッセージの取得、もしくは保存に失敗した場合。
pub fn ingest<S, P>(
    builder: &DatasetBuilder<S, P>,
    store: &impl DatasetStore,
    relevant_query: &str,
    irrelevant_query: &str,
) -> Result<Dataset>
where
    S: MessageSource,
    P: ContentParser,
{
    let _span = info_span!("workflow.ingest").entered();
    let dataset = builder.training_dataset(relevant_query, irrelevant_query)?;
    if dataset.is_empty() {
        warn!(relevant_query, irrelevant_query, "no articles were extracted");
    }
    store.save_original(&dataset)?;
    info!(rows = dataset.len(), "original dataset stored");
    Ok(dataset)
}

/// 元データとすべての学習データを結合する。予測列は取り除く。
///
/// # Errors
/// 読み込みに失敗した場合。
pub fn load_training_data(store: &impl DatasetStore) -> Result<Dataset> {
    let original = store.load_original()?;
    info!(rows = original.len(), "loaded original data");

    let training = store.load_all_training()?;
    let mut parts = vec![original];
    for (data_hash, dataset) in training {
        info!(%data_hash, rows = dataset.len(), "loaded training data");
        parts.push(dataset.without_predictions());
    }
    let dataset = Dataset::concat(parts);
    info!(rows = dataset.len(), "loaded data");
    Ok(dataset)
}

fn base_pipeline(config: &Config) -> Result<RelevancePipeline<GradientBoostingClassifier>> {
    let thresholds = ThresholdGrid::steps(config.threshold_step())?;
    let classifier = Classifier::new(GradientBoostingClassifier::default())
        .with_min_f1(config.min_f1())
        .with_thresholds(thresholds);
    let pipeline = RelevancePipeline::new(classifier);
    Ok(if config.oversample() {
        pipeline.with_oversampler(RandomOverSampler::new(config.random_seed()))
    } else {
        pipeline
    })
}

/// データを分割してグリッドサーチで学習し、ホールドアウトで評価してから保存する。
///
/// # Errors
/// データが無い、ラベルが不正、学習・保存に失敗した場合。
pub fn train(config: &Config, store: &impl DatasetStore) -> Result<TrainOutcome> {
    let _span = info_span!("workflow.train").entered();
    let dataset = load_training_data(store)?;
    if dataset.is_empty() {
        bail!("no training data found under {}", config.data_dir().display());
    }

    let (train_set, test_set) = train_test_split(&dataset, config.test_size(), config.random_seed())
        .context("failed to split data into train and test sets")?;
    let train_labels = train_set.labels().context("training data has invalid labels")?;
    let test_labels = test_set.labels().context("test data has invalid labels")?;
    info!(train = train_set.len(), test = test_set.len(), "split data");

    let search = GridSearch::new(
        base_pipeline(config)?,
        config.booster_candidates(),
        KFold::new(config.cv_folds(), config.random_seed())?,
    );
    let outcome = search
        .fit(&train_set, &train_labels)
        .context("failed to fit the grid search")?;

    let predictions = outcome.best_pipeline.predict(&test_set)?;
    let report = ClassificationReport::compute(&test_labels, &predictions)?;
    info!(
        accuracy = report.accuracy,
        precision = report.macro_avg.precision,
        recall = report.macro_avg.recall,
        f1_score = report.macro_avg.f1_score,
        "evaluated the best model"
    );

    outcome
        .best_pipeline
        .save(config.model_path())
        .with_context(|| format!("failed to save model to {}", config.model_path().display()))?;

    Ok(TrainOutcome {
        report,
        best_params: outcome.best_params,
        best_score: outcome.best_score,
        threshold: outcome.best_pipeline.classifier().threshold(),
        train_rows: train_set.len(),
        test_rows: test_set.len(),
        model_path: config.model_path().to_path_buf(),
    })
}

/// ラベルなしデータを保存し、学習済みモデルで予測した結果を保存する。
///
/// # Errors
/// モデルの読み込み、予測、保存に失敗した場合。
pub fn predict(config: &Config, store: &impl DatasetStore, dataset: Dataset) -> Result<PredictOutcome> {
    let _span = info_span!("workflow.predict", rows = dataset.len()).entered();
    let unlabelled_hash = store.save(DatasetKind::Unlabelled, &dataset.without_predictions())?;
    let unlabelled = store.load(DatasetKind::Unlabelled, &unlabelled_hash)?;

    let pipeline = RelevancePipeline::<GradientBoostingClassifier>::load(config.model_path())
        .with_context(|| format!("failed to load model from {}", config.model_path().display()))?;
    let predictions = pipeline.predict(&unlabelled).context("failed to make predictions")?;
    let relevant = predictions.iter().filter(|&&p| p == 1).count();
    let predicted = unlabelled.with_predictions(&predictions)?;

    let predicted_hash = store.save(DatasetKind::Predicted, &predicted)?;
    info!(%unlabelled_hash, %predicted_hash, relevant, "stored predictions");
    Ok(PredictOutcome {
        unlabelled_hash,
        predicted_hash,
        predicted,
    })
}
