//! 特徴量パイプラインと分類器をまとめたエンドツーエンドのパイプライン。
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span};

use super::booster::GradientBoostingClassifier;
use super::classifier::{Classifier, ClassifierParams};
use super::estimator::{Predictor, ProbabilisticEstimator, Transformer};
use super::features::{FeatureMatrix, FeaturePipeline};
use super::sampling::RandomOverSampler;
use crate::dataset::Columnar;
use crate::error::{DiscriminatorError, Result};

const FORMAT_VERSION: u64 = 1;

#[derive(Serialize)]
struct SavedPipelineRef<'a, E> {
    format_version: u64,
    saved_at: DateTime<Utc>,
    pipeline: &'a RelevancePipeline<E>,
}

#[derive(Deserialize)]
struct SavedPipeline<E> {
    saved_at: DateTime<Utc>,
    pipeline: RelevancePipeline<E>,
}

/// 記事の関連度を判定するパイプライン。
///
/// `fit` で特徴量と分類器を学習し、`predict` は同じ変換を通してから
/// 分類器の決定閾値で 0/1 を返す。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevancePipeline<E = GradientBoostingClassifier> {
    features: FeaturePipeline,
    sampler: Option<RandomOverSampler>,
    classifier: Classifier<E>,
    fitted: bool,
}

impl Default for RelevancePipeline<GradientBoostingClassifier> {
    fn default() -> Self {
        Self::new(Classifier::default())
    }
}

impl<E: ProbabilisticEstimator> RelevancePipeline<E> {
    pub fn new(classifier: Classifier<E>) -> Self {
        Self {
            features: FeaturePipeline::new(),
            sampler: None,
            classifier,
            fitted: false,
        }
    }

    /// 特徴量変換と分類器学習の間で少数クラスを複製する。
    #[must_use]
    pub fn with_oversampler(mut self, sampler: RandomOverSampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    #[must_use]
    pub fn classifier(&self) -> &Classifier<E> {
        &self.classifier
    }

    #[must_use]
    pub fn features(&self) -> &FeaturePipeline {
        &self.features
    }

    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    pub fn set_estimator_params(&mut self, params: E::Params) {
        let mut current = self.classifier.get_params();
        current.estimator = params;
        self.set_classifier_params(current);
    }

    /// 分類器のパラメータを差し替える。学習済み状態は破棄される。
    pub fn set_classifier_params(&mut self, params: ClassifierParams<E::Params>) {
        self.classifier.set_params(params);
        self.fitted = false;
    }

    /// # Errors
    /// ラベル数が行数と異なる場合、特徴量・分類器の学習に失敗した場合。
    pub fn fit<C: Columnar + ?Sized>(&mut self, input: &C, labels: &[u8]) -> Result<()> {
        let _span = info_span!("relevance_pipeline.fit", rows = input.len()).entered();
        if labels.len() != input.len() {
            let err = DiscriminatorError::ShapeMismatch {
                expected: format!("{} labels", input.len()),
                actual: format!("{} labels", labels.len()),
            };
            error!(error = %err, "label count does not match the dataset");
            return Err(err);
        }

        self.fitted = false;
        let matrix = self.features.fit_transform(input)?;
        match &self.sampler {
            Some(sampler) => {
                let (matrix, labels) = sampler.resample(&matrix, labels)?;
                self.classifier.fit(&matrix, &labels)?;
            }
            None => self.classifier.fit(&matrix, labels)?,
        }
        self.fitted = true;
        info!(threshold = self.classifier.threshold(), "relevance pipeline fitted");
        Ok(())
    }

    /// # Errors
    /// 未学習なら `NotFitted`、入力列が欠けていれば `MissingColumn` など。
    pub fn predict<C: Columnar + ?Sized>(&self, input: &C) -> Result<Vec<u8>> {
        let matrix = self.transform(input)?;
        self.classifier.predict(&matrix)
    }

    /// 各行の `[P(0), P(1)]`。
    ///
    /// # Errors
    /// `predict` と同じ。
    pub fn predict_proba<C: Columnar + ?Sized>(&self, input: &C) -> Result<Array2<f64>> {
        let matrix = self.transform(input)?;
        self.classifier.predict_proba(&matrix)
    }

    fn transform<C: Columnar + ?Sized>(&self, input: &C) -> Result<FeatureMatrix> {
        if !self.fitted {
            return Err(DiscriminatorError::not_fitted("RelevancePipeline"));
        }
        self.features.transform(input)
    }
}

impl<E> RelevancePipeline<E>
where
    E: ProbabilisticEstimator + Serialize + DeserializeOwned,
{
    /// 学習済みパイプラインを JSON で保存する。親ディレクトリは必要に応じて作成する。
    ///
    /// # Errors
    /// 未学習なら `NotFitted`、書き込みに失敗した場合は `Io` / `Serialization`。
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !self.fitted {
            return Err(DiscriminatorError::not_fitted("RelevancePipeline"));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| DiscriminatorError::io(parent, err))?;
        }

        let file = File::create(path).map_err(|err| DiscriminatorError::io(path, err))?;
        let mut writer = BufWriter::new(file);
        let envelope = SavedPipelineRef {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            pipeline: self,
        };
        serde_json::to_writer(&mut writer, &envelope)?;
        writer
            .flush()
            .map_err(|err| DiscriminatorError::io(path, err))?;
        info!(path = %path.display(), "saved relevance pipeline");
        Ok(())
    }

    /// # Errors
    /// ファイルが読めない、形式のバージョンが異なる、もしくは内容が壊れている場合。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| DiscriminatorError::io(path, err))?;
        let value: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;

        let version = value.get("format_version").and_then(serde_json::Value::as_u64);
        if version != Some(FORMAT_VERSION) {
            let err = DiscriminatorError::InvalidParameter {
                name: "format_version",
                reason: format!("expected {FORMAT_VERSION}, found {version:?}"),
            };
            error!(path = %path.display(), error = %err, "unsupported pipeline file");
            return Err(err);
        }

        let saved: SavedPipeline<E> = serde_json::from_value(value)?;
        info!(path = %path.display(), saved_at = %saved.saved_at, "loaded relevance pipeline");
        Ok(saved.pipeline)
    }
}
