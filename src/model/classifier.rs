//! 決定閾値を探索する関連度分類器。
//!
//! ベース推定器の学習後、候補閾値を昇順に走査し、両クラスの F1 の最小値が
//! 下限以上となる閾値のうち正例の再現率が最大のものを採用する。
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};

use super::booster::GradientBoostingClassifier;
use super::estimator::{Predictor, ProbabilisticEstimator};
use super::features::FeatureMatrix;
use super::metrics::{f1_per_class, recall};
use crate::error::{DiscriminatorError, Result};

pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_MIN_F1: f64 = 0.75;
pub const DEFAULT_THRESHOLD_STEP: f64 = 0.01;

/// 候補閾値の生成。
#[derive(Debug, Clone, Copy)]
pub struct ThresholdGrid;

impl ThresholdGrid {
    /// `0.0, step, 2*step, …` のうち 1.0 未満の値。`step = 0.01` なら 0.00〜0.99 の100個。
    ///
    /// # Errors
    /// `step` が (0, 1) の範囲外なら [`DiscriminatorError::InvalidParameter`]。
    pub fn steps(step: f64) -> Result<Vec<f64>> {
        if !(step > 0.0 && step < 1.0) {
            let err = DiscriminatorError::InvalidParameter {
                name: "threshold_step",
                reason: format!("must be in (0, 1), got {step}"),
            };
            error!(error = %err, "invalid threshold step");
            return Err(err);
        }
        Ok((0_u32..)
            .map(|i| (f64::from(i) * step * 1e10).round() / 1e10)
            .take_while(|threshold| *threshold < 1.0 - 1e-9)
            .collect())
    }
}

/// 外部のハイパーパラメータ探索から読み書きするパラメータ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierParams<P> {
    pub estimator: P,
    pub min_f1: f64,
    pub thresholds: Vec<f64>,
}

/// 閾値探索の結果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdChoice {
    pub threshold: f64,
    pub recall: f64,
    pub min_f1: f64,
}

/// 候補閾値を昇順に走査し、`min(F1_0, F1_1) >= min_f1` を満たす中で再現率最大の閾値を返す。
///
/// 再現率が同じ場合は先に現れた（小さい）閾値を優先する。満たす閾値が無ければ `None`。
#[must_use]
pub fn search_threshold(
    positive_proba: &[f64],
    labels: &[u8],
    candidates: &[f64],
    min_f1: f64,
) -> Option<ThresholdChoice> {
    let mut best: Option<ThresholdChoice> = None;
    for &threshold in candidates {
        let predictions: Vec<u8> = positive_proba
            .iter()
            .map(|&p| u8::from(p >= threshold))
            .collect();
        let [f1_negative, f1_positive] = f1_per_class(labels, &predictions);
        let worst_f1 = f1_negative.min(f1_positive);
        let positive_recall = recall(labels, &predictions);
        debug!(threshold, worst_f1, positive_recall, "evaluated threshold");

        if worst_f1 >= min_f1 && best.is_none_or(|b| positive_recall > b.recall) {
            best = Some(ThresholdChoice {
                threshold,
                recall: positive_recall,
                min_f1: worst_f1,
            });
        }
    }
    best
}

/// ベース推定器と決定閾値の組。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classifier<E = GradientBoostingClassifier> {
    estimator: E,
    min_f1: f64,
    thresholds: Vec<f64>,
    threshold: f64,
    fitted: bool,
}

impl Default for Classifier<GradientBoostingClassifier> {
    fn default() -> Self {
        Self::new(GradientBoostingClassifier::default())
    }
}

impl<E: ProbabilisticEstimator> Classifier<E> {
    /// 既定の候補閾値（0.00〜0.99）と F1 下限 0.75 で作成する。
    pub fn new(estimator: E) -> Self {
        let thresholds = ThresholdGrid::steps(DEFAULT_THRESHOLD_STEP).unwrap_or_default();
        Self {
            estimator,
            min_f1: DEFAULT_MIN_F1,
            thresholds,
            threshold: DEFAULT_THRESHOLD,
            fitted: false,
        }
    }

    #[must_use]
    pub fn with_min_f1(mut self, min_f1: f64) -> Self {
        self.min_f1 = min_f1;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// 採用中の決定閾値。
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[must_use]
    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// 学習済みのクラスラベル（学習後は `[0, 1]`）。
    ///
    /// # Errors
    /// 未学習なら `NotFitted`。
    pub fn classes(&self) -> Result<&[u8]> {
        self.estimator
            .classes()
            .filter(|_| self.fitted)
            .ok_or_else(|| DiscriminatorError::not_fitted("Classifier"))
    }

    #[must_use]
    pub fn get_params(&self) -> ClassifierParams<E::Params> {
        ClassifierParams {
            estimator: self.estimator.params(),
            min_f1: self.min_f1,
            thresholds: self.thresholds.clone(),
        }
    }

    /// パラメータを差し替える。学習済み状態は破棄され、閾値は既定値に戻る。
    pub fn set_params(&mut self, params: ClassifierParams<E::Params>) {
        self.estimator.set_params(params.estimator);
        self.min_f1 = params.min_f1;
        self.thresholds = params.thresholds;
        self.threshold = DEFAULT_THRESHOLD;
        self.fitted = false;
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_f1) {
            return Err(DiscriminatorError::InvalidParameter {
                name: "min_f1",
                reason: format!("must be in [0, 1], got {}", self.min_f1),
            });
        }
        if let Some(bad) = self.thresholds.iter().find(|t| !(0.0..=1.0).contains(*t)) {
            return Err(DiscriminatorError::InvalidParameter {
                name: "thresholds",
                reason: format!("every threshold must be in [0, 1], got {bad}"),
            });
        }
        if self.thresholds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(DiscriminatorError::InvalidParameter {
                name: "thresholds",
                reason: "thresholds must be strictly ascending".into(),
            });
        }
        Ok(())
    }

    fn positive_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(DiscriminatorError::not_fitted("Classifier"));
        }
        self.estimator
            .predict_positive_proba(features)
            .inspect_err(|err| error!(error = %err, "error predicting probabilities"))
    }
}

impl<E: ProbabilisticEstimator> Predictor for Classifier<E> {
    fn fit(&mut self, features: &FeatureMatrix, labels: &[u8]) -> Result<()> {
        let _span = info_span!("classifier.fit", rows = features.nrows()).entered();
        self.validate()
            .inspect_err(|err| error!(error = %err, "invalid classifier parameters"))?;
        self.fitted = false;
        self.threshold = DEFAULT_THRESHOLD;

        self.estimator
            .fit(features, labels)
            .inspect_err(|err| error!(error = %err, "error fitting the model"))?;
        self.fitted = true;

        if self.thresholds.len() > 1 {
            let proba = self.positive_proba(features)?;
            match search_threshold(&proba, labels, &self.thresholds, self.min_f1) {
                Some(choice) => {
                    self.threshold = choice.threshold;
                    info!(
                        threshold = choice.threshold,
                        recall = choice.recall,
                        min_f1 = choice.min_f1,
                        "selected decision threshold"
                    );
                }
                None => warn!(
                    min_f1 = self.min_f1,
                    threshold = self.threshold,
                    "no threshold satisfies the F1 floor; keeping the default"
                ),
            }
        }
        Ok(())
    }

    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Array2<f64>> {
        let proba = self.positive_proba(features)?;
        let rows = proba.len();
        Ok(Array2::from_shape_fn((rows, 2), |(row, col)| {
            if col == 1 { proba[row] } else { 1.0 - proba[row] }
        }))
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<u8>> {
        let proba = self.positive_proba(features)?;
        Ok(proba
            .into_iter()
            .map(|p| u8::from(p >= self.threshold))
            .collect())
    }
}
