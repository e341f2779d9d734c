//! 二値分類の評価指標。
use serde::Serialize;

use crate::error::{DiscriminatorError, Result};

#[derive(Debug, Default, Clone, Copy)]
struct LabelStats {
    true_positive: f64,
    false_positive: f64,
    false_negative: f64,
    support: usize, // 正解データに含まれるそのラベルの個数
}

impl LabelStats {
    fn metrics(self) -> ClassMetrics {
        let precision = ratio(self.true_positive, self.true_positive + self.false_positive);
        let recall = ratio(self.true_positive, self.true_positive + self.false_negative);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        ClassMetrics {
            precision,
            recall,
            f1_score,
            support: self.support,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn label_stats(y_true: &[u8], y_pred: &[u8]) -> [LabelStats; 2] {
    let mut stats = [LabelStats::default(); 2];
    for (&expected, &predicted) in y_true.iter().zip(y_pred) {
        for (label, entry) in stats.iter_mut().enumerate() {
            let label = u8::try_from(label).unwrap_or(u8::MAX);
            match (expected == label, predicted == label) {
                (true, true) => entry.true_positive += 1.0,
                (false, true) => entry.false_positive += 1.0,
                (true, false) => entry.false_negative += 1.0,
                (false, false) => {}
            }
            if expected == label {
                entry.support += 1;
            }
        }
    }
    stats
}

/// クラスごとの F1 スコア `[F1(0), F1(1)]`。分母が 0 の場合は 0。
#[must_use]
pub fn f1_per_class(y_true: &[u8], y_pred: &[u8]) -> [f64; 2] {
    let [negative, positive] = label_stats(y_true, y_pred);
    [negative.metrics().f1_score, positive.metrics().f1_score]
}

/// 正例クラスの再現率。
#[must_use]
pub fn recall(y_true: &[u8], y_pred: &[u8]) -> f64 {
    label_stats(y_true, y_pred)[1].metrics().recall
}

/// 1クラス分の指標。
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// クラス別・マクロ平均・加重平均の指標と正解率。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub negative: ClassMetrics,
    pub positive: ClassMetrics,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub accuracy: f64,
}

impl ClassificationReport {
    /// # Errors
    /// 正解と予測の長さが異なる場合は [`DiscriminatorError::ShapeMismatch`]。
    pub fn compute(y_true: &[u8], y_pred: &[u8]) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(DiscriminatorError::ShapeMismatch {
                expected: format!("{} predictions", y_true.len()),
                actual: format!("{} predictions", y_pred.len()),
            });
        }

        let [negative, positive] = label_stats(y_true, y_pred).map(LabelStats::metrics);
        let total = negative.support + positive.support;
        let macro_avg = ClassMetrics {
            precision: (negative.precision + positive.precision) / 2.0,
            recall: (negative.recall + positive.recall) / 2.0,
            f1_score: (negative.f1_score + positive.f1_score) / 2.0,
            support: total,
        };
        #[allow(clippy::cast_precision_loss)]
        let weighted = |pick: fn(&ClassMetrics) -> f64| {
            ratio(
                pick(&negative) * negative.support as f64 + pick(&positive) * positive.support as f64,
                total as f64,
            )
        };
        let weighted_avg = ClassMetrics {
            precision: weighted(|m| m.precision),
            recall: weighted(|m| m.recall),
            f1_score: weighted(|m| m.f1_score),
            support: total,
        };
        let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
        #[allow(clippy::cast_precision_loss)]
        let accuracy = ratio(correct as f64, y_true.len() as f64);

        Ok(Self {
            negative,
            positive,
            macro_avg,
            weighted_avg,
            accuracy,
        })
    }
}
