use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::estimator::{Fittable, Transformer};
use crate::error::{DiscriminatorError, Result};

/// カテゴリ文字列と連続した整数コードの対応を学習する。
///
/// コードはソート順に割り当てるため、同じ入力での再学習でも同じ値になる。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Option<BTreeMap<String, usize>>,
}

impl LabelEncoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 学習済みのカテゴリ（コード順）。
    #[must_use]
    pub fn classes(&self) -> Option<Vec<&str>> {
        self.classes
            .as_ref()
            .map(|classes| classes.keys().map(String::as_str).collect())
    }

    /// 単一ラベルのコード。
    ///
    /// # Errors
    /// 未学習なら `NotFitted`、学習時に無かったラベルなら `UnknownCategory`。
    pub fn code(&self, label: &str) -> Result<usize> {
        let classes = self
            .classes
            .as_ref()
            .ok_or_else(|| DiscriminatorError::not_fitted("LabelEncoder"))?;
        classes.get(label).copied().ok_or_else(|| {
            error!(label, "label was not seen during fit");
            DiscriminatorError::UnknownCategory {
                label: label.to_string(),
            }
        })
    }
}

impl Fittable<[String]> for LabelEncoder {
    fn fit(&mut self, input: &[String]) -> Result<()> {
        let mut classes: BTreeMap<String, usize> =
            input.iter().map(|label| (label.clone(), 0)).collect();
        for (code, slot) in classes.values_mut().enumerate() {
            *slot = code;
        }
        self.classes = Some(classes);
        Ok(())
    }
}

impl Transformer<[String]> for LabelEncoder {
    /// `n × 1` の列行列。特徴量の結合にそのまま使える形。
    type Output = Array2<usize>;

    fn transform(&self, input: &[String]) -> Result<Array2<usize>> {
        let codes = input
            .iter()
            .map(|label| self.code(label))
            .collect::<Result<Vec<_>>>()?;
        let rows = codes.len();
        Array2::from_shape_vec((rows, 1), codes).map_err(|err| DiscriminatorError::ShapeMismatch {
            expected: format!("({rows}, 1)"),
            actual: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn codes_follow_sorted_order() {
        let mut encoder = LabelEncoder::new();
        let train = labels(&["dog", "cat", "bird", "cat"]);
        encoder.fit(train.as_slice()).expect("fit");

        assert_eq!(encoder.classes(), Some(vec!["bird", "cat", "dog"]));
        let codes = encoder.transform(train.as_slice()).expect("transform");
        assert_eq!(codes.shape(), &[4, 1]);
        assert_eq!(codes.column(0).to_vec(), vec![2, 1, 0, 1]);
    }

    #[test]
    fn transform_twice_is_idempotent() {
        let mut encoder = LabelEncoder::new();
        let train = labels(&["QUICK LINKS", "MISCELLANEOUS"]);
        encoder.fit(train.as_slice()).expect("fit");

        let first = encoder.transform(train.as_slice()).expect("first");
        let second = encoder.transform(train.as_slice()).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn refit_on_same_input_is_stable() {
        let train = labels(&["b", "a", "c"]);
        let mut first = LabelEncoder::new();
        let mut second = LabelEncoder::new();
        first.fit(train.as_slice()).expect("fit");
        second.fit(train.as_slice()).expect("fit");
        assert_eq!(first, second);
    }

    #[test]
    fn unseen_label_fails() {
        let mut encoder = LabelEncoder::new();
        encoder.fit(labels(&["cat"]).as_slice()).expect("fit");
        let error = encoder
            .transform(labels(&["dog"]).as_slice())
            .expect_err("unseen label");
        assert!(matches!(error, DiscriminatorError::UnknownCategory { ref label } if label == "dog"));
    }

    #[test]
    fn empty_fit_and_transform() {
        let mut encoder = LabelEncoder::new();
        encoder.fit(&[] as &[String]).expect("fit");
        let codes = encoder.transform(&[] as &[String]).expect("transform");
        assert_eq!(codes.shape(), &[0, 1]);
    }

    #[test]
    fn transform_before_fit_is_not_fitted() {
        let encoder = LabelEncoder::new();
        let error = encoder
            .transform(labels(&["cat"]).as_slice())
            .expect_err("not fitted");
        assert!(error.is_not_fitted());
    }
}
