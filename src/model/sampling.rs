use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::features::FeatureMatrix;
use crate::error::{DiscriminatorError, Result};

/// 少数クラスの行を無作為に複製してクラス数を揃える。学習時のみ使う。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOverSampler {
    seed: u64,
}

impl RandomOverSampler {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// 元の行をすべて残し、その後ろに複製した少数クラスの行を追加する。
    ///
    /// 1クラスしか無い場合や既に均衡している場合は入力をそのまま返す。
    ///
    /// # Errors
    /// ラベル数と行数が一致しない場合は [`DiscriminatorError::ShapeMismatch`]。
    pub fn resample(
        &self,
        features: &FeatureMatrix,
        labels: &[u8],
    ) -> Result<(FeatureMatrix, Vec<u8>)> {
        if labels.len() != features.nrows() {
            return Err(DiscriminatorError::ShapeMismatch {
                expected: format!("{} labels", features.nrows()),
                actual: format!("{} labels", labels.len()),
            });
        }

        let positives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == 1).collect();
        let negatives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] != 1).collect();
        let (minority, deficit) = match positives.len().cmp(&negatives.len()) {
            std::cmp::Ordering::Less => {
                let deficit = negatives.len() - positives.len();
                (positives, deficit)
            }
            std::cmp::Ordering::Greater => {
                let deficit = positives.len() - negatives.len();
                (negatives, deficit)
            }
            std::cmp::Ordering::Equal => return Ok((features.clone(), labels.to_vec())),
        };
        if minority.is_empty() {
            return Ok((features.clone(), labels.to_vec()));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut rows: Vec<usize> = (0..labels.len()).collect();
        rows.extend((0..deficit).map(|_| minority[rng.random_range(0..minority.len())]));

        debug!(duplicated = deficit, rows = rows.len(), "oversampled minority class");
        let resampled = features.select_rows(&rows)?;
        let resampled_labels = rows.iter().map(|&row| labels[row]).collect();
        Ok((resampled, resampled_labels))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn minority_class_is_duplicated_until_balanced() {
        let features = FeatureMatrix::from_dense(&array![[1.0], [2.0], [3.0], [4.0]]);
        let labels = [0, 0, 0, 1];
        let (resampled, resampled_labels) =
            RandomOverSampler::new(7).resample(&features, &labels).expect("resample");

        assert_eq!(resampled.nrows(), 6);
        assert_eq!(resampled_labels.iter().filter(|&&l| l == 1).count(), 3);
        assert_eq!(&resampled_labels[..4], &labels);
        for row in 4..6 {
            assert_eq!(resampled.value(row, 0), 4.0);
        }
    }

    #[test]
    fn same_seed_same_sample() {
        let features = FeatureMatrix::from_dense(&array![[1.0], [2.0], [3.0], [4.0], [5.0]]);
        let labels = [1, 1, 0, 0, 0];
        let sampler = RandomOverSampler::new(42);
        let first = sampler.resample(&features, &labels).expect("first");
        let second = sampler.resample(&features, &labels).expect("second");
        assert_eq!(first.0.to_dense(), second.0.to_dense());
        assert_eq!(first.1, second.1);
    }

    #[test]
    fn majority_positive_class_duplicates_negatives() {
        let features = FeatureMatrix::from_dense(&array![[1.0], [2.0], [3.0], [4.0], [5.0]]);
        let labels = [1, 1, 1, 1, 0];
        let (resampled, resampled_labels) =
            RandomOverSampler::new(3).resample(&features, &labels).expect("resample");

        assert_eq!(resampled.nrows(), 8);
        assert_eq!(resampled_labels.iter().filter(|&&l| l == 0).count(), 4);
        for row in 5..8 {
            assert_eq!(resampled_labels[row], 0);
            assert_eq!(resampled.value(row, 0), 5.0);
        }
    }

    #[test]
    fn balanced_or_single_class_input_is_unchanged() {
        let features = FeatureMatrix::from_dense(&array![[1.0], [2.0]]);
        let (same, labels) = RandomOverSampler::new(1)
            .resample(&features, &[0, 1])
            .expect("balanced");
        assert_eq!(same.nrows(), 2);
        assert_eq!(labels, vec![0, 1]);

        let (same, _) = RandomOverSampler::new(1)
            .resample(&features, &[1, 1])
            .expect("single class");
        assert_eq!(same.nrows(), 2);
    }
}
