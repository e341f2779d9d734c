//! 学習・評価用のデータ分割とハイパーパラメータ探索。
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, error, info, info_span, warn};

use super::booster::BoosterParams;
use super::estimator::ProbabilisticEstimator;
use super::metrics::recall;
use super::pipeline::RelevancePipeline;
use crate::dataset::Dataset;
use crate::error::{DiscriminatorError, Result};

/// シャッフルしてから `test_size` の割合をテスト側に回す。
///
/// テスト件数は `ceil(n * test_size)`。戻り値は `(train, test)`。
///
/// # Errors
/// 空のデータセット、`test_size` が (0, 1) の範囲外、もしくは片側が空になる場合。
pub fn train_test_split(dataset: &Dataset, test_size: f64, seed: u64) -> Result<(Dataset, Dataset)> {
    if dataset.is_empty() {
        let err = DiscriminatorError::EmptyDataset;
        error!(error = %err, "cannot split an empty dataset");
        return Err(err);
    }
    if !(test_size > 0.0 && test_size < 1.0) {
        let err = DiscriminatorError::InvalidParameter {
            name: "test_size",
            reason: format!("must be in (0, 1), got {test_size}"),
        };
        error!(error = %err, "invalid test size");
        return Err(err);
    }

    let n_rows = dataset.len();
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let n_test = (n_rows as f64 * test_size).ceil() as usize;
    if n_test >= n_rows {
        let err = DiscriminatorError::InvalidParameter {
            name: "test_size",
            reason: format!("test_size={test_size} leaves no training rows out of {n_rows}"),
        };
        error!(error = %err, "invalid test size");
        return Err(err);
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test, train) = indices.split_at(n_test);
    debug!(train = train.len(), test = test.len(), "split dataset");
    Ok((dataset.select(train), dataset.select(test)))
}

/// 層化 k 分割。各クラスの行をシャッフルしてから順番に各分割へ配る。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    n_splits: usize,
    seed: u64,
}

impl KFold {
    /// # Errors
    /// `n_splits < 2` の場合。
    pub fn new(n_splits: usize, seed: u64) -> Result<Self> {
        if n_splits < 2 {
            let err = DiscriminatorError::InvalidParameter {
                name: "n_splits",
                reason: format!("k-fold cross-validation requires at least 2 splits, got {n_splits}"),
            };
            error!(error = %err, "invalid number of folds");
            return Err(err);
        }
        Ok(Self { n_splits, seed })
    }

    #[must_use]
    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// `(train, test)` の行番号の組を分割数だけ返す。どちらも昇順。
    ///
    /// # Errors
    /// 行数が分割数より少ない場合。
    pub fn split(&self, labels: &[u8]) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
        if labels.len() < self.n_splits {
            let err = DiscriminatorError::InvalidParameter {
                name: "n_splits",
                reason: format!(
                    "cannot have {} splits with only {} samples",
                    self.n_splits,
                    labels.len()
                ),
            };
            error!(error = %err, "too few rows for the number of folds");
            return Err(err);
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut fold_of = vec![0; labels.len()];
        let mut offset = 0;
        for class in [0_u8, 1] {
            let mut members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] == class).collect();
            members.shuffle(&mut rng);
            for (position, &row) in members.iter().enumerate() {
                fold_of[row] = (offset + position) % self.n_splits;
            }
            // 次のクラスは続きの分割から配り、テスト件数の偏りを抑える
            offset += members.len();
        }

        Ok((0..self.n_splits)
            .map(|fold| {
                (0..labels.len()).partition(|&row| fold_of[row] != fold)
            })
            .collect())
    }
}

/// `n_estimators × learning_rate` の探索格子。
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGrid {
    pub n_estimators: Vec<usize>,
    pub learning_rates: Vec<f64>,
}

impl ParamGrid {
    /// `base` の他の値を保ったまま格子を展開する。学習率が外側、木の本数が内側。
    #[must_use]
    pub fn candidates(&self, base: BoosterParams) -> Vec<BoosterParams> {
        self.learning_rates
            .iter()
            .flat_map(|&learning_rate| {
                self.n_estimators.iter().map(move |&n_estimators| BoosterParams {
                    n_estimators,
                    learning_rate,
                    ..base
                })
            })
            .collect()
    }
}

/// グリッドサーチの結果。
#[derive(Debug, Clone)]
pub struct GridSearchOutcome<E: ProbabilisticEstimator> {
    pub best_params: E::Params,
    /// 交差検証での正例再現率の平均
    pub best_score: f64,
    pub cv_scores: Vec<(E::Params, f64)>,
    /// 最良のパラメータで全データに再学習したパイプライン
    pub best_pipeline: RelevancePipeline<E>,
}

/// 交差検証の正例再現率で推定器のパラメータを選ぶ。同点なら先の候補を優先する。
#[derive(Debug, Clone)]
pub struct GridSearch<E: ProbabilisticEstimator> {
    base: RelevancePipeline<E>,
    candidates: Vec<E::Params>,
    folds: KFold,
}

impl<E: ProbabilisticEstimator + Clone> GridSearch<E> {
    pub fn new(base: RelevancePipeline<E>, candidates: Vec<E::Params>, folds: KFold) -> Self {
        Self {
            base,
            candidates,
            folds,
        }
    }

    /// # Errors
    /// 候補が空、分割できない、もしくはいずれかの学習に失敗した場合。
    pub fn fit(&self, dataset: &Dataset, labels: &[u8]) -> Result<GridSearchOutcome<E>> {
        let _span = info_span!(
            "grid_search.fit",
            candidates = self.candidates.len(),
            folds = self.folds.n_splits()
        )
        .entered();
        if self.candidates.is_empty() {
            let err = DiscriminatorError::InvalidParameter {
                name: "param_grid",
                reason: "at least one candidate is required".into(),
            };
            error!(error = %err, "empty parameter grid");
            return Err(err);
        }
        if labels.len() != dataset.len() {
            let err = DiscriminatorError::ShapeMismatch {
                expected: format!("{} labels", dataset.len()),
                actual: format!("{} labels", labels.len()),
            };
            error!(error = %err, "label count does not match dataset");
            return Err(err);
        }

        let splits = self.folds.split(labels)?;
        let mut cv_scores = Vec::with_capacity(self.candidates.len());
        let mut best: Option<(usize, f64)> = None;
        for (index, params) in self.candidates.iter().enumerate() {
            let score = self.cross_validate(dataset, labels, &splits, params);
            info!(candidate = ?params, score, "cross-validated candidate");
            // NaN は全分割が失敗した候補で、選ばれない
            if !score.is_nan() && best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((index, score));
            }
            cv_scores.push((params.clone(), score));
        }

        let Some((best_index, best_score)) = best else {
            let err = DiscriminatorError::Estimator(
                "every candidate failed on every cross-validation fold".into(),
            );
            error!(error = %err, "grid search produced no score");
            return Err(err);
        };
        let best_params = self.candidates[best_index].clone();
        let mut best_pipeline = self.base.clone();
        best_pipeline.set_estimator_params(best_params.clone());
        best_pipeline.fit(dataset, labels)?;
        info!(best = ?best_params, best_score, "grid search finished");

        Ok(GridSearchOutcome {
            best_params,
            best_score,
            cv_scores,
            best_pipeline,
        })
    }

    /// 完了した分割の再現率の平均。失敗した分割は警告を出して除外し、全分割が失敗したら NaN。
    #[allow(clippy::cast_precision_loss)]
    fn cross_validate(
        &self,
        dataset: &Dataset,
        labels: &[u8],
        splits: &[(Vec<usize>, Vec<usize>)],
        params: &E::Params,
    ) -> f64 {
        let mut total = 0.0;
        let mut completed = 0_usize;
        for (fold, (train, test)) in splits.iter().enumerate() {
            match self.score_fold(dataset, labels, train, test, params) {
                Ok(score) => {
                    total += score;
                    completed += 1;
                }
                Err(err) => warn!(fold, candidate = ?params, error = %err, "cross-validation fold failed"),
            }
        }
        if completed == 0 {
            return f64::NAN;
        }
        total / completed as f64
    }

    fn score_fold(
        &self,
        dataset: &Dataset,
        labels: &[u8],
        train: &[usize],
        test: &[usize],
        params: &E::Params,
    ) -> Result<f64> {
        let mut pipeline = self.base.clone();
        pipeline.set_estimator_params(params.clone());
        let train_labels: Vec<u8> = train.iter().map(|&row| labels[row]).collect();
        pipeline.fit(&dataset.select(train), &train_labels)?;

        let test_labels: Vec<u8> = test.iter().map(|&row| labels[row]).collect();
        let predictions = pipeline.predict(&dataset.select(test))?;
        Ok(recall(&test_labels, &predictions))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tracing_test::traced_test;

    use super::*;
    use crate::dataset::ArticleRecord;
    use crate::model::booster::GradientBoostingClassifier;
    use crate::model::classifier::Classifier;

    fn dataset(rows: usize) -> Dataset {
        (0..rows)
            .map(|i| {
                if i % 2 == 0 {
                    ArticleRecord::new("QUICK LINKS", format!("rust compiler release {i}")).labelled(1)
                } else {
                    ArticleRecord::new("MISCELLANEOUS", format!("celebrity gossip column {i}")).labelled(0)
                }
            })
            .collect()
    }

    #[rstest]
    #[case(10, 0.2, 8, 2)]
    #[case(10, 0.25, 7, 3)]
    #[case(3, 0.5, 1, 2)]
    fn split_sizes_round_test_up(
        #[case] rows: usize,
        #[case] test_size: f64,
        #[case] n_train: usize,
        #[case] n_test: usize,
    ) {
        let (train, test) = train_test_split(&dataset(rows), test_size, 42).expect("split");
        assert_eq!(train.len(), n_train);
        assert_eq!(test.len(), n_test);
    }

    #[test]
    fn split_is_seeded_and_disjoint() {
        let data = dataset(20);
        let (train_a, test_a) = train_test_split(&data, 0.3, 7).expect("split");
        let (train_b, test_b) = train_test_split(&data, 0.3, 7).expect("split");
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);

        let mut articles: Vec<&str> = train_a
            .records()
            .iter()
            .chain(test_a.records())
            .map(|r| r.article.as_str())
            .collect();
        articles.sort_unstable();
        articles.dedup();
        assert_eq!(articles.len(), 20);
    }

    #[rstest]
    #[case(0.0)]
    #[case(1.0)]
    #[case(0.99)]
    fn split_rejects_degenerate_sizes(#[case] test_size: f64) {
        assert!(train_test_split(&dataset(4), test_size, 1).is_err());
    }

    #[test]
    fn kfold_is_stratified_and_covers_every_row_once() {
        let labels: Vec<u8> = (0..12).map(|i| u8::from(i % 3 == 0)).collect();
        let folds = KFold::new(3, 0).expect("kfold").split(&labels).expect("split");
        assert_eq!(folds.len(), 3);

        let mut seen = vec![0; labels.len()];
        for (train, test) in &folds {
            assert_eq!(train.len() + test.len(), labels.len());
            assert!(test.iter().all(|row| !train.contains(row)));
            let positives = test.iter().filter(|&&row| labels[row] == 1).count();
            assert!((1..=2).contains(&positives));
            for &row in test {
                seen[row] += 1;
            }
        }
        assert!(seen.iter().all(|&count| count == 1));
    }

    #[test]
    fn kfold_rejects_too_few_splits_or_rows() {
        assert!(KFold::new(1, 0).is_err());
        assert!(KFold::new(3, 0).expect("kfold").split(&[0, 1]).is_err());
    }

    #[test]
    fn grid_expands_learning_rate_outermost() {
        let grid = ParamGrid {
            n_estimators: vec![100, 200],
            learning_rates: vec![0.01, 0.1],
        };
        let order: Vec<(f64, usize)> = grid
            .candidates(BoosterParams::default())
            .iter()
            .map(|p| (p.learning_rate, p.n_estimators))
            .collect();
        assert_eq!(order, vec![(0.01, 100), (0.01, 200), (0.1, 100), (0.1, 200)]);
    }

    #[test]
    fn grid_search_returns_refit_pipeline() {
        let data = dataset(24);
        let labels = data.labels().expect("labels");
        let base = RelevancePipeline::new(Classifier::new(GradientBoostingClassifier::default()));
        let grid = ParamGrid {
            n_estimators: vec![3, 5],
            learning_rates: vec![0.3],
        };
        let search = GridSearch::new(
            base,
            grid.candidates(BoosterParams::default()),
            KFold::new(2, 42).expect("kfold"),
        );

        let outcome = search.fit(&data, &labels).expect("grid search");
        assert_eq!(outcome.cv_scores.len(), 2);
        assert!((0.0..=1.0).contains(&outcome.best_score));
        assert!(outcome.best_pipeline.is_fitted());
        let first_best = outcome
            .cv_scores
            .iter()
            .find(|(_, score)| *score == outcome.best_score)
            .map(|(params, _)| *params);
        assert_eq!(first_best, Some(outcome.best_params));
    }

    #[traced_test]
    #[test]
    fn section_missing_from_a_training_fold_skips_that_fold() {
        let data = Dataset::concat(vec![
            dataset(20),
            std::iter::once(
                ArticleRecord::new("SCIENCE & FUTURISTIC TECHNOLOGY", "fusion reactor milestone")
                    .labelled(0),
            )
            .collect(),
        ]);
        let labels = data.labels().expect("labels");
        let search = GridSearch::new(
            RelevancePipeline::new(Classifier::new(GradientBoostingClassifier::default())),
            ParamGrid {
                n_estimators: vec![3],
                learning_rates: vec![0.3],
            }
            .candidates(BoosterParams::default()),
            KFold::new(3, 42).expect("kfold"),
        );

        let outcome = search.fit(&data, &labels).expect("grid search");
        assert!(outcome.best_score.is_finite());
        assert!(outcome.best_pipeline.is_fitted());
        assert!(logs_contain("cross-validation fold failed"));
    }

    #[traced_test]
    #[test]
    fn invalid_split_parameters_are_logged() {
        assert!(train_test_split(&Dataset::default(), 0.2, 0).is_err());
        assert!(logs_contain("cannot split an empty dataset"));
        assert!(KFold::new(1, 0).is_err());
        assert!(logs_contain("invalid number of folds"));
    }

    #[test]
    fn empty_grid_is_rejected() {
        let data = dataset(4);
        let labels = data.labels().expect("labels");
        let search = GridSearch::new(RelevancePipeline::default(), Vec::new(), KFold::new(2, 0).expect("kfold"));
        assert!(search.fit(&data, &labels).expect_err("empty grid").is_configuration());
    }
}
