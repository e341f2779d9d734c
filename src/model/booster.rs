//! 二値ログ損失の勾配ブースティング決定木。
//!
//! 各ラウンドで勾配・ヘッセ行列から回帰木を1本ずつ成長させる（Newton ブースティング）。
//! 分割探索は疎行列の非ゼロ要素だけを走査し、格納されていない要素は 0 として扱う。
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::estimator::ProbabilisticEstimator;
use super::features::FeatureMatrix;
use crate::error::{DiscriminatorError, Result};

const MIN_HESSIAN: f64 = 1e-16;
const PROBA_CLIP: f64 = 1e-6;

/// ブースティングのハイパーパラメータ。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoosterParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// 子ノードに必要なヘッセ行列の合計の下限
    pub min_child_weight: f64,
    /// 葉の重みに対する L2 正則化
    pub lambda: f64,
    /// 分割に必要な最小ゲイン
    pub gamma: f64,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            lambda: 1.0,
            gamma: 0.0,
        }
    }
}

impl BoosterParams {
    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(DiscriminatorError::InvalidParameter {
                name: "n_estimators",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(DiscriminatorError::InvalidParameter {
                name: "learning_rate",
                reason: format!("must be a positive number, got {}", self.learning_rate),
            });
        }
        for (name, value) in [
            ("min_child_weight", self.min_child_weight),
            ("lambda", self.lambda),
            ("gamma", self.gamma),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(DiscriminatorError::InvalidParameter {
                    name,
                    reason: format!("must be non-negative, got {value}"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        weight: f64,
    },
    Split {
        feature: usize,
        /// `value < threshold` なら左
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn predict_row(&self, row: &[(usize, f64)]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                TreeNode::Leaf { weight } => return weight,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row
                        .binary_search_by_key(&feature, |(col, _)| *col)
                        .map_or(0.0, |pos| row[pos].1);
                    idx = if value < threshold { left } else { right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    columns: &'a [Vec<(usize, f64)>],
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a BoosterParams,
    in_node: Vec<bool>,
    nodes: Vec<TreeNode>,
}

impl<'a> TreeBuilder<'a> {
    fn new(
        columns: &'a [Vec<(usize, f64)>],
        grad: &'a [f64],
        hess: &'a [f64],
        params: &'a BoosterParams,
    ) -> Self {
        Self {
            columns,
            grad,
            hess,
            params,
            in_node: vec![false; grad.len()],
            nodes: Vec::new(),
        }
    }

    fn build(mut self, rows: &[usize]) -> RegressionTree {
        self.grow(rows, 0);
        RegressionTree { nodes: self.nodes }
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn grow(&mut self, rows: &[usize], depth: usize) -> usize {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let node = self.nodes.len();
        self.nodes.push(TreeNode::Leaf {
            weight: -g / (h + self.params.lambda) * self.params.learning_rate,
        });

        if depth >= self.params.max_depth || rows.len() < 2 {
            return node;
        }
        let Some(split) = self.find_split(rows, g, h) else {
            return node;
        };

        let mut values = vec![0.0; self.grad.len()];
        for &(row, value) in &self.columns[split.feature] {
            values[row] = value;
        }
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&row| values[row] < split.threshold);

        let left = self.grow(&left_rows, depth + 1);
        let right = self.grow(&right_rows, depth + 1);
        self.nodes[node] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        node
    }

    fn find_split(&mut self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        for &row in rows {
            self.in_node[row] = true;
        }

        let parent = self.score(g, h);
        let mut best: Option<SplitCandidate> = None;
        for (feature, column) in self.columns.iter().enumerate() {
            // (値, 勾配, ヘッセ) を値の昇順に並べ、非格納要素は値 0 の1グループにまとめる
            let mut entries: Vec<(f64, f64, f64)> = column
                .iter()
                .filter(|(row, _)| self.in_node[*row])
                .map(|&(row, value)| (value, self.grad[row], self.hess[row]))
                .collect();
            if entries.is_empty() {
                continue;
            }
            let implicit = rows.len() - entries.len();
            if implicit > 0 {
                let g_nz: f64 = entries.iter().map(|e| e.1).sum();
                let h_nz: f64 = entries.iter().map(|e| e.2).sum();
                entries.push((0.0, g - g_nz, h - h_nz));
            }
            entries.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (mut gl, mut hl) = (0.0, 0.0);
            for pair in entries.windows(2) {
                let (current, next) = (pair[0], pair[1]);
                gl += current.1;
                hl += current.2;
                if next.0 <= current.0 {
                    continue;
                }
                let (gr, hr) = (g - gl, h - hl);
                if hl < self.params.min_child_weight || hr < self.params.min_child_weight {
                    continue;
                }
                let gain =
                    0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent) - self.params.gamma;
                if gain > best.map_or(0.0, |b| b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (current.0 + next.0) / 2.0,
                        gain,
                    });
                }
            }
        }

        for &row in rows {
            self.in_node[row] = false;
        }
        best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BoosterState {
    base_margin: f64,
    n_features: usize,
    classes: Vec<u8>,
    trees: Vec<RegressionTree>,
}

/// 勾配ブースティング決定木による二値分類器。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingClassifier {
    params: BoosterParams,
    state: Option<BoosterState>,
}

fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

impl GradientBoostingClassifier {
    #[must_use]
    pub fn new(params: BoosterParams) -> Self {
        Self {
            params,
            state: None,
        }
    }

    /// 学習済みの木の本数。
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.state.as_ref().map_or(0, |state| state.trees.len())
    }

    fn validate_labels(features: &FeatureMatrix, labels: &[u8]) -> Result<()> {
        if features.nrows() == 0 {
            return Err(DiscriminatorError::Estimator(
                "cannot fit on an empty feature matrix".into(),
            ));
        }
        if labels.len() != features.nrows() {
            return Err(DiscriminatorError::ShapeMismatch {
                expected: format!("{} labels", features.nrows()),
                actual: format!("{} labels", labels.len()),
            });
        }
        if let Some(bad) = labels.iter().find(|&&label| label > 1) {
            return Err(DiscriminatorError::Estimator(format!(
                "labels must be 0 or 1, got {bad}"
            )));
        }
        let positives = labels.iter().filter(|&&label| label == 1).count();
        if positives == 0 || positives == labels.len() {
            return Err(DiscriminatorError::Estimator(format!(
                "this solver needs samples of 2 classes, but the data contains only class {}",
                labels[0]
            )));
        }
        Ok(())
    }
}

impl ProbabilisticEstimator for GradientBoostingClassifier {
    type Params = BoosterParams;

    fn fit(&mut self, features: &FeatureMatrix, labels: &[u8]) -> Result<()> {
        self.params.validate()?;
        Self::validate_labels(features, labels)
            .inspect_err(|err| error!(error = %err, "rejected training labels"))?;

        let n_rows = features.nrows();
        #[allow(clippy::cast_precision_loss)]
        let positive_rate = labels.iter().filter(|&&label| label == 1).count() as f64 / n_rows as f64;
        let prior = positive_rate.clamp(PROBA_CLIP, 1.0 - PROBA_CLIP);
        let base_margin = (prior / (1.0 - prior)).ln();

        let columns = features.columns();
        let rows: Vec<usize> = (0..n_rows).collect();
        let row_entries: Vec<Vec<(usize, f64)>> = rows.iter().map(|&r| features.row(r)).collect();
        let targets: Vec<f64> = labels.iter().map(|&label| f64::from(label)).collect();
        let mut margins = vec![base_margin; n_rows];
        let mut grad = vec![0.0; n_rows];
        let mut hess = vec![0.0; n_rows];
        let mut trees = Vec::with_capacity(self.params.n_estimators);

        for round in 0..self.params.n_estimators {
            for row in 0..n_rows {
                let p = sigmoid(margins[row]);
                grad[row] = p - targets[row];
                hess[row] = (p * (1.0 - p)).max(MIN_HESSIAN);
            }
            let tree = TreeBuilder::new(&columns, &grad, &hess, &self.params).build(&rows);
            for (margin, entries) in margins.iter_mut().zip(&row_entries) {
                *margin += tree.predict_row(entries);
            }
            debug!(round, nodes = tree.nodes.len(), "grew boosting round");
            trees.push(tree);
        }

        info!(
            rows = n_rows,
            n_features = features.ncols(),
            trees = trees.len(),
            base_margin,
            "gradient boosting fitted"
        );
        self.state = Some(BoosterState {
            base_margin,
            n_features: features.ncols(),
            classes: vec![0, 1],
            trees,
        });
        Ok(())
    }

    fn predict_positive_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| DiscriminatorError::not_fitted("GradientBoostingClassifier"))?;
        if features.ncols() != state.n_features {
            return Err(DiscriminatorError::ShapeMismatch {
                expected: format!("{} features", state.n_features),
                actual: format!("{} features", features.ncols()),
            });
        }

        Ok((0..features.nrows())
            .map(|row| {
                let entries = features.row(row);
                let margin = state.base_margin
                    + state
                        .trees
                        .iter()
                        .map(|tree| tree.predict_row(&entries))
                        .sum::<f64>();
                sigmoid(margin)
            })
            .collect())
    }

    fn classes(&self) -> Option<&[u8]> {
        self.state.as_ref().map(|state| state.classes.as_slice())
    }

    fn params(&self) -> BoosterParams {
        self.params
    }

    fn set_params(&mut self, params: BoosterParams) {
        self.params = params;
        self.state = None;
    }
}
