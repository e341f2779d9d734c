//! fit / transform / predict の能力インターフェース。
//!
//! 各コンポーネントは必要な能力だけを実装し、パイプラインは型付きの
//! サブコンポーネントを保持して合成する。
use std::fmt::Debug;

use ndarray::Array2;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::features::FeatureMatrix;
use crate::error::Result;

/// 入力から状態を学習できるコンポーネント。
pub trait Fittable<X: ?Sized> {
    /// # Errors
    /// 入力が不正な場合、もしくは内部コンポーネントの学習に失敗した場合。
    fn fit(&mut self, input: &X) -> Result<()>;
}

/// 学習済み状態を使って入力を変換するコンポーネント。
pub trait Transformer<X: ?Sized>: Fittable<X> {
    type Output;

    /// # Errors
    /// 未学習の場合は `NotFitted`、入力が不正な場合は設定エラー。
    fn transform(&self, input: &X) -> Result<Self::Output>;

    /// # Errors
    /// `fit` または `transform` のエラーをそのまま返す。
    fn fit_transform(&mut self, input: &X) -> Result<Self::Output> {
        self.fit(input)?;
        self.transform(input)
    }
}

/// 特徴行列とラベルから学習し、二値の関連度を予測する。
pub trait Predictor {
    /// # Errors
    /// 推定器の学習に失敗した場合。
    fn fit(&mut self, features: &FeatureMatrix, labels: &[u8]) -> Result<()>;

    /// 各行の `[P(class=0), P(class=1)]`。
    ///
    /// # Errors
    /// 未学習の場合は `NotFitted`。
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Array2<f64>>;

    /// # Errors
    /// 未学習の場合は `NotFitted`。
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<u8>>;
}

/// 分類器の内部で使うブラックボックス推定器。
///
/// 正例確率を返せる推定器であれば差し替え可能。
pub trait ProbabilisticEstimator {
    type Params: Clone + Debug + PartialEq + Serialize + DeserializeOwned;

    /// # Errors
    /// 空の入力、単一クラスのラベルなど推定器が扱えない入力の場合。
    fn fit(&mut self, features: &FeatureMatrix, labels: &[u8]) -> Result<()>;

    /// 各行の `P(class=1)`。
    ///
    /// # Errors
    /// 未学習、もしくは列数が学習時と異なる場合。
    fn predict_positive_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;

    /// 学習済みのクラスラベル。未学習なら `None`。
    fn classes(&self) -> Option<&[u8]>;

    fn params(&self) -> Self::Params;

    fn set_params(&mut self, params: Self::Params);
}
