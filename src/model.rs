//! 特徴量パイプラインと関連度分類器。
//!
//! `article` 列の TF-IDF と `section` 列のカテゴリコードを結合した特徴行列を
//! 勾配ブースティング木に入力し、閾値探索で決定境界を調整する。
pub mod booster;
pub mod classifier;
pub mod estimator;
pub mod features;
pub mod label_encoder;
pub mod metrics;
pub mod pipeline;
pub mod sampling;
pub mod selection;
pub mod selector;
pub mod vectorizer;

pub use booster::{BoosterParams, GradientBoostingClassifier};
pub use classifier::{Classifier, ClassifierParams, ThresholdGrid};
pub use estimator::{Fittable, Predictor, ProbabilisticEstimator, Transformer};
pub use features::{FeatureMatrix, FeaturePipeline};
pub use label_encoder::LabelEncoder;
pub use metrics::ClassificationReport;
pub use pipeline::RelevancePipeline;
pub use sampling::RandomOverSampler;
pub use selection::{GridSearch, GridSearchOutcome, KFold, ParamGrid, train_test_split};
pub use selector::TextSelector;
pub use vectorizer::TfidfVectorizer;
