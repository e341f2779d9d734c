//! エラー型とエラー種別の分類。
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = DiscriminatorError> = std::result::Result<T, E>;

/// エラーの種類。
///
/// 呼び出し側が「再学習が必要」か「入力が不正」かを個々のバリアントに
/// 依存せずに判定できるようにする。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 入力や設定の誤り（列の欠落、未知のカテゴリ、空の学習データなど）
    Configuration,
    /// fit 前に predict / transform / save が呼ばれた
    NotFitted,
    /// 推定器内部の失敗（単一クラスのラベルなど）
    Upstream,
    /// ファイル入出力・シリアライズの失敗
    Io,
}

#[derive(Debug, Error)]
pub enum DiscriminatorError {
    #[error("column `{key}` not found! available columns: {}", available.join(", "))]
    MissingColumn { key: String, available: Vec<String> },
    #[error("label `{label}` was not seen during fit")]
    UnknownCategory { label: String },
    #[error("input dataset is empty")]
    EmptyDataset,
    #[error("empty vocabulary; the corpus only contains stop words or short tokens")]
    EmptyVocabulary,
    #[error("invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("invalid relevance label `{value}`; expected 0 or 1")]
    InvalidLabel { value: String },
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
    #[error("{component} instance is not fitted yet; call `{required}` before using this method")]
    NotFitted {
        component: &'static str,
        required: &'static str,
    },
    #[error("estimator failure: {0}")]
    Estimator(String),
    #[error("i/o failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DiscriminatorError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingColumn { .. }
            | Self::UnknownCategory { .. }
            | Self::EmptyDataset
            | Self::EmptyVocabulary
            | Self::InvalidParameter { .. }
            | Self::InvalidLabel { .. }
            | Self::ShapeMismatch { .. } => ErrorKind::Configuration,
            Self::NotFitted { .. } => ErrorKind::NotFitted,
            Self::Estimator(_) => ErrorKind::Upstream,
            Self::Io { .. } | Self::Serialization(_) => ErrorKind::Io,
        }
    }

    /// 未学習エラーかどうか。
    #[must_use]
    pub fn is_not_fitted(&self) -> bool {
        matches!(self.kind(), ErrorKind::NotFitted)
    }

    /// 入力・設定起因のエラーかどうか。
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration)
    }

    pub(crate) fn not_fitted(component: &'static str) -> Self {
        Self::NotFitted {
            component,
            required: "fit",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_lists_available_columns() {
        let error = DiscriminatorError::MissingColumn {
            key: "c".into(),
            available: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            error.to_string(),
            "column `c` not found! available columns: a, b"
        );
        assert!(error.is_configuration());
    }

    #[test]
    fn not_fitted_names_required_call() {
        let error = DiscriminatorError::not_fitted("Classifier");
        assert!(error.is_not_fitted());
        assert!(error.to_string().contains("call `fit`"));
    }

    #[test]
    fn estimator_failure_is_upstream() {
        let error = DiscriminatorError::Estimator("single class".into());
        assert_eq!(error.kind(), ErrorKind::Upstream);
        assert!(!error.is_configuration());
    }
}
