use serde::{Deserialize, Serialize};
use tracing::error;

use super::estimator::{Fittable, Transformer};
use crate::dataset::Columnar;
use crate::error::{DiscriminatorError, Result};

/// 表から1列だけを取り出すパイプライン段。状態を持たない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSelector {
    key: String,
}

impl TextSelector {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<C: Columnar + ?Sized> Fittable<C> for TextSelector {
    fn fit(&mut self, _input: &C) -> Result<()> {
        Ok(())
    }
}

impl<C: Columnar + ?Sized> Transformer<C> for TextSelector {
    type Output = Vec<String>;

    fn transform(&self, input: &C) -> Result<Vec<String>> {
        input.column(&self.key).ok_or_else(|| {
            let available = input.column_names();
            error!(key = %self.key, available = ?available, "selected column is missing");
            DiscriminatorError::MissingColumn {
                key: self.key.clone(),
                available,
            }
        })
    }
}
