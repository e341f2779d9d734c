//! 特徴行列と、記事本文・セクションを結合する特徴量パイプライン。
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sprs::CsMat;
use tracing::{error, info, info_span};

use super::estimator::{Fittable, Transformer};
use super::label_encoder::LabelEncoder;
use super::selector::TextSelector;
use super::vectorizer::TfidfVectorizer;
use crate::dataset::{ARTICLE_COLUMN, Columnar, SECTION_COLUMN};
use crate::error::{DiscriminatorError, Result};

/// CSR 形式の疎な特徴行列。
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    inner: CsMat<f64>,
}

impl FeatureMatrix {
    /// CSR の各配列から構築する。列番号は行内で昇順であること。
    ///
    /// # Errors
    /// 配列の構造が不正な場合は [`DiscriminatorError::ShapeMismatch`]。
    pub fn from_csr(
        shape: (usize, usize),
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f64>,
    ) -> Result<Self> {
        CsMat::try_new(shape, indptr, indices, data)
            .map(|inner| Self { inner })
            .map_err(|(_, _, _, err)| DiscriminatorError::ShapeMismatch {
                expected: format!("valid CSR structure for shape {shape:?}"),
                actual: err.to_string(),
            })
    }

    /// 密行列から構築する。ゼロは格納しない。
    #[must_use]
    pub fn from_dense(dense: &Array2<f64>) -> Self {
        let (rows, cols) = dense.dim();
        let mut indptr = Vec::with_capacity(rows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in dense.rows() {
            for (col, &value) in row.iter().enumerate() {
                if value != 0.0 {
                    indices.push(col);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }
        Self {
            inner: CsMat::new((rows, cols), indptr, indices, data),
        }
    }

    /// `n × 1` のカテゴリコード列を特徴行列にする。
    #[must_use]
    pub fn from_codes(codes: &Array2<usize>) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let dense = codes.mapv(|code| code as f64);
        Self::from_dense(&dense)
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.inner.rows()
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.inner.cols()
    }

    #[must_use]
    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    /// 要素の値。格納されていない要素は 0。
    #[must_use]
    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.inner.get(row, col).copied().unwrap_or(0.0)
    }

    /// 行の非ゼロ要素（列番号の昇順）。
    #[must_use]
    pub fn row(&self, row: usize) -> Vec<(usize, f64)> {
        self.inner
            .outer_view(row)
            .map(|view| view.iter().map(|(col, &value)| (col, value)).collect())
            .unwrap_or_default()
    }

    /// 列ごとの非ゼロ要素 `(行, 値)`。行番号は昇順。
    #[must_use]
    pub fn columns(&self) -> Vec<Vec<(usize, f64)>> {
        let mut columns = vec![Vec::new(); self.ncols()];
        for (row, view) in self.inner.outer_iterator().enumerate() {
            for (col, &value) in view.iter() {
                columns[col].push((row, value));
            }
        }
        columns
    }

    /// 指定した行を順に取り出した行列。重複指定も可。
    ///
    /// # Errors
    /// 範囲外の行番号がある場合は [`DiscriminatorError::ShapeMismatch`]。
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for &row in rows {
            if row >= self.nrows() {
                return Err(DiscriminatorError::ShapeMismatch {
                    expected: format!("row index < {}", self.nrows()),
                    actual: row.to_string(),
                });
            }
            for (col, value) in self.row(row) {
                indices.push(col);
                data.push(value);
            }
            indptr.push(indices.len());
        }
        Self::from_csr((rows.len(), self.ncols()), indptr, indices, data)
    }

    /// 行数の等しい行列を左から順に横結合する。
    ///
    /// # Errors
    /// 行数が揃っていない場合は [`DiscriminatorError::ShapeMismatch`]。
    pub fn hstack(blocks: &[&FeatureMatrix]) -> Result<Self> {
        let rows = blocks.first().map_or(0, |block| block.nrows());
        if let Some(bad) = blocks.iter().find(|block| block.nrows() != rows) {
            return Err(DiscriminatorError::ShapeMismatch {
                expected: format!("{rows} rows in every block"),
                actual: format!("{} rows", bad.nrows()),
            });
        }

        let cols = blocks.iter().map(|block| block.ncols()).sum();
        let mut indptr = Vec::with_capacity(rows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in 0..rows {
            let mut offset = 0;
            for block in blocks {
                for (col, value) in block.row(row) {
                    indices.push(offset + col);
                    data.push(value);
                }
                offset += block.ncols();
            }
            indptr.push(indices.len());
        }
        Self::from_csr((rows, cols), indptr, indices, data)
    }

    #[must_use]
    pub fn to_dense(&self) -> Array2<f64> {
        let mut dense = Array2::zeros((self.nrows(), self.ncols()));
        for (row, view) in self.inner.outer_iterator().enumerate() {
            for (col, &value) in view.iter() {
                dense[[row, col]] = value;
            }
        }
        dense
    }
}

/// 記事本文の TF-IDF とセクションのコードを結合する。
///
/// 列の並びは「語彙（アルファベット順）→ セクションコード」で固定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePipeline {
    article_selector: TextSelector,
    vectorizer: TfidfVectorizer,
    section_selector: TextSelector,
    encoder: LabelEncoder,
    fitted: bool,
}

impl Default for FeaturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FeaturePipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            article_selector: TextSelector::new(ARTICLE_COLUMN),
            vectorizer: TfidfVectorizer::new(),
            section_selector: TextSelector::new(SECTION_COLUMN),
            encoder: LabelEncoder::new(),
            fitted: false,
        }
    }

    /// 出力行列の列数。未学習なら `None`。
    #[must_use]
    pub fn n_features(&self) -> Option<usize> {
        self.vectorizer
            .vocabulary_len()
            .filter(|_| self.fitted)
            .map(|vocabulary| vocabulary + 1)
    }

    #[must_use]
    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    fn fit_inner<C: Columnar + ?Sized>(&mut self, input: &C) -> Result<()> {
        let articles = self.article_selector.transform(input)?;
        self.vectorizer.fit(articles.as_slice())?;
        let sections = self.section_selector.transform(input)?;
        self.encoder.fit(sections.as_slice())?;
        Ok(())
    }

    fn transform_inner<C: Columnar + ?Sized>(&self, input: &C) -> Result<FeatureMatrix> {
        let articles = self.article_selector.transform(input)?;
        let text = self.vectorizer.transform(articles.as_slice())?;
        let sections = self.section_selector.transform(input)?;
        let codes = FeatureMatrix::from_codes(&self.encoder.transform(sections.as_slice())?);
        FeatureMatrix::hstack(&[&text, &codes])
    }
}

impl<C: Columnar + ?Sized> Fittable<C> for FeaturePipeline {
    fn fit(&mut self, input: &C) -> Result<()> {
        let _span = info_span!("feature_pipeline.fit", rows = input.len()).entered();
        if input.is_empty() {
            error!("cannot fit the feature pipeline on an empty dataset");
            return Err(DiscriminatorError::EmptyDataset);
        }

        self.fitted = false;
        self.fit_inner(input)
            .inspect_err(|err| error!(error = %err, "error fitting feature pipeline"))?;
        self.fitted = true;
        info!(n_features = ?self.n_features(), "feature pipeline fitted");
        Ok(())
    }
}

impl<C: Columnar + ?Sized> Transformer<C> for FeaturePipeline {
    type Output = FeatureMatrix;

    fn transform(&self, input: &C) -> Result<FeatureMatrix> {
        if !self.fitted {
            return Err(DiscriminatorError::not_fitted("FeaturePipeline"));
        }
        self.transform_inner(input)
            .inspect_err(|err| error!(error = %err, "error transforming features"))
    }
}
