//! 記事レコードとデータセット。
//!
//! 学習・推論で扱う表形式データは型付きの [`ArticleRecord`] の列として保持する。
//! 外部から受け取る緩い型の表（[`Table`]）は構築境界でスキーマ検証してから
//! [`Dataset`] に変換する。
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{DiscriminatorError, Result};

pub mod builder;

pub const ARTICLE_COLUMN: &str = "article";
pub const SECTION_COLUMN: &str = "section";
pub const LABEL_COLUMN: &str = "is_relevant";
pub const PREDICTION_COLUMN: &str = "predicted_is_relevant";

/// データセットの最小単位。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub section: String,
    pub article: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_relevant: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_is_relevant: Option<u8>,
}

impl ArticleRecord {
    #[must_use]
    pub fn new(section: impl Into<String>, article: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            article: article.into(),
            is_relevant: None,
            predicted_is_relevant: None,
        }
    }

    #[must_use]
    pub fn labelled(mut self, is_relevant: u8) -> Self {
        self.is_relevant = Some(is_relevant);
        self
    }
}

/// 列名で値を取り出せる表形式バッチ。
pub trait Columnar {
    fn column_names(&self) -> Vec<String>;

    /// 列を文字列として取り出す。存在しない列は `None`。
    fn column(&self, key: &str) -> Option<Vec<String>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 名前付きの文字列列からなる緩い型の表。外部ストレージとの境界で使う。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<(String, Vec<String>)>,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 列を追加する。既存の行数と長さが異なる場合はエラー。
    ///
    /// # Errors
    /// 列の長さが既存の列と一致しない場合は [`DiscriminatorError::ShapeMismatch`]。
    pub fn with_column<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Result<Self> {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let name = name.into();
        // 同名の列は置き換えるので、長さの比較から外す
        self.columns.retain(|(existing, _)| existing != &name);
        if let Some((_, first)) = self.columns.first()
            && first.len() != values.len()
        {
            return Err(DiscriminatorError::ShapeMismatch {
                expected: format!("{} rows", first.len()),
                actual: format!("{} rows", values.len()),
            });
        }
        self.columns.push((name, values));
        Ok(self)
    }
}

impl Columnar for Table {
    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    fn column(&self, key: &str) -> Option<Vec<String>> {
        self.columns
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, values)| values.clone())
    }

    fn len(&self) -> usize {
        self.columns.first().map_or(0, |(_, values)| values.len())
    }
}

/// 順序付きの記事レコード集合。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    records: Vec<ArticleRecord>,
}

impl Dataset {
    #[must_use]
    pub fn new(records: Vec<ArticleRecord>) -> Self {
        Self { records }
    }

    #[must_use]
    pub fn records(&self) -> &[ArticleRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<ArticleRecord> {
        self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 全行にラベルを付与する。
    #[must_use]
    pub fn labelled(mut self, is_relevant: u8) -> Self {
        for record in &mut self.records {
            record.is_relevant = Some(is_relevant);
        }
        self
    }

    /// 複数のデータセットを順に連結する。
    #[must_use]
    pub fn concat(parts: impl IntoIterator<Item = Dataset>) -> Self {
        Self {
            records: parts.into_iter().flat_map(Dataset::into_records).collect(),
        }
    }

    /// 指定した行だけを取り出す（順序は `indices` の順）。
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            records: indices
                .iter()
                .filter_map(|&idx| self.records.get(idx).cloned())
                .collect(),
        }
    }

    /// 学習用ラベル列を取り出す。
    ///
    /// # Errors
    /// ラベルが欠けている行、もしくは 0/1 以外の値がある場合はエラー。
    pub fn labels(&self) -> Result<Vec<u8>> {
        self.records
            .iter()
            .map(|record| match record.is_relevant {
                Some(label @ (0 | 1)) => Ok(label),
                Some(other) => Err(DiscriminatorError::InvalidLabel {
                    value: other.to_string(),
                }),
                None => Err(DiscriminatorError::MissingColumn {
                    key: LABEL_COLUMN.to_string(),
                    available: self.column_names(),
                }),
            })
            .collect()
    }

    /// 予測結果を `predicted_is_relevant` 列として付与する。
    ///
    /// # Errors
    /// 予測数と行数が一致しない場合は [`DiscriminatorError::ShapeMismatch`]。
    pub fn with_predictions(mut self, predictions: &[u8]) -> Result<Self> {
        if predictions.len() != self.records.len() {
            return Err(DiscriminatorError::ShapeMismatch {
                expected: format!("{} predictions", self.records.len()),
                actual: format!("{} predictions", predictions.len()),
            });
        }
        for (record, prediction) in self.records.iter_mut().zip(predictions) {
            record.predicted_is_relevant = Some(*prediction);
        }
        Ok(self)
    }

    /// 予測列を取り除く。過去の予測結果を学習データに再利用する際に使う。
    #[must_use]
    pub fn without_predictions(mut self) -> Self {
        for record in &mut self.records {
            record.predicted_is_relevant = None;
        }
        self
    }

    /// 内容から決まる短いハッシュ。バージョン付きファイル名に使う。
    #[must_use]
    pub fn content_hash(&self) -> String {
        let mut hasher_input = String::new();
        for record in &self.records {
            // serde_json::to_string は構造体に対して失敗しない
            if let Ok(line) = serde_json::to_string(record) {
                hasher_input.push_str(&line);
                hasher_input.push('\n');
            }
        }
        let digest = format!("{:016x}", xxh3_64(hasher_input.as_bytes()));
        digest[..10].to_string()
    }

    /// JSON Lines 形式で読み込む。空行は無視する。
    ///
    /// # Errors
    /// 読み込みまたはパースに失敗した場合はエラー。
    pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| DiscriminatorError::io(path, err))?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|err| DiscriminatorError::io(path, err))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ArticleRecord = serde_json::from_str(&line).inspect_err(|err| {
                error!(path = %path.display(), error = %err, "failed to parse dataset row");
            })?;
            records.push(record);
        }
        debug!(path = %path.display(), rows = records.len(), "loaded dataset");
        Ok(Self { records })
    }

    /// JSON Lines 形式で書き出す。親ディレクトリは必要に応じて作成する。
    ///
    /// # Errors
    /// 書き込みに失敗した場合はエラー。
    pub fn write_jsonl(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| DiscriminatorError::io(parent, err))?;
        }
        let file = File::create(path).map_err(|err| DiscriminatorError::io(path, err))?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            serde_json::to_writer(&mut writer, record)?;
            writer
                .write_all(b"\n")
                .map_err(|err| DiscriminatorError::io(path, err))?;
        }
        writer
            .flush()
            .map_err(|err| DiscriminatorError::io(path, err))?;
        debug!(path = %path.display(), rows = self.records.len(), "wrote dataset");
        Ok(())
    }
}

impl Columnar for Dataset {
    fn column_names(&self) -> Vec<String> {
        let mut names = vec![SECTION_COLUMN.to_string(), ARTICLE_COLUMN.to_string()];
        if !self.records.is_empty() && self.records.iter().all(|r| r.is_relevant.is_some()) {
            names.push(LABEL_COLUMN.to_string());
        }
        if !self.records.is_empty()
            && self
                .records
                .iter()
                .all(|r| r.predicted_is_relevant.is_some())
        {
            names.push(PREDICTION_COLUMN.to_string());
        }
        names
    }

    fn column(&self, key: &str) -> Option<Vec<String>> {
        match key {
            SECTION_COLUMN => Some(self.records.iter().map(|r| r.section.clone()).collect()),
            ARTICLE_COLUMN => Some(self.records.iter().map(|r| r.article.clone()).collect()),
            LABEL_COLUMN => self
                .records
                .iter()
                .map(|r| r.is_relevant.map(|v| v.to_string()))
                .collect(),
            PREDICTION_COLUMN => self
                .records
                .iter()
                .map(|r| r.predicted_is_relevant.map(|v| v.to_string()))
                .collect(),
            _ => None,
        }
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

impl From<Vec<ArticleRecord>> for Dataset {
    fn from(records: Vec<ArticleRecord>) -> Self {
        Self::new(records)
    }
}

impl FromIterator<ArticleRecord> for Dataset {
    fn from_iter<T: IntoIterator<Item = ArticleRecord>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl TryFrom<&Table> for Dataset {
    type Error = DiscriminatorError;

    /// `article` と `section` 列が必須。ラベル列は存在すれば 0/1 として検証する。
    fn try_from(table: &Table) -> Result<Self> {
        let require = |key: &str| {
            table
                .column(key)
                .ok_or_else(|| DiscriminatorError::MissingColumn {
                    key: key.to_string(),
                    available: table.column_names(),
                })
        };
        let articles = require(ARTICLE_COLUMN)?;
        let sections = require(SECTION_COLUMN)?;
        let labels = table
            .column(LABEL_COLUMN)
            .map(|values| parse_labels(&values))
            .transpose()?;
        let predictions = table
            .column(PREDICTION_COLUMN)
            .map(|values| parse_labels(&values))
            .transpose()?;

        let records = sections
            .into_iter()
            .zip(articles)
            .enumerate()
            .map(|(idx, (section, article))| ArticleRecord {
                section,
                article,
                is_relevant: labels.as_ref().map(|l| l[idx]),
                predicted_is_relevant: predictions.as_ref().map(|p| p[idx]),
            })
            .collect();
        Ok(Self { records })
    }
}

fn parse_labels(values: &[String]) -> Result<Vec<u8>> {
    values
        .iter()
        .map(|raw| match raw.trim() {
            "0" | "0.0" | "false" => Ok(0),
            "1" | "1.0" | "true" => Ok(1),
            other => Err(DiscriminatorError::InvalidLabel {
                value: other.to_string(),
            }),
        })
        .collect()
}
