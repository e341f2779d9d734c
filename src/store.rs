//! バージョン付きデータセットの保存先。
//!
//! レイアウトはバケット運用時と同じ階層をローカルディレクトリ上に再現する。
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::dataset::Dataset;

const FILE_STEM: &str = "tldr_articles";
const EXTENSION: &str = "jsonl";

/// データセットの種別ごとのディレクトリ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Original,
    Training,
    Unlabelled,
    Predicted,
}

impl DatasetKind {
    #[must_use]
    pub fn directory(self) -> &'static str {
        match self {
            Self::Original => "original_data",
            Self::Training => "training_data",
            Self::Unlabelled => "unlabelled_data",
            Self::Predicted => "predicted_data",
        }
    }
}

pub trait DatasetStore {
    /// データセットを保存し、付与したハッシュを返す。
    ///
    /// # Errors
    /// 書き込みに失敗した場合はエラー。
    fn save(&self, kind: DatasetKind, dataset: &Dataset) -> Result<String>;

    /// ハッシュを指定して読み込む。
    ///
    /// # Errors
    /// 該当ファイルが無い、もしくは読み込みに失敗した場合はエラー。
    fn load(&self, kind: DatasetKind, data_hash: &str) -> Result<Dataset>;

    /// 元データ（初回取り込み分）を保存する。
    ///
    /// # Errors
    /// 書き込みに失敗した場合はエラー。
    fn save_original(&self, dataset: &Dataset) -> Result<()>;

    /// 元データを読み込む。未作成の場合は空のデータセット。
    ///
    /// # Errors
    /// 読み込みに失敗した場合はエラー。
    fn load_original(&self) -> Result<Dataset>;

    /// すべての学習データをハッシュ順で返す。
    ///
    /// # Errors
    /// ディレクトリの走査または読み込みに失敗した場合はエラー。
    fn load_all_training(&self) -> Result<BTreeMap<String, Dataset>>;
}

#[derive(Debug, Clone)]
pub struct LocalDatasetStore {
    root: PathBuf,
}

impl LocalDatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn versioned_path(&self, kind: DatasetKind, data_hash: &str) -> PathBuf {
        self.root
            .join(kind.directory())
            .join(format!("{FILE_STEM}_{data_hash}.{EXTENSION}"))
    }

    fn original_path(&self) -> PathBuf {
        self.root
            .join(DatasetKind::Original.directory())
            .join(format!("{FILE_STEM}.{EXTENSION}"))
    }
}

impl DatasetStore for LocalDatasetStore {
    fn save(&self, kind: DatasetKind, dataset: &Dataset) -> Result<String> {
        let data_hash = dataset.content_hash();
        let path = self.versioned_path(kind, &data_hash);
        dataset
            .write_jsonl(&path)
            .with_context(|| format!("failed to save {} dataset", kind.directory()))?;
        info!(kind = kind.directory(), %data_hash, rows = dataset.len(), "dataset saved");
        Ok(data_hash)
    }

    fn load(&self, kind: DatasetKind, data_hash: &str) -> Result<Dataset> {
        let path = self.versioned_path(kind, data_hash);
        Dataset::read_jsonl(&path)
            .with_context(|| format!("failed to load {} dataset {data_hash}", kind.directory()))
    }

    fn save_original(&self, dataset: &Dataset) -> Result<()> {
        dataset
            .write_jsonl(self.original_path())
            .context("failed to save original dataset")
    }

    fn load_original(&self) -> Result<Dataset> {
        let path = self.original_path();
        if !path.exists() {
            debug!(path = %path.display(), "original dataset not found; starting empty");
            return Ok(Dataset::default());
        }
        Dataset::read_jsonl(&path).context("failed to load original dataset")
    }

    fn load_all_training(&self) -> Result<BTreeMap<String, Dataset>> {
        let dir = self.root.join(DatasetKind::Training.directory());
        let mut datasets = BTreeMap::new();
        if !dir.exists() {
            return Ok(datasets);
        }

        let prefix = format!("{FILE_STEM}_");
        for entry in fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(data_hash) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.strip_prefix(&prefix))
            else {
                continue;
            };
            let dataset = Dataset::read_jsonl(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            datasets.insert(data_hash.to_string(), dataset);
        }
        info!(files = datasets.len(), "loaded training datasets");
        Ok(datasets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ArticleRecord;

    fn dataset(article: &str) -> Dataset {
        Dataset::new(vec![ArticleRecord::new("QUICK LINKS", article).labelled(1)])
    }

    #[test]
    fn save_and_load_by_hash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalDatasetStore::new(dir.path());

        let data_hash = store
            .save(DatasetKind::Unlabelled, &dataset("one"))
            .expect("save");
        let loaded = store.load(DatasetKind::Unlabelled, &data_hash).expect("load");

        assert_eq!(loaded, dataset("one"));
        assert!(
            dir.path()
                .join("unlabelled_data")
                .join(format!("tldr_articles_{data_hash}.jsonl"))
                .exists()
        );
    }

    #[test]
    fn load_all_training_skips_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalDatasetStore::new(dir.path());
        store.save(DatasetKind::Training, &dataset("one")).expect("save");
        store.save(DatasetKind::Training, &dataset("two")).expect("save");
        fs::write(dir.path().join("training_data/notes.txt"), "ignored").expect("write");

        let all = store.load_all_training().expect("load all");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn missing_original_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalDatasetStore::new(dir.path());
        assert!(store.load_original().expect("load").is_empty());

        store.save_original(&dataset("seed")).expect("save");
        assert_eq!(store.load_original().expect("load").len(), 1);
    }
}
