//! メール本文の取得元からデータセットを組み立てる。
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use super::{ArticleRecord, Dataset};
use crate::parser::ContentParser;

/// デコード済みのメール本文。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub body: String,
}

/// メール本文の取得元。認証や取得方法はこのクレートの外側の責務。
pub trait MessageSource {
    /// クエリに一致するメッセージを取得する。
    ///
    /// # Errors
    /// 取得元の失敗をそのまま返す。
    fn fetch(&self, query: &str) -> Result<Vec<RawMessage>>;
}

/// ディレクトリに保存したメール本文を読む取得元。
///
/// クエリはルート直下のサブディレクトリ名として解釈し、その中のファイル1つを
/// 1通のメッセージとする。ID はファイル名（拡張子なし）で、ファイル名順に返す。
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MessageSource for DirectorySource {
    fn fetch(&self, query: &str) -> Result<Vec<RawMessage>> {
        let dir = self.root.join(query);
        let mut paths = fs::read_dir(&dir)
            .with_context(|| format!("failed to list {}", dir.display()))?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("failed to list {}", dir.display()))?;
        paths.retain(|path| path.is_file());
        paths.sort();

        let messages = paths
            .into_iter()
            .map(|path| {
                let body = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let id = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(RawMessage { id, body })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(dir = %dir.display(), messages = messages.len(), "read messages from directory");
        Ok(messages)
    }
}

#[derive(Debug)]
pub struct DatasetBuilder<S, P> {
    source: S,
    parser: P,
}

impl<S: MessageSource, P: ContentParser> DatasetBuilder<S, P> {
    pub fn new(source: S, parser: P) -> Self {
        Self { source, parser }
    }

    /// 関連・非関連それぞれのクエリから学習用データセットを作る。
    ///
    /// 関連クエリの記事は `is_relevant = 1`、非関連クエリの記事は `0`。
    ///
    /// # Errors
    /// メッセージ取得に失敗した場合はエラー。
    pub fn training_dataset(&self, relevant_query: &str, irrelevant_query: &str) -> Result<Dataset> {
        let relevant = self.articles_for(relevant_query)?.labelled(1);
        let irrelevant = self.articles_for(irrelevant_query)?.labelled(0);
        info!(
            relevant = relevant.len(),
            irrelevant = irrelevant.len(),
            "built training dataset"
        );
        Ok(Dataset::concat([relevant, irrelevant]))
    }

    /// 推論用のラベルなしデータセットと、元メッセージの ID 一覧を返す。
    ///
    /// # Errors
    /// メッセージ取得に失敗した場合はエラー。
    pub fn prediction_dataset(&self, query: &str) -> Result<(Dataset, Vec<String>)> {
        let messages = self.fetch(query)?;
        let ids = messages.iter().map(|message| message.id.clone()).collect();
        let dataset = self.parse_messages(&messages);
        info!(
            messages = messages.len(),
            articles = dataset.len(),
            "built prediction dataset"
        );
        Ok((dataset, ids))
    }

    fn articles_for(&self, query: &str) -> Result<Dataset> {
        let messages = self.fetch(query)?;
        Ok(self.parse_messages(&messages))
    }

    fn fetch(&self, query: &str) -> Result<Vec<RawMessage>> {
        self.source
            .fetch(query)
            .inspect_err(|err| error!(query, error = %err, "failed to fetch messages"))
            .with_context(|| format!("failed to fetch messages for query `{query}`"))
    }

    fn parse_messages(&self, messages: &[RawMessage]) -> Dataset {
        messages
            .iter()
            .flat_map(|message| self.parser.parse_content(&message.body))
            .collect::<Vec<ArticleRecord>>()
            .into()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::parser::TldrParser;

    struct FakeSource {
        mailbox: HashMap<&'static str, Vec<RawMessage>>,
    }

    impl MessageSource for FakeSource {
        fn fetch(&self, query: &str) -> Result<Vec<RawMessage>> {
            self.mailbox
                .get(query)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown query"))
        }
    }

    fn message(id: &str, title: &str) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            body: format!("🚀 BIG TECH & STARTUPS\r\n\r\n{title}\r\n\r\n3 MINUTE READ"),
        }
    }

    fn builder() -> DatasetBuilder<FakeSource, TldrParser> {
        let mailbox = HashMap::from([
            ("label:liked", vec![message("m1", "Rust 2024"), message("m2", "SIMD")]),
            ("label:skipped", vec![message("m3", "Celebrity news")]),
        ]);
        DatasetBuilder::new(FakeSource { mailbox }, TldrParser::new())
    }

    #[test]
    fn training_dataset_labels_each_query() {
        let dataset = builder()
            .training_dataset("label:liked", "label:skipped")
            .expect("dataset");
        assert_eq!(dataset.labels().expect("labels"), vec![1, 1, 0]);
        assert!(dataset.records()[2].article.starts_with("Celebrity news"));
    }

    #[test]
    fn prediction_dataset_returns_message_ids() {
        let (dataset, ids) = builder().prediction_dataset("label:liked").expect("dataset");
        assert_eq!(ids, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(dataset.len(), 2);
        assert!(dataset.records().iter().all(|r| r.is_relevant.is_none()));
    }

    #[test]
    fn directory_source_reads_files_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inbox = dir.path().join("inbox");
        std::fs::create_dir_all(inbox.join("nested")).expect("mkdir");
        std::fs::write(inbox.join("b.eml"), message("b", "Second").body).expect("write");
        std::fs::write(inbox.join("a.eml"), message("a", "First").body).expect("write");

        let builder = DatasetBuilder::new(DirectorySource::new(dir.path()), TldrParser::new());
        let (dataset, ids) = builder.prediction_dataset("inbox").expect("dataset");
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert!(dataset.records()[0].article.starts_with("First"));
        assert!(builder.prediction_dataset("missing").is_err());
    }

    #[test]
    fn source_failure_is_propagated_with_context() {
        let error = builder()
            .training_dataset("label:liked", "label:missing")
            .expect_err("unknown query");
        assert!(error.to_string().contains("label:missing"));
    }
}
