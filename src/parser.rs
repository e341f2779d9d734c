//! TLDR ニュースレター本文からセクションと記事チャンクを抽出する。
//!
//! 本文は「セクション見出し → (タイトルブロック, 本文ブロック) の繰り返し」
//! という半構造化テキストとして扱う。構造が見つからない場合はエラーではなく
//! 空の結果を返す。
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::dataset::ArticleRecord;

/// 記事ブロックの区切り。
pub const BLOCK_DELIMITER: &str = "\r\n\r\n";

static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    let labels = Category::ALL
        .iter()
        .map(|category| regex::escape(category.label()))
        .collect::<Vec<_>>()
        .join("|");
    // 見出し前の装飾記号（絵文字など）はノイズとして読み飛ばす
    Regex::new(&format!(r"[\x{{263A}}-\x{{1F645}}]*\s*({labels})\s*[\r\n]+"))
        .expect("compile section header pattern")
});

static ARTICLE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(MINUTE\s*READ)|(GITHUB\s*REPO)").expect("compile article marker pattern")
});

/// ニュースレターの固定セクション。宣言順が出力順になる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    BigTechAndStartups,
    ScienceAndFuturisticTechnology,
    ProgrammingDesignAndDataScience,
    Miscellaneous,
    QuickLinks,
}

impl Category {
    pub const ALL: [Self; 5] = [
        Self::BigTechAndStartups,
        Self::ScienceAndFuturisticTechnology,
        Self::ProgrammingDesignAndDataScience,
        Self::Miscellaneous,
        Self::QuickLinks,
    ];

    /// 本文中に現れる見出し文字列。
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::BigTechAndStartups => "BIG TECH & STARTUPS",
            Self::ScienceAndFuturisticTechnology => "SCIENCE & FUTURISTIC TECHNOLOGY",
            Self::ProgrammingDesignAndDataScience => "PROGRAMMING, DESIGN & DATA SCIENCE",
            Self::Miscellaneous => "MISCELLANEOUS",
            Self::QuickLinks => "QUICK LINKS",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategoryLabel(pub String);

impl fmt::Display for UnknownCategoryLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown newsletter section `{}`", self.0)
    }
}

impl std::error::Error for UnknownCategoryLabel {}

impl FromStr for Category {
    type Err = UnknownCategoryLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|category| category.label() == trimmed)
            .ok_or_else(|| UnknownCategoryLabel(trimmed.to_string()))
    }
}

/// 生のメール本文を記事レコード列に変換するパーサー。
pub trait ContentParser {
    fn parse_content(&self, content: &str) -> Vec<ArticleRecord>;
}

/// TLDR ニュースレター用パーサー。状態を持たない。
#[derive(Debug, Default, Clone, Copy)]
pub struct TldrParser;

impl TldrParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// 本文をセクションごとに分割する。
    ///
    /// 5つのセクションすべてがキーとして含まれ、見つからなかったセクションは `None`。
    /// 同じ見出しが複数回現れた場合は後のものが優先される。
    #[must_use]
    pub fn extract_sections(&self, content: &str) -> BTreeMap<Category, Option<String>> {
        let mut sections: BTreeMap<Category, Option<String>> =
            Category::ALL.into_iter().map(|category| (category, None)).collect();

        let headers: Vec<(Category, usize, usize)> = SECTION_HEADER
            .captures_iter(content)
            .filter_map(|captures| {
                let whole = captures.get(0)?;
                let category = captures.get(1)?.as_str().parse::<Category>().ok()?;
                Some((category, whole.start(), whole.end()))
            })
            .collect();

        for (idx, (category, _, body_start)) in headers.iter().enumerate() {
            let body_end = headers
                .get(idx + 1)
                .map_or(content.len(), |(_, next_start, _)| *next_start);
            let body = content[*body_start..body_end].trim();
            sections.insert(*category, Some(body.to_string()));
        }

        debug!(
            headers_found = headers.len(),
            "extracted newsletter sections"
        );
        sections
    }

    /// セクション本文を記事チャンクに分割する。
    ///
    /// ブロックを2つずつ（タイトル + 本文）結合し、「N MINUTE READ」または
    /// 「GITHUB REPO」を含むチャンクだけを記事として残す。
    #[must_use]
    pub fn extract_articles(&self, section_body: Option<&str>) -> Vec<String> {
        let Some(body) = section_body else {
            return Vec::new();
        };

        let blocks: Vec<&str> = body.split(BLOCK_DELIMITER).collect();
        if blocks.len() % 2 == 1 && !body.trim().is_empty() {
            // 既存データセットとの互換性のためペアリングは維持する
            warn!(
                block_count = blocks.len(),
                "odd number of blocks in section; the trailing block is paired alone"
            );
        }

        let articles: Vec<String> = blocks
            .chunks(2)
            .map(|pair| pair.join(BLOCK_DELIMITER))
            .filter(|chunk| ARTICLE_MARKER.is_match(chunk))
            .collect();

        debug!(articles = articles.len(), "extracted articles from section");
        articles
    }

    /// 本文全体から記事レコードを抽出する。
    ///
    /// 出力順はセクションの宣言順、その中ではチャンク順。
    #[must_use]
    pub fn parse(&self, content: &str) -> Vec<ArticleRecord> {
        let mut records = Vec::new();
        for (category, body) in self.extract_sections(content) {
            let _span = info_span!("parser.section", category = category.label()).entered();
            for article in self.extract_articles(body.as_deref()) {
                records.push(ArticleRecord::new(category.label(), article));
            }
        }
        info!(articles = records.len(), "parsed articles from newsletter");
        records
    }
}

impl ContentParser for TldrParser {
    fn parse_content(&self, content: &str) -> Vec<ArticleRecord> {
        self.parse(content)
    }
}
