//! 記事本文の TF-IDF ベクトル化。
use std::collections::{BTreeMap, BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use unicode_normalization::UnicodeNormalization;

use super::estimator::{Fittable, Transformer};
use super::features::FeatureMatrix;
use crate::error::{DiscriminatorError, Result};

static TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\w\w+\b").expect("compile token pattern"));

static STOP_WORDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ENGLISH_STOP_WORDS.iter().copied().collect());

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst",
    "amoungst", "amount", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
    "anywhere", "are", "around", "as", "at", "back", "be", "became", "because", "become",
    "becomes", "becoming", "been", "before", "beforehand", "behind", "being", "below", "beside",
    "besides", "between", "beyond", "bill", "both", "bottom", "but", "by", "call", "can",
    "cannot", "cant", "co", "con", "could", "couldnt", "cry", "de", "describe", "detail", "do",
    "done", "down", "due", "during", "each", "eg", "eight", "either", "eleven", "else",
    "elsewhere", "empty", "enough", "etc", "even", "ever", "every", "everyone", "everything",
    "everywhere", "except", "few", "fifteen", "fifty", "fill", "find", "fire", "first", "five",
    "for", "former", "formerly", "forty", "found", "four", "from", "front", "full", "further",
    "get", "give", "go", "had", "has", "hasnt", "have", "he", "hence", "her", "here", "hereafter",
    "hereby", "herein", "hereupon", "hers", "herself", "him", "himself", "his", "how", "however",
    "hundred", "i", "ie", "if", "in", "inc", "indeed", "interest", "into", "is", "it", "its",
    "itself", "keep", "last", "latter", "latterly", "least", "less", "ltd", "made", "many", "may",
    "me", "meanwhile", "might", "mill", "mine", "more", "moreover", "most", "mostly", "move",
    "much", "must", "my", "myself", "name", "namely", "neither", "never", "nevertheless", "next",
    "nine", "no", "nobody", "none", "noone", "nor", "not", "nothing", "now", "nowhere", "of",
    "off", "often", "on", "once", "one", "only", "onto", "or", "other", "others", "otherwise",
    "our", "ours", "ourselves", "out", "over", "own", "part", "per", "perhaps", "please", "put",
    "rather", "re", "same", "see", "seem", "seemed", "seeming", "seems", "serious", "several",
    "she", "should", "show", "side", "since", "sincere", "six", "sixty", "so", "some", "somehow",
    "someone", "something", "sometime", "sometimes", "somewhere", "still", "such", "system",
    "take", "ten", "than", "that", "the", "their", "them", "themselves", "then", "thence",
    "there", "thereafter", "thereby", "therefore", "therein", "thereupon", "these", "they",
    "thick", "thin", "third", "this", "those", "though", "three", "through", "throughout", "thru",
    "thus", "to", "together", "too", "top", "toward", "towards", "twelve", "twenty", "two", "un",
    "under", "until", "up", "upon", "us", "very", "via", "was", "we", "well", "were", "what",
    "whatever", "when", "whence", "whenever", "where", "whereafter", "whereas", "whereby",
    "wherein", "whereupon", "wherever", "whether", "which", "while", "whither", "who", "whoever",
    "whole", "whom", "whose", "why", "will", "with", "within", "without", "would", "yet", "you",
    "your", "yours", "yourself", "yourselves",
];

/// NFC 正規化・小文字化したうえで2文字以上の単語を取り出し、ストップワードを除く。
fn tokenize(text: &str) -> Vec<String> {
    let normalized = text.nfc().collect::<String>().to_lowercase();
    TOKEN_PATTERN
        .find_iter(&normalized)
        .map(|token| token.as_str())
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FittedVocabulary {
    /// 語彙（アルファベット順）→ 列番号
    terms: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

/// 学習コーパスから語彙と IDF を固定する TF-IDF ベクトライザ。
///
/// IDF は平滑化版 `ln((1 + n) / (1 + df)) + 1`、各行は L2 正規化する。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    fitted: Option<FittedVocabulary>,
}

impl TfidfVectorizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 語彙サイズ。未学習なら `None`。
    #[must_use]
    pub fn vocabulary_len(&self) -> Option<usize> {
        self.fitted.as_ref().map(|fitted| fitted.terms.len())
    }

    /// 語彙に含まれる単語の列番号。
    #[must_use]
    pub fn term_index(&self, term: &str) -> Option<usize> {
        self.fitted
            .as_ref()
            .and_then(|fitted| fitted.terms.get(term).copied())
    }
}

impl Fittable<[String]> for TfidfVectorizer {
    fn fit(&mut self, input: &[String]) -> Result<()> {
        let mut doc_freq: BTreeMap<String, usize> = BTreeMap::new();
        for document in input {
            let unique: BTreeSet<String> = tokenize(document).into_iter().collect();
            for term in unique {
                *doc_freq.entry(term).or_insert(0) += 1;
            }
        }

        if doc_freq.is_empty() {
            error!(documents = input.len(), "tf-idf vocabulary is empty");
            return Err(DiscriminatorError::EmptyVocabulary);
        }

        #[allow(clippy::cast_precision_loss)]
        let n_docs = input.len() as f64;
        let mut terms = BTreeMap::new();
        let mut idf = Vec::with_capacity(doc_freq.len());
        for (idx, (term, df)) in doc_freq.into_iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let df = df as f64;
            idf.push(((1.0 + n_docs) / (1.0 + df)).ln() + 1.0);
            terms.insert(term, idx);
        }

        info!(
            documents = input.len(),
            vocabulary = terms.len(),
            "fitted tf-idf vocabulary"
        );
        self.fitted = Some(FittedVocabulary { terms, idf });
        Ok(())
    }
}

impl Transformer<[String]> for TfidfVectorizer {
    type Output = FeatureMatrix;

    fn transform(&self, input: &[String]) -> Result<FeatureMatrix> {
        let fitted = self
            .fitted
            .as_ref()
            .ok_or_else(|| DiscriminatorError::not_fitted("TfidfVectorizer"))?;

        let mut indptr = Vec::with_capacity(input.len() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);

        for document in input {
            let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
            for token in tokenize(document) {
                // 学習時に無かった単語は無視する
                if let Some(&col) = fitted.terms.get(&token) {
                    *counts.entry(col).or_insert(0.0) += 1.0;
                }
            }
            let weights: Vec<(usize, f64)> = counts
                .into_iter()
                .map(|(col, count)| (col, count * fitted.idf[col]))
                .collect();
            let norm = weights.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
            for (col, weight) in weights {
                indices.push(col);
                data.push(if norm > 0.0 { weight / norm } else { weight });
            }
            indptr.push(indices.len());
        }

        debug!(
            rows = input.len(),
            nnz = data.len(),
            "transformed documents to tf-idf"
        );
        FeatureMatrix::from_csr((input.len(), fitted.terms.len()), indptr, indices, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn tokenize_drops_stop_words_and_short_tokens() {
        let tokens = tokenize("The Rust compiler is a joy to use, x y");
        assert_eq!(tokens, vec!["rust", "compiler", "joy", "use"]);
    }

    #[test]
    fn vocabulary_is_sorted_and_fixed_at_fit() {
        let mut vectorizer = TfidfVectorizer::new();
        vectorizer
            .fit(docs(&["zebra apple", "apple mango"]).as_slice())
            .expect("fit");

        assert_eq!(vectorizer.vocabulary_len(), Some(3));
        assert_eq!(vectorizer.term_index("apple"), Some(0));
        assert_eq!(vectorizer.term_index("mango"), Some(1));
        assert_eq!(vectorizer.term_index("zebra"), Some(2));
    }

    #[test]
    fn rows_are_l2_normalised_and_unknown_terms_ignored() {
        let mut vectorizer = TfidfVectorizer::new();
        let corpus = docs(&["rust compiler", "rust borrow checker"]);
        vectorizer.fit(corpus.as_slice()).expect("fit");

        let matrix = vectorizer
            .transform(docs(&["rust compiler", "kotlin", "rust"]).as_slice())
            .expect("transform");
        assert_eq!(matrix.nrows(), 3);
        assert_eq!(matrix.ncols(), 4);

        let norm: f64 = (0..4).map(|col| matrix.value(0, col).powi(2)).sum();
        assert!((norm - 1.0).abs() < 1e-12);
        // 共通語 "rust" は IDF が低い
        let rust = vectorizer.term_index("rust").expect("rust");
        let compiler = vectorizer.term_index("compiler").expect("compiler");
        assert!(matrix.value(0, rust) < matrix.value(0, compiler));

        assert!((0..4).all(|col| matrix.value(1, col) == 0.0));
        assert!((matrix.value(2, rust) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stop_word_only_corpus_fails() {
        let mut vectorizer = TfidfVectorizer::new();
        let error = vectorizer
            .fit(docs(&["the and of", "a"]).as_slice())
            .expect_err("empty vocabulary");
        assert!(matches!(error, DiscriminatorError::EmptyVocabulary));
    }

    #[test]
    fn transform_before_fit_is_not_fitted() {
        let error = TfidfVectorizer::new()
            .transform(docs(&["rust"]).as_slice())
            .expect_err("not fitted");
        assert!(error.is_not_fitted());
    }
}
