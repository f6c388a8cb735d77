//! Data structures for the duplicate detection pipeline.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;
use thiserror::Error;

/// Error produced when parsing a configuration name from a string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("unrecognized search type: {0}")]
    SearchType(String),
    #[error("unrecognized match policy: {0}")]
    MatchPolicy(String),
    #[error("unrecognized item field: {0}")]
    ItemField(String),
}

/// Which kind of duplicate search to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    /// Group books whose title and author keys collide (the default).
    #[default]
    TitleAuthor,
    /// Group books sharing an identifier value (e.g. the same ISBN).
    Identifier,
    /// Group books whose format files have identical content.
    Binary,
    /// Group books written by authors whose names look like variations
    /// of each other.
    AuthorOnly,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::TitleAuthor => "title_author",
            SearchType::Identifier => "identifier",
            SearchType::Binary => "binary",
            SearchType::AuthorOnly => "author_only",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title_author" => Ok(SearchType::TitleAuthor),
            "identifier" => Ok(SearchType::Identifier),
            "binary" => Ok(SearchType::Binary),
            "author_only" => Ok(SearchType::AuthorOnly),
            _ => Err(ParseError::SearchType(s.to_string())),
        }
    }
}

/// How aggressively a metadata field is normalized before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Exact match, case-insensitive.
    Identical,
    /// Normalized match: folds accents, drops articles and punctuation.
    #[default]
    Similar,
    /// Phonetic match via soundex codes.
    Soundex,
    /// Most aggressive: drops subtitles and trailing conjuncts.
    Fuzzy,
    /// Field does not participate in key building.
    Ignore,
}

impl MatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPolicy::Identical => "identical",
            MatchPolicy::Similar => "similar",
            MatchPolicy::Soundex => "soundex",
            MatchPolicy::Fuzzy => "fuzzy",
            MatchPolicy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchPolicy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identical" => Ok(MatchPolicy::Identical),
            "similar" => Ok(MatchPolicy::Similar),
            "soundex" => Ok(MatchPolicy::Soundex),
            "fuzzy" => Ok(MatchPolicy::Fuzzy),
            "ignore" => Ok(MatchPolicy::Ignore),
            _ => Err(ParseError::MatchPolicy(s.to_string())),
        }
    }
}

/// Metadata field searched for name variations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    Authors,
    Series,
    Publisher,
    Tags,
}

impl ItemField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemField::Authors => "authors",
            ItemField::Series => "series",
            ItemField::Publisher => "publisher",
            ItemField::Tags => "tags",
        }
    }
}

impl fmt::Display for ItemField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemField {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authors" => Ok(ItemField::Authors),
            "series" => Ok(ItemField::Series),
            "publisher" => Ok(ItemField::Publisher),
            "tags" => Ok(ItemField::Tags),
            _ => Err(ParseError::ItemField(s.to_string())),
        }
    }
}

/// Soundex code lengths, one per keyed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundexLengths {
    pub title: usize,
    pub author: usize,
    pub publisher: usize,
    pub series: usize,
    pub tags: usize,
}

impl Default for SoundexLengths {
    fn default() -> Self {
        Self {
            title: 6,
            author: 8,
            publisher: 6,
            series: 6,
            tags: 4,
        }
    }
}

/// Search configuration, validated when the finder is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    pub search_type: SearchType,
    pub title_match: MatchPolicy,
    pub author_match: MatchPolicy,
    /// Identifier scheme used by [`SearchType::Identifier`].
    pub identifier_type: String,
    /// When set, books in different languages never share a title key.
    pub include_languages: bool,
    /// Sort groups by match key; `false` sorts by group size, largest first.
    pub sort_by_title: bool,
    /// Restrict the search to these books; `None` searches the whole library.
    pub book_ids: Option<Vec<u32>>,
    pub soundex: SoundexLengths,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            search_type: SearchType::TitleAuthor,
            title_match: MatchPolicy::Similar,
            author_match: MatchPolicy::Similar,
            identifier_type: "isbn".to_string(),
            include_languages: false,
            sort_by_title: true,
            book_ids: None,
            soundex: SoundexLengths::default(),
        }
    }
}

/// A group of books considered duplicates of each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub group_id: u32,
    /// Member book ids, ascending.
    pub book_ids: Vec<u32>,
    /// Only populated by author-only searches, where it carries the
    /// author-name partition behind the group.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub match_key: Option<String>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.book_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.book_ids.is_empty()
    }
}

/// Result of a duplicate search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub groups: Vec<DuplicateGroup>,
    /// Set when the cancel flag tripped; `groups` is empty in that case.
    pub cancelled: bool,
}

impl SearchOutcome {
    pub fn cancelled() -> Self {
        Self {
            groups: Vec::new(),
            cancelled: true,
        }
    }

    pub fn summary(&self) -> DuplicateSummary {
        DuplicateSummary::from_groups(&self.groups)
    }
}

/// Aggregate statistics over a set of duplicate groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateSummary {
    pub total_groups: usize,
    pub total_books: usize,
    /// Keeping one book per group, how many copies could go.
    pub duplicates_to_remove: usize,
    pub largest_group: usize,
    pub avg_group_size: f64,
}

impl DuplicateSummary {
    pub fn from_groups(groups: &[DuplicateGroup]) -> Self {
        if groups.is_empty() {
            return Self {
                total_groups: 0,
                total_books: 0,
                duplicates_to_remove: 0,
                largest_group: 0,
                avg_group_size: 0.0,
            };
        }

        let total_books: usize = groups.iter().map(DuplicateGroup::len).sum();

        Self {
            total_groups: groups.len(),
            total_books,
            duplicates_to_remove: total_books - groups.len(),
            largest_group: groups.iter().map(DuplicateGroup::len).max().unwrap_or(0),
            avg_group_size: total_books as f64 / groups.len() as f64,
        }
    }
}

/// Symmetric "never group these two" relation.
///
/// Adding an exemption in one direction records it in both: if `a`
/// excludes `b` then `b` excludes `a`. Generic so the same map works for
/// book ids and for author names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExemptionsMap<T: Ord = u32> {
    map: BTreeMap<T, BTreeSet<T>>,
}

impl<T: Ord + Clone> ExemptionsMap<T> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Mark two items as not being duplicates of each other.
    pub fn add_exemption(&mut self, a: T, b: T) {
        self.map.entry(a.clone()).or_default().insert(b.clone());
        self.map.entry(b).or_default().insert(a);
    }

    pub fn contains(&self, item: &T) -> bool {
        self.map.contains_key(item)
    }

    /// All items that must not be grouped with `item`.
    pub fn excluded_from(&self, item: &T) -> Option<&BTreeSet<T>> {
        self.map.get(item)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<T: Ord + Clone> Default for ExemptionsMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord + Clone> FromIterator<(T, T)> for ExemptionsMap<T> {
    fn from_iter<I: IntoIterator<Item = (T, T)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (a, b) in iter {
            map.add_exemption(a, b);
        }
        map
    }
}

/// On-disk metadata for one format file of a book.
#[derive(Debug, Clone)]
pub struct FormatFile {
    pub size: u64,
    pub mtime: Option<SystemTime>,
    pub path: PathBuf,
}

/// Book fields surfaced in reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookDetail {
    pub id: u32,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub series: Option<String>,
    pub publisher: Option<String>,
    pub isbn: Option<String>,
    pub formats: Vec<String>,
    pub path: Option<String>,
}

/// One duplicate group with its book details resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDetail {
    pub group_id: u32,
    pub book_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub match_key: Option<String>,
    pub books: Vec<BookDetail>,
}

/// Full duplicate report, ready for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub summary: DuplicateSummary,
    pub cancelled: bool,
    pub groups: Vec<GroupDetail>,
}

/// One item in a metadata variation group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationItem {
    pub id: u32,
    pub name: String,
    /// Number of books using this item.
    pub count: u32,
}

/// A group of metadata items whose names look like variations of each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationGroup {
    pub items: Vec<VariationItem>,
}

/// Variation results, ready for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationReport {
    pub total_groups: usize,
    pub groups: Vec<VariationGroup>,
}

impl VariationReport {
    pub fn new(groups: Vec<VariationGroup>) -> Self {
        Self {
            total_groups: groups.len(),
            groups,
        }
    }
}

/// Map from an item id to the number of books using it.
pub type UsageMap = HashMap<u32, u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_round_trip() {
        for policy in [
            MatchPolicy::Identical,
            MatchPolicy::Similar,
            MatchPolicy::Soundex,
            MatchPolicy::Fuzzy,
            MatchPolicy::Ignore,
        ] {
            assert_eq!(policy.as_str().parse::<MatchPolicy>().unwrap(), policy);
        }
        assert!("phonetic".parse::<MatchPolicy>().is_err());
    }

    #[test]
    fn test_search_type_round_trip() {
        for search_type in [
            SearchType::TitleAuthor,
            SearchType::Identifier,
            SearchType::Binary,
            SearchType::AuthorOnly,
        ] {
            assert_eq!(
                search_type.as_str().parse::<SearchType>().unwrap(),
                search_type
            );
        }
        assert!("metadata".parse::<SearchType>().is_err());
    }

    #[test]
    fn test_exemptions_are_symmetric() {
        let mut exemptions = ExemptionsMap::new();
        exemptions.add_exemption(1u32, 3);

        assert!(exemptions.contains(&1));
        assert!(exemptions.contains(&3));
        assert!(exemptions.excluded_from(&1).unwrap().contains(&3));
        assert!(exemptions.excluded_from(&3).unwrap().contains(&1));
        assert!(!exemptions.contains(&2));
    }

    #[test]
    fn test_summary_empty() {
        let summary = DuplicateSummary::from_groups(&[]);
        assert_eq!(summary.total_groups, 0);
        assert_eq!(summary.total_books, 0);
        assert_eq!(summary.duplicates_to_remove, 0);
        assert!((summary.avg_group_size - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_counts() {
        let groups = vec![
            DuplicateGroup {
                group_id: 1,
                book_ids: vec![1, 2, 3],
                match_key: None,
            },
            DuplicateGroup {
                group_id: 2,
                book_ids: vec![4, 5],
                match_key: None,
            },
        ];

        let summary = DuplicateSummary::from_groups(&groups);
        assert_eq!(summary.total_groups, 2);
        assert_eq!(summary.total_books, 5);
        assert_eq!(summary.duplicates_to_remove, 3);
        assert_eq!(summary.largest_group, 3);
        assert!((summary.avg_group_size - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_default_soundex_lengths() {
        let lengths = SoundexLengths::default();
        assert_eq!(lengths.title, 6);
        assert_eq!(lengths.author, 8);
        assert_eq!(lengths.publisher, 6);
        assert_eq!(lengths.series, 6);
        assert_eq!(lengths.tags, 4);
    }
}
