//! Duplicate search engine.
//!
//! This module coordinates the full search pipeline: candidate grouping
//! by match key, singleton removal, subset pruning, exemption
//! partitioning, and group assembly. The binary matcher and the metadata
//! variation search live here too.

use log::debug;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::matching::{author_key, title_key, variation_key, AuthorKey};
use crate::models::{
    DuplicateGroup, ExemptionsMap, ItemField, MatchPolicy, SearchOptions, SearchOutcome,
    SearchType, SoundexLengths, VariationGroup, VariationItem,
};
use crate::normalize::clean_author_name;
use crate::progress::ProgressReporter;
use crate::store::{hash_file, LibraryStore, StoreError};

/// Grouping loops check progress and cancellation every this many books.
const BOOK_PROGRESS_INTERVAL: usize = 100;
/// Content hashing checks progress and cancellation every this many files.
const HASH_PROGRESS_INTERVAL: usize = 10;

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("invalid search options: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

type CandidateMap<K, V> = BTreeMap<K, BTreeSet<V>>;

/// Finds duplicate books in a library.
///
/// # Example
///
/// ```
/// use calibre_dedup::finder::DuplicateFinder;
/// use calibre_dedup::models::SearchOptions;
/// use calibre_dedup::store::MemoryLibrary;
///
/// let mut library = MemoryLibrary::new();
/// library.add_simple(1, "The Martian Way", &["Isaac Asimov"]);
/// library.add_simple(2, "Martian Way", &["Asimov, Isaac"]);
///
/// let mut finder = DuplicateFinder::new(&library, SearchOptions::default()).unwrap();
/// let outcome = finder.find_duplicates().unwrap();
/// assert_eq!(outcome.groups.len(), 1);
/// assert_eq!(outcome.groups[0].book_ids, vec![1, 2]);
/// ```
pub struct DuplicateFinder<'a, S: LibraryStore> {
    store: &'a S,
    options: SearchOptions,
    book_exemptions: ExemptionsMap<u32>,
    author_exemptions: ExemptionsMap<String>,
    progress: Option<Box<dyn ProgressReporter + 'a>>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, S: LibraryStore> std::fmt::Debug for DuplicateFinder<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateFinder")
            .field("options", &self.options)
            .field("book_exemptions", &self.book_exemptions)
            .field("author_exemptions", &self.author_exemptions)
            .field("has_progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl<'a, S: LibraryStore> DuplicateFinder<'a, S> {
    /// Create a finder. Invalid option combinations are rejected here,
    /// not at search time.
    pub fn new(store: &'a S, options: SearchOptions) -> Result<Self, FinderError> {
        validate_options(&options)?;
        Ok(Self {
            store,
            options,
            book_exemptions: ExemptionsMap::new(),
            author_exemptions: ExemptionsMap::new(),
            progress: None,
            cancel: None,
        })
    }

    /// Book pairs that must never land in the same group.
    pub fn with_book_exemptions(mut self, exemptions: ExemptionsMap<u32>) -> Self {
        self.book_exemptions = exemptions;
        self
    }

    /// Author-name pairs that must never land in the same author group.
    pub fn with_author_exemptions(mut self, exemptions: ExemptionsMap<String>) -> Self {
        self.author_exemptions = exemptions;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter + 'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Cooperative cancellation: the flag is checked at the same cadence
    /// as progress reporting.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run the configured search and return the duplicate groups.
    pub fn find_duplicates(&mut self) -> Result<SearchOutcome, FinderError> {
        let book_ids = match &self.options.book_ids {
            Some(ids) => ids.clone(),
            None => self.store.all_ids()?,
        };

        debug!("analyzing {} books for duplicates", book_ids.len());
        self.report(
            &format!("Analyzing {} books for duplicates", book_ids.len()),
            0,
            book_ids.len(),
        );

        if self.options.search_type == SearchType::AuthorOnly {
            return self.find_author_only(&book_ids);
        }

        let groups = match self.options.search_type {
            SearchType::Identifier => match self.identifier_candidates(&book_ids)? {
                Some(candidates) => self.finish_candidates(candidates),
                None => return Ok(SearchOutcome::cancelled()),
            },
            SearchType::Binary => match self.binary_candidates(&book_ids)? {
                Some(candidates) => self.finish_candidates(candidates),
                None => return Ok(SearchOutcome::cancelled()),
            },
            _ => match self.title_author_candidates(&book_ids)? {
                Some(candidates) => self.finish_candidates(candidates),
                None => return Ok(SearchOutcome::cancelled()),
            },
        };

        debug!("found {} duplicate groups", groups.len());
        Ok(SearchOutcome {
            groups,
            cancelled: false,
        })
    }

    fn report(&mut self, message: &str, current: usize, total: usize) {
        if let Some(reporter) = self.progress.as_mut() {
            if reporter.report(message, current, total).is_err() {
                // Faulted reporters are dropped, not retried.
                self.progress = None;
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }

    /// Author list with the store's `|` separators rewritten to commas.
    fn authors_for(&self, book_id: u32) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .authors(book_id)?
            .iter()
            .map(|name| clean_author_name(name))
            .filter(|name| !name.is_empty())
            .collect())
    }

    /// Candidate groups keyed on title + author hashes. `None` when the
    /// cancel flag tripped.
    fn title_author_candidates(
        &mut self,
        book_ids: &[u32],
    ) -> Result<Option<CandidateMap<String, u32>>, FinderError> {
        let title_policy = self.options.title_match;
        let author_policy = self.options.author_match;
        let lengths = self.options.soundex;
        let include_languages = self.options.include_languages;
        let total = book_ids.len();

        let mut candidates: CandidateMap<String, u32> = BTreeMap::new();

        for (i, &book_id) in book_ids.iter().enumerate() {
            if i % BOOK_PROGRESS_INTERVAL == 0 {
                if self.is_cancelled() {
                    return Ok(None);
                }
                self.report("Analyzing books", i, total);
            }

            // Books without a title sit this search out.
            let Some(title) = self.store.title(book_id)? else {
                continue;
            };
            if title.is_empty() {
                continue;
            }

            let lang = if include_languages {
                self.store.languages(book_id)?
            } else {
                None
            };
            let title_hash = title_key(title_policy, &title, lang.as_deref(), &lengths);

            if author_policy != MatchPolicy::Ignore {
                let authors = self.authors_for(book_id)?;
                if !authors.is_empty() {
                    for author in &authors {
                        let AuthorKey { primary, reversed } =
                            author_key(author_policy, author, &lengths);
                        candidates
                            .entry(format!("{title_hash}{primary}"))
                            .or_default()
                            .insert(book_id);
                        if let Some(rev) = reversed {
                            if rev != primary {
                                candidates
                                    .entry(format!("{title_hash}{rev}"))
                                    .or_default()
                                    .insert(book_id);
                            }
                        }
                    }
                    continue;
                }
            }

            // No authors, or author matching disabled.
            candidates.entry(title_hash).or_default().insert(book_id);
        }

        Ok(Some(candidates))
    }

    /// Candidate groups keyed on a shared identifier value.
    fn identifier_candidates(
        &mut self,
        book_ids: &[u32],
    ) -> Result<Option<CandidateMap<String, u32>>, FinderError> {
        let total = book_ids.len();
        let mut candidates: CandidateMap<String, u32> = BTreeMap::new();

        for (i, &book_id) in book_ids.iter().enumerate() {
            if i % BOOK_PROGRESS_INTERVAL == 0 {
                if self.is_cancelled() {
                    return Ok(None);
                }
                self.report("Checking identifiers", i, total);
            }

            let identifiers = self.store.identifiers(book_id)?;
            if let Some(value) = identifiers.get(&self.options.identifier_type) {
                if !value.is_empty() {
                    candidates.entry(value.clone()).or_default().insert(book_id);
                }
            }
        }

        Ok(Some(candidates))
    }

    /// Candidate groups keyed on (content digest, file size).
    ///
    /// Pass 1 buckets format files by size; only files sharing a size
    /// with another file get hashed in pass 2.
    fn binary_candidates(
        &mut self,
        book_ids: &[u32],
    ) -> Result<Option<CandidateMap<(String, u64), u32>>, FinderError> {
        let total = book_ids.len();
        let mut size_map: BTreeMap<u64, BTreeSet<(u32, String, PathBuf)>> = BTreeMap::new();

        for (i, &book_id) in book_ids.iter().enumerate() {
            if i % BOOK_PROGRESS_INTERVAL == 0 {
                if self.is_cancelled() {
                    return Ok(None);
                }
                self.report("Scanning file sizes", i, total);
            }

            for fmt in self.store.formats(book_id)? {
                if let Some(meta) = self.store.format_metadata(book_id, &fmt)? {
                    size_map
                        .entry(meta.size)
                        .or_default()
                        .insert((book_id, fmt, meta.path));
                }
            }
        }

        size_map.retain(|_, entries| entries.len() > 1);
        debug!("found {} size collisions", size_map.len());

        // Flattening the sorted map keeps the hash pass deterministic.
        let jobs: Vec<(u64, u32, PathBuf)> = size_map
            .into_iter()
            .flat_map(|(size, entries)| {
                entries
                    .into_iter()
                    .map(move |(book_id, _, path)| (size, book_id, path))
            })
            .collect();

        let total_to_hash = jobs.len();
        let mut candidates: CandidateMap<(String, u64), u32> = BTreeMap::new();
        let mut hashed = 0;

        for chunk in jobs.chunks(HASH_PROGRESS_INTERVAL) {
            if self.is_cancelled() {
                return Ok(None);
            }

            let digests: Vec<Option<String>> = chunk
                .par_iter()
                .map(|(_, _, path)| hash_file(path))
                .collect::<Result<_, StoreError>>()?;

            for ((size, book_id, _), digest) in chunk.iter().zip(digests) {
                if let Some(digest) = digest {
                    candidates
                        .entry((digest, *size))
                        .or_default()
                        .insert(*book_id);
                }
            }

            hashed += chunk.len();
            self.report("Computing hashes", hashed, total_to_hash);
        }

        Ok(Some(candidates))
    }

    /// Author-only search: group author-name variations, then translate
    /// each surviving author group into the union of their books.
    fn find_author_only(&mut self, book_ids: &[u32]) -> Result<SearchOutcome, FinderError> {
        let author_policy = self.options.author_match;
        let lengths = self.options.soundex;
        let total = book_ids.len();

        let mut candidates: CandidateMap<String, String> = BTreeMap::new();
        let mut author_books: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();

        for (i, &book_id) in book_ids.iter().enumerate() {
            if i % BOOK_PROGRESS_INTERVAL == 0 {
                if self.is_cancelled() {
                    return Ok(SearchOutcome::cancelled());
                }
                self.report("Analyzing authors", i, total);
            }

            for author in self.authors_for(book_id)? {
                author_books
                    .entry(author.clone())
                    .or_default()
                    .insert(book_id);

                let AuthorKey { primary, reversed } = author_key(author_policy, &author, &lengths);
                candidates
                    .entry(primary.clone())
                    .or_default()
                    .insert(author.clone());
                if let Some(rev) = reversed {
                    if rev != primary {
                        candidates.entry(rev).or_default().insert(author);
                    }
                }
            }
        }

        shrink_candidates(&mut candidates);
        let ordered = sort_candidate_groups(candidates, self.options.sort_by_title);
        let pruned = prune_subset_groups(ordered);

        let mut groups = Vec::new();
        let mut group_id = 0;

        for author_group in pruned {
            let members: Vec<String> = author_group.into_iter().collect();
            for partition in partition_using_exemptions(&members, &self.author_exemptions) {
                if partition.len() <= 1 {
                    continue;
                }

                let mut grouped_books: BTreeSet<u32> = BTreeSet::new();
                for author in &partition {
                    if let Some(ids) = author_books.get(author) {
                        grouped_books.extend(ids.iter().copied());
                    }
                }

                if grouped_books.len() > 1 {
                    group_id += 1;
                    groups.push(DuplicateGroup {
                        group_id,
                        book_ids: grouped_books.into_iter().collect(),
                        match_key: Some(format!("{partition:?}")),
                    });
                }
            }
        }

        debug!("found {} author groups", groups.len());
        Ok(SearchOutcome {
            groups,
            cancelled: false,
        })
    }

    /// Shared tail of the book-keyed searches: shrink, sort, prune,
    /// partition, and number the surviving groups from 1.
    fn finish_candidates<K: Ord>(&mut self, mut candidates: CandidateMap<K, u32>) -> Vec<DuplicateGroup> {
        shrink_candidates(&mut candidates);
        let ordered = sort_candidate_groups(candidates, self.options.sort_by_title);
        let pruned = prune_subset_groups(ordered);

        let mut groups = Vec::new();
        let mut group_id = 0;

        for member_set in pruned {
            let members: Vec<u32> = member_set.into_iter().collect();
            for partition in partition_using_exemptions(&members, &self.book_exemptions) {
                if partition.len() > 1 {
                    group_id += 1;
                    groups.push(DuplicateGroup {
                        group_id,
                        book_ids: partition,
                        match_key: None,
                    });
                }
            }
        }

        groups
    }
}

fn validate_options(options: &SearchOptions) -> Result<(), FinderError> {
    let lengths = &options.soundex;
    if lengths.title == 0
        || lengths.author == 0
        || lengths.publisher == 0
        || lengths.series == 0
        || lengths.tags == 0
    {
        return Err(FinderError::InvalidOptions(
            "soundex lengths must be at least 1".to_string(),
        ));
    }

    if options.search_type == SearchType::TitleAuthor && options.title_match == MatchPolicy::Ignore
    {
        return Err(FinderError::InvalidOptions(
            "title matching cannot be ignored in a title/author search".to_string(),
        ));
    }

    if options.search_type == SearchType::AuthorOnly && options.author_match == MatchPolicy::Ignore
    {
        return Err(FinderError::InvalidOptions(
            "author matching cannot be ignored in an author-only search".to_string(),
        ));
    }

    Ok(())
}

/// Drop all candidate groups with fewer than two members.
fn shrink_candidates<K: Ord, V: Ord>(candidates: &mut CandidateMap<K, V>) {
    candidates.retain(|_, members| members.len() > 1);
}

/// Order candidate groups by key, or by size (largest first, ties broken
/// by descending key) when `by_title` is off.
fn sort_candidate_groups<K: Ord, V: Ord>(
    candidates: CandidateMap<K, V>,
    by_title: bool,
) -> Vec<BTreeSet<V>> {
    let mut entries: Vec<(K, BTreeSet<V>)> = candidates.into_iter().collect();
    if !by_title {
        entries.sort_by(|a, b| (b.1.len(), &b.0).cmp(&(a.1.len(), &a.0)));
    }
    entries.into_iter().map(|(_, members)| members).collect()
}

/// Remove groups that are proper subsets of later (larger) groups.
///
/// Retained groups come back in ascending-size order; the stable sort
/// keeps the incoming order among equal sizes.
fn prune_subset_groups<V: Ord + Clone>(mut groups: Vec<BTreeSet<V>>) -> Vec<BTreeSet<V>> {
    groups.sort_by_key(|group| group.len());

    let mut kept = Vec::new();
    for (i, candidate) in groups.iter().enumerate() {
        let subsumed = groups[i + 1..]
            .iter()
            .any(|later| candidate.is_subset(later));
        if !subsumed {
            kept.push(candidate.clone());
        }
    }
    kept
}

/// Split a candidate group so that no exempt pair stays together.
///
/// Greedy partition around the lowest conflicting item, spawning a
/// sibling partition for each higher conflicting item. A non-exempt item
/// bridging two exempt pivots deliberately appears in several partitions,
/// so the union of the output can exceed the input. Returns sorted
/// sub-lists of size >= 2, lexicographically ordered.
pub fn partition_using_exemptions<T: Ord + Clone>(
    items: &[T],
    exemptions: &ExemptionsMap<T>,
) -> Vec<Vec<T>> {
    let mut sorted: Vec<T> = items.to_vec();
    sorted.sort();

    let mut results: Vec<BTreeSet<T>> = vec![sorted.iter().cloned().collect()];
    let mut pivots: Vec<Option<T>> = vec![None];

    for item in &sorted {
        let Some(excluded) = exemptions.excluded_from(item) else {
            continue;
        };

        // Partitions appended during this scan are visited too; they
        // never contain `item`.
        let mut i = 0;
        while i < results.len() {
            if !results[i].contains(item) {
                i += 1;
                continue;
            }

            let original = results[i].clone();
            let mut reduced: BTreeSet<T> = original.difference(excluded).cloned().collect();
            reduced.insert(item.clone());
            results[i] = reduced;

            if pivots[i].as_ref() != Some(item) {
                for neighbour in excluded {
                    if neighbour > item && original.contains(neighbour) {
                        let mut sibling: BTreeSet<T> =
                            original.difference(excluded).cloned().collect();
                        sibling.remove(item);
                        sibling.insert(neighbour.clone());
                        results.push(sibling);
                        pivots.push(Some(neighbour.clone()));
                    }
                }
            }
            i += 1;
        }
    }

    let mut partitions: Vec<Vec<T>> = results
        .into_iter()
        .filter(|partition| partition.len() > 1)
        .map(|partition| partition.into_iter().collect())
        .collect();
    partitions.sort();
    partitions
}

/// Find metadata items (author, series, publisher, or tag names) that
/// look like variations of each other.
pub fn find_variations<S: LibraryStore>(
    store: &S,
    field: ItemField,
    policy: MatchPolicy,
    lengths: &SoundexLengths,
) -> Result<Vec<VariationGroup>, FinderError> {
    if !matches!(
        policy,
        MatchPolicy::Similar | MatchPolicy::Soundex | MatchPolicy::Fuzzy
    ) {
        return Err(FinderError::InvalidOptions(format!(
            "{policy} matching is not available for {field} variations"
        )));
    }

    let names = store.item_names(field)?;
    let usage = store.item_usage(field)?;
    debug!("checking {} {} names for variations", names.len(), field);

    let mut candidates: CandidateMap<String, u32> = BTreeMap::new();
    for (&item_id, name) in &names {
        if field == ItemField::Authors {
            let AuthorKey { primary, reversed } =
                author_key(policy, &clean_author_name(name), lengths);
            if primary.is_empty() {
                continue;
            }
            candidates
                .entry(primary.clone())
                .or_default()
                .insert(item_id);
            if let Some(rev) = reversed {
                if rev != primary {
                    candidates.entry(rev).or_default().insert(item_id);
                }
            }
        } else {
            let key = variation_key(policy, field, name, lengths);
            if key.is_empty() {
                continue;
            }
            candidates.entry(key).or_default().insert(item_id);
        }
    }

    shrink_candidates(&mut candidates);
    let ordered = sort_candidate_groups(candidates, true);
    let pruned = prune_subset_groups(ordered);

    let mut groups = Vec::new();
    for member_ids in pruned {
        let mut items: Vec<VariationItem> = member_ids
            .iter()
            .map(|id| VariationItem {
                id: *id,
                name: names.get(id).cloned().unwrap_or_default(),
                count: usage.get(id).copied().unwrap_or(0),
            })
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        // Identical names are not variations of each other.
        if items.windows(2).all(|pair| pair[0].name == pair[1].name) {
            continue;
        }
        groups.push(VariationGroup { items });
    }

    groups.sort_by(|a, b| a.items[0].name.cmp(&b.items[0].name));
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressError, ProgressReporter};
    use crate::store::MemoryLibrary;

    fn set(ids: &[u32]) -> BTreeSet<u32> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_shrink_drops_singletons() {
        let mut candidates: CandidateMap<String, u32> = BTreeMap::new();
        candidates.insert("a".into(), set(&[1]));
        candidates.insert("b".into(), set(&[2, 3]));

        shrink_candidates(&mut candidates);
        assert_eq!(candidates.len(), 1);
        assert!(candidates.contains_key("b"));
    }

    #[test]
    fn test_sort_by_key_ascending() {
        let mut candidates: CandidateMap<String, u32> = BTreeMap::new();
        candidates.insert("zebra".into(), set(&[1, 2]));
        candidates.insert("apple".into(), set(&[3, 4, 5]));

        let sorted = sort_candidate_groups(candidates, true);
        assert_eq!(sorted[0], set(&[3, 4, 5]));
        assert_eq!(sorted[1], set(&[1, 2]));
    }

    #[test]
    fn test_sort_by_size_descending() {
        let mut candidates: CandidateMap<String, u32> = BTreeMap::new();
        candidates.insert("apple".into(), set(&[1, 2]));
        candidates.insert("zebra".into(), set(&[3, 4, 5]));
        candidates.insert("mango".into(), set(&[6, 7]));

        let sorted = sort_candidate_groups(candidates, false);
        assert_eq!(sorted[0], set(&[3, 4, 5]));
        // Equal sizes tie-break on descending key: mango before apple.
        assert_eq!(sorted[1], set(&[6, 7]));
        assert_eq!(sorted[2], set(&[1, 2]));
    }

    #[test]
    fn test_prune_subsets() {
        let groups = vec![set(&[1, 2]), set(&[1, 2, 3]), set(&[4, 5])];
        let pruned = prune_subset_groups(groups);

        assert_eq!(pruned.len(), 2);
        assert!(pruned.contains(&set(&[1, 2, 3])));
        assert!(pruned.contains(&set(&[4, 5])));
        assert!(!pruned.contains(&set(&[1, 2])));
    }

    #[test]
    fn test_prune_keeps_equal_sets_once_each() {
        // Equal sets subsume each other; only the last survives.
        let groups = vec![set(&[1, 2]), set(&[1, 2])];
        let pruned = prune_subset_groups(groups);
        assert_eq!(pruned, vec![set(&[1, 2])]);
    }

    #[test]
    fn test_partition_no_exemptions() {
        let exemptions = ExemptionsMap::new();
        let partitions = partition_using_exemptions(&[3u32, 1, 2], &exemptions);
        assert_eq!(partitions, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_partition_bridging_id_repeats() {
        // 1 and 3 are exempt; 2 bridges both partitions.
        let mut exemptions = ExemptionsMap::new();
        exemptions.add_exemption(1u32, 3);

        let partitions = partition_using_exemptions(&[1, 2, 3], &exemptions);
        assert_eq!(partitions, vec![vec![1, 2], vec![2, 3]]);
    }

    #[test]
    fn test_partition_chain() {
        let mut exemptions = ExemptionsMap::new();
        exemptions.add_exemption(1u32, 2);
        exemptions.add_exemption(2u32, 3);

        let partitions = partition_using_exemptions(&[1, 2, 3], &exemptions);
        assert_eq!(partitions, vec![vec![1, 3]]);
    }

    #[test]
    fn test_partition_all_mutually_exempt() {
        let mut exemptions = ExemptionsMap::new();
        exemptions.add_exemption(1u32, 2);
        exemptions.add_exemption(1u32, 3);
        exemptions.add_exemption(2u32, 3);

        let partitions = partition_using_exemptions(&[1, 2, 3], &exemptions);
        assert!(partitions.is_empty());
    }

    #[test]
    fn test_partition_over_strings() {
        let mut exemptions: ExemptionsMap<String> = ExemptionsMap::new();
        exemptions.add_exemption("alice".to_string(), "carol".to_string());

        let names = vec![
            "alice".to_string(),
            "bob".to_string(),
            "carol".to_string(),
        ];
        let partitions = partition_using_exemptions(&names, &exemptions);
        assert_eq!(
            partitions,
            vec![
                vec!["alice".to_string(), "bob".to_string()],
                vec!["bob".to_string(), "carol".to_string()],
            ]
        );
    }

    #[test]
    fn test_invalid_soundex_length_rejected() {
        let library = MemoryLibrary::new();
        let mut options = SearchOptions::default();
        options.soundex.title = 0;

        let err = DuplicateFinder::new(&library, options).unwrap_err();
        assert!(matches!(err, FinderError::InvalidOptions(_)));
    }

    #[test]
    fn test_title_ignore_rejected_in_title_author_search() {
        let library = MemoryLibrary::new();
        let options = SearchOptions {
            title_match: MatchPolicy::Ignore,
            ..SearchOptions::default()
        };

        let err = DuplicateFinder::new(&library, options).unwrap_err();
        assert!(matches!(err, FinderError::InvalidOptions(_)));
    }

    #[test]
    fn test_author_ignore_rejected_in_author_only_search() {
        let library = MemoryLibrary::new();
        let options = SearchOptions {
            search_type: SearchType::AuthorOnly,
            author_match: MatchPolicy::Ignore,
            ..SearchOptions::default()
        };

        let err = DuplicateFinder::new(&library, options).unwrap_err();
        assert!(matches!(err, FinderError::InvalidOptions(_)));
    }

    struct FailingProgress;

    impl ProgressReporter for FailingProgress {
        fn report(
            &mut self,
            _message: &str,
            _current: usize,
            _total: usize,
        ) -> Result<(), ProgressError> {
            Err(ProgressError("pipe closed".to_string()))
        }
    }

    #[test]
    fn test_faulting_progress_is_disabled_not_fatal() {
        let mut library = MemoryLibrary::new();
        library.add_simple(1, "Dune", &["Frank Herbert"]);
        library.add_simple(2, "Dune", &["Frank Herbert"]);

        let mut finder = DuplicateFinder::new(&library, SearchOptions::default())
            .unwrap()
            .with_progress(Box::new(FailingProgress));

        let outcome = finder.find_duplicates().unwrap();
        assert_eq!(outcome.groups.len(), 1);
    }

    #[test]
    fn test_cancel_flag_returns_empty_cancelled() {
        let mut library = MemoryLibrary::new();
        library.add_simple(1, "Dune", &["Frank Herbert"]);
        library.add_simple(2, "Dune", &["Frank Herbert"]);

        let flag = Arc::new(AtomicBool::new(true));
        let mut finder = DuplicateFinder::new(&library, SearchOptions::default())
            .unwrap()
            .with_cancel_flag(flag);

        let outcome = finder.find_duplicates().unwrap();
        assert!(outcome.cancelled);
        assert!(outcome.groups.is_empty());
    }

    #[test]
    fn test_find_variations_rejects_identical_policy() {
        let library = MemoryLibrary::new();
        let err = find_variations(
            &library,
            ItemField::Authors,
            MatchPolicy::Identical,
            &SoundexLengths::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FinderError::InvalidOptions(_)));
    }

    #[test]
    fn test_find_variations_groups_author_forms() {
        let mut library = MemoryLibrary::new();
        library.add_simple(1, "Book A", &["Kevin J. Anderson"]);
        library.add_simple(2, "Book B", &["Anderson, Kevin J."]);
        library.add_simple(3, "Book C", &["Ursula K. Le Guin"]);

        let groups = find_variations(
            &library,
            ItemField::Authors,
            MatchPolicy::Similar,
            &SoundexLengths::default(),
        )
        .unwrap();

        assert_eq!(groups.len(), 1);
        let names: Vec<&str> = groups[0].items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Anderson, Kevin J.", "Kevin J. Anderson"]);
        assert!(groups[0].items.iter().all(|item| item.count == 1));
    }

    #[test]
    fn test_find_variations_publisher_stop_words() {
        let mut library = MemoryLibrary::new();
        library.add_book(
            1,
            crate::store::MemoryBook {
                title: Some("A".into()),
                publisher: Some("Random House".into()),
                ..Default::default()
            },
        );
        library.add_book(
            2,
            crate::store::MemoryBook {
                title: Some("B".into()),
                publisher: Some("Random House Inc".into()),
                ..Default::default()
            },
        );

        let groups = find_variations(
            &library,
            ItemField::Publisher,
            MatchPolicy::Similar,
            &SoundexLengths::default(),
        )
        .unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].items.len(), 2);
    }
}
