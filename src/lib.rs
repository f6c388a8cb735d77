//! Headless duplicate detection for Calibre libraries.
//!
//! Partitions a library into groups of mutually-matching books under one
//! of four search modes (title/author, identifier, binary content,
//! author-only) and four match policies per field (identical, similar,
//! soundex, fuzzy). User-marked exemptions split groups apart.
//!
//! # Example
//!
//! ```
//! use calibre_dedup::prelude::*;
//!
//! let mut library = MemoryLibrary::new();
//! library.add_simple(1, "The Martian Way", &["Isaac Asimov"]);
//! library.add_simple(2, "Martian Way", &["Asimov, Isaac"]);
//! library.add_simple(3, "Nightfall", &["Isaac Asimov"]);
//!
//! let mut finder = DuplicateFinder::new(&library, SearchOptions::default()).unwrap();
//! let outcome = finder.find_duplicates().unwrap();
//!
//! assert_eq!(outcome.groups.len(), 1);
//! assert_eq!(outcome.groups[0].book_ids, vec![1, 2]);
//! ```
//!
//! Against a real library, replace [`store::MemoryLibrary`] with
//! [`store::SqliteLibrary::open`] pointed at the library folder.

pub mod finder;
pub mod matching;
pub mod models;
pub mod normalize;
pub mod output;
pub mod progress;
pub mod soundex;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::finder::{find_variations, partition_using_exemptions, DuplicateFinder, FinderError};
    pub use crate::matching::{
        author_key, fuzzy_author_key, fuzzy_title_key, identical_author_key, identical_title_key,
        similar_author_key, similar_title_key, soundex_author_key, soundex_title_key, title_key,
        variation_key, AuthorKey,
    };
    pub use crate::models::{
        BookDetail, DuplicateGroup, DuplicateReport, DuplicateSummary, ExemptionsMap, FormatFile,
        GroupDetail, ItemField, MatchPolicy, SearchOptions, SearchOutcome, SearchType,
        SoundexLengths, VariationGroup, VariationItem, VariationReport,
    };
    pub use crate::normalize::{
        author_tokens, clean_author_name, fold, fuzzy_normalize, publisher_tokens, series_tokens,
        tag_tokens, title_tokens,
    };
    pub use crate::output::{
        build_report, write_csv, write_json, write_summary_json, write_summary_text, write_text,
        write_variations_csv, write_variations_json, write_variations_text, OutputError,
    };
    pub use crate::progress::{ConsoleProgress, NullProgress, ProgressError, ProgressReporter};
    pub use crate::soundex::soundex;
    pub use crate::store::{
        hash_file, LibraryStore, MemoryBook, MemoryLibrary, SqliteLibrary, StoreError,
    };
}

// Re-export the types most callers need at the crate root.
pub use finder::{DuplicateFinder, FinderError};
pub use models::{
    DuplicateGroup, DuplicateSummary, MatchPolicy, SearchOptions, SearchOutcome, SearchType,
};
