//! calibre-dedup command line interface.
//!
//! Headless duplicate detection for Calibre libraries: point it at a
//! library folder and it reports groups of duplicate books as text,
//! JSON, or CSV.

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use calibre_dedup::finder::{find_variations, DuplicateFinder};
use calibre_dedup::models::{
    ExemptionsMap, ItemField, MatchPolicy, SearchOptions, SearchType, SoundexLengths,
};
use calibre_dedup::output::{
    build_report, write_csv, write_json, write_summary_json, write_summary_text, write_text,
    write_variations_csv, write_variations_json, write_variations_text,
};
use calibre_dedup::progress::ConsoleProgress;
use calibre_dedup::store::{LibraryStore, SqliteLibrary};

#[derive(Parser)]
#[command(name = "calibre-dedup")]
#[command(about = "Headless duplicate detection for Calibre libraries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliSearchType {
    /// Match on title and author keys (default)
    TitleAuthor,
    /// Match on a shared identifier such as ISBN
    Identifier,
    /// Match on identical file content
    Binary,
    /// Match author-name variations rather than books
    AuthorOnly,
}

impl From<CliSearchType> for SearchType {
    fn from(value: CliSearchType) -> Self {
        match value {
            CliSearchType::TitleAuthor => SearchType::TitleAuthor,
            CliSearchType::Identifier => SearchType::Identifier,
            CliSearchType::Binary => SearchType::Binary,
            CliSearchType::AuthorOnly => SearchType::AuthorOnly,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliMatchType {
    /// Exact match, case-insensitive
    Identical,
    /// Normalized match: accents, articles and punctuation removed
    Similar,
    /// Phonetic match, catches typos and spelling variations
    Soundex,
    /// Very aggressive: ignores subtitles and trailing "and"/"or"
    Fuzzy,
    /// Do not match on this field
    Ignore,
}

impl From<CliMatchType> for MatchPolicy {
    fn from(value: CliMatchType) -> Self {
        match value {
            CliMatchType::Identical => MatchPolicy::Identical,
            CliMatchType::Similar => MatchPolicy::Similar,
            CliMatchType::Soundex => MatchPolicy::Soundex,
            CliMatchType::Fuzzy => MatchPolicy::Fuzzy,
            CliMatchType::Ignore => MatchPolicy::Ignore,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliItemField {
    Authors,
    Series,
    Publisher,
    Tags,
}

impl From<CliItemField> for ItemField {
    fn from(value: CliItemField) -> Self {
        match value {
            CliItemField::Authors => ItemField::Authors,
            CliItemField::Series => ItemField::Series,
            CliItemField::Publisher => ItemField::Publisher,
            CliItemField::Tags => ItemField::Tags,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliOutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Find duplicate books in a library
    Find {
        /// Path to the Calibre library folder (contains metadata.db)
        library: PathBuf,

        /// Type of duplicate search
        #[arg(long, short = 's', value_enum, default_value = "title-author")]
        search_type: CliSearchType,

        /// Title matching algorithm
        #[arg(long, short = 't', value_enum, default_value = "similar")]
        title_match: CliMatchType,

        /// Author matching algorithm
        #[arg(long, short = 'a', value_enum, default_value = "similar")]
        author_match: CliMatchType,

        /// Identifier scheme for identifier search
        #[arg(long, short = 'i', default_value = "isbn")]
        identifier: String,

        /// Books in different languages are never duplicates
        #[arg(long, short = 'l')]
        include_languages: bool,

        /// Sort groups by size (largest first) instead of by match key
        #[arg(long)]
        sort_by_size: bool,

        /// Restrict the search to these book ids (comma-separated)
        #[arg(long, value_delimiter = ',')]
        book_ids: Option<Vec<u32>>,

        /// JSON file mapping a book id to an array of exempt book ids
        #[arg(long)]
        exemptions: Option<PathBuf>,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value = "text")]
        format: CliOutputFormat,

        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Only print summary statistics
        #[arg(long, short = 'S')]
        summary: bool,

        /// Suppress progress output
        #[arg(long, short = 'q')]
        quiet: bool,

        /// Soundex code length for titles
        #[arg(long, default_value = "6")]
        title_soundex_length: usize,

        /// Soundex code length for authors
        #[arg(long, default_value = "8")]
        author_soundex_length: usize,

        /// Soundex code length for publishers
        #[arg(long, default_value = "6")]
        publisher_soundex_length: usize,

        /// Soundex code length for series
        #[arg(long, default_value = "6")]
        series_soundex_length: usize,

        /// Soundex code length for tags
        #[arg(long, default_value = "4")]
        tags_soundex_length: usize,
    },

    /// Find metadata variations (similar author/series/publisher/tag names)
    Variations {
        /// Path to the Calibre library folder (contains metadata.db)
        library: PathBuf,

        /// Metadata field to search
        #[arg(long, value_enum)]
        field: CliItemField,

        /// Matching algorithm (identical and ignore are not applicable)
        #[arg(long, value_enum, default_value = "similar")]
        match_type: CliMatchType,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value = "text")]
        format: CliOutputFormat,

        /// Output file (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Show library information
    Info {
        /// Path to the Calibre library folder (contains metadata.db)
        library: PathBuf,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value = "text")]
        format: CliOutputFormat,
    },
}

#[derive(Serialize)]
struct LibraryInfo {
    library_path: String,
    book_count: usize,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Find {
            library,
            search_type,
            title_match,
            author_match,
            identifier,
            include_languages,
            sort_by_size,
            book_ids,
            exemptions,
            format,
            output,
            summary,
            quiet,
            title_soundex_length,
            author_soundex_length,
            publisher_soundex_length,
            series_soundex_length,
            tags_soundex_length,
        } => {
            let store = SqliteLibrary::open(&library)?;

            let options = SearchOptions {
                search_type: search_type.into(),
                title_match: title_match.into(),
                author_match: author_match.into(),
                identifier_type: identifier,
                include_languages,
                sort_by_title: !sort_by_size,
                book_ids,
                soundex: SoundexLengths {
                    title: title_soundex_length,
                    author: author_soundex_length,
                    publisher: publisher_soundex_length,
                    series: series_soundex_length,
                    tags: tags_soundex_length,
                },
            };

            let mut finder = DuplicateFinder::new(&store, options)?;
            if let Some(path) = &exemptions {
                finder = finder.with_book_exemptions(load_exemptions(path)?);
            }
            if !quiet {
                finder = finder.with_progress(Box::new(ConsoleProgress::new()));
            }

            let outcome = finder.find_duplicates()?;
            drop(finder);

            if outcome.cancelled {
                eprintln!("Search cancelled");
            }

            let mut writer = open_output(output.as_deref())?;
            if summary {
                match format {
                    CliOutputFormat::Json => write_summary_json(&outcome.summary(), &mut writer)?,
                    _ => write_summary_text(&outcome.summary(), &mut writer)?,
                }
            } else {
                let report = build_report(&store, &outcome)?;
                match format {
                    CliOutputFormat::Text => write_text(&report, &mut writer)?,
                    CliOutputFormat::Json => write_json(&report, &mut writer)?,
                    CliOutputFormat::Csv => write_csv(&report, &mut writer)?,
                }
            }
            writer.flush()?;
        }

        Commands::Variations {
            library,
            field,
            match_type,
            format,
            output,
        } => {
            let store = SqliteLibrary::open(&library)?;
            let groups = find_variations(
                &store,
                field.into(),
                match_type.into(),
                &SoundexLengths::default(),
            )?;

            let mut writer = open_output(output.as_deref())?;
            match format {
                CliOutputFormat::Text => write_variations_text(&groups, &mut writer)?,
                CliOutputFormat::Json => write_variations_json(&groups, &mut writer)?,
                CliOutputFormat::Csv => write_variations_csv(&groups, &mut writer)?,
            }
            writer.flush()?;
        }

        Commands::Info { library, format } => {
            let store = SqliteLibrary::open(&library)?;
            let info = LibraryInfo {
                library_path: library.canonicalize()?.display().to_string(),
                book_count: store.all_ids()?.len(),
            };

            match format {
                CliOutputFormat::Json => {
                    serde_json::to_writer_pretty(io::stdout(), &info)?;
                    println!();
                }
                _ => {
                    println!("Calibre Library Info");
                    println!("{}", "=".repeat(40));
                    println!("Path:       {}", info.library_path);
                    println!("Book count: {}", info.book_count);
                }
            }
        }
    }

    Ok(())
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, io::Error> {
    Ok(match path {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    })
}

/// Load a `{"book_id": [book_id, ...]}` JSON file into a symmetric map.
fn load_exemptions(path: &Path) -> Result<ExemptionsMap<u32>, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)?;
    let raw: HashMap<u32, Vec<u32>> = serde_json::from_str(&data)?;

    let mut map = ExemptionsMap::new();
    for (book_id, others) in raw {
        for other in others {
            map.add_exemption(book_id, other);
        }
    }
    Ok(map)
}
