//! Library storage: the read-only store contract, direct access to a
//! Calibre library's metadata.db, and an in-memory fake for tests.

use crate::models::{BookDetail, FormatFile, ItemField, UsageMap};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Calibre database not found at {0}")]
    LibraryNotFound(PathBuf),
}

/// Read-only access to book metadata and format files.
///
/// The engine borrows a store for the duration of a search and never
/// writes through it.
pub trait LibraryStore {
    /// All book ids, ascending.
    fn all_ids(&self) -> Result<Vec<u32>, StoreError>;

    fn title(&self, book_id: u32) -> Result<Option<String>, StoreError>;

    /// Ordered author display names. Names may embed `|` where the
    /// library keeps a comma inside a single name; callers rewrite it.
    fn authors(&self, book_id: u32) -> Result<Vec<String>, StoreError>;

    /// Identifier scheme name to value, e.g. "isbn" -> "978...".
    fn identifiers(&self, book_id: u32) -> Result<HashMap<String, String>, StoreError>;

    fn languages(&self, book_id: u32) -> Result<Option<String>, StoreError>;

    /// Format codes ("EPUB", "PDF") available for a book.
    fn formats(&self, book_id: u32) -> Result<Vec<String>, StoreError>;

    /// Size, mtime and path of one format file. `Ok(None)` when the book
    /// has no such format or the file is gone from disk.
    fn format_metadata(&self, book_id: u32, fmt: &str) -> Result<Option<FormatFile>, StoreError>;

    /// SHA-256 hex digest of one format file. `Ok(None)` when the file
    /// is missing.
    fn format_hash(&self, book_id: u32, fmt: &str) -> Result<Option<String>, StoreError> {
        match self.format_metadata(book_id, fmt)? {
            Some(meta) => hash_file(&meta.path),
            None => Ok(None),
        }
    }

    /// Book fields used by report output.
    fn book_details(&self, book_id: u32) -> Result<BookDetail, StoreError>;

    /// Item id to display name for a metadata field.
    fn item_names(&self, field: ItemField) -> Result<BTreeMap<u32, String>, StoreError>;

    /// Item id to number of books using it.
    fn item_usage(&self, field: ItemField) -> Result<UsageMap, StoreError>;
}

/// SHA-256 over a file's contents, read in 8 KiB chunks.
///
/// A missing file yields `Ok(None)`; any other IO failure is an error.
pub fn hash_file(path: &Path) -> Result<Option<String>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Some(format!("{:x}", hasher.finalize())))
}

fn field_tables(field: ItemField) -> (&'static str, &'static str, &'static str) {
    match field {
        ItemField::Authors => ("authors", "books_authors_link", "author"),
        ItemField::Series => ("series", "books_series_link", "series"),
        ItemField::Publisher => ("publishers", "books_publishers_link", "publisher"),
        ItemField::Tags => ("tags", "books_tags_link", "tag"),
    }
}

/// Read-only view of a Calibre library folder.
pub struct SqliteLibrary {
    library_path: PathBuf,
    conn: Connection,
}

impl std::fmt::Debug for SqliteLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLibrary")
            .field("library_path", &self.library_path)
            .finish_non_exhaustive()
    }
}

impl SqliteLibrary {
    /// Open the `metadata.db` inside a Calibre library folder.
    pub fn open(library_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let library_path = library_path.as_ref().to_path_buf();
        let db_path = library_path.join("metadata.db");
        if !db_path.exists() {
            return Err(StoreError::LibraryNotFound(db_path));
        }

        let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { library_path, conn })
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    /// Relative folder of a book inside the library.
    fn book_path(&self, book_id: u32) -> Result<Option<String>, StoreError> {
        let path = self
            .conn
            .query_row("SELECT path FROM books WHERE id = ?", [book_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(path)
    }

    /// Stored file name (without extension) for one format of a book.
    fn format_file_name(&self, book_id: u32, fmt: &str) -> Result<Option<String>, StoreError> {
        let name = self
            .conn
            .query_row(
                "SELECT name FROM data WHERE book = ? AND format = ?",
                rusqlite::params![book_id, fmt.to_uppercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    fn series(&self, book_id: u32) -> Result<Option<String>, StoreError> {
        let series = self
            .conn
            .query_row(
                "SELECT s.name FROM books_series_link bsl
                 JOIN series s ON bsl.series = s.id
                 WHERE bsl.book = ?",
                [book_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(series)
    }

    fn publisher(&self, book_id: u32) -> Result<Option<String>, StoreError> {
        let publisher = self
            .conn
            .query_row(
                "SELECT p.name FROM books_publishers_link bpl
                 JOIN publishers p ON bpl.publisher = p.id
                 WHERE bpl.book = ?",
                [book_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(publisher)
    }

    fn isbn(&self, book_id: u32) -> Result<Option<String>, StoreError> {
        let isbn = self
            .conn
            .query_row(
                "SELECT val FROM identifiers WHERE book = ? AND type = 'isbn'",
                [book_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(isbn)
    }
}

impl LibraryStore for SqliteLibrary {
    fn all_ids(&self) -> Result<Vec<u32>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT id FROM books ORDER BY id")?;
        let mut rows = stmt.query([])?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    fn title(&self, book_id: u32) -> Result<Option<String>, StoreError> {
        let title = self
            .conn
            .query_row("SELECT title FROM books WHERE id = ?", [book_id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(title)
    }

    fn authors(&self, book_id: u32) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT a.name FROM books_authors_link bal
             JOIN authors a ON bal.author = a.id
             WHERE bal.book = ?
             ORDER BY bal.id",
        )?;
        let mut rows = stmt.query([book_id])?;

        let mut authors = Vec::new();
        while let Some(row) = rows.next()? {
            authors.push(row.get(0)?);
        }
        Ok(authors)
    }

    fn identifiers(&self, book_id: u32) -> Result<HashMap<String, String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT type, val FROM identifiers WHERE book = ?")?;
        let mut rows = stmt.query([book_id])?;

        let mut identifiers = HashMap::new();
        while let Some(row) = rows.next()? {
            identifiers.insert(row.get(0)?, row.get(1)?);
        }
        Ok(identifiers)
    }

    fn languages(&self, book_id: u32) -> Result<Option<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT l.lang_code FROM books_languages_link bll
             JOIN languages l ON bll.lang_code = l.id
             WHERE bll.book = ?
             ORDER BY bll.id",
        )?;
        let mut rows = stmt.query([book_id])?;

        let mut codes: Vec<String> = Vec::new();
        while let Some(row) = rows.next()? {
            codes.push(row.get(0)?);
        }
        if codes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(codes.join(",")))
        }
    }

    fn formats(&self, book_id: u32) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT format FROM data WHERE book = ? ORDER BY format")?;
        let mut rows = stmt.query([book_id])?;

        let mut formats = Vec::new();
        while let Some(row) = rows.next()? {
            formats.push(row.get(0)?);
        }
        Ok(formats)
    }

    fn format_metadata(&self, book_id: u32, fmt: &str) -> Result<Option<FormatFile>, StoreError> {
        let Some(name) = self.format_file_name(book_id, fmt)? else {
            return Ok(None);
        };
        let Some(book_path) = self.book_path(book_id)? else {
            return Ok(None);
        };

        let path = self
            .library_path
            .join(book_path)
            .join(format!("{}.{}", name, fmt.to_lowercase()));

        match std::fs::metadata(&path) {
            Ok(meta) => Ok(Some(FormatFile {
                size: meta.len(),
                mtime: meta.modified().ok(),
                path,
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn book_details(&self, book_id: u32) -> Result<BookDetail, StoreError> {
        Ok(BookDetail {
            id: book_id,
            title: self.title(book_id)?,
            authors: self
                .authors(book_id)?
                .iter()
                .map(|name| crate::normalize::clean_author_name(name))
                .collect(),
            series: self.series(book_id)?,
            publisher: self.publisher(book_id)?,
            isbn: self.isbn(book_id)?,
            formats: self.formats(book_id)?,
            path: self.book_path(book_id)?,
        })
    }

    fn item_names(&self, field: ItemField) -> Result<BTreeMap<u32, String>, StoreError> {
        let (table, _, _) = field_tables(field);
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id, name FROM {table}"))?;
        let mut rows = stmt.query([])?;

        let mut names = BTreeMap::new();
        while let Some(row) = rows.next()? {
            names.insert(row.get(0)?, row.get(1)?);
        }
        Ok(names)
    }

    fn item_usage(&self, field: ItemField) -> Result<UsageMap, StoreError> {
        let (_, link_table, link_column) = field_tables(field);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {link_column}, COUNT(*) FROM {link_table} GROUP BY {link_column}"
        ))?;
        let mut rows = stmt.query([])?;

        let mut usage = HashMap::new();
        while let Some(row) = rows.next()? {
            usage.insert(row.get(0)?, row.get(1)?);
        }
        Ok(usage)
    }
}

/// One book inside a [`MemoryLibrary`].
#[derive(Debug, Clone, Default)]
pub struct MemoryBook {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub identifiers: HashMap<String, String>,
    pub languages: Option<String>,
    pub series: Option<String>,
    pub publisher: Option<String>,
    pub tags: Vec<String>,
    /// Format code and on-disk path; sizes and hashes come from the file.
    pub formats: Vec<(String, PathBuf)>,
}

/// In-memory store used by tests, benches, and doc examples.
#[derive(Debug, Clone, Default)]
pub struct MemoryLibrary {
    books: BTreeMap<u32, MemoryBook>,
}

impl MemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_book(&mut self, book_id: u32, book: MemoryBook) {
        self.books.insert(book_id, book);
    }

    /// Shorthand for a title/authors-only book.
    pub fn add_simple(&mut self, book_id: u32, title: &str, authors: &[&str]) {
        self.add_book(
            book_id,
            MemoryBook {
                title: Some(title.to_string()),
                authors: authors.iter().map(|a| a.to_string()).collect(),
                ..MemoryBook::default()
            },
        );
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    fn book(&self, book_id: u32) -> Option<&MemoryBook> {
        self.books.get(&book_id)
    }

    fn field_values(&self, book: &MemoryBook, field: ItemField) -> Vec<String> {
        match field {
            ItemField::Authors => book.authors.clone(),
            ItemField::Series => book.series.clone().into_iter().collect(),
            ItemField::Publisher => book.publisher.clone().into_iter().collect(),
            ItemField::Tags => book.tags.clone(),
        }
    }

    // Item ids are assigned by name order, starting at 1.
    fn sorted_field_names(&self, field: ItemField) -> Vec<String> {
        let mut names: Vec<String> = self
            .books
            .values()
            .flat_map(|book| self.field_values(book, field))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl LibraryStore for MemoryLibrary {
    fn all_ids(&self) -> Result<Vec<u32>, StoreError> {
        Ok(self.books.keys().copied().collect())
    }

    fn title(&self, book_id: u32) -> Result<Option<String>, StoreError> {
        Ok(self.book(book_id).and_then(|book| book.title.clone()))
    }

    fn authors(&self, book_id: u32) -> Result<Vec<String>, StoreError> {
        Ok(self
            .book(book_id)
            .map(|book| book.authors.clone())
            .unwrap_or_default())
    }

    fn identifiers(&self, book_id: u32) -> Result<HashMap<String, String>, StoreError> {
        Ok(self
            .book(book_id)
            .map(|book| book.identifiers.clone())
            .unwrap_or_default())
    }

    fn languages(&self, book_id: u32) -> Result<Option<String>, StoreError> {
        Ok(self.book(book_id).and_then(|book| book.languages.clone()))
    }

    fn formats(&self, book_id: u32) -> Result<Vec<String>, StoreError> {
        Ok(self
            .book(book_id)
            .map(|book| book.formats.iter().map(|(fmt, _)| fmt.clone()).collect())
            .unwrap_or_default())
    }

    fn format_metadata(&self, book_id: u32, fmt: &str) -> Result<Option<FormatFile>, StoreError> {
        let Some(book) = self.book(book_id) else {
            return Ok(None);
        };
        let Some((_, path)) = book
            .formats
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(fmt))
        else {
            return Ok(None);
        };

        match std::fs::metadata(path) {
            Ok(meta) => Ok(Some(FormatFile {
                size: meta.len(),
                mtime: meta.modified().ok(),
                path: path.clone(),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn book_details(&self, book_id: u32) -> Result<BookDetail, StoreError> {
        let Some(book) = self.book(book_id) else {
            return Ok(BookDetail {
                id: book_id,
                ..BookDetail::default()
            });
        };

        Ok(BookDetail {
            id: book_id,
            title: book.title.clone(),
            authors: book
                .authors
                .iter()
                .map(|name| crate::normalize::clean_author_name(name))
                .collect(),
            series: book.series.clone(),
            publisher: book.publisher.clone(),
            isbn: book.identifiers.get("isbn").cloned(),
            formats: book.formats.iter().map(|(fmt, _)| fmt.clone()).collect(),
            path: None,
        })
    }

    fn item_names(&self, field: ItemField) -> Result<BTreeMap<u32, String>, StoreError> {
        Ok(self
            .sorted_field_names(field)
            .into_iter()
            .enumerate()
            .map(|(idx, name)| (idx as u32 + 1, name))
            .collect())
    }

    fn item_usage(&self, field: ItemField) -> Result<UsageMap, StoreError> {
        let names = self.sorted_field_names(field);
        let mut usage = HashMap::new();

        for book in self.books.values() {
            for value in self.field_values(book, field) {
                if let Ok(idx) = names.binary_search(&value) {
                    *usage.entry(idx as u32 + 1).or_insert(0) += 1;
                }
            }
        }
        Ok(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_hash_file_missing_is_none() {
        let digest = hash_file(Path::new("/nonexistent/book.epub")).unwrap();
        assert!(digest.is_none());
    }

    #[test]
    fn test_hash_file_known_digest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let digest = hash_file(file.path()).unwrap().unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_memory_library_basics() {
        let mut library = MemoryLibrary::new();
        library.add_simple(7, "The Martian Way", &["Isaac Asimov"]);

        assert_eq!(library.all_ids().unwrap(), vec![7]);
        assert_eq!(
            library.title(7).unwrap().as_deref(),
            Some("The Martian Way")
        );
        assert_eq!(library.authors(7).unwrap(), vec!["Isaac Asimov"]);
        assert!(library.title(99).unwrap().is_none());
        assert!(library.formats(7).unwrap().is_empty());
    }

    #[test]
    fn test_memory_library_item_names_and_usage() {
        let mut library = MemoryLibrary::new();
        library.add_simple(1, "A", &["Zadie Smith"]);
        library.add_simple(2, "B", &["Ann Leckie"]);
        library.add_simple(3, "C", &["Zadie Smith"]);

        let names = library.item_names(ItemField::Authors).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[&1], "Ann Leckie");
        assert_eq!(names[&2], "Zadie Smith");

        let usage = library.item_usage(ItemField::Authors).unwrap();
        assert_eq!(usage[&1], 1);
        assert_eq!(usage[&2], 2);
    }

    #[test]
    fn test_memory_library_format_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub");
        std::fs::write(&path, b"epub bytes").unwrap();

        let mut library = MemoryLibrary::new();
        library.add_book(
            1,
            MemoryBook {
                title: Some("X".into()),
                formats: vec![("EPUB".into(), path.clone())],
                ..MemoryBook::default()
            },
        );

        let meta = library.format_metadata(1, "epub").unwrap().unwrap();
        assert_eq!(meta.size, 10);
        assert_eq!(meta.path, path);

        // A format whose file is gone is simply absent.
        let missing = library.format_metadata(1, "pdf").unwrap();
        assert!(missing.is_none());

        let digest = library.format_hash(1, "EPUB").unwrap();
        assert!(digest.is_some());
    }

    #[test]
    fn test_sqlite_library_missing_db() {
        let dir = tempfile::tempdir().unwrap();
        let err = SqliteLibrary::open(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::LibraryNotFound(_)));
    }
}
