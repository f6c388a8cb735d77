//! Output formatting for duplicate and variation results (text, JSON, CSV).

use crate::models::{
    DuplicateReport, DuplicateSummary, GroupDetail, SearchOutcome, VariationGroup,
    VariationReport,
};
use crate::store::{LibraryStore, StoreError};
use std::io::{self, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolve book details for every group so the writers below need no
/// further store access.
pub fn build_report<S: LibraryStore>(
    store: &S,
    outcome: &SearchOutcome,
) -> Result<DuplicateReport, StoreError> {
    let mut groups = Vec::with_capacity(outcome.groups.len());

    for group in &outcome.groups {
        let mut books = Vec::with_capacity(group.book_ids.len());
        for &book_id in &group.book_ids {
            books.push(store.book_details(book_id)?);
        }
        groups.push(GroupDetail {
            group_id: group.group_id,
            book_count: group.book_ids.len(),
            match_key: group.match_key.clone(),
            books,
        });
    }

    Ok(DuplicateReport {
        summary: outcome.summary(),
        cancelled: outcome.cancelled,
        groups,
    })
}

/// Write a duplicate report as pretty-printed JSON.
pub fn write_json<W: Write>(report: &DuplicateReport, writer: &mut W) -> Result<(), OutputError> {
    serde_json::to_writer_pretty(&mut *writer, report)?;
    writeln!(writer)?;
    Ok(())
}

/// Write a duplicate report as human-readable text.
pub fn write_text<W: Write>(report: &DuplicateReport, writer: &mut W) -> Result<(), OutputError> {
    writeln!(writer, "Found {} duplicate groups", report.summary.total_groups)?;
    writeln!(writer, "Total books: {}", report.summary.total_books)?;
    writeln!(writer, "{}", "=".repeat(70))?;

    for group in &report.groups {
        writeln!(writer)?;
        writeln!(writer, "Group {} ({} books):", group.group_id, group.book_count)?;
        writeln!(writer, "{}", "-".repeat(50))?;
        if let Some(key) = &group.match_key {
            writeln!(writer, "  matched on: {key}")?;
        }

        for book in &group.books {
            writeln!(
                writer,
                "  [{}] {}",
                book.id,
                book.title.as_deref().unwrap_or("Unknown")
            )?;
            let authors = if book.authors.is_empty() {
                "Unknown".to_string()
            } else {
                book.authors.join(", ")
            };
            writeln!(writer, "          by {authors}")?;
            let formats = if book.formats.is_empty() {
                "None".to_string()
            } else {
                book.formats.join(", ")
            };
            writeln!(writer, "          formats: {formats}")?;
        }
    }

    Ok(())
}

/// Write a duplicate report as CSV, one row per book.
pub fn write_csv<W: Write>(report: &DuplicateReport, writer: &mut W) -> Result<(), OutputError> {
    writeln!(
        writer,
        "group_id,book_id,title,authors,series,isbn,formats,path"
    )?;

    for group in &report.groups {
        for book in &group.books {
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{}",
                group.group_id,
                book.id,
                csv_field(book.title.as_deref().unwrap_or("")),
                csv_field(&book.authors.join(", ")),
                csv_field(book.series.as_deref().unwrap_or("")),
                csv_field(book.isbn.as_deref().unwrap_or("")),
                csv_field(&book.formats.join(",")),
                csv_field(book.path.as_deref().unwrap_or("")),
            )?;
        }
    }

    Ok(())
}

/// Write summary statistics as text.
pub fn write_summary_text<W: Write>(
    summary: &DuplicateSummary,
    writer: &mut W,
) -> Result<(), OutputError> {
    writeln!(writer, "Duplicate Search Summary")?;
    writeln!(writer, "{}", "=".repeat(40))?;
    writeln!(writer, "Total duplicate groups: {}", summary.total_groups)?;
    writeln!(writer, "Total books in groups:  {}", summary.total_books)?;
    writeln!(writer, "Duplicates to remove:   {}", summary.duplicates_to_remove)?;
    writeln!(writer, "Largest group size:     {}", summary.largest_group)?;
    writeln!(writer, "Average group size:     {:.1}", summary.avg_group_size)?;
    Ok(())
}

/// Write summary statistics as JSON.
pub fn write_summary_json<W: Write>(
    summary: &DuplicateSummary,
    writer: &mut W,
) -> Result<(), OutputError> {
    serde_json::to_writer_pretty(&mut *writer, summary)?;
    writeln!(writer)?;
    Ok(())
}

/// Write variation groups as human-readable text.
pub fn write_variations_text<W: Write>(
    groups: &[VariationGroup],
    writer: &mut W,
) -> Result<(), OutputError> {
    writeln!(writer, "Found {} variation groups", groups.len())?;
    writeln!(writer, "{}", "=".repeat(60))?;

    for group in groups {
        let first = &group.items[0];
        writeln!(writer)?;
        writeln!(writer, "{} ({} books) =>", first.name, first.count)?;
        let similar: Vec<String> = group.items[1..]
            .iter()
            .map(|item| format!("{} ({} books)", item.name, item.count))
            .collect();
        writeln!(writer, "  Similar: {}", similar.join(", "))?;
    }

    Ok(())
}

/// Write variation groups as JSON.
pub fn write_variations_json<W: Write>(
    groups: &[VariationGroup],
    writer: &mut W,
) -> Result<(), OutputError> {
    let report = VariationReport::new(groups.to_vec());
    serde_json::to_writer_pretty(&mut *writer, &report)?;
    writeln!(writer)?;
    Ok(())
}

/// Write variation groups as CSV, one row per item.
pub fn write_variations_csv<W: Write>(
    groups: &[VariationGroup],
    writer: &mut W,
) -> Result<(), OutputError> {
    writeln!(writer, "group_id,item_id,item_name,item_count")?;

    for (idx, group) in groups.iter().enumerate() {
        for item in &group.items {
            writeln!(
                writer,
                "{},{},{},{}",
                idx + 1,
                item.id,
                csv_field(&item.name),
                item.count
            )?;
        }
    }

    Ok(())
}

// RFC-4180 quoting: only fields containing a comma, quote, or newline
// need the treatment.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookDetail, DuplicateGroup, VariationItem};
    use crate::store::MemoryLibrary;

    fn sample_outcome() -> SearchOutcome {
        SearchOutcome {
            groups: vec![DuplicateGroup {
                group_id: 1,
                book_ids: vec![1, 2],
                match_key: None,
            }],
            cancelled: false,
        }
    }

    fn sample_library() -> MemoryLibrary {
        let mut library = MemoryLibrary::new();
        library.add_simple(1, "Dune, Part One", &["Frank Herbert"]);
        library.add_simple(2, "Dune", &["Frank Herbert"]);
        library
    }

    #[test]
    fn test_build_report_resolves_books() {
        let library = sample_library();
        let report = build_report(&library, &sample_outcome()).unwrap();

        assert_eq!(report.summary.total_groups, 1);
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].books.len(), 2);
        assert_eq!(
            report.groups[0].books[0].title.as_deref(),
            Some("Dune, Part One")
        );
    }

    #[test]
    fn test_csv_quotes_embedded_commas() {
        let library = sample_library();
        let report = build_report(&library, &sample_outcome()).unwrap();

        let mut out = Vec::new();
        write_csv(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("group_id,book_id,title"));
        assert!(text.contains("\"Dune, Part One\""));
        assert!(text.lines().count() == 3);
    }

    #[test]
    fn test_csv_field_escaping() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_json_round_trips() {
        let library = sample_library();
        let report = build_report(&library, &sample_outcome()).unwrap();

        let mut out = Vec::new();
        write_json(&report, &mut out).unwrap();

        let parsed: DuplicateReport = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.summary.total_books, 2);
        assert_eq!(parsed.groups[0].books[1].id, 2);
    }

    #[test]
    fn test_text_output_shape() {
        let library = sample_library();
        let report = build_report(&library, &sample_outcome()).unwrap();

        let mut out = Vec::new();
        write_text(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Found 1 duplicate groups"));
        assert!(text.contains("Group 1 (2 books):"));
        assert!(text.contains("[1] Dune, Part One"));
        assert!(text.contains("by Frank Herbert"));
    }

    #[test]
    fn test_summary_text() {
        let summary = DuplicateSummary {
            total_groups: 2,
            total_books: 5,
            duplicates_to_remove: 3,
            largest_group: 3,
            avg_group_size: 2.5,
        };

        let mut out = Vec::new();
        write_summary_text(&summary, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Total duplicate groups: 2"));
        assert!(text.contains("Average group size:     2.5"));
    }

    #[test]
    fn test_variations_text_and_csv() {
        let groups = vec![VariationGroup {
            items: vec![
                VariationItem {
                    id: 1,
                    name: "Anderson, Kevin J.".into(),
                    count: 2,
                },
                VariationItem {
                    id: 2,
                    name: "Kevin J. Anderson".into(),
                    count: 4,
                },
            ],
        }];

        let mut out = Vec::new();
        write_variations_text(&groups, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Anderson, Kevin J. (2 books) =>"));
        assert!(text.contains("Similar: Kevin J. Anderson (4 books)"));

        let mut out = Vec::new();
        write_variations_csv(&groups, &mut out).unwrap();
        let csv = String::from_utf8(out).unwrap();
        assert!(csv.contains("1,1,\"Anderson, Kevin J.\",2"));
        assert!(csv.contains("1,2,Kevin J. Anderson,4"));
    }

    #[test]
    fn test_report_for_missing_book_is_empty_detail() {
        let library = MemoryLibrary::new();
        let detail: BookDetail = crate::store::LibraryStore::book_details(&library, 42).unwrap();
        assert_eq!(detail.id, 42);
        assert!(detail.title.is_none());
    }
}
