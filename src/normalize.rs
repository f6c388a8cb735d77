//! Text normalization: unicode folding and the per-field token pipelines
//! that feed the match-key builders.

use lazy_static::lazy_static;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Words dropped from author names before keying.
const IGNORE_AUTHOR_WORDS: &[&str] = &[
    "von", "van", "jr", "sr", "i", "ii", "iii", "second", "third", "md", "phd",
];

const IGNORE_SERIES_WORDS: &[&str] = &["the", "a", "and"];
const IGNORE_PUBLISHER_WORDS: &[&str] = &[
    "the", "inc", "ltd", "limited", "llc", "co", "pty", "usa", "uk",
];
const IGNORE_TAG_WORDS: &[&str] = &["the", "and", "a"];

lazy_static! {
    // Subtitles: any bracketed group, or everything after a /, : or \.
    static ref SUBTITLE_PAT: Regex = Regex::new(r"([\(\[\{].*?[\)\]\}]|[/:\\].*$)").unwrap();
    // Markers like (2010), [Omnibus], {paperback}.
    static ref EDITION_MARKER_PAT: Regex = Regex::new(
        r"(?i)[({\[](\d{4}|omnibus|anthology|hardcover|paperback|mass\s*market|edition|ed\.)[\])}]"
    )
    .unwrap();
    // Any bracketed group mentioning an edition.
    static ref EDITION_GROUP_PAT: Regex = Regex::new(r"(?i)[({\[].*?(edition|ed.).*?[\]})]").unwrap();
    // Commas used as separators in numbers: 1,000 -> 1000.
    static ref NUMBER_COMMA_PAT: Regex = Regex::new(r"(\d+),(\d+)").unwrap();
    // Hyphens preceded by whitespace.
    static ref SPACE_HYPHEN_PAT: Regex = Regex::new(r"(\s-)").unwrap();
    static ref TITLE_SPECIALS_PAT: Regex =
        Regex::new(r#"[:,;+!@#$%^&*(){}.`~"\s\[\]/]"#).unwrap();
    // Ensure "Last,First" is treated like "Last, First".
    static ref COMMA_NO_SPACE_PAT: Regex = Regex::new(r",([^\s])").unwrap();
    static ref SEPARATOR_PAT: Regex = Regex::new(r"[-+.:;]").unwrap();
    // Apostrophe survives here (Irish names).
    static ref AUTHOR_STRIP_PAT: Regex =
        Regex::new(r#"[,!@#$%^&*(){}`~"\s\[\]/]"#).unwrap();
    static ref FIELD_STRIP_PAT: Regex =
        Regex::new(r#"[,!@#$%^&*(){}`~'"\s\[\]/]"#).unwrap();
    static ref LEADING_ARTICLE_PAT: Regex = Regex::new(r"^(a|the|an)\s+").unwrap();
    static ref FUZZY_PUNCT_PAT: Regex = Regex::new(r#"[\[\](){}<>'";,:#]"#).unwrap();
    static ref DASH_DOT_PAT: Regex = Regex::new(r"[-._]").unwrap();
    static ref WHITESPACE_PAT: Regex = Regex::new(r"\s+").unwrap();
}

/// Fold accented characters to their ASCII-close base forms.
///
/// NFD-decomposes the input and drops non-spacing combining marks, so
/// "Miéville" becomes "Mieville" and "Brontë" becomes "Bronte".
/// Characters without a decomposition pass through untouched.
pub fn fold(text: &str) -> String {
    text.nfd().filter(|&c| !is_combining_mark(c)).collect()
}

/// Normalize a title for "similar" comparison: lowercase, strip
/// punctuation and a leading article, collapse whitespace.
pub fn fuzzy_normalize(text: &str) -> String {
    let text = text.trim().to_lowercase();
    let text = FUZZY_PUNCT_PAT.replace_all(&text, "");
    let text = LEADING_ARTICLE_PAT.replace_all(&text, "");
    let text = DASH_DOT_PAT.replace_all(&text, " ");
    let text = WHITESPACE_PAT.replace_all(&text, " ");
    text.trim().to_string()
}

// Mirrors the `'(?!s)` rule: apostrophes are dropped unless they are
// possessive ("Maggie's" keeps its token shape, "don't" becomes "dont").
fn drop_bare_apostrophes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' && chars.peek() != Some(&'s') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Tokenize a title: strip subtitles and edition markers, fold accents,
/// split, drop "a"/"the". Output is lowercase.
pub fn title_tokens(title: &str) -> Vec<String> {
    if title.is_empty() {
        return Vec::new();
    }

    // Only strip the subtitle if something usable remains.
    let stripped = SUBTITLE_PAT.replace_all(title, "");
    let title = if stripped.chars().count() > 1 {
        stripped.into_owned()
    } else {
        title.to_string()
    };

    let title = EDITION_MARKER_PAT.replace_all(&title, "");
    let title = EDITION_GROUP_PAT.replace_all(&title, "");
    let title = NUMBER_COMMA_PAT.replace_all(&title, "${1}${2}");
    let title = SPACE_HYPHEN_PAT.replace_all(&title, " ");
    let title = drop_bare_apostrophes(&title);
    let title = TITLE_SPECIALS_PAT.replace_all(&title, " ");
    let title = fold(&title);

    title
        .split_whitespace()
        .map(|token| token.trim().to_lowercase())
        .filter(|token| !token.is_empty() && token != "a" && token != "the")
        .collect()
}

/// Tokenize an author name into first-middle-last order.
///
/// A comma in the input means the name is in "Last, First" form and the
/// surname is rotated to the back. With `strip_initials`, single-letter
/// tokens are dropped as well.
pub fn author_tokens(author: &str, strip_initials: bool) -> Vec<String> {
    if author.is_empty() {
        return Vec::new();
    }

    let author = COMMA_NO_SPACE_PAT.replace_all(author, ", ${1}");
    let au = SEPARATOR_PAT.replace_all(&author, " ");
    let au = fold(&au);

    let mut parts: Vec<&str> = au.split_whitespace().collect();
    if au.contains(',') && !parts.is_empty() {
        parts.rotate_left(1);
    }

    let min_length = if strip_initials { 1 } else { 0 };
    let mut tokens = Vec::new();
    for part in parts {
        let tok = AUTHOR_STRIP_PAT.replace_all(part, "");
        let tok = tok.trim();
        if tok.chars().count() > min_length {
            let tok = tok.to_lowercase();
            if !IGNORE_AUTHOR_WORDS.contains(&tok.as_str()) {
                tokens.push(tok);
            }
        }
    }
    tokens
}

fn variation_tokens(text: &str, ignore_words: &[&str]) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let s = SEPARATOR_PAT.replace_all(text, " ");
    let s = fold(&s);

    s.split_whitespace()
        .filter_map(|part| {
            let tok = FIELD_STRIP_PAT.replace_all(part, "");
            let tok = tok.trim().to_lowercase();
            if !tok.is_empty() && !ignore_words.contains(&tok.as_str()) {
                Some(tok)
            } else {
                None
            }
        })
        .collect()
}

pub fn series_tokens(series: &str) -> Vec<String> {
    variation_tokens(series, IGNORE_SERIES_WORDS)
}

pub fn publisher_tokens(publisher: &str) -> Vec<String> {
    variation_tokens(publisher, IGNORE_PUBLISHER_WORDS)
}

pub fn tag_tokens(tag: &str) -> Vec<String> {
    variation_tokens(tag, IGNORE_TAG_WORDS)
}

/// Normalize an author name from the library store: the store keeps `|`
/// where a comma belongs inside a single name.
pub fn clean_author_name(name: &str) -> String {
    name.trim().replace('|', ",")
}
