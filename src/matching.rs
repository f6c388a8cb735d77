//! Match-key builders.
//!
//! Each keyed field (title, author, series, publisher, tags) has up to
//! four policies of increasing aggressiveness. Books whose keys collide
//! become candidates for the same duplicate group.

use crate::models::{ItemField, MatchPolicy, SoundexLengths};
use crate::normalize::{
    author_tokens, fold, fuzzy_normalize, publisher_tokens, series_tokens, tag_tokens,
    title_tokens,
};
use crate::soundex::{soundex, DEFAULT_LENGTH};

/// Key pair produced by the author builders.
///
/// `reversed` (when present and different) is keyed as well, which is how
/// "Kevin J Anderson" meets "Anderson, Kevin J" without a pairwise scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorKey {
    pub primary: String,
    pub reversed: Option<String>,
}

impl AuthorKey {
    fn single(primary: String) -> Self {
        Self {
            primary,
            reversed: None,
        }
    }
}

fn with_lang(lang: Option<&str>, key: String) -> String {
    match lang {
        Some(lang) => format!("{lang}{key}"),
        None => key,
    }
}

/// Exact title key, case-insensitive.
pub fn identical_title_key(title: &str, lang: Option<&str>) -> String {
    with_lang(lang, title.to_lowercase())
}

/// Normalized title key: folds accents, drops a leading article and
/// punctuation, collapses whitespace.
pub fn similar_title_key(title: &str, lang: Option<&str>) -> String {
    with_lang(lang, fuzzy_normalize(&fold(title)))
}

/// Phonetic title key over the "similar" normalization.
pub fn soundex_title_key(title: &str, lang: Option<&str>, length: usize) -> String {
    with_lang(lang, soundex(&similar_title_key(title, None), length))
}

/// Aggressive title key: tokenize, truncate at the first trailing
/// conjunct ("and", "or", "aka", "&"), concatenate.
pub fn fuzzy_title_key(title: &str, lang: Option<&str>) -> String {
    let mut tokens = title_tokens(title);
    if let Some(idx) = tokens
        .iter()
        .skip(1)
        .position(|tok| matches!(tok.as_str(), "&" | "and" | "or" | "aka"))
    {
        tokens.truncate(idx + 1);
    }
    with_lang(lang, tokens.concat())
}

/// Exact author key, case-insensitive.
pub fn identical_author_key(author: &str) -> AuthorKey {
    AuthorKey::single(author.to_lowercase())
}

/// Normalized author key handling "First Last" vs "Last, First": drops
/// initials, joins tokens, and also produces the rotated-order key.
pub fn similar_author_key(author: &str) -> AuthorKey {
    let tokens = author_tokens(author, true);
    let primary = tokens.join(" ");
    let reversed = if tokens.len() > 1 {
        let mut rotated = tokens;
        rotated.rotate_left(1);
        Some(rotated.join(" "))
    } else {
        None
    };
    AuthorKey { primary, reversed }
}

/// Phonetic author key. The surname moves to the front so the soundex
/// code focuses on it; the unrotated order is keyed as the alternate.
pub fn soundex_author_key(author: &str, length: usize) -> AuthorKey {
    let tokens = author_tokens(author, false);
    if tokens.len() <= 1 {
        return AuthorKey::single(soundex(&tokens.concat(), DEFAULT_LENGTH));
    }

    let mut surname_first = Vec::with_capacity(tokens.len());
    surname_first.push(tokens[tokens.len() - 1].clone());
    surname_first.extend_from_slice(&tokens[..tokens.len() - 1]);

    AuthorKey {
        primary: soundex(&surname_first.concat(), length),
        reversed: Some(soundex(&tokens.concat(), length)),
    }
}

/// Aggressive author key: first initial plus surname, so that
/// "Kevin J. Anderson" meets "K. Anderson".
pub fn fuzzy_author_key(author: &str) -> AuthorKey {
    let tokens = author_tokens(author, false);
    match tokens.len() {
        0 => AuthorKey::single(String::new()),
        1 => AuthorKey::single(tokens[0].clone()),
        _ => {
            // "A. Bronte" must key as "abronte", not "ba".
            let mut key = String::new();
            if let Some(initial) = tokens[0].chars().next() {
                key.push(initial);
            }
            key.push_str(&tokens[tokens.len() - 1]);
            AuthorKey::single(key)
        }
    }
}

/// Build the title key for a policy. [`MatchPolicy::Ignore`] yields an
/// empty key; the finder rejects it before getting here.
pub fn title_key(
    policy: MatchPolicy,
    title: &str,
    lang: Option<&str>,
    lengths: &SoundexLengths,
) -> String {
    match policy {
        MatchPolicy::Identical => identical_title_key(title, lang),
        MatchPolicy::Similar => similar_title_key(title, lang),
        MatchPolicy::Soundex => soundex_title_key(title, lang, lengths.title),
        MatchPolicy::Fuzzy => fuzzy_title_key(title, lang),
        MatchPolicy::Ignore => String::new(),
    }
}

/// Build the author key pair for a policy.
pub fn author_key(policy: MatchPolicy, author: &str, lengths: &SoundexLengths) -> AuthorKey {
    match policy {
        MatchPolicy::Identical => identical_author_key(author),
        MatchPolicy::Similar => similar_author_key(author),
        MatchPolicy::Soundex => soundex_author_key(author, lengths.author),
        MatchPolicy::Fuzzy => fuzzy_author_key(author),
        MatchPolicy::Ignore => AuthorKey::single(String::new()),
    }
}

fn joined_variation_key(tokens: &[String]) -> String {
    tokens.join(" ")
}

fn soundex_variation_key(tokens: &[String], length: usize) -> String {
    if tokens.len() <= 1 {
        soundex(&tokens.concat(), DEFAULT_LENGTH)
    } else {
        soundex(&tokens.concat(), length)
    }
}

fn first_token_key(tokens: &[String]) -> String {
    tokens.first().cloned().unwrap_or_default()
}

// Single-letter publishers ("O Books") keep their second word.
fn fuzzy_publisher_key(tokens: &[String]) -> String {
    let Some(first) = tokens.first() else {
        return String::new();
    };
    if first.chars().count() > 1 || tokens.len() == 1 {
        first.clone()
    } else {
        tokens[..2].join(" ")
    }
}

/// Build a variation key for series, publisher, or tag names. The author
/// field goes through [`author_key`] instead, which produces a key pair.
pub fn variation_key(
    policy: MatchPolicy,
    field: ItemField,
    name: &str,
    lengths: &SoundexLengths,
) -> String {
    let (tokens, length) = match field {
        ItemField::Series => (series_tokens(name), lengths.series),
        ItemField::Publisher => (publisher_tokens(name), lengths.publisher),
        ItemField::Tags => (tag_tokens(name), lengths.tags),
        // Callers route authors through author_key; treat the name as a
        // plain token stream if one slips through.
        ItemField::Authors => (author_tokens(name, false), lengths.author),
    };

    match policy {
        MatchPolicy::Identical => name.to_lowercase(),
        MatchPolicy::Similar => joined_variation_key(&tokens),
        MatchPolicy::Soundex => soundex_variation_key(&tokens, length),
        MatchPolicy::Fuzzy => {
            if field == ItemField::Publisher {
                fuzzy_publisher_key(&tokens)
            } else {
                first_token_key(&tokens)
            }
        }
        MatchPolicy::Ignore => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths() -> SoundexLengths {
        SoundexLengths::default()
    }

    fn titles_match(policy: MatchPolicy, a: &str, b: &str) -> bool {
        title_key(policy, a, None, &lengths()) == title_key(policy, b, None, &lengths())
    }

    // An author pair matches when any key of one equals any key of the other.
    fn authors_match(policy: MatchPolicy, a: &str, b: &str) -> bool {
        let ka = author_key(policy, a, &lengths());
        let kb = author_key(policy, b, &lengths());
        let b_keys = [Some(kb.primary.clone()), kb.reversed.clone()];
        b_keys.contains(&Some(ka.primary.clone()))
            || ka
                .reversed
                .map_or(false, |rev| b_keys.contains(&Some(rev)))
    }

    #[test]
    fn test_identical_title() {
        assert!(titles_match(
            MatchPolicy::Identical,
            "The Martian Way",
            "the martian way"
        ));
        assert!(!titles_match(
            MatchPolicy::Identical,
            "The Martian Way",
            "Martian Way"
        ));
        assert!(!titles_match(
            MatchPolicy::Identical,
            "China Miéville",
            "China Mieville"
        ));
    }

    #[test]
    fn test_similar_title() {
        assert!(titles_match(
            MatchPolicy::Similar,
            "The Martian Way",
            "the martian way"
        ));
        assert!(titles_match(
            MatchPolicy::Similar,
            "The Martian Way",
            "Martian Way"
        ));
        assert!(titles_match(
            MatchPolicy::Similar,
            "China Miéville",
            "China Mieville"
        ));
        assert!(!titles_match(
            MatchPolicy::Similar,
            "The Martian Way",
            "The Martain Way"
        ));
    }

    #[test]
    fn test_soundex_title() {
        assert!(titles_match(
            MatchPolicy::Soundex,
            "The Martian Way",
            "The Martain Way"
        ));
        assert!(titles_match(MatchPolicy::Soundex, "Angel", "Angle"));
        assert!(titles_match(
            MatchPolicy::Soundex,
            "China Miéville",
            "China Mieville"
        ));
    }

    #[test]
    fn test_fuzzy_title() {
        assert!(titles_match(
            MatchPolicy::Fuzzy,
            "The Martian Way",
            "The Martian Way (Foo)"
        ));
        assert!(titles_match(
            MatchPolicy::Fuzzy,
            "The Martian Way",
            "The Martian Way and Other Stories"
        ));
        assert!(titles_match(
            MatchPolicy::Fuzzy,
            "China Miéville",
            "China Mieville"
        ));
        assert!(!titles_match(
            MatchPolicy::Fuzzy,
            "The Martian Way",
            "The Martain Way"
        ));
    }

    #[test]
    fn test_fuzzy_title_keeps_leading_conjunct() {
        // "and" in first position is not a trailing conjunct.
        assert_eq!(fuzzy_title_key("And Then There Were None", None), "andthentherewerenone");
    }

    #[test]
    fn test_title_language_prefix() {
        let en = title_key(MatchPolicy::Similar, "The Martian Way", Some("eng"), &lengths());
        let fr = title_key(MatchPolicy::Similar, "The Martian Way", Some("fra"), &lengths());
        assert_ne!(en, fr);
        assert!(en.starts_with("eng"));
    }

    #[test]
    fn test_identical_author() {
        assert!(authors_match(
            MatchPolicy::Identical,
            "Kevin J. Anderson",
            "Kevin j. Anderson"
        ));
        assert!(!authors_match(
            MatchPolicy::Identical,
            "Kevin J. Anderson",
            "Kevin J Anderson"
        ));
    }

    #[test]
    fn test_similar_author() {
        assert!(authors_match(
            MatchPolicy::Similar,
            "Kevin J. Anderson",
            "Kevin J Anderson"
        ));
        assert!(authors_match(
            MatchPolicy::Similar,
            "Kevin J. Anderson",
            "Anderson, Kevin J."
        ));
        assert!(authors_match(
            MatchPolicy::Similar,
            "China Miéville",
            "China Mieville"
        ));
    }

    #[test]
    fn test_soundex_author() {
        assert!(authors_match(
            MatchPolicy::Soundex,
            "Kevin J. Anderson",
            "Keven J. Andersan"
        ));
        assert!(authors_match(
            MatchPolicy::Soundex,
            "China Miéville",
            "China Mieville"
        ));
    }

    #[test]
    fn test_fuzzy_author() {
        assert!(authors_match(
            MatchPolicy::Fuzzy,
            "Kevin J. Anderson",
            "K. Anderson"
        ));
        assert!(authors_match(
            MatchPolicy::Fuzzy,
            "China Miéville",
            "China Mieville"
        ));
        assert!(!authors_match(MatchPolicy::Fuzzy, "A. Brown", "A. Bronte"));
    }

    #[test]
    fn test_fuzzy_author_single_and_empty() {
        assert_eq!(fuzzy_author_key("Homer"), AuthorKey::single("homer".into()));
        assert_eq!(fuzzy_author_key(""), AuthorKey::single(String::new()));
    }

    #[test]
    fn test_series_variations() {
        let key = |policy, name| variation_key(policy, ItemField::Series, name, &lengths());
        assert_eq!(
            key(MatchPolicy::Similar, "China Miéville"),
            key(MatchPolicy::Similar, "China Mieville")
        );
        assert_eq!(
            key(MatchPolicy::Soundex, "Angel"),
            key(MatchPolicy::Soundex, "Angle")
        );
        assert_eq!(key(MatchPolicy::Fuzzy, "China Miéville"), "china");
    }

    #[test]
    fn test_publisher_variations() {
        let key = |policy, name| variation_key(policy, ItemField::Publisher, name, &lengths());
        assert_eq!(
            key(MatchPolicy::Similar, "Random House"),
            key(MatchPolicy::Similar, "Random House Inc")
        );
        assert_eq!(
            key(MatchPolicy::Soundex, "Angel"),
            key(MatchPolicy::Soundex, "Angle")
        );
        assert_eq!(key(MatchPolicy::Fuzzy, "Random House Inc"), "random");
        assert_eq!(key(MatchPolicy::Fuzzy, "O Books"), "o books");
    }

    #[test]
    fn test_tags_soundex_uses_tags_length() {
        let key = variation_key(
            MatchPolicy::Soundex,
            ItemField::Tags,
            "science fiction",
            &lengths(),
        );
        assert_eq!(key.len(), lengths().tags);
    }

    #[test]
    fn test_soundex_author_single_token_uses_default_length() {
        let key = soundex_author_key("Homer", 8);
        assert_eq!(key.primary.len(), DEFAULT_LENGTH);
        assert!(key.reversed.is_none());
    }
}
