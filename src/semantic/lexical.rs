//! Keyword helpers for topic matching.
//!
//! Ranking itself is purely vector based; these helpers explain *why* a note
//! matched by intersecting its tags with the terms of the query.
//!
//! Tags may be hierarchical (`programming/rust`). A tag matches when every
//! term of at least one of its path segments appears in the query.

use std::collections::BTreeSet;

/// Tokenize text into lowercase terms.
/// Filters out very short terms (1 char) and common stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being",
        "in", "on", "at", "to", "for", "of", "with", "by", "from", "as",
        "and", "or", "but", "not", "no", "so", "if", "then",
    ];

    text.split(|c: char| !c.is_alphanumeric())
        .map(|s| s.to_lowercase())
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .collect()
}

/// Build the topic set for a query: explicit topics plus the query's own terms.
pub fn query_topics<'a>(
    text: &str,
    explicit: impl IntoIterator<Item = &'a String>,
) -> BTreeSet<String> {
    let mut topics: BTreeSet<String> = tokenize(text).into_iter().collect();
    for topic in explicit {
        topics.extend(tokenize(topic));
    }
    topics
}

/// Tags of a note that are covered by `topics`, in their original spelling.
pub fn matched_topics(tags: &BTreeSet<String>, topics: &BTreeSet<String>) -> BTreeSet<String> {
    if topics.is_empty() {
        return BTreeSet::new();
    }

    tags.iter()
        .filter(|tag| tag_matches(tag, topics))
        .cloned()
        .collect()
}

fn tag_matches(tag: &str, topics: &BTreeSet<String>) -> bool {
    tag.split('/').any(|segment| {
        let terms = tokenize(segment);
        !terms.is_empty() && terms.iter().all(|term| topics.contains(term))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_filters_stop_words_and_short_terms() {
        assert_eq!(
            tokenize("The Rust book, a guide to x"),
            vec!["rust", "book", "guide"]
        );
    }

    #[test]
    fn test_tokenize_unicode() {
        assert_eq!(tokenize("Über café"), vec!["über", "café"]);
    }

    #[test]
    fn test_query_topics_merges_explicit() {
        let explicit = vec!["Machine-Learning".to_string()];
        let topics = query_topics("neural networks", &explicit);
        assert_eq!(topics, set(&["learning", "machine", "networks", "neural"]));
    }

    #[test]
    fn test_matched_topics_requires_all_segment_terms() {
        let tags = set(&["neural networks", "neural-cooking", "Rust"]);
        let topics = set(&["neural", "networks", "rust"]);

        assert_eq!(matched_topics(&tags, &topics), set(&["Rust", "neural networks"]));
    }

    #[test]
    fn test_matched_topics_hierarchical_tag() {
        let tags = set(&["programming/rust"]);
        assert_eq!(
            matched_topics(&tags, &set(&["programming"])),
            set(&["programming/rust"])
        );
        assert!(matched_topics(&tags, &set(&["python"])).is_empty());
    }

    #[test]
    fn test_matched_topics_empty_topics() {
        let tags = set(&["rust"]);
        assert!(matched_topics(&tags, &BTreeSet::new()).is_empty());
    }
}
