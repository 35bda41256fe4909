//! Text normalization for embedding input.
//!
//! Turns raw note or page text into bounded chunks:
//! 1. Strip markup (HTML tags, markdown decoration)
//! 2. Collapse whitespace, keeping line breaks as hard sentence boundaries
//! 3. Split into sentences
//! 4. Pack sentences into chunks of at most `max_chunk_tokens` tokens
//!
//! Tokens are approximated by whitespace-separated words.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde::Serialize;

/// Default chunk budget in (approximate) tokens.
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 500;

/// Comments and common tags. Attributes must be `name=value` pairs, so text
/// like `a<b and c>d` does not match.
static HTML_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)<!--.*?-->|</?(?:a|abbr|article|aside|b|blockquote|body|br|code|del|div|em|figcaption|figure|footer|h[1-6]|head|header|hr|html|i|img|ins|li|main|mark|nav|noscript|ol|p|pre|s|script|section|small|span|strong|style|sub|sup|table|tbody|td|template|th|thead|tr|u|ul)(?:\s+[a-z_:][-a-z0-9_:.]*\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'>]+))*\s*/?>"#,
    )
    .expect("valid html tag regex")
});
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("valid link regex"));
static MD_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").expect("valid heading regex"));
static MD_LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:[-+*]|\d+[.)])[ \t]+").expect("valid list regex"));
static MD_BLOCKQUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]?").expect("valid quote regex"));
/// Emphasis markers hugging a word on both sides: `*a*`, `**a b**`, `~~a~~`.
static MD_EMPHASIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\B(?:\*{1,3}|~~)(\S(?:[^*~\n]*?\S)?)(?:\*{1,3}|~~)\B")
        .expect("valid emphasis regex")
});
static MD_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`{1,3}").expect("valid code regex"));

/// Bounded-size segment of a note, ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Note the chunk was derived from
    pub note_id: String,
    /// Position of the chunk within its note (0-based)
    pub index: usize,
    /// Cleaned text with original casing
    pub text: String,
    /// Lowercased copy used for term comparison
    pub comparison_text: String,
    /// Approximate token count of `text`
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Splits raw text into sentence-aligned chunks.
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_chunk_tokens: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_TOKENS)
    }
}

impl Normalizer {
    pub fn new(max_chunk_tokens: usize) -> Self {
        Self {
            max_chunk_tokens: max_chunk_tokens.max(1),
        }
    }

    pub fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens
    }

    /// Normalize `raw` into chunks owned by `note_id`.
    ///
    /// Chunk boundaries fall between sentences. A sentence longer than the
    /// budget is hard-split on word boundaries as a last resort.
    pub fn normalize(&self, note_id: &str, raw: &str) -> Result<Vec<Chunk>, NormalizeError> {
        if raw.trim().is_empty() {
            return Err(NormalizeError::InvalidInput("text is empty".to_string()));
        }

        let cleaned = clean_text(raw);
        let sentences = split_sentences(&cleaned);
        if sentences.is_empty() {
            return Err(NormalizeError::InvalidInput(
                "no extractable text after cleaning".to_string(),
            ));
        }

        let mut texts: Vec<String> = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_tokens = 0;

        for sentence in sentences {
            let tokens = count_tokens(sentence);

            if tokens > self.max_chunk_tokens {
                if !current.is_empty() {
                    texts.push(current.join(" "));
                    current.clear();
                    current_tokens = 0;
                }
                texts.extend(hard_split(sentence, self.max_chunk_tokens));
                continue;
            }

            if current_tokens + tokens > self.max_chunk_tokens && !current.is_empty() {
                texts.push(current.join(" "));
                current.clear();
                current_tokens = 0;
            }

            current.push(sentence);
            current_tokens += tokens;
        }

        if !current.is_empty() {
            texts.push(current.join(" "));
        }

        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                note_id: note_id.to_string(),
                index,
                comparison_text: text.to_lowercase(),
                token_count: count_tokens(&text),
                text,
            })
            .collect())
    }
}

/// Strip markup and collapse whitespace.
///
/// Line breaks survive (collapsed to a single `\n`) because they separate
/// list items and paragraphs that often lack terminal punctuation.
pub fn clean_text(raw: &str) -> String {
    let text = if HTML_TAG.is_match(raw) {
        html_text(raw)
    } else {
        raw.to_string()
    };

    let text = MD_LINK.replace_all(&text, "$1");
    let text = MD_HEADING.replace_all(&text, "");
    let text = MD_LIST_MARKER.replace_all(&text, "");
    let text = MD_BLOCKQUOTE.replace_all(&text, "");
    let text = MD_EMPHASIS.replace_all(&text, "$1");
    let text = MD_CODE.replace_all(&text, "");

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract visible text from an HTML fragment, skipping script and style bodies.
fn html_text(raw: &str) -> String {
    const BLOCK_ELEMENTS: &[&str] = &[
        "p", "div", "br", "li", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "blockquote", "pre",
        "section", "article",
    ];
    const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

    let fragment = Html::parse_fragment(raw);
    let mut out = String::new();

    for node in fragment.root_element().descendants() {
        if let Some(element) = node.value().as_element() {
            if BLOCK_ELEMENTS.contains(&element.name()) {
                out.push('\n');
            }
            continue;
        }

        let Some(text) = node.value().as_text() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|e| HIDDEN_ELEMENTS.contains(&e.name()))
                .unwrap_or(false)
        });
        if !hidden {
            out.push_str(&text.text);
        }
    }

    out
}

/// Split cleaned text into trimmed, non-empty sentences.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201d}', '\u{2019}'];

    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let end = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => {
                let mut end = i + c.len_utf8();
                while let Some(&(j, next)) = chars.peek() {
                    if matches!(next, '.' | '!' | '?') || CLOSERS.contains(&next) {
                        end = j + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                match chars.peek() {
                    None => Some(end),
                    Some(&(_, next)) if next.is_whitespace() => Some(end),
                    _ => None,
                }
            }
            _ => None,
        };

        if let Some(end) = end {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    sentences
}

/// Approximate token count: whitespace-separated words.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split an oversized sentence into word groups of at most `budget` tokens.
fn hard_split(sentence: &str, budget: usize) -> Vec<String> {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    words.chunks(budget).map(|group| group.join(" ")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_rejected() {
        let normalizer = Normalizer::default();
        assert!(matches!(
            normalizer.normalize("n1", ""),
            Err(NormalizeError::InvalidInput(_))
        ));
        assert!(matches!(
            normalizer.normalize("n1", "  \n\t "),
            Err(NormalizeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_markup_only_rejected() {
        let normalizer = Normalizer::default();
        let result = normalizer.normalize("n1", "<div><span></span></div>");
        assert!(matches!(result, Err(NormalizeError::InvalidInput(_))));
    }

    #[test]
    fn test_strips_html_and_scripts() {
        let cleaned = clean_text(
            "<p>Hello <b>world</b>.</p><script>var x = 1;</script><p>Second line</p>",
        );
        assert_eq!(cleaned, "Hello world.\nSecond line");
    }

    #[test]
    fn test_strips_markdown_decoration() {
        let cleaned = clean_text("# Title\n\n- **bold** item\n- see [docs](https://x.y)\n> quoted `code`");
        assert_eq!(cleaned, "Title\nbold item\nsee docs\nquoted code");
    }

    #[test]
    fn test_plain_comparisons_are_not_markup() {
        assert_eq!(clean_text("if a<b and c>d then swap"), "if a<b and c>d then swap");
        assert_eq!(clean_text("x < y > z"), "x < y > z");
    }

    #[test]
    fn test_only_paired_emphasis_is_stripped() {
        assert_eq!(
            clean_text("2*3 = 6, a * b, *really* and ~~gone~~ or ***very much***"),
            "2*3 = 6, a * b, really and gone or very much"
        );
        assert_eq!(clean_text(r#"<a href="https://x.y" class=link>Docs</a>"#), "Docs");
    }

    #[test]
    fn test_preserves_casing_and_lowercases_comparison_copy() {
        let chunks = Normalizer::default()
            .normalize("n1", "Rust Ownership Rules.")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Rust Ownership Rules.");
        assert_eq!(chunks[0].comparison_text, "rust ownership rules.");
        assert_eq!(chunks[0].token_count, 3);
        assert_eq!(chunks[0].note_id, "n1");
    }

    #[test]
    fn test_splits_at_sentence_boundaries() {
        let normalizer = Normalizer::new(5);
        let chunks = normalizer
            .normalize("n1", "One two three. Four five six. Seven eight.")
            .unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["One two three.", "Four five six. Seven eight."]);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[1].index, 1);
        assert!(chunks.iter().all(|c| c.token_count <= 5));
    }

    #[test]
    fn test_hard_splits_oversized_sentence() {
        let normalizer = Normalizer::new(4);
        let sentence = "a b c d e f g h i j";
        let chunks = normalizer.normalize("n1", sentence).unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c d", "e f g h", "i j"]);
    }

    #[test]
    fn test_oversized_sentence_flushes_pending_chunk() {
        let normalizer = Normalizer::new(3);
        let chunks = normalizer
            .normalize("n1", "Short one. w1 w2 w3 w4 w5. Tail.")
            .unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Short one.", "w1 w2 w3", "w4 w5.", "Tail."]);
    }

    #[test]
    fn test_sentence_split_handles_quotes_and_decimals() {
        let sentences = split_sentences("He said \"stop.\" Pi is 3.14 roughly! Done");
        assert_eq!(sentences, vec!["He said \"stop.\"", "Pi is 3.14 roughly!", "Done"]);
    }

    #[test]
    fn test_deterministic() {
        let normalizer = Normalizer::new(8);
        let text = "<h1>Notes</h1><p>First idea here. Second idea follows! And a third?</p>";
        let a = normalizer.normalize("n1", text).unwrap();
        let b = normalizer.normalize("n1", text).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unicode_text() {
        let chunks = Normalizer::default()
            .normalize("n1", "日本語のメモ。 Ünïcödé works.")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Ünïcödé"));
    }
}
