//! Bounded context assembly for the generation provider.
//!
//! Layout of a payload, in order:
//! - the page the user is looking at (always kept; truncated only when it
//!   alone exceeds the budget)
//! - note excerpts in rank order, whole sentences only
//! - the most recent prior turns that still fit, oldest first
//!
//! The budget counts characters of excerpt text; labels added by
//! [`ContextPayload::render`] are not counted.

use serde::Serialize;

use crate::semantic::generation::{Role, Turn};
use crate::semantic::preprocess::split_sentences;
use crate::semantic::ranker::RankedResult;

/// Default context budget in characters.
pub const DEFAULT_CONTEXT_CHARS: usize = 6000;

/// Where an excerpt came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExcerptSource {
    PageContext,
    Note { note_id: String, chunk_index: usize },
    PriorTurn { role: Role },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextExcerpt {
    pub source: ExcerptSource,
    pub text: String,
    /// True when `text` is a prefix of the original excerpt
    pub truncated: bool,
}

/// Size-bounded, ordered context handed to the generation provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextPayload {
    pub excerpts: Vec<ContextExcerpt>,
    pub budget: usize,
}

impl ContextPayload {
    pub fn is_empty(&self) -> bool {
        self.excerpts.is_empty()
    }

    /// Characters used by excerpt text.
    pub fn total_chars(&self) -> usize {
        self.excerpts.iter().map(|e| e.text.chars().count()).sum()
    }

    /// `(note_id, chunk_index)` for every note excerpt, in payload order.
    pub fn provenance(&self) -> Vec<(&str, usize)> {
        self.excerpts
            .iter()
            .filter_map(|e| match &e.source {
                ExcerptSource::Note {
                    note_id,
                    chunk_index,
                } => Some((note_id.as_str(), *chunk_index)),
                _ => None,
            })
            .collect()
    }

    /// Plain-text rendering with one labelled block per excerpt.
    pub fn render(&self) -> String {
        self.excerpts
            .iter()
            .map(|e| {
                let label = match &e.source {
                    ExcerptSource::PageContext => "[current page]".to_string(),
                    ExcerptSource::Note {
                        note_id,
                        chunk_index,
                    } => format!("[note {}#{}]", note_id, chunk_index),
                    ExcerptSource::PriorTurn { role } => format!("[{}]", role),
                };
                format!("{}\n{}", label, e.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_CHARS)
    }
}

impl ContextAssembler {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Build a payload from ranked results plus optional page and chat context.
    pub fn build(
        &self,
        ranked: &[RankedResult],
        page_context: Option<&str>,
        prior_turns: &[Turn],
    ) -> ContextPayload {
        let mut excerpts = Vec::new();
        let mut remaining = self.max_chars;

        if let Some(page) = page_context.map(str::trim).filter(|p| !p.is_empty()) {
            if remaining > 0 {
                let (text, truncated) = fit_page(page, remaining);
                remaining -= text.chars().count();
                excerpts.push(ContextExcerpt {
                    source: ExcerptSource::PageContext,
                    text,
                    truncated,
                });
            }
        }

        for result in ranked {
            let excerpt = result.excerpt.trim();
            if excerpt.is_empty() {
                continue;
            }

            let source = ExcerptSource::Note {
                note_id: result.note_id.clone(),
                chunk_index: result.best_chunk_index,
            };

            let length = excerpt.chars().count();
            if length <= remaining {
                remaining -= length;
                excerpts.push(ContextExcerpt {
                    source,
                    text: excerpt.to_string(),
                    truncated: false,
                });
                continue;
            }

            if let Some(prefix) = sentence_prefix(excerpt, remaining) {
                remaining -= prefix.chars().count();
                excerpts.push(ContextExcerpt {
                    source,
                    text: prefix,
                    truncated: true,
                });
            }
            break;
        }

        let mut turns = Vec::new();
        for turn in prior_turns.iter().rev() {
            let content = turn.content.trim();
            let length = content.chars().count();
            if content.is_empty() {
                continue;
            }
            if length > remaining {
                break;
            }
            remaining -= length;
            turns.push(ContextExcerpt {
                source: ExcerptSource::PriorTurn { role: turn.role },
                text: content.to_string(),
                truncated: false,
            });
        }
        turns.reverse();
        excerpts.extend(turns);

        ContextPayload {
            excerpts,
            budget: self.max_chars,
        }
    }
}

/// Longest run of leading whole sentences that fits in `limit` characters.
fn sentence_prefix(text: &str, limit: usize) -> Option<String> {
    let mut prefix = String::new();
    let mut length = 0;

    for sentence in split_sentences(text) {
        let separator = usize::from(!prefix.is_empty());
        let added = separator + sentence.chars().count();
        if length + added > limit {
            break;
        }
        if separator == 1 {
            prefix.push(' ');
        }
        prefix.push_str(sentence);
        length += added;
    }

    (!prefix.is_empty()).then_some(prefix)
}

/// Page context always survives: whole sentences when possible, otherwise a
/// hard cut at the last word boundary within the limit.
fn fit_page(page: &str, limit: usize) -> (String, bool) {
    if page.chars().count() <= limit {
        return (page.to_string(), false);
    }

    if let Some(prefix) = sentence_prefix(page, limit) {
        return (prefix, true);
    }

    let cut: String = page.chars().take(limit).collect();
    let text = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => cut[..pos].trim_end().to_string(),
        _ => cut,
    };
    (text, true)
}
