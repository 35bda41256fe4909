//! Semantic recall for personal notes.
//!
//! Notes are chunked, embedded and indexed per owner; related notes are
//! surfaced by similarity blended with recency and can be packed into a
//! bounded context for a chat model.

pub mod config;
pub mod eid;
pub mod notes;
pub mod semantic;

#[cfg(test)]
mod tests;
