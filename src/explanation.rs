//! Explanation text for resolved questions.
//!
//! Indices in the text are 1-based *display* positions, while correctness is
//! always looked up against canonical option ids.

use crate::error::SessionError;
use crate::models::{Question, QuizOption};
use crate::shuffle::is_finalized;
use dashmap::DashMap;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

static FORMATTED_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*Options? \d+(?:(?:, \d+)* and \d+)? (?:is|are) correct because\s*")
        .expect("explanation prefix pattern must compile")
});

/// Removes any "Option(s) .. correct because" prefixes already applied.
pub fn strip_formatted_prefix(raw: &str) -> &str {
    let mut body = raw;
    while let Some(found) = FORMATTED_PREFIX.find(body) {
        body = &body[found.end()..];
    }
    body.trim()
}

pub fn format_explanation(display_indices: &[usize], raw: &str) -> String {
    let body = strip_formatted_prefix(raw);
    let mut indices = display_indices.to_vec();
    indices.sort_unstable();
    indices.dedup();

    match indices.as_slice() {
        [] => body.to_string(),
        [only] => format!("Option {only} is correct because {body}"),
        [head @ .., last] => {
            let head = head
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("Options {head} and {last} are correct because {body}")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectnessTier {
    CanonicalFlags,
    AnswerText,
    DisplayFlags,
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 1-based display positions of the correct options.
///
/// Tiers are tried in order and the first non-empty one wins:
/// canonical flags joined by option id, then the question-level answer texts,
/// then the flags carried by the display options themselves (only when no
/// display option can be joined to the question).
pub fn resolve_correct_indices(
    question: &Question,
    display_options: &[QuizOption],
) -> Result<Option<(CorrectnessTier, Vec<usize>)>, SessionError> {
    let foreign = display_options
        .iter()
        .any(|o| is_finalized(o.option_id) && question.option(o.option_id).is_none());
    if foreign {
        return Err(SessionError::ForeignOptions {
            question_id: question.id,
        });
    }

    let joinable = display_options
        .iter()
        .any(|o| question.option(o.option_id).is_some());

    let by_flags: Vec<usize> = if joinable {
        display_options
            .iter()
            .enumerate()
            .filter(|(_, o)| question.option(o.option_id).is_some_and(|c| c.correct))
            .map(|(pos, _)| pos + 1)
            .collect()
    } else {
        Vec::new()
    };

    let answers: HashSet<String> = question.answers.iter().map(|a| normalize_text(a)).collect();
    let by_text: Vec<usize> = display_options
        .iter()
        .enumerate()
        .filter(|(_, o)| answers.contains(&normalize_text(&o.text)))
        .map(|(pos, _)| pos + 1)
        .collect();

    if !by_flags.is_empty() {
        if !by_text.is_empty() && by_text != by_flags {
            warn!(
                question_id = question.id,
                ?by_flags,
                ?by_text,
                "answer text disagrees with option flags, using option flags"
            );
        }
        return Ok(Some((CorrectnessTier::CanonicalFlags, by_flags)));
    }
    if !by_text.is_empty() {
        return Ok(Some((CorrectnessTier::AnswerText, by_text)));
    }
    if !joinable {
        let raw: Vec<usize> = display_options
            .iter()
            .enumerate()
            .filter(|(_, o)| o.correct)
            .map(|(pos, _)| pos + 1)
            .collect();
        if !raw.is_empty() {
            return Ok(Some((CorrectnessTier::DisplayFlags, raw)));
        }
    }
    Ok(None)
}

#[derive(Debug, Clone)]
pub struct ExplanationRequest {
    pub question: Arc<Question>,
    pub display_options: Vec<QuizOption>,
}

/// Synchronous core of formatting. Zero resolvable correct options renders the
/// raw explanation without a prefix.
pub fn build_explanation(request: &ExplanationRequest) -> Result<String, SessionError> {
    let question = &request.question;
    match resolve_correct_indices(question, &request.display_options)? {
        Some((tier, indices)) => {
            debug!(question_id = question.id, ?tier, ?indices, "resolved correct options");
            Ok(format_explanation(&indices, &question.raw_explanation))
        }
        None => {
            let err = SessionError::AmbiguousCorrectness {
                question_id: question.id,
            };
            warn!(code = err.code(), "{}", err);
            Ok(strip_formatted_prefix(&question.raw_explanation).to_string())
        }
    }
}

pub trait ExplanationFormatter: Send + Sync {
    fn format(&self, request: ExplanationRequest) -> BoxFuture<'static, Result<String, SessionError>>;
}

/// Waits one frame before formatting so a pending visual reset can settle.
#[derive(Debug, Clone)]
pub struct FrameDelayedFormatter {
    pub frame: Duration,
}

impl FrameDelayedFormatter {
    pub fn new(frame: Duration) -> Self {
        Self { frame }
    }
}

impl ExplanationFormatter for FrameDelayedFormatter {
    fn format(&self, request: ExplanationRequest) -> BoxFuture<'static, Result<String, SessionError>> {
        let frame = self.frame;
        Box::pin(async move {
            if frame.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(frame).await;
            }
            build_explanation(&request)
        })
    }
}

/// Formatted explanations keyed by canonical question index. An entry, once
/// stored, is locked against non-forced overwrites.
#[derive(Debug, Default)]
pub struct ExplanationCache {
    entries: DashMap<usize, String>,
}

impl ExplanationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, canonical_index: usize) -> Option<String> {
        self.entries.get(&canonical_index).map(|e| e.value().clone())
    }

    pub fn store(&self, canonical_index: usize, text: String, force: bool) -> bool {
        if !force && self.entries.contains_key(&canonical_index) {
            debug!(canonical_index, "explanation already cached, keeping locked entry");
            return false;
        }
        self.entries.insert(canonical_index, text);
        true
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
