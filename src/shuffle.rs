//! Option identity and display-order mapping.
//!
//! Scoring and explanations always work on canonical identities. What the user
//! sees is a permutation of those, generated once per session and memoized by
//! quiz id. Shuffle disabled is the identity permutation.

use crate::models::{Question, QuizOption};
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Option ids at or above this value are final and never reassigned.
pub const FINALIZED_ID_THRESHOLD: u64 = 1_000_000;
pub const MAX_OPTIONS_PER_QUESTION: usize = 1_000;

pub fn synthesize_option_id(question_index: usize, position: usize) -> u64 {
    FINALIZED_ID_THRESHOLD
        + question_index as u64 * MAX_OPTIONS_PER_QUESTION as u64
        + position as u64
}

pub fn is_finalized(option_id: u64) -> bool {
    option_id >= FINALIZED_ID_THRESHOLD
}

/// Idempotent: finalized ids are kept, the rest are derived from
/// `(question_index, position)` so they are unique across the quiz.
pub fn assign_option_ids(options: Vec<QuizOption>, question_index: usize) -> Vec<QuizOption> {
    options
        .into_iter()
        .enumerate()
        .map(|(position, mut option)| {
            if !is_finalized(option.option_id) {
                option.option_id = synthesize_option_id(question_index, position);
            }
            option
        })
        .collect()
}

/// `display -> canonical` with its inverse kept alongside for O(1) lookups
/// both ways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct Permutation {
    forward: Vec<usize>,
    inverse: Vec<usize>,
}

impl Permutation {
    pub fn identity(len: usize) -> Self {
        let forward: Vec<usize> = (0..len).collect();
        Self {
            inverse: forward.clone(),
            forward,
        }
    }

    pub fn shuffled<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Self {
        let mut forward: Vec<usize> = (0..len).collect();
        forward.shuffle(rng);
        Self::from_forward(forward)
    }

    fn from_forward(forward: Vec<usize>) -> Self {
        let mut inverse = vec![0; forward.len()];
        for (display, canonical) in forward.iter().enumerate() {
            inverse[*canonical] = display;
        }
        Self { forward, inverse }
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn to_canonical(&self, display: usize) -> Option<usize> {
        self.forward.get(display).copied()
    }

    pub fn to_display(&self, canonical: usize) -> Option<usize> {
        self.inverse.get(canonical).copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.forward
    }
}

impl TryFrom<Vec<usize>> for Permutation {
    type Error = String;

    fn try_from(forward: Vec<usize>) -> Result<Self, Self::Error> {
        let mut seen = vec![false; forward.len()];
        for idx in &forward {
            match seen.get_mut(*idx) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(format!("{forward:?} is not a permutation")),
            }
        }
        Ok(Self::from_forward(forward))
    }
}

impl From<Permutation> for Vec<usize> {
    fn from(value: Permutation) -> Self {
        value.forward
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShufflePolicy {
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMapping {
    questions: Permutation,
    /// Indexed by canonical question index.
    options: Vec<Permutation>,
}

impl DisplayMapping {
    pub fn identity(questions: &[Question]) -> Self {
        Self {
            questions: Permutation::identity(questions.len()),
            options: questions
                .iter()
                .map(|q| Permutation::identity(q.options.len()))
                .collect(),
        }
    }

    pub fn generate(questions: &[Question], policy: ShufflePolicy) -> Self {
        let mut rng = match policy.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let question_order = if policy.shuffle_questions {
            Permutation::shuffled(questions.len(), &mut rng)
        } else {
            Permutation::identity(questions.len())
        };
        let options = questions
            .iter()
            .map(|q| {
                if policy.shuffle_options {
                    Permutation::shuffled(q.options.len(), &mut rng)
                } else {
                    Permutation::identity(q.options.len())
                }
            })
            .collect();
        Self {
            questions: question_order,
            options,
        }
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn to_canonical_index(&self, display_index: usize) -> Option<usize> {
        self.questions.to_canonical(display_index)
    }

    /// True when this mapping can be laid over `questions` (same shape).
    pub fn fits(&self, questions: &[Question]) -> bool {
        self.questions.len() == questions.len()
            && self
                .options
                .iter()
                .zip(questions)
                .all(|(p, q)| p.len() == q.options.len())
    }

    fn option_order(&self, question: &Question, canonical_index: usize) -> Option<&Permutation> {
        self.options
            .get(canonical_index)
            .filter(|p| p.len() == question.options.len())
    }

    /// Options in display order. Canonical records are cloned, never mutated.
    pub fn display_options(&self, question: &Question, canonical_index: usize) -> Vec<QuizOption> {
        match self.option_order(question, canonical_index) {
            Some(order) => order
                .as_slice()
                .iter()
                .map(|c| question.options[*c].clone())
                .collect(),
            None => question.options.clone(),
        }
    }

    /// `display_position` is 0-based.
    pub fn option_id_at(
        &self,
        question: &Question,
        canonical_index: usize,
        display_position: usize,
    ) -> Option<u64> {
        let canonical_position = match self.option_order(question, canonical_index) {
            Some(order) => order.to_canonical(display_position)?,
            None => display_position,
        };
        question.options.get(canonical_position).map(|o| o.option_id)
    }

    /// 0-based display position of a canonical option id.
    pub fn display_position_of(
        &self,
        question: &Question,
        canonical_index: usize,
        option_id: u64,
    ) -> Option<usize> {
        let canonical_position = question.position_of(option_id)?;
        match self.option_order(question, canonical_index) {
            Some(order) => order.to_display(canonical_position),
            None => Some(canonical_position),
        }
    }
}

/// Session-keyed memo of display mappings.
#[derive(Default)]
pub struct ShuffleMapper {
    sessions: DashMap<String, Arc<DisplayMapping>>,
}

impl ShuffleMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized mapping for `quiz_id`, generating it on first use.
    pub fn build_display_order(
        &self,
        quiz_id: &str,
        questions: &[Question],
        policy: ShufflePolicy,
    ) -> Arc<DisplayMapping> {
        self.sessions
            .entry(quiz_id.to_string())
            .or_insert_with(|| Arc::new(DisplayMapping::generate(questions, policy)))
            .value()
            .clone()
    }

    /// Installs a mapping recovered from a snapshot.
    pub fn install(&self, quiz_id: &str, mapping: DisplayMapping) -> Arc<DisplayMapping> {
        let mapping = Arc::new(mapping);
        self.sessions.insert(quiz_id.to_string(), mapping.clone());
        mapping
    }

    /// Drops the memo so the next build reshuffles.
    pub fn new_session(&self, quiz_id: &str) {
        self.sessions.remove(quiz_id);
    }
}
