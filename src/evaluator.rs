use crate::models::{Question, QuestionKind};
use crate::selection::SelectionEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionStatus {
    pub correct_total: usize,
    pub correct_selected: usize,
    pub incorrect_selected: usize,
    pub resolved: bool,
}

impl ResolutionStatus {
    pub fn remaining(&self) -> usize {
        self.correct_total.saturating_sub(self.correct_selected)
    }

    /// Intermediate hint for multi-answer questions. Never affects `resolved`.
    pub fn progress_hint(&self, kind: QuestionKind) -> Option<String> {
        if self.resolved || kind != QuestionKind::Multi || self.correct_total == 0 {
            return None;
        }
        if self.correct_selected == 0 && self.incorrect_selected == 0 {
            return None;
        }
        match self.remaining() {
            0 => Some("Deselect the incorrect answers".to_string()),
            1 => Some("Select 1 more correct answer".to_string()),
            n => Some(format!("Select {n} more correct answers")),
        }
    }
}

/// Pure: derived from canonical data and the current selections only.
pub fn evaluate(question: &Question, selections: &[SelectionEntry]) -> ResolutionStatus {
    let correct = question.correct_ids();
    let selected: BTreeSet<u64> = match question.kind {
        // At most one entry counts in single-answer mode; the first one wins.
        QuestionKind::Single => selections.iter().take(1).map(|e| e.option_id).collect(),
        QuestionKind::Multi => selections.iter().map(|e| e.option_id).collect(),
    };

    let correct_selected = selected.intersection(&correct).count();
    let incorrect_selected = selected.len() - correct_selected;
    let resolved = !correct.is_empty()
        && match question.kind {
            QuestionKind::Single => correct_selected == 1,
            QuestionKind::Multi => selected == correct,
        };

    ResolutionStatus {
        correct_total: correct.len(),
        correct_selected,
        incorrect_selected,
        resolved,
    }
}
