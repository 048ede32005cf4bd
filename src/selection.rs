use crate::models::QuestionKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionEntry {
    pub question_id: u64,
    /// Always a canonical option id, never a display position.
    pub option_id: u64,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    Added,
    Removed,
    Replaced,
    Unchanged,
}

/// Per-question selections, kept in click order. Entries survive navigation;
/// only a session reset clears them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionStore {
    entries: HashMap<u64, Vec<SelectionEntry>>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, question_id: u64, option_id: u64, kind: QuestionKind) -> SelectionChange {
        let entry = SelectionEntry {
            question_id,
            option_id,
            selected_at: Utc::now(),
        };
        let slot = self.entries.entry(question_id).or_default();
        match kind {
            QuestionKind::Single => {
                if slot.len() == 1 && slot[0].option_id == option_id {
                    return SelectionChange::Unchanged;
                }
                let change = if slot.is_empty() {
                    SelectionChange::Added
                } else {
                    SelectionChange::Replaced
                };
                slot.clear();
                slot.push(entry);
                change
            }
            QuestionKind::Multi => {
                if let Some(pos) = slot.iter().position(|e| e.option_id == option_id) {
                    slot.remove(pos);
                    SelectionChange::Removed
                } else {
                    slot.push(entry);
                    SelectionChange::Added
                }
            }
        }
    }

    pub fn deselect(&mut self, question_id: u64, option_id: u64) -> bool {
        let Some(slot) = self.entries.get_mut(&question_id) else {
            return false;
        };
        let before = slot.len();
        slot.retain(|e| e.option_id != option_id);
        before != slot.len()
    }

    pub fn selections(&self, question_id: u64) -> &[SelectionEntry] {
        self.entries
            .get(&question_id)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    pub fn selected_ids(&self, question_id: u64) -> BTreeSet<u64> {
        self.selections(question_id).iter().map(|e| e.option_id).collect()
    }

    pub fn is_selected(&self, question_id: u64, option_id: u64) -> bool {
        self.selections(question_id).iter().any(|e| e.option_id == option_id)
    }

    pub fn clear(&mut self, question_id: u64) {
        self.entries.remove(&question_id);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }
}
