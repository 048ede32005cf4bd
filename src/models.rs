use crate::error::ErrorDetail;
use crate::shuffle::{assign_option_ids, MAX_OPTIONS_PER_QUESTION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Single,
    Multi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizOption {
    /// Stable identity. Zero (or anything below the finalized threshold) means
    /// "not assigned yet".
    #[serde(default)]
    pub option_id: u64,
    pub text: String,
    #[serde(default)]
    pub correct: bool,
}

impl QuizOption {
    pub fn new(option_id: u64, text: impl Into<String>, correct: bool) -> Self {
        Self {
            option_id,
            text: text.into(),
            correct,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDocument {
    pub question_text: String,
    #[serde(default)]
    pub options: Vec<QuizOption>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDocument {
    pub quiz_id: String,
    pub questions: Vec<QuestionDocument>,
}

/// Canonical, never-shuffled question as loaded from the quiz document.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Question {
    pub id: u64,
    pub text: String,
    pub options: Vec<QuizOption>,
    pub raw_explanation: String,
    pub kind: QuestionKind,
    /// Correct answers listed by text at question level, if the document had any.
    pub answers: Vec<String>,
}

impl Question {
    pub fn new(
        id: u64,
        text: impl Into<String>,
        options: Vec<QuizOption>,
        raw_explanation: impl Into<String>,
    ) -> Self {
        let kind = if options.iter().filter(|o| o.correct).count() > 1 {
            QuestionKind::Multi
        } else {
            QuestionKind::Single
        };
        Self {
            id,
            text: text.into(),
            options,
            raw_explanation: raw_explanation.into(),
            kind,
            answers: Vec::new(),
        }
    }

    pub fn with_answers(mut self, answers: Vec<String>) -> Self {
        self.answers = answers;
        self
    }

    pub fn correct_ids(&self) -> BTreeSet<u64> {
        self.options
            .iter()
            .filter(|o| o.correct)
            .map(|o| o.option_id)
            .collect()
    }

    pub fn option(&self, option_id: u64) -> Option<&QuizOption> {
        self.options.iter().find(|o| o.option_id == option_id)
    }

    pub fn position_of(&self, option_id: u64) -> Option<usize> {
        self.options.iter().position(|o| o.option_id == option_id)
    }

    pub fn is_available(&self) -> bool {
        !self.options.is_empty()
    }
}

impl QuizDocument {
    /// Builds canonical questions, finalizing option ids. Question ids are the
    /// canonical indices.
    pub fn into_questions(self) -> Vec<Question> {
        self.questions
            .into_iter()
            .enumerate()
            .map(|(idx, q)| {
                let options = assign_option_ids(q.options, idx);
                Question::new(idx as u64, q.question_text, options, q.explanation)
                    .with_answers(q.answers)
            })
            .collect()
    }
}

pub fn validate_quiz(quiz: &QuizDocument) -> Result<(), Vec<ErrorDetail>> {
    let mut issues = Vec::new();
    if quiz.quiz_id.trim().is_empty() {
        issues.push(ErrorDetail {
            field: "quizId".into(),
            issue: "must not be empty".into(),
        });
    }

    for (i, q) in quiz.questions.iter().enumerate() {
        if q.options.len() > MAX_OPTIONS_PER_QUESTION {
            issues.push(ErrorDetail {
                field: format!("questions[{i}].options"),
                issue: format!("must contain at most {MAX_OPTIONS_PER_QUESTION} options"),
            });
        }
        let mut seen = HashSet::new();
        for (j, opt) in q.options.iter().enumerate() {
            if opt.option_id != 0 && !seen.insert(opt.option_id) {
                issues.push(ErrorDetail {
                    field: format!("questions[{i}].options[{j}].optionId"),
                    issue: "must be unique".into(),
                });
            }
        }
    }

    // Explicit finalized ids must not collide with ids synthesized for any
    // option in the quiz.
    let mut assigned: HashMap<u64, (usize, usize)> = HashMap::new();
    for (i, q) in quiz.questions.iter().enumerate() {
        for (j, opt) in assign_option_ids(q.options.clone(), i).iter().enumerate() {
            if let Some((qi, oj)) = assigned.insert(opt.option_id, (i, j)) {
                if qi == i && q.options[j].option_id == q.options[oj].option_id {
                    // already reported as an explicit duplicate above
                    continue;
                }
                issues.push(ErrorDetail {
                    field: format!("questions[{i}].options[{j}].optionId"),
                    issue: format!(
                        "must be unique, {} is also used by questions[{qi}].options[{oj}]",
                        opt.option_id
                    ),
                });
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Problems the session tolerates at runtime but that are worth logging at load.
pub fn lint_quiz(quiz: &QuizDocument) -> Vec<ErrorDetail> {
    let mut warnings = Vec::new();
    if quiz.questions.is_empty() {
        warnings.push(ErrorDetail {
            field: "questions".into(),
            issue: "quiz has no questions".into(),
        });
    }
    for (i, q) in quiz.questions.iter().enumerate() {
        if q.question_text.trim().is_empty() {
            warnings.push(ErrorDetail {
                field: format!("questions[{i}].questionText"),
                issue: "is empty".into(),
            });
        }
        if q.options.is_empty() {
            warnings.push(ErrorDetail {
                field: format!("questions[{i}].options"),
                issue: "no options, question will be unavailable".into(),
            });
        } else if !q.options.iter().any(|o| o.correct) && q.answers.is_empty() {
            warnings.push(ErrorDetail {
                field: format!("questions[{i}].options"),
                issue: "no option is marked correct".into(),
            });
        }
    }
    warnings
}
