use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no question available at display index {display_index}")]
    MissingData { display_index: usize },
    #[error("result initiated at epoch {initiated} discarded, current epoch is {current}")]
    StaleResultDiscarded { initiated: u64, current: u64 },
    #[error("no correct option could be resolved for question {question_id}")]
    AmbiguousCorrectness { question_id: u64 },
    #[error("display options do not belong to question {question_id}")]
    ForeignOptions { question_id: u64 },
    #[error("option {option_id} is not part of question {question_id}")]
    UnknownOption { question_id: u64, option_id: u64 },
    #[error("no quiz session has been started")]
    NotStarted,
    #[error("quiz {quiz_id} not found")]
    QuizNotFound { quiz_id: String },
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<ErrorDetail>,
    },
    #[error("failed to read quiz document at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("quiz document is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    pub fn validation(message: impl Into<String>, details: Vec<ErrorDetail>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingData { .. } => "MISSING_DATA",
            Self::StaleResultDiscarded { .. } => "STALE_RESULT",
            Self::AmbiguousCorrectness { .. } => "AMBIGUOUS_CORRECTNESS",
            Self::ForeignOptions { .. } => "FOREIGN_OPTIONS",
            Self::UnknownOption { .. } => "UNKNOWN_OPTION",
            Self::NotStarted => "NOT_STARTED",
            Self::QuizNotFound { .. } => "NOT_FOUND",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Io { .. } => "IO_ERROR",
            Self::Json(_) => "INVALID_JSON",
        }
    }

    pub fn details(&self) -> &[ErrorDetail] {
        match self {
            Self::Validation { details, .. } => details,
            _ => &[],
        }
    }
}
