use crate::error::{ErrorDetail, SessionError};
use crate::models::{lint_quiz, validate_quiz, Question, QuizDocument};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LoadedQuiz {
    pub quiz_id: String,
    pub questions: Vec<Question>,
}

impl LoadedQuiz {
    pub fn from_document(quiz_id: &str, document: QuizDocument) -> Self {
        if document.quiz_id != quiz_id {
            warn!(
                requested = quiz_id,
                declared = %document.quiz_id,
                "quiz document declares a different id"
            );
        }
        Self {
            quiz_id: quiz_id.to_string(),
            questions: document.into_questions(),
        }
    }
}

pub trait QuizLoader: Send + Sync {
    fn load_questions(&self, quiz_id: &str) -> BoxFuture<'static, Result<LoadedQuiz, SessionError>>;
}

/// Parses and validates a raw quiz document: JSON, then schema, then the
/// structural checks in [`validate_quiz`]. Tolerated problems are only logged.
pub fn parse_quiz_document(raw: &str, schema: &Value) -> Result<QuizDocument, SessionError> {
    let json_value: Value = serde_json::from_str(raw)?;

    let compiled = jsonschema::draft202012::new(schema).map_err(|e| {
        SessionError::validation(format!("quiz schema build failed: {e}"), Vec::new())
    })?;
    if compiled.validate(&json_value).is_err() {
        let details = compiled
            .iter_errors(&json_value)
            .map(|e| ErrorDetail {
                field: e.instance_path.to_string(),
                issue: e.to_string(),
            })
            .collect();
        return Err(SessionError::validation(
            "quiz document does not match schema",
            details,
        ));
    }

    let document: QuizDocument = serde_json::from_value(json_value)?;
    validate_quiz(&document)
        .map_err(|issues| SessionError::validation("quiz validation failed", issues))?;
    for warning in lint_quiz(&document) {
        warn!(quiz_id = %document.quiz_id, field = %warning.field, "{}", warning.issue);
    }
    Ok(document)
}

/// Reads `<dir>/<quiz_id>.json`.
#[derive(Clone)]
pub struct FileQuizLoader {
    pub dir: PathBuf,
    pub schema: Arc<Value>,
}

impl FileQuizLoader {
    pub fn new(dir: impl Into<PathBuf>, schema: Value) -> Self {
        Self {
            dir: dir.into(),
            schema: Arc::new(schema),
        }
    }
}

impl QuizLoader for FileQuizLoader {
    fn load_questions(&self, quiz_id: &str) -> BoxFuture<'static, Result<LoadedQuiz, SessionError>> {
        let path = self.dir.join(format!("{quiz_id}.json"));
        let schema = self.schema.clone();
        let quiz_id = quiz_id.to_string();
        Box::pin(async move {
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(SessionError::QuizNotFound { quiz_id });
                }
                Err(source) => {
                    return Err(SessionError::Io {
                        path: path.display().to_string(),
                        source,
                    });
                }
            };
            let document = parse_quiz_document(&raw, &schema)?;
            let loaded = LoadedQuiz::from_document(&quiz_id, document);
            info!(
                quiz_id = %loaded.quiz_id,
                questions = loaded.questions.len(),
                path = %path.display(),
                "quiz loaded"
            );
            Ok(loaded)
        })
    }
}

/// In-memory documents, for tests and embedding.
#[derive(Clone, Default)]
pub struct StaticQuizLoader {
    documents: HashMap<String, QuizDocument>,
}

impl StaticQuizLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, document: QuizDocument) -> Self {
        self.documents.insert(document.quiz_id.clone(), document);
        self
    }
}

impl QuizLoader for StaticQuizLoader {
    fn load_questions(&self, quiz_id: &str) -> BoxFuture<'static, Result<LoadedQuiz, SessionError>> {
        let found = self.documents.get(quiz_id).cloned();
        let quiz_id = quiz_id.to_string();
        Box::pin(async move {
            let document = found.ok_or_else(|| SessionError::QuizNotFound {
                quiz_id: quiz_id.clone(),
            })?;
            Ok(LoadedQuiz::from_document(&quiz_id, document))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz_schema;
    use serde_json::json;

    fn raw_quiz() -> String {
        json!({
            "quizId": "capitals",
            "questions": [{
                "questionText": "Capital of France",
                "options": [{"text": "Paris", "correct": true}, {"text": "Berlin"}],
                "explanation": "Paris is the capital"
            }]
        })
        .to_string()
    }

    #[test]
    fn parses_valid_document() {
        let doc = parse_quiz_document(&raw_quiz(), &quiz_schema().unwrap()).unwrap();
        assert_eq!(doc.quiz_id, "capitals");
        assert_eq!(doc.questions[0].options.len(), 2);
    }

    #[test]
    fn schema_violations_carry_details() {
        let raw = json!({"quizId": "x", "questions": [{"options": []}]}).to_string();
        let err = parse_quiz_document(&raw, &quiz_schema().unwrap()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(!err.details().is_empty());
    }

    #[test]
    fn explicit_option_id_shadowing_a_sibling_is_rejected() {
        let raw = json!({
            "quizId": "capitals",
            "questions": [
                {"questionText": "Capital of France", "options": [{"text": "Paris", "correct": true}]},
                {
                    "questionText": "Capital of Spain",
                    "options": [
                        {"text": "Madrid", "correct": true, "optionId": 1_001_001},
                        {"text": "Lisbon"}
                    ]
                }
            ]
        })
        .to_string();
        let err = parse_quiz_document(&raw, &quiz_schema().unwrap()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(err.details()[0].field, "questions[1].options[1].optionId");
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = parse_quiz_document("{not json", &quiz_schema().unwrap()).unwrap_err();
        assert_eq!(err.code(), "INVALID_JSON");
    }

    #[tokio::test]
    async fn file_loader_reads_by_quiz_id() {
        let dir = tempfile::tempdir().expect("temporary directory should be created");
        std::fs::write(dir.path().join("capitals.json"), raw_quiz()).unwrap();
        let loader = FileQuizLoader::new(dir.path(), quiz_schema().unwrap());

        let loaded = loader.load_questions("capitals").await.unwrap();
        assert_eq!(loaded.questions.len(), 1);
        assert_eq!(loaded.questions[0].correct_ids().len(), 1);

        let missing = loader.load_questions("nope").await.unwrap_err();
        assert_eq!(missing.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn static_loader_serves_documents() {
        let doc: QuizDocument = serde_json::from_str(&raw_quiz()).unwrap();
        let loader = StaticQuizLoader::new().with_document(doc);
        assert!(loader.load_questions("capitals").await.is_ok());
        assert!(loader.load_questions("other").await.is_err());
    }
}
