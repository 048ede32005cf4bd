pub mod config;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod explanation;
pub mod loader;
pub mod models;
pub mod persistence;
pub mod selection;
pub mod session;
pub mod shuffle;
pub mod timer;

use std::sync::Arc;

pub fn quiz_schema() -> serde_json::Result<serde_json::Value> {
    serde_json::from_str(include_str!("../contracts/quiz.schema.json"))
}

/// Wires the file loader, frame-delayed formatter and optional snapshot store
/// from `config`.
pub fn build_session(config: config::SessionConfig) -> anyhow::Result<session::SessionController> {
    let schema = quiz_schema()?;
    let loader: Arc<dyn loader::QuizLoader> =
        Arc::new(loader::FileQuizLoader::new(&config.quiz_dir, schema));
    let formatter: Arc<dyn explanation::ExplanationFormatter> =
        Arc::new(explanation::FrameDelayedFormatter::new(config.frame_delay));
    let snapshots = config.snapshot_path.as_ref().map(|path| {
        Arc::new(persistence::JsonFileSnapshotStore::new(path)) as Arc<dyn persistence::SnapshotStore>
    });
    Ok(session::SessionController::new(config, loader, formatter, snapshots))
}
