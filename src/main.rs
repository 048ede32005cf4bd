use quiz_session::{
    build_session, config::SessionConfig, error::SessionError, events::EventEnvelope,
    session::SessionController,
};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

fn emit<T: Serialize>(event: &str, payload: &T, epoch: Option<u64>) {
    match serde_json::to_string(&EventEnvelope::new(event, payload, epoch)) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::warn!("failed to encode {} event: {}", event, err),
    }
}

fn spawn_event_printer(session: &SessionController) {
    let events = session.events();
    let mut selection = events.selection_changed();
    let mut resolution = events.resolution_changed();
    let mut explanation = events.explanation_ready();
    let mut tick = events.timer_tick();
    let mut expired = events.timer_expired();
    let session = session.clone();
    tokio::spawn(async move {
        loop {
            let epoch = Some(session.current_epoch());
            tokio::select! {
                Ok(ev) = selection.recv() => emit("selection_changed", &ev, epoch),
                Ok(ev) = resolution.recv() => emit("resolution_changed", &ev, epoch),
                Ok(ev) = explanation.recv() => emit("explanation_ready", &ev, epoch),
                Ok(ev) = tick.recv() => emit("timer_tick", &ev, epoch),
                Ok(ev) = expired.recv() => emit("timer_expired", &ev, epoch),
                else => break,
            }
        }
    });
}

async fn show_question(session: &SessionController, display_index: usize) -> Result<(), SessionError> {
    let question = session.question(display_index).await?;
    let options = session.option_feedback(display_index).await?;
    emit(
        "question",
        &json!({
            "displayIndex": display_index,
            "text": question.text,
            "kind": question.kind,
            "options": options,
        }),
        Some(session.current_epoch()),
    );
    Ok(())
}

async fn goto(session: &SessionController, display_index: usize) -> Result<(), SessionError> {
    let navigation = session.navigate_to(display_index).await?;
    emit("navigation", &navigation, Some(session.current_epoch()));
    if let Some(active) = session.active_display_index().await {
        if active == display_index {
            show_question(session, active).await?;
        }
    }
    Ok(())
}

async fn run_command(session: &SessionController, quiz_id: &str, line: &str) -> Result<bool, SessionError> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(true);
    };
    // User-facing numbers are 1-based.
    let number = parts.next().and_then(|n| n.parse::<usize>().ok());

    match (command, number) {
        ("goto", Some(n)) if n > 0 => goto(session, n - 1).await?,
        ("next", _) => {
            let navigation = session.next().await?;
            emit("navigation", &navigation, Some(session.current_epoch()));
            if let Some(active) = session.active_display_index().await {
                show_question(session, active).await?;
            }
        }
        ("prev", _) => match session.previous().await? {
            Some(navigation) => {
                emit("navigation", &navigation, Some(session.current_epoch()));
                if let Some(active) = session.active_display_index().await {
                    show_question(session, active).await?;
                }
            }
            None => tracing::info!("already at the first question"),
        },
        ("pick", Some(n)) => {
            let status = session.click_display_option(n).await?;
            emit("click", &status, Some(session.current_epoch()));
        }
        ("show", _) => {
            if let Some(active) = session.active_display_index().await {
                show_question(session, active).await?;
            }
        }
        ("expire", _) => {
            if !session.on_timer_expired().await {
                tracing::info!("no running timer to expire");
            }
        }
        ("summary", _) => emit("summary", &session.summary().await, None),
        ("suspend", _) => {
            if let Some(snapshot) = session.suspend().await {
                emit("suspended", &snapshot, Some(session.current_epoch()));
            }
        }
        ("resume", _) => match session.resume().await? {
            Some(navigation) => emit("navigation", &navigation, Some(session.current_epoch())),
            None => tracing::info!("no snapshot to resume"),
        },
        ("restart", _) => {
            let count = session.restart(quiz_id).await?;
            tracing::info!(quiz_id, questions = count, "session restarted");
            goto(session, 0).await?;
        }
        ("quit", _) | ("exit", _) => return Ok(false),
        _ => tracing::warn!(command = line, "unknown command"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = SessionConfig::from_env();
    let quiz_id = std::env::args().nth(1).unwrap_or_else(|| "sample".to_string());
    let session = build_session(config)?;
    spawn_event_printer(&session);

    let count = session.start(&quiz_id).await?;
    tracing::info!(
        session_id = session.session_id(),
        quiz_id = %quiz_id,
        questions = count,
        "quiz session started"
    );
    goto(&session, 0).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match run_command(&session, &quiz_id, &line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => emit(
                "error",
                &json!({"code": err.code(), "message": err.to_string(), "details": err.details()}),
                Some(session.current_epoch()),
            ),
        }
    }

    emit("summary", &session.summary().await, None);
    Ok(())
}
