use chrono::Utc;
use futures::future::BoxFuture;
use quiz_session::config::SessionConfig;
use quiz_session::error::SessionError;
use quiz_session::explanation::{
    format_explanation, ExplanationFormatter, ExplanationRequest, FrameDelayedFormatter,
};
use quiz_session::loader::StaticQuizLoader;
use quiz_session::models::{Question, QuizDocument, QuizOption};
use quiz_session::persistence::{MemorySnapshotStore, SessionSnapshot, SnapshotStore};
use quiz_session::selection::SelectionStore;
use quiz_session::session::{Navigation, QuestionPhase, SessionController};
use quiz_session::shuffle::{DisplayMapping, ShufflePolicy};
use quiz_session::timer::TimerState;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

fn chemistry_quiz() -> QuizDocument {
    serde_json::from_value(json!({
        "quizId": "chem",
        "questions": [
            {
                "questionText": "Which of these are noble gases?",
                "options": [
                    {"text": "Oxygen"},
                    {"text": "Neon", "correct": true},
                    {"text": "Argon", "correct": true},
                    {"text": "Nitrogen"}
                ],
                "explanation": "they have full outer electron shells."
            },
            {
                "questionText": "What is the formula of water?",
                "options": [
                    {"text": "CO2"},
                    {"text": "H2O", "correct": true},
                    {"text": "NaCl"}
                ],
                "explanation": "Option 3 is correct because two hydrogens bond to one oxygen."
            },
            {
                "questionText": "This question lost its options",
                "options": [],
                "explanation": ""
            }
        ]
    }))
    .expect("quiz document should deserialize")
}

fn test_config(shuffle: ShufflePolicy) -> SessionConfig {
    SessionConfig {
        question_duration: Duration::from_secs(30),
        tick_interval: Duration::from_millis(250),
        frame_delay: Duration::from_millis(16),
        shuffle,
        ..SessionConfig::default()
    }
}

fn controller_with(
    shuffle: ShufflePolicy,
    snapshots: Option<Arc<dyn SnapshotStore>>,
) -> SessionController {
    let config = test_config(shuffle);
    let formatter = Arc::new(FrameDelayedFormatter::new(config.frame_delay));
    let loader = Arc::new(StaticQuizLoader::new().with_document(chemistry_quiz()));
    SessionController::new(config, loader, formatter, snapshots)
}

fn controller() -> SessionController {
    controller_with(ShufflePolicy::default(), None)
}

#[tokio::test(start_paused = true)]
async fn operations_before_start_are_rejected() {
    let session = controller();
    let err = session.navigate_to(0).await.unwrap_err();
    assert_eq!(err.code(), "NOT_STARTED");
    assert!(!session.on_timer_expired().await);

    let missing = session.start("physics").await.unwrap_err();
    assert_eq!(missing.code(), "NOT_FOUND");
}

#[tokio::test(start_paused = true)]
async fn multi_answer_needs_exact_set_and_names_display_positions() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    let mut resolutions = session.events().resolution_changed();
    assert_eq!(session.start("chem").await.unwrap(), 3);

    let nav = session.navigate_to(0).await.unwrap();
    assert!(matches!(nav, Navigation::Ready { timer_started: true, .. }));
    assert_eq!(resolutions.recv().await.unwrap().phase, QuestionPhase::Unanswered);

    let status = session.click_display_option(2).await.unwrap();
    assert!(!status.resolved);
    assert_eq!(status.remaining(), 1);
    let progress = resolutions.recv().await.unwrap();
    assert_eq!(progress.phase, QuestionPhase::InProgress);
    assert_eq!(progress.hint.as_deref(), Some("Select 1 more correct answer"));

    // A wrong pick keeps the question open even with every correct option chosen.
    session.click_display_option(1).await.unwrap();
    let status = session.click_display_option(3).await.unwrap();
    assert!(!status.resolved);
    assert_eq!(status.incorrect_selected, 1);

    let status = session.click_display_option(1).await.unwrap();
    assert!(status.resolved);
    assert_eq!(session.timer_state().await, Some(TimerState::StoppedEarly));

    let ready = explanations.recv().await.unwrap();
    assert_eq!(ready.display_index, 0);
    assert_eq!(
        ready.text,
        "Options 2 and 3 are correct because they have full outer electron shells."
    );
    assert_eq!(
        session.outcome(0).await.unwrap().phase,
        QuestionPhase::ExplanationVisible
    );
    assert_eq!(session.explanation(0).await, Some(ready.text));
}

#[tokio::test(start_paused = true)]
async fn single_answer_replaces_selection_and_strips_stale_prefix() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    let mut selections = session.events().selection_changed();
    session.start("chem").await.unwrap();
    session.navigate_to(1).await.unwrap();

    let status = session.click_display_option(1).await.unwrap();
    assert!(!status.resolved);
    assert_eq!(
        session.outcome(1).await.unwrap().phase,
        QuestionPhase::Unanswered
    );
    assert_eq!(selections.recv().await.unwrap().selections.len(), 1);

    let status = session.click_display_option(2).await.unwrap();
    assert!(status.resolved);
    let changed = selections.recv().await.unwrap();
    assert_eq!(changed.selections.len(), 1);
    assert_eq!(changed.selections[0].option_id, 1_001_001);

    let ready = explanations.recv().await.unwrap();
    assert_eq!(
        ready.text,
        "Option 2 is correct because two hydrogens bond to one oxygen."
    );
}

#[tokio::test(start_paused = true)]
async fn clicks_outside_the_active_question_are_rejected() {
    let session = controller();
    session.start("chem").await.unwrap();
    session.navigate_to(0).await.unwrap();

    let err = session.on_option_clicked(1_001_001).await.unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_OPTION");
    let err = session.click_display_option(9).await.unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_OPTION");
    let err = session.click_display_option(0).await.unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_OPTION");
}

#[tokio::test(start_paused = true)]
async fn stale_explanations_are_discarded_after_navigation() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    session.start("chem").await.unwrap();

    // Resolve question 1, then leave before its formatter frame has elapsed.
    session.navigate_to(0).await.unwrap();
    session.click_display_option(2).await.unwrap();
    session.click_display_option(3).await.unwrap();
    session.navigate_to(1).await.unwrap();
    session.click_display_option(2).await.unwrap();

    let ready = explanations.recv().await.unwrap();
    assert_eq!(ready.display_index, 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(explanations.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(session.explanation(0).await, None);

    // Rapid navigation across two resolved questions only publishes the last.
    session.navigate_to(0).await.unwrap();
    assert_eq!(explanations.recv().await.unwrap().display_index, 0);
    session.navigate_to(0).await.unwrap();
    session.navigate_to(1).await.unwrap();
    let ready = explanations.recv().await.unwrap();
    assert_eq!(ready.display_index, 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(explanations.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn click_racing_expiry_publishes_one_explanation() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    session.start("chem").await.unwrap();
    session.navigate_to(1).await.unwrap();

    let (clicked, expired) = tokio::join!(
        session.click_display_option(2),
        session.on_timer_expired()
    );
    let status = clicked.unwrap();
    let outcome = session.outcome(1).await.unwrap();
    assert!(outcome.is_resolved());
    assert_eq!(outcome.timed_out, expired);
    assert_eq!(status.resolved, !expired);

    explanations.recv().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(matches!(explanations.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn expiry_forces_resolution_and_ignores_later_clicks() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    let mut expirations = session.events().timer_expired();
    let mut ticks = session.events().timer_tick();
    session.start("chem").await.unwrap();
    session.navigate_to(0).await.unwrap();
    session.click_display_option(2).await.unwrap();

    let first_tick = ticks.recv().await.unwrap();
    assert_eq!(first_tick.elapsed_ms, 250);
    assert_eq!(first_tick.remaining_ms, 29_750);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(expirations.recv().await.unwrap().display_index, 0);
    assert_eq!(session.timer_state().await, Some(TimerState::Expired));
    assert!(!session.on_timer_expired().await);

    let outcome = session.outcome(0).await.unwrap();
    assert!(outcome.timed_out);
    let ready = explanations.recv().await.unwrap();
    assert!(ready.text.starts_with("Options 2 and 3 are correct because"));

    let before = session.resolution(0).await.unwrap();
    let after = session.click_display_option(3).await.unwrap();
    assert_eq!(before, after);
    assert!(!after.resolved);

    let feedback = session.option_feedback(0).await.unwrap();
    assert!(feedback.iter().all(|f| f.correct.is_some()));
    assert!(feedback[1].selected);
    assert!(!feedback[2].selected);
}

#[tokio::test(start_paused = true)]
async fn revisiting_a_resolved_question_skips_the_timer() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    session.start("chem").await.unwrap();
    session.navigate_to(1).await.unwrap();
    session.click_display_option(2).await.unwrap();
    let first = explanations.recv().await.unwrap();

    session.navigate_to(0).await.unwrap();
    let nav = session.navigate_to(1).await.unwrap();
    match nav {
        Navigation::Ready {
            phase,
            timer_started,
            status,
            ..
        } => {
            assert_eq!(phase, QuestionPhase::ExplanationVisible);
            assert!(!timer_started);
            assert!(status.resolved);
        }
        other => panic!("expected a ready question, got {other:?}"),
    }
    assert_eq!(session.timer_state().await, Some(TimerState::Idle));
    let again = explanations.recv().await.unwrap();
    assert_eq!(again, first);
}

#[tokio::test(start_paused = true)]
async fn unavailable_question_keeps_epoch_and_active_question() {
    let session = controller();
    session.start("chem").await.unwrap();
    session.navigate_to(0).await.unwrap();
    let epoch = session.current_epoch();

    let nav = session.navigate_to(2).await.unwrap();
    assert_eq!(nav, Navigation::Unavailable { display_index: 2 });
    let nav = session.navigate_to(42).await.unwrap();
    assert_eq!(nav, Navigation::Unavailable { display_index: 42 });

    assert_eq!(session.current_epoch(), epoch);
    assert_eq!(session.active_display_index().await, Some(0));
    assert_eq!(session.timer_state().await, Some(TimerState::Running));
    assert_eq!(
        session.display_options(42).await.unwrap_err().code(),
        "MISSING_DATA"
    );
}

#[tokio::test(start_paused = true)]
async fn next_and_previous_walk_the_display_order() {
    let session = controller();
    session.start("chem").await.unwrap();

    let nav = session.next().await.unwrap();
    assert!(matches!(nav, Navigation::Ready { display_index: 0, .. }));
    assert!(session.previous().await.unwrap().is_none());
    session.next().await.unwrap();
    assert_eq!(session.active_display_index().await, Some(1));
    let nav = session.previous().await.unwrap();
    assert!(matches!(nav, Some(Navigation::Ready { display_index: 0, .. })));
}

#[tokio::test(start_paused = true)]
async fn shuffled_display_still_resolves_against_canonical_flags() {
    let policy = ShufflePolicy {
        shuffle_questions: true,
        shuffle_options: true,
        seed: Some(7),
    };
    let session = controller_with(policy, None);
    let mut explanations = session.events().explanation_ready();
    let count = session.start("chem").await.unwrap();

    for display_index in 0..count {
        if let Navigation::Unavailable { .. } = session.navigate_to(display_index).await.unwrap() {
            continue;
        }
        let question = session.question(display_index).await.unwrap();
        let options = session.display_options(display_index).await.unwrap();
        let positions: Vec<usize> = options
            .iter()
            .enumerate()
            .filter(|(_, o)| o.correct)
            .map(|(pos, _)| pos + 1)
            .collect();

        let mut status = None;
        for position in &positions {
            status = Some(session.click_display_option(*position).await.unwrap());
        }
        assert!(status.is_some_and(|s| s.resolved));

        let ready = explanations.recv().await.unwrap();
        assert_eq!(ready.display_index, display_index);
        assert_eq!(
            ready.text,
            format_explanation(&positions, &question.raw_explanation)
        );
    }

    // Starting again reuses the memoized order.
    let before: Vec<_> = session.display_options(0).await.unwrap();
    session.start("chem").await.unwrap();
    assert_eq!(session.display_options(0).await.unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn restart_clears_progress() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    session.start("chem").await.unwrap();
    session.navigate_to(1).await.unwrap();
    session.click_display_option(2).await.unwrap();
    explanations.recv().await.unwrap();
    assert_eq!(session.summary().await.answered_correctly, 1);

    session.restart("chem").await.unwrap();
    let summary = session.summary().await;
    assert_eq!(summary.answered_correctly, 0);
    assert_eq!(summary.unanswered, 3);
    assert_eq!(session.explanation(1).await, None);
    assert_eq!(session.active_display_index().await, None);
}

#[tokio::test(start_paused = true)]
async fn summary_counts_outcomes() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    session.start("chem").await.unwrap();

    session.navigate_to(1).await.unwrap();
    session.click_display_option(2).await.unwrap();
    explanations.recv().await.unwrap();

    session.navigate_to(0).await.unwrap();
    assert!(session.on_timer_expired().await);
    explanations.recv().await.unwrap();

    let summary = session.summary().await;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.answered_correctly, 1);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.unanswered, 1);
}

#[tokio::test(start_paused = true)]
async fn suspend_and_resume_restore_progress() {
    let store = MemorySnapshotStore::new();
    let policy = ShufflePolicy {
        shuffle_questions: true,
        shuffle_options: true,
        seed: None,
    };
    let session = controller_with(policy, Some(Arc::new(store.clone())));
    let mut explanations = session.events().explanation_ready();
    session.start("chem").await.unwrap();

    let resolved_index = {
        let mut found = None;
        for display_index in 0..3 {
            if session.question(display_index).await.unwrap().text.starts_with("What is the formula") {
                found = Some(display_index);
            }
        }
        found.expect("water question should be displayed somewhere")
    };
    session.navigate_to(resolved_index).await.unwrap();
    let options = session.display_options(resolved_index).await.unwrap();
    let correct = options.iter().position(|o| o.correct).unwrap() + 1;
    session.click_display_option(correct).await.unwrap();
    let explanation = explanations.recv().await.unwrap();

    let snapshot = session.suspend().await.expect("started session has a snapshot");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.latest().await, Some(snapshot.clone()));

    let resumed = controller_with(policy, Some(Arc::new(store.clone())));
    let mut resumed_explanations = resumed.events().explanation_ready();
    let nav = resumed.resume().await.unwrap();
    assert!(matches!(
        nav,
        Some(Navigation::Ready { display_index, phase: QuestionPhase::ExplanationVisible, .. })
            if display_index == resolved_index
    ));
    assert_eq!(
        resumed.display_options(resolved_index).await.unwrap(),
        options
    );
    assert_eq!(resumed_explanations.recv().await.unwrap().text, explanation.text);
}

#[tokio::test(start_paused = true)]
async fn resume_without_snapshot_is_a_no_op() {
    let session = controller_with(
        ShufflePolicy::default(),
        Some(Arc::new(MemorySnapshotStore::new())),
    );
    assert!(session.resume().await.unwrap().is_none());
    assert!(controller().resume().await.unwrap().is_none());
}

fn riddle_quiz() -> QuizDocument {
    serde_json::from_value(json!({
        "quizId": "riddle",
        "questions": [{
            "questionText": "Is this statement false?",
            "options": [{"text": "Yes"}, {"text": "No"}],
            "explanation": "Option 1 is correct because neither answer holds up."
        }]
    }))
    .expect("quiz document should deserialize")
}

/// Counts calls and always fails.
struct FailingFormatter {
    calls: Arc<AtomicUsize>,
}

impl ExplanationFormatter for FailingFormatter {
    fn format(&self, request: ExplanationRequest) -> BoxFuture<'static, Result<String, SessionError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Err(SessionError::ForeignOptions {
                question_id: request.question.id,
            })
        })
    }
}

#[tokio::test(start_paused = true)]
async fn explanation_for_an_unresolved_question_is_refused() {
    let session = controller();
    let mut explanations = session.events().explanation_ready();
    session.start("chem").await.unwrap();
    session.navigate_to(0).await.unwrap();

    let epoch = session.current_epoch();
    assert!(!session.on_explanation_ready(epoch, Ok("junk".into())).await);
    assert_eq!(
        session.outcome(0).await.unwrap().phase,
        QuestionPhase::Unanswered
    );
    assert_eq!(session.explanation(0).await, None);
    assert_eq!(session.summary().await.unanswered, 3);

    session.click_display_option(2).await.unwrap();
    let status = session.click_display_option(3).await.unwrap();
    assert!(status.resolved);
    let ready = explanations.recv().await.unwrap();
    assert!(ready.text.starts_with("Options 2 and 3 are correct because"));

    // The request for this visit has been answered already.
    assert!(!session.on_explanation_ready(epoch, Ok("junk".into())).await);
    assert_eq!(session.explanation(0).await, Some(ready.text));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(explanations.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn formatter_failure_publishes_empty_text_and_retries_on_revisit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let session = SessionController::new(
        test_config(ShufflePolicy::default()),
        Arc::new(StaticQuizLoader::new().with_document(chemistry_quiz())),
        Arc::new(FailingFormatter {
            calls: calls.clone(),
        }),
        None,
    );
    let mut explanations = session.events().explanation_ready();
    session.start("chem").await.unwrap();
    session.navigate_to(1).await.unwrap();
    session.click_display_option(2).await.unwrap();

    let ready = explanations.recv().await.unwrap();
    assert_eq!(ready.display_index, 1);
    assert_eq!(ready.text, "");
    assert_eq!(
        session.outcome(1).await.unwrap().phase,
        QuestionPhase::ExplanationVisible
    );
    assert_eq!(session.explanation(1).await, None);

    session.navigate_to(0).await.unwrap();
    session.navigate_to(1).await.unwrap();
    let again = explanations.recv().await.unwrap();
    assert_eq!(again.text, "");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn question_without_correct_options_times_out_to_raw_explanation() {
    let config = test_config(ShufflePolicy::default());
    let formatter = Arc::new(FrameDelayedFormatter::new(config.frame_delay));
    let loader = Arc::new(StaticQuizLoader::new().with_document(riddle_quiz()));
    let session = SessionController::new(config, loader, formatter, None);
    let mut explanations = session.events().explanation_ready();
    session.start("riddle").await.unwrap();
    session.navigate_to(0).await.unwrap();

    let status = session.click_display_option(1).await.unwrap();
    assert!(!status.resolved);
    assert_eq!(status.correct_total, 0);

    tokio::time::sleep(Duration::from_secs(31)).await;
    let outcome = session.outcome(0).await.unwrap();
    assert!(outcome.timed_out);
    assert_eq!(outcome.phase, QuestionPhase::ExplanationVisible);
    let ready = explanations.recv().await.unwrap();
    assert_eq!(ready.text, "neither answer holds up.");
}

#[tokio::test(start_paused = true)]
async fn resume_reshuffles_when_snapshot_order_does_not_fit() {
    let store = MemorySnapshotStore::new();
    let old_questions: Vec<Question> = (0..2)
        .map(|qi| {
            Question::new(
                qi,
                "retired question",
                vec![QuizOption::new(1_000_000 + qi * 1_000, "only", true)],
                "",
            )
        })
        .collect();
    store
        .save(SessionSnapshot {
            session_id: "earlier".into(),
            quiz_id: "chem".into(),
            active_display_index: Some(1),
            selections: SelectionStore::new(),
            outcomes: BTreeMap::new(),
            mapping: DisplayMapping::identity(&old_questions),
            saved_at: Utc::now(),
        })
        .await
        .unwrap();

    let session = controller_with(ShufflePolicy::default(), Some(Arc::new(store.clone())));
    let nav = session.resume().await.unwrap();
    assert!(matches!(
        nav,
        Some(Navigation::Ready { display_index: 1, timer_started: true, .. })
    ));
    assert_eq!(session.question_count().await, 3);

    let quiz = chemistry_quiz().into_questions();
    for (display_index, question) in quiz.iter().enumerate() {
        assert_eq!(
            session.display_options(display_index).await.unwrap(),
            question.options
        );
    }
}
