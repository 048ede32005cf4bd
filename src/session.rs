//! Session controller: the single writer over selections, timer and phases.
//!
//! Every navigation bumps the epoch. Asynchronous work (explanation formatting,
//! timer ticks) captures the epoch when it starts and is dropped at publish time
//! if the epoch has moved on. Nothing is cancelled; stale results are discarded.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::evaluator::{evaluate, ResolutionStatus};
use crate::events::{
    ExplanationReady, ResolutionChanged, SelectionChanged, SessionEvents, TimerExpired, TimerTick,
};
use crate::explanation::{ExplanationCache, ExplanationFormatter, ExplanationRequest};
use crate::loader::{LoadedQuiz, QuizLoader};
use crate::models::{Question, QuestionKind, QuizOption};
use crate::persistence::{SessionSnapshot, SnapshotStore};
use crate::selection::{SelectionChange, SelectionStore};
use crate::shuffle::{DisplayMapping, ShuffleMapper};
use crate::timer::{TimerCoordinator, TimerEvent, TimerState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum QuestionPhase {
    #[default]
    Unanswered,
    /// Multi-answer only: some options picked, not yet an exact match.
    InProgress,
    Resolved,
    ExplanationVisible,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub phase: QuestionPhase,
    pub timed_out: bool,
}

impl QuestionOutcome {
    pub fn is_resolved(&self) -> bool {
        self.phase >= QuestionPhase::Resolved
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Navigation {
    Ready {
        display_index: usize,
        epoch: u64,
        status: ResolutionStatus,
        phase: QuestionPhase,
        timer_started: bool,
    },
    /// "No question available": nothing changed, no epoch bump, no timer.
    Unavailable { display_index: usize },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OptionFeedback {
    pub option_id: u64,
    /// 1-based.
    pub display_position: usize,
    pub text: String,
    pub selected: bool,
    /// Revealed for selected options, or for every option once resolved.
    pub correct: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total: usize,
    pub answered_correctly: usize,
    pub timed_out: usize,
    pub unanswered: usize,
}

#[derive(Debug, Clone)]
struct ActiveQuestion {
    display_index: usize,
    canonical_index: usize,
    question: Arc<Question>,
    explanation_requested: bool,
    explanation_published: bool,
}

struct SessionCore {
    quiz_id: String,
    questions: Vec<Arc<Question>>,
    mapping: Arc<DisplayMapping>,
    selections: SelectionStore,
    timer: TimerCoordinator,
    /// Keyed by canonical question index.
    outcomes: BTreeMap<usize, QuestionOutcome>,
    active: Option<ActiveQuestion>,
}

impl SessionCore {
    fn question_at(&self, display_index: usize) -> Option<(usize, Arc<Question>)> {
        let canonical_index = self.mapping.to_canonical_index(display_index)?;
        let question = self.questions.get(canonical_index)?.clone();
        Some((canonical_index, question))
    }

    fn outcome(&self, canonical_index: usize) -> QuestionOutcome {
        self.outcomes
            .get(&canonical_index)
            .copied()
            .unwrap_or_default()
    }

    fn active(&self) -> Result<&ActiveQuestion, SessionError> {
        self.active.as_ref().ok_or(SessionError::NotStarted)
    }
}

struct SessionInner {
    config: SessionConfig,
    session_id: String,
    epoch: AtomicU64,
    core: RwLock<Option<SessionCore>>,
    cache: ExplanationCache,
    shuffler: ShuffleMapper,
    loader: Arc<dyn QuizLoader>,
    formatter: Arc<dyn ExplanationFormatter>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    events: SessionEvents,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        loader: Arc<dyn QuizLoader>,
        formatter: Arc<dyn ExplanationFormatter>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        let events = SessionEvents::new(config.event_capacity);
        Self {
            inner: Arc::new(SessionInner {
                config,
                session_id: uuid::Uuid::new_v4().to_string(),
                epoch: AtomicU64::new(0),
                core: RwLock::new(None),
                cache: ExplanationCache::new(),
                shuffler: ShuffleMapper::new(),
                loader,
                formatter,
                snapshots,
                events,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &SessionEvents {
        &self.inner.events
    }

    pub fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Loads the quiz and builds (or reuses) its display order. Returns the
    /// number of questions.
    pub async fn start(&self, quiz_id: &str) -> Result<usize, SessionError> {
        let loaded = self.inner.loader.load_questions(quiz_id).await?;
        let mut mapping = self.inner.shuffler.build_display_order(
            &loaded.quiz_id,
            &loaded.questions,
            self.inner.config.shuffle,
        );
        if !mapping.fits(&loaded.questions) {
            warn!(quiz_id = %loaded.quiz_id, "memoized display order does not fit quiz, reshuffling");
            self.inner.shuffler.new_session(&loaded.quiz_id);
            mapping = self.inner.shuffler.build_display_order(
                &loaded.quiz_id,
                &loaded.questions,
                self.inner.config.shuffle,
            );
        }
        Ok(self
            .install(loaded, mapping, SelectionStore::new(), BTreeMap::new())
            .await)
    }

    /// New session for the same quiz: fresh shuffle, selections and cache.
    pub async fn restart(&self, quiz_id: &str) -> Result<usize, SessionError> {
        self.inner.shuffler.new_session(quiz_id);
        self.start(quiz_id).await
    }

    async fn install(
        &self,
        loaded: LoadedQuiz,
        mapping: Arc<DisplayMapping>,
        selections: SelectionStore,
        outcomes: BTreeMap<usize, QuestionOutcome>,
    ) -> usize {
        let mut guard = self.inner.core.write().await;
        // Anything still in flight belongs to the previous session.
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.cache.clear();
        let count = loaded.questions.len();
        *guard = Some(SessionCore {
            quiz_id: loaded.quiz_id,
            questions: loaded.questions.into_iter().map(Arc::new).collect(),
            mapping,
            selections,
            timer: TimerCoordinator::new(),
            outcomes,
            active: None,
        });
        info!(
            session_id = %self.inner.session_id,
            epoch,
            questions = count,
            "quiz session installed"
        );
        count
    }

    pub async fn navigate_to(&self, display_index: usize) -> Result<Navigation, SessionError> {
        let mut guard = self.inner.core.write().await;
        let core = guard.as_mut().ok_or(SessionError::NotStarted)?;

        let Some((canonical_index, question)) = core
            .question_at(display_index)
            .filter(|(_, q)| q.is_available())
        else {
            let err = SessionError::MissingData { display_index };
            warn!(code = err.code(), "{}", err);
            return Ok(Navigation::Unavailable { display_index });
        };

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        core.timer.reset();
        core.active = Some(ActiveQuestion {
            display_index,
            canonical_index,
            question: question.clone(),
            explanation_requested: false,
            explanation_published: false,
        });

        let status = evaluate(&question, core.selections.selections(question.id));
        let mut outcome = core.outcome(canonical_index);
        let mut timer_started = false;
        if status.resolved || outcome.is_resolved() {
            // Solved on an earlier visit: no countdown, straight to the explanation.
            if !outcome.is_resolved() {
                outcome.phase = QuestionPhase::Resolved;
                core.outcomes.insert(canonical_index, outcome);
            }
            core.timer.stop_early();
            self.request_explanation(core, epoch);
        } else {
            timer_started = core
                .timer
                .start(question.id, self.inner.config.question_duration);
            self.spawn_timer_driver(epoch);
        }

        self.emit_resolution(display_index, &question, status, outcome);
        info!(
            session_id = %self.inner.session_id,
            epoch,
            display_index,
            canonical_index,
            phase = ?outcome.phase,
            "navigated"
        );
        Ok(Navigation::Ready {
            display_index,
            epoch,
            status,
            phase: outcome.phase,
            timer_started,
        })
    }

    pub async fn next(&self) -> Result<Navigation, SessionError> {
        let target = {
            let guard = self.inner.core.read().await;
            let core = guard.as_ref().ok_or(SessionError::NotStarted)?;
            core.active.as_ref().map_or(0, |a| a.display_index + 1)
        };
        self.navigate_to(target).await
    }

    /// `None` when already on the first question.
    pub async fn previous(&self) -> Result<Option<Navigation>, SessionError> {
        let target = {
            let guard = self.inner.core.read().await;
            let core = guard.as_ref().ok_or(SessionError::NotStarted)?;
            core.active
                .as_ref()
                .and_then(|a| a.display_index.checked_sub(1))
        };
        match target {
            Some(index) => self.navigate_to(index).await.map(Some),
            None => Ok(None),
        }
    }

    /// `option_id` is the canonical id of an option of the active question.
    pub async fn on_option_clicked(&self, option_id: u64) -> Result<ResolutionStatus, SessionError> {
        let mut guard = self.inner.core.write().await;
        let core = guard.as_mut().ok_or(SessionError::NotStarted)?;
        self.apply_click(core, option_id)
    }

    /// `position` is 1-based, as shown to the user.
    pub async fn click_display_option(&self, position: usize) -> Result<ResolutionStatus, SessionError> {
        let mut guard = self.inner.core.write().await;
        let core = guard.as_mut().ok_or(SessionError::NotStarted)?;
        let active = core.active()?;
        let option_id = position
            .checked_sub(1)
            .and_then(|p| {
                core.mapping
                    .option_id_at(&active.question, active.canonical_index, p)
            })
            .ok_or(SessionError::UnknownOption {
                question_id: active.question.id,
                option_id: position as u64,
            })?;
        self.apply_click(core, option_id)
    }

    fn apply_click(&self, core: &mut SessionCore, option_id: u64) -> Result<ResolutionStatus, SessionError> {
        let epoch = self.current_epoch();
        let (display_index, canonical_index, question) = {
            let active = core.active()?;
            (active.display_index, active.canonical_index, active.question.clone())
        };
        if question.option(option_id).is_none() {
            return Err(SessionError::UnknownOption {
                question_id: question.id,
                option_id,
            });
        }

        let outcome = core.outcome(canonical_index);
        if outcome.is_resolved() {
            debug!(epoch, display_index, option_id, "question already resolved, click ignored");
            return Ok(evaluate(&question, core.selections.selections(question.id)));
        }

        let change = core.selections.select(question.id, option_id, question.kind);
        let selections = core.selections.selections(question.id);
        if change != SelectionChange::Unchanged {
            let _ = self.inner.events.selection.send(SelectionChanged {
                question_id: question.id,
                display_index,
                selections: selections.to_vec(),
            });
        }

        let status = evaluate(&question, selections);
        let phase = if status.resolved {
            QuestionPhase::Resolved
        } else if question.kind == QuestionKind::Multi && !selections.is_empty() {
            QuestionPhase::InProgress
        } else {
            QuestionPhase::Unanswered
        };
        let outcome = QuestionOutcome {
            phase,
            timed_out: false,
        };
        core.outcomes.insert(canonical_index, outcome);

        if status.resolved {
            core.timer.stop_early();
            self.request_explanation(core, epoch);
            info!(epoch, display_index, "question resolved");
        }
        self.emit_resolution(display_index, &question, status, outcome);
        Ok(status)
    }

    /// Forces expiry of the running countdown. Returns false when the timer
    /// was not running (already stopped, expired or idle).
    pub async fn on_timer_expired(&self) -> bool {
        let mut guard = self.inner.core.write().await;
        let Some(core) = guard.as_mut() else {
            return false;
        };
        let epoch = self.current_epoch();
        match core.timer.expire() {
            Some(TimerEvent::Expired { .. }) => {
                self.handle_expiry(core, epoch);
                true
            }
            _ => false,
        }
    }

    /// Publishes a formatted explanation if `epoch` is still current and the
    /// active question is resolved and awaiting its requested explanation.
    /// Returns whether anything was published.
    pub async fn on_explanation_ready(&self, epoch: u64, text: Result<String, SessionError>) -> bool {
        let mut guard = self.inner.core.write().await;
        let current = self.current_epoch();
        if current != epoch {
            let err = SessionError::StaleResultDiscarded {
                initiated: epoch,
                current,
            };
            debug!(code = err.code(), "{}", err);
            return false;
        }
        let Some(core) = guard.as_mut() else {
            return false;
        };
        let Some(active) = core.active.as_mut() else {
            return false;
        };
        // Only the answer to this visit's own request may publish, and only once.
        if !active.explanation_requested || active.explanation_published {
            debug!(epoch, "unrequested explanation ignored");
            return false;
        }
        let (display_index, canonical_index) = (active.display_index, active.canonical_index);
        let mut outcome = core.outcome(canonical_index);
        if !outcome.is_resolved() {
            debug!(epoch, display_index, "explanation for an unresolved question ignored");
            return false;
        }
        if let Some(active) = core.active.as_mut() {
            active.explanation_published = true;
        }

        let published = match text {
            Ok(text) => {
                self.inner.cache.store(canonical_index, text.clone(), false);
                self.inner.cache.get(canonical_index).unwrap_or(text)
            }
            Err(err) => {
                warn!(code = err.code(), display_index, "explanation formatting failed: {}", err);
                String::new()
            }
        };

        outcome.phase = QuestionPhase::ExplanationVisible;
        core.outcomes.insert(canonical_index, outcome);
        let _ = self.inner.events.explanation.send(ExplanationReady {
            display_index,
            text: published,
        });
        true
    }

    fn handle_expiry(&self, core: &mut SessionCore, epoch: u64) {
        let Some(active) = core.active.as_ref() else {
            return;
        };
        let (display_index, canonical_index, question) = (
            active.display_index,
            active.canonical_index,
            active.question.clone(),
        );
        let _ = self.inner.events.expired.send(TimerExpired { display_index });

        if core.outcome(canonical_index).is_resolved() {
            return;
        }
        let outcome = QuestionOutcome {
            phase: QuestionPhase::Resolved,
            timed_out: true,
        };
        core.outcomes.insert(canonical_index, outcome);
        let status = evaluate(&question, core.selections.selections(question.id));
        info!(epoch, display_index, "question timed out");
        self.emit_resolution(display_index, &question, status, outcome);
        self.request_explanation(core, epoch);
    }

    fn request_explanation(&self, core: &mut SessionCore, epoch: u64) {
        let Some(active) = core.active.as_mut() else {
            return;
        };
        if active.explanation_requested {
            debug!(epoch, "explanation already requested for this epoch");
            return;
        }
        active.explanation_requested = true;

        let canonical_index = active.canonical_index;
        let question = active.question.clone();
        let cached = self.inner.cache.get(canonical_index);
        let request = ExplanationRequest {
            display_options: core.mapping.display_options(&question, canonical_index),
            question,
        };
        let formatter = self.inner.formatter.clone();
        let controller = self.clone();
        tokio::spawn(async move {
            let text = match cached {
                Some(text) => Ok(text),
                None => formatter.format(request).await,
            };
            controller.on_explanation_ready(epoch, text).await;
        });
    }

    fn spawn_timer_driver(&self, epoch: u64) {
        let controller = self.clone();
        let period = self.inner.config.tick_interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let started = Instant::now();
            let mut interval = tokio::time::interval_at(started + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !controller.on_timer_tick(epoch, started.elapsed()).await {
                    break;
                }
            }
        });
    }

    /// Returns whether the driver should keep ticking.
    async fn on_timer_tick(&self, epoch: u64, elapsed: Duration) -> bool {
        let mut guard = self.inner.core.write().await;
        if self.current_epoch() != epoch {
            debug!(epoch, "timer tick from a previous question ignored");
            return false;
        }
        let Some(core) = guard.as_mut() else {
            return false;
        };
        let Some(display_index) = core.active.as_ref().map(|a| a.display_index) else {
            return false;
        };
        match core.timer.advance(elapsed) {
            Some(TimerEvent::Tick { elapsed }) => {
                let _ = self.inner.events.tick.send(TimerTick {
                    display_index,
                    elapsed_ms: elapsed.as_millis() as u64,
                    remaining_ms: core.timer.remaining().as_millis() as u64,
                });
                true
            }
            Some(TimerEvent::Expired { .. }) => {
                self.handle_expiry(core, epoch);
                false
            }
            None => false,
        }
    }

    fn emit_resolution(
        &self,
        display_index: usize,
        question: &Question,
        status: ResolutionStatus,
        outcome: QuestionOutcome,
    ) {
        let _ = self.inner.events.resolution.send(ResolutionChanged {
            display_index,
            status,
            phase: outcome.phase,
            timed_out: outcome.timed_out,
            hint: status.progress_hint(question.kind),
        });
    }

    pub async fn question_count(&self) -> usize {
        let guard = self.inner.core.read().await;
        guard.as_ref().map_or(0, |core| core.questions.len())
    }

    pub async fn active_display_index(&self) -> Option<usize> {
        let guard = self.inner.core.read().await;
        guard.as_ref()?.active.as_ref().map(|a| a.display_index)
    }

    pub async fn timer_state(&self) -> Option<TimerState> {
        let guard = self.inner.core.read().await;
        guard.as_ref().map(|core| core.timer.state())
    }

    pub async fn question(&self, display_index: usize) -> Result<Arc<Question>, SessionError> {
        let guard = self.inner.core.read().await;
        let core = guard.as_ref().ok_or(SessionError::NotStarted)?;
        core.question_at(display_index)
            .map(|(_, q)| q)
            .ok_or(SessionError::MissingData { display_index })
    }

    /// Options of a question in the order the user sees them.
    pub async fn display_options(&self, display_index: usize) -> Result<Vec<QuizOption>, SessionError> {
        let guard = self.inner.core.read().await;
        let core = guard.as_ref().ok_or(SessionError::NotStarted)?;
        let (canonical_index, question) = core
            .question_at(display_index)
            .ok_or(SessionError::MissingData { display_index })?;
        Ok(core.mapping.display_options(&question, canonical_index))
    }

    pub async fn resolution(&self, display_index: usize) -> Result<ResolutionStatus, SessionError> {
        let guard = self.inner.core.read().await;
        let core = guard.as_ref().ok_or(SessionError::NotStarted)?;
        let (_, question) = core
            .question_at(display_index)
            .ok_or(SessionError::MissingData { display_index })?;
        Ok(evaluate(&question, core.selections.selections(question.id)))
    }

    pub async fn outcome(&self, display_index: usize) -> Result<QuestionOutcome, SessionError> {
        let guard = self.inner.core.read().await;
        let core = guard.as_ref().ok_or(SessionError::NotStarted)?;
        let (canonical_index, _) = core
            .question_at(display_index)
            .ok_or(SessionError::MissingData { display_index })?;
        Ok(core.outcome(canonical_index))
    }

    pub async fn explanation(&self, display_index: usize) -> Option<String> {
        let guard = self.inner.core.read().await;
        let canonical_index = guard.as_ref()?.mapping.to_canonical_index(display_index)?;
        self.inner.cache.get(canonical_index)
    }

    pub async fn option_feedback(&self, display_index: usize) -> Result<Vec<OptionFeedback>, SessionError> {
        let guard = self.inner.core.read().await;
        let core = guard.as_ref().ok_or(SessionError::NotStarted)?;
        let (canonical_index, question) = core
            .question_at(display_index)
            .ok_or(SessionError::MissingData { display_index })?;
        let reveal_all = core.outcome(canonical_index).is_resolved();
        Ok(core
            .mapping
            .display_options(&question, canonical_index)
            .into_iter()
            .enumerate()
            .map(|(pos, option)| {
                let selected = core.selections.is_selected(question.id, option.option_id);
                OptionFeedback {
                    option_id: option.option_id,
                    display_position: pos + 1,
                    correct: (reveal_all || selected).then_some(option.correct),
                    text: option.text,
                    selected,
                }
            })
            .collect())
    }

    pub async fn summary(&self) -> SessionSummary {
        let guard = self.inner.core.read().await;
        let Some(core) = guard.as_ref() else {
            return SessionSummary::default();
        };
        let mut summary = SessionSummary {
            total: core.questions.len(),
            ..SessionSummary::default()
        };
        for canonical_index in 0..core.questions.len() {
            let outcome = core.outcome(canonical_index);
            if outcome.timed_out {
                summary.timed_out += 1;
            } else if outcome.is_resolved() {
                summary.answered_correctly += 1;
            } else {
                summary.unanswered += 1;
            }
        }
        summary
    }

    /// Captures the session for a pause boundary. Saving is spawned and never
    /// awaited; failures are only logged.
    pub async fn suspend(&self) -> Option<SessionSnapshot> {
        let snapshot = {
            let guard = self.inner.core.read().await;
            let core = guard.as_ref()?;
            SessionSnapshot {
                session_id: self.inner.session_id.clone(),
                quiz_id: core.quiz_id.clone(),
                active_display_index: core.active.as_ref().map(|a| a.display_index),
                selections: core.selections.clone(),
                outcomes: core.outcomes.clone(),
                mapping: core.mapping.as_ref().clone(),
                saved_at: Utc::now(),
            }
        };
        if let Some(store) = self.inner.snapshots.clone() {
            let to_save = snapshot.clone();
            tokio::spawn(async move {
                if let Err(err) = store.save(to_save).await {
                    warn!("failed to save session snapshot: {}", err);
                }
            });
        }
        Some(snapshot)
    }

    /// Restores the last saved snapshot, if the store has one.
    pub async fn resume(&self) -> Result<Option<Navigation>, SessionError> {
        let Some(store) = self.inner.snapshots.clone() else {
            return Ok(None);
        };
        let snapshot = match store.restore().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!("failed to restore session snapshot: {}", err);
                return Ok(None);
            }
        };
        self.resume_from(snapshot).await
    }

    /// Reinstalls selections, outcomes and the display order from `snapshot`,
    /// then re-enters the question that was active.
    pub async fn resume_from(&self, snapshot: SessionSnapshot) -> Result<Option<Navigation>, SessionError> {
        let loaded = self.inner.loader.load_questions(&snapshot.quiz_id).await?;
        let mapping = if snapshot.mapping.fits(&loaded.questions) {
            self.inner.shuffler.install(&loaded.quiz_id, snapshot.mapping)
        } else {
            warn!(quiz_id = %loaded.quiz_id, "snapshot display order does not fit quiz, reshuffling");
            self.inner.shuffler.new_session(&loaded.quiz_id);
            self.inner.shuffler.build_display_order(
                &loaded.quiz_id,
                &loaded.questions,
                self.inner.config.shuffle,
            )
        };
        self.install(loaded, mapping, snapshot.selections, snapshot.outcomes)
            .await;
        match snapshot.active_display_index {
            Some(index) => self.navigate_to(index).await.map(Some),
            None => Ok(None),
        }
    }
}
