use crate::shuffle::ShufflePolicy;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub quiz_dir: String,
    pub question_duration: Duration,
    pub tick_interval: Duration,
    pub frame_delay: Duration,
    pub shuffle: ShufflePolicy,
    pub snapshot_path: Option<String>,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quiz_dir: "quizzes".to_string(),
            question_duration: Duration::from_secs(30),
            tick_interval: Duration::from_millis(250),
            frame_delay: Duration::from_millis(16),
            shuffle: ShufflePolicy {
                shuffle_questions: false,
                shuffle_options: true,
                seed: None,
            },
            snapshot_path: None,
            event_capacity: 200,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let quiz_dir = std::env::var("QUIZ_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.quiz_dir);
        let question_duration = env_parse::<u64>("QUIZ_QUESTION_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.question_duration);
        let tick_interval = env_parse::<u64>("QUIZ_TICK_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval);
        let frame_delay = env_parse::<u64>("QUIZ_FRAME_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.frame_delay);
        let shuffle = ShufflePolicy {
            shuffle_questions: env_flag("QUIZ_SHUFFLE_QUESTIONS")
                .unwrap_or(defaults.shuffle.shuffle_questions),
            shuffle_options: env_flag("QUIZ_SHUFFLE_OPTIONS")
                .unwrap_or(defaults.shuffle.shuffle_options),
            seed: env_parse::<u64>("QUIZ_SEED"),
        };
        let snapshot_path = std::env::var("QUIZ_SNAPSHOT_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let event_capacity = env_parse::<usize>("QUIZ_EVENT_CAPACITY")
            .unwrap_or(defaults.event_capacity);

        Self {
            quiz_dir,
            question_duration,
            tick_interval,
            frame_delay,
            shuffle,
            snapshot_path,
            event_capacity,
        }
    }
}
