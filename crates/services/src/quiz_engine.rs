use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{error, warn};

use storage::repository::{ProgressRecord, Storage};
use trivia_core::Clock;
use trivia_core::model::{Advance, Difficulty, Question, QuizSession, SessionReport};

use crate::error::EngineError;
use crate::question_source::QuestionSource;

/// Validated start parameters, produced by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartParams {
    pub player_name: String,
    pub difficulty: Difficulty,
    pub question_count: usize,
}

/// Externally observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Constructed, `start` not called yet.
    Idle,
    Loading,
    Error,
    Active,
    Completed,
}

/// Outcome of a `next` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextOutcome {
    /// The current question is unanswered; the index did not move.
    Blocked,
    Moved,
    /// The session finished; the final report is available.
    Completed,
}

/// Automatic retries after the first failed load attempt.
const AUTO_RETRY_BUDGET: u32 = 2;
/// Pause between automatic load retries.
const AUTO_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Shown when loading fails for good; the cause is logged, never displayed.
const LOAD_ERROR_MESSAGE: &str = "Failed to load questions. Please try again later.";

/// Drives one quiz session from question load to the final report.
///
/// The engine owns the navigation/scoring state machine: `Loading` into
/// `Active`, back-and-forth moves within the question list, and a single
/// `Completed` handoff that clears persisted progress. Every mutation in
/// `Active` performs exactly one progress save before returning.
pub struct QuizEngine {
    source: Arc<dyn QuestionSource>,
    storage: Storage,
    clock: Clock,
    retry_delay: Duration,
    status: EngineStatus,
    params: Option<StartParams>,
    session: Option<QuizSession>,
    report: Option<SessionReport>,
    current_options: Vec<String>,
    error_message: Option<String>,
    /// Monotonic token identifying the latest `start` invocation. A load
    /// attempt compares it after every suspension point and discards its
    /// result when superseded.
    attempt: u64,
}

impl QuizEngine {
    #[must_use]
    pub fn new(source: Arc<dyn QuestionSource>, storage: Storage) -> Self {
        Self {
            source,
            storage,
            clock: Clock::default(),
            retry_delay: AUTO_RETRY_DELAY,
            status: EngineStatus::Idle,
            params: None,
            session: None,
            report: None,
            current_options: Vec::new(),
            error_message: None,
            attempt: 0,
        }
    }

    /// Use a fixed clock for deterministic timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Override the pause between automatic load retries.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        self.status
    }

    #[must_use]
    pub fn session(&self) -> Option<&QuizSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.session.as_ref().and_then(QuizSession::current_question)
    }

    /// Displayed answer ordering for the current question, shuffled once
    /// per presentation. Always a permutation of the question's options.
    #[must_use]
    pub fn current_options(&self) -> &[String] {
        &self.current_options
    }

    #[must_use]
    pub fn final_report(&self) -> Option<&SessionReport> {
        self.report.as_ref()
    }

    /// User-facing message carried by the `Error` state.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Begin a session: load questions, merge any resumable progress, and
    /// transition to `Active` (or `Error` once the retry budget runs out).
    ///
    /// Re-invoking while a previous load is pending supersedes it: the old
    /// attempt's result is discarded via the attempt token.
    pub async fn start(&mut self, params: StartParams) {
        self.attempt += 1;
        let token = self.attempt;

        self.status = EngineStatus::Loading;
        self.session = None;
        self.report = None;
        self.error_message = None;
        self.current_options.clear();
        self.params = Some(params.clone());

        if let Err(err) = self.storage.player.save_player_name(&params.player_name).await {
            warn!(error = %err, "failed to persist player name");
        }

        let mut retries_left = AUTO_RETRY_BUDGET;
        loop {
            let result = self
                .source
                .fetch(params.question_count, params.difficulty)
                .await;
            if token != self.attempt {
                return;
            }

            match result {
                Ok(questions) => {
                    self.activate(&params, questions).await;
                    return;
                }
                Err(err) if err.is_retryable() && retries_left > 0 => {
                    retries_left -= 1;
                    warn!(error = %err, retries_left, "question load failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    if token != self.attempt {
                        return;
                    }
                }
                Err(err) => {
                    error!(error = %err, "question load failed");
                    self.status = EngineStatus::Error;
                    self.error_message = Some(LOAD_ERROR_MESSAGE.to_owned());
                    return;
                }
            }
        }
    }

    /// Re-run `start` with the previous parameters. Valid only from `Error`;
    /// resets the automatic retry budget.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotRetryable` outside the `Error` state.
    pub async fn retry(&mut self) -> Result<(), EngineError> {
        if self.status != EngineStatus::Error {
            return Err(EngineError::NotRetryable);
        }
        let params = self.params.clone().ok_or(EngineError::NotRetryable)?;
        self.start(params).await;
        Ok(())
    }

    /// Record an answer for the current question without advancing.
    ///
    /// Returns `Ok(false)` when the index is out of range (defensive no-op
    /// against stale callers); otherwise records, adjusts the score, and
    /// persists.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotActive` outside the `Active` state.
    pub async fn submit_answer(&mut self, answer: &str) -> Result<bool, EngineError> {
        if self.status != EngineStatus::Active {
            return Err(EngineError::NotActive);
        }
        let session = self.session.as_mut().ok_or(EngineError::NotActive)?;

        let recorded = session.record_answer(answer);
        if recorded {
            self.persist().await;
        }
        Ok(recorded)
    }

    /// Move to the next question, or complete the session on the last one.
    ///
    /// Completion builds the final report and clears persisted progress,
    /// exactly once.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotActive` outside the `Active` state.
    pub async fn next(&mut self) -> Result<NextOutcome, EngineError> {
        if self.status != EngineStatus::Active {
            return Err(EngineError::NotActive);
        }
        let now = self.clock.now();
        let session = self.session.as_mut().ok_or(EngineError::NotActive)?;

        match session.advance(now) {
            Advance::Blocked => Ok(NextOutcome::Blocked),
            Advance::Moved => {
                self.reshuffle_options();
                self.persist().await;
                Ok(NextOutcome::Moved)
            }
            Advance::Finished => {
                self.finish().await;
                Ok(NextOutcome::Completed)
            }
        }
    }

    /// Step back one question. `Ok(false)` at the first question.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotActive` outside the `Active` state.
    pub async fn previous(&mut self) -> Result<bool, EngineError> {
        if self.status != EngineStatus::Active {
            return Err(EngineError::NotActive);
        }
        let session = self.session.as_mut().ok_or(EngineError::NotActive)?;

        if session.go_back() {
            self.reshuffle_options();
            self.persist().await;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn activate(&mut self, params: &StartParams, questions: Vec<Question>) {
        let saved = match self.storage.progress.load_progress().await {
            Ok(saved) => saved,
            Err(err) => {
                warn!(error = %err, "failed to read saved progress");
                None
            }
        };

        let session = match saved {
            // A saved fragment only resumes against a batch of the same
            // shape; anything else is discarded and the run starts fresh.
            Some(record) if record.questions.len() == questions.len() => QuizSession::restore(
                params.player_name.clone(),
                params.difficulty,
                questions,
                record.current_index,
                record.answers,
                record.started_at,
            ),
            _ => QuizSession::new(
                params.player_name.clone(),
                params.difficulty,
                questions,
                self.clock.now(),
            ),
        };

        match session {
            Ok(session) => {
                self.session = Some(session);
                self.status = EngineStatus::Active;
                self.reshuffle_options();
                self.persist().await;
            }
            Err(err) => {
                error!(error = %err, "question source returned an unusable batch");
                self.status = EngineStatus::Error;
                self.error_message = Some(LOAD_ERROR_MESSAGE.to_owned());
            }
        }
    }

    async fn finish(&mut self) {
        if let Some(session) = &self.session {
            match SessionReport::from_session(session) {
                Ok(report) => self.report = Some(report),
                Err(err) => warn!(error = %err, "completed session could not be summarized"),
            }
        }
        self.status = EngineStatus::Completed;
        self.current_options.clear();

        if let Err(err) = self.storage.progress.clear_progress().await {
            warn!(error = %err, "failed to clear persisted progress");
        }
    }

    async fn persist(&self) {
        let Some(session) = &self.session else {
            return;
        };
        let record = ProgressRecord::from_session(session);
        if let Err(err) = self.storage.progress.save_progress(&record).await {
            warn!(error = %err, "failed to persist session progress");
        }
    }

    fn reshuffle_options(&mut self) {
        self.current_options = self
            .session
            .as_ref()
            .and_then(QuizSession::current_question)
            .map(Question::options)
            .unwrap_or_default();
        self.current_options.shuffle(&mut rand::rng());
    }
}
