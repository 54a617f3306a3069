use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{Difficulty, Question};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("a session needs at least one question")]
    Empty,
}

/// Outcome of an advance step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The current question has no recorded answer; the index did not move.
    Blocked,
    /// Moved to the next question.
    Moved,
    /// The last question was answered; the session is now completed.
    Finished,
}

/// One complete attempt at a fixed batch of questions.
///
/// The question list is immutable after construction. `score` is kept in
/// lockstep with `answers`: it always equals the number of recorded answers
/// matching their question's correct answer. On restore the score is
/// recomputed from the answers, never read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct QuizSession {
    player_name: String,
    difficulty: Difficulty,
    questions: Vec<Question>,
    current_index: usize,
    score: usize,
    answers: BTreeMap<usize, String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl QuizSession {
    /// Create a fresh session at the first question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Empty` if no questions are provided.
    pub fn new(
        player_name: impl Into<String>,
        difficulty: Difficulty,
        questions: Vec<Question>,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if questions.is_empty() {
            return Err(SessionError::Empty);
        }

        Ok(Self {
            player_name: player_name.into(),
            difficulty,
            questions,
            current_index: 0,
            score: 0,
            answers: BTreeMap::new(),
            started_at,
            completed_at: None,
        })
    }

    /// Rebuild a session from persisted progress against a freshly fetched
    /// question set.
    ///
    /// The saved index is clamped into range, answer keys outside the
    /// question range are dropped, and the score is recomputed from the
    /// surviving answers. A persisted score is deliberately not an input.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Empty` if no questions are provided.
    pub fn restore(
        player_name: impl Into<String>,
        difficulty: Difficulty,
        questions: Vec<Question>,
        saved_index: usize,
        saved_answers: BTreeMap<usize, String>,
        started_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        if questions.is_empty() {
            return Err(SessionError::Empty);
        }

        let total = questions.len();
        let answers: BTreeMap<usize, String> = saved_answers
            .into_iter()
            .filter(|(index, _)| *index < total)
            .collect();
        let score = recompute_score(&questions, &answers);

        Ok(Self {
            player_name: player_name.into(),
            difficulty,
            questions,
            current_index: saved_index.min(total - 1),
            score,
            answers,
            started_at,
            completed_at: None,
        })
    }

    #[must_use]
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Total number of questions in this session.
    #[must_use]
    pub fn total(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn score(&self) -> usize {
        self.score
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<usize, String> {
        &self.answers
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    /// The recorded answer for the given question index, if any.
    #[must_use]
    pub fn answer_at(&self, index: usize) -> Option<&str> {
        self.answers.get(&index).map(String::as_str)
    }

    #[must_use]
    pub fn is_current_answered(&self) -> bool {
        self.answers.contains_key(&self.current_index)
    }

    /// Record an answer for the current question without advancing.
    ///
    /// Re-submitting replaces the previous answer; the score is adjusted by
    /// membership, never blindly incremented, so the count stays exact.
    /// Returns `false` when the session is completed or the index is out of
    /// range (defensive no-op against stale callers).
    pub fn record_answer(&mut self, answer: &str) -> bool {
        if self.completed_at.is_some() {
            return false;
        }
        let Some(question) = self.questions.get(self.current_index) else {
            return false;
        };

        let was_correct = self
            .answers
            .get(&self.current_index)
            .is_some_and(|previous| question.is_correct(previous));
        let now_correct = question.is_correct(answer);

        match (was_correct, now_correct) {
            (false, true) => self.score += 1,
            (true, false) => self.score -= 1,
            _ => {}
        }

        self.answers.insert(self.current_index, answer.to_owned());
        true
    }

    /// Move to the next question, completing the session on the last one.
    ///
    /// Advancement is blocked while the current question is unanswered, and
    /// once the session has completed.
    pub fn advance(&mut self, completed_at: DateTime<Utc>) -> Advance {
        if self.completed_at.is_some() || !self.is_current_answered() {
            return Advance::Blocked;
        }

        if self.current_index + 1 == self.questions.len() {
            self.completed_at = Some(completed_at);
            Advance::Finished
        } else {
            self.current_index += 1;
            Advance::Moved
        }
    }

    /// Step back one question. No-op at the first question or once completed.
    pub fn go_back(&mut self) -> bool {
        if self.completed_at.is_some() || self.current_index == 0 {
            return false;
        }
        self.current_index -= 1;
        true
    }
}

fn recompute_score(questions: &[Question], answers: &BTreeMap<usize, String>) -> usize {
    answers
        .iter()
        .filter(|(index, answer)| {
            questions
                .get(**index)
                .is_some_and(|question| question.is_correct(answer))
        })
        .count()
}
