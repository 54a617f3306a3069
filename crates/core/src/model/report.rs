use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::QuizSession;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReportError {
    #[error("session is not completed")]
    NotCompleted,
}

/// Per-question correctness entry in a final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionReview {
    pub question_text: String,
    pub chosen_answer: Option<String>,
    pub correct_answer: String,
    pub is_correct: bool,
}

/// Final results of a completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    player_name: String,
    score: usize,
    total: usize,
    per_question: Vec<QuestionReview>,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

impl SessionReport {
    /// Summarize a completed session into a per-question report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::NotCompleted` if the session has not finished.
    pub fn from_session(session: &QuizSession) -> Result<Self, ReportError> {
        let completed_at = session.completed_at().ok_or(ReportError::NotCompleted)?;

        let per_question = session
            .questions()
            .iter()
            .enumerate()
            .map(|(index, question)| {
                let chosen = session.answer_at(index);
                QuestionReview {
                    question_text: question.text.clone(),
                    chosen_answer: chosen.map(str::to_owned),
                    correct_answer: question.correct_answer.clone(),
                    is_correct: chosen.is_some_and(|answer| question.is_correct(answer)),
                }
            })
            .collect();

        Ok(Self {
            player_name: session.player_name().to_owned(),
            score: session.score(),
            total: session.total(),
            per_question,
            started_at: session.started_at(),
            completed_at,
        })
    }

    #[must_use]
    pub fn player_name(&self) -> &str {
        &self.player_name
    }

    #[must_use]
    pub fn score(&self) -> usize {
        self.score
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn per_question(&self) -> &[QuestionReview] {
        &self.per_question
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Score as a fraction of the total, in `[0.0, 1.0]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score_fraction(&self) -> f64 {
        self.score as f64 / self.total as f64
    }

    /// Score rounded to a whole percentage.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn percentage(&self) -> u8 {
        (self.score_fraction() * 100.0).round() as u8
    }

    /// Qualitative message for the score bucket.
    #[must_use]
    pub fn message(&self) -> &'static str {
        match self.percentage() {
            80..=100 => "Excellent!",
            60..=79 => "Good job!",
            40..=59 => "Not bad!",
            _ => "Keep practicing!",
        }
    }
}
