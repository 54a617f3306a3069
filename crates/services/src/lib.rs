#![forbid(unsafe_code)]

pub mod error;
pub mod question_source;
pub mod quiz_engine;

pub use trivia_core::Clock;

pub use error::{EngineError, SourceError};
pub use question_source::{
    CachedQuestionSource, DEFAULT_API_URL, OpenTriviaClient, OpenTriviaConfig, QuestionSource,
};
pub use quiz_engine::{EngineStatus, NextOutcome, QuizEngine, StartParams};
