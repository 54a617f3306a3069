mod question;
mod report;
mod session;

pub use question::{Difficulty, ParseDifficultyError, Question, QuestionKind};
pub use report::{QuestionReview, ReportError, SessionReport};
pub use session::{Advance, QuizSession, SessionError};
