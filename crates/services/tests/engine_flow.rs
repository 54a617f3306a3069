use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use services::{
    EngineError, EngineStatus, NextOutcome, QuestionSource, QuizEngine, SourceError, StartParams,
};
use storage::repository::{
    InMemoryStore, PROGRESS_SCHEMA_VERSION, PlayerRepository, ProgressRecord, ProgressRepository,
    Storage,
};
use trivia_core::model::{Difficulty, Question, QuestionKind};
use trivia_core::time::{fixed_clock, fixed_now};

fn build_question(id: usize, difficulty: Difficulty) -> Question {
    Question {
        category: "General Knowledge".to_owned(),
        kind: QuestionKind::Multiple,
        difficulty,
        text: format!("Question {id}?"),
        correct_answer: format!("right {id}"),
        incorrect_answers: vec![
            format!("wrong {id}a"),
            format!("wrong {id}b"),
            format!("wrong {id}c"),
        ],
    }
}

fn batch(count: usize, difficulty: Difficulty) -> Vec<Question> {
    (0..count).map(|id| build_question(id, difficulty)).collect()
}

enum ScriptedReply {
    Reply(Result<Vec<Question>, SourceError>),
    /// Never resolves; exercises callers dropping a pending load.
    Hang,
}

/// Fake source that plays back a queue of outcomes, then serves default
/// batches.
struct ScriptedSource {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(replies: Vec<ScriptedReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn well_behaved() -> Arc<Self> {
        Self::new(Vec::new())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuestionSource for ScriptedSource {
    async fn fetch(
        &self,
        count: usize,
        difficulty: Difficulty,
    ) -> Result<Vec<Question>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(ScriptedReply::Reply(result)) => result,
            Some(ScriptedReply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
            None => Ok(batch(count, difficulty)),
        }
    }
}

fn build_storage() -> (Storage, InMemoryStore) {
    let store = InMemoryStore::new();
    let storage = Storage {
        progress: Arc::new(store.clone()),
        player: Arc::new(store.clone()),
    };
    (storage, store)
}

fn build_engine(source: Arc<ScriptedSource>, storage: Storage) -> QuizEngine {
    QuizEngine::new(source, storage)
        .with_clock(fixed_clock())
        .with_retry_delay(Duration::ZERO)
}

fn start_params(question_count: usize) -> StartParams {
    StartParams {
        player_name: "Ada".to_owned(),
        difficulty: Difficulty::Medium,
        question_count,
    }
}

#[tokio::test]
async fn full_run_completes_and_clears_progress() {
    let source = ScriptedSource::well_behaved();
    let (storage, store) = build_storage();
    let mut engine = build_engine(source, storage);

    assert_eq!(engine.status(), EngineStatus::Idle);
    engine.start(start_params(10)).await;
    assert_eq!(engine.status(), EngineStatus::Active);
    assert_eq!(store.load_player_name().await.unwrap().as_deref(), Some("Ada"));

    for index in 0..10 {
        let answer = format!("right {index}");
        assert_eq!(engine.submit_answer(&answer).await, Ok(true));
        let outcome = engine.next().await.unwrap();
        if index < 9 {
            assert_eq!(outcome, NextOutcome::Moved);
        } else {
            assert_eq!(outcome, NextOutcome::Completed);
        }
    }

    assert_eq!(engine.status(), EngineStatus::Completed);
    let report = engine.final_report().expect("report after completion");
    assert_eq!(report.score(), 10);
    assert!((report.score_fraction() - 1.0).abs() < f64::EPSILON);
    assert_eq!(report.message(), "Excellent!");

    // Progress is destroyed exactly at the completion handoff.
    assert!(store.load_progress().await.unwrap().is_none());

    // A completed session rejects further play.
    assert_eq!(engine.submit_answer("right 0").await, Err(EngineError::NotActive));
    assert_eq!(engine.next().await, Err(EngineError::NotActive));
}

#[tokio::test]
async fn every_mutation_persists_progress() {
    let source = ScriptedSource::well_behaved();
    let (storage, store) = build_storage();
    let mut engine = build_engine(source, storage);

    engine.start(start_params(3)).await;
    let saved = store.load_progress().await.unwrap().expect("saved on start");
    assert_eq!(saved.current_index, 0);
    assert!(saved.answers.is_empty());

    engine.submit_answer("right 0").await.unwrap();
    let saved = store.load_progress().await.unwrap().expect("saved on submit");
    assert_eq!(saved.answers.get(&0).map(String::as_str), Some("right 0"));
    assert_eq!(saved.score, 1);

    engine.next().await.unwrap();
    let saved = store.load_progress().await.unwrap().expect("saved on next");
    assert_eq!(saved.current_index, 1);

    engine.previous().await.unwrap();
    let saved = store.load_progress().await.unwrap().expect("saved on previous");
    assert_eq!(saved.current_index, 0);
}

#[tokio::test]
async fn resubmission_keeps_score_exact() {
    let source = ScriptedSource::well_behaved();
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source, storage);
    engine.start(start_params(5)).await;

    engine.submit_answer("wrong 0a").await.unwrap();
    assert_eq!(engine.session().unwrap().score(), 0);

    engine.submit_answer("right 0").await.unwrap();
    assert_eq!(engine.session().unwrap().score(), 1);

    engine.submit_answer("right 0").await.unwrap();
    assert_eq!(engine.session().unwrap().score(), 1);

    engine.submit_answer("wrong 0b").await.unwrap();
    assert_eq!(engine.session().unwrap().score(), 0);
}

#[tokio::test]
async fn navigation_guards_hold() {
    let source = ScriptedSource::well_behaved();
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source, storage);
    engine.start(start_params(3)).await;

    // Unanswered question blocks advancement.
    assert_eq!(engine.next().await, Ok(NextOutcome::Blocked));
    assert_eq!(engine.session().unwrap().current_index(), 0);

    // Previous is a no-op at the first question.
    assert_eq!(engine.previous().await, Ok(false));

    engine.submit_answer("right 0").await.unwrap();
    assert_eq!(engine.next().await, Ok(NextOutcome::Moved));
    assert_eq!(engine.previous().await, Ok(true));
    assert_eq!(engine.session().unwrap().current_index(), 0);
}

#[tokio::test]
async fn restore_adopts_progress_and_recomputes_score() {
    let source = ScriptedSource::well_behaved();
    let (storage, store) = build_storage();

    let record = ProgressRecord {
        version: PROGRESS_SCHEMA_VERSION,
        player_name: "Ada".to_owned(),
        difficulty: Difficulty::Medium,
        questions: batch(3, Difficulty::Medium),
        current_index: 1,
        // A tampered persisted score must be ignored.
        score: 999,
        answers: BTreeMap::from([
            (0, "right 0".to_owned()),
            (1, "wrong 1a".to_owned()),
        ]),
        started_at: fixed_now(),
    };
    store.save_progress(&record).await.unwrap();

    let mut engine = build_engine(source, storage);
    engine.start(start_params(3)).await;

    assert_eq!(engine.status(), EngineStatus::Active);
    let session = engine.session().unwrap();
    assert_eq!(session.current_index(), 1);
    assert_eq!(session.score(), 1);
    assert_eq!(session.answer_at(0), Some("right 0"));
    assert_eq!(session.answer_at(1), Some("wrong 1a"));
}

#[tokio::test]
async fn restore_discards_mismatched_question_count() {
    let source = ScriptedSource::well_behaved();
    let (storage, store) = build_storage();

    let record = ProgressRecord {
        version: PROGRESS_SCHEMA_VERSION,
        player_name: "Ada".to_owned(),
        difficulty: Difficulty::Medium,
        questions: batch(5, Difficulty::Medium),
        current_index: 4,
        score: 4,
        answers: BTreeMap::from([(0, "right 0".to_owned())]),
        started_at: fixed_now(),
    };
    store.save_progress(&record).await.unwrap();

    let mut engine = build_engine(source, storage);
    engine.start(start_params(3)).await;

    let session = engine.session().unwrap();
    assert_eq!(session.current_index(), 0);
    assert_eq!(session.score(), 0);
    assert!(session.answers().is_empty());
}

#[tokio::test]
async fn retryable_failures_are_absorbed() {
    let source = ScriptedSource::new(vec![
        ScriptedReply::Reply(Err(SourceError::RateLimited)),
        ScriptedReply::Reply(Err(SourceError::RateLimited)),
    ]);
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source.clone(), storage);

    engine.start(start_params(4)).await;

    assert_eq!(engine.status(), EngineStatus::Active);
    assert_eq!(source.calls(), 3);
    assert!(engine.error_message().is_none());
}

#[tokio::test]
async fn retry_budget_exhaustion_surfaces_error() {
    let source = ScriptedSource::new(vec![
        ScriptedReply::Reply(Err(SourceError::RateLimited)),
        ScriptedReply::Reply(Err(SourceError::RateLimited)),
        ScriptedReply::Reply(Err(SourceError::RateLimited)),
    ]);
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source.clone(), storage);

    engine.start(start_params(4)).await;

    assert_eq!(engine.status(), EngineStatus::Error);
    assert_eq!(source.calls(), 3);
    assert!(engine.error_message().is_some());
}

#[tokio::test]
async fn server_errors_fail_without_retry() {
    let source = ScriptedSource::new(vec![ScriptedReply::Reply(Err(
        SourceError::RequestFailed(StatusCode::INTERNAL_SERVER_ERROR),
    ))]);
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source.clone(), storage);

    engine.start(start_params(4)).await;

    assert_eq!(engine.status(), EngineStatus::Error);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn malformed_responses_fail_without_retry() {
    let source = ScriptedSource::new(vec![ScriptedReply::Reply(Err(
        SourceError::MalformedResponse,
    ))]);
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source.clone(), storage);

    engine.start(start_params(4)).await;

    assert_eq!(engine.status(), EngineStatus::Error);
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn manual_retry_recovers_from_error() {
    let source = ScriptedSource::new(vec![ScriptedReply::Reply(Err(
        SourceError::RequestFailed(StatusCode::INTERNAL_SERVER_ERROR),
    ))]);
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source, storage);

    engine.start(start_params(4)).await;
    assert_eq!(engine.status(), EngineStatus::Error);

    engine.retry().await.unwrap();
    assert_eq!(engine.status(), EngineStatus::Active);
    assert!(engine.error_message().is_none());

    // Retry is only valid from the error state.
    assert_eq!(engine.retry().await, Err(EngineError::NotRetryable));
}

#[tokio::test]
async fn superseded_start_is_discarded() {
    let source = ScriptedSource::new(vec![ScriptedReply::Hang]);
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source.clone(), storage);

    // The first load hangs; dropping it cancels the in-flight fetch.
    let timed_out =
        tokio::time::timeout(Duration::from_millis(20), engine.start(start_params(4))).await;
    assert!(timed_out.is_err());
    assert_eq!(engine.status(), EngineStatus::Loading);

    engine.start(start_params(4)).await;
    assert_eq!(engine.status(), EngineStatus::Active);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn options_are_a_permutation_of_the_question() {
    let source = ScriptedSource::well_behaved();
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source, storage);
    engine.start(start_params(2)).await;

    let mut shown: Vec<String> = engine.current_options().to_vec();
    let mut expected = engine.current_question().unwrap().options();
    shown.sort();
    expected.sort();
    assert_eq!(shown, expected);
    assert_eq!(shown.len(), 4);

    engine.submit_answer("right 0").await.unwrap();
    engine.next().await.unwrap();

    let mut shown: Vec<String> = engine.current_options().to_vec();
    let mut expected = engine.current_question().unwrap().options();
    shown.sort();
    expected.sort();
    assert_eq!(shown, expected);
}

#[tokio::test]
async fn mixed_run_reports_bucketed_message() {
    let source = ScriptedSource::well_behaved();
    let (storage, _store) = build_storage();
    let mut engine = build_engine(source, storage);
    engine.start(start_params(4)).await;

    for index in 0..4 {
        let answer = if index < 2 {
            format!("right {index}")
        } else {
            format!("wrong {index}a")
        };
        engine.submit_answer(&answer).await.unwrap();
        engine.next().await.unwrap();
    }

    let report = engine.final_report().unwrap();
    assert_eq!(report.score(), 2);
    assert_eq!(report.total(), 4);
    assert_eq!(report.percentage(), 50);
    assert_eq!(report.message(), "Not bad!");
    assert!(!report.per_question()[2].is_correct);
    assert_eq!(
        report.per_question()[2].chosen_answer.as_deref(),
        Some("wrong 2a")
    );
}
