use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use trivia_core::html::decode_entities;
use trivia_core::model::{Difficulty, Question, QuestionKind};

use crate::error::SourceError;

/// A remote source of question batches.
///
/// `fetch` returns multiple-choice questions of the given difficulty with
/// HTML entities already decoded. Implementations must be safe to share
/// behind an `Arc`.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Fetch a batch of `count` questions.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` when the batch cannot be produced.
    async fn fetch(
        &self,
        count: usize,
        difficulty: Difficulty,
    ) -> Result<Vec<Question>, SourceError>;
}

pub const DEFAULT_API_URL: &str = "https://opentdb.com/api.php";

/// The remote API serves between 1 and 50 questions per request.
const MIN_BATCH: usize = 1;
const MAX_BATCH: usize = 50;

/// Total attempts for one logical fetch, counting the first request.
const MAX_ATTEMPTS: u32 = 3;
/// Base backoff on rate-limited responses; multiplied by the attempt number.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_millis(1000);

/// Success sentinel in the source payload.
const API_OK: i64 = 0;

#[derive(Clone, Debug)]
pub struct OpenTriviaConfig {
    pub base_url: String,
}

impl OpenTriviaConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let base_url = env::var("TRIVIA_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        Self { base_url }
    }
}

impl Default for OpenTriviaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.into(),
        }
    }
}

/// HTTP client for the Open Trivia DB question endpoint.
pub struct OpenTriviaClient {
    client: Client,
    config: OpenTriviaConfig,
}

impl OpenTriviaClient {
    #[must_use]
    pub fn new(config: OpenTriviaConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::new(OpenTriviaConfig::from_env())
    }

    async fn request_batch(
        &self,
        count: usize,
        difficulty: Difficulty,
    ) -> Result<Vec<Question>, SourceError> {
        let count = count.clamp(MIN_BATCH, MAX_BATCH);

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .client
                .get(&self.config.base_url)
                .query(&[
                    ("amount", count.to_string()),
                    ("difficulty", difficulty.to_string()),
                    ("type", "multiple".to_string()),
                ])
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt < MAX_ATTEMPTS {
                    let delay = rate_limit_delay(attempt);
                    warn!(%difficulty, attempt, ?delay, "question source rate limited, backing off");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(SourceError::RateLimited);
            }
            if !status.is_success() {
                return Err(SourceError::RequestFailed(status));
            }

            let body: ApiResponse = response
                .json()
                .await
                .map_err(|_| SourceError::MalformedResponse)?;
            if body.response_code != API_OK {
                return Err(SourceError::MalformedResponse);
            }

            return Ok(body
                .results
                .into_iter()
                .map(ApiQuestion::into_question)
                .collect());
        }

        Err(SourceError::RateLimited)
    }
}

#[async_trait]
impl QuestionSource for OpenTriviaClient {
    async fn fetch(
        &self,
        count: usize,
        difficulty: Difficulty,
    ) -> Result<Vec<Question>, SourceError> {
        self.request_batch(count, difficulty).await
    }
}

fn rate_limit_delay(attempt: u32) -> Duration {
    RATE_LIMIT_BACKOFF * attempt
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    response_code: i64,
    #[serde(default)]
    results: Vec<ApiQuestion>,
}

#[derive(Debug, Deserialize)]
struct ApiQuestion {
    category: String,
    #[serde(rename = "type")]
    kind: QuestionKind,
    difficulty: Difficulty,
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

impl ApiQuestion {
    fn into_question(self) -> Question {
        Question {
            category: self.category,
            kind: self.kind,
            difficulty: self.difficulty,
            text: decode_entities(&self.question),
            correct_answer: decode_entities(&self.correct_answer),
            incorrect_answers: self
                .incorrect_answers
                .iter()
                .map(|answer| decode_entities(answer))
                .collect(),
        }
    }
}

type CacheKey = (usize, Difficulty);

/// Process-lifetime cache over an inner source, keyed by `(count, difficulty)`.
///
/// Hits hand out fresh copies of the cached batch. A second concurrent
/// fetch for an in-flight key awaits the first instead of issuing a
/// duplicate network request.
pub struct CachedQuestionSource {
    inner: Arc<dyn QuestionSource>,
    cache: Mutex<HashMap<CacheKey, Vec<Question>>>,
    in_flight: tokio::sync::Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl CachedQuestionSource {
    #[must_use]
    pub fn new(inner: Arc<dyn QuestionSource>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
            in_flight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &CacheKey) -> Option<Vec<Question>> {
        self.cache.lock().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl QuestionSource for CachedQuestionSource {
    async fn fetch(
        &self,
        count: usize,
        difficulty: Difficulty,
    ) -> Result<Vec<Question>, SourceError> {
        let key = (count, difficulty);

        if let Some(hit) = self.cached(&key) {
            debug!(count, %difficulty, "serving question batch from cache");
            return Ok(hit);
        }

        let key_lock = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(key).or_default())
        };
        let _fetching = key_lock.lock().await;

        // The earlier holder of the key lock may have filled the cache.
        if let Some(hit) = self.cached(&key) {
            debug!(count, %difficulty, "serving question batch fetched by a concurrent caller");
            return Ok(hit);
        }

        let questions = self.inner.fetch(count, difficulty).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, questions.clone());
        }
        Ok(questions)
    }
}
