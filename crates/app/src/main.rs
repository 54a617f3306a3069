use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use services::{
    CachedQuestionSource, EngineStatus, NextOutcome, OpenTriviaClient, QuizEngine, StartParams,
};
use storage::repository::Storage;
use trivia_core::model::{Difficulty, SessionReport};

const DEFAULT_DB_URL: &str = "sqlite://trivia.sqlite3";
const DEFAULT_QUESTION_COUNT: usize = 10;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDifficulty { raw: String },
    InvalidQuestionCount { raw: String },
    InvalidPlayerName { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDifficulty { raw } => {
                write!(f, "invalid --difficulty value: {raw} (easy, medium or hard)")
            }
            ArgsError::InvalidQuestionCount { raw } => {
                write!(f, "invalid --questions value: {raw} (1 to 50)")
            }
            ArgsError::InvalidPlayerName { raw } => {
                write!(f, "invalid name: {raw:?} (2 to 20 letters and spaces)")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!(
        "  cargo run -p app -- [--name <player>] [--difficulty <easy|medium|hard>] \
         [--questions <n>] [--db <sqlite_url>]"
    );
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --difficulty medium");
    eprintln!("  --questions {DEFAULT_QUESTION_COUNT}");
    eprintln!("  --db {DEFAULT_DB_URL}");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  TRIVIA_DB_URL, TRIVIA_API_URL");
}

struct Args {
    db_url: String,
    player_name: Option<String>,
    difficulty: Difficulty,
    question_count: usize,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("TRIVIA_DB_URL")
            .ok()
            .map_or_else(|| DEFAULT_DB_URL.into(), normalize_sqlite_url);
        let mut player_name = None;
        let mut difficulty = Difficulty::Medium;
        let mut question_count = DEFAULT_QUESTION_COUNT;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--name" => {
                    let value = require_value(args, "--name")?;
                    player_name = Some(validate_player_name(&value)?);
                }
                "--difficulty" => {
                    let value = require_value(args, "--difficulty")?;
                    difficulty = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidDifficulty { raw: value })?;
                }
                "--questions" => {
                    let value = require_value(args, "--questions")?;
                    question_count = value
                        .parse()
                        .ok()
                        .filter(|count| (1..=50).contains(count))
                        .ok_or(ArgsError::InvalidQuestionCount { raw: value })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            player_name,
            difficulty,
            question_count,
        })
    }
}

/// The sign-in form rules: 2 to 20 characters, letters and spaces only.
fn validate_player_name(raw: &str) -> Result<String, ArgsError> {
    let name = raw.trim();
    let length_ok = (2..=20).contains(&name.chars().count());
    let chars_ok = name.chars().all(|c| c.is_alphabetic() || c == ' ');
    if length_ok && chars_ok {
        Ok(name.to_owned())
    } else {
        Err(ArgsError::InvalidPlayerName {
            raw: raw.to_owned(),
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

type Input = Lines<BufReader<Stdin>>;

async fn read_command(lines: &mut Input) -> Result<Option<String>, std::io::Error> {
    let line = lines.next_line().await?;
    Ok(line.map(|line| line.trim().to_lowercase()))
}

async fn prompt_player_name(
    storage: &Storage,
    lines: &mut Input,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let saved = storage.player.load_player_name().await.ok().flatten();

    loop {
        match &saved {
            Some(name) => println!("Your name [{name}]:"),
            None => println!("Your name:"),
        }

        let Some(line) = lines.next_line().await? else {
            return Ok(None);
        };
        let raw = line.trim();

        if raw.is_empty() {
            if let Some(name) = &saved {
                return Ok(Some(name.clone()));
            }
            continue;
        }

        match validate_player_name(raw) {
            Ok(name) => return Ok(Some(name)),
            Err(err) => println!("{err}"),
        }
    }
}

/// Render the current question and apply one command. Returns `false` when
/// the player quits or input is exhausted.
async fn play_turn(
    engine: &mut QuizEngine,
    lines: &mut Input,
) -> Result<bool, Box<dyn std::error::Error>> {
    let Some(session) = engine.session() else {
        return Ok(false);
    };
    let index = session.current_index();
    let total = session.total();
    let score = session.score();
    let chosen = session.answer_at(index).map(str::to_owned);
    let Some(question) = engine.current_question() else {
        return Ok(false);
    };

    println!();
    println!(
        "{}  score {score}/{total}  ({})",
        session.player_name(),
        question.category
    );
    println!("Question {} of {total}: {}", index + 1, question.text);

    let options = engine.current_options().to_vec();
    for (position, option) in options.iter().enumerate() {
        let marker = if chosen.as_deref() == Some(option.as_str()) {
            "*"
        } else {
            " "
        };
        println!(" {marker}{}. {option}", position + 1);
    }
    println!("answer 1-{}, [n]ext, [p]revious, [q]uit", options.len());

    let Some(input) = read_command(lines).await? else {
        return Ok(false);
    };

    match input.as_str() {
        "q" => Ok(false),
        "n" => {
            if engine.next().await? == NextOutcome::Blocked {
                println!("Answer the question first.");
            }
            Ok(true)
        }
        "p" => {
            engine.previous().await?;
            Ok(true)
        }
        other => {
            if let Ok(choice) = other.parse::<usize>() {
                if (1..=options.len()).contains(&choice) {
                    engine.submit_answer(&options[choice - 1]).await?;
                    return Ok(true);
                }
            }
            println!("Unrecognized input: {other}");
            Ok(true)
        }
    }
}

fn print_report(report: &SessionReport) {
    println!();
    println!("Quiz results for {}", report.player_name());
    println!("{}%  {}", report.percentage(), report.message());
    println!("{} out of {} correct", report.score(), report.total());
    println!();
    for (number, entry) in report.per_question().iter().enumerate() {
        let verdict = if entry.is_correct { "correct" } else { "incorrect" };
        println!("{}. {} [{verdict}]", number + 1, entry.question_text);
        println!("   your answer: {}", entry.chosen_answer.as_deref().unwrap_or("-"));
        if !entry.is_correct {
            println!("   correct answer: {}", entry.correct_answer);
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut argv = std::env::args().skip(1);
    let parsed = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    prepare_sqlite_file(&parsed.db_url)?;
    let storage = Storage::sqlite(&parsed.db_url).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let player_name = match parsed.player_name {
        Some(name) => name,
        None => match prompt_player_name(&storage, &mut lines).await? {
            Some(name) => name,
            None => return Ok(()),
        },
    };

    let client = Arc::new(OpenTriviaClient::from_env());
    let source = Arc::new(CachedQuestionSource::new(client));
    let mut engine = QuizEngine::new(source, storage);

    println!("Loading {} {} questions...", parsed.question_count, parsed.difficulty);
    engine
        .start(StartParams {
            player_name,
            difficulty: parsed.difficulty,
            question_count: parsed.question_count,
        })
        .await;

    loop {
        match engine.status() {
            EngineStatus::Active => {
                if !play_turn(&mut engine, &mut lines).await? {
                    return Ok(());
                }
            }
            EngineStatus::Error => {
                println!();
                println!(
                    "{}",
                    engine.error_message().unwrap_or("Something went wrong.")
                );
                println!("[r]etry or [q]uit?");
                match read_command(&mut lines).await?.as_deref() {
                    Some("r") => engine.retry().await?,
                    _ => return Ok(()),
                }
            }
            EngineStatus::Completed => {
                if let Some(report) = engine.final_report() {
                    print_report(report);
                }
                return Ok(());
            }
            // `start` only returns once the machine has settled.
            EngineStatus::Idle | EngineStatus::Loading => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
