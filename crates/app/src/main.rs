use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use ladico_core::model::{Answer, ExpectedAnswer, Session, SessionId, SessionKey, SessionKeyError};
use ladico_core::scoring::FinalizeInput;
use serde_json::{Value, json};
use services::{Clock, EnsureSession, SessionCacheMirror, SessionManager, SessionProgress};
use storage::{FileLocalStorage, Storage};
use tracing::debug;

mod config;
mod logging;

use config::AppConfig;

#[derive(Debug, PartialEq, Eq)]
enum ArgsError {
    MissingCommand,
    UnknownCommand(String),
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidValue { flag: &'static str, raw: String },
    UnexpectedFlag { flag: &'static str, command: &'static str },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingCommand => write!(f, "missing subcommand"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown subcommand: {cmd}"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidValue { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::UnexpectedFlag { flag, command } => {
                write!(f, "{flag} is not accepted by {command}")
            }
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

const VALUE_FLAGS: &[&str] = &[
    "--db",
    "--cache",
    "--user",
    "--competence",
    "--level",
    "--questions",
    "--session",
    "--index",
    "--is-correct",
    "--choice",
    "--expected",
    "--correct",
    "--total",
    "--pass-min",
];

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  ladico [--db <sqlite_url>] [--cache <path>] <command> [flags]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  ensure      --user <id> --competence <c> --level <l> --questions <n>");
    eprintln!("  answer      --session <id> --index <i> --is-correct <true|false>");
    eprintln!("  answer      --session <id> --index <i> --choice <a[,b]> --expected <a[,b]>");
    eprintln!("  finalize    --session <id> --correct <n> --total <n> --pass-min <n>");
    eprintln!("  show        --session <id>");
    eprintln!("  history     --user <id> --competence <c> --level <l>");
    eprintln!("  switch-user --user <id>");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {}", config::DEFAULT_DB_URL);
    eprintln!("  --cache {}", config::DEFAULT_CACHE_PATH);
    eprintln!();
    eprintln!("Environment (also read from .env):");
    eprintln!("  LADICO_DB_URL, LADICO_CACHE_PATH, RUST_LOG");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Ensure(EnsureSession),
    Answer {
        session: SessionId,
        index: usize,
        answer: AnswerInput,
    },
    Finalize {
        session: SessionId,
        input: FinalizeInput,
    },
    Show {
        session: SessionId,
    },
    History {
        key: SessionKey,
    },
    SwitchUser {
        user_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AnswerInput {
    Correctness(bool),
    Choice {
        answer: Answer,
        expected: ExpectedAnswer,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    db_url: Option<String>,
    cache_path: Option<PathBuf>,
    command: Command,
}

/// Flag values collected before the subcommand decides which it needs.
struct Flags {
    values: HashMap<&'static str, String>,
}

impl Flags {
    fn take(&mut self, flag: &'static str) -> Option<String> {
        self.values.remove(flag)
    }

    fn require(&mut self, flag: &'static str) -> Result<String, ArgsError> {
        self.take(flag).ok_or(ArgsError::MissingFlag { flag })
    }

    fn require_parsed<T: FromStr>(&mut self, flag: &'static str) -> Result<T, ArgsError> {
        let raw = self.require(flag)?;
        raw.trim()
            .parse()
            .map_err(|_| ArgsError::InvalidValue { flag, raw })
    }

    fn require_list(&mut self, flag: &'static str) -> Result<Vec<u32>, ArgsError> {
        let raw = self.require(flag)?;
        raw.split(',')
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ArgsError::InvalidValue { flag, raw })
    }

    fn session(&mut self) -> Result<SessionId, ArgsError> {
        let raw = self.require("--session")?;
        SessionId::new(raw.clone()).map_err(|_| ArgsError::InvalidValue {
            flag: "--session",
            raw,
        })
    }

    fn key(&mut self) -> Result<SessionKey, ArgsError> {
        let user = self.require("--user")?;
        let competence = self.require("--competence")?;
        let level = self.require("--level")?;
        SessionKey::new(user.clone(), competence.clone(), level.clone()).map_err(|err| {
            let (flag, raw) = match err {
                SessionKeyError::Empty { field: "competence" } => ("--competence", competence),
                SessionKeyError::Empty { field: "level" } => ("--level", level),
                _ => ("--user", user),
            };
            ArgsError::InvalidValue { flag, raw }
        })
    }

    fn finish(self, command: &'static str) -> Result<(), ArgsError> {
        match self.values.into_keys().min() {
            Some(flag) => Err(ArgsError::UnexpectedFlag { flag, command }),
            None => Ok(()),
        }
    }
}

impl Args {
    /// Parse the arguments after the program name. `Ok(None)` means help
    /// was requested.
    fn parse(argv: impl IntoIterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut args = argv.into_iter();
        let mut values = HashMap::new();
        let mut command_name = None;

        while let Some(arg) = args.next() {
            if arg == "--help" || arg == "-h" {
                return Ok(None);
            }
            if let Some(flag) = VALUE_FLAGS.iter().copied().find(|flag| *flag == arg) {
                let value = args.next().ok_or(ArgsError::MissingValue { flag })?;
                values.insert(flag, value);
            } else if arg.starts_with('-') || command_name.is_some() {
                return Err(ArgsError::UnknownArg(arg));
            } else {
                command_name = Some(arg);
            }
        }

        let mut flags = Flags { values };
        let db_url = flags.take("--db");
        if let Some(raw) = db_url.as_ref().filter(|raw| raw.trim().is_empty()) {
            return Err(ArgsError::InvalidDbUrl { raw: raw.clone() });
        }
        let cache_path = flags.take("--cache").map(PathBuf::from);

        let name = command_name.ok_or(ArgsError::MissingCommand)?;
        let (command, label) = match name.as_str() {
            "ensure" => {
                let key = flags.key()?;
                let total_questions = flags.require_parsed("--questions")?;
                let request = EnsureSession {
                    user_id: key.user_id().to_string(),
                    competence: key.competence().to_string(),
                    level: key.level().to_string(),
                    total_questions,
                };
                (Command::Ensure(request), "ensure")
            }
            "answer" => {
                let session = flags.session()?;
                let index = flags.require_parsed("--index")?;
                let answer = match flags.take("--is-correct") {
                    Some(raw) => AnswerInput::Correctness(raw.trim().parse().map_err(|_| {
                        ArgsError::InvalidValue {
                            flag: "--is-correct",
                            raw,
                        }
                    })?),
                    None => {
                        let chosen = flags.require_list("--choice")?;
                        let expected = flags.require_list("--expected")?;
                        choice_input(chosen, expected)
                    }
                };
                (
                    Command::Answer {
                        session,
                        index,
                        answer,
                    },
                    "answer",
                )
            }
            "finalize" => {
                let session = flags.session()?;
                let input = FinalizeInput {
                    correct_count: flags.require_parsed("--correct")?,
                    total: flags.require_parsed("--total")?,
                    pass_min: flags.require_parsed("--pass-min")?,
                };
                (Command::Finalize { session, input }, "finalize")
            }
            "show" => (
                Command::Show {
                    session: flags.session()?,
                },
                "show",
            ),
            "history" => (Command::History { key: flags.key()? }, "history"),
            "switch-user" => (
                Command::SwitchUser {
                    user_id: flags.require("--user")?,
                },
                "switch-user",
            ),
            _ => return Err(ArgsError::UnknownCommand(name)),
        };
        flags.finish(label)?;

        Ok(Some(Self {
            db_url,
            cache_path,
            command,
        }))
    }
}

fn choice_input(mut chosen: Vec<u32>, mut expected: Vec<u32>) -> AnswerInput {
    if let ([one], [want]) = (chosen.as_slice(), expected.as_slice()) {
        return AnswerInput::Choice {
            answer: Answer::SingleChoice(*one),
            expected: ExpectedAnswer::Single(*want),
        };
    }
    chosen.sort_unstable();
    expected.sort_unstable();
    AnswerInput::Choice {
        answer: Answer::MultiChoice(chosen),
        expected: ExpectedAnswer::Multi(expected),
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw.starts_with("sqlite::memory:") || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url.starts_with("sqlite::memory:") {
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

    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
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

fn session_view(session: &Session) -> Value {
    json!({
        "id": session.id(),
        "userId": session.key().user_id(),
        "competence": session.key().competence(),
        "level": session.key().level(),
        "questionCount": session.question_count(),
        "answers": session.answers(),
        "startTime": session.started_at().to_rfc3339(),
        "endTime": session.ended_at().map(|at| at.to_rfc3339()),
        "result": session.result(),
        "progress": SessionProgress::from_session(session),
    })
}

async fn execute(
    manager: &SessionManager,
    command: Command,
) -> Result<Value, Box<dyn std::error::Error>> {
    let output = match command {
        Command::Ensure(request) => serde_json::to_value(manager.ensure_session(request).await?)?,
        Command::Answer {
            session,
            index,
            answer,
        } => {
            let outcome = match answer {
                AnswerInput::Correctness(is_correct) => {
                    manager.mark_answered(&session, index, is_correct).await?
                }
                AnswerInput::Choice { answer, expected } => {
                    manager
                        .record_answer(&session, index, &answer, &expected)
                        .await?
                }
            };
            json!({ "outcome": outcome })
        }
        Command::Finalize { session, input } => {
            serde_json::to_value(manager.finalize_session(&session, input).await?)?
        }
        Command::Show { session } => session_view(&manager.get_session(&session).await?),
        Command::History { key } => {
            let sessions = manager.history(&key).await?;
            Value::Array(sessions.iter().map(session_view).collect())
        }
        Command::SwitchUser { user_id } => {
            json!({ "switched": manager.switch_user(&user_id) })
        }
    };
    Ok(output)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env();
    logging::init_tracing(&config.log_level);

    let parsed = match Args::parse(std::env::args().skip(1)) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => {
            print_usage();
            return Ok(());
        }
        Err(err) => {
            eprintln!("{err}");
            print_usage();
            return Err(err.into());
        }
    };

    let db_url = normalize_sqlite_url(parsed.db_url.unwrap_or(config.db_url));
    let cache_path = parsed.cache_path.unwrap_or(config.cache_path);
    debug!(db = %db_url, cache = %cache_path.display(), "opening stores");

    // Open + migrate SQLite here so the library crates never touch the filesystem layout.
    prepare_sqlite_file(&db_url)?;
    let storage = Storage::sqlite(&db_url).await?;
    let local = FileLocalStorage::open(cache_path)?;

    let manager = SessionManager::new(
        Clock::system(),
        Arc::clone(&storage.sessions),
        SessionCacheMirror::new(Arc::new(local)),
    );

    let output = execute(&manager, parsed.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
