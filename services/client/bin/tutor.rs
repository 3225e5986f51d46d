//! Main Entrypoint for the Adaptive Tutor terminal client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command-line flags.
//! 2. Initializing logging (to stderr, so stdout carries the conversation).
//! 3. Starting the chat session task over the websocket transport.
//! 4. Dispatching the chosen subcommand until it finishes or Ctrl+C.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::{io::Write, path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tutor_client::{
    api::TutorApi,
    config::Config,
    models::{Answer, QuestionKind},
    render::TranscriptPrinter,
    ws::WsChannelFactory,
};
use tutor_core::{SessionHandle, SessionState, StartError, spawn_session};

#[derive(Parser, Debug)]
#[command(name = "tutor", version, about = "Terminal client for the Adaptive Tutor service")]
struct Cli {
    /// Backend base address (overrides API_BASE_URL).
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// User id to chat and practice as (overrides TUTOR_USER_ID).
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive streaming chat (the default).
    Chat,
    /// Ask a single question and stream the answer.
    Ask {
        #[arg(required = true)]
        query: Vec<String>,
        /// Fetch the complete answer with its sources instead of streaming.
        #[arg(long)]
        no_stream: bool,
    },
    /// List the concepts available for practice.
    Concepts,
    /// Fetch practice questions for a concept.
    Practice {
        concept: String,
        #[arg(short, long, default_value_t = 3)]
        n: u32,
    },
    /// Submit an answer to a practice question.
    Submit {
        concept: String,
        qid: String,
        /// Free-text answer.
        #[arg(long)]
        answer: Option<String>,
        /// File holding source code, for code questions.
        #[arg(long, conflicts_with = "answer")]
        source_file: Option<PathBuf>,
        #[arg(long, requires = "source_file")]
        language_id: Option<u32>,
    },
    /// Create or update the user's profile.
    Register {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Show the user's profile and mastery.
    User,
    /// Show the retrieval index size.
    IndexStatus,
    /// Start a background rebuild of the retrieval index.
    Reindex,
}

/// Listens for the `Ctrl+C` signal to stop the client.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Exiting...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(base_url) = cli.base_url.clone() {
        config.api_base_url = base_url;
    }
    if let Some(user) = cli.user.clone() {
        config.user_id = user;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(base_url = %config.api_base_url, user_id = %config.user_id, "Configuration loaded.");

    // --- 3. Run the command ---
    tokio::select! {
        result = run(cli.command.unwrap_or(Command::Chat), &config) => result,
        _ = shutdown_signal() => Ok(()),
    }
}

async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    let api = TutorApi::new(&config.api_base_url);
    let user_id = config.user_id.as_str();

    match command {
        Command::Chat => {
            let handle = start_session(config)?;
            chat_loop(&handle, user_id).await
        }
        Command::Ask {
            query,
            no_stream: true,
        } => {
            let answer = api.query(user_id, &query.join(" ")).await?;
            println!("{}", answer.answer);
            for source in answer.sources {
                println!("  - {source}");
            }
            Ok(())
        }
        Command::Ask { query, .. } => {
            let handle = start_session(config)?;
            let mut printer = TranscriptPrinter::default();
            let state = exchange(&handle, &mut printer, &query.join(" "), user_id).await?;
            if state == SessionState::Failed {
                bail!("The tutor could not answer this question");
            }
            Ok(())
        }
        Command::Concepts => {
            for concept in api.list_concepts().await? {
                println!("{concept}");
            }
            Ok(())
        }
        Command::Practice { concept, n } => {
            let practice = api.practice(user_id, &concept, n).await?;
            println!(
                "Mastery of '{}': {:.2} (reviews: {})",
                concept, practice.mastery.strength, practice.mastery.reviews
            );
            for question in practice.questions {
                println!(
                    "\n[{}] {} ({})",
                    question.qid, question.difficulty, question.kind
                );
                println!("{}", question.question.as_deref().unwrap_or("(no question text)"));
                if question.kind == QuestionKind::Code {
                    for case in &question.testcases {
                        println!("  stdin: {:?} -> expected: {:?}", case.stdin, case.expected);
                    }
                }
            }
            Ok(())
        }
        Command::Submit {
            concept,
            qid,
            answer,
            source_file,
            language_id,
        } => {
            let answer = match (answer, source_file) {
                (Some(text), None) => Answer::Text(text),
                (None, Some(path)) => Answer::Code {
                    source_code: tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                    language_id,
                },
                _ => bail!("Provide either --answer or --source-file"),
            };
            let result = api.submit_answer(user_id, &concept, &qid, answer).await?;
            println!(
                "Score: {:.2}  Quality: {}/5  Mastery: {:.2}",
                result.score, result.quality, result.mastery.strength
            );
            if let Some(details) = result.details {
                println!("{}", serde_json::to_string_pretty(&details)?);
            }
            Ok(())
        }
        Command::Register { name, email } => {
            let status = api
                .register_user(user_id, name.as_deref(), email.as_deref())
                .await?;
            println!("{}", status.status);
            Ok(())
        }
        Command::User => {
            match api.get_user(user_id).await? {
                Some(profile) => {
                    println!("{}", profile.user_id);
                    let mut concepts: Vec<_> = profile.mastery.iter().collect();
                    concepts.sort_by(|a, b| a.0.cmp(b.0));
                    for (concept, mastery) in concepts {
                        println!(
                            "  {concept}: strength {:.2}, next review in {} day(s)",
                            mastery.strength, mastery.interval
                        );
                    }
                }
                None => println!("No profile for '{user_id}'."),
            }
            Ok(())
        }
        Command::IndexStatus => {
            let status = api.index_status().await?;
            println!("Documents: {}  Dimension: {}", status.ntotal, status.dim);
            Ok(())
        }
        Command::Reindex => {
            let started = api.reindex().await?;
            println!("Reindex started at {}", started.started_at);
            Ok(())
        }
    }
}

fn start_session(config: &Config) -> anyhow::Result<SessionHandle> {
    let factory = WsChannelFactory::new(&config.api_base_url)
        .context("Invalid backend base address")?;
    info!(endpoint = %factory.endpoint(), "Chat endpoint resolved.");
    let (handle, _task) = spawn_session(Arc::new(factory));
    Ok(handle)
}

/// Reads one question per line from stdin until EOF.
async fn chat_loop(handle: &SessionHandle, user_id: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        let mut printer = TranscriptPrinter::resume_after(&handle.snapshot().transcript);
        exchange(handle, &mut printer, query, user_id).await?;
    }
}

/// Runs one exchange, printing the answer as it streams in.
async fn exchange(
    handle: &SessionHandle,
    printer: &mut TranscriptPrinter,
    query: &str,
    user_id: &str,
) -> anyhow::Result<SessionState> {
    let mut updates = handle.subscribe();
    match handle.start(query, user_id).await {
        Ok(()) => {}
        Err(StartError::Busy { state }) => {
            eprintln!("Still answering the previous question ({state}).");
            return Ok(state);
        }
        Err(e) => return Err(e.into()),
    }

    let mut stdout = std::io::stdout();
    loop {
        let snapshot = updates.borrow_and_update().clone();
        printer.render(&snapshot.transcript, &mut stdout)?;
        if snapshot.state.is_terminal() {
            return Ok(snapshot.state);
        }
        updates
            .changed()
            .await
            .context("Chat session stopped unexpectedly")?;
    }
}
