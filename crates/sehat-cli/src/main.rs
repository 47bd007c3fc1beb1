//! `sehat`: run a diagnosis from the terminal.
//!
//! - `diagnose` submits intake, asks the follow-up questions on stdin, and
//!   saves the report
//! - `report` downloads the report of an existing session
//! - `snapshot` prints the JSON session document
//! - `chat` asks the medical chatbot one question

#![deny(unsafe_code)]

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use sehat_client::{
    DiagnosisFlowController, FlowError, GatewayConfig, ProgressFn, ReportDocument, RequestGateway,
    SessionObserver,
};
use sehat_core::logging::{init_json_subscriber, init_subscriber};
use sehat_core::{Failure, Gender, PatientIntake, Question, SessionError, SessionId};
use sehat_settings::{SehatSettings, get_settings, init_settings, load_settings, load_settings_from_path};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(
    name = "sehat",
    version,
    about = "Symptom intake, follow-up questions and diagnosis report download"
)]
struct Cli {
    /// Settings file. Defaults to `~/.sehat/settings.json`.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `info` or `sehat_client=debug`. Overrides settings.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a full diagnosis interactively.
    Diagnose {
        /// Patient name.
        #[arg(long)]
        name: String,
        /// Age in years (0-120).
        #[arg(long)]
        age: u32,
        /// `male`, `female` or `other`.
        #[arg(long)]
        gender: Gender,
        /// Free-text symptom description.
        #[arg(long)]
        symptoms: String,
        /// Report directory. Defaults to the configured output dir.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Download the report of an existing session.
    Report {
        /// Session id returned at intake.
        session_id: String,
        /// Report directory. Defaults to the configured output dir.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the JSON session document.
    Snapshot {
        /// Session id returned at intake.
        session_id: String,
    },
    /// Ask the medical chatbot one question.
    Chat {
        /// Question text.
        question: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    let _ = init_settings(loaded);
    let settings = get_settings();

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.logging.level.clone());
    if cli.json_logs || settings.logging.json {
        init_json_subscriber(&level);
    } else {
        init_subscriber(&level);
    }
    debug!(base_url = %settings.api.base_url, "settings loaded");

    run(cli.command, settings).await
}

async fn run(command: Command, settings: &SehatSettings) -> Result<()> {
    match command {
        Command::Diagnose {
            name,
            age,
            gender,
            symptoms,
            out,
        } => {
            let intake = PatientIntake::new(name, age, gender, symptoms);
            diagnose(settings, &intake, out.as_deref()).await
        }
        Command::Report { session_id, out } => {
            let gateway = gateway(settings)?;
            let report = gateway
                .fetch_report(&SessionId::from(session_id), Some(progress_printer()))
                .await
                .map_err(failure)?;
            eprintln!();
            save(settings, &report, out.as_deref()).await
        }
        Command::Snapshot { session_id } => {
            let snapshot = gateway(settings)?
                .fetch_session(&SessionId::from(session_id))
                .await
                .map_err(failure)?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Command::Chat { question } => {
            let answer = gateway(settings)?
                .ask_chatbot(&question)
                .await
                .map_err(failure)?;
            println!("{answer}");
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Diagnose
// ─────────────────────────────────────────────────────────────────────────────

/// Session callbacks, forwarded to the prompt loop.
#[derive(Debug)]
enum Prompt {
    Question(Question),
    Complete(String),
    Warning(Failure),
    Failed(Failure),
}

struct TerminalObserver(mpsc::UnboundedSender<Prompt>);

impl SessionObserver for TerminalObserver {
    fn on_question(&self, question: &Question) {
        let _ = self.0.send(Prompt::Question(question.clone()));
    }

    fn on_complete(&self, message: &str) {
        let _ = self.0.send(Prompt::Complete(message.to_owned()));
    }

    fn on_error(&self, failure: &Failure) {
        let prompt = if failure.is_terminal() {
            Prompt::Failed(failure.clone())
        } else {
            Prompt::Warning(failure.clone())
        };
        let _ = self.0.send(prompt);
    }

    fn on_connection_status(&self, open: bool) {
        info!(open, "follow-up connection status");
    }
}

async fn diagnose(settings: &SehatSettings, intake: &PatientIntake, out: Option<&Path>) -> Result<()> {
    let mut flow =
        DiagnosisFlowController::from_settings(settings).context("failed to build HTTP client")?;
    let (tx, mut prompts) = mpsc::unbounded_channel();
    let session_id = flow
        .submit_intake(intake, Arc::new(TerminalObserver(tx)))
        .await
        .map_err(flow_error)?;
    println!("Session {session_id} started. Answer with an option key or free text.");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut interrupted = None;
    loop {
        let prompt = match interrupted.take() {
            Some(prompt) => prompt,
            None => match prompts.recv().await {
                Some(prompt) => prompt,
                None => break,
            },
        };
        match prompt {
            Prompt::Question(question) => {
                println!("\n{}", render_question(&question));
                interrupted = answer_from_stdin(&flow, &mut stdin, &mut prompts).await?;
            }
            Prompt::Warning(failure) => eprintln!("warning: {}", failure.user_message()),
            Prompt::Complete(message) => {
                if !message.is_empty() {
                    println!("\n{message}");
                }
                break;
            }
            Prompt::Failed(failure) => {
                flow.start_new_diagnosis().await;
                bail!("{} Please start a new diagnosis.", failure.user_message());
            }
        }
    }

    flow.wait_for_completion().await.map_err(flow_error)?;
    let report = flow
        .fetch_report(Some(progress_printer()))
        .await
        .map_err(flow_error)?;
    eprintln!();
    save(settings, &report, out).await
}

/// Read lines until one is accepted as the answer.
///
/// Returns the session event that ended the session first, if one did while
/// the user was typing.
async fn answer_from_stdin<R>(
    flow: &DiagnosisFlowController,
    stdin: &mut Lines<R>,
    prompts: &mut mpsc::UnboundedReceiver<Prompt>,
) -> Result<Option<Prompt>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let line = tokio::select! {
            line = stdin.next_line() => line?,
            prompt = prompts.recv() => match prompt {
                Some(Prompt::Warning(failure)) => {
                    eprintln!("\nwarning: {}", failure.user_message());
                    continue;
                }
                Some(prompt) => return Ok(Some(prompt)),
                None => bail!("follow-up session ended unexpectedly"),
            },
        };
        let Some(line) = line else {
            bail!("input closed before the follow-up finished");
        };
        match flow.answer(&line).await {
            Ok(_) => return Ok(None),
            Err(FlowError::Session(SessionError::EmptyAnswer)) => {
                eprintln!("Please type an answer.");
            }
            Err(FlowError::Session(SessionError::LinkNotOpen)) => {
                eprintln!("Reconnecting to the service, try again in a moment.");
            }
            // The session ended between prompts; its event says why.
            Err(FlowError::Session(SessionError::SessionFinished)) => {
                return next_terminal(prompts).await.map(Some);
            }
            Err(e) => return Err(flow_error(e)),
        }
    }
}

/// Skip warnings until the event that ended the session.
async fn next_terminal(prompts: &mut mpsc::UnboundedReceiver<Prompt>) -> Result<Prompt> {
    while let Some(prompt) = prompts.recv().await {
        if let Prompt::Warning(failure) = prompt {
            eprintln!("warning: {}", failure.user_message());
        } else {
            return Ok(prompt);
        }
    }
    bail!("follow-up session ended unexpectedly")
}

fn render_question(question: &Question) -> String {
    let mut text = question.text.clone();
    for option in &question.options {
        let _ = write!(text, "\n  {}) {}", option.key, option.label);
    }
    text
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn gateway(settings: &SehatSettings) -> Result<RequestGateway> {
    RequestGateway::new(GatewayConfig::from_settings(settings)).context("failed to build HTTP client")
}

fn progress_printer() -> ProgressFn {
    Arc::new(|pct| {
        eprint!("\rDownloading report... {pct:>3}%");
        let _ = std::io::stderr().flush();
    })
}

async fn save(settings: &SehatSettings, report: &ReportDocument, out: Option<&Path>) -> Result<()> {
    let dir = out.map_or_else(|| PathBuf::from(&settings.report.output_dir), Path::to_path_buf);
    let path = report
        .save_to(&dir)
        .await
        .with_context(|| format!("failed to save report to {}", dir.display()))?;
    println!("Report saved to {}", path.display());
    Ok(())
}

fn failure(failure: Failure) -> anyhow::Error {
    anyhow!(failure.user_message())
}

fn flow_error(error: FlowError) -> anyhow::Error {
    anyhow!(error.user_message())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
