mod settings;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use repochat_stream::{
    ChatClient, ChunkPayload, ClientError, ClientUpdate, HttpTransport, SendOptions,
    SessionStatus, StreamProtocol, StreamTarget,
};
use serde_json::Value;
use snafu::{ResultExt, Snafu, ensure};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use settings::{ClientSettings, SettingsError, SettingsStore};

#[derive(Debug, Parser)]
#[command(name = "repochat")]
#[command(about = "Ask questions about a repository and stream the answers")]
struct Cli {
    /// Settings file to use instead of the per-user one
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: Overrides,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct Overrides {
    /// Chat endpoint URL
    #[arg(long, global = true)]
    endpoint: Option<String>,
    /// Response framing: auto, sse or ndjson
    #[arg(long, global = true)]
    protocol: Option<StreamProtocol>,
    /// Repository to scope answers to
    #[arg(long = "repo", global = true)]
    repo_id: Option<String>,
    /// File path to scope answers to (repeatable)
    #[arg(long = "file", global = true)]
    file_paths: Vec<String>,
    /// Metadata entry as key=value; JSON values are kept typed (repeatable)
    #[arg(long = "meta", global = true, value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat; /reset clears the conversation, /quit exits
    Chat,
    /// Ask a single question and print the answer
    Ask {
        /// The question
        #[arg(required = true)]
        question: Vec<String>,
        /// Print the final assistant message as JSON instead of streaming text
        #[arg(long)]
        json: bool,
    },
    /// Inspect or persist settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsAction {
    /// Print the effective settings
    Show,
    /// Write the effective settings to the settings file
    Save,
}

#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("failed to set up chat transport on `{stage}`: {source}"))]
    BuildTransport {
        stage: &'static str,
        source: ClientError,
    },
    #[snafu(display("{source}"))]
    SaveSettings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to render json on `{stage}`: {source}"))]
    RenderJson {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("question is empty"))]
    EmptyQuestion { stage: &'static str },
    #[snafu(display("{message}"))]
    AnswerFailed {
        stage: &'static str,
        message: String,
    },
}

type CliResult<T> = Result<T, CliError>;

/// What ended one wait on the active answer.
enum Step {
    Update(Option<ClientUpdate>),
    Interrupted,
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(error) = run(Cli::parse()).await {
        eprintln!("repochat: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut store = match cli.config {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    let settings = cli.overrides.apply(store.settings().clone());

    match cli.command {
        Command::Chat => chat(&settings).await,
        Command::Ask { question, json } => ask(&settings, &question.join(" "), json).await,
        Command::Settings { action } => match action {
            SettingsAction::Show => show_settings(&settings, store.config_path()),
            SettingsAction::Save => {
                store.update(settings).context(SaveSettingsSnafu {
                    stage: "save-settings",
                })?;
                println!("saved settings to {}", store.config_path().display());
                Ok(())
            }
        },
    }
}

impl Overrides {
    fn apply(self, mut settings: ClientSettings) -> ClientSettings {
        if let Some(endpoint) = self.endpoint {
            settings.endpoint = endpoint;
        }
        if let Some(protocol) = self.protocol {
            settings.protocol = protocol;
        }
        if let Some(repo_id) = self.repo_id {
            settings.repo_id = Some(repo_id);
        }
        if !self.file_paths.is_empty() {
            settings.file_paths = self.file_paths;
        }
        for (key, value) in self.metadata {
            settings.metadata.insert(key, metadata_value(&value));
        }
        settings.normalized()
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("metadata key is empty in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn metadata_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn build_client(settings: &ClientSettings) -> CliResult<ChatClient> {
    let transport = HttpTransport::new(settings.endpoint.clone()).context(BuildTransportSnafu {
        stage: "build-http-transport",
    })?;
    Ok(ChatClient::new(
        Arc::new(transport),
        settings.to_client_defaults(),
    ))
}

fn show_settings(settings: &ClientSettings, config_path: &Path) -> CliResult<()> {
    let rendered = serde_json::to_string_pretty(settings).context(RenderJsonSnafu {
        stage: "render-settings-json",
    })?;
    println!("# {}", config_path.display());
    println!("{rendered}");
    Ok(())
}

async fn ask(settings: &ClientSettings, question: &str, json: bool) -> CliResult<()> {
    ensure!(
        !question.trim().is_empty(),
        EmptyQuestionSnafu { stage: "ask" }
    );

    let mut client = build_client(settings)?;
    let (target, status) = stream_answer(&mut client, question, !json).await?;

    if json
        && let Some(message) =
            target.and_then(|target| client.conversation().message(target.message_id))
    {
        let rendered = serde_json::to_string_pretty(message).context(RenderJsonSnafu {
            stage: "render-answer-json",
        })?;
        println!("{rendered}");
    }

    match status {
        SessionStatus::Error => AnswerFailedSnafu {
            stage: "ask",
            message: client
                .conversation()
                .error()
                .unwrap_or("chat request failed")
                .to_string(),
        }
        .fail(),
        _ => Ok(()),
    }
}

async fn chat(settings: &ClientSettings) -> CliResult<()> {
    let mut client = build_client(settings)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("repochat: /reset clears the conversation, /quit exits, Ctrl-C stops an answer");

    loop {
        print!("> ");
        flush_stdout()?;

        let line = tokio::select! {
            line = lines.next_line() => line.context(ReadInputSnafu { stage: "read-prompt" })?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                client.reset();
                eprintln!("(conversation cleared)");
            }
            utterance => {
                let (_, status) = stream_answer(&mut client, utterance, true).await?;
                if status == SessionStatus::Error
                    && let Some(error) = client.conversation().error()
                {
                    eprintln!("error: {error}");
                }
            }
        }
    }

    Ok(())
}

/// Sends one utterance and drives its session until it settles or Ctrl-C stops it.
async fn stream_answer(
    client: &mut ChatClient,
    utterance: &str,
    echo: bool,
) -> CliResult<(Option<StreamTarget>, SessionStatus)> {
    let target = client.send(utterance, SendOptions::default());

    if target.is_some() {
        loop {
            let step = tokio::select! {
                update = client.next_update() => Step::Update(update),
                _ = tokio::signal::ctrl_c() => Step::Interrupted,
            };

            match step {
                Step::Update(Some(ClientUpdate::Applied { chunk, .. })) => {
                    if echo && let ChunkPayload::Token { delta } = &chunk.payload {
                        print!("{delta}");
                        flush_stdout()?;
                    }
                }
                Step::Update(Some(_)) => {}
                Step::Update(None) => break,
                Step::Interrupted => {
                    client.stop();
                    break;
                }
            }
        }
    }

    let status = client.status();
    if echo {
        if let Some(target) = target {
            print_citations(client, target);
        }
        if status == SessionStatus::Aborted {
            eprintln!("[stopped]");
        }
    }

    Ok((target, status))
}

fn print_citations(client: &ChatClient, target: StreamTarget) {
    let Some(message) = client.conversation().message(target.message_id) else {
        return;
    };
    if !message.content.is_empty() {
        println!();
    }
    if message.citations.is_empty() {
        return;
    }

    println!("\nSources:");
    for (index, citation) in message.citations.iter().enumerate() {
        match citation.title.as_deref() {
            Some(title) if citation.file_path.is_some() => {
                println!("  [{}] {} ({title})", index + 1, citation.location())
            }
            _ => println!("  [{}] {}", index + 1, citation.location()),
        }
    }
}

fn flush_stdout() -> CliResult<()> {
    std::io::stdout().flush().context(WriteOutputSnafu {
        stage: "flush-stdout",
    })
}
