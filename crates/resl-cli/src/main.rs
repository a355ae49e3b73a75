//! resl CLI - Command line interface for the execution sandbox

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use resl_core::{
    ExecutionReport, LanguageRegistry, OutcomeKind, Pipeline, SandboxConfig,
    config::{default_socket_path, languages_path_from_env},
    input::normalize_source,
    protocol::{self, ExecuteRequest, Request, Response},
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "resl")]
#[command(author, version, about = "Run untrusted code in disposable containers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TableArgs {
    /// Language table (defaults to RESL_LANGUAGES or the builtin table)
    #[arg(short, long)]
    languages: Option<PathBuf>,
}

#[derive(Args)]
struct SocketArgs {
    /// Socket path (defaults to RESL_SOCKET env var or /run/resl/resl.sock)
    #[arg(short, long)]
    socket: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run code directly (without daemon)
    Run {
        /// Language key, e.g. py, js, c
        language: String,

        /// Code to execute (or - for stdin)
        code: String,

        /// End-to-end timeout in seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,

        /// Container runtime binary (defaults to RESL_RUNTIME or docker)
        #[arg(short, long)]
        runtime: Option<PathBuf>,

        /// Directory for execution workspaces
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        table: TableArgs,
    },

    /// Execute code via the daemon
    Exec {
        /// Language key, e.g. py, js, c
        language: String,

        /// Code to execute (or - for stdin)
        code: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        socket: SocketArgs,
    },

    /// List supported languages
    Languages {
        #[command(flatten)]
        table: TableArgs,
    },

    /// Pull every sandbox image of the language table
    Pull {
        /// Container runtime binary (defaults to RESL_RUNTIME or docker)
        #[arg(short, long)]
        runtime: Option<PathBuf>,

        #[command(flatten)]
        table: TableArgs,
    },

    /// Ping the daemon
    Ping {
        #[command(flatten)]
        socket: SocketArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("resl=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            code,
            timeout,
            runtime,
            workspace,
            json,
            table,
        } => {
            let mut builder = SandboxConfig::builder().timeout_secs(timeout);
            if let Some(runtime) = runtime {
                builder = builder.runtime(runtime);
            }
            if let Some(workspace) = workspace {
                builder = builder.workspace_root(workspace);
            }

            let pipeline = Pipeline::new(builder.build(), load_registry(&table)?);
            let code = normalize_source(&read_code(&code).await?);
            let report = pipeline.execute(&language, &code).await;
            finish(&report, json)
        }

        Commands::Exec {
            language,
            code,
            json,
            socket,
        } => {
            // The daemon normalises the code itself
            let code = read_code(&code).await?;
            let request = Request::Execute(ExecuteRequest { language, code });
            match call(&socket_path(&socket), &request).await? {
                Response::Execute(report) => finish(&report, json),
                other => unexpected(other),
            }
        }

        Commands::Languages { table } => {
            let registry = load_registry(&table)?;
            for config in registry.iter() {
                println!("{:<8} {}", config.key, config.image);
            }
            Ok(())
        }

        Commands::Pull { runtime, table } => {
            let mut builder = SandboxConfig::builder();
            if let Some(runtime) = runtime {
                builder = builder.runtime(runtime);
            }
            let pipeline = Pipeline::new(builder.build(), load_registry(&table)?);
            pipeline.prime().await?;
            println!("{} images ready", pipeline.registry().images().len());
            Ok(())
        }

        Commands::Ping { socket } => {
            let socket = socket_path(&socket);
            match call(&socket, &Request::Ping).await? {
                Response::Pong => {
                    println!("daemon at {} is alive", socket.display());
                    Ok(())
                }
                other => unexpected(other),
            }
        }
    }
}

fn load_registry(table: &TableArgs) -> anyhow::Result<LanguageRegistry> {
    let path = table.languages.clone().or_else(languages_path_from_env);
    LanguageRegistry::load(path.as_deref()).context("failed to load language table")
}

fn socket_path(args: &SocketArgs) -> PathBuf {
    args.socket.clone().unwrap_or_else(default_socket_path)
}

/// Read code from the argument, or from stdin for `-`
async fn read_code(arg: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_owned());
    }
    let mut code = String::new();
    tokio::io::stdin()
        .read_to_string(&mut code)
        .await
        .context("failed to read code from stdin")?;
    Ok(code)
}

async fn call(socket: &Path, request: &Request) -> anyhow::Result<Response> {
    let mut stream = tokio::time::timeout(Duration::from_secs(5), UnixStream::connect(socket))
        .await
        .with_context(|| format!("timed out connecting to {}", socket.display()))?
        .with_context(|| format!("failed to connect to daemon at {}", socket.display()))?;

    protocol::write_frame(&mut stream, request).await?;
    protocol::read_frame(&mut stream)
        .await?
        .context("daemon closed the connection without answering")
}

fn unexpected(response: Response) -> anyhow::Result<()> {
    match response {
        Response::Error { message } => bail!("daemon error: {message}"),
        other => bail!("unexpected response from daemon: {other:?}"),
    }
}

/// Print the report and exit with the code matching its outcome
fn finish(report: &ExecutionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        match report.kind {
            kind if kind.is_infrastructure() => {
                eprintln!("Sorry! Unable to set up the execution environment: {}", report.text);
            }
            OutcomeKind::UnsupportedLanguage | OutcomeKind::TimedOut => {
                eprintln!("{}", report.text);
            }
            _ if report.text.is_empty() => println!("[No output]"),
            _ => print!("{}", report.text),
        }
    }
    std::io::stdout().flush()?;

    std::process::exit(report.kind.exit_code());
}
