use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sidekick::companion::{ChatBrain, Companion, TerminalBubble};
use sidekick::config::SidekickConfig;
use sidekick::engine::{ContextEngine, EngineEnv};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sidekick",
    about = "A coding sidekick that notices when you are stuck",
    version
)]
struct Cli {
    /// Config file (defaults to ~/.config/sidekick/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project root for git watching (defaults to current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command and watch its output
    Run(RunArgs),
    /// Watch terminal output arriving on stdin
    Pipe(PipeArgs),
    /// Ask for a tip right now
    Poke,
    /// Show or edit the configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Command and its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    cmd: Vec<String>,
}

#[derive(Args, Debug)]
struct PipeArgs {
    /// Command that produced the output, for context
    #[arg(long)]
    command: Option<String>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Write a default config file if none exists
    #[arg(long)]
    init: bool,
    /// Turn suggestions on
    #[arg(long, conflicts_with = "disable")]
    enable: bool,
    /// Turn suggestions off
    #[arg(long)]
    disable: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => SidekickConfig::config_path().context("Could not determine config directory")?,
    };

    match cli.command {
        Commands::Config(args) => run_config(&config_path, args),
        Commands::Poke => run_poke(&config_path).await,
        Commands::Run(args) => {
            let code = run_watched(&config_path, cli.workspace, args).await?;
            std::process::exit(code);
        }
        Commands::Pipe(args) => run_pipe(&config_path, cli.workspace, args).await,
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sidekick=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_config(path: &Path, args: ConfigArgs) -> Result<()> {
    let mut config = if path.exists() {
        SidekickConfig::load_from(path)?
    } else {
        SidekickConfig::default()
    };

    let mut dirty = args.init && !path.exists();
    if args.enable || args.disable {
        config.enabled = args.enable;
        dirty = true;
    }
    if dirty {
        config.save_to(path)?;
        eprintln!("  ✓ Saved {}", path.display());
    }

    let rendered = serde_json::to_string_pretty(&config).context("Failed to render config")?;
    println!("{}", rendered);
    Ok(())
}

struct Session {
    engine: Arc<ContextEngine>,
    companion: Arc<Companion>,
    settle_timeout: Duration,
}

impl Session {
    fn open(config_path: &Path, workspace: Option<PathBuf>) -> Result<Self> {
        let config = SidekickConfig::load_or_default(config_path);
        if !config.enabled {
            eprintln!(
                "  Suggestions are off. Run `sidekick config --enable` to turn them on."
            );
        } else if !config.listens_to("terminal") {
            eprintln!("  The terminal listener is off, so command output will not be watched.");
        }

        let brain = ChatBrain::new(config.assistant.clone())
            .context("Failed to set up the assistant client")?;
        let companion = Arc::new(Companion::new(
            Arc::new(brain),
            Arc::new(TerminalBubble),
            tokio::runtime::Handle::current(),
        ));

        let workspace = match workspace {
            Some(path) => Some(path),
            None => std::env::current_dir().ok(),
        };
        let env = EngineEnv {
            workspace,
            sink: Some(companion.clone()),
        };
        let engine = Arc::new(ContextEngine::setup(&config, env));
        engine.start();

        Ok(Self {
            engine,
            companion,
            settle_timeout: Duration::from_secs(config.assistant.timeout_secs),
        })
    }

    /// Let a pending suggestion finish, then stop the engine
    async fn close(self) {
        if !self.companion.settle(self.settle_timeout).await {
            tracing::debug!("suggestion still pending at exit, dismissed");
            self.companion.dismiss();
        }
        self.engine.shutdown().await;
    }
}

async fn run_poke(config_path: &Path) -> Result<()> {
    let config = SidekickConfig::load_or_default(config_path);
    let brain = ChatBrain::new(config.assistant.clone())
        .context("Failed to set up the assistant client")?;
    let companion = Companion::new(
        Arc::new(brain),
        Arc::new(TerminalBubble),
        tokio::runtime::Handle::current(),
    );
    companion.poke();
    companion
        .settle(Duration::from_secs(config.assistant.timeout_secs))
        .await;
    Ok(())
}

async fn run_watched(config_path: &Path, workspace: Option<PathBuf>, args: RunArgs) -> Result<i32> {
    let session = Session::open(config_path, workspace)?;
    let command_line = args.cmd.join(" ");

    let mut child = tokio::process::Command::new(&args.cmd[0])
        .args(&args.cmd[1..])
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to run `{}`", command_line))?;

    let stdout = child.stdout.take().context("Child stdout was not captured")?;
    let stderr = child.stderr.take().context("Child stderr was not captured")?;

    let out_task = forward(stdout, tokio::io::stdout(), Arc::clone(&session.engine), command_line.clone());
    let err_task = forward(stderr, tokio::io::stderr(), Arc::clone(&session.engine), command_line.clone());
    let (out, err) = tokio::join!(out_task, err_task);
    out?;
    err?;

    let status = child.wait().await.context("Failed to wait for command")?;
    session.close().await;
    Ok(status.code().unwrap_or(1))
}

async fn run_pipe(config_path: &Path, workspace: Option<PathBuf>, args: PipeArgs) -> Result<()> {
    let session = Session::open(config_path, workspace)?;
    let command = args.command.unwrap_or_default();
    forward(tokio::io::stdin(), tokio::io::stdout(), Arc::clone(&session.engine), command).await?;
    session.close().await;
    Ok(())
}

/// Echo `reader` to `writer` line by line, reporting each line to the engine
async fn forward<R, W>(reader: R, mut writer: W, engine: Arc<ContextEngine>, command: String) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let command = (!command.is_empty()).then_some(command);
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read output")? {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        engine.report_terminal_output(&line, command.as_deref());
    }
    Ok(())
}
