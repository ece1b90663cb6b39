//! ironloop binary: serves the tool catalog over stdio or runs one agent loop.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ironloop::agent::AgentLoopInput;
use ironloop::tools::mcp::{McpServer, McpTool};
use ironloop::{Config, Runtime};

#[derive(Parser)]
#[command(name = "ironloop", about = "Local tool-execution runtime for LLM agents", version)]
struct Cli {
    /// TOML config file (default: ~/.ironloop/config.toml if present).
    #[arg(long, global = true, env = "IRONLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    /// Override the sandbox root.
    #[arg(long, global = true)]
    sandbox_root: Option<PathBuf>,

    /// Override the hub document path.
    #[arg(long, global = true)]
    hub_path: Option<PathBuf>,

    /// Override the model service URL.
    #[arg(long, global = true)]
    llm_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve tools over stdin/stdout (default).
    Serve,
    /// Run one agent loop and print the result as JSON.
    Run {
        #[arg(short, long)]
        prompt: String,
        #[arg(short, long, default_value = "")]
        system: String,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(long)]
        max_iterations: Option<usize>,
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Print the tool catalog as JSON.
    Tools,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ironloop=info"));
    let registry = tracing_subscriber::registry().with(filter);
    // stdout carries protocol frames; logs go to stderr.
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.sandbox_root {
        config.sandbox.root = root;
    }
    if let Some(path) = cli.hub_path {
        config.hub.path = path;
    }
    if let Some(url) = cli.llm_url {
        config.llm.base_url = url;
    }
    config.validate()?;

    let runtime = Runtime::from_config(&config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(
                sandbox = %runtime.sandbox.root().display(),
                hub = %runtime.hub.path().display(),
                "Starting ironloop tool server"
            );
            let server = McpServer::new(runtime.registry.clone());
            server
                .serve(tokio::io::stdin(), tokio::io::stdout())
                .await
                .inspect_err(|e| tracing::error!("Tool server failed: {}", e))?;
            tracing::info!("ironloop tool server shutting down");
        }
        Command::Run {
            prompt,
            system,
            model,
            max_iterations,
            task_id,
        } => {
            let mut input = AgentLoopInput::new(prompt)
                .with_system(system)
                .with_max_iterations(max_iterations.unwrap_or(config.agent.max_iterations));
            if let Some(model) = model {
                input = input.with_model(model);
            }
            if let Some(task_id) = task_id {
                input = input.with_task_id(task_id);
            }
            let result = runtime.agent.run(input).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Tools => {
            let tools: Vec<McpTool> = runtime
                .registry
                .definitions()
                .into_iter()
                .map(McpTool::from)
                .collect();
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
    }

    Ok(())
}
