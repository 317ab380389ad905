mod agent;
mod cache;
mod docs;
mod error;
mod history;
mod llm;
mod python;
mod state;
mod tools;

#[cfg(test)]
mod test_support;

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};

use agent::prompts::Rules;
use agent::{AgentDeps, CodingAgent};
use cache::LlmCache;
use llm::{CachedLlm, LlmClient};
use python::{CodeValidator, PythonSandbox};
use state::{AgentConfig, SharedState};

/// Coding Agent - LLM-driven coding assistant
#[derive(Parser, Debug)]
#[command(name = "coding-agent", version, about)]
struct Args {
    /// User query to process
    #[arg(short, long)]
    query: Option<String>,

    /// Keep asking for queries until `exit` or `quit`
    #[arg(short, long)]
    interactive: bool,

    /// Root for every relative path the tools touch
    #[arg(short = 'd', long, default_value = "./project")]
    working_dir: PathBuf,

    /// Bypass the LLM response cache
    #[arg(long)]
    no_cache: bool,

    /// Node executions allowed per query
    #[arg(long)]
    max_steps: Option<usize>,

    /// Print the agent graph as Mermaid
    #[arg(long)]
    graph: bool,

    /// Drop every cached LLM response before running
    #[arg(long)]
    clear_cache: bool,

    /// Log prompts and responses
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = AgentConfig::from_env();
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    if args.no_cache {
        config.cache_enabled = false;
    }

    // One handle per store: open it once even when only clearing.
    let cache = if config.cache_enabled || args.clear_cache {
        Some(LlmCache::open(&config.cache_dir).await?)
    } else {
        None
    };
    if args.clear_cache {
        if let Some(cache) = &cache {
            let dropped = cache.clear().await?;
            info!(dropped, dir = %config.cache_dir.display(), "LLM cache cleared");
        }
    }
    let cache = cache.filter(|_| config.cache_enabled);

    let backend = Arc::new(LlmClient::from_env()?);
    let llm = Arc::new(CachedLlm::new(
        backend,
        cache,
        config.model.clone(),
        config.sub_model.clone(),
    ));
    info!(model = %config.model, sub_model = %config.sub_model, "LLM client initialized");

    let validator: Arc<dyn CodeValidator> = Arc::new(PythonSandbox::new(
        config.python_bin.clone(),
        config.validate_timeout,
    ));
    let agent = CodingAgent::new(
        AgentDeps {
            llm,
            validator,
            rules: Rules::new(config.rules_file.clone()),
            catalog: config.tools.clone(),
            decision_retries: config.decision_retries,
            library: config.library.clone(),
            api_index: docs::shared(),
        },
        config.max_steps,
    );

    if args.graph {
        println!("{}", agent.graph());
    }

    info!(working_dir = %args.working_dir.display(), "Working directory");

    if args.interactive {
        interactive(&agent, args.working_dir).await?;
        return Ok(ExitCode::SUCCESS);
    }

    match args.query {
        Some(query) => {
            let mut state = SharedState::new(query, args.working_dir);
            let response = agent.run(&mut state).await?;
            println!("{}", response);
            Ok(ExitCode::SUCCESS)
        }
        None if args.graph || args.clear_cache => Ok(ExitCode::SUCCESS),
        None => {
            eprintln!("No query provided. Use --query or --interactive.");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Read queries from stdin until `exit`/`quit` or EOF. History carries over between queries.
async fn interactive(agent: &CodingAgent, working_dir: PathBuf) -> Result<()> {
    let mut state = SharedState::new("", working_dir);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n>> What would you like me to help you with?\n>> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") || query.eq_ignore_ascii_case("quit") {
            println!("Exiting interactive mode. Goodbye!");
            break;
        }

        state.begin_query(query);
        match agent.run(&mut state).await {
            Ok(response) => println!("{}", response),
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }
    Ok(())
}
