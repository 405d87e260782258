//! Binary entrypoint for the `shex` CLI.
//!
//! Parses the natural-language query, wires up configuration, logging, and
//! the interactive confirmation prompts, then hands the query to the agent.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser};
use crossterm::style::Stylize;
use tracing::info;

use shex::agent::AgentSession;
use shex::config::{AgentConfig, LlmConfig};
use shex::status::Spinner;
use shex::utils::{history, logger, paths};

/// Top-level CLI parser for `shex`.
#[derive(Debug, Parser)]
#[command(
    name = "shex",
    version,
    about = "Natural language command line assistant",
    after_help = "Example: shex list files in current directory"
)]
struct Cli {
    /// Natural language description of what you want to do.
    #[arg(trailing_var_arg = true)]
    query: Vec<String>,

    /// Consecutive failed commands tolerated before asking to continue.
    #[arg(long, default_value_t = 30)]
    max_retries: usize,

    /// Per-command timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Disable context loading/saving for this run.
    #[arg(long)]
    no_context: bool,

    /// Clear stored conversation context and exit.
    #[arg(long)]
    clear_context: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logging();
    let cli = Cli::parse();

    if cli.clear_context {
        let path = paths::context_path();
        if path.exists() {
            std::fs::remove_file(&path)?;
            println!("{}", "Context cleared".green());
        } else {
            println!("{}", "Context is empty".yellow());
        }
        return Ok(());
    }

    let query = cli.query.join(" ").trim().to_string();
    if query.is_empty() {
        Cli::command().print_help()?;
        return Ok(());
    }

    info!("User input: {}", query);
    history::save_query(&query);

    let llm = LlmConfig::from_env();
    if llm.api_key.is_empty() {
        bail!(
            "No API key configured. Put LLM_API_KEY (and optionally LLM_BASE_URL, \
             LLM_MODEL) in {} or the environment.",
            paths::env_path().display()
        );
    }

    let config = AgentConfig {
        llm,
        max_retries: cli.max_retries,
        command_timeout: Duration::from_secs(cli.timeout),
        ..AgentConfig::default()
    };
    let use_context = config.enable_context && !cli.no_context;

    let spinner = Arc::new(Spinner::new());
    let mut session = AgentSession::new(config, Arc::clone(&spinner))?;
    session.set_confirm_fn(Arc::new(confirm_dangerous));
    session.set_continue_fn(Box::new(confirm_continue));

    if use_context {
        session.load_context(&paths::context_path());
    }

    match session.run(&query).await {
        Ok(_answer) => {
            if use_context {
                session.save_context(&paths::context_path());
            }
            Ok(())
        }
        Err(e) => {
            // The spinner may still be mid-frame when the agent bails out.
            spinner.stop();
            eprintln!("\n{} {:#}", "Error:".red(), e);
            std::process::exit(1);
        }
    }
}

/// Ask the user to approve a dangerous command. Invoked with the exact
/// command text; EOF or anything but yes declines.
fn confirm_dangerous(command: &str) -> bool {
    println!("{} {}", "About to run:".yellow(), command);
    ask_yes_no("Execute this command? [y/N]: ")
}

/// Ask whether to keep retrying after `count` total failed commands.
fn confirm_continue(count: usize) -> bool {
    println!();
    println!(
        "{}",
        format!("Commands have failed {count} times.").yellow()
    );
    ask_yes_no("Keep trying? [y/N]: ")
}

fn ask_yes_no(prompt: &str) -> bool {
    print!("{}", prompt.yellow());
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().read_line(&mut answer) {
        Ok(0) | Err(_) => false, // EOF / unreadable stdin declines
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
    }
}
