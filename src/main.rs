use sqlbot::app::build_bot;
use sqlbot::config::Config;
use sqlbot::logging::init_tracing;
use sqlbot::prompts::EXAMPLE_QUESTIONS;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "sqlbot")]
#[command(about = "Ask questions about an employee database in natural language")]
#[command(version)]
struct Args {
    /// SQLite database file (overrides SQLBOT_DATABASE)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Log everything at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        /// The question in natural language
        question: String,

        /// Also print the generated SQL and attempt count
        #[arg(long)]
        show_sql: bool,
    },
    /// Interactive chat; `:reset` clears the conversation, `:quit` exits
    Repl,
    /// List suggested questions
    Examples,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Commands::Examples = args.command {
        for example in EXAMPLE_QUESTIONS {
            println!("{}", example);
        }
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    let bot = build_bot(&config)?;

    match args.command {
        Commands::Ask { question, show_sql } => {
            match bot.ask_detailed(&question).await {
                Ok(outcome) => {
                    if show_sql {
                        println!("SQL: {}", outcome.sql);
                        println!("Rows: {} (attempts: {})\n", outcome.row_count, outcome.attempts);
                    }
                    println!("{}", outcome.message);
                }
                Err(failure) => println!("{}", failure.user_message()),
            }
        }
        Commands::Repl => {
            println!("SqlBot 2.0 - ask about the employee database. Try:");
            for example in EXAMPLE_QUESTIONS {
                println!("  - {}", example);
            }

            let stdin = io::stdin();
            loop {
                print!("\n> ");
                io::stdout().flush()?;

                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }

                match line.trim() {
                    "" => continue,
                    ":quit" | ":q" => break,
                    ":reset" => {
                        bot.reset_history().await;
                        info!("Conversation reset");
                        println!("Conversation cleared.");
                    }
                    question => println!("{}", bot.ask(question).await),
                }
            }
        }
        Commands::Examples => {}
    }

    Ok(())
}
