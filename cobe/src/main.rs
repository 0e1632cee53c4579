//! cobe: Markov chain chat bot.
//!
//!   cobe train FILE...                      Learn every line of each file
//!   cobe train-irc-log [-i NICK] FILE...    Learn from IRC logs
//!   cobe console                            Talk to the brain
//!   cobe oneliner                           Print one generated line
//!   cobe dump                               Print the brain's contents
//!   cobe irc-client -s SERVER -c '#chan'    Join IRC and chat
//!
//! All commands share `--brain PATH` (default `cobe.store`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use cobe::brain::Brain;
use cobe::config::{IrcArgs, IrcConfig};
use cobe::console;
use cobe::engine::Shutdown;
use cobe::ingest;
use cobe::normalize::NickFilter;
use cobe::session::{Session, runner};

#[derive(Parser)]
#[command(name = "cobe", version, about = "Markov chain chat bot")]
struct Cli {
    /// Brain store file
    #[arg(long, global = true, env = "COBE_BRAIN", default_value = "cobe.store")]
    brain: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train on files of text, one sentence per line (.gz allowed)
    Train {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Train on IRC logs made of "HH:MM <nick> message" lines
    TrainIrcLog {
        /// Ignore an IRC nick (repeatable)
        #[arg(short = 'i', long = "ignore-nick")]
        ignored_nicks: Vec<String>,

        /// Only train from this nick (repeatable)
        #[arg(short = 'o', long = "only-nick")]
        only_nicks: Vec<String>,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Interactive console: every line is learned, then answered
    Console,

    /// Print one line and exit
    Oneliner,

    /// Print stored tokens and trigram counts
    Dump,

    /// Run as an IRC bot
    IrcClient(IrcArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cobe=info,cobe_irc=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let brain_path = cli.brain;

    match cli.command {
        Command::Train { files } => {
            let shutdown = Shutdown::new();
            shutdown.on_ctrl_c();
            let count = blocking(move || {
                let mut brain = Brain::open(&brain_path)?;
                ingest::train_files(&mut brain, &files, &shutdown)
            })
            .await?;
            tracing::info!(lines = count, "Training done");
        }

        Command::TrainIrcLog {
            ignored_nicks,
            only_nicks,
            files,
        } => {
            let shutdown = Shutdown::new();
            shutdown.on_ctrl_c();
            let filter = NickFilter::new(ignored_nicks, only_nicks);
            let count = blocking(move || {
                let mut brain = Brain::open(&brain_path)?;
                ingest::train_irc_log(&mut brain, &files, &filter, &shutdown)
            })
            .await?;
            tracing::info!(lines = count, "Training done");
        }

        Command::Console => {
            blocking(move || {
                let mut brain = Brain::open(&brain_path)?;
                console::run(&mut brain, console::history_path())
            })
            .await?;
        }

        Command::Oneliner => {
            let line = blocking(move || {
                let mut brain = Brain::open(&brain_path)?;
                console::oneliner(&mut brain)
            })
            .await?;
            println!("{line}");
        }

        Command::Dump => blocking(move || dump(&brain_path)).await?,

        Command::IrcClient(args) => {
            let config = IrcConfig::from_args(args)?;
            let brain = Brain::open(&brain_path)?;
            tracing::info!(
                server = %config.server,
                port = config.port,
                nick = %config.nick,
                encoding = config.decoder.name(),
                channels = config.channels.len(),
                "Starting cobe"
            );
            let session = Session::new(config, brain);
            runner::run(session, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
        }
    }

    Ok(())
}

/// Run synchronous SQLite or terminal work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.context("worker task failed")?
}

fn dump(path: &Path) -> Result<()> {
    let brain = Brain::open(path)?;
    println!("Tokens:");
    for (id, text) in brain.tokens()? {
        println!("{text} {id}");
    }
    println!("3-gram counts:");
    for (grams, count) in brain.trigram_counts()? {
        println!("{grams:?} {count}");
    }
    Ok(())
}
