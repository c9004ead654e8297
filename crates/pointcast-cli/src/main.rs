//! Pointcast CLI
//!
//! Dev harness over pointcast-core. The only transport backend is the
//! in-process switchboard, so the `demo` command plays out a whole
//! estimation round (facilitator plus voters) inside one process and
//! prints each replicated state as it lands.
//!
//! ## Usage
//!
//! ```bash
//! # Run a scripted round with three voters
//! pointcast demo --voters 3
//!
//! # Print sample session codes
//! pointcast codes --count 5
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use pointcast_core::{
    Session, SessionCode, SessionLifecycleController, Storage, Switchboard, DEFAULT_VOTER_CAP,
};
use tracing_subscriber::EnvFilter;

/// Pointcast - planning poker session replication
#[derive(Parser)]
#[command(name = "pointcast")]
#[command(version = "0.1.0")]
#[command(about = "Planning poker session replication demo harness")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for per-peer databases (default: under the system temp dir)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted estimation round over the in-process transport
    Demo {
        /// Number of voters to simulate (max 8)
        #[arg(long, default_value_t = 3)]
        voters: usize,

        /// Item to estimate
        #[arg(long, default_value = "Story 1")]
        item: String,
    },

    /// Print sample session codes
    Codes {
        /// How many codes to print
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pointcast_core={0},pointcast={0}", default)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_board(session: &Session, hidden: bool) {
    println!(
        "  [{}] {}  item: {:?}",
        session.code, session.status, session.current_item
    );
    for p in session.participants.iter() {
        let marker = if p.is_facilitator { "*" } else { " " };
        let vote = match p.vote {
            Some(_) if hidden => "voted (hidden)".to_string(),
            Some(v) => v.to_string(),
            None => "-".to_string(),
        };
        println!("  {} {:12} {}", marker, p.display_name, vote);
    }
}

/// Poll the facilitator's snapshot until every voter's vote is recorded
async fn wait_for_votes(host: &SessionLifecycleController, voters: usize) -> Result<Session> {
    for _ in 0..100 {
        let session = host.session().await?;
        let recorded = session
            .participants
            .iter()
            .filter(|p| !p.is_facilitator && p.vote.is_some())
            .count();
        if recorded == voters {
            return Ok(session);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("votes did not arrive in time");
}

async fn run_demo(data_dir: PathBuf, voters: usize, item: &str) -> Result<()> {
    if voters > DEFAULT_VOTER_CAP {
        bail!("a session holds at most {} voters", DEFAULT_VOTER_CAP);
    }
    let board = Switchboard::new();

    let storage = Storage::new(data_dir.join("facilitator.redb"))?;
    let mut host = SessionLifecycleController::new(board.clone(), storage);
    let code = host.create_session("Dana").await?;
    println!("Session created, code: {}", code);

    let mut peers = Vec::new();
    for i in 0..voters {
        let name = format!("Voter {}", i + 1);
        let storage = Storage::new(data_dir.join(format!("voter{}.redb", i)))?;
        let mut peer = SessionLifecycleController::new(board.clone(), storage);
        peer.join_session(&name, code.as_str()).await?;
        println!("{} joined", name);
        peers.push(peer);
    }

    host.launch_vote(Some(item)).await?;
    println!("\nVoting on {:?}:", item);
    for (i, peer) in peers.iter().enumerate() {
        // A spread of common story-point values.
        let vote = [3, 5, 8, 5, 13][i % 5];
        peer.cast_vote(vote).await?;
    }
    let session = wait_for_votes(&host, voters).await?;
    print_board(&session, true);

    host.reveal_votes().await?;
    println!("\nRevealed:");
    print_board(&host.session().await?, false);

    host.new_round().await?;
    println!("\nNew round:");
    print_board(&host.session().await?, false);

    for mut peer in peers {
        peer.leave_session().await?;
    }
    host.close_session().await?;
    println!("\nSession closed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Demo { voters, item } => {
            let data_dir = cli
                .data_dir
                .unwrap_or_else(|| std::env::temp_dir().join("pointcast-demo"));
            run_demo(data_dir, voters, &item).await
        }
        Commands::Codes { count } => {
            for _ in 0..count {
                println!("{}", SessionCode::generate());
            }
            Ok(())
        }
    }
}
