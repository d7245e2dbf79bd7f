//! ROAP negotiation CLI binary.
//!
//! # Commands
//!
//! - `decode` - Validate and pretty-print a negotiation message
//! - `simulate` - Run two in-process peers over loopback transports
//! - `config` - Print the effective configuration

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use roap::{
    Config, CoordinatorEvent, EventReceiver, LoopbackTransport, NegotiationMessage,
    NegotiationState, SessionCoordinator, VERSION,
};

#[derive(Parser)]
#[command(name = "roap")]
#[command(version = VERSION)]
#[command(about = "ROAP offer/answer negotiation engine", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/roap/config.toml, then environment)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode and validate a JSON negotiation message
    Decode {
        /// JSON input (or - for stdin)
        input: Option<String>,

        /// Input file path
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Negotiate between two in-process peers and print the message trace
    Simulate {
        /// Both peers offer at the same time
        #[arg(long)]
        glare: bool,

        /// Make the offering peer's transport fail to create offers
        #[arg(long)]
        fail_offer: bool,

        /// Tie-breaker for the offering peer (default: from config)
        #[arg(long)]
        tie_breaker: Option<u32>,

        /// Tie-breaker for the answering peer
        #[arg(long, default_value = "42")]
        peer_tie_breaker: u32,

        /// Seconds to wait for both peers to settle
        #[arg(long, default_value = "5")]
        timeout: u64,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Decode { input, file } => cmd_decode(input, file),

        Commands::Simulate {
            glare,
            fail_offer,
            tie_breaker,
            peer_tie_breaker,
            timeout,
            verbose,
        } => cmd_simulate(
            &config,
            glare,
            fail_offer,
            tie_breaker,
            peer_tie_breaker,
            timeout,
            verbose,
        ),

        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        },
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    if let Some(path) = path {
        return Ok(Config::from_file(path)?);
    }
    match Config::default_path() {
        Some(path) if path.exists() => Ok(Config::from_file(path)?),
        _ => Ok(Config::from_env()),
    }
}

fn cmd_decode(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<()> {
    let content = read_input(input, file)?;
    let message = NegotiationMessage::from_json(content.trim())?;

    println!("{message}");
    println!("{}", message.to_json_pretty()?);
    Ok(())
}

fn cmd_simulate(
    config: &Config,
    glare: bool,
    fail_offer: bool,
    tie_breaker: Option<u32>,
    peer_tie_breaker: u32,
    timeout: u64,
    verbose: bool,
) -> anyhow::Result<()> {
    // Initialize logging
    let log_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    config.validate()?;
    let mut local = config.negotiation.clone();
    if let Some(tie_breaker) = tie_breaker {
        local = local.with_tie_breaker(tie_breaker);
    }
    let remote = config.negotiation.clone().with_tie_breaker(peer_tie_breaker);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut alice_transport = LoopbackTransport::new("alice");
        if fail_offer {
            alice_transport = alice_transport.with_offer_failure();
        }

        let (alice, alice_events) = SessionCoordinator::new(Arc::new(alice_transport), &local);
        let (bob, bob_events) =
            SessionCoordinator::new(Arc::new(LoopbackTransport::new("bob")), &remote);
        let alice = Arc::new(alice);
        let bob = Arc::new(bob);

        let alice_relay = tokio::spawn(relay("alice -> bob", alice_events, Arc::clone(&bob)));
        let bob_relay = tokio::spawn(relay("bob -> alice", bob_events, Arc::clone(&alice)));

        let (alice_result, bob_result) = if glare {
            let (a, b) = tokio::join!(alice.initiate_offer(), bob.initiate_offer());
            (a, Some(b))
        } else {
            (alice.initiate_offer().await, None)
        };

        let settled = |s: &roap::SessionSnapshot| {
            s.state == NegotiationState::Idle || s.state.is_terminal()
        };
        let wait = Duration::from_secs(timeout);
        tokio::time::timeout(wait, async {
            let _ = alice.wait_for(settled).await;
            let _ = bob.wait_for(settled).await;
        })
        .await
        .map_err(|_| anyhow::anyhow!("peers did not settle within {timeout}s"))?;

        println!();
        for (name, peer) in [("alice", &alice), ("bob", &bob)] {
            let snapshot = peer.snapshot();
            println!(
                "{name}: {} (seq {}, retries {})",
                snapshot.state, snapshot.sequence_number, snapshot.retry_count
            );
        }

        alice.close();
        bob.close();
        let _ = tokio::join!(alice_relay, bob_relay);

        alice_result.map_err(|e| anyhow::anyhow!("alice: {e}"))?;
        if let Some(result) = bob_result {
            result.map_err(|e| anyhow::anyhow!("bob: {e}"))?;
        }
        if alice.state().is_terminal() || bob.state().is_terminal() {
            anyhow::bail!("negotiation failed");
        }
        Ok(())
    })
}

/// Forward one peer's outbound messages to the other until the session closes.
async fn relay(label: &'static str, mut events: EventReceiver, peer: Arc<SessionCoordinator>) {
    while let Some(event) = events.recv().await {
        match event {
            CoordinatorEvent::OutboundMessage(message) => {
                println!("{label}: {message}");
                if let Err(e) = peer.message_received(message) {
                    tracing::warn!("{label}: delivery failed: {e}");
                }
            },
            CoordinatorEvent::NegotiationFailed(failure) => {
                println!("{label}: negotiation failed ({failure:?})");
            },
        }
    }
}

fn read_input(input: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    if let Some(path) = file {
        Ok(std::fs::read_to_string(path)?)
    } else if let Some(s) = input {
        if s == "-" {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        } else {
            Ok(s)
        }
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    }
}
