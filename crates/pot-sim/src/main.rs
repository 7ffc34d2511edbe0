mod events;
mod run;
mod verify;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pot_renewal::RenewalConfig;

#[derive(Parser)]
#[command(name = "pot-sim", about = "Proof-of-transit renewal simulator")]
struct Cli {
    /// JSON renewal config (durations as "50ms", "2s"). Missing fields take defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision paths and let them rotate, streaming events as JSONL.
    Run {
        /// Number of paths.
        #[arg(long, default_value = "4")]
        paths: usize,
        /// Hops per path.
        #[arg(long, default_value = "3")]
        hops: usize,
        /// Requested refresh interval in ms.
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
        /// Profiles per path.
        #[arg(long, default_value = "2")]
        profiles: u32,
        /// Prime bit width.
        #[arg(long, default_value = "64")]
        bit_width: u32,
        /// How long to run.
        #[arg(long, default_value = "10")]
        duration_secs: u64,
        /// Simulated round trip per config write, in ms.
        #[arg(long, default_value = "0")]
        latency_ms: u64,
        /// Hop whose endpoint starts rejecting writes (e.g. "sff2").
        #[arg(long)]
        fail_hop: Option<String>,
        /// When the hop starts failing.
        #[arg(long, default_value = "3000")]
        fail_after_ms: u64,
        /// Heal the failing hop this long after it broke, then refresh stalled paths.
        #[arg(long)]
        heal_after_ms: Option<u64>,
        /// Seed for the profile generator.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Check that the distributed profiles actually verify packets.
    Verify {
        /// Hops on the path.
        #[arg(long, default_value = "4")]
        hops: usize,
        /// Profiles per path.
        #[arg(long, default_value = "2")]
        profiles: u32,
        /// Prime bit width.
        #[arg(long, default_value = "64")]
        bit_width: u32,
        /// Packets per profile.
        #[arg(long, default_value = "1000")]
        packets: u32,
        /// Rotations to verify after the initial activation.
        #[arg(long, default_value = "3")]
        rotations: u32,
        #[arg(long, default_value = "1")]
        seed: u64,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<RenewalConfig> {
    let Some(path) = path else {
        return Ok(RenewalConfig::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let renewal = load_config(cli.config.as_ref())?;

    eprintln!("pot-sim v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();

    match cli.command {
        Command::Run {
            paths,
            hops,
            interval_ms,
            profiles,
            bit_width,
            duration_secs,
            latency_ms,
            fail_hop,
            fail_after_ms,
            heal_after_ms,
            seed,
        } => {
            run::run(
                renewal,
                run::RunConfig {
                    paths,
                    hops,
                    interval_ms,
                    profiles,
                    bit_width,
                    duration_secs,
                    latency_ms,
                    fail_hop,
                    fail_after_ms,
                    heal_after_ms,
                    seed,
                },
            )
            .await?;
        }

        Command::Verify {
            hops,
            profiles,
            bit_width,
            packets,
            rotations,
            seed,
        } => {
            verify::run(
                renewal,
                verify::VerifyConfig {
                    hops,
                    profiles,
                    bit_width,
                    packets,
                    rotations,
                    seed,
                },
            )
            .await?;
        }
    }

    Ok(())
}
