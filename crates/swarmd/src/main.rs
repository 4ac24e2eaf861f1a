//! swarmd — the peer-to-peer chunk transfer daemon.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use swarm_core::Config;
use swarmd::event_loop::EventLoop;
use swarmd::transport::UdpTransport;

fn print_usage() {
    println!("Usage: swarmd -i <index> -c <chunk_store> -m <max_conn> [-p <roster>] [-v <0-3>] [-t <secs>]");
    println!();
    println!("  -i <index>        this peer's index in the roster (required)");
    println!("  -p <path>         roster file (default: nodes.map)");
    println!("  -c <path>         local chunk store (required)");
    println!("  -m <count>        max_conn upload slots (required)");
    println!("  -v <0-3>          verbosity (default: 0)");
    println!("  -t <secs>         fixed retransmit timeout; 0 means use the RTT estimator");
}

fn parse_args(args: &[String]) -> Result<Config> {
    let mut peer_id: Option<u32> = None;
    let mut roster_path = PathBuf::from("nodes.map");
    let mut chunk_store_path: Option<PathBuf> = None;
    let mut max_conn: Option<usize> = None;
    let mut verbosity: u8 = 0;
    let mut fixed_timeout_secs: Option<u64> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-i" => {
                i += 1;
                peer_id = Some(
                    args.get(i)
                        .context("-i requires a value")?
                        .parse()
                        .context("-i must be a non-negative integer")?,
                );
            }
            "-p" => {
                i += 1;
                roster_path = PathBuf::from(args.get(i).context("-p requires a value")?);
            }
            "-c" => {
                i += 1;
                chunk_store_path = Some(PathBuf::from(args.get(i).context("-c requires a value")?));
            }
            "-m" => {
                i += 1;
                max_conn = Some(
                    args.get(i)
                        .context("-m requires a value")?
                        .parse()
                        .context("-m must be a non-negative integer")?,
                );
            }
            "-v" => {
                i += 1;
                verbosity = args
                    .get(i)
                    .context("-v requires a value")?
                    .parse()
                    .context("-v must be 0-3")?;
            }
            "-t" => {
                i += 1;
                let secs: u64 = args
                    .get(i)
                    .context("-t requires a value")?
                    .parse()
                    .context("-t must be a non-negative integer")?;
                fixed_timeout_secs = if secs == 0 { None } else { Some(secs) };
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            other => bail!("unrecognized flag: {other}"),
        }
        i += 1;
    }

    Ok(Config {
        peer_id: peer_id.context("-i is required")?,
        roster_path,
        chunk_store_path: chunk_store_path.context("-c is required")?,
        max_conn: max_conn.context("-m is required")?,
        verbosity,
        fixed_timeout_secs,
    })
}

async fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = parse_args(&args)?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.verbosity_level().to_string()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let roster = swarm_services::roster::load(&config.roster_path)
        .with_context(|| format!("loading roster from {}", config.roster_path.display()))?;
    let self_addr: SocketAddr = roster
        .iter()
        .find(|p| p.id == config.peer_id)
        .with_context(|| format!("peer id {} not found in roster", config.peer_id))?
        .addr;

    let chunk_store = swarm_services::chunk_store::load(&config.chunk_store_path)
        .with_context(|| format!("loading chunk store from {}", config.chunk_store_path.display()))?;

    let transport = UdpTransport::bind(self_addr)
        .await
        .with_context(|| format!("binding UDP socket on {self_addr}"))?;

    tracing::info!(peer_id = config.peer_id, %self_addr, max_conn = config.max_conn, "swarmd starting");

    let event_loop = EventLoop::new(
        transport,
        config.peer_id,
        roster,
        config.max_conn,
        config.fixed_timeout_secs,
        chunk_store,
    );
    event_loop.run().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("swarmd: {err:#}");
            ExitCode::FAILURE
        }
    }
}
