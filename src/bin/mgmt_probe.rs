use std::{error::Error, net::SocketAddr, path::PathBuf, sync::mpsc, time::Duration};

use clap::{Parser, Subcommand};
use mgmt_client::{ProtocolVersion, Session, SessionConfig, TableId};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of the management server
    address: SocketAddr,
    /// Newest protocol revision to offer the server
    #[arg(long, default_value_t = ProtocolVersion::CURRENT.code())]
    protocol: u32,
    /// Seconds to wait for a connection
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
    /// Directory for spooled tables
    #[arg(long)]
    spool_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Probe,
}

#[derive(Debug, Subcommand)]
enum Probe {
    /// Print the negotiated protocol and the round trip of one ping
    Ping,
    /// Print how many rows the server holds for a table
    Count { table: u16 },
    /// Invalidate a table on the server and print what it reported stale
    Invalidate { table: u16 },
    /// Print server-pushed invalidations until interrupted
    Watch,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut config = SessionConfig::new(cli.address);
    config.client_version = ProtocolVersion::from_code(cli.protocol)?;
    config.connect_timeout = Duration::from_secs(cli.connect_timeout);
    if let Some(dir) = cli.spool_dir {
        config.spool_dir = dir;
    }

    let session = Session::open(config)?;
    match cli.command {
        Probe::Ping => {
            let pong = session.ping()?;
            println!("{} speaking {} in {:?}", cli.address, pong.version, pong.round_trip);
        }
        Probe::Count { table } => {
            println!("{}", session.row_count(TableId(table))?);
        }
        Probe::Invalidate { table } => {
            let stale = session.invalidate_table(TableId(table))?;
            let stale: Vec<String> = stale.iter().map(|t| t.to_string()).collect();
            println!("stale: {}", stale.join(", "));
        }
        Probe::Watch => {
            let (tx, rx) = mpsc::channel();
            ctrlc::set_handler(move || {
                let _ = tx.send(());
            })?;

            session.on_invalidate(|list| {
                let tables: Vec<String> = list.iter().map(|t| t.to_string()).collect();
                println!("invalidated: {}", tables.join(", "));
            });
            session.listen_for_invalidations()?;
            println!("watching {} (Ctrl-C to stop)", cli.address);

            rx.recv()?;
            session.stop_listening();
        }
    }

    Ok(())
}
