use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use physync_server::{Gateway, InputSchedule, RoomManager, ServerConfig};

#[derive(Parser)]
#[command(name = "physync-server")]
#[command(about = "Authoritative room-based rigid-body synchronization server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = physync::DEFAULT_PORT)]
    port: u16,

    /// How inbound inputs are mapped onto simulation ticks.
    #[arg(long, value_enum, default_value_t = InputSchedule::Immediate)]
    input_schedule: InputSchedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        bind: args.bind,
        port: args.port,
        input_schedule: args.input_schedule,
    };

    let listener = TcpListener::bind(config.bind_addr()).await?;
    info!("listening on {}", listener.local_addr()?);

    let manager = Arc::new(RoomManager::new(config.input_schedule));
    let gateway = Gateway::new(Arc::clone(&manager));

    tokio::select! {
        _ = gateway.listen(listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    manager.shutdown().await;
    Ok(())
}
