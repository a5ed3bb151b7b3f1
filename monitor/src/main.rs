use anyhow::Context;
use clap::Parser;
use generator::profile::{write_capture, GeneratorConfig};
use rivercore::session::SerialLinkProvider;
use rivercore::settings::SettingsStore;
use rpc_bridge::bridge::{default_bind_address, RpcBridge};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::manager::DataManager;

mod generator;
mod rpc_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "ADCP ensemble monitor: serial terminal, replay and query bridge")]
struct Args {
    /// Settings file; created on first save
    #[arg(long, default_value = "rivermonitor.yaml")]
    settings: PathBuf,
    /// Address for the HTTP query bridge
    #[arg(long, default_value_t = default_bind_address())]
    bind: SocketAddr,
    /// Capture files to replay before serving
    #[arg(long, num_args = 1..)]
    replay: Vec<PathBuf>,
    /// Write a synthetic capture file and exit
    #[arg(long)]
    simulate: Option<PathBuf>,
    /// Number of ensembles written by --simulate
    #[arg(long, default_value_t = 100)]
    ensembles: usize,
    /// Keep the HTTP bridge alive until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Some(path) = args.simulate {
        let config = GeneratorConfig {
            count: args.ensembles,
            ..Default::default()
        };
        let written = write_capture(&path, &config)?;
        println!("Wrote {} ensembles to {}", written, path.display());
        return Ok(());
    }

    let settings = Arc::new(SettingsStore::load(args.settings.clone()));
    let manager = Arc::new(DataManager::new(settings, Arc::new(SerialLinkProvider)));
    manager.start()?;

    if !args.replay.is_empty() {
        if let Some(handle) = manager.replay(args.replay)? {
            let summary = handle
                .join()
                .map_err(|_| anyhow::anyhow!("replay thread panicked"))?;
            manager.wait_idle(Duration::from_secs(10));
            let tabular = manager.tabular_data();
            println!(
                "Replayed {} file(s): {} frames accepted, {} rejected; {} ensembles, {} lost",
                summary.files,
                summary.frames_accepted,
                summary.frames_rejected,
                tabular.num_ensembles,
                tabular.lost_ensembles
            );
        }
    }

    if args.serve {
        let bridge = RpcBridge::spawn(Arc::clone(&manager), args.bind)?;
        println!("Query bridge on http://{} (Ctrl+C to stop)...", bridge.address());
        let runtime = TokioBuilder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for signal handling")?;
        runtime.block_on(async {
            signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
            Ok::<(), anyhow::Error>(())
        })?;
    }

    manager.shutdown();
    Ok(())
}
