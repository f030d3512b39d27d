use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use walletflow::{ActionRegistry, FlowConfig};
use walletflow_server::http::{FlowExecutor, serve};
use walletflow_server::logging::init_logging;
use walletflow_server::probe::NavigateProbeAgent;

#[derive(Parser)]
#[command(name = "walletflow", about = "Task server for wallet flows")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: SocketAddr,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match FlowConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(target = "wf", error = %err, "startup failed");
            std::process::exit(2);
        }
    };

    let executor = FlowExecutor::new(
        config,
        ActionRegistry::with_builtins(),
        Box::new(NavigateProbeAgent),
    );
    if let Err(err) = serve(args.listen, Arc::new(executor)).await {
        error!(target = "wf", error = %err, "server failed");
        std::process::exit(1);
    }
}
