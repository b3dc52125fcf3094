//! Standalone orchestration server.
//!
//! Loads a configuration document, wires the orchestration components
//! together, and serves the observer transport until interrupted.
//!
//! ```text
//! inferflow-server <config.json> [bind-addr]
//! ```
//!
//! Exit code 0 means every run terminated cleanly; a failed or cancelled run
//! at shutdown yields a non-zero exit.

use inferflow::inferflow::transport;
use inferflow::{
    AgentRegistry, EventBus, HumanInputRendezvous, MappingService, OrchestrationConfig,
    OrchestrationFacade, RunStatus,
};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config_path = match args.next() {
        Some(path) => path,
        None => {
            eprintln!("usage: inferflow-server <config.json> [bind-addr]");
            std::process::exit(2);
        }
    };
    let bind_addr: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:8750".to_string())
        .parse()
        .unwrap_or_else(|error| {
            eprintln!("invalid bind address: {}", error);
            std::process::exit(2);
        });

    let config = match OrchestrationConfig::from_path(&config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("cannot load {}: {}", config_path, error);
            std::process::exit(2);
        }
    };

    let bus = EventBus::new();
    let rendezvous = Arc::new(HumanInputRendezvous::new(bus.clone()));
    let registry = AgentRegistry::new(".", rendezvous.clone());
    let facade = OrchestrationFacade::new(
        registry,
        Arc::new(MappingService::new()),
        bus,
        rendezvous,
    );
    if let Err(error) = config.apply(&facade) {
        eprintln!("invalid configuration: {}", error);
        std::process::exit(2);
    }

    let server = match transport::serve(facade.clone(), bind_addr).await {
        Ok(server) => server,
        Err(error) => {
            eprintln!("cannot bind {}: {}", bind_addr, error);
            std::process::exit(1);
        }
    };
    log::info!(
        "serving {} sequences on {}",
        facade.sequence_names().len(),
        server.addr()
    );

    if let Err(error) = tokio::signal::ctrl_c().await {
        log::error!("signal handling failed: {}", error);
    }
    server.shutdown();

    // Exit 0 only when every run terminated cleanly.
    let dirty = facade
        .run_ids()
        .into_iter()
        .filter_map(|run_id| facade.status(&run_id).map(|report| report.state))
        .any(|state| matches!(state, RunStatus::Failed | RunStatus::Cancelled));
    std::process::exit(if dirty { 1 } else { 0 });
}
