//! Mira surface broker daemon.

use anyhow::Result;
use mira_broker::serve;
use mira_broker::session::BrokerState;
use mira_broker::shm::ShmCompositor;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mira_broker=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup failures abort; everything after this point is answered with
    // result codes instead.
    let provider = ShmCompositor::from_env();
    let mut state = BrokerState::new(provider);

    let socket_path = mira_ipc::socket_path();
    let listener = serve::bind_listener(&socket_path)?;
    info!("surface broker listening on {:?}", socket_path);

    serve::run(&listener, &mut state)
}
