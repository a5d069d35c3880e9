#[global_allocator]
#[cfg(not(feature = "system_allocator"))]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod credentials;
mod responder;

use std::sync::Arc;

use config::Config;
use credentials::StaticCredentials;
use transaction::manager::NetworkManager;

fn main() -> anyhow::Result<()> {
    let config = Config::load();
    simple_logger::init_with_level(config.log.level.as_level())?;

    let credentials = Arc::new(StaticCredentials::new(config.credentials.users));
    let manager = NetworkManager::new(credentials.clone(), config.server.worker_threads);

    let local = manager.bind_udp(config.server.listen)?;
    log::info!("listening for STUN Binding requests on {local}");

    manager.register_listener(None, Arc::new(responder::BindingResponder::new(manager.clone(), credentials)));

    loop {
        std::thread::park();
    }
}
