use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::read_to_string;
use std::net::SocketAddr;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    /// UDP address the demo STUN responder binds.
    #[serde(default = "Server::listen")]
    pub listen: SocketAddr,

    /// worker thread count for the network manager's decode/dispatch pool.
    #[serde(default = "Server::worker_threads")]
    pub worker_threads: usize,
}

impl Server {
    fn listen() -> SocketAddr {
        "127.0.0.1:3478".parse().unwrap()
    }

    fn worker_threads() -> usize {
        transaction::manager::DEFAULT_WORKER_COUNT
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { listen: Self::listen(), worker_threads: Self::worker_threads() }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Credentials {
    /// static username -> pre-shared key table.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct Mux {
    #[serde(default = "Mux::read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "Mux::backlog")]
    pub backlog: i32,
}

impl Mux {
    fn read_timeout_ms() -> u64 {
        mux::DEFAULT_READ_TIMEOUT_MS
    }

    fn backlog() -> i32 {
        mux::DEFAULT_BACKLOG
    }
}

impl Default for Mux {
    fn default() -> Self {
        Self { read_timeout_ms: Self::read_timeout_ms(), backlog: Self::backlog() }
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub mux: Mux,
    #[serde(default)]
    pub log: Log,
}

impl Default for Config {
    fn default() -> Self {
        Self { server: Server::default(), credentials: Credentials::default(), mux: Mux::default(), log: Log::default() }
    }
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// specify the configuration file path.
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    /// Load command line parameters; if a configuration file path is given,
    /// merge it over the defaults, otherwise use the defaults outright.
    pub fn load() -> Self {
        let cfg_str = Cli::parse().config.and_then(|path| read_to_string(path).ok()).unwrap_or_default();

        if cfg_str.trim().is_empty() {
            Self::default()
        } else {
            toml::from_str(&cfg_str).expect("read config file failed!")
        }
    }
}
