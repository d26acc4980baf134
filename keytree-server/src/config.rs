//! Configuration file, command-line flags, and tuning constants.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use keytree_crypto::{generate_ed25519_keypair, Signer};

pub const CONFIG_NAME: &str = "keytree-server.config";
pub const DATABASE_NAME: &str = "keytree-server.redb";

/// How long the pipeline waits after the first staged update before
/// flushing a batch.
pub const UPDATE_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Ceiling between flushes when idle; keeps signed roots fresh for peers.
pub const NO_FLUSH_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Size of the update-batch and pinned-trie rings.
pub const UPDATE_BATCH_BACKLOG: usize = 200;

pub const FIXER_PARALLELISM: usize = 8;

pub const UPDATE_QUEUE_SIZE: usize = 1000;
pub const RECONCILE_QUEUE_SIZE: usize = 2000;

/// Slack around "now" for accepted update timestamps.
pub const UPDATE_WINDOW_SLACK: u64 = 15 * 60;

/// Idle tries older than this are released by the cleaner.
pub const OLD_TRIE_CUTOFF: u64 = 10 * 60;

/// How often the old-trie cleaner runs.
pub const CLEAN_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    pub address: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    pub public_key: String,
    pub private_key: String,
    #[serde(default)]
    pub upstream: Vec<ServerInfo>,
    #[serde(rename = "DNSServer", default)]
    pub dns_server: String,
}

#[derive(Parser, Debug)]
#[command(name = "keytree-server", version, about = "Federated keytree directory server")]
pub struct Args {
    /// Where to keep data.
    #[arg(long = "data-dir", default_value = "data")]
    pub data_dir: PathBuf,

    /// Address to listen on.
    #[arg(long = "listenAddr", default_value = "0.0.0.0:8000")]
    pub listen_addr: String,

    /// Run in recovery mode accepting keys up to this old. Format: a
    /// floating-point number followed by 'h', 'd', 'm', or 'y'.
    #[arg(long = "catch-up-recovery")]
    pub catch_up_recovery: Option<String>,

    /// Allow names of the form 'test:' without proof of ownership.
    #[arg(long = "allow-test-names", default_value_t = true, action = clap::ArgAction::Set)]
    pub allow_test_names: bool,

    /// Verbose logging (-v for debug, -vv for trace).
    #[arg(long, short, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a `<float><h|d|m|y>` duration into seconds.
pub fn parse_duration(duration: &str) -> Result<u64, anyhow::Error> {
    if duration.len() < 2 {
        anyhow::bail!("missing suffix");
    }

    let (number, suffix) = duration.split_at(duration.len() - 1);
    let multiplier: f64 = match suffix {
        "h" => 60.0 * 60.0,
        "d" => 24.0 * 60.0 * 60.0,
        "m" => 31.0 * 24.0 * 60.0 * 60.0,
        "y" => 365.0 * 24.0 * 60.0 * 60.0,
        _ => anyhow::bail!("unknown suffix character"),
    };

    let n: f64 = number.parse()?;
    Ok((n * multiplier) as u64)
}

fn write_default_config(path: &Path) -> Result<(), anyhow::Error> {
    let (public_key, private_key) = generate_ed25519_keypair();
    let config = Config {
        public_key,
        private_key,
        upstream: Vec::new(),
        dns_server: "8.8.4.4:53".to_owned(),
    };

    let bytes = serde_json::to_vec_pretty(&config)?;
    std::fs::write(path, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// Load the config, generating a fresh identity on first start.
pub fn load_config(path: &Path) -> Result<(Config, Signer), anyhow::Error> {
    if !path.exists() {
        write_default_config(path)?;
    }

    let bytes = std::fs::read(path)?;
    let config: Config = serde_json::from_slice(&bytes)?;
    let signer = Signer::new(&config.private_key)
        .map_err(|err| anyhow::anyhow!("bad private key in config: {}", err))?;

    Ok((config, signer))
}
