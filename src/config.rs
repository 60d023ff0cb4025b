//! Server configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file
//! (or no file at all) yields a working single-node test server.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// plaintext LDAP listener
    pub listen: SocketAddr,
    /// where raft.log (and future snapshots) live
    pub data_dir: PathBuf,
    /// suffix entry created on first start; empty disables seeding
    pub base_dn: String,
    /// DN accepted with root_password by the bundled bind handler
    pub root_dn: String,
    /// empty disables the root account
    pub root_password: String,
    pub allow_anonymous: bool,
    /// 0 disables the read deadline
    pub read_timeout_secs: u64,
    pub commit_timeout_secs: u64,
    pub tls: Option<TlsConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    #[serde(default = "default_ldaps_listen")]
    pub listen: SocketAddr,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: SocketAddr::from(([0, 0, 0, 0], 389)),
            data_dir: PathBuf::from("./data"),
            base_dn: "dc=example,dc=com".to_owned(),
            root_dn: "cn=admin,dc=example,dc=com".to_owned(),
            root_password: String::new(),
            allow_anonymous: true,
            read_timeout_secs: 300,
            commit_timeout_secs: 10,
            tls: None,
        }
    }
}

fn default_ldaps_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 636))
}

impl Config {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.commit_timeout_secs)
    }
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}
