use anyhow::Context;
use clap::Parser;
use ldapd::backend::{Backend, Entry, MemoryBackend};
use ldapd::command::Command;
use ldapd::config::{self, Config};
use ldapd::handler::{Handler, SimpleBindHandler};
use ldapd::raft_log::{RaftLog, LOG_FILE_NAME};
use ldapd::replication::{LocalReplicator, Replicator};
use ldapd::server::{load_tls_config, Server};
use log::{error, info, warn};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Replicated LDAPv3 directory server
#[derive(Debug, Parser)]
#[command(name = "ldapd", version, about)]
struct Cli {
    /// Configuration file (TOML); defaults apply when absent
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the plaintext listen address
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "info" }),
    )
    .init();

    let mut config = match &cli.config {
        Some(path) => config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            warn!("no --config given, using built-in defaults");
            Config::default()
        }
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;
    let log_path = config.data_dir.join(LOG_FILE_NAME);
    let raft_log = Arc::new(RaftLog::open(&log_path).context("opening the replicated log")?);

    let backend = Arc::new(MemoryBackend::new());
    let replicator = Arc::new(LocalReplicator::new(raft_log, backend.clone()));
    let applied = replicator.recover();
    info!(
        "recovered {} committed entries from {}",
        applied,
        log_path.display()
    );

    if !config.base_dn.is_empty() && backend.get(None, &config.base_dn).is_err() {
        let mut suffix = Entry::new(config.base_dn.clone());
        suffix.set_attribute("objectClass", vec![b"top".to_vec(), b"domain".to_vec()]);
        replicator
            .submit(Command::put(0, config.base_dn.clone(), suffix.to_bytes()))
            .wait(config.commit_timeout())
            .context("seeding the suffix entry")?;
        info!("created suffix entry {}", config.base_dn);
    }

    let binds = Arc::new(SimpleBindHandler::new(
        backend.clone(),
        &config.root_dn,
        std::mem::take(&mut config.root_password).into_bytes(),
        config.allow_anonymous,
    ));
    let handler = Arc::new(Handler::new(
        backend,
        binds,
        replicator,
        config.commit_timeout(),
    ));
    let server = Arc::new(Server::new(handler, config.read_timeout()));

    if let Some(tls) = &config.tls {
        let tls_config = load_tls_config(&tls.cert_file, &tls.key_file)
            .context("loading the TLS certificate and key")?;
        let listener = TcpListener::bind(tls.listen)
            .with_context(|| format!("binding LDAPS listener on {}", tls.listen))?;
        let tls_server = server.clone();
        thread::spawn(move || {
            if let Err(e) = tls_server.serve_tls(listener, tls_config) {
                error!("LDAPS listener failed: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(config.listen)
        .with_context(|| format!("binding LDAP listener on {}", config.listen))?;
    server.serve_plaintext(listener)?;
    Ok(())
}
