//! The `keytree-server` binary.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use keytree_rules::{RejectDkim, Verifier};
use keytree_server::config::{Args, CONFIG_NAME, DATABASE_NAME};
use keytree_server::dkim::UnavailableProver;
use keytree_server::util::unix_now;
use keytree_server::{http, load_config, parse_duration, run_update_pipeline, Server};
use keytree_store::{RedbStore, SharedStore};
use keytree_trie::parallel_hash;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let catch_up_cutoff = match &args.catch_up_recovery {
        Some(duration) => {
            let age = parse_duration(duration)?;
            tracing::warn!("recovery enabled... after recovering, restart without recover flag!");
            Some(unix_now().saturating_sub(age))
        }
        None => None,
    };

    std::fs::create_dir_all(&args.data_dir)?;

    let config_path = args.data_dir.join(CONFIG_NAME);
    let database_path = args.data_dir.join(DATABASE_NAME);

    let (config, signer) = load_config(&config_path)?;
    tracing::info!("serving as {}", config.public_key);

    let store: SharedStore = Arc::new(RedbStore::open(&database_path)?);

    let root = store.load()?;
    let parallelism = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    parallel_hash(root.as_ref(), parallelism);

    let verifier = Verifier::new(Arc::new(RejectDkim), args.allow_test_names);
    let (server, update_rx) = Server::new(
        config,
        signer,
        store,
        verifier,
        root,
        catch_up_cutoff,
    );

    let ctx = CancellationToken::new();

    tokio::spawn(run_update_pipeline(server.clone(), update_rx));
    keytree_server::spawn_trackers(&server, &ctx);
    tokio::spawn(keytree_server::run_cleaner(server.clone(), ctx.clone()));

    let app = http::router(server, Arc::new(UnavailableProver));
    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;
    tracing::info!("listening on {}", args.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.cancel();
    tracing::info!("server stopped");
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        filter = filter.add_directive(level.parse().expect("static directive parses"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("listen for ctrl-c");
    }
}
