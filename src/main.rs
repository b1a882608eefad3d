#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use govein::{
    config::Config,
    filter::AccessFilter,
    logger::RequestLoggerLayer,
    ops::GoOps,
    server::ModProxyServer,
    toolchain::{GoCommand, download_root},
};
use govein_adapter::CacheStorage;
use rama::{
    Layer as RamaLayer,
    graceful::Shutdown,
    http::{layer::trace::TraceLayer, server::HttpServer},
    layer::ConsumeErrLayer,
    rt::Executor,
    tcp::server::TcpListener,
};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Go module proxy backed by the go command")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the module proxy server
    Serve {
        /// Path to the configuration file
        #[arg(long, default_value = "govein.toml")]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Resolve the configuration and print the effective layout
    Check {
        /// Path to the configuration file
        #[arg(long, default_value = "govein.toml")]
        config: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Debug, clap::Args)]
struct Overrides {
    /// Listen address as host:port
    #[arg(long)]
    listen: Option<String>,
    /// GOPATH handed to the go command; holds the module cache
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// File of module path patterns that may be served
    #[arg(long)]
    allow_list: Option<PathBuf>,
    /// File of module path patterns that must not be served
    #[arg(long)]
    deny_list: Option<PathBuf>,
}

impl Overrides {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(listen) = self.listen {
            config.server.set_listen(&listen)?;
        }
        if let Some(dir) = self.cache_dir {
            // go refuses a relative GOPATH
            let dir = std::path::absolute(&dir)
                .with_context(|| format!("resolving cache dir {}", dir.display()))?;
            config.storage.cache_dir = Some(dir);
        }
        if let Some(path) = self.allow_list {
            config.rules.allow_list = Some(path);
        }
        if let Some(path) = self.deny_list {
            config.rules.deny_list = Some(path);
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, overrides } => run_server(config, overrides),
        Command::Check { config, overrides } => run_check(config, overrides),
    }
}

fn load_config(config_path: PathBuf, overrides: Overrides) -> Result<Config> {
    let mut config = Config::load(Some(config_path)).context("loading configuration")?;
    overrides.apply(&mut config).context("applying command line")?;
    config.validate().context("validating configuration")?;
    Ok(config)
}

/// Everything the proxy needs before it can accept connections.
struct Setup {
    go: GoCommand,
    gopath: PathBuf,
    storage: CacheStorage,
    filter: AccessFilter,
}

fn setup(config: &Config) -> Result<Setup> {
    config
        .storage
        .ensure_directories()
        .context("creating cache directory")?;

    let filter = AccessFilter::load(
        config.rules.allow_list.as_deref(),
        config.rules.deny_list.as_deref(),
    )
    .context("loading access rules")?;

    let go = GoCommand::from_config(&config.toolchain, config.storage.cache_dir.as_deref());

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("constructing setup runtime")?;
    let gopath = rt
        .block_on(go.gopath())
        .context("resolving GOPATH")?
        .context("missing $GOPATH")?;

    let storage = CacheStorage::new(download_root(&gopath));
    rt.block_on(storage.prepare())
        .context("preparing module cache directory")?;

    Ok(Setup {
        go,
        gopath,
        storage,
        filter,
    })
}

fn run_server(config_path: PathBuf, overrides: Overrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    init_tracing(&config)?;

    let Setup {
        go,
        gopath,
        storage,
        filter,
    } = setup(&config)?;

    tracing::info!(
        go = go.program(),
        gopath = %gopath.display(),
        download_root = %storage.root().display(),
        allow_rules = filter.allow_count(),
        deny_rules = filter.deny_count(),
        list_ttl_secs = config.toolchain.list_ttl_secs,
        "module proxy configured"
    );

    let ops = GoOps::new(filter, storage, go).with_list_ttl(config.toolchain.list_ttl());
    let server = ModProxyServer::new(ops);

    let rt_server = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("constructing server runtime")?;

    rt_server.block_on(async move {
        let graceful = Shutdown::default();
        let addr = config.server.listen_addr();

        let tcp_service = TcpListener::build()
            .bind(addr.clone())
            .await
            .map_err(|err| anyhow::anyhow!("binding {addr}: {err}"))?;

        tracing::info!(%addr, "starting Rama HTTP server");

        graceful.spawn_task_fn(move |guard| async move {
            let exec = Executor::graceful(guard.clone());
            let http_service = HttpServer::auto(exec).service(
                (
                    TraceLayer::new_for_http(),
                    RequestLoggerLayer,
                    ConsumeErrLayer::default(),
                )
                    .into_layer(server),
            );

            tcp_service.serve_graceful(guard, http_service).await;
        });

        tokio::signal::ctrl_c()
            .await
            .context("listening for shutdown signal")?;

        graceful
            .shutdown_with_limit(Duration::from_secs(30))
            .await?;

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn run_check(config_path: PathBuf, overrides: Overrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    init_tracing(&config)?;

    let Setup {
        go,
        gopath,
        storage,
        filter,
    } = setup(&config)?;

    println!("listen: {}", config.server.listen_addr());
    println!("workers: {}", config.server.workers);
    println!("go binary: {}", go.program());
    println!("GOPATH: {}", gopath.display());
    println!("download root: {}", storage.root().display());
    println!("list ttl: {}s", config.toolchain.list_ttl_secs);
    println!(
        "allow list: {}",
        describe_rules(config.rules.allow_list.as_deref(), filter.allow_count())
    );
    println!(
        "deny list: {}",
        describe_rules(config.rules.deny_list.as_deref(), filter.deny_count())
    );
    Ok(())
}

fn describe_rules(path: Option<&Path>, count: usize) -> String {
    match path {
        Some(path) => format!("{} ({count} patterns)", path.display()),
        None => "none".to_string(),
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = config.logging.env_filter().context("building log filter")?;

    let fmt_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
