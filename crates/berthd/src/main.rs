//! berthd — the berth control-plane daemon.
//!
//! Single binary that assembles all berth subsystems:
//! - Application store (redb)
//! - Git ACL manager + serialized change agent
//! - Provisioner environments file
//! - CLI provisioner
//! - Application coordinator and its workers
//! - REST API
//!
//! Admin subcommands run against the same store and gitosis checkout,
//! so accounts can be bootstrapped before the API is up.
//!
//! # Usage
//!
//! ```text
//! berthd serve --config /etc/berth/berthd.toml
//! berthd user add chico@example.com
//! berthd team create cobrateam --member chico@example.com
//! berthd token issue chico@example.com
//! ```

mod config;
mod telemetry;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use berth_api::{build_router, ApiState, StoreTokenVerifier};
use berth_apps::{AccountManager, AppCoordinator, ConfigBroker, CoordinatorConfig};
use berth_envfile::EnvFileManager;
use berth_exec::{Executor, OsExecutor};
use berth_fs::{Fs, OsFs};
use berth_gitacl::{AclAgent, AclManager};
use berth_provision::{CliConfig, CliProvisioner};
use berth_store::Collections;
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "berthd", about = "Berth control-plane daemon")]
struct Cli {
    /// Path to berthd.toml.
    #[arg(long, global = true, default_value = "/etc/berth/berthd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and background workers.
    Serve,
    /// Manage user accounts.
    #[command(subcommand)]
    User(UserCommand),
    /// Manage teams.
    #[command(subcommand)]
    Team(TeamCommand),
    /// Manage access tokens.
    #[command(subcommand)]
    Token(TokenCommand),
}

#[derive(Subcommand)]
enum UserCommand {
    /// Register a user account.
    Add {
        /// Email identifying the user.
        email: String,
    },
}

#[derive(Subcommand)]
enum TeamCommand {
    /// Create a team and its repository group.
    Create {
        name: String,
        /// Initial members; repeatable.
        #[arg(long = "member")]
        members: Vec<String>,
    },
    /// Add a user to a team.
    AddMember { team: String, email: String },
    /// Remove a user from a team.
    RemoveMember { team: String, email: String },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Issue an access token for a user and print it.
    Issue { email: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(&cli.config)?;
    telemetry::init_subscriber(&config.tracing);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::User(command) => user_admin(config, command).await,
        Command::Team(command) => team_admin(config, command).await,
        Command::Token(command) => token_admin(config, command).await,
    }
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("berth daemon starting");

    let provider = telemetry::init_tracer(&config.tracing)?;
    let metrics = telemetry::install_recorder()?;

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("berth.redb");
    let store = Collections::open(&db_path)?;
    info!(path = ?db_path, "store opened");

    let fs: Arc<dyn Fs> = Arc::new(OsFs);
    let executor: Arc<dyn Executor> = Arc::new(OsExecutor);

    let acl_manager = Arc::new(AclManager::new(
        &config.git.repo_root,
        fs.clone(),
        executor.clone(),
    ));
    let (acl, acl_join) = AclAgent::spawn(acl_manager);
    info!(root = %config.git.repo_root, "acl agent started");

    let env_file = Arc::new(EnvFileManager::new(&config.environ.path, fs));
    let provisioner = Arc::new(CliProvisioner::new(executor, provisioner_config(&config)));
    let broker = Arc::new(ConfigBroker::new(
        config.environ.access_key.clone(),
        config.environ.secret_root.clone(),
        config.environ.bucket_prefix.clone(),
    ));

    let coordinator = Arc::new(AppCoordinator::new(
        store.clone(),
        provisioner,
        acl.clone(),
        env_file,
        broker,
        coordinator_config(&config),
    ));
    coordinator.start().await;
    info!("coordinator workers started");

    let accounts = Arc::new(AccountManager::new(store.clone(), acl));
    let verifier = Arc::new(StoreTokenVerifier::new(store.clone()));
    let request_id_header = HeaderName::from_bytes(config.api.request_id_header.as_bytes())?;
    let state = ApiState::new(coordinator.clone(), accounts, store, verifier)
        .with_metrics(metrics)
        .with_request_id_header(request_id_header);
    let router = build_router(state);

    let addr: SocketAddr = config.api.listen.parse()?;
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    coordinator.shutdown().await;
    // The agent exits once the last handle (inside the coordinator) drops.
    drop(coordinator);
    let _ = acl_join.await;
    if let Some(provider) = provider {
        provider.shutdown()?;
    }
    info!("berth daemon stopped");
    Ok(())
}

fn provisioner_config(config: &DaemonConfig) -> CliConfig {
    CliConfig {
        command: config.provisioner.command.clone(),
        charms_path: config.provisioner.charms_path.clone(),
        series: config.provisioner.series.clone(),
    }
}

fn coordinator_config(config: &DaemonConfig) -> CoordinatorConfig {
    CoordinatorConfig {
        git_host: config.git.host.clone(),
        env_type: config.environ.env_type.clone(),
        default_series: config.environ.default_series.clone(),
        run_attempts: config.workers.run_attempts,
        retry_delay: Duration::from_secs(config.workers.retry_delay_secs),
        reconcile_interval: Duration::from_secs(config.workers.reconcile_interval_secs),
    }
}

// ── Admin subcommands ──────────────────────────────────────────

fn open_accounts(config: &DaemonConfig) -> anyhow::Result<(AccountManager, JoinHandle<()>)> {
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Collections::open(&config.data_dir.join("berth.redb"))?;
    let fs: Arc<dyn Fs> = Arc::new(OsFs);
    let executor: Arc<dyn Executor> = Arc::new(OsExecutor);
    let manager = Arc::new(AclManager::new(&config.git.repo_root, fs, executor));
    let (acl, join) = AclAgent::spawn(manager);
    Ok((AccountManager::new(store, acl), join))
}

/// Drop the agent handle and wait for it to drain before exiting.
async fn close_accounts(accounts: AccountManager, join: JoinHandle<()>) {
    drop(accounts);
    let _ = join.await;
}

async fn user_admin(config: DaemonConfig, command: UserCommand) -> anyhow::Result<()> {
    let (accounts, join) = open_accounts(&config)?;
    let result = match command {
        UserCommand::Add { email } => accounts.create_user(&email).map(|user| {
            println!("user {} created", user.email);
        }),
    };
    close_accounts(accounts, join).await;
    result.map_err(Into::into)
}

async fn team_admin(config: DaemonConfig, command: TeamCommand) -> anyhow::Result<()> {
    let (accounts, join) = open_accounts(&config)?;
    let result = match command {
        TeamCommand::Create { name, members } => accounts
            .create_team(&name, &members)
            .await
            .map(|team| println!("team {} created", team.name)),
        TeamCommand::AddMember { team, email } => accounts
            .add_team_member(&team, &email)
            .await
            .map(|_| println!("{email} added to {team}")),
        TeamCommand::RemoveMember { team, email } => accounts
            .remove_team_member(&team, &email)
            .await
            .map(|_| println!("{email} removed from {team}")),
    };
    close_accounts(accounts, join).await;
    result.map_err(Into::into)
}

async fn token_admin(config: DaemonConfig, command: TokenCommand) -> anyhow::Result<()> {
    let (accounts, join) = open_accounts(&config)?;
    let result = match command {
        TokenCommand::Issue { email } => accounts.issue_token(&email).map(|token| {
            println!("{}", token.token);
        }),
    };
    close_accounts(accounts, join).await;
    result.map_err(Into::into)
}
