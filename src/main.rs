//! Firestore Explorer - command line entry point.
//!
//! Loads the connection settings, builds a client registry and runs one command.
//! Every cached client is disposed before the process exits.

use firestore_explorer::config::{AuthModeArg, Command, Config};
use firestore_explorer::models::{AuthMode, DatabaseTarget};
use firestore_explorer::secrets::{FileSecretStore, KeyringSecretStore, SecretStore};
use firestore_explorer::service::ConnectionDraft;
use firestore_explorer::store::ConnectionStore;
use firestore_explorer::{ConnectionClientRegistry, ConnectionService, RegistryError};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn report_error(err: &RegistryError) {
    eprintln!("Error: {}", err);
    if let Some(suggestion) = err.suggestion() {
        eprintln!("  {}", suggestion);
    }
}

async fn run(config: &Config, service: &ConnectionService) -> Result<(), RegistryError> {
    match &config.command {
        Command::List => {
            let connections = service.list().await;
            if connections.is_empty() {
                println!("No connections configured");
            }
            for connection in connections {
                println!("{}  {}", connection.id, connection.describe());
            }
        }
        Command::Add {
            name,
            project,
            database,
            auth,
            service_account_path,
        } => {
            let auth = match (auth, service_account_path) {
                (AuthModeArg::ServiceAccount, Some(path)) => {
                    AuthMode::ServiceAccountPath { path: path.clone() }
                }
                (AuthModeArg::ServiceAccount, None) => {
                    return Err(RegistryError::invalid_input(
                        "--service-account-path is required with --auth service-account",
                    ));
                }
                (_, Some(_)) => {
                    return Err(RegistryError::invalid_input(
                        "--service-account-path is only valid with --auth service-account",
                    ));
                }
                (AuthModeArg::Adc, None) => AuthMode::Adc,
                (AuthModeArg::Oauth, None) => AuthMode::GoogleOAuth,
            };
            let connection = service
                .add(ConnectionDraft {
                    name: name.clone(),
                    project_id: project.clone(),
                    database_id: DatabaseTarget::from_option(database.as_deref())?,
                    auth,
                })
                .await?;
            println!("{}", connection.id);
        }
        Command::Remove { id } => {
            let report = service.remove(id).await?;
            println!("Removed {} ({} clients closed)", id, report.closed);
        }
        Command::Resolve { id } => {
            let connection = service.get(id).await?;
            let client = service.registry().resolve_data_client(&connection).await?;
            println!(
                "{}  project={} database={} delegated={} url={}",
                connection.id,
                client.project_id(),
                client.database_id(),
                client.is_delegated(),
                client.documents_url()
            );
        }
        Command::Token { id } => {
            let connection = service.get(id).await?;
            let token = service.registry().get_access_token(&connection).await?;
            println!("{}", token);
        }
        Command::Check => {
            let connections = service.list().await;
            let mut failures = 0usize;
            for connection in &connections {
                match service.registry().resolve_data_client(connection).await {
                    Ok(_) => println!("ok    {}", connection.describe()),
                    Err(e) => {
                        failures += 1;
                        println!("fail  {}: {}", connection.describe(), e);
                    }
                }
            }
            let stats = service.registry().stats().await;
            info!(
                connections = connections.len(),
                failures,
                admin_clients = stats.admin_clients,
                delegated_credentials = stats.delegated_credentials,
                data_clients = stats.data_clients,
                "Check finished"
            );
            if failures > 0 {
                return Err(RegistryError::remote_unavailable(format!(
                    "{} of {} connections failed to resolve",
                    failures,
                    connections.len()
                )));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    info!("Starting firestore-explorer v{}", env!("CARGO_PKG_VERSION"));

    let oauth = config.oauth_client_config();
    if oauth.is_none() {
        warn!("No OAuth client configured; Google sign-in connections will fail");
    }

    let store = Arc::new(ConnectionStore::open(&config.settings).await?);
    let secrets: Arc<dyn SecretStore> = match &config.secrets_file {
        Some(path) => {
            info!(path = %path.display(), "Using file secret store");
            Arc::new(FileSecretStore::new(path))
        }
        None => Arc::new(KeyringSecretStore::new()),
    };
    let registry = ConnectionClientRegistry::builder(secrets)
        .options(config.registry_options()?)
        .oauth(oauth)
        .build()?;
    let service = ConnectionService::new(store, registry.clone());

    let result = tokio::select! {
        result = run(&config, &service) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    let report = registry.dispose_all().await;
    if !report.is_clean() {
        warn!(failed = report.failed, "Some clients did not shut down cleanly");
    }

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        report_error(&e);
        std::process::exit(1);
    }
    Ok(())
}
