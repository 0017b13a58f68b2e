//! Workbridge - Azure DevOps work items from the command line.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::Serialize;
use tracing::error;

use workbridge::api::auth::{self, AuthResolver};
use workbridge::api::client::ReqwestTransport;
use workbridge::cache::CacheLayer;
use workbridge::config::ConfigStore;
use workbridge::{logging, AzureResult, ServiceError, WorkItemService};

use cli::{Cli, Commands, CredentialCommands};

/// Exit code when the remote service refused a write.
const EXIT_REMOTE_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("Warning: file logging disabled: {:#}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            let message = e
                .downcast_ref::<ServiceError>()
                .map(ServiceError::user_message)
                .unwrap_or_else(|| format!("{:#}", e));
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Commands::Credential(command) = &cli.command {
        return credential(command);
    }

    let path = match cli.config {
        Some(path) => path,
        None => ConfigStore::default_path()?,
    };
    let namespace = format!("config-{}", path.display());
    let config = ConfigStore::from_path(path);
    let settings = config.get_settings();

    let transport =
        ReqwestTransport::with_timeout(Duration::from_secs(settings.request_timeout_secs))?;
    let service = WorkItemService::new(
        config,
        CacheLayer::for_namespace(&namespace),
        AuthResolver::with_keyring(),
        Arc::new(transport),
    );

    if cli.refresh {
        service.refresh_configuration();
    }

    let connection = || -> anyhow::Result<String> {
        cli.connection
            .clone()
            .or_else(|| settings.default_connection.clone())
            .ok_or_else(|| {
                anyhow!(
                    "no connection selected; pass --connection or set settings.default_connection"
                )
            })
    };

    match cli.command {
        Commands::Configs => print_json(&service.available_configurations()?)?,
        Commands::Types => print_json(&service.work_item_types()?)?,
        Commands::States {
            work_item_type,
            creation,
        } => {
            let states = if creation {
                service.creation_states_for_type(&work_item_type)?
            } else {
                service.available_states_for_type(&work_item_type)?
            };
            print_json(&states)?;
        }
        Commands::Priorities => print_json(&service.priorities())?,
        Commands::List {
            work_item_type,
            state,
            max,
        } => {
            let query = cli::list_query(work_item_type, state, max);
            let items = service.get_work_items(&connection()?, &query).await?;
            print_json(&items)?;
        }
        Commands::Create {
            work_item_type,
            title,
            state,
            fields,
        } => {
            let fields = cli::creation_fields(&title, state.as_deref(), &fields)?;
            let result = service
                .create_work_item(&connection()?, &work_item_type, fields)
                .await?;
            return report(&result);
        }
        Commands::Update { id, fields } => {
            let fields = cli::parse_fields(&fields)?;
            let result = service.update_work_item(&connection()?, id, fields).await?;
            return report(&result);
        }
        Commands::Delete { id, reason } => {
            let result = service
                .delete_work_item(&connection()?, id, reason.as_deref())
                .await?;
            return report(&result);
        }
        Commands::Credential(command) => return credential(&command),
    }

    Ok(ExitCode::SUCCESS)
}

fn credential(command: &CredentialCommands) -> anyhow::Result<ExitCode> {
    match command {
        CredentialCommands::Set { channel, token } => {
            auth::store_token(channel, token)
                .with_context(|| format!("storing token for '{}'", channel))?;
            print_json(&serde_json::json!({ "channel": channel, "stored": true }))?;
        }
        CredentialCommands::Status { channel } => {
            let stored = auth::has_token(channel);
            print_json(&serde_json::json!({ "channel": channel, "stored": stored }))?;
        }
        CredentialCommands::Delete { channel } => {
            auth::delete_token(channel)
                .with_context(|| format!("deleting token for '{}'", channel))?;
            print_json(&serde_json::json!({ "channel": channel, "stored": false }))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn report(result: &AzureResult) -> anyhow::Result<ExitCode> {
    print_json(result)?;
    if result.success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_REMOTE_FAILURE))
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
