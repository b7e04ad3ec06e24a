use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use accesskeep::access::AccessManager;
use accesskeep::app;
use accesskeep::config::{default_config_path, ResolvedConfig};
use accesskeep::error::AccessError;
use accesskeep::models::{BearerPair, CliTool, CredentialPayload, Provider, StaticKey};
use accesskeep::session::CliLogin;
use accesskeep::storage::JsonFileStore;

#[derive(Parser)]
#[command(name = "accesskeep")]
#[command(about = "Multi-provider cloud credential and session manager")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show current configuration
    Config,

    /// List stored credentials (all providers when none is given)
    List { provider: Option<Provider> },

    /// Make a credential the provider's only active one
    Activate { provider: Provider, name: String },

    /// Clear the active flag on every credential of a provider
    Deactivate { provider: Provider },

    /// Delete whichever credential is active
    DeleteActive { provider: Provider },

    /// Delete a credential by name
    Delete { provider: Provider, name: String },

    /// Materialize the active credential, refreshing it if it expired
    Current { provider: Provider },

    /// Show the claims of a bearer token (signature NOT verified)
    Decode { token: String },

    /// Store an AWS access key
    AddStaticKey {
        name: String,
        #[arg(long)]
        access_key_id: String,
        #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
        secret_access_key: String,
        #[arg(long, env = "AWS_SESSION_TOKEN", hide_env_values = true)]
        session_token: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        activate: bool,
    },

    /// Store a service-account or service-principal JSON document
    AddKeyFile {
        provider: Provider,
        name: String,
        path: PathBuf,
        /// Scope to request (repeatable)
        #[arg(long = "scope")]
        scopes: Vec<String>,
        #[arg(long)]
        activate: bool,
    },

    /// Store an OAuth access token and optional refresh token
    AddBearer {
        provider: Provider,
        name: String,
        #[arg(long, env = "ACCESSKEEP_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,
        #[arg(long, env = "ACCESSKEEP_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        token_endpoint: Option<String>,
        #[arg(long)]
        activate: bool,
    },

    /// Log in through az / gcloud and record the session
    CliLogin {
        provider: Provider,
        name: String,
        /// az or gcloud; defaults to the provider's tool
        #[arg(long)]
        tool: Option<CliTool>,
        #[arg(long)]
        device_code: bool,
        #[arg(long)]
        username: Option<String>,
        #[arg(long, env = "ACCESSKEEP_CLI_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Service principal application id
        #[arg(long)]
        client_id: Option<String>,
        #[arg(long, env = "ACCESSKEEP_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        key_file: Option<PathBuf>,
        #[arg(long)]
        activate: bool,
    },

    /// Sign in with a device code and store the resulting tokens
    DeviceCode {
        provider: Provider,
        name: String,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        activate: bool,
    },

    /// Redeem the active refresh token for another client application
    Exchange {
        provider: Provider,
        name: String,
        #[arg(long)]
        client_id: String,
        /// Defaults to the provider's configured scope
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        activate: bool,
    },
}

fn default_tool(provider: Provider) -> Result<CliTool, AccessError> {
    match provider {
        Provider::Azure | Provider::Directory => Ok(CliTool::Az),
        Provider::Gcp => Ok(CliTool::Gcloud),
        Provider::Aws => Err(AccessError::credential(
            "aws has no supported CLI login; pass --tool explicitly",
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn cli_login_method(
    device_code: bool,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    tenant: Option<String>,
    key_file: Option<PathBuf>,
) -> Result<CliLogin, AccessError> {
    if let Some(key_file) = key_file {
        return Ok(CliLogin::ServiceAccountKey { key_file });
    }
    if let Some(client_id) = client_id {
        let secret = client_secret
            .ok_or_else(|| AccessError::credential("--client-secret is required with --client-id"))?;
        let tenant =
            tenant.ok_or_else(|| AccessError::credential("--tenant is required with --client-id"))?;
        return Ok(CliLogin::ServicePrincipal {
            client_id,
            secret: SecretString::from(secret),
            tenant,
        });
    }
    if let Some(username) = username {
        let password = password
            .ok_or_else(|| AccessError::credential("--password is required with --username"))?;
        return Ok(CliLogin::UsernamePassword {
            username,
            password: SecretString::from(password),
            tenant,
        });
    }
    Ok(if device_code {
        CliLogin::DeviceCode
    } else {
        CliLogin::Interactive
    })
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .json(),
        )
        .init();

    let cli = Cli::parse();
    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load accesskeep config: {}", cli.config.display()))?;

    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let manager = AccessManager::new(store, config.settings.clone());

    let output = match cli.command {
        Command::Config => app::config_output(&cli.config, &config),
        Command::List { provider } => app::list_credentials(&manager, provider).await,
        Command::Activate { provider, name } => {
            app::activate_credential(&manager, provider, &name).await
        }
        Command::Deactivate { provider } => app::deactivate_credentials(&manager, provider).await,
        Command::DeleteActive { provider } => {
            app::delete_active_credential(&manager, provider).await
        }
        Command::Delete { provider, name } => {
            app::delete_credential(&manager, provider, &name).await
        }
        Command::Current { provider } => app::current_access(&manager, provider).await,
        Command::Decode { token } => app::decode_token(&token),
        Command::AddStaticKey {
            name,
            access_key_id,
            secret_access_key,
            session_token,
            region,
            activate,
        } => {
            let payload = CredentialPayload::StaticKey(StaticKey {
                access_key_id,
                secret_access_key: SecretString::from(secret_access_key),
                session_token: session_token.map(SecretString::from),
                region,
            });
            app::add_credential(&manager, Provider::Aws, &name, payload, activate).await
        }
        Command::AddKeyFile {
            provider,
            name,
            path,
            scopes,
            activate,
        } => app::add_key_file(&manager, provider, &name, &path, scopes, activate).await,
        Command::AddBearer {
            provider,
            name,
            access_token,
            refresh_token,
            client_id,
            scope,
            tenant,
            token_endpoint,
            activate,
        } => {
            let pair = BearerPair {
                access_token: SecretString::from(access_token),
                refresh_token: refresh_token.map(SecretString::from),
                client_id,
                scope,
                tenant,
                token_endpoint,
            };
            let payload = CredentialPayload::BearerPair(pair);
            app::add_credential(&manager, provider, &name, payload, activate).await
        }
        Command::CliLogin {
            provider,
            name,
            tool,
            device_code,
            username,
            password,
            client_id,
            client_secret,
            tenant,
            key_file,
            activate,
        } => {
            let prepared = tool.map_or_else(|| default_tool(provider), Ok).and_then(|tool| {
                cli_login_method(
                    device_code,
                    username,
                    password,
                    client_id,
                    client_secret,
                    tenant,
                    key_file,
                )
                .map(|login| (tool, login))
            });
            match prepared {
                Ok((tool, login)) => {
                    app::cli_login(&manager, provider, &name, tool, &login, activate).await
                }
                Err(e) => app::failure(&e),
            }
        }
        Command::DeviceCode {
            provider,
            name,
            tenant,
            activate,
        } => {
            app::device_code_login(
                &manager,
                provider,
                &name,
                tenant.as_deref(),
                activate,
                |authorization| eprintln!("{}", authorization.instructions()),
                ctrl_c(),
            )
            .await
        }
        Command::Exchange {
            provider,
            name,
            client_id,
            scope,
            activate,
        } => {
            let scope = scope.unwrap_or_else(|| config.settings.scope(provider));
            app::exchange_refresh_token(&manager, provider, &client_id, &scope, &name, activate)
                .await
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(if output["success"] == true {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
