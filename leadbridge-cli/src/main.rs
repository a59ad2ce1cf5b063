//! Leadbridge CLI
//!
//! Command-line interface for linking the contact provider and the CRM, and
//! pushing contacts into the CRM as leads.
//!
//! # Usage
//!
//! ```bash
//! # Log in to the CRM
//! leadbridge login --username ana
//!
//! # Link the contact provider
//! leadbridge connect-contacts
//!
//! # Send every contact to a pipeline stage
//! leadbridge sync --pipeline 7 --status 70
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use leadbridge_core::{
    ClientConfig, ConnectOutcome, CrmCredentials, ProviderId, SyncReport, Workspace,
};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod surface;

use surface::TerminalSurface;

#[derive(Parser)]
#[command(name = "leadbridge")]
#[command(about = "Sync contacts into your CRM as leads")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "LEADBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which providers are connected
    Status {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Log in to the CRM
    Login {
        #[arg(short, long)]
        username: String,

        /// Read from stdin when omitted
        #[arg(short, long, env = "LEADBRIDGE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Link the contact provider through the browser
    ConnectContacts,

    /// Disconnect one provider (contacts or crm)
    Disconnect {
        provider: ProviderId,
    },

    /// Log out of both providers
    Logout,

    /// Manage the contact list
    Contacts {
        #[command(subcommand)]
        command: ContactsCommand,
    },

    /// List CRM pipelines
    Pipelines {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List the stages of a pipeline
    Statuses {
        pipeline: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Create leads from contacts
    Sync {
        #[arg(short, long)]
        pipeline: String,

        #[arg(short, long)]
        status: Option<String>,

        /// Only sync these contact ids (comma-separated); all contacts otherwise
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
enum ContactsCommand {
    /// List remote and imported contacts
    List {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Fetch contacts from the contact provider
    Refresh,

    /// Import phone numbers from a file, one per line
    Import { file: PathBuf },

    /// Remove every imported contact
    ClearImported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct StatusView<'a> {
    contacts_connected: bool,
    crm_connected: bool,
    user: Option<&'a str>,
    last_auth_error: Option<leadbridge_core::ErrorKind>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(if cli.verbose { "debug" } else { &config.log_level });

    let mut workspace = Workspace::open(config).context("Failed to open credential store")?;

    match cli.command {
        Commands::Status { format } => show_status(&workspace, format),
        Commands::Login { username, password } => login(&workspace, username, password).await,
        Commands::ConnectContacts => connect_contacts(&mut workspace).await,
        Commands::Disconnect { provider } => disconnect(&mut workspace, provider).await,
        Commands::Logout => {
            workspace.full_logout().await?;
            println!("Logged out");
            Ok(())
        }
        Commands::Contacts { command } => contacts(&mut workspace, command).await,
        Commands::Pipelines { format } => list_pipelines(&workspace, format).await,
        Commands::Statuses { pipeline, format } => {
            list_statuses(&workspace, &pipeline, format).await
        }
        Commands::Sync {
            pipeline,
            status,
            only,
            format,
        } => sync(&mut workspace, &pipeline, status.as_deref(), &only, format).await,
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match ClientConfig::default_path() {
            Some(path) => path,
            None => return Ok(ClientConfig::default()),
        },
    };
    ClientConfig::load_from_path(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))
}

fn show_status(workspace: &Workspace, format: OutputFormat) -> Result<()> {
    let state = workspace.state();
    let user = workspace.session().current_user()?;

    match format {
        OutputFormat::Json => {
            let view = StatusView {
                contacts_connected: state.contacts_connected,
                crm_connected: state.crm_connected,
                user: user.as_ref().map(|u| u.display_name.as_str()),
                last_auth_error: state.last_auth_error,
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        OutputFormat::Text => {
            println!("Contacts: {}", connected_label(state.contacts_connected));
            match &user {
                Some(user) if state.crm_connected => {
                    println!("CRM:      connected as {}", user.display_name)
                }
                _ => println!("CRM:      {}", connected_label(state.crm_connected)),
            }
            if !state.fully_linked() {
                println!();
                println!("Both providers must be connected before syncing.");
            }
        }
    }
    Ok(())
}

fn connected_label(connected: bool) -> &'static str {
    if connected { "connected" } else { "not connected" }
}

async fn login(workspace: &Workspace, username: String, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => {
            eprint!("Password: ");
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read password")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    let user = workspace
        .connect_crm(&CrmCredentials::new(username, password))
        .await?;
    println!("Logged in as {}", user.display_name);
    Ok(())
}

async fn connect_contacts(workspace: &mut Workspace) -> Result<()> {
    let mut surface = TerminalSurface::new();
    let outcome = workspace.connect_contacts(&mut surface).await?;

    match outcome {
        ConnectOutcome::Connected | ConnectOutcome::ConfirmedAfterClose => {
            println!(
                "Contacts connected, {} loaded",
                workspace.contacts().remote().len()
            );
            Ok(())
        }
        ConnectOutcome::Cancelled => bail!("Contact provider login was not completed"),
        ConnectOutcome::TimedOut => bail!("Timed out waiting for the contact provider login"),
    }
}

async fn disconnect(workspace: &mut Workspace, provider: ProviderId) -> Result<()> {
    match provider {
        ProviderId::Contacts => workspace.disconnect_contacts().await?,
        ProviderId::Crm => workspace.disconnect_crm().await?,
    }
    println!("Disconnected {}", provider);
    Ok(())
}

/// Load remote contacts if the contact provider is linked. Remote contacts
/// are not kept between runs.
async fn load_remote_contacts(workspace: &mut Workspace) -> Result<()> {
    if !workspace.state().contacts_connected {
        debug!("Contact provider not connected, skipping remote contacts");
        return Ok(());
    }
    workspace.refresh_contacts().await.map_err(|e| {
        if e.requires_contacts_reconnect() {
            anyhow::anyhow!("{}\nReconnect your contacts with `leadbridge connect-contacts`.", e)
        } else {
            e.into()
        }
    })?;
    Ok(())
}

async fn contacts(workspace: &mut Workspace, command: ContactsCommand) -> Result<()> {
    match command {
        ContactsCommand::List { format } => {
            if let Err(e) = load_remote_contacts(workspace).await {
                warn!("Showing imported contacts only: {}", e);
            }
            let contacts: Vec<_> = workspace.contacts().contacts().collect();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&contacts)?),
                OutputFormat::Text => {
                    if contacts.is_empty() {
                        println!("No contacts");
                    }
                    for contact in contacts {
                        println!("{:<48} {:<24} {}", contact.id, contact.name, contact.phone);
                    }
                }
            }
        }
        ContactsCommand::Refresh => {
            if !workspace.state().contacts_connected {
                bail!("Contacts are not connected; run `leadbridge connect-contacts` first");
            }
            load_remote_contacts(workspace).await?;
            println!("Loaded {} contacts", workspace.contacts().remote().len());
        }
        ContactsCommand::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let added = workspace.contacts_mut().import_from_lines(text.lines())?;
            println!("Imported {} contacts", added.len());
        }
        ContactsCommand::ClearImported => {
            workspace.contacts_mut().clear_imported()?;
            println!("Imported contacts cleared");
        }
    }
    Ok(())
}

async fn list_pipelines(workspace: &Workspace, format: OutputFormat) -> Result<()> {
    let pipelines = workspace.list_pipelines().await.map_err(crm_hint)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&pipelines)?),
        OutputFormat::Text => {
            for pipeline in pipelines {
                println!("{:<12} {}", pipeline.id, pipeline.name);
            }
        }
    }
    Ok(())
}

async fn list_statuses(workspace: &Workspace, pipeline: &str, format: OutputFormat) -> Result<()> {
    let statuses = workspace.list_statuses(pipeline).await.map_err(crm_hint)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
        OutputFormat::Text => {
            for status in statuses {
                println!("{:<12} {}", status.id, status.name);
            }
        }
    }
    Ok(())
}

async fn sync(
    workspace: &mut Workspace,
    pipeline: &str,
    status: Option<&str>,
    only: &[String],
    format: OutputFormat,
) -> Result<()> {
    load_remote_contacts(workspace).await?;

    for id in only {
        if !workspace.contacts_mut().select(id) {
            warn!("Ignoring unknown contact id {}", id);
        }
    }

    let report = workspace.sync(pipeline, status).await.map_err(crm_hint)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    if report.failed() > 0 {
        bail!("{} of {} contacts failed", report.failed(), report.ledger().len());
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    for entry in report.ledger() {
        if entry.success {
            println!(
                "ok    {:<24} contact {} lead {}",
                entry.name,
                entry.crm_contact_id.as_deref().unwrap_or("-"),
                entry.lead_id.as_deref().unwrap_or("-")
            );
        } else {
            println!(
                "error {:<24} {}",
                entry.name,
                entry.error_detail.as_deref().unwrap_or_default()
            );
        }
    }
    println!();
    println!(
        "{} succeeded, {} failed ({}/{} processed, {:.0}%)",
        report.successful(),
        report.failed(),
        report.progress.processed,
        report.progress.total,
        report.progress.percent()
    );
}

/// Point the user at `login` when the CRM session is gone.
fn crm_hint(e: leadbridge_core::LeadbridgeError) -> anyhow::Error {
    if e.requires_crm_login() {
        anyhow::anyhow!("{}\nLog in again with `leadbridge login`.", e)
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_with_selection() {
        let cli = Cli::try_parse_from([
            "leadbridge", "sync", "--pipeline", "7", "--only", "a,b", "--format", "json",
        ])
        .unwrap();
        match cli.command {
            Commands::Sync {
                pipeline,
                status,
                only,
                format,
            } => {
                assert_eq!(pipeline, "7");
                assert_eq!(status, None);
                assert_eq!(only, vec!["a", "b"]);
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected sync command"),
        }
    }

    #[test]
    fn test_parse_disconnect_provider() {
        let cli = Cli::try_parse_from(["leadbridge", "disconnect", "crm"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Disconnect {
                provider: ProviderId::Crm
            }
        ));
        assert!(Cli::try_parse_from(["leadbridge", "disconnect", "nope"]).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "base_url = \"https://sync.example.com\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.base_url, "https://sync.example.com");

        std::fs::write(&path, "base_url = 3").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
