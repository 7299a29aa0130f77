//! HubNote - storage and access-control administration
//!
//! Main entry point for the hubnote CLI.

use clap::{Parser, Subcommand};
use dialoguer::{theme::ColorfulTheme, Confirm};
use hubnote::access::{parse_repo_ref, AccessControl, Identity};
use hubnote::config::{resolve_backend, validate_config, AppConfig};
use hubnote::storage::{BackendKind, RepoMutation, RepositoryRecord, StorageManager};
use std::path::PathBuf;
use std::process;

/// HubNote - manage stored documents and user access
#[derive(Parser, Debug)]
#[command(name = "hubnote")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/hubnote/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the storage backend (memory, file, kv, blob)
    #[arg(short, long)]
    storage: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the user whitelist
    #[command(subcommand)]
    Whitelist(WhitelistCommands),

    /// Manage the repository catalogue
    #[command(subcommand)]
    Repos(ReposCommands),

    /// Show login statistics
    Stats,

    /// Issue or inspect session tokens
    #[command(subcommand)]
    Token(TokenCommands),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum WhitelistCommands {
    /// Show allowed users and admins
    Show,

    /// Allow a user
    Add {
        /// Tracker login
        username: String,

        /// Also grant admin
        #[arg(long)]
        admin: bool,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove a user (and their admin grant)
    Remove {
        username: String,

        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ReposCommands {
    /// List repositories
    List {
        /// Only repositories visible to this user
        #[arg(short, long)]
        user: Option<String>,

        /// Treat --user as an admin
        #[arg(long)]
        admin: bool,
    },

    /// Register a repository (owner/name or URL)
    Add {
        repo: String,

        /// User to record as the registrant
        #[arg(long)]
        by: Option<String>,
    },

    /// Remove a repository by full name
    Remove { full_name: String },
}

#[derive(Subcommand, Debug)]
enum TokenCommands {
    /// Issue a session token for a user
    Issue { username: String },

    /// Verify a session token and print its identity
    Verify { token: String },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show the resolved backend and any warnings
    Check,
}

#[tokio::main]
async fn main() {
    if let Err(e) = hubnote::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> hubnote::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_env(Some(config_path.as_path()))?;
    if let Some(kind) = cli.storage {
        config.storage.backend = kind;
    }

    if let Commands::Config(ConfigCommands::Check) = cli.command {
        return handle_config_check(&config);
    }

    let storage = StorageManager::from_config(&config.storage);
    let access = AccessControl::from_config(&config, storage);

    match cli.command {
        Commands::Whitelist(cmd) => handle_whitelist_command(&access, cmd).await,
        Commands::Repos(cmd) => handle_repos_command(access.storage(), cmd).await,
        Commands::Stats => handle_stats(access.storage()).await,
        Commands::Token(cmd) => handle_token_command(&access, cmd),
        Commands::Config(_) => Ok(()),
    }
}

fn confirm(prompt: &str, yes: bool) -> bool {
    if yes {
        return true;
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

async fn handle_whitelist_command(
    access: &AccessControl,
    cmd: WhitelistCommands,
) -> hubnote::Result<()> {
    match cmd {
        WhitelistCommands::Show => {
            let whitelist = access.storage().try_get_user_whitelist().await?;
            if whitelist.is_open() {
                println!("Whitelist is empty: every authenticated user is allowed.");
            } else {
                println!("Allowed users ({}):", whitelist.allowed_users.len());
                for user in &whitelist.allowed_users {
                    let marker = if whitelist.is_admin(user) { " (admin)" } else { "" };
                    println!("  {}{}", user, marker);
                }
            }
            let orphans: Vec<_> = whitelist
                .admin_users
                .iter()
                .filter(|u| !whitelist.is_allowed(u))
                .collect();
            if !orphans.is_empty() {
                println!();
                println!("Admins not on the allow-list:");
                for user in orphans {
                    println!("  {}", user);
                }
            }
        }

        WhitelistCommands::Add {
            username,
            admin,
            yes,
        } => {
            let whitelist = access.storage().try_get_user_whitelist().await?;
            if whitelist.is_open() {
                println!("The whitelist is empty; adding {} turns access control on.", username);
            }
            let role = if admin { "admin" } else { "user" };
            if !confirm(&format!("Add {} as {}?", username, role), yes) {
                println!("Cancelled");
                return Ok(());
            }
            if !access.add_user_to_whitelist(&username, admin).await {
                return Err(hubnote::HubNoteError::Storage(format!(
                    "Failed to add {} to the whitelist",
                    username
                )));
            }
            println!("Added {} as {}", username, role);
        }

        WhitelistCommands::Remove { username, yes } => {
            if !confirm(&format!("Remove {} from the whitelist?", username), yes) {
                println!("Cancelled");
                return Ok(());
            }
            if !access.remove_user_from_whitelist(&username).await {
                return Err(hubnote::HubNoteError::Storage(format!(
                    "Failed to remove {} from the whitelist",
                    username
                )));
            }
            println!("Removed {}", username);
        }
    }
    Ok(())
}

async fn handle_repos_command(storage: &StorageManager, cmd: ReposCommands) -> hubnote::Result<()> {
    match cmd {
        ReposCommands::List { user, admin } => {
            let repos = match user.as_deref() {
                Some(user) => storage.get_user_repos(user, admin).await,
                None => storage.try_get_repos(true).await?,
            };
            println!("Repositories: {}", repos.repositories.len());
            for repo in &repos.repositories {
                let added_by = repo.added_by.as_deref().unwrap_or("-");
                println!("  {:<40} added by {}", repo.full_name, added_by);
            }
        }

        ReposCommands::Add { repo, by } => {
            let full_name = parse_repo_ref(&repo)?;
            let outcome = storage
                .add_repository(RepositoryRecord::new(full_name.clone()), by.as_deref())
                .await;
            report_mutation(&full_name, outcome)?;
        }

        ReposCommands::Remove { full_name } => {
            let outcome = storage.remove_repository(&full_name).await;
            report_mutation(&full_name, outcome)?;
        }
    }
    Ok(())
}

fn report_mutation(full_name: &str, outcome: RepoMutation) -> hubnote::Result<()> {
    match outcome {
        RepoMutation::Added
        | RepoMutation::Removed
        | RepoMutation::AlreadyExists
        | RepoMutation::NotFound => {
            println!("{}: {}", outcome.message(), full_name);
            Ok(())
        }
        RepoMutation::Unavailable | RepoMutation::SaveFailed => Err(
            hubnote::HubNoteError::Storage(format!("{}: {}", outcome.message(), full_name)),
        ),
    }
}

async fn handle_stats(storage: &StorageManager) -> hubnote::Result<()> {
    let stats = storage.try_get_user_stats().await?;
    println!("Login statistics:");
    println!();
    println!("  Total logins:     {}", stats.total_logins);
    println!("  Distinct users:   {}", stats.user_stats.len());

    if !stats.user_stats.is_empty() {
        println!();
        println!("Users:");
        for (user, record) in &stats.user_stats {
            println!(
                "  {:<20} {} logins, last {}",
                user,
                record.login_count,
                record.last_login.as_deref().unwrap_or("-")
            );
        }
    }

    if !stats.daily_stats.is_empty() {
        println!();
        println!("Recent days:");
        for (day, daily) in stats.daily_stats.iter().rev().take(7) {
            println!("  {}  {}", day, daily.logins);
        }
    }
    Ok(())
}

fn handle_token_command(access: &AccessControl, cmd: TokenCommands) -> hubnote::Result<()> {
    match cmd {
        TokenCommands::Issue { username } => {
            let token = access.issue_token(&Identity::new(username))?;
            println!("{}", token);
        }
        TokenCommands::Verify { token } => match access.verify_token(&token) {
            Some(identity) => {
                println!("Valid token for {}", identity.username);
                if let Some(avatar) = identity.avatar_url {
                    println!("  avatar: {}", avatar);
                }
            }
            None => {
                return Err(hubnote::HubNoteError::Auth(
                    "Token is invalid or expired".to_string(),
                ))
            }
        },
    }
    Ok(())
}

fn handle_config_check(config: &AppConfig) -> hubnote::Result<()> {
    let (kind, _) = resolve_backend(&config.storage);
    println!("Requested backend: {}", config.storage.backend);
    println!("Resolved backend:  {}", kind);
    if kind == BackendKind::File {
        println!("Data directory:    {}", config.storage.data_dir.display());
    }
    println!("Tracker API:       {}", config.collaborator.api_url);

    let warnings = validate_config(config);
    if warnings.is_empty() {
        println!();
        println!("No problems found.");
    } else {
        println!();
        for warning in &warnings {
            println!("  ⚠️  {}", warning);
        }
    }
    Ok(())
}
