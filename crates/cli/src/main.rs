//! adsync command-line management tool.
//!
//! Provides subcommands for generating and validating configuration files,
//! inspecting run history and the audit log, looking at a single local
//! account, and triggering a synchronization pass by hand.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use adsync_core::config::AppConfig;
use adsync_core::db::Database;
use adsync_core::models::SyncDirection;
use adsync_core::store::{meta, LocalAccountStore};
use adsync_core::sync::journal::last_run_key;
use adsync_core::{
    ConfigurationProvider, DirectoryToLocalSync, IdentityResolver, LdapDirectoryClient,
    LocalToDirectorySync, SyncRunStats,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// adsync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "adsync",
    version,
    about = "Manage and inspect Active Directory <-> local account synchronization"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "/etc/adsync/config.toml")]
    config: PathBuf,

    /// Log level (overrides RUST_LOG).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./adsync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show the last runs of both passes.
    Status {
        /// Number of runs to show.
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Only show entries with this action (e.g. `record_sync_failed`).
        #[arg(long)]
        action: Option<String>,
    },

    /// Run a synchronization pass now.
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },

    /// Inspect local accounts.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
}

#[derive(Subcommand, Debug)]
enum SyncAction {
    /// Directory -> local for every member of the security groups.
    ToLocal {
        /// Print the run statistics as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Local -> directory for every linked account.
    ToDirectory {
        /// Print the run statistics as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Directory -> local for one principal.
    User {
        /// sAMAccountName, `DOMAIN\name` or userPrincipalName.
        principal: String,
    },
}

#[derive(Subcommand, Debug)]
enum AccountAction {
    /// Show a local account with its directory link and attributes.
    Show {
        /// Login name, or any principal form of the linked directory account.
        login: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Status { limit } => {
            let (_, db) = open_workspace(&cli.config)?;
            cmd_status(&db, limit)
        }
        Commands::Audit { limit, action } => {
            let (_, db) = open_workspace(&cli.config)?;
            cmd_audit(&db, action.as_deref(), limit)
        }
        Commands::Sync { action } => {
            let (config, db) = open_workspace(&cli.config)?;
            cmd_sync(&db, &config, action)
        }
        Commands::Account { action } => {
            let (_, db) = open_workspace(&cli.config)?;
            cmd_account(&db, action)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn open_workspace(path: &Path) -> Result<(AppConfig, Database)> {
    debug!(config = %path.display(), "loading configuration");
    let config = load_config(path)?;
    let db = open_database(&config)?;
    Ok((config, db))
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::new(config.daemon.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# adsync configuration
# Passwords are never stored here: *_password_env names an environment variable.

[daemon]
poll_interval_secs = 3600
log_level = "info"
data_dir = "/var/lib/adsync"

[directory]
url = "ldaps://dc01.corp.example.com"
base_dn = "DC=corp,DC=example,DC=com"
account_suffix = "@corp.example.com"
# domain_sid = "S-1-5-21-1004336348-1177238915-682003330"
connect_timeout_secs = 10

[sync_to_local]
enabled = true
service_account = "svc-adsync"
service_password_env = "ADSYNC_SYNC_PASSWORD"
security_groups = ["Staff"]
import_disabled_users = false
use_sam_account_name_for_new_users = false
auto_update_description = true
auto_update_password = false
default_email_domain = "corp.example.com"
duplicate_email_policy = "prevent"
clean_existing_roles = false
default_role = "subscriber"
allow_smartcard_users = false

[sync_to_directory]
enabled = false
service_account = "svc-adsync-write"
service_password_env = "ADSYNC_WRITE_PASSWORD"

[roles]
equivalences = ["Domain Admins=administrator", "Staff=author"]

[[attributes]]
directory_key = "department"
type = "string"
local_key = "department"

[[attributes]]
directory_key = "telephoneNumber"
type = "string"
local_key = "phone"
sync_to_directory = true
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your directory details");
    println!("  2. Set the referenced environment variables (ADSYNC_SYNC_PASSWORD, ...)");
    println!("  3. Validate with: adsync validate --config {}", output.display());
    println!("  4. Start the daemon: adsync-daemon --config {}", output.display());

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    let set = |value: &Option<String>| if value.is_some() { "set" } else { "NOT SET" };
    let local = &config.sync_to_local;
    let remote = &config.sync_to_directory;

    println!();
    println!("Configuration summary:");
    println!("  Directory URL     : {}", config.directory.url);
    println!("  Base DN           : {}", config.directory.base_dn);
    println!(
        "  Domain SID        : {}",
        config.directory.domain_sid.as_deref().unwrap_or("not checked")
    );
    println!("  To local          : {}", if local.enabled { "enabled" } else { "disabled" });
    if local.enabled {
        println!("    Service account : {}", local.service_account);
        println!("    Password        : {}", set(&local.service_password));
        println!("    Groups          : {}", local.security_groups.join(", "));
        println!("    Email policy    : {:?}", local.duplicate_email_policy);
    }
    println!("  To directory      : {}", if remote.enabled { "enabled" } else { "disabled" });
    if remote.enabled {
        println!("    Service account : {}", remote.service_account);
        println!("    Password        : {}", set(&remote.service_password));
        println!(
            "    Written back    : {} attribute(s)",
            config.attribute_whitelist().writable_entries().count()
        );
    }
    println!("  Role equivalences : {}", config.roles.equivalences.len());
    println!("  Attributes        : {}", config.attributes.len());
    println!("  Poll interval     : {}s", config.daemon.poll_interval_secs);
    println!("  Data directory    : {}", config.daemon.data_dir.display());
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_status(db: &Database, limit: u32) -> Result<()> {
    let last_local = db
        .get_state(last_run_key(SyncDirection::DirectoryToLocal))
        .context("failed to read last directory -> local run")?;
    let last_directory = db
        .get_state(last_run_key(SyncDirection::LocalToDirectory))
        .context("failed to read last local -> directory run")?;
    let accounts = db.count_accounts().context("failed to count accounts")?;
    let linked = db
        .known_directory_accounts()
        .context("failed to list linked accounts")?
        .len();
    let failures = db.count_failures().context("failed to count failures")?;

    println!("adsync status");
    println!("=============");
    println!();
    println!(
        "  Last to-local success     : {}",
        last_local.as_deref().unwrap_or("never")
    );
    println!(
        "  Last to-directory success : {}",
        last_directory.as_deref().unwrap_or("never")
    );
    println!("  Local accounts            : {}", accounts);
    println!("  Linked to directory       : {}", linked);
    println!("  Recorded failures         : {}", failures);

    let runs = db.list_sync_runs(None, limit).context("failed to list sync runs")?;
    if runs.is_empty() {
        println!();
        println!("No runs recorded yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        "Started", "Direction", "Status", "Created", "Updated", "Skipped", "Failed", "Elapsed",
    ]);
    for run in &runs {
        table.add_row(vec![
            run.started_at.clone(),
            run.direction.clone(),
            run.status.clone(),
            run.created.to_string(),
            run.updated.to_string(),
            run.skipped.to_string(),
            run.failed.to_string(),
            format!("{:.1}s", run.elapsed_ms as f64 / 1000.0),
        ]);
    }
    println!();
    println!("{table}");

    Ok(())
}

fn cmd_audit(db: &Database, action: Option<&str>, limit: u32) -> Result<()> {
    let entries = db
        .list_audit_log(action, limit)
        .context("failed to list audit entries")?;

    if entries.is_empty() {
        println!("No audit log entries found.");
        return Ok(());
    }

    println!("{:<26} {:<22} {:<20} DETAILS", "TIMESTAMP", "ACTION", "PRINCIPAL");
    println!("{}", "-".repeat(100));

    for entry in &entries {
        let marker = if entry.success { "" } else { "[FAIL] " };
        println!(
            "{:<26} {:<22} {:<20} {}{}",
            truncate(&entry.created_at, 25),
            entry.action,
            entry.principal.as_deref().unwrap_or("-"),
            marker,
            truncate(entry.details.as_deref().unwrap_or(""), 50),
        );
    }

    println!();
    println!("{} entries shown", entries.len());

    Ok(())
}

fn cmd_sync(db: &Database, config: &AppConfig, action: SyncAction) -> Result<()> {
    let mut directory = LdapDirectoryClient::new(&config.directory);

    match action {
        SyncAction::ToLocal { json } => {
            let stats = DirectoryToLocalSync::new(&mut directory, db, config)
                .with_journal(db)
                .synchronize()
                .context("directory -> local synchronization failed")?;
            print_stats(&stats, json)
        }
        SyncAction::ToDirectory { json } => {
            let stats = LocalToDirectorySync::new(&mut directory, db, config)
                .with_journal(db)
                .synchronize()
                .context("local -> directory synchronization failed")?;
            print_stats(&stats, json)
        }
        SyncAction::User { principal } => {
            let account = DirectoryToLocalSync::new(&mut directory, db, config)
                .synchronize_principal(&principal)
                .with_context(|| format!("failed to synchronize '{principal}'"))?;
            println!(
                "Synchronized {} -> local account '{}' (id {})",
                principal,
                account.login_name,
                account
                    .id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            Ok(())
        }
    }
}

fn print_stats(stats: &SyncRunStats, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(stats).context("failed to encode statistics")?;
        println!("{out}");
        return Ok(());
    }

    println!("Run {} ({}) completed:", stats.run_id, stats.direction);
    println!("  Created : {}", stats.created);
    println!("  Updated : {}", stats.updated);
    println!("  Skipped : {}", stats.skipped);
    println!("  Failed  : {}", stats.failed);
    println!("  Elapsed : {:.1}s", stats.elapsed().as_secs_f64());
    if stats.failed > 0 {
        println!();
        println!("See `adsync audit --action record_sync_failed` for the failed records.");
    }
    Ok(())
}

fn cmd_account(db: &Database, action: AccountAction) -> Result<()> {
    match action {
        AccountAction::Show { login } => {
            let account = match db.find_by_login_name(&login).context("database error")? {
                Some(account) => account,
                None => IdentityResolver::new(db)
                    .resolve_principal(&login)
                    .context("database error")?
                    .ok_or_else(|| anyhow::anyhow!("account '{}' not found", login))?,
            };
            let id = account
                .id
                .ok_or_else(|| anyhow::anyhow!("account '{}' has no id", login))?;

            let meta_value = |key: &str| -> Result<String> {
                Ok(db
                    .get_meta(id, key)
                    .context("failed to read account meta")?
                    .unwrap_or_else(|| "-".to_string()))
            };
            let roles = db.get_roles(id).context("failed to read roles")?;
            let disabled = meta_value(meta::USER_DISABLED)? == "1";

            println!("Account: {}", account.login_name);
            println!("========={}", "=".repeat(account.login_name.len()));
            println!();
            println!("  Id             : {}", id);
            println!("  Email          : {}", or_dash(&account.email));
            println!("  Display name   : {}", or_dash(&account.display_name));
            println!("  First name     : {}", or_dash(&account.first_name));
            println!("  Last name      : {}", or_dash(&account.last_name));
            println!("  Description    : {}", or_dash(&account.description));
            println!(
                "  Roles          : {}",
                if roles.is_empty() { "-".to_string() } else { roles.join(", ") }
            );
            println!();
            println!("  sAMAccountName : {}", meta_value(meta::SAM_ACCOUNT_NAME)?);
            println!("  UPN            : {}", meta_value(meta::USER_PRINCIPAL_NAME)?);
            println!("  objectGUID     : {}", meta_value(meta::OBJECT_GUID)?);
            println!("  Domain SID     : {}", meta_value(meta::DOMAIN_SID)?);
            println!("  Last synced    : {}", meta_value(meta::LAST_SYNCHRONIZED)?);
            println!("  Disabled       : {}", if disabled { "yes" } else { "no" });
            if disabled {
                println!("  Reason         : {}", meta_value(meta::USER_DISABLED_REASON)?);
            }

            if !account.raw_attributes.is_empty() {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL);
                table.set_content_arrangement(ContentArrangement::Dynamic);
                table.set_header(vec!["Attribute", "Value"]);
                for (key, value) in &account.raw_attributes {
                    table.add_row(vec![key.clone(), value.to_meta_string()]);
                }
                println!();
                println!("{table}");
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer string", 10), "a much ...");
    }

    #[test]
    fn test_cli_parses_sync_user() {
        let cli = Cli::try_parse_from(["adsync", "sync", "user", "CORP\\jdoe"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sync { action: SyncAction::User { ref principal } } if principal == "CORP\\jdoe"
        ));
        assert_eq!(cli.config, PathBuf::from("/etc/adsync/config.toml"));
    }

    #[test]
    fn test_init_writes_valid_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("adsync.toml");
        cmd_init(&path).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        config.validate().unwrap();
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn test_store_commands_open_config_and_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("adsync.toml");
        cmd_init(&path).unwrap();
        let data_dir = tmp.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let text = std::fs::read_to_string(&path).unwrap().replace(
            "data_dir = \"/var/lib/adsync\"",
            &format!("data_dir = \"{}\"", data_dir.display()),
        );
        std::fs::write(&path, text).unwrap();
        let config = path.to_str().unwrap();

        run(Cli::try_parse_from(["adsync", "--config", config, "status"]).unwrap()).unwrap();
        run(Cli::try_parse_from(["adsync", "--config", config, "audit", "--limit", "5"]).unwrap())
            .unwrap();
        assert!(data_dir.join("adsync.db").exists());

        let missing = tmp.path().join("missing.toml");
        let missing = missing.to_str().unwrap();
        assert!(run(Cli::try_parse_from(["adsync", "--config", missing, "status"]).unwrap()).is_err());
    }
}
