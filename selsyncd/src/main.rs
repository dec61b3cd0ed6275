use std::sync::Arc;

use anyhow::Context;
use selsync_core::DavClient;
use selsyncd::config::ClientConfig;
use selsyncd::folder::{FolderMan, SyncFolder, SyncScheduleQueue};
use selsyncd::selective::{CheckState, SelectiveSyncSession};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "selsyncd=info,selsync_core=info";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    ShowSettings,
    ListFolders,
    Browse { alias: String, path: String },
    Exclude { alias: String, path: String },
    Include { alias: String, path: String },
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(flag) = args.next() else {
        return Ok(CliMode::ListFolders);
    };
    let mode = match flag.as_str() {
        "--show-settings" => CliMode::ShowSettings,
        "--list-folders" => CliMode::ListFolders,
        "--help" | "-h" => CliMode::Help,
        "--browse" => {
            let alias = args.next().context("--browse needs a folder alias")?;
            let path = args.next().unwrap_or_default();
            CliMode::Browse { alias, path }
        }
        "--exclude" | "--include" => {
            let alias = args
                .next()
                .with_context(|| format!("{flag} needs a folder alias"))?;
            let path = args
                .next()
                .with_context(|| format!("{flag} needs a path"))?;
            if flag == "--exclude" {
                CliMode::Exclude { alias, path }
            } else {
                CliMode::Include { alias, path }
            }
        }
        other => anyhow::bail!("unknown argument: {other}"),
    };
    if let Some(extra) = args.next() {
        anyhow::bail!("unexpected argument: {extra}");
    }
    Ok(mode)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    println!("Usage: selsyncd [--show-settings | --list-folders | --browse ALIAS [PATH]");
    println!("                 | --exclude ALIAS PATH | --include ALIAS PATH]");
    println!("  --show-settings        Print the resolved settings and exit");
    println!("  --list-folders         List configured sync folders and their blacklists");
    println!("  --browse ALIAS [PATH]  List remote subfolders with their selection state");
    println!("  --exclude ALIAS PATH   Stop syncing PATH inside ALIAS");
    println!("  --include ALIAS PATH   Sync PATH inside ALIAS again");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mode = parse_cli_mode(std::env::args())?;
    if mode == CliMode::Help {
        print_usage();
        return Ok(());
    }

    let config = ClientConfig::from_env()?;
    if mode == CliMode::ShowSettings {
        println!("{}", serde_json::to_string_pretty(&config.settings_snapshot())?);
        return Ok(());
    }

    let account = config.account();
    let client = DavClient::from_account(&account).context("failed to build HTTP client")?;
    let mut folders = FolderMan::load(
        &config.folders_path(),
        client.dav_url(),
        &config.journal_dir(),
    )
    .await
    .context("failed to load sync folders")?;
    info!(account = %account.display_name(), folders = folders.folders().len(), "loaded sync folders");

    match mode {
        CliMode::ListFolders => list_folders(&folders),
        CliMode::Browse { alias, path } => {
            let mut session = open_session(client, &config).await;
            let address = session.expand_path(&alias, &path, &folders).await?;
            session.expand(&address, &folders).await?;
            for child in session.tree().children(&address) {
                println!(
                    "[{:>9}] {:<40} {:>12}",
                    child.check_state(),
                    child.path(),
                    child.size_bytes()
                );
            }
        }
        CliMode::Exclude { alias, path } => {
            change_selection(client, &config, &mut folders, &alias, &path, CheckState::Unchecked)
                .await?;
        }
        CliMode::Include { alias, path } => {
            change_selection(client, &config, &mut folders, &alias, &path, CheckState::Checked)
                .await?;
        }
        CliMode::ShowSettings | CliMode::Help => {}
    }
    Ok(())
}

fn list_folders(folders: &FolderMan) {
    if folders.folders().is_empty() {
        println!("no sync folders configured");
        return;
    }
    for folder in folders.folders() {
        let definition = folder.definition();
        let paused = if definition.paused { " (paused)" } else { "" };
        println!(
            "{}{}: {} -> {}",
            definition.alias,
            paused,
            definition.remote_path,
            definition.local_path.display()
        );
        for entry in folder.selective_sync_blacklist() {
            println!("    excluded: {entry}");
        }
    }
}

async fn open_session(client: DavClient, config: &ClientConfig) -> SelectiveSyncSession {
    match client.fetch_status().await {
        Ok(status) => info!(version = %status.versionstring, "connected to server"),
        Err(err) => warn!("server status unavailable: {err}"),
    }
    SelectiveSyncSession::new(Arc::new(client), config.retry_policy())
}

async fn change_selection(
    client: DavClient,
    config: &ClientConfig,
    folders: &mut FolderMan,
    alias: &str,
    path: &str,
    state: CheckState,
) -> anyhow::Result<()> {
    let mut session = open_session(client, config).await;
    let address = session.expand_path(alias, path, &*folders).await?;
    session.expand(&address[..1], &*folders).await?;
    session.toggle(&address, state);

    let (scheduler, mut scheduled) = SyncScheduleQueue::new();
    let changes = session.apply(folders, &scheduler).await;
    if changes.is_empty() {
        println!("selection unchanged");
        return Ok(());
    }
    folders.save().context("failed to save folder definitions")?;
    for change in &changes {
        println!("{}: excluded {:?}", change.alias, change.blacklist);
    }
    while let Ok(alias) = scheduled.try_recv() {
        println!("sync scheduled for {alias}");
    }
    Ok(())
}
