use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cloudmirror_core::{ListingPage, RemoteListingEntry};
use cloudmirrord::config::MirrorConfig;
use cloudmirrord::store::MetadataStore;
use cloudmirrord::sync::engine::MirrorEngine;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ApplyArgs {
    account: String,
    server_path: String,
    listing: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Apply(ApplyArgs),
    Help,
}

/// A listing file holds either one page as returned by the listing client
/// or a bare array of entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingFile {
    Page(ListingPage),
    Entries(Vec<RemoteListingEntry>),
}

impl ListingFile {
    fn into_entries(self) -> Vec<RemoteListingEntry> {
        match self {
            ListingFile::Page(page) => page.items,
            ListingFile::Entries(entries) => entries,
        }
    }
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut account = None;
    let mut server_path = None;
    let mut listing = None;
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliMode::Help),
            "--account" => account = Some(next_value(&mut args, "--account")?),
            "--path" => server_path = Some(next_value(&mut args, "--path")?),
            "--listing" => listing = Some(PathBuf::from(next_value(&mut args, "--listing")?)),
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(CliMode::Apply(ApplyArgs {
        account: account.context("--account is required")?,
        server_path: server_path.context("--path is required")?,
        listing: listing.context("--listing is required")?,
    }))
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> anyhow::Result<String> {
    args.next()
        .with_context(|| format!("{flag} expects a value"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("Usage: cloudmirrord --account <id> --path <server path> --listing <file.json>");
            println!("  Applies one directory listing to the local metadata store.");
            println!("  CLOUDMIRROR_DB, CLOUDMIRROR_MAX_CONNECTIONS and CLOUDMIRROR_LOG configure it.");
            return Ok(());
        }
        CliMode::Apply(args) => args,
    };

    let config = MirrorConfig::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).context("invalid CLOUDMIRROR_LOG")?)
        .init();

    let raw = tokio::fs::read_to_string(&args.listing)
        .await
        .with_context(|| format!("failed to read listing at {:?}", args.listing))?;
    let entries = serde_json::from_str::<ListingFile>(&raw)
        .with_context(|| format!("failed to decode listing at {:?}", args.listing))?
        .into_entries();

    let store = MetadataStore::open_with(&config.db_path, config.max_connections)
        .await
        .with_context(|| format!("failed to open metadata store at {:?}", config.db_path))?;
    let mut events = store.subscribe();
    let engine = MirrorEngine::new(Arc::new(store));

    let outcome = engine
        .apply_listing(&args.account, &args.server_path, &entries)
        .await?;
    while let Ok(event) = events.try_recv() {
        info!(kind = ?event.kind, record = ?event.record, id = %event.id, path = %event.path, "changed");
    }
    info!(
        account = %args.account,
        server_path = %args.server_path,
        adapted = outcome.adapted,
        skipped = outcome.skipped,
        changed = outcome.items.changed,
        unmatched = outcome.items.unmatched,
        removed = outcome.items.removed,
        "listing applied"
    );
    Ok(())
}
