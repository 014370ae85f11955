//! Clone a source website's content into a target website.
//!
//! Usage: provision-tenant --target SUBDOMAIN [--source SUBDOMAIN] [--sections hero,menu]
//!   --source    : Website to copy from (defaults to TEMPLATE_SUBDOMAIN)
//!   --sections  : Sections to enable on the target; without it the source flags are copied
//!
//! Safe to rerun: every step replaces the target's rows.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sitebuilder_api::{
    config::Config,
    db::{self, store::PgStore},
    models::website::Section,
    AppState,
};

#[derive(Parser)]
#[command(name = "provision-tenant", about = "Copy template content into a website")]
struct Args {
    /// Subdomain of the website to fill
    #[arg(long)]
    target: String,

    /// Subdomain of the website to copy from
    #[arg(long)]
    source: Option<String>,

    /// Comma-separated section names to enable
    #[arg(long, value_delimiter = ',')]
    sections: Option<Vec<Section>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    let store = Arc::new(PgStore::new(
        pool,
        Duration::from_secs(config.store_timeout_secs),
    ));
    let state = AppState::new(store, config);

    let target = state
        .provisioner
        .website_id(&args.target)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Unknown target website: {}", args.target))?;

    let source = match &args.source {
        Some(subdomain) => Some(
            state
                .provisioner
                .website_id(subdomain)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Unknown source website: {subdomain}"))?,
        ),
        None => None,
    };

    let sections: Option<BTreeSet<Section>> = args.sections.map(|s| s.into_iter().collect());

    let report = state
        .provisioner
        .provision(target, source, sections.as_ref())
        .await?;

    for (table, count) in &report.rows {
        tracing::info!("{table}: {count} row(s)");
    }
    tracing::info!(
        "Website {} provisioned from {}",
        args.target,
        report.source_website_id
    );

    Ok(())
}
