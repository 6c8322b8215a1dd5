//! Audit Chain Verification Tool
//!
//! Offline verification of study audit chains against the application
//! database. Exits non-zero if any chain fails verification.

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::info;

use consent_app::audit::verify::verify_study_chain;
use consent_app::database::queries::Queries;
use consent_app::database::Database;

#[derive(Parser)]
#[command(name = "chain-verify")]
#[command(about = "Verify consent-app audit chain integrity")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database URL
    #[arg(long, default_value = "sqlite://consent.db")]
    database_url: String,

    /// Study slug; verifies every study when omitted
    #[arg(long)]
    study: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let database = Database::new(&cli.database_url).await?;

    let studies = match &cli.study {
        Some(slug) => {
            let study = Queries::get_study_by_slug(database.pool(), slug)
                .await
                .map_err(|e| anyhow!("{}", e))?
                .ok_or_else(|| anyhow!("study '{}' not found", slug))?;
            vec![study]
        }
        None => Queries::get_all_studies(database.pool())
            .await
            .map_err(|e| anyhow!("{}", e))?,
    };

    if studies.is_empty() {
        println!("No studies found");
        return Ok(());
    }

    info!("Verifying {} study chain(s)", studies.len());

    let mut failed = 0;
    for study in &studies {
        let report = verify_study_chain(database.pool(), study.id)
            .await
            .map_err(|e| anyhow!("{}", e))?;

        println!("{}: {}", study.slug, report.summary());

        if cli.verbose {
            if let Some(index) = report.first_invalid {
                println!("  first invalid entry: {}", index);
            }
        }

        if !report.valid {
            failed += 1;
        }
    }

    database.close().await;

    if failed > 0 {
        eprintln!("{} of {} chains failed verification", failed, studies.len());
        std::process::exit(1);
    }

    println!("✓ All chains verified");
    Ok(())
}
