use std::path::PathBuf;

use actas_adapters::DocumentTextExtractor;
use actas_ingest::{ActasConfig, CertificateService};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "actas=info";

#[derive(Debug, Parser)]
#[command(name = "actas-cli")]
#[command(about = "Birth-certificate capture and registry")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a QR payload and print the record without saving it
    ParseQr { payload: String },
    /// Parse and save a QR payload, or decode one from an image file
    ScanQr {
        payload: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Run the text extractor over a plain-text dump of a certificate
    ExtractText { path: PathBuf },
    /// Ingest a document and save every certificate found in it
    Ingest { path: PathBuf },
    List,
    Export,
    Clear,
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ActasConfig::from_env();
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::ParseQr { payload } => {
            let service = CertificateService::from_config(&config).await?;
            print_json(&service.parse_qr_text(&payload))?;
        }
        Commands::ScanQr { payload, image } => {
            let service = CertificateService::from_config(&config).await?;
            let outcome = match (payload, image) {
                (Some(payload), None) => service.process_qr_text(&payload).await,
                (None, Some(path)) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    service.process_qr_image(&bytes).await
                }
                _ => bail!("pass either a QR payload or --image <path>"),
            };
            print_json(&outcome)?;
        }
        Commands::ExtractText { path } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let extractor = DocumentTextExtractor::new(config.load_text_rules()?);
            match extractor.extract(&text) {
                Some(record) => print_json(&record)?,
                None => eprintln!("no certificate data found in {}", path.display()),
            }
        }
        Commands::Ingest { path } => {
            let service = CertificateService::from_config(&config).await?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let report = service.process_pdf(&bytes).await;
            print_json(&report)?;
        }
        Commands::List => {
            let service = CertificateService::from_config(&config).await?;
            print_json(&service.list_records().await)?;
        }
        Commands::Export => {
            let service = CertificateService::from_config(&config).await?;
            let (manifest_path, manifest) = service.export_snapshot().await?;
            println!(
                "export complete: records={} manifest={}",
                manifest.record_count,
                manifest_path.display()
            );
        }
        Commands::Clear => {
            let service = CertificateService::from_config(&config).await?;
            let outcome = service.clear().await;
            if !outcome.accepted {
                bail!(outcome.message);
            }
            println!("{}", outcome.message);
        }
    }

    Ok(())
}
