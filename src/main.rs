// src/main.rs

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use mediacat::{Catalog, CatalogConfig, FingerprintOptions, Progress, Scanner, SearchQuery};

const USAGE: &str = "Usage: mediacat [--config FILE] <info|migrate|import [--fingerprint] <dir> [tag...]|hash|search [fragment]|tags>";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let mut config_path = None;
    if args.first().map(String::as_str) == Some("--config") {
        if args.len() < 2 {
            bail!("--config needs a file\n{}", USAGE);
        }
        config_path = Some(PathBuf::from(args.remove(1)));
        args.remove(0);
    }

    let config = CatalogConfig::load(config_path.as_deref()).context("loading configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(command) = args.first().cloned() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let catalog = Catalog::open_with_timeout(&config.database_path, config.busy_timeout())
        .with_context(|| format!("opening catalog {}", config.database_path.display()))?;
    tracing::info!("[Main] Catalog: {}", catalog.path().display());
    if catalog.is_safe_mode() && command != "info" && command != "migrate" {
        eprintln!("Catalog schema is outdated; run `mediacat migrate` first.");
    }

    match command.as_str() {
        "info" => info(&catalog)?,
        "migrate" => {
            let report = catalog.migrate()?;
            for line in &report.log {
                println!("{}", line);
            }
        }
        "import" => {
            let fingerprint = args.get(1).map(String::as_str) == Some("--fingerprint");
            let rest = if fingerprint { &args[2..] } else { &args[1..] };
            let Some(dir) = rest.first() else {
                bail!("import needs a directory\n{}", USAGE);
            };
            import(&catalog, &config, Path::new(dir), &rest[1..], fingerprint).await?;
        }
        "hash" => hash(&catalog, &config).await?,
        "search" => {
            let search = SearchQuery {
                path: args.get(1).cloned(),
                count: -1,
                ..Default::default()
            };
            for file in catalog.search_files(&search)? {
                println!("{}", file);
            }
        }
        "tags" => {
            for (id, tag) in catalog.all_tags()? {
                println!("{:>6}  {}", id, tag);
            }
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}

fn info(catalog: &Catalog) -> Result<()> {
    let meta = catalog.metadata()?;
    println!("Path:     {}", catalog.path().display());
    println!("Version:  {} ({})", meta.version_string(), meta.code_name);
    if catalog.is_safe_mode() {
        println!("Mode:     safe mode (schema is not supported, migrate first)");
        return Ok(());
    }
    println!("Files:    {}", catalog.file_count()?);
    println!("Tags:     {}", catalog.all_tags()?.len());
    for (key, value) in &meta.extensions {
        println!("{:<9} {}", format!("{}:", key), value);
    }
    Ok(())
}

async fn import(
    catalog: &Catalog,
    config: &CatalogConfig,
    dir: &Path,
    tags: &[String],
    fingerprint: bool,
) -> Result<()> {
    let mut records = Scanner::scan_directory(dir, &config.extra_extensions, tags)?;
    if records.is_empty() {
        println!("No media found under {}", dir.display());
        return Ok(());
    }
    let failures = if fingerprint {
        let options = FingerprintOptions { workers: config.fingerprint_workers, ..Default::default() };
        catalog.add_files_with_fingerprints(&mut records, &options).await?
    } else {
        catalog.add_files(&mut records)?
    };
    for failure in &failures {
        eprintln!("skipped {}: {}", failure.path, failure.error);
    }
    println!("Imported {} of {} files", records.len() - failures.len(), records.len());
    Ok(())
}

async fn hash(catalog: &Catalog, config: &CatalogConfig) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let options = FingerprintOptions {
        workers: config.fingerprint_workers,
        progress: Some(tx),
        ..Default::default()
    };

    let cancel = options.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("[Main] Interrupted, finishing files in flight");
            cancel.cancel();
        }
    });
    let reporter = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            match progress {
                Progress::Processed(n) if n % 100 == 0 => tracing::info!("[Main] {} files fingerprinted", n),
                Progress::Processed(_) => {}
                Progress::Finished => break,
            }
        }
    });

    let summary = catalog.refresh_fingerprints(&options).await?;
    drop(options);
    let _ = reporter.await;

    println!(
        "Fingerprinted {} files ({} unreadable, {} not stored)",
        summary.candidates,
        summary.unhashed.len(),
        summary.failures.len()
    );
    for failure in &summary.failures {
        eprintln!("not stored {}: {}", failure.path, failure.error);
    }
    Ok(())
}
