use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use tracing::info;

use miro_backup::config::{self, Config};
use miro_backup::ledger::Ledger;
use miro_backup::miro::MiroClient;
use miro_backup::pipeline::{self, Pipeline, Selection};

#[derive(Debug, Parser)]
#[command(author, version, about = "Export Miro boards and archive them locally")]
struct Args {
    /// Path to YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Organization Miro id
    #[arg(short = 'i', long)]
    org_id: Option<String>,

    /// Miro app token (falls back to MIRO_TOKEN)
    #[arg(short = 't', long)]
    token: Option<String>,

    /// Board listing begin offset
    #[arg(short = 'o', long)]
    offset: Option<usize>,

    /// Board listing page size (at most 50)
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Id of a board to export; repeat for several (at most 50)
    #[arg(long = "bid", conflicts_with_all = ["resume", "retry_failed"])]
    board_ids: Vec<String>,

    /// Resume the listing after the boards already in the ledger
    #[arg(long)]
    resume: bool,

    /// Re-export boards whose last ledger record is a failure
    #[arg(long, conflicts_with = "resume")]
    retry_failed: bool,

    /// Directory for artifacts and the ledger
    #[arg(long)]
    data_dir: Option<String>,

    /// Record boards of abandoned batches in the ledger
    #[arg(long)]
    record_abandoned: bool,
}

impl Args {
    fn selection(&self) -> Selection {
        if !self.board_ids.is_empty() {
            Selection::Explicit(self.board_ids.clone())
        } else if self.retry_failed {
            Selection::RetryFailed
        } else {
            Selection::Listing {
                resume: self.resume,
            }
        }
    }

    /// Command-line values win over the config file.
    fn apply(&self, cfg: &mut Config) {
        if let Some(org_id) = &self.org_id {
            cfg.miro.org_id = org_id.clone();
        }
        if let Some(token) = &self.token {
            cfg.miro.token = token.clone();
        } else if cfg.miro.token.trim().is_empty() {
            if let Ok(token) = std::env::var("MIRO_TOKEN") {
                cfg.miro.token = token;
            }
        }
        if let Some(offset) = self.offset {
            cfg.app.offset = offset;
        }
        if let Some(limit) = self.limit {
            cfg.app.page_limit = limit;
        }
        if let Some(data_dir) = &self.data_dir {
            cfg.app.data_dir = data_dir.clone();
        }
        if self.record_abandoned {
            cfg.app.record_abandoned = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = match &args.config {
        Some(path) => config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    args.apply(&mut cfg);
    config::validate(&cfg)?;
    cfg.ensure_dirs()?;

    let ledger = Ledger::new(cfg.app.ledger_path());
    let mut source = pipeline::board_source(args.selection(), &cfg, &ledger).await?;

    let base_url = Url::parse(&cfg.miro.base_url).context("invalid miro.base_url")?;
    let client = MiroClient::with_base_url(cfg.miro.token.clone(), base_url)?;

    info!(org_id = %cfg.miro.org_id, data_dir = %cfg.app.data_dir, "starting board export");
    let summary = Pipeline::new(&client, &ledger, &cfg)
        .run(source.as_mut())
        .await?;
    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        abandoned_batches = summary.abandoned_batches,
        "board export finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_bid_selects_explicit_boards() {
        let args = Args::try_parse_from(["miro-backup", "-i", "org", "--bid", "a", "--bid", "b"]).unwrap();
        assert_eq!(args.selection(), Selection::Explicit(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn resume_and_retry_failed_are_exclusive() {
        assert!(Args::try_parse_from(["miro-backup", "--resume", "--retry-failed"]).is_err());
        assert!(Args::try_parse_from(["miro-backup", "--resume", "--bid", "a"]).is_err());
        let args = Args::try_parse_from(["miro-backup", "--resume"]).unwrap();
        assert_eq!(args.selection(), Selection::Listing { resume: true });
    }

    #[test]
    fn cli_overrides_config_values() {
        let args = Args::try_parse_from([
            "miro-backup", "-i", "org-7", "-t", "tok", "-o", "100", "-l", "25", "--data-dir", "/tmp/boards",
        ])
        .unwrap();
        let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        args.apply(&mut cfg);
        assert_eq!(cfg.miro.org_id, "org-7");
        assert_eq!(cfg.miro.token, "tok");
        assert_eq!(cfg.app.offset, 100);
        assert_eq!(cfg.app.page_limit, 25);
        assert_eq!(cfg.app.data_dir, "/tmp/boards");
        assert!(!cfg.app.record_abandoned);
    }
}
