use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;
use tracing_subscriber::EnvFilter;

use recall::config::RecallConfig;
use recall::notes::{JsonNoteStore, Note, NoteStore};
use recall::semantic::{EmbeddingModel, MatchOptions, RecallService};

mod cli;

use cli::{Command, MatchArgs};

pub fn parse_tags(tags: String) -> Vec<String> {
    tags.split(',')
        .map(|value| value.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|value| !value.is_empty())
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
}

fn base_path(data_dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = data_dir {
        return Ok(dir);
    }
    if let Ok(dir) = std::env::var("RECALL_BASE_PATH") {
        return Ok(PathBuf::from(dir));
    }

    let home = my_home()
        .context("Failed to resolve home directory")?
        .context("Home directory is not set")?;
    Ok(home.join(".local/share/recall"))
}

fn match_options(args: MatchArgs) -> MatchOptions {
    MatchOptions {
        threshold: args.threshold,
        max_results: args.limit,
        recency_weight: args.recency_weight,
        topics: args.topics.map(parse_tags).unwrap_or_default(),
    }
}

fn build_service(config: &RecallConfig, base_path: &Path) -> anyhow::Result<RecallService> {
    let store = JsonNoteStore::new(&base_path.join("notes"))?;

    let timeout = Duration::from_secs(config.embedding.download_timeout_secs);
    let model = EmbeddingModel::new(
        &config.embedding.model,
        base_path.to_path_buf(),
        Some(timeout),
    )?;

    if model.dimensions() != config.embedding.dimension {
        bail!(
            "Model '{}' produces {} dimensions but embedding.dimension is {}",
            model.name(),
            model.dimensions(),
            config.embedding.dimension
        );
    }

    Ok(RecallService::new(config, Arc::new(store), Arc::new(model)))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("recall=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let base_path = base_path(args.data_dir)?;
    let config = RecallConfig::load_with(&base_path)?;
    let owner = args.owner;

    match args.command {
        Command::List {} => {
            // listing does not need the model
            let store = JsonNoteStore::new(&base_path.join("notes"))?;
            let notes = store.load_all_for_owner(&owner).await?;
            print_json(&notes)
        }

        Command::Add { text, tags } => {
            let service = build_service(&config, &base_path)?;
            let tags = tags.map(parse_tags).unwrap_or_default();
            let note = Note::new(&owner, &text, tags.into_iter().collect());

            let outcome = service.save_note(&note).await?;
            log::info!("Saved note {}: {:?}", note.id, outcome);
            print_json(&note)
        }

        Command::Remove { id } => {
            let service = build_service(&config, &base_path)?;
            if !service.delete_note(&owner, &id).await? {
                bail!("No note with id {}", id);
            }
            println!("Deleted {}", id);
            Ok(())
        }

        Command::Related { text, match_args } => {
            let service = build_service(&config, &base_path)?;
            service.rebuild(&owner).await?;

            let results = service
                .find_related(&owner, &text, &match_options(match_args))
                .await?;
            print_json(&results)
        }

        Command::Context {
            text,
            page,
            match_args,
        } => {
            let service = build_service(&config, &base_path)?;
            service.rebuild(&owner).await?;

            let payload = service
                .build_context(&owner, &text, page.as_deref(), &match_options(match_args))
                .await?;
            println!("{}", payload.render());
            Ok(())
        }

        Command::Rebuild {} => {
            let service = build_service(&config, &base_path)?;
            let report = service.rebuild(&owner).await?;
            print_json(&report)
        }
    }
}
