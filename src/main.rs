use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use symptom_match::config::{self, Config};
use symptom_match::reference::ReferenceStore;
use symptom_match::semantic::{
    BuildProgress, DiagnosisService, EmbeddingModel, EmbeddingProvider, IndexCache, IndexOrigin,
};

mod cli;
use cli::{Command, IndexAction};

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Progress bar created on the first build callback, so cache hits stay quiet.
struct BuildBar(Arc<OnceCell<ProgressBar>>);

impl BuildBar {
    fn new() -> Self {
        Self(Arc::new(OnceCell::new()))
    }

    fn callback(&self) -> Arc<BuildProgress> {
        let cell = self.0.clone();
        Arc::new(move |done: usize, total: usize| {
            let bar = cell.get_or_init(|| {
                let bar = ProgressBar::new(total as u64);
                if let Ok(style) =
                    ProgressStyle::with_template("embedding conditions [{bar:40}] {pos}/{len}")
                {
                    bar.set_style(style);
                }
                bar
            });
            bar.set_position(done as u64);
        })
    }

    fn finish(&self) {
        if let Some(bar) = self.0.get() {
            bar.finish_and_clear();
        }
    }
}

fn load_store(config: &Config) -> anyhow::Result<ReferenceStore> {
    let reference_path = config.reference_path();
    ReferenceStore::load(&reference_path, config.precautions_path().as_deref()).with_context(|| {
        format!(
            "failed to load reference database {}",
            reference_path.display()
        )
    })
}

fn open_service(config: &Config) -> anyhow::Result<(DiagnosisService, BuildBar)> {
    let store = Arc::new(load_store(config)?);

    let model = EmbeddingModel::new(&config.model, config.models_dir())
        .with_context(|| format!("failed to load embedding model '{}'", config.model))?;

    let bar = BuildBar::new();
    let service = DiagnosisService::new(store, Arc::new(model), config.cache_dir())
        .with_build_progress(bar.callback());

    Ok((service, bar))
}

/// Delete the cached index. Works without a readable reference database.
fn clear_index(config: &Config) -> anyhow::Result<PathBuf> {
    let cache = IndexCache::new(&config.cache_dir());
    cache
        .delete()
        .with_context(|| format!("failed to remove {}", cache.path().display()))?;
    Ok(cache.path().to_path_buf())
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();

    let base_path = config::base_path()?;
    let config = Config::load_with(&base_path)
        .with_context(|| format!("failed to load config from {}", base_path.display()))?;

    match args.command {
        Command::Conditions {} => {
            let store = load_store(&config)?;
            for name in store.names() {
                println!("{name}");
            }
            Ok(())
        }

        Command::Index {
            action: IndexAction::Clear {},
        } => {
            let path = clear_index(&config)?;
            println!("removed {}", path.display());
            Ok(())
        }

        Command::Index {
            action: IndexAction::Build { force },
        } => {
            let (service, bar) = open_service(&config)?;
            let result = if force {
                service.rebuild().map(|_| IndexOrigin::Built)
            } else {
                service.initialize()
            };
            bar.finish();
            let origin = result?;

            let verb = match origin {
                IndexOrigin::Cache => "loaded",
                IndexOrigin::Built => "built",
            };
            println!(
                "{verb} index of {} conditions at {}",
                service.indexed_count(),
                service.cache_path().display()
            );
            Ok(())
        }

        Command::Index {
            action: IndexAction::Info {},
        } => {
            let (service, bar) = open_service(&config)?;
            let origin = service.initialize();
            bar.finish();
            let origin = origin?;

            let info = json!({
                "conditions": service.indexed_count(),
                "dimensions": service.provider().dimensions(),
                "model": service.provider().name(),
                "cache_path": service.cache_path(),
                "origin": origin,
            });
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }

        Command::Diagnose { symptoms, top_k } => {
            let top_k = top_k.unwrap_or(config.top_k);
            if top_k == 0 {
                bail!("--top-k must be greater than 0");
            }

            let symptoms = cli::parse_symptoms(symptoms);

            let (service, bar) = open_service(&config)?;
            let initialized = service.initialize();
            bar.finish();
            initialized?;

            if top_k == 1 {
                let result = service.best_match(&symptoms)?;
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                let results = service.top_matches(&symptoms, top_k)?;
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
            Ok(())
        }
    }
}
