use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli::input::PatientArgs;
use cli::output;
use medirisk_core::config::{self, AppConfig};
use medirisk_core::pipeline::{self, RunOptions};
use medirisk_core::training;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Assess {
            patient,
            model,
            report,
            no_store,
            json,
        } => run_assess(cfg, patient, model, report, no_store, json).await,
        Commands::Models { json } => run_models(cfg, json),
        Commands::Train {
            data,
            out,
            seed,
            test_fraction,
            json,
        } => run_train(cfg, data, out, seed, test_fraction, json),
        Commands::History {
            limit,
            category,
            json,
        } => run_history(cfg, limit, category, json).await,
        Commands::Report { id, latest, json } => run_report(cfg, id, latest, json).await,
        Commands::Knowledge { action } => match action {
            KnowledgeCommand::Index => {
                let n = pipeline::index_knowledge(&cfg).await?;
                println!("indexed {n} passage(s) into {}", cfg.vectors.collection);
                Ok(())
            }
            KnowledgeCommand::Search { query, top_k, json } => {
                let refs = pipeline::search_knowledge(&cfg, &query, top_k).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&refs)?);
                } else {
                    print!("{}", output::format_references(&refs));
                }
                Ok(())
            }
        },
    }
}

#[derive(Parser)]
#[command(name = "medirisk")]
#[command(about = "Heart disease risk assessment with agent-written reports", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one patient
    Assess {
        #[command(flatten)]
        patient: PatientArgs,
        /// Model to use (defaults to models.default)
        #[arg(short, long)]
        model: Option<String>,
        /// Also generate a report
        #[arg(long, default_value_t = false)]
        report: bool,
        /// Do not record the assessment in the database
        #[arg(long, default_value_t = false)]
        no_store: bool,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// List loaded models with metrics and feature importance
    Models {
        #[arg(long)]
        json: bool,
    },
    /// Train all models from a Cleveland-format CSV
    Train {
        /// CSV with the 13 feature columns followed by the target
        #[arg(long)]
        data: PathBuf,
        /// Output directory for model artifacts (defaults to models.dir)
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        test_fraction: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Show recorded assessments, newest first
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
        /// LOW, MODERATE or HIGH
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a report for a recorded assessment
    Report {
        id: i64,
        /// Print the last stored report instead of generating a new one
        #[arg(long)]
        latest: bool,
        #[arg(long)]
        json: bool,
    },
    /// Manage the clinical knowledge base
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeCommand,
    },
}

#[derive(Subcommand)]
enum KnowledgeCommand {
    /// Embed the knowledge base into the vector store
    Index,
    /// Search the knowledge base
    Search {
        query: String,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

async fn run_assess(
    cfg: AppConfig,
    patient: PatientArgs,
    model: Option<String>,
    report: bool,
    no_store: bool,
    json: bool,
) -> Result<()> {
    let input = patient.to_input()?;
    let opts = RunOptions {
        store: !no_store,
        report,
    };
    let outcome = pipeline::run_assessment(&cfg, &input, model.as_deref(), opts).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", output::format_outcome(&outcome));
    }
    Ok(())
}

fn run_models(cfg: AppConfig, json: bool) -> Result<()> {
    let registry = pipeline::load_models(&cfg);
    if json {
        let models: Vec<_> = registry
            .iter()
            .map(|(name, artifact)| {
                serde_json::json!({
                    "name": name,
                    "type": artifact.kind_name(),
                    "metadata": artifact.metadata,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else {
        print!("{}", output::format_models(&registry));
    }
    Ok(())
}

fn run_train(
    cfg: AppConfig,
    data: PathBuf,
    out: Option<PathBuf>,
    seed: Option<u64>,
    test_fraction: Option<f64>,
    json: bool,
) -> Result<()> {
    let mut tcfg = cfg.training;
    if let Some(s) = seed {
        tcfg.seed = s;
    }
    if let Some(f) = test_fraction {
        if !(0.0..1.0).contains(&f) {
            anyhow::bail!("--test-fraction must be in [0, 1), got {f}");
        }
        tcfg.test_fraction = f;
    }
    let dataset = training::load_dataset(&data)?;
    let trained = training::train_all(&dataset, &tcfg).context("training failed")?;
    let out_dir = out.unwrap_or_else(|| PathBuf::from(&cfg.models.dir));
    for t in &trained {
        let path = training::save_artifact(&out_dir, t.file, &t.artifact)?;
        info!(model = t.name, path = %path.display(), "artifact written");
    }
    if json {
        let summary: Vec<_> = trained
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "file": out_dir.join(t.file),
                    "metrics": t.artifact.metadata.metrics,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", output::format_training(&trained));
    }
    Ok(())
}

async fn run_history(cfg: AppConfig, limit: i64, category: Option<String>, json: bool) -> Result<()> {
    let rows = pipeline::history(&cfg, limit, category.as_deref()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        let counts = pipeline::category_counts(&cfg).await?;
        print!("{}", output::format_history(&rows, &counts));
    }
    Ok(())
}

async fn run_report(cfg: AppConfig, id: i64, latest: bool, json: bool) -> Result<()> {
    let report = if latest {
        pipeline::stored_report(&cfg, id).await?
    } else {
        pipeline::report_for(&cfg, id).await?
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.to_markdown());
    }
    Ok(())
}
