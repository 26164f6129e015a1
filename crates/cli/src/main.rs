//! Evoguard CLI - safety-controlled evolution runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evoguard_core::{CheckpointId, EvolutionConfig, GeneSchema, Genome, GenomeId, GenomeSpec};
use evoguard_evolution::EvolutionEngine;
use evoguard_safety::{SafetyScanner, ScannerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evoguard")]
#[command(about = "Safety-controlled evolutionary search", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage directory, overriding the configuration
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run evolution until the target fitness or generation limit
    Run {
        /// Target fitness
        #[arg(long, default_value = "0.95")]
        target: f64,
        /// Seed genomes (JSON array of genome specs)
        #[arg(long)]
        seeds: Option<PathBuf>,
        /// Continue from the latest periodic checkpoint
        #[arg(long)]
        resume: bool,
        /// Generation limit
        #[arg(long)]
        max_generations: Option<u64>,
        /// Population size
        #[arg(long)]
        population_size: Option<usize>,
        /// Random seed for a reproducible run
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Show stored checkpoints and quarantine size
    Status,
    /// List stored checkpoints
    Checkpoints,
    /// Restore a checkpoint, superseding newer ones
    Rollback {
        /// Checkpoint id (gen-NNNNNN or emergency); latest periodic if omitted
        #[arg(long)]
        checkpoint: Option<String>,
    },
    /// Manage quarantined genomes
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },
    /// Scan a source file with the safety scanner
    Scan {
        /// File to scan
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// List quarantined genomes
    List,
    /// Release a genome
    Release {
        /// Genome ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EvolutionConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EvolutionConfig::default(),
    };
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }

    match cli.command {
        Commands::Run {
            target,
            seeds,
            resume,
            max_generations,
            population_size,
            seed,
        } => {
            if let Some(limit) = max_generations {
                config.max_generations = limit;
            }
            if let Some(size) = population_size {
                config.population_size = size;
            }
            if seed.is_some() {
                config.random_seed = seed;
            }
            config.validate()?;

            let engine = Arc::new(EvolutionEngine::open(config).await?);
            if resume {
                engine.scanner().load_quarantine().await?;
                let restored = engine.rollback(None).await?;
                info!("Resuming from {} (generation {})", restored.id, restored.generation);
            } else {
                let seeds = match seeds {
                    Some(path) => read_seeds(&path).await?,
                    None => Vec::new(),
                };
                engine.initialize(seeds).await?;
            }

            let runner = engine.clone();
            let mut run = tokio::spawn(async move { runner.start(target).await });
            let summary = tokio::select! {
                joined = &mut run => joined??,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted, stopping");
                    engine.emergency_stop().await?;
                    run.await??
                }
            };

            println!("Run finished: {}", summary.reason);
            println!("  Generations run: {}", summary.generations_run);
            println!("  Generation: {}", summary.generation);
            println!("  State: {}", summary.state);
            match summary.best_fitness {
                Some(fitness) => println!("  Best fitness: {:.4}", fitness),
                None => println!("  Best fitness: -"),
            }
            if let Some(best) = engine.best_genome().await {
                println!("  Best genome: {}", best.id);
                for gene in best.genes.iter() {
                    println!("    {} = {}", gene.name, gene.value);
                }
            }
        }
        Commands::Status => {
            let engine = EvolutionEngine::open(config).await?;
            engine.scanner().load_quarantine().await?;
            let checkpoints = engine.list_checkpoints().await?;

            println!("Evoguard Status");
            println!("  Storage: {}", engine.config().storage_dir.display());
            println!("  Checkpoints: {}", checkpoints.len());
            if let Some(latest) = checkpoints.iter().filter(|c| !c.id.is_emergency()).last() {
                println!("  Latest periodic: {} ({} genomes)", latest.id, latest.population_size);
            }
            if let Some(emergency) = checkpoints.iter().find(|c| c.id.is_emergency()) {
                println!("  Emergency stop at generation {} ({})", emergency.generation, emergency.timestamp);
            }
            println!("  Quarantined: {}", engine.scanner().quarantined().await.len());
        }
        Commands::Checkpoints => {
            let engine = EvolutionEngine::open(config).await?;
            let checkpoints = engine.list_checkpoints().await?;

            println!("Checkpoints ({})", checkpoints.len());
            for checkpoint in checkpoints {
                println!(
                    "  {} | {:?} | generation {} | {} genomes | best {} | {}",
                    checkpoint.id,
                    checkpoint.kind,
                    checkpoint.generation,
                    checkpoint.population_size,
                    checkpoint
                        .best_fitness
                        .map(|f| format!("{:.4}", f))
                        .unwrap_or_else(|| "-".to_string()),
                    checkpoint.timestamp,
                );
            }
        }
        Commands::Rollback { checkpoint } => {
            let id = checkpoint
                .map(|s| s.parse::<CheckpointId>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let engine = EvolutionEngine::open(config).await?;
            let restored = engine.rollback(id).await?;
            println!(
                "Rolled back to {} (generation {}, {} genomes)",
                restored.id, restored.generation, restored.population_size
            );
        }
        Commands::Quarantine { action } => {
            let engine = EvolutionEngine::open(config).await?;
            let scanner = engine.scanner();
            scanner.load_quarantine().await?;

            match action {
                QuarantineAction::List => {
                    let records = scanner.quarantine_records().await;
                    println!("Quarantined genomes ({})", records.len());
                    for record in records {
                        println!("  {} | {} | {}", record.genome_id, &record.code_hash[..12.min(record.code_hash.len())], record.timestamp);
                        for v in &record.violations {
                            println!("    {} {}: {}", v.severity.as_str(), v.category.as_str(), v.description);
                        }
                    }
                }
                QuarantineAction::Release { id } => {
                    let genome_id: GenomeId = id.parse().map_err(|_| anyhow::anyhow!("Invalid genome ID"))?;
                    if scanner.release(genome_id).await? {
                        println!("Released {}", genome_id);
                    } else {
                        println!("Genome not quarantined");
                    }
                }
            }
        }
        Commands::Scan { file } => {
            let source = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let scanner = SafetyScanner::new(ScannerConfig::default())?;
            let genome = Genome::new(GeneSchema::default().default_genes()).with_source(source);
            let findings = scanner.scan(&genome);

            println!("Findings ({})", findings.len());
            for v in &findings {
                println!("  {} | {} | {}", v.severity.as_str(), v.category.as_str(), v.description);
                if let Some(snippet) = &v.snippet {
                    println!("    at: {}", snippet);
                }
                println!("    mitigation: {}", v.mitigation);
            }
            println!("Safety score: {:.3}", SafetyScanner::score_violations(&findings));
        }
    }

    Ok(())
}

async fn read_seeds(path: &PathBuf) -> Result<Vec<GenomeSpec>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let seeds: Vec<GenomeSpec> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!("Loaded {} seed genomes", seeds.len());
    Ok(seeds)
}
