//! CLI interface for self-improve

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::{self, Config, StorageConfig};
use crate::metrics::ExecutionRecord;
use crate::system::SelfImprovementSystem;

#[derive(Parser)]
#[command(name = "self-improve")]
#[command(about = "Execution ledger, adaptive engine and knowledge graphs for agent self-improvement", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Keep the knowledge tree and all state under this directory
    #[arg(long, global = true, env = "SELF_IMPROVE_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a task execution
    Record {
        /// Worker role that ran the task
        #[arg(short, long)]
        worker: String,
        /// Execution time in seconds
        #[arg(short, long, default_value = "0")]
        time: f64,
        /// Mark the execution as failed
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        task_id: Option<String>,
        /// Task description
        #[arg(short, long)]
        description: Option<String>,
        /// Task output text
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show system-wide performance
    Performance,
    /// Show improvement suggestions
    Suggest,
    /// Analyze trends and print areas and recommendations
    Analyze,
    /// Run a full adaptation cycle
    Adapt {
        /// Report what would be applied without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Summarize past adaptation cycles
    Report,
    /// Extract change descriptors from a file ("-" for stdin)
    Extract {
        file: PathBuf,
    },
    /// Extract changes from a file ("-" for stdin) and apply them
    Apply {
        file: PathBuf,
        /// Report what would be applied without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List config changes waiting for manual review
    Proposals {
        /// Empty the queue after listing
        #[arg(long)]
        clear: bool,
    },
    /// Inspect the knowledge or memory graph
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
    /// Show or create configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GraphKind {
    Knowledge,
    Memory,
}

#[derive(Subcommand)]
enum GraphCommands {
    /// Node/edge counts and histograms
    Stats {
        #[arg(short, long, value_enum, default_value = "knowledge")]
        graph: GraphKind,
    },
    /// Isolated nodes and weakly connected clusters in both graphs
    Gaps,
    /// Search one graph, or both when no graph is given
    Search {
        query: String,
        #[arg(short, long, value_enum)]
        graph: Option<GraphKind>,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

fn read_input(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn load_config(path: Option<&Path>, root: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(root) = root {
        config.storage = StorageConfig::rooted_at(root);
    }
    Ok(config)
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let (config_file, root) = (cli.config.as_deref(), cli.root.as_deref());

    let command = match cli.command {
        Commands::Config { command } => return run_config(config_file, root, command),
        other => other,
    };

    let system = SelfImprovementSystem::open(load_config(config_file, root)?)?;

    match command {
        Commands::Record {
            worker,
            time,
            failed,
            task_id,
            description,
            output,
        } => {
            let mut record = ExecutionRecord::new(&worker, !failed, time);
            if let Some(id) = task_id {
                record = record.with_task_id(id);
            }
            if let Some(description) = description {
                record = record.with_description(description);
            }
            if let Some(output) = output {
                record = record.with_output(output);
            }

            let outcome = system.record_execution(record)?;
            println!("Recorded execution for '{}'", worker);
            for insight in &outcome.insights {
                println!("  [{}] {}", insight.insight_type, insight.description);
            }
        }
        Commands::Performance => {
            let perf = system.ledger().get_system_performance();
            println!("System Performance");
            println!("==================");
            println!("Tasks: {} ({} ok, {} failed)", perf.total_tasks, perf.successful_tasks, perf.failed_tasks);
            println!("Success rate: {:.1}%", perf.success_rate * 100.0);
            println!("Average time: {:.2}s", perf.average_execution_time);
            println!("Workers: {}", perf.worker_count);
            println!("Insights: {} ({} applied)", perf.total_insights, perf.applied_insights);
            println!("Learning velocity: {:.2}", system.ledger().learning_velocity());

            let workers = system.ledger().all_worker_metrics();
            if !workers.is_empty() {
                println!();
                for (role, m) in workers {
                    println!(
                        "  {:<20} {:>5} tasks  {:>5.1}%  {:>6.2}s",
                        role,
                        m.total_tasks,
                        m.success_rate() * 100.0,
                        m.average_execution_time
                    );
                }
            }
        }
        Commands::Suggest => {
            let suggestions = system.ledger().get_improvement_suggestions();
            if suggestions.is_empty() {
                println!("No suggestions.");
            }
            for s in suggestions {
                println!(
                    "[{:?}] {} ({}): {}",
                    s.priority,
                    s.kind,
                    s.worker.as_deref().unwrap_or("system"),
                    s.description
                );
                for e in &s.evidence {
                    println!("    - {}", e);
                }
            }
        }
        Commands::Analyze => {
            let engine = system.engine();
            let analysis = engine.analyze_performance_trends();
            let areas = engine.identify_improvement_areas(&analysis);
            let recommendations = engine.generate_recommendations(&areas);
            print_json(&serde_json::json!({
                "analysis": analysis,
                "areas": areas,
                "recommendations": recommendations,
            }))?;
        }
        Commands::Adapt { dry_run } => {
            let cycle = system.engine().run_cycle(dry_run);
            print_json(&cycle)?;
        }
        Commands::Report => {
            print_json(&system.engine().adaptation_report())?;
        }
        Commands::Extract { file } => {
            let text = read_input(&file)?;
            print_json(&system.extractor().extract_changes(&text))?;
        }
        Commands::Apply { file, dry_run } => {
            let text = read_input(&file)?;
            let outcome = system.apply_text(&text, dry_run);
            print_json(&outcome.report)?;
            eprintln!("{} changes: {}", outcome.changes.len(), outcome.report.summary());
        }
        Commands::Proposals { clear } => {
            let proposals = system.dispatcher().pending_proposals();
            print_json(&proposals)?;
            if clear {
                system.dispatcher().clear_proposals()?;
                eprintln!("Cleared {} proposals", proposals.len());
            }
        }
        Commands::Graph { command } => match command {
            GraphCommands::Stats { graph } => {
                let g = match graph {
                    GraphKind::Knowledge => system.knowledge_graph(),
                    GraphKind::Memory => system.memory_graph(),
                };
                print_json(&g.statistics())?;
            }
            GraphCommands::Gaps => {
                print_json(&system.integration().analyze_gaps())?;
            }
            GraphCommands::Search { query, graph, limit } => match graph {
                Some(GraphKind::Knowledge) => print_json(&system.knowledge_graph().search(&query, None, limit))?,
                Some(GraphKind::Memory) => print_json(&system.memory_graph().search(&query, None, limit))?,
                None => print_json(&system.integration().enhanced_search(&query, limit))?,
            },
        },
        Commands::Config { command } => run_config(config_file, root, command)?,
    }

    Ok(())
}

fn run_config(config_file: Option<&Path>, root: Option<&Path>, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = load_config(config_file, root)?;
            let text = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{}", text);
        }
        ConfigCommands::Init { force } => {
            let path = match config_file {
                Some(path) => path.to_path_buf(),
                None => config::config_path()?,
            };
            if path.exists() && !force {
                println!("Config already exists at {} (use --force to overwrite)", path.display());
                return Ok(());
            }
            Config::default().save_to(&path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
