use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use keygraph_cluster::ClusterManager;
use keygraph_core::{
    ClusteringMethod, ClusteringResult, ConfigManager, KeyGraphConfig, LoggingConfig,
    QualityAssessment, TopicTree,
};
use keygraph_vector::EmbeddingService;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keygraph")]
#[command(about = "KeyGraph CLI - Keyword clustering and topic hierarchies", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Explicit config file (defaults to ./.keygraph.toml, then ~/.keygraph/config.toml)
    #[arg(long, global = true, env = "KEYGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster keywords read from a file (one per line) or stdin
    Cluster(ClusterArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(clap::Args, Default)]
struct ClusterArgs {
    /// Keyword file; `-` or omitted reads stdin
    input: Option<PathBuf>,

    /// Keywords given inline instead of a file (repeatable)
    #[arg(short, long = "keyword")]
    keywords: Vec<String>,

    /// Clustering method (defaults to the configured one)
    #[arg(short, long, value_enum)]
    method: Option<MethodArg>,

    /// Minimum cluster size for density clustering
    #[arg(long)]
    min_cluster_size: Option<usize>,

    /// Similarity to the hub required for a spoke
    #[arg(long)]
    hub_threshold: Option<f32>,

    /// Minimum similarity for a keyword relationship
    #[arg(long)]
    similarity_threshold: Option<f32>,

    /// Random seed for k-means seeding and bootstrap sampling
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Hdbscan,
    Kmeans,
    Agglomerative,
}

impl From<MethodArg> for ClusteringMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Hdbscan => ClusteringMethod::Hdbscan,
            MethodArg::Kmeans => ClusteringMethod::KMeans,
            MethodArg::Agglomerative => ClusteringMethod::Agglomerative,
        }
    }
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Target path
        #[arg(default_value = ".keygraph.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match execute_command(&cli) {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn execute_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Cluster(args) => {
            let config = load_config(cli.config.as_deref())?;
            init_logging(&config.logging, cli.verbose);
            execute_cluster_command(args, config, cli.output)
        }
        Commands::Config(cmd) => execute_config_command(cmd, cli),
    }
}

fn load_config(path: Option<&Path>) -> Result<KeyGraphConfig> {
    let manager = match path {
        Some(path) => ConfigManager::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigManager::load().context("Failed to load configuration")?,
    };
    Ok(manager.into_config())
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // a subscriber may already be installed when embedded; keep it
    let _ = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };
}

fn apply_overrides(config: &mut KeyGraphConfig, args: &ClusterArgs) -> Result<()> {
    let clustering = &mut config.clustering;
    if let Some(size) = args.min_cluster_size {
        clustering.min_cluster_size = size;
    }
    if let Some(threshold) = args.hub_threshold {
        clustering.hub_threshold = threshold;
    }
    if let Some(threshold) = args.similarity_threshold {
        clustering.similarity_threshold = threshold;
    }
    if let Some(seed) = args.seed {
        clustering.random_seed = seed;
    }
    if let Some(method) = args.method {
        clustering.default_method = method.into();
    }
    clustering
        .validate()
        .context("Invalid clustering options")?;
    Ok(())
}

fn read_keywords(args: &ClusterArgs) -> Result<Vec<String>> {
    if !args.keywords.is_empty() {
        return Ok(parse_keywords(&args.keywords.join("\n")));
    }

    let content = match args.input.as_deref() {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keywords from {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read keywords from stdin")?;
            buf
        }
    };
    Ok(parse_keywords(&content))
}

/// One keyword per line; blank lines and `#` comments are skipped.
fn parse_keywords(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn execute_cluster_command(
    args: &ClusterArgs,
    mut config: KeyGraphConfig,
    output: OutputFormat,
) -> Result<()> {
    apply_overrides(&mut config, args)?;
    let keywords = read_keywords(args)?;
    info!(keywords = keywords.len(), "Read keywords");

    let method = config.clustering.default_method;
    let embedding = Arc::new(EmbeddingService::from_config(&config.embedding));
    let manager = ClusterManager::new(config.clustering, embedding);
    let result = manager
        .run(&keywords, method)
        .context("Clustering failed")?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Pretty => print_result(&result),
    }
    Ok(())
}

fn execute_config_command(cmd: &ConfigCommands, cli: &Cli) -> Result<()> {
    match cmd {
        ConfigCommands::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            ConfigManager::create_default_config(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} {}", "Created".green().bold(), path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = load_config(cli.config.as_deref())?;
            match cli.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Pretty => print!("{}", toml::to_string_pretty(&config)?),
            }
            Ok(())
        }
    }
}

fn print_result(result: &ClusteringResult) {
    if result.is_empty() {
        println!("{}", "No keywords to cluster".yellow());
        return;
    }

    let total: usize = result.clusters.values().map(Vec::len).sum();
    println!(
        "{} {} keywords into {} clusters ({} noise) using {}",
        "Clustered".green().bold(),
        total.to_string().yellow(),
        result.cluster_count().to_string().yellow(),
        result.noise_keywords.len().to_string().yellow(),
        result.method.to_string().cyan()
    );

    for cluster in result.cluster_summaries() {
        println!();
        let title = format!("[{}] {}", cluster.id, cluster.label);
        if cluster.is_noise() {
            println!("{}", title.yellow().bold());
        } else {
            println!(
                "{}  coverage {:.0}%",
                title.cyan().bold(),
                cluster.coverage * 100.0
            );
        }
        for keyword in &cluster.keywords {
            if cluster.hub.as_deref() == Some(keyword.as_str()) {
                println!("  {} {}", "*".green().bold(), keyword.green().bold());
            } else if cluster.spokes.contains(keyword) {
                println!("  {} {}", "-".green(), keyword);
            } else {
                println!("  {} {}", "-".dimmed(), keyword.dimmed());
            }
        }
    }

    if !result.hierarchy.tree.is_empty() {
        println!("\n{}", "Topic hierarchy".cyan().bold());
        print_tree(&result.hierarchy.tree);
    }

    let validation = &result.validation;
    let assessment = validation.assessment.to_string();
    let assessment = match validation.assessment {
        QualityAssessment::Excellent | QualityAssessment::Good => assessment.green(),
        QualityAssessment::Fair => assessment.yellow(),
        QualityAssessment::Poor => assessment.red(),
    };
    println!(
        "\n{} {:.2} ({}), silhouette {:.2}",
        "Validation".cyan().bold(),
        validation.overall_score,
        assessment,
        validation.silhouette
    );
    for recommendation in &validation.recommendations {
        println!("  {} {}", "-".dimmed(), recommendation);
    }
}

fn print_tree(roots: &[TopicTree]) {
    let mut stack: Vec<&TopicTree> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        println!(
            "{}{} {}",
            "  ".repeat(node.level + 1),
            node.label,
            format!("[{}]", node.cluster_id).dimmed()
        );
        stack.extend(node.children.iter().rev());
    }
}
