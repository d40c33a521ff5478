use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{Args, ColorChoice, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::{Generator, Shell, generate};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{info, warn};

use crate::AppResult;
use crate::analysis::{DEFAULT_SEED, ReductionMethod, TargetDims};
use crate::config::SourceConfig;
use crate::pipeline::{self, RunOptions, ViewKind};
use crate::report::{ColorBy, write_reports};
use crate::sources::{DocumentApiSource, ElasticVectorSource};

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .error(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))))
    .literal(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Green))),
    )
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
    .valid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
    .invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed))))
    .context(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta))))
    .context_value(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
    );

/// Long-form CLI description shown in `--help`.
const LONG_ABOUT: &str = "vecscope - Explore clusters in stored message embeddings

This tool reads:
- embedding vectors from an \x1b]8;;https://www.elastic.co/elasticsearch\x1b\\\x1b[4;36mElasticsearch\x1b[24;39m\x1b]8;;\x1b\\ index
- message metadata (type, sender, receiver, status) from the document API

Then it projects the vectors to 2D or 3D (t-SNE or PCA), groups them with k-means,
and writes scatter, comparison, statistics and cluster reports as JSON documents.";

/// vecscope - Explore clusters in stored message embeddings.
#[derive(Parser, Debug, Clone)]
#[command(author, version, propagate_version = true, about, long_about = Some(LONG_ABOUT), styles = STYLES)]
pub struct Cli {
    /// Color choice for the output
    #[arg(long, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Subcommand to run
    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Top-level commands supported by the CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Project the embeddings and build visualization reports
    ///
    /// Writes one JSON document per view next to the output path, e.g.
    /// `cluster_visualization_tsne_2d.json` and `cluster_visualization_stats.json`.
    Visualize {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Dimensionality reduction method
        #[arg(short, long, value_enum, default_value_t = ReductionMethod::NeighborPreserving)]
        method: ReductionMethod,

        /// Number of output dimensions
        #[arg(short, long, value_enum, default_value_t = TargetDims::Two)]
        dimensions: TargetDims,

        /// Views to build (repeatable)
        #[arg(long = "view", value_enum, default_values_t = [ViewKind::All])]
        views: Vec<ViewKind>,

        /// How scatter points are grouped into series
        #[arg(long, value_enum, default_value_t = ColorBy::Type)]
        color_by: ColorBy,

        /// Output path; its stem prefixes every report file
        #[arg(short, long, default_value = "cluster_visualization.json")]
        output: PathBuf,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Cluster the embeddings and report cluster composition
    ///
    /// Builds t-SNE and PCA scatter views coloured by cluster plus a per-cluster
    /// breakdown of sizes, message types and top senders.
    Cluster {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Output path; its stem prefixes every report file
        #[arg(short, long, default_value = "clusters.json")]
        output: PathBuf,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Generate shell completion for a given shell
    Completion {
        /// Output file to write the completion script to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The shell to generate the completion for
        #[arg(value_enum)]
        shell: CompletionShell,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

/// Supported completion targets for shell auto-completion.
#[derive(ValueEnum, Clone, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

impl Display for CompletionShell {
    /// Render the canonical shell name string.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionShell::Bash => "bash",
            CompletionShell::Zsh => "zsh",
            CompletionShell::Fish => "fish",
            CompletionShell::PowerShell => "powershell",
            CompletionShell::Elvish => "elvish",
        };
        write!(f, "{}", s)
    }
}

impl CompletionShell {
    fn shell(&self) -> Shell {
        match self {
            CompletionShell::Bash => Shell::Bash,
            CompletionShell::Zsh => Shell::Zsh,
            CompletionShell::Fish => Shell::Fish,
            CompletionShell::PowerShell => Shell::PowerShell,
            CompletionShell::Elvish => Shell::Elvish,
        }
    }
}

impl Generator for &CompletionShell {
    fn generate(&self, cmd: &clap::builder::Command, buf: &mut dyn Write) {
        self.shell().generate(cmd, buf)
    }

    fn file_name(&self, name: &str) -> String {
        self.shell().file_name(name)
    }
}

/// Where the embeddings and metadata come from.
///
/// Every flag overrides the matching field of the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// JSON config file (defaults to `~/.config/vecscope/config.json` if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the Elasticsearch cluster
    #[arg(long)]
    pub store_url: Option<String>,

    /// Index holding the embeddings
    #[arg(long)]
    pub index: Option<String>,

    /// Hits requested per search page
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Base URL of the document API
    #[arg(long)]
    pub api_url: Option<String>,

    /// Bearer token for the document API
    #[arg(long)]
    pub api_token: Option<String>,

    /// Per-request timeout
    ///
    /// Some valid suffixes are:
    /// - Seconds: `s`, `sec`, or `seconds`
    /// - Minutes: `m`, `min`, or `minutes`
    #[arg(long)]
    pub timeout: Option<String>,
}

impl SourceArgs {
    /// Load the config file and apply the command-line overrides on top.
    pub async fn load(&self) -> AppResult<SourceConfig> {
        let config = SourceConfig::load(self.config.as_deref()).await?;
        self.apply(config)
    }

    fn apply(&self, mut config: SourceConfig) -> AppResult<SourceConfig> {
        if let Some(store_url) = &self.store_url {
            config.store_url = store_url.clone();
        }
        if let Some(index) = &self.index {
            config.index = index.clone();
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }
        if let Some(api_token) = &self.api_token {
            config.api_token = Some(api_token.clone());
        }
        if let Some(timeout) = &self.timeout {
            config.timeout = humantime::parse_duration(timeout)?;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Tuning for the reduction and clustering stages.
#[derive(Args, Debug, Clone)]
pub struct AnalysisArgs {
    /// Number of clusters (defaults to clamp(records / 10, 2, 5))
    #[arg(short = 'k', long)]
    pub clusters: Option<usize>,

    /// Seed for every randomized step
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// t-SNE perplexity [default: 30]
    #[arg(long)]
    pub perplexity: Option<f64>,

    /// t-SNE iteration budget [default: 1000]
    #[arg(long)]
    pub tsne_iterations: Option<usize>,

    /// k-means initializations to try [default: 10]
    #[arg(long)]
    pub kmeans_inits: Option<usize>,

    /// k-means iteration budget per initialization [default: 300]
    #[arg(long)]
    pub kmeans_iterations: Option<usize>,
}

impl AnalysisArgs {
    fn apply(&self, mut options: RunOptions) -> RunOptions {
        options.reduction.seed = self.seed;
        options.clustering.seed = self.seed;
        options.clustering.k = self.clusters;
        if let Some(perplexity) = self.perplexity {
            options.reduction.perplexity = perplexity;
        }
        if let Some(iterations) = self.tsne_iterations {
            options.reduction.tsne_iterations = iterations;
        }
        if let Some(n_init) = self.kmeans_inits {
            options.clustering.n_init = n_init;
        }
        if let Some(iterations) = self.kmeans_iterations {
            options.clustering.max_iterations = iterations;
        }
        options
    }
}

/// Helper trait for accessing verbosity flags on commands.
pub trait GetVerbosity {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel>;
}

impl GetVerbosity for Cmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            Cmd::Visualize { verbosity, .. } => verbosity,
            Cmd::Cluster { verbosity, .. } => verbosity,
            Cmd::Completion { verbosity, .. } => verbosity,
        }
    }
}

impl Cmd {
    /// Execute the chosen top-level command.
    #[tracing::instrument(name = "Running command", level = "info", skip(self))]
    pub async fn run(&self) -> AppResult<()> {
        match self {
            Cmd::Visualize {
                source,
                analysis,
                method,
                dimensions,
                views,
                color_by,
                output,
                ..
            } => {
                let options = analysis.apply(RunOptions::visualize(
                    *method,
                    *dimensions,
                    views,
                    *color_by,
                ));
                execute(source, &options, output).await
            }
            Cmd::Cluster {
                source,
                analysis,
                output,
                ..
            } => {
                let options = analysis.apply(RunOptions::clusters());
                execute(source, &options, output).await
            }
            Cmd::Completion { shell, output, .. } => {
                let mut cmd = Cli::command();
                if let Some(output_path) = output {
                    let mut file = std::fs::OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .create(true)
                        .open(output_path)?;
                    // Write completion script to the requested file.
                    generate(shell, &mut cmd, "vecscope", &mut file);
                    info!(
                        "Generated completion script for {} at {}",
                        shell,
                        output_path.display()
                    );
                } else {
                    // Fallback: print completion script to stdout.
                    generate(shell, &mut cmd, "vecscope", &mut std::io::stdout());
                }
                Ok(())
            }
        }
    }
}

/// Build both adapters from one config, run the pipeline, then save every report.
async fn execute(source: &SourceArgs, options: &RunOptions, output: &Path) -> AppResult<()> {
    let config = source.load().await?;
    let client = config.http_client()?;
    let vectors = ElasticVectorSource::new(client.clone(), &config);
    let metadata = DocumentApiSource::new(client, &config);

    let outcome = pipeline::run(&vectors, &metadata, options).await?;
    if outcome.reports.is_empty() {
        info!("Nothing to write.");
        return Ok(());
    }

    let written = write_reports(output, &outcome.reports).await?;
    if outcome.metadata_degraded {
        warn!(
            "Reports for {} records were built without document metadata.",
            outcome.record_count
        );
    }
    info!("Wrote {} reports", written.len());
    Ok(())
}
