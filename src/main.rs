use anyhow::{Context, Result};
use chrono::Datelike;
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{Attribute, Cell, Table};
use is_terminal::IsTerminal;
use litsearch::config::{load_config, Config, LogFormat};
use litsearch::models::{
    Paper, PaperType, ProviderId, ProviderStat, SearchQuery, SearchResult, SortBy,
};
use litsearch::Orchestrator;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lower bound used when only `--year-end` is given
const EARLIEST_YEAR: i32 = 1800;

/// litsearch - search several literature databases at once
#[derive(Parser, Debug)]
#[command(name = "litsearch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search PubMed, arXiv, Crossref and more in one query, with deduplicated and ranked results", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    output: OutputFormat,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Table if stdout is a terminal, JSON otherwise
    Auto,
    /// Table format (human-readable)
    Table,
    /// JSON format (machine-readable)
    Json,
}

impl OutputFormat {
    fn resolve(self) -> OutputFormat {
        match self {
            OutputFormat::Auto if std::io::stdout().is_terminal() => OutputFormat::Table,
            OutputFormat::Auto => OutputFormat::Json,
            other => other,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search all enabled providers (or the ones given with -s)
    #[command(alias = "s")]
    Search {
        /// Search query string
        query: String,

        /// Provider to query; repeat for several (default: all enabled)
        #[arg(long = "source", short = 's')]
        sources: Vec<ProviderId>,

        /// Maximum results per provider
        #[arg(long, short = 'n')]
        max_results: Option<usize>,

        /// Earliest publication year
        #[arg(long)]
        year_start: Option<i32>,

        /// Latest publication year
        #[arg(long)]
        year_end: Option<i32>,

        /// Restrict to papers by this author; repeat for several
        #[arg(long = "author", short = 'a')]
        authors: Vec<String>,

        /// Restrict to this journal or venue; repeat for several
        #[arg(long = "venue")]
        venues: Vec<String>,

        /// Restrict to a publication type (article, review, preprint, ...)
        #[arg(long = "type", short = 't')]
        paper_types: Vec<PaperType>,

        /// Result order: relevance, date or citations
        #[arg(long, default_value_t = SortBy::Relevance)]
        sort: SortBy,
    },

    /// Fetch a single paper by DOI, PMID or arXiv id
    #[command(alias = "get")]
    Lookup {
        /// Identifier, e.g. 10.1038/nature14539, 26017442 or arXiv:1706.03762
        id: String,
    },

    /// List providers with their enabled state and rate limits
    #[command(alias = "ls")]
    Providers,

    /// Print the effective configuration as TOML
    Config,
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config.logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| format!("litsearch={}", level)),
    );

    // Logs go to stderr so JSON results on stdout stay parseable
    let (text, json) = match config.logging.format {
        LogFormat::Text => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&cli, &config);

    let format = cli.output.resolve();

    match cli.command {
        Commands::Search {
            query,
            sources,
            max_results,
            year_start,
            year_end,
            authors,
            venues,
            paper_types,
            sort,
        } => {
            let orchestrator = Orchestrator::from_config(&config)?;

            let mut search_query = SearchQuery::new(query)
                .providers(sources)
                .max_results(max_results.unwrap_or(config.search.default_max_results))
                .authors(authors)
                .venues(venues)
                .paper_types(paper_types)
                .sort_by(sort);
            if year_start.is_some() || year_end.is_some() {
                search_query = search_query.year_range(
                    year_start.unwrap_or(EARLIEST_YEAR),
                    year_end.unwrap_or_else(|| chrono::Utc::now().year()),
                );
            }

            let result = orchestrator.search(&search_query).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                _ => print_result_table(&result, cli.quiet),
            }
        }

        Commands::Lookup { id } => {
            let orchestrator = Orchestrator::from_config(&config)?;

            match orchestrator.lookup(&id).await {
                Ok(Some(paper)) => match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&paper)?),
                    _ => print_papers_table(std::slice::from_ref(&paper)),
                },
                Ok(None) => {
                    if !cli.quiet {
                        eprintln!("No paper found for {}", id);
                    }
                }
                Err(failure) => anyhow::bail!("Lookup of {} failed: {}", id, failure),
            }
        }

        Commands::Providers => {
            let orchestrator = Orchestrator::from_config(&config)?;
            print_providers(&config, &orchestrator, format)?;
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn print_papers_table(papers: &[Paper]) {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["#", "Title", "Authors", "Year", "Cited", "Sources", "Score"]);

    for (i, paper) in papers.iter().enumerate() {
        let sources = paper
            .sources
            .iter()
            .map(|s| s.id())
            .collect::<Vec<_>>()
            .join(", ");

        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(truncate(&paper.title, 60)).add_attribute(Attribute::Bold),
            Cell::new(truncate(&paper.author_names(), 30)),
            Cell::new(paper.year.map(|y| y.to_string()).unwrap_or_default()),
            Cell::new(paper.citations.map(|c| c.to_string()).unwrap_or_default()),
            Cell::new(sources),
            Cell::new(
                paper
                    .relevance_score
                    .map(|s| format!("{:.1}", s))
                    .unwrap_or_default(),
            ),
        ]);
    }
    println!("{table}");
}

fn print_result_table(result: &SearchResult, quiet: bool) {
    print_papers_table(&result.papers);
    if quiet {
        return;
    }

    let summary = result.summary();
    println!(
        "{} papers ({} found before deduplication) in {:.2}s, average citations {:.1}",
        summary.total_papers, summary.total_found, summary.search_time, summary.avg_citations
    );
    if !summary.by_type.is_empty() {
        let by_type = summary
            .by_type
            .iter()
            .map(|(paper_type, count)| format!("{} {}", count, paper_type))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  by type: {}", by_type);
    }

    for (provider, stat) in &result.statistics {
        match stat {
            ProviderStat::Count(count) => println!("  {:<18} {} papers", provider.name(), count),
            ProviderStat::Failed(failure) => {
                println!("  {:<18} {} ({})", provider.name(), failure.kind, failure.message)
            }
        }
    }
}

fn print_providers(config: &Config, orchestrator: &Orchestrator, format: OutputFormat) -> Result<()> {
    let registry = orchestrator.registry();

    if format == OutputFormat::Json {
        let providers: Vec<_> = ProviderId::ALL
            .into_iter()
            .map(|id| {
                let settings = config.provider(id);
                serde_json::json!({
                    "id": id,
                    "name": id.name(),
                    "enabled": settings.enabled,
                    "requests_per_second": settings.rate_limit.requests_per_second,
                    "burst": settings.rate_limit.burst.get(),
                    "lookup": registry.get(id).map(|s| s.supports_lookup()).unwrap_or(false),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&providers)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Id", "Name", "Enabled", "Rate (req/s)", "Burst", "Lookup"]);

    for id in ProviderId::ALL {
        let settings = config.provider(id);
        let lookup = registry.get(id).map(|s| s.supports_lookup()).unwrap_or(false);
        table.add_row(vec![
            Cell::new(id.id()),
            Cell::new(id.name()),
            Cell::new(if settings.enabled { "yes" } else { "no" }),
            Cell::new(settings.rate_limit.requests_per_second),
            Cell::new(settings.rate_limit.burst.get()),
            Cell::new(if lookup { "yes" } else { "-" }),
        ]);
    }
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_search_args() {
        let cli = Cli::parse_from([
            "litsearch", "search", "crispr", "-s", "arxiv", "-s", "pubmed", "-n", "5",
            "--year-start", "2015",
        ]);
        match cli.command {
            Commands::Search {
                query,
                sources,
                max_results,
                year_start,
                year_end,
                authors,
                paper_types,
                sort,
                ..
            } => {
                assert_eq!(query, "crispr");
                assert_eq!(sources, vec![ProviderId::Arxiv, ProviderId::PubMed]);
                assert_eq!(max_results, Some(5));
                assert_eq!(year_start, Some(2015));
                assert_eq!(year_end, None);
                assert!(authors.is_empty());
                assert!(paper_types.is_empty());
                assert_eq!(sort, SortBy::Relevance);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_filter_args() {
        let cli = Cli::parse_from([
            "litsearch", "search", "crispr", "-a", "Doudna", "--author", "Zhang", "--venue",
            "Nature", "-t", "review", "--type", "preprint", "--sort", "citations",
        ]);
        match cli.command {
            Commands::Search {
                authors,
                venues,
                paper_types,
                sort,
                ..
            } => {
                assert_eq!(authors, vec!["Doudna", "Zhang"]);
                assert_eq!(venues, vec!["Nature"]);
                assert_eq!(paper_types, vec![PaperType::Review, PaperType::Preprint]);
                assert_eq!(sort, SortBy::Citations);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from(["litsearch", "search", "x", "--sort", "oldest"]).is_err());
        assert!(Cli::try_parse_from(["litsearch", "search", "x", "-t", "poster"]).is_err());
    }

    #[test]
    fn test_cli_rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["litsearch", "search", "x", "-s", "jstor"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from(["litsearch", "-vv", "providers", "-o", "json"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Providers));

        let cli = Cli::parse_from(["litsearch", "--quiet", "lookup", "10.1/a"]);
        assert!(cli.quiet);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
    }
}
