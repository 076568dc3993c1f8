use clap::{Parser, Subcommand};
use frontdex::aggregate::{self, RunReport};
use frontdex::cache::CacheStats;
use frontdex::config::{self, Config, Credentials};
use frontdex::discover::{FilePattern, discover, discover_collection};
use frontdex::output;
use frontdex::process::{FileProcessor, ImageProcessor, IndexOnly, WriteMode};
use frontdex::references::Scanner;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "frontdex")]
#[command(about = "Index Markdown front matter into JSON and host local images")]
#[command(long_about = "\
Index Markdown front matter into JSON and host local images

Each collection is a subdirectory of the content root. Every Markdown file
in it contributes one JSON record built from its front matter; the
designated collection also gets a category histogram.

Content structure:

  content/
  ├── frontdex.toml            # Optional config (see gen-config)
  ├── events/
  │   └── spring-fair.md
  ├── news/
  └── posts/
      ├── a.md                 # coverImage: ./img/cover.png
      └── img/cover.png        # Uploaded, then referenced by URL

Outputs (written to the content root):

  events.json, news.json, posts.json, posts-categories.json

Image uploads use Cloudflare Images. Set CLOUDFLARE_ACCOUNT_ID and
CLOUDFLARE_API_TOKEN in the environment or in a .env file.

Run 'frontdex gen-config' to generate a documented frontdex.toml.")]
#[command(version)]
struct Cli {
    /// Content directory
    #[arg(long, default_value = "content", global = true)]
    source: PathBuf,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Also include files in subdirectories of each collection
    #[arg(short, long)]
    recursive: bool,
    /// Index only; do not upload or rewrite images
    #[arg(long)]
    skip_images: bool,
    /// Process images only; write no JSON
    #[arg(long)]
    skip_json: bool,
}

#[derive(clap::Args)]
struct ImagesArgs {
    /// A Markdown file or a directory of them
    path: PathBuf,
    /// Write rewritten files under this directory instead of in place
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Write <name>_updated.<ext> next to each file instead of overwriting it
    #[arg(short, long)]
    no_overwrite: bool,
    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,
    /// Glob for which files to process (defaults to [scan] pattern)
    #[arg(short, long)]
    pattern: Option<String>,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Also include files in subdirectories of each collection
    #[arg(short, long)]
    recursive: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Upload images, rewrite references, and write collection JSON
    Build(BuildArgs),
    /// Upload and rewrite images in a file or directory, without JSON
    Images(ImagesArgs),
    /// Report metadata and image references without changing anything
    Check(CheckArgs),
    /// Print a stock frontdex.toml with all options documented
    GenConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Build(args) => {
            let config = config::load_config(&cli.source)?;
            let pattern = FilePattern::new(&config.scan.pattern)?;
            let discover = |name: &str| {
                discover_collection(&cli.source.join(name), args.recursive, &pattern)
            };

            if args.skip_images {
                let report = run(&config, discover, &IndexOnly).await;
                finish_build(&cli.source, &report, None, args.skip_json)?;
            } else {
                let processor =
                    ImageProcessor::cloudflare(&config, Credentials::from_env, WriteMode::InPlace)?;
                let report = run(&config, discover, &processor).await;
                let stats = processor.dispatcher().stats();
                finish_build(&cli.source, &report, Some(stats), args.skip_json)?;
            }
        }
        Command::Images(args) => {
            let config = config::load_config(&cli.source)?;
            let pattern = FilePattern::new(args.pattern.as_deref().unwrap_or(&config.scan.pattern))?;
            let input_root = if args.path.is_file() {
                args.path.parent().map(Path::to_path_buf).unwrap_or_default()
            } else {
                args.path.clone()
            };
            let mode = match (args.output, args.no_overwrite) {
                (Some(output_root), _) => WriteMode::Mirror {
                    input_root: input_root.clone(),
                    output_root,
                },
                (None, true) => WriteMode::Suffixed,
                (None, false) => WriteMode::InPlace,
            };
            let processor = ImageProcessor::cloudflare(&config, Credentials::from_env, mode)?;

            let files = discover(&args.path, args.recursive, &pattern)?;
            info!(files = files.len(), input = %args.path.display(), "processing images");
            let mut outcomes = Vec::with_capacity(files.len());
            let mut failures = Vec::new();
            for path in files {
                match processor.process(&path).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "file skipped");
                        failures.push(aggregate::Failure {
                            path,
                            error: e.to_string(),
                        });
                    }
                }
            }
            output::print_images_output(
                &outcomes,
                &failures,
                processor.dispatcher().stats(),
                &input_root,
            );
        }
        Command::Check(args) => {
            let config = config::load_config(&cli.source)?;
            let pattern = FilePattern::new(&config.scan.pattern)?;
            let checked = aggregate::check(
                &config.collections,
                |name: &str| discover_collection(&cli.source.join(name), args.recursive, &pattern),
                &Scanner::new(&config.scan.image_fields),
            );
            output::print_check_output(&checked, &cli.source);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

async fn run<P, D>(config: &Config, discover: D, processor: &P) -> RunReport
where
    P: FileProcessor,
    D: FnMut(&str) -> Result<Vec<PathBuf>, frontdex::discover::DiscoverError>,
{
    aggregate::run(
        &config.collections,
        &config.category_collection,
        discover,
        processor,
    )
    .await
}

fn finish_build(
    source: &Path,
    report: &RunReport,
    stats: Option<&CacheStats>,
    skip_json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if !skip_json {
        aggregate::write_outputs(source, report)?;
    }
    output::print_build_output(report, stats, source);
    Ok(())
}

/// Initialise `tracing` with a filter picked from the flags.
///
/// `--quiet` always wins; otherwise `RUST_LOG` overrides the default.
fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if quiet {
        "error"
    } else if verbose {
        "frontdex=debug,info"
    } else {
        "frontdex=info,warn"
    };

    let env_filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose);

    // Already initialised is fine.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
