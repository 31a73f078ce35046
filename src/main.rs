use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thumbstore::config::{self, CONFIG_FILENAME};
use thumbstore::options::OptionSet;
use thumbstore::output;
use thumbstore::registry::Registry;
use thumbstore::thumbnail::ThumbnailBackend;

/// Repeatable `-o key=value` rendering options.
#[derive(clap::Args, Clone)]
struct OptionArgs {
    /// Rendering option as key=value (crop=center, quality=80, format=PNG, ...)
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,
}

impl OptionArgs {
    fn option_set(&self) -> Result<OptionSet, thumbstore::options::OptionError> {
        OptionSet::from_pairs(&self.options)
    }
}

#[derive(Parser)]
#[command(name = "thumbstore")]
#[command(about = "Content-addressed thumbnail generation and caching")]
#[command(long_about = "\
Content-addressed thumbnail generation and caching

A thumbnail is addressed by its source and its rendering options. The first
request renders and stores it; later requests are answered from the
metadata store without touching storage.

Geometry:
  200x100   fit inside 200x100 (or fill it with crop=...)
  200x      width 200, height from the source ratio
  x100      height 100, width from the source ratio
  200       square 200x200

Options (-o key=value, repeatable):
  crop=center|top|left 20%|...   cropbox=x1,y1,x2,y2   upscale=true|false
  quality=1..100   format=AVIF|JPEG|PNG|WEBP|GIF   colorspace=RGB|GRAY
  blur=<sigma>   padding=true   padding_color=#rrggbb   orientation=false

Run 'thumbstore gen-config' to generate a documented thumbstore.toml.")]
#[command(version)]
struct Cli {
    /// Config file; relative storage paths resolve against its directory
    #[arg(long, default_value = CONFIG_FILENAME, global = true)]
    config: PathBuf,

    /// Log cache decisions at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Get or create one thumbnail and print where it is stored
    Thumbnail {
        source: String,
        geometry: String,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Get or create thumbnails of many sources in parallel
    Batch {
        geometry: String,
        #[arg(required = true)]
        sources: Vec<String>,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Print the size a thumbnail would have, without rendering it
    Resolve {
        source: String,
        geometry: String,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Print the CSS margin that centers a source inside a geometry
    Margin { source: String, geometry: String },
    /// Forget a source and its thumbnails
    Delete {
        source: String,
        /// Keep the stored thumbnail files
        #[arg(long)]
        keep_files: bool,
    },
    /// Drop metadata records whose files are gone
    Cleanup,
    /// Drop all metadata
    Clear,
    /// Print a stock thumbstore.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let backend = build_backend(&cli.config)?;

    match cli.command {
        Command::Thumbnail {
            source,
            geometry,
            options,
        } => {
            let options = options.option_set()?;
            let lines = match backend.get_thumbnail_lenient(source.as_str(), &geometry, &options)? {
                Some(t) => output::format_thumbnail(&t),
                None => output::format_missing(&source),
            };
            print_lines(&lines);
        }
        Command::Batch {
            geometry,
            sources,
            options,
        } => {
            let options = options.option_set()?;
            init_thread_pool(&backend.settings().processing);
            let results: Vec<_> = sources
                .par_iter()
                .map(|source| backend.get_thumbnail(source, &geometry, &options))
                .collect();
            let mut failed = 0;
            for (i, (source, result)) in sources.iter().zip(&results).enumerate() {
                if result.is_err() {
                    failed += 1;
                }
                println!("{}", output::format_batch_item(i + 1, source, result));
            }
            print_lines(&output::format_batch_summary(&backend.stats(), failed));
        }
        Command::Resolve {
            source,
            geometry,
            options,
        } => {
            let options = options.option_set()?;
            let resolved = backend.resolve(source.as_str(), &geometry, &options)?;
            print_lines(&output::format_resolved(&source, &resolved));
        }
        Command::Margin { source, geometry } => {
            println!("{}", backend.margin(source.as_str(), &geometry)?);
        }
        Command::Delete { source, keep_files } => {
            let removed = backend.delete(source.as_str(), !keep_files)?;
            print_lines(&output::format_delete(&source, removed, !keep_files));
        }
        Command::Cleanup => {
            print_lines(&output::format_cleanup(&backend.cleanup()?));
        }
        Command::Clear => {
            print_lines(&output::format_clear(backend.clear()?));
        }
        Command::GenConfig => {}
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

/// Load settings and wire the backend. Storage paths are relative to the
/// config file's directory.
fn build_backend(config_path: &Path) -> Result<ThumbnailBackend, Box<dyn std::error::Error>> {
    let settings = config::load_config(config_path)?;
    let root = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(Registry::with_builtins().build(settings, &root)?)
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; users can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}
