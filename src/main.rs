use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clrbindgen::{config::Config, session::Session, session::SessionOptions};

/// Generates D binding modules for .NET assemblies.
#[derive(Parser)]
#[command(name = "clrbindgen", version, about)]
struct Cli {
    /// Output directory for the generated packages
    output_dir: PathBuf,

    /// Assemblies to generate, by file path or logical name
    #[arg(required = true)]
    assemblies: Vec<String>,

    /// Process only the listed assemblies, not discovered dependencies
    #[arg(long)]
    shallow: bool,

    /// Regenerate even when the recorded content hash matches
    #[arg(long)]
    force: bool,

    /// Generation configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory searched when resolving logical assembly names (repeatable)
    #[arg(long = "search-dir")]
    search_dirs: Vec<PathBuf>,

    /// Enable debug output
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins when set; --verbose otherwise raises the crate to debug
    let default_directive = if cli.verbose {
        "clrbindgen=debug"
    } else {
        "clrbindgen=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false),
        )
        .with(filter)
        .init();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Config::parse(&path.display().to_string(), &text)?
        }
        None => Config::open(),
    };

    let mut search_dirs = cli.search_dirs.clone();
    // Assemblies referenced by path make their directory a search root for their
    // dependencies
    for reference in &cli.assemblies {
        if let Some(parent) = PathBuf::from(reference).parent() {
            if parent.as_os_str().is_empty() || !parent.is_dir() {
                continue;
            }
            if !search_dirs.contains(&parent.to_path_buf()) {
                search_dirs.push(parent.to_path_buf());
            }
        }
    }

    let mut session = Session::new(
        config,
        &cli.output_dir,
        SessionOptions {
            shallow: cli.shallow,
            force: cli.force,
            search_dirs,
        },
    );
    for reference in &cli.assemblies {
        session.add_root(reference)?;
    }
    session.run()?;

    Ok(())
}
