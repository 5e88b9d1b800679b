//! Command-line front end for the static asset pipeline.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use static_fingerprint::{
    ContentKind, Pipeline, PipelineConfig, ProcessOptions, ReferenceRewriter, remove_artifacts,
};
use tracing_subscriber::EnvFilter;

/// Fingerprint, combine and optimize static web assets
#[derive(Parser)]
#[command(name = "static-fingerprint")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ./static_fingerprint.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Source root, highest priority first; replaces the configured roots
    #[arg(long = "root", global = true)]
    roots: Vec<PathBuf>,

    /// Directory artifacts are written to
    #[arg(long, global = true)]
    output_root: Option<PathBuf>,

    /// Re-check source modification times on every lookup
    #[arg(long, global = true)]
    strict: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fingerprinted reference for one or more references
    Process {
        /// References; `a.js; b.js` lists are accepted
        #[arg(required = true)]
        references: Vec<String>,

        /// Run the optimizer over scripts and stylesheets
        #[arg(long)]
        optimize: bool,

        /// Merge all references into one artifact
        #[arg(long)]
        combine: bool,

        /// Copy unmodified files instead of linking them
        #[arg(long)]
        copy: bool,
    },

    /// Rewrite asset references in an HTML fragment and print the result
    Rewrite {
        /// Markup file to read (default: stdin)
        file: Option<PathBuf>,

        /// Run the optimizer over scripts and stylesheets
        #[arg(long)]
        optimize: bool,

        /// Copy unmodified files instead of linking them
        #[arg(long)]
        copy: bool,
    },

    /// Optimize an inline block of script or stylesheet content and print it
    Slim {
        /// Content file to read (default: stdin)
        file: Option<PathBuf>,

        /// Content kind (`css`, `js`); guessed from the content when omitted
        #[arg(long, value_parser = parse_kind)]
        kind: Option<ContentKind>,
    },

    /// Delete fingerprinted artifacts below a directory
    Clean {
        /// Directory to clean
        dir: PathBuf,

        /// Only list what would be deleted
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Process {
            references,
            optimize,
            combine,
            copy,
        } => {
            let pipeline = Pipeline::new(load_config(&cli, true)?);
            let options = ProcessOptions {
                combine: *combine,
                optimize: *optimize,
                prefer_symlink: !*copy,
                warn_if_missing: true,
            };
            cmd_process(&pipeline, references, options)
        }
        Commands::Rewrite {
            file,
            optimize,
            copy,
        } => {
            let pipeline = Pipeline::new(load_config(&cli, true)?);
            let options = ProcessOptions {
                optimize: *optimize,
                prefer_symlink: !*copy,
                ..ProcessOptions::static_file()
            };
            cmd_rewrite(&pipeline, file.as_ref(), options)
        }
        Commands::Slim { file, kind } => {
            let pipeline = Pipeline::new(load_config(&cli, false)?);
            cmd_slim(&pipeline, file.as_ref(), *kind)
        }
        Commands::Clean { dir, dry_run } => cmd_clean(dir, *dry_run),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .init();
}

fn load_config(cli: &Cli, needs_roots: bool) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().context("failed to read the working directory")?;
            PipelineConfig::discover(&cwd)
                .with_context(|| format!("failed to load configuration from {}", cwd.display()))?
        }
    };

    if !cli.roots.is_empty() {
        config.source_roots = cli.roots.clone();
    }
    if let Some(output_root) = &cli.output_root {
        config.output_root = Some(output_root.clone());
    }
    if cli.strict {
        config.strict_mode = true;
    }
    if needs_roots && config.source_roots.is_empty() {
        bail!("no source roots configured; pass --root or set source_roots");
    }

    Ok(config)
}

fn cmd_process(pipeline: &Pipeline, references: &[String], options: ProcessOptions) -> Result<()> {
    let references: Vec<&str> = references
        .iter()
        .flat_map(|reference| reference.split(';'))
        .map(str::trim)
        .filter(|reference| !reference.is_empty())
        .collect();

    let output = pipeline
        .process(&references, options)
        .with_context(|| format!("failed to process {}", references.join(";")))?;
    println!("{output}");
    Ok(())
}

fn parse_kind(name: &str) -> Result<ContentKind, String> {
    ContentKind::from_name(name).ok_or_else(|| format!("unknown content kind `{name}`"))
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
        }
        None => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .context("failed to read stdin")?;
            Ok(input)
        }
    }
}

fn cmd_rewrite(
    pipeline: &Pipeline,
    file: Option<&PathBuf>,
    options: ProcessOptions,
) -> Result<()> {
    let markup = read_input(file)?;
    let rewritten = ReferenceRewriter::new(pipeline)
        .rewrite_block(&markup, options)
        .context("failed to rewrite markup")?;
    print!("{rewritten}");
    Ok(())
}

fn cmd_slim(pipeline: &Pipeline, file: Option<&PathBuf>, kind: Option<ContentKind>) -> Result<()> {
    let content = read_input(file)?;
    let optimized = pipeline
        .optimize_content(kind, &content)
        .context("failed to optimize content")?;
    println!("{optimized}");
    Ok(())
}

fn cmd_clean(dir: &PathBuf, dry_run: bool) -> Result<()> {
    let removed = remove_artifacts(dir, dry_run)
        .with_context(|| format!("failed to clean {}", dir.display()))?;
    for path in &removed {
        println!("{}", path.display());
    }
    tracing::info!(count = removed.len(), dry_run, "cleaned artifacts");
    Ok(())
}
