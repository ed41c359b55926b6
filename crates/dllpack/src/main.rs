use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dllpack::{
    bundler::build_application,
    config::Config,
    mock::{MockGenerator, Template},
    vendor::build_vendor,
    watch::WatchLoop,
};
use log::{LevelFilter, error, info};

#[derive(Parser, Debug)]
#[command(
    name = "dllpack",
    version,
    about = "JavaScript bundler with DLL-style vendor splitting"
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (defaults to the nearest dllpack.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the vendor library bundle and its manifest
    Vendor {
        /// Package to include; replaces the configured list when given
        #[arg(long = "vendor", value_name = "NAME")]
        packages: Vec<String>,

        /// Global name of the library bundle
        #[arg(long)]
        library: Option<String>,

        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Output directory
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Bundle the application, delegating vendor modules to the library bundle
    Build {
        #[arg(long)]
        entry: Option<PathBuf>,

        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Output directory
        #[arg(long)]
        out: Option<PathBuf>,

        /// Compile every module locally, ignoring the manifest
        #[arg(long)]
        no_manifest: bool,
    },

    /// Recompile changed files from a source directory into an output directory
    Watch {
        #[arg(long)]
        dir: Option<PathBuf>,

        #[arg(long)]
        out: Option<PathBuf>,

        /// Glob of files to compile, relative to the source directory
        #[arg(long)]
        pattern: Option<String>,

        /// Skip compiling existing files on startup
        #[arg(long)]
        no_initial: bool,

        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
    },

    /// Generate mock data from a template
    Mock {
        /// JSON template file
        #[arg(long)]
        template: PathBuf,

        /// Seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins over `-v` when set
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Vendor {
            packages,
            library,
            manifest,
            out,
        } => {
            if !packages.is_empty() {
                config.vendor = packages;
            }
            override_with(&mut config.library, library);
            override_with(&mut config.manifest, manifest);
            override_with(&mut config.output_dir, out);

            let output = build_vendor(&config.vendor_config()?).context("vendor build failed")?;
            info!(
                "Vendor bundle ready: {} ({} manifest entries)",
                output.bundle_path.display(),
                output.manifest.len()
            );
        }
        Command::Build {
            entry,
            manifest,
            out,
            no_manifest,
        } => {
            override_with(&mut config.entry, entry);
            override_with(&mut config.manifest, manifest);
            override_with(&mut config.output_dir, out);
            if no_manifest {
                config.use_manifest = false;
            }

            build_application(&config.build_config()?).context("application build failed")?;
        }
        Command::Watch {
            dir,
            out,
            pattern,
            no_initial,
            interval_ms,
        } => {
            override_with(&mut config.watch_dir, dir);
            override_with(&mut config.watch_out, out);
            override_with(&mut config.watch_pattern, pattern);
            override_with(&mut config.poll_interval, interval_ms.map(Duration::from_millis));

            let mut watch = WatchLoop::new(&config.watch_config())?;
            if !no_initial {
                watch.compile_all();
            }
            let mut watcher = watch.watcher();
            info!(
                "Watching {} for changes",
                config.watch_dir.display()
            );
            watch.run(&mut watcher);
        }
        Command::Mock { template, seed } => {
            let text = fs::read_to_string(&template)
                .with_context(|| format!("failed to read template {}", template.display()))?;
            let template = Template::parse(&text)
                .with_context(|| format!("invalid mock template {}", template.display()))?;
            let seed = seed.unwrap_or_else(rand::random);
            info!("Generating mock data with seed {seed}");

            let value = MockGenerator::new(seed).generate(&template);
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, &value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

fn override_with<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
