//! rtbuild CLI - parallel run-test build orchestrator.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use rtbuild::config::{self, Config};
use rtbuild::mode::BuildMode;
use rtbuild::pipeline::{BuildRequest, Pipeline};
use rtbuild::report::{ConsoleReporter, JUnitReporter, MultiReporter};
use rtbuild::testcase::{self, TestSelection};

const DEFAULT_CONFIG: &str = "rtbuild.toml";

#[derive(Parser)]
#[command(name = "rtbuild")]
#[command(about = "Parallel run-test build orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: rtbuild.toml, if present]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which tests and modes to build.
#[derive(Args, Debug, Clone)]
struct SelectionArgs {
    /// Build mode; repeat for several. Default: host, target and jvm
    #[arg(short, long = "mode", value_enum)]
    modes: Vec<BuildMode>,

    /// Only tests whose numeric prefix ends with this shard; repeatable
    #[arg(long = "shard")]
    shards: Vec<String>,

    /// Only this test; repeatable
    #[arg(short, long = "test")]
    tests: Vec<String>,

    /// Root of the source tree
    #[arg(long)]
    build_top: Option<PathBuf>,

    /// Do not read the known-failures table; build every pair
    #[arg(long)]
    no_known_failures: bool,
}

impl SelectionArgs {
    fn selection(&self) -> TestSelection {
        TestSelection {
            shards: self.shards.clone(),
            ids: self.tests.clone(),
        }
    }

    fn modes(&self) -> &[BuildMode] {
        if self.modes.is_empty() {
            &BuildMode::ALL
        } else {
            &self.modes
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage, build and package the selected tests
    Build {
        /// Destination artifact path
        #[arg(short, long)]
        out: PathBuf,

        #[command(flatten)]
        select: SelectionArgs,

        /// Boot classpath jars, separated by the platform path separator
        #[arg(long)]
        bootclasspath: Option<String>,

        /// Maximum number of parallel builds
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Keep building after a failure to report every failing job
        #[arg(short, long)]
        keep_going: bool,

        /// Print build output as it is produced
        #[arg(long)]
        stream: bool,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Scratch directory for the run (SBOX_PATH)
        #[arg(long)]
        sandbox: Option<PathBuf>,
    },

    /// Show the jobs a build would run
    List {
        #[command(flatten)]
        select: SelectionArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Validate configuration and the known-failures table
    Validate,

    /// Initialize a new configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG takes precedence over --verbose.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Build {
            out,
            select,
            bootclasspath,
            jobs,
            keep_going,
            stream,
            junit,
            sandbox,
        } => {
            let mut config = load(cli.config.as_deref())?;
            apply_selection_overrides(&mut config, &select);
            if let Some(jars) = bootclasspath {
                config.toolchain.bootclasspath = std::env::split_paths(&jars).collect();
            }
            if let Some(jobs) = jobs {
                config.build.max_parallel = Some(jobs);
            }
            if let Some(sandbox) = sandbox {
                config.build.sandbox_dir = sandbox;
            }
            config.build.keep_going |= keep_going;
            config.build.stream_output |= stream;
            config.validate().context("Invalid command line overrides")?;

            build(config, &select, out, junit, cli.verbose).await
        }
        Commands::List { select, format } => {
            let mut config = load(cli.config.as_deref())?;
            apply_selection_overrides(&mut config, &select);
            list(config, &select, format)
        }
        Commands::Validate => validate(cli.config.as_deref()),
        Commands::Init => init_config(),
    }
}

/// Loads the configuration file, falling back to defaults when no path was
/// given and `rtbuild.toml` does not exist.
fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => {
            info!("No {} found, using defaults", DEFAULT_CONFIG);
            Ok(Config::default())
        }
    }
}

fn apply_selection_overrides(config: &mut Config, select: &SelectionArgs) {
    if let Some(build_top) = &select.build_top {
        config.build.build_top = build_top.clone();
    }
    if select.no_known_failures {
        config.build.known_failures = None;
    }
}

async fn build(
    config: Config,
    select: &SelectionArgs,
    out: PathBuf,
    junit: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    let junit = junit.or_else(|| config.report.junit.as_deref().map(|p| config.resolve(p)));
    let pipeline = Pipeline::new(config)?;

    let mut reporter = MultiReporter::new().with_reporter(ConsoleReporter::new(verbose));
    if let Some(path) = junit {
        reporter = reporter.with_reporter(JUnitReporter::new(path));
    }

    let request = BuildRequest {
        modes: select.modes().to_vec(),
        selection: select.selection(),
        out,
    };
    let outcome = pipeline.build(&request, reporter).await?;

    if let Some(artifact) = &outcome.artifact {
        println!();
        println!(
            "{} {} ({} bytes)",
            console::style("Wrote").green().bold(),
            artifact.path.display(),
            artifact.size
        );
        println!("  sha256 {}", artifact.sha256);
    }

    std::process::exit(outcome.exit_code());
}

fn list(config: Config, select: &SelectionArgs, format: Format) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let plan = pipeline.plan(select.modes(), &select.selection())?;

    match format {
        Format::Json => {
            let json = serde_json::to_string_pretty(&plan)?;
            println!("{}", json);
        }
        Format::Text => {
            println!("Planned {} builds:", plan.jobs.len());
            for job in &plan.jobs {
                println!("  {}", job.id());
            }
            if !plan.skipped.is_empty() {
                println!();
                println!("Skipped as known build failures:");
                for job in &plan.skipped {
                    println!("  {}", job);
                }
            }
        }
    }

    Ok(())
}

fn validate(config_path: Option<&Path>) -> Result<()> {
    let config = match load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Known failures error: {}", e);
            std::process::exit(1);
        }
    };
    let config = pipeline.config();

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!("  Build top:      {}", config.build_top().display());
    println!("  Tests dir:      {}", config.tests_dir().display());
    println!("  Sandbox:        {}", config.sandbox_root().display());
    println!("  Max parallel:   {}", config.max_parallel());
    println!("  Keep going:     {}", config.build.keep_going);
    println!("  Env policy:     {:?}", config.build.env_policy);
    println!("  Known failures: {} rules", pipeline.known_failures().len());

    match testcase::discover(&config.tests_dir()) {
        Ok(tests) => println!("  Tests:          {}", tests.len()),
        Err(e) => println!("  Tests:          {}", console::style(e).yellow()),
    }

    Ok(())
}

fn init_config() -> Result<()> {
    let config = r#"# rtbuild configuration file

[build]
build_top = "."
tests_dir = "art/test"
default_scripts_dir = "art/test/etc"
# Set to "" to build every pair
known_failures = "art/test/buildfailures.json"
sandbox_dir = "out/rtbuild/sbox"
# max_parallel = 16
keep_going = false
env_policy = "inherit"

[toolchain]
java_home = "prebuilts/jdk/jdk11/linux-x86"
tools_dir = "out/host/linux-x86/bin"
bootclasspath = []

[package.archiver]
type = "external"
command = "{soong_zip} -o {out} -C {root} -D {root}"

[report]
# junit = "out/rtbuild/junit.xml"
"#;

    let path = PathBuf::from(DEFAULT_CONFIG);
    if path.exists() {
        eprintln!("{} already exists. Remove it first or edit manually.", DEFAULT_CONFIG);
        std::process::exit(1);
    }

    std::fs::write(&path, config)?;
    println!("Created {}", DEFAULT_CONFIG);
    println!();
    println!("Edit the configuration as needed, then run:");
    println!("  rtbuild build --out out/run-tests.zip");

    Ok(())
}
