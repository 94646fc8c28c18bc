//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "geoengine")]
#[command(version)]
#[command(about = "Build and run containerized geospatial workers", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a geoengine.yaml in the current directory
    Init(InitArgs),
    /// Register a worker, or update its registration after a rename or move
    Apply(WorkerTarget),
    /// Remove a worker's registration and build record
    Delete(WorkerTarget),
    /// List registered workers
    Workers(WorkersArgs),
    /// Show a worker's manifest and build state
    Describe(DescribeArgs),
    /// Compare tracked files against the last build
    Diff(DiffArgs),
    /// Build a worker's image if its content or version changed
    Build(BuildArgs),
    /// Run a worker's command in a container
    Run(RunArgs),
    /// Serve the job queue HTTP API used by GIS plugins
    Serve(ServeArgs),
    /// Manage local worker images
    #[command(subcommand)]
    Image(ImageCommand),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Worker name; defaults to the directory name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Overwrite an existing geoengine.yaml
    #[arg(long)]
    pub force: bool,
}

/// A worker given by registered name or directory path; the current
/// directory when omitted.
#[derive(Debug, Args)]
pub struct WorkerTarget {
    /// Worker name or path to a worker directory
    pub worker: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GisHost {
    Arcgis,
    Qgis,
}

#[derive(Debug, Args)]
pub struct WorkersArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Only workers enabled for this GIS host
    #[arg(long, value_enum)]
    pub gis: Option<GisHost>,
}

#[derive(Debug, Args)]
pub struct DescribeArgs {
    #[command(flatten)]
    pub target: WorkerTarget,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Which tracked files `diff` compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum DiffScope {
    #[default]
    All,
    /// geoengine.yaml (build-relevant fields)
    #[value(aliases = ["yaml", "config"])]
    Manifest,
    #[value(alias = "docker")]
    Dockerfile,
    /// The command script
    #[value(alias = "command")]
    Script,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    #[command(flatten)]
    pub target: WorkerTarget,

    /// Files to compare
    #[arg(short, long, value_enum, default_value_t = DiffScope::All)]
    pub file: DiffScope,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub target: WorkerTarget,

    /// Always rebuild, without the image cache
    #[arg(long)]
    pub no_cache: bool,

    /// Build the development image (no version bump required)
    #[arg(long)]
    pub dev: bool,

    /// Build arguments, overriding build.args
    #[arg(long = "build-arg", value_name = "KEY=VALUE")]
    pub build_args: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Worker name or path; defaults to the current directory
    pub worker: Option<String>,

    /// Input values
    #[arg(short, long = "input", value_name = "KEY=VALUE")]
    pub inputs: Vec<String>,

    /// Host directory mounted at /output
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Print a JSON result on stdout; container output goes to stderr
    #[arg(long)]
    pub json: bool,

    /// Run the development image
    #[arg(long)]
    pub dev: bool,

    /// Extra arguments appended to the container command
    #[arg(last = true)]
    pub args: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Bind address (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port (overrides PORT and settings)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Concurrent job limit (overrides MAX_WORKERS and settings)
    #[arg(long)]
    pub max_workers: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum ImageCommand {
    /// Load an image archive, e.g. one written by `docker save` on another host
    Import {
        /// Path to the image tar archive
        archive: PathBuf,

        /// Extra tag for the imported image
        #[arg(short, long)]
        tag: Option<String>,
    },
    /// List GeoEngine worker images
    List {
        /// Only images whose tag contains this text
        #[arg(short, long)]
        filter: Option<String>,

        /// Include images not built by GeoEngine
        #[arg(short, long)]
        all: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an image by tag or id
    #[command(alias = "rm")]
    Remove {
        image: String,

        /// Remove even if containers use the image
        #[arg(short, long)]
        force: bool,
    },
}
