//! multicam CLI: offline reprojection and parameter-file tools.

use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
#[cfg(not(feature = "tracing"))]
use log::LevelFilter;
use multicam::reproject::{CameraRig, Dataset};
use multicam::{compose_extrinsics_files, reproject_dataset};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "multicam")]
#[command(about = "Multi-camera rig parameters and cross-view keypoint reprojection")]
#[command(version)]
struct Cli {
    /// Log debug messages.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Triangulate and reproject every capture of an annotation dataset.
    Reproject(ReprojectArgs),

    /// Compose two pairwise extrinsics files into the outer pair.
    Compose(ComposeArgs),

    /// Check that all parameter files of a rig exist and parse.
    CheckParams(CheckParamsArgs),
}

#[derive(Debug, Clone, Args)]
struct RigArgs {
    /// Directory with `Intrinsics_<camera>.json` files.
    #[arg(long)]
    intrinsics: PathBuf,

    /// Directory with `Extrinsics_<primary>_<camera>.json` files.
    #[arg(long)]
    extrinsics: PathBuf,

    /// Name of the primary camera.
    #[arg(long)]
    primary: String,
}

#[derive(Debug, Clone, Args)]
struct ReprojectArgs {
    /// Annotation dataset (JSON).
    #[arg(long)]
    dataset: PathBuf,

    #[command(flatten)]
    rig: RigArgs,

    /// Annotated views required before a bodypart is triangulated.
    #[arg(long, default_value_t = 2)]
    min_views: usize,

    /// Where to write the updated dataset.
    #[arg(long)]
    output: PathBuf,

    /// Where to write per-capture error statistics (JSON).
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ComposeArgs {
    /// `Extrinsics_<a>_<b>.json`.
    #[arg(long)]
    first: PathBuf,

    /// `Extrinsics_<b>_<c>.json`.
    #[arg(long)]
    second: PathBuf,

    /// Directory with the intrinsics of `a` and `c`.
    #[arg(long)]
    intrinsics: PathBuf,

    /// Directory receiving `Extrinsics_<a>_<c>.json`.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CheckParamsArgs {
    #[command(flatten)]
    rig: RigArgs,

    /// Camera names in rig order, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    cameras: Vec<String>,
}

fn init_logging(verbose: bool, json: bool) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        multicam::core::init_tracing(json, verbose);
        Ok(())
    }
    #[cfg(not(feature = "tracing"))]
    {
        let level = if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        multicam::core::init_with_level(level)?;
        if json {
            log::warn!("--log-json needs the `tracing` feature; using plain logs");
        }
        Ok(())
    }
}

fn load_rig(args: &RigArgs, cameras: &[String]) -> CliResult<CameraRig> {
    let primary = cameras
        .iter()
        .position(|c| *c == args.primary)
        .ok_or_else(|| format!("primary camera {} is not one of {cameras:?}", args.primary))?;
    Ok(CameraRig::load(
        &args.intrinsics,
        &args.extrinsics,
        cameras,
        primary,
    )?)
}

fn run_reproject(args: &ReprojectArgs) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("reproject", dataset = %args.dataset.display()).entered();

    let mut dataset = Dataset::load_json(&args.dataset)?;
    log::info!(
        "dataset: {} cameras, {} captures, {} entities, {} bodyparts",
        dataset.num_cameras(),
        dataset.num_captures(),
        dataset.entities().len(),
        dataset.bodyparts().len()
    );
    let cameras = dataset.camera_names().to_vec();
    let rig = load_rig(&args.rig, &cameras)?;
    let reports = reproject_dataset(&mut dataset, rig, args.min_views)?;

    dataset.write_json(&args.output)?;
    log::info!("dataset written to {}", args.output.display());
    if let Some(path) = &args.report {
        fs::write(path, serde_json::to_string_pretty(&reports)?)?;
        log::info!("report written to {}", path.display());
    }
    Ok(())
}

fn run_compose(args: &ComposeArgs) -> CliResult<()> {
    let (path, ext) =
        compose_extrinsics_files(&args.first, &args.second, &args.intrinsics, &args.output)?;
    println!("{} (baseline {:.3})", path.display(), ext.t.norm());
    Ok(())
}

fn run_check_params(args: &CheckParamsArgs) -> CliResult<()> {
    let rig = load_rig(&args.rig, &args.cameras)?;
    for cam in rig.cameras() {
        let center = cam.pose.inverse().translation.vector;
        println!(
            "{:<16} fx {:>10.3} fy {:>10.3} center [{:.3}, {:.3}, {:.3}]",
            cam.name,
            cam.intrinsics.fx(),
            cam.intrinsics.fy(),
            center.x,
            center.y,
            center.z
        );
    }
    println!("ok: {} cameras, primary {}", rig.len(), args.rig.primary);
    Ok(())
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json)?;

    match cli.command {
        Commands::Reproject(args) => run_reproject(&args),
        Commands::Compose(args) => run_compose(&args),
        Commands::CheckParams(args) => run_check_params(&args),
    }
}
