//! RivGis CLI - distributed river routing over a DTM

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rivgis_core::io::{read_geotiff, write_geotiff};
use rivgis_core::Raster;
use rivgis_rivflow::basin::basin_share;
use rivgis_rivflow::engine::{self, SimulationInputs};
use rivgis_rivflow::flux::{FluxFiles, WithdrawalFiles, WithdrawalSource};
use rivgis_rivflow::report::RunReporter;
use rivgis_rivflow::topology::DrainageTopology;
use rivgis_rivflow::SimulationConfig;

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "rivgis")]
#[command(author, version, about = "Distributed river routing", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Derive flow directions and gradients from a DTM
    Topology {
        /// Input DTM file
        input: PathBuf,
        /// Output flow-direction grid
        #[arg(long)]
        direction: PathBuf,
        /// Output gradient grid
        #[arg(long)]
        gradient: PathBuf,
        /// Optional main-channel mask
        #[arg(long)]
        channel: Option<PathBuf>,
    },
    /// Label every cell with the channel cell its flow path reaches
    Basin {
        /// Input DTM file
        input: PathBuf,
        /// Main-channel mask, nonzero on channel cells
        #[arg(long)]
        channel: PathBuf,
        /// Output basin-share grid
        #[arg(long)]
        share: PathBuf,
        /// Output inflow-cell weight grid
        #[arg(long)]
        weights: Option<PathBuf>,
    },
    /// Run a routing simulation
    Simulate {
        /// Simulation configuration (JSON)
        #[arg(long)]
        config: PathBuf,
        /// Input DTM file
        #[arg(long)]
        dtm: PathBuf,
        /// Main-channel mask
        #[arg(long)]
        channel: Option<PathBuf>,
        /// Static withdrawal grid, mm/s per cell
        #[arg(long)]
        withdrawal_grid: Option<PathBuf>,
        /// Directory holding the daily flux grids
        #[arg(long)]
        flux_dir: PathBuf,
        /// Directory holding the monthly demand grids
        #[arg(long)]
        demand_dir: Option<PathBuf>,
        /// Last year the demand data covers
        #[arg(long, default_value = "2000")]
        demand_last_year: i32,
        /// Base directory for the timestamped run directory
        #[arg(long, default_value = "runs")]
        output: PathBuf,
        /// Cascade cache to warm-start from
        #[arg(long)]
        cache_in: Option<PathBuf>,
        /// Where to save the cascade cache
        #[arg(long)]
        cache_out: Option<PathBuf>,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_dem(path: &PathBuf) -> Result<Raster<f64>> {
    let pb = spinner("Reading raster...");
    let raster: Raster<f64> = read_geotiff(path).context("Failed to read raster")?;
    pb.finish_and_clear();
    info!("Input: {} x {}", raster.cols(), raster.rows());
    Ok(raster)
}

fn write_result<T: rivgis_core::RasterElement>(raster: &Raster<T>, path: &PathBuf) -> Result<()> {
    let pb = spinner("Writing output...");
    write_geotiff(raster, path).context("Failed to write output")?;
    pb.finish_and_clear();
    Ok(())
}

fn done(name: &str, path: &PathBuf, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let raster = read_dem(&input)?;
            let (rows, cols) = raster.shape();
            let bounds = raster.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.cell_size());
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / raster.len() as f64
            );
        }

        // ── Topology ─────────────────────────────────────────────────
        Commands::Topology {
            input,
            direction,
            gradient,
            channel,
        } => {
            let dtm = read_dem(&input)?;
            let mask = channel.as_ref().map(read_dem).transpose()?;

            let start = Instant::now();
            let topo = DrainageTopology::derive(&dtm, mask.as_ref());
            let elapsed = start.elapsed();

            write_result(&topo.direction, &direction)?;
            write_result(&topo.gradient, &gradient)?;
            done("Topology", &gradient, elapsed);
        }

        // ── Basin ────────────────────────────────────────────────────
        Commands::Basin {
            input,
            channel,
            share,
            weights,
        } => {
            let dtm = read_dem(&input)?;
            let mask = read_dem(&channel)?;

            let start = Instant::now();
            let topo = DrainageTopology::derive(&dtm, Some(&mask));
            let labels = basin_share(&dtm, &topo, &mask)?;
            let elapsed = start.elapsed();

            write_result(&labels.share, &share)?;
            if let Some(path) = weights {
                write_result(&labels.inflow_cells, &path)?;
            }
            done("Basin share", &share, elapsed);
        }

        // ── Simulate ─────────────────────────────────────────────────
        Commands::Simulate {
            config,
            dtm,
            channel,
            withdrawal_grid,
            flux_dir,
            demand_dir,
            demand_last_year,
            output,
            cache_in,
            cache_out,
        } => {
            let text = std::fs::read_to_string(&config)
                .with_context(|| format!("Failed to read {}", config.display()))?;
            let config: SimulationConfig =
                serde_json::from_str(&text).context("Failed to parse configuration")?;

            let mut inputs = SimulationInputs::new(read_dem(&dtm)?);
            inputs.channel = channel.as_ref().map(read_dem).transpose()?;
            inputs.static_withdrawal = withdrawal_grid.as_ref().map(read_dem).transpose()?;
            inputs.cache_in = cache_in;
            inputs.cache_out = cache_out;

            let mut flux = FluxFiles::new(&flux_dir);
            let mut demand = demand_dir.map(|dir| WithdrawalFiles::new(dir, demand_last_year));

            let mut reporter = RunReporter::create(&output)?;
            info!("Run directory: {}", reporter.root().display());

            let start = Instant::now();
            let out = engine::run(
                &config,
                &inputs,
                &mut flux,
                demand.as_mut().map(|d| d as &mut dyn WithdrawalSource),
                Some(&mut reporter),
                None,
            )?;
            let elapsed = start.elapsed();

            println!("Simulated {} days in {:.2?}", out.days_run, elapsed);
            println!("  Step length: {:.1} s", out.plan.step_seconds);
            println!("  Total inflow: {:.1} m3", out.balance.system.total_in());
            println!(
                "  Withdrawn: {:.1} m3",
                out.balance.system.total_withdrawn()
            );
            println!("  Recoverable faults: {}", out.faults.total());
            println!("Reports in: {}", reporter.root().display());
        }
    }

    Ok(())
}
