extern crate clap;

use std::path::PathBuf;

use clap::Parser;
use rayon::ThreadPoolBuilder;

use meander::batch::run_batch;
use meander::config::PipelineConfig;
use meander::error::{MigrationError, Result};
use meander::imagery::{GeoTiffImagery, ImageryKind};
use meander::network::{group_segments, read_nodes_geojson};
use meander::pipeline::SegmentContext;
use meander::raster::Raster;
use meander::sink::CsvSink;

#[derive(Parser)]
struct Opts {
    /// GeoJSON FeatureCollection of centerline nodes
    nodes: PathBuf,

    /// GeoTIFF of node ids defining the working grid
    node_raster: PathBuf,

    /// Directory of yearly classified rasters named <year>.tif
    imagery_dir: PathBuf,

    /// Output CSV of per-node records
    output: PathBuf,

    /// JSON run configuration; flags below override it
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Number of CPU threads
    #[clap(short, long, default_value = "4")]
    ncpu: usize,

    /// Imagery semantics
    #[clap(long, value_enum)]
    imagery_kind: Option<ImageryKind>,

    /// First year of the first epoch
    #[clap(long)]
    year1: Option<i32>,

    /// Years between the two epochs
    #[clap(long)]
    dt: Option<i32>,

    /// Extra years averaged into each epoch
    #[clap(long)]
    avg_window: Option<i32>,

    /// Segments processed at the same time
    #[clap(long)]
    max_concurrent: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();

    ThreadPoolBuilder::new()
        .num_threads(opts.ncpu)
        .build_global()
        .map_err(|e| error_stack::Report::new(MigrationError::ResourceExceeded)
            .attach_printable(format!("thread pool: {e}")))?;

    let mut config = match &opts.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(kind) = opts.imagery_kind {
        config.imagery_kind = kind;
    }
    config.year1 = opts.year1.unwrap_or(config.year1);
    config.dt = opts.dt.unwrap_or(config.dt);
    config.avg_window = opts.avg_window.unwrap_or(config.avg_window);
    config.max_concurrent = opts.max_concurrent.unwrap_or(config.max_concurrent);
    config.validate()?;
    log::info!("configuration: {:?}", config);

    let nodes = read_nodes_geojson(&opts.nodes)?;
    let segments = group_segments(&nodes, config.width_buffer)?;
    log::info!("{} nodes in {} reaches", nodes.len(), segments.len());

    let node_raster = Raster::<f64>::read(&opts.node_raster)?;
    let imagery = GeoTiffImagery::new(config.imagery_kind, &opts.imagery_dir);
    let ctx = SegmentContext { config: &config, node_raster: &node_raster, imagery: &imagery };

    let mut sink = CsvSink::create(&opts.output)?;
    let report = run_batch(&ctx, &segments, &config.reach_filter(), config.max_concurrent, &mut sink)?;

    let failed = report.failed();
    for (reach_id, error) in &failed {
        log::error!("reach {reach_id}: {error}");
    }
    log::info!(
        "{} rows written to {}, {} reaches complete, {} failed, {} skipped",
        sink.rows_written, opts.output.display(), report.completed(), failed.len(), report.skipped.len());
    if !failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
