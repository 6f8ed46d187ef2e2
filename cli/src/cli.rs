use std::path::PathBuf;

/// Sliver elimination CLI (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "desliver", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Merge undersized polygons into their neighbors (.shp or .geojson)
    Simplify(SimplifyArgs),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum StagingArg {
    /// Hand quadrants to worker threads directly
    Memory,
    /// Exchange quadrants through temporary shapefiles
    Shapefile,
}

#[derive(clap::Args, Debug)]
pub struct SimplifyArgs {
    /// Input polygon layer
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    /// Output layer; the format follows the extension
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// JSON file with default settings; flags below take precedence
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Features smaller than this area (in CRS units) are merged away
    #[arg(short, long)]
    pub area_lim: Option<f64>,

    /// Category column(s) taken over from the chosen neighbor
    #[arg(short, long = "cat-col")]
    pub cat_cols: Vec<String>,

    /// Column(s) that must match for two features to merge
    #[arg(short, long = "keep-col")]
    pub keep_cols: Vec<String>,

    /// GeoTIFF used to pick the neighbor with the closest mean value
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub raster: Option<PathBuf>,

    /// Maximum number of scan/dissolve passes
    #[arg(long)]
    pub max_passes: Option<usize>,

    /// Raster mean differences within this distance count as a tie
    #[arg(long)]
    pub tie_epsilon: Option<f64>,

    /// Drop features with empty geometry
    #[arg(long)]
    pub drop_empty: bool,

    /// Split the layer into quadrants and simplify them in parallel first
    #[arg(short, long)]
    pub partition: bool,

    /// Width of the guard band along the quadrant edges (with --partition)
    #[arg(long)]
    pub dist_lim: Option<f64>,

    /// How quadrants travel between threads (with --partition)
    #[arg(long, value_enum)]
    pub staging: Option<StagingArg>,
}
