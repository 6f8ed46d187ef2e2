use std::path::Path;

use anyhow::{Context, Result};
use desliver::{
    read_layer, simplify, simplify_partitioned, write_layer,
    PartitionConfig, RasterContext, SimplifyConfig, SimplifyReport, Staging,
};
use serde::Deserialize;

use crate::cli::{Cli, SimplifyArgs, StagingArg};

/// Layout of the `--config` file: engine settings at the top level, plus an optional partition block.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    #[serde(flatten)]
    simplify: SimplifyConfig,
    partition: Option<PartitionConfig>,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else { return Ok(Self::default()) };
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Overlay explicit command line flags.
    fn merge(mut self, args: &SimplifyArgs) -> Self {
        let config = &mut self.simplify;
        if let Some(area_lim) = args.area_lim { config.area_lim = area_lim }
        if !args.cat_cols.is_empty() { config.cat_cols = args.cat_cols.clone() }
        if !args.keep_cols.is_empty() { config.keep_cols = args.keep_cols.clone() }
        if let Some(max_passes) = args.max_passes { config.max_passes = max_passes }
        if let Some(tie_epsilon) = args.tie_epsilon { config.tie_epsilon = tie_epsilon }
        if args.drop_empty { config.drop_empty = true }

        if args.partition || args.dist_lim.is_some() || args.staging.is_some() {
            let partition = self.partition.get_or_insert_with(PartitionConfig::default);
            if let Some(dist_lim) = args.dist_lim { partition.dist_lim = dist_lim }
            if let Some(staging) = args.staging {
                partition.staging = match staging {
                    StagingArg::Memory => Staging::InMemory,
                    StagingArg::Shapefile => Staging::Shapefile,
                };
            }
        }
        self
    }
}

fn print_report(label: &str, report: &SimplifyReport) {
    println!(
        "[simplify] {label}: {} -> {} features in {} passes ({} slivers left)",
        report.input_features, report.output_features, report.passes, report.remaining_slivers,
    );
}

pub fn run(_cli: &Cli, args: &SimplifyArgs) -> Result<()> {
    let FileConfig { simplify: config, partition } = FileConfig::load(args.config.as_deref())?.merge(args);

    println!("[simplify] loading layer from {}", args.input.display());
    let layer = read_layer(&args.input)?;

    let raster = args.raster.as_deref()
        .map(|path| {
            println!("[simplify] loading raster from {}", path.display());
            RasterContext::from_geotiff(path)
        })
        .transpose()?;

    let output = match &partition {
        None => {
            let (output, report) = simplify(&layer, &config, raster.as_ref())?;
            print_report("result", &report);
            output
        }
        Some(partition) => {
            println!("[simplify] partitioning with guard band {}", partition.dist_lim);
            let (output, report) = simplify_partitioned(&layer, &config, partition, raster.as_ref())?;
            for (i, quadrant) in report.quadrants.iter().enumerate() {
                print_report(&format!("quadrant {i}"), quadrant);
            }
            println!("[simplify] {} features deferred to the final pass", report.deferred);
            print_report("final pass", &report.global);
            output
        }
    };

    println!("[simplify] writing layer to {}", args.output.display());
    write_layer(&args.output, &output)?;

    Ok(())
}
