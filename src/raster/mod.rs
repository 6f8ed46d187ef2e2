mod transform;

pub use transform::GeoTransform;

use std::{fs::File, io::BufReader, path::Path};

use anyhow::{anyhow, bail, ensure, Context, Result};
use geo::{BoundingRect, LineString, Polygon, Relate};
use ndarray::Array2;
use tiff::{decoder::{Decoder, DecodingResult}, tags::Tag};

/// Read-only gridded field used to compare a sliver with its neighbors.
#[derive(Debug, Clone)]
pub struct RasterContext {
    grid: Array2<f64>, // (row, col)
    transform: GeoTransform,
    crs: Option<String>,
    nodata: Option<f64>,
}

impl RasterContext {
    pub fn new(grid: Array2<f64>, transform: GeoTransform, crs: Option<String>, nodata: Option<f64>) -> Self {
        Self { grid, transform, crs, nodata }
    }

    #[inline] pub fn grid(&self) -> &Array2<f64> { &self.grid }

    #[inline] pub fn transform(&self) -> &GeoTransform { &self.transform }

    #[inline] pub fn crs(&self) -> Option<&str> { self.crs.as_deref() }

    #[inline] pub fn nodata(&self) -> Option<f64> { self.nodata }

    #[inline]
    fn is_valid(&self, value: f64) -> bool {
        !value.is_nan() && self.nodata.is_none_or(|nodata| value != nodata)
    }

    /// Outline of pixel `(row, col)` in map coordinates.
    fn cell_polygon(&self, row: usize, col: usize) -> Polygon<f64> {
        let (c, r) = (col as f64, row as f64);
        let corners = [(c, r), (c + 1.0, r), (c + 1.0, r + 1.0), (c, r + 1.0), (c, r)];
        Polygon::new(
            LineString::from(corners.iter().map(|&(c, r)| self.transform.to_geo(c, r)).collect::<Vec<_>>()),
            vec![],
        )
    }

    /// Inclusive pixel window `(rows, cols)` covering the bounding box of `polygon`.
    fn window(&self, polygon: &Polygon<f64>) -> Option<(std::ops::Range<usize>, std::ops::Range<usize>)> {
        let rect = polygon.bounding_rect()?;
        let (nrows, ncols) = self.grid.dim();
        if nrows == 0 || ncols == 0 { return None }

        let corners = [
            (rect.min().x, rect.min().y), (rect.max().x, rect.min().y),
            (rect.min().x, rect.max().y), (rect.max().x, rect.max().y),
        ];
        let pixels = corners.iter()
            .map(|&(x, y)| self.transform.to_pixel(x, y))
            .collect::<Option<Vec<_>>>()?;

        let col_lo = pixels.iter().map(|p| p.0).fold(f64::INFINITY, f64::min).floor();
        let col_hi = pixels.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max).floor();
        let row_lo = pixels.iter().map(|p| p.1).fold(f64::INFINITY, f64::min).floor();
        let row_hi = pixels.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max).floor();

        if col_hi < 0.0 || row_hi < 0.0 || col_lo >= ncols as f64 || row_lo >= nrows as f64 {
            return None;
        }

        let clamp = |v: f64, n: usize| (v.max(0.0) as usize).min(n - 1);
        Some((
            clamp(row_lo, nrows)..clamp(row_hi, nrows) + 1,
            clamp(col_lo, ncols)..clamp(col_hi, ncols) + 1,
        ))
    }

    /// Mean of all valid cells whose interior `polygon` reaches into, `None` if there are none.
    /// Cells that only share an edge or corner with the polygon are not counted.
    pub fn zonal_mean(&self, polygon: &Polygon<f64>) -> Option<f64> {
        let (rows, cols) = self.window(polygon)?;

        let (mut sum, mut count) = (0.0, 0usize);
        for row in rows {
            for col in cols.clone() {
                let value = self.grid[[row, col]];
                if !self.is_valid(value) { continue }
                let im = polygon.relate(&self.cell_polygon(row, col));
                if im.is_intersects() && !im.is_touches() {
                    sum += value;
                    count += 1;
                }
            }
        }

        (count > 0).then(|| sum / count as f64)
    }

    /// Fail when the layer and the raster name different EPSG reference systems.
    ///
    /// A side without a recognizable EPSG code is assumed to match.
    pub fn ensure_same_crs(&self, layer_crs: Option<&str>) -> Result<()> {
        if let (Some(layer), Some(raster)) = (layer_crs.and_then(epsg_code), self.crs().and_then(epsg_code)) {
            ensure!(layer == raster,
                "Layer CRS EPSG:{layer} does not match raster CRS EPSG:{raster}; reproject one of them first");
        }
        Ok(())
    }

    /// Load the first band of a GeoTIFF.
    ///
    /// The geotransform is taken from the ModelPixelScale/ModelTiepoint tags,
    /// the CRS from the GeoKey directory and the nodata value from the
    /// GDAL_NODATA tag, when present.
    pub fn from_geotiff(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open raster {}", path.display()))?;
        let mut decoder = Decoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to decode raster {}", path.display()))?;

        let (width, height) = decoder.dimensions()?;
        let (rows, cols) = (height as usize, width as usize);

        let values: Vec<f64> = match decoder.read_image()? {
            DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
            DecodingResult::F64(buf) => buf,
            _ => bail!("Unsupported pixel format in raster {}", path.display()),
        };
        ensure!(values.len() >= rows * cols,
            "Raster {} holds {} values for a {}x{} grid", path.display(), values.len(), rows, cols);

        // Multi-sample images are interleaved; keep the first sample of every pixel.
        let samples = values.len() / (rows * cols).max(1);
        let grid = Array2::from_shape_vec((rows, cols), values.into_iter().step_by(samples.max(1)).take(rows * cols).collect())?;

        let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(33550))
            .map_err(|_| anyhow!("Raster {} has no pixel scale tag", path.display()))?;
        let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(33922))
            .map_err(|_| anyhow!("Raster {} has no tiepoint tag", path.display()))?;
        ensure!(scale.len() >= 2 && tiepoint.len() >= 6,
            "Raster {} has malformed georeferencing tags", path.display());

        // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
        let transform = GeoTransform::new(
            tiepoint[3] - tiepoint[0] * scale[0],
            tiepoint[4] + tiepoint[1] * scale[1],
            scale[0],
            -scale[1],
        );

        let nodata = decoder.get_tag_ascii_string(Tag::from_u16_exhaustive(42113)).ok()
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

        let crs = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(34735)).ok()
            .and_then(|keys| crs_from_geokeys(&keys));

        Ok(Self { grid, transform, crs, nodata })
    }
}

/// `EPSG:nnnn` from a GeoKey directory, preferring the projected over the geographic system.
fn crs_from_geokeys(keys: &[u16]) -> Option<String> {
    const PROJECTED_CS_TYPE: u16 = 3072;
    const GEOGRAPHIC_TYPE: u16 = 2048;
    const USER_DEFINED: u16 = 32767;

    // header: [version, revision, minor, count], then [key, location, count, value] entries
    let count = usize::from(*keys.get(3)?);
    let entries = keys.get(4..)?.chunks_exact(4).take(count);
    let inline = |wanted: u16| entries.clone()
        .find(|e| e[0] == wanted && e[1] == 0 && e[3] != USER_DEFINED)
        .map(|e| e[3]);

    inline(PROJECTED_CS_TYPE).or_else(|| inline(GEOGRAPHIC_TYPE)).map(|code| format!("EPSG:{code}"))
}

/// EPSG code named by a CRS string: `EPSG:nnnn`, an OGC URN, or the outermost authority of a WKT.
pub(crate) fn epsg_code(crs: &str) -> Option<u32> {
    let upper = crs.to_ascii_uppercase();
    let digits = |s: &str| -> Option<u32> {
        s.trim_start_matches(|c: char| !c.is_ascii_digit())
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .and_then(|d| d.parse().ok())
    };

    if let Some(rest) = upper.trim().strip_prefix("EPSG:") {
        return digits(rest);
    }
    if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
        return upper.rsplit(':').next().and_then(|d| d.parse().ok());
    }
    upper.rfind("\"EPSG\"").and_then(|at| digits(&upper[at + 6..]))
}
