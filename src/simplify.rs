use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::{
    collection::FeatureCollection,
    config::SimplifyConfig,
    neighbor::Resolver,
    raster::RasterContext,
    report::{SimplifyReport, Warning},
    store::FeatureStore,
};

/// Stage of the scan/dissolve loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Scanning,
    Dissolving,
    Converged,
}

/// Merges undersized features into neighbors until a fixed point is reached.
#[derive(Debug, Clone, Copy)]
pub struct Simplifier<'a> {
    config: &'a SimplifyConfig,
    raster: Option<&'a RasterContext>,
}

impl<'a> Simplifier<'a> {
    pub fn new(config: &'a SimplifyConfig, raster: Option<&'a RasterContext>) -> Self {
        Self { config, raster }
    }

    /// Positions of all features below the area limit, smallest first (ties by id).
    fn undersized(&self, store: &FeatureStore) -> Vec<usize> {
        let areas = store.areas();
        let mut slivers = store.filter(|f| areas[f.id.0 as usize] < self.config.area_lim);
        slivers.sort_by(|&a, &b| areas[a].total_cmp(&areas[b])
            .then_with(|| store.feature(a).id.cmp(&store.feature(b).id)));
        slivers
    }

    /// Run the engine over `input`.
    pub fn run(&self, input: &FeatureCollection) -> Result<(FeatureCollection, SimplifyReport)> {
        let (cat, keep) = self.config.validate(&input.schema)?;
        if let Some(pos) = input.records.iter().position(|r| r.attrs.len() != input.schema.len()) {
            bail!("Record {pos} has {} attribute values but the schema has {} columns",
                input.records[pos].attrs.len(), input.schema.len());
        }
        if let Some(raster) = self.raster {
            raster.ensure_same_crs(input.crs.as_deref())?;
        }
        let dissolve_by = cat.iter().chain(&keep).copied().collect::<Vec<_>>();
        let resolver = Resolver {
            cat: &cat,
            keep: &keep,
            dissolve_by: &dissolve_by,
            raster: self.raster,
            tie_epsilon: self.config.tie_epsilon,
        };

        let mut store = FeatureStore::from_collection(input);
        if self.config.drop_empty { store = store.drop_empty() }

        let mut report = SimplifyReport { input_features: store.len(), ..Default::default() };
        let mut count_before = store.len();
        let mut phase = Phase::Scanning;

        while phase != Phase::Converged {
            phase = match phase {
                Phase::Scanning => {
                    let slivers = self.undersized(&store);
                    if slivers.is_empty() { break }
                    if report.passes == self.config.max_passes {
                        report.warnings.push(Warning::NotConverged { passes: report.passes });
                        break;
                    }
                    report.passes += 1;

                    let mut merged = 0;
                    for &pos in &slivers {
                        if let Some(key) = resolver.resolve(&store, pos) {
                            store.rewrite(pos, &cat, &key);
                            merged += 1;
                        }
                    }
                    debug!(pass = report.passes, slivers = slivers.len(), merged, "scan finished");

                    count_before = store.len();
                    Phase::Dissolving
                }
                Phase::Dissolving => {
                    store = store.dissolve(&dissolve_by);
                    if self.config.drop_empty { store = store.drop_empty() }
                    debug!(pass = report.passes, before = count_before, after = store.len(), "dissolve finished");

                    // A dissolve that removes nothing cannot make further progress.
                    if store.len() == count_before { Phase::Converged } else { Phase::Scanning }
                }
                Phase::Converged => Phase::Converged,
            };
        }

        report.converged = report.warnings.is_empty();
        report.remaining_slivers = self.undersized(&store).len();
        if report.converged && report.remaining_slivers > 0 {
            report.warnings.push(Warning::IsolatedSlivers { count: report.remaining_slivers });
        }

        let output = store.to_collection();
        report.warnings.extend(type_mismatches(&output));
        report.output_features = output.len();

        info!(
            passes = report.passes,
            input = report.input_features,
            output = report.output_features,
            remaining = report.remaining_slivers,
            "simplification finished"
        );
        report.emit();

        Ok((output, report))
    }
}

/// One warning per column holding a value that does not fit the column type.
fn type_mismatches(collection: &FeatureCollection) -> Vec<Warning> {
    collection.schema.columns().iter().enumerate()
        .filter(|&(i, column)| collection.records.iter().any(|r| !r.attrs[i].conforms_to(column.ty)))
        .map(|(_, column)| Warning::TypeRestoration { column: column.name.clone() })
        .collect()
}

/// Merge every feature smaller than `config.area_lim` into its best neighbor.
///
/// Returns the simplified layer (same schema, single-part polygons) along with
/// a report of the passes made and any warnings raised.
pub fn simplify(
    input: &FeatureCollection,
    config: &SimplifyConfig,
    raster: Option<&RasterContext>,
) -> Result<(FeatureCollection, SimplifyReport)> {
    Simplifier::new(config, raster).run(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attr::{AttrValue, ColumnType, Schema},
        collection::Record,
        raster::GeoTransform,
    };
    use geo::{polygon, Area, MultiPolygon, Polygon};
    use ndarray::Array2;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    fn layer(rows: Vec<(Polygon<f64>, &str, &str)>) -> FeatureCollection {
        FeatureCollection {
            schema: Schema::from_pairs([("cat", ColumnType::Text), ("owner", ColumnType::Text)]),
            crs: None,
            records: rows.into_iter()
                .map(|(g, c, o)| Record::from_polygon(g, vec![AttrValue::text(c), AttrValue::text(o)]))
                .collect(),
        }
    }

    fn area(record: &Record) -> f64 { record.geometry.unsigned_area() }

    #[test]
    fn sliver_is_absorbed_by_its_only_neighbor() {
        let input = layer(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
        ]);
        let (output, report) = simplify(&input, &SimplifyConfig::new(10.0, &["cat"]), None).unwrap();

        assert_eq!(output.len(), 1);
        assert_eq!(output.records[0].attrs[0], AttrValue::text("X"));
        assert!((area(&output.records[0]) - 55.0).abs() < 1e-9);
        assert!(report.converged);
        assert_eq!(report.passes, 1);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn converged_output_is_a_fixed_point() {
        let input = layer(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
            (rect(0.0, 5.0, 10.0, 10.0), "Z", "a"),
        ]);
        let config = SimplifyConfig::new(10.0, &["cat"]);
        let (first, _) = simplify(&input, &config, None).unwrap();
        let (second, report) = simplify(&first, &config, None).unwrap();

        assert_eq!(report.passes, 0);
        assert_eq!(first, second);
    }

    #[test]
    fn output_is_single_part_and_conserves_categories() {
        let input = layer(vec![
            (rect(0.0, 0.0, 10.0, 10.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 3.0), "Y", "a"),
            (rect(20.0, 0.0, 30.0, 10.0), "X", "a"),
            (rect(19.0, 0.0, 20.0, 2.0), "W", "a"),
        ]);
        let (output, _) = simplify(&input, &SimplifyConfig::new(5.0, &["cat"]), None).unwrap();

        assert!(output.records.iter().all(|r| r.geometry.0.len() == 1));
        let inputs = input.column("cat").unwrap();
        assert!(output.column("cat").unwrap().iter().all(|v| inputs.contains(v)));

        let total = output.records.iter().map(area).sum::<f64>();
        assert!((total - 205.0).abs() < 1e-9);
    }

    #[test]
    fn keep_columns_block_merges_and_stay_untouched() {
        let input = layer(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "b"),
        ]);
        let config = SimplifyConfig::new(10.0, &["cat"]).with_keep_cols(&["owner"]);
        let (output, report) = simplify(&input, &config, None).unwrap();

        assert_eq!(output.len(), 2);
        assert_eq!(output.column("owner").unwrap(), vec![&AttrValue::text("a"), &AttrValue::text("b")]);
        assert_eq!(report.remaining_slivers, 1);
        assert_eq!(report.warnings, vec![Warning::IsolatedSlivers { count: 1 }]);
    }

    #[test]
    fn keep_area_is_invariant() {
        let input = layer(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "b"),
            (rect(11.0, 0.0, 20.0, 5.0), "Z", "b"),
        ]);
        let config = SimplifyConfig::new(10.0, &["cat"]).with_keep_cols(&["owner"]);
        let (output, _) = simplify(&input, &config, None).unwrap();

        let owned_by = |c: &FeatureCollection, owner: &str| c.records.iter()
            .filter(|r| r.attrs[1] == AttrValue::text(owner))
            .map(area)
            .sum::<f64>();
        assert!((owned_by(&output, "a") - owned_by(&input, "a")).abs() < 1e-9);
        assert!((owned_by(&output, "b") - owned_by(&input, "b")).abs() < 1e-9);
        assert_eq!(output.len(), 2);
    }

    #[test]
    fn chained_slivers_need_a_second_pass() {
        // Y only touches Z; Z touches X. Y takes Z's category, Z joins X, then Y joins X.
        let input = layer(vec![
            (rect(0.0, 0.0, 10.0, 10.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 3.0), "Z", "a"),
            (rect(11.0, 0.0, 12.0, 2.0), "Y", "a"),
        ]);
        let (output, report) = simplify(&input, &SimplifyConfig::new(10.0, &["cat"]), None).unwrap();
        assert_eq!(report.passes, 2);
        assert!(report.converged);
        assert_eq!(output.len(), 1);
        assert!((area(&output.records[0]) - 105.0).abs() < 1e-9);

        let capped = SimplifyConfig { max_passes: 1, ..SimplifyConfig::new(10.0, &["cat"]) };
        let (output, report) = simplify(&input, &capped, None).unwrap();
        assert!(!report.converged);
        assert_eq!(report.warnings, vec![Warning::NotConverged { passes: 1 }]);
        assert_eq!(output.len(), 2);
    }

    #[test]
    fn undersized_count_never_grows() {
        let input = layer(vec![
            (rect(0.0, 0.0, 10.0, 10.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 3.0), "Z", "a"),
            (rect(11.0, 0.0, 12.0, 2.0), "Y", "a"),
            (rect(50.0, 0.0, 51.0, 1.0), "Q", "a"),
        ]);
        let config = SimplifyConfig::new(10.0, &["cat"]);
        let before = input.records.iter().filter(|r| area(r) < 10.0).count();
        let mut previous = before;
        for max_passes in 1..=3 {
            let (output, _) = simplify(&input, &SimplifyConfig { max_passes, ..config.clone() }, None).unwrap();
            let now = output.records.iter().filter(|r| area(r) < 10.0).count();
            assert!(now <= previous);
            previous = now;
        }
        assert_eq!(previous, 1); // the isolated Q
    }

    #[test]
    fn empty_input_converges_immediately() {
        let input = layer(vec![]);
        let (output, report) = simplify(&input, &SimplifyConfig::new(10.0, &["cat"]), None).unwrap();
        assert!(output.is_empty());
        assert_eq!(report.passes, 0);
        assert!(report.converged);
    }

    #[test]
    fn unknown_column_is_a_usage_error() {
        let input = layer(vec![(rect(0.0, 0.0, 1.0, 1.0), "X", "a")]);
        assert!(simplify(&input, &SimplifyConfig::new(10.0, &["missing"]), None).is_err());
    }

    #[test]
    fn null_category_is_a_class_of_its_own() {
        let row = |g, cat: AttrValue| Record::from_polygon(g, vec![cat, AttrValue::text("a")]);
        let mut input = layer(vec![]);
        input.records = vec![
            row(rect(0.0, 0.0, 10.0, 5.0), AttrValue::Null),
            row(rect(10.0, 0.0, 20.0, 5.0), AttrValue::Null),
            row(rect(20.0, 0.0, 30.0, 5.0), AttrValue::text("x")),
            row(rect(30.0, 0.0, 31.0, 5.0), AttrValue::Null),
        ];
        let (output, report) = simplify(&input, &SimplifyConfig::new(10.0, &["cat"]), None).unwrap();

        assert!(report.converged);
        assert_eq!(output.len(), 2);
        let only_area = |cat: AttrValue| {
            let areas = output.records.iter().filter(|r| r.attrs[0] == cat).map(area).collect::<Vec<_>>();
            assert_eq!(areas.len(), 1);
            areas[0]
        };
        assert!((only_area(AttrValue::Null) - 100.0).abs() < 1e-9);
        assert!((only_area(AttrValue::text("x")) - 55.0).abs() < 1e-9);
    }

    #[test]
    fn empty_geometries_are_dropped_on_request() {
        let mut input = layer(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
        ]);
        input.records.push(Record::new(MultiPolygon(vec![]), vec![AttrValue::text("E"), AttrValue::text("a")]));

        let config = SimplifyConfig::new(10.0, &["cat"]);
        let (kept, report) = simplify(&input, &config, None).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(report.warnings, vec![Warning::IsolatedSlivers { count: 1 }]);

        let (dropped, report) = simplify(&input, &SimplifyConfig { drop_empty: true, ..config }, None).unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped.records[0].attrs[0], AttrValue::text("X"));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn short_record_is_a_usage_error() {
        let mut input = layer(vec![(rect(0.0, 0.0, 10.0, 5.0), "X", "a")]);
        input.records.push(Record::from_polygon(rect(10.0, 0.0, 11.0, 5.0), vec![AttrValue::text("Y")]));
        assert!(simplify(&input, &SimplifyConfig::new(10.0, &["cat"]), None).is_err());
    }

    #[test]
    fn raster_in_another_crs_is_a_usage_error() {
        let mut input = layer(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
        ]);
        input.crs = Some("EPSG:25832".into());
        let raster = |crs: &str| RasterContext::new(
            Array2::from_elem((10, 20), 1.0),
            GeoTransform::new(0.0, 10.0, 1.0, -1.0),
            Some(crs.into()),
            None,
        );
        let config = SimplifyConfig::new(10.0, &["cat"]);

        assert!(simplify(&input, &config, Some(&raster("EPSG:4326"))).is_err());
        let (output, _) = simplify(&input, &config, Some(&raster("EPSG:25832"))).unwrap();
        assert_eq!(output.len(), 1);
    }

    #[test]
    fn ill_typed_column_is_reported() {
        let mut input = layer(vec![(rect(0.0, 0.0, 10.0, 10.0), "X", "a")]);
        input.schema = Schema::from_pairs([("cat", ColumnType::Text), ("owner", ColumnType::Integer)]);
        let (output, report) = simplify(&input, &SimplifyConfig::new(10.0, &["cat"]), None).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(report.warnings, vec![Warning::TypeRestoration { column: "owner".into() }]);
    }
}
