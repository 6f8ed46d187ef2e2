use crate::{
    attr::Key,
    geom,
    raster::RasterContext,
    store::{Feature, FeatureStore, PassTag},
};

/// Column configuration and tie-break policy shared by all resolutions of a run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Resolver<'a> {
    pub(crate) cat: &'a [usize],
    pub(crate) keep: &'a [usize],
    pub(crate) dissolve_by: &'a [usize],
    pub(crate) raster: Option<&'a RasterContext>,
    pub(crate) tie_epsilon: f64,
}

impl Resolver<'_> {
    /// Positions of the merge-compatible features touching the feature at `pos`.
    pub(crate) fn candidates(&self, store: &FeatureStore, pos: usize) -> Vec<usize> {
        let sliver = store.feature(pos);
        let cat = sliver.key(self.cat);
        let keep = sliver.key(self.keep);

        store.neighbors(pos).into_iter()
            .filter(|&j| {
                let other = store.feature(j);
                other.key(self.cat) != cat && (self.keep.is_empty() || other.key(self.keep) == keep)
            })
            .collect()
    }

    /// Pick the category key the feature at `pos` should take over, if any neighbor qualifies.
    pub(crate) fn resolve(&self, store: &FeatureStore, pos: usize) -> Option<Key> {
        let candidates = self.candidates(store, pos);
        if candidates.is_empty() { return None }

        // Compare against merged shapes, not stale fragments, once a candidate changed this pass.
        let regrouped;
        let pool = if candidates.iter().any(|&j| store.feature(j).tag == PassTag::MergedThisPass) {
            regrouped = store.subset(&candidates).dissolve(self.dissolve_by);
            regrouped.features().iter().collect::<Vec<_>>()
        } else {
            candidates.iter().map(|&j| store.feature(j)).collect::<Vec<_>>()
        };

        self.select(store.feature(pos), pool).map(|chosen| chosen.key(self.cat))
    }

    /// Choose one feature out of `pool` as the replacement for `sliver`.
    fn select<'f>(&self, sliver: &Feature, mut pool: Vec<&'f Feature>) -> Option<&'f Feature> {
        if pool.len() <= 1 { return pool.pop() }

        if let Some(raster) = self.raster {
            match self.closest_by_raster(raster, sliver, &pool) {
                Some(tied) if tied.len() == 1 => return Some(pool[tied[0]]),
                Some(tied) => pool = tied.into_iter().map(|i| pool[i]).collect(),
                None => (),
            }
        }

        longest_shared_border(sliver, &pool)
    }

    /// Indices into `pool` whose zonal mean is closest to the sliver's, within `tie_epsilon`.
    /// `None` when the sliver or every candidate lacks valid raster cells.
    fn closest_by_raster(&self, raster: &RasterContext, sliver: &Feature, pool: &[&Feature]) -> Option<Vec<usize>> {
        let own = raster.zonal_mean(&sliver.geometry)?;
        let diffs = pool.iter()
            .map(|f| raster.zonal_mean(&f.geometry).map(|mean| (mean - own).abs()))
            .collect::<Vec<_>>();

        let min = diffs.iter().flatten().copied().reduce(f64::min)?;
        Some(diffs.iter().enumerate()
            .filter(|(_, d)| d.is_some_and(|d| d - min <= self.tie_epsilon))
            .map(|(i, _)| i)
            .collect())
    }
}

/// The candidate sharing the longest border with `sliver`; the earliest one wins exact ties.
fn longest_shared_border<'f>(sliver: &Feature, pool: &[&'f Feature]) -> Option<&'f Feature> {
    pool.iter()
        .map(|&f| (f, geom::shared_boundary_length(&sliver.geometry, &f.geometry)))
        .fold(None, |best: Option<(&'f Feature, f64)>, (f, len)| match best {
            Some((_, best_len)) if best_len >= len => best,
            _ => Some((f, len)),
        })
        .map(|(f, _)| f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        attr::{AttrValue, ColumnType, Schema},
        collection::{FeatureCollection, Record},
        raster::GeoTransform,
    };
    use geo::{polygon, Polygon};
    use ndarray::Array2;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    fn store(rows: Vec<(Polygon<f64>, &str, &str)>) -> FeatureStore {
        FeatureStore::from_collection(&FeatureCollection {
            schema: Schema::from_pairs([("cat", ColumnType::Text), ("owner", ColumnType::Text)]),
            crs: None,
            records: rows.into_iter()
                .map(|(g, c, o)| Record::from_polygon(g, vec![AttrValue::text(c), AttrValue::text(o)]))
                .collect(),
        })
    }

    fn resolver(raster: Option<&RasterContext>) -> Resolver<'_> {
        Resolver { cat: &[0], keep: &[], dissolve_by: &[0], raster, tie_epsilon: 0.0 }
    }

    #[test]
    fn single_candidate_is_selected() {
        let s = store(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
        ]);
        assert_eq!(resolver(None).resolve(&s, 1).unwrap()[0], AttrValue::text("X"));
    }

    #[test]
    fn same_category_neighbors_are_not_candidates() {
        let s = store(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "Y", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
        ]);
        assert!(resolver(None).resolve(&s, 1).is_none());
    }

    #[test]
    fn keep_columns_must_match() {
        let s = store(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "b"),
        ]);
        let r = Resolver { keep: &[1], dissolve_by: &[0, 1], ..resolver(None) };
        assert!(r.resolve(&s, 1).is_none());
    }

    #[test]
    fn longest_border_wins_without_raster() {
        // Sliver (1) shares 5 units with X on its left and 1 unit with Z below.
        let s = store(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
            (rect(10.0, -3.0, 20.0, 0.0), "Z", "a"),
        ]);
        assert_eq!(resolver(None).resolve(&s, 1).unwrap()[0], AttrValue::text("X"));
    }

    #[test]
    fn raster_difference_beats_border_length() {
        let s = store(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
            (rect(11.0, 0.0, 20.0, 1.0), "Z", "a"),
        ]);
        // Column 10 (the sliver) and columns >= 11 carry 5.0; everything left of x=10 carries 0.0.
        let grid = Array2::from_shape_fn((10, 25), |(_, col)| if col >= 10 { 5.0 } else { 0.0 });
        let raster = RasterContext::new(grid, GeoTransform::new(0.0, 5.0, 1.0, -1.0), None, None);
        assert_eq!(resolver(Some(&raster)).resolve(&s, 1).unwrap()[0], AttrValue::text("Z"));
    }

    #[test]
    fn raster_tie_falls_back_to_border_length() {
        let s = store(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
            (rect(11.0, 0.0, 20.0, 1.0), "Z", "a"),
        ]);
        let grid = Array2::from_elem((10, 25), 1.0);
        let raster = RasterContext::new(grid, GeoTransform::new(0.0, 5.0, 1.0, -1.0), None, None);
        assert_eq!(resolver(Some(&raster)).resolve(&s, 1).unwrap()[0], AttrValue::text("X"));
    }

    #[test]
    fn near_raster_differences_tie_within_epsilon() {
        let s = store(vec![
            (rect(0.0, 0.0, 10.0, 5.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
            (rect(11.0, 0.0, 20.0, 1.0), "Z", "a"),
        ]);
        // Sliver mean 0.0, X mean 0.5, Z mean 0.4.
        let grid = Array2::from_shape_fn((10, 25), |(_, col)| match col {
            0..=9 => 0.5,
            10 => 0.0,
            _ => 0.4,
        });
        let raster = RasterContext::new(grid, GeoTransform::new(0.0, 5.0, 1.0, -1.0), None, None);

        assert_eq!(resolver(Some(&raster)).resolve(&s, 1).unwrap()[0], AttrValue::text("Z"));

        // Within 0.2 both count as closest and X's 5-unit border beats Z's 1-unit border.
        let loose = Resolver { tie_epsilon: 0.2, ..resolver(Some(&raster)) };
        assert_eq!(loose.resolve(&s, 1).unwrap()[0], AttrValue::text("X"));
    }

    #[test]
    fn strictly_longer_border_wins_a_raster_tie() {
        let grid = Array2::from_elem((10, 25), 1.0);
        let raster = RasterContext::new(grid, GeoTransform::new(0.0, 5.0, 1.0, -1.0), None, None);

        let s = store(vec![
            (rect(11.0, 0.0, 20.0, 1.999), "Z", "a"),
            (rect(10.0, 0.0, 11.0, 2.0), "Y", "a"),
            (rect(0.0, 0.0, 10.0, 2.0), "X", "a"),
        ]);
        assert_eq!(resolver(Some(&raster)).resolve(&s, 1).unwrap()[0], AttrValue::text("X"));

        let s = store(vec![
            (rect(0.0, 0.0, 10.0, 1.999), "X", "a"),
            (rect(10.0, 0.0, 11.0, 2.0), "Y", "a"),
            (rect(11.0, 0.0, 20.0, 2.0), "Z", "a"),
        ]);
        assert_eq!(resolver(Some(&raster)).resolve(&s, 1).unwrap()[0], AttrValue::text("Z"));
    }

    #[test]
    fn changed_candidates_are_regrouped() {
        let mut s = store(vec![
            (rect(0.0, 0.0, 10.0, 2.0), "X", "a"),
            (rect(10.0, 0.0, 11.0, 5.0), "Y", "a"),
            (rect(0.0, 2.0, 10.0, 5.0), "W", "a"),
            (rect(11.0, 0.0, 20.0, 4.0), "Z", "a"),
        ]);
        let r = resolver(None);
        assert_eq!(r.candidates(&s, 1), vec![0, 2, 3]);
        assert_eq!(r.resolve(&s, 1).unwrap()[0], AttrValue::text("Z"));

        // Once feature 2 turns into "X" it forms one 5-unit border with feature 0.
        s.rewrite(2, &[0], &[AttrValue::text("X")]);
        assert_eq!(r.resolve(&s, 1).unwrap()[0], AttrValue::text("X"));
    }
}
