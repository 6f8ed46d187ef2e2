use std::sync::Arc;

use ahash::AHashMap;
use geo::{Area, BoundingRect, Intersects, Polygon};
use rayon::prelude::*;

use crate::{
    attr::{key_of, AttrValue, Key, Schema},
    collection::{FeatureCollection, Record},
    geom::{self, SpatialIndex},
};

/// Identifier of a feature, stable within one store generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub u32);

/// Per-pass tag: whether the feature's category attributes were rewritten in the current pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PassTag {
    #[default]
    Unmodified,
    MergedThisPass,
}

/// A single-polygon feature with positional attributes.
#[derive(Debug, Clone)]
pub struct Feature {
    pub id: FeatureId,
    pub geometry: Polygon<f64>,
    pub attrs: Vec<AttrValue>,
    pub tag: PassTag,
}

impl Feature {
    #[inline] pub fn area(&self) -> f64 { self.geometry.unsigned_area() }

    #[inline] pub fn key(&self, cols: &[usize]) -> Key { key_of(&self.attrs, cols) }
}

/// Ordered collection of single-polygon features with an R-tree for neighbor lookup.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    schema: Arc<Schema>,
    crs: Option<String>,
    features: Vec<Feature>,
    index: SpatialIndex,
}

impl FeatureStore {
    /// Build a store from owned features, renumbering their ids and resetting their tags.
    pub(crate) fn from_features(schema: Arc<Schema>, crs: Option<String>, mut features: Vec<Feature>) -> Self {
        for (i, feature) in features.iter_mut().enumerate() {
            feature.id = FeatureId(i as u32);
            feature.tag = PassTag::Unmodified;
        }
        Self {
            index: SpatialIndex::new(features.iter().map(|f| &f.geometry)),
            schema,
            crs,
            features,
        }
    }

    /// Build a store from a layer, exploding multi-part geometries into one feature per part.
    pub fn from_collection(collection: &FeatureCollection) -> Self {
        let features = collection.records.iter()
            .flat_map(|record| geom::explode(record.geometry.clone()).into_iter()
                .map(|geometry| Feature {
                    id: FeatureId(0),
                    geometry,
                    attrs: record.attrs.clone(),
                    tag: PassTag::Unmodified,
                }))
            .collect();
        Self::from_features(Arc::new(collection.schema.clone()), collection.crs.clone(), features)
    }

    /// Convert back to a layer of single-part records.
    pub fn to_collection(&self) -> FeatureCollection {
        FeatureCollection {
            schema: (*self.schema).clone(),
            crs: self.crs.clone(),
            records: self.features.iter()
                .map(|f| Record::from_polygon(f.geometry.clone(), f.attrs.clone()))
                .collect(),
        }
    }

    #[inline] pub fn len(&self) -> usize { self.features.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.features.is_empty() }

    #[inline] pub fn schema(&self) -> &Schema { &self.schema }

    #[inline] pub fn features(&self) -> &[Feature] { &self.features }

    #[inline] pub fn feature(&self, pos: usize) -> &Feature { &self.features[pos] }

    #[inline] pub fn area_of(&self, pos: usize) -> f64 { self.features[pos].area() }

    /// Areas of all features, computed in parallel.
    pub fn areas(&self) -> Vec<f64> {
        self.features.par_iter().map(Feature::area).collect()
    }

    /// Positions of the features matching `pred`.
    pub fn filter(&self, pred: impl Fn(&Feature) -> bool) -> Vec<usize> {
        (0..self.features.len()).filter(|&i| pred(&self.features[i])).collect()
    }

    /// Positions of all other features whose geometry touches or intersects feature `pos`.
    pub fn neighbors(&self, pos: usize) -> Vec<usize> {
        let geometry = &self.features[pos].geometry;
        let Some(rect) = geometry.bounding_rect() else { return Vec::new() };
        let mut found = self.index.query(&rect)
            .filter(|&j| j != pos && self.features[j].geometry.intersects(geometry))
            .collect::<Vec<_>>();
        found.sort_unstable();
        found
    }

    /// Overwrite the values at `cols` of feature `pos` and tag it as merged.
    pub(crate) fn rewrite(&mut self, pos: usize, cols: &[usize], values: &[AttrValue]) {
        let feature = &mut self.features[pos];
        for (&c, value) in cols.iter().zip(values) {
            feature.attrs[c] = value.clone();
        }
        feature.tag = PassTag::MergedThisPass;
    }

    /// Drop features whose geometry is empty.
    pub fn drop_empty(self) -> Self {
        let features = self.features.into_iter()
            .filter(|f| !geom::is_empty_polygon(&f.geometry))
            .collect();
        Self::from_features(self.schema, self.crs, features)
    }

    /// Group features by their values at `by`, union each group and explode it into simple polygons.
    ///
    /// Within a group only features that actually intersect get unioned; a feature with no
    /// same-key neighbor passes through unchanged. Every output part inherits the attributes
    /// of the first member of its connected component. Groups keep first-occurrence order.
    pub fn dissolve(&self, by: &[usize]) -> Self {
        let n = self.features.len();

        // Group membership by key, in first-occurrence order.
        let mut group_of_key: AHashMap<Key, usize> = AHashMap::new();
        let group = self.features.iter()
            .map(|f| {
                let next = group_of_key.len();
                *group_of_key.entry(f.key(by)).or_insert(next)
            })
            .collect::<Vec<_>>();

        // Connected components of intersecting same-group features.
        let mut parent = (0..n).collect::<Vec<_>>();
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        for i in 0..n {
            for j in self.neighbors(i) {
                if j <= i || group[j] != group[i] { continue }
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj { parent[ri.max(rj)] = ri.min(rj) }
            }
        }

        // Collect members per component; a root is always its component's first member.
        let mut slot_of_root: AHashMap<usize, usize> = AHashMap::new();
        let mut components: Vec<(usize, usize, Vec<usize>)> = Vec::new(); // (group, root, members)
        for i in 0..n {
            let root = find(&mut parent, i);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                components.push((group[i], root, Vec::new()));
                components.len() - 1
            });
            components[slot].2.push(i);
        }
        components.sort_by_key(|&(g, root, _)| (g, root));

        let features = components.par_iter()
            .flat_map_iter(|(_, root, members)| {
                let polygons = members.iter()
                    .map(|&i| &self.features[i].geometry)
                    .collect::<Vec<_>>();
                let attrs = &self.features[*root].attrs;
                geom::union_polygons(&polygons).into_iter()
                    .map(move |geometry| Feature {
                        id: FeatureId(0),
                        geometry,
                        attrs: attrs.clone(),
                        tag: PassTag::Unmodified,
                    })
            })
            .collect::<Vec<_>>();

        Self::from_features(self.schema.clone(), self.crs.clone(), features)
    }

    /// Build a standalone store from a subset of features (used for candidate re-dissolve).
    pub(crate) fn subset(&self, positions: &[usize]) -> Self {
        let features = positions.iter().map(|&i| self.features[i].clone()).collect();
        Self::from_features(self.schema.clone(), self.crs.clone(), features)
    }
}
