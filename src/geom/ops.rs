use geo::{BoundingRect, Coord, Line, LineString, MultiPolygon, Polygon, Rect};

/// Relative tolerance for collinearity when matching boundary segments.
const COLLINEAR_TOL: f64 = 1e-9;

/// Split a MultiPolygon into its constituent polygons.
/// An empty MultiPolygon yields a single empty polygon so that the record is not lost.
pub(crate) fn explode(geometry: MultiPolygon<f64>) -> Vec<Polygon<f64>> {
    if geometry.0.is_empty() {
        return vec![Polygon::new(LineString::new(vec![]), vec![])];
    }
    geometry.0
}

/// Check whether a polygon has no exterior ring coordinates.
#[inline]
pub(crate) fn is_empty_polygon(polygon: &Polygon<f64>) -> bool {
    polygon.exterior().0.is_empty()
}

/// Union a set of polygons into simple polygons.
/// Falls back to the inputs when the union degenerates to nothing (zero-area input).
pub(crate) fn union_polygons(polygons: &[&Polygon<f64>]) -> Vec<Polygon<f64>> {
    match polygons {
        [] => Vec::new(),
        [single] => vec![(*single).clone()],
        _ => {
            let merged: MultiPolygon<f64> = geo::unary_union(polygons.iter().copied());
            if merged.0.is_empty() {
                polygons.iter().map(|&p| p.clone()).collect()
            } else {
                merged.0
            }
        }
    }
}

/// Iterate over all rings (exterior first, then holes) of a polygon.
#[inline]
fn rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors())
}

/// Length of the collinear overlap between two segments, zero if they are not collinear.
fn segment_overlap(a: Line<f64>, b: Line<f64>) -> f64 {
    let d = a.delta();
    let len = d.x.hypot(d.y);
    if len == 0.0 { return 0.0 }

    // Distance of both endpoints of `b` from the carrier line of `a`.
    let tol = COLLINEAR_TOL * (1.0 + len);
    let off = |p: Coord<f64>| (d.x * (p.y - a.start.y) - d.y * (p.x - a.start.x)).abs() / len;
    if off(b.start) > tol || off(b.end) > tol { return 0.0 }

    // Project onto `a` and clip to its extent.
    let t = |p: Coord<f64>| (d.x * (p.x - a.start.x) + d.y * (p.y - a.start.y)) / len;
    let (t0, t1) = (t(b.start), t(b.end));
    let lo = t0.min(t1).max(0.0);
    let hi = t0.max(t1).min(len);
    (hi - lo).max(0.0)
}

#[inline]
fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>, pad: f64) -> bool {
    a.min().x <= b.max().x + pad && b.min().x <= a.max().x + pad &&
    a.min().y <= b.max().y + pad && b.min().y <= a.max().y + pad
}

/// Length of boundary shared between `a` and `b`.
///
/// For every ring of `a` the collinear overlap with the whole boundary of `b`
/// is summed; the result is the maximum over the rings of `a`.
pub(crate) fn shared_boundary_length(a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
    let (Some(a_rect), Some(b_rect)) = (a.bounding_rect(), b.bounding_rect()) else { return 0.0 };
    let pad = COLLINEAR_TOL * (1.0 + a_rect.width().max(a_rect.height()));
    if !rects_overlap(&a_rect, &b_rect, pad) { return 0.0 }

    // Only segments of `b` near `a` can contribute.
    let b_lines = rings(b)
        .flat_map(|ring| ring.lines())
        .filter(|line| rects_overlap(&line.bounding_rect(), &a_rect, pad))
        .collect::<Vec<_>>();
    if b_lines.is_empty() { return 0.0 }

    rings(a)
        .map(|ring| ring.lines()
            .map(|la| {
                let la_rect = la.bounding_rect();
                b_lines.iter()
                    .filter(|lb| rects_overlap(&la_rect, &lb.bounding_rect(), pad))
                    .map(|&lb| segment_overlap(la, lb))
                    .sum::<f64>()
            })
            .sum::<f64>())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Area};

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![(x: x, y: y), (x: x + size, y: y), (x: x + size, y: y + size), (x: x, y: y + size)]
    }

    #[test]
    fn shared_length_of_adjacent_squares() {
        let a = square(0.0, 0.0, 2.0);
        let b = square(2.0, 0.0, 2.0);
        assert!((shared_boundary_length(&a, &b) - 2.0).abs() < 1e-12);
        assert!((shared_boundary_length(&b, &a) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn shared_length_of_partial_edge() {
        let a = square(0.0, 0.0, 4.0);
        let b = square(4.0, 1.0, 1.0);
        assert!((shared_boundary_length(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn corner_touch_shares_no_length() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(1.0, 1.0, 1.0);
        assert_eq!(shared_boundary_length(&a, &b), 0.0);
    }

    #[test]
    fn hole_ring_counts_as_boundary() {
        let outer = Polygon::new(
            square(0.0, 0.0, 10.0).exterior().clone(),
            vec![square(4.0, 4.0, 2.0).exterior().clone()],
        );
        let island = square(4.0, 4.0, 2.0);
        assert!((shared_boundary_length(&island, &outer) - 8.0).abs() < 1e-9);
        assert!((shared_boundary_length(&outer, &island) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn union_merges_touching_polygons() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(1.0, 0.0, 1.0);
        let merged = union_polygons(&[&a, &b]);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].unsigned_area() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn union_keeps_disjoint_parts_apart() {
        let a = square(0.0, 0.0, 1.0);
        let b = square(3.0, 0.0, 1.0);
        assert_eq!(union_polygons(&[&a, &b]).len(), 2);
    }

    #[test]
    fn explode_keeps_empty_geometry() {
        let parts = explode(MultiPolygon(vec![]));
        assert_eq!(parts.len(), 1);
        assert!(is_empty_polygon(&parts[0]));

        let parts = explode(MultiPolygon(vec![square(0.0, 0.0, 1.0), square(2.0, 0.0, 1.0)]));
        assert_eq!(parts.len(), 2);
    }
}
