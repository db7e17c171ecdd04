//! Workspace zone built from four fiducial markers sharing one identity.
//!
//! A hand inside the zone slows the arm down. The polygon is only replaced by
//! a frame that sees exactly four markers; frames that see fewer keep the last
//! committed polygon.

use sensor_ingest::{Detection, DetectionLabel, Pixel};

const BOUNDARY_EPSILON: f64 = 1e-9;

#[derive(Clone, Debug)]
pub struct WorkspaceZone {
    marker_id: i32,
    corners: Option<[Pixel; 4]>,
    detected: Vec<Pixel>,
    total_checks: u64,
    in_zone_count: u64,
}

impl WorkspaceZone {
    pub fn new(marker_id: i32) -> Self {
        Self {
            marker_id,
            corners: None,
            detected: Vec::with_capacity(4),
            total_checks: 0,
            in_zone_count: 0,
        }
    }

    pub fn marker_id(&self) -> i32 {
        self.marker_id
    }

    /// Feed one frame's marker detections. Returns whether a zone is defined.
    pub fn update(&mut self, detections: &[Detection]) -> bool {
        self.detected.clear();
        self.detected.extend(
            detections
                .iter()
                .filter(|d| d.label == DetectionLabel::Marker(self.marker_id))
                .map(|d| d.region.centroid()),
        );

        if let [a, b, c, d] = self.detected[..] {
            self.corners = Some(sort_clockwise([a, b, c, d]));
        }
        self.is_defined()
    }

    pub fn is_defined(&self) -> bool {
        self.corners.is_some()
    }

    /// Committed polygon, top-left-most corner first.
    pub fn corners(&self) -> Option<&[Pixel; 4]> {
        self.corners.as_ref()
    }

    /// Centroids of same-id markers seen in the most recent frame.
    pub fn detected_markers(&self) -> &[Pixel] {
        &self.detected
    }

    /// Explicitly forget the zone.
    pub fn clear(&mut self) {
        self.corners = None;
    }

    /// Point-in-polygon test; points on an edge count as inside.
    pub fn contains_point(&self, u: f64, v: f64) -> bool {
        match &self.corners {
            Some(corners) => polygon_contains(corners, Pixel::new(u, v)),
            None => false,
        }
    }

    /// [`contains_point`](Self::contains_point) that also updates the
    /// hand-check counters.
    pub fn check_hand(&mut self, u: f64, v: f64) -> bool {
        self.total_checks += 1;
        let inside = self.contains_point(u, v);
        if inside {
            self.in_zone_count += 1;
        }
        inside
    }

    pub fn total_checks(&self) -> u64 {
        self.total_checks
    }

    pub fn in_zone_count(&self) -> u64 {
        self.in_zone_count
    }
}

/// Order four points clockwise (in image coordinates, y down) starting from
/// the point with the lowest `u + v`.
///
/// Points are sorted by their angle around the centroid, then the sequence is
/// rotated so the top-left-most point leads. The result does not depend on
/// the input order.
pub fn sort_clockwise(points: [Pixel; 4]) -> [Pixel; 4] {
    let cu = points.iter().map(|p| p.u).sum::<f64>() / 4.0;
    let cv = points.iter().map(|p| p.v).sum::<f64>() / 4.0;
    let mut sorted = points;
    sorted.sort_by(|a, b| {
        let ta = (a.v - cv).atan2(a.u - cu);
        let tb = (b.v - cv).atan2(b.u - cu);
        ta.total_cmp(&tb)
            .then(a.u.total_cmp(&b.u))
            .then(a.v.total_cmp(&b.v))
    });
    let lead = sorted
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.u + a.v).total_cmp(&(b.u + b.v)))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    sorted.rotate_left(lead);
    sorted
}

fn polygon_contains(corners: &[Pixel; 4], p: Pixel) -> bool {
    let n = corners.len();
    for i in 0..n {
        if on_segment(corners[i], corners[(i + 1) % n], p) {
            return true;
        }
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (corners[i], corners[j]);
        if (a.v > p.v) != (b.v > p.v) {
            let cross_u = (b.u - a.u) * (p.v - a.v) / (b.v - a.v) + a.u;
            if p.u < cross_u {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: Pixel, b: Pixel, p: Pixel) -> bool {
    let cross = (b.u - a.u) * (p.v - a.v) - (b.v - a.v) * (p.u - a.u);
    let scale = (b.u - a.u).abs().max((b.v - a.v).abs()).max(1.0);
    if cross.abs() > BOUNDARY_EPSILON * scale {
        return false;
    }
    p.u >= a.u.min(b.u) - BOUNDARY_EPSILON
        && p.u <= a.u.max(b.u) + BOUNDARY_EPSILON
        && p.v >= a.v.min(b.v) - BOUNDARY_EPSILON
        && p.v <= a.v.max(b.v) + BOUNDARY_EPSILON
}
