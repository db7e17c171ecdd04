//! Detector boundary shared by the tool segmenter, hand-landmark tracker and
//! fiducial marker detector.

use crate::types::{DriverError, Frame};

/// Sub-pixel image coordinate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Pixel {
    pub u: f64,
    pub v: f64,
}

impl Pixel {
    pub const fn new(u: f64, v: f64) -> Self {
        Self { u, v }
    }

    /// Euclidean distance in pixels.
    pub fn distance(&self, other: &Pixel) -> f64 {
        (self.u - other.u).hypot(self.v - other.v)
    }
}

/// What a detection refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionLabel {
    ToolTip,
    /// One of the five fingertip landmarks of a hand.
    Fingertip,
    /// Palm centre landmark (middle-finger base).
    Palm,
    /// Fiducial marker with its dictionary identity.
    Marker(i32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PixelRegion {
    Point(Pixel),
    /// Four corners of a marker, in detector order.
    Quad([Pixel; 4]),
}

impl PixelRegion {
    pub fn centroid(&self) -> Pixel {
        match self {
            PixelRegion::Point(p) => *p,
            PixelRegion::Quad(corners) => {
                let (su, sv) = corners
                    .iter()
                    .fold((0.0, 0.0), |(su, sv), p| (su + p.u, sv + p.v));
                Pixel::new(su / 4.0, sv / 4.0)
            }
        }
    }
}

/// Single detection returned by a detector.
///
/// `instance` groups landmarks that belong to the same physical object, e.g.
/// the fingertips and palm of one hand.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: DetectionLabel,
    pub instance: u32,
    pub region: PixelRegion,
    pub confidence: f32,
}

impl Detection {
    pub fn point(label: DetectionLabel, instance: u32, at: Pixel, confidence: f32) -> Self {
        Self {
            label,
            instance,
            region: PixelRegion::Point(at),
            confidence,
        }
    }
}

/// Black-box model producing detections for a frame. Finding nothing is an
/// empty list, never an error.
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DriverError>;
}
