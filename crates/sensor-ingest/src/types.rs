use std::sync::Arc;

use thiserror::Error;

/// Colour frame captured from a camera driver, with an optional aligned depth map.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub sequence: u64,
    pub format: FrameFormat,
    pub depth: Option<DepthMap>,
}

impl Frame {
    /// Whether the pixel lies inside the frame bounds.
    pub fn contains(&self, u: f64, v: f64) -> bool {
        u >= 0.0 && v >= 0.0 && u < self.width as f64 && v < self.height as f64
    }

    /// Measured depth at a pixel in metres, if the frame carries depth.
    pub fn depth_at(&self, u: f64, v: f64) -> Option<f64> {
        self.depth.as_ref().and_then(|depth| depth.distance_at(u, v))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

/// Per-pixel depth in metres, aligned to the colour frame.
///
/// The buffer is shared so drivers that reuse a map across frames do not copy it.
#[derive(Clone)]
pub struct DepthMap {
    width: u32,
    height: u32,
    meters: Arc<[f32]>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, meters: Vec<f32>) -> Result<Self, DriverError> {
        let expected = width as usize * height as usize;
        if meters.len() != expected {
            return Err(DriverError::Capture {
                reason: format!(
                    "depth buffer holds {} samples, expected {expected}",
                    meters.len()
                ),
            });
        }
        Ok(Self {
            width,
            height,
            meters: meters.into(),
        })
    }

    pub fn uniform(width: u32, height: u32, meters: f32) -> Self {
        let samples = vec![meters; width as usize * height as usize];
        Self {
            width,
            height,
            meters: samples.into(),
        }
    }

    /// Depth at the nearest sample, `None` outside the map or for zero (no return).
    pub fn distance_at(&self, u: f64, v: f64) -> Option<f64> {
        if !u.is_finite() || !v.is_finite() || u < 0.0 || v < 0.0 {
            return None;
        }
        let (x, y) = (u as u32, v as u32);
        if x >= self.width || y >= self.height {
            return None;
        }
        let sample = self.meters[y as usize * self.width as usize + x as usize];
        (sample > 0.0).then_some(sample as f64)
    }
}

/// Pinhole intrinsics as reported by a depth-camera driver.
#[derive(Clone, Debug, PartialEq)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub ppx: f64,
    pub ppy: f64,
    pub coeffs: [f64; 5],
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{driver} is unavailable")]
    Unavailable { driver: String },
    #[error("frame acquisition failed: {reason}")]
    Capture { reason: String },
    #[error("motion driver fault: {reason}")]
    Motion { reason: String },
    #[error("gripper fault: {reason}")]
    Gripper { reason: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
