//! Camera driver boundary and the background capture loop.

use std::{io, thread};

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::debug;

use crate::types::{DriverError, Frame, Intrinsics};

/// A depth or colour camera. Implementations block in `next_frame` until a
/// frame is available.
pub trait CameraDriver: Send {
    /// Human readable driver name used in logs.
    fn name(&self) -> &str;

    /// Intrinsics of the colour stream.
    fn intrinsics(&self) -> Result<Intrinsics, DriverError>;

    /// Block until the next frame set arrives.
    fn next_frame(&mut self) -> Result<Frame, DriverError>;

    /// Release the device. Called once when the capture loop exits.
    fn release(&mut self) {}
}

/// Spawns a background thread that continually pulls frames from `driver`.
///
/// Acquisition failures are forwarded as `Err` items and do not end the loop.
/// The channel holds two frames so the capture side backpressures when the
/// consumer falls behind. The loop exits when `should_stop` returns true or the
/// receiver is dropped, releasing the driver on the way out.
pub fn spawn_camera_reader<F>(
    mut driver: Box<dyn CameraDriver>,
    should_stop: F,
) -> io::Result<(Receiver<Result<Frame, DriverError>>, thread::JoinHandle<()>)>
where
    F: Fn() -> bool + Send + 'static,
{
    let (tx, rx) = bounded(2);
    let handle = thread::Builder::new()
        .name("camera-reader".into())
        .spawn(move || {
            capture_loop(driver.as_mut(), &should_stop, &tx);
            driver.release();
            debug!("camera reader for {} released", driver.name());
        })?;
    Ok((rx, handle))
}

fn capture_loop(
    driver: &mut dyn CameraDriver,
    should_stop: &dyn Fn() -> bool,
    tx: &Sender<Result<Frame, DriverError>>,
) {
    while !should_stop() {
        let item = driver.next_frame();
        if tx.send(item).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use super::*;
    use crate::types::FrameFormat;

    struct FlakyCamera {
        sequence: u64,
        released: Arc<AtomicBool>,
    }

    impl CameraDriver for FlakyCamera {
        fn name(&self) -> &str {
            "flaky"
        }

        fn intrinsics(&self) -> Result<Intrinsics, DriverError> {
            Err(DriverError::Unavailable {
                driver: "flaky".into(),
            })
        }

        fn next_frame(&mut self) -> Result<Frame, DriverError> {
            self.sequence += 1;
            if self.sequence % 2 == 0 {
                return Err(DriverError::Capture {
                    reason: "dropped".into(),
                });
            }
            Ok(Frame {
                data: Vec::new(),
                width: 4,
                height: 4,
                timestamp_ms: 0,
                sequence: self.sequence,
                format: FrameFormat::Bgr8,
                depth: None,
            })
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn reader_forwards_errors_and_releases_on_stop() {
        let released = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let camera = FlakyCamera {
            sequence: 0,
            released: released.clone(),
        };
        let stop_flag = stop.clone();
        let (rx, handle) =
            spawn_camera_reader(Box::new(camera), move || stop_flag.load(Ordering::SeqCst))
                .unwrap();

        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(first.unwrap().sequence, 1);
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(second.is_err());

        stop.store(true, Ordering::SeqCst);
        drop(rx);
        handle.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }
}
