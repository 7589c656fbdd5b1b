//! Device output boundary
//!
//! Vendor backends implement [`DeviceOutput`]. Calls come from the scheduler
//! thread and are expected to return promptly; a backend that needs slow I/O
//! hands the work off internally.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, trace};

use crate::frame::Frame;

pub trait DeviceOutput: Send + Sync {
    fn initialize_devices(&self) -> Result<()>;

    fn shutdown_devices(&self) -> Result<()>;

    /// Hand over one composited frame; ownership passes to the device layer
    fn push_frame(&self, frame: Frame) -> Result<()>;
}

/// Default output when no vendor backend is attached: records frames in the log
#[derive(Debug, Default)]
pub struct LoggingDevice {
    active: AtomicBool,
    frames: AtomicU64,
}

impl LoggingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_pushed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl DeviceOutput for LoggingDevice {
    fn initialize_devices(&self) -> Result<()> {
        self.active.store(true, Ordering::Release);
        info!("Logging device initialized");
        Ok(())
    }

    fn shutdown_devices(&self) -> Result<()> {
        self.active.store(false, Ordering::Release);
        info!(frames = self.frames_pushed(), "Logging device shut down");
        Ok(())
    }

    fn push_frame(&self, frame: Frame) -> Result<()> {
        let count = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(
            frame = count,
            layers = frame.layers.len(),
            overlays = frame.overlays.len(),
            labels = ?frame.iter().map(|l| l.label.as_str()).collect::<Vec<_>>(),
            "Frame pushed"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DeviceCall {
        Initialize,
        Shutdown,
        Frame,
    }

    /// Records every call and pushed frame
    #[derive(Debug, Default)]
    pub struct RecordingDevice {
        pub calls: Mutex<Vec<DeviceCall>>,
        pub frames: Mutex<Vec<Frame>>,
        pub frame_times: Mutex<Vec<Instant>>,
        pub fail_push: AtomicBool,
    }

    impl RecordingDevice {
        pub fn frames(&self) -> Vec<Frame> {
            self.frames.lock().clone()
        }

        pub fn count(&self, call: DeviceCall) -> usize {
            self.calls.lock().iter().filter(|c| **c == call).count()
        }
    }

    impl DeviceOutput for RecordingDevice {
        fn initialize_devices(&self) -> Result<()> {
            self.calls.lock().push(DeviceCall::Initialize);
            Ok(())
        }

        fn shutdown_devices(&self) -> Result<()> {
            self.calls.lock().push(DeviceCall::Shutdown);
            Ok(())
        }

        fn push_frame(&self, frame: Frame) -> Result<()> {
            self.calls.lock().push(DeviceCall::Frame);
            self.frame_times.lock().push(Instant::now());
            self.frames.lock().push(frame);
            if self.fail_push.load(Ordering::Relaxed) {
                anyhow::bail!("device unplugged");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{Color, EffectLayer};

    #[test]
    fn test_logging_device_counts_frames() {
        let device = LoggingDevice::new();
        device.initialize_devices().unwrap();
        assert!(device.is_active());

        let mut frame = Frame::empty();
        frame.layers.push(EffectLayer::filled("bg", Color::BLACK));
        device.push_frame(frame).unwrap();
        device.push_frame(Frame::empty()).unwrap();
        assert_eq!(device.frames_pushed(), 2);

        device.shutdown_devices().unwrap();
        assert!(!device.is_active());
    }
}
