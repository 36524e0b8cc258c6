use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Error};
use log::{debug, trace, warn};

use osutils::dependencies::Dependency;

/// Interval between two scans of the kernel ring buffer.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Kernel message printed when the live image medium returns bad data.
const SQUASHFS_ERROR: &str = "SQUASHFS error";

/// Watches the kernel log for read errors of the live image while the
/// installation runs. Warns once, then stops watching.
pub struct HealthCheck {
    failed: Arc<AtomicBool>,
    stop: Option<Sender<()>>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl HealthCheck {
    pub fn start() -> Result<Self, Error> {
        Self::start_with(read_kernel_log, HEALTH_CHECK_INTERVAL)
    }

    fn start_with<F>(mut read_log: F, interval: Duration) -> Result<Self, Error>
    where
        F: FnMut() -> Option<String> + Send + 'static,
    {
        let failed = Arc::new(AtomicBool::new(false));
        let local_failed = failed.clone();
        let (stop, stopped) = mpsc::channel::<()>();

        let join_handle = thread::Builder::new()
            .name("health-check".into())
            .spawn(move || loop {
                if read_log().is_some_and(|log| log.contains(SQUASHFS_ERROR)) {
                    warn!(
                        "The live image medium reports read errors ('{SQUASHFS_ERROR}'). \
                         The installed system may be corrupted, check the installation media"
                    );
                    local_failed.store(true, Ordering::SeqCst);
                    break;
                }
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("Failed to spawn health check")?;

        Ok(Self {
            failed,
            stop: Some(stop),
            join_handle: Some(join_handle),
        })
    }

    /// Whether a medium failure was detected.
    pub fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                trace!("Health check panicked");
            }
        }
    }
}

impl Drop for HealthCheck {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_kernel_log() -> Option<String> {
    Dependency::Dmesg
        .cmd()
        .with_args(["-s", "1024000"])
        .output_and_check()
        .map_err(|e| debug!("Failed to read kernel log: {e}"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_detects_squashfs_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let local_calls = calls.clone();
        let mut check = HealthCheck::start_with(
            move || {
                let n = local_calls.fetch_add(1, Ordering::SeqCst);
                Some(if n < 2 {
                    "usb 1-1: new high-speed USB device".to_string()
                } else {
                    "SQUASHFS error: zlib decompression failed, data probably corrupt".to_string()
                })
            },
            Duration::from_millis(5),
        )
        .unwrap();

        // The thread exits on its own after the first failure
        if let Some(handle) = check.join_handle.take() {
            handle.join().unwrap();
        }
        assert!(check.failed());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stop_on_drop() {
        let check = HealthCheck::start_with(|| None, Duration::from_secs(3600)).unwrap();
        assert!(!check.failed());
        // Would hang for an hour if the channel did not wake the thread up
        drop(check);
    }
}
