use std::{
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use anyhow::{Context, Error};
use log::{debug, info, trace};
use nix::sys::statvfs::statvfs;

/// Interval between two samples of the target's used space.
const DISK_USAGE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    pub label: String,
    pub text: String,
    pub fraction: f64,
}

/// Installation progress shared between the engine and background workers.
/// Every change is logged.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    state: Arc<Mutex<ProgressState>>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new stage. Resets text and fraction.
    pub fn set_label(&self, label: impl Into<String>) {
        let label = label.into();
        if let Ok(mut state) = self.state.lock() {
            if state.label != label {
                info!("{label}");
                *state = ProgressState {
                    label,
                    ..Default::default()
                };
            }
        }
    }

    pub fn set_text(&self, text: impl Into<String>) {
        let text = text.into();
        if let Ok(mut state) = self.state.lock() {
            if state.text != text {
                debug!("{text}");
                state.text = text;
            }
        }
    }

    /// Set the completed fraction of the current stage, clamped to `[0, 1]`.
    pub fn set_fraction(&self, fraction: f64) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        if let Ok(mut state) = self.state.lock() {
            let percent = (fraction * 100.0) as u32;
            if percent != (state.fraction * 100.0) as u32 {
                trace!("{}: {percent}%", state.label);
            }
            state.fraction = fraction;
        }
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }
}

/// Used bytes of the filesystem holding `path`.
pub fn used_space(path: impl AsRef<Path>) -> Result<u64, Error> {
    let stat = statvfs(path.as_ref()).context(format!(
        "Failed to query filesystem usage of '{}'",
        path.as_ref().display()
    ))?;
    let fragment = stat.fragment_size() as u64;
    Ok((stat.blocks() as u64).saturating_sub(stat.blocks_free() as u64) * fragment)
}

/// Estimates the progress of the live copy from the growth of the used space
/// of the target filesystem.
pub struct DiskUsageMonitor {
    stop: Option<Sender<()>>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl DiskUsageMonitor {
    /// Start sampling `target`. `expected_bytes` is the amount of data the copy
    /// is going to write.
    pub fn start(
        progress: Progress,
        target: impl AsRef<Path>,
        expected_bytes: u64,
    ) -> Result<Self, Error> {
        Self::start_with_interval(progress, target, expected_bytes, DISK_USAGE_INTERVAL)
    }

    fn start_with_interval(
        progress: Progress,
        target: impl AsRef<Path>,
        expected_bytes: u64,
        interval: Duration,
    ) -> Result<Self, Error> {
        let target: PathBuf = target.as_ref().to_owned();
        let initial = used_space(&target)?;
        debug!(
            "Monitoring disk usage of '{}', expecting {expected_bytes} bytes",
            target.display()
        );

        let (stop, stopped) = mpsc::channel::<()>();
        let join_handle = thread::Builder::new()
            .name("disk-usage".into())
            .spawn(move || loop {
                if let Ok(used) = used_space(&target) {
                    progress.set_fraction(copy_fraction(initial, used, expected_bytes));
                }
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("Failed to spawn disk usage monitor")?;

        Ok(Self {
            stop: Some(stop),
            join_handle: Some(join_handle),
        })
    }

    /// Stop the monitor and wait for the thread to exit.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread up.
        self.stop.take();
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                trace!("Disk usage monitor panicked");
            }
        }
    }
}

impl Drop for DiskUsageMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn copy_fraction(initial: u64, used: u64, expected: u64) -> f64 {
    if expected == 0 {
        return 0.0;
    }
    used.saturating_sub(initial) as f64 / expected as f64
}
