use std::{
    sync::{
        mpsc::{RecvTimeoutError, SyncSender},
        Arc, Condvar, Mutex, PoisonError,
    },
    time::Duration,
};

use crate::{fetcher::DatafileSource, refresh::Refresher, Error, Result};

/// Default interval between two refresh cycles.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Time between two refresh cycles. Defaults to [`DEFAULT_REFRESH_INTERVAL`].
    pub interval: Duration,
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl PollerThreadConfig {
    pub fn new() -> PollerThreadConfig {
        PollerThreadConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> PollerThreadConfig {
        self.interval = interval;
        self
    }
}

/// A datafile poller thread.
///
/// The thread runs a refresh cycle immediately after start and then once per interval until it is
/// stopped. Failed cycles are logged and the thread keeps going.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: SyncSender<()>,

    /// Holds `None` until the first refresh cycle finishes, then the result of that cycle.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    /// Start a poller thread with the default configuration.
    pub fn start<S: DatafileSource + 'static>(refresher: Refresher<S>) -> Result<PollerThread> {
        PollerThread::start_with_config(refresher, PollerThreadConfig::default())
    }

    pub fn start_with_config<S: DatafileSource + 'static>(
        mut refresher: Refresher<S>,
        config: PollerThreadConfig,
    ) -> Result<PollerThread> {
        // Using `sync_channel` as `SyncSender` is `Sync` (shareable between threads).
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let join_handle = {
            // Cloning Arc for move into thread
            let result = Arc::clone(&result);
            let update_result = move |value| {
                let mut slot = result.0.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.is_none() {
                    *slot = Some(value);
                    result.1.notify_all();
                }
            };

            std::thread::Builder::new()
                .name("abserve-poller".to_owned())
                .spawn(move || {
                    loop {
                        log::debug!(target: "abserve", "refreshing datafile");
                        // Sources and factory collaborators are user code and may panic.
                        let cycle = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            refresher.refresh()
                        }));
                        match cycle {
                            Ok(Ok(outcome)) => {
                                log::debug!(target: "abserve", outcome:? = outcome; "refresh cycle finished");
                                update_result(Ok(()));
                            }
                            Ok(Err(err)) => {
                                log::warn!(target: "abserve", "failed to refresh datafile: {err}");
                                update_result(Err(err));
                            }
                            Err(_) => {
                                log::error!(target: "abserve", "refresh cycle panicked");
                                update_result(Err(Error::PollerThreadPanicked));
                            }
                        }

                        match stop_receiver.recv_timeout(config.interval) {
                            Err(RecvTimeoutError::Timeout) => {
                                // Timed out. Loop to refresh again.
                            }
                            Ok(()) => {
                                log::debug!(target: "abserve", "poller thread received stop command");
                                return;
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                // The other end has been dropped, nobody can stop us anymore.
                                // .recv_timeout() would return immediately, so sleep instead.
                                std::thread::sleep(config.interval);
                            }
                        }
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Block waiting for the first refresh cycle to finish, returning its result.
    pub fn wait_for_first_refresh(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => return result.clone(),
                None => {
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or that a stop command is
        // already pending. Ignoring it as there's nothing useful we can do.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// If you don't need to wait for the thread to exit, use [`PollerThread::stop`] instead.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        // Error means that the thread has panicked and there's nothing useful we can do in that
        // case.
        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}
