//! A background thread which runs a callback on a fixed period.
//!
//! Cancellation is synchronous: once [PeriodicTask::cancel] returns (or the task is dropped), the callback is not
//! running and never will again.
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
pub struct PeriodicTask {
    period: Duration,
    /// Dropping this wakes the thread and tells it to exit.
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Start calling `callback` every `period` on a thread called `name`.
    ///
    /// The task ends early if the callback returns `false`.
    pub fn spawn<F>(name: &str, period: Duration, mut callback: F) -> io::Result<PeriodicTask>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !callback() {
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        Ok(PeriodicTask {
            period,
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Whether the background thread is still alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop the task, waiting for an in-flight callback to finish.
    pub fn cancel(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.take();
        let handle = match self.handle.take() {
            Some(h) => h,
            None => return,
        };

        // Cancelled from inside the callback: the loop exits as soon as the callback returns, and joining here would
        // wait on ourselves.
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            tracing::warn!(period = ?self.period, "periodic task panicked");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
