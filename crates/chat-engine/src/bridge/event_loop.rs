use std::future::Future;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use chat_core::{ChatError, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

const THREAD_NAME: &str = "chat-event-loop";
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A dedicated thread running one single-threaded tokio runtime.
///
/// Request threads hand futures to the loop with [`EventLoop::submit`] and
/// block on the returned [`Submitted`] handle.
pub struct EventLoop {
    handle: Handle,
    thread_id: ThreadId,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    pub fn start() -> Result<Self> {
        Self::start_with_timeout(DEFAULT_STARTUP_TIMEOUT)
    }

    /// Spawn the loop thread and wait until the loop itself reports that it
    /// is running.
    pub fn start_with_timeout(startup_timeout: Duration) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<std::io::Result<Handle>>(1);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                runtime.block_on(async move {
                    // Runs on the first tick of the live loop.
                    let _ = ready_tx.send(Ok(Handle::current()));
                    let _ = stop_rx.await;
                });
                log::debug!("Event loop stopped, cancelling remaining tasks");
            })
            .map_err(|e| ChatError::EventLoop(format!("failed to spawn loop thread: {e}")))?;

        let handle = match ready_rx.recv_timeout(startup_timeout) {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(ChatError::EventLoop(format!("failed to build runtime: {e}")));
            }
            Err(_) => {
                return Err(ChatError::EventLoop(format!(
                    "loop did not report ready within {:?}",
                    startup_timeout
                )));
            }
        };

        let thread_id = thread.thread().id();
        log::info!("Event loop running on thread {:?}", thread_id);

        Ok(Self {
            handle,
            thread_id,
            stop_tx: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Schedule `future` on the loop from any thread.
    pub fn submit<F>(&self, future: F) -> Submitted<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (result_tx, result_rx) = std_mpsc::sync_channel(1);
        let task = self.handle.spawn(async move {
            let _ = result_tx.send(future.await);
        });

        Submitted {
            result_rx,
            abort: task.abort_handle(),
            on_loop_thread: self.is_loop_thread(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.lock().is_some()
            && self
                .thread
                .lock()
                .as_ref()
                .is_some_and(|thread| !thread.is_finished())
    }

    pub fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop the loop and join its thread. Pending tasks are dropped.
    pub fn shutdown(&self) {
        if let Some(stop_tx) = self.stop_tx.lock().take() {
            let _ = stop_tx.send(());
        }
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            // Joining ourselves would never return.
            if self.is_loop_thread() {
                return;
            }
            if thread.join().is_err() {
                log::error!("Event loop thread panicked during shutdown");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Result handle for a future scheduled with [`EventLoop::submit`].
pub struct Submitted<T> {
    result_rx: std_mpsc::Receiver<T>,
    abort: AbortHandle,
    on_loop_thread: bool,
}

impl<T> Submitted<T> {
    pub fn wait(self) -> Result<T> {
        self.ensure_off_loop()?;
        self.result_rx
            .recv()
            .map_err(|_| ChatError::EventLoop("task ended without producing a result".to_string()))
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        self.ensure_off_loop()?;
        match self.result_rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(ChatError::StreamTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ChatError::EventLoop(
                "task ended without producing a result".to_string(),
            )),
        }
    }

    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    fn ensure_off_loop(&self) -> Result<()> {
        if self.on_loop_thread {
            return Err(ChatError::EventLoop(
                "cannot block on a task from the event loop thread".to_string(),
            ));
        }
        Ok(())
    }
}

static SHARED: Lazy<Mutex<Option<Arc<EventLoop>>>> = Lazy::new(|| Mutex::new(None));

/// The process-wide loop, started on first use.
pub fn shared() -> Result<Arc<EventLoop>> {
    let mut slot = SHARED.lock();
    if let Some(existing) = slot.as_ref() {
        return Ok(Arc::clone(existing));
    }
    let started = Arc::new(EventLoop::start()?);
    *slot = Some(Arc::clone(&started));
    Ok(started)
}

/// Tear down the process-wide loop; the next [`shared`] call starts a new one.
pub fn shutdown_shared() {
    let existing = SHARED.lock().take();
    if let Some(event_loop) = existing {
        event_loop.shutdown();
    }
}
