//! Public handle to the execution engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use rewind_core::{AudioBuffer, Auditor, Command, Completion, Device, IdleSupplier, NoAudio};

use crate::queue::CommandQueue;
use crate::snapshot::{ReverseHistory, Snapshots};
use crate::status::{Control, EngineState, EngineStatus};
use crate::worker::Worker;
use crate::{EngineConfig, EngineError, EngineResult};

/// Identifies an auditor registered with [`Engine::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// State shared between the engine handle and its worker thread.
pub(crate) struct Shared<D> {
    pub device: Arc<Mutex<D>>,
    pub queue: CommandQueue,
    pub auditors: RwLock<Vec<(SubscriptionId, Arc<dyn Auditor>)>>,
    pub idle: Mutex<Option<Box<dyn IdleSupplier>>>,
    pub audio: RwLock<Arc<dyn AudioBuffer>>,
    pub control: Mutex<Control>,
    pub snapshots: Arc<Mutex<Snapshots>>,
    pub state: Mutex<EngineState>,
    pub config: EngineConfig,
}

/// Single-writer execution engine.
///
/// Commands from any thread are applied to the device one at a time, in
/// enqueue order, by a dedicated worker thread. Every resulting event is
/// handed to the registered auditors on that same thread.
///
/// # Example
///
/// ```ignore
/// let engine = Engine::new(machine);
/// engine.subscribe(|command: &Command, event: &Event| println!("{command:?} -> {event:?}"));
/// engine.start()?;
/// engine.enqueue(Command::Reset).wait();
/// engine.stop()?;
/// ```
pub struct Engine<D: Device> {
    shared: Arc<Shared<D>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_subscription: AtomicU64,
}

impl<D: Device> Engine<D> {
    /// Engine with the default configuration.
    pub fn new(device: D) -> Self {
        Self::with_config(device, EngineConfig::default())
    }

    pub fn with_config(device: D, config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                device: Arc::new(Mutex::new(device)),
                queue: CommandQueue::new(),
                auditors: RwLock::new(Vec::new()),
                idle: Mutex::new(None),
                audio: RwLock::new(Arc::new(NoAudio)),
                control: Mutex::new(Control::default()),
                snapshots: Arc::new(Mutex::new(Snapshots::new(
                    config.snapshot_interval,
                    config.max_snapshots,
                ))),
                state: Mutex::new(EngineState::Stopped),
                config,
            }),
            worker: Mutex::new(None),
            next_subscription: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.shared.config
    }

    // ==================== Lifecycle ====================

    /// Spawn the worker thread. Does nothing if it is already running.
    pub fn start(&self) -> EngineResult<()> {
        let mut worker = self.worker.lock();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                return Ok(());
            }
            // The previous worker exited on a queued Quit.
            if let Some(handle) = worker.take() {
                handle.join().map_err(|_| EngineError::WorkerPanicked)?;
            }
        }

        let shared = Arc::clone(&self.shared);
        *self.shared.state.lock() = EngineState::Idle;
        let handle = thread::Builder::new()
            .name("rewind-engine".to_owned())
            .spawn(move || Worker::new(shared).run())?;
        *worker = Some(handle);

        tracing::info!("Engine started");
        Ok(())
    }

    /// Queue a `Quit` behind everything already enqueued and wait for the
    /// worker to exit. Does nothing if no worker is running.
    pub fn stop(&self) -> EngineResult<()> {
        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };
        if !handle.is_finished() {
            self.shared.queue.push(Command::Quit);
        }
        let result = handle.join();
        // Drops our own Quit if the worker had already exited on another one.
        self.shared.queue.clear();
        *self.shared.state.lock() = EngineState::Stopped;

        result.map_err(|_| EngineError::WorkerPanicked)?;
        tracing::info!("Engine stopped");
        Ok(())
    }

    // ==================== Commands ====================

    /// Append `command` to the queue. Never blocks on the worker.
    pub fn enqueue(&self, command: Command) -> Completion {
        tracing::trace!("Enqueue {command:?}");
        self.shared.queue.push(command)
    }

    /// Register an auditor. Auditors are called in registration order.
    pub fn subscribe(&self, auditor: impl Auditor) -> SubscriptionId {
        self.subscribe_shared(Arc::new(auditor))
    }

    /// Register an auditor the caller keeps a handle to.
    pub fn subscribe_shared(&self, auditor: Arc<dyn Auditor>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.auditors.write().push((id, auditor));
        id
    }

    /// Remove an auditor. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut auditors = self.shared.auditors.write();
        let before = auditors.len();
        auditors.retain(|(existing, _)| *existing != id);
        auditors.len() != before
    }

    /// Supplier consulted whenever the queue is empty.
    pub fn set_idle_supplier(&self, supplier: impl IdleSupplier + 'static) {
        *self.shared.idle.lock() = Some(Box::new(supplier));
    }

    pub fn clear_idle_supplier(&self) {
        *self.shared.idle.lock() = None;
    }

    /// Audio sink whose overrun flag throttles `RunUntil`.
    pub fn set_audio(&self, audio: impl AudioBuffer + 'static) {
        *self.shared.audio.write() = Arc::new(audio);
    }

    // ==================== Device access ====================

    /// Run `f` against the device under the device guard.
    pub fn with_device<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&self.shared.device.lock())
    }

    /// Run `f` against the device with write access. The worker cannot
    /// apply commands meanwhile.
    ///
    /// The automatic snapshot ring is not touched; clear it through
    /// [`reverse_history`](Self::reverse_history) if `f` replaces the state.
    pub fn with_device_mut<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut self.shared.device.lock())
    }

    /// Shared handle to the automatic snapshot ring behind `Reverse`.
    #[must_use]
    pub fn reverse_history(&self) -> ReverseHistory {
        ReverseHistory(Arc::clone(&self.shared.snapshots))
    }

    /// Shared handle to the device guard.
    #[must_use]
    pub fn device(&self) -> Arc<Mutex<D>> {
        Arc::clone(&self.shared.device)
    }

    #[must_use]
    pub fn tick(&self) -> u64 {
        self.shared.device.lock().tick()
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let control = *self.shared.control.lock();
        let (auto_snapshots, explicit_snapshots) = {
            let snapshots = self.shared.snapshots.lock();
            (snapshots.auto_len(), snapshots.explicit_len())
        };
        EngineStatus {
            state: self.state(),
            mode: control.mode,
            locks: control.locks,
            tick: self.tick(),
            queued: self.shared.queue.len(),
            auto_snapshots,
            explicit_snapshots,
        }
    }
}

impl<D: Device> Drop for Engine<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Engine shutdown failed: {e}");
        }
    }
}

impl<D: Device> core::fmt::Debug for Engine<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("queued", &self.shared.queue.len())
            .field("auditors", &self.shared.auditors.read().len())
            .finish_non_exhaustive()
    }
}
