//! The worker loop: the only code that changes device state.

use std::sync::Arc;

use rewind_core::{Command, Device, DeviceError, Event, Outcome, Rejection};

use crate::engine::Shared;
use crate::queue::QueuedCommand;
use crate::status::{EngineState, RunMode};

/// Result of executing one command.
enum Step {
    /// Finished; zero or one event to publish.
    Done(Option<Event>),
    /// A `RunUntil` stopped short of its target; publish and retry.
    Partial(Event),
    /// The audio buffer stayed overrun; retry without an event.
    Stalled,
    Rejected(Rejection),
}

/// Where the next command came from.
enum Work {
    Queued(QueuedCommand),
    Idle(Command),
}

pub(crate) struct Worker<D> {
    shared: Arc<Shared<D>>,
}

impl<D: Device> Worker<D> {
    pub(crate) const fn new(shared: Arc<Shared<D>>) -> Self {
        Self { shared }
    }

    pub(crate) fn run(self) {
        tracing::debug!("Engine worker running");
        loop {
            let Some(work) = self.next_work() else {
                self.set_state(EngineState::Idle);
                self.shared.queue.wait_for_work(self.shared.config.idle_wait);
                continue;
            };

            self.set_state(EngineState::Processing);
            match work {
                Work::Queued(queued) => {
                    if matches!(queued.command, Command::Quit) {
                        queued.completion.complete(Outcome::Applied);
                        let dropped = self.shared.queue.clear();
                        if dropped > 0 {
                            tracing::debug!("Dropped {dropped} commands queued after Quit");
                        }
                        break;
                    }
                    self.process_queued(queued);
                }
                Work::Idle(command) => self.process_idle(&command),
            }
        }
        self.set_state(EngineState::Stopped);
        tracing::debug!("Engine worker exited");
    }

    fn set_state(&self, state: EngineState) {
        *self.shared.state.lock() = state;
    }

    fn next_work(&self) -> Option<Work> {
        if let Some(queued) = self.shared.queue.pop() {
            return Some(Work::Queued(queued));
        }
        self.idle_command().map(Work::Idle)
    }

    /// Command to run while the queue is empty, if any.
    fn idle_command(&self) -> Option<Command> {
        let mode = {
            let control = self.shared.control.lock();
            if !control.allows_idle() {
                return None;
            }
            control.mode
        };

        if mode == RunMode::Reversing {
            return self.reverse_step();
        }

        let tick = self.shared.device.lock().tick();
        self.shared.idle.lock().as_mut()?.next_command(tick)
    }

    /// Restore the newest automatic snapshot, or pause once there are none.
    fn reverse_step(&self) -> Option<Command> {
        let Some(snapshot) = self.shared.snapshots.lock().pop_newest() else {
            tracing::info!("Reverse playback reached its oldest snapshot, pausing");
            self.shared.control.lock().mode = RunMode::Paused;
            return None;
        };

        let result = self.shared.device.lock().import_state(&snapshot.state);
        match result {
            Ok(()) => {
                let command = Command::RevertToSnapshot { id: snapshot.id };
                let tick = self.shared.device.lock().tick();
                if let Some(event) = Event::echo(tick, &command) {
                    self.publish(&command, &event);
                }
                None
            }
            Err(e) => {
                tracing::error!("Reverse step to tick {} failed: {e}", snapshot.tick);
                self.shared.snapshots.lock().clear_auto();
                self.shared.control.lock().mode = RunMode::Paused;
                None
            }
        }
    }

    fn process_queued(&self, queued: QueuedCommand) {
        match self.execute(&queued.command) {
            Step::Done(event) => {
                // Auditors see the event before the caller sees the outcome.
                if let Some(event) = event {
                    self.publish(&queued.command, &event);
                }
                queued.completion.complete(Outcome::Applied);
            }
            Step::Partial(event) => {
                tracing::trace!("Partial run to {}, retrying {:?}", event.tick, queued.command);
                self.publish(&queued.command, &event);
                self.shared.queue.requeue(queued);
            }
            Step::Stalled => self.shared.queue.requeue(queued),
            Step::Rejected(reason) => {
                queued.completion.complete(Outcome::Rejected(reason));
            }
        }
    }

    fn process_idle(&self, command: &Command) {
        match self.execute(command) {
            Step::Done(Some(event)) | Step::Partial(event) => self.publish(command, &event),
            Step::Done(None) | Step::Stalled => {}
            Step::Rejected(reason) => {
                tracing::warn!("Idle command {command:?} rejected: {reason}");
            }
        }
    }

    /// Hand `event` to every auditor, in registration order.
    fn publish(&self, command: &Command, event: &Event) {
        let auditors: Vec<_> = self
            .shared
            .auditors
            .read()
            .iter()
            .map(|(_, auditor)| Arc::clone(auditor))
            .collect();
        for auditor in auditors {
            auditor.audit(command, event);
        }
    }

    fn tick(&self) -> u64 {
        self.shared.device.lock().tick()
    }

    /// Echo event for an engine-level command that was applied.
    fn engine_event(&self, command: &Command) -> Step {
        Step::Done(Event::echo(self.tick(), command))
    }

    fn execute(&self, command: &Command) -> Step {
        match command {
            Command::Unsupported { tag, payload } => {
                tracing::warn!(
                    "Skipping unsupported command tag {tag:#04x} ({} payload bytes)",
                    payload.len()
                );
                Step::Rejected(Rejection::Unsupported)
            }
            Command::Pause => {
                self.shared.control.lock().mode = RunMode::Paused;
                self.engine_event(command)
            }
            Command::Resume => {
                self.shared.control.lock().mode = RunMode::Running;
                self.engine_event(command)
            }
            Command::Reverse => {
                self.shared.control.lock().mode = RunMode::Reversing;
                self.engine_event(command)
            }
            Command::Lock => {
                let mut control = self.shared.control.lock();
                control.locks = control.locks.saturating_add(1);
                drop(control);
                self.engine_event(command)
            }
            Command::Unlock => {
                let mut control = self.shared.control.lock();
                control.locks = control.locks.saturating_sub(1);
                drop(control);
                self.engine_event(command)
            }
            Command::CreateSnapshot { id } => {
                let state = self.shared.device.lock().export_state();
                self.shared.snapshots.lock().create(*id, state);
                self.engine_event(command)
            }
            Command::RevertToSnapshot { id } => {
                let Some(state) = self.shared.snapshots.lock().revert(*id) else {
                    return Step::Rejected(Rejection::UnknownSnapshot(*id));
                };
                self.import(command, &state)
            }
            Command::DeleteSnapshot { id } => {
                if self.shared.snapshots.lock().delete(*id) {
                    self.engine_event(command)
                } else {
                    Step::Rejected(Rejection::UnknownSnapshot(*id))
                }
            }
            Command::LoadSnapshot { blob } => {
                self.shared.snapshots.lock().clear_auto();
                self.import(command, blob)
            }
            Command::RunUntil { .. } => self.run_until(command),
            _ => self.apply(command),
        }
    }

    fn import(&self, command: &Command, state: &[u8]) -> Step {
        let result = self.shared.device.lock().import_state(state);
        match result {
            Ok(()) => self.engine_event(command),
            Err(e) => {
                tracing::warn!("{} failed: {e}", command.name());
                Step::Rejected(Rejection::DeviceFault(e.to_string()))
            }
        }
    }

    fn run_until(&self, command: &Command) -> Step {
        let audio = Arc::clone(&*self.shared.audio.read());
        if audio.is_overrun() && !audio.wait_for_underrun(self.shared.config.audio_wait) {
            tracing::trace!("Audio buffer overrun, holding {command:?}");
            return Step::Stalled;
        }

        let forward = self.shared.control.lock().mode != RunMode::Reversing;
        if forward {
            let mut device = self.shared.device.lock();
            let tick = device.tick();
            let mut snapshots = self.shared.snapshots.lock();
            if snapshots.is_due(tick) {
                let id = snapshots.record(tick, device.export_state());
                tracing::trace!("Automatic snapshot {id:#x} at tick {tick}");
            }
        }

        match self.apply(command) {
            Step::Done(Some(event)) if event.is_partial_run() => Step::Partial(event),
            step => step,
        }
    }

    fn apply(&self, command: &Command) -> Step {
        let result = self.shared.device.lock().apply(command);
        match result {
            Ok(event) => Step::Done(event),
            Err(DeviceError::Unsupported(name)) => {
                tracing::warn!("Device does not support {name}, skipping");
                Step::Rejected(Rejection::Unsupported)
            }
            Err(e) => {
                tracing::warn!("{} rejected: {e}", command.name());
                Step::Rejected(Rejection::DeviceFault(e.to_string()))
            }
        }
    }
}

