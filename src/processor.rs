//! The audio-thread half of a graph.
//!
//! A [`GraphProcessor`] owns every node instance and the schedule currently
//! being executed. It only learns about changes through a lock-free command
//! queue, and only applies them between blocks; whatever it replaces is sent
//! back to the [`GraphManager`](crate::GraphManager) to be dropped there.

use alloc::boxed::Box;
use alloc::vec::Vec;

use rtrb::{Consumer, Producer};

use crate::error::GraphError;
use crate::node::{ControlFrame, Node, ProcessContext};
use crate::schedule::{Entry, Schedule, StreamFormat};
use crate::value::{ControlValue, Event};

/// A node instance together with the serial that tells apart reuses of its slot.
pub(crate) struct NodeSlot {
    pub(crate) serial: u64,
    pub(crate) node: Box<dyn Node>,
}

pub(crate) enum ScheduleChange {
    Keep,
    Replace(Box<Schedule>),
    Unprepare,
}

/// One structural change, applied atomically at a block boundary.
///
/// The same allocation travels back to the control thread carrying whatever
/// the audio thread swapped out.
pub(crate) struct Transaction {
    /// Replacement slot table, at least as long as the current one
    pub(crate) grow: Option<Vec<Option<NodeSlot>>>,
    pub(crate) remove: Vec<usize>,
    pub(crate) insert: Vec<(usize, NodeSlot)>,
    pub(crate) format: Option<StreamFormat>,
    pub(crate) schedule: ScheduleChange,
    /// Filled on the audio thread; capacity is reserved before sending
    #[allow(dead_code)]
    pub(crate) removed: Vec<NodeSlot>,
    #[allow(dead_code)]
    pub(crate) old_schedule: Option<Box<Schedule>>,
}

impl Transaction {
    pub(crate) fn new() -> Self {
        Self {
            grow: None,
            remove: Vec::new(),
            insert: Vec::new(),
            format: None,
            schedule: ScheduleChange::Keep,
            removed: Vec::new(),
            old_schedule: None,
        }
    }
}

/// Lightweight per-node updates that bypass rescheduling.
#[derive(Clone, Debug)]
pub(crate) enum NodeMessage {
    SetParam { index: usize, value: ControlValue },
    SetFadeIn(f32),
    ResetFadeIn,
}

/// Apply a message to a node, returning a replaced parameter value.
pub(crate) fn deliver(node: &mut dyn Node, message: NodeMessage) -> Option<ControlValue> {
    let core = node.core_mut();
    match message {
        NodeMessage::SetParam { index, value } => core.replace_param_at(index, value),
        NodeMessage::SetFadeIn(ms) => {
            core.set_fade_in_duration(ms);
            None
        }
        NodeMessage::ResetFadeIn => {
            core.reset_fade_in();
            None
        }
    }
}

pub(crate) enum Command {
    Apply(Box<Transaction>),
    Message {
        slot: usize,
        serial: u64,
        message: NodeMessage,
    },
}

/// Things the audio thread is done with and must not free itself.
#[allow(dead_code)]
pub(crate) enum Retired {
    Transaction(Box<Transaction>),
    Value(ControlValue),
}

/// The audio thread's end of the return queue.
struct RetireQueue {
    producer: Producer<Retired>,
    /// Items freed on the audio thread because the queue was full
    overflows: usize,
}

impl RetireQueue {
    #[inline]
    fn push(&mut self, item: Retired) {
        if self.producer.push(item).is_err() {
            self.overflows += 1;
        }
    }
}

/// Runs the graph one block at a time. Lives on the audio thread.
///
/// Created together with its [`GraphManager`](crate::GraphManager) by
/// [`GraphManager::new`](crate::GraphManager::new). Nothing in here allocates,
/// locks or logs once a schedule has been received. Node `prepare` calls for a
/// format change also happen here, under the same rules.
pub struct GraphProcessor {
    slots: Vec<Option<NodeSlot>>,
    schedule: Option<Box<Schedule>>,
    commands: Consumer<Command>,
    retired: RetireQueue,
    num_physical_inputs: usize,
    dropped_events: usize,
    blocks_processed: u64,
}

impl GraphProcessor {
    pub(crate) fn new(
        node_capacity: usize,
        num_physical_inputs: usize,
        commands: Consumer<Command>,
        retired: Producer<Retired>,
    ) -> Self {
        Self {
            slots: (0..node_capacity).map(|_| None).collect(),
            schedule: None,
            commands,
            retired: RetireQueue {
                producer: retired,
                overflows: 0,
            },
            num_physical_inputs,
            dropped_events: 0,
            blocks_processed: 0,
        }
    }

    /// Process one block of `n_frames` frames through every node in execution order.
    ///
    /// Pending graph changes are applied first. `n_frames` is clamped to the
    /// prepared block size. Returns [`GraphError::Unprepared`] if no prepared
    /// graph has been received yet.
    pub fn process(&mut self, n_frames: usize) -> Result<(), GraphError> {
        self.apply_commands();

        let Some(schedule) = self.schedule.as_deref_mut() else {
            return Err(GraphError::Unprepared);
        };
        let Schedule {
            format,
            entries,
            physical_inputs,
            ..
        } = schedule;
        let ctx = ProcessContext::new(format.sample_rate, format.block_size, n_frames, physical_inputs);

        for i in 0..entries.len() {
            let (done, rest) = entries.split_at_mut(i);
            let entry = &mut rest[0];

            let node = match self.slots.get_mut(entry.slot) {
                Some(Some(slot)) if slot.serial == entry.serial => &mut slot.node,
                _ => {
                    entry.audio_out.iter_mut().for_each(|b| b.silence());
                    continue;
                }
            };

            route_control(done, entry, &mut self.retired);
            node.process_control(&entry.control_in, &mut entry.control_out);

            route_events(done, entry, ctx.frames);
            entry.event_out.clear();
            node.process_event(&entry.event_in, &mut entry.event_out);

            sum_audio(done, entry, ctx.frames);
            node.process(&ctx, &entry.audio_in, &mut entry.audio_out);

            self.dropped_events += entry.event_in.take_dropped() + entry.event_out.take_dropped();
        }

        self.blocks_processed += 1;
        Ok(())
    }

    /// Audio output `index` of node `id` from the last processed block.
    ///
    /// The slice is always `block_size` long. `None` for unknown nodes,
    /// out-of-range indices, or an unprepared graph.
    pub fn node_output(&self, id: &str, index: usize) -> Option<&[f32]> {
        self.schedule
            .as_deref()?
            .entry(id)?
            .audio_out
            .get(index)
            .map(|b| &b[..])
    }

    /// Latest value a node produced on a control output port.
    pub fn control_output(&self, id: &str, port: &str) -> Option<&ControlValue> {
        self.schedule.as_deref()?.entry(id)?.control_out.get(port)
    }

    /// Events a node emitted on an event output port during the last block.
    pub fn event_output(&self, id: &str, port: &str) -> &[Event] {
        self.schedule
            .as_deref()
            .and_then(|s| s.entry(id))
            .map(|e: &Entry| e.event_out.events(port))
            .unwrap_or(&[])
    }

    /// Copy hardware input for `channel` into the graph ahead of the next [`process`](Self::process).
    ///
    /// At most `block_size` samples are taken; the rest of the channel is
    /// silenced. Returns `false` if the channel does not exist or the graph is
    /// unprepared.
    pub fn set_physical_input(&mut self, channel: usize, data: &[f32]) -> bool {
        self.apply_commands();

        let Some(buffer) = self
            .schedule
            .as_deref_mut()
            .and_then(|s| s.physical_inputs.get_mut(channel))
        else {
            return false;
        };
        let len = data.len().min(buffer.len());
        buffer[..len].copy_from_slice(&data[..len]);
        buffer[len..].iter_mut().for_each(|s| *s = 0.0);
        true
    }

    /// The last data delivered for `channel`, `block_size` samples long.
    pub fn get_physical_input(&self, channel: usize) -> Option<&[f32]> {
        self.schedule
            .as_deref()?
            .physical_inputs
            .get(channel)
            .map(|b| &b[..])
    }

    pub fn num_physical_inputs(&self) -> usize {
        self.num_physical_inputs
    }

    /// Whether a prepared schedule has been received.
    pub fn is_prepared(&self) -> bool {
        self.schedule.is_some()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.schedule.as_deref().map(|s| s.format.sample_rate)
    }

    pub fn block_size(&self) -> Option<usize> {
        self.schedule.as_deref().map(|s| s.format.block_size)
    }

    /// Events dropped because an event queue was full.
    pub fn dropped_events(&self) -> usize {
        self.dropped_events
    }

    /// Retired items freed on this thread because the return queue was full.
    ///
    /// Stays at zero as long as the control side calls
    /// [`GraphManager::collect_garbage`](crate::GraphManager::collect_garbage)
    /// or mutates the graph often enough.
    pub fn retire_overflows(&self) -> usize {
        self.retired.overflows
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                Command::Apply(transaction) => self.apply(transaction),
                Command::Message {
                    slot,
                    serial,
                    message,
                } => {
                    let replaced = match self.slots.get_mut(slot) {
                        Some(Some(s)) if s.serial == serial => deliver(s.node.as_mut(), message),
                        // Stale: the node is gone, but the payload may still own memory.
                        _ => match message {
                            NodeMessage::SetParam { value, .. } => Some(value),
                            _ => None,
                        },
                    };
                    if let Some(value) = replaced.filter(ControlValue::owns_heap) {
                        self.retired.push(Retired::Value(value));
                    }
                }
            }
        }
    }

    fn apply(&mut self, mut tx: Box<Transaction>) {
        if let Some(mut table) = tx.grow.take() {
            for (new, old) in table.iter_mut().zip(self.slots.iter_mut()) {
                *new = old.take();
            }
            core::mem::swap(&mut self.slots, &mut table);
            tx.grow = Some(table);
        }

        for &slot in &tx.remove {
            if let Some(node) = self.slots.get_mut(slot).and_then(Option::take) {
                tx.removed.push(node);
            }
        }

        for (slot, node) in tx.insert.drain(..) {
            if let Some(target) = self.slots.get_mut(slot) {
                *target = Some(node);
            }
        }

        if let Some(format) = tx.format {
            for slot in self.slots.iter_mut().flatten() {
                slot.node.prepare(format.sample_rate, format.block_size);
            }
        }

        match core::mem::replace(&mut tx.schedule, ScheduleChange::Keep) {
            ScheduleChange::Keep => {}
            ScheduleChange::Replace(mut schedule) => {
                if let Some(previous) = self.schedule.as_deref_mut() {
                    schedule.inherit_physical_inputs(previous);
                    schedule.inherit_controls(previous);
                }
                tx.old_schedule = self.schedule.replace(schedule);
            }
            ScheduleChange::Unprepare => tx.old_schedule = self.schedule.take(),
        }

        self.retired.push(Retired::Transaction(tx));
    }
}

/// Copy routed control values in. Displaced text goes back to the control thread.
fn route_control(done: &[Entry], entry: &mut Entry, retired: &mut RetireQueue) {
    let Entry {
        control_routes,
        control_in,
        ..
    } = entry;
    for route in control_routes.iter() {
        let source: &ControlFrame = &done[route.source.entry].control_out;
        let Some(value) = source.value_at(route.source.port) else {
            continue;
        };
        if control_in.value_at(route.input) == Some(value) {
            continue;
        }
        if let Some(old) = control_in
            .replace_at(route.input, value.clone())
            .filter(ControlValue::owns_heap)
        {
            retired.push(Retired::Value(old));
        }
    }
}

fn route_events(done: &[Entry], entry: &mut Entry, frames: usize) {
    let Entry {
        event_routes,
        event_in,
        ..
    } = entry;
    event_in.clear();
    let last = frames.saturating_sub(1);
    for route in event_routes.iter() {
        for event in done[route.source.entry].event_out.queue(route.source.port) {
            let mut event = event.clone();
            event.sample_offset = event.sample_offset.min(last);
            event_in.insert_ordered(route.input, event);
        }
    }
}

/// Fan-in: every audio input port gets its own buffer holding the sum of its sources.
fn sum_audio(done: &[Entry], entry: &mut Entry, frames: usize) {
    let Entry {
        audio_sources,
        audio_in,
        ..
    } = entry;
    for (buffer, sources) in audio_in.iter_mut().zip(audio_sources.iter()) {
        buffer.silence();
        let frames = frames.min(buffer.len());
        for source in sources {
            let input = &done[source.entry].audio_out[source.port];
            for (acc, sample) in buffer[..frames].iter_mut().zip(&input[..frames]) {
                *acc += *sample;
            }
        }
    }
}
