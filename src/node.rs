//! Core node trait and the per-node state every node carries.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::borrow::Borrow;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::value::{ControlValue, Event, Param, Port, PortType};

/// Fade-in length a freshly constructed node starts with.
pub const DEFAULT_FADE_IN_MS: f32 = 50.0;

/// Unique identifier for a node within a graph.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One channel of audio, `block_size` samples long.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Buffer(Vec<f32>);

impl Buffer {
    /// A buffer of `len` zeroed samples.
    pub fn silent(len: usize) -> Self {
        Self(alloc::vec![0.0; len])
    }

    /// Zero every sample.
    #[inline]
    pub fn silence(&mut self) {
        self.0.iter_mut().for_each(|s| *s = 0.0);
    }
}

impl Deref for Buffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.0
    }
}

impl From<Vec<f32>> for Buffer {
    fn from(samples: Vec<f32>) -> Self {
        Self(samples)
    }
}

/// Information available during audio processing.
///
/// Passed to every [`Node::process`] call.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext<'a> {
    /// Sample rate of the graph in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Length of every buffer handed to the node
    pub block_size: usize,
    /// Number of frames to produce this block, never more than `block_size`
    pub frames: usize,
    physical_inputs: &'a [Buffer],
}

impl<'a> ProcessContext<'a> {
    pub fn new(sample_rate: u32, block_size: usize, frames: usize, physical_inputs: &'a [Buffer]) -> Self {
        Self {
            sample_rate,
            block_size,
            frames: frames.min(block_size),
            physical_inputs,
        }
    }

    /// Hardware input `channel` for the current block, as delivered by the audio driver.
    pub fn physical_input(&self, channel: usize) -> Option<&'a [f32]> {
        let frames = self.frames;
        self.physical_inputs.get(channel).map(|b| &b[..frames.min(b.len())])
    }

    pub fn num_physical_inputs(&self) -> usize {
        self.physical_inputs.len()
    }
}

/// Latest control value per port, keyed by port name.
#[derive(Clone, Debug, Default)]
pub struct ControlFrame {
    slots: Vec<(String, Option<ControlValue>)>,
}

impl ControlFrame {
    pub fn with_ports<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slots: names.into_iter().map(|n| (n.into(), None)).collect(),
        }
    }

    pub(crate) fn for_ports<'p>(ports: impl Iterator<Item = &'p Port>) -> Self {
        Self::with_ports(ports.filter(|p| p.kind == PortType::Control).map(|p| p.name.clone()))
    }

    /// Current value on `port`, if one has been produced yet.
    pub fn get(&self, port: &str) -> Option<&ControlValue> {
        self.slots
            .iter()
            .find(|(name, _)| name == port)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Store `value` on `port`. Returns `false` if the frame has no such port.
    pub fn set(&mut self, port: &str, value: ControlValue) -> bool {
        match self.slots.iter_mut().find(|(name, _)| name == port) {
            Some((_, slot)) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Ports that currently hold a value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ControlValue)> {
        self.slots
            .iter()
            .filter_map(|(name, v)| v.as_ref().map(|v| (name.as_str(), v)))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn index_of(&self, port: &str) -> Option<usize> {
        self.slots.iter().position(|(name, _)| name == port)
    }

    #[inline]
    pub(crate) fn value_at(&self, index: usize) -> Option<&ControlValue> {
        self.slots.get(index).and_then(|(_, v)| v.as_ref())
    }

    /// Store `value` at `index`, handing back whatever it displaced.
    #[inline]
    pub(crate) fn replace_at(&mut self, index: usize, value: ControlValue) -> Option<ControlValue> {
        self.slots.get_mut(index).and_then(|(_, slot)| slot.replace(value))
    }

    /// Exchange values with a frame built from the same ports.
    pub(crate) fn swap_values(&mut self, other: &mut ControlFrame) {
        for ((_, a), (_, b)) in self.slots.iter_mut().zip(other.slots.iter_mut()) {
            core::mem::swap(a, b);
        }
    }
}

/// Per-port event queues for one block.
///
/// Queues are allocated once with a fixed capacity; pushes past it are
/// dropped and counted so the audio thread never reallocates.
#[derive(Clone, Debug, Default)]
pub struct EventFrame {
    queues: Vec<(String, Vec<Event>)>,
    capacity: usize,
    dropped: usize,
}

impl EventFrame {
    pub fn with_ports<I, S>(names: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: names
                .into_iter()
                .map(|n| (n.into(), Vec::with_capacity(capacity)))
                .collect(),
            capacity,
            dropped: 0,
        }
    }

    pub(crate) fn for_ports<'p>(ports: impl Iterator<Item = &'p Port>, capacity: usize) -> Self {
        Self::with_ports(
            ports.filter(|p| p.kind == PortType::Event).map(|p| p.name.clone()),
            capacity,
        )
    }

    /// Events on `port` for this block. Empty for unknown ports.
    pub fn events(&self, port: &str) -> &[Event] {
        self.queues
            .iter()
            .find(|(name, _)| name == port)
            .map(|(_, q)| q.as_slice())
            .unwrap_or(&[])
    }

    /// Append an event to `port`. Returns `false` if the port is unknown or its queue is full.
    pub fn push(&mut self, port: &str, event: Event) -> bool {
        match self.index_of(port) {
            Some(index) => self.push_at(index, event),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Event])> {
        self.queues.iter().map(|(name, q)| (name.as_str(), q.as_slice()))
    }

    /// Events lost to full queues and not yet collected.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub(crate) fn index_of(&self, port: &str) -> Option<usize> {
        self.queues.iter().position(|(name, _)| name == port)
    }

    #[inline]
    pub(crate) fn queue(&self, index: usize) -> &[Event] {
        self.queues.get(index).map(|(_, q)| q.as_slice()).unwrap_or(&[])
    }

    fn push_at(&mut self, index: usize, event: Event) -> bool {
        let capacity = self.capacity;
        match self.queues.get_mut(index) {
            Some((_, q)) if q.len() < capacity => {
                q.push(event);
                true
            }
            Some(_) => {
                self.dropped += 1;
                false
            }
            None => false,
        }
    }

    /// Insert keeping the queue sorted by `sample_offset`; equal offsets keep arrival order.
    pub(crate) fn insert_ordered(&mut self, index: usize, event: Event) {
        let capacity = self.capacity;
        if let Some((_, q)) = self.queues.get_mut(index) {
            if q.len() >= capacity {
                self.dropped += 1;
                return;
            }
            let at = q
                .iter()
                .rposition(|e| e.sample_offset <= event.sample_offset)
                .map_or(0, |i| i + 1);
            q.insert(at, event);
        }
    }

    pub(crate) fn clear(&mut self) {
        for (_, q) in self.queues.iter_mut() {
            q.clear();
        }
    }

    pub(crate) fn take_dropped(&mut self) -> usize {
        core::mem::take(&mut self.dropped)
    }
}

const TAG_FLOAT: u64 = 0;
const TAG_INT: u64 = 1;
const TAG_BOOL: u64 = 2;
const TAG_TEXT: u64 = 3;

/// Parameter values published for readers on other threads.
///
/// One `AtomicU64` per parameter: a type tag in the high half, the value bits
/// in the low half. Text is tagged but not copied, so its readers fall back to
/// their own record of the last value written.
#[derive(Debug)]
pub(crate) struct SharedParams {
    values: Box<[AtomicU64]>,
}

impl SharedParams {
    fn new(params: &[Param]) -> Self {
        Self {
            values: params.iter().map(|p| AtomicU64::new(Self::pack(&p.value))).collect(),
        }
    }

    fn pack(value: &ControlValue) -> u64 {
        let (tag, bits) = match *value {
            ControlValue::Float(f) => (TAG_FLOAT, f.to_bits()),
            ControlValue::Int(i) => (TAG_INT, i as u32),
            ControlValue::Bool(b) => (TAG_BOOL, b as u32),
            ControlValue::Text(_) => (TAG_TEXT, 0),
        };
        (tag << 32) | bits as u64
    }

    #[inline]
    pub(crate) fn store(&self, index: usize, value: &ControlValue) {
        if let Some(slot) = self.values.get(index) {
            slot.store(Self::pack(value), Ordering::Relaxed);
        }
    }

    /// The latest value at `index`. `None` for text and unknown indices.
    pub(crate) fn load(&self, index: usize) -> Option<ControlValue> {
        let packed = self.values.get(index)?.load(Ordering::Relaxed);
        let bits = packed as u32;
        match packed >> 32 {
            TAG_FLOAT => Some(ControlValue::Float(f32::from_bits(bits))),
            TAG_INT => Some(ControlValue::Int(bits as i32)),
            TAG_BOOL => Some(ControlValue::Bool(bits != 0)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct FadeIn {
    duration_ms: f32,
    samples: usize,
    position: usize,
    active: bool,
}

/// State shared by every node: identity, ports, parameters and the fade-in ramp.
///
/// Node implementations embed a `NodeCore` and hand it out through
/// [`Node::core`] / [`Node::core_mut`]. Ports are declared with the builder
/// methods when the node is constructed and cannot change afterwards.
#[derive(Clone, Debug)]
pub struct NodeCore {
    id: NodeId,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    params: Vec<Param>,
    fade: FadeIn,
    sample_rate: u32,
    block_size: usize,
    shared: Option<Arc<SharedParams>>,
}

impl NodeCore {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
            fade: FadeIn {
                duration_ms: DEFAULT_FADE_IN_MS,
                samples: 0,
                position: 0,
                active: false,
            },
            sample_rate: 44100,
            block_size: 512,
            shared: None,
        }
    }

    /// Declare an input port (builder pattern)
    pub fn with_input(mut self, name: impl Into<String>, kind: PortType) -> Self {
        self.inputs.push(Port::new(name, kind));
        self
    }

    /// Declare an output port (builder pattern)
    pub fn with_output(mut self, name: impl Into<String>, kind: PortType) -> Self {
        self.outputs.push(Port::new(name, kind));
        self
    }

    /// Declare a parameter with its initial value (builder pattern)
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ControlValue>) -> Self {
        let param = Param::new(name, value);
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => existing.value = param.value,
            None => self.params.push(param),
        }
        self
    }

    /// Set the initial fade-in length (builder pattern)
    pub fn with_fade_in(mut self, ms: f32) -> Self {
        self.set_fade_in_duration(ms);
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: NodeId) {
        self.id = id;
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn param(&self, name: &str) -> Option<&ControlValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// Numeric value of a parameter, `default` if missing or non-numeric.
    #[inline]
    pub fn param_f32(&self, name: &str, default: f32) -> f32 {
        self.param(name).and_then(ControlValue::as_float).unwrap_or(default)
    }

    /// Overwrite a parameter. Returns `false` if the node has no parameter by that name.
    pub fn set_param(&mut self, name: &str, value: ControlValue) -> bool {
        self.replace_param(name, value).is_ok()
    }

    /// Like [`set_param`](Self::set_param) but hands back the previous value,
    /// or the rejected one if `name` is unknown.
    pub(crate) fn replace_param(&mut self, name: &str, value: ControlValue) -> Result<ControlValue, ControlValue> {
        match self.params.iter().position(|p| p.name == name) {
            Some(index) => Ok(self.swap_param(index, value)),
            None => Err(value),
        }
    }

    pub(crate) fn replace_param_at(&mut self, index: usize, value: ControlValue) -> Option<ControlValue> {
        (index < self.params.len()).then(|| self.swap_param(index, value))
    }

    // `index` must be in range.
    fn swap_param(&mut self, index: usize, value: ControlValue) -> ControlValue {
        if let Some(shared) = &self.shared {
            shared.store(index, &value);
        }
        core::mem::replace(&mut self.params[index].value, value)
    }

    /// Publish every later parameter write to a lock-free copy the control thread reads.
    pub(crate) fn share_params(&mut self) -> Arc<SharedParams> {
        let shared = Arc::new(SharedParams::new(&self.params));
        self.shared = Some(shared.clone());
        shared
    }

    /// Reset block-rate dependent state for a new stream format and restart the fade-in.
    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.update_fade_in_samples();
        self.reset_fade_in();
    }

    pub fn fade_in_duration(&self) -> f32 {
        self.fade.duration_ms
    }

    /// Fade-in length in samples at the current sample rate.
    pub fn fade_in_samples(&self) -> usize {
        self.fade.samples
    }

    pub fn is_fading_in(&self) -> bool {
        self.fade.active
    }

    /// Set the fade-in length in milliseconds. `0` disables it.
    pub fn set_fade_in_duration(&mut self, ms: f32) {
        self.fade.duration_ms = ms.max(0.0);
        self.update_fade_in_samples();
        if self.fade.duration_ms == 0.0 {
            self.fade.active = false;
        }
    }

    /// Restart the ramp from silence, e.g. when a node is reactivated.
    pub fn reset_fade_in(&mut self) {
        self.fade.position = 0;
        self.fade.active = self.fade.duration_ms > 0.0;
    }

    /// Apply the fade-in ramp to one output buffer and advance it.
    ///
    /// Sample `i` of the ramp is scaled by `i / fade_in_samples`. Once the
    /// ramp completes this is a no-op until [`reset_fade_in`](Self::reset_fade_in).
    pub fn apply_fade_in(&mut self, buffer: &mut [f32]) {
        if !self.fade.active {
            return;
        }
        let advanced = Self::ramp(&self.fade, buffer);
        self.advance(advanced, buffer.len());
    }

    /// Apply the same ramp segment to every buffer, advancing the ramp once.
    pub fn apply_fade_in_channels(&mut self, buffers: &mut [Buffer], frames: usize) {
        if !self.fade.active {
            return;
        }
        let mut advanced = 0;
        for buffer in buffers.iter_mut() {
            let len = frames.min(buffer.len());
            advanced = Self::ramp(&self.fade, &mut buffer[..len]);
        }
        self.advance(advanced, frames);
    }

    // Returns how many samples were inside the ramp.
    #[inline]
    fn ramp(fade: &FadeIn, buffer: &mut [f32]) -> usize {
        let total = fade.samples;
        let remaining = total.saturating_sub(fade.position);
        let n = remaining.min(buffer.len());
        for (i, sample) in buffer[..n].iter_mut().enumerate() {
            *sample *= (fade.position + i) as f32 / total as f32;
        }
        n
    }

    #[inline]
    fn advance(&mut self, advanced: usize, frames: usize) {
        self.fade.position += advanced;
        if advanced < frames || self.fade.position >= self.fade.samples {
            self.fade.active = self.fade.position < self.fade.samples;
        }
    }

    fn update_fade_in_samples(&mut self) {
        let samples = (self.fade.duration_ms as f64 / 1000.0) * self.sample_rate as f64;
        self.fade.samples = samples.round() as usize;
    }
}

/// The core trait for graph nodes.
///
/// Implement this trait to create custom nodes. A node embeds a [`NodeCore`]
/// describing its ports and parameters, and implements [`process`](Node::process)
/// for its audio ports. Control and event handling are optional.
///
/// ```
/// use tonegraph::{Buffer, Node, NodeCore, PortType, ProcessContext};
///
/// struct Offset {
///     core: NodeCore,
/// }
///
/// impl Offset {
///     fn new() -> Self {
///         let core = NodeCore::new("offset")
///             .with_input("in", PortType::Audio)
///             .with_output("out", PortType::Audio)
///             .with_param("amount", 0.5f32);
///         Self { core }
///     }
/// }
///
/// impl Node for Offset {
///     fn core(&self) -> &NodeCore { &self.core }
///     fn core_mut(&mut self) -> &mut NodeCore { &mut self.core }
///
///     fn process(&mut self, ctx: &ProcessContext, inputs: &[Buffer], outputs: &mut [Buffer]) {
///         let amount = self.core.param_f32("amount", 0.0);
///         let n = ctx.frames;
///         for (o, i) in outputs[0][..n].iter_mut().zip(&inputs[0][..n]) {
///             *o = *i + amount;
///         }
///         self.core.apply_fade_in(&mut outputs[0][..n]);
///     }
/// }
/// ```
///
/// # Real-time rules
///
/// `process`, `process_control` and `process_event` run on the audio thread:
/// they must not allocate, lock or block.
///
/// `prepare` runs once on the control thread when a node is created in an
/// already prepared graph. On every later format change it runs on the audio
/// thread at the block boundary where the new format takes effect, so the
/// same rules apply. Size buffers for the largest format in the constructor
/// and only re-slice or reset them here.
pub trait Node: Send + 'static {
    fn core(&self) -> &NodeCore;

    fn core_mut(&mut self) -> &mut NodeCore;

    /// Called for every stream format change, before the first block in that
    /// format. Overrides must forward to [`NodeCore::prepare`]. Usually runs
    /// on the audio thread; see the real-time rules above.
    fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        self.core_mut().prepare(sample_rate, block_size);
    }

    /// Process one block of audio.
    ///
    /// `inputs` holds one buffer per audio input port, in declaration order,
    /// already summed over every connection feeding that port (silence when
    /// unconnected). `outputs` holds one buffer per audio output port. Write
    /// the first `ctx.frames` samples of each output.
    fn process(&mut self, ctx: &ProcessContext<'_>, inputs: &[Buffer], outputs: &mut [Buffer]);

    /// Evaluate control ports once per block.
    fn process_control(&mut self, _inputs: &ControlFrame, _outputs: &mut ControlFrame) {}

    /// Consume this block's events and optionally emit new ones.
    fn process_event(&mut self, _inputs: &EventFrame, _outputs: &mut EventFrame) {}
}
