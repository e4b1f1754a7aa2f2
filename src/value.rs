//! Signal kinds and the values carried on control and event ports.

use alloc::string::String;
use alloc::sync::Arc;

/// The three signal domains a port can belong to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PortType {
    /// Continuous audio, one buffer of `block_size` samples per block
    Audio,
    /// Sampled control value, evaluated once per block
    Control,
    /// Discrete, sample-accurate events
    Event,
}

/// A value carried by a control port sample, an event payload or a parameter.
///
/// Text is stored as `Arc<str>` so routing a value between nodes on the audio
/// thread is a reference count bump rather than a string copy.
#[derive(Clone, PartialEq, Debug)]
pub enum ControlValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Text(Arc<str>),
}

impl ControlValue {
    /// Numeric view of the value. Integers and booleans are widened, text is not numeric.
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            ControlValue::Float(f) => Some(f),
            ControlValue::Int(i) => Some(i as f32),
            ControlValue::Bool(b) => Some(if b { 1.0 } else { 0.0 }),
            ControlValue::Text(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match *self {
            ControlValue::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            ControlValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ControlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// True for text values, whose drop may free memory.
    #[inline]
    pub(crate) fn owns_heap(&self) -> bool {
        matches!(self, ControlValue::Text(_))
    }
}

impl From<f32> for ControlValue {
    fn from(v: f32) -> Self {
        ControlValue::Float(v)
    }
}

impl From<i32> for ControlValue {
    fn from(v: i32) -> Self {
        ControlValue::Int(v)
    }
}

impl From<bool> for ControlValue {
    fn from(v: bool) -> Self {
        ControlValue::Bool(v)
    }
}

impl From<&str> for ControlValue {
    fn from(v: &str) -> Self {
        ControlValue::Text(Arc::from(v))
    }
}

impl From<String> for ControlValue {
    fn from(v: String) -> Self {
        ControlValue::Text(Arc::from(v))
    }
}

/// A discrete occurrence inside a block.
///
/// `sample_offset` is relative to the start of the block the event is delivered in.
#[derive(Clone, PartialEq, Debug)]
pub struct Event {
    pub kind: Arc<str>,
    pub data: ControlValue,
    pub sample_offset: usize,
}

impl Event {
    pub fn new(kind: &str, data: impl Into<ControlValue>, sample_offset: usize) -> Self {
        Self {
            kind: Arc::from(kind),
            data: data.into(),
            sample_offset,
        }
    }
}

/// A named, typed port. Fixed when the owning node is constructed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Port {
    pub name: String,
    pub kind: PortType,
}

impl Port {
    pub fn new(name: impl Into<String>, kind: PortType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A named parameter owned by a node.
#[derive(Clone, PartialEq, Debug)]
pub struct Param {
    pub name: String,
    pub value: ControlValue,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<ControlValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
