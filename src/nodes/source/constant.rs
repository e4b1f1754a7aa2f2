//! Constant (DC) source

use crate::node::{Buffer, ControlFrame, Node, NodeCore, ProcessContext};
use crate::value::{ControlValue, PortType};

/// Emits the same value on every sample.
///
/// Ports: control input `value`, audio output `out`. Parameter: `value`.
pub struct Constant {
    core: NodeCore,
}

impl Constant {
    pub fn new(value: f32) -> Self {
        let core = NodeCore::new("constant")
            .with_input("value", PortType::Control)
            .with_output("out", PortType::Audio)
            .with_param("value", value);
        Self { core }
    }

    pub fn with_fade_in(mut self, ms: f32) -> Self {
        self.core.set_fade_in_duration(ms);
        self
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.core.param_f32("value", 0.0)
    }
}

impl Node for Constant {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_control(&mut self, inputs: &ControlFrame, _outputs: &mut ControlFrame) {
        if let Some(v) = inputs.get("value").and_then(ControlValue::as_float) {
            self.core.set_param("value", ControlValue::Float(v));
        }
    }

    fn process(&mut self, ctx: &ProcessContext<'_>, _inputs: &[Buffer], outputs: &mut [Buffer]) {
        let value = self.value();
        let frames = ctx.frames;
        for buffer in outputs.iter_mut() {
            buffer[..frames].iter_mut().for_each(|s| *s = value);
        }
        self.core.apply_fade_in_channels(outputs, frames);
    }
}
