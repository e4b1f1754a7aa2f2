//! Bridge from a hardware input channel into the graph

use crate::node::{Buffer, Node, NodeCore, ProcessContext};
use crate::value::PortType;

/// Copies one physical input channel to its audio output `out`.
///
/// Outputs silence when the channel does not exist.
pub struct PhysicalInput {
    core: NodeCore,
    channel: usize,
}

impl PhysicalInput {
    pub fn new(channel: usize) -> Self {
        let core = NodeCore::new("physical_input").with_output("out", PortType::Audio);
        Self { core, channel }
    }

    pub fn with_fade_in(mut self, ms: f32) -> Self {
        self.core.set_fade_in_duration(ms);
        self
    }

    pub fn channel(&self) -> usize {
        self.channel
    }
}

impl Node for PhysicalInput {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process(&mut self, ctx: &ProcessContext<'_>, _inputs: &[Buffer], outputs: &mut [Buffer]) {
        let Some(out) = outputs.first_mut() else {
            return;
        };
        let frames = ctx.frames;
        let copied = match ctx.physical_input(self.channel) {
            Some(data) => {
                out[..data.len()].copy_from_slice(data);
                data.len()
            }
            None => 0,
        };
        out[copied..frames].iter_mut().for_each(|s| *s = 0.0);
        self.core.apply_fade_in(&mut out[..frames]);
    }
}
