//! Gain/volume control effect

use crate::node::{Buffer, ControlFrame, Node, NodeCore, ProcessContext};
use crate::value::{ControlValue, PortType};

/// A gain (volume) control that passes audio through with amplitude scaling
///
/// Ports: audio input `in`, control input `gain`, audio output `out`.
/// Parameter: `gain` (1.0 = unity, 0.0 = silence).
pub struct Gain {
    core: NodeCore,
    /// Smoothing to prevent clicks on rapid gain changes
    smoothed_gain: f32,
    smoothing_ms: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
}

impl Gain {
    /// Create a new gain node with the specified gain value
    pub fn new(gain: f32) -> Self {
        let core = NodeCore::new("gain")
            .with_input("in", PortType::Audio)
            .with_input("gain", PortType::Control)
            .with_output("out", PortType::Audio)
            .with_param("gain", gain);
        let mut node = Self {
            core,
            smoothed_gain: gain,
            smoothing_ms: 4.0,
            smooth_coeff: 0.0,
        };
        node.update_coeff();
        node
    }

    /// Set the smoothing time in milliseconds
    pub fn with_smoothing_ms(mut self, ms: f32) -> Self {
        self.smoothing_ms = ms.max(0.0);
        self.update_coeff();
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(self) -> Self {
        self.with_smoothing_ms(0.0)
    }

    pub fn with_fade_in(mut self, ms: f32) -> Self {
        self.core.set_fade_in_duration(ms);
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.core.param_f32("gain", 1.0)
    }

    fn update_coeff(&mut self) {
        // Time constant: after `smoothing_ms` we've covered ~63% of the distance to the target
        let samples = (self.smoothing_ms / 1000.0) * self.core.sample_rate() as f32;
        self.smooth_coeff = if samples > 0.0 { (-1.0 / samples).exp() } else { 0.0 };
    }
}

impl Node for Gain {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        self.core.prepare(sample_rate, block_size);
        self.update_coeff();
    }

    fn process_control(&mut self, inputs: &ControlFrame, _outputs: &mut ControlFrame) {
        if let Some(g) = inputs.get("gain").and_then(ControlValue::as_float) {
            self.core.set_param("gain", ControlValue::Float(g));
        }
    }

    fn process(&mut self, ctx: &ProcessContext<'_>, inputs: &[Buffer], outputs: &mut [Buffer]) {
        let (Some(input), Some(out)) = (inputs.first(), outputs.first_mut()) else {
            return;
        };

        let frames = ctx.frames;
        let target = self.gain();
        let coeff = self.smooth_coeff;
        let mut gain = self.smoothed_gain;

        for (out_sample, &in_sample) in out[..frames].iter_mut().zip(&input[..frames]) {
            gain = target + coeff * (gain - target);
            *out_sample = in_sample * gain;
        }

        self.smoothed_gain = gain;
        self.core.apply_fade_in(&mut out[..frames]);
    }
}
