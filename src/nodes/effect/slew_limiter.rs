//! Slew rate limiter effect

use crate::node::{Buffer, ControlFrame, Node, NodeCore, ProcessContext};
use crate::value::{ControlValue, PortType};

/// A slew rate limiter that smooths sudden changes in audio
///
/// Useful for:
/// - Smoothing control signals
/// - Creating portamento/glide effects
/// - Reducing harsh transients
///
/// Ports: audio input `in`, control input `rate`, audio output `out`.
/// Parameter: `rate`, the maximum change per sample.
pub struct SlewLimiter {
    core: NodeCore,
    last: f32,
    /// Rate in units per second, converted to `rate` whenever the sample rate changes
    rate_per_second: Option<f32>,
}

impl SlewLimiter {
    /// A rate of 1.0 means the signal can change by at most 1.0 per sample.
    /// Lower values = more smoothing.
    pub fn new(rate: f32) -> Self {
        let core = NodeCore::new("slew_limiter")
            .with_input("in", PortType::Audio)
            .with_input("rate", PortType::Control)
            .with_output("out", PortType::Audio)
            .with_param("rate", rate.abs());
        Self {
            core,
            last: 0.0,
            rate_per_second: None,
        }
    }

    /// Create with a rate specified in units per second
    ///
    /// For example, `from_rate_per_second(1000.0)` at 48kHz means
    /// the signal can change by ~0.02 per sample.
    pub fn from_rate_per_second(rate: f32) -> Self {
        let mut node = Self::new(0.0);
        node.rate_per_second = Some(rate.abs());
        node.update_rate();
        node
    }

    pub fn with_fade_in(mut self, ms: f32) -> Self {
        self.core.set_fade_in_duration(ms);
        self
    }

    #[inline]
    pub fn rate(&self) -> f32 {
        self.core.param_f32("rate", 0.0)
    }

    fn update_rate(&mut self) {
        if let Some(rps) = self.rate_per_second {
            let rate = rps / self.core.sample_rate().max(1) as f32;
            self.core.set_param("rate", ControlValue::Float(rate));
        }
    }
}

impl Node for SlewLimiter {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        self.core.prepare(sample_rate, block_size);
        self.update_rate();
    }

    fn process_control(&mut self, inputs: &ControlFrame, _outputs: &mut ControlFrame) {
        if let Some(r) = inputs.get("rate").and_then(ControlValue::as_float) {
            self.rate_per_second = None;
            self.core.set_param("rate", ControlValue::Float(r.abs()));
        }
    }

    fn process(&mut self, ctx: &ProcessContext<'_>, inputs: &[Buffer], outputs: &mut [Buffer]) {
        let (Some(input), Some(out)) = (inputs.first(), outputs.first_mut()) else {
            return;
        };

        let frames = ctx.frames;
        let max_delta = self.rate();
        let mut last = self.last;

        for (out_sample, &in_sample) in out[..frames].iter_mut().zip(&input[..frames]) {
            last += (in_sample - last).clamp(-max_delta, max_delta);
            *out_sample = last;
        }

        self.last = last;
        self.core.apply_fade_in(&mut out[..frames]);
    }
}
