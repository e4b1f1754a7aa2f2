//! Sine wave oscillator

use crate::node::{Buffer, ControlFrame, EventFrame, Node, NodeCore, ProcessContext};
use crate::value::{ControlValue, PortType};

/// A sine wave oscillator (mono source)
///
/// Ports: control input `frequency`, event input `trigger`, audio output `out`.
/// Parameters: `frequency` (Hz) and `amplitude` (0.0 - 1.0).
///
/// Any event on `trigger` restarts the waveform at phase zero and replays the fade-in.
pub struct Sine {
    core: NodeCore,
    phase: f32,
}

impl Sine {
    pub fn new(frequency: f32) -> Self {
        let core = NodeCore::new("sine")
            .with_input("frequency", PortType::Control)
            .with_input("trigger", PortType::Event)
            .with_output("out", PortType::Audio)
            .with_param("frequency", frequency.max(0.0))
            .with_param("amplitude", 0.25f32); // -12dB, safe default
        Self { core, phase: 0.0 }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.core.set_param("amplitude", amplitude.clamp(0.0, 1.0).into());
        self
    }

    pub fn with_fade_in(mut self, ms: f32) -> Self {
        self.core.set_fade_in_duration(ms);
        self
    }

    #[inline]
    pub fn frequency(&self) -> f32 {
        self.core.param_f32("frequency", 0.0)
    }

    #[inline]
    pub fn amplitude(&self) -> f32 {
        self.core.param_f32("amplitude", 0.0)
    }
}

impl Node for Sine {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_control(&mut self, inputs: &ControlFrame, _outputs: &mut ControlFrame) {
        if let Some(f) = inputs.get("frequency").and_then(ControlValue::as_float) {
            self.core.set_param("frequency", ControlValue::Float(f.max(0.0)));
        }
    }

    fn process_event(&mut self, inputs: &EventFrame, _outputs: &mut EventFrame) {
        if !inputs.events("trigger").is_empty() {
            self.phase = 0.0;
            self.core.reset_fade_in();
        }
    }

    fn process(&mut self, ctx: &ProcessContext<'_>, _inputs: &[Buffer], outputs: &mut [Buffer]) {
        let Some((first, rest)) = outputs.split_first_mut() else {
            return;
        };

        let frames = ctx.frames;
        let phase_inc = self.frequency() / ctx.sample_rate.max(1) as f32;
        let amplitude = self.amplitude();

        for sample in first[..frames].iter_mut() {
            *sample = (self.phase * core::f32::consts::TAU).sin() * amplitude;
            self.phase += phase_inc;
            self.phase -= self.phase.floor();
        }
        self.core.apply_fade_in(&mut first[..frames]);

        for buffer in rest.iter_mut() {
            buffer[..frames].copy_from_slice(&first[..frames]);
        }
    }
}
