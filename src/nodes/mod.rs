//! Built-in nodes
//!
//! Nodes are organized into two categories:
//! - `source`: Generate signal (no audio inputs) - oscillators, constants, hardware input
//! - `effect`: Process audio (inputs → outputs) - gain, slew limiting
//!
//! Every built-in node applies its fade-in to its own output. Pass
//! `with_fade_in(0.0)` to get the raw signal from the first sample.

pub mod effect;
pub mod source;

pub use effect::{Gain, SlewLimiter};
pub use source::{Constant, PhysicalInput, Sine};
