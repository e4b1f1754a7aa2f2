//! Plays a sine wave through the default output device, gliding its frequency
//! from the control thread while the audio thread keeps running.
//!
//! Run with `cargo run --example cpal_sine --features cpal_sink`.

use std::thread::sleep;
use std::time::Duration;

use tonegraph::device::CpalDevice;
use tonegraph::nodes::{Gain, Sine};
use tonegraph::{GraphManager, GraphSettings};

const BLOCK_SIZE: usize = 256;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let device = CpalDevice::default_output().ok_or("no output device")?;
    println!(
        "Using {} at {} Hz, {} channels",
        device.name(),
        device.sample_rate(),
        device.channels()
    );

    let (mut graph, processor) = GraphManager::new(GraphSettings::default());
    graph.create_node("sine", Sine::new(220.0).with_amplitude(0.3))?;
    graph.create_node("out", Gain::new(0.8))?;
    graph.connect("sine", "out", "out", "in")?;
    graph.prepare(device.sample_rate(), BLOCK_SIZE)?;

    let _output = device.start(processor, "out", BLOCK_SIZE)?;

    for step in 0..40 {
        graph.set_param("sine", "frequency", 220.0 + step as f32 * 11.0)?;
        sleep(Duration::from_millis(50));
    }

    graph.set_fade_in_duration("sine", 200.0)?;
    graph.reset_fade_in("sine")?;
    sleep(Duration::from_secs(1));

    Ok(())
}
