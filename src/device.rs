//! CPAL device discovery and an output driver for a [`GraphProcessor`].
//!
//! ```no_run
//! use tonegraph::device::CpalDevice;
//! use tonegraph::nodes::Sine;
//! use tonegraph::{GraphManager, GraphSettings};
//!
//! let device = CpalDevice::default_output().expect("no output device");
//! let (mut graph, processor) = GraphManager::new(GraphSettings::default());
//! graph.create_node("sine", Sine::new(440.0)).unwrap();
//! graph.prepare(device.sample_rate(), 256).unwrap();
//!
//! let _output = device.start(processor, "sine", 256).unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfig};
use tracing::{error, info};

use crate::processor::GraphProcessor;

/// Failures while opening or starting an output stream.
#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    #[error("Unsupported sample format: {0:?}")]
    UnsupportedFormat(SampleFormat),
    #[error(transparent)]
    Build(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    Play(#[from] cpal::PlayStreamError),
    #[error("The audio thread exited before the stream started.")]
    ThreadExited,
}

/// A discovered audio output device
pub struct CpalDevice {
    device: cpal::Device,
    config: SupportedStreamConfig,
    name: String,
}

impl CpalDevice {
    /// Get the system's default output device.
    ///
    /// Returns `None` if no audio device is available.
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        Self::from_device(device)
    }

    /// List all available output devices
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(Self::from_device).collect())
            .unwrap_or_default()
    }

    fn from_device(device: cpal::Device) -> Option<Self> {
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self { device, config, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// Run `processor` inside this device's output callback.
    ///
    /// Every device buffer is filled from the audio outputs of node `sink`,
    /// one graph block at a time. A mono sink is copied to every device
    /// channel. `max_block_size` bounds the block the renderer pulls and must
    /// be at least the block size the graph is prepared with.
    pub fn start(
        &self,
        processor: GraphProcessor,
        sink: &str,
        max_block_size: usize,
    ) -> Result<CpalOutput, DeviceError> {
        let renderer = Renderer::new(processor, sink, self.channels() as usize, max_block_size);
        let underruns = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let device = self.device.clone();
        let config = self.config.clone();
        let (started_tx, started_rx) = mpsc::channel();
        let thread_stop = stop.clone();
        let thread_underruns = underruns.clone();

        // Streams are not `Send` on every platform; the stream lives and dies on this thread.
        let thread = std::thread::spawn(move || {
            let stream = build_stream(&device, &config, renderer, thread_underruns).and_then(|stream| {
                stream.play()?;
                Ok(stream)
            });
            let stream = match stream {
                Ok(stream) => {
                    let _ = started_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };

            while !thread_stop.load(Ordering::Acquire) {
                std::thread::park();
            }
            drop(stream);
        });

        started_rx.recv().map_err(|_| DeviceError::ThreadExited)??;
        info!(
            device = %self.name,
            sample_rate = self.sample_rate(),
            channels = self.channels(),
            sink,
            "output stream started"
        );

        Ok(CpalOutput {
            stop,
            underruns,
            thread: Some(thread),
        })
    }
}

/// A running output stream. Dropping it stops playback.
pub struct CpalOutput {
    stop: Arc<AtomicBool>,
    underruns: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Device buffers that were filled with silence because the graph was not prepared.
    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

/// Pulls blocks from the processor and hands them out one interleaved sample at a time.
struct Renderer {
    processor: GraphProcessor,
    sink: String,
    channels: usize,
    max_block_size: usize,
    /// Interleaved copy of the sink's last block
    block: Vec<f32>,
    len: usize,
    position: usize,
}

impl Renderer {
    fn new(processor: GraphProcessor, sink: &str, channels: usize, max_block_size: usize) -> Self {
        let channels = channels.max(1);
        let max_block_size = max_block_size.max(1);
        Self {
            processor,
            sink: sink.into(),
            channels,
            max_block_size,
            block: alloc::vec![0.0; max_block_size * channels],
            len: 0,
            position: 0,
        }
    }

    /// Render the next block. Returns `false` if the graph could not run.
    fn refill(&mut self) -> bool {
        self.position = 0;
        if self.processor.process(self.max_block_size).is_err() {
            self.len = self.block.len();
            self.block.iter_mut().for_each(|s| *s = 0.0);
            return false;
        }

        let frames = self
            .processor
            .block_size()
            .unwrap_or(0)
            .clamp(1, self.max_block_size);
        self.len = frames * self.channels;

        for ch in 0..self.channels {
            let source = self
                .processor
                .node_output(&self.sink, ch)
                .or_else(|| self.processor.node_output(&self.sink, 0));
            for frame in 0..frames {
                self.block[frame * self.channels + ch] =
                    source.and_then(|s| s.get(frame)).copied().unwrap_or(0.0);
            }
        }
        true
    }

    fn fill<T>(&mut self, data: &mut [T], underruns: &AtomicUsize, convert: impl Fn(f32) -> T) {
        let mut silent = false;
        for sample in data.iter_mut() {
            if self.position == self.len {
                silent |= !self.refill();
            }
            *sample = convert(self.block[self.position]);
            self.position += 1;
        }
        if silent {
            underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &SupportedStreamConfig,
    mut renderer: Renderer,
    underruns: Arc<AtomicUsize>,
) -> Result<cpal::Stream, DeviceError> {
    let stream_config = config.config();
    let on_error = |err: cpal::StreamError| error!(error = %err, "CPAL stream error");

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _| renderer.fill(data, &underruns, |s| s),
            on_error,
            None,
        )?,
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _| {
                renderer.fill(data, &underruns, |s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            },
            on_error,
            None,
        )?,
        SampleFormat::U16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [u16], _| {
                renderer.fill(data, &underruns, |s| {
                    ((s.clamp(-1.0, 1.0) + 1.0) * 0.5 * u16::MAX as f32) as u16
                })
            },
            on_error,
            None,
        )?,
        other => return Err(DeviceError::UnsupportedFormat(other)),
    };
    Ok(stream)
}
