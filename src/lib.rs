//! Tonegraph - real-time signal graph with audio, control and event ports
//!
//! Design principles:
//! - A graph is split into a [`GraphManager`] (control thread) and a
//!   [`GraphProcessor`] (audio thread) that only talk through lock-free queues
//! - Structural changes are built off the audio thread and published as one
//!   immutable schedule, picked up between blocks
//! - No locks, no allocation and no logging on the audio thread. Node
//!   `prepare` also runs there when the format changes, at a block boundary
//! - Multiple connections into one audio input are summed; nodes always see
//!   one buffer per input port
//! - Nodes fade their output in to avoid clicks when they start producing signal
//!
//! ```
//! use tonegraph::nodes::{Constant, Gain};
//! use tonegraph::{GraphManager, GraphSettings};
//!
//! let (mut graph, mut processor) = GraphManager::new(GraphSettings::default());
//! graph.create_node("a", Constant::new(1.0).with_fade_in(0.0)).unwrap();
//! graph.create_node("b", Constant::new(2.0).with_fade_in(0.0)).unwrap();
//! graph.create_node("mix", Gain::new(1.0).with_fade_in(0.0)).unwrap();
//! graph.connect("a", "out", "mix", "in").unwrap();
//! graph.connect("b", "out", "mix", "in").unwrap();
//! graph.prepare(44100, 256).unwrap();
//!
//! processor.process(256).unwrap();
//! assert!(processor.node_output("mix", 0).unwrap().iter().all(|&s| s == 3.0));
//! ```

extern crate alloc;

mod error;
mod graph;
mod node;
mod processor;
mod schedule;
mod settings;
mod value;

pub mod nodes;

#[cfg(feature = "cpal_sink")]
pub mod device;

pub use error::{GraphError, PortDirection};
pub use graph::{Connection, GraphManager, NodeInfo};
pub use node::{Buffer, ControlFrame, EventFrame, Node, NodeCore, NodeId, ProcessContext, DEFAULT_FADE_IN_MS};
pub use processor::GraphProcessor;
pub use settings::GraphSettings;
pub use value::{ControlValue, Event, Param, Port, PortType};
