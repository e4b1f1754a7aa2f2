//! Errors reported by graph operations

use alloc::string::String;
use alloc::vec::Vec;

use itertools::Itertools;

use crate::node::NodeId;
use crate::value::PortType;

/// Everything a graph operation can reject.
///
/// None of these are raised on the audio thread except [`GraphError::Unprepared`],
/// which [`GraphProcessor::process`](crate::GraphProcessor::process) returns
/// without allocating.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("A node with id `{0}` already exists.")]
    DuplicateNode(NodeId),
    #[error("The node `{0}` does not exist. It may have been removed already.")]
    NodeNotFound(NodeId),
    #[error("The node `{node}` has no {direction} port named `{port}`.")]
    UnknownPort {
        node: NodeId,
        port: String,
        direction: PortDirection,
    },
    #[error("Cannot connect a {from:?} output to a {to:?} input.")]
    PortTypeMismatch { from: PortType, to: PortType },
    #[error(
        "The connection graph contains a cycle through [{}]; unschedulable nodes: [{}]",
        .cycle.iter().join(", "),
        .unscheduled.iter().join(", ")
    )]
    CycleDetected {
        /// Nodes forming one of the cycles
        cycle: Vec<NodeId>,
        /// Every node the topological sort could not place, in insertion order
        unscheduled: Vec<NodeId>,
    },
    #[error("The graph has not been prepared with a sample rate and block size.")]
    Unprepared,
    #[error("The node `{node}` has no parameter named `{name}`.")]
    UnknownParameter { node: NodeId, name: String },
    #[error("The command queue to the audio thread is full. Process a block and retry.")]
    QueueFull,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl core::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}
