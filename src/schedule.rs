//! Execution ordering and the immutable per-format snapshot the audio thread runs.

use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cmp::Reverse;

use hashbrown::HashMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::GraphError;
use crate::graph::Connection;
use crate::node::{Buffer, ControlFrame, EventFrame, NodeId};
use crate::settings::GraphSettings;
use crate::value::{Port, PortType};

/// Sample rate and block size a graph was prepared with.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct StreamFormat {
    pub(crate) sample_rate: u32,
    pub(crate) block_size: usize,
}

/// Order `nodes` so every connection's source precedes its destination.
///
/// Kahn's algorithm; whenever several nodes are ready the one inserted first
/// wins, so the result is deterministic. Returns indices into `nodes`.
pub(crate) fn execution_order(nodes: &[NodeId], connections: &[Connection]) -> Result<Vec<usize>, GraphError> {
    let graph = dependency_graph(nodes, connections);

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for next in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok(order);
    }

    let mut placed = alloc::vec![false; nodes.len()];
    for &i in &order {
        placed[i] = true;
    }
    let unscheduled = placed
        .iter()
        .enumerate()
        .filter(|(_, placed)| !**placed)
        .map(|(i, _)| nodes[i].clone())
        .collect();

    Err(GraphError::CycleDetected {
        cycle: find_cycle(&graph)
            .into_iter()
            .map(|i| nodes[i].clone())
            .collect(),
        unscheduled,
    })
}

// Node weights are the insertion index, edges follow connections of every port type.
fn dependency_graph(nodes: &[NodeId], connections: &[Connection]) -> DiGraph<usize, ()> {
    let mut graph = DiGraph::with_capacity(nodes.len(), connections.len());
    let index: HashMap<&str, NodeIndex> = nodes
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), graph.add_node(i)))
        .collect();

    for c in connections {
        if let (Some(&from), Some(&to)) = (index.get(c.from.as_str()), index.get(c.to.as_str())) {
            graph.add_edge(from, to, ());
        }
    }
    graph
}

/// Members of the first cycle found, in insertion order.
fn find_cycle(graph: &DiGraph<usize, ()>) -> Vec<usize> {
    let mut members = petgraph::algo::tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .unwrap_or_default()
        .into_iter()
        .map(|n| graph[n])
        .collect::<Vec<_>>();
    members.sort_unstable();
    members
}

/// Where a routed value comes from: an entry in the schedule and one of its output ports.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Source {
    pub(crate) entry: usize,
    pub(crate) port: usize,
}

/// A control or event connection into input port `input` of an entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Route {
    pub(crate) input: usize,
    pub(crate) source: Source,
}

/// One scheduled node with all buffers it reads and writes during a block.
pub(crate) struct Entry {
    pub(crate) slot: usize,
    pub(crate) serial: u64,
    /// Summation buffer per audio input port
    pub(crate) audio_in: Vec<Buffer>,
    /// Feeding outputs per audio input port
    pub(crate) audio_sources: Vec<Vec<Source>>,
    pub(crate) audio_out: Vec<Buffer>,
    pub(crate) control_in: ControlFrame,
    pub(crate) control_routes: Vec<Route>,
    pub(crate) control_out: ControlFrame,
    pub(crate) event_in: EventFrame,
    pub(crate) event_routes: Vec<Route>,
    pub(crate) event_out: EventFrame,
}

/// What the schedule needs to know about a node.
pub(crate) struct ScheduleNode<'a> {
    pub(crate) id: &'a NodeId,
    pub(crate) slot: usize,
    pub(crate) serial: u64,
    pub(crate) inputs: &'a [Port],
    pub(crate) outputs: &'a [Port],
}

/// Everything the audio thread needs to run a block, built off the audio thread.
pub(crate) struct Schedule {
    pub(crate) format: StreamFormat,
    /// Entries in execution order
    pub(crate) entries: Vec<Entry>,
    pub(crate) positions: HashMap<NodeId, usize>,
    pub(crate) physical_inputs: Vec<Buffer>,
}

fn audio_index(ports: &[Port], name: &str) -> Option<usize> {
    ports
        .iter()
        .filter(|p| p.kind == PortType::Audio)
        .position(|p| p.name == name)
}

fn port_kind(ports: &[Port], name: &str) -> Option<PortType> {
    ports.iter().find(|p| p.name == name).map(|p| p.kind)
}

impl Schedule {
    /// `nodes` must already be in execution order.
    pub(crate) fn build(
        nodes: &[ScheduleNode<'_>],
        connections: &[Connection],
        format: StreamFormat,
        settings: &GraphSettings,
    ) -> Self {
        let block = format.block_size;
        let positions: HashMap<NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut entries: Vec<Entry> = nodes
            .iter()
            .map(|n| {
                let audio_inputs = n.inputs.iter().filter(|p| p.kind == PortType::Audio).count();
                let audio_outputs = n.outputs.iter().filter(|p| p.kind == PortType::Audio).count();
                Entry {
                    slot: n.slot,
                    serial: n.serial,
                    audio_in: (0..audio_inputs).map(|_| Buffer::silent(block)).collect(),
                    audio_sources: alloc::vec![Vec::new(); audio_inputs],
                    audio_out: (0..audio_outputs).map(|_| Buffer::silent(block)).collect(),
                    control_in: ControlFrame::for_ports(n.inputs.iter()),
                    control_routes: Vec::new(),
                    control_out: ControlFrame::for_ports(n.outputs.iter()),
                    event_in: EventFrame::for_ports(n.inputs.iter(), settings.event_capacity),
                    event_routes: Vec::new(),
                    event_out: EventFrame::for_ports(n.outputs.iter(), settings.event_capacity),
                }
            })
            .collect();

        for c in connections {
            let (Some(&from), Some(&to)) = (positions.get(c.from.as_str()), positions.get(c.to.as_str())) else {
                continue;
            };
            match port_kind(nodes[to].inputs, &c.to_port) {
                Some(PortType::Audio) => {
                    if let (Some(port), Some(input)) = (
                        audio_index(nodes[from].outputs, &c.from_port),
                        audio_index(nodes[to].inputs, &c.to_port),
                    ) {
                        entries[to].audio_sources[input].push(Source { entry: from, port });
                    }
                }
                Some(PortType::Control) => {
                    if let (Some(port), Some(input)) = (
                        entries[from].control_out.index_of(&c.from_port),
                        entries[to].control_in.index_of(&c.to_port),
                    ) {
                        entries[to].control_routes.push(Route {
                            input,
                            source: Source { entry: from, port },
                        });
                    }
                }
                Some(PortType::Event) => {
                    if let (Some(port), Some(input)) = (
                        entries[from].event_out.index_of(&c.from_port),
                        entries[to].event_in.index_of(&c.to_port),
                    ) {
                        entries[to].event_routes.push(Route {
                            input,
                            source: Source { entry: from, port },
                        });
                    }
                }
                None => {}
            }
        }

        Self {
            format,
            entries,
            positions,
            physical_inputs: (0..settings.num_physical_inputs)
                .map(|_| Buffer::silent(block))
                .collect(),
        }
    }

    pub(crate) fn entry(&self, id: &str) -> Option<&Entry> {
        self.positions.get(id).map(|&i| &self.entries[i])
    }

    /// Carry the last delivered hardware input over so a swap between
    /// `set_physical_input` and `process` loses nothing.
    pub(crate) fn inherit_physical_inputs(&mut self, previous: &Schedule) {
        for (new, old) in self.physical_inputs.iter_mut().zip(previous.physical_inputs.iter()) {
            let len = new.len().min(old.len());
            new[..len].copy_from_slice(&old[..len]);
        }
    }

    /// Take over the latest control values of every node that is still scheduled.
    ///
    /// Values are swapped, not cloned, so the audio thread neither allocates
    /// nor frees here; `previous` is dropped on the control thread.
    pub(crate) fn inherit_controls(&mut self, previous: &mut Schedule) {
        for (id, &index) in self.positions.iter() {
            let Some(&old_index) = previous.positions.get(id) else {
                continue;
            };
            let new = &mut self.entries[index];
            let old = &mut previous.entries[old_index];
            // A reused id with a new instance starts from scratch.
            if new.slot != old.slot || new.serial != old.serial {
                continue;
            }
            new.control_in.swap_values(&mut old.control_in);
            new.control_out.swap_values(&mut old.control_out);
        }
    }
}
