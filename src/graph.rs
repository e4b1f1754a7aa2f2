//! The control-plane half of a graph.
//!
//! [`GraphManager`] owns the node registry and the connection list. Every
//! structural change is folded into a pending transaction holding new node
//! instances, removals and a freshly built [`Schedule`], which is published to
//! the [`GraphProcessor`] in one queue push. The processor picks it up at the
//! start of its next block.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use tracing::{debug, info, warn};

use crate::error::{GraphError, PortDirection};
use crate::node::{Node, NodeCore, NodeId, SharedParams};
use crate::processor::{deliver, Command, GraphProcessor, NodeMessage, NodeSlot, Retired, ScheduleChange, Transaction};
use crate::schedule::{self, Schedule, ScheduleNode, StreamFormat};
use crate::settings::GraphSettings;
use crate::value::{ControlValue, Param, Port};

/// A directed edge from an output port to an input port.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Connection {
    pub from: NodeId,
    pub from_port: String,
    pub to: NodeId,
    pub to_port: String,
}

impl Connection {
    pub fn new(
        from: impl Into<NodeId>,
        from_port: impl Into<String>,
        to: impl Into<NodeId>,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            from_port: from_port.into(),
            to: to.into(),
            to_port: to_port.into(),
        }
    }

    /// Whether `id` is either endpoint.
    pub fn touches(&self, id: &str) -> bool {
        self.from.as_str() == id || self.to.as_str() == id
    }

    fn matches(&self, from: &str, from_port: &str, to: &str, to_port: &str) -> bool {
        self.from.as_str() == from && self.from_port == from_port && self.to.as_str() == to && self.to_port == to_port
    }
}

impl core::fmt::Display for Connection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{} -> {}.{}", self.from, self.from_port, self.to, self.to_port)
    }
}

/// What the control plane knows about a registered node.
///
/// The node instance itself lives on the audio thread; this is the view
/// [`GraphManager::get_node`] hands out. Numeric and boolean parameters are
/// read live from the node, whichever thread wrote them. Text parameters
/// reflect the last write made through the manager.
#[derive(Clone, Debug)]
pub struct NodeInfo {
    id: NodeId,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    params: Vec<Param>,
    shared: Arc<SharedParams>,
    fade_in_ms: f32,
}

impl NodeInfo {
    fn from_core(core: &NodeCore, shared: Arc<SharedParams>) -> Self {
        Self {
            id: core.id().clone(),
            inputs: core.inputs().to_vec(),
            outputs: core.outputs().to_vec(),
            params: core.params().to_vec(),
            shared,
            fade_in_ms: core.fade_in_duration(),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    /// Current parameter values in declaration order.
    pub fn params(&self) -> Vec<Param> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, p)| Param {
                name: p.name.clone(),
                value: self.value_at(i, &p.value),
            })
            .collect()
    }

    pub fn param(&self, name: &str) -> Option<ControlValue> {
        let index = self.params.iter().position(|p| p.name == name)?;
        Some(self.value_at(index, &self.params[index].value))
    }

    fn value_at(&self, index: usize, written: &ControlValue) -> ControlValue {
        self.shared.load(index).unwrap_or_else(|| written.clone())
    }

    pub fn fade_in_duration(&self) -> f32 {
        self.fade_in_ms
    }

    fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

struct NodeEntry {
    info: NodeInfo,
    slot: usize,
    serial: u64,
}

/// Builds and mutates a graph from a non-real-time thread.
///
/// ```
/// use tonegraph::nodes::{Constant, Gain};
/// use tonegraph::{GraphManager, GraphSettings};
///
/// let (mut graph, mut processor) = GraphManager::new(GraphSettings::default());
/// graph.create_node("dc", Constant::new(0.5).with_fade_in(0.0)).unwrap();
/// graph.create_node("gain", Gain::new(2.0).with_fade_in(0.0)).unwrap();
/// graph.connect("dc", "out", "gain", "in").unwrap();
/// graph.prepare(48000, 64).unwrap();
///
/// processor.process(64).unwrap();
/// assert_eq!(processor.node_output("gain", 0).unwrap()[0], 1.0);
/// ```
pub struct GraphManager {
    settings: GraphSettings,
    nodes: HashMap<NodeId, NodeEntry>,
    /// Registered ids in insertion order
    insertion: Vec<NodeId>,
    execution_order: Vec<NodeId>,
    connections: Vec<Connection>,
    format: Option<StreamFormat>,

    free_slots: Vec<usize>,
    next_slot: usize,
    /// Length of the slot table the processor will have once pending changes land
    slot_capacity: usize,
    next_serial: u64,

    commands: Producer<Command>,
    retired: Consumer<Retired>,
    pending: Option<Box<Transaction>>,
}

impl GraphManager {
    /// Create an empty graph and the processor that will run it on the audio thread.
    pub fn new(settings: GraphSettings) -> (Self, GraphProcessor) {
        let (commands, command_rx) = RingBuffer::new(settings.command_queue_size);
        let (retired_tx, retired) = RingBuffer::new(settings.retired_queue_size());

        let processor = GraphProcessor::new(
            settings.node_capacity,
            settings.num_physical_inputs,
            command_rx,
            retired_tx,
        );

        let manager = Self {
            settings,
            nodes: HashMap::new(),
            insertion: Vec::new(),
            execution_order: Vec::new(),
            connections: Vec::new(),
            format: None,
            free_slots: Vec::new(),
            next_slot: 0,
            slot_capacity: settings.node_capacity,
            next_serial: 0,
            commands,
            retired,
            pending: None,
        };

        (manager, processor)
    }

    /// Register `node` under `id`.
    ///
    /// The id is written into the node's [`NodeCore`]. If the graph is already
    /// prepared the node is prepared here and scheduled from the next block on.
    pub fn create_node<N: Node>(&mut self, id: impl Into<NodeId>, node: N) -> Result<&NodeInfo, GraphError> {
        self.create_boxed_node(id, Box::new(node))
    }

    pub fn create_boxed_node(&mut self, id: impl Into<NodeId>, mut node: Box<dyn Node>) -> Result<&NodeInfo, GraphError> {
        self.collect_garbage();

        let id = id.into();
        if self.nodes.contains_key(id.as_str()) {
            warn!(node = %id, "rejected duplicate node id");
            return Err(GraphError::DuplicateNode(id));
        }

        node.core_mut().set_id(id.clone());
        let shared = node.core_mut().share_params();
        if let Some(format) = self.format {
            node.prepare(format.sample_rate, format.block_size);
        }
        let info = NodeInfo::from_core(node.core(), shared);

        let slot = self.allocate_slot();
        let serial = self.next_serial;
        self.next_serial += 1;
        self.pending_mut().insert.push((slot, NodeSlot { serial, node }));

        self.nodes.insert(id.clone(), NodeEntry { info, slot, serial });
        self.insertion.push(id.clone());
        if self.format.is_some() {
            self.reschedule()?;
        } else {
            self.execution_order.push(id.clone());
        }
        self.publish();

        info!(node = %id, slot, "created node");
        self.get_node(id.as_str()).ok_or(GraphError::NodeNotFound(id))
    }

    /// Remove a node along with every connection touching it.
    ///
    /// The instance is dropped on this thread once the processor has let go of it.
    pub fn remove_node(&mut self, id: &str) -> Result<(), GraphError> {
        self.collect_garbage();

        let Some(entry) = self.nodes.remove(id) else {
            warn!(node = id, "cannot remove unknown node");
            return Err(GraphError::NodeNotFound(id.into()));
        };

        let dropped_connections = self.remove_connections(id);
        self.insertion.retain(|n| n.as_str() != id);
        self.execution_order.retain(|n| n.as_str() != id);
        self.release(&entry);
        self.reschedule()?;
        self.publish();

        info!(node = id, dropped_connections, "removed node");
        Ok(())
    }

    pub fn get_node(&self, id: &str) -> Option<&NodeInfo> {
        self.nodes.get(id).map(|e| &e.info)
    }

    /// Connect an output port of `from` to an input port of `to`.
    ///
    /// Both ports must exist and carry the same [`PortType`](crate::PortType).
    /// On a prepared graph a connection that would close a cycle is refused with
    /// [`GraphError::CycleDetected`]; on an unprepared graph the cycle is
    /// reported by [`prepare`](Self::prepare).
    pub fn connect(&mut self, from: &str, from_port: &str, to: &str, to_port: &str) -> Result<(), GraphError> {
        self.collect_garbage();

        let source = self.get_node(from).ok_or_else(|| GraphError::NodeNotFound(from.into()))?;
        let dest = self.get_node(to).ok_or_else(|| GraphError::NodeNotFound(to.into()))?;

        let out = source.output(from_port).ok_or_else(|| GraphError::UnknownPort {
            node: from.into(),
            port: from_port.into(),
            direction: PortDirection::Output,
        })?;
        let input = dest.input(to_port).ok_or_else(|| GraphError::UnknownPort {
            node: to.into(),
            port: to_port.into(),
            direction: PortDirection::Input,
        })?;
        if out.kind != input.kind {
            return Err(GraphError::PortTypeMismatch {
                from: out.kind,
                to: input.kind,
            });
        }

        let connection = Connection::new(from, from_port, to, to_port);
        debug!(%connection, "connecting");
        self.connections.push(connection);

        if let Err(e) = self.reschedule() {
            self.connections.pop();
            warn!(error = %e, "connection refused");
            return Err(e);
        }
        self.publish();
        Ok(())
    }

    /// Remove every connection matching the exact endpoints. Returns whether any existed.
    pub fn disconnect(&mut self, from: &str, from_port: &str, to: &str, to_port: &str) -> bool {
        self.collect_garbage();

        let before = self.connections.len();
        self.connections
            .retain(|c| !c.matches(from, from_port, to, to_port));
        if self.connections.len() == before {
            return false;
        }

        debug!(from, from_port, to, to_port, "disconnected");
        self.reschedule_after_removal();
        true
    }

    /// Remove every connection where `id` is source or destination. Returns how many were removed.
    pub fn disconnect_all(&mut self, id: &str) -> usize {
        self.collect_garbage();

        let removed = self.remove_connections(id);
        if removed > 0 {
            debug!(node = id, removed, "disconnected all");
            self.reschedule_after_removal();
        }
        removed
    }

    /// Drop every node and connection and return to the unprepared state.
    pub fn clear(&mut self) {
        self.collect_garbage();

        let entries: Vec<NodeEntry> = self.nodes.drain().map(|(_, e)| e).collect();
        for entry in &entries {
            self.release(entry);
        }
        self.insertion.clear();
        self.execution_order.clear();
        self.connections.clear();
        self.free_slots.clear();
        self.next_slot = 0;
        self.format = None;

        let tx = self.pending_mut();
        tx.format = None;
        tx.schedule = ScheduleChange::Unprepare;
        self.publish();

        info!(nodes = entries.len(), "cleared graph");
    }

    /// Set the stream format, order the graph and publish buffers sized to `block_size`.
    ///
    /// Every node is prepared before the new schedule runs, on the thread
    /// calling [`GraphProcessor::process`] at the next block boundary. If the
    /// connections contain a cycle nothing is scheduled, the graph is left
    /// unprepared and the cycle is reported.
    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) -> Result<(), GraphError> {
        self.collect_garbage();

        let previous = self.format.replace(StreamFormat {
            sample_rate,
            block_size,
        });
        if let Err(e) = self.reschedule() {
            self.format = None;
            self.execution_order = self.insertion.clone();
            if previous.is_some() {
                self.pending_mut().schedule = ScheduleChange::Unprepare;
                self.publish();
            }
            warn!(error = %e, "prepare failed");
            return Err(e);
        }

        self.pending_mut().format = Some(StreamFormat {
            sample_rate,
            block_size,
        });
        self.publish();

        info!(sample_rate, block_size, nodes = self.nodes.len(), "prepared graph");
        Ok(())
    }

    /// Set a parameter on a node. Applied on the audio thread before the next block.
    pub fn set_param(&mut self, id: &str, name: &str, value: impl Into<ControlValue>) -> Result<(), GraphError> {
        self.collect_garbage();

        let entry = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.into()))?;
        let Some(index) = entry.info.params.iter().position(|p| p.name == name) else {
            return Err(GraphError::UnknownParameter {
                node: id.into(),
                name: name.into(),
            });
        };

        let value = value.into();
        let message = NodeMessage::SetParam {
            index,
            value: value.clone(),
        };
        send(&mut self.pending, &mut self.commands, entry.slot, entry.serial, message)?;
        entry.info.shared.store(index, &value);
        entry.info.params[index].value = value;
        Ok(())
    }

    /// Current value of a node parameter.
    ///
    /// Numeric and boolean values are read lock-free from the node, so writes
    /// the node makes itself (from a control input or in `prepare`) show up
    /// here too. Until a queued [`set_param`](Self::set_param) lands, it
    /// returns the value that was written.
    pub fn param(&self, id: &str, name: &str) -> Option<ControlValue> {
        self.get_node(id)?.param(name)
    }

    /// Change a node's fade-in length. `0` disables the ramp.
    pub fn set_fade_in_duration(&mut self, id: &str, ms: f32) -> Result<(), GraphError> {
        self.collect_garbage();

        let entry = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.into()))?;
        send(&mut self.pending, &mut self.commands, entry.slot, entry.serial, NodeMessage::SetFadeIn(ms))?;
        entry.info.fade_in_ms = ms.max(0.0);
        Ok(())
    }

    /// Restart a node's fade-in ramp from silence at the next block.
    pub fn reset_fade_in(&mut self, id: &str) -> Result<(), GraphError> {
        self.collect_garbage();

        let entry = self
            .nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.into()))?;
        send(&mut self.pending, &mut self.commands, entry.slot, entry.serial, NodeMessage::ResetFadeIn)
    }

    /// Push pending changes to the processor. Returns `false` if they are
    /// still waiting for room in the command queue.
    pub fn flush(&mut self) -> bool {
        flush(&mut self.pending, &mut self.commands)
    }

    /// Drop whatever the processor has handed back and retry pending changes.
    ///
    /// Every mutating call does this already; call it directly when the graph
    /// sits idle for long stretches.
    pub fn collect_garbage(&mut self) {
        let mut collected = 0usize;
        while let Ok(item) = self.retired.pop() {
            drop(item);
            collected += 1;
        }
        if collected > 0 {
            debug!(collected, "collected retired items");
        }
        self.flush();
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Node ids in the order they run. Insertion order while unprepared.
    pub fn execution_order(&self) -> &[NodeId] {
        &self.execution_order
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.insertion
    }

    pub fn is_prepared(&self) -> bool {
        self.format.is_some()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.format.map(|f| f.sample_rate)
    }

    pub fn block_size(&self) -> Option<usize> {
        self.format.map(|f| f.block_size)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    /// Rebuild the schedule for the current format. No-op while unprepared.
    ///
    /// Leaves all state untouched on error.
    fn reschedule(&mut self) -> Result<(), GraphError> {
        let Some(format) = self.format else {
            return Ok(());
        };

        let order = schedule::execution_order(&self.insertion, &self.connections)?;
        let ordered: Vec<NodeId> = order.into_iter().map(|i| self.insertion[i].clone()).collect();

        let nodes: Vec<ScheduleNode<'_>> = ordered
            .iter()
            .filter_map(|id| self.nodes.get(id.as_str()))
            .map(|e| ScheduleNode {
                id: &e.info.id,
                slot: e.slot,
                serial: e.serial,
                inputs: &e.info.inputs,
                outputs: &e.info.outputs,
            })
            .collect();
        let schedule = Schedule::build(&nodes, &self.connections, format, &self.settings);

        self.execution_order = ordered;
        self.pending_mut().schedule = ScheduleChange::Replace(Box::new(schedule));
        Ok(())
    }

    // Dropping connections never introduces a cycle.
    fn reschedule_after_removal(&mut self) {
        if let Err(e) = self.reschedule() {
            warn!(error = %e, "reschedule failed");
        }
        self.publish();
    }

    fn remove_connections(&mut self, id: &str) -> usize {
        let before = self.connections.len();
        self.connections.retain(|c| !c.touches(id));
        before - self.connections.len()
    }

    /// Hand a node's slot back, cancelling its insert if it never reached the processor.
    fn release(&mut self, entry: &NodeEntry) {
        let tx = self.pending_mut();
        match tx
            .insert
            .iter()
            .position(|(slot, n)| *slot == entry.slot && n.serial == entry.serial)
        {
            Some(pos) => drop(tx.insert.remove(pos)),
            None => tx.remove.push(entry.slot),
        }
        self.free_slots.push(entry.slot);
    }

    fn allocate_slot(&mut self) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            return slot;
        }
        if self.next_slot == self.slot_capacity {
            self.slot_capacity = (self.slot_capacity * 2).max(1);
            let table = (0..self.slot_capacity).map(|_| None).collect();
            self.pending_mut().grow = Some(table);
            debug!(capacity = self.slot_capacity, "growing node slot table");
        }
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    fn pending_mut(&mut self) -> &mut Transaction {
        self.pending.get_or_insert_with(|| Box::new(Transaction::new()))
    }

    fn publish(&mut self) {
        if !self.flush() {
            warn!("command queue full, graph changes stay pending until the next block");
        }
    }
}

fn flush(pending: &mut Option<Box<Transaction>>, commands: &mut Producer<Command>) -> bool {
    let Some(mut tx) = pending.take() else {
        return true;
    };
    // The processor must not allocate while collecting removed nodes.
    tx.removed.reserve(tx.remove.len());
    match commands.push(Command::Apply(tx)) {
        Ok(()) => true,
        Err(PushError::Full(Command::Apply(tx))) => {
            *pending = Some(tx);
            false
        }
        Err(PushError::Full(_)) => false,
    }
}

/// Deliver a message to a node, directly if it has not been handed to the processor yet.
fn send(
    pending: &mut Option<Box<Transaction>>,
    commands: &mut Producer<Command>,
    slot: usize,
    serial: u64,
    message: NodeMessage,
) -> Result<(), GraphError> {
    if let Some(tx) = pending.as_deref_mut() {
        if let Some((_, n)) = tx
            .insert
            .iter_mut()
            .find(|(s, n)| *s == slot && n.serial == serial)
        {
            deliver(n.node.as_mut(), message);
            return Ok(());
        }
    }

    // Messages must not overtake a pending transaction.
    if !flush(pending, commands) {
        return Err(GraphError::QueueFull);
    }
    commands
        .push(Command::Message {
            slot,
            serial,
            message,
        })
        .map_err(|_| GraphError::QueueFull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Constant, Gain};
    use crate::value::PortType;

    fn graph() -> (GraphManager, GraphProcessor) {
        GraphManager::new(GraphSettings::default())
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let (mut g, _p) = graph();
        g.create_node("a", Constant::new(1.0)).unwrap();
        assert_eq!(
            g.create_node("a", Constant::new(2.0)).unwrap_err(),
            GraphError::DuplicateNode("a".into())
        );
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn create_stamps_registry_id() {
        let (mut g, _p) = graph();
        let info = g.create_node("osc", Constant::new(1.0)).unwrap();
        assert_eq!(info.id().as_str(), "osc");
        assert_eq!(info.outputs()[0], Port::new("out", PortType::Audio));
    }

    #[test]
    fn connect_validates_ports() {
        let (mut g, _p) = graph();
        g.create_node("a", Constant::new(1.0)).unwrap();
        g.create_node("b", Gain::new(1.0)).unwrap();

        assert_eq!(
            g.connect("a", "nope", "b", "in"),
            Err(GraphError::UnknownPort {
                node: "a".into(),
                port: "nope".into(),
                direction: PortDirection::Output,
            })
        );
        assert!(matches!(
            g.connect("a", "out", "b", "gain"),
            Err(GraphError::PortTypeMismatch {
                from: PortType::Audio,
                to: PortType::Control,
            })
        ));
        assert_eq!(
            g.connect("a", "out", "missing", "in"),
            Err(GraphError::NodeNotFound("missing".into()))
        );
        assert!(g.connections().is_empty());
    }

    #[test]
    fn cycle_refused_while_prepared() {
        let (mut g, _p) = graph();
        g.create_node("a", Gain::new(1.0)).unwrap();
        g.create_node("b", Gain::new(1.0)).unwrap();
        g.connect("a", "out", "b", "in").unwrap();
        g.prepare(48000, 64).unwrap();

        assert!(matches!(
            g.connect("b", "out", "a", "in"),
            Err(GraphError::CycleDetected { .. })
        ));
        assert_eq!(g.connections().len(), 1);
        assert!(g.is_prepared());
    }

    #[test]
    fn slot_table_grows_past_capacity() {
        let (mut g, mut p) = GraphManager::new(GraphSettings::default().with_node_capacity(2));
        g.prepare(44100, 16).unwrap();
        for i in 0..5 {
            g.create_node(format!("n{i}"), Constant::new(i as f32).with_fade_in(0.0))
                .unwrap();
        }
        p.process(16).unwrap();
        for i in 0..5 {
            let id = format!("n{i}");
            assert_eq!(p.node_output(&id, 0).unwrap()[0], i as f32);
        }
    }

    #[test]
    fn freed_slot_is_reused_by_the_next_node() {
        let (mut g, mut p) = graph();
        g.prepare(44100, 8).unwrap();
        g.create_node("a", Constant::new(1.0)).unwrap();
        g.remove_node("a").unwrap();
        g.create_node("b", Constant::new(2.0).with_fade_in(0.0)).unwrap();
        p.process(8).unwrap();
        assert!(p.node_output("a", 0).is_none());
        assert_eq!(p.node_output("b", 0).unwrap()[7], 2.0);
    }

    #[test]
    fn full_queue_keeps_changes_pending() {
        let (mut g, mut p) = GraphManager::new(GraphSettings::default().with_command_queue_size(1));
        g.prepare(44100, 8).unwrap();
        g.create_node("a", Constant::new(1.0).with_fade_in(0.0)).unwrap();
        g.create_node("b", Constant::new(2.0).with_fade_in(0.0)).unwrap();
        assert!(!g.flush());

        p.process(8).unwrap();
        assert!(g.flush());
        p.process(8).unwrap();
        assert_eq!(p.node_output("b", 0).unwrap()[0], 2.0);
    }

    #[test]
    fn set_param_updates_mirror() {
        let (mut g, _p) = graph();
        g.create_node("g", Gain::new(1.0)).unwrap();
        g.set_param("g", "gain", 0.25f32).unwrap();
        assert_eq!(g.param("g", "gain"), Some(ControlValue::Float(0.25)));
        assert_eq!(
            g.set_param("g", "nope", 1.0f32),
            Err(GraphError::UnknownParameter {
                node: "g".into(),
                name: "nope".into(),
            })
        );
    }
}
