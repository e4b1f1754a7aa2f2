use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use tonegraph::nodes::{Constant, Gain, PhysicalInput, Sine, SlewLimiter};
use tonegraph::{
    Buffer, ControlFrame, ControlValue, Event, EventFrame, GraphError, GraphManager, GraphProcessor, GraphSettings,
    Node, NodeCore, PortType, ProcessContext,
};

fn graph() -> (GraphManager, GraphProcessor) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    GraphManager::new(GraphSettings::default())
}

/// Unity gain without smoothing or fade: its output is exactly its summed input.
fn passthrough() -> Gain {
    Gain::new(1.0).without_smoothing().with_fade_in(0.0)
}

fn dc(value: f32) -> Constant {
    Constant::new(value).with_fade_in(0.0)
}

/// Emits a fixed control value on `out` every block.
struct ControlSource {
    core: NodeCore,
    value: ControlValue,
}

impl ControlSource {
    fn new(value: impl Into<ControlValue>) -> Self {
        Self {
            core: NodeCore::new("control").with_output("out", PortType::Control),
            value: value.into(),
        }
    }
}

impl Node for ControlSource {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_control(&mut self, _inputs: &ControlFrame, outputs: &mut ControlFrame) {
        outputs.set("out", self.value.clone());
    }

    fn process(&mut self, _ctx: &ProcessContext<'_>, _inputs: &[Buffer], _outputs: &mut [Buffer]) {}
}

/// Emits one event per configured offset on `out` every block.
struct Clicker {
    core: NodeCore,
    offsets: Vec<usize>,
    label: &'static str,
}

impl Clicker {
    fn new(label: &'static str, offsets: &[usize]) -> Self {
        Self {
            core: NodeCore::new("clicker").with_output("out", PortType::Event),
            offsets: offsets.to_vec(),
            label,
        }
    }
}

impl Node for Clicker {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_event(&mut self, _inputs: &EventFrame, outputs: &mut EventFrame) {
        for &offset in &self.offsets {
            outputs.push("out", Event::new(self.label, offset as i32, offset));
        }
    }

    fn process(&mut self, _ctx: &ProcessContext<'_>, _inputs: &[Buffer], _outputs: &mut [Buffer]) {}
}

/// Emits one control value in its first block, then stays quiet.
struct OneShot {
    core: NodeCore,
    value: Option<ControlValue>,
}

impl OneShot {
    fn new(value: impl Into<ControlValue>) -> Self {
        Self {
            core: NodeCore::new("one_shot").with_output("out", PortType::Control),
            value: Some(value.into()),
        }
    }
}

impl Node for OneShot {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_control(&mut self, _inputs: &ControlFrame, outputs: &mut ControlFrame) {
        if let Some(value) = self.value.take() {
            outputs.set("out", value);
        }
    }

    fn process(&mut self, _ctx: &ProcessContext<'_>, _inputs: &[Buffer], _outputs: &mut [Buffer]) {}
}

/// Alternates between two text values on `out`, one per block.
struct TextToggle {
    core: NodeCore,
    values: [ControlValue; 2],
    next: usize,
}

impl TextToggle {
    fn new(a: &str, b: &str) -> Self {
        Self {
            core: NodeCore::new("toggle").with_output("out", PortType::Control),
            values: [a.into(), b.into()],
            next: 0,
        }
    }
}

impl Node for TextToggle {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_control(&mut self, _inputs: &ControlFrame, outputs: &mut ControlFrame) {
        outputs.set("out", self.values[self.next].clone());
        self.next = 1 - self.next;
    }

    fn process(&mut self, _ctx: &ProcessContext<'_>, _inputs: &[Buffer], _outputs: &mut [Buffer]) {}
}

/// Two audio inputs copied straight to two audio outputs.
struct Pair {
    core: NodeCore,
}

impl Pair {
    fn new() -> Self {
        Self {
            core: NodeCore::new("pair")
                .with_input("a", PortType::Audio)
                .with_input("b", PortType::Audio)
                .with_output("a", PortType::Audio)
                .with_output("b", PortType::Audio),
        }
    }
}

impl Node for Pair {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process(&mut self, ctx: &ProcessContext<'_>, inputs: &[Buffer], outputs: &mut [Buffer]) {
        for (out, input) in outputs.iter_mut().zip(inputs) {
            out[..ctx.frames].copy_from_slice(&input[..ctx.frames]);
        }
    }
}

/// Records the thread and sample rate of every `prepare` call.
struct PrepareLog {
    core: NodeCore,
    calls: Arc<Mutex<Vec<(ThreadId, u32)>>>,
}

impl Node for PrepareLog {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        self.core.prepare(sample_rate, block_size);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((std::thread::current().id(), sample_rate));
        }
    }

    fn process(&mut self, _ctx: &ProcessContext<'_>, _inputs: &[Buffer], _outputs: &mut [Buffer]) {}
}

/// Forwards whatever arrives on its event input and control input.
struct Recorder {
    core: NodeCore,
}

impl Recorder {
    fn new() -> Self {
        Self {
            core: NodeCore::new("recorder")
                .with_input("events", PortType::Event)
                .with_input("control", PortType::Control)
                .with_output("events", PortType::Event)
                .with_output("control", PortType::Control),
        }
    }
}

impl Node for Recorder {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn process_control(&mut self, inputs: &ControlFrame, outputs: &mut ControlFrame) {
        if let Some(v) = inputs.get("control") {
            outputs.set("control", v.clone());
        }
    }

    fn process_event(&mut self, inputs: &EventFrame, outputs: &mut EventFrame) {
        for event in inputs.events("events") {
            outputs.push("events", event.clone());
        }
    }

    fn process(&mut self, _ctx: &ProcessContext<'_>, _inputs: &[Buffer], _outputs: &mut [Buffer]) {}
}

#[test]
fn process_before_prepare_is_reported() {
    let (mut g, mut p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    assert_eq!(p.process(64), Err(GraphError::Unprepared));
    assert!(p.node_output("a", 0).is_none());
    assert!(!p.is_prepared());
}

#[test]
fn execution_order_follows_connections() {
    let (mut g, _p) = graph();
    g.create_node("out", passthrough()).unwrap();
    g.create_node("mix", passthrough()).unwrap();
    g.create_node("osc", dc(0.1)).unwrap();
    g.create_node("lfo", dc(0.2)).unwrap();
    g.connect("osc", "out", "mix", "in").unwrap();
    g.connect("lfo", "out", "mix", "in").unwrap();
    g.connect("mix", "out", "out", "in").unwrap();

    assert_eq!(g.execution_order(), g.node_ids());
    g.prepare(44100, 64).unwrap();

    let order: Vec<&str> = g.execution_order().iter().map(|id| id.as_str()).collect();
    assert_eq!(order, ["osc", "lfo", "mix", "out"]);
}

#[test]
fn cycle_is_rejected_by_prepare() {
    let (mut g, mut p) = graph();
    g.create_node("src", dc(1.0)).unwrap();
    g.create_node("a", passthrough()).unwrap();
    g.create_node("b", passthrough()).unwrap();
    g.connect("src", "out", "a", "in").unwrap();
    g.connect("a", "out", "b", "in").unwrap();
    g.connect("b", "out", "a", "in").unwrap();

    match g.prepare(44100, 64) {
        Err(GraphError::CycleDetected { cycle, unscheduled }) => {
            let cycle: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
            let unscheduled: Vec<&str> = unscheduled.iter().map(|id| id.as_str()).collect();
            assert_eq!(cycle, ["a", "b"]);
            assert_eq!(unscheduled, ["a", "b"]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
    assert!(!g.is_prepared());
    assert_eq!(p.process(64), Err(GraphError::Unprepared));

    // Breaking the cycle makes the graph schedulable again.
    assert!(g.disconnect("b", "out", "a", "in"));
    g.prepare(44100, 64).unwrap();
    p.process(64).unwrap();
    assert_eq!(p.node_output("b", 0).unwrap()[0], 1.0);
}

#[test]
fn prepare_resizes_every_output_buffer() {
    let (mut g, mut p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    g.create_node("b", passthrough()).unwrap();
    g.connect("a", "out", "b", "in").unwrap();

    for block in [64, 256, 32] {
        g.prepare(48000, block).unwrap();
        p.process(block).unwrap();
        assert_eq!(p.node_output("a", 0).unwrap().len(), block);
        assert_eq!(p.node_output("b", 0).unwrap().len(), block);
        assert_eq!(p.block_size(), Some(block));
    }
    assert!(p.node_output("a", 1).is_none());
    assert!(p.node_output("missing", 0).is_none());
}

#[test]
fn fan_in_sums_sources() {
    let (mut g, mut p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    g.create_node("b", dc(2.0)).unwrap();
    g.create_node("c", passthrough()).unwrap();
    g.connect("a", "out", "c", "in").unwrap();
    g.connect("b", "out", "c", "in").unwrap();
    g.prepare(44100, 128).unwrap();

    for _ in 0..3 {
        p.process(128).unwrap();
        assert!(p.node_output("c", 0).unwrap().iter().all(|&s| s == 3.0));
    }
}

#[test]
fn unconnected_input_is_silent() {
    let (mut g, mut p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    g.create_node("c", passthrough()).unwrap();
    g.connect("a", "out", "c", "in").unwrap();
    g.prepare(44100, 32).unwrap();
    p.process(32).unwrap();
    assert!(p.node_output("c", 0).unwrap().iter().all(|&s| s == 1.0));

    g.disconnect("a", "out", "c", "in");
    p.process(32).unwrap();
    assert!(p.node_output("c", 0).unwrap().iter().all(|&s| s == 0.0));
}

#[test]
fn removing_twice_fails_and_leaves_no_connections() {
    let (mut g, mut p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    g.create_node("b", passthrough()).unwrap();
    g.create_node("c", passthrough()).unwrap();
    g.connect("a", "out", "b", "in").unwrap();
    g.connect("b", "out", "c", "in").unwrap();
    g.prepare(44100, 64).unwrap();
    p.process(64).unwrap();

    g.remove_node("b").unwrap();
    assert_eq!(g.remove_node("b"), Err(GraphError::NodeNotFound("b".into())));
    assert!(g.connections().iter().all(|c| !c.touches("b")));
    assert!(g.connections().is_empty());
    assert!(g.get_node("b").is_none());

    p.process(64).unwrap();
    assert!(p.node_output("b", 0).is_none());
    assert!(p.node_output("c", 0).unwrap().iter().all(|&s| s == 0.0));
}

#[test]
fn disconnect_unknown_connection_is_a_no_op() {
    let (mut g, _p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    g.create_node("b", passthrough()).unwrap();
    g.connect("a", "out", "b", "in").unwrap();
    let before = g.connections().to_vec();

    assert!(!g.disconnect("b", "out", "a", "in"));
    assert!(!g.disconnect("a", "out", "missing", "in"));
    assert_eq!(g.connections(), &before[..]);
}

#[test]
fn disconnect_all_removes_both_directions() {
    let (mut g, _p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    g.create_node("b", passthrough()).unwrap();
    g.create_node("c", passthrough()).unwrap();
    g.connect("a", "out", "b", "in").unwrap();
    g.connect("b", "out", "c", "in").unwrap();
    g.connect("a", "out", "c", "in").unwrap();

    assert_eq!(g.disconnect_all("b"), 2);
    assert_eq!(g.connections().len(), 1);
    assert_eq!(g.disconnect_all("b"), 0);
}

#[test]
fn fade_in_ramps_over_fifty_ms() {
    let (mut g, mut p) = graph();
    g.create_node("dc", Constant::new(1.0)).unwrap();
    g.prepare(44100, 512).unwrap();

    let mut rendered = Vec::new();
    for _ in 0..5 {
        p.process(512).unwrap();
        rendered.extend_from_slice(p.node_output("dc", 0).unwrap());
    }

    for (i, &s) in rendered.iter().enumerate() {
        let expected = if i < 2205 { i as f32 / 2205.0 } else { 1.0 };
        assert_eq!(s, expected, "sample {i}");
    }
}

#[test]
fn reset_fade_in_restarts_the_ramp() {
    let (mut g, mut p) = graph();
    g.create_node("dc", Constant::new(1.0)).unwrap();
    g.prepare(44100, 512).unwrap();
    p.process(512).unwrap();
    assert_eq!(p.node_output("dc", 0).unwrap()[511], 511.0 / 2205.0);

    g.reset_fade_in("dc").unwrap();
    p.process(512).unwrap();
    let out = p.node_output("dc", 0).unwrap();
    assert_eq!(out[0], 0.0);
    assert_eq!(out[1], 1.0 / 2205.0);
}

#[test]
fn fade_in_duration_follows_control_plane() {
    let (mut g, mut p) = graph();
    g.create_node("dc", Constant::new(1.0)).unwrap();
    g.prepare(1000, 16).unwrap();

    g.set_fade_in_duration("dc", 8.0).unwrap();
    g.reset_fade_in("dc").unwrap();
    assert_eq!(g.get_node("dc").unwrap().fade_in_duration(), 8.0);
    p.process(16).unwrap();
    let out = p.node_output("dc", 0).unwrap();
    assert_eq!(out[4], 0.5);
    assert_eq!(out[8], 1.0);

    g.set_fade_in_duration("dc", 0.0).unwrap();
    g.reset_fade_in("dc").unwrap();
    p.process(16).unwrap();
    assert_eq!(p.node_output("dc", 0).unwrap()[0], 1.0);
}

#[test]
fn clear_matches_a_fresh_graph() {
    let (mut g, mut p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    g.create_node("b", passthrough()).unwrap();
    g.connect("a", "out", "b", "in").unwrap();
    g.prepare(44100, 64).unwrap();
    p.process(64).unwrap();

    g.clear();
    assert!(g.is_empty());
    assert!(g.connections().is_empty());
    assert!(g.execution_order().is_empty());
    assert!(!g.is_prepared());
    assert_eq!(p.process(64), Err(GraphError::Unprepared));

    // The same ids are free again.
    g.create_node("a", dc(4.0)).unwrap();
    g.prepare(44100, 64).unwrap();
    p.process(64).unwrap();
    assert_eq!(p.node_output("a", 0).unwrap()[0], 4.0);
}

#[test]
fn nodes_created_while_prepared_join_the_next_block() {
    let (mut g, mut p) = graph();
    g.create_node("sum", passthrough()).unwrap();
    g.prepare(44100, 64).unwrap();
    p.process(64).unwrap();

    g.create_node("late", dc(0.5)).unwrap();
    g.connect("late", "out", "sum", "in").unwrap();
    assert_eq!(g.execution_order()[0].as_str(), "late");

    p.process(64).unwrap();
    assert_eq!(p.node_output("late", 0).unwrap().len(), 64);
    assert!(p.node_output("sum", 0).unwrap().iter().all(|&s| s == 0.5));
}

#[test]
fn set_param_reaches_the_audio_thread() {
    let (mut g, mut p) = graph();
    g.create_node("dc", dc(1.0)).unwrap();
    g.prepare(44100, 16).unwrap();
    p.process(16).unwrap();

    g.set_param("dc", "value", 0.75f32).unwrap();
    assert_eq!(g.param("dc", "value"), Some(ControlValue::Float(0.75)));
    p.process(16).unwrap();
    assert!(p.node_output("dc", 0).unwrap().iter().all(|&s| s == 0.75));

    assert!(matches!(
        g.set_param("dc", "missing", 1.0f32),
        Err(GraphError::UnknownParameter { .. })
    ));
    assert_eq!(
        g.set_param("nope", "value", 1.0f32),
        Err(GraphError::NodeNotFound("nope".into()))
    );
}

#[test]
fn messages_for_removed_nodes_are_discarded() {
    let (mut g, mut p) = graph();
    g.create_node("old", dc(1.0)).unwrap();
    g.prepare(44100, 16).unwrap();
    p.process(16).unwrap();

    g.set_param("old", "value", "not a number").unwrap();
    g.remove_node("old").unwrap();
    g.create_node("new", dc(2.0)).unwrap();
    p.process(16).unwrap();
    g.collect_garbage();

    assert!(p.node_output("new", 0).unwrap().iter().all(|&s| s == 2.0));
}

#[test]
fn physical_input_bridge() {
    let (mut g, mut p) = graph();
    g.create_node("mic", PhysicalInput::new(1).with_fade_in(0.0)).unwrap();
    g.create_node("missing", PhysicalInput::new(7).with_fade_in(0.0)).unwrap();
    g.prepare(44100, 8).unwrap();

    assert_eq!(p.num_physical_inputs(), 2);
    assert!(p.set_physical_input(1, &[0.1, 0.2, 0.3]));
    assert!(!p.set_physical_input(5, &[1.0]));
    assert_eq!(p.get_physical_input(1).unwrap(), &[0.1, 0.2, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0]);
    assert!(p.get_physical_input(2).is_none());

    p.process(8).unwrap();
    assert_eq!(p.node_output("mic", 0).unwrap(), &[0.1, 0.2, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0]);
    assert!(p.node_output("missing", 0).unwrap().iter().all(|&s| s == 0.0));
}

#[test]
fn physical_input_survives_a_schedule_swap() {
    let (mut g, mut p) = graph();
    g.create_node("mic", PhysicalInput::new(0).with_fade_in(0.0)).unwrap();
    g.prepare(44100, 4).unwrap();
    assert!(p.set_physical_input(0, &[1.0; 4]));

    g.create_node("other", dc(0.0)).unwrap();
    p.process(4).unwrap();
    assert_eq!(p.node_output("mic", 0).unwrap(), &[1.0; 4]);
}

#[test]
fn control_values_route_between_nodes() {
    let (mut g, mut p) = graph();
    g.create_node("ctl", ControlSource::new(0.5f32)).unwrap();
    g.create_node("dc", dc(1.0)).unwrap();
    g.create_node("rec", Recorder::new()).unwrap();
    g.connect("ctl", "out", "dc", "value").unwrap();
    g.connect("ctl", "out", "rec", "control").unwrap();
    g.prepare(44100, 32).unwrap();

    p.process(32).unwrap();
    assert!(p.node_output("dc", 0).unwrap().iter().all(|&s| s == 0.5));
    assert_eq!(p.control_output("rec", "control"), Some(&ControlValue::Float(0.5)));
    assert_eq!(p.control_output("ctl", "out"), Some(&ControlValue::Float(0.5)));
}

#[test]
fn last_control_connection_wins() {
    let (mut g, mut p) = graph();
    g.create_node("first", ControlSource::new(1)).unwrap();
    g.create_node("second", ControlSource::new("text")).unwrap();
    g.create_node("rec", Recorder::new()).unwrap();
    g.connect("first", "out", "rec", "control").unwrap();
    g.connect("second", "out", "rec", "control").unwrap();
    g.prepare(44100, 32).unwrap();

    p.process(32).unwrap();
    assert_eq!(p.control_output("rec", "control"), Some(&ControlValue::from("text")));
}

#[test]
fn events_merge_in_offset_order_and_clamp_to_the_block() {
    let (mut g, mut p) = graph();
    g.create_node("a", Clicker::new("a", &[5, 40, 1000])).unwrap();
    g.create_node("b", Clicker::new("b", &[0, 5])).unwrap();
    g.create_node("rec", Recorder::new()).unwrap();
    g.connect("a", "out", "rec", "events").unwrap();
    g.connect("b", "out", "rec", "events").unwrap();
    g.prepare(44100, 64).unwrap();

    p.process(64).unwrap();
    let events: Vec<(&str, usize)> = p
        .event_output("rec", "events")
        .iter()
        .map(|e| (&*e.kind, e.sample_offset))
        .collect();
    assert_eq!(events, [("b", 0), ("a", 5), ("b", 5), ("a", 40), ("a", 63)]);

    // Queues are refilled, not appended to, every block.
    p.process(64).unwrap();
    assert_eq!(p.event_output("rec", "events").len(), 5);
    assert!(p.event_output("rec", "missing").is_empty());
}

#[test]
fn event_overflow_is_counted() {
    let (mut g, mut p) = GraphManager::new(GraphSettings::default().with_event_capacity(2));
    g.create_node("a", Clicker::new("a", &[1, 2, 3])).unwrap();
    g.prepare(44100, 64).unwrap();

    p.process(64).unwrap();
    assert_eq!(p.event_output("a", "out").len(), 2);
    assert_eq!(p.dropped_events(), 1);
}

#[test]
fn sine_trigger_restarts_phase() {
    let (mut g, mut p) = graph();
    g.create_node("osc", Sine::new(1000.0).with_amplitude(1.0).with_fade_in(0.0))
        .unwrap();
    g.prepare(8000, 8).unwrap();
    p.process(3).unwrap();
    p.process(8).unwrap();
    assert_ne!(p.node_output("osc", 0).unwrap()[0], 0.0);

    g.create_node("clock", Clicker::new("tick", &[0])).unwrap();
    g.connect("clock", "out", "osc", "trigger").unwrap();
    p.process(8).unwrap();
    assert_eq!(p.node_output("osc", 0).unwrap()[0], 0.0);
}

#[test]
fn frames_are_clamped_to_the_block_size() {
    let (mut g, mut p) = graph();
    g.create_node("dc", dc(1.0)).unwrap();
    g.prepare(44100, 16).unwrap();

    p.process(1000).unwrap();
    assert_eq!(p.node_output("dc", 0).unwrap().len(), 16);
    p.process(4).unwrap();
    assert_eq!(p.blocks_processed(), 2);
}

#[test]
fn processor_runs_on_another_thread() {
    let (mut g, mut p) = graph();
    g.create_node("a", dc(1.0)).unwrap();
    g.create_node("b", dc(2.0)).unwrap();
    g.create_node("sum", passthrough()).unwrap();
    g.prepare(44100, 64).unwrap();

    let audio = std::thread::spawn(move || {
        for _ in 0..200 {
            p.process(64).unwrap();
            std::thread::yield_now();
        }
        p
    });

    g.connect("a", "out", "sum", "in").unwrap();
    g.connect("b", "out", "sum", "in").unwrap();

    let mut p = audio.join().unwrap();
    g.collect_garbage();
    p.process(64).unwrap();
    assert!(p.node_output("sum", 0).unwrap().iter().all(|&s| s == 3.0));
}

#[test]
fn control_values_survive_unrelated_graph_changes() {
    let (mut g, mut p) = graph();
    g.create_node("src", OneShot::new(0.5f32)).unwrap();
    g.create_node("rec", Recorder::new()).unwrap();
    g.connect("src", "out", "rec", "control").unwrap();
    g.prepare(44100, 16).unwrap();
    p.process(16).unwrap();
    assert_eq!(p.control_output("rec", "control"), Some(&ControlValue::Float(0.5)));

    g.create_node("unrelated", dc(1.0)).unwrap();
    p.process(16).unwrap();
    assert_eq!(p.control_output("src", "out"), Some(&ControlValue::Float(0.5)));
    assert_eq!(p.control_output("rec", "control"), Some(&ControlValue::Float(0.5)));

    // Re-preparing keeps them too.
    g.prepare(48000, 32).unwrap();
    p.process(32).unwrap();
    assert_eq!(p.control_output("rec", "control"), Some(&ControlValue::Float(0.5)));
}

#[test]
fn recreated_node_starts_without_control_values() {
    let (mut g, mut p) = graph();
    g.create_node("src", OneShot::new(0.5f32)).unwrap();
    g.prepare(44100, 16).unwrap();
    p.process(16).unwrap();

    g.remove_node("src").unwrap();
    g.create_node("src", OneShot::new(0.25f32)).unwrap();
    p.process(16).unwrap();
    assert_eq!(p.control_output("src", "out"), Some(&ControlValue::Float(0.25)));
}

#[test]
fn format_changes_prepare_nodes_on_the_processing_thread() {
    let (mut g, mut p) = graph();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let node = PrepareLog {
        core: NodeCore::new("log"),
        calls: calls.clone(),
    };
    g.create_node("log", node).unwrap();
    assert!(calls.lock().unwrap().is_empty());

    g.prepare(48000, 64).unwrap();
    assert!(calls.lock().unwrap().is_empty());

    let audio = std::thread::spawn(move || {
        p.process(64).unwrap();
        (std::thread::current().id(), p)
    });
    let (audio_id, mut p) = audio.join().unwrap();
    assert_eq!(*calls.lock().unwrap(), [(audio_id, 48000)]);

    // Nodes created into a prepared graph are prepared by the caller.
    let late = PrepareLog {
        core: NodeCore::new("late"),
        calls: calls.clone(),
    };
    g.create_node("late", late).unwrap();
    let control_id = std::thread::current().id();
    assert_eq!(calls.lock().unwrap().last(), Some(&(control_id, 48000)));
    p.process(64).unwrap();
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[test]
fn param_follows_values_the_node_sets_itself() {
    let (mut g, mut p) = graph();
    g.create_node("knob", ControlSource::new(0.3f32)).unwrap();
    g.create_node("dc", dc(1.0)).unwrap();
    g.connect("knob", "out", "dc", "value").unwrap();
    g.create_node("slew", SlewLimiter::from_rate_per_second(1000.0)).unwrap();
    assert_eq!(g.param("slew", "rate"), Some(ControlValue::Float(1000.0 / 44100.0)));

    g.prepare(48000, 16).unwrap();
    p.process(16).unwrap();

    assert_eq!(g.param("dc", "value"), Some(ControlValue::Float(0.3)));
    assert!(p.node_output("dc", 0).unwrap().iter().all(|&s| s == 0.3));
    assert_eq!(g.param("slew", "rate"), Some(ControlValue::Float(1000.0 / 48000.0)));
    let listed = g.get_node("dc").unwrap().params();
    assert_eq!(listed[0].value, ControlValue::Float(0.3));
}

#[test]
fn each_audio_input_sums_only_its_own_sources() {
    let (mut g, mut p) = graph();
    g.create_node("pair", Pair::new()).unwrap();
    for (id, value, port) in [("one", 1.0, "a"), ("two", 2.0, "a"), ("four", 4.0, "b"), ("eight", 8.0, "b")] {
        g.create_node(id, dc(value)).unwrap();
        g.connect(id, "out", "pair", port).unwrap();
    }
    g.prepare(44100, 32).unwrap();

    for _ in 0..3 {
        p.process(32).unwrap();
        assert!(p.node_output("pair", 0).unwrap().iter().all(|&s| s == 3.0));
        assert!(p.node_output("pair", 1).unwrap().iter().all(|&s| s == 12.0));
    }

    assert!(g.disconnect("eight", "out", "pair", "b"));
    p.process(32).unwrap();
    assert!(p.node_output("pair", 0).unwrap().iter().all(|&s| s == 3.0));
    assert!(p.node_output("pair", 1).unwrap().iter().all(|&s| s == 4.0));
}

#[test]
fn displaced_text_values_return_to_the_control_thread() {
    let (mut g, mut p) = graph();
    g.create_node("toggle", TextToggle::new("left", "right")).unwrap();
    g.create_node("rec", Recorder::new()).unwrap();
    g.connect("toggle", "out", "rec", "control").unwrap();
    g.prepare(44100, 16).unwrap();

    for i in 0..100 {
        p.process(16).unwrap();
        let expected = if i % 2 == 0 { "left" } else { "right" };
        let seen = p.control_output("rec", "control").and_then(ControlValue::as_text);
        assert_eq!(seen, Some(expected));
        g.collect_garbage();
    }
    assert_eq!(p.retire_overflows(), 0);
}

#[test]
fn uncollected_retirements_are_counted() {
    let (mut g, mut p) = GraphManager::new(GraphSettings::default().with_command_queue_size(1));
    g.create_node("toggle", TextToggle::new("left", "right")).unwrap();
    g.create_node("rec", Recorder::new()).unwrap();
    g.connect("toggle", "out", "rec", "control").unwrap();
    g.prepare(44100, 16).unwrap();

    // Only the first change fit in the queue; the rest is still pending.
    assert_eq!(p.process(16), Err(GraphError::Unprepared));
    g.collect_garbage();

    for _ in 0..10 {
        p.process(16).unwrap();
    }
    assert!(p.retire_overflows() > 0);

    g.collect_garbage();
    let before = p.retire_overflows();
    p.process(16).unwrap();
    assert_eq!(p.retire_overflows(), before);
}
