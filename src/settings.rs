//! Graph configuration

/// Sizing for a graph and the queues between its control and audio halves.
///
/// ```
/// use tonegraph::GraphSettings;
///
/// let settings = GraphSettings::default()
///     .with_node_capacity(256)
///     .with_physical_inputs(8);
/// assert_eq!(settings.num_physical_inputs, 8);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GraphSettings {
    /// Node slots reserved on the audio side before the slot table has to be republished
    pub node_capacity: usize,
    /// Capacity of the command queue from the control plane to the audio thread
    pub command_queue_size: usize,
    /// Maximum events held per event port per block
    pub event_capacity: usize,
    /// Hardware input channels exposed through the physical input bridge
    pub num_physical_inputs: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            node_capacity: 64,
            command_queue_size: 64,
            event_capacity: 128,
            num_physical_inputs: 2,
        }
    }
}

impl GraphSettings {
    pub fn with_node_capacity(mut self, capacity: usize) -> Self {
        self.node_capacity = capacity.max(1);
        self
    }

    pub fn with_command_queue_size(mut self, size: usize) -> Self {
        self.command_queue_size = size.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_physical_inputs(mut self, channels: usize) -> Self {
        self.num_physical_inputs = channels;
        self
    }

    /// The return queue must absorb one retired item per command plus replaced text values.
    pub(crate) fn retired_queue_size(&self) -> usize {
        self.command_queue_size * 2
    }
}
