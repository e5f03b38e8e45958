//! Filter graph: named nodes, validated connections, dependency-ordered refresh
//!
//! The graph owns every filter. Connections are made by node and port name,
//! checked by the destination filter's `validate_input`, and must keep the
//! graph acyclic. A refresh pass visits nodes in topological order and hands
//! each one an [`InputSet`] built from its upstream outputs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::errors::{ConnectionError, GraphError, ParameterError};
use super::filter::{Filter, FilterExt};
use super::parameter::Parameter;
use super::ports::{InputSet, PortSchema, StreamDescriptor};
use super::waveform::WaveformData;

/// Unique identifier for a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

struct Node {
    name: String,
    filter: Box<dyn Filter>,
    inputs: Vec<Option<StreamDescriptor>>,
    changed: bool,
}

/// Graph guarded by the single lock every refresh pass runs under
pub type SharedGraph = Arc<Mutex<FilterGraph>>;

/// Directed acyclic graph of filters
pub struct FilterGraph {
    nodes: Vec<Node>,
    node_names: HashMap<String, NodeId>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_names: HashMap::new(),
        }
    }

    /// Wrap the graph in the lock shared with the acquisition loop
    pub fn into_shared(self) -> SharedGraph {
        Arc::new(Mutex::new(self))
    }

    /// Add a filter under a unique name
    pub fn add_filter<F: Filter + 'static>(
        &mut self,
        name: impl Into<String>,
        filter: F,
    ) -> Result<NodeId, ConnectionError> {
        self.add_boxed(name, Box::new(filter))
    }

    pub fn add_boxed(
        &mut self,
        name: impl Into<String>,
        filter: Box<dyn Filter>,
    ) -> Result<NodeId, ConnectionError> {
        let name = name.into();
        if self.node_names.contains_key(&name) {
            return Err(ConnectionError::DuplicateNode(name));
        }

        let id = NodeId::new(self.nodes.len());
        let slots = filter.input_schema().len();
        debug!("Adding node {}: {} ({})", id.as_usize(), name, filter.protocol_name());
        self.node_names.insert(name.clone(), id);
        self.nodes.push(Node {
            name,
            filter,
            inputs: vec![None; slots],
            changed: true,
        });
        Ok(id)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.node_names.get(name).copied()
    }

    fn lookup(&self, name: &str) -> Result<NodeId, ConnectionError> {
        self.node_id(name)
            .ok_or_else(|| ConnectionError::NodeNotFound(name.to_string()))
    }

    /// List all node names, in insertion order
    pub fn list_nodes(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn filter(&self, name: &str) -> Option<&dyn Filter> {
        let id = self.node_id(name)?;
        Some(self.nodes[id.as_usize()].filter.as_ref())
    }

    // ── Connections ──────────────────────────────────────────────────────

    /// Connect output `from_port` of `from_node` to input `to_port` of
    /// `to_node`.
    ///
    /// Fails when either endpoint does not exist, the destination filter
    /// rejects the stream, the input is already connected, or the edge would
    /// close a cycle.
    pub fn connect(
        &mut self,
        from_node: &str,
        from_port: &str,
        to_node: &str,
        to_port: &str,
    ) -> Result<(), ConnectionError> {
        let from_id = self.lookup(from_node)?;
        let to_id = self.lookup(to_node)?;

        let from_schema = find_port(
            &self.nodes[from_id.as_usize()].filter.output_schema(),
            from_node,
            from_port,
        )?;
        let to_schema = find_port(
            &self.nodes[to_id.as_usize()].filter.input_schema(),
            to_node,
            to_port,
        )?;

        let desc = StreamDescriptor::new(from_id, from_schema.index, from_schema.kind);
        let dest = &self.nodes[to_id.as_usize()];
        if !dest.filter.validate_input(to_schema.index, Some(&desc)) {
            return Err(ConnectionError::Rejected {
                from_node: from_node.to_string(),
                from_port: from_port.to_string(),
                kind: desc.kind,
                to_node: to_node.to_string(),
                to_port: to_port.to_string(),
            });
        }

        if dest.inputs.get(to_schema.index).is_some_and(|s| s.is_some()) {
            return Err(ConnectionError::DuplicateConnection(format!(
                "Input port '{}' on node '{}' is already connected",
                to_port, to_node
            )));
        }

        if from_id == to_id || self.reaches(to_id, from_id) {
            return Err(ConnectionError::Cycle {
                from: from_node.to_string(),
                to: to_node.to_string(),
            });
        }

        let dest = &mut self.nodes[to_id.as_usize()];
        if dest.inputs.len() <= to_schema.index {
            dest.inputs.resize(to_schema.index + 1, None);
        }
        dest.inputs[to_schema.index] = Some(desc);
        dest.changed = true;
        debug!("Connected {}.{} -> {}.{}", from_node, from_port, to_node, to_port);
        Ok(())
    }

    /// Remove the connection feeding input `to_port` of `to_node`
    pub fn disconnect(
        &mut self,
        to_node: &str,
        to_port: &str,
    ) -> Result<Option<StreamDescriptor>, ConnectionError> {
        let to_id = self.lookup(to_node)?;
        let schema = find_port(
            &self.nodes[to_id.as_usize()].filter.input_schema(),
            to_node,
            to_port,
        )?;
        let node = &mut self.nodes[to_id.as_usize()];
        let previous = node.inputs.get_mut(schema.index).and_then(Option::take);
        node.changed = true;
        Ok(previous)
    }

    /// Stream currently feeding input `slot` of `node`
    pub fn input_of(&self, node: &str, slot: usize) -> Option<StreamDescriptor> {
        let id = self.node_id(node)?;
        self.nodes[id.as_usize()].inputs.get(slot).copied().flatten()
    }

    /// True when `target` is reachable from `start` following data flow
    fn reaches(&self, start: NodeId, target: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            stack.extend(self.consumers_of(id));
        }
        false
    }

    fn consumers_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().enumerate().filter_map(move |(i, n)| {
            n.inputs
                .iter()
                .flatten()
                .any(|d| d.node == id)
                .then_some(NodeId::new(i))
        })
    }

    /// Nodes in dependency order; ties resolved by insertion order
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut indegree: Vec<usize> = self
            .nodes
            .iter()
            .map(|n| {
                n.inputs
                    .iter()
                    .flatten()
                    .map(|d| d.node)
                    .collect::<HashSet<_>>()
                    .len()
            })
            .collect();

        let mut ready: VecDeque<NodeId> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| NodeId::new(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(id) = ready.pop_front() {
            order.push(id);
            for consumer in self.consumers_of(id) {
                let d = &mut indegree[consumer.as_usize()];
                *d -= 1;
                if *d == 0 {
                    ready.push_back(consumer);
                }
            }
        }
        order
    }

    // ── Refresh ──────────────────────────────────────────────────────────

    fn inputs_for(&self, id: NodeId) -> InputSet {
        let slots = self.nodes[id.as_usize()]
            .inputs
            .iter()
            .map(|desc| {
                desc.and_then(|d| self.nodes[d.node.as_usize()].filter.output(d.stream))
            })
            .collect();
        InputSet::new(slots)
    }

    fn refresh_node(&mut self, id: NodeId) {
        let inputs = self.inputs_for(id);
        let node = &mut self.nodes[id.as_usize()];
        debug!("Refreshing {}", node.name);
        node.filter.refresh(&inputs);
        node.changed = false;
    }

    /// Refresh every node once, upstream first
    pub fn refresh_all(&mut self) {
        let order = self.topological_order();
        info!("Refreshing graph with {} nodes", order.len());
        for id in order {
            self.refresh_node(id);
        }
    }

    /// Flag a node (and so everything downstream of it) for the next
    /// [`refresh_changed`](Self::refresh_changed)
    pub fn mark_changed(&mut self, node: &str) -> Result<(), ConnectionError> {
        let id = self.lookup(node)?;
        self.nodes[id.as_usize()].changed = true;
        Ok(())
    }

    /// Refresh changed nodes and their downstream closure; returns the
    /// number of nodes refreshed
    pub fn refresh_changed(&mut self) -> usize {
        let mut dirty: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.changed)
            .map(|(i, _)| NodeId::new(i))
            .collect();
        while let Some(id) = stack.pop() {
            if dirty.insert(id) {
                stack.extend(self.consumers_of(id));
            }
        }

        let order: Vec<NodeId> = self
            .topological_order()
            .into_iter()
            .filter(|id| dirty.contains(id))
            .collect();
        for &id in &order {
            self.refresh_node(id);
        }
        order.len()
    }

    // ── Node access ──────────────────────────────────────────────────────

    /// Mutate parameter `param` of `node`, run the filter's change handler
    /// and flag the node for refresh
    pub fn set_parameter<F>(&mut self, node: &str, param: &str, update: F) -> Result<(), GraphError>
    where
        F: FnOnce(&mut Parameter) -> Result<(), ParameterError>,
    {
        let id = self.lookup(node)?;
        let entry = &mut self.nodes[id.as_usize()];
        entry
            .filter
            .update_parameter(param, update)
            .map_err(|source| GraphError::Parameter {
                node: node.to_string(),
                source,
            })?;
        entry.changed = true;
        Ok(())
    }

    /// String form of [`set_parameter`](Self::set_parameter)
    pub fn set_parameter_str(&mut self, node: &str, param: &str, value: &str) -> Result<(), GraphError> {
        self.set_parameter(node, param, |p| p.parse_string(value))
    }

    /// Stage externally captured data on a source node
    /// Fails unless `node` exists and accepts external waveforms
    pub fn check_source(&self, node: &str) -> Result<(), ConnectionError> {
        let id = self.lookup(node)?;
        self.nodes[id.as_usize()]
            .filter
            .as_source()
            .map(|_| ())
            .ok_or_else(|| ConnectionError::NotASource(node.to_string()))
    }

    pub fn load_source(
        &mut self,
        node: &str,
        stream: usize,
        data: Option<WaveformData>,
    ) -> Result<(), ConnectionError> {
        let id = self.lookup(node)?;
        let entry = &mut self.nodes[id.as_usize()];
        let source = entry
            .filter
            .as_source_mut()
            .ok_or_else(|| ConnectionError::NotASource(node.to_string()))?;
        source.load(stream, data);
        entry.changed = true;
        Ok(())
    }

    /// Current output of `stream` on `node`
    pub fn output(&self, node: &str, stream: usize) -> Option<Arc<WaveformData>> {
        let id = self.node_id(node)?;
        self.nodes[id.as_usize()].filter.output(stream)
    }

    /// Current output of the port named `port` on `node`
    pub fn output_by_name(&self, node: &str, port: &str) -> Option<Arc<WaveformData>> {
        let id = self.node_id(node)?;
        let filter = &self.nodes[id.as_usize()].filter;
        let schema = filter.output_schema().into_iter().find(|s| s.name == port)?;
        filter.output(schema.index)
    }

    /// Display name of the stream described by `desc`
    pub fn stream_name(&self, desc: &StreamDescriptor) -> String {
        let node = &self.nodes[desc.node.as_usize()];
        let outputs = node.filter.output_schema();
        if outputs.len() <= 1 {
            node.name.clone()
        } else {
            let port = outputs
                .iter()
                .find(|s| s.index == desc.stream)
                .map(|s| s.name.clone())
                .unwrap_or_else(|| desc.stream.to_string());
            format!("{}.{}", node.name, port)
        }
    }

    /// Name the filter would give its output, from its current inputs
    pub fn default_output_name(&self, node: &str) -> Option<String> {
        let id = self.node_id(node)?;
        let entry = &self.nodes[id.as_usize()];
        let names: Vec<String> = entry
            .inputs
            .iter()
            .map(|d| d.map(|d| self.stream_name(&d)).unwrap_or_else(|| "NULL".to_string()))
            .collect();
        Some(entry.filter.default_output_name(&names))
    }
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn find_port(schemas: &[PortSchema], node: &str, port: &str) -> Result<PortSchema, ConnectionError> {
    schemas
        .iter()
        .find(|s| s.name == port)
        .cloned()
        .ok_or_else(|| ConnectionError::PortNotFound {
            node: node.to_string(),
            port: port.to_string(),
        })
}
