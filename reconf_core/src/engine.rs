//! Simulation Engine - deterministic discrete-event aggregation runs.
//!
//! The engine is configured like a network simulator: named interfaces
//! carry a bandwidth and a latency matrix, nodes are created with an entry
//! behaviour and an argument bundle, and `run` drives an event queue to
//! completion.
//!
//! # Semantics
//!
//! - Messages travel hop by hop along BFS shortest paths (lowest node
//!   index wins ties).
//! - A hop from `a` to `b` costs `latency + size / bandwidth` and starts at
//!   the earliest instant where both ends stay up for the whole hop. If no
//!   such window exists the message is dropped.
//! - With interferences enabled a node's radio carries one hop at a time.
//! - A node finishing its task list sets its slot in the shared sync region.
//!
//! Diagnostics go to the sink handed to `run`, never to the global logger,
//! so concurrently running trials keep separate debug logs.

use crate::schedule::UptimeSchedule;
use crate::tasks::{Task, TaskList};
use crate::topology::TopologyMatrices;
use nalgebra::DMatrix;
use reconf_env::{SweepError, SyncRegion};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// A network simulator able to run one trial.
pub trait SimulationEngine {
    /// Registers a node running `behavior` on `interfaces`. Returns its index.
    fn create_node(
        &mut self,
        behavior: &str,
        interfaces: &[&str],
        args: Arc<NodeArguments>,
    ) -> Result<usize, SweepError>;

    /// Runs to completion, writing node reports into the results directory
    /// of the argument bundle and diagnostics into `sink`.
    fn run(&mut self, interferences: bool, sink: &mut dyn Write) -> Result<EngineSummary, SweepError>;
}

/// Per-interface link characteristics.
#[derive(Debug, Clone)]
pub struct InterfaceSpec {
    /// Bytes per second, 0 = no link
    pub bandwidth: DMatrix<f64>,

    /// Seconds per hop
    pub latency: DMatrix<f64>,

    /// Wired links (informational, routing is identical)
    pub is_wired: bool,
}

impl InterfaceSpec {
    /// Wireless interface over the given topology.
    pub fn wireless(topology: &TopologyMatrices) -> Self {
        Self {
            bandwidth: topology.bandwidth.clone(),
            latency: topology.latency.clone(),
            is_wired: false,
        }
    }
}

/// Argument bundle shared identically by every node of a trial.
pub struct NodeArguments {
    /// Where node reports are written
    pub results_dir: PathBuf,

    /// Number of nodes in the trial
    pub node_count: usize,

    /// Uptime schedule document
    pub uptime_schedule: PathBuf,

    /// Per-node task sequences
    pub task_list: TaskList,

    /// Interconnect matrices
    pub topology: TopologyMatrices,

    /// The trial's shared synchronization region
    pub sync: Arc<dyn SyncRegion>,
}

impl std::fmt::Debug for NodeArguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeArguments")
            .field("results_dir", &self.results_dir)
            .field("node_count", &self.node_count)
            .field("uptime_schedule", &self.uptime_schedule)
            .field("sync", &self.sync.name())
            .finish()
    }
}

/// Entry behaviours a node can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Work through the task list, pulling from peers when aggregating
    OnPull,
}

impl std::str::FromStr for Behavior {
    type Err = SweepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_pull" => Ok(Behavior::OnPull),
            _ => Err(SweepError::engine(format!("unknown node behaviour: {}", s))),
        }
    }
}

/// Report written for each node as `node_<i>.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: usize,
    pub finished: bool,
    pub finish_time: Option<f64>,
    pub sent: u32,
    pub received: u32,
    pub forwarded: u32,
    pub dropped: u32,
    /// Other nodes already flagged finished in the sync region when this one finished
    pub peers_finished: usize,
}

impl NodeReport {
    /// File name of a node's report inside the results directory.
    pub fn file_name(node: usize) -> String {
        format!("node_{}.yaml", node)
    }
}

/// Summary of one engine run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineSummary {
    pub nodes: usize,
    pub finished: usize,
    pub events: u64,
    pub end_time: f64,
    pub dropped: u32,
}

struct NodeSpec {
    interface: String,
    args: Arc<NodeArguments>,
}

/// Deterministic discrete-event simulator.
pub struct Simulator {
    interfaces: BTreeMap<String, InterfaceSpec>,
    nodes: Vec<NodeSpec>,
}

impl Simulator {
    /// Creates a simulator with the given named interfaces.
    pub fn new(interfaces: BTreeMap<String, InterfaceSpec>) -> Self {
        Self {
            interfaces,
            nodes: Vec::new(),
        }
    }

    /// Creates a simulator with a single interface.
    pub fn with_interface(name: &str, spec: InterfaceSpec) -> Self {
        let mut interfaces = BTreeMap::new();
        interfaces.insert(name.to_string(), spec);
        Self::new(interfaces)
    }

    /// Number of nodes created so far.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl SimulationEngine for Simulator {
    fn create_node(
        &mut self,
        behavior: &str,
        interfaces: &[&str],
        args: Arc<NodeArguments>,
    ) -> Result<usize, SweepError> {
        behavior.parse::<Behavior>()?;
        let interface = interfaces
            .first()
            .ok_or_else(|| SweepError::engine("node needs at least one interface"))?;
        if let Some(missing) = interfaces.iter().find(|i| !self.interfaces.contains_key(**i)) {
            return Err(SweepError::engine(format!("unknown interface: {}", missing)));
        }
        self.nodes.push(NodeSpec {
            interface: interface.to_string(),
            args,
        });
        Ok(self.nodes.len() - 1)
    }

    fn run(&mut self, interferences: bool, sink: &mut dyn Write) -> Result<EngineSummary, SweepError> {
        let first = self
            .nodes
            .first()
            .ok_or_else(|| SweepError::engine("no nodes to simulate"))?;
        let args = Arc::clone(&first.args);
        let n = self.nodes.len();

        if args.node_count != n {
            return Err(SweepError::engine(format!(
                "argument bundle declares {} nodes, {} were created",
                args.node_count, n
            )));
        }
        if self.nodes.iter().any(|spec| spec.interface != first.interface) {
            return Err(SweepError::engine("all nodes must share one interface"));
        }
        let interface = &self.interfaces[&first.interface];
        if interface.bandwidth.shape() != (n, n) || interface.latency.shape() != (n, n) {
            return Err(SweepError::engine(format!(
                "interface {} is not {}x{}",
                first.interface, n, n
            )));
        }
        if args.task_list.node_count() != n {
            return Err(SweepError::engine(format!(
                "task list covers {} nodes, expected {}",
                args.task_list.node_count(),
                n
            )));
        }
        if args.sync.len() < n {
            return Err(SweepError::engine(format!(
                "sync region {} has {} slots, need {}",
                args.sync.name(),
                args.sync.len(),
                n
            )));
        }

        let schedule = UptimeSchedule::load(&args.uptime_schedule, n)?;
        let routes = RoutingTable::build(&interface.bandwidth);

        let mut run = EventLoop {
            interface,
            schedule: &schedule,
            tasks: &args.task_list,
            routes: &routes,
            sync: args.sync.as_ref(),
            interferences,
            sink,
            state: vec![NodeState::default(); n],
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_msg: 0,
            events: 0,
            now: 0.0,
        };
        run.line(format_args!(
            "simulation start: {} nodes on {} (interferences={})",
            n, first.interface, interferences
        ))?;
        for node in 0..n {
            run.push(0.0, EventKind::Ready { node });
        }
        run.drain()?;

        let reports = run.reports();
        let summary = EngineSummary {
            nodes: n,
            finished: reports.iter().filter(|r| r.finished).count(),
            events: run.events,
            end_time: run.now,
            dropped: reports.iter().map(|r| r.dropped).sum(),
        };
        run.line(format_args!(
            "simulation end: t={:.4}s, {} events, {}/{} nodes finished, {} dropped",
            summary.end_time, summary.events, summary.finished, n, summary.dropped
        ))?;

        std::fs::create_dir_all(&args.results_dir)
            .map_err(|e| SweepError::io(&args.results_dir, e))?;
        for report in &reports {
            let path = args.results_dir.join(NodeReport::file_name(report.node));
            let yaml = serde_yaml::to_string(report).map_err(SweepError::serialization)?;
            std::fs::write(&path, yaml).map_err(|e| SweepError::io(&path, e))?;
        }

        Ok(summary)
    }
}

/// Next hop towards every destination.
struct RoutingTable {
    next_hop: Vec<Vec<Option<usize>>>,
}

impl RoutingTable {
    /// BFS from every destination; a node's next hop is its BFS parent.
    fn build(bandwidth: &DMatrix<f64>) -> Self {
        let n = bandwidth.nrows();
        let mut next_hop = vec![vec![None; n]; n];
        for dst in 0..n {
            let mut seen = vec![false; n];
            let mut frontier = VecDeque::from([dst]);
            seen[dst] = true;
            while let Some(node) = frontier.pop_front() {
                for other in 0..n {
                    if !seen[other] && other != node && bandwidth[(node, other)] > 0.0 {
                        seen[other] = true;
                        next_hop[other][dst] = Some(node);
                        frontier.push_back(other);
                    }
                }
            }
        }
        Self { next_hop }
    }

    fn next(&self, from: usize, to: usize) -> Option<usize> {
        self.next_hop[from][to]
    }
}

#[derive(Debug, Clone, Copy)]
struct Message {
    id: u64,
    src: usize,
    dst: usize,
    size: u64,
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Ready { node: usize },
    Arrive { msg: Message, at: usize },
}

struct Event {
    time: f64,
    seq: u64,
    kind: EventKind,
}

// Min-heap on (time, seq)
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

#[derive(Debug, Clone, Default)]
struct NodeState {
    next_task: usize,
    received_from: BTreeSet<usize>,
    finish_time: Option<f64>,
    peers_finished: usize,
    radio_free_at: f64,
    sent: u32,
    received: u32,
    forwarded: u32,
    dropped: u32,
}

struct EventLoop<'a> {
    interface: &'a InterfaceSpec,
    schedule: &'a UptimeSchedule,
    tasks: &'a TaskList,
    routes: &'a RoutingTable,
    sync: &'a dyn SyncRegion,
    interferences: bool,
    sink: &'a mut dyn Write,
    state: Vec<NodeState>,
    queue: BinaryHeap<Event>,
    next_seq: u64,
    next_msg: u64,
    events: u64,
    now: f64,
}

impl<'a> EventLoop<'a> {
    fn line(&mut self, args: std::fmt::Arguments<'_>) -> Result<(), SweepError> {
        writeln!(self.sink, "[{:>10.4}] {}", self.now, args)
            .map_err(|e| SweepError::engine(format!("debug sink write failed: {}", e)))
    }

    fn push(&mut self, time: f64, kind: EventKind) {
        self.queue.push(Event {
            time,
            seq: self.next_seq,
            kind,
        });
        self.next_seq += 1;
    }

    fn drain(&mut self) -> Result<(), SweepError> {
        while let Some(event) = self.queue.pop() {
            self.now = event.time;
            self.events += 1;
            match event.kind {
                EventKind::Ready { node } => self.on_ready(node)?,
                EventKind::Arrive { msg, at } => self.on_arrive(msg, at)?,
            }
        }
        Ok(())
    }

    fn on_ready(&mut self, node: usize) -> Result<(), SweepError> {
        if self.state[node].finish_time.is_some() {
            return Ok(());
        }
        let tasks = self.tasks;
        loop {
            let idx = self.state[node].next_task;
            let Some(task) = tasks.tasks(node).get(idx) else {
                return self.finish(node);
            };
            match task {
                Task::Send { to, size } => {
                    self.state[node].next_task += 1;
                    if *to == node {
                        continue;
                    }
                    let msg = Message {
                        id: self.next_msg,
                        src: node,
                        dst: *to,
                        size: *size,
                    };
                    self.next_msg += 1;
                    self.state[node].sent += 1;
                    match self.transmit(node, msg)? {
                        Some(hop_done) => {
                            self.push(hop_done, EventKind::Ready { node });
                            return Ok(());
                        }
                        None => continue,
                    }
                }
                Task::Aggregate { from } => {
                    let state = &self.state[node];
                    if from.iter().all(|f| state.received_from.contains(f)) {
                        self.state[node].next_task += 1;
                        self.line(format_args!(
                            "node {} aggregated {} contributions",
                            node,
                            from.len()
                        ))?;
                        continue;
                    }
                    // Woken up again by the next delivery
                    return Ok(());
                }
            }
        }
    }

    fn on_arrive(&mut self, msg: Message, at: usize) -> Result<(), SweepError> {
        if at == msg.dst {
            let state = &mut self.state[at];
            state.received += 1;
            state.received_from.insert(msg.src);
            self.line(format_args!(
                "node {} received msg {} from node {}",
                at, msg.id, msg.src
            ))?;
            self.push(self.now, EventKind::Ready { node: at });
            return Ok(());
        }
        self.state[at].forwarded += 1;
        self.transmit(at, msg)?;
        Ok(())
    }

    /// Schedules the next hop of `msg` from `from`. Returns when the hop
    /// completes, or `None` if the message was dropped.
    fn transmit(&mut self, from: usize, msg: Message) -> Result<Option<f64>, SweepError> {
        let Some(hop) = self.routes.next(from, msg.dst) else {
            self.state[from].dropped += 1;
            self.line(format_args!(
                "node {} dropped msg {}: no route to node {}",
                from, msg.id, msg.dst
            ))?;
            return Ok(None);
        };
        let duration = self.interface.latency[(from, hop)]
            + msg.size as f64 / self.interface.bandwidth[(from, hop)];
        let not_before = if self.interferences {
            self.now.max(self.state[from].radio_free_at)
        } else {
            self.now
        };
        let Some(start) = self
            .schedule
            .earliest_joint_window(from, hop, not_before, duration)
        else {
            self.state[from].dropped += 1;
            self.line(format_args!(
                "node {} dropped msg {}: node {} and node {} never up together for {:.4}s",
                from, msg.id, from, hop, duration
            ))?;
            return Ok(None);
        };
        let done = start + duration;
        if self.interferences {
            self.state[from].radio_free_at = done;
        }
        self.line(format_args!(
            "node {} -> node {}: msg {} ({} bytes, {} -> {}), hop {:.4}..{:.4}",
            from, hop, msg.id, msg.size, msg.src, msg.dst, start, done
        ))?;
        self.push(done, EventKind::Arrive { msg, at: hop });
        Ok(Some(done))
    }

    fn finish(&mut self, node: usize) -> Result<(), SweepError> {
        let mut peers = 0;
        for other in (0..self.state.len()).filter(|&o| o != node) {
            if self.sync.get(other)? != 0 {
                peers += 1;
            }
        }
        self.sync.set(node, 1)?;
        let state = &mut self.state[node];
        state.finish_time = Some(self.now);
        state.peers_finished = peers;
        self.line(format_args!("node {} finished ({} peers done)", node, peers))
    }

    fn reports(&self) -> Vec<NodeReport> {
        self.state
            .iter()
            .enumerate()
            .map(|(node, s)| NodeReport {
                node,
                finished: s.finish_time.is_some(),
                finish_time: s.finish_time,
                sent: s.sent,
                received: s.received,
                forwarded: s.forwarded,
                dropped: s.dropped,
                peers_finished: s.peers_finished,
            })
            .collect()
    }
}
