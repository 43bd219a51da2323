//! The built-in measurement engine.
//!
//! A [`Profile`] runs a workload with a [`Recorder`] that the workload
//! reports its frames to. The recorder keeps a call tree and charges each
//! frame the amount of the measured quantity that elapsed while it was on
//! the stack.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use log::{debug, warn};

use crate::error::MeasurementError;
use crate::symbols::ExclusionTarget;

/// Frames left out by `--exclude-common`. Their cost is charged to the
/// caller.
pub const COMMON_EXCLUSIONS: &[&str] = &[
    "core::iter::traits::iterator::Iterator#for_each",
    "core::iter::traits::iterator::Iterator#fold",
    "core::iter::traits::iterator::Iterator#map",
    "core::iter::traits::iterator::Iterator#try_fold",
    "core::option::Option#map",
    "core::result::Result#map",
    "core::ops::function::FnOnce#call_once",
    "alloc::vec::Vec#extend",
    "alloc::vec::Vec#retain",
    "std::collections::hash::map::HashMap#retain",
];

/// The quantity a session measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureMode {
    WallTime,
    ProcessTime,
    Allocations,
    Memory,
}

impl MeasureMode {
    pub fn label(self) -> &'static str {
        match self {
            MeasureMode::WallTime => "wall_time",
            MeasureMode::ProcessTime => "process_time",
            MeasureMode::Allocations => "allocations",
            MeasureMode::Memory => "memory",
        }
    }
}

impl FromStr for MeasureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wall" => Ok(MeasureMode::WallTime),
            "process" => Ok(MeasureMode::ProcessTime),
            "allocations" => Ok(MeasureMode::Allocations),
            "memory" => Ok(MeasureMode::Memory),
            other => Err(format!(
                "unknown mode '{}', expected one of wall, process, allocations, memory",
                other
            )),
        }
    }
}

impl fmt::Display for MeasureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileOptions {
    pub allow_exceptions: bool,
    pub exclude_common: bool,
    pub measure_mode: MeasureMode,
    pub track_allocations: bool,
}

/// One node of the recorded call tree.
#[derive(Debug, Clone, Default)]
pub struct CallNode {
    pub name: String,
    pub location: Option<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub calls: u64,
    pub total: f64,
    pub self_value: f64,
    pub wait: f64,
    pub allocations: u64,
    pub bytes: u64,
}

impl CallNode {
    pub fn child_value(&self) -> f64 {
        (self.total - self.self_value - self.wait).max(0.0)
    }
}

/// Per-method totals aggregated over every call site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodSummary {
    pub name: String,
    pub location: Option<String>,
    pub calls: u64,
    pub total: f64,
    pub self_value: f64,
    pub wait: f64,
    pub child: f64,
    pub allocations: u64,
    pub bytes: u64,
}

/// The measurements of a stopped session.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub mode: MeasureMode,
    pub track_allocations: bool,
    /// Node 0 is the root of the tree and spans the whole session.
    pub nodes: Vec<CallNode>,
}

impl ResultSet {
    pub const ROOT: usize = 0;

    pub fn total(&self) -> f64 {
        self.nodes[Self::ROOT].total
    }

    pub fn root(&self) -> &CallNode {
        &self.nodes[Self::ROOT]
    }

    /// Percentage of the session total, 0 for an empty session.
    pub fn percent(&self, value: f64) -> f64 {
        let total = self.total();
        if total > 0.0 {
            value / total * 100.0
        } else {
            0.0
        }
    }

    /// Methods in first-seen order, excluding the root.
    pub fn methods(&self) -> Vec<MethodSummary> {
        let mut methods: Vec<MethodSummary> = Vec::new();
        for node in self.nodes.iter().skip(1) {
            let idx = match methods.iter().position(|m| m.name == node.name) {
                Some(idx) => idx,
                None => {
                    methods.push(MethodSummary {
                        name: node.name.clone(),
                        location: node.location.clone(),
                        ..MethodSummary::default()
                    });
                    methods.len() - 1
                }
            };
            let summary = &mut methods[idx];
            summary.calls += node.calls;
            summary.self_value += node.self_value;
            summary.wait += node.wait;
            summary.allocations += node.allocations;
            summary.bytes += node.bytes;
            // A recursive call is already inside its outer call's total.
            if !self.has_ancestor_named(node, &node.name) {
                summary.total += node.total;
            }
        }
        for method in &mut methods {
            method.child = (method.total - method.self_value - method.wait).max(0.0);
        }
        methods
    }

    /// Methods calling `name`, with the calls and total they account for.
    pub fn callers(&self, name: &str) -> Vec<(String, u64, f64)> {
        let mut edges = Vec::new();
        for node in self.nodes.iter().skip(1).filter(|n| n.name == name) {
            if let Some(parent) = node.parent.filter(|&p| p != Self::ROOT) {
                merge_edge(&mut edges, &self.nodes[parent].name, node.calls, node.total);
            }
        }
        edges
    }

    /// Methods `name` calls, with their calls and totals.
    pub fn callees(&self, name: &str) -> Vec<(String, u64, f64)> {
        let mut edges = Vec::new();
        for node in self.nodes.iter().skip(1).filter(|n| n.name == name) {
            for child in node.children.iter().map(|&c| &self.nodes[c]) {
                merge_edge(&mut edges, &child.name, child.calls, child.total);
            }
        }
        edges
    }

    fn has_ancestor_named(&self, node: &CallNode, name: &str) -> bool {
        let mut next = node.parent;
        while let Some(idx) = next {
            if idx != Self::ROOT && self.nodes[idx].name == name {
                return true;
            }
            next = self.nodes[idx].parent;
        }
        false
    }
}

fn merge_edge(edges: &mut Vec<(String, u64, f64)>, name: &str, calls: u64, total: f64) {
    match edges.iter_mut().find(|(n, _, _)| n == name) {
        Some(edge) => {
            edge.1 += calls;
            edge.2 += total;
        }
        None => edges.push((name.to_string(), calls, total)),
    }
}

#[derive(Debug)]
struct Frame {
    /// `None` for an excluded frame.
    node: Option<usize>,
    start: f64,
    children: f64,
    wait: f64,
}

/// Receives the workload's frames while a session runs.
#[derive(Debug)]
pub struct Recorder {
    mode: MeasureMode,
    track_allocations: bool,
    excluded: HashSet<String>,
    started: Instant,
    cpu_at_start: f64,
    allocations: u64,
    bytes: u64,
    paused_at: Option<f64>,
    paused_total: f64,
    nodes: Vec<CallNode>,
    stack: Vec<Frame>,
}

impl Recorder {
    fn new(options: &ProfileOptions, excluded: HashSet<String>, paused: bool) -> Self {
        let root = CallNode { name: "<root>".into(), calls: 1, ..CallNode::default() };
        let mut recorder = Recorder {
            mode: options.measure_mode,
            track_allocations: options.track_allocations,
            excluded,
            started: Instant::now(),
            cpu_at_start: cpu_seconds(),
            allocations: 0,
            bytes: 0,
            paused_at: None,
            paused_total: 0.0,
            nodes: vec![root],
            stack: Vec::new(),
        };
        if paused {
            recorder.pause();
        }
        recorder
    }

    pub fn mode(&self) -> MeasureMode {
        self.mode
    }

    fn raw(&self) -> f64 {
        match self.mode {
            MeasureMode::WallTime => self.started.elapsed().as_secs_f64(),
            MeasureMode::ProcessTime => cpu_seconds() - self.cpu_at_start,
            MeasureMode::Allocations => self.allocations as f64,
            MeasureMode::Memory => self.bytes as f64,
        }
    }

    /// The measured quantity so far, not counting paused intervals.
    pub fn now(&self) -> f64 {
        self.paused_at.unwrap_or_else(|| self.raw()) - self.paused_total
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn pause(&mut self) {
        if self.paused_at.is_none() {
            debug!("measurement paused");
            self.paused_at = Some(self.raw());
        }
    }

    pub fn resume(&mut self) {
        if let Some(at) = self.paused_at.take() {
            debug!("measurement resumed");
            self.paused_total += self.raw() - at;
        }
    }

    pub fn enter(&mut self, name: &str) {
        self.enter_at(name, None);
    }

    /// Pushes a frame for `name`, recording where it is defined.
    pub fn enter_at(&mut self, name: &str, location: Option<&str>) {
        let start = self.now();
        if self.excluded.contains(name) {
            self.stack.push(Frame { node: None, start, children: 0.0, wait: 0.0 });
            return;
        }
        let parent = self.current_node();
        let existing = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name);
        let idx = match existing {
            Some(idx) => idx,
            None => {
                let idx = self.nodes.len();
                self.nodes.push(CallNode {
                    name: name.to_string(),
                    location: location.map(str::to_string),
                    parent: Some(parent),
                    ..CallNode::default()
                });
                self.nodes[parent].children.push(idx);
                idx
            }
        };
        self.nodes[idx].calls += 1;
        self.stack.push(Frame { node: Some(idx), start, children: 0.0, wait: 0.0 });
    }

    /// Pops the innermost frame. Does nothing when no frame is open.
    pub fn leave(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let elapsed = self.now() - frame.start;
        let charged = match frame.node {
            Some(idx) => {
                let node = &mut self.nodes[idx];
                node.total += elapsed;
                node.self_value += (elapsed - frame.children - frame.wait).max(0.0);
                elapsed
            }
            // Only the excluded frame's callees stay visible to its caller.
            None => frame.children,
        };
        if let Some(parent) = self.stack.last_mut() {
            parent.children += charged;
        }
    }

    /// Counts an allocation of `bytes` against the current frame.
    pub fn record_allocation(&mut self, bytes: u64) {
        self.allocations += 1;
        self.bytes += bytes;
        if self.track_allocations && !self.is_paused() {
            let idx = self.current_node();
            self.nodes[idx].allocations += 1;
            self.nodes[idx].bytes += bytes;
        }
    }

    /// Charges `amount` of the current frame's cost as waiting.
    pub fn record_wait(&mut self, amount: f64) {
        let idx = self.current_node();
        self.nodes[idx].wait += amount;
        if let Some(frame) = self.stack.iter_mut().rev().find(|f| f.node == Some(idx)) {
            frame.wait += amount;
        }
    }

    fn current_node(&self) -> usize {
        self.stack.iter().rev().find_map(|f| f.node).unwrap_or(ResultSet::ROOT)
    }

    fn finish(mut self) -> ResultSet {
        while !self.stack.is_empty() {
            self.leave();
        }
        let total = self.now();
        let children = self.nodes[ResultSet::ROOT]
            .children
            .iter()
            .map(|&c| self.nodes[c].total)
            .sum::<f64>();
        let root = &mut self.nodes[ResultSet::ROOT];
        root.total = total;
        root.self_value = (total - children - root.wait).max(0.0);
        ResultSet { mode: self.mode, track_allocations: self.track_allocations, nodes: self.nodes }
    }
}

/// A measurement session.
#[derive(Debug)]
pub struct Profile {
    options: ProfileOptions,
    excluded: Vec<String>,
    results: Option<ResultSet>,
}

impl Profile {
    pub fn new(options: ProfileOptions) -> Self {
        let mut excluded = Vec::new();
        if options.exclude_common {
            excluded.extend(COMMON_EXCLUSIONS.iter().map(|s| s.to_string()));
        }
        Profile { options, excluded, results: None }
    }

    pub fn exclude(&mut self, target: &ExclusionTarget) {
        debug!("excluding {}", target);
        self.excluded.push(target.frame_name());
    }

    /// Frame names excluded so far, in registration order.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Starts measuring. The recorder stays live until handed back to
    /// [`Profile::stop`].
    pub fn start(&self, paused: bool) -> Recorder {
        let excluded = self.excluded.iter().cloned().collect();
        Recorder::new(&self.options, excluded, paused)
    }

    /// Closes every open frame and keeps the results.
    pub fn stop(&mut self, recorder: Recorder) -> &ResultSet {
        &*self.results.insert(recorder.finish())
    }

    /// Decides whether an error the workload raised reaches the caller.
    pub fn settle(&self, outcome: Result<(), MeasurementError>) -> Result<(), MeasurementError> {
        match outcome {
            Err(e) if self.options.allow_exceptions => Err(e),
            Err(e) => {
                warn!("suppressed error raised while profiling: {}", e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    /// Runs `workload` under measurement from start to stop. A failing
    /// workload is only reported back when exceptions are allowed; results
    /// are kept either way.
    pub fn run<F>(&mut self, paused: bool, workload: F) -> Result<&ResultSet, MeasurementError>
    where
        F: FnOnce(&mut Recorder) -> Result<(), MeasurementError>,
    {
        let mut recorder = self.start(paused);
        let outcome = self.settle(workload(&mut recorder));
        let results = self.stop(recorder);
        outcome.map(|()| results)
    }

    pub fn results(&self) -> Option<&ResultSet> {
        self.results.as_ref()
    }
}

fn rusage_seconds(who: libc::c_int) -> f64 {
    // SAFETY: getrusage only writes into the zeroed struct we own.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(who, &mut usage) } != 0 {
        return 0.0;
    }
    let tv = |t: libc::timeval| t.tv_sec as f64 + t.tv_usec as f64 / 1e6;
    tv(usage.ru_utime) + tv(usage.ru_stime)
}

/// User plus system CPU seconds of this process and its reaped children.
fn cpu_seconds() -> f64 {
    rusage_seconds(libc::RUSAGE_SELF) + rusage_seconds(libc::RUSAGE_CHILDREN)
}

/// User plus system CPU seconds of reaped children only.
pub fn children_cpu_seconds() -> f64 {
    rusage_seconds(libc::RUSAGE_CHILDREN)
}

/// Peak resident set size of the largest reaped child, in bytes.
pub fn children_peak_rss() -> u64 {
    // SAFETY: as in `rusage_seconds`.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) } != 0 {
        return 0;
    }
    let maxrss = usage.ru_maxrss.max(0) as u64;
    // Linux reports kilobytes, macOS bytes.
    if cfg!(target_os = "macos") {
        maxrss
    } else {
        maxrss * 1024
    }
}
