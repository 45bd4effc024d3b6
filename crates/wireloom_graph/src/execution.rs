// SPDX-License-Identifier: MIT OR Apache-2.0
//! Execution order, the step loop and the running/stopped lifecycle.

use crate::evaluation::{GraphEvent, StepError};
use crate::graph::Graph;
use crate::link::LinkId;
use crate::node::{NodeId, NodeMode, NODE_TITLE_HEIGHT};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Whether the host should be stepping the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GraphStatus {
    /// Idle
    #[default]
    Stopped,
    /// Started and not yet stopped
    Running,
}

/// How the host loop should pace steps while running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSchedule {
    /// One step per display frame
    EveryFrame,
    /// One step per fixed interval
    Interval(Duration),
}

/// Result of [`Graph::run_step`]
#[derive(Debug)]
pub enum StepOutcome {
    /// All iterations ran
    Completed,
    /// A node failed; the graph has been stopped
    Faulted(StepError),
}

impl StepOutcome {
    /// Whether the step ran to completion
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl Graph {
    // ------------------------------------------------------------------
    // Ordering
    // ------------------------------------------------------------------

    /// Topologically sort the nodes, breaking ties by priority.
    ///
    /// Only links whose origin still exists count towards a node's in-degree.
    /// Nodes left over because they sit on a cycle are appended in insertion
    /// order, so every node appears exactly once. With `set_level` each node's
    /// longest-path depth is recorded for `arrange`.
    pub fn compute_execution_order(&mut self, set_level: bool) -> Vec<NodeId> {
        let mut remaining: IndexMap<NodeId, usize> = IndexMap::new();
        let mut ready: VecDeque<NodeId> = VecDeque::new();
        let mut levels: IndexMap<NodeId, usize> = IndexMap::new();

        for node in self.nodes.values() {
            let in_degree = node
                .inputs
                .iter()
                .filter_map(|input| input.link)
                .filter_map(|link_id| self.links.get(&link_id))
                .filter(|link| self.nodes.contains_key(&link.origin_id))
                .count();
            if in_degree == 0 {
                ready.push_back(node.id);
                levels.insert(node.id, 0);
            } else {
                remaining.insert(node.id, in_degree);
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited_links: HashSet<LinkId> = HashSet::new();

        while let Some(node_id) = ready.pop_front() {
            order.push(node_id);
            let level = levels.get(&node_id).copied().unwrap_or(0);
            let Some(node) = self.nodes.get(&node_id) else {
                continue;
            };
            for link_id in node.outputs.iter().flat_map(|output| output.links.iter()) {
                if !visited_links.insert(*link_id) {
                    continue;
                }
                let Some(link) = self.links.get(link_id) else {
                    continue;
                };
                let target = link.target_id;
                let Some(in_degree) = remaining.get_mut(&target) else {
                    continue;
                };
                let target_level = levels.entry(target).or_insert(0);
                *target_level = (*target_level).max(level + 1);
                *in_degree -= 1;
                if *in_degree == 0 {
                    remaining.shift_remove(&target);
                    ready.push_back(target);
                }
            }
        }

        if !remaining.is_empty() {
            tracing::debug!("{} node(s) are part of a cycle", remaining.len());
        }
        // leftovers keep insertion order
        order.extend(
            self.nodes
                .keys()
                .filter(|id| remaining.contains_key(*id))
                .copied(),
        );

        for (index, id) in order.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.order = index;
            }
        }
        order.sort_by_key(|id| {
            self.nodes
                .get(id)
                .map_or((0, 0), |node| (node.priority, node.order))
        });
        for (index, id) in order.iter().enumerate() {
            if let Some(node) = self.nodes.get_mut(id) {
                node.order = index;
                if set_level {
                    node.level = levels.get(id).copied().unwrap_or(0);
                }
            }
        }

        order
    }

    /// Recompute and cache the execution order
    pub fn update_execution_order(&mut self) {
        let order = self.compute_execution_order(false);
        let executable = order
            .iter()
            .copied()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.executes))
            .collect();
        self.nodes_in_order = order;
        self.nodes_executable = Some(executable);
    }

    /// Cached execution order
    pub fn nodes_in_order(&self) -> &[NodeId] {
        &self.nodes_in_order
    }

    /// Cached order filtered to nodes with an execute hook
    pub fn nodes_executable(&self) -> Option<&[NodeId]> {
        self.nodes_executable.as_deref()
    }

    /// Lay nodes out in columns by depth
    pub fn arrange(&mut self, margin: f32) {
        let order = self.compute_execution_order(true);
        let mut columns: Vec<Vec<NodeId>> = Vec::new();
        for id in order {
            let Some(level) = self.nodes.get(&id).map(|n| n.level) else {
                continue;
            };
            if columns.len() <= level {
                columns.resize_with(level + 1, Vec::new);
            }
            columns[level].push(id);
        }

        let mut x = margin;
        for column in columns {
            let mut y = margin + NODE_TITLE_HEIGHT;
            let mut width: f32 = 100.0;
            for id in column {
                let Some(node) = self.nodes.get_mut(&id) else {
                    continue;
                };
                node.pos = [x, y];
                width = width.max(node.size[0]);
                y += node.size[1] + margin + NODE_TITLE_HEIGHT;
            }
            x += width + margin;
        }
        self.update_execution_order();
        self.mark_dirty();
    }

    // ------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------

    /// Run `iterations` steps over the first `limit` executable nodes.
    ///
    /// A failing node stops the graph; the error is logged and returned in
    /// the outcome. Work already done in the failed step is kept.
    pub fn run_step(&mut self, iterations: u32, limit: Option<usize>) -> StepOutcome {
        match self.try_run_step(iterations, limit) {
            Ok(()) => StepOutcome::Completed,
            Err(err) => {
                tracing::error!("Error during execution: {}", err);
                self.stop();
                StepOutcome::Faulted(err)
            }
        }
    }

    /// Like [`Graph::run_step`] but returns the first node error unchanged and
    /// leaves the run status alone
    pub fn try_run_step(&mut self, iterations: u32, limit: Option<usize>) -> Result<(), StepError> {
        let start = Instant::now();
        self.global_time = start.duration_since(self.start_time).as_secs_f64();

        let result = self.run_iterations(iterations, limit);

        let now = Instant::now();
        self.execution_time = now.duration_since(start).as_secs_f64();
        self.elapsed_time = now.duration_since(self.last_update_time).as_secs_f64();
        self.last_update_time = now;
        self.nodes_executing.clear();
        self.nodes_actioning.clear();
        result
    }

    fn run_iterations(&mut self, iterations: u32, limit: Option<usize>) -> Result<(), StepError> {
        for _ in 0..iterations {
            // snapshot: hooks may add or remove nodes
            let order: Vec<NodeId> = match &self.nodes_executable {
                Some(executable) => executable.clone(),
                None => self.nodes.keys().copied().collect(),
            };
            let count = limit.map_or(order.len(), |limit| limit.min(order.len()));

            for node_id in &order[..count] {
                let Some(node) = self.nodes.get(node_id) else {
                    continue;
                };
                if node.mode != NodeMode::Always || !node.executes {
                    continue;
                }
                self.do_execute(*node_id, None)?;
            }

            self.fixed_time += self.settings.fixed_time_lapse;
            self.iteration += 1;
            for listener in &mut self.listeners {
                listener.on_step_executed();
            }
        }

        for listener in &mut self.listeners {
            listener.on_after_execute();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start running. `interval_ms == 0` asks for frame pacing.
    ///
    /// Returns `false` if the graph was already running.
    pub fn start(&mut self, interval_ms: u64) -> bool {
        if self.status == GraphStatus::Running {
            return false;
        }
        let now = Instant::now();
        self.status = GraphStatus::Running;
        self.run_generation += 1;
        self.schedule = Some(if interval_ms == 0 {
            RunSchedule::EveryFrame
        } else {
            RunSchedule::Interval(Duration::from_millis(interval_ms))
        });
        self.start_time = now;
        self.last_update_time = now;

        tracing::info!("Graph started ({:?})", self.schedule);
        for listener in &mut self.listeners {
            listener.on_play();
        }
        self.broadcast_event(GraphEvent::Start);
        true
    }

    /// Stop running. Returns `false` if the graph was already stopped.
    pub fn stop(&mut self) -> bool {
        if self.status == GraphStatus::Stopped {
            return false;
        }
        self.status = GraphStatus::Stopped;
        self.schedule = None;
        // invalidates ticks the host already scheduled
        self.run_generation += 1;

        tracing::info!("Graph stopped");
        for listener in &mut self.listeners {
            listener.on_stop();
        }
        self.broadcast_event(GraphEvent::Stop);
        true
    }

    /// Current run status
    pub fn status(&self) -> GraphStatus {
        self.status
    }

    /// Whether the graph is running
    pub fn is_running(&self) -> bool {
        self.status == GraphStatus::Running
    }

    /// Pacing requested by the last `start`
    pub fn schedule(&self) -> Option<RunSchedule> {
        self.schedule
    }

    /// Changes on every start and stop
    pub fn run_generation(&self) -> u64 {
        self.run_generation
    }

    /// Whether a tick scheduled during `generation` should still run
    pub fn is_current_run(&self, generation: u64) -> bool {
        self.is_running() && self.run_generation == generation
    }

    /// Send a lifecycle event to every ALWAYS-mode node
    pub fn broadcast_event(&mut self, event: GraphEvent) {
        let ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.mode == NodeMode::Always)
            .map(|n| n.id)
            .collect();
        for id in ids {
            self.with_behavior(id, None, |behavior, ctx| behavior.on_graph_event(ctx, event));
        }
        self.drain_hook_triggers();
    }

    // ------------------------------------------------------------------
    // Clocks and bookkeeping
    // ------------------------------------------------------------------

    /// Seconds from the last start (or creation) to the current step
    pub fn global_time(&self) -> f64 {
        self.global_time
    }

    /// Deterministic clock advanced by `fixed_time_lapse` per iteration
    pub fn fixed_time(&self) -> f64 {
        self.fixed_time
    }

    /// Step iterations run so far
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Seconds between the last two `run_step` calls
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    /// Seconds spent in the last `run_step` call
    pub fn execution_time(&self) -> f64 {
        self.execution_time
    }

    /// Nodes whose execute hook is running right now
    pub fn nodes_executing(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes_executing.iter().copied()
    }

    /// Nodes whose action hook is running right now
    pub fn nodes_actioning(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes_actioning.iter().copied()
    }
}
