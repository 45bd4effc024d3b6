// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timed execution of a started graph.
//!
//! The graph is not `Send`, so the loop runs on a current-thread runtime.
//! Every tick checks the run generation captured at entry; a stop (or a
//! restart) from inside the graph ends the loop before the next step.

use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use wireloom_graph::{Graph, RunSchedule, StepError, StepOutcome};

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The requested duration elapsed
    Deadline,
    /// Ctrl-C
    Interrupted,
    /// The graph was stopped or restarted
    Stopped,
}

/// Result of a scheduled run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps executed
    pub ticks: u64,
    /// Why the loop ended
    pub reason: StopReason,
}

/// Tick length for the graph's current schedule
pub fn tick_period(graph: &Graph) -> Option<Duration> {
    match graph.schedule()? {
        RunSchedule::Interval(period) => Some(period),
        RunSchedule::EveryFrame => Some(Duration::from_millis(
            graph.settings().frame_interval_ms.max(1),
        )),
    }
}

/// Step a running graph once per tick until it stops, `duration` elapses or
/// Ctrl-C arrives. The graph is stopped on return; a faulted step has
/// already stopped it.
pub async fn run(graph: &mut Graph, duration: Option<Duration>) -> Result<RunSummary, StepError> {
    let generation = graph.run_generation();
    let Some(period) = tick_period(graph) else {
        return Ok(RunSummary {
            ticks: 0,
            reason: StopReason::Stopped,
        });
    };

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let deadline = duration.map(|duration| Instant::now() + duration);
    let expired = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expired);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    tracing::debug!(?period, ?duration, "Scheduler running");
    let mut ticks = 0;
    let reason = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !graph.is_current_run(generation) {
                    break StopReason::Stopped;
                }
                if let StepOutcome::Faulted(err) = graph.run_step(1, None) {
                    return Err(err);
                }
                ticks += 1;
            }
            () = &mut expired => break StopReason::Deadline,
            result = &mut interrupted => {
                if let Err(err) = result {
                    tracing::warn!("Ctrl-C handler failed: {err}");
                }
                break StopReason::Interrupted;
            }
        }
    };

    graph.stop();
    tracing::info!(ticks, ?reason, "Scheduler finished");
    Ok(RunSummary { ticks, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wireloom_graph::{GraphStatus, Node, NodeBehavior, NodeContext, NodeError};

    /// Stops its own graph after a few executions
    #[derive(Default)]
    struct StopAfter {
        remaining: u32,
    }

    impl NodeBehavior for StopAfter {
        fn has_execute(&self) -> bool {
            true
        }

        fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
            if self.remaining == 0 {
                ctx.graph_mut().stop();
            } else {
                self.remaining -= 1;
            }
            Ok(())
        }
    }

    struct Failing;

    impl NodeBehavior for Failing {
        fn has_execute(&self) -> bool {
            true
        }

        fn on_execute(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
            Err(NodeError::Custom("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_deadline_ends_run() {
        let mut graph = Graph::new();
        assert!(graph.start(2));
        let summary = run(&mut graph, Some(Duration::from_millis(40))).await.unwrap();

        assert_eq!(summary.reason, StopReason::Deadline);
        assert!(summary.ticks > 0);
        assert_eq!(graph.status(), GraphStatus::Stopped);
        assert!(graph.iteration() >= summary.ticks);
    }

    #[tokio::test]
    async fn test_graph_can_stop_itself() {
        let mut graph = Graph::new();
        let node =
            Node::new("test/stop", "Stop").with_behavior(Box::new(StopAfter { remaining: 2 }));
        graph.add_node(node).unwrap();
        assert!(graph.start(1));

        let summary = run(&mut graph, Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(summary.reason, StopReason::Stopped);
        assert_eq!(summary.ticks, 3);
    }

    #[tokio::test]
    async fn test_fault_is_returned() {
        let mut graph = Graph::new();
        let node = Node::new("test/fail", "Fail").with_behavior(Box::new(Failing));
        let failing = graph.add_node(node).unwrap();
        assert!(graph.start(0));

        let err = run(&mut graph, Some(Duration::from_secs(5))).await.unwrap_err();
        assert_eq!(err.node_id(), failing);
        assert!(!graph.is_running());
    }

    #[tokio::test]
    async fn test_stopped_graph_does_not_tick() {
        let mut graph = Graph::new();
        let summary = run(&mut graph, None).await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                ticks: 0,
                reason: StopReason::Stopped
            }
        );
    }

    #[test]
    fn test_frame_schedule_uses_frame_interval() {
        let mut graph = Graph::new();
        assert_eq!(tick_period(&graph), None);
        graph.start(0);
        assert_eq!(tick_period(&graph), Some(Duration::from_millis(16)));
        graph.stop();
        graph.start(250);
        assert_eq!(tick_period(&graph), Some(Duration::from_millis(250)));
    }
}
