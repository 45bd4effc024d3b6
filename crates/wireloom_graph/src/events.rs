// SPDX-License-Identifier: MIT OR Apache-2.0
//! Event and action propagation.
//!
//! Triggers raised while a hook runs are queued and drained by the outermost
//! dispatch, so a chain of events never recurses through node hooks.

use crate::evaluation::{NodeError, StepError};
use crate::graph::{Graph, ON_EXECUTED_OUTPUT};
use crate::link::LinkId;
use crate::node::{NodeId, NodeMode};
use crate::Value;
use uuid::Uuid;

/// A trigger waiting to be delivered
#[derive(Debug, Clone)]
pub(crate) struct PendingTrigger {
    pub origin: NodeId,
    pub slot: usize,
    pub payload: Option<Value>,
    pub link: Option<LinkId>,
    pub correlation: Option<Uuid>,
}

impl Graph {
    /// Fire every EVENT output of `node_id`, or only the ones named `event`
    pub fn trigger(
        &mut self,
        node_id: NodeId,
        event: Option<&str>,
        payload: Option<Value>,
    ) -> Result<(), StepError> {
        let correlation = Uuid::new_v4();
        self.dispatch(|graph| {
            graph.queue_named_trigger(node_id, event, payload, Some(correlation));
            Ok(())
        })
    }

    /// Fire one output slot, optionally through a single link
    pub fn trigger_slot(
        &mut self,
        node_id: NodeId,
        slot: usize,
        payload: Option<Value>,
        link: Option<LinkId>,
    ) -> Result<(), StepError> {
        let correlation = Uuid::new_v4();
        self.dispatch(|graph| {
            graph.queue_trigger(node_id, slot, payload, link, Some(correlation));
            Ok(())
        })
    }

    /// Run a node's execute hook, then chain its `onExecuted` output
    pub fn do_execute(
        &mut self,
        node_id: NodeId,
        correlation: Option<Uuid>,
    ) -> Result<(), StepError> {
        self.dispatch(|graph| graph.execute_node(node_id, correlation))
    }

    /// Deliver `action` to a node's action hook, then chain its `onExecuted` output
    pub fn action_do(
        &mut self,
        node_id: NodeId,
        action: &str,
        payload: Option<Value>,
        correlation: Option<Uuid>,
    ) -> Result<(), StepError> {
        self.dispatch(|graph| graph.action_node(node_id, action, payload.as_ref(), correlation))
    }

    /// Read an input, first executing its origin if that node runs on request
    pub fn pull_input_data(
        &mut self,
        node_id: NodeId,
        slot: usize,
    ) -> Result<Option<Value>, NodeError> {
        let origin = self
            .nodes
            .get(&node_id)
            .and_then(|n| n.inputs.get(slot))
            .and_then(|input| input.link)
            .and_then(|link_id| self.links.get(&link_id))
            .map(|link| link.origin_id);
        let Some(origin) = origin else {
            return Ok(None);
        };
        let on_request = self
            .nodes
            .get(&origin)
            .is_some_and(|n| n.mode == NodeMode::OnRequest && n.executes);
        if on_request {
            self.do_execute(origin, None)
                .map_err(|err| NodeError::Upstream(Box::new(err)))?;
        }
        Ok(self.node_input_data(node_id, slot).cloned())
    }

    pub(crate) fn queue_trigger(
        &mut self,
        origin: NodeId,
        slot: usize,
        payload: Option<Value>,
        link: Option<LinkId>,
        correlation: Option<Uuid>,
    ) {
        self.pending_triggers.push_back(PendingTrigger {
            origin,
            slot,
            payload,
            link,
            correlation,
        });
    }

    pub(crate) fn queue_named_trigger(
        &mut self,
        origin: NodeId,
        event: Option<&str>,
        payload: Option<Value>,
        correlation: Option<Uuid>,
    ) {
        let Some(node) = self.nodes.get(&origin) else {
            return;
        };
        let slots: Vec<usize> = node
            .outputs
            .iter()
            .enumerate()
            .filter(|(_, output)| output.slot_type.is_event())
            .filter(|(_, output)| event.map_or(true, |name| output.name == name))
            .map(|(slot, _)| slot)
            .collect();
        for slot in slots {
            self.queue_trigger(origin, slot, payload.clone(), None, correlation);
        }
    }

    /// Run `f`; the outermost caller then drains the trigger queue
    fn dispatch(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), StepError>,
    ) -> Result<(), StepError> {
        if self.dispatching {
            return f(self);
        }
        self.dispatching = true;
        let result = f(self).and_then(|()| self.flush_triggers());
        self.dispatching = false;
        if result.is_err() {
            self.pending_triggers.clear();
        }
        result
    }

    /// Deliver triggers queued by hooks that ran outside any dispatch, such
    /// as `on_added`, `on_configure` or `on_graph_event`
    pub(crate) fn drain_hook_triggers(&mut self) {
        if self.dispatching || self.pending_triggers.is_empty() {
            return;
        }
        if let Err(err) = self.dispatch(|_| Ok(())) {
            tracing::warn!("Trigger raised outside a step failed: {}", err);
        }
    }

    fn flush_triggers(&mut self) -> Result<(), StepError> {
        let mut dispatched = 0usize;
        while let Some(pending) = self.pending_triggers.pop_front() {
            if dispatched >= self.settings.max_trigger_dispatch {
                tracing::warn!(
                    "Trigger dispatch limit of {} reached, dropping {} pending trigger(s)",
                    self.settings.max_trigger_dispatch,
                    self.pending_triggers.len() + 1
                );
                self.pending_triggers.clear();
                break;
            }
            dispatched += 1;
            self.deliver_trigger(pending)?;
        }
        Ok(())
    }

    fn deliver_trigger(&mut self, pending: PendingTrigger) -> Result<(), StepError> {
        let Some(output) = self
            .nodes
            .get(&pending.origin)
            .and_then(|n| n.outputs.get(pending.slot))
        else {
            return Ok(());
        };
        let link_ids: Vec<LinkId> = output
            .links
            .iter()
            .copied()
            .filter(|id| pending.link.map_or(true, |only| only == *id))
            .collect();
        let now = self.start_time.elapsed().as_secs_f64();

        for link_id in link_ids {
            let Some(link) = self.links.get_mut(&link_id) else {
                continue;
            };
            link.last_triggered = Some(now);
            let (target, target_slot) = (link.target_id, link.target_slot);

            let Some(node) = self.nodes.get(&target) else {
                continue;
            };
            let mode = node.mode;
            let action = node.handles_actions.then(|| {
                node.inputs
                    .get(target_slot)
                    .map(|input| input.name.clone())
                    .unwrap_or_default()
            });
            match (mode, action) {
                (NodeMode::Never, _) => {}
                (NodeMode::OnTrigger, _) => self.execute_node(target, pending.correlation)?,
                (_, Some(action)) => {
                    self.action_node(
                        target,
                        &action,
                        pending.payload.as_ref(),
                        pending.correlation,
                    )?;
                }
                (_, None) => {}
            }
        }
        Ok(())
    }

    fn execute_node(
        &mut self,
        node_id: NodeId,
        correlation: Option<Uuid>,
    ) -> Result<(), StepError> {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return Ok(());
        };
        if !node.executes {
            return Ok(());
        }
        let correlation = correlation.unwrap_or_else(Uuid::new_v4);
        node.last_execution_id = Some(correlation);
        let type_name = node.type_name.clone();
        self.nodes_executing.insert(node_id);

        let span = tracing::trace_span!("execute", node = %node_id, correlation = %correlation);
        let _guard = span.enter();

        let result = self.with_behavior(node_id, Some(correlation), |behavior, ctx| {
            behavior.on_execute(ctx)
        });
        self.nodes_executing.shift_remove(&node_id);
        match result {
            None => {
                tracing::debug!(
                    "Node {} is already running, skipping re-entrant execution",
                    node_id
                );
                Ok(())
            }
            Some(Err(source)) => Err(StepError::Node {
                node_id,
                type_name,
                source,
            }),
            Some(Ok(())) => {
                self.after_node_executed(node_id, correlation);
                Ok(())
            }
        }
    }

    fn action_node(
        &mut self,
        node_id: NodeId,
        action: &str,
        payload: Option<&Value>,
        correlation: Option<Uuid>,
    ) -> Result<(), StepError> {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return Ok(());
        };
        if !node.handles_actions {
            return Ok(());
        }
        let correlation = correlation.unwrap_or_else(Uuid::new_v4);
        node.last_action_id = Some(correlation);
        let type_name = node.type_name.clone();
        self.nodes_actioning.insert(node_id);

        let span =
            tracing::trace_span!("action", node = %node_id, action, correlation = %correlation);
        let _guard = span.enter();

        let result = self.with_behavior(node_id, Some(correlation), |behavior, ctx| {
            behavior.on_action(ctx, action, payload)
        });
        self.nodes_actioning.shift_remove(&node_id);
        match result {
            None => {
                tracing::debug!("Node {} is busy, dropping action '{}'", node_id, action);
                Ok(())
            }
            Some(Err(source)) => Err(StepError::Node {
                node_id,
                type_name,
                source,
            }),
            Some(Ok(())) => {
                self.after_node_executed(node_id, correlation);
                Ok(())
            }
        }
    }

    fn after_node_executed(&mut self, node_id: NodeId, correlation: Uuid) {
        if let Some(slot) = self
            .nodes
            .get(&node_id)
            .and_then(|n| n.find_output_slot(ON_EXECUTED_OUTPUT))
        {
            self.queue_trigger(node_id, slot, None, None, Some(correlation));
        }
        for listener in &mut self.listeners {
            listener.on_node_executed(node_id, correlation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{GraphEvent, NodeBehavior, NodeContext};
    use crate::node::Node;
    use crate::settings::GraphSettings;
    use crate::testing::{
        counter_node, event_node, recorder_log, recorder_node, RecordingListener,
    };
    use serde_json::json;

    #[test]
    fn test_trigger_reaches_action_input() {
        let mut graph = Graph::new();
        let e = graph.add_node(event_node()).unwrap();
        let r = graph.add_node(recorder_node()).unwrap();
        let link = graph.connect(e, 0, r, 0).unwrap();

        graph.trigger(e, None, Some(json!(7))).unwrap();
        let log = recorder_log(&graph, r);
        assert_eq!(log.last().map(String::as_str), Some("action in 7"));
        assert!(graph.link(link).unwrap().last_triggered.is_some());
        assert!(graph.node(r).unwrap().last_action_id().is_some());
    }

    #[test]
    fn test_trigger_by_name_filters_outputs() {
        let mut graph = Graph::new();
        let e = graph.add_node(event_node()).unwrap();
        let r = graph.add_node(recorder_node()).unwrap();
        graph.connect(e, 0, r, 0).unwrap();

        graph.trigger(e, Some("other"), None).unwrap();
        assert!(!recorder_log(&graph, r).iter().any(|l| l.starts_with("action")));
        graph.trigger(e, Some("fired"), None).unwrap();
        assert!(recorder_log(&graph, r).iter().any(|l| l == "action in null"));
    }

    #[test]
    fn test_on_trigger_target_executes() {
        let mut graph = Graph::new();
        let e = graph.add_node(event_node()).unwrap();
        let c = graph.add_node(counter_node()).unwrap();
        graph.change_mode(c, NodeMode::OnTrigger);
        graph.connect(e, 0, c, "onTrigger").unwrap();

        graph.trigger_slot(e, 0, None, None).unwrap();
        assert_eq!(graph.node_output_data(c, 0), Some(&json!(1)));
        assert!(graph.node(c).unwrap().last_execution_id().is_some());

        // the emitter fires once per step; the counter only runs through it
        graph.run_step(1, None);
        assert_eq!(graph.node_output_data(c, 0), Some(&json!(2)));
    }

    #[test]
    fn test_muted_target_is_skipped() {
        let mut graph = Graph::new();
        let e = graph.add_node(event_node()).unwrap();
        let r = graph.add_node(recorder_node()).unwrap();
        graph.connect(e, 0, r, 0).unwrap();
        graph.change_mode(r, NodeMode::Never);
        graph.trigger(e, None, None).unwrap();
        assert!(recorder_log(&graph, r).iter().all(|l| !l.starts_with("action")));
    }

    #[test]
    fn test_on_executed_chains_and_shares_correlation() {
        let mut graph = Graph::with_settings(GraphSettings {
            do_add_trigger_slots: true,
            ..GraphSettings::default()
        });
        let (listener, log) = RecordingListener::new();
        graph.add_listener(Box::new(listener));
        let first = graph.add_node(counter_node()).unwrap();
        let second = graph.add_node(counter_node()).unwrap();
        graph.change_mode(first, NodeMode::OnTrigger);
        graph.change_mode(second, NodeMode::OnTrigger);
        graph
            .connect(first, crate::port::SlotRef::Event, second, crate::port::SlotRef::Action)
            .unwrap();

        let correlation = Uuid::new_v4();
        graph.do_execute(first, Some(correlation)).unwrap();
        assert_eq!(graph.node_output_data(second, 0), Some(&json!(1)));
        assert_eq!(graph.node(first).unwrap().last_execution_id(), Some(correlation));
        assert_eq!(graph.node(second).unwrap().last_execution_id(), Some(correlation));
        let log = log.borrow();
        assert_eq!(
            log.iter().filter(|e| e.starts_with("executed")).cloned().collect::<Vec<_>>(),
            vec![format!("executed {first}"), format!("executed {second}")]
        );
    }

    #[test]
    fn test_action_without_hook_is_ignored() {
        let mut graph = Graph::new();
        let c = graph.add_node(counter_node()).unwrap();
        graph.action_do(c, "anything", None, None).unwrap();
        assert!(graph.node(c).unwrap().last_action_id().is_none());
    }

    #[test]
    fn test_event_loop_is_capped() {
        // a node that re-triggers itself through a loop link forever
        struct Echo;
        impl NodeBehavior for Echo {
            fn has_action(&self) -> bool {
                true
            }
            fn on_action(
                &mut self,
                ctx: &mut NodeContext<'_>,
                _action: &str,
                _payload: Option<&Value>,
            ) -> Result<(), NodeError> {
                ctx.trigger(None, None);
                Ok(())
            }
        }
        fn echo() -> Node {
            let mut node = Node::new("test/echo", "Echo").with_behavior(Box::new(Echo));
            node.add_input("in", "action");
            node.add_output("out", "event");
            node
        }

        let mut graph = Graph::with_settings(GraphSettings {
            max_trigger_dispatch: 50,
            ..GraphSettings::default()
        });
        let a = graph.add_node(echo()).unwrap();
        let b = graph.add_node(echo()).unwrap();
        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(b, 0, a, 0).unwrap();

        graph.trigger(a, None, None).unwrap();
        assert!(graph.pending_triggers.is_empty());
    }

    #[test]
    fn test_executing_set_visible_inside_hook() {
        struct Inspector;
        impl NodeBehavior for Inspector {
            fn has_execute(&self) -> bool {
                true
            }
            fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
                let me = ctx.node_id();
                let seen = ctx.graph().nodes_executing().any(|id| id == me);
                ctx.set_output_data(0, json!(seen));
                Ok(())
            }
        }
        let mut graph = Graph::new();
        let mut node = Node::new("test/inspector", "Inspector").with_behavior(Box::new(Inspector));
        node.add_output("seen", "boolean");
        let id = graph.add_node(node).unwrap();
        graph.run_step(1, None);
        assert_eq!(graph.node_output_data(id, 0), Some(&json!(true)));
        assert_eq!(graph.nodes_executing().count(), 0);
    }

    #[test]
    fn test_pull_runs_on_request_origin() {
        struct Puller;
        impl NodeBehavior for Puller {
            fn has_execute(&self) -> bool {
                true
            }
            fn on_execute(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
                let value = ctx.pull_input_data(0)?.unwrap_or(Value::Null);
                ctx.set_output_data(0, value);
                Ok(())
            }
        }
        let mut graph = Graph::new();
        let source = graph.add_node(counter_node().with_mode(NodeMode::OnRequest)).unwrap();
        let mut puller = Node::new("test/puller", "Puller").with_behavior(Box::new(Puller));
        puller.add_input("in", "*");
        puller.add_output("out", "*");
        let p = graph.add_node(puller).unwrap();
        graph.connect(source, 0, p, 0).unwrap();

        graph.run_step(2, None);
        assert_eq!(graph.node_output_data(p, 0), Some(&json!(2)));
    }

    #[test]
    fn test_trigger_from_start_hook_is_delivered_at_start() {
        struct Announcer;
        impl NodeBehavior for Announcer {
            fn on_graph_event(&mut self, ctx: &mut NodeContext<'_>, event: GraphEvent) {
                if event == GraphEvent::Start {
                    ctx.trigger(None, Some(json!("go")));
                }
            }
        }
        let mut graph = Graph::new();
        let mut announcer =
            Node::new("test/announcer", "Announcer").with_behavior(Box::new(Announcer));
        announcer.add_output("started", "event");
        let a = graph.add_node(announcer).unwrap();
        let r = graph.add_node(recorder_node()).unwrap();
        graph.connect(a, 0, r, 0).unwrap();

        graph.start(0);
        assert!(recorder_log(&graph, r).iter().any(|l| l == "action in \"go\""));
        assert!(graph.pending_triggers.is_empty());
        assert_eq!(graph.iteration(), 0);
    }
}
