//! Human gate: poses a question and turns the answer into a preferred label.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_types::{Outcome, Result, StageStatus};

use crate::handler::{HandlerRequest, NodeHandler};
use crate::interviewer::{Interviewer, Question};

pub struct WaitHumanHandler {
    interviewer: Arc<dyn Interviewer>,
}

impl WaitHumanHandler {
    pub fn new(interviewer: Arc<dyn Interviewer>) -> Self {
        WaitHumanHandler { interviewer }
    }
}

#[async_trait]
impl NodeHandler for WaitHumanHandler {
    async fn execute(&self, request: &HandlerRequest<'_>) -> Result<Outcome> {
        let node = request.node;
        let mut options: Vec<String> = request
            .graph
            .outgoing_edges(&node.id)
            .iter()
            .filter_map(|e| e.label.clone())
            .collect();
        if options.is_empty() {
            options.push("Continue".to_string());
        }

        let question = Question {
            node_id: node.id.clone(),
            text: node.prompt.clone().unwrap_or_else(|| node.label.clone()),
            options,
        };
        let answer = self.interviewer.ask(&question).await?;

        let mut outcome = Outcome::with_label(StageStatus::Success, answer.clone());
        outcome.context_updates.insert(
            format!("{}.answer", node.id),
            serde_json::Value::String(answer),
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::interviewer::{AutoApproveInterviewer, RecordingInterviewer};
    use gantry_types::Context;
    use std::collections::HashMap;

    fn build_graph(dot: &str) -> Graph {
        Graph::from_dot(gantry_dot::parse(dot).unwrap()).unwrap()
    }

    async fn run(dot: &str, interviewer: Arc<dyn Interviewer>) -> Outcome {
        let graph = build_graph(dot);
        let context = Context::new();
        let completed = Vec::new();
        let outputs = HashMap::new();
        let request = HandlerRequest {
            node: graph.node("gate").unwrap(),
            graph: &graph,
            context: &context,
            completed: &completed,
            node_outputs: &outputs,
            attempt: 1,
            stage_dir: None,
            logs_dir: None,
        };
        WaitHumanHandler::new(interviewer)
            .execute(&request)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn options_come_from_edge_labels() {
        let interviewer = Arc::new(RecordingInterviewer::new(vec!["[N] Reject"]));
        let outcome = run(
            r#"digraph G {
            gate [shape="hexagon", prompt="Ready to ship?"]
            gate -> ship [label="[Y] Approve"]
            gate -> fix [label="[N] Reject"]
        }"#,
            interviewer.clone(),
        )
        .await;

        assert_eq!(outcome.preferred_label.as_deref(), Some("[N] Reject"));
        let asked = interviewer.asked.lock().unwrap();
        assert_eq!(asked[0].options, vec!["[Y] Approve", "[N] Reject"]);
        assert_eq!(asked[0].text, "Ready to ship?");
    }

    #[tokio::test]
    async fn unlabeled_edges_fall_back_to_continue() {
        let outcome = run(
            r#"digraph G {
            gate [shape="hexagon"]
            gate -> next
        }"#,
            Arc::new(AutoApproveInterviewer),
        )
        .await;

        assert_eq!(outcome.preferred_label.as_deref(), Some("Continue"));
        assert_eq!(
            outcome.context_updates["gate.answer"],
            serde_json::json!("Continue")
        );
    }
}
