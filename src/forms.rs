//! Human-input collaborator surface.
//!
//! A human-input node suspends the whole graph until an external form
//! submission or action selection arrives. The engine knows nothing about
//! forms; the node consumes a [`FormRepository`] to decide pause vs.
//! proceed, and the repository implementation (database-backed in a real
//! deployment) lives outside this crate. [`InMemoryFormRepository`] serves
//! tests and embedded use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::node::{Node, NodeContext, NodeExecutionError, NodeRunResult};
use crate::segment::Segment;
use crate::types::{NodeId, NodeType};

/// A form presented to a human actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: String,
    pub node_id: NodeId,
    /// Actions the actor may choose from (e.g. `["continue", "reject"]`).
    pub actions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A completed submission for a form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormSubmission {
    pub form_id: String,
    /// The action the actor selected.
    pub action: String,
    #[serde(default)]
    pub inputs: FxHashMap<String, Value>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Storage collaborator for human-input forms.
#[async_trait]
pub trait FormRepository: Send + Sync {
    async fn get_form(&self, form_id: &str) -> Option<Form>;

    /// Persist a new form, returning the stored version.
    async fn create_form(&self, form: Form) -> Form;

    async fn get_form_submission(&self, form_id: &str) -> Option<FormSubmission>;
}

/// Process-local form store.
#[derive(Default)]
pub struct InMemoryFormRepository {
    forms: Mutex<FxHashMap<String, Form>>,
    submissions: Mutex<FxHashMap<String, FormSubmission>>,
}

impl InMemoryFormRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submission, as the external actor would through a transport
    /// layer.
    pub fn submit(&self, submission: FormSubmission) {
        self.submissions
            .lock()
            .insert(submission.form_id.clone(), submission);
    }
}

#[async_trait]
impl FormRepository for InMemoryFormRepository {
    async fn get_form(&self, form_id: &str) -> Option<Form> {
        self.forms.lock().get(form_id).cloned()
    }

    async fn create_form(&self, form: Form) -> Form {
        self.forms.lock().insert(form.id.clone(), form.clone());
        form
    }

    async fn get_form_submission(&self, form_id: &str) -> Option<FormSubmission> {
        self.submissions.lock().get(form_id).cloned()
    }
}

/// Node that gates the run on an external form submission.
///
/// On each dispatch the node ensures its form exists, then checks for a
/// submission: with one present it succeeds and exposes the selected
/// action (plus any submitted inputs) as outputs; without one it suspends,
/// which pauses the whole run. A resumed engine re-dispatches the node and
/// finds the submission.
pub struct HumanInputNode {
    form_id: String,
    actions: Vec<String>,
    repository: Arc<dyn FormRepository>,
}

impl HumanInputNode {
    /// Create a node using `form_id` as its form key.
    #[must_use]
    pub fn new(form_id: impl Into<String>, repository: Arc<dyn FormRepository>) -> Self {
        HumanInputNode {
            form_id: form_id.into(),
            actions: Vec::new(),
            repository,
        }
    }
}

#[async_trait]
impl Node for HumanInputNode {
    fn init_node_data(&mut self, config: &Value) -> Result<(), NodeExecutionError> {
        if let Some(actions) = config.get("actions") {
            let actions: Vec<String> = serde_json::from_value(actions.clone())?;
            if actions.is_empty() {
                return Err(NodeExecutionError::InvalidConfig(
                    "human input node requires at least one action".to_string(),
                ));
            }
            self.actions = actions;
        }
        Ok(())
    }

    async fn run(&self, ctx: NodeContext) -> Result<NodeRunResult, NodeExecutionError> {
        if self.repository.get_form(&self.form_id).await.is_none() {
            self.repository
                .create_form(Form {
                    id: self.form_id.clone(),
                    node_id: ctx.node_id.clone(),
                    actions: self.actions.clone(),
                    created_at: Utc::now(),
                })
                .await;
        }

        let Some(submission) = self.repository.get_form_submission(&self.form_id).await else {
            return Ok(NodeRunResult::suspended("awaiting form submission"));
        };

        let mut result =
            NodeRunResult::empty().with_output("action", Segment::from(submission.action.clone()));
        for (field, value) in &submission.inputs {
            result = result.with_output(field.clone(), Segment::from_value(value));
        }
        Ok(result)
    }

    fn node_type(&self) -> NodeType {
        NodeType::HumanInput
    }

    fn blocks_variable_output(&self) -> bool {
        // Nothing downstream may stream past an unanswered form.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GraphRuntimeState;

    fn ctx() -> NodeContext {
        let (tx, _rx) = flume::unbounded();
        NodeContext::new(
            "human".into(),
            "exec-1".into(),
            Arc::new(GraphRuntimeState::new()),
            tx,
        )
    }

    #[tokio::test]
    async fn suspends_without_submission_and_creates_form() {
        let repo = Arc::new(InMemoryFormRepository::new());
        let mut node = HumanInputNode::new("form-1", Arc::clone(&repo) as Arc<dyn FormRepository>);
        node.init_node_data(&serde_json::json!({"actions": ["continue"]}))
            .unwrap();

        let result = node.run(ctx()).await.unwrap();
        assert!(result.is_suspended());

        let form = repo.get_form("form-1").await.expect("form created");
        assert_eq!(form.actions, vec!["continue"]);
    }

    #[tokio::test]
    async fn succeeds_with_submission() {
        let repo = Arc::new(InMemoryFormRepository::new());
        repo.submit(FormSubmission {
            form_id: "form-1".into(),
            action: "continue".into(),
            inputs: FxHashMap::default(),
            user_id: Some("reviewer".into()),
            submitted_at: Utc::now(),
        });

        let node = HumanInputNode::new("form-1", Arc::clone(&repo) as Arc<dyn FormRepository>);
        let result = node.run(ctx()).await.unwrap();
        assert!(!result.is_suspended());
        assert_eq!(
            result.outputs.get("action"),
            Some(&Segment::from("continue"))
        );
    }

    #[tokio::test]
    async fn rejects_empty_action_list() {
        let repo = Arc::new(InMemoryFormRepository::new());
        let mut node = HumanInputNode::new("form-1", repo as Arc<dyn FormRepository>);
        let result = node.init_node_data(&serde_json::json!({"actions": []}));
        assert!(matches!(
            result,
            Err(NodeExecutionError::InvalidConfig(_))
        ));
    }
}
