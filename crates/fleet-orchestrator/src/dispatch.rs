use crate::types::WorkflowTask;
use async_trait::async_trait;
use fleet_a2a::{A2aClient, DelegationOptions};
use fleet_core::FleetResult;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Hands an assigned task to the agent that will run it.
///
/// Dispatch only has to get the task on its way; the outcome comes back later
/// through [`WorkflowEngine::complete_task`](crate::WorkflowEngine::complete_task)
/// or [`WorkflowEngine::fail_task`](crate::WorkflowEngine::fail_task) keyed by
/// `delegation_id`. An error here counts as a failed attempt.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Send `task` to `agent_id` under `delegation_id`.
    async fn dispatch(
        &self,
        agent_id: &str,
        workflow_id: &str,
        task: &WorkflowTask,
        delegation_id: &str,
    ) -> FleetResult<()>;
}

/// Dispatches tasks as A2A delegations.
pub struct A2aDispatcher {
    client: Arc<A2aClient>,
}

impl A2aDispatcher {
    /// Dispatcher that delegates through `client`.
    pub fn new(client: Arc<A2aClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskDispatcher for A2aDispatcher {
    async fn dispatch(
        &self,
        agent_id: &str,
        workflow_id: &str,
        task: &WorkflowTask,
        delegation_id: &str,
    ) -> FleetResult<()> {
        let mut context = Map::new();
        context.insert("workflowId".into(), Value::from(workflow_id));
        context.insert("taskId".into(), Value::from(task.id.as_str()));
        context.insert("description".into(), Value::from(task.description.as_str()));

        self.client
            .delegate_task(
                agent_id,
                &task.task_type,
                task.input.clone(),
                DelegationOptions {
                    id: Some(delegation_id.to_string()),
                    priority: task.priority.into(),
                    timeout_ms: Some(task.timeout_ms),
                    context,
                },
            )
            .await?;
        Ok(())
    }
}
