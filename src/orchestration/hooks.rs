use crate::executor::NodeExecutor;
use crate::resolve::ExecutionContext;
use crate::shared::EventLog;
use crate::store::{ErrorLogEntry, FlowStore};
use crate::workflow::WorkflowNode;
use serde_json::{json, Map};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Handles of detached hook threads. Dropping it leaves the hooks running.
#[derive(Debug, Default)]
pub struct HookDispatch {
    pub node_ids: Vec<String>,
    handles: Vec<JoinHandle<()>>,
}

impl HookDispatch {
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    /// Blocks until every hook thread has finished.
    pub fn wait(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

/// Starts one thread per enabled hook node and returns without waiting.
/// Failures are logged and never reach the caller.
pub fn spawn_hooks(
    executor: Arc<NodeExecutor>,
    store: Arc<dyn FlowStore>,
    log: EventLog,
    flow_id: &str,
    hooks: Vec<WorkflowNode>,
    context: ExecutionContext,
) -> HookDispatch {
    let context = Arc::new(context);
    let mut dispatch = HookDispatch::default();
    for node in hooks.into_iter().filter(|node| !node.disabled) {
        let node_id = node.id.clone();
        let executor = Arc::clone(&executor);
        let store = Arc::clone(&store);
        let log_for_thread = log.clone();
        let context = Arc::clone(&context);
        let thread_flow_id = flow_id.to_string();

        let spawned = thread::Builder::new()
            .name(format!("hook-{node_id}"))
            .spawn(move || {
                run_hook(
                    &executor,
                    store.as_ref(),
                    &log_for_thread,
                    &thread_flow_id,
                    &node,
                    &context,
                )
            });
        match spawned {
            Ok(handle) => {
                dispatch.node_ids.push(node_id);
                dispatch.handles.push(handle);
            }
            Err(err) => log.error(
                "hook.spawn_failed",
                Some(flow_id),
                &format!("hook `{node_id}`: {err}"),
            ),
        }
    }
    dispatch
}

fn run_hook(
    executor: &NodeExecutor,
    store: &dyn FlowStore,
    log: &EventLog,
    flow_id: &str,
    node: &WorkflowNode,
    context: &ExecutionContext,
) {
    let result = executor.run_node(node, &Map::new(), context);
    if result.success {
        log.info("hook.completed", &format!("hook `{}` completed", node.id));
        return;
    }

    let message = result
        .error
        .unwrap_or_else(|| "hook failed without an error message".to_string());
    log.warn(
        "hook.failed",
        Some(flow_id),
        &format!("hook `{}`: {message}", node.id),
    );
    let entry = ErrorLogEntry::error(
        Some(flow_id),
        &format!("Post-response hook failed: {message}"),
        json!({"nodeType": node.node_type, "output": result.output}),
    )
    .with_node(&node.id);
    let _ = store.log_error(&entry);
}
