//! Wire format for task-execution requests consumed from the shared queue.
//!
//! A request names the owning workbook, workflow execution and task, plus the
//! task's declared action and parameters. Requests are immutable once decoded;
//! a payload that fails to decode can never become processable and is dropped
//! by the intake loop.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while decoding queue payloads.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed task request: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The task's declared action and its parameters, as written in the
/// workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDsl {
    pub action: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// One task-execution request, scoped to a single queue delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub workbook_name: String,
    pub execution_id: String,
    pub id: String,
    pub task_dsl: TaskDsl,
    #[serde(default)]
    pub service_dsl: Value,
}

impl TaskRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serialization of an owned, derived struct cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn action_name(&self) -> &str {
        &self.task_dsl.action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_full_request() {
        let payload = json!({
            "workbook_name": "wb",
            "execution_id": "exec-1",
            "id": "task1",
            "task_dsl": {"action": "std.echo", "output": 1},
            "service_dsl": {"type": "direct"},
        });
        let request = TaskRequest::decode(payload.to_string().as_bytes()).unwrap();

        assert_eq!(request.workbook_name, "wb");
        assert_eq!(request.execution_id, "exec-1");
        assert_eq!(request.id, "task1");
        assert_eq!(request.action_name(), "std.echo");
        assert_eq!(request.task_dsl.params.get("output"), Some(&json!(1)));
    }

    #[test]
    fn decode_defaults_missing_service_dsl() {
        let payload = json!({
            "workbook_name": "wb",
            "execution_id": "exec-1",
            "id": "task1",
            "task_dsl": {"action": "std.echo"},
        });
        let request = TaskRequest::decode(payload.to_string().as_bytes()).unwrap();
        assert!(request.service_dsl.is_null());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            TaskRequest::decode(b"{not json"),
            Err(MessageError::Malformed(_))
        ));
        assert!(TaskRequest::decode(b"{\"id\": \"task1\"}").is_err());
    }

    #[test]
    fn encode_round_trips() {
        let payload = json!({
            "workbook_name": "wb",
            "execution_id": "exec-1",
            "id": "task1",
            "task_dsl": {"action": "std.http", "url": "http://example.com"},
            "service_dsl": {},
        });
        let request = TaskRequest::decode(payload.to_string().as_bytes()).unwrap();
        let decoded = TaskRequest::decode(&request.encode()).unwrap();
        assert_eq!(
            decoded.task_dsl.params.get("url"),
            Some(&json!("http://example.com"))
        );
    }
}
