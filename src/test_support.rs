use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::VecDeque;

use crate::error::{ClientError, ClientResult};
use crate::transport::Transport;

/// In-memory [`Transport`] that replays a fixed script. The last scripted
/// status repeats once the queue drains.
#[derive(Default)]
pub struct ScriptedTransport {
    post_replies: RefCell<VecDeque<Value>>,
    statuses: RefCell<VecDeque<String>>,
    last_status: RefCell<Option<String>>,
    result: RefCell<Value>,
    posts: RefCell<Vec<(String, Value)>>,
    gets: RefCell<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(self, statuses: &[&str]) -> Self {
        self.statuses
            .borrow_mut()
            .extend(statuses.iter().map(|status| status.to_string()));
        self
    }

    pub fn with_result(self, result: Value) -> Self {
        *self.result.borrow_mut() = result;
        self
    }

    pub fn with_post_reply(self, reply: Value) -> Self {
        self.post_replies.borrow_mut().push_back(reply);
        self
    }

    pub fn posts(&self) -> Vec<(String, Value)> {
        self.posts.borrow().clone()
    }

    pub fn gets(&self) -> Vec<String> {
        self.gets.borrow().clone()
    }
}

impl Transport for ScriptedTransport {
    fn post_json(&self, path: &str, payload: &Value) -> ClientResult<Value> {
        self.posts
            .borrow_mut()
            .push((path.to_string(), payload.clone()));
        let reply = self.post_replies.borrow_mut().pop_front();
        let fallback = json!({"response": {"session_id": "scripted-session"}});
        Ok(reply.unwrap_or(fallback))
    }

    fn get_json(&self, path: &str) -> ClientResult<Value> {
        self.gets.borrow_mut().push(path.to_string());
        if path.starts_with("/status/") {
            let next = self.statuses.borrow_mut().pop_front();
            let status = match next {
                Some(status) => {
                    *self.last_status.borrow_mut() = Some(status.clone());
                    status
                }
                None => self
                    .last_status
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| "completed".to_string()),
            };
            return Ok(json!({ "status": status }));
        }
        if path.starts_with("/result/") {
            return Ok(self.result.borrow().clone());
        }
        Err(ClientError::malformed(format!("unscripted GET {path}")))
    }
}

/// Serves `router` on an ephemeral localhost port from a background thread
/// and returns its base URL.
pub fn serve(router: axum::Router) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .expect("bind mock service");
    listener
        .set_nonblocking(true)
        .expect("nonblocking listener");
    let addr = listener.local_addr().expect("mock service address");
    std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("mock service runtime");
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener)
                .expect("tokio listener");
            axum::serve(listener, router).await.expect("mock service");
        });
    });
    format!("http://{addr}")
}

/// Long-format forecast body with two targets over two timestamps.
pub fn long_prediction_response() -> Value {
    json!({
        "response": {
            "session_id": "sess-42",
            "data": {
                "index": [0, 1, 2, 3],
                "columns": ["ds", "unique_id", "cutoff", "Inait", "extra"],
                "data": [
                    ["2024-01-02", "B", "2024-01-01", 20.0, 0],
                    ["2024-01-02", "A", "2024-01-01", 10.0, 0],
                    ["2024-01-03", "A", "2024-01-01", 11.0, 0],
                    ["2024-01-03", "B", "2024-01-01", -21.0, 0],
                ],
            },
        },
    })
}
