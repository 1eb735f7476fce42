//! Client for the assistant provider's thread/run API.

use std::time::Duration;

use serde_json::{json, Value};

use crate::types::{AssistantTurn, BridgeError};

/// Fixed-interval run polling with an attempt cap. Injectable so tests can
/// run the loop in milliseconds instead of the production 30 seconds.
#[derive(Debug, Clone)]
pub struct RunPollPolicy {
    pub interval: Duration,
    pub max_attempts: usize,
}

impl Default for RunPollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 30,
        }
    }
}

pub struct AssistantClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    assistant_id: String,
    poll: RunPollPolicy,
}

impl AssistantClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        api_key: String,
        assistant_id: String,
        poll: RunPollPolicy,
    ) -> Self {
        Self {
            http,
            base_url,
            api_key,
            assistant_id,
            poll,
        }
    }

    /// Runs one user turn against the assistant and returns the raw reply
    /// plus the thread it ran on. A supplied thread id is reused verbatim; an
    /// invalid one surfaces as a downstream failure rather than being checked
    /// up front. Nothing here is retried.
    pub async fn get_reply(
        &self,
        user_message: &str,
        existing_thread_id: Option<String>,
    ) -> Result<AssistantTurn, BridgeError> {
        let thread_id = match existing_thread_id {
            Some(id) => id,
            None => self.create_thread().await?,
        };

        self.post_json(
            &format!("/threads/{thread_id}/messages"),
            &json!({ "role": "user", "content": user_message }),
        )
        .await?;

        let run = self
            .post_json(
                &format!("/threads/{thread_id}/runs"),
                &json!({ "assistant_id": self.assistant_id }),
            )
            .await?;
        let run_id = run
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Assistant("run create response had no id".to_string()))?;

        self.wait_for_run(&thread_id, &run_id).await?;
        let raw_reply = self.latest_message(&thread_id).await?;

        Ok(AssistantTurn {
            raw_reply,
            thread_id,
        })
    }

    async fn create_thread(&self) -> Result<String, BridgeError> {
        let thread = self.post_json("/threads", &json!({})).await?;
        thread
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Assistant("thread create response had no id".to_string()))
    }

    async fn wait_for_run(&self, thread_id: &str, run_id: &str) -> Result<(), BridgeError> {
        for attempt in 1..=self.poll.max_attempts {
            let run = self
                .get_json(&format!("/threads/{thread_id}/runs/{run_id}"))
                .await?;
            let status = run.get("status").and_then(Value::as_str).unwrap_or("");
            match status {
                "completed" => return Ok(()),
                "failed" | "expired" => {
                    return Err(BridgeError::Assistant(format!(
                        "run {run_id} ended as {status}"
                    )));
                }
                // No point sleeping once the attempt budget is spent.
                _ if attempt < self.poll.max_attempts => {
                    tokio::time::sleep(self.poll.interval).await;
                }
                _ => {}
            }
        }
        Err(BridgeError::Assistant(format!(
            "run {run_id} did not complete within {} poll attempts",
            self.poll.max_attempts
        )))
    }

    async fn latest_message(&self, thread_id: &str) -> Result<String, BridgeError> {
        let listing = self
            .get_json(&format!("/threads/{thread_id}/messages?limit=1"))
            .await?;
        listing
            .get("data")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("content"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|part| part.get("text"))
            .and_then(|text| text.get("value"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|reply| !reply.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BridgeError::Assistant("assistant reply had no text content".to_string()))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, BridgeError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .json(body)
            .send()
            .await
            .map_err(|err| BridgeError::Assistant(format!("request to {path} failed: {err}")))?;
        Self::json_body(path, response).await
    }

    async fn get_json(&self, path: &str) -> Result<Value, BridgeError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
            .send()
            .await
            .map_err(|err| BridgeError::Assistant(format!("request to {path} failed: {err}")))?;
        Self::json_body(path, response).await
    }

    async fn json_body(path: &str, response: reqwest::Response) -> Result<Value, BridgeError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Assistant(format!(
                "{path} returned {status}: {body}"
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| BridgeError::Assistant(format!("{path} parse failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn fast_poll() -> RunPollPolicy {
        RunPollPolicy {
            interval: Duration::from_millis(5),
            max_attempts: 5,
        }
    }

    fn client(base_url: String) -> AssistantClient {
        AssistantClient::new(
            reqwest::Client::new(),
            base_url,
            "sk-test".to_string(),
            "asst_test".to_string(),
            fast_poll(),
        )
    }

    fn message_listing(text: &str) -> serde_json::Value {
        json!({
            "data": [
                { "content": [ { "type": "text", "text": { "value": text } } ] }
            ]
        })
    }

    #[tokio::test]
    async fn first_turn_creates_a_thread_and_returns_the_reply() {
        let server = MockServer::start();
        let create_thread = server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({ "id": "thread_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({ "id": "msg_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "completed" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/messages");
            then.status(200).json_body(message_listing("We're open 9-5."));
        });

        let turn = client(server.base_url())
            .get_reply("What are your hours?", None)
            .await
            .expect("turn");

        assert_eq!(turn.raw_reply, "We're open 9-5.");
        assert_eq!(turn.thread_id, "thread_1");
        create_thread.assert();
    }

    #[tokio::test]
    async fn existing_thread_id_is_reused_without_creating_one() {
        let server = MockServer::start();
        let create_thread = server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({ "id": "thread_x" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_7/messages");
            then.status(200).json_body(json!({ "id": "msg_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_7/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/thread_7/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "completed" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/thread_7/messages");
            then.status(200).json_body(message_listing("Still here."));
        });

        let turn = client(server.base_url())
            .get_reply("Anything else?", Some("thread_7".to_string()))
            .await
            .expect("turn");

        assert_eq!(turn.thread_id, "thread_7");
        create_thread.assert_hits(0);
    }

    #[tokio::test]
    async fn run_completes_after_in_progress_polls() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({ "id": "thread_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({ "id": "msg_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        // First poll sees in_progress, later polls see completed.
        let mut in_progress = server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "in_progress" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/messages");
            then.status(200).json_body(message_listing("Done."));
        });

        let client = AssistantClient::new(
            reqwest::Client::new(),
            server.base_url(),
            "sk-test".to_string(),
            "asst_test".to_string(),
            RunPollPolicy {
                interval: Duration::from_millis(5),
                max_attempts: 50,
            },
        );
        // Swap the poll response to completed once the first poll has landed.
        let swap = async {
            loop {
                if in_progress.hits() >= 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            server.mock(|when, then| {
                when.method(GET).path("/threads/thread_1/runs/run_1");
                then.status(200)
                    .json_body(json!({ "id": "run_1", "status": "completed" }));
            });
            in_progress.delete();
        };
        let (turn, ()) = tokio::join!(client.get_reply("hello", None), swap);

        assert_eq!(turn.expect("turn").raw_reply, "Done.");
    }

    #[tokio::test]
    async fn failed_run_status_is_terminal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({ "id": "thread_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({ "id": "msg_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "failed" }));
        });

        let err = client(server.base_url())
            .get_reply("hello", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Assistant(_)));
        assert!(err.to_string().contains("failed"));
    }

    #[tokio::test]
    async fn exhausted_poll_budget_is_a_timeout_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({ "id": "thread_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({ "id": "msg_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        let polls = server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "in_progress" }));
        });

        let err = client(server.base_url())
            .get_reply("hello", None)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("did not complete"));
        polls.assert_hits(5);
    }

    #[tokio::test]
    async fn timeout_does_not_sleep_after_the_last_attempt() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(200).json_body(json!({ "id": "thread_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/messages");
            then.status(200).json_body(json!({ "id": "msg_1" }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/threads/thread_1/runs");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "queued" }));
        });
        let polls = server.mock(|when, then| {
            when.method(GET).path("/threads/thread_1/runs/run_1");
            then.status(200)
                .json_body(json!({ "id": "run_1", "status": "in_progress" }));
        });

        let client = AssistantClient::new(
            reqwest::Client::new(),
            server.base_url(),
            "sk-test".to_string(),
            "asst_test".to_string(),
            RunPollPolicy {
                interval: Duration::from_millis(100),
                max_attempts: 3,
            },
        );

        let started = std::time::Instant::now();
        let err = client.get_reply("hello", None).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.to_string().contains("did not complete"));
        polls.assert_hits(3);
        // Three polls separated by two sleeps; a third sleep would push this
        // past 300ms.
        assert!(
            elapsed < Duration::from_millis(290),
            "timeout took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn provider_error_status_maps_to_assistant_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/threads");
            then.status(500).body("upstream exploded");
        });

        let err = client(server.base_url())
            .get_reply("hello", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Assistant(_)));
        assert!(err.to_string().contains("500"));
    }
}
