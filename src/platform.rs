//! Client for the chat platform's conversation API.

use serde_json::{json, Value};

use crate::types::BridgeError;

pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PlatformClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    /// Delivers a bot message into a conversation. The two platform API
    /// revisions seen in production accept different envelopes: newer ones
    /// take the message object directly, older ones want it wrapped in a
    /// `messages` array. A client-error rejection of the primary shape gets
    /// exactly one retry with the wrapped shape before failing.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), BridgeError> {
        let primary = json!({
            "message_type": "normal",
            "message_parts": [ { "text": { "content": text } } ],
            "actor_type": "bot"
        });

        let response = self.post_message(conversation_id, &primary).await?;
        if response.status().is_success() {
            return Ok(());
        }
        let first_status = response.status();
        let first_body = response.text().await.unwrap_or_default();
        if !first_status.is_client_error() {
            return Err(BridgeError::Delivery(format!(
                "conversation {conversation_id} send returned {first_status}: {first_body}"
            )));
        }

        tracing::warn!(
            "[deliver] primary payload rejected with {first_status} for {conversation_id}, retrying with wrapped shape"
        );
        let fallback = json!({ "messages": [primary] });
        let retry = self.post_message(conversation_id, &fallback).await?;
        if retry.status().is_success() {
            return Ok(());
        }
        let retry_status = retry.status();
        let retry_body = retry.text().await.unwrap_or_default();
        Err(BridgeError::Delivery(format!(
            "conversation {conversation_id} rejected both payload shapes: \
             {first_status}: {first_body}, then {retry_status}: {retry_body}"
        )))
    }

    /// Hands the conversation to the human queue by flipping its status.
    pub async fn escalate(&self, conversation_id: &str) -> Result<(), BridgeError> {
        let response = self
            .http
            .put(format!("{}/conversations/{conversation_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "status": "assigned" }))
            .send()
            .await
            .map_err(|err| {
                BridgeError::Escalation(format!(
                    "conversation {conversation_id} assign request failed: {err}"
                ))
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Escalation(format!(
                "conversation {conversation_id} assign returned {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn post_message(
        &self,
        conversation_id: &str,
        payload: &Value,
    ) -> Result<reqwest::Response, BridgeError> {
        self.http
            .post(format!(
                "{}/conversations/{conversation_id}/messages",
                self.base_url
            ))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                BridgeError::Delivery(format!(
                    "conversation {conversation_id} send request failed: {err}"
                ))
            })
    }
}
