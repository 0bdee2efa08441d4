//! The messaging layer: named-process registry + typed inboxes.
//!
//! Grounded on the teacher's `nats.rs` subject-naming conventions
//! (`workflow.<id>` topic, `reply_to` topics) but backed by
//! `tokio::sync::mpsc` rather than NATS JetStream — the durable `Store`
//! already gives the orchestrator its restart-safety, so the transport
//! only needs best-effort in-process delivery for the lifetime of one
//! orchestrator run.

use crate::command::CommitResult;
use crate::error::TransportError;
use crate::worker_contract::{YieldReplyMessage, YieldRequestMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One message deliverable to a named inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportMessage {
    /// A worker-submitted commit, already applied to the store, that the
    /// orchestrator must absorb into its in-memory view.
    Commit(CommitResult),
    /// `worker -> orchestrator`, topic `"yield_request"`.
    YieldRequest(YieldRequestMessage),
    /// `orchestrator -> worker`, topic `reply_to`.
    YieldReply(YieldReplyMessage),
}

/// Trait for the named-process registry and its typed inboxes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a message to the named topic. Delivery is best-effort: a
    /// topic with no registered inbox drops the message, matching the
    /// spec's "CANCEL races silently drop in-flight replies" semantics.
    async fn send(&self, topic: &str, message: TransportMessage) -> Result<(), TransportError>;
}

/// An in-process `Transport` backed by `tokio::sync::mpsc`.
#[derive(Default)]
pub struct InMemoryTransport {
    inboxes: Mutex<HashMap<String, mpsc::UnboundedSender<TransportMessage>>>,
}

impl InMemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named process and returns its inbox receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already registered.
    pub fn register(&self, name: &str) -> Result<mpsc::UnboundedReceiver<TransportMessage>, TransportError> {
        let mut inboxes = self.inboxes.lock().unwrap();
        if inboxes.contains_key(name) {
            return Err(TransportError::RegistrationFailed {
                name: name.to_string(),
                message: "name already registered".into(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inboxes.insert(name.to_string(), tx);
        Ok(rx)
    }

    /// Drops a named process's inbox, making its topic undeliverable.
    pub fn deregister(&self, name: &str) {
        self.inboxes.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, topic: &str, message: TransportMessage) -> Result<(), TransportError> {
        let inboxes = self.inboxes.lock().unwrap();
        if let Some(sender) = inboxes.get(topic) {
            // An unregistered-by-the-time-of-send receiver (process already
            // gone) is not an error: CANCEL races are meant to drop silently.
            let _ = sender.send(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::yield_state::YieldId;

    #[tokio::test]
    async fn registered_inbox_receives_sent_message() {
        let transport = InMemoryTransport::new();
        let mut rx = transport.register("workflow.wf1").expect("register");

        let msg = TransportMessage::YieldRequest(YieldRequestMessage {
            request_context: crate::worker_contract::YieldRequestContext {
                yield_id: YieldId::new(),
                node_id: NodeId::new(),
                reply_to: "worker.reply".into(),
            },
            yield_context: crate::worker_contract::YieldContext {
                run_nodes: vec![NodeId::new()],
            },
        });
        transport
            .send("workflow.wf1", msg.clone())
            .await
            .expect("send");

        let received = rx.recv().await.expect("recv");
        assert_eq!(received, msg);
    }

    #[tokio::test]
    async fn send_to_unregistered_topic_is_silently_dropped() {
        let transport = InMemoryTransport::new();
        let result = transport
            .send(
                "nobody.home",
                TransportMessage::Commit(CommitResult {
                    operation_id: crate::command::OperationId::new(),
                    outcomes: vec![],
                }),
            )
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn duplicate_registration_fails() {
        let transport = InMemoryTransport::new();
        let _rx = transport.register("workflow.wf1").expect("first register");
        let err = transport.register("workflow.wf1").unwrap_err();
        assert!(matches!(err, TransportError::RegistrationFailed { .. }));
    }
}
