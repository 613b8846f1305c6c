use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::message::Message;

/// The wire-level contract a worker uses to exchange [`Message`]s with
/// other ranks. Real cluster transport (MPI, a custom TCP mesh, …) is an
/// out-of-scope collaborator; this crate only depends on the trait, so its
/// scheduling and sharing logic can be exercised against an in-process
/// implementation without any real networking.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// This transport's own rank in the cluster.
    fn rank(&self) -> u32;

    /// Send `message` to `destination`. Errors are represented as a boxed
    /// `std::error::Error` rather than a fixed type so concrete transports
    /// can surface their own (connection reset, serialization, …) without
    /// this trait depending on their error types.
    async fn send(
        &self,
        destination: u32,
        message: Message,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Receive the next message addressed to this rank, waiting if none has
    /// arrived yet. Returns `None` once the transport has been closed.
    async fn recv(&self) -> Option<Message>;
}

/// An in-process loopback transport connecting a fixed set of ranks via
/// `tokio::mpsc` channels, standing in for real cluster transport in tests
/// and local multi-rank scenarios (§1 external interfaces).
pub struct ChannelTransport {
    rank: u32,
    senders: HashMap<u32, mpsc::UnboundedSender<Message>>,
    inbox: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
}

impl ChannelTransport {
    /// Build one fully connected `ChannelTransport` per rank in
    /// `0..world_size`, each able to send to and receive from every other.
    pub fn build_cluster(world_size: u32) -> Vec<ChannelTransport> {
        let mut senders = Vec::with_capacity(world_size as usize);
        let mut receivers = Vec::with_capacity(world_size as usize);
        for _ in 0..world_size {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(rx);
        }

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, rx)| ChannelTransport {
                rank: rank as u32,
                senders: senders
                    .iter()
                    .enumerate()
                    .map(|(r, tx)| (r as u32, tx.clone()))
                    .collect(),
                inbox: Arc::new(Mutex::new(rx)),
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    fn rank(&self) -> u32 {
        self.rank
    }

    async fn send(
        &self,
        destination: u32,
        message: Message,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let sender = self
            .senders
            .get(&destination)
            .ok_or_else(|| format!("no such rank: {destination}"))?;
        sender
            .send(message)
            .map_err(|_| "destination rank's inbox is closed".into())
    }

    async fn recv(&self) -> Option<Message> {
        self.inbox.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{JobRequest, RequestKind};
    use distsat_common::Priority;

    #[tokio::test]
    async fn delivers_a_message_between_two_ranks() {
        let mut cluster = ChannelTransport::build_cluster(3);
        let receiver_rank = 2;
        let sender = cluster.remove(0);

        let request = JobRequest {
            job_id: 1,
            requester_rank: 0,
            root_rank: 0,
            tree_position: 0,
            priority: Priority::DEFAULT,
            balancing_epoch: 1,
            desired_revision: 0,
            kind: RequestKind::Directed,
        };
        sender
            .send(receiver_rank, Message::RequestNode(request.clone()))
            .await
            .unwrap();

        let receiver = cluster.into_iter().find(|t| t.rank() == receiver_rank).unwrap();
        let received = receiver.recv().await.unwrap();
        assert_eq!(received, Message::RequestNode(request));
    }
}
