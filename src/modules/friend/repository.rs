use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::api::error;
use crate::modules::friend::schema::{
    ChangeFilter, EdgeChange, EdgeFilter, EdgeUpdate, FriendStatus, FriendshipEntity,
};

#[async_trait::async_trait]
pub trait FriendshipStore: Send + Sync {
    async fn query_edges(
        &self,
        filter: &EdgeFilter,
    ) -> Result<Vec<FriendshipEntity>, error::SystemError>;

    async fn insert_edge(
        &self,
        requester_id: &Uuid,
        requestee_id: &Uuid,
        status: FriendStatus,
    ) -> Result<(), error::SystemError>;

    /// Moves the edge to `update.status` only if it is currently `expected`.
    /// Returns whether a row changed.
    async fn update_edge(
        &self,
        requester_id: &Uuid,
        requestee_id: &Uuid,
        expected: FriendStatus,
        update: &EdgeUpdate,
    ) -> Result<bool, error::SystemError>;

    /// Inserts and updates on edges matching `filter`, until the subscription is dropped.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, error::SystemError>;
}

/// Receiving end of a change feed. Dropping it stops the feed task, if any.
pub struct Subscription {
    filter: ChangeFilter,
    events: mpsc::UnboundedReceiver<EdgeChange>,
    feed: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(filter: ChangeFilter, events: mpsc::UnboundedReceiver<EdgeChange>) -> Self {
        Self { filter, events, feed: None }
    }

    pub fn with_feed(mut self, feed: JoinHandle<()>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub async fn next(&mut self) -> Option<EdgeChange> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}
