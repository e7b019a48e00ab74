use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use tokio::{
    sync::{broadcast, mpsc, OnceCell},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    api::error,
    constants::FRIENDSHIP_CHANNEL,
    modules::friend::{
        repository::{FriendshipStore, Subscription},
        schema::{ChangeFilter, EdgeChange, EdgeFilter, EdgeUpdate, FriendStatus, FriendshipEntity},
    },
};

const CHANGE_FEED_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct FriendshipStorePg {
    pool: sqlx::PgPool,
    changes: Arc<OnceCell<ChangeFeed>>,
}

/// The single `LISTEN` connection shared by every subscription of a store.
struct ChangeFeed {
    tx: broadcast::Sender<EdgeChange>,
    listener: JoinHandle<()>,
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl FriendshipStorePg {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool, changes: Arc::new(OnceCell::new()) }
    }

    /// Opens the shared listener on first use. A failed attempt is retried on the next call.
    async fn change_feed(&self) -> Result<&ChangeFeed, error::SystemError> {
        self.changes
            .get_or_try_init(|| async move {
                let mut listener = PgListener::connect_with(&self.pool).await?;
                listener.listen(FRIENDSHIP_CHANNEL).await?;

                let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
                let listener = tokio::spawn(broadcast_changes(listener, tx.clone()));
                tracing::info!("Listening for friendship changes on {}", FRIENDSHIP_CHANNEL);

                Ok::<_, error::SystemError>(ChangeFeed { tx, listener })
            })
            .await
    }
}

async fn broadcast_changes(mut listener: PgListener, tx: broadcast::Sender<EdgeChange>) {
    loop {
        // `recv` reconnects by itself after a dropped connection.
        let notification = match listener.recv().await {
            Ok(notification) => notification,
            Err(e) => {
                tracing::warn!("Friendship change feed error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        match serde_json::from_str::<EdgeChange>(notification.payload()) {
            Ok(change) => {
                // No receivers just means no panel is mounted.
                let _ = tx.send(change);
            }
            Err(e) => tracing::warn!(
                "Unparseable friendship change: {} - raw: {}",
                e,
                notification.payload()
            ),
        }
    }
}

/// Narrows the shared change stream down to one user's role.
fn fan_out(mut changes: broadcast::Receiver<EdgeChange>, filter: ChangeFilter) -> Subscription {
    let (tx, rx) = mpsc::unbounded_channel();
    let feed = tokio::spawn(async move {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Change feed for {:?} skipped {} events", filter, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if !filter.matches(&change) {
                continue;
            }

            tracing::debug!("Friendship change for {}: {:?}", filter.user_id, change);
            if tx.send(change).is_err() {
                break;
            }
        }
    });

    Subscription::new(filter, rx).with_feed(feed)
}

#[async_trait::async_trait]
impl FriendshipStore for FriendshipStorePg {
    async fn query_edges(
        &self,
        filter: &EdgeFilter,
    ) -> Result<Vec<FriendshipEntity>, error::SystemError> {
        let sql = format!(
            r#"
            SELECT requester_id, requestee_id, status, last_modified
            FROM friendship
            WHERE {} = $1
              AND status = $2
            ORDER BY last_modified
            "#,
            filter.role.column()
        );

        let edges = sqlx::query_as::<_, FriendshipEntity>(&sql)
            .bind(filter.user_id)
            .bind(filter.status)
            .fetch_all(&self.pool)
            .await?;

        Ok(edges)
    }

    async fn insert_edge(
        &self,
        requester_id: &Uuid,
        requestee_id: &Uuid,
        status: FriendStatus,
    ) -> Result<(), error::SystemError> {
        sqlx::query(
            r#"
            INSERT INTO friendship (requester_id, requestee_id, status, last_modified)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(requester_id)
        .bind(requestee_id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_edge(
        &self,
        requester_id: &Uuid,
        requestee_id: &Uuid,
        expected: FriendStatus,
        update: &EdgeUpdate,
    ) -> Result<bool, error::SystemError> {
        let rows = sqlx::query(
            r#"
            UPDATE friendship
            SET status = $4,
                last_modified = $5
            WHERE requester_id = $1
              AND requestee_id = $2
              AND status = $3
            "#,
        )
        .bind(requester_id)
        .bind(requestee_id)
        .bind(expected)
        .bind(update.status)
        .bind(update.last_modified)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, error::SystemError> {
        let changes = self.change_feed().await?.tx.subscribe();
        Ok(fan_out(changes, filter))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::modules::friend::schema::{ChangeOp, EdgeRole};

    fn change(requester_id: Uuid, requestee_id: Uuid) -> EdgeChange {
        EdgeChange { op: ChangeOp::Insert, requester_id, requestee_id, status: FriendStatus::Requested }
    }

    async fn next(subscription: &mut Subscription) -> Option<EdgeChange> {
        tokio::time::timeout(Duration::from_secs(1), subscription.next()).await.ok().flatten()
    }

    #[tokio::test]
    async fn one_stream_serves_many_subscribers() {
        let (tx, _) = broadcast::channel(16);
        let users: Vec<Uuid> = (0..8).map(|_| Uuid::now_v7()).collect();
        let mut subscriptions: Vec<Subscription> = users
            .iter()
            .map(|&user_id| fan_out(tx.subscribe(), ChangeFilter { role: EdgeRole::Requestee, user_id }))
            .collect();
        assert_eq!(tx.receiver_count(), users.len());

        let sender = Uuid::now_v7();
        for &user_id in &users {
            tx.send(change(sender, user_id)).unwrap();
        }

        for (subscription, user_id) in subscriptions.iter_mut().zip(&users) {
            let received = next(subscription).await.expect("change delivered");
            assert_eq!(received.requestee_id, *user_id);
        }
    }

    #[tokio::test]
    async fn subscriber_only_sees_its_role() {
        let (tx, _) = broadcast::channel(16);
        let (alice, bob) = (Uuid::now_v7(), Uuid::now_v7());
        let mut as_requester = fan_out(tx.subscribe(), ChangeFilter { role: EdgeRole::Requester, user_id: alice });

        tx.send(change(bob, alice)).unwrap();
        tx.send(change(alice, bob)).unwrap();

        let received = next(&mut as_requester).await.expect("change delivered");
        assert_eq!((received.requester_id, received.requestee_id), (alice, bob));
    }

    #[tokio::test]
    async fn dropping_subscription_releases_receiver() {
        let (tx, _) = broadcast::channel::<EdgeChange>(16);
        let subscription =
            fan_out(tx.subscribe(), ChangeFilter { role: EdgeRole::Requester, user_id: Uuid::now_v7() });
        assert_eq!(tx.receiver_count(), 1);

        drop(subscription);
        tokio::time::timeout(Duration::from_secs(1), async {
            while tx.receiver_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("receiver still registered");
    }
}
