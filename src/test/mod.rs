//! In-memory collaborators for unit tests, plus the Postgres store tests.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::error;
use crate::modules::friend::{
    repository::{FriendshipStore, Subscription},
    schema::{
        ChangeFilter, ChangeOp, EdgeChange, EdgeFilter, EdgeUpdate, FriendStatus, FriendshipEntity,
    },
};
use crate::modules::user::{
    repository::UserDirectory,
    schema::{UserEntity, UserStatus},
};

#[derive(Default)]
pub struct InMemoryDirectory {
    users: Mutex<HashMap<Uuid, UserEntity>>,
}

impl InMemoryDirectory {
    pub fn add(&self, username: &str, status: UserStatus) -> Uuid {
        let id = Uuid::now_v7();
        self.users
            .lock()
            .unwrap()
            .insert(id, UserEntity { id, username: username.into(), status });
        id
    }

    pub fn set_status(&self, id: Uuid, status: UserStatus) {
        if let Some(user) = self.users.lock().unwrap().get_mut(&id) {
            user.status = status;
        }
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<UserEntity>, error::SystemError> {
        Ok(self.users.lock().unwrap().get(id).cloned())
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserEntity>, error::SystemError> {
        Ok(self.users.lock().unwrap().values().find(|u| u.username == username).cloned())
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserEntity>, error::SystemError> {
        let users = self.users.lock().unwrap();
        let mut found: Vec<UserEntity> = ids.iter().filter_map(|id| users.get(id).cloned()).collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(found)
    }
}

/// Direction-free identity of a pair of users, like the `friendship_pair_key` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey(Uuid, Uuid);

impl PairKey {
    pub fn new(a: Uuid, b: Uuid) -> Self {
        if a <= b { PairKey(a, b) } else { PairKey(b, a) }
    }

    fn of(edge: &FriendshipEntity) -> Self {
        PairKey::new(edge.requester_id, edge.requestee_id)
    }
}

fn edge_matches(filter: &EdgeFilter, edge: &FriendshipEntity) -> bool {
    edge.status == filter.status
        && filter.role.user_on(&edge.requester_id, &edge.requestee_id) == filter.user_id
}

/// Friendship table keyed by unordered pair, with a change feed.
#[derive(Default)]
pub struct InMemoryFriendships {
    edges: Mutex<HashMap<PairKey, FriendshipEntity>>,
    listeners: Mutex<Vec<(ChangeFilter, mpsc::UnboundedSender<EdgeChange>)>>,
    failure: Mutex<Option<Cow<'static, str>>>,
    writes: AtomicUsize,
}

impl InMemoryFriendships {
    /// Puts an edge in place without counting it as a write or notifying.
    pub fn seed(
        &self,
        requester_id: Uuid,
        requestee_id: Uuid,
        status: FriendStatus,
        last_modified: DateTime<Utc>,
    ) {
        let edge = FriendshipEntity { requester_id, requestee_id, status, last_modified };
        self.edges.lock().unwrap().insert(PairKey::of(&edge), edge);
    }

    pub fn edges(&self) -> Vec<FriendshipEntity> {
        let mut edges: Vec<_> = self.edges.lock().unwrap().values().cloned().collect();
        edges.sort_by_key(|edge| edge.last_modified);
        edges
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every following call fails with a store error.
    pub fn fail_with(&self, message: &'static str) {
        *self.failure.lock().unwrap() = Some(message.into());
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|(_, tx)| !tx.is_closed());
        listeners.len()
    }

    fn check(&self) -> Result<(), error::SystemError> {
        match self.failure.lock().unwrap().clone() {
            Some(message) => Err(error::SystemError::Store(message)),
            None => Ok(()),
        }
    }

    fn publish(&self, op: ChangeOp, edge: &FriendshipEntity) {
        let change = EdgeChange {
            op,
            requester_id: edge.requester_id,
            requestee_id: edge.requestee_id,
            status: edge.status,
        };
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|(filter, tx)| !filter.matches(&change) || tx.send(change.clone()).is_ok());
    }
}

#[async_trait::async_trait]
impl FriendshipStore for InMemoryFriendships {
    async fn query_edges(
        &self,
        filter: &EdgeFilter,
    ) -> Result<Vec<FriendshipEntity>, error::SystemError> {
        self.check()?;
        Ok(self.edges().into_iter().filter(|edge| edge_matches(filter, edge)).collect())
    }

    async fn insert_edge(
        &self,
        requester_id: &Uuid,
        requestee_id: &Uuid,
        status: FriendStatus,
    ) -> Result<(), error::SystemError> {
        self.check()?;
        let edge = FriendshipEntity {
            requester_id: *requester_id,
            requestee_id: *requestee_id,
            status,
            last_modified: Utc::now(),
        };

        {
            let mut edges = self.edges.lock().unwrap();
            if edges.contains_key(&PairKey::of(&edge)) {
                return Err(error::SystemError::Conflict(Some(error::DbErrorMeta {
                    constraint: Some("friendship_pair_key".into()),
                })));
            }
            edges.insert(PairKey::of(&edge), edge.clone());
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.publish(ChangeOp::Insert, &edge);
        Ok(())
    }

    async fn update_edge(
        &self,
        requester_id: &Uuid,
        requestee_id: &Uuid,
        expected: FriendStatus,
        update: &EdgeUpdate,
    ) -> Result<bool, error::SystemError> {
        self.check()?;
        let updated = {
            let mut edges = self.edges.lock().unwrap();
            match edges.get_mut(&PairKey::new(*requester_id, *requestee_id)) {
                Some(edge) if edge.is_from(requester_id, requestee_id) && edge.status == expected => {
                    edge.status = update.status;
                    edge.last_modified = update.last_modified;
                    Some(edge.clone())
                }
                _ => None,
            }
        };

        match updated {
            Some(edge) => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                self.publish(ChangeOp::Update, &edge);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription, error::SystemError> {
        self.check()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().unwrap().push((filter, tx));
        Ok(Subscription::new(filter, rx))
    }
}
