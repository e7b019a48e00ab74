use std::sync::Arc;

use chrono::Utc;
use futures_util::future::try_join_all;
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        friend::{
            model::{FriendRequestOutcome, FriendsConfig, FriendsView},
            policy::{decide_friend_request, RequestDecision},
            repository::{FriendshipStore, Subscription},
            schema::{ChangeFilter, EdgeFilter, EdgeRole, EdgeUpdate, FriendStatus, FriendshipEntity},
        },
        user::{repository::UserDirectory, schema::UserEntity},
    },
};

/// Stateless friendship operations on behalf of a given user.
pub struct FriendService<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    friend_repo: Arc<R>,
    user_repo: Arc<U>,
    config: FriendsConfig,
}

impl<R, U> Clone for FriendService<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    fn clone(&self) -> Self {
        FriendService {
            friend_repo: Arc::clone(&self.friend_repo),
            user_repo: Arc::clone(&self.user_repo),
            config: self.config,
        }
    }
}

impl<R, U> FriendService<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    pub fn with_dependencies(friend_repo: Arc<R>, user_repo: Arc<U>, config: FriendsConfig) -> Self {
        log::info!("FriendService initialized with dependencies");
        FriendService { friend_repo, user_repo, config }
    }

    pub fn config(&self) -> &FriendsConfig {
        &self.config
    }

    /// Accepted friends split by presence, plus incoming requests.
    pub async fn load_friends(&self, user_id: Uuid) -> Result<FriendsView, error::SystemError> {
        let (friends, requesters) =
            tokio::try_join!(self.accepted_friends(user_id), self.pending_requesters(user_id))?;

        Ok(FriendsView::from_users(friends, requesters))
    }

    async fn accepted_friends(&self, user_id: Uuid) -> Result<Vec<UserEntity>, error::SystemError> {
        let requester_filter =
            EdgeFilter { role: EdgeRole::Requester, user_id, status: FriendStatus::Accepted };
        let requestee_filter =
            EdgeFilter { role: EdgeRole::Requestee, user_id, status: FriendStatus::Accepted };

        let (as_requester, as_requestee) = tokio::try_join!(
            self.friend_repo.query_edges(&requester_filter),
            self.friend_repo.query_edges(&requestee_filter),
        )?;

        let mut friend_ids = Vec::with_capacity(as_requester.len() + as_requestee.len());
        friend_ids.extend(as_requester.iter().map(|edge| edge.requestee_id));
        friend_ids.extend(as_requestee.iter().map(|edge| edge.requester_id));

        self.user_repo.find_by_ids(&friend_ids).await
    }

    async fn pending_requesters(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<UserEntity>, error::SystemError> {
        let requests = self
            .friend_repo
            .query_edges(&EdgeFilter {
                role: EdgeRole::Requestee,
                user_id,
                status: FriendStatus::Requested,
            })
            .await?;

        let requester_ids: Vec<Uuid> = requests.iter().map(|edge| edge.requester_id).collect();
        self.user_repo.find_by_ids(&requester_ids).await
    }

    /// Every edge touching both users, whatever its status or direction.
    async fn edges_between(
        &self,
        user_id: Uuid,
        other_id: Uuid,
    ) -> Result<Vec<FriendshipEntity>, error::SystemError> {
        let filters: Vec<EdgeFilter> = FriendStatus::ALL
            .into_iter()
            .flat_map(|status| {
                [EdgeRole::Requester, EdgeRole::Requestee]
                    .map(|role| EdgeFilter { role, user_id, status })
            })
            .collect();

        let edges = try_join_all(filters.iter().map(|filter| self.friend_repo.query_edges(filter)))
            .await?;

        Ok(edges.into_iter().flatten().filter(|edge| edge.involves(&other_id)).collect())
    }

    /// Answers a pending request sent by `requester_id`.
    ///
    /// Returns `false` without touching the store when there is no such
    /// pending request.
    pub async fn respond_to_request(
        &self,
        user_id: Uuid,
        requester_id: Uuid,
        accept: bool,
    ) -> Result<bool, error::SystemError> {
        let status = if accept { FriendStatus::Accepted } else { FriendStatus::Declined };
        let update = EdgeUpdate { status, last_modified: Utc::now() };

        self.friend_repo
            .update_edge(&requester_id, &user_id, FriendStatus::Requested, &update)
            .await
    }

    pub async fn send_friend_request(
        &self,
        user_id: Uuid,
        username: &str,
    ) -> Result<FriendRequestOutcome, error::SystemError> {
        let target = self
            .user_repo
            .find_by_username(username)
            .await?
            .ok_or_else(|| error::SystemError::not_found(format!("User {username} doesn't exist")))?;

        let me = self.user_repo.find_by_id(&user_id).await?.ok_or_else(error::SystemError::no_session)?;
        if me.username == target.username {
            return Err(error::SystemError::validation("You cannot add yourself as a friend"));
        }

        let edges = self.edges_between(user_id, target.id).await?;
        let now = Utc::now();

        match decide_friend_request(user_id, &target, &edges, now, self.config.request_cooldown)? {
            RequestDecision::AcceptCrossed { requester_id, requestee_id } => {
                let update = EdgeUpdate { status: FriendStatus::Accepted, last_modified: now };
                self.apply_update(&requester_id, &requestee_id, FriendStatus::Requested, &update)
                    .await?;
                Ok(FriendRequestOutcome::FriendAdded)
            }
            RequestDecision::Rerequest { requester_id, requestee_id } => {
                let update = EdgeUpdate { status: FriendStatus::Requested, last_modified: now };
                self.apply_update(&requester_id, &requestee_id, FriendStatus::Declined, &update)
                    .await?;
                Ok(FriendRequestOutcome::RequestSent)
            }
            RequestDecision::Create { requester_id, requestee_id } => {
                self.friend_repo
                    .insert_edge(&requester_id, &requestee_id, FriendStatus::Requested)
                    .await?;
                Ok(FriendRequestOutcome::RequestSent)
            }
        }
    }

    async fn apply_update(
        &self,
        requester_id: &Uuid,
        requestee_id: &Uuid,
        expected: FriendStatus,
        update: &EdgeUpdate,
    ) -> Result<(), error::SystemError> {
        let changed =
            self.friend_repo.update_edge(requester_id, requestee_id, expected, update).await?;
        if !changed {
            log::warn!(
                "Friendship {} -> {} left {:?} before it could move to {:?}",
                requester_id,
                requestee_id,
                expected,
                update.status
            );
            return Err(error::SystemError::validation(
                "This friendship just changed, please try again",
            ));
        }
        Ok(())
    }

    pub async fn subscribe(
        &self,
        role: EdgeRole,
        user_id: Uuid,
    ) -> Result<Subscription, error::SystemError> {
        self.friend_repo.subscribe(ChangeFilter { role, user_id }).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::modules::user::schema::UserStatus;
    use crate::test::{InMemoryDirectory, InMemoryFriendships};

    struct Fixture {
        service: FriendService<InMemoryFriendships, InMemoryDirectory>,
        store: Arc<InMemoryFriendships>,
        alice: Uuid,
        bob: Uuid,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(InMemoryDirectory::default());
        let alice = directory.add("alice", UserStatus::Online);
        let bob = directory.add("bob", UserStatus::Offline);
        let store = Arc::new(InMemoryFriendships::default());
        let service =
            FriendService::with_dependencies(store.clone(), directory, FriendsConfig::default());
        Fixture { service, store, alice, bob }
    }

    #[tokio::test]
    async fn first_request_inserts_edge() {
        let f = fixture();
        let outcome = f.service.send_friend_request(f.alice, "bob").await.unwrap();

        assert_eq!(outcome, FriendRequestOutcome::RequestSent);
        let edges = f.store.edges();
        assert_eq!(edges.len(), 1);
        assert!(edges[0].is_from(&f.alice, &f.bob));
        assert_eq!(edges[0].status, FriendStatus::Requested);
    }

    #[tokio::test]
    async fn repeat_request_fails_and_reverse_request_accepts() {
        let f = fixture();
        f.service.send_friend_request(f.alice, "bob").await.unwrap();

        let err = f.service.send_friend_request(f.alice, "bob").await.unwrap_err();
        assert!(err.to_string().contains("already sent a request"));

        let outcome = f.service.send_friend_request(f.bob, "alice").await.unwrap();
        assert_eq!(outcome, FriendRequestOutcome::FriendAdded);
        assert_eq!(f.store.edges()[0].status, FriendStatus::Accepted);
        assert_eq!(f.store.edges().len(), 1);
    }

    #[tokio::test]
    async fn declined_rerequest_keeps_direction() {
        let f = fixture();
        let ten_minutes_ago = Utc::now() - TimeDelta::minutes(10);
        f.store.seed(f.alice, f.bob, FriendStatus::Declined, ten_minutes_ago);

        // bob re-initiates; alice stays the requester of the revived edge
        let outcome = f.service.send_friend_request(f.bob, "alice").await.unwrap();
        assert_eq!(outcome, FriendRequestOutcome::RequestSent);

        let edge = &f.store.edges()[0];
        assert!(edge.is_from(&f.alice, &f.bob));
        assert_eq!(edge.status, FriendStatus::Requested);
        assert!(edge.last_modified > ten_minutes_ago);
    }

    #[tokio::test]
    async fn declined_within_cooldown_is_rejected() {
        let f = fixture();
        f.store.seed(f.alice, f.bob, FriendStatus::Declined, Utc::now() - TimeDelta::minutes(1));

        let err = f.service.send_friend_request(f.alice, "bob").await.unwrap_err();
        assert_eq!(err.to_string(), "You must wait 5 minutes before sending another request");
        assert_eq!(f.store.edges()[0].status, FriendStatus::Declined);
    }

    #[tokio::test]
    async fn unknown_user_and_self_are_rejected_without_writes() {
        let f = fixture();

        let err = f.service.send_friend_request(f.alice, "nobody").await.unwrap_err();
        assert!(matches!(err, error::SystemError::NotFound(_)));
        assert_eq!(err.to_string(), "User nobody doesn't exist");

        let err = f.service.send_friend_request(f.alice, "alice").await.unwrap_err();
        assert_eq!(err.to_string(), "You cannot add yourself as a friend");

        assert!(f.store.edges().is_empty());
        assert_eq!(f.store.writes(), 0);
    }

    #[tokio::test]
    async fn respond_without_pending_request_is_noop() {
        let f = fixture();
        assert!(!f.service.respond_to_request(f.bob, f.alice, true).await.unwrap());
        assert_eq!(f.store.writes(), 0);

        f.store.seed(f.alice, f.bob, FriendStatus::Accepted, Utc::now());
        assert!(!f.service.respond_to_request(f.bob, f.alice, false).await.unwrap());
        assert_eq!(f.store.edges()[0].status, FriendStatus::Accepted);
    }

    #[tokio::test]
    async fn respond_moves_pending_request() {
        let f = fixture();
        f.service.send_friend_request(f.alice, "bob").await.unwrap();

        assert!(f.service.respond_to_request(f.bob, f.alice, false).await.unwrap());
        assert_eq!(f.store.edges()[0].status, FriendStatus::Declined);
    }

    #[tokio::test]
    async fn load_friends_partitions_and_lists_requests() {
        let f = fixture();
        let carol = f.service.user_repo.add("carol", UserStatus::Working);
        f.store.seed(f.alice, f.bob, FriendStatus::Accepted, Utc::now());
        f.store.seed(carol, f.alice, FriendStatus::Accepted, Utc::now());

        let view = f.service.load_friends(f.alice).await.unwrap();
        assert_eq!(view.online_friends.iter().map(|u| u.id).collect::<Vec<_>>(), [carol]);
        assert_eq!(view.offline_friends.iter().map(|u| u.id).collect::<Vec<_>>(), [f.bob]);
        assert!(view.requests.is_empty());

        let view = f.service.load_friends(f.bob).await.unwrap();
        assert_eq!(view.online_friends.len(), 1);

        let dave = f.service.user_repo.add("dave", UserStatus::Online);
        f.store.seed(dave, f.bob, FriendStatus::Requested, Utc::now());
        let view = f.service.load_friends(f.bob).await.unwrap();
        assert_eq!(view.requests.iter().map(|u| u.id).collect::<Vec<_>>(), [dave]);
    }

    #[tokio::test]
    async fn load_friends_is_idempotent() {
        let f = fixture();
        f.store.seed(f.alice, f.bob, FriendStatus::Accepted, Utc::now());

        let first = f.service.load_friends(f.alice).await.unwrap();
        let second = f.service.load_friends(f.alice).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.store.writes(), 0);
    }

    #[tokio::test]
    async fn store_failures_surface_as_errors() {
        let f = fixture();
        f.store.fail_with("connection reset");

        let err = f.service.load_friends(f.alice).await.unwrap_err();
        assert!(matches!(err, error::SystemError::Store(_)));
        assert!(f.service.send_friend_request(f.alice, "bob").await.is_err());
    }
}
