//! Per-session friends panel: derived lists, input buffer, busy flag and notice,
//! kept fresh by the friendship change feed.
//!
//! Operations never return errors. Failures are shown as an error notice and
//! the panel stays usable.
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};
use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle, time::Instant};
use uuid::Uuid;

use crate::{
    api::error,
    modules::{
        friend::{
            model::{FriendsView, PanelSnapshot},
            repository::{FriendshipStore, Subscription},
            schema::EdgeRole,
            service::FriendService,
        },
        user::repository::UserDirectory,
    },
    utils::notice::{DebouncedNotice, Notice},
};

#[derive(Debug, Clone, Default)]
struct PanelState {
    view: FriendsView,
    input: String,
    busy: bool,
    /// Ticket of the refresh whose result is currently shown.
    applied: u64,
}

fn snapshot_of(state: &PanelState, notice: Option<Notice>) -> PanelSnapshot {
    PanelSnapshot {
        online_friends: state.view.online_friends.clone(),
        offline_friends: state.view.offline_friends.clone(),
        requests: state.view.requests.clone(),
        input: state.input.clone(),
        busy: state.busy,
        notice,
    }
}

struct PanelInner<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    service: FriendService<R, U>,
    session: Option<Uuid>,
    state: watch::Sender<PanelState>,
    notice: DebouncedNotice,
    issued: AtomicU64,
    realtime: Mutex<Vec<JoinHandle<()>>>,
}

impl<R, U> PanelInner<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    fn stop_listening(&self) {
        let handles = {
            let mut realtime = self.realtime.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *realtime)
        };
        for handle in handles {
            handle.abort();
        }
    }
}

impl<R, U> Drop for PanelInner<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    fn drop(&mut self) {
        self.stop_listening();
    }
}

pub struct FriendsPanel<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    inner: Arc<PanelInner<R, U>>,
}

impl<R, U> Clone for FriendsPanel<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    fn clone(&self) -> Self {
        FriendsPanel { inner: Arc::clone(&self.inner) }
    }
}

impl<R, U> FriendsPanel<R, U>
where
    R: FriendshipStore + 'static,
    U: UserDirectory + 'static,
{
    pub fn new(service: FriendService<R, U>, session: Option<Uuid>) -> Self {
        let notice = DebouncedNotice::new(service.config().notice_duration);
        let (state, _) = watch::channel(PanelState::default());
        FriendsPanel {
            inner: Arc::new(PanelInner {
                service,
                session,
                state,
                notice,
                issued: AtomicU64::new(0),
                realtime: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn session_user(&self) -> Option<Uuid> {
        self.inner.session
    }

    fn require_session(&self) -> Result<Uuid, error::SystemError> {
        self.inner.session.ok_or_else(error::SystemError::no_session)
    }

    fn report(&self, err: &error::SystemError) {
        log::warn!("Friends panel for {:?}: {}", self.inner.session, err);
        self.inner.notice.error(err.to_string());
    }

    /// Initial load followed by the realtime subscriptions.
    pub async fn mount(&self) {
        self.set_busy(true);
        self.refresh().await;
        if let Err(e) = self.listen().await {
            self.report(&e);
        }
        self.set_busy(false);
    }

    /// Whether both change feeds are running.
    pub fn is_listening(&self) -> bool {
        let realtime = self.inner.realtime.lock().unwrap_or_else(|p| p.into_inner());
        !realtime.is_empty() && realtime.iter().all(|handle| !handle.is_finished())
    }

    /// Reopens the change feeds, then catches up on what they missed.
    pub async fn resume(&self) {
        if let Err(e) = self.listen().await {
            self.report(&e);
            return;
        }
        self.refresh().await;
    }

    /// Drops the change feeds. The panel still answers direct calls.
    pub fn unmount(&self) {
        self.inner.stop_listening();
        self.inner.notice.clear();
    }

    pub async fn refresh(&self) {
        let ticket = self.next_ticket();
        let loaded = match self.require_session() {
            Ok(user_id) => self.inner.service.load_friends(user_id).await,
            Err(e) => Err(e),
        };

        let view = match loaded {
            Ok(view) => view,
            Err(e) => {
                self.report(&e);
                FriendsView::default()
            }
        };

        self.apply(ticket, view);
    }

    pub async fn respond_to_request(&self, requester_id: Uuid, accept: bool) {
        let responded = match self.require_session() {
            Ok(user_id) => {
                self.inner.service.respond_to_request(user_id, requester_id, accept).await
            }
            Err(e) => Err(e),
        };

        match responded {
            Ok(true) => log::info!(
                "{:?} {} friend request from {}",
                self.inner.session,
                if accept { "accepted" } else { "declined" },
                requester_id
            ),
            Ok(false) => log::debug!("No pending friend request from {}", requester_id),
            Err(e) => self.report(&e),
        }
    }

    pub async fn submit_friend_request(&self, username_input: &str) {
        let username = username_input.trim();
        let sent = match self.require_session() {
            Ok(user_id) => self.inner.service.send_friend_request(user_id, username).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(outcome) => {
                self.set_input("");
                self.inner.notice.success(outcome.message());
            }
            Err(e) => self.report(&e),
        }
    }

    pub fn set_input(&self, value: &str) {
        let value = value.trim();
        self.inner.state.send_if_modified(|state| {
            if state.input == value {
                return false;
            }
            state.input = value.to_string();
            true
        });
    }

    pub fn input(&self) -> String {
        self.inner.state.borrow().input.clone()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.inner.notice.current()
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        snapshot_of(&self.inner.state.borrow(), self.inner.notice.current())
    }

    pub fn updates(&self) -> PanelUpdates {
        PanelUpdates { state: self.inner.state.subscribe(), notice: self.inner.notice.subscribe() }
    }

    fn set_busy(&self, busy: bool) {
        self.inner.state.send_if_modified(|state| std::mem::replace(&mut state.busy, busy) != busy);
    }

    fn next_ticket(&self) -> u64 {
        self.inner.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Shows `view` unless a newer refresh has already landed.
    fn apply(&self, ticket: u64, view: FriendsView) -> bool {
        let mut applied = false;
        self.inner.state.send_if_modified(|state| {
            if ticket <= state.applied {
                log::debug!("Dropping stale refresh {} (showing {})", ticket, state.applied);
                return false;
            }
            applied = true;
            state.applied = ticket;
            if state.view == view {
                return false;
            }
            state.view = view;
            true
        });
        applied
    }

    async fn listen(&self) -> Result<(), error::SystemError> {
        let user_id = self.require_session()?;
        let as_requester = self.inner.service.subscribe(EdgeRole::Requester, user_id).await?;
        let as_requestee = self.inner.service.subscribe(EdgeRole::Requestee, user_id).await?;

        let panel = Arc::downgrade(&self.inner);
        let handles = vec![
            spawn_refresher(panel.clone(), as_requester),
            spawn_refresher(panel, as_requestee),
        ];

        let previous = {
            let mut realtime = self.inner.realtime.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *realtime, handles)
        };
        for handle in previous {
            handle.abort();
        }

        tracing::debug!("Friends panel for {} listening for changes", user_id);
        Ok(())
    }
}

/// Runs one refresh per change event; events are neither merged nor cancelled.
fn spawn_refresher<R, U>(
    panel: Weak<PanelInner<R, U>>,
    mut subscription: Subscription,
) -> JoinHandle<()>
where
    R: FriendshipStore + 'static,
    U: UserDirectory + 'static,
{
    tokio::spawn(async move {
        while let Some(change) = subscription.next().await {
            let Some(inner) = panel.upgrade() else {
                break;
            };
            tracing::debug!("Change on {:?}: {:?}", subscription.filter(), change);
            let panel = FriendsPanel { inner };
            tokio::spawn(async move { panel.refresh().await });
        }
        tracing::debug!("Change feed {:?} closed", subscription.filter());
    })
}

/// Follows a panel; yields whenever its lists, input, busy flag or notice change.
pub struct PanelUpdates {
    state: watch::Receiver<PanelState>,
    notice: watch::Receiver<Option<Notice>>,
}

impl PanelUpdates {
    /// Waits for the next change. `false` once the panel is gone.
    pub async fn changed(&mut self) -> bool {
        tokio::select! {
            res = self.state.changed() => res.is_ok(),
            res = self.notice.changed() => res.is_ok(),
        }
    }

    pub fn snapshot(&mut self) -> PanelSnapshot {
        let notice = self.notice.borrow_and_update().clone();
        snapshot_of(&self.state.borrow_and_update(), notice)
    }
}

struct MountedPanel<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    panel: FriendsPanel<R, U>,
    /// Open live views (websockets) on this panel.
    viewers: usize,
    last_used: Instant,
}

/// One mounted panel per signed-in user.
///
/// A panel goes away when its last live view closes, when the session is
/// ended, or after sitting unused with no live view for the idle timeout.
pub struct PanelRegistry<R, U>
where
    R: FriendshipStore,
    U: UserDirectory,
{
    service: FriendService<R, U>,
    panels: Mutex<HashMap<Uuid, MountedPanel<R, U>>>,
}

impl<R, U> PanelRegistry<R, U>
where
    R: FriendshipStore + 'static,
    U: UserDirectory + 'static,
{
    pub fn new(service: FriendService<R, U>) -> Self {
        PanelRegistry { service, panels: Mutex::new(HashMap::new()) }
    }

    /// The user's panel, mounting it on first use.
    pub async fn panel_for(&self, user_id: Uuid) -> FriendsPanel<R, U> {
        self.checkout(user_id, false).await
    }

    /// Like `panel_for`, and keeps the panel mounted until `close_view`.
    pub async fn open_view(&self, user_id: Uuid) -> FriendsPanel<R, U> {
        self.checkout(user_id, true).await
    }

    /// Releases a view from `open_view`. Returns whether the panel was unmounted.
    pub fn close_view(&self, panel: &FriendsPanel<R, U>) -> bool {
        let Some(user_id) = panel.session_user() else {
            return false;
        };

        let removed = {
            let mut panels = self.panels.lock().unwrap_or_else(|p| p.into_inner());
            let last_view = match panels.get_mut(&user_id) {
                // The session may have been ended and remounted meanwhile.
                Some(mounted) if Arc::ptr_eq(&mounted.panel.inner, &panel.inner) => {
                    mounted.viewers = mounted.viewers.saturating_sub(1);
                    mounted.last_used = Instant::now();
                    mounted.viewers == 0
                }
                _ => return false,
            };
            if !last_view {
                return false;
            }
            panels.remove(&user_id)
        };

        match removed {
            Some(mounted) => {
                mounted.panel.unmount();
                log::info!("Last live view closed, unmounted friends panel for {}", user_id);
                true
            }
            None => false,
        }
    }

    async fn checkout(&self, user_id: Uuid, viewer: bool) -> FriendsPanel<R, U> {
        let (panel, fresh) = {
            let mut panels = self.panels.lock().unwrap_or_else(|p| p.into_inner());
            let mut fresh = false;
            let mounted = panels.entry(user_id).or_insert_with(|| {
                fresh = true;
                MountedPanel {
                    panel: FriendsPanel::new(self.service.clone(), Some(user_id)),
                    viewers: 0,
                    last_used: Instant::now(),
                }
            });
            mounted.last_used = Instant::now();
            if viewer {
                mounted.viewers += 1;
            }
            (mounted.panel.clone(), fresh)
        };

        if fresh {
            log::info!("Mounting friends panel for {}", user_id);
            panel.mount().await;
        } else if !panel.is_listening() {
            // An earlier mount was cancelled or could not subscribe.
            log::warn!("Friends panel for {} lost its change feeds, resubscribing", user_id);
            panel.resume().await;
        }
        panel
    }

    /// Ends the user's session: subscriptions are released.
    pub fn unmount(&self, user_id: &Uuid) -> bool {
        let removed = self.panels.lock().unwrap_or_else(|p| p.into_inner()).remove(user_id);
        match removed {
            Some(mounted) => {
                mounted.panel.unmount();
                log::info!("Unmounted friends panel for {}", user_id);
                true
            }
            None => false,
        }
    }

    /// Unmounts panels without live views that went unused for `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted: Vec<(Uuid, FriendsPanel<R, U>)> = {
            let mut panels = self.panels.lock().unwrap_or_else(|p| p.into_inner());
            let idle: Vec<Uuid> = panels
                .iter()
                .filter(|(_, mounted)| {
                    mounted.viewers == 0 && mounted.last_used.elapsed() >= max_idle
                })
                .map(|(user_id, _)| *user_id)
                .collect();
            idle.into_iter()
                .filter_map(|user_id| panels.remove(&user_id).map(|m| (user_id, m.panel)))
                .collect()
        };

        for (user_id, panel) in &evicted {
            panel.unmount();
            log::info!("Evicted idle friends panel for {}", user_id);
        }
        evicted.len()
    }

    pub fn mounted(&self) -> usize {
        self.panels.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}
