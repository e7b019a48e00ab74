//! Single-slot notice that clears itself after a fixed display duration.
//!
//! Showing a notice replaces whatever is in the slot and restarts the expiry
//! timer. The slot is a `watch` channel so live views can follow it.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

pub struct DebouncedNotice {
    slot: Arc<watch::Sender<Option<Notice>>>,
    generation: Arc<AtomicU64>,
    expiry: Mutex<Option<JoinHandle<()>>>,
    duration: Duration,
}

impl DebouncedNotice {
    pub fn new(duration: Duration) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
            generation: Arc::new(AtomicU64::new(0)),
            expiry: Mutex::new(None),
            duration,
        }
    }

    pub fn success(&self, message: impl Into<String>) {
        self.show(NoticeKind::Success, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.show(NoticeKind::Error, message.into());
    }

    pub fn show(&self, kind: NoticeKind, message: String) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.slot.send_replace(Some(Notice { kind, message }));

        let slot = Arc::clone(&self.slot);
        let latest = Arc::clone(&self.generation);
        let duration = self.duration;
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            // A newer notice owns the slot once the generation moved on.
            slot.send_if_modified(|notice| {
                if latest.load(Ordering::SeqCst) != generation || notice.is_none() {
                    return false;
                }
                *notice = None;
                true
            });
        });

        if let Some(previous) = self.replace_expiry(Some(expiry)) {
            previous.abort();
        }
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(pending) = self.replace_expiry(None) {
            pending.abort();
        }
        self.slot.send_if_modified(|notice| notice.take().is_some());
    }

    pub fn current(&self) -> Option<Notice> {
        self.slot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Notice>> {
        self.slot.subscribe()
    }

    fn replace_expiry(&self, next: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut expiry = self.expiry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *expiry, next)
    }
}

impl Drop for DebouncedNotice {
    fn drop(&mut self) {
        if let Some(pending) = self.replace_expiry(None) {
            pending.abort();
        }
    }
}
