//! Expiring callback tables for message components and modal submits.
//!
//! Component callbacks are keyed by message and `custom_id`, by `custom_id`
//! alone (global), or by message alone (wildcard). Modal callbacks are keyed
//! by the submitting user and `custom_id`, or by `custom_id` alone.
//!
//! Expired entries are swept at the start of every component or modal
//! dispatch. With per-entry timers enabled they also expire without any
//! traffic.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;

use crate::context::{ComponentContext, ModalInteractionContext, INTERACTION_LIFETIME};
use crate::types::Snowflake;

pub type ComponentCallback = Arc<dyn Fn(ComponentContext) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ModalCallback = Arc<dyn Fn(ModalInteractionContext) -> BoxFuture<'static, ()> + Send + Sync>;
/// Runs once when an entry expires (never when it is unregistered).
pub type OnExpired = Box<dyn FnOnce() + Send>;

pub fn component_callback<F, Fut>(f: F) -> ComponentCallback
where
    F: Fn(ComponentContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

pub fn modal_callback<F, Fut>(f: F) -> ModalCallback
where
    F: Fn(ModalInteractionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Lifetime of a registered callback.
pub struct CallbackOptions {
    /// Measured from the registering interaction's arrival (or from
    /// registration for global callbacks). `None` never expires.
    pub expiration: Option<Duration>,
    pub on_expired: Option<OnExpired>,
}

impl Default for CallbackOptions {
    fn default() -> Self {
        Self {
            expiration: Some(INTERACTION_LIFETIME),
            on_expired: None,
        }
    }
}

impl CallbackOptions {
    pub fn expire_after(expiration: Duration) -> Self {
        Self {
            expiration: Some(expiration),
            on_expired: None,
        }
    }

    pub fn never_expire() -> Self {
        Self {
            expiration: None,
            on_expired: None,
        }
    }

    pub fn on_expired(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_expired = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for CallbackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackOptions")
            .field("expiration", &self.expiration)
            .field("on_expired", &self.on_expired.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentKey {
    Message { message_id: Snowflake, custom_id: String },
    Global(String),
    Wildcard(Snowflake),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModalKey {
    User { user_id: Snowflake, custom_id: String },
    Global(String),
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

struct Entry<C> {
    callback: C,
    expires: Option<Instant>,
    on_expired: Option<OnExpired>,
    /// Registration order; also tells a stale timer its entry was replaced.
    seq: u64,
}

struct Table<K, C> {
    entries: Mutex<HashMap<K, Entry<C>>>,
}

impl<K, C> Table<K, C>
where
    K: Eq + Hash + Clone,
    C: Clone,
{
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<C>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, key: &K, now: Instant) -> Option<C> {
        self.lock()
            .get(key)
            .filter(|entry| entry.expires.map_or(true, |at| at > now))
            .map(|entry| entry.callback.clone())
    }

    fn take(&self, key: &K, now: Instant) -> Option<C> {
        let mut entries = self.lock();
        let live = entries
            .get(key)
            .is_some_and(|entry| entry.expires.map_or(true, |at| at > now));
        if live {
            entries.remove(key).map(|entry| entry.callback)
        } else {
            None
        }
    }

    /// Remove every entry expired at `now`, then run their `on_expired`
    /// hooks in registration order outside the lock.
    fn sweep(&self, now: Instant) -> usize {
        let mut expired: Vec<Entry<C>> = {
            let mut entries = self.lock();
            let keys: Vec<K> = entries
                .iter()
                .filter(|(_, entry)| entry.expires.is_some_and(|at| at <= now))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| entries.remove(key)).collect()
        };
        expired.sort_by_key(|entry| entry.seq);
        let count = expired.len();
        for entry in expired {
            if let Some(hook) = entry.on_expired {
                hook();
            }
        }
        count
    }

    /// Expire `key` if it still holds the entry registered as `seq`.
    fn expire(&self, key: &K, seq: u64) {
        let entry = {
            let mut entries = self.lock();
            match entries.get(key) {
                Some(entry) if entry.seq == seq => entries.remove(key),
                _ => None,
            }
        };
        if let Some(hook) = entry.and_then(|entry| entry.on_expired) {
            hook();
        }
    }
}

fn arm_timer<K, C>(table: &Arc<Table<K, C>>, key: K, seq: u64, at: Instant)
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    let table = Arc::downgrade(table);
    tokio::spawn(async move {
        tokio::time::sleep_until(at).await;
        if let Some(table) = table.upgrade() {
            table.expire(&key, seq);
        }
    });
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct CallbackRegistry {
    components: Arc<Table<ComponentKey, ComponentCallback>>,
    modals: Arc<Table<ModalKey, ModalCallback>>,
    seq: AtomicU64,
    timers: bool,
}

impl CallbackRegistry {
    /// `timers` arms a task per expiring entry in addition to the sweep.
    pub fn new(timers: bool) -> Self {
        Self {
            components: Arc::new(Table::new()),
            modals: Arc::new(Table::new()),
            seq: AtomicU64::new(0),
            timers,
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Insert or replace the callback for `key`.
    pub fn register_component(
        &self,
        key: ComponentKey,
        callback: ComponentCallback,
        expires: Option<Instant>,
        on_expired: Option<OnExpired>,
    ) {
        let seq = self.next_seq();
        self.components.lock().insert(
            key.clone(),
            Entry {
                callback,
                expires,
                on_expired,
                seq,
            },
        );
        // Armed after the insert so an already-due timer finds the entry.
        if self.timers {
            if let Some(at) = expires {
                arm_timer(&self.components, key, seq, at);
            }
        }
    }

    /// Returns whether an entry was removed.
    pub fn unregister_component(&self, key: &ComponentKey) -> bool {
        self.components.lock().remove(key).is_some()
    }

    pub fn contains_component(&self, key: &ComponentKey) -> bool {
        self.components.lock().contains_key(key)
    }

    /// Resolve a component press: the message-specific entry, then the
    /// global one, then the message's wildcard.
    pub fn component(&self, message_id: &str, custom_id: &str) -> Option<ComponentCallback> {
        let now = Instant::now();
        let keys = [
            ComponentKey::Message {
                message_id: message_id.to_string(),
                custom_id: custom_id.to_string(),
            },
            ComponentKey::Global(custom_id.to_string()),
            ComponentKey::Wildcard(message_id.to_string()),
        ];
        keys.iter().find_map(|key| self.components.get(key, now))
    }

    pub fn register_modal(
        &self,
        key: ModalKey,
        callback: ModalCallback,
        expires: Option<Instant>,
        on_expired: Option<OnExpired>,
    ) {
        let seq = self.next_seq();
        self.modals.lock().insert(
            key.clone(),
            Entry {
                callback,
                expires,
                on_expired,
                seq,
            },
        );
        // Armed after the insert so an already-due timer finds the entry.
        if self.timers {
            if let Some(at) = expires {
                arm_timer(&self.modals, key, seq, at);
            }
        }
    }

    pub fn unregister_modal(&self, key: &ModalKey) -> bool {
        self.modals.lock().remove(key).is_some()
    }

    pub fn contains_modal(&self, key: &ModalKey) -> bool {
        self.modals.lock().contains_key(key)
    }

    /// Resolve a modal submit. A user's own entry is consumed by the
    /// submit; global entries stay registered.
    pub fn take_modal(&self, user_id: Option<&str>, custom_id: &str) -> Option<ModalCallback> {
        let now = Instant::now();
        let own = user_id.and_then(|user_id| {
            self.modals.take(
                &ModalKey::User {
                    user_id: user_id.to_string(),
                    custom_id: custom_id.to_string(),
                },
                now,
            )
        });
        own.or_else(|| self.modals.get(&ModalKey::Global(custom_id.to_string()), now))
    }

    /// Drop every expired entry, running their `on_expired` hooks.
    pub fn clean(&self) -> usize {
        let now = Instant::now();
        self.components.sweep(now) + self.modals.sweep(now)
    }

    pub fn component_count(&self) -> usize {
        self.components.lock().len()
    }

    pub fn modal_count(&self) -> usize {
        self.modals.lock().len()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("components", &self.component_count())
            .field("modals", &self.modal_count())
            .field("timers", &self.timers)
            .finish()
    }
}
