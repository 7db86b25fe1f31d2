// Subscription handles owning one local view state

use crate::path::StorePath;
use crate::record::{Fields, Record, project_document, project_records};
use crate::store::{DocumentStore, ListenerId, SnapshotEvent, StoreError};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// When a local mutation becomes visible in the view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Only applied snapshots change the view
    #[default]
    WaitForSnapshot,
    /// Acknowledged writes show up at once; the next snapshot replaces them
    Optimistic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionState {
    /// Registered, no snapshot applied yet
    Loading,
    Live,
    /// Ended by the store; never resubscribed
    Terminated(StoreError),
    Cancelled,
}

/// How a snapshot value becomes view state
pub trait Projection {
    type View;

    fn empty() -> Self::View;
    fn project(path: &str, value: &Value) -> Self::View;
}

/// Keyed collection: a mapping of record id to fields
pub struct Keyed<F>(PhantomData<fn() -> F>);

/// Singleton path: one record overwritten wholesale
pub struct Singleton<F>(PhantomData<fn() -> F>);

impl<F: Fields> Projection for Keyed<F> {
    type View = Vec<Record<F>>;

    fn empty() -> Self::View {
        Vec::new()
    }

    fn project(path: &str, value: &Value) -> Self::View {
        project_records(path, value)
    }
}

impl<F: Fields> Projection for Singleton<F> {
    type View = Option<F>;

    fn empty() -> Self::View {
        None
    }

    fn project(path: &str, value: &Value) -> Self::View {
        project_document(path, value)
    }
}

pub type LiveCollection<F> = Live<Keyed<F>>;
pub type LiveDocument<F> = Live<Singleton<F>>;

type ChangeCallback<V> = Box<dyn FnMut(&V) + Send>;

/// A live subscription and the view state it owns
///
/// Snapshot events queue up on the handle and are applied, in order, when the
/// owner calls [`Live::poll`] or [`Live::wait`]. Each applied snapshot replaces
/// the view wholesale. Dropping the handle cancels it.
pub struct Live<P: Projection> {
    path: StorePath,
    store: Arc<dyn DocumentStore>,
    listener: Option<ListenerId>,
    events: Receiver<SnapshotEvent>,
    view: P::View,
    mode: SyncMode,
    state: SubscriptionState,
    version: Option<u64>,
    applied: u64,
    on_change: Option<ChangeCallback<P::View>>,
}

impl<P: Projection> Live<P> {
    pub(crate) fn open(store: Arc<dyn DocumentStore>, path: StorePath, mode: SyncMode) -> Result<Self, StoreError> {
        let (tx, events) = mpsc::channel();
        let listener = store.on_snapshot(
            &path,
            Box::new(move |event| {
                // The handle may already be gone
                let _ = tx.send(event);
            }),
        )?;

        info!(path = %path, listener = listener.0, ?mode, "Subscribed");
        Ok(Self {
            path,
            store,
            listener: Some(listener),
            events,
            view: P::empty(),
            mode,
            state: SubscriptionState::Loading,
            version: None,
            applied: 0,
            on_change: None,
        })
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn state(&self) -> &SubscriptionState {
        &self.state
    }

    /// Subscribed and not yet cancelled or terminated
    pub fn is_active(&self) -> bool {
        self.listener.is_some()
    }

    /// Number of snapshots applied so far
    pub fn snapshots_applied(&self) -> u64 {
        self.applied
    }

    pub fn view(&self) -> &P::View {
        &self.view
    }

    /// Called with the new view after each applied snapshot or optimistic change
    pub fn on_change(&mut self, callback: impl FnMut(&P::View) + Send + 'static) {
        self.on_change = Some(Box::new(callback));
    }

    /// Apply every queued snapshot; returns how many were applied
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        while self.is_active() {
            match self.events.try_recv() {
                Ok(event) => applied += self.handle(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.terminate(StoreError::Transport(
                    "subscription closed by store".to_string(),
                )),
            }
        }
        applied
    }

    /// Block up to `timeout` for the next event, then drain the queue
    pub fn wait(&mut self, timeout: Duration) -> usize {
        if !self.is_active() {
            return 0;
        }
        let first = match self.events.recv_timeout(timeout) {
            Ok(event) => self.handle(event),
            Err(RecvTimeoutError::Timeout) => return 0,
            Err(RecvTimeoutError::Disconnected) => {
                self.terminate(StoreError::Transport("subscription closed by store".to_string()));
                return 0;
            }
        };
        first + self.poll()
    }

    /// Detach from the store; the view keeps its last state and never changes again
    pub fn cancel(&mut self) {
        if let Some(id) = self.listener.take() {
            self.store.off(id);
            self.state = SubscriptionState::Cancelled;
            while self.events.try_recv().is_ok() {}
            info!(path = %self.path, listener = id.0, "Cancelled subscription");
        }
    }

    fn handle(&mut self, event: SnapshotEvent) -> usize {
        match event {
            SnapshotEvent::Value(snapshot) => {
                if let Some(current) = self.version {
                    if snapshot.version < current {
                        debug!(path = %self.path, version = snapshot.version, current, "Dropping stale snapshot");
                        return 0;
                    }
                }
                self.view = P::project(&self.path.as_string(), &snapshot.value);
                self.version = Some(snapshot.version);
                self.state = SubscriptionState::Live;
                self.applied += 1;
                self.notify();
                1
            }
            SnapshotEvent::Error(err) => {
                self.terminate(err);
                0
            }
        }
    }

    fn terminate(&mut self, err: StoreError) {
        warn!(path = %self.path, error = %err, "Subscription terminated");
        if let Some(id) = self.listener.take() {
            self.store.off(id);
        }
        self.state = SubscriptionState::Terminated(err);
    }

    fn notify(&mut self) {
        if let Some(callback) = self.on_change.as_mut() {
            callback(&self.view);
        }
    }
}

impl<P: Projection> Drop for Live<P> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<F: Fields> Live<Keyed<F>> {
    pub fn records(&self) -> &[Record<F>] {
        &self.view
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Record<F>> {
        self.view.iter().find(|r| r.id == id)
    }

    /// First record the caller's comparison accepts
    ///
    /// Use this for logical equality ("the same book") instead of ids.
    pub fn find_by(&self, mut matches: impl FnMut(&F) -> bool) -> Option<&Record<F>> {
        self.view.iter().find(|r| matches(&r.fields))
    }

    /// Write `fields` under a new key in this collection
    pub fn append(&mut self, fields: &F) -> Result<String, StoreError> {
        let value = crate::sync::encode(fields)?;
        let id = self.store.write_generated(&self.path, value)?;
        if self.mode == SyncMode::Optimistic && self.is_active() && self.get(&id).is_none() {
            self.view.push(Record::new(id.clone(), fields.clone()));
            self.notify();
        }
        Ok(id)
    }

    /// Overwrite one record's fields
    pub fn update(&mut self, id: &str, fields: &F) -> Result<(), StoreError> {
        let value = crate::sync::encode(fields)?;
        self.store.write_exact(&self.path.child(id)?, value)?;
        if self.mode == SyncMode::Optimistic && self.is_active() {
            if let Some(record) = self.view.iter_mut().find(|r| r.id == id) {
                record.fields = fields.clone();
                self.notify();
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<(), StoreError> {
        self.store.delete(&self.path.child(id)?)?;
        if self.mode == SyncMode::Optimistic && self.is_active() {
            let before = self.view.len();
            self.view.retain(|r| r.id != id);
            if self.view.len() != before {
                self.notify();
            }
        }
        Ok(())
    }
}

impl<F: Fields> Live<Singleton<F>> {
    pub fn value(&self) -> Option<&F> {
        self.view.as_ref()
    }

    pub fn put(&mut self, fields: &F) -> Result<(), StoreError> {
        let value = crate::sync::encode(fields)?;
        self.store.write_exact(&self.path, value)?;
        if self.mode == SyncMode::Optimistic && self.is_active() {
            self.view = Some(fields.clone());
            self.notify();
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.store.delete(&self.path)?;
        if self.mode == SyncMode::Optimistic && self.is_active() {
            self.view = None;
            self.notify();
        }
        Ok(())
    }
}
