//! Observable conversation state container
//!
//! The store owns the transcript and the current phase. Every mutation goes
//! through [`ConversationStore::update`], which applies the change and then
//! publishes a snapshot to all observers. Publication is serialized by a
//! reentrant lock, so observers see changes one at a time and in order, and
//! may themselves read or mutate the store. The state lock is never held
//! while an observer runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};

use crate::conversation::{ConversationState, Message, MessageId, Phase, Sender};
use crate::transport::EventSource;

type Observer = Arc<dyn Fn(&ConversationState) + Send + Sync>;

/// Store behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Reject a send while another answer is still streaming
    pub exclusive_sends: bool,
}

#[derive(Default)]
struct Observers {
    list: Vec<(u64, Observer)>,
    next_id: u64,
}

pub(super) struct Shared {
    publish: ReentrantMutex<()>,
    state: Mutex<ConversationState>,
    /// Bumped on every applied mutation
    version: AtomicU64,
    observers: Mutex<Observers>,
    pub(super) source: Arc<dyn EventSource>,
    pub(super) options: StoreOptions,
}

/// Shared handle to one conversation; clones refer to the same state
#[derive(Clone)]
pub struct ConversationStore {
    pub(super) shared: Arc<Shared>,
}

impl ConversationStore {
    /// Create an empty, idle store that opens answer streams through `source`
    pub fn new(source: impl EventSource + 'static) -> Self {
        Self::with_options(source, StoreOptions::default())
    }

    pub fn with_options(source: impl EventSource + 'static, options: StoreOptions) -> Self {
        Self::from_source(Arc::new(source), options)
    }

    pub fn from_source(source: Arc<dyn EventSource>, options: StoreOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                publish: ReentrantMutex::new(()),
                state: Mutex::new(ConversationState::new()),
                version: AtomicU64::new(0),
                observers: Mutex::new(Observers::default()),
                source,
                options,
            }),
        }
    }

    pub fn options(&self) -> StoreOptions {
        self.shared.options
    }

    /// Register an observer. It is called right away with the current state
    /// and then after every mutation.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&ConversationState) + Send + Sync + 'static,
    {
        let _publish = self.shared.publish.lock();

        let observer: Observer = Arc::new(observer);
        let id = {
            let mut observers = self.shared.observers.lock();
            let id = observers.next_id;
            observers.next_id += 1;
            observers.list.push((id, observer.clone()));
            id
        };

        let snapshot = self.snapshot();
        observer(&snapshot);

        Subscription {
            shared: Arc::downgrade(&self.shared),
            id,
        }
    }

    /// Drop every registered observer
    pub fn dispose(&self) {
        let mut observers = self.shared.observers.lock();
        let count = observers.list.len();
        observers.list.clear();
        tracing::debug!(observers = count, "Conversation store disposed");
    }

    pub fn snapshot(&self) -> ConversationState {
        self.shared.state.lock().clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    /// Run `f` against the current state without publishing anything
    pub(super) fn read<R>(&self, f: impl FnOnce(&ConversationState) -> R) -> R {
        f(&*self.shared.state.lock())
    }

    /// Apply `f` and publish the result. Returning `None` from `f` means
    /// nothing changed and observers are not notified.
    pub(super) fn update<R>(&self, f: impl FnOnce(&mut ConversationState) -> Option<R>) -> Option<R> {
        let _publish = self.shared.publish.lock();

        let (result, snapshot, version) = {
            let mut state = self.shared.state.lock();
            let result = f(&mut *state)?;
            let version = self.shared.version.fetch_add(1, Ordering::SeqCst) + 1;
            (result, state.clone(), version)
        };

        let observers: Vec<Observer> = self
            .shared
            .observers
            .lock()
            .list
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            // An observer mutated the store and everyone already saw the newer state
            if self.shared.version.load(Ordering::SeqCst) != version {
                break;
            }
            observer(&snapshot);
        }
        Some(result)
    }

    /// Append a new message to the transcript and return its id
    pub fn append_message(&self, from: Sender, text: impl Into<String>, rag_mode: bool) -> MessageId {
        let message = Message::new(from, text, rag_mode);
        let id = message.id;
        self.update(|state| {
            state.transcript.push(message);
            Some(())
        });
        id
    }

    /// Grow a message's text and record the model that produced it.
    ///
    /// Ids that are unset or no longer in the transcript (an answer stream
    /// racing [`reset`](Self::reset)) are ignored. A non-empty model always
    /// replaces the previous one; an empty one is ignored.
    pub fn append_to_message(&self, id: Option<&MessageId>, delta: &str, model: Option<&str>) {
        let Some(id) = id else {
            return;
        };

        let applied = self.update(|state| {
            let message = state.message_mut(id)?;
            message.text.push_str(delta);
            if let Some(model) = model.filter(|m| !m.is_empty()) {
                message.model = Some(model.to_string());
            }
            Some(())
        });

        if applied.is_none() {
            tracing::debug!(message_id = %id, "Dropping update for unknown message");
        }
    }

    pub(super) fn set_phase(&self, phase: Phase) {
        self.update(|state| {
            state.phase = phase;
            Some(())
        });
    }

    /// Clear the transcript and return to idle in one step.
    ///
    /// Answer streams still in flight are not closed; their remaining events
    /// no longer find a target and are dropped.
    pub fn reset(&self) {
        self.update(|state| {
            *state = ConversationState::new();
            Some(())
        });
        tracing::info!("Conversation reset");
    }
}

/// Keeps an observer registered; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes the observer"]
pub struct Subscription {
    shared: Weak<Shared>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the observer for as long as the store lives
    pub fn detach(mut self) {
        self.shared = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.observers.lock().list.retain(|(id, _)| *id != self.id);
        }
    }
}
