//! Change notification for committed store transactions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;

use crate::models::{EntityType, RecordId};

/// Where a committed change came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// A write through the store API
    Local,
    /// A pulled or deferred server version
    Remote,
}

/// Records of one entity type touched by one committed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub entity: EntityType,
    pub origin: ChangeOrigin,
    pub record_ids: Vec<RecordId>,
}

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Observer {
    id: u64,
    entity: EntityType,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    observers: Mutex<Vec<Observer>>,
}

/// Observer list shared by every clone of a store.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    registry: Arc<Registry>,
}

impl Observers {
    pub fn subscribe(
        &self,
        entity: EntityType,
        callback: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut observers) = self.registry.observers.lock() {
            observers.push(Observer {
                id,
                entity,
                callback: Arc::new(callback),
            });
        }
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver events synchronously. Callbacks run without any store lock held,
    /// so they may read the store or drop their own subscription.
    pub fn notify(&self, events: &[ChangeEvent]) {
        for event in events {
            let callbacks = match self.registry.observers.lock() {
                Ok(observers) => observers
                    .iter()
                    .filter(|observer| observer.entity == event.entity)
                    .map(|observer| observer.callback.clone())
                    .collect::<Vec<_>>(),
                Err(_) => return,
            };
            for callback in callbacks {
                callback(event);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.registry.observers.lock().map_or(0, |observers| observers.len())
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Stop receiving events
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let Ok(mut observers) = registry.observers.lock() else {
            return;
        };
        observers.retain(|observer| observer.id != self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Collapse per-row changes into one event per (entity, origin), first-seen order.
pub(crate) fn group_changes(changes: Vec<(EntityType, RecordId, ChangeOrigin)>) -> Vec<ChangeEvent> {
    let mut events: Vec<ChangeEvent> = Vec::new();
    for (entity, record_id, origin) in changes {
        match events
            .iter_mut()
            .find(|event| event.entity == entity && event.origin == origin)
        {
            Some(event) => {
                if !event.record_ids.contains(&record_id) {
                    event.record_ids.push(record_id);
                }
            }
            None => events.push(ChangeEvent {
                entity,
                origin,
                record_ids: vec![record_id],
            }),
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notify_filters_by_entity() {
        let observers = Observers::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = observers.subscribe(EntityType::MoodEntry, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = RecordId::new();
        observers.notify(&group_changes(vec![
            (EntityType::MoodEntry, id, ChangeOrigin::Local),
            (EntityType::JournalEntry, id, ChangeOrigin::Local),
        ]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let observers = Observers::default();
        let sub = observers.subscribe(EntityType::MoodEntry, |_| {});
        assert_eq!(observers.len(), 1);
        sub.unsubscribe();
        assert_eq!(observers.len(), 0);
    }

    #[test]
    fn group_changes_dedupes_ids() {
        let id = RecordId::new();
        let events = group_changes(vec![
            (EntityType::MoodEntry, id, ChangeOrigin::Remote),
            (EntityType::MoodEntry, id, ChangeOrigin::Remote),
            (EntityType::MoodEntry, id, ChangeOrigin::Local),
        ]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].record_ids, vec![id]);
        assert_eq!(events[1].origin, ChangeOrigin::Local);
    }
}
