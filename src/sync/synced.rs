//! A day-scoped state container bound to the facade.
//!
//! `SyncedResource` holds the in-memory value a view works on. Values from
//! the remote side (the initial read and every subscription delivery) and
//! local edits land in the same slot, so the container keeps two one-shot
//! guards on its persist step:
//!
//! * `suppress_next_save` is raised right before a remote value is applied
//!   and consumed by the persist step that follows, so remote values are
//!   never echoed back through `set_for_day`;
//! * `last_known_day` trails the active day, so the first persist step
//!   after a day switch is skipped and the previous day's data never lands
//!   under the new day's key.
//!
//! A generation counter, bumped on every switch and on close, discards
//! deliveries that belong to an earlier day or a closed container.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tracing::debug;

use super::{DayCollection, SubscriptionHandle, SyncService};
use crate::errors::SyncError;
use crate::models::Day;

/// What a persist step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written through the facade.
    Saved,
    /// The value came from the remote side; nothing to write.
    SuppressedEcho,
    /// First step after a day switch; skipped once.
    SkippedDaySwitch,
    /// The container is closed.
    Closed,
}

struct Slot {
    day: Day,
    last_known_day: Day,
    suppress_next_save: bool,
    generation: u64,
    closed: bool,
}

impl Slot {
    /// Check and clear both guards. `None` means the step should write.
    fn take_skip(&mut self) -> Option<PersistOutcome> {
        if self.closed {
            return Some(PersistOutcome::Closed);
        }
        let echo = std::mem::take(&mut self.suppress_next_save);
        let switched = self.last_known_day != self.day;
        self.last_known_day = self.day;

        if switched {
            Some(PersistOutcome::SkippedDaySwitch)
        } else if echo {
            Some(PersistOutcome::SuppressedEcho)
        } else {
            None
        }
    }
}

struct Shared<C: DayCollection> {
    slot: Mutex<Slot>,
    value: watch::Sender<C::Value>,
}

impl<C: DayCollection> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a value from the remote side and raise the echo guard for
    /// the next persist step. Returns `false` when the delivery was stale.
    fn apply_remote(&self, generation: u64, value: C::Value) -> bool {
        let mut slot = self.lock();
        if slot.closed || slot.generation != generation {
            debug!("Discarding stale {} delivery", C::NAME);
            return false;
        }

        slot.suppress_next_save = true;
        self.value.send_replace(value);
        debug!("Applied remote {} for {}", C::NAME, slot.day);
        true
    }
}

/// In-memory state of one collection on the active day, kept in sync with
/// the facade.
pub struct SyncedResource<C: DayCollection> {
    service: Arc<SyncService>,
    shared: Arc<Shared<C>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl<C: DayCollection> SyncedResource<C> {
    /// Load `day` and start following it.
    pub async fn open(service: Arc<SyncService>, day: Day) -> Result<Self, SyncError> {
        let (value, _) = watch::channel(C::Value::default());
        let resource = Self {
            service,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    day,
                    last_known_day: day,
                    suppress_next_save: false,
                    generation: 0,
                    closed: false,
                }),
                value,
            }),
            subscription: Mutex::new(None),
        };
        resource.attach(day).await?;
        Ok(resource)
    }

    pub fn day(&self) -> Day {
        self.shared.lock().day
    }

    /// Current value.
    pub fn get(&self) -> C::Value {
        self.shared.value.borrow().clone()
    }

    /// Receiver notified on every value change, whatever its origin.
    pub fn watch(&self) -> watch::Receiver<C::Value> {
        self.shared.value.subscribe()
    }

    /// A local edit: replace the value and save it for the active day.
    /// Local edits always target the active day, so they are never
    /// skipped by the day-switch guard.
    pub async fn set(&self, value: C::Value) -> Result<PersistOutcome, SyncError> {
        let day = {
            let mut slot = self.shared.lock();
            if slot.closed {
                return Ok(PersistOutcome::Closed);
            }
            self.shared.value.send_replace(value.clone());
            slot.suppress_next_save = false;
            slot.last_known_day = slot.day;
            slot.day
        };

        self.service.set_for_day::<C>(day, &value).await?;
        Ok(PersistOutcome::Saved)
    }

    /// The guarded persist step: save the current value unless it came
    /// from the remote side or belongs to the day before a switch.
    pub async fn persist(&self) -> Result<PersistOutcome, SyncError> {
        let (day, value) = {
            let mut slot = self.shared.lock();
            if let Some(skip) = slot.take_skip() {
                return Ok(skip);
            }
            (slot.day, self.shared.value.borrow().clone())
        };

        self.service.set_for_day::<C>(day, &value).await?;
        Ok(PersistOutcome::Saved)
    }

    /// Make `day` the active day: load it and follow it instead of the
    /// previous one. When the load fails the container still follows the
    /// new day, and keeps the previous value until a delivery arrives.
    pub async fn switch_day(&self, day: Day) -> Result<(), SyncError> {
        if self.day() == day {
            return Ok(());
        }
        debug!("Switching {} to {}", C::NAME, day);
        self.attach(day).await
    }

    /// Stop following the remote store. Later deliveries are discarded.
    pub fn close(&self) {
        {
            let mut slot = self.shared.lock();
            slot.closed = true;
            slot.generation += 1;
        }
        if let Some(mut subscription) = self.lock_subscription().take() {
            subscription.unsubscribe();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    async fn attach(&self, day: Day) -> Result<(), SyncError> {
        let generation = {
            let mut slot = self.shared.lock();
            slot.generation += 1;
            slot.day = day;
            slot.generation
        };
        if let Some(mut previous) = self.lock_subscription().take() {
            previous.unsubscribe();
        }

        let initial = self.service.get_for_day::<C>(day).await;
        if let Ok(value) = &initial {
            self.shared.apply_remote(generation, value.clone());
        }

        // The read may have raced a later switch or a close.
        let current = {
            let slot = self.shared.lock();
            !slot.closed && slot.generation == generation
        };
        if current {
            let shared = self.shared.clone();
            let handle = self.service.subscribe_for_day::<C, _>(day, move |value| {
                shared.apply_remote(generation, value);
            });
            *self.lock_subscription() = Some(handle);
        }

        initial.map(|_| ())
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<SubscriptionHandle>> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<C: DayCollection> Drop for SyncedResource<C> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(day: Day) -> Slot {
        Slot {
            day,
            last_known_day: day,
            suppress_next_save: false,
            generation: 0,
            closed: false,
        }
    }

    #[test]
    fn test_suppress_flag_is_one_shot() {
        let mut slot = slot(Day::Monday);
        slot.suppress_next_save = true;
        assert_eq!(slot.take_skip(), Some(PersistOutcome::SuppressedEcho));
        assert_eq!(slot.take_skip(), None);
    }

    #[test]
    fn test_day_switch_skips_exactly_once() {
        let mut slot = slot(Day::Monday);
        slot.day = Day::Tuesday;
        assert_eq!(slot.take_skip(), Some(PersistOutcome::SkippedDaySwitch));
        assert_eq!(slot.take_skip(), None);

        slot.day = Day::Wednesday;
        assert_eq!(slot.take_skip(), Some(PersistOutcome::SkippedDaySwitch));
    }

    #[test]
    fn test_echo_and_switch_clear_together() {
        let mut slot = slot(Day::Monday);
        slot.day = Day::Friday;
        slot.suppress_next_save = true;
        assert_eq!(slot.take_skip(), Some(PersistOutcome::SkippedDaySwitch));
        assert_eq!(slot.take_skip(), None);
    }

    #[test]
    fn test_closed_never_writes() {
        let mut slot = slot(Day::Monday);
        slot.closed = true;
        assert_eq!(slot.take_skip(), Some(PersistOutcome::Closed));
        assert_eq!(slot.take_skip(), Some(PersistOutcome::Closed));
    }
}
