//! Keyed one-shot timers.
//!
//! Every armed timer is identified by a key (for the watchdog, a
//! `(user, purpose)` pair). Arming a key that is already armed aborts the old
//! timer first, so at most one timer per key is ever live. Fired timers are
//! delivered as [`TimerFired`] messages on an mpsc channel and carry the
//! generation they were armed with; the owner calls [`TimerScheduler::take_if_current`]
//! to discard fires that were superseded between arm time and fire time.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use afkwarden_core::UserId;

/// What a watchdog timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    /// Fires when the member should be challenged.
    Challenge,
    /// Fires when an outstanding challenge expires.
    ConfirmDeadline,
}

/// Key used by the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub user_id: UserId,
    pub purpose: TimerPurpose,
}

impl TimerKey {
    pub fn challenge(user_id: UserId) -> Self {
        Self { user_id, purpose: TimerPurpose::Challenge }
    }

    pub fn deadline(user_id: UserId) -> Self {
        Self { user_id, purpose: TimerPurpose::ConfirmDeadline }
    }
}

/// A timer expiry, delivered to the owner's event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired<K> {
    pub key: K,
    pub generation: u64,
}

struct ArmedTimer {
    generation: u64,
    fires_at: Instant,
    handle: JoinHandle<()>,
}

pub struct TimerScheduler<K> {
    timers: HashMap<K, ArmedTimer>,
    next_generation: u64,
    fired_tx: mpsc::UnboundedSender<TimerFired<K>>,
}

impl<K> TimerScheduler<K>
where
    K: Clone + Eq + Hash + Send + std::fmt::Debug + 'static,
{
    /// Create a scheduler and the receiver its expiries are delivered on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired<K>>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        (
            Self {
                timers: HashMap::new(),
                next_generation: 1,
                fired_tx,
            },
            fired_rx,
        )
    }

    /// Arm `key` to fire after `delay`, replacing any timer already armed for it.
    /// Returns the generation of the new timer.
    pub fn arm(&mut self, key: K, delay: Duration) -> u64 {
        self.cancel(&key);

        let generation = self.next_generation;
        self.next_generation += 1;

        let fires_at = Instant::now() + delay;
        let tx = self.fired_tx.clone();
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(fires_at).await;
            // Receiver gone means the owner shut down.
            let _ = tx.send(TimerFired { key: fired_key, generation });
        });

        trace!(key = ?key, generation, delay_ms = delay.as_millis() as u64, "Timer armed");
        self.timers.insert(key, ArmedTimer { generation, fires_at, handle });
        generation
    }

    /// Cancel the timer armed for `key`. Returns whether one was live.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.timers.remove(key) {
            Some(timer) => {
                timer.handle.abort();
                trace!(key = ?key, generation = timer.generation, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Consume a fired timer if it is still the one armed for its key.
    ///
    /// Returns `false` for fires that were cancelled or re-armed after the
    /// expiry message was already queued.
    pub fn take_if_current(&mut self, fired: &TimerFired<K>) -> bool {
        match self.timers.get(&fired.key) {
            Some(timer) if timer.generation == fired.generation => {
                self.timers.remove(&fired.key);
                true
            }
            _ => {
                debug!(key = ?fired.key, generation = fired.generation, "Discarding stale timer");
                false
            }
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.timers.contains_key(key)
    }

    /// When the timer for `key` is due, if armed.
    pub fn fires_at(&self, key: &K) -> Option<Instant> {
        self.timers.get(key).map(|t| t.fires_at)
    }

    pub fn live_count(&self) -> usize {
        self.timers.len()
    }

    /// Number of live timers whose key matches `pred`.
    pub fn count_where(&self, pred: impl Fn(&K) -> bool) -> usize {
        self.timers.keys().filter(|k| pred(k)).count()
    }

    /// Abort every armed timer.
    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}

impl<K> Drop for TimerScheduler<K> {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (mut timers, mut rx) = TimerScheduler::new();
        let key = TimerKey::challenge(UserId(1));
        let generation = timers.arm(key, Duration::from_secs(30));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, TimerFired { key, generation });
        assert!(timers.take_if_current(&fired));
        assert_eq!(timers.live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_previous_timer() {
        let (mut timers, mut rx) = TimerScheduler::new();
        let key = TimerKey::challenge(UserId(1));
        timers.arm(key, Duration::from_secs(10));
        let second = timers.arm(key, Duration::from_secs(20));
        assert_eq!(timers.live_count(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.generation, second);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn purposes_are_independent() {
        let (mut timers, _rx) = TimerScheduler::new();
        timers.arm(TimerKey::challenge(UserId(1)), Duration::from_secs(10));
        timers.arm(TimerKey::deadline(UserId(1)), Duration::from_secs(10));
        timers.arm(TimerKey::challenge(UserId(2)), Duration::from_secs(10));
        assert_eq!(timers.live_count(), 3);
        assert_eq!(
            timers.count_where(|k| k.purpose == TimerPurpose::Challenge),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (mut timers, mut rx) = TimerScheduler::new();
        let key = TimerKey::deadline(UserId(5));
        timers.arm(key, Duration::from_secs(1));
        assert!(timers.cancel(&key));
        assert!(!timers.cancel(&key));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fire_is_rejected() {
        let (mut timers, mut rx) = TimerScheduler::new();
        let key = TimerKey::challenge(UserId(9));
        let first = timers.arm(key, Duration::from_secs(1));

        // Let the first timer queue its expiry before re-arming.
        tokio::time::sleep(Duration::from_secs(2)).await;
        timers.arm(key, Duration::from_secs(60));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.generation, first);
        assert!(!timers.take_if_current(&fired));
        assert!(timers.is_armed(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_everything() {
        let (mut timers, _rx) = TimerScheduler::new();
        for id in 0..10 {
            timers.arm(TimerKey::challenge(UserId(id)), Duration::from_secs(60));
        }
        timers.cancel_all();
        assert_eq!(timers.live_count(), 0);
    }
}
