//! Capacity control for the watched population.

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The member may be watched. `high_load` is set on load checkpoints.
    Admitted { high_load: bool },
    /// The ceiling is reached; the member stays unwatched.
    Rejected,
}

/// Caps the number of concurrently watched members.
///
/// The count is the watchdog's own entry count, passed in on every check, so
/// the controller can never drift from the map it guards.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    ceiling: usize,
    warn_threshold: usize,
    warn_every: usize,
}

impl AdmissionController {
    pub fn new(ceiling: usize, warn_threshold: usize, warn_every: usize) -> Self {
        Self {
            ceiling,
            warn_threshold,
            warn_every: warn_every.max(1),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Decide whether one more member may be admitted while `watched` are
    /// already being watched.
    pub fn check(&self, watched: usize) -> Admission {
        if watched >= self.ceiling {
            return Admission::Rejected;
        }
        let high_load = watched >= self.warn_threshold && watched % self.warn_every == 0;
        Admission::Admitted { high_load }
    }

    pub fn reconfigure(&mut self, ceiling: usize, warn_threshold: usize, warn_every: usize) {
        *self = Self::new(ceiling, warn_threshold, warn_every);
    }
}
