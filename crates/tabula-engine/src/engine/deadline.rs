//! Wall-clock limit shared by an evaluation and everything it triggers.
//!
//! Rhai polls it from its progress hook. Native builtins that loop over
//! large inputs poll it themselves through [`Deadline::check`].

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use rhai::{Dynamic, EvalAltResult, Position};

/// Items a native loop handles between deadline checks.
pub const CHECK_INTERVAL: usize = 4096;

#[derive(Default)]
struct DeadlineState {
    expires: Option<Instant>,
    depth: usize,
}

/// Nested evaluations share the outermost expiry.
#[derive(Default)]
pub struct Deadline {
    state: Mutex<DeadlineState>,
}

impl Deadline {
    pub fn enter(&self, timeout: Duration) -> DeadlineGuard<'_> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.depth == 0 {
            state.expires = Some(Instant::now() + timeout);
        }
        state.depth += 1;
        DeadlineGuard { deadline: self }
    }

    pub fn expired(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.expires.is_some_and(|at| Instant::now() >= at)
    }

    /// Abort the running script once the deadline has passed.
    ///
    /// Cheap for all but every [`CHECK_INTERVAL`]th `count`.
    pub fn check(&self, count: usize) -> Result<(), Box<EvalAltResult>> {
        if count % CHECK_INTERVAL == 0 && self.expired() {
            return Err(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE).into());
        }
        Ok(())
    }
}

pub struct DeadlineGuard<'a> {
    deadline: &'a Deadline,
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        let mut state = self
            .deadline
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.expires = None;
        }
    }
}
