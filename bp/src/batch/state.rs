//! Flush timing as a state machine with pure transitions

use std::time::Duration;

use tokio::time::Instant;

/// Where the accumulator is in its flush cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Buffer empty, no timer armed
    Idle,

    /// Records buffered, timer armed for `deadline`
    Scheduled { first_at: Instant, deadline: Instant },

    /// Timer fired; draining the buffer
    Running,

    /// Flush requested or high-water mark hit; draining the buffer
    Draining,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushEvent {
    /// A record was buffered; `len` is the buffer length afterwards
    Append { now: Instant, len: usize },

    /// The armed timer expired
    TimerFired { now: Instant },

    /// Explicit flush of everything buffered
    Flush,

    /// Records were taken out for delivery; `remaining` are still buffered
    Drained { remaining: usize },

    /// Records were removed by an explicit `drain(n)`
    Taken { remaining: usize },
}

/// Side effect the actor must perform after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAction {
    None,
    Arm(Instant),
    Disarm,
    DrainNow,
}

/// Timing parameters consulted by [`transition`]
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub first_hit: Duration,
    pub coalescing: Duration,
    pub high_water_mark: usize,
}

/// Compute the next state and the action it requires
pub fn transition(state: FlushState, event: FlushEvent, timing: &Timing) -> (FlushState, FlushAction) {
    use FlushAction as A;
    use FlushEvent as E;
    use FlushState as S;

    match (state, event) {
        (_, E::Flush) => (S::Draining, A::DrainNow),

        (S::Idle | S::Scheduled { .. }, E::Append { len, .. }) if len >= timing.high_water_mark => {
            (S::Draining, A::DrainNow)
        }
        (S::Idle, E::Append { now, .. }) => {
            let deadline = now + timing.first_hit;
            (S::Scheduled { first_at: now, deadline }, A::Arm(deadline))
        }
        (S::Scheduled { first_at, .. }, E::Append { now, .. }) => {
            let deadline = (first_at + timing.first_hit).min(now + timing.coalescing);
            (S::Scheduled { first_at, deadline }, A::Arm(deadline))
        }
        (S::Running | S::Draining, E::Append { .. }) => (state, A::None),

        (S::Scheduled { deadline, .. }, E::TimerFired { now }) => {
            if now >= deadline {
                (S::Running, A::DrainNow)
            } else {
                (state, A::Arm(deadline))
            }
        }
        (_, E::TimerFired { .. }) => (state, A::None),

        (S::Running | S::Draining, E::Drained { remaining }) => {
            if remaining > 0 {
                (state, A::DrainNow)
            } else {
                (S::Idle, A::Disarm)
            }
        }
        (_, E::Drained { .. }) => (state, A::None),

        (_, E::Taken { remaining: 0 }) => (S::Idle, A::Disarm),
        (_, E::Taken { .. }) => (state, A::None),
    }
}
