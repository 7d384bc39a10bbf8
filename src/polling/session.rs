//! Retry session value object and its pure transition function.
//!
//! A [`RetrySession`] tracks one polling target: how many attempts have
//! settled, whether one is in flight, the last ready payload, and whether the
//! budget ran out. All changes go through [`RetrySession::apply`], so the
//! async driver only decides *when* events happen, never what they mean.

/// Where a polling target currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No target has been set.
    Idle,
    /// Attempts are in progress (one in flight, or the next one scheduled).
    Fetching,
    /// A payload satisfied the completion predicate.
    Succeeded,
    /// Budget spent without a satisfying payload.
    Exhausted,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PollState::Succeeded | PollState::Exhausted)
    }
}

/// Result of a single settled attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome<T> {
    /// Payload satisfied the completion predicate.
    Ready(T),
    /// Fetch succeeded but the data is not ready yet.
    Incomplete,
    /// Fetch raised an error; carries the rendered message.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent<T> {
    /// Caller switched to a (possibly new) target: fresh budget, cleared result.
    Retarget(String),
    /// Manual retry of the current target once it has reached a terminal state.
    Restart,
    AttemptStarted {
        target: String,
    },
    AttemptSettled {
        target: String,
        outcome: AttemptOutcome<T>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySession<T> {
    target: Option<String>,
    state: PollState,
    attempts: u32,
    max_attempts: u32,
    in_flight: bool,
    result: Option<T>,
    degraded: bool,
    last_error: Option<String>,
}

impl<T> RetrySession<T> {
    /// Idle session with the given budget (at least one attempt).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            target: None,
            state: PollState::Idle,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            in_flight: false,
            result: None,
            degraded: false,
            last_error: None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Attempts settled for the current target, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Last payload that satisfied the completion predicate.
    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    /// Set once the budget is spent without success.
    pub fn degraded(&self) -> bool {
        self.degraded
    }

    /// Message of the most recent failed attempt, cleared on success or reset.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_current(&self, target: &str) -> bool {
        self.target.as_deref() == Some(target)
    }

    /// True when a new attempt may be issued right now.
    pub fn can_start_attempt(&self) -> bool {
        self.state == PollState::Fetching && !self.in_flight && self.attempts < self.max_attempts
    }

    /// Whether `event` would change this session. Rejected events are stale
    /// or re-entrant and are dropped by [`RetrySession::apply`].
    pub fn accepts(&self, event: &PollEvent<T>) -> bool {
        match event {
            PollEvent::Retarget(_) => true,
            PollEvent::Restart => self.target.is_some() && self.state.is_terminal(),
            PollEvent::AttemptStarted { target } => {
                self.is_current(target) && self.can_start_attempt()
            }
            PollEvent::AttemptSettled { target, .. } => {
                self.is_current(target) && self.in_flight && self.state == PollState::Fetching
            }
        }
    }

    pub fn apply(self, event: PollEvent<T>) -> Self {
        if !self.accepts(&event) {
            return self;
        }

        match event {
            PollEvent::Retarget(target) => self.reset(target),
            PollEvent::Restart => match self.target.clone() {
                Some(target) => self.reset(target),
                None => self,
            },
            PollEvent::AttemptStarted { .. } => Self {
                in_flight: true,
                ..self
            },
            PollEvent::AttemptSettled { outcome, .. } => self.settle(outcome),
        }
    }

    fn reset(self, target: String) -> Self {
        Self {
            target: Some(target),
            state: PollState::Fetching,
            ..Self::new(self.max_attempts)
        }
    }

    fn settle(mut self, outcome: AttemptOutcome<T>) -> Self {
        self.in_flight = false;
        self.attempts = self.attempts.saturating_add(1).min(self.max_attempts);

        match outcome {
            AttemptOutcome::Ready(payload) => {
                self.result = Some(payload);
                self.last_error = None;
                self.state = PollState::Succeeded;
                return self;
            }
            AttemptOutcome::Incomplete => {}
            AttemptOutcome::Failed(message) => self.last_error = Some(message),
        }

        if self.attempts >= self.max_attempts {
            self.degraded = true;
            self.state = PollState::Exhausted;
        }
        self
    }
}
