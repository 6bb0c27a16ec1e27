//! Job definition

use crate::step::ChunkStep;

/// A named batch job wrapping a single chunk step
///
/// `restartable` governs whether a new execution may be started for an
/// instance whose prior execution failed or was stopped; it never permits
/// re-running a completed instance.
pub struct Job<R> {
    name: String,
    restartable: bool,
    step: ChunkStep<R>,
}

impl<R: Send + 'static> Job<R> {
    pub fn new(name: impl Into<String>, step: ChunkStep<R>) -> Self {
        Self {
            name: name.into(),
            restartable: true,
            step,
        }
    }

    pub fn with_restartable(mut self, restartable: bool) -> Self {
        self.restartable = restartable;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn restartable(&self) -> bool {
        self.restartable
    }

    pub fn step(&self) -> &ChunkStep<R> {
        &self.step
    }
}
