use std::collections::VecDeque;

use rand::Rng;

/// A source of uniform draws used when selecting a [`crate::FaultProfile`].
pub trait RandomSource {
    /// Returns an index uniformly drawn from `0..outcomes`.
    fn draw(&mut self, outcomes: u32) -> u32;
}

/// Adapts any [`rand::Rng`] into a [`RandomSource`].
#[derive(Clone, Debug)]
pub struct RngSource<R>(R);

impl<R: Rng> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self(rng)
    }
}

impl<R: Rng> RandomSource for RngSource<R> {
    fn draw(&mut self, outcomes: u32) -> u32 {
        self.0.gen_range(0..outcomes)
    }
}

/// Replays a fixed sequence of draws, making fault selection fully deterministic.
///
/// Draws are clamped into the requested range and an exhausted script keeps returning `0`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedSource {
    draws: VecDeque<u32>,
}

impl ScriptedSource {
    pub fn new(draws: impl IntoIterator<Item = u32>) -> Self {
        Self {
            draws: draws.into_iter().collect(),
        }
    }
}

impl RandomSource for ScriptedSource {
    fn draw(&mut self, outcomes: u32) -> u32 {
        let draw = self.draws.pop_front().unwrap_or_default();
        draw.min(outcomes.saturating_sub(1))
    }
}
