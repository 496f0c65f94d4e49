//! Configuration for the evaluation runtime.

use crate::error::EvalError;

/// Default per-expression step budget for forest generation.
pub const FOREST_MAX_STEPS: u32 = 100_000;
/// Default per-expression step budget for diagram generation.
///
/// Deliberately much smaller than [`FOREST_MAX_STEPS`]; callers combining
/// both outputs must pass an explicit budget to get matching forests.
pub const SVG_MAX_STEPS: u32 = 2_000;

/// Runtime sizing and policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct EvalConfig {
    /// Worker pool size; one shared region and one thread per slot.
    pub n_workers: usize,
    /// Ring size as a power of two (default: 10 = 1024 entries).
    pub ring_bits: u8,
    /// Arena node capacity per slot.
    pub arena_capacity: u32,
    /// Per-expression reduction step budget.
    pub max_steps: u32,
    /// Maximum resubmissions per request before it is declared diverged.
    pub max_resubmits: u32,
    /// Sliding window of recent head ids used for cycle detection.
    pub history_window: usize,
    /// Recorded-path length ceiling; reduction continues past it but steps
    /// stop being recorded.
    pub path_ceiling: usize,
    /// Cooperative-yield attempts on a full ring before escalating to
    /// zero-duration sleeps.
    pub busy_wait_threshold: u32,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            n_workers: 8,
            ring_bits: 10,
            arena_capacity: 1 << 20,
            max_steps: FOREST_MAX_STEPS,
            max_resubmits: FOREST_MAX_STEPS,
            history_window: 10_000,
            path_ceiling: 10_000,
            busy_wait_threshold: 512,
        }
    }
}

impl EvalConfig {
    /// Preset for forest generation.
    pub fn forest() -> Self {
        Self::default()
    }

    /// Preset for diagram generation (small step budget).
    pub fn svg() -> Self {
        Self {
            max_steps: SVG_MAX_STEPS,
            ..Self::default()
        }
    }

    #[inline]
    pub fn ring_entries(&self) -> u32 {
        1u32 << self.ring_bits
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.n_workers = n;
        self
    }

    pub fn with_arena_capacity(mut self, capacity: u32) -> Self {
        self.arena_capacity = capacity;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_resubmits(mut self, max: u32) -> Self {
        self.max_resubmits = max;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_path_ceiling(mut self, ceiling: usize) -> Self {
        self.path_ceiling = ceiling;
        self
    }

    /// Validates the knobs that cannot be checked by the type system.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.n_workers == 0 || self.n_workers > 128 {
            return Err(EvalError::InvalidConfig(format!(
                "n_workers {} must be between 1 and 128",
                self.n_workers
            )));
        }
        if self.ring_bits < 2 || self.ring_bits > 20 {
            return Err(EvalError::InvalidConfig(format!(
                "ring_bits {} must be between 2 and 20",
                self.ring_bits
            )));
        }
        if self.max_steps == 0 {
            return Err(EvalError::InvalidConfig(
                "max_steps must be at least 1".into(),
            ));
        }
        if self.history_window < 2 {
            return Err(EvalError::InvalidConfig(
                "history_window must be at least 2".into(),
            ));
        }
        if self.busy_wait_threshold == 0 {
            return Err(EvalError::InvalidConfig(
                "busy_wait_threshold must be at least 1".into(),
            ));
        }
        // Slot id spaces are disjoint ranges of the 32-bit space.
        let id_space = self.n_workers as u64 * self.arena_capacity as u64;
        if id_space > u32::MAX as u64 {
            return Err(EvalError::InvalidConfig(format!(
                "{} workers x {} nodes exceeds the 32-bit id space",
                self.n_workers, self.arena_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EvalConfig::default().validate().is_ok());
    }

    #[test]
    fn presets_differ_only_in_budget() {
        let forest = EvalConfig::forest();
        let svg = EvalConfig::svg();
        assert_eq!(forest.max_steps, FOREST_MAX_STEPS);
        assert_eq!(svg.max_steps, SVG_MAX_STEPS);
        assert_eq!(forest.n_workers, svg.n_workers);
        assert_eq!(forest.ring_bits, svg.ring_bits);
    }

    #[test]
    fn rejects_id_space_overflow() {
        let config = EvalConfig::default()
            .with_workers(128)
            .with_arena_capacity(1 << 30);
        assert!(matches!(
            config.validate(),
            Err(EvalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_workers() {
        assert!(EvalConfig::default().with_workers(0).validate().is_err());
    }
}
