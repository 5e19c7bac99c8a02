use titrate_buffer::{BufferPool, QueueId};

use crate::{
    check_fit, scaled, AdmissionContext, AdmissionPolicy, ConfigError, PolicyKind, Verdict,
};

/// Per-priority alpha values.
#[derive(Debug, Clone, PartialEq)]
pub struct Alphas(Vec<f64>);

impl Alphas {
    /// Validates that there is one finite, non-negative alpha for each of `priorities`.
    pub fn new(alphas: Vec<f64>, priorities: u32) -> Result<Self, ConfigError> {
        if alphas.len() < priorities as usize {
            return Err(ConfigError::MissingAlpha { priority: alphas.len() as u32 });
        }

        if let Some(bad) = alphas.iter().find(|a| !a.is_finite() || **a < 0.0) {
            return Err(ConfigError::invalid("alpha", format!("{bad} is not a non-negative number")));
        }

        Ok(Self(alphas))
    }

    /// Alpha for `priority`. Priorities past the end use the last value.
    pub fn get(&self, priority: u32) -> f64 {
        self.0.get(priority as usize).or_else(|| self.0.last()).copied().unwrap_or(1.0)
    }
}

/// Dynamic thresholds: `max_size = alpha[priority] × remaining`.
#[derive(Debug, Clone)]
pub struct DynamicThreshold {
    alphas: Alphas,
}

impl DynamicThreshold {
    pub fn new(alphas: Alphas) -> Self {
        Self { alphas }
    }

    pub(crate) fn max_size(&self, priority: u32, pool: &BufferPool) -> u64 {
        scaled(self.alphas.get(priority), pool.remaining())
    }

    /// DT check for an arbitrary queue of the same pool.
    pub(crate) fn evaluate_for(&self, ctx: &AdmissionContext<'_>, queue: QueueId) -> Verdict {
        let priority = ctx.pool.layout().priority_of(queue);
        Verdict::from_check(
            queue,
            check_fit(
                ctx.pool.queue_len(queue),
                ctx.size,
                self.max_size(priority, ctx.pool),
                ctx.pool.remaining(),
            ),
        )
    }
}

impl AdmissionPolicy for DynamicThreshold {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Dt
    }

    fn evaluate(&mut self, ctx: &AdmissionContext<'_>) -> Verdict {
        self.evaluate_for(ctx, ctx.queue)
    }

    fn threshold(&self, queue: QueueId, pool: &BufferPool) -> u64 {
        self.max_size(pool.layout().priority_of(queue), pool)
    }
}
