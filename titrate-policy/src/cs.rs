use titrate_buffer::{BufferPool, QueueId};

use crate::{check_fit, AdmissionContext, AdmissionPolicy, PolicyKind, Verdict};

/// Complete sharing: any queue may take the whole buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompleteSharing;

impl AdmissionPolicy for CompleteSharing {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Cs
    }

    fn evaluate(&mut self, ctx: &AdmissionContext<'_>) -> Verdict {
        let capacity = ctx.pool.capacity();
        Verdict::from_check(
            ctx.queue,
            check_fit(ctx.queue_len(), ctx.size, capacity, ctx.pool.remaining()),
        )
    }

    fn threshold(&self, _queue: QueueId, pool: &BufferPool) -> u64 {
        pool.capacity()
    }
}

#[cfg(test)]
mod tests {
    use titrate_buffer::FlowId;
    use titrate_common::Timestamp;

    use super::*;
    use crate::{test_utils, DropReason};

    #[test]
    fn decisions_do_not_depend_on_queue() {
        let mut pool = test_utils::pool(3_000, 2, 2);
        test_utils::fill(&mut pool, 0, 0, 2_000);
        let mut cs = CompleteSharing;

        for port in 0..2 {
            for priority in 0..2 {
                let fits = AdmissionContext::new(&pool, port, priority, FlowId(0), 1_000, Timestamp::ZERO);
                assert!(cs.evaluate(&fits).is_admit());

                let over = AdmissionContext::new(&pool, port, priority, FlowId(0), 1_001, Timestamp::ZERO);
                assert_eq!(cs.evaluate(&over), Verdict::Drop {
                    reason: DropReason::CapacityExceeded,
                    adjust: false
                });
            }
        }
    }
}
