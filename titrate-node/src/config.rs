use std::time::Duration;

use titrate_buffer::{QueueLayout, SmoothingMode, DEFAULT_SMOOTHING_HISTORY};
use titrate_common::constants::{MiB, MTU};
use titrate_policy::{
    AbmOptions, AdaptiveOptions, Alphas, ConfigError, FabOptions, IbOptions, PolicyKind,
};
use tracing::warn;

/// Tuning of the adaptive probe.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    /// Threshold granted to a queue when it opens.
    pub start_credit: u64,
    /// Steady probe interval.
    pub interval: Duration,
    /// Length of the one-shot window started by a drop on a settled queue.
    pub post_drop_interval: Duration,
    /// Observation delay before a reserved queue may settle.
    pub settle_delay: Duration,
    /// Bytes a queue must be offered within one settle delay to be judged non-transient.
    /// Defaults to the start credit.
    pub sustained_bytes: Option<u64>,
    /// Packet size the step caps, the safety floor and the outlier band are expressed in.
    pub packet_size: u64,
    /// Safety floor, in packets. Minimum occupancy at or below this never triggers a decrease.
    pub safety_floor: u64,
    /// Largest single decrease, in packets.
    pub step_decrease_cap: u64,
    /// The distance between the minimum occupancy and the floor is divided by this.
    pub decrease_ratio: u64,
    /// Consecutive intervals above the floor required before a decrease.
    pub min_q_hold: u32,
    /// Minimum-occupancy samples further than this many packets from the running mean are
    /// outliers.
    pub min_q_outlier: u64,
    /// Number of per-interval minima kept for outlier rejection.
    pub history_len: usize,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            start_credit: 1500,
            interval: Duration::from_millis(5000),
            post_drop_interval: Duration::from_millis(500),
            settle_delay: Duration::from_millis(100),
            sustained_bytes: None,
            packet_size: MTU,
            safety_floor: 3,
            step_decrease_cap: 5,
            decrease_ratio: 1,
            min_q_hold: 5,
            min_q_outlier: 10,
            history_len: 5,
        }
    }
}

impl ProbeOptions {
    /// Sets the threshold granted to a newly opened queue.
    pub fn with_start_credit(mut self, bytes: u64) -> Self {
        self.start_credit = bytes;
        self
    }

    /// Sets the steady probe interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the length of the window started by a drop on a settled queue.
    pub fn with_post_drop_interval(mut self, interval: Duration) -> Self {
        self.post_drop_interval = interval;
        self
    }

    /// Sets how long a reserved queue is observed before it may settle.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Sets the bytes a queue must be offered within one settle delay to settle.
    pub fn with_sustained_bytes(mut self, bytes: u64) -> Self {
        self.sustained_bytes = Some(bytes);
        self
    }

    /// Sets the safety floor, in packets.
    pub fn with_safety_floor(mut self, packets: u64) -> Self {
        self.safety_floor = packets;
        self
    }

    /// Sets the largest single decrease, in packets, and the decrease ratio.
    pub fn with_decrease(mut self, step_cap: u64, ratio: u64) -> Self {
        self.step_decrease_cap = step_cap;
        self.decrease_ratio = ratio;
        self
    }

    /// Sets how many consecutive intervals above the floor precede a decrease.
    pub fn with_min_q_hold(mut self, intervals: u32) -> Self {
        self.min_q_hold = intervals;
        self
    }

    /// Sets the distance, in packets, beyond which a minimum is an outlier.
    pub fn with_min_q_outlier(mut self, packets: u64) -> Self {
        self.min_q_outlier = packets;
        self
    }

    /// Safety floor in bytes.
    pub fn floor_bytes(&self) -> u64 {
        self.safety_floor.saturating_mul(self.packet_size)
    }

    pub fn sustained_bytes(&self) -> u64 {
        self.sustained_bytes.unwrap_or(self.start_credit)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        non_zero("probe interval", self.interval)?;
        non_zero("post-drop interval", self.post_drop_interval)?;
        non_zero("settle delay", self.settle_delay)?;

        if self.decrease_ratio == 0 {
            return Err(ConfigError::invalid("decrease ratio", "must be at least 1"));
        }
        if self.min_q_hold == 0 {
            return Err(ConfigError::invalid("min_q_hold", "must be at least 1"));
        }
        if self.history_len == 0 || self.packet_size == 0 {
            return Err(ConfigError::invalid("probe history", "length and packet size must be non-zero"));
        }

        Ok(())
    }
}

/// Periodic occupancy sampling for the smoothed queue length.
#[derive(Debug, Clone)]
pub struct SmoothingOptions {
    pub sample_interval: Duration,
    pub history: usize,
    pub mode: SmoothingMode,
}

impl Default for SmoothingOptions {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_micros(1000),
            history: DEFAULT_SMOOTHING_HISTORY,
            mode: SmoothingMode::Outlier { multiple: 2.0 },
        }
    }
}

impl SmoothingOptions {
    /// Sets the period of occupancy sampling.
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Sets how many samples each queue keeps.
    pub fn with_history(mut self, samples: usize) -> Self {
        self.history = samples;
        self
    }

    /// Sets how the sample history is averaged.
    pub fn with_mode(mut self, mode: SmoothingMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Static setup of one node.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Shared buffer size in bytes.
    pub capacity: u64,
    pub layout: QueueLayout,
    pub policy: PolicyKind,
    /// One alpha per priority. Required by the DT, FAB, ABM and IB policies.
    pub alphas: Vec<f64>,
    /// Packets of this priority bypass queue thresholds and only need global capacity.
    pub control_priority: Option<u32>,
    pub probe: ProbeOptions,
    pub adaptive: AdaptiveOptions,
    pub fab: FabOptions,
    pub abm: AbmOptions,
    pub ib: IbOptions,
    pub smoothing: SmoothingOptions,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            capacity: MiB,
            layout: QueueLayout::new(1, 1),
            policy: PolicyKind::default(),
            alphas: vec![1.0],
            control_priority: None,
            probe: ProbeOptions::default(),
            adaptive: AdaptiveOptions::default(),
            fab: FabOptions::default(),
            abm: AbmOptions::default(),
            ib: IbOptions::default(),
            smoothing: SmoothingOptions::default(),
        }
    }
}

impl NodeOptions {
    /// Sets the shared buffer size in bytes.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = bytes;
        self
    }

    /// Sets the number of ports and of priorities per port.
    pub fn with_layout(mut self, num_ports: u32, num_priorities: u32) -> Self {
        self.layout = QueueLayout::new(num_ports, num_priorities);
        self
    }

    /// Sets the admission policy.
    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    /// Sets one alpha per priority.
    pub fn with_alphas(mut self, alphas: impl Into<Vec<f64>>) -> Self {
        self.alphas = alphas.into();
        self
    }

    /// Marks `priority` as the control class.
    pub fn with_control_priority(mut self, priority: u32) -> Self {
        self.control_priority = Some(priority);
        self
    }

    /// Sets the adaptive probe tuning.
    pub fn with_probe(mut self, probe: ProbeOptions) -> Self {
        self.probe = probe;
        self
    }

    /// Sets the adaptive admission tuning.
    pub fn with_adaptive(mut self, adaptive: AdaptiveOptions) -> Self {
        self.adaptive = adaptive;
        self
    }

    /// Sets the flow-aware buffer tuning.
    pub fn with_fab(mut self, fab: FabOptions) -> Self {
        self.fab = fab;
        self
    }

    /// Sets the active buffer management tuning.
    pub fn with_abm(mut self, abm: AbmOptions) -> Self {
        self.abm = abm;
        self
    }

    /// Sets the intelligent buffer tuning.
    pub fn with_ib(mut self, ib: IbOptions) -> Self {
        self.ib = ib;
        self
    }

    /// Sets the occupancy sampling.
    pub fn with_smoothing(mut self, smoothing: SmoothingOptions) -> Self {
        self.smoothing = smoothing;
        self
    }

    /// Validated alphas for the configured layout.
    pub(crate) fn alphas(&self) -> Result<Alphas, ConfigError> {
        Alphas::new(self.alphas.clone(), self.layout.num_priorities())
    }

    /// Checks the options for consistency. Called by the controller on construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let result = self.check();
        if let Err(ref e) = result {
            warn!(error = %e, policy = %self.policy, "rejected node configuration");
        }
        result
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.layout.is_empty() {
            return Err(ConfigError::EmptyLayout);
        }
        if self.layout.num_queues().is_none() {
            return Err(ConfigError::invalid(
                "layout",
                format!(
                    "{} ports with {} priorities overflow the queue id space",
                    self.layout.num_ports(),
                    self.layout.num_priorities()
                ),
            ));
        }

        if let Some(priority) = self.control_priority {
            if priority >= self.layout.num_priorities() {
                return Err(ConfigError::invalid(
                    "control priority",
                    format!("{priority} is outside the {} configured priorities", self.layout.num_priorities()),
                ));
            }
        }

        non_zero("sample interval", self.smoothing.sample_interval)?;
        if self.smoothing.history == 0 {
            return Err(ConfigError::invalid("smoothing history", "must hold at least one sample"));
        }
        if let SmoothingMode::Outlier { multiple } = self.smoothing.mode {
            if !multiple.is_finite() || multiple <= 0.0 {
                return Err(ConfigError::invalid(
                    "outlier multiple",
                    format!("{multiple} must be finite and positive"),
                ));
            }
        }

        match self.policy {
            PolicyKind::Dt => {
                self.alphas()?;
            }
            PolicyKind::Fab => {
                self.alphas()?;
                non_zero("fab window", self.fab.window)?;
                non_negative("privileged alpha", self.fab.privileged_alpha)?;
            }
            PolicyKind::Abm => {
                self.alphas()?;
                non_zero("abm update interval", self.abm.update_interval)?;
            }
            PolicyKind::Ib => {
                self.alphas()?;
                non_zero("afd window", self.ib.afd_window)?;
                non_negative("afd gain a1", self.ib.a1)?;
                non_negative("afd gain a2", self.ib.a2)?;
                non_negative("initial fair share", self.ib.initial_fair_share)?;
            }
            PolicyKind::Cs => {}
            PolicyKind::Adaptive => self.probe.validate()?,
        }

        Ok(())
    }
}

fn non_zero(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::invalid(name, "must be non-zero"));
    }
    Ok(())
}

fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(name, format!("{value} must be finite and non-negative")));
    }
    Ok(())
}
