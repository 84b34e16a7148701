use serde::Deserialize;

/// Engine timing configuration.
/// All values are in milliseconds unless otherwise specified.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Broadcast period for unsolicited Publish instances that do not set
    /// their own announcement period (ms, default: 500)
    #[serde(default = "default_announce_period")]
    pub announce_period_ms: u64,
    /// Broadcast period for active Subscribe instances that do not set
    /// their own query period (ms, default: 1000)
    #[serde(default = "default_query_period")]
    pub query_period_ms: u64,
    /// Listen-window length requested for solicited-only publishers and
    /// passive subscribers (ms, default: 1000)
    #[serde(default = "default_listen_duration")]
    pub listen_duration_ms: u64,
    /// Shortest listen window a channel-hopping publisher will request
    /// (ms, default: 150)
    #[serde(default = "default_listen_min")]
    pub listen_min_ms: u64,
    /// Shortest channel hold passed along with a multicast (ms, default: 100)
    #[serde(default = "default_tx_wait_min")]
    pub tx_wait_min_ms: u64,
    /// Lower bound of the randomized publish-state dwell (ms, default: 500)
    #[serde(default = "default_dwell_min")]
    pub chan_dwell_min_ms: u64,
    /// Step and step-count of the dwell randomization: the dwell is
    /// min + step * rand(0..=steps) (default: 100 ms x 5)
    #[serde(default = "default_dwell_step")]
    pub chan_dwell_step_ms: u64,
    #[serde(default = "default_dwell_steps")]
    pub chan_dwell_steps: u64,
    /// Round-robin frequency advance interval in Multi mode (ms, default: 150)
    #[serde(default = "default_chan_swap_interval")]
    pub chan_swap_interval_ms: u64,
    /// Longest a Publish instance stays paused on one peer (ms, default: 60000)
    #[serde(default = "default_pause_timeout")]
    pub pause_timeout_ms: u64,
    /// Follow-up idle grace used by the implicit expiry rules and by early
    /// pause release (ms, default: 1000)
    #[serde(default = "default_followup_grace")]
    pub followup_grace_ms: u64,
    /// Frequency used when a service does not configure one
    /// (MHz, default: 2437 = channel 6)
    #[serde(default = "default_freq")]
    pub default_freq: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            announce_period_ms: default_announce_period(),
            query_period_ms: default_query_period(),
            listen_duration_ms: default_listen_duration(),
            listen_min_ms: default_listen_min(),
            tx_wait_min_ms: default_tx_wait_min(),
            chan_dwell_min_ms: default_dwell_min(),
            chan_dwell_step_ms: default_dwell_step(),
            chan_dwell_steps: default_dwell_steps(),
            chan_swap_interval_ms: default_chan_swap_interval(),
            pause_timeout_ms: default_pause_timeout(),
            followup_grace_ms: default_followup_grace(),
            default_freq: default_freq(),
        }
    }
}

fn default_announce_period() -> u64 { 500 }
fn default_query_period() -> u64 { 1000 }
fn default_listen_duration() -> u64 { 1000 }
fn default_listen_min() -> u64 { 150 }
fn default_tx_wait_min() -> u64 { 100 }
fn default_dwell_min() -> u64 { 500 }
fn default_dwell_step() -> u64 { 100 }
fn default_dwell_steps() -> u64 { 5 }
fn default_chan_swap_interval() -> u64 { 150 }
fn default_pause_timeout() -> u64 { 60_000 }
fn default_followup_grace() -> u64 { 1000 }
fn default_freq() -> u32 { 2437 }
