use rand::Rng;

use crate::codec::{SdfType, ServiceId};
use crate::engine::config::EngineConfig;

pub type MacAddr = [u8; 6];

/// Broadcast destination; also the wildcard BSSID (USD has no cluster,
/// hence no real BSSID).
pub const BCAST_ADDR: MacAddr = [0xFF; 6];

/// Configuration of one Publish instance. `ttl_ms == 0` selects the
/// implicit expiry rules; `announcement_period_ms == 0` and `freq == 0`
/// fall back to the engine defaults.
#[derive(Debug, Clone, Default)]
pub struct PublishConfig {
    pub unsolicited: bool,
    pub solicited: bool,
    /// Send solicited replies as multicast instead of unicast.
    pub solicited_multicast: bool,
    pub ttl_ms: u64,
    /// Suppress the `replied` callback.
    pub disable_events: bool,
    /// Further Service Discovery requested; keeps the instance alive while
    /// Follow-up traffic flows.
    pub fsd: bool,
    pub fsd_gas: bool,
    pub freq: u32,
    /// Channel-hopping schedule; empty disables Multi mode.
    pub freq_list: Vec<u32>,
    pub announcement_period_ms: u64,
}

/// Configuration of one Subscribe instance.
#[derive(Debug, Clone, Default)]
pub struct SubscribeConfig {
    /// Active subscribers broadcast Subscribe frames; passive ones only
    /// listen.
    pub active: bool,
    pub ttl_ms: u64,
    pub freq: u32,
    pub query_period_ms: u64,
}

#[derive(Debug, Clone)]
pub enum ServiceRole {
    Publish(PublishConfig),
    Subscribe(SubscribeConfig),
}

/// Publish channel-hopping mode: a single dwell frequency, or round-robin
/// over the configured frequency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Single,
    Multi,
}

/// Rate limit on solicited replies: while set, only `peer` gets answers.
#[derive(Debug, Clone)]
pub struct PauseState {
    pub until: u64,
    pub peer: MacAddr,
    pub peer_instance_id: u8,
}

/// One registered Publish or Subscribe instance.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub id: u8,
    pub role: ServiceRole,
    pub name: String,
    pub service_id: ServiceId,
    pub proto_type: u8,
    pub ssi: Option<Vec<u8>>,
    pub elems: Option<Vec<u8>>,

    pub time_started: u64,
    pub end_time: Option<u64>,
    pub last_multicast: Option<u64>,
    pub first_discovered: Option<u64>,
    pub last_followup: Option<u64>,

    // Publish only.
    pub pause: Option<PauseState>,
    pub chan_mode: ChannelMode,
    /// Multi mode has not been entered yet; the first entry restarts the
    /// round-robin from index 0.
    pub first_multi: bool,
    pub chan_idx: usize,
    pub next_publish_state: u64,
    pub next_chan_swap: u64,
    pub dwell_ms: u64,
}

impl ServiceInstance {
    pub fn new(
        id: u8,
        now: u64,
        name: &str,
        proto_type: u8,
        ssi: Option<&[u8]>,
        elems: Option<&[u8]>,
        role: ServiceRole,
        dwell_ms: u64,
    ) -> Self {
        let ttl = match &role {
            ServiceRole::Publish(p) => p.ttl_ms,
            ServiceRole::Subscribe(s) => s.ttl_ms,
        };
        ServiceInstance {
            id,
            role,
            name: name.to_owned(),
            service_id: ServiceId::from_name(name),
            proto_type,
            ssi: ssi.map(<[u8]>::to_vec),
            elems: elems.map(<[u8]>::to_vec),
            time_started: now,
            end_time: (ttl > 0).then(|| now + ttl),
            last_multicast: None,
            first_discovered: None,
            last_followup: None,
            pause: None,
            chan_mode: ChannelMode::Single,
            first_multi: true,
            chan_idx: 0,
            next_publish_state: now + dwell_ms,
            next_chan_swap: 0,
            dwell_ms,
        }
    }

    pub fn publish(&self) -> Option<&PublishConfig> {
        match &self.role {
            ServiceRole::Publish(p) => Some(p),
            ServiceRole::Subscribe(_) => None,
        }
    }

    pub fn subscribe(&self) -> Option<&SubscribeConfig> {
        match &self.role {
            ServiceRole::Publish(_) => None,
            ServiceRole::Subscribe(s) => Some(s),
        }
    }

    pub fn is_publish(&self) -> bool {
        matches!(self.role, ServiceRole::Publish(_))
    }

    /// Broadcast subtype for this instance's multicasts.
    pub fn multicast_subtype(&self) -> SdfType {
        match &self.role {
            ServiceRole::Publish(_) => SdfType::Publish,
            ServiceRole::Subscribe(_) => SdfType::Subscribe,
        }
    }

    /// Frequency the instance currently operates on.
    pub fn cur_freq(&self, cfg: &EngineConfig) -> u32 {
        match &self.role {
            ServiceRole::Publish(p) => match self.chan_mode {
                ChannelMode::Multi if !p.freq_list.is_empty() => {
                    p.freq_list[self.chan_idx % p.freq_list.len()]
                }
                _ => default_freq(p.freq, cfg),
            },
            ServiceRole::Subscribe(s) => default_freq(s.freq, cfg),
        }
    }

    /// Instances that depend on a listen window to be discovered at all.
    pub fn wants_listen(&self) -> bool {
        match &self.role {
            ServiceRole::Publish(p) => p.solicited && !p.unsolicited,
            ServiceRole::Subscribe(s) => !s.active,
        }
    }

    /// When the next broadcast SDF for this instance is due, if it
    /// broadcasts at all. Channel-hopping publishers are additionally due
    /// at each publish-state deadline.
    pub fn next_multicast_due(&self, cfg: &EngineConfig) -> Option<u64> {
        match &self.role {
            ServiceRole::Publish(p) if p.unsolicited => {
                let period = pick_period(p.announcement_period_ms, cfg.announce_period_ms);
                let base = match self.last_multicast {
                    None => self.time_started,
                    Some(t) => t + period,
                };
                Some(if p.freq_list.is_empty() { base } else { base.min(self.next_publish_state) })
            }
            ServiceRole::Subscribe(s) if s.active => {
                let period = pick_period(s.query_period_ms, cfg.query_period_ms);
                Some(match self.last_multicast {
                    None => self.time_started,
                    Some(t) => t + period,
                })
            }
            _ => None,
        }
    }

    /// Explicit ttl expiry, or the implicit rules when no ttl was set:
    /// a publisher dies one grace period after its multicast unless FSD
    /// keeps it alive through Follow-up traffic; a subscriber dies one
    /// grace period after first discovery under the same Follow-up grace.
    pub fn expired(&self, now: u64, cfg: &EngineConfig) -> bool {
        if let Some(end) = self.end_time {
            return now >= end;
        }
        let grace = cfg.followup_grace_ms;
        match &self.role {
            ServiceRole::Publish(p) => match self.last_multicast {
                Some(t) => now >= t + grace && (!p.fsd || self.followup_idle(now, grace)),
                None => false,
            },
            ServiceRole::Subscribe(_) => match self.first_discovered {
                Some(t) => now >= t + grace && self.followup_idle(now, grace),
                None => false,
            },
        }
    }

    /// Earliest future time at which the implicit expiry rules can fire,
    /// for scheduling the re-check. `None` under an explicit ttl or before
    /// the anchor event happened.
    pub fn implicit_expiry_deadline(&self, cfg: &EngineConfig) -> Option<u64> {
        if self.end_time.is_some() {
            return None;
        }
        let grace = cfg.followup_grace_ms;
        let (anchor, followup_guard) = match &self.role {
            ServiceRole::Publish(p) => (self.last_multicast, p.fsd),
            ServiceRole::Subscribe(_) => (self.first_discovered, true),
        };
        let mut deadline = anchor? + grace;
        if followup_guard {
            if let Some(t) = self.last_followup {
                deadline = deadline.max(t + grace);
            }
        }
        Some(deadline)
    }

    fn followup_idle(&self, now: u64, grace: u64) -> bool {
        self.last_followup.is_none_or(|t| now >= t + grace)
    }

    /// Publish channel-state machine: flip Single/Multi at each dwell
    /// deadline (Multi only with a non-empty frequency list) and advance
    /// the round-robin index while in Multi, frozen under pause.
    pub fn check_channel_state<R: Rng>(&mut self, now: u64, cfg: &EngineConfig, rng: &mut R) {
        let ServiceRole::Publish(p) = &self.role else { return };

        if now >= self.next_publish_state {
            self.dwell_ms = pick_dwell(cfg, rng);
            self.next_publish_state = now + self.dwell_ms;
            if !p.freq_list.is_empty() {
                match self.chan_mode {
                    ChannelMode::Single => {
                        self.chan_mode = ChannelMode::Multi;
                        if self.first_multi {
                            self.chan_idx = 0;
                            self.first_multi = false;
                        }
                        self.next_chan_swap = now + cfg.chan_swap_interval_ms;
                    }
                    ChannelMode::Multi => self.chan_mode = ChannelMode::Single,
                }
            }
        }

        if self.chan_mode == ChannelMode::Multi && now >= self.next_chan_swap {
            if self.pause.is_none() {
                self.chan_idx = (self.chan_idx + 1) % p.freq_list.len();
            }
            self.next_chan_swap = now + cfg.chan_swap_interval_ms;
        }
    }

    /// Pause release: hard cap, or earlier once the paused peer's
    /// Follow-up traffic has gone idle for one grace period.
    pub fn check_pause(&mut self, now: u64, cfg: &EngineConfig) {
        let Some(pause) = &self.pause else { return };
        let fsd = self.publish().is_some_and(|p| p.fsd);
        if now >= pause.until || (fsd && self.followup_idle(now, cfg.followup_grace_ms)) {
            self.pause = None;
        }
    }
}

fn default_freq(freq: u32, cfg: &EngineConfig) -> u32 {
    if freq > 0 { freq } else { cfg.default_freq }
}

fn pick_period(configured: u64, fallback: u64) -> u64 {
    if configured > 0 { configured } else { fallback }
}

/// Randomized publish-state dwell, uniform over
/// `chan_dwell_min_ms + chan_dwell_step_ms * 0..=chan_dwell_steps`.
pub fn pick_dwell<R: Rng>(cfg: &EngineConfig, rng: &mut R) -> u64 {
    cfg.chan_dwell_min_ms + cfg.chan_dwell_step_ms * rng.gen_range(0..=cfg.chan_dwell_steps)
}
