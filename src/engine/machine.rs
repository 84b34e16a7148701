use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::codec::{build_sdf, parse_sdf, PeerSda, SdfSpec, SdfType};
use crate::engine::config::EngineConfig;
use crate::engine::events::{EngineEvents, TerminateReason};
use crate::engine::radio::RadioState;
use crate::engine::service::{
    pick_dwell, ChannelMode, MacAddr, PauseState, PublishConfig, ServiceInstance, ServiceRole,
    SubscribeConfig, BCAST_ADDR,
};
use crate::engine::UsdError;

/// Fixed registry capacity.
pub const MAX_SERVICES: usize = 20;

/// A re-armed timer never fires in the past.
const TIMER_FLOOR_MS: u64 = 1;

/// The USD discovery engine: service registry, cooperative scheduler and
/// radio-resource bookkeeping behind one struct owned by the embedder.
///
/// All time is `u64` milliseconds supplied by the caller; the engine never
/// reads a clock and never blocks. After any mutating call the embedder
/// should consult [`DiscoveryEngine::next_deadline`] and invoke
/// [`DiscoveryEngine::tick`] when it passes.
pub struct DiscoveryEngine {
    addr: MacAddr,
    is_ap: bool,
    cfg: EngineConfig,
    events: Box<dyn EngineEvents>,
    services: [Option<Box<ServiceInstance>>; MAX_SERVICES],
    num_services: usize,
    id_cursor: usize,
    radio: RadioState,
    timer: Option<u64>,
    rng: StdRng,
}

impl DiscoveryEngine {
    pub fn new(addr: MacAddr, is_ap: bool, events: Box<dyn EngineEvents>) -> Self {
        Self::with_config(addr, is_ap, events, EngineConfig::default())
    }

    pub fn with_config(addr: MacAddr, is_ap: bool, events: Box<dyn EngineEvents>, cfg: EngineConfig) -> Self {
        DiscoveryEngine {
            addr,
            is_ap,
            cfg,
            events,
            services: std::array::from_fn(|_| None),
            num_services: 0,
            id_cursor: 0,
            radio: RadioState::default(),
            timer: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn local_addr(&self) -> MacAddr {
        self.addr
    }

    pub fn num_services(&self) -> usize {
        self.num_services
    }

    /// Deadline of the armed scheduler timer, absolute ms. `None` means
    /// nothing is pending.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timer
    }

    /// Registers a Publish instance and arms the scheduler so the first
    /// announcement goes out on the next tick.
    pub fn publish(
        &mut self,
        now: u64,
        name: &str,
        proto_type: u8,
        ssi: Option<&[u8]>,
        elems: Option<&[u8]>,
        config: &PublishConfig,
    ) -> Result<u8, UsdError> {
        if name.is_empty() {
            return Err(UsdError::InvalidArgument("service name is empty"));
        }
        if !config.unsolicited && !config.solicited {
            return Err(UsdError::InvalidArgument("publish needs unsolicited or solicited mode"));
        }
        let slot = self.alloc_slot()?;
        let dwell = pick_dwell(&self.cfg, &mut self.rng);
        let id = (slot + 1) as u8;
        let srv = ServiceInstance::new(id, now, name, proto_type, ssi, elems, ServiceRole::Publish(config.clone()), dwell);
        info!("engine: publish '{name}' registered as id {id}");
        self.services[slot] = Some(Box::new(srv));
        self.num_services += 1;
        self.arm(now);
        Ok(id)
    }

    /// Registers a Subscribe instance; mirrors [`DiscoveryEngine::publish`]
    /// minus channel hopping and the publish-mode validation.
    pub fn subscribe(
        &mut self,
        now: u64,
        name: &str,
        proto_type: u8,
        ssi: Option<&[u8]>,
        elems: Option<&[u8]>,
        config: &SubscribeConfig,
    ) -> Result<u8, UsdError> {
        if name.is_empty() {
            return Err(UsdError::InvalidArgument("service name is empty"));
        }
        let slot = self.alloc_slot()?;
        let dwell = pick_dwell(&self.cfg, &mut self.rng);
        let id = (slot + 1) as u8;
        let srv = ServiceInstance::new(id, now, name, proto_type, ssi, elems, ServiceRole::Subscribe(config.clone()), dwell);
        info!("engine: subscribe '{name}' registered as id {id}");
        self.services[slot] = Some(Box::new(srv));
        self.num_services += 1;
        self.arm(now);
        Ok(id)
    }

    /// No-op on an unknown id or a subscribe handle.
    pub fn cancel_publish(&mut self, id: u8) {
        if let Some(slot) = self.slot_of(id) {
            if self.services[slot].as_ref().is_some_and(|s| s.is_publish()) {
                self.remove_slot(slot, TerminateReason::UserRequest);
            }
        }
    }

    /// No-op on an unknown id or a publish handle.
    pub fn cancel_subscribe(&mut self, id: u8) {
        if let Some(slot) = self.slot_of(id) {
            if self.services[slot].as_ref().is_some_and(|s| !s.is_publish()) {
                self.remove_slot(slot, TerminateReason::UserRequest);
            }
        }
    }

    /// Dispatches to the matching cancel based on the stored kind.
    pub fn cancel_service(&mut self, id: u8) {
        if let Some(slot) = self.slot_of(id) {
            self.remove_slot(slot, TerminateReason::UserRequest);
        }
    }

    /// Replaces the ssi of a live Publish instance. Leaves ttl, pause and
    /// channel-hopping state untouched.
    pub fn update_publish(&mut self, id: u8, ssi: Option<&[u8]>) -> Result<(), UsdError> {
        let slot = self.slot_of(id).ok_or(UsdError::UnknownHandle(id))?;
        let Some(srv) = self.services[slot].as_mut() else {
            return Err(UsdError::UnknownHandle(id));
        };
        if !srv.is_publish() {
            return Err(UsdError::InvalidArgument("handle is not a publish instance"));
        }
        srv.ssi = ssi.map(<[u8]>::to_vec);
        self.arm_immediate();
        Ok(())
    }

    /// Builds and sends a unicast Follow-up from a local instance.
    pub fn transmit(
        &mut self,
        now: u64,
        handle: u8,
        ssi: Option<&[u8]>,
        elems: Option<&[u8]>,
        peer: MacAddr,
        requestor_instance_id: u8,
    ) -> Result<(), UsdError> {
        let slot = self.slot_of(handle).ok_or(UsdError::UnknownHandle(handle))?;
        let Some(srv) = self.services[slot].as_mut() else {
            return Err(UsdError::UnknownHandle(handle));
        };
        let frame = build_sdf(&SdfSpec {
            subtype: SdfType::FollowUp,
            service_id: srv.service_id,
            instance_id: srv.id,
            requestor_instance_id,
            proto_type: srv.proto_type,
            ssi,
            elems,
            with_sdea: srv.is_publish(),
            fsd_required: srv.publish().is_some_and(|p| p.fsd),
            fsd_with_gas: srv.publish().is_some_and(|p| p.fsd_gas),
        });
        let freq = srv.cur_freq(&self.cfg);
        srv.last_followup = Some(now);
        // Answering a specific peer engages the publisher with that peer,
        // same as a solicited reply.
        if srv.is_publish() && peer != BCAST_ADDR {
            srv.pause = Some(PauseState {
                until: now + self.cfg.pause_timeout_ms,
                peer,
                peer_instance_id: requestor_instance_id,
            });
        }
        self.radio.transmit(&mut *self.events, freq, self.cfg.tx_wait_min_ms, peer, self.addr, BCAST_ADDR, &frame);
        Ok(())
    }

    /// Entry point for received Service Discovery Frames.
    pub fn rx_sdf(&mut self, now: u64, peer: MacAddr, freq: u32, buf: &[u8]) {
        if self.num_services == 0 {
            return;
        }
        let sdas = match parse_sdf(buf) {
            Ok(s) => s,
            Err(e) => {
                debug!("engine: ignoring frame from {peer:02x?}: {e}");
                return;
            }
        };
        for sda in &sdas {
            match sda.subtype {
                SdfType::Publish => self.rx_peer_publish(now, peer, freq, sda),
                SdfType::Subscribe => self.rx_peer_subscribe(now, peer, freq, sda),
                SdfType::FollowUp => self.rx_peer_followup(now, peer, sda),
            }
        }
    }

    /// Terminates and frees every instance (reason UserRequest) and drops
    /// all radio bookkeeping.
    pub fn flush(&mut self) {
        for slot in 0..MAX_SERVICES {
            self.remove_slot(slot, TerminateReason::UserRequest);
        }
        self.radio.clear();
        self.timer = None;
    }

    // Radio completion notifiers.

    pub fn tx_status(&mut self, freq: u32, dst: MacAddr) {
        self.radio.on_tx_status(freq, dst);
    }

    pub fn tx_wait_ended(&mut self, now: u64) {
        self.radio.on_tx_wait_ended();
        self.arm(now);
    }

    pub fn listen_started(&mut self, freq: u32, duration_ms: u64) {
        self.radio.on_listen_started(freq, duration_ms);
    }

    pub fn listen_ended(&mut self, now: u64, freq: u32) {
        if self.radio.on_listen_ended(freq) {
            self.arm(now);
        }
    }

    /// One cooperative scheduler pass. Returns the new timer deadline, or
    /// `None` when nothing is pending.
    pub fn tick(&mut self, now: u64) -> Option<u64> {
        self.timer = None;
        let mut next: Option<u64> = None;
        // Earliest-due broadcast candidate: at most one SDF per tick.
        let mut due: Option<(usize, u64)> = None;

        for slot in 0..MAX_SERVICES {
            if self.services[slot].as_ref().is_some_and(|s| s.expired(now, &self.cfg)) {
                self.remove_slot(slot, TerminateReason::Timeout);
                continue;
            }
            let Some(srv) = self.services[slot].as_mut() else { continue };

            srv.check_channel_state(now, &self.cfg, &mut self.rng);
            srv.check_pause(now, &self.cfg);

            if let Some(end) = srv.end_time {
                merge(&mut next, end);
            }
            if let Some(d) = srv.implicit_expiry_deadline(&self.cfg) {
                merge(&mut next, d);
            }
            if let Some(t) = srv.next_multicast_due(&self.cfg) {
                if t > now {
                    merge(&mut next, t);
                } else if due.is_none_or(|(_, d)| t < d) {
                    due = Some((slot, t));
                }
            }
            if srv.is_publish() {
                merge(&mut next, srv.next_publish_state);
                if srv.chan_mode == ChannelMode::Multi {
                    merge(&mut next, srv.next_chan_swap);
                }
                if let Some(pause) = &srv.pause {
                    merge(&mut next, pause.until);
                }
            }
        }

        let mut sent = false;
        if let Some((slot, _)) = due {
            if self.radio.idle() {
                sent = self.tx_multicast(now, slot, &mut next);
            }
            if !sent {
                // Busy radio or refused transmit: completions re-arm the
                // timer, but the send must go out even when none arrives.
                merge(&mut next, now + self.cfg.tx_wait_min_ms.max(TIMER_FLOOR_MS));
            }
        }

        if !sent && self.radio.idle() && !self.is_ap {
            self.request_listen_window(now);
        }

        self.timer = next.map(|t| t.max(now + TIMER_FLOOR_MS));
        self.timer
    }

    // Broadcast the due instance's SDF; returns true when a frame went out.
    fn tx_multicast(&mut self, now: u64, slot: usize, next: &mut Option<u64>) -> bool {
        let Some(srv) = self.services[slot].as_mut() else { return false };
        let freq = srv.cur_freq(&self.cfg);
        let hopping = srv.publish().is_some_and(|p| !p.freq_list.is_empty());
        // Hopping publishers hold the medium until their next channel-state
        // deadline so solicited exchanges can complete on this channel.
        let wait_ms = if hopping {
            self.cfg.tx_wait_min_ms.max(srv.next_publish_state.saturating_sub(now))
        } else {
            self.cfg.tx_wait_min_ms
        };
        let frame = build_sdf(&SdfSpec {
            subtype: srv.multicast_subtype(),
            service_id: srv.service_id,
            instance_id: srv.id,
            requestor_instance_id: 0,
            proto_type: srv.proto_type,
            ssi: srv.ssi.as_deref(),
            elems: srv.elems.as_deref(),
            with_sdea: srv.is_publish() || srv.ssi.is_some(),
            fsd_required: srv.publish().is_some_and(|p| p.fsd),
            fsd_with_gas: srv.publish().is_some_and(|p| p.fsd_gas),
        });
        if !self.radio.transmit(&mut *self.events, freq, wait_ms, BCAST_ADDR, self.addr, BCAST_ADDR, &frame) {
            return false;
        }
        srv.last_multicast = Some(now);
        if let Some(t) = srv.next_multicast_due(&self.cfg) {
            merge(next, t);
        }
        if let Some(d) = srv.implicit_expiry_deadline(&self.cfg) {
            merge(next, d);
        }
        true
    }

    // One listen window per tick for the first instance that needs one:
    // a solicited-only publisher or a passive subscriber.
    fn request_listen_window(&mut self, now: u64) {
        for slot in 0..MAX_SERVICES {
            let Some(srv) = self.services[slot].as_ref() else { continue };
            if !srv.wants_listen() {
                continue;
            }
            let freq = srv.cur_freq(&self.cfg);
            let duration_ms = if srv.is_publish() {
                self.cfg
                    .listen_duration_ms
                    .min(srv.next_publish_state.saturating_sub(now))
                    .max(self.cfg.listen_min_ms)
            } else {
                self.cfg.listen_duration_ms
            };
            let id = srv.id;
            match self.radio.request_listen(&mut *self.events, freq, duration_ms) {
                Ok(()) => return,
                Err(e) => {
                    // The instance cannot be discovered without a listen
                    // window; give up on it and keep scanning so the next
                    // candidate still gets its window.
                    warn!("engine: listen request for id {id} failed: {e}");
                    self.remove_slot(slot, TerminateReason::Failure);
                }
            }
        }
    }

    fn rx_peer_publish(&mut self, now: u64, peer: MacAddr, freq: u32, sda: &PeerSda) {
        for slot in 0..MAX_SERVICES {
            let Some(srv) = self.services[slot].as_mut() else { continue };
            if srv.is_publish() || srv.service_id != sda.service_id {
                continue;
            }
            if srv.first_discovered.is_some() {
                // Result and reply fire once per instance.
                continue;
            }
            srv.first_discovered = Some(now);
            let active = matches!(&srv.role, ServiceRole::Subscribe(s) if s.active);
            self.events.discovery_result(
                srv.id,
                sda.proto_type,
                &sda.ssi,
                sda.instance_id,
                peer,
                sda.fsd_required,
                sda.fsd_with_gas,
            );

            // Active: multicast Subscribe. Passive: payload-less unicast
            // Follow-up so the publisher learns about us.
            let (subtype, dst, ssi) = if active {
                (SdfType::Subscribe, BCAST_ADDR, srv.ssi.as_deref())
            } else {
                (SdfType::FollowUp, peer, None)
            };
            let frame = build_sdf(&SdfSpec {
                subtype,
                service_id: srv.service_id,
                instance_id: srv.id,
                requestor_instance_id: sda.instance_id,
                proto_type: srv.proto_type,
                ssi,
                elems: None,
                with_sdea: ssi.is_some(),
                fsd_required: false,
                fsd_with_gas: false,
            });
            if subtype == SdfType::FollowUp {
                srv.last_followup = Some(now);
            }
            let tx_freq = if freq > 0 { freq } else { srv.cur_freq(&self.cfg) };
            self.radio.transmit(&mut *self.events, tx_freq, self.cfg.tx_wait_min_ms, dst, self.addr, BCAST_ADDR, &frame);
        }
    }

    fn rx_peer_subscribe(&mut self, now: u64, peer: MacAddr, freq: u32, sda: &PeerSda) {
        for slot in 0..MAX_SERVICES {
            let Some(srv) = self.services[slot].as_mut() else { continue };
            let ServiceRole::Publish(p) = &srv.role else { continue };
            if srv.service_id != sda.service_id || !p.solicited {
                continue;
            }
            if srv.pause.as_ref().is_some_and(|pause| pause.peer != peer) {
                debug!("engine: id {} paused for another peer, ignoring {peer:02x?}", srv.id);
                continue;
            }
            let dst = if p.solicited_multicast { BCAST_ADDR } else { peer };
            let disable_events = p.disable_events;
            let frame = build_sdf(&SdfSpec {
                subtype: SdfType::Publish,
                service_id: srv.service_id,
                instance_id: srv.id,
                requestor_instance_id: sda.instance_id,
                proto_type: srv.proto_type,
                ssi: srv.ssi.as_deref(),
                elems: srv.elems.as_deref(),
                with_sdea: true,
                fsd_required: p.fsd,
                fsd_with_gas: p.fsd_gas,
            });
            srv.pause = Some(PauseState {
                until: now + self.cfg.pause_timeout_ms,
                peer,
                peer_instance_id: sda.instance_id,
            });
            srv.last_followup = Some(now);
            let tx_freq = if freq > 0 { freq } else { srv.cur_freq(&self.cfg) };
            let ok = self
                .radio
                .transmit(&mut *self.events, tx_freq, self.cfg.tx_wait_min_ms, dst, self.addr, BCAST_ADDR, &frame);
            if ok && !disable_events {
                self.events.replied(srv.id, peer, sda.instance_id, sda.proto_type, &sda.ssi);
            }
        }
    }

    fn rx_peer_followup(&mut self, now: u64, peer: MacAddr, sda: &PeerSda) {
        for slot in 0..MAX_SERVICES {
            let Some(srv) = self.services[slot].as_mut() else { continue };
            if srv.service_id != sda.service_id {
                continue;
            }
            // A Follow-up addresses exactly one local instance.
            if sda.requestor_instance_id != srv.id {
                continue;
            }
            srv.last_followup = Some(now);
            if !sda.ssi.is_empty() {
                self.events.receive(srv.id, sda.instance_id, &sda.ssi, peer);
            }
        }
    }

    // Registry plumbing.

    fn alloc_slot(&mut self) -> Result<usize, UsdError> {
        if self.num_services >= MAX_SERVICES {
            return Err(UsdError::RegistryFull);
        }
        for i in 0..MAX_SERVICES {
            let slot = (self.id_cursor + i) % MAX_SERVICES;
            if self.services[slot].is_none() {
                self.id_cursor = (slot + 1) % MAX_SERVICES;
                return Ok(slot);
            }
        }
        Err(UsdError::RegistryFull)
    }

    fn slot_of(&self, id: u8) -> Option<usize> {
        let slot = (id as usize).checked_sub(1)?;
        match self.services.get(slot)? {
            Some(srv) if srv.id == id => Some(slot),
            _ => None,
        }
    }

    fn remove_slot(&mut self, slot: usize, reason: TerminateReason) {
        if let Some(srv) = self.services[slot].take() {
            self.num_services -= 1;
            debug!("engine: removing '{}' id {} ({reason:?})", srv.name, srv.id);
            match srv.role {
                ServiceRole::Publish(_) => self.events.publish_terminated(srv.id, reason),
                ServiceRole::Subscribe(_) => self.events.subscribe_terminated(srv.id, reason),
            }
        }
    }

    fn arm(&mut self, t: u64) {
        self.timer = Some(self.timer.map_or(t, |cur| cur.min(t)));
    }

    fn arm_immediate(&mut self) {
        self.timer = Some(0);
    }
}

fn merge(next: &mut Option<u64>, t: u64) {
    *next = Some(next.map_or(t, |cur| cur.min(t)));
}
