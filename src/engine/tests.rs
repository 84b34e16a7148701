#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use crate::codec::{build_sdf, parse_sdf, SdfSpec, SdfType, ServiceId};
    use crate::engine::config::EngineConfig;
    use crate::engine::events::{EngineEvents, TerminateReason};
    use crate::engine::machine::DiscoveryEngine;
    use crate::engine::service::{MacAddr, PublishConfig, SubscribeConfig, BCAST_ADDR};
    use crate::engine::UsdError;

    const ADDR_A: MacAddr = [0x02, 0, 0, 0, 0, 0xAA];
    const ADDR_B: MacAddr = [0x02, 0, 0, 0, 0, 0xBB];
    const ADDR_C: MacAddr = [0x02, 0, 0, 0, 0, 0xCC];

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Tx { freq: u32, wait_ms: u64, dst: MacAddr, frame: Vec<u8> },
        Listen { freq: u32, duration_ms: u64 },
        Discovery { id: u8, proto: u8, ssi: Vec<u8>, peer_publish_id: u8, peer: MacAddr, fsd: bool },
        Replied { id: u8, peer: MacAddr, peer_subscribe_id: u8, ssi: Vec<u8> },
        PublishTerminated { id: u8, reason: TerminateReason },
        SubscribeTerminated { id: u8, reason: TerminateReason },
        Receive { id: u8, peer_instance_id: u8, ssi: Vec<u8>, peer: MacAddr },
    }

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        fail_tx: bool,
        /// Number of listen requests to refuse before accepting.
        fail_listens: u32,
    }

    impl EngineEvents for Recorder {
        fn tx(&mut self, freq: u32, wait_ms: u64, dst: MacAddr, _src: MacAddr, _bssid: MacAddr, frame: &[u8]) -> io::Result<()> {
            if self.fail_tx {
                return Err(io::Error::other("tx refused"));
            }
            self.events.lock().unwrap().push(Event::Tx { freq, wait_ms, dst, frame: frame.to_vec() });
            Ok(())
        }

        fn listen(&mut self, freq: u32, duration_ms: u64) -> io::Result<()> {
            if self.fail_listens > 0 {
                self.fail_listens -= 1;
                return Err(io::Error::other("listen refused"));
            }
            self.events.lock().unwrap().push(Event::Listen { freq, duration_ms });
            Ok(())
        }

        fn discovery_result(&mut self, id: u8, proto: u8, ssi: &[u8], peer_publish_id: u8, peer: MacAddr, fsd: bool, _fsd_gas: bool) {
            self.events.lock().unwrap().push(Event::Discovery {
                id,
                proto,
                ssi: ssi.to_vec(),
                peer_publish_id,
                peer,
                fsd,
            });
        }

        fn replied(&mut self, id: u8, peer: MacAddr, peer_subscribe_id: u8, _proto: u8, ssi: &[u8]) {
            self.events.lock().unwrap().push(Event::Replied { id, peer, peer_subscribe_id, ssi: ssi.to_vec() });
        }

        fn publish_terminated(&mut self, id: u8, reason: TerminateReason) {
            self.events.lock().unwrap().push(Event::PublishTerminated { id, reason });
        }

        fn subscribe_terminated(&mut self, id: u8, reason: TerminateReason) {
            self.events.lock().unwrap().push(Event::SubscribeTerminated { id, reason });
        }

        fn receive(&mut self, id: u8, peer_instance_id: u8, ssi: &[u8], peer: MacAddr) {
            self.events.lock().unwrap().push(Event::Receive { id, peer_instance_id, ssi: ssi.to_vec(), peer });
        }
    }

    /// Deterministic config: dwell is exactly 500 ms.
    fn test_config() -> EngineConfig {
        EngineConfig { chan_dwell_steps: 0, ..EngineConfig::default() }
    }

    fn engine(addr: MacAddr) -> (DiscoveryEngine, Arc<Mutex<Vec<Event>>>) {
        let rec = Recorder::default();
        let log = rec.events.clone();
        (DiscoveryEngine::with_config(addr, false, Box::new(rec), test_config()), log)
    }

    fn unsolicited() -> PublishConfig {
        PublishConfig { unsolicited: true, ..PublishConfig::default() }
    }

    fn taken<T>(log: &Arc<Mutex<Vec<Event>>>, f: impl Fn(&Event) -> Option<T>) -> Vec<T> {
        log.lock().unwrap().iter().filter_map(f).collect()
    }

    fn tx_frames(log: &Arc<Mutex<Vec<Event>>>) -> Vec<(u32, u64, MacAddr, Vec<u8>)> {
        taken(log, |e| match e {
            Event::Tx { freq, wait_ms, dst, frame } => Some((*freq, *wait_ms, *dst, frame.clone())),
            _ => None,
        })
    }

    fn clear_radio(eng: &mut DiscoveryEngine, now: u64, freq: u32) {
        eng.tx_status(freq, BCAST_ADDR);
        eng.tx_wait_ended(now);
    }

    #[test]
    fn test_publish_argument_validation() {
        let (mut eng, log) = engine(ADDR_A);

        assert_eq!(
            eng.publish(0, "", 1, None, None, &unsolicited()),
            Err(UsdError::InvalidArgument("service name is empty"))
        );
        assert_eq!(
            eng.publish(0, "foo", 1, None, None, &PublishConfig::default()),
            Err(UsdError::InvalidArgument("publish needs unsolicited or solicited mode"))
        );
        assert_eq!(eng.num_services(), 0);
        assert!(log.lock().unwrap().is_empty());

        assert!(eng.publish(0, "foo", 1, None, None, &unsolicited()).is_ok());
        assert!(eng.publish(0, "bar", 1, None, None, &PublishConfig { solicited: true, ..Default::default() }).is_ok());
        assert_eq!(eng.num_services(), 2);
    }

    #[test]
    fn test_registry_capacity_is_twenty() {
        let (mut eng, log) = engine(ADDR_A);
        let names: Vec<String> = (0..20).map(|i| format!("svc{i}")).collect();
        for name in &names {
            eng.publish(0, name, 1, None, None, &unsolicited()).unwrap();
        }
        assert_eq!(eng.num_services(), 20);

        assert_eq!(eng.publish(0, "one-too-many", 1, None, None, &unsolicited()), Err(UsdError::RegistryFull));
        assert_eq!(eng.subscribe(0, "one-too-many", 1, None, None, &SubscribeConfig::default()), Err(UsdError::RegistryFull));
        assert_eq!(eng.num_services(), 20);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancel_kind_mismatch_is_noop() {
        let (mut eng, log) = engine(ADDR_A);
        let pub_id = eng.publish(0, "foo", 1, None, None, &unsolicited()).unwrap();
        let sub_id = eng.subscribe(0, "bar", 1, None, None, &SubscribeConfig::default()).unwrap();

        eng.cancel_subscribe(pub_id);
        eng.cancel_publish(sub_id);
        eng.cancel_publish(99);
        assert_eq!(eng.num_services(), 2);
        assert!(log.lock().unwrap().is_empty());

        eng.cancel_publish(pub_id);
        eng.cancel_subscribe(sub_id);
        assert_eq!(eng.num_services(), 0);
        let events = log.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Event::PublishTerminated { id: pub_id, reason: TerminateReason::UserRequest });
        assert_eq!(events[1], Event::SubscribeTerminated { id: sub_id, reason: TerminateReason::UserRequest });
    }

    #[test]
    fn test_cancel_service_dispatches_on_kind() {
        let (mut eng, log) = engine(ADDR_A);
        let pub_id = eng.publish(0, "foo", 1, None, None, &unsolicited()).unwrap();
        let sub_id = eng.subscribe(0, "bar", 1, None, None, &SubscribeConfig::default()).unwrap();

        eng.cancel_service(sub_id);
        eng.cancel_service(pub_id);
        let events = log.lock().unwrap();
        assert_eq!(events[0], Event::SubscribeTerminated { id: sub_id, reason: TerminateReason::UserRequest });
        assert_eq!(events[1], Event::PublishTerminated { id: pub_id, reason: TerminateReason::UserRequest });
    }

    #[test]
    fn test_id_reuse_only_after_cancel() {
        let (mut eng, _log) = engine(ADDR_A);
        let a = eng.publish(0, "a", 1, None, None, &unsolicited()).unwrap();
        let b = eng.publish(0, "b", 1, None, None, &unsolicited()).unwrap();
        assert_ne!(a, b);

        eng.cancel_publish(a);
        // The allocation cursor moves round-robin; the freed id is not
        // handed out while later slots are free.
        let c = eng.publish(0, "c", 1, None, None, &unsolicited()).unwrap();
        assert_ne!(c, b);
        assert_ne!(c, a);
    }

    #[test]
    fn test_first_tick_broadcasts_one_publish_sdf() {
        let (mut eng, log) = engine(ADDR_A);
        eng.publish(0, "foo", 3, Some(b"hello"), None, &unsolicited()).unwrap();
        assert_eq!(eng.next_deadline(), Some(0));

        eng.tick(0);
        let txs = tx_frames(&log);
        assert_eq!(txs.len(), 1);
        let (freq, wait_ms, dst, frame) = &txs[0];
        assert_eq!(*freq, 2437);
        assert_eq!(*wait_ms, 100);
        assert_eq!(*dst, BCAST_ADDR);

        let sdas = parse_sdf(frame).unwrap();
        assert_eq!(sdas.len(), 1);
        assert_eq!(sdas[0].subtype, SdfType::Publish);
        assert_eq!(sdas[0].service_id, ServiceId::from_name("foo"));
        assert_eq!(sdas[0].proto_type, 3);
        assert_eq!(sdas[0].ssi, b"hello");
    }

    #[test]
    fn test_one_multicast_per_tick_engine_wide() {
        let (mut eng, log) = engine(ADDR_A);
        eng.publish(0, "foo", 1, None, None, &unsolicited()).unwrap();
        eng.publish(0, "bar", 1, None, None, &unsolicited()).unwrap();

        eng.tick(0);
        assert_eq!(tx_frames(&log).len(), 1);

        // The radio is still held; another tick sends nothing.
        eng.tick(1);
        assert_eq!(tx_frames(&log).len(), 1);

        // Completion notifications free the radio and re-arm the timer.
        clear_radio(&mut eng, 2, 2437);
        assert!(eng.next_deadline().is_some());
        eng.tick(2);
        assert_eq!(tx_frames(&log).len(), 2);
    }

    #[test]
    fn test_blocked_send_keeps_timer_armed() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = SubscribeConfig { active: true, ..Default::default() };
        eng.subscribe(0, "foo", 1, Some(b"q"), None, &cfg).unwrap();

        // First query goes out; the radio keeps holding the channel.
        eng.tick(0);
        assert_eq!(tx_frames(&log).len(), 1);

        // The next query comes due while the radio is busy: nothing is sent,
        // but the scheduler must arm a retry on its own.
        assert_eq!(eng.tick(1000), Some(1100));
        clear_radio(&mut eng, 1100, 2437);
        eng.tick(1100);
        assert_eq!(tx_frames(&log).len(), 2);
    }

    #[test]
    fn test_external_listen_window_does_not_block_engine() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = SubscribeConfig { active: true, ..Default::default() };
        eng.subscribe(0, "foo", 1, Some(b"q"), None, &cfg).unwrap();

        // Another user of the same radio opens a listen window we never
        // requested. It must not gate engine work.
        eng.listen_started(5745, 1000);
        eng.tick(0);
        assert_eq!(tx_frames(&log).len(), 1);

        // Nor may its end be the only thing that re-arms the scheduler.
        eng.listen_ended(10, 5745);
        assert!(eng.next_deadline().is_some());
    }

    #[test]
    fn test_non_fsd_publish_expires_one_grace_after_multicast() {
        let (mut eng, log) = engine(ADDR_A);
        let id = eng.publish(0, "foo", 1, Some(b"hello"), None, &unsolicited()).unwrap();

        eng.tick(0);
        assert_eq!(tx_frames(&log).len(), 1);

        // Just under the grace: still alive.
        eng.tick(999);
        assert!(taken(&log, |e| matches!(e, Event::PublishTerminated { .. }).then_some(())).is_empty());

        eng.tick(1000);
        let terms = taken(&log, |e| match e {
            Event::PublishTerminated { id, reason } => Some((*id, *reason)),
            _ => None,
        });
        assert_eq!(terms, vec![(id, TerminateReason::Timeout)]);
        assert_eq!(eng.num_services(), 0);

        // Exactly once; further ticks do nothing.
        assert_eq!(eng.tick(2000), None);
        assert_eq!(tx_frames(&log).len(), 1);
    }

    #[test]
    fn test_fsd_publish_stays_alive_on_followup_traffic() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig { unsolicited: true, fsd: true, ..Default::default() };
        let id = eng.publish(0, "foo", 1, None, None, &cfg).unwrap();

        eng.tick(0);
        clear_radio(&mut eng, 1, 2437);

        eng.transmit(500, id, Some(b"fsd"), None, ADDR_B, 7).unwrap();
        eng.tick(1000);
        assert_eq!(eng.num_services(), 1);

        eng.transmit(1400, id, Some(b"fsd"), None, ADDR_B, 7).unwrap();
        eng.tick(2000);
        assert_eq!(eng.num_services(), 1);

        // Follow-up traffic idle for a full grace period.
        eng.tick(2400);
        let terms = taken(&log, |e| match e {
            Event::PublishTerminated { id, reason } => Some((*id, *reason)),
            _ => None,
        });
        assert_eq!(terms, vec![(id, TerminateReason::Timeout)]);
    }

    #[test]
    fn test_explicit_ttl_expiry() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig { unsolicited: true, ttl_ms: 300, ..Default::default() };
        let id = eng.publish(0, "foo", 1, None, None, &cfg).unwrap();

        eng.tick(0);
        eng.tick(299);
        assert_eq!(eng.num_services(), 1);
        eng.tick(300);
        assert_eq!(eng.num_services(), 0);
        let terms = taken(&log, |e| match e {
            Event::PublishTerminated { id, reason } => Some((*id, *reason)),
            _ => None,
        });
        assert_eq!(terms, vec![(id, TerminateReason::Timeout)]);
    }

    #[test]
    fn test_update_publish_replaces_ssi_only() {
        let (mut eng, _log) = engine(ADDR_A);
        let cfg = PublishConfig { unsolicited: true, ttl_ms: 300, ..Default::default() };
        let id = eng.publish(0, "foo", 1, Some(b"v1"), None, &cfg).unwrap();
        let sub_id = eng.subscribe(0, "bar", 1, None, None, &SubscribeConfig::default()).unwrap();

        assert_eq!(eng.update_publish(99, Some(b"x")), Err(UsdError::UnknownHandle(99)));
        assert_eq!(
            eng.update_publish(sub_id, Some(b"x")),
            Err(UsdError::InvalidArgument("handle is not a publish instance"))
        );

        // Repeated updates with identical bytes never extend the ttl.
        for _ in 0..3 {
            eng.update_publish(id, Some(b"v2")).unwrap();
        }
        eng.tick(0);
        eng.tick(300);
        assert_eq!(eng.num_services(), 1); // only the subscribe is left
    }

    #[test]
    fn test_updated_ssi_is_broadcast() {
        let (mut eng, log) = engine(ADDR_A);
        let id = eng.publish(0, "foo", 1, Some(b"v1"), None, &unsolicited()).unwrap();
        eng.tick(0);
        clear_radio(&mut eng, 1, 2437);

        eng.update_publish(id, Some(b"v2")).unwrap();
        eng.tick(500);
        let txs = tx_frames(&log);
        assert_eq!(txs.len(), 2);
        let sdas = parse_sdf(&txs[1].3).unwrap();
        assert_eq!(sdas[0].ssi, b"v2");
    }

    #[test]
    fn test_channel_hopping_round_robin_wraps() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig {
            unsolicited: true,
            freq_list: vec![5180, 5200, 5220],
            announcement_period_ms: 150,
            ..Default::default()
        };
        eng.publish(0, "hop", 1, None, None, &cfg).unwrap();

        // Single mode on the default frequency for the first 500 ms dwell.
        eng.tick(0);
        clear_radio(&mut eng, 1, 2437);

        // 500: flip to Multi, first list entry.
        eng.tick(500);
        clear_radio(&mut eng, 501, 5180);
        // 650/800/950: round-robin advances and wraps to index 0.
        eng.tick(650);
        clear_radio(&mut eng, 651, 5200);
        eng.tick(800);
        clear_radio(&mut eng, 801, 5220);
        eng.tick(950);

        let freqs: Vec<u32> = tx_frames(&log)
            .iter()
            .filter(|(_, _, dst, _)| *dst == BCAST_ADDR)
            .map(|(freq, ..)| *freq)
            .collect();
        assert_eq!(freqs, vec![2437, 5180, 5200, 5220, 5180]);
    }

    #[test]
    fn test_hopping_multicast_holds_medium_until_state_deadline() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig { unsolicited: true, freq_list: vec![5180], ..Default::default() };
        eng.publish(0, "hop", 1, None, None, &cfg).unwrap();

        eng.tick(0);
        let txs = tx_frames(&log);
        // 500 ms left until the next publish-state deadline.
        assert_eq!(txs[0].1, 500);
    }

    #[test]
    fn test_solicited_only_publish_requests_listen_window() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig { solicited: true, ..Default::default() };
        eng.publish(0, "quiet", 1, None, None, &cfg).unwrap();

        eng.tick(0);
        let listens = taken(&log, |e| match e {
            Event::Listen { freq, duration_ms } => Some((*freq, *duration_ms)),
            _ => None,
        });
        // Bounded by the 500 ms channel-state deadline.
        assert_eq!(listens, vec![(2437, 500)]);
        assert!(tx_frames(&log).is_empty());

        // The outstanding window suppresses further requests.
        eng.tick(10);
        assert_eq!(taken(&log, |e| matches!(e, Event::Listen { .. }).then_some(())).len(), 1);

        // Window end re-arms and allows a new request.
        eng.listen_started(2437, 500);
        eng.listen_ended(500, 2437);
        assert!(eng.next_deadline().is_some());
        eng.tick(500);
        assert_eq!(taken(&log, |e| matches!(e, Event::Listen { .. }).then_some(())).len(), 2);
    }

    #[test]
    fn test_passive_subscribe_listen_duration() {
        let (mut eng, log) = engine(ADDR_A);
        eng.subscribe(0, "foo", 1, None, None, &SubscribeConfig { freq: 5180, ..Default::default() }).unwrap();
        eng.subscribe(0, "bar", 1, None, None, &SubscribeConfig::default()).unwrap();

        eng.tick(0);
        // One listen request per tick engine-wide.
        let listens = taken(&log, |e| match e {
            Event::Listen { freq, duration_ms } => Some((*freq, *duration_ms)),
            _ => None,
        });
        assert_eq!(listens, vec![(5180, 1000)]);
    }

    #[test]
    fn test_listen_failure_terminates_with_failure() {
        let rec = Recorder { fail_listens: u32::MAX, ..Default::default() };
        let log = rec.events.clone();
        let mut eng = DiscoveryEngine::with_config(ADDR_A, false, Box::new(rec), test_config());
        let id = eng.subscribe(0, "foo", 1, None, None, &SubscribeConfig::default()).unwrap();

        eng.tick(0);
        let terms = taken(&log, |e| match e {
            Event::SubscribeTerminated { id, reason } => Some((*id, *reason)),
            _ => None,
        });
        assert_eq!(terms, vec![(id, TerminateReason::Failure)]);
        assert_eq!(eng.num_services(), 0);
    }

    #[test]
    fn test_listen_failure_moves_to_the_next_candidate() {
        let rec = Recorder { fail_listens: 1, ..Default::default() };
        let log = rec.events.clone();
        let mut eng = DiscoveryEngine::with_config(ADDR_A, false, Box::new(rec), test_config());
        let first = eng.subscribe(0, "foo", 1, None, None, &SubscribeConfig::default()).unwrap();
        let second = eng.subscribe(0, "bar", 1, None, None, &SubscribeConfig { freq: 5180, ..Default::default() }).unwrap();

        eng.tick(0);
        let terms = taken(&log, |e| match e {
            Event::SubscribeTerminated { id, reason } => Some((*id, *reason)),
            _ => None,
        });
        assert_eq!(terms, vec![(first, TerminateReason::Failure)]);

        // The scan went on and the second instance got its window.
        let listens = taken(&log, |e| match e {
            Event::Listen { freq, duration_ms } => Some((*freq, *duration_ms)),
            _ => None,
        });
        assert_eq!(listens, vec![(5180, 1000)]);

        eng.cancel_subscribe(second);
        assert_eq!(eng.num_services(), 0);
    }

    #[test]
    fn test_ap_engine_does_not_request_listen() {
        let rec = Recorder::default();
        let log = rec.events.clone();
        let mut eng = DiscoveryEngine::with_config(ADDR_A, true, Box::new(rec), test_config());
        eng.subscribe(0, "foo", 1, None, None, &SubscribeConfig::default()).unwrap();

        eng.tick(0);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(eng.num_services(), 1);
    }

    #[test]
    fn test_failed_tx_leaves_registry_intact() {
        let rec = Recorder { fail_tx: true, ..Default::default() };
        let log = rec.events.clone();
        let mut eng = DiscoveryEngine::with_config(ADDR_A, false, Box::new(rec), test_config());
        eng.publish(0, "foo", 1, None, None, &unsolicited()).unwrap();

        eng.tick(0);
        assert_eq!(eng.num_services(), 1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rx_on_empty_registry_is_noop() {
        let (mut eng, log) = engine(ADDR_A);
        eng.rx_sdf(0, ADDR_B, 2437, &[0xDE, 0xAD]);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_end_to_end_discovery() {
        // Engine A publishes "foo" unsolicited with ssi "hello".
        let (mut a, log_a) = engine(ADDR_A);
        a.publish(0, "foo", 3, Some(b"hello"), None, &unsolicited()).unwrap();
        a.tick(0);
        let frame = tx_frames(&log_a)[0].3.clone();

        // Engine B holds a passive subscribe on "foo".
        let (mut b, log_b) = engine(ADDR_B);
        let sub_id = b.subscribe(0, "foo", 3, None, None, &SubscribeConfig::default()).unwrap();
        b.rx_sdf(0, ADDR_A, 2437, &frame);

        let discoveries = taken(&log_b, |e| match e {
            Event::Discovery { id, proto, ssi, peer_publish_id, peer, fsd } => {
                Some((*id, *proto, ssi.clone(), *peer_publish_id, *peer, *fsd))
            }
            _ => None,
        });
        assert_eq!(discoveries, vec![(sub_id, 3, b"hello".to_vec(), 1, ADDR_A, false)]);

        // Passive side answers with a payload-less unicast Follow-up.
        let txs = tx_frames(&log_b);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].2, ADDR_A);
        let reply = parse_sdf(&txs[0].3).unwrap();
        assert_eq!(reply[0].subtype, SdfType::FollowUp);
        assert_eq!(reply[0].requestor_instance_id, 1);
        assert!(reply[0].ssi.is_empty());

        // Re-hearing the same publish never fires a second result.
        b.rx_sdf(10, ADDR_A, 2437, &frame);
        assert_eq!(taken(&log_b, |e| matches!(e, Event::Discovery { .. }).then_some(())).len(), 1);

        // A expires one grace period after its multicast (non-FSD).
        a.tick(1000);
        let terms = taken(&log_a, |e| match e {
            Event::PublishTerminated { reason, .. } => Some(*reason),
            _ => None,
        });
        assert_eq!(terms, vec![TerminateReason::Timeout]);
    }

    #[test]
    fn test_active_subscribe_replies_with_multicast_subscribe() {
        let (mut a, log_a) = engine(ADDR_A);
        a.publish(0, "foo", 1, None, None, &unsolicited()).unwrap();
        a.tick(0);
        let frame = tx_frames(&log_a)[0].3.clone();

        let (mut b, log_b) = engine(ADDR_B);
        b.subscribe(0, "foo", 1, Some(b"query"), None, &SubscribeConfig { active: true, ..Default::default() }).unwrap();
        b.rx_sdf(0, ADDR_A, 2437, &frame);

        let txs = tx_frames(&log_b);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].2, BCAST_ADDR);
        let reply = parse_sdf(&txs[0].3).unwrap();
        assert_eq!(reply[0].subtype, SdfType::Subscribe);
        assert_eq!(reply[0].ssi, b"query");
    }

    #[test]
    fn test_solicited_reply_and_pause_state() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig { unsolicited: true, solicited: true, ..Default::default() };
        eng.publish(0, "foo", 2, Some(b"answer"), None, &cfg).unwrap();

        let query = build_sdf(&SdfSpec {
            subtype: SdfType::Subscribe,
            service_id: ServiceId::from_name("foo"),
            instance_id: 7,
            requestor_instance_id: 0,
            proto_type: 2,
            ssi: Some(b"who-has-foo"),
            elems: None,
            with_sdea: false,
            fsd_required: false,
            fsd_with_gas: false,
        });

        eng.rx_sdf(0, ADDR_B, 2437, &query);
        let replies = taken(&log, |e| match e {
            Event::Replied { peer, peer_subscribe_id, ssi, .. } => Some((*peer, *peer_subscribe_id, ssi.clone())),
            _ => None,
        });
        assert_eq!(replies, vec![(ADDR_B, 7, b"who-has-foo".to_vec())]);

        let txs = tx_frames(&log);
        assert_eq!(txs[0].2, ADDR_B); // unicast reply
        let sdas = parse_sdf(&txs[0].3).unwrap();
        assert_eq!(sdas[0].subtype, SdfType::Publish);
        assert_eq!(sdas[0].requestor_instance_id, 7);
        assert_eq!(sdas[0].ssi, b"answer");

        // Paused on ADDR_B: a different peer gets no reply.
        eng.rx_sdf(10, ADDR_C, 2437, &query);
        assert_eq!(taken(&log, |e| matches!(e, Event::Replied { .. }).then_some(())).len(), 1);

        // The paused peer still gets replies.
        eng.rx_sdf(20, ADDR_B, 2437, &query);
        assert_eq!(taken(&log, |e| matches!(e, Event::Replied { .. }).then_some(())).len(), 2);

        // Pause expires after its hard cap; other peers are served again.
        eng.tick(20 + 60_000);
        eng.rx_sdf(20 + 60_001, ADDR_C, 2437, &query);
        assert_eq!(taken(&log, |e| matches!(e, Event::Replied { .. }).then_some(())).len(), 3);
    }

    #[test]
    fn test_followup_transmit_pauses_publisher_on_peer() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig { unsolicited: true, solicited: true, ..Default::default() };
        let id = eng.publish(0, "foo", 2, Some(b"answer"), None, &cfg).unwrap();

        // An app-level Follow-up reply engages the publisher with that peer
        // the same way a solicited reply does.
        eng.transmit(0, id, Some(b"direct"), None, ADDR_B, 4).unwrap();

        let query = build_sdf(&SdfSpec {
            subtype: SdfType::Subscribe,
            service_id: ServiceId::from_name("foo"),
            instance_id: 7,
            requestor_instance_id: 0,
            proto_type: 2,
            ssi: None,
            elems: None,
            with_sdea: false,
            fsd_required: false,
            fsd_with_gas: false,
        });
        eng.rx_sdf(10, ADDR_C, 2437, &query);
        assert!(taken(&log, |e| matches!(e, Event::Replied { .. }).then_some(())).is_empty());

        eng.rx_sdf(20, ADDR_B, 2437, &query);
        let replies = taken(&log, |e| match e {
            Event::Replied { peer, .. } => Some(*peer),
            _ => None,
        });
        assert_eq!(replies, vec![ADDR_B]);
    }

    #[test]
    fn test_disable_events_suppresses_replied() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig { solicited: true, disable_events: true, ..Default::default() };
        eng.publish(0, "foo", 2, None, None, &cfg).unwrap();

        let query = build_sdf(&SdfSpec {
            subtype: SdfType::Subscribe,
            service_id: ServiceId::from_name("foo"),
            instance_id: 4,
            requestor_instance_id: 0,
            proto_type: 2,
            ssi: None,
            elems: None,
            with_sdea: false,
            fsd_required: false,
            fsd_with_gas: false,
        });
        eng.rx_sdf(0, ADDR_B, 2437, &query);

        // The reply frame still goes out, the callback does not.
        assert_eq!(tx_frames(&log).len(), 1);
        assert!(taken(&log, |e| matches!(e, Event::Replied { .. }).then_some(())).is_empty());
    }

    #[test]
    fn test_followup_receive_and_keepalive() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = PublishConfig { unsolicited: true, fsd: true, ..Default::default() };
        let id = eng.publish(0, "foo", 2, None, None, &cfg).unwrap();
        eng.tick(0);

        let followup = |ssi: Option<&[u8]>| {
            build_sdf(&SdfSpec {
                subtype: SdfType::FollowUp,
                service_id: ServiceId::from_name("foo"),
                instance_id: 9,
                requestor_instance_id: id,
                proto_type: 2,
                ssi,
                elems: None,
                with_sdea: false,
                fsd_required: false,
                fsd_with_gas: false,
            })
        };

        eng.rx_sdf(500, ADDR_B, 2437, &followup(Some(b"data")));
        let recvs = taken(&log, |e| match e {
            Event::Receive { id, peer_instance_id, ssi, peer } => Some((*id, *peer_instance_id, ssi.clone(), *peer)),
            _ => None,
        });
        assert_eq!(recvs, vec![(id, 9, b"data".to_vec(), ADDR_B)]);

        // A payload-less Follow-up fires no callback but still counts as
        // FSD keep-alive traffic.
        eng.rx_sdf(1400, ADDR_B, 2437, &followup(None));
        assert_eq!(taken(&log, |e| matches!(e, Event::Receive { .. }).then_some(())).len(), 1);
        eng.tick(2000);
        assert_eq!(eng.num_services(), 1);
        eng.tick(2400);
        assert_eq!(eng.num_services(), 0);
    }

    #[test]
    fn test_followup_for_other_instance_id_is_ignored() {
        let (mut eng, log) = engine(ADDR_A);
        let id = eng.publish(0, "foo", 2, None, None, &unsolicited()).unwrap();

        let followup = |requestor_instance_id| {
            build_sdf(&SdfSpec {
                subtype: SdfType::FollowUp,
                service_id: ServiceId::from_name("foo"),
                instance_id: 9,
                requestor_instance_id,
                proto_type: 2,
                ssi: Some(b"misdirected"),
                elems: None,
                with_sdea: false,
                fsd_required: false,
                fsd_with_gas: false,
            })
        };
        eng.rx_sdf(0, ADDR_B, 2437, &followup(id + 1));
        // An unset requestor id addresses no local instance either.
        eng.rx_sdf(0, ADDR_B, 2437, &followup(0));
        assert!(taken(&log, |e| matches!(e, Event::Receive { .. }).then_some(())).is_empty());
    }

    #[test]
    fn test_transmit_validates_handle() {
        let (mut eng, log) = engine(ADDR_A);
        assert_eq!(
            eng.transmit(0, 5, Some(b"x"), None, ADDR_B, 1),
            Err(UsdError::UnknownHandle(5))
        );
        assert!(log.lock().unwrap().is_empty());

        let id = eng.publish(0, "foo", 2, None, None, &unsolicited()).unwrap();
        eng.transmit(0, id, Some(b"x"), None, ADDR_B, 3).unwrap();
        let txs = tx_frames(&log);
        assert_eq!(txs[0].2, ADDR_B);
        let sdas = parse_sdf(&txs[0].3).unwrap();
        assert_eq!(sdas[0].subtype, SdfType::FollowUp);
        assert_eq!(sdas[0].requestor_instance_id, 3);
        assert_eq!(sdas[0].ssi, b"x");
    }

    #[test]
    fn test_flush_terminates_everything() {
        let (mut eng, log) = engine(ADDR_A);
        eng.publish(0, "foo", 1, None, None, &unsolicited()).unwrap();
        eng.subscribe(0, "bar", 1, None, None, &SubscribeConfig::default()).unwrap();
        eng.tick(0);

        eng.flush();
        assert_eq!(eng.num_services(), 0);
        assert_eq!(eng.next_deadline(), None);
        let terms: Vec<TerminateReason> = taken(&log, |e| match e {
            Event::PublishTerminated { reason, .. } | Event::SubscribeTerminated { reason, .. } => Some(*reason),
            _ => None,
        });
        assert_eq!(terms, vec![TerminateReason::UserRequest, TerminateReason::UserRequest]);
    }

    #[test]
    fn test_active_subscribe_broadcasts_queries_periodically() {
        let (mut eng, log) = engine(ADDR_A);
        let cfg = SubscribeConfig { active: true, ttl_ms: 5000, query_period_ms: 2000, ..Default::default() };
        eng.subscribe(0, "foo", 1, None, None, &cfg).unwrap();

        eng.tick(0);
        clear_radio(&mut eng, 1, 2437);
        // The completion notifier re-arms immediately; the follow-up tick
        // finds nothing due and settles on the next query deadline.
        assert_eq!(eng.tick(1), Some(2000));
        eng.tick(2000);

        let txs = tx_frames(&log);
        assert_eq!(txs.len(), 2);
        for (.., frame) in &txs {
            assert_eq!(parse_sdf(frame).unwrap()[0].subtype, SdfType::Subscribe);
        }
    }

    #[test]
    fn test_engine_config_from_partial_json() {
        let cfg: EngineConfig = serde_json::from_str(r#"{ "announce_period_ms": 250 }"#).unwrap();
        assert_eq!(cfg.announce_period_ms, 250);
        assert_eq!(cfg.query_period_ms, 1000);
        assert_eq!(cfg.pause_timeout_ms, 60_000);
        assert_eq!(cfg.default_freq, 2437);
    }
}
