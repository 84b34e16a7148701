//! Two in-memory discovery engines over a simulated radio.
//!
//! Engine "alpha" publishes `org.example.printer`, engine "beta" holds a
//! passive subscribe on the same name. The main loop plays radio: it carries
//! frames between the engines, reports transmit and listen completions and
//! advances a virtual millisecond clock along the engines' own deadlines.
//!
//! Run with `cargo run --bin usd_demo` (set `RUST_LOG=debug` for the engine
//! internals).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::{info, LevelFilter};

use nan_usd::{
    logging, DiscoveryEngine, EngineEvents, MacAddr, PublishConfig, SubscribeConfig,
    TerminateReason, UsdError, BCAST_ADDR,
};

const ADDR_ALPHA: MacAddr = [0x02, 0, 0, 0, 0, 0x0A];
const ADDR_BETA: MacAddr = [0x02, 0, 0, 0, 0, 0x0B];

enum RadioOp {
    Tx { src: MacAddr, dst: MacAddr, freq: u32, wait_ms: u64, frame: Vec<u8> },
    Listen { src: MacAddr, freq: u32, duration_ms: u64 },
}

/// Radio completion due at a later point on the virtual clock.
enum Done {
    TxWait { addr: MacAddr },
    Listen { addr: MacAddr, freq: u32 },
}

/// Callback table of one engine: logs the discovery events and queues the
/// radio work for the main loop.
struct SimRadio {
    name: &'static str,
    ops: Rc<RefCell<VecDeque<RadioOp>>>,
}

impl EngineEvents for SimRadio {
    fn tx(
        &mut self,
        freq: u32,
        wait_ms: u64,
        dst: MacAddr,
        src: MacAddr,
        _bssid: MacAddr,
        frame: &[u8],
    ) -> std::io::Result<()> {
        info!("{}: tx {} bytes to {dst:02x?} on {freq} MHz", self.name, frame.len());
        self.ops.borrow_mut().push_back(RadioOp::Tx {
            src,
            dst,
            freq,
            wait_ms,
            frame: frame.to_vec(),
        });
        Ok(())
    }

    fn listen(&mut self, freq: u32, duration_ms: u64) -> std::io::Result<()> {
        info!("{}: listen on {freq} MHz for {duration_ms} ms", self.name);
        self.ops.borrow_mut().push_back(RadioOp::Listen {
            src: if self.name == "alpha" { ADDR_ALPHA } else { ADDR_BETA },
            freq,
            duration_ms,
        });
        Ok(())
    }

    fn discovery_result(
        &mut self,
        subscribe_id: u8,
        proto_type: u8,
        ssi: &[u8],
        peer_publish_id: u8,
        peer: MacAddr,
        _fsd: bool,
        _fsd_gas: bool,
    ) {
        info!(
            "{}: id {subscribe_id} discovered peer publish {peer_publish_id} at {peer:02x?} \
             (proto {proto_type}, ssi {:?})",
            self.name,
            String::from_utf8_lossy(ssi)
        );
    }

    fn replied(&mut self, publish_id: u8, peer: MacAddr, peer_subscribe_id: u8, _proto: u8, _ssi: &[u8]) {
        info!("{}: id {publish_id} answered subscribe {peer_subscribe_id} from {peer:02x?}", self.name);
    }

    fn publish_terminated(&mut self, publish_id: u8, reason: TerminateReason) {
        info!("{}: publish {publish_id} terminated: {reason:?}", self.name);
    }

    fn subscribe_terminated(&mut self, subscribe_id: u8, reason: TerminateReason) {
        info!("{}: subscribe {subscribe_id} terminated: {reason:?}", self.name);
    }

    fn receive(&mut self, id: u8, peer_instance_id: u8, ssi: &[u8], peer: MacAddr) {
        info!(
            "{}: id {id} got follow-up from instance {peer_instance_id} at {peer:02x?}: {:?}",
            self.name,
            String::from_utf8_lossy(ssi)
        );
    }
}

fn main() -> Result<(), UsdError> {
    logging::init(LevelFilter::Info);

    let ops: Rc<RefCell<VecDeque<RadioOp>>> = Rc::new(RefCell::new(VecDeque::new()));
    let mut alpha = DiscoveryEngine::new(
        ADDR_ALPHA,
        false,
        Box::new(SimRadio { name: "alpha", ops: ops.clone() }),
    );
    let mut beta = DiscoveryEngine::new(
        ADDR_BETA,
        false,
        Box::new(SimRadio { name: "beta", ops: ops.clone() }),
    );

    let publish = PublishConfig { unsolicited: true, solicited: true, ..Default::default() };
    alpha.publish(0, "org.example.printer", 2, Some(b"ready"), None, &publish)?;
    beta.subscribe(0, "org.example.printer", 2, None, None, &SubscribeConfig::default())?;

    let mut pending: Vec<(u64, Done)> = Vec::new();
    let mut now = 0u64;

    // Discrete-event loop: jump the clock to the earliest engine deadline or
    // radio completion, run whatever is due, carry the queued frames.
    for _ in 0..500 {
        let next = alpha
            .next_deadline()
            .into_iter()
            .chain(beta.next_deadline())
            .chain(pending.iter().map(|(t, _)| *t))
            .min();
        let Some(t) = next else { break };
        now = t.max(now);

        let due: Vec<(u64, Done)> = {
            let mut i = 0;
            let mut out = Vec::new();
            while i < pending.len() {
                if pending[i].0 <= now {
                    out.push(pending.remove(i));
                } else {
                    i += 1;
                }
            }
            out
        };
        for (_, done) in due {
            match done {
                Done::TxWait { addr } => engine_for(addr, &mut alpha, &mut beta).tx_wait_ended(now),
                Done::Listen { addr, freq } => {
                    engine_for(addr, &mut alpha, &mut beta).listen_ended(now, freq)
                }
            }
        }

        if alpha.next_deadline().is_some_and(|d| d <= now) {
            alpha.tick(now);
        }
        if beta.next_deadline().is_some_and(|d| d <= now) {
            beta.tick(now);
        }

        // Carry frames and report completions; replies may queue more work.
        loop {
            let op = ops.borrow_mut().pop_front();
            let Some(op) = op else { break };
            match op {
                RadioOp::Tx { src, dst, freq, wait_ms, frame } => {
                    let peer = if src == ADDR_ALPHA { ADDR_BETA } else { ADDR_ALPHA };
                    if dst == BCAST_ADDR || dst == peer {
                        engine_for(peer, &mut alpha, &mut beta).rx_sdf(now, src, freq, &frame);
                    }
                    let sender = engine_for(src, &mut alpha, &mut beta);
                    sender.tx_status(freq, dst);
                    if wait_ms > 0 {
                        pending.push((now + wait_ms, Done::TxWait { addr: src }));
                    } else {
                        sender.tx_wait_ended(now);
                    }
                }
                RadioOp::Listen { src, freq, duration_ms } => {
                    engine_for(src, &mut alpha, &mut beta).listen_started(freq, duration_ms);
                    pending.push((now + duration_ms, Done::Listen { addr: src, freq }));
                }
            }
        }
    }

    info!("simulation idle at t={now} ms");
    Ok(())
}

fn engine_for<'e>(
    addr: MacAddr,
    alpha: &'e mut DiscoveryEngine,
    beta: &'e mut DiscoveryEngine,
) -> &'e mut DiscoveryEngine {
    if addr == ADDR_ALPHA { alpha } else { beta }
}
