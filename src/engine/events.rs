use std::io;

use crate::engine::service::MacAddr;

/// Why an instance was removed from the registry. Delivered only through
/// the `*_terminated` callbacks, never as an error return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    /// Explicit ttl ran out, or the implicit expiry rules fired.
    Timeout,
    /// `cancel_*`, `flush` or engine teardown.
    UserRequest,
    /// The radio refused an operation the instance cannot live without.
    Failure,
}

/// Callback table to the embedder; the entire boundary between the engine
/// and the radio/OS layer.
///
/// Every callback fires synchronously from inside an engine call, at most
/// once per logical event. Implementations must not re-enter the engine;
/// radio completions are reported later through the engine's notifier
/// methods (`tx_status`, `tx_wait_ended`, `listen_started`, `listen_ended`).
pub trait EngineEvents {
    /// Asynchronous transmit request for one action frame. `wait_ms` tells
    /// the radio how long to hold the channel after the frame goes out.
    fn tx(
        &mut self,
        freq: u32,
        wait_ms: u64,
        dst: MacAddr,
        src: MacAddr,
        bssid: MacAddr,
        frame: &[u8],
    ) -> io::Result<()>;

    /// Asynchronous off-channel listen-window request.
    fn listen(&mut self, freq: u32, duration_ms: u64) -> io::Result<()>;

    /// First matching peer Publish seen by a Subscribe instance. Fires at
    /// most once per instance.
    fn discovery_result(
        &mut self,
        subscribe_id: u8,
        proto_type: u8,
        ssi: &[u8],
        peer_publish_id: u8,
        peer: MacAddr,
        fsd: bool,
        fsd_gas: bool,
    );

    /// A Publish instance answered a peer Subscribe.
    fn replied(&mut self, publish_id: u8, peer: MacAddr, peer_subscribe_id: u8, proto_type: u8, ssi: &[u8]);

    fn publish_terminated(&mut self, publish_id: u8, reason: TerminateReason);

    fn subscribe_terminated(&mut self, subscribe_id: u8, reason: TerminateReason);

    /// Payload-carrying Follow-up received for a local instance.
    fn receive(&mut self, id: u8, peer_instance_id: u8, ssi: &[u8], peer: MacAddr);
}
