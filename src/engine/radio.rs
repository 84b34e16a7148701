use std::io;

use log::{debug, warn};

use crate::engine::events::EngineEvents;
use crate::engine::service::MacAddr;

/// Tracks the engine's in-flight radio work: at most one outstanding
/// transmit-and-wait and one outstanding listen request engine-wide.
///
/// Completions are matched by frequency value, never by service identity,
/// so a notification arriving after the originating instance is gone stays
/// safe. A frequency of 0 means idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct RadioState {
    /// Listen window requested by this engine.
    pub listen_freq: u32,
    /// Listen window owned by another user of the same radio; informational.
    pub ext_listen_freq: u32,
    /// Transmit awaiting its status report.
    pub tx_wait_status_freq: u32,
    /// Transmit still holding the channel.
    pub tx_wait_end_freq: u32,
}

impl RadioState {
    /// No engine-owned transmit or listen outstanding. External listen
    /// windows are tracked but never gate engine work; their completion is
    /// not guaranteed to be reported.
    pub fn idle(&self) -> bool {
        self.listen_freq == 0 && self.tx_wait_status_freq == 0 && self.tx_wait_end_freq == 0
    }

    /// Hands one frame to the embedder and records the wait state.
    /// A refused transmit leaves the trackers untouched.
    pub fn transmit(
        &mut self,
        events: &mut dyn EngineEvents,
        freq: u32,
        wait_ms: u64,
        dst: MacAddr,
        src: MacAddr,
        bssid: MacAddr,
        frame: &[u8],
    ) -> bool {
        match events.tx(freq, wait_ms, dst, src, bssid, frame) {
            Ok(()) => {
                self.tx_wait_status_freq = freq;
                if wait_ms > 0 {
                    self.tx_wait_end_freq = freq;
                }
                true
            }
            Err(e) => {
                warn!("radio: tx on {freq} MHz refused: {e}");
                false
            }
        }
    }

    /// Requests one listen window and remembers it so no second concurrent
    /// request is issued.
    pub fn request_listen(
        &mut self,
        events: &mut dyn EngineEvents,
        freq: u32,
        duration_ms: u64,
    ) -> io::Result<()> {
        events.listen(freq, duration_ms)?;
        self.listen_freq = freq;
        Ok(())
    }

    pub fn on_tx_status(&mut self, freq: u32, dst: MacAddr) {
        debug!("radio: tx status on {freq} MHz for {dst:02x?}");
        if self.tx_wait_status_freq == freq {
            self.tx_wait_status_freq = 0;
        }
    }

    pub fn on_tx_wait_ended(&mut self) {
        self.tx_wait_end_freq = 0;
    }

    /// Returns true when the window is our own request (as opposed to an
    /// external user of the same radio).
    pub fn on_listen_started(&mut self, freq: u32, duration_ms: u64) -> bool {
        debug!("radio: listen started on {freq} MHz for {duration_ms} ms");
        if freq == self.listen_freq {
            true
        } else {
            self.ext_listen_freq = freq;
            false
        }
    }

    /// Returns true when the ended window was our own, which means the
    /// scheduler should run again.
    pub fn on_listen_ended(&mut self, freq: u32) -> bool {
        if freq == self.ext_listen_freq {
            self.ext_listen_freq = 0;
        }
        if freq == self.listen_freq {
            self.listen_freq = 0;
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        *self = RadioState::default();
    }
}
