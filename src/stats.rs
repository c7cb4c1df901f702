use std::net::SocketAddr;
use crate::p2p::ConnState;

// Window over which transfer rates are smoothed.
const RATE_WINDOW_SECS: f64 = 20.0;

// Rolling transfer rate: bytes are accumulated between ticks and folded
// into an exponentially weighted average over roughly a 20 second window.
#[derive(Debug, Default, Clone, Copy)]
pub struct RateCounter {
    total: u64,
    round: u64,
    rate: f64,
    peak: f64,
}

impl RateCounter {

    pub fn add(&mut self, n: u64) {
        self.total += n;
        self.round += n;
    }

    // Fold the bytes seen since the last tick into the average. `dt` is
    // the elapsed time in seconds since that tick.
    pub fn tick(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let instantaneous = self.round as f64 / dt;
        let alpha = (dt / RATE_WINDOW_SECS).min(1.0);
        self.rate = self.rate * (1.0 - alpha) + instantaneous * alpha;
        self.round = 0;
        if self.rate > self.peak {
            self.peak = self.rate;
        }
    }

    // Smoothed bytes per second.
    pub fn rate(&self) -> u64 {
        self.rate as u64
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn peak(&self) -> u64 {
        self.peak as u64
    }
}

impl std::ops::AddAssign<u64> for RateCounter {
    fn add_assign(&mut self, n: u64) {
        self.add(n);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThroughputStats {

    pub up: RateCounter,

    pub down: RateCounter,

}

impl ThroughputStats {
    pub fn tick(&mut self, dt: f64) {
        self.up.tick(dt);
        self.down.tick(dt);
    }
}

// Snapshot of one peer, refreshed each tick into TorrentStats.
#[derive(Debug, Clone, Copy)]
pub struct PeerStats {

    pub address: SocketAddr,

    pub state: ConnState,

    // Choke and interest bits, ours then theirs.
    pub choked: bool,

    pub interested: bool,

    pub peer_choking: bool,

    pub peer_interested: bool,

    pub drate: u64,

    pub urate: u64,

    pub downloaded: u64,

    pub uploaded: u64,

    // Pieces the peer advertises.
    pub num_pieces: usize,

}

#[derive(Debug, Default)]
pub struct TorrentStats {

    pub num_pieces: usize,

    pub num_complete: usize,

    // Pieces with at least one block requested or received.
    pub num_partial: usize,

    pub drate: u64,

    pub urate: u64,

    // Refilled each tick. Cleared rather than reallocated, so its capacity
    // only ever grows.
    pub peers: Vec<PeerStats>,

}

impl TorrentStats {
    pub fn is_seed(&self) -> bool {
        self.num_complete == self.num_pieces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_converges() {
        let mut counter = RateCounter::default();
        // A steady 1000 B/s closes in on 1000 after a window's worth of ticks.
        for _ in 0..60 {
            counter.add(1000);
            counter.tick(1.0);
        }
        assert!(counter.rate() > 900, "rate was {}", counter.rate());
        assert!(counter.rate() <= 1000);
        assert_eq!(counter.total(), 60_000);
    }

    #[test]
    fn test_rate_decays_when_idle() {
        let mut counter = RateCounter::default();
        counter.add(100_000);
        counter.tick(1.0);
        let busy = counter.rate();
        for _ in 0..120 {
            counter.tick(1.0);
        }
        assert!(counter.rate() < busy / 50);
        assert_eq!(counter.peak(), busy);
    }

    #[test]
    fn test_zero_dt_ignored() {
        let mut counter = RateCounter::default();
        counter.add(500);
        counter.tick(0.0);
        assert_eq!(counter.rate(), 0);
        counter.tick(1.0);
        assert!(counter.rate() > 0);
    }
}
