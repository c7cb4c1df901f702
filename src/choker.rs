use rand::Rng;
use crate::transport::NetHandle;

// Snapshot of one peer handed to the chokers each scheduling round.
#[derive(Debug, Clone, Copy)]
pub struct PeerRank {

    pub peer: NetHandle,

    pub drate: u64,

    pub urate: u64,

    // The peer wants pieces from us.
    pub interested: bool,

    // We are currently choking it.
    pub choked: bool,

}

// What the manager should do with its peers after a scheduling round.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Rechoke {

    pub unchoke: Vec<NetHandle>,

    pub choke: Vec<NetHandle>,

}

// Rank by `rate` descending and grant `slots` regular slots; the optimistic
// peer keeps its slot regardless of rate.
fn rank(
    peers: &[PeerRank],
    slots: usize,
    optimistic: Option<NetHandle>,
    rate: impl Fn(&PeerRank) -> u64,
) -> Rechoke {
    let mut ranked: Vec<PeerRank> = peers.to_vec();
    ranked.sort_by(|a, b| rate(b).cmp(&rate(a)).then(a.peer.cmp(&b.peer)));

    let mut unchoke: Vec<NetHandle> = ranked.iter().take(slots).map(|p| p.peer).collect();
    if let Some(op) = optimistic {
        if peers.iter().any(|p| p.peer == op) && !unchoke.contains(&op) {
            unchoke.push(op);
        }
    }
    let choke = peers
        .iter()
        .map(|p| p.peer)
        .filter(|peer| !unchoke.contains(peer))
        .collect();
    Rechoke { unchoke, choke }
}

// Pick the next optimistic peer uniformly from the choked, interested ones.
fn pick_optimistic(peers: &[PeerRank], rng: &mut impl Rng) -> Option<NetHandle> {
    let candidates: Vec<NetHandle> = peers
        .iter()
        .filter(|p| p.choked && p.interested)
        .map(|p| p.peer)
        .collect();
    if candidates.is_empty() {
        return None;
    }
    Some(candidates[rng.gen_range(0..candidates.len())])
}

// Download discipline: reciprocate the peers feeding us fastest, plus one
// optimistic slot to discover better ones.
#[derive(Debug)]
pub struct LeechingChoker {
    max_active: usize,
    optimistic: Option<NetHandle>,
}

impl LeechingChoker {

    pub fn new(max_active: usize) -> LeechingChoker {
        LeechingChoker { max_active, optimistic: None }
    }

    pub fn rechoke(&mut self, peers: &[PeerRank]) -> Rechoke {
        if let Some(op) = self.optimistic {
            if !peers.iter().any(|p| p.peer == op) {
                self.optimistic = None;
            }
        }
        rank(peers, self.max_active.saturating_sub(1), self.optimistic, |p| p.drate)
    }

    // Rotate the optimistic slot. Keeps the previous pick when no peer
    // qualifies.
    pub fn rotate_optimistic(&mut self, peers: &[PeerRank], rng: &mut impl Rng) -> Option<NetHandle> {
        let pick = pick_optimistic(peers, rng)?;
        self.optimistic = Some(pick);
        Some(pick)
    }
}

// Seeding discipline: once complete, feed the peers draining us fastest.
#[derive(Debug)]
pub struct SeedingChoker {
    max_active: usize,
    optimistic: Option<NetHandle>,
}

impl SeedingChoker {

    pub fn new(max_active: usize) -> SeedingChoker {
        SeedingChoker { max_active, optimistic: None }
    }

    pub fn rechoke(&mut self, peers: &[PeerRank]) -> Rechoke {
        if let Some(op) = self.optimistic {
            if !peers.iter().any(|p| p.peer == op) {
                self.optimistic = None;
            }
        }
        rank(peers, self.max_active.saturating_sub(1), self.optimistic, |p| p.urate)
    }

    pub fn rotate_optimistic(&mut self, peers: &[PeerRank], rng: &mut impl Rng) -> Option<NetHandle> {
        let pick = pick_optimistic(peers, rng)?;
        self.optimistic = Some(pick);
        Some(pick)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn peer(n: u32, drate: u64, urate: u64, interested: bool, choked: bool) -> PeerRank {
        PeerRank { peer: NetHandle(n), drate, urate, interested, choked }
    }

    #[test]
    fn test_leeching_ranks_by_download_rate() {
        let mut choker = LeechingChoker::new(3);
        let peers = [
            peer(1, 10, 0, true, true),
            peer(2, 50, 0, true, true),
            peer(3, 30, 0, true, true),
            peer(4, 5, 0, true, true),
        ];
        let decision = choker.rechoke(&peers);
        assert_eq!(decision.unchoke, vec![NetHandle(2), NetHandle(3)]);
        assert_eq!(decision.choke, vec![NetHandle(1), NetHandle(4)]);
    }

    #[test]
    fn test_optimistic_survives_rechoke() {
        let mut choker = LeechingChoker::new(2);
        let peers = [
            peer(1, 100, 0, true, false),
            peer(2, 0, 0, true, true),
            peer(3, 0, 0, true, true),
        ];

        let mut rng = StdRng::seed_from_u64(7);
        let pick = choker.rotate_optimistic(&peers, &mut rng).unwrap();
        assert!(pick == NetHandle(2) || pick == NetHandle(3));

        let decision = choker.rechoke(&peers);
        // One rate slot plus the optimistic slot.
        assert!(decision.unchoke.contains(&NetHandle(1)));
        assert!(decision.unchoke.contains(&pick));
        assert_eq!(decision.unchoke.len(), 2);
    }

    #[test]
    fn test_optimistic_ignores_unchoked_and_uninterested() {
        let peers = [
            peer(1, 0, 0, true, false),
            peer(2, 0, 0, false, true),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pick_optimistic(&peers, &mut rng), None);
    }

    #[test]
    fn test_seeding_ranks_by_upload_rate() {
        let mut choker = SeedingChoker::new(2);
        let peers = [
            peer(1, 0, 10, true, true),
            peer(2, 0, 90, true, true),
        ];
        let decision = choker.rechoke(&peers);
        assert_eq!(decision.unchoke, vec![NetHandle(2)]);
        assert_eq!(decision.choke, vec![NetHandle(1)]);
    }

    #[test]
    fn test_departed_optimistic_cleared() {
        let mut choker = LeechingChoker::new(2);
        let peers = [peer(1, 0, 0, true, true)];
        let mut rng = StdRng::seed_from_u64(1);
        choker.rotate_optimistic(&peers, &mut rng);

        // Peer 1 left; rechoke over an empty swarm must not resurrect it.
        let decision = choker.rechoke(&[]);
        assert_eq!(decision, Rechoke::default());
        assert!(choker.optimistic.is_none());
    }
}
