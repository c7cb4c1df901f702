use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {

    #[error("client id is not set")]
    MissingClientId,

    #[error("piece length is zero but the torrent has {0} pieces")]
    ZeroPieceLength(usize),

    #[error("config says {expected} pieces but the piece db holds {actual}")]
    PieceCountMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct Config {

    // Identity of the torrent, checked against every handshake.
    pub info_hash: [u8; 20],

    // Unique 20-byte identifier for this client.
    pub client_id: [u8; 20],

    // Our own external address. Connections to it are refused.
    pub listen_address: SocketAddr,

    // Upper bound on the peer set.
    pub max_peer_connections: usize,

    // Unchoke slots handed out by the chokers.
    pub max_active_peers: usize,

    // Per-peer request pipeline depth.
    pub max_pending_requests: usize,

    pub num_pieces: usize,

    // Bytes per piece, the last piece may be shorter.
    pub piece_length: usize,

    // Where the piece db keeps its data. Advisory, the db owns storage.
    pub download_path: PathBuf,

    // Advisory cache budget for disk-backed piece dbs.
    pub max_cache_mem_bytes: usize,

    // Stop the torrent once every piece has been verified.
    pub shutdown_when_complete: bool,

}

impl Default for Config {
    fn default() -> Config {
        Config {
            info_hash: [0; 20],
            client_id: [0; 20],
            listen_address: SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 6881),
            max_peer_connections: 32,
            max_active_peers: 32,
            max_pending_requests: 10,
            num_pieces: 0,
            piece_length: 0,
            download_path: PathBuf::from("."),
            max_cache_mem_bytes: 1_000_000,
            shutdown_when_complete: false,
        }
    }
}

impl Config {

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id == [0; 20] {
            return Err(ConfigError::MissingClientId);
        }
        if self.num_pieces > 0 && self.piece_length == 0 {
            return Err(ConfigError::ZeroPieceLength(self.num_pieces));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_missing_client_id() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingClientId)));
    }

    #[test]
    fn test_zero_piece_length() {
        let config = Config {
            client_id: *b"-SW0100-123456789012",
            num_pieces: 8,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroPieceLength(8))));
    }

    #[test]
    fn test_valid_config() {
        let config = Config {
            client_id: *b"-SW0100-123456789012",
            num_pieces: 8,
            piece_length: 0x4000,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
