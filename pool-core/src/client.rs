//! Per-connection session state.
//!
//! The network layer owns one [`ClientSession`] per miner connection and
//! passes it into the core by mutable reference. The core writes back the
//! per-client job attachments (extranonce1, extranonce2 seed, merkle root,
//! job message) when parameters are issued; everything else is set by the
//! network and vardiff collaborators.

/// Session state for one connected miner.
#[derive(Debug, Clone)]
pub struct ClientSession {
    /// Connection identifier assigned by the network layer.
    pub id: u64,

    /// Remote address of the miner's socket.
    pub ip: String,

    /// Local port the miner connected to.
    pub port: u16,

    /// Primary payout address. Shares without one are rejected.
    pub addr_primary: Option<String>,

    /// Auxiliary payout address for secondary reporting.
    pub addr_auxiliary: Option<String>,

    /// Difficulty currently assigned by the vardiff collaborator.
    pub difficulty: f64,

    /// Difficulty assigned before the most recent retarget, if any.
    ///
    /// Used to accept borderline shares that raced a downward retarget.
    pub previous_difficulty: Option<f64>,

    /// Assigned extranonce1, hex (8 chars). Set on first parameter request.
    pub extra_nonce1: Option<String>,

    /// Random extranonce2 seed drawn at the last parameter request.
    pub extra_nonce2_seed: Option<[u8; 6]>,

    /// Merkle root computed for this client's coinbase.
    pub merkle_root: Option<[u8; 32]>,

    /// Per-client job message (the nonce-less header digest miners hash).
    pub job_message: Option<[u8; 32]>,
}

impl ClientSession {
    /// Create a fresh session with no work attachments.
    pub fn new(id: u64, ip: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            ip: ip.into(),
            port,
            addr_primary: None,
            addr_auxiliary: None,
            difficulty: 1.0,
            previous_difficulty: None,
            extra_nonce1: None,
            extra_nonce2_seed: None,
            merkle_root: None,
            job_message: None,
        }
    }
}
