//! Network selection and the post-merge fork schedule.

use revm::primitives::hardfork::SpecId;

/// Networks the engine knows a fork schedule for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NetworkId {
    /// Ethereum mainnet.
    #[default]
    Mainnet,
    /// The Sepolia testnet.
    Sepolia,
    /// The Holesky testnet.
    Holesky,
    /// The Hoodi testnet.
    Hoodi,
}

/// Chain id plus the timestamp-scheduled forks of one network.
///
/// The engine serves post-merge headers, so the schedule starts at Paris and
/// every later fork activates by timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Shanghai activation timestamp.
    pub shanghai_time: u64,
    /// Cancun activation timestamp.
    pub cancun_time: u64,
    /// Prague activation timestamp.
    pub prague_time: u64,
}

impl ChainSpec {
    /// Mainnet fork schedule.
    pub const MAINNET: Self = Self {
        chain_id: 1,
        shanghai_time: 1_681_338_455,
        cancun_time: 1_710_338_135,
        prague_time: 1_746_612_311,
    };

    /// Sepolia fork schedule.
    pub const SEPOLIA: Self = Self {
        chain_id: 11_155_111,
        shanghai_time: 1_677_557_088,
        cancun_time: 1_706_655_072,
        prague_time: 1_741_159_776,
    };

    /// Holesky fork schedule.
    pub const HOLESKY: Self = Self {
        chain_id: 17_000,
        shanghai_time: 1_696_000_704,
        cancun_time: 1_707_305_664,
        prague_time: 1_740_434_112,
    };

    /// Hoodi fork schedule. Hoodi launched post-Cancun.
    pub const HOODI: Self = Self {
        chain_id: 560_048,
        shanghai_time: 0,
        cancun_time: 0,
        prague_time: 1_742_999_832,
    };

    /// Resolves the active fork for a block with the given timestamp.
    pub const fn spec_id_at(&self, timestamp: u64) -> SpecId {
        if timestamp >= self.prague_time {
            SpecId::PRAGUE
        } else if timestamp >= self.cancun_time {
            SpecId::CANCUN
        } else if timestamp >= self.shanghai_time {
            SpecId::SHANGHAI
        } else {
            SpecId::MERGE
        }
    }
}

impl From<NetworkId> for ChainSpec {
    fn from(network: NetworkId) -> Self {
        match network {
            NetworkId::Mainnet => Self::MAINNET,
            NetworkId::Sepolia => Self::SEPOLIA,
            NetworkId::Holesky => Self::HOLESKY,
            NetworkId::Hoodi => Self::HOODI,
        }
    }
}
