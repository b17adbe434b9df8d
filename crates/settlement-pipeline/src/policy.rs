//! Per-network confirmation depth.

/// Depth required on Ethereum mainnet, also used for unknown networks.
pub const DEFAULT_MIN_CONFIRMATIONS: u64 = 12;

/// Minimum block confirmations before a payment on `network` is final.
pub fn min_confirmations(network: &str) -> u64 {
    match network.to_ascii_lowercase().as_str() {
        "ethereum" | "mainnet" => DEFAULT_MIN_CONFIRMATIONS,
        "polygon" => 128,
        "bsc" => 15,
        "arbitrum" | "optimism" | "base" => 10,
        "sepolia" | "holesky" => 6,
        "hardhat" | "localhost" | "anvil" => 1,
        _ => DEFAULT_MIN_CONFIRMATIONS,
    }
}
