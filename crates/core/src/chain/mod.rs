//! Blockchain RPC clients for both chain families

pub mod evm;
pub mod poll;
pub mod stellar;

pub use evm::{EthersRpc, EvmConnector, EvmRpc, HttpEvmConnector};
pub use poll::poll_until;
pub use stellar::{HttpStellarConnector, SorobanClient, StellarConnector, StellarRpc};
