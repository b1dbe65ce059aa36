//! The minimal JSON-RPC surface served by the emulated node once it reaches the serving phase.
//!
//! Only a closed set of methods is known: `rpc_modules`, `eth_blockNumber` and
//! `eth_getBlockByNumber`. Block heights are synthesized from the time elapsed since the server
//! started, one block per second.

mod clock;
mod methods;
mod server;

pub use clock::*;
pub use methods::*;
pub use server::*;
