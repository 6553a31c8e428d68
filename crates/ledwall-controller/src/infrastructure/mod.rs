//! Infrastructure: card transport, SDK network server, and storage.

pub mod network;
pub mod storage;
pub mod transport;
