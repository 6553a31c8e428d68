//! Application layer: live state stores, the SDK command dispatcher, and the
//! background schedule services.

pub mod dispatch;
pub mod services;
pub mod store;
