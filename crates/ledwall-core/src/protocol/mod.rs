//! SDK command envelope shared by the controller and its clients.

pub mod envelope;
