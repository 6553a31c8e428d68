//! Program data model and XML parser.

pub mod model;
pub mod parser;
