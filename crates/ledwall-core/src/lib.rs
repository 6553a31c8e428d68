//! # ledwall-core
//!
//! Shared library for the LED wall controller containing the program data
//! model, the program XML parser, the SDK command envelope, and the hardware
//! configuration types.
//!
//! This crate is pure domain + protocol: it has no dependencies on sockets,
//! the async runtime, or any rendering backend.  Both the controller binary
//! and its integration tests build on it.
//!
//! - **`program`** – What gets displayed.  A `Program` is an ordered set of
//!   `Scene`s, each scene an ordered set of rectangular `Area`s, each area
//!   bound to exactly one `Content` variant (image, text, clock, video sink,
//!   sensor widget, …).  Programs arrive as XML over the SDK protocol and are
//!   validated structurally before they are admitted.
//!
//! - **`protocol`** – The XML request/response envelope spoken over TCP:
//!   `<sdk guid="G"><in method="M">…</in></sdk>` in,
//!   `<sdk guid="G"><out method="M" result="kSuccess">…</out></sdk>` back.
//!
//! - **`hwconfig`** – The electrical/timing configuration of the panel:
//!   send/receive card topology, scan mode, color depth, gamma table, and
//!   the brightness policy.  Mutated only through validated SDK commands.

pub mod hwconfig;
pub mod program;
pub mod protocol;

pub use hwconfig::{BrightnessPolicy, HardwareConfig, HwConfigError, ReceiveCard, SendCard};
pub use program::model::{
    Area, Content, Program, ProgramId, Rect, Rotation, Scene, Schedule, Transition,
    TransitionKind, ValidationError,
};
pub use program::parser::{parse_program_file, parse_program_xml, ParseError};
pub use protocol::envelope::{ResultCode, SdkRequest, SdkResponse};
