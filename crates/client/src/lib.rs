//! DCF client SDK.
//!
//! [`DcfClient`] ties a transport (the default gRPC network channel or a
//! loaded plugin) to the redundancy engine and exposes the send, receive
//! and peer-health operations. [`CommandInterface`] is the command surface
//! used by the `dcf` binary.

pub mod client;
pub mod control;
pub mod interface;

pub use client::{ClientStatus, DcfClient, ReceivedMessage, SendOutcome};
pub use control::ControlCommand;
pub use interface::{render_error, Command, CommandInterface, CommandOutput};
