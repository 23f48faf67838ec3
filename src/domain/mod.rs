//! Domain layer - Core value types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles, plus the small value types
//! shared by the controller and the provisioner.

pub mod bindings;
pub mod clock;
pub mod ports;
pub mod quantity;

pub use bindings::{decode_bindings, encode_bindings, ResolvedBinding};
pub use clock::{Clock, ClockRef, ManualClock, TokioClock};
pub use ports::*;
pub use quantity::parse_quantity;
