//! LE Controller commands
//!
//! Commands in the LE Controller opcode group (OGF 0x08), split by the controller role they
//! configure the way the Bluetooth Specification splits them: `transmitter` for advertising,
//! `receiver` for scanning, and `mandatory` for what every LE controller implements.

pub mod common;
pub mod mandatory;
pub mod receiver;
pub mod transmitter;
