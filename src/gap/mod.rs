//! The Generic Access Profile
//!
//! What this library needs from GAP is the advertising data format: length prefixed AD
//! structures packed into the 31 byte advertising and scan response payloads.

pub mod advertise;
