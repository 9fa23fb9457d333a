//! The Attribute Protocol
//!
//! The Attribute Protocol is used to expose the attributes of a device through Bluetooth. It
//! is the base for the [Generic Attribute Profile](crate::gatt).
//!
//! This is an implementation of the Attribute Protocol as defined in the Bluetooth
//! Specification (v4.0), Vol 3, Part F.

pub mod pdu;
pub mod server;

use crate::l2cap;

/// The fixed L2CAP channel of the Attribute protocol
pub const L2CAP_CHANNEL_ID: l2cap::ChannelIdentifier =
    l2cap::ChannelIdentifier::Le(l2cap::LeUChannelIdentifier::AttributeProtocol);

/// An Attribute
///
/// Attributes are the units of addressable storage on an attribute server. Each attribute has
/// a type (a UUID labeling what it is), a handle (the unique address clients refer to it by),
/// and a value.
///
/// Whether a write from the peer succeeds is a capability decided at construction; the default
/// for the attributes of a GATT database is read only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// The attribute type
    ty: crate::UUID,

    /// The attribute handle, assigned when the attribute is pushed onto a server
    handle: Option<u16>,

    /// The attribute value
    value: Vec<u8>,

    /// Whether the peer may overwrite the value
    writable: bool,
}

impl Attribute {
    /// Create an attribute
    ///
    /// The handle is left unassigned until the attribute is pushed onto the attribute table of
    /// a server.
    pub fn new(attribute_type: crate::UUID, writable: bool, value: Vec<u8>) -> Self {
        Attribute {
            ty: attribute_type,
            handle: None,
            value,
            writable,
        }
    }

    pub fn get_type(&self) -> crate::UUID {
        self.ty
    }

    /// Get the assigned handle
    ///
    /// # Panic
    /// The attribute must have been pushed onto a server's attribute table.
    pub fn get_handle(&self) -> u16 {
        self.handle.expect("attribute handle was never assigned")
    }

    pub fn get_value(&self) -> &[u8] {
        &self.value
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Overwrite the value on behalf of the peer
    ///
    /// # Error
    /// `WriteNotPermitted` when the attribute is not writable.
    pub fn set_value(&mut self, raw: &[u8]) -> Result<(), pdu::Error> {
        if self.writable {
            self.value = raw.to_vec();
            Ok(())
        } else {
            Err(pdu::Error::WriteNotPermitted)
        }
    }

    /// Overwrite the value from within the host
    ///
    /// Used while a database is being laid out; not reachable from the peer.
    pub(crate) fn replace_value(&mut self, value: Vec<u8>) {
        self.value = value;
    }

    pub(crate) fn set_handle(&mut self, handle: u16) {
        self.handle = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UUID;

    #[test]
    fn writes_respect_the_capability_flag() {
        let mut read_only = Attribute::new(UUID::from_u16(0x2A00), false, b"name".to_vec());
        let mut writable = Attribute::new(UUID::from_u16(0xFFF1), true, vec![]);

        assert_eq!(
            Err(pdu::Error::WriteNotPermitted),
            read_only.set_value(b"other")
        );
        assert_eq!(b"name", read_only.get_value());

        assert_eq!(Ok(()), writable.set_value(&[0x01, 0x02]));
        assert_eq!(&[0x01, 0x02], writable.get_value());
    }
}
