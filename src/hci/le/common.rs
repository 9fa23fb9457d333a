//! Types used by more than one LE command

/// The address type the controller uses for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnAddressType {
    PublicDeviceAddress,
    RandomDeviceAddress,
}

impl OwnAddressType {
    pub(crate) fn into_val(self) -> u8 {
        match self {
            OwnAddressType::PublicDeviceAddress => 0x00,
            OwnAddressType::RandomDeviceAddress => 0x01,
        }
    }
}

impl Default for OwnAddressType {
    fn default() -> Self {
        OwnAddressType::PublicDeviceAddress
    }
}
