//! Characteristic construction

use crate::{att, UUID};

/// Characteristic Properties
///
/// These are the properties that are part of the Characteristic Declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Properties {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrite,
    ExtendedProperties,
}

impl Properties {
    fn into_val(self) -> u8 {
        match self {
            Properties::Broadcast => 1 << 0,
            Properties::Read => 1 << 1,
            Properties::WriteWithoutResponse => 1 << 2,
            Properties::Write => 1 << 3,
            Properties::Notify => 1 << 4,
            Properties::Indicate => 1 << 5,
            Properties::AuthenticatedSignedWrite => 1 << 6,
            Properties::ExtendedProperties => 1 << 7,
        }
    }

    pub(super) fn into_bit_field(properties: &[Self]) -> u8 {
        properties.iter().fold(0u8, |field, p| field | p.into_val())
    }
}

/// The declaration attribute preceding every characteristic value
///
/// Its value is `properties u8 || value_handle le16 || uuid`, where the UUID takes its
/// shortened form whenever one exists.
pub(super) struct Declaration;

impl Declaration {
    pub(super) const TYPE: UUID = UUID::from_u16(0x2803);

    pub(super) fn value_bytes(properties: &[Properties], value_handle: u16, uuid: UUID) -> Vec<u8> {
        let mut value = Vec::with_capacity(3 + 2);

        value.push(Properties::into_bit_field(properties));
        value.extend_from_slice(&value_handle.to_le_bytes());
        value.extend_from_slice(&uuid.wire_bytes());

        value
    }
}

/// A Characteristic User Description descriptor (0x2901)
pub struct UserDescription {
    value: String,
    writable: bool,
}

impl UserDescription {
    const TYPE: UUID = UUID::from_u16(0x2901);

    pub fn new<D>(description: D, writable: bool) -> Self
    where
        D: Into<String>,
    {
        UserDescription {
            value: description.into(),
            writable,
        }
    }
}

/// Values of a Client Characteristic Configuration descriptor (0x2902)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientConfiguration {
    Notification,
    Indication,
}

impl ClientConfiguration {
    const TYPE: UUID = UUID::from_u16(0x2902);

    fn into_val(self) -> u16 {
        match self {
            ClientConfiguration::Notification => 0x0001,
            ClientConfiguration::Indication => 0x0002,
        }
    }

    fn into_bit_field(configurations: &[Self]) -> u16 {
        configurations
            .iter()
            .fold(0u16, |field, c| field | c.into_val())
    }
}

/// Builder of one characteristic
///
/// Created through
/// [`CharacteristicAdder::build_characteristic`](super::CharacteristicAdder::build_characteristic).
/// The declaration, value attribute, and any requested descriptors are appended to the
/// service when [`finish_characteristic`](CharacteristicBuilder::finish_characteristic) is
/// called.
pub struct CharacteristicBuilder<'a> {
    characteristic_adder: super::CharacteristicAdder<'a>,
    properties: Vec<Properties>,
    uuid: UUID,
    value: Vec<u8>,
    writable: bool,
    user_description: Option<UserDescription>,
    client_configuration: Option<Vec<ClientConfiguration>>,
}

impl<'a> CharacteristicBuilder<'a> {
    pub(super) fn new(
        characteristic_adder: super::CharacteristicAdder<'a>,
        properties: Vec<Properties>,
        uuid: UUID,
        value: Vec<u8>,
        writable: bool,
    ) -> Self {
        CharacteristicBuilder {
            characteristic_adder,
            properties,
            uuid,
            value,
            writable,
            user_description: None,
            client_configuration: None,
        }
    }

    /// Add a `User Description` descriptor to the characteristic
    pub fn set_user_description<D>(mut self, user_description: D) -> Self
    where
        D: Into<Option<UserDescription>>,
    {
        self.user_description = user_description.into();
        self
    }

    /// Add a `Client Configuration` descriptor to the characteristic
    pub fn set_client_configuration<C>(mut self, client_configuration: C) -> Self
    where
        C: Into<Option<Vec<ClientConfiguration>>>,
    {
        self.client_configuration = client_configuration.into();
        self
    }

    /// Finish constructing the characteristic
    ///
    /// This returns the `CharacteristicAdder` that was used to make this builder.
    pub fn finish_characteristic(self) -> super::CharacteristicAdder<'a> {
        let mut adder = self.characteristic_adder;

        let attributes = &mut adder.service_builder.server_builder.attributes;

        // The value attribute is pushed right after the declaration
        let value_handle = attributes.next_handle() + 1;

        attributes.push(att::Attribute::new(
            Declaration::TYPE,
            false,
            Declaration::value_bytes(&self.properties, value_handle, self.uuid),
        ));

        let mut last_handle =
            attributes.push(att::Attribute::new(self.uuid, self.writable, self.value));

        debug_assert_eq!(value_handle, last_handle);

        if let Some(description) = self.user_description {
            last_handle = attributes.push(att::Attribute::new(
                UserDescription::TYPE,
                description.writable,
                description.value.into_bytes(),
            ));
        }

        if let Some(configurations) = self.client_configuration {
            last_handle = attributes.push(att::Attribute::new(
                ClientConfiguration::TYPE,
                true,
                ClientConfiguration::into_bit_field(&configurations)
                    .to_le_bytes()
                    .to_vec(),
            ));
        }

        adder.end_group_handle = last_handle;

        adder
    }
}
