//! The Generic Attribute Profile
//!
//! GATT gives structure to the flat attribute table of the [ATT server](crate::att::server):
//! services group into contiguous handle ranges, each containing characteristic declarations,
//! their values, and descriptors. This module has the builders producing such a table and the
//! [`Server`] answering requests over the ATT channel, including the two requests that need
//! knowledge of the service grouping.

pub mod characteristic;

use crate::att;
use crate::l2cap;
use crate::UUID;
use core::convert::TryFrom;

struct ServiceDefinition;

impl ServiceDefinition {
    /// The primary service UUID
    const PRIMARY_SERVICE_TYPE: UUID = UUID::from_u16(0x2800);

    /// The secondary service UUID
    const SECONDARY_SERVICE_TYPE: UUID = UUID::from_u16(0x2801);
}

struct ServiceInclude;

impl ServiceInclude {
    const TYPE: UUID = UUID::from_u16(0x2802);

    /// An include definition is `service le16 || end_group le16 [|| uuid16 le]`, the UUID
    /// only present when the included service has a shortened one.
    fn value_bytes(service: &Service) -> Vec<u8> {
        let mut value = Vec::with_capacity(6);

        value.extend_from_slice(&service.service_handle.to_le_bytes());
        value.extend_from_slice(&service.end_group_handle.to_le_bytes());

        if let Ok(short) = TryFrom::try_from(service.service_type) {
            value.extend_from_slice(&u16::to_le_bytes(short));
        }

        value
    }
}

/// The handle range and type of a built service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Service {
    /// The handle of the service definition attribute
    service_handle: u16,
    /// The handle of the last attribute in the service
    end_group_handle: u16,
    /// The UUID of the service, which is also the value of the service definition
    service_type: UUID,
}

impl Service {
    pub fn get_service_handle(&self) -> u16 {
        self.service_handle
    }

    pub fn get_end_group_handle(&self) -> u16 {
        self.end_group_handle
    }

    pub fn get_type(&self) -> UUID {
        self.service_type
    }
}

/// Constructor of one service
///
/// Made with [`ServerBuilder::new_service`]; the service definition attribute is pushed
/// immediately, includes and characteristics follow through the adders.
pub struct ServiceBuilder<'a> {
    service_type: UUID,
    handle: u16,
    server_builder: &'a mut ServerBuilder,
}

impl<'a> ServiceBuilder<'a> {
    fn new(server_builder: &'a mut ServerBuilder, service_type: UUID, is_primary: bool) -> Self {
        let definition_type = if is_primary {
            ServiceDefinition::PRIMARY_SERVICE_TYPE
        } else {
            ServiceDefinition::SECONDARY_SERVICE_TYPE
        };

        let handle = server_builder.attributes.push(att::Attribute::new(
            definition_type,
            false,
            service_type.wire_bytes(),
        ));

        ServiceBuilder {
            service_type,
            handle,
            server_builder,
        }
    }

    /// Start including other services
    ///
    /// Include definitions precede the characteristics of a service, so this must be used
    /// before any characteristic is added.
    pub fn into_includes_adder(self) -> IncludesAdder<'a> {
        IncludesAdder::new(self)
    }

    /// Start adding characteristics
    ///
    /// Use this when the service includes no other services.
    pub fn into_characteristics_adder(self) -> CharacteristicAdder<'a> {
        let handle = self.handle;

        CharacteristicAdder::new(self, handle)
    }

    /// Create a service with nothing but its definition
    pub fn make_empty(self) -> Service {
        let handle = self.handle;

        self.make_service(handle)
    }

    fn make_service(self, end_group_handle: u16) -> Service {
        let service = Service {
            service_handle: self.handle,
            end_group_handle,
            service_type: self.service_type,
        };

        self.server_builder.services.push(service);

        service
    }
}

/// Adds include definitions to a service
pub struct IncludesAdder<'a> {
    service_builder: ServiceBuilder<'a>,
    end_group_handle: u16,
}

impl<'a> IncludesAdder<'a> {
    fn new(service_builder: ServiceBuilder<'a>) -> Self {
        let handle = service_builder.handle;

        IncludesAdder {
            service_builder,
            end_group_handle: handle,
        }
    }

    /// Add an include definition for a previously built service
    pub fn include_service(mut self, service: &Service) -> Self {
        let attribute = att::Attribute::new(
            ServiceInclude::TYPE,
            false,
            ServiceInclude::value_bytes(service),
        );

        self.end_group_handle = self.service_builder.server_builder.attributes.push(attribute);

        self
    }

    /// Convert to a `CharacteristicAdder`
    pub fn into_characteristics_adder(self) -> CharacteristicAdder<'a> {
        CharacteristicAdder::new(self.service_builder, self.end_group_handle)
    }

    /// Finish a service that has only includes
    pub fn finish_service(self) -> Service {
        let end = self.end_group_handle;

        self.service_builder.make_service(end)
    }
}

/// Adds characteristics to a service
pub struct CharacteristicAdder<'a> {
    service_builder: ServiceBuilder<'a>,
    end_group_handle: u16,
}

impl<'a> CharacteristicAdder<'a> {
    fn new(service_builder: ServiceBuilder<'a>, end_group_handle: u16) -> Self {
        CharacteristicAdder {
            service_builder,
            end_group_handle,
        }
    }

    /// Start building the next characteristic
    pub fn build_characteristic(
        self,
        properties: Vec<characteristic::Properties>,
        uuid: UUID,
        value: Vec<u8>,
        writable: bool,
    ) -> characteristic::CharacteristicBuilder<'a> {
        characteristic::CharacteristicBuilder::new(self, properties, uuid, value, writable)
    }

    /// Finish the service
    pub fn finish_service(self) -> Service {
        let end = self.end_group_handle;

        self.service_builder.make_service(end)
    }
}

/// Constructor of a GATT server
pub struct ServerBuilder {
    services: Vec<Service>,
    attributes: att::server::ServerAttributes,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder::new()
    }
}

impl ServerBuilder {
    /// Construct an empty `ServerBuilder`
    pub fn new() -> Self {
        ServerBuilder {
            services: Vec::new(),
            attributes: att::server::ServerAttributes::new(),
        }
    }

    /// Add the GAP service
    ///
    /// Every GATT server is supposed to carry the GAP service with the *Device Name* and
    /// *Appearance* characteristics, both readable and static.
    pub fn add_gap_service(&mut self, device_name: &str, appearance: u16) {
        use self::characteristic::Properties;

        self.new_service(UUID::from_u16(0x1800), true)
            .into_characteristics_adder()
            .build_characteristic(
                vec![Properties::Read],
                UUID::from_u16(0x2A00),
                device_name.as_bytes().to_vec(),
                false,
            )
            .finish_characteristic()
            .build_characteristic(
                vec![Properties::Read],
                UUID::from_u16(0x2A01),
                appearance.to_le_bytes().to_vec(),
                false,
            )
            .finish_characteristic()
            .finish_service();
    }

    /// Create a service constructor
    pub fn new_service(&mut self, service_type: UUID, is_primary: bool) -> ServiceBuilder<'_> {
        ServiceBuilder::new(self, service_type, is_primary)
    }

    /// Construct the server from everything built so far
    pub fn make_server<M>(self, max_mtu: M) -> Server
    where
        M: Into<Option<u16>>,
    {
        Server {
            services: self.services,
            server: att::server::Server::new(self.attributes, max_mtu),
        }
    }
}

/// A GATT server
///
/// Wraps the [attribute server](att::server::Server) with the list of built services, taking
/// over the requests whose semantics involve service grouping: Read By Group Type and Find By
/// Type Value. Everything else is passed down.
pub struct Server {
    services: Vec<Service>,
    server: att::server::Server,
}

impl Server {
    /// Process one request PDU, producing the response to send back
    pub fn process_request(&mut self, pdu: &[u8]) -> Option<Vec<u8>> {
        match pdu.first().map(|op| att::pdu::ClientPduName::try_from(*op)) {
            Some(Ok(att::pdu::ClientPduName::ReadByGroupTypeRequest)) => {
                Some(self.process_read_by_group_type(pdu))
            }
            Some(Ok(att::pdu::ClientPduName::FindByTypeValueRequest)) => {
                Some(self.process_find_by_type_value(pdu))
            }
            _ => self.server.process_request(pdu),
        }
    }

    fn definition_type_of(&self, service: &Service) -> UUID {
        self.server
            .get_attributes()
            .get(service.service_handle)
            .map(|a| a.get_type())
            .unwrap_or(UUID::from_u128(0))
    }

    fn process_read_by_group_type(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = att::pdu::ClientPduName::ReadByGroupTypeRequest.into();

        if pdu.len() != 7 && pdu.len() != 21 {
            return att::pdu::error_response(opcode, 0, att::pdu::Error::InvalidPDU);
        }

        let request = match att::pdu::TypeRequest::try_from(&pdu[1..]) {
            Ok(request) => request,
            Err(e) => return att::pdu::error_response(opcode, 0, e),
        };

        let range = request.handle_range;

        if !range.is_valid() {
            return att::pdu::error_response(
                opcode,
                range.starting_handle,
                att::pdu::Error::InvalidHandle,
            );
        }

        // Only the two service definition types group attributes
        if request.attr_type != ServiceDefinition::PRIMARY_SERVICE_TYPE
            && request.attr_type != ServiceDefinition::SECONDARY_SERVICE_TYPE
        {
            return att::pdu::error_response(
                opcode,
                range.starting_handle,
                att::pdu::Error::UnsupportedGroupType,
            );
        }

        let mut records = att::pdu::RecordList::new(self.server.get_mtu() as usize - 2);

        for service in self.services.iter() {
            if self.definition_type_of(service) != request.attr_type {
                continue;
            }

            // The service's handle range has to overlap the requested range
            if service.service_handle > range.ending_handle
                || service.end_group_handle < range.starting_handle
            {
                continue;
            }

            let mut record = Vec::with_capacity(6);
            record.extend_from_slice(&service.service_handle.to_le_bytes());
            record.extend_from_slice(&service.end_group_handle.to_le_bytes());
            record.extend_from_slice(&service.service_type.wire_bytes());

            if !records.try_push(&record) {
                break;
            }
        }

        if records.is_empty() {
            return att::pdu::error_response(
                opcode,
                range.starting_handle,
                att::pdu::Error::AttributeNotFound,
            );
        }

        let record_length = records.get_record_length().unwrap_or(0);

        let mut response = Vec::with_capacity(2);
        response.push(att::pdu::ServerPduName::ReadByGroupTypeResponse.into());
        response.push(record_length as u8);
        response.extend_from_slice(&records.into_inner());

        response
    }

    fn process_find_by_type_value(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = att::pdu::ClientPduName::FindByTypeValueRequest.into();

        if pdu.len() < 7 {
            return att::pdu::error_response(opcode, 0, att::pdu::Error::InvalidPDU);
        }

        let range = match att::pdu::HandleRange::try_from(&pdu[1..5]) {
            Ok(range) => range,
            Err(e) => return att::pdu::error_response(opcode, 0, e),
        };

        if !range.is_valid() {
            return att::pdu::error_response(
                opcode,
                range.starting_handle,
                att::pdu::Error::InvalidHandle,
            );
        }

        // The attribute type of this request is always a 16 bit UUID
        let attr_type = UUID::from_u16(<u16>::from_le_bytes([pdu[5], pdu[6]]));
        let attr_value = &pdu[7..];

        let mut records = att::pdu::RecordList::new(self.server.get_mtu() as usize - 1);

        for service in self.services.iter() {
            if self.definition_type_of(service) != attr_type {
                continue;
            }

            if service.service_handle < range.starting_handle
                || service.service_handle > range.ending_handle
            {
                continue;
            }

            let matches = self
                .server
                .get_attributes()
                .get(service.service_handle)
                .map(|a| a.get_value() == attr_value)
                .unwrap_or(false);

            if !matches {
                continue;
            }

            let mut record = Vec::with_capacity(4);
            record.extend_from_slice(&service.service_handle.to_le_bytes());
            record.extend_from_slice(&service.end_group_handle.to_le_bytes());

            if !records.try_push(&record) {
                break;
            }
        }

        if records.is_empty() {
            return att::pdu::error_response(
                opcode,
                range.starting_handle,
                att::pdu::Error::AttributeNotFound,
            );
        }

        let mut response = Vec::with_capacity(1);
        response.push(att::pdu::ServerPduName::FindByTypeValueResponse.into());
        response.extend_from_slice(&records.into_inner());

        response
    }
}

impl AsRef<att::server::Server> for Server {
    fn as_ref(&self) -> &att::server::Server {
        &self.server
    }
}

impl AsMut<att::server::Server> for Server {
    fn as_mut(&mut self) -> &mut att::server::Server {
        &mut self.server
    }
}

impl core::ops::Deref for Server {
    type Target = att::server::Server;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl core::ops::DerefMut for Server {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut()
    }
}

impl l2cap::ChannelHandler for Server {
    /// One ATT request in, at most one response out
    fn on_pdu(&mut self, link: &mut l2cap::Link<'_>, channel_id: l2cap::ChannelIdentifier, pdu: &[u8]) {
        if let Some(response) = self.process_request(pdu) {
            link.send(channel_id, &response);
        }
    }
}
