//! The Attribute server
//!
//! The server owns the attribute table and answers the flat table requests, the ones that
//! need no knowledge of how attributes group into services. The service aware requests (Read
//! By Group Type, Find By Type Value) are layered on top by [`gatt::Server`](crate::gatt::Server).
//!
//! Requests are processed strictly serially: one request in, at most one response out. A
//! protocol violation by the peer turns into an Error Response carrying the originating
//! opcode; nothing the peer sends can panic the server.

use super::pdu;
use super::Attribute;
use crate::l2cap::MIN_ATT_MTU_LE;
use core::convert::TryFrom;
use std::collections::BTreeMap;

macro_rules! log_debug {
    ( $arg1:expr $(, $args:expr)* ) => { log::debug!(concat!("(ATT) ", $arg1) $(, $args)*) }
}

/// How many handles may hold queued prepare writes at once
pub const MAX_QUEUED_WRITE_HANDLES: usize = 4;

/// The longest value assemblable from prepare writes to one handle
pub const MAX_QUEUED_WRITE_LENGTH: usize = 1024;

/// The constructor of attributes on an attribute server
///
/// Attributes pushed here get the next free handle, starting from 0x0001. Handle 0x0000 is
/// reserved and addresses a placeholder attribute that no request can touch.
pub struct ServerAttributes {
    attributes: Vec<Attribute>,
}

impl Default for ServerAttributes {
    fn default() -> Self {
        ServerAttributes::new()
    }
}

impl ServerAttributes {
    pub fn new() -> Self {
        let mut reserved = Attribute::new(crate::UUID::from_u128(0), false, Vec::new());
        reserved.set_handle(0);

        ServerAttributes {
            attributes: vec![reserved],
        }
    }

    /// Push an attribute, returning the handle it was assigned
    ///
    /// # Panic
    /// The attribute table is limited to 0xFFFF entries.
    pub fn push(&mut self, mut attribute: Attribute) -> u16 {
        let handle = TryFrom::try_from(self.attributes.len())
            .expect("exceeded the attribute handle limit");

        attribute.set_handle(handle);

        log::trace!(
            "adding attribute with type '{}' at handle {:#06x}",
            attribute.get_type(),
            handle
        );

        self.attributes.push(attribute);

        handle
    }

    /// The handle assigned to the next pushed attribute
    pub fn next_handle(&self) -> u16 {
        self.attributes.len() as u16
    }

    /// The highest assigned handle
    pub fn last_handle(&self) -> u16 {
        (self.attributes.len() - 1) as u16
    }

    /// Get an attribute, excluding the reserved handle zero
    pub fn get(&self, handle: u16) -> Option<&Attribute> {
        if handle == 0 {
            None
        } else {
            self.attributes.get(handle as usize)
        }
    }

    pub fn get_mut(&mut self, handle: u16) -> Option<&mut Attribute> {
        if handle == 0 {
            None
        } else {
            self.attributes.get_mut(handle as usize)
        }
    }

    pub(crate) fn iter_range(
        &self,
        range: &pdu::HandleRange,
    ) -> impl Iterator<Item = &Attribute> {
        let start = range.starting_handle as usize;
        let stop = core::cmp::min(range.ending_handle as usize, self.attributes.len() - 1);

        self.attributes[..=stop].iter().skip(start)
    }
}

/// An Attribute server
///
/// One server serves one client over one L2CAP channel; the requests of a connection are
/// answered in arrival order.
pub struct Server {
    /// The largest MTU this server accepts in an MTU exchange
    max_mtu: u16,
    /// The negotiated MTU, None until the client exchanges one
    set_mtu: Option<u16>,
    attributes: ServerAttributes,
    /// Pending prepare writes, keyed by handle
    queued_writes: BTreeMap<u16, Vec<u8>>,
}

impl Server {
    /// Create a new Server
    ///
    /// The `max_mtu` bounds what an MTU exchange can negotiate. It cannot go below the
    /// protocol minimum of 23; passing None leaves the server at the minimum.
    pub fn new<M>(attributes: ServerAttributes, max_mtu: M) -> Self
    where
        M: Into<Option<u16>>,
    {
        let max_mtu = match max_mtu.into() {
            Some(mtu) => core::cmp::max(mtu, MIN_ATT_MTU_LE),
            None => MIN_ATT_MTU_LE,
        };

        Server {
            max_mtu,
            set_mtu: None,
            attributes,
            queued_writes: BTreeMap::new(),
        }
    }

    /// Get the maximum transfer unit of the connection
    ///
    /// This is the current MTU as agreed upon by the client and server.
    pub fn get_mtu(&self) -> u16 {
        match self.set_mtu {
            Some(mtu) => mtu,
            None => MIN_ATT_MTU_LE,
        }
    }

    pub fn get_attributes(&self) -> &ServerAttributes {
        &self.attributes
    }

    pub fn get_attributes_mut(&mut self) -> &mut ServerAttributes {
        &mut self.attributes
    }

    /// Process one request PDU, producing the response to send back
    ///
    /// None is returned when the request produces no response, which is the case only for the
    /// Write Command (its errors are swallowed).
    pub fn process_request(&mut self, pdu: &[u8]) -> Option<Vec<u8>> {
        let opcode = match pdu.first() {
            Some(opcode) => *opcode,
            None => {
                log_debug!("dropping empty request PDU");
                return None;
            }
        };

        let name = match pdu::ClientPduName::try_from(opcode) {
            Ok(name) => name,
            Err(_) => {
                log_debug!("rejecting unknown opcode {:#04x}", opcode);
                return Some(pdu::error_response(
                    opcode,
                    0,
                    pdu::Error::RequestNotSupported,
                ));
            }
        };

        log_debug!("processing '{}'", name);

        match name {
            pdu::ClientPduName::ExchangeMtuRequest => Some(self.process_exchange_mtu(pdu)),
            pdu::ClientPduName::FindInformationRequest => {
                Some(self.process_find_information(pdu))
            }
            pdu::ClientPduName::ReadByTypeRequest => Some(self.process_read_by_type(pdu)),
            pdu::ClientPduName::ReadRequest => Some(self.process_read(pdu)),
            pdu::ClientPduName::ReadBlobRequest => Some(self.process_read_blob(pdu)),
            pdu::ClientPduName::ReadMultipleRequest => Some(self.process_read_multiple(pdu)),
            pdu::ClientPduName::WriteRequest => Some(self.process_write_request(pdu)),
            pdu::ClientPduName::WriteCommand => {
                self.process_write_command(pdu);
                None
            }
            pdu::ClientPduName::PrepareWriteRequest => Some(self.process_prepare_write(pdu)),
            pdu::ClientPduName::ExecuteWriteRequest => Some(self.process_execute_write(pdu)),
            pdu::ClientPduName::FindByTypeValueRequest
            | pdu::ClientPduName::ReadByGroupTypeRequest => {
                // Answered by the GATT layer; a bare attribute server does not group
                Some(pdu::error_response(
                    opcode,
                    0,
                    pdu::Error::RequestNotSupported,
                ))
            }
        }
    }

    fn process_exchange_mtu(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = pdu::ClientPduName::ExchangeMtuRequest.into();

        if pdu.len() != 3 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        let client_mtu = <u16>::from_le_bytes([pdu[1], pdu[2]]);

        // Clamp the negotiated value into [minimum, server maximum]
        let mtu = core::cmp::max(
            core::cmp::min(client_mtu, self.max_mtu),
            MIN_ATT_MTU_LE,
        );

        self.set_mtu = Some(mtu);

        log_debug!("MTU now {}", mtu);

        let mut response = Vec::with_capacity(3);
        response.push(pdu::ServerPduName::ExchangeMtuResponse.into());
        response.extend_from_slice(&mtu.to_le_bytes());

        response
    }

    fn process_find_information(&mut self, pdu: &[u8]) -> Vec<u8> {
        use core::convert::TryInto;

        let opcode = pdu::ClientPduName::FindInformationRequest.into();

        if pdu.len() != 5 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        let range = match pdu::HandleRange::try_from(&pdu[1..]) {
            Ok(range) => range,
            Err(e) => return pdu::error_response(opcode, 0, e),
        };

        if !range.is_valid() {
            return pdu::error_response(opcode, range.starting_handle, pdu::Error::InvalidHandle);
        }

        let mut in_range = self.attributes.iter_range(&range);

        // The format of every record follows from whether the type of the first attribute in
        // range has a shortened form.
        let first = match in_range.next() {
            Some(attribute) => attribute,
            None => {
                return pdu::error_response(
                    opcode,
                    range.starting_handle,
                    pdu::Error::AttributeNotFound,
                )
            }
        };

        let sixteen_bit = first.get_type().is_16_bit();

        let mut records = pdu::RecordList::new(self.get_mtu() as usize - 2);

        for attribute in core::iter::once(first).chain(in_range) {
            let mut record = attribute.get_handle().to_le_bytes().to_vec();

            if sixteen_bit {
                match TryInto::<u16>::try_into(attribute.get_type()) {
                    Ok(short) => record.extend_from_slice(&short.to_le_bytes()),
                    // A full sized type ends a batch of 16 bit records
                    Err(_) => break,
                }
            } else {
                record.extend_from_slice(&u128::from(attribute.get_type()).to_le_bytes());
            }

            if !records.try_push(&record) {
                break;
            }
        }

        let mut response = Vec::with_capacity(2);
        response.push(pdu::ServerPduName::FindInformationResponse.into());
        response.push(if sixteen_bit { 0x01 } else { 0x02 });
        response.extend_from_slice(&records.into_inner());

        response
    }

    fn process_read_by_type(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = pdu::ClientPduName::ReadByTypeRequest.into();

        if pdu.len() != 7 && pdu.len() != 21 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        let request = match pdu::TypeRequest::try_from(&pdu[1..]) {
            Ok(request) => request,
            Err(e) => return pdu::error_response(opcode, 0, e),
        };

        let range = request.handle_range;

        if !range.is_valid() {
            return pdu::error_response(opcode, range.starting_handle, pdu::Error::InvalidHandle);
        }

        let mtu = self.get_mtu() as usize;

        // The record length field is a single byte, so a value is capped at 253 on top of
        // what fits into the response
        let value_cap = core::cmp::min(mtu - 4, 253);

        let mut records = pdu::RecordList::new(mtu - 2);

        for attribute in self
            .attributes
            .iter_range(&range)
            .filter(|a| a.get_type() == request.attr_type)
        {
            let value = attribute.get_value();
            let part = &value[..core::cmp::min(value.len(), value_cap)];

            let mut record = attribute.get_handle().to_le_bytes().to_vec();
            record.extend_from_slice(part);

            if !records.try_push(&record) {
                break;
            }
        }

        if records.is_empty() {
            return pdu::error_response(
                opcode,
                range.starting_handle,
                pdu::Error::AttributeNotFound,
            );
        }

        let record_length = records.get_record_length().unwrap_or(0);

        let mut response = Vec::with_capacity(2);
        response.push(pdu::ServerPduName::ReadByTypeResponse.into());
        response.push(record_length as u8);
        response.extend_from_slice(&records.into_inner());

        response
    }

    fn process_read(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = pdu::ClientPduName::ReadRequest.into();

        if pdu.len() != 3 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        let handle = <u16>::from_le_bytes([pdu[1], pdu[2]]);

        let attribute = match self.attributes.get(handle) {
            Some(attribute) => attribute,
            None => return pdu::error_response(opcode, handle, pdu::Error::InvalidHandle),
        };

        let value = attribute.get_value();
        let limit = core::cmp::min(value.len(), self.get_mtu() as usize - 1);

        let mut response = Vec::with_capacity(1 + limit);
        response.push(pdu::ServerPduName::ReadResponse.into());
        response.extend_from_slice(&value[..limit]);

        response
    }

    fn process_read_blob(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = pdu::ClientPduName::ReadBlobRequest.into();

        if pdu.len() != 5 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        let handle = <u16>::from_le_bytes([pdu[1], pdu[2]]);
        let offset = <u16>::from_le_bytes([pdu[3], pdu[4]]) as usize;

        let attribute = match self.attributes.get(handle) {
            Some(attribute) => attribute,
            None => return pdu::error_response(opcode, handle, pdu::Error::InvalidHandle),
        };

        let value = attribute.get_value();

        if offset > value.len() {
            return pdu::error_response(opcode, handle, pdu::Error::InvalidOffset);
        }

        let rest = &value[offset..];
        let limit = core::cmp::min(rest.len(), self.get_mtu() as usize - 1);

        let mut response = Vec::with_capacity(1 + limit);
        response.push(pdu::ServerPduName::ReadBlobResponse.into());
        response.extend_from_slice(&rest[..limit]);

        response
    }

    fn process_read_multiple(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = pdu::ClientPduName::ReadMultipleRequest.into();

        let raw_handles = &pdu[1..];

        // At least two whole handles per the protocol
        if raw_handles.len() % 2 != 0 || raw_handles.len() < 4 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        let mut values = Vec::new();

        for raw in raw_handles.chunks(2) {
            let handle = <u16>::from_le_bytes([raw[0], raw[1]]);

            match self.attributes.get(handle) {
                Some(attribute) => values.extend_from_slice(attribute.get_value()),
                None => return pdu::error_response(opcode, handle, pdu::Error::InvalidHandle),
            }
        }

        values.truncate(self.get_mtu() as usize - 1);

        let mut response = Vec::with_capacity(1 + values.len());
        response.push(pdu::ServerPduName::ReadMultipleResponse.into());
        response.extend_from_slice(&values);

        response
    }

    fn process_write_request(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = pdu::ClientPduName::WriteRequest.into();

        if pdu.len() < 3 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        let handle = <u16>::from_le_bytes([pdu[1], pdu[2]]);

        let attribute = match self.attributes.get_mut(handle) {
            Some(attribute) => attribute,
            None => return pdu::error_response(opcode, handle, pdu::Error::InvalidHandle),
        };

        match attribute.set_value(&pdu[3..]) {
            Ok(()) => {
                log_debug!("wrote {} bytes to handle {:#06x}", pdu.len() - 3, handle);

                vec![pdu::ServerPduName::WriteResponse.into()]
            }
            Err(e) => pdu::error_response(opcode, handle, e),
        }
    }

    /// Same as a write request, but nothing is sent back and failures are swallowed
    fn process_write_command(&mut self, pdu: &[u8]) {
        if pdu.len() < 3 {
            log_debug!("dropping truncated write command");
            return;
        }

        let handle = <u16>::from_le_bytes([pdu[1], pdu[2]]);

        match self.attributes.get_mut(handle) {
            Some(attribute) => {
                if let Err(e) = attribute.set_value(&pdu[3..]) {
                    log_debug!("write command to handle {:#06x} failed: {}", handle, e);
                }
            }
            None => log_debug!("write command to invalid handle {:#06x}", handle),
        }
    }

    fn process_prepare_write(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = pdu::ClientPduName::PrepareWriteRequest.into();

        if pdu.len() < 5 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        let handle = <u16>::from_le_bytes([pdu[1], pdu[2]]);
        let offset = <u16>::from_le_bytes([pdu[3], pdu[4]]) as usize;
        let part = &pdu[5..];

        if self.attributes.get(handle).is_none() {
            return pdu::error_response(opcode, handle, pdu::Error::InvalidHandle);
        }

        match self.queued_writes.get_mut(&handle) {
            None => {
                if self.queued_writes.len() >= MAX_QUEUED_WRITE_HANDLES {
                    return pdu::error_response(opcode, handle, pdu::Error::PrepareQueueFull);
                }

                // The first prepared part of a handle must start the value
                if offset != 0 {
                    return pdu::error_response(opcode, handle, pdu::Error::InvalidOffset);
                }

                if part.len() > MAX_QUEUED_WRITE_LENGTH {
                    return pdu::error_response(
                        opcode,
                        handle,
                        pdu::Error::InsufficientResources,
                    );
                }

                self.queued_writes.insert(handle, part.to_vec());
            }
            Some(buffered) => {
                // Parts append, there are no holes or overlaps
                if offset != buffered.len() {
                    return pdu::error_response(opcode, handle, pdu::Error::InvalidOffset);
                }

                if buffered.len() + part.len() > MAX_QUEUED_WRITE_LENGTH {
                    return pdu::error_response(
                        opcode,
                        handle,
                        pdu::Error::InsufficientResources,
                    );
                }

                buffered.extend_from_slice(part);
            }
        }

        // The response echoes the request
        let mut response = pdu.to_vec();
        response[0] = pdu::ServerPduName::PrepareWriteResponse.into();

        response
    }

    fn process_execute_write(&mut self, pdu: &[u8]) -> Vec<u8> {
        let opcode = pdu::ClientPduName::ExecuteWriteRequest.into();

        if pdu.len() != 2 {
            return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU);
        }

        // The queue is consumed by both variants, including a failing commit
        let queued = core::mem::take(&mut self.queued_writes);

        match pdu[1] {
            0x00 => {
                log_debug!("discarding {} queued writes", queued.len());
            }
            0x01 => {
                for (handle, value) in queued {
                    let attribute = match self.attributes.get_mut(handle) {
                        Some(attribute) => attribute,
                        None => {
                            return pdu::error_response(opcode, handle, pdu::Error::InvalidHandle)
                        }
                    };

                    if let Err(e) = attribute.set_value(&value) {
                        return pdu::error_response(opcode, handle, e);
                    }
                }
            }
            _ => return pdu::error_response(opcode, 0, pdu::Error::InvalidPDU),
        }

        vec![pdu::ServerPduName::ExecuteWriteResponse.into()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UUID;

    fn test_server() -> Server {
        let mut attributes = ServerAttributes::new();

        // handle 1: a read only device name
        attributes.push(Attribute::new(
            UUID::from_u16(0x2A00),
            false,
            b"ble-host".to_vec(),
        ));
        // handle 2: a writable vendor attribute
        attributes.push(Attribute::new(UUID::from_u16(0xFFF1), true, vec![0x00]));
        // handle 3: a second instance of the name type
        attributes.push(Attribute::new(
            UUID::from_u16(0x2A00),
            false,
            b"other".to_vec(),
        ));
        // handle 4: an attribute with a full size type
        attributes.push(Attribute::new(
            UUID::from_u128(0xF0DEBC9A_7856_3412_F0DE_BC9A78563412),
            true,
            vec![0xAA, 0xBB],
        ));

        Server::new(attributes, 256)
    }

    #[test]
    fn handles_are_dense_and_self_describing() {
        let server = test_server();

        for handle in 1..=server.get_attributes().last_handle() {
            assert_eq!(
                handle,
                server.get_attributes().get(handle).unwrap().get_handle()
            );
        }

        assert!(server.get_attributes().get(0).is_none());
        assert_eq!(5, server.get_attributes().next_handle());
    }

    #[test]
    fn exchange_mtu_negotiates_the_minimum_of_both() {
        let mut server = test_server();

        let response = server.process_request(&[0x02, 0x40, 0x00]).unwrap();

        assert_eq!(vec![0x03, 0x40, 0x00], response);
        assert_eq!(0x40, server.get_mtu());

        // A client MTU above the server maximum is clamped to the server's 256
        let response = server.process_request(&[0x02, 0xFF, 0xFF]).unwrap();

        assert_eq!(vec![0x03, 0x00, 0x01], response);
        assert_eq!(256, server.get_mtu());

        // A client MTU below the protocol minimum is clamped up
        let response = server.process_request(&[0x02, 0x05, 0x00]).unwrap();

        assert_eq!(vec![0x03, 0x17, 0x00], response);
        assert_eq!(23, server.get_mtu());
    }

    #[test]
    fn find_information_packs_equal_length_records() {
        let mut server = test_server();

        let response = server
            .process_request(&[0x04, 0x01, 0x00, 0xFF, 0xFF])
            .unwrap();

        // Three 16 bit records, stopping before the 128 bit type at handle 4
        assert_eq!(
            vec![
                0x05, 0x01, // format: handle + 16 bit UUID
                0x01, 0x00, 0x00, 0x2A, // handle 1, 0x2A00
                0x02, 0x00, 0xF1, 0xFF, // handle 2, 0xFFF1
                0x03, 0x00, 0x00, 0x2A, // handle 3, 0x2A00
            ],
            response
        );
    }

    #[test]
    fn find_information_with_a_128_bit_first_type() {
        let mut server = test_server();

        let response = server
            .process_request(&[0x04, 0x04, 0x00, 0xFF, 0xFF])
            .unwrap();

        assert_eq!(0x05, response[0]);
        assert_eq!(0x02, response[1]);
        assert_eq!(2 + 18, response.len());
        assert_eq!([0x04, 0x00], response[2..4]);
        // The 128 bit type is little endian on the wire
        assert_eq!(
            u128::to_le_bytes(0xF0DEBC9A_7856_3412_F0DE_BC9A78563412),
            response[4..20]
        );
    }

    #[test]
    fn find_information_range_validation() {
        let mut server = test_server();

        assert_eq!(
            vec![0x01, 0x04, 0x00, 0x00, 0x01],
            server.process_request(&[0x04, 0x00, 0x00, 0xFF, 0xFF]).unwrap()
        );

        assert_eq!(
            vec![0x01, 0x04, 0x05, 0x00, 0x01],
            server.process_request(&[0x04, 0x05, 0x00, 0x04, 0x00]).unwrap()
        );

        // Nothing past the last handle
        assert_eq!(
            vec![0x01, 0x04, 0x05, 0x00, 0x0A],
            server.process_request(&[0x04, 0x05, 0x00, 0xFF, 0xFF]).unwrap()
        );
    }

    #[test]
    fn read_by_type_collects_matching_attributes() {
        let mut server = test_server();

        // Read By Type for the device name type; values have different lengths so only the
        // first is returned
        let response = server
            .process_request(&[0x08, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x2A])
            .unwrap();

        let mut expected = vec![0x09, 0x0A, 0x01, 0x00];
        expected.extend_from_slice(b"ble-host");

        assert_eq!(expected, response);
    }

    #[test]
    fn read_by_type_not_found() {
        let mut server = test_server();

        let response = server
            .process_request(&[0x08, 0x01, 0x00, 0xFF, 0xFF, 0x01, 0x2A])
            .unwrap();

        assert_eq!(vec![0x01, 0x08, 0x01, 0x00, 0x0A], response);
    }

    #[test]
    fn read_returns_the_value() {
        let mut server = test_server();

        let mut expected = vec![0x0B];
        expected.extend_from_slice(b"ble-host");

        assert_eq!(
            expected,
            server.process_request(&[0x0A, 0x01, 0x00]).unwrap()
        );
    }

    #[test]
    fn read_of_an_invalid_handle() {
        let mut server = test_server();

        assert_eq!(
            vec![0x01, 0x0A, 0x10, 0x00, 0x01],
            server.process_request(&[0x0A, 0x10, 0x00]).unwrap()
        );

        assert_eq!(
            vec![0x01, 0x0A, 0x00, 0x00, 0x01],
            server.process_request(&[0x0A, 0x00, 0x00]).unwrap()
        );
    }

    #[test]
    fn read_blob_slices_from_the_offset() {
        let mut server = test_server();

        let response = server
            .process_request(&[0x0C, 0x01, 0x00, 0x04, 0x00])
            .unwrap();

        let mut expected = vec![0x0D];
        expected.extend_from_slice(b"host");

        assert_eq!(expected, response);

        // An offset past the end of the value
        assert_eq!(
            vec![0x01, 0x0C, 0x01, 0x00, 0x07],
            server
                .process_request(&[0x0C, 0x01, 0x00, 0x20, 0x00])
                .unwrap()
        );
    }

    #[test]
    fn read_multiple_concatenates_values() {
        let mut server = test_server();

        let response = server
            .process_request(&[0x0E, 0x02, 0x00, 0x04, 0x00])
            .unwrap();

        assert_eq!(vec![0x0F, 0x00, 0xAA, 0xBB], response);

        // A single handle is not a valid read multiple
        assert_eq!(
            vec![0x01, 0x0E, 0x00, 0x00, 0x04],
            server.process_request(&[0x0E, 0x02, 0x00]).unwrap()
        );
    }

    #[test]
    fn write_request_to_a_read_only_attribute() {
        let mut server = test_server();

        let response = server
            .process_request(&[0x12, 0x01, 0x00, 0x61, 0x62])
            .unwrap();

        // Write Not Permitted, echoing the handle
        assert_eq!(vec![0x01, 0x12, 0x01, 0x00, 0x03], response);
        assert_eq!(b"ble-host", server.get_attributes().get(1).unwrap().get_value());
    }

    #[test]
    fn write_request_to_a_writable_attribute() {
        let mut server = test_server();

        let response = server
            .process_request(&[0x12, 0x02, 0x00, 0x61, 0x62])
            .unwrap();

        assert_eq!(vec![0x13], response);
        assert_eq!(
            &[0x61, 0x62],
            server.get_attributes().get(2).unwrap().get_value()
        );
    }

    #[test]
    fn write_command_swallows_errors() {
        let mut server = test_server();

        assert!(server
            .process_request(&[0x52, 0x01, 0x00, 0x61])
            .is_none());
        assert!(server.process_request(&[0x52, 0x10, 0x00, 0x61]).is_none());

        assert!(server
            .process_request(&[0x52, 0x02, 0x00, 0x61])
            .is_none());
        assert_eq!(&[0x61], server.get_attributes().get(2).unwrap().get_value());
    }

    #[test]
    fn prepare_and_execute_write_assemble_the_value() {
        let mut server = test_server();

        let response = server
            .process_request(&[0x16, 0x02, 0x00, 0x00, 0x00, 0x41, 0x42])
            .unwrap();
        assert_eq!(vec![0x17, 0x02, 0x00, 0x00, 0x00, 0x41, 0x42], response);

        let response = server
            .process_request(&[0x16, 0x02, 0x00, 0x02, 0x00, 0x43, 0x44])
            .unwrap();
        assert_eq!(vec![0x17, 0x02, 0x00, 0x02, 0x00, 0x43, 0x44], response);

        let response = server.process_request(&[0x18, 0x01]).unwrap();
        assert_eq!(vec![0x19], response);

        assert_eq!(b"ABCD", server.get_attributes().get(2).unwrap().get_value());
    }

    #[test]
    fn execute_write_discard_drops_the_queue() {
        let mut server = test_server();

        server
            .process_request(&[0x16, 0x02, 0x00, 0x00, 0x00, 0x41])
            .unwrap();

        assert_eq!(vec![0x19], server.process_request(&[0x18, 0x00]).unwrap());
        assert_eq!(&[0x00], server.get_attributes().get(2).unwrap().get_value());

        // The queue is empty again, so a fresh prepare at offset zero succeeds
        let response = server
            .process_request(&[0x16, 0x02, 0x00, 0x00, 0x00, 0x42])
            .unwrap();
        assert_eq!(0x17, response[0]);
    }

    #[test]
    fn prepare_write_offset_must_append() {
        let mut server = test_server();

        // First part of a handle must start at offset zero
        assert_eq!(
            vec![0x01, 0x16, 0x02, 0x00, 0x07],
            server
                .process_request(&[0x16, 0x02, 0x00, 0x02, 0x00, 0x41])
                .unwrap()
        );

        server
            .process_request(&[0x16, 0x02, 0x00, 0x00, 0x00, 0x41])
            .unwrap();

        // A gap between parts is rejected
        assert_eq!(
            vec![0x01, 0x16, 0x02, 0x00, 0x07],
            server
                .process_request(&[0x16, 0x02, 0x00, 0x05, 0x00, 0x42])
                .unwrap()
        );
    }

    #[test]
    fn prepare_write_queue_is_bounded() {
        let mut attributes = ServerAttributes::new();

        for _ in 0..6 {
            attributes.push(Attribute::new(UUID::from_u16(0xFFF1), true, vec![]));
        }

        let mut server = Server::new(attributes, 256);

        for handle in 1..=4u16 {
            let mut request = vec![0x16];
            request.extend_from_slice(&handle.to_le_bytes());
            request.extend_from_slice(&[0x00, 0x00, 0x41]);

            assert_eq!(0x17, server.process_request(&request).unwrap()[0]);
        }

        // The fifth handle does not fit in the queue
        assert_eq!(
            vec![0x01, 0x16, 0x05, 0x00, 0x09],
            server
                .process_request(&[0x16, 0x05, 0x00, 0x00, 0x00, 0x41])
                .unwrap()
        );
    }

    #[test]
    fn prepare_write_length_is_bounded() {
        let mut server = test_server();

        let mut request = vec![0x16, 0x02, 0x00, 0x00, 0x00];
        request.resize(5 + MAX_QUEUED_WRITE_LENGTH + 1, 0x41);

        assert_eq!(
            vec![0x01, 0x16, 0x02, 0x00, 0x11],
            server.process_request(&request).unwrap()
        );
    }

    #[test]
    fn execute_write_reports_the_failing_handle() {
        let mut server = test_server();

        // Queue a prepare write against the read only handle 1
        server
            .process_request(&[0x16, 0x01, 0x00, 0x00, 0x00, 0x41])
            .unwrap();

        assert_eq!(
            vec![0x01, 0x18, 0x01, 0x00, 0x03],
            server.process_request(&[0x18, 0x01]).unwrap()
        );

        // The queue was consumed by the failed execute
        assert_eq!(vec![0x19], server.process_request(&[0x18, 0x01]).unwrap());
    }

    #[test]
    fn unknown_opcodes_are_not_supported() {
        let mut server = test_server();

        assert_eq!(
            vec![0x01, 0x1B, 0x00, 0x00, 0x06],
            server.process_request(&[0x1B, 0x01, 0x00]).unwrap()
        );
    }

    #[test]
    fn reads_are_idempotent_without_intervening_writes() {
        let mut server = test_server();

        let first = server.process_request(&[0x0A, 0x02, 0x00]).unwrap();
        let second = server.process_request(&[0x0A, 0x02, 0x00]).unwrap();

        assert_eq!(first, second);

        server.process_request(&[0x12, 0x02, 0x00, 0x7F]).unwrap();

        let third = server.process_request(&[0x0A, 0x02, 0x00]).unwrap();

        assert_ne!(first, third);
        assert_eq!(vec![0x0B, 0x7F], third);
    }
}
