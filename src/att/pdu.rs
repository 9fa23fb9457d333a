//! Attribute Protocol data units
//!
//! The opcode tables, the protocol error codes, and the parsing and building helpers shared by
//! the server's request handlers.
//!
//! *Requests* and *Commands* are sent by the client; *Responses* by the server. Every PDU is
//! `opcode u8 || parameters`.

use crate::UUID;
use core::convert::TryFrom;

/// PDUs sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPduName {
    ExchangeMtuRequest,
    FindInformationRequest,
    FindByTypeValueRequest,
    ReadByTypeRequest,
    ReadRequest,
    ReadBlobRequest,
    ReadMultipleRequest,
    ReadByGroupTypeRequest,
    WriteRequest,
    WriteCommand,
    PrepareWriteRequest,
    ExecuteWriteRequest,
}

impl TryFrom<u8> for ClientPduName {
    type Error = ();

    fn try_from(val: u8) -> Result<Self, ()> {
        match val {
            0x02 => Ok(ClientPduName::ExchangeMtuRequest),
            0x04 => Ok(ClientPduName::FindInformationRequest),
            0x06 => Ok(ClientPduName::FindByTypeValueRequest),
            0x08 => Ok(ClientPduName::ReadByTypeRequest),
            0x0A => Ok(ClientPduName::ReadRequest),
            0x0C => Ok(ClientPduName::ReadBlobRequest),
            0x0E => Ok(ClientPduName::ReadMultipleRequest),
            0x10 => Ok(ClientPduName::ReadByGroupTypeRequest),
            0x12 => Ok(ClientPduName::WriteRequest),
            0x52 => Ok(ClientPduName::WriteCommand),
            0x16 => Ok(ClientPduName::PrepareWriteRequest),
            0x18 => Ok(ClientPduName::ExecuteWriteRequest),
            _ => Err(()),
        }
    }
}

impl From<ClientPduName> for u8 {
    fn from(name: ClientPduName) -> u8 {
        match name {
            ClientPduName::ExchangeMtuRequest => 0x02,
            ClientPduName::FindInformationRequest => 0x04,
            ClientPduName::FindByTypeValueRequest => 0x06,
            ClientPduName::ReadByTypeRequest => 0x08,
            ClientPduName::ReadRequest => 0x0A,
            ClientPduName::ReadBlobRequest => 0x0C,
            ClientPduName::ReadMultipleRequest => 0x0E,
            ClientPduName::ReadByGroupTypeRequest => 0x10,
            ClientPduName::WriteRequest => 0x12,
            ClientPduName::WriteCommand => 0x52,
            ClientPduName::PrepareWriteRequest => 0x16,
            ClientPduName::ExecuteWriteRequest => 0x18,
        }
    }
}

impl core::fmt::Display for ClientPduName {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ClientPduName::ExchangeMtuRequest => write!(f, "Exchange MTU Request"),
            ClientPduName::FindInformationRequest => write!(f, "Find Information Request"),
            ClientPduName::FindByTypeValueRequest => write!(f, "Find By Type Value Request"),
            ClientPduName::ReadByTypeRequest => write!(f, "Read By Type Request"),
            ClientPduName::ReadRequest => write!(f, "Read Request"),
            ClientPduName::ReadBlobRequest => write!(f, "Read Blob Request"),
            ClientPduName::ReadMultipleRequest => write!(f, "Read Multiple Request"),
            ClientPduName::ReadByGroupTypeRequest => write!(f, "Read By Group Type Request"),
            ClientPduName::WriteRequest => write!(f, "Write Request"),
            ClientPduName::WriteCommand => write!(f, "Write Command"),
            ClientPduName::PrepareWriteRequest => write!(f, "Prepare Write Request"),
            ClientPduName::ExecuteWriteRequest => write!(f, "Execute Write Request"),
        }
    }
}

/// PDUs sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPduName {
    ErrorResponse,
    ExchangeMtuResponse,
    FindInformationResponse,
    FindByTypeValueResponse,
    ReadByTypeResponse,
    ReadResponse,
    ReadBlobResponse,
    ReadMultipleResponse,
    ReadByGroupTypeResponse,
    WriteResponse,
    PrepareWriteResponse,
    ExecuteWriteResponse,
}

impl From<ServerPduName> for u8 {
    fn from(name: ServerPduName) -> u8 {
        match name {
            ServerPduName::ErrorResponse => 0x01,
            ServerPduName::ExchangeMtuResponse => 0x03,
            ServerPduName::FindInformationResponse => 0x05,
            ServerPduName::FindByTypeValueResponse => 0x07,
            ServerPduName::ReadByTypeResponse => 0x09,
            ServerPduName::ReadResponse => 0x0B,
            ServerPduName::ReadBlobResponse => 0x0D,
            ServerPduName::ReadMultipleResponse => 0x0F,
            ServerPduName::ReadByGroupTypeResponse => 0x11,
            ServerPduName::WriteResponse => 0x13,
            ServerPduName::PrepareWriteResponse => 0x17,
            ServerPduName::ExecuteWriteResponse => 0x19,
        }
    }
}

/// The Attribute Protocol errors
///
/// These are the error codes of the Error Response PDU, defined in the Bluetooth
/// Specification (v4.0) Vol 3, Part F, Section 3.4.1.1. Values past the protocol range are
/// either reserved or belong to higher layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPDU,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    Other(u8),
}

impl Error {
    pub fn get_raw(&self) -> u8 {
        match *self {
            Error::InvalidHandle => 0x01,
            Error::ReadNotPermitted => 0x02,
            Error::WriteNotPermitted => 0x03,
            Error::InvalidPDU => 0x04,
            Error::InsufficientAuthentication => 0x05,
            Error::RequestNotSupported => 0x06,
            Error::InvalidOffset => 0x07,
            Error::InsufficientAuthorization => 0x08,
            Error::PrepareQueueFull => 0x09,
            Error::AttributeNotFound => 0x0A,
            Error::AttributeNotLong => 0x0B,
            Error::InsufficientEncryptionKeySize => 0x0C,
            Error::InvalidAttributeValueLength => 0x0D,
            Error::UnlikelyError => 0x0E,
            Error::InsufficientEncryption => 0x0F,
            Error::UnsupportedGroupType => 0x10,
            Error::InsufficientResources => 0x11,
            Error::Other(raw) => raw,
        }
    }

    pub fn from_raw(val: u8) -> Error {
        match val {
            0x01 => Error::InvalidHandle,
            0x02 => Error::ReadNotPermitted,
            0x03 => Error::WriteNotPermitted,
            0x04 => Error::InvalidPDU,
            0x05 => Error::InsufficientAuthentication,
            0x06 => Error::RequestNotSupported,
            0x07 => Error::InvalidOffset,
            0x08 => Error::InsufficientAuthorization,
            0x09 => Error::PrepareQueueFull,
            0x0A => Error::AttributeNotFound,
            0x0B => Error::AttributeNotLong,
            0x0C => Error::InsufficientEncryptionKeySize,
            0x0D => Error::InvalidAttributeValueLength,
            0x0E => Error::UnlikelyError,
            0x0F => Error::InsufficientEncryption,
            0x10 => Error::UnsupportedGroupType,
            0x11 => Error::InsufficientResources,
            raw => Error::Other(raw),
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::InvalidHandle => write!(f, "The attribute handle is not valid on this server"),
            Error::ReadNotPermitted => write!(f, "The attribute cannot be read"),
            Error::WriteNotPermitted => write!(f, "The attribute cannot be written"),
            Error::InvalidPDU => write!(f, "The attribute PDU was invalid"),
            Error::InsufficientAuthentication => {
                write!(f, "The attribute requires authentication")
            }
            Error::RequestNotSupported => write!(f, "The request is not supported by this server"),
            Error::InvalidOffset => write!(f, "The offset is past the end of the attribute"),
            Error::InsufficientAuthorization => write!(f, "The attribute requires authorization"),
            Error::PrepareQueueFull => write!(f, "Too many prepare writes have been queued"),
            Error::AttributeNotFound => {
                write!(f, "No attribute found within the given handle range")
            }
            Error::AttributeNotLong => {
                write!(f, "The attribute cannot be read with a read blob request")
            }
            Error::InsufficientEncryptionKeySize => {
                write!(f, "The encryption key size of this link is insufficient")
            }
            Error::InvalidAttributeValueLength => {
                write!(f, "The value length is invalid for the operation")
            }
            Error::UnlikelyError => write!(f, "The request hit an unlikely error"),
            Error::InsufficientEncryption => write!(f, "The attribute requires encryption"),
            Error::UnsupportedGroupType => write!(f, "The group type is not supported"),
            Error::InsufficientResources => {
                write!(f, "Insufficient resources to complete the request")
            }
            Error::Other(raw) => write!(f, "Application or reserved error code {:#04x}", raw),
        }
    }
}

/// Build an Error Response PDU
///
/// The frame is `0x01 || request_opcode || handle le16 || error_code` and is the well formed
/// answer to every protocol violation; the connection stays up.
pub fn error_response(request_opcode: u8, handle: u16, error: Error) -> Vec<u8> {
    let mut pdu = Vec::with_capacity(5);

    pdu.push(ServerPduName::ErrorResponse.into());
    pdu.push(request_opcode);
    pdu.extend_from_slice(&handle.to_le_bytes());
    pdu.push(error.get_raw());

    pdu
}

/// The starting and ending handles of a ranged request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRange {
    pub starting_handle: u16,
    pub ending_handle: u16,
}

impl HandleRange {
    /// Parse the 4 byte range that follows the opcode of every ranged request
    pub fn try_from(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < 4 {
            return Err(Error::InvalidPDU);
        }

        Ok(HandleRange {
            starting_handle: <u16>::from_le_bytes([raw[0], raw[1]]),
            ending_handle: <u16>::from_le_bytes([raw[2], raw[3]]),
        })
    }

    /// Check the range against the validation rule shared by all ranged requests
    ///
    /// Handle zero is reserved and the range must not be inverted.
    pub fn is_valid(&self) -> bool {
        self.starting_handle != 0 && self.starting_handle <= self.ending_handle
    }
}

/// The handle range plus attribute type carried by the type requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRequest {
    pub handle_range: HandleRange,
    pub attr_type: UUID,
}

impl TypeRequest {
    /// Parse a handle range followed by a 2 or 16 byte UUID
    pub fn try_from(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() < 4 {
            return Err(Error::InvalidPDU);
        }

        Ok(TypeRequest {
            handle_range: HandleRange::try_from(&raw[..4])?,
            attr_type: uuid_from_wire(&raw[4..])?,
        })
    }
}

/// Decode a UUID from an attribute parameter field
///
/// Two bytes are a shortened UUID and sixteen a full one, both little endian; any other
/// length is a protocol violation.
pub fn uuid_from_wire(raw: &[u8]) -> Result<UUID, Error> {
    match raw.len() {
        2 => Ok(UUID::from_u16(<u16>::from_le_bytes([raw[0], raw[1]]))),
        16 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(raw);
            Ok(UUID::from_u128(<u128>::from_le_bytes(bytes)))
        }
        _ => Err(Error::InvalidPDU),
    }
}

/// Packer for the responses that carry a list of fixed length records
///
/// The record length is fixed by the first accepted record; a record of any other length is
/// refused so the caller stops collecting and returns the batch built so far. The capacity
/// bound keeps the response within the negotiated MTU.
pub struct RecordList {
    capacity: usize,
    record_length: Option<usize>,
    data: Vec<u8>,
}

impl RecordList {
    pub fn new(capacity: usize) -> Self {
        RecordList {
            capacity,
            record_length: None,
            data: Vec::new(),
        }
    }

    /// Try to append one record
    ///
    /// Returns false, leaving the batch unchanged, when the record length differs from the
    /// first record's or the capacity would be exceeded.
    pub fn try_push(&mut self, record: &[u8]) -> bool {
        match self.record_length {
            None => {
                if record.len() > self.capacity || record.is_empty() {
                    return false;
                }

                self.record_length = Some(record.len());
            }
            Some(len) => {
                if record.len() != len || self.data.len() + record.len() > self.capacity {
                    return false;
                }
            }
        }

        self.data.extend_from_slice(record);

        true
    }

    pub fn get_record_length(&self) -> Option<usize> {
        self.record_length
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}
