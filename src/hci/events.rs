//! HCI event decoding
//!
//! Events arrive from the controller as `event_code || parameter_length || parameters`. This
//! module decodes the event stream into a sum type so the host can dispatch on it. Unknown
//! events are surfaced as errors for the caller to log and ignore; a length field disagreeing
//! with the received buffer means the packet is dropped.
//!
//! The events here are the ones a Bluetooth 4.0 LE host cares about, see the Bluetooth
//! Specification (v4.0) Vol 2, Part E, Section 7.7.

use crate::hci::common::{
    ClockAccuracy, ConnectionHandle, ConnectionInterval, LEAddressType, LERole, SupervisionTimeout,
};
use crate::hci::error::Error;
use crate::BluetoothDeviceAddress;

/// Events the host can enable in the controller's event mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Events {
    DisconnectionComplete,
    EncryptionChange,
    CommandComplete,
    CommandStatus,
    LEMeta,
}

impl Events {
    pub fn get_event_code(&self) -> u8 {
        match *self {
            Events::DisconnectionComplete => 0x05,
            Events::EncryptionChange => 0x08,
            Events::CommandComplete => 0x0E,
            Events::CommandStatus => 0x0F,
            Events::LEMeta => 0x3E,
        }
    }

    /// The events enabled by the startup sequences
    pub fn default_mask_events() -> &'static [Events] {
        &[
            Events::DisconnectionComplete,
            Events::EncryptionChange,
            Events::CommandComplete,
            Events::CommandStatus,
            Events::LEMeta,
        ]
    }
}

/// LE Meta event subevents
///
/// See the Bluetooth Specification (v4.0) Vol 2, Part E, Section 7.7.65.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LEMeta {
    ConnectionComplete,
    AdvertisingReport,
    ConnectionUpdateComplete,
}

impl LEMeta {
    pub fn get_sub_event_code(&self) -> u8 {
        match *self {
            LEMeta::ConnectionComplete => 0x01,
            LEMeta::AdvertisingReport => 0x02,
            LEMeta::ConnectionUpdateComplete => 0x03,
        }
    }

    /// The LE subevents enabled by the startup sequences
    pub fn default_mask_events() -> &'static [LEMeta] {
        &[LEMeta::ConnectionComplete, LEMeta::ConnectionUpdateComplete]
    }
}

/// Compute an event mask from a list of events
///
/// Bit `code - 1` of the mask enables the event with that code.
pub fn event_mask(events: &[Events]) -> u64 {
    events
        .iter()
        .fold(0u64, |mask, e| mask | (1 << (e.get_event_code() - 1)))
}

/// Compute an LE event mask from a list of subevents
pub fn le_event_mask(sub_events: &[LEMeta]) -> u64 {
    sub_events
        .iter()
        .fold(0u64, |mask, e| mask | (1 << (e.get_sub_event_code() - 1)))
}

/// Failure to decode an event packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The packet is smaller than its fixed size portion
    TooShort,
    /// The parameter length field disagrees with the received buffer
    LengthMismatch { declared: usize, actual: usize },
    /// The event code is not one this host handles
    UnknownEvent(u8),
    /// The LE Meta subevent code is not one this host handles
    UnknownSubEvent(u8),
    /// A field held a value outside its defined range
    InvalidField(&'static str, u8),
}

impl core::fmt::Display for EventError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            EventError::TooShort => write!(f, "Event packet too short for its parameters"),
            EventError::LengthMismatch { declared, actual } => write!(
                f,
                "Event parameter length is {} but {} bytes were received",
                declared, actual
            ),
            EventError::UnknownEvent(code) => write!(f, "Unhandled event {:#04x}", code),
            EventError::UnknownSubEvent(code) => {
                write!(f, "Unhandled LE Meta subevent {:#04x}", code)
            }
            EventError::InvalidField(field, raw) => {
                write!(f, "Invalid value {:#04x} for {}", raw, field)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandCompleteData {
    /// How many more command packets the controller is ready to accept
    pub number_of_hci_command_packets: u8,
    /// The opcode of the command that finished
    pub command_opcode: u16,
    /// The raw return parameters, starting with the status byte
    pub return_parameters: Vec<u8>,
}

impl CommandCompleteData {
    fn try_from(params: &[u8]) -> Result<Self, EventError> {
        if params.len() < 3 {
            return Err(EventError::TooShort);
        }

        Ok(CommandCompleteData {
            number_of_hci_command_packets: params[0],
            command_opcode: <u16>::from_le_bytes([params[1], params[2]]),
            return_parameters: params[3..].to_vec(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DisconnectionCompleteData {
    pub status: Error,
    pub connection_handle: ConnectionHandle,
    pub reason: u8,
}

impl DisconnectionCompleteData {
    fn try_from(params: &[u8]) -> Result<Self, EventError> {
        if params.len() != 4 {
            return Err(EventError::TooShort);
        }

        let raw_handle = <u16>::from_le_bytes([params[1], params[2]]);

        Ok(DisconnectionCompleteData {
            status: Error::from(params[0]),
            connection_handle: ConnectionHandle::try_from(raw_handle & 0xFFF)
                .map_err(|_| EventError::InvalidField("connection handle", params[1]))?,
            reason: params[3],
        })
    }
}

#[derive(Debug, Clone)]
pub struct LEConnectionCompleteData {
    pub status: Error,
    pub connection_handle: ConnectionHandle,
    pub role: LERole,
    pub peer_address_type: LEAddressType,
    pub peer_address: BluetoothDeviceAddress,
    pub connection_interval: ConnectionInterval,
    pub connection_latency: u16,
    pub supervision_timeout: SupervisionTimeout,
    pub master_clock_accuracy: ClockAccuracy,
}

impl LEConnectionCompleteData {
    fn try_from(params: &[u8]) -> Result<Self, EventError> {
        if params.len() != 18 {
            return Err(EventError::TooShort);
        }

        let raw_handle = <u16>::from_le_bytes([params[1], params[2]]) & 0xFFF;

        let mut peer_address = BluetoothDeviceAddress::default();
        peer_address.copy_from_slice(&params[5..11]);

        Ok(LEConnectionCompleteData {
            status: Error::from(params[0]),
            connection_handle: ConnectionHandle::try_from(raw_handle)
                .map_err(|_| EventError::InvalidField("connection handle", params[1]))?,
            role: LERole::try_from(params[3])
                .map_err(|raw| EventError::InvalidField("role", raw))?,
            peer_address_type: LEAddressType::from(params[4]),
            peer_address,
            connection_interval: ConnectionInterval::from(<u16>::from_le_bytes([
                params[11], params[12],
            ])),
            connection_latency: <u16>::from_le_bytes([params[13], params[14]]),
            supervision_timeout: SupervisionTimeout::from(<u16>::from_le_bytes([
                params[15], params[16],
            ])),
            master_clock_accuracy: ClockAccuracy::try_from(params[17])
                .map_err(|raw| EventError::InvalidField("master clock accuracy", raw))?,
        })
    }
}

/// The kind of advertising PDU behind an advertising report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LEEventType {
    ConnectableAndScannableUndirectedAdvertising,
    ConnectableDirectedAdvertising,
    ScannableUndirectedAdvertising,
    NonConnectableUndirectedAdvertising,
    ScanResponse,
}

impl LEEventType {
    fn try_from(raw: u8) -> Result<Self, EventError> {
        match raw {
            0x00 => Ok(LEEventType::ConnectableAndScannableUndirectedAdvertising),
            0x01 => Ok(LEEventType::ConnectableDirectedAdvertising),
            0x02 => Ok(LEEventType::ScannableUndirectedAdvertising),
            0x03 => Ok(LEEventType::NonConnectableUndirectedAdvertising),
            0x04 => Ok(LEEventType::ScanResponse),
            _ => Err(EventError::InvalidField("advertising event type", raw)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LEAdvertisingReportData {
    pub event_type: LEEventType,
    pub address_type: LEAddressType,
    pub address: BluetoothDeviceAddress,
    /// The raw AD structures, iterable with [`gap::advertise::AdStructIter`](crate::gap::advertise::AdStructIter)
    pub data: Vec<u8>,
    /// None when the controller reported that RSSI is unavailable
    pub rssi: Option<i8>,
}

impl LEAdvertisingReportData {
    /// Parse the `num_reports` sequential records of an advertising report event
    fn reports_from(params: &[u8]) -> Result<Vec<Self>, EventError> {
        let count = *params.first().ok_or(EventError::TooShort)? as usize;

        let mut rest = &params[1..];
        let mut reports = Vec::with_capacity(count);

        for _ in 0..count {
            if rest.len() < 9 {
                return Err(EventError::TooShort);
            }

            let data_len = rest[8] as usize;

            if rest.len() < 9 + data_len + 1 {
                return Err(EventError::TooShort);
            }

            let mut address = BluetoothDeviceAddress::default();
            address.copy_from_slice(&rest[2..8]);

            // An RSSI byte of 127 means the measurement is not available
            let raw_rssi = rest[9 + data_len];

            reports.push(LEAdvertisingReportData {
                event_type: LEEventType::try_from(rest[0])?,
                address_type: LEAddressType::from(rest[1]),
                address,
                data: rest[9..9 + data_len].to_vec(),
                rssi: if raw_rssi != 127 {
                    Some(raw_rssi as i8)
                } else {
                    None
                },
            });

            rest = &rest[10 + data_len..];
        }

        Ok(reports)
    }
}

#[derive(Debug, Clone)]
pub enum LEMetaData {
    ConnectionComplete(LEConnectionCompleteData),
    AdvertisingReport(Vec<LEAdvertisingReportData>),
}

#[derive(Debug, Clone)]
pub enum EventsData {
    DisconnectionComplete(DisconnectionCompleteData),
    CommandComplete(CommandCompleteData),
    LEMeta(LEMetaData),
}

impl EventsData {
    /// Decode one event packet payload (`event_code || length || parameters`)
    pub fn try_from_packet(payload: &[u8]) -> Result<Self, EventError> {
        if payload.len() < 2 {
            return Err(EventError::TooShort);
        }

        let declared = payload[1] as usize;
        let params = &payload[2..];

        if declared != params.len() {
            return Err(EventError::LengthMismatch {
                declared,
                actual: params.len(),
            });
        }

        match payload[0] {
            0x05 => Ok(EventsData::DisconnectionComplete(
                DisconnectionCompleteData::try_from(params)?,
            )),
            0x0E => Ok(EventsData::CommandComplete(CommandCompleteData::try_from(
                params,
            )?)),
            0x3E => {
                let sub_event = *params.first().ok_or(EventError::TooShort)?;

                match sub_event {
                    0x01 => Ok(EventsData::LEMeta(LEMetaData::ConnectionComplete(
                        LEConnectionCompleteData::try_from(&params[1..])?,
                    ))),
                    0x02 => Ok(EventsData::LEMeta(LEMetaData::AdvertisingReport(
                        LEAdvertisingReportData::reports_from(&params[1..])?,
                    ))),
                    _ => Err(EventError::UnknownSubEvent(sub_event)),
                }
            }
            code => Err(EventError::UnknownEvent(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_event_masks_match_the_core_spec_bits() {
        assert_eq!(
            0x2000_0000_0000_6090,
            event_mask(Events::default_mask_events())
        );
        assert_eq!(0x05, le_event_mask(LEMeta::default_mask_events()));
        assert_eq!(
            0x07,
            le_event_mask(&[
                LEMeta::ConnectionComplete,
                LEMeta::AdvertisingReport,
                LEMeta::ConnectionUpdateComplete
            ])
        );
    }

    #[test]
    fn command_complete_decodes() {
        // Command Complete for Reset with one free command slot and status 0
        let payload = [0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00];

        match EventsData::try_from_packet(&payload) {
            Ok(EventsData::CommandComplete(data)) => {
                assert_eq!(1, data.number_of_hci_command_packets);
                assert_eq!(0x0C03, data.command_opcode);
                assert_eq!(vec![0x00], data.return_parameters);
            }
            other => panic!("expected a command complete event, got {:?}", other),
        }
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let payload = [0x0E, 0x05, 0x01, 0x03, 0x0C, 0x00];

        assert_eq!(
            Err(EventError::LengthMismatch {
                declared: 5,
                actual: 4
            }),
            EventsData::try_from_packet(&payload).map(|_| ())
        );
    }

    #[test]
    fn unknown_events_are_reported_not_parsed() {
        let payload = [0x13, 0x00];

        assert_eq!(
            Err(EventError::UnknownEvent(0x13)),
            EventsData::try_from_packet(&payload).map(|_| ())
        );
    }

    #[test]
    fn le_connection_complete_decodes() {
        let payload = [
            0x3E, 0x13, // LE Meta, 19 parameter bytes
            0x01, // Connection Complete subevent
            0x00, // status
            0x40, 0x00, // handle
            0x01, // role: slave
            0x00, // peer address type: public
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, // peer address
            0x50, 0x00, // interval
            0x00, 0x00, // latency
            0xC8, 0x00, // supervision timeout
            0x01, // clock accuracy
        ];

        match EventsData::try_from_packet(&payload) {
            Ok(EventsData::LEMeta(LEMetaData::ConnectionComplete(data))) => {
                assert!(data.status.is_ok());
                assert_eq!(0x0040, data.connection_handle.get_raw_handle());
                assert_eq!(LERole::Slave, data.role);
                assert_eq!([0x01, 0x02, 0x03, 0x04, 0x05, 0x06], data.peer_address);
                assert_eq!(0x0050, data.connection_interval.get_interval());
                assert_eq!(ClockAccuracy::_250ppm, data.master_clock_accuracy);
            }
            other => panic!("expected a connection complete event, got {:?}", other),
        }
    }

    #[test]
    fn advertising_reports_decode_record_by_record() {
        let payload = [
            0x3E, 0x19, // LE Meta, 25 parameter bytes
            0x02, // Advertising Report subevent
            0x02, // two reports
            0x00, // event type
            0x00, // address type
            0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, // address
            0x03, // data length
            0x02, 0x01, 0x06, // flags AD structure
            0xC5, // rssi
            0x04, // event type: scan response
            0x01, // address type: random
            0x11, 0x12, 0x13, 0x14, 0x15, 0x16, // address
            0x00, // no data
            0x7F, // rssi not available
        ];

        match EventsData::try_from_packet(&payload) {
            Ok(EventsData::LEMeta(LEMetaData::AdvertisingReport(reports))) => {
                assert_eq!(2, reports.len());
                assert_eq!(vec![0x02, 0x01, 0x06], reports[0].data);
                assert_eq!(Some(-59), reports[0].rssi);
                assert_eq!(LEEventType::ScanResponse, reports[1].event_type);
                assert_eq!(None, reports[1].rssi);
                assert!(reports[1].data.is_empty());
            }
            other => panic!("expected advertising reports, got {:?}", other),
        }
    }

    #[test]
    fn truncated_advertising_report_is_an_error() {
        // Claims two reports but only carries one
        let payload = [
            0x3E, 0x0D, 0x02, 0x02, 0x00, 0x00, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x00, 0xC5,
            0x04,
        ];

        assert!(EventsData::try_from_packet(&payload).is_err());
    }
}
