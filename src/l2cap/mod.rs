//! Logical Link Control and Adaptation protocol (L2CAP)
//!
//! L2CAP multiplexes protocol data units onto channels identified by a CID and adapts them to
//! the fragment size of the HCI ACL data layer. [`AclConnection`] holds the per-connection
//! state: the registered channel handlers, the transmit fragment size, and the reassembly of
//! a PDU arriving in several fragments.
//!
//! # Specification Reference
//! See Bluetooth Specification (v4.0) Vol 3, Part A.

use crate::hci::common::ConnectionHandle;
use crate::hci::{AclPacketBoundary, HciAclData, PacketQueue};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// The minimum ATT MTU of an LE connection
pub const MIN_ATT_MTU_LE: u16 = 23;

/// Channel Identifier
///
/// Channel identifiers associate L2CAP data with a protocol or an association of protocols,
/// such as the Attribute protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelIdentifier {
    /// LE User (logical link) identifiers
    Le(LeUChannelIdentifier),
}

impl ChannelIdentifier {
    pub fn to_val(&self) -> u16 {
        match self {
            ChannelIdentifier::Le(ci) => ci.to_val(),
        }
    }
}

/// A dynamically allocated channel identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DynChannelId {
    channel_id: u16,
}

impl DynChannelId {
    pub const LE_BOUNDS: core::ops::RangeInclusive<u16> = 0x0040..=0x007F;

    fn new(channel_id: u16) -> Self {
        DynChannelId { channel_id }
    }

    /// Create a dynamic channel identifier in the LE-U CID name space
    ///
    /// # Error
    /// The input is outside of [`LE_BOUNDS`](DynChannelId::LE_BOUNDS); the infringing value is
    /// returned.
    pub fn new_le(channel_id: u16) -> Result<LeUChannelIdentifier, u16> {
        if Self::LE_BOUNDS.contains(&channel_id) {
            Ok(LeUChannelIdentifier::DynamicallyAllocated(DynChannelId::new(channel_id)))
        } else {
            Err(channel_id)
        }
    }
}

/// LE-U Channel Identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LeUChannelIdentifier {
    /// The fixed channel of the Attribute protocol, which also carries all GATT traffic
    AttributeProtocol,
    /// The LE L2CAP signaling channel
    LowEnergyL2CAPSignalingChannel,
    /// The fixed channel of the Security Manager protocol
    SecurityManagerProtocol,
    /// Channels allocated through the credit based connection procedure
    DynamicallyAllocated(DynChannelId),
}

impl LeUChannelIdentifier {
    fn to_val(&self) -> u16 {
        match self {
            LeUChannelIdentifier::AttributeProtocol => 0x4,
            LeUChannelIdentifier::LowEnergyL2CAPSignalingChannel => 0x5,
            LeUChannelIdentifier::SecurityManagerProtocol => 0x6,
            LeUChannelIdentifier::DynamicallyAllocated(dyn_id) => dyn_id.channel_id,
        }
    }

    fn try_from_raw(val: u16) -> Result<Self, ()> {
        match val {
            0x4 => Ok(LeUChannelIdentifier::AttributeProtocol),
            0x5 => Ok(LeUChannelIdentifier::LowEnergyL2CAPSignalingChannel),
            0x6 => Ok(LeUChannelIdentifier::SecurityManagerProtocol),
            _ if DynChannelId::LE_BOUNDS.contains(&val) => {
                Ok(LeUChannelIdentifier::DynamicallyAllocated(DynChannelId::new(val)))
            }
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclDataError {
    RawDataTooSmall,
    PayloadLengthIncorrect,
    InvalidChannelId,
}

impl core::fmt::Display for AclDataError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            AclDataError::RawDataTooSmall => write!(f, "Raw data is too small for an ACL frame"),
            AclDataError::PayloadLengthIncorrect => {
                write!(f, "Specified payload length didn't match the actual payload length")
            }
            AclDataError::InvalidChannelId => write!(f, "Invalid channel identifier"),
        }
    }
}

/// A complete L2CAP basic information frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclData {
    channel_id: ChannelIdentifier,
    data: Vec<u8>,
}

impl AclData {
    pub fn new(payload: Vec<u8>, channel_id: ChannelIdentifier) -> Self {
        AclData {
            channel_id,
            data: payload,
        }
    }

    pub fn get_channel_id(&self) -> ChannelIdentifier {
        self.channel_id
    }

    pub fn get_payload(&self) -> &[u8] {
        &self.data
    }

    /// Encode into the wire form `length le16 || cid le16 || payload`
    pub fn into_raw_data(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(4 + self.data.len());

        v.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        v.extend_from_slice(&self.channel_id.to_val().to_le_bytes());
        v.extend_from_slice(&self.data);

        v
    }

    /// Create an AclData struct from a raw L2CAP basic frame
    ///
    /// # Errors
    /// * The length of the raw data must be at least 4
    /// * The length field must equal the length of the payload portion
    /// * The channel id must be valid
    pub fn from_raw_data(data: &[u8]) -> Result<Self, AclDataError> {
        if data.len() < 4 {
            return Err(AclDataError::RawDataTooSmall);
        }

        let len = <u16>::from_le_bytes([data[0], data[1]]) as usize;
        let raw_channel_id = <u16>::from_le_bytes([data[2], data[3]]);
        let payload = &data[4..];

        if len != payload.len() {
            return Err(AclDataError::PayloadLengthIncorrect);
        }

        Ok(AclData {
            channel_id: ChannelIdentifier::Le(
                LeUChannelIdentifier::try_from_raw(raw_channel_id)
                    .or(Err(AclDataError::InvalidChannelId))?,
            ),
            data: payload.to_vec(),
        })
    }
}

/// The send half of a connection handed to a channel handler
///
/// Sending fragments the PDU onto the HCI ACL data layer for the connection the PDU arrived
/// on.
pub struct Link<'a> {
    handle: ConnectionHandle,
    tx_mtu: u16,
    tx: &'a mut PacketQueue,
}

impl<'a> Link<'a> {
    pub fn get_handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Send a PDU on a channel of this connection
    pub fn send(&mut self, channel_id: ChannelIdentifier, data: &[u8]) {
        fragment_onto(self.tx, self.handle, self.tx_mtu, channel_id, data)
    }
}

/// Handler for one L2CAP channel
///
/// Registered with an [`AclConnection`]; invoked once per complete, reassembled PDU.
pub trait ChannelHandler {
    fn on_pdu(&mut self, link: &mut Link<'_>, channel_id: ChannelIdentifier, pdu: &[u8]);
}

/// Split a PDU into ACL fragments and queue them
///
/// A PDU that fits into `tx_mtu` (counting the 4 byte HCI ACL header) leaves in a single
/// packet, anything larger leaves as a first fragment followed by continuation fragments of at
/// most `tx_mtu - 4` data bytes each.
fn fragment_onto(
    tx: &mut PacketQueue,
    handle: ConnectionHandle,
    tx_mtu: u16,
    channel_id: ChannelIdentifier,
    data: &[u8],
) {
    let pdu = AclData::new(data.to_vec(), channel_id).into_raw_data();

    let capacity = tx_mtu as usize - 4;

    if pdu.len() <= capacity {
        tx.queue_packet(
            HciAclData::new(handle, AclPacketBoundary::FirstNonFlushable, pdu).into_packet(),
        );
    } else {
        let mut chunks = pdu.chunks(capacity);

        if let Some(first) = chunks.next() {
            tx.queue_packet(
                HciAclData::new(
                    handle,
                    AclPacketBoundary::FirstNonFlushable,
                    first.to_vec(),
                )
                .into_packet(),
            );
        }

        for chunk in chunks {
            tx.queue_packet(
                HciAclData::new(
                    handle,
                    AclPacketBoundary::ContinuingFragment,
                    chunk.to_vec(),
                )
                .into_packet(),
            );
        }
    }
}

/// Reassembly state for a PDU spanning multiple ACL fragments
struct PduRecombine {
    channel_id: ChannelIdentifier,
    pdu_len: usize,
    buffer: Vec<u8>,
}

/// The L2CAP state of one ACL logical link
///
/// Created when the controller reports a completed connection and dropped on disconnection.
/// Channel handlers have to be registered before the first data arrives; a PDU for a channel
/// without a handler is dropped.
pub struct AclConnection {
    handle: ConnectionHandle,
    tx_mtu: u16,
    channels: BTreeMap<ChannelIdentifier, Rc<RefCell<dyn ChannelHandler>>>,
    recombine: Option<PduRecombine>,
}

impl AclConnection {
    /// Enough for the HCI ACL header, the L2CAP header, and a minimum MTU ATT packet
    pub const DEFAULT_TX_MTU: u16 = MIN_ATT_MTU_LE + 8;

    pub fn new(handle: ConnectionHandle) -> Self {
        AclConnection {
            handle,
            tx_mtu: Self::DEFAULT_TX_MTU,
            channels: BTreeMap::new(),
            recombine: None,
        }
    }

    pub fn get_handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn set_tx_mtu(&mut self, tx_mtu: u16) {
        // Anything smaller cannot carry the two headers and one byte of data
        self.tx_mtu = tx_mtu.max(9);
    }

    pub fn register_channel(
        &mut self,
        channel_id: ChannelIdentifier,
        handler: Rc<RefCell<dyn ChannelHandler>>,
    ) {
        self.channels.insert(channel_id, handler);
    }

    /// Send a PDU on a channel of this connection
    pub fn send(&self, tx: &mut PacketQueue, channel_id: ChannelIdentifier, data: &[u8]) {
        fragment_onto(tx, self.handle, self.tx_mtu, channel_id, data)
    }

    /// Process the payload of one inbound HCI ACL data packet
    ///
    /// Fragments are assumed to arrive in order per the HCI contract; a continuation without a
    /// started PDU is treated as corruption and dropped.
    pub fn on_received_data(&mut self, tx: &mut PacketQueue, frame_payload: &[u8]) {
        let acl = match HciAclData::try_from_packet_payload(frame_payload) {
            Ok(acl) => acl,
            Err(e) => {
                log::warn!("dropping bad ACL data packet: {}", e);
                return;
            }
        };

        match acl.get_packet_boundary_flag() {
            AclPacketBoundary::FirstAutoFlushable => {
                if self.recombine.take().is_some() {
                    log::warn!("new first fragment while recombining a PDU, dropping the old one");
                }

                let data = acl.get_payload();

                if data.len() < 4 {
                    log::warn!("dropping ACL fragment too small for an L2CAP header");
                    return;
                }

                let pdu_len = <u16>::from_le_bytes([data[0], data[1]]) as usize;
                let raw_cid = <u16>::from_le_bytes([data[2], data[3]]);

                let channel_id = match LeUChannelIdentifier::try_from_raw(raw_cid) {
                    Ok(cid) => ChannelIdentifier::Le(cid),
                    Err(_) => {
                        log::warn!("dropping PDU for invalid channel {:#06x}", raw_cid);
                        return;
                    }
                };

                if pdu_len + 4 == data.len() {
                    // The whole PDU is in this fragment
                    let pdu = data[4..].to_vec();

                    self.dispatch(tx, channel_id, &pdu);
                } else if pdu_len + 4 > data.len() {
                    self.recombine = Some(PduRecombine {
                        channel_id,
                        pdu_len,
                        buffer: data[4..].to_vec(),
                    });
                } else {
                    log::warn!("dropping ACL fragment longer than its PDU length");
                }
            }
            AclPacketBoundary::ContinuingFragment => match self.recombine.take() {
                None => log::warn!("dropping continuation fragment with no PDU being recombined"),
                Some(mut recombine) => {
                    recombine.buffer.extend_from_slice(acl.get_payload());

                    if recombine.buffer.len() >= recombine.pdu_len {
                        let pdu: Vec<u8> = recombine.buffer[..recombine.pdu_len].to_vec();

                        self.dispatch(tx, recombine.channel_id, &pdu);
                    } else {
                        self.recombine = Some(recombine);
                    }
                }
            },
            AclPacketBoundary::FirstNonFlushable => {
                log::warn!("dropping ACL packet with an unexpected boundary flag");
            }
        }
    }

    fn dispatch(&mut self, tx: &mut PacketQueue, channel_id: ChannelIdentifier, pdu: &[u8]) {
        let handler = match self.channels.get(&channel_id) {
            Some(handler) => Rc::clone(handler),
            None => {
                log::debug!(
                    "dropping PDU for channel {:#06x} with no registered handler",
                    channel_id.to_val()
                );
                return;
            }
        };

        let mut link = Link {
            handle: self.handle,
            tx_mtu: self.tx_mtu,
            tx,
        };

        handler.borrow_mut().on_pdu(&mut link, channel_id, pdu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hci::PacketKind;

    const ATT_CHANNEL: ChannelIdentifier =
        ChannelIdentifier::Le(LeUChannelIdentifier::AttributeProtocol);

    struct Recorder {
        pdus: Rc<RefCell<Vec<(u16, Vec<u8>)>>>,
    }

    impl ChannelHandler for Recorder {
        fn on_pdu(&mut self, _: &mut Link<'_>, channel_id: ChannelIdentifier, pdu: &[u8]) {
            self.pdus
                .borrow_mut()
                .push((channel_id.to_val(), pdu.to_vec()));
        }
    }

    fn connection_with_recorder() -> (AclConnection, Rc<RefCell<Vec<(u16, Vec<u8>)>>>) {
        let handle = ConnectionHandle::try_from(0x0040).unwrap();
        let pdus = Rc::new(RefCell::new(Vec::new()));

        let mut connection = AclConnection::new(handle);

        connection.register_channel(
            ATT_CHANNEL,
            Rc::new(RefCell::new(Recorder {
                pdus: Rc::clone(&pdus),
            })),
        );

        (connection, pdus)
    }

    #[test]
    fn acl_data_codec_round_trip() {
        let acl = AclData::new(vec![0x02, 0x01, 0x00], ATT_CHANNEL);
        let raw = acl.into_raw_data();

        assert_eq!(vec![0x03, 0x00, 0x04, 0x00, 0x02, 0x01, 0x00], raw);
        assert_eq!(acl, AclData::from_raw_data(&raw).unwrap());
    }

    #[test]
    fn acl_data_codec_rejects_bad_frames() {
        assert_eq!(
            Err(AclDataError::RawDataTooSmall),
            AclData::from_raw_data(&[0x01, 0x00])
        );
        assert_eq!(
            Err(AclDataError::PayloadLengthIncorrect),
            AclData::from_raw_data(&[0x02, 0x00, 0x04, 0x00, 0xAA])
        );
        assert_eq!(
            Err(AclDataError::InvalidChannelId),
            AclData::from_raw_data(&[0x01, 0x00, 0xFF, 0x00, 0xAA])
        );
    }

    #[test]
    fn reassembly_of_a_two_fragment_pdu() {
        let (mut connection, pdus) = connection_with_recorder();
        let mut tx = PacketQueue::new();

        // First fragment: PDU length 6, channel 4, two data bytes
        let first = [0x40, 0x20, 0x06, 0x00, 0x06, 0x00, 0x04, 0x00, 0xAA, 0xBB];
        // Continuation with the remaining four bytes
        let next = [0x40, 0x10, 0x04, 0x00, 0xCC, 0xDD, 0xEE, 0xFF];

        connection.on_received_data(&mut tx, &first);
        assert!(pdus.borrow().is_empty());

        connection.on_received_data(&mut tx, &next);

        assert_eq!(
            vec![(0x04, vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])],
            *pdus.borrow()
        );
    }

    #[test]
    fn complete_pdu_in_one_fragment_dispatches_immediately() {
        let (mut connection, pdus) = connection_with_recorder();
        let mut tx = PacketQueue::new();

        let frame = [0x40, 0x20, 0x07, 0x00, 0x03, 0x00, 0x04, 0x00, 0x0A, 0x0B, 0x0C];

        connection.on_received_data(&mut tx, &frame);

        assert_eq!(vec![(0x04, vec![0x0A, 0x0B, 0x0C])], *pdus.borrow());
    }

    #[test]
    fn continuation_without_a_first_fragment_is_dropped() {
        let (mut connection, pdus) = connection_with_recorder();
        let mut tx = PacketQueue::new();

        let orphan = [0x40, 0x10, 0x02, 0x00, 0xAA, 0xBB];

        connection.on_received_data(&mut tx, &orphan);

        assert!(pdus.borrow().is_empty());
    }

    #[test]
    fn pdu_for_an_unregistered_channel_is_dropped() {
        let (mut connection, pdus) = connection_with_recorder();
        let mut tx = PacketQueue::new();

        // Complete PDU for the signaling channel (0x0005)
        let frame = [0x40, 0x20, 0x05, 0x00, 0x01, 0x00, 0x05, 0x00, 0x0A];

        connection.on_received_data(&mut tx, &frame);

        assert!(pdus.borrow().is_empty());
    }

    /// Feed every queued outbound fragment back into a receiving connection
    fn loop_back(tx: &mut PacketQueue, receiver: &mut AclConnection, rx_queue: &mut PacketQueue) {
        while let Some(packet) = tx.next_packet() {
            assert_eq!(PacketKind::AclData, packet.get_kind());

            // Outbound fragments leave as host fragments; rewrite the boundary flag to what
            // the receiving side of a controller would deliver.
            let mut payload = packet.get_payload().to_vec();
            if payload[1] & 0x30 == 0x00 {
                payload[1] |= 0x20;
            }

            receiver.on_received_data(rx_queue, &payload);
        }
    }

    #[test]
    fn fragmentation_round_trip() {
        let handle = ConnectionHandle::try_from(0x0040).unwrap();
        let (mut receiver, pdus) = connection_with_recorder();

        let mut tx = PacketQueue::new();
        let mut rx_queue = PacketQueue::new();

        let sender = AclConnection::new(handle);

        // Large enough to need several fragments at the default transmit MTU
        let data: Vec<u8> = (0..200u16).map(|v| v as u8).collect();

        sender.send(&mut tx, ATT_CHANNEL, &data);

        loop_back(&mut tx, &mut receiver, &mut rx_queue);

        assert_eq!(vec![(0x04, data)], *pdus.borrow());
    }

    #[test]
    fn small_pdu_leaves_in_a_single_fragment() {
        let handle = ConnectionHandle::try_from(0x0040).unwrap();
        let connection = AclConnection::new(handle);
        let mut tx = PacketQueue::new();

        connection.send(&mut tx, ATT_CHANNEL, &[0x0A, 0x0B]);

        let packet = tx.next_packet().unwrap();

        assert_eq!(
            &[0x40, 0x00, 0x06, 0x00, 0x02, 0x00, 0x04, 0x00, 0x0A, 0x0B],
            packet.get_payload()
        );
        assert!(tx.next_packet().is_none());
    }
}
