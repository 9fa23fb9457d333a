//! The Host Controller Interface
//!
//! This module is the host side of the HCI as specified in the Bluetooth Specification (v4.0)
//! Vol 2, Part E. It contains the packet codec shared with the transport, the command engine
//! that tracks in-flight commands by opcode, the event dispatch, and the startup sequences
//! that bring a controller into advertising (peripheral) or scanning (central) operation.
//!
//! Commands are further broken up into modules for OGFs (OpCode group fields).

pub mod cb;
pub mod common;
pub mod error;
pub mod events;
pub mod info_params;
pub mod le;
pub mod opcodes;
#[cfg(unix)]
pub mod unix;

use crate::gap::advertise::AdvertisingData;
use crate::l2cap;
use self::common::ConnectionHandle;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// The packet indicator preceding every HCI packet on the transport
///
/// See the Bluetooth Specification (v4.0) Vol 4, Part A, Section 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Command,
    AclData,
    Event,
}

impl PacketKind {
    fn into_val(self) -> u8 {
        match self {
            PacketKind::Command => 0x01,
            PacketKind::AclData => 0x02,
            PacketKind::Event => 0x04,
        }
    }

    fn try_from_val(raw: u8) -> Result<Self, PacketError> {
        match raw {
            0x01 => Ok(PacketKind::Command),
            0x02 => Ok(PacketKind::AclData),
            0x04 => Ok(PacketKind::Event),
            _ => Err(PacketError::UnknownPacketKind(raw)),
        }
    }
}

/// Failure to decode an HCI packet from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    Empty,
    UnknownPacketKind(u8),
    /// A declared length disagrees with the received buffer
    Malformed(&'static str),
}

impl core::fmt::Display for PacketError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            PacketError::Empty => write!(f, "Zero length HCI packet"),
            PacketError::UnknownPacketKind(raw) => {
                write!(f, "Unknown HCI packet indicator {:#04x}", raw)
            }
            PacketError::Malformed(what) => write!(f, "Malformed HCI packet: {}", what),
        }
    }
}

/// One HCI packet, the unit exchanged with the packet transport
///
/// A packet is immutable once constructed. On the wire it is the packet indicator byte
/// followed by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciPacket {
    kind: PacketKind,
    payload: Vec<u8>,
}

impl HciPacket {
    pub fn new(kind: PacketKind, payload: Vec<u8>) -> Self {
        HciPacket { kind, payload }
    }

    pub fn get_kind(&self) -> PacketKind {
        self.kind
    }

    pub fn get_payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(1 + self.payload.len());

        v.push(self.kind.into_val());
        v.extend_from_slice(&self.payload);

        v
    }

    /// Decode a packet received from the transport
    ///
    /// The per-kind framing is validated here so everything downstream can rely on the length
    /// fields: commands are `opcode le16 || len u8 || params`, events are
    /// `code u8 || len u8 || params`, and ACL data starts with `handle_flags le16 || len le16`.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, PacketError> {
        let (&indicator, payload) = raw.split_first().ok_or(PacketError::Empty)?;

        let kind = PacketKind::try_from_val(indicator)?;

        match kind {
            PacketKind::Command => {
                if payload.len() < 3 || payload[2] as usize != payload.len() - 3 {
                    return Err(PacketError::Malformed("command parameter length"));
                }
            }
            PacketKind::Event => {
                if payload.len() < 2 || payload[1] as usize != payload.len() - 2 {
                    return Err(PacketError::Malformed("event parameter length"));
                }
            }
            PacketKind::AclData => {
                if payload.len() < 4 {
                    return Err(PacketError::Malformed("ACL data header"));
                }

                let data_len = <u16>::from_le_bytes([payload[2], payload[3]]) as usize;

                if data_len != payload.len() - 4 {
                    return Err(PacketError::Malformed("ACL data length"));
                }
            }
        }

        Ok(HciPacket {
            kind,
            payload: payload.to_vec(),
        })
    }
}

/// The outbound half of a packet transport
///
/// The transport drains this queue whenever its file descriptor is writable. Setting the stop
/// flag makes the transport's poll loop exit on its next iteration.
#[derive(Default)]
pub struct PacketQueue {
    packets: VecDeque<HciPacket>,
    stopped: bool,
}

impl PacketQueue {
    pub fn new() -> Self {
        PacketQueue::default()
    }

    pub fn queue_packet(&mut self, packet: HciPacket) {
        self.packets.push_back(packet);
    }

    pub fn next_packet(&mut self) -> Option<HciPacket> {
        self.packets.pop_front()
    }

    pub fn has_packets(&self) -> bool {
        !self.packets.is_empty()
    }

    /// Request that the transport's poll loop exits
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Receiver of inbound HCI packets
///
/// The packet transport calls this for every packet read from the controller, handing over the
/// outbound queue so that handling a packet can produce responses.
pub trait PacketDelegate {
    fn on_packet_received(&mut self, tx: &mut PacketQueue, packet: HciPacket);
}

/// Used to get the information required for sending a command from the host to the controller
pub trait CommandParameter {
    /// The command to send to the Bluetooth Controller.
    ///
    /// This is the OGF & OCF pair.
    const COMMAND: opcodes::HciCommand;

    /// The command parameters in their transmission form
    fn parameter(&self) -> Vec<u8>;

    /// Get the command packet to be sent to the controller
    fn as_command_packet(&self) -> HciPacket {
        let parameter = self.parameter();

        let mut payload = Vec::with_capacity(parameter.len() + 3);

        payload.extend_from_slice(&Self::COMMAND.as_opcode_pair().as_opcode().to_le_bytes());
        payload.push(parameter.len() as u8);
        payload.extend_from_slice(&parameter);

        HciPacket::new(PacketKind::Command, payload)
    }
}

/// The packet boundary flag of an HCI ACL data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPacketBoundary {
    /// The first fragment of a PDU sent by the host
    FirstNonFlushable,
    /// A continuation of a previously started PDU
    ContinuingFragment,
    /// The first fragment of a PDU sent by the controller
    FirstAutoFlushable,
}

impl AclPacketBoundary {
    /// Get the value shifted into the place of the packet boundary flag in the first two bytes
    /// of an HCI ACL data packet.
    fn get_shifted_val(&self) -> u16 {
        (match self {
            AclPacketBoundary::FirstNonFlushable => 0x0,
            AclPacketBoundary::ContinuingFragment => 0x1,
            AclPacketBoundary::FirstAutoFlushable => 0x2,
        }) << 12
    }

    /// Extract the boundary flag from the first 16 bits of an HCI ACL data packet
    fn try_from_shifted_val(val: u16) -> Result<Self, u8> {
        match (val >> 12) & 0x3 {
            0x0 => Ok(AclPacketBoundary::FirstNonFlushable),
            0x1 => Ok(AclPacketBoundary::ContinuingFragment),
            0x2 => Ok(AclPacketBoundary::FirstAutoFlushable),
            flag => Err(flag as u8),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HciAclPacketError {
    PacketTooSmall,
    PayloadLengthIncorrect,
    InvalidPacketBoundaryFlag(u8),
    InvalidConnectionHandle(&'static str),
}

impl core::fmt::Display for HciAclPacketError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            HciAclPacketError::PacketTooSmall => {
                write!(f, "Packet is too small to be valid HCI ACL data")
            }
            HciAclPacketError::PayloadLengthIncorrect => {
                write!(f, "ACL data length field disagrees with the payload")
            }
            HciAclPacketError::InvalidPacketBoundaryFlag(flag) => {
                write!(f, "Invalid packet boundary flag {:#04x}", flag)
            }
            HciAclPacketError::InvalidConnectionHandle(reason) => {
                write!(f, "Invalid connection handle, {}", reason)
            }
        }
    }
}

/// One HCI ACL data packet
///
/// The packet is `handle_flags le16 || data_len le16 || data`, where the low 12 bits of
/// `handle_flags` are the connection handle and bits 12..14 the packet boundary flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciAclData {
    connection_handle: ConnectionHandle,
    packet_boundary_flag: AclPacketBoundary,
    payload: Vec<u8>,
}

impl HciAclData {
    pub fn new(
        connection_handle: ConnectionHandle,
        packet_boundary_flag: AclPacketBoundary,
        payload: Vec<u8>,
    ) -> Self {
        HciAclData {
            connection_handle,
            packet_boundary_flag,
            payload,
        }
    }

    pub fn get_handle(&self) -> ConnectionHandle {
        self.connection_handle
    }

    pub fn get_payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn get_packet_boundary_flag(&self) -> AclPacketBoundary {
        self.packet_boundary_flag
    }

    /// Convert into a packet that can be sent to the controller
    pub fn into_packet(self) -> HciPacket {
        let mut v = Vec::with_capacity(self.payload.len() + 4);

        let first_2_bytes = self.connection_handle.get_raw_handle()
            | self.packet_boundary_flag.get_shifted_val();

        v.extend_from_slice(&first_2_bytes.to_le_bytes());
        v.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        v.extend_from_slice(&self.payload);

        HciPacket::new(PacketKind::AclData, v)
    }

    /// Attempt to create an `HciAclData` from the payload of an ACL data packet
    pub fn try_from_packet_payload(payload: &[u8]) -> Result<Self, HciAclPacketError> {
        if payload.len() < 4 {
            return Err(HciAclPacketError::PacketTooSmall);
        }

        let first_2_bytes = <u16>::from_le_bytes([payload[0], payload[1]]);
        let data_len = <u16>::from_le_bytes([payload[2], payload[3]]) as usize;

        if data_len + 4 != payload.len() {
            return Err(HciAclPacketError::PayloadLengthIncorrect);
        }

        let packet_boundary_flag = AclPacketBoundary::try_from_shifted_val(first_2_bytes)
            .map_err(HciAclPacketError::InvalidPacketBoundaryFlag)?;

        let connection_handle = ConnectionHandle::try_from(first_2_bytes & 0xFFF)
            .map_err(HciAclPacketError::InvalidConnectionHandle)?;

        Ok(HciAclData {
            connection_handle,
            packet_boundary_flag,
            payload: payload[4..].to_vec(),
        })
    }
}

/// The result of a completed command
///
/// The status is the first byte of the return parameters; the remainder is handed to the
/// command's own parser when the status indicates success.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub status: error::Error,
    pub return_parameters: Vec<u8>,
}

/// Callback invoked when a queued command completes
pub type CommandCompletion = Box<dyn FnOnce(&mut HostController, &mut PacketQueue, CommandResponse)>;

/// A host programming error
///
/// These are not recoverable protocol conditions but contract violations by the caller, so
/// they are reported at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    /// A command with this opcode is already in flight
    CommandAlreadyQueued(u16),
    /// A controller returned parameters that do not match the command's return shape
    InvalidReturnParameters(&'static str),
}

impl core::fmt::Display for HostError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            HostError::CommandAlreadyQueued(opcode) => {
                write!(f, "A command with opcode {:#06x} is already in flight", opcode)
            }
            HostError::InvalidReturnParameters(command) => {
                write!(f, "Invalid return parameters for {}", command)
            }
        }
    }
}

impl std::error::Error for HostError {}

struct PendingCommand {
    completion: CommandCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Peripheral,
    Central,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartupState {
    Reset,
    SetEventMask,
    ReadLocalVersion,
    SetLeEventMask,
    WriteLeHostSupport,
    SetAdvertisingParameters,
    SetAdvertisingData,
    SetScanResponseData,
    SetAdvertiseEnable,
    SetScanParameters,
    SetScanEnable,
    Complete,
}

struct Startup {
    role: Role,
    /// The startup command currently in flight, None until `start` is called
    state: Option<StartupState>,
    advertising_data: AdvertisingData,
    scan_response_data: AdvertisingData,
}

/// The host side of the HCI
///
/// A `HostController` owns everything above the packet transport: the in-flight command map,
/// the startup sequence for its role, and the ACL connections with their channel handlers. It
/// is driven entirely by [`on_packet_received`](PacketDelegate::on_packet_received); every
/// inbound packet is fully handled, possibly queueing outbound packets, before the transport
/// polls again.
pub struct HostController {
    pending_commands: BTreeMap<u16, PendingCommand>,
    startup: Startup,
    connections: BTreeMap<ConnectionHandle, l2cap::AclConnection>,
    /// Registered on every new connection as the handler for the ATT channel
    attribute_channel: Option<Rc<RefCell<dyn l2cap::ChannelHandler>>>,
    advertising_report_handler: Option<Box<dyn FnMut(&events::LEAdvertisingReportData)>>,
}

impl HostController {
    /// Create a host that starts up as a peripheral
    ///
    /// After [`start`](HostController::start) the controller is configured to advertise with
    /// the given data and to answer ATT requests from the connected central with the given
    /// channel handler (normally a [`gatt::Server`](crate::gatt::Server)).
    pub fn peripheral<S>(
        attribute_server: S,
        advertising_data: AdvertisingData,
        scan_response_data: AdvertisingData,
    ) -> Self
    where
        S: l2cap::ChannelHandler + 'static,
    {
        HostController {
            pending_commands: BTreeMap::new(),
            startup: Startup {
                role: Role::Peripheral,
                state: None,
                advertising_data,
                scan_response_data,
            },
            connections: BTreeMap::new(),
            attribute_channel: Some(Rc::new(RefCell::new(attribute_server))),
            advertising_report_handler: None,
        }
    }

    /// Create a host that starts up as a central and scans for advertisers
    pub fn central() -> Self {
        HostController {
            pending_commands: BTreeMap::new(),
            startup: Startup {
                role: Role::Central,
                state: None,
                advertising_data: AdvertisingData::new(),
                scan_response_data: AdvertisingData::new(),
            },
            connections: BTreeMap::new(),
            attribute_channel: None,
            advertising_report_handler: None,
        }
    }

    /// Set the callback invoked once per received advertising report record
    pub fn set_advertising_report_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&events::LEAdvertisingReportData) + 'static,
    {
        self.advertising_report_handler = Some(Box::new(handler));
    }

    /// Queue the first command of the startup sequence
    ///
    /// The remainder of the sequence runs from the completion of each command; any non-zero
    /// completion status stops the transport.
    pub fn start(&mut self, tx: &mut PacketQueue) -> Result<(), HostError> {
        self.startup.state = Some(StartupState::Reset);

        cb::reset::queue(self, tx, Self::startup_completion())
    }

    /// Queue a command towards the controller
    ///
    /// The encoded command packet is appended to the transport's outbound queue and the
    /// completion is filed under the command's opcode until the matching Command Complete
    /// event arrives.
    ///
    /// # Error
    /// At most one command per opcode may be in flight; queueing a duplicate is rejected.
    pub fn queue_command<C>(
        &mut self,
        tx: &mut PacketQueue,
        command: C,
        completion: CommandCompletion,
    ) -> Result<(), HostError>
    where
        C: CommandParameter,
    {
        let opcode = C::COMMAND.as_opcode_pair().as_opcode();

        if self.pending_commands.contains_key(&opcode) {
            return Err(HostError::CommandAlreadyQueued(opcode));
        }

        log::debug!("queueing command {:?} (opcode {:#06x})", C::COMMAND, opcode);

        self.pending_commands
            .insert(opcode, PendingCommand { completion });

        tx.queue_packet(command.as_command_packet());

        Ok(())
    }

    fn startup_completion() -> CommandCompletion {
        Box::new(|host: &mut HostController, tx: &mut PacketQueue, response: CommandResponse| {
            host.continue_startup(tx, response)
        })
    }

    fn continue_startup(&mut self, tx: &mut PacketQueue, response: CommandResponse) {
        use self::info_params::read_local_version_information as local_version;

        let state = match self.startup.state {
            Some(state) => state,
            None => {
                log::warn!("startup completion delivered before start was called");
                return;
            }
        };

        if !response.status.is_ok() {
            log::error!(
                "startup aborted, command failed during {:?}: {}",
                state,
                response.status
            );
            tx.stop();
            return;
        }

        let queued = match state {
            StartupState::Reset => {
                self.startup.state = Some(StartupState::SetEventMask);

                cb::set_event_mask::queue(
                    self,
                    tx,
                    events::Events::default_mask_events(),
                    Self::startup_completion(),
                )
            }
            StartupState::SetEventMask => {
                self.startup.state = Some(StartupState::ReadLocalVersion);

                local_version::queue(self, tx, Self::startup_completion())
            }
            StartupState::ReadLocalVersion => {
                let info = match local_version::VersionInformation::try_from(
                    &response.return_parameters,
                ) {
                    Ok(info) => info,
                    Err(e) => {
                        log::error!("startup aborted: {}", e);
                        tx.stop();
                        return;
                    }
                };

                if info.hci_version < local_version::HCI_VERSION_4_0 {
                    log::error!(
                        "controller only supports HCI version {}, Bluetooth 4.0 is required",
                        info.hci_version
                    );
                    tx.stop();
                    return;
                }

                self.startup.state = Some(StartupState::SetLeEventMask);

                let mut sub_events = events::LEMeta::default_mask_events().to_vec();

                // A central cannot see advertisers without the report subevent
                if self.startup.role == Role::Central {
                    sub_events.push(events::LEMeta::AdvertisingReport);
                }

                le::mandatory::set_event_mask::queue(
                    self,
                    tx,
                    &sub_events,
                    Self::startup_completion(),
                )
            }
            StartupState::SetLeEventMask => {
                self.startup.state = Some(StartupState::WriteLeHostSupport);

                cb::write_le_host_supported::queue(self, tx, true, false, Self::startup_completion())
            }
            StartupState::WriteLeHostSupport => match self.startup.role {
                Role::Peripheral => {
                    self.startup.state = Some(StartupState::SetAdvertisingParameters);

                    le::transmitter::set_advertising_parameters::queue(
                        self,
                        tx,
                        le::transmitter::set_advertising_parameters::AdvertisingParameters::default(),
                        Self::startup_completion(),
                    )
                }
                Role::Central => {
                    self.startup.state = Some(StartupState::SetScanParameters);

                    let parameters = le::receiver::set_scan_parameters::ScanningParameters {
                        scan_type: le::receiver::set_scan_parameters::LEScanType::ActiveScanning,
                        ..Default::default()
                    };

                    le::receiver::set_scan_parameters::queue(
                        self,
                        tx,
                        parameters,
                        Self::startup_completion(),
                    )
                }
            },
            StartupState::SetAdvertisingParameters => {
                self.startup.state = Some(StartupState::SetAdvertisingData);

                let data = self.startup.advertising_data;

                le::transmitter::set_advertising_data::queue(
                    self,
                    tx,
                    &data,
                    Self::startup_completion(),
                )
            }
            StartupState::SetAdvertisingData => {
                self.startup.state = Some(StartupState::SetScanResponseData);

                let data = self.startup.scan_response_data;

                le::transmitter::set_scan_response_data::queue(
                    self,
                    tx,
                    &data,
                    Self::startup_completion(),
                )
            }
            StartupState::SetScanResponseData => {
                self.startup.state = Some(StartupState::SetAdvertiseEnable);

                le::transmitter::set_advertising_enable::queue(
                    self,
                    tx,
                    true,
                    Self::startup_completion(),
                )
            }
            StartupState::SetAdvertiseEnable => {
                self.startup.state = Some(StartupState::Complete);

                log::info!("startup complete, advertising");

                Ok(())
            }
            StartupState::SetScanParameters => {
                self.startup.state = Some(StartupState::SetScanEnable);

                le::receiver::set_scan_enable::queue(self, tx, true, false, Self::startup_completion())
            }
            StartupState::SetScanEnable => {
                self.startup.state = Some(StartupState::Complete);

                log::info!("startup complete, scanning");

                Ok(())
            }
            StartupState::Complete => {
                log::warn!("spurious startup completion after the sequence finished");

                Ok(())
            }
        };

        if let Err(e) = queued {
            log::error!("startup aborted, could not queue the next command: {}", e);
            tx.stop();
        }
    }

    fn on_command_complete(&mut self, tx: &mut PacketQueue, data: events::CommandCompleteData) {
        log::trace!(
            "controller accepts {} more command packets",
            data.number_of_hci_command_packets
        );

        if data.return_parameters.is_empty() {
            log::warn!(
                "dropping command complete for opcode {:#06x} without a status byte",
                data.command_opcode
            );
            return;
        }

        let pending = match self.pending_commands.remove(&data.command_opcode) {
            Some(pending) => pending,
            None => {
                log::warn!(
                    "command complete for opcode {:#06x} with no command in flight",
                    data.command_opcode
                );
                return;
            }
        };

        let response = CommandResponse {
            status: error::Error::from(data.return_parameters[0]),
            return_parameters: data.return_parameters[1..].to_vec(),
        };

        (pending.completion)(self, tx, response);
    }

    fn on_le_connection_complete(&mut self, data: events::LEConnectionCompleteData) {
        if !data.status.is_ok() {
            log::warn!(
                "connection to {:02x?} failed: {}",
                data.peer_address,
                data.status
            );
            return;
        }

        match data.role {
            common::LERole::Master => log::info!(
                "connected as master to {:02x?}, handle {}",
                data.peer_address,
                data.connection_handle
            ),
            common::LERole::Slave => log::info!(
                "connected as slave to {:02x?}, handle {}",
                data.peer_address,
                data.connection_handle
            ),
        }

        let mut connection = l2cap::AclConnection::new(data.connection_handle);

        // Channel handlers must be in place before the first ACL data arrives
        if let Some(handler) = &self.attribute_channel {
            connection.register_channel(
                l2cap::ChannelIdentifier::Le(l2cap::LeUChannelIdentifier::AttributeProtocol),
                Rc::clone(handler),
            );
        }

        if self
            .connections
            .insert(data.connection_handle, connection)
            .is_some()
        {
            log::warn!(
                "controller reused connection handle {}",
                data.connection_handle
            );
        }
    }

    fn on_disconnection_complete(&mut self, data: events::DisconnectionCompleteData) {
        if !data.status.is_ok() {
            log::warn!("disconnection failed: {}", data.status);
            return;
        }

        match self.connections.remove(&data.connection_handle) {
            Some(_) => log::info!(
                "disconnected, handle {}, reason {:#04x}",
                data.connection_handle,
                data.reason
            ),
            None => log::warn!(
                "disconnection for handle {} which has no connection",
                data.connection_handle
            ),
        }
    }

    fn on_event(&mut self, tx: &mut PacketQueue, payload: &[u8]) {
        use self::events::{EventError, EventsData, LEMetaData};

        match EventsData::try_from_packet(payload) {
            Ok(EventsData::CommandComplete(data)) => self.on_command_complete(tx, data),
            Ok(EventsData::DisconnectionComplete(data)) => self.on_disconnection_complete(data),
            Ok(EventsData::LEMeta(LEMetaData::ConnectionComplete(data))) => {
                self.on_le_connection_complete(data)
            }
            Ok(EventsData::LEMeta(LEMetaData::AdvertisingReport(reports))) => {
                for report in &reports {
                    match &mut self.advertising_report_handler {
                        Some(handler) => handler(report),
                        None => log::info!("advertising report from {:02x?}", report.address),
                    }
                }
            }
            Err(EventError::UnknownEvent(code)) => {
                log::debug!("ignoring unhandled event {:#04x}", code)
            }
            Err(EventError::UnknownSubEvent(code)) => {
                log::debug!("ignoring unhandled LE Meta subevent {:#04x}", code)
            }
            Err(e) => log::warn!("dropping bad event packet: {}", e),
        }
    }

    fn on_acl_packet(&mut self, tx: &mut PacketQueue, payload: &[u8]) {
        if payload.len() < 2 {
            log::warn!("dropping truncated ACL data packet");
            return;
        }

        let raw_handle = <u16>::from_le_bytes([payload[0], payload[1]]) & 0xFFF;

        let handle = match ConnectionHandle::try_from(raw_handle) {
            Ok(handle) => handle,
            Err(reason) => {
                log::warn!("dropping ACL data packet: {}", reason);
                return;
            }
        };

        match self.connections.get_mut(&handle) {
            Some(connection) => connection.on_received_data(tx, payload),
            None => log::debug!("dropping ACL data for unknown connection handle {}", handle),
        }
    }
}

impl PacketDelegate for HostController {
    fn on_packet_received(&mut self, tx: &mut PacketQueue, packet: HciPacket) {
        match packet.get_kind() {
            PacketKind::Event => self.on_event(tx, packet.get_payload()),
            PacketKind::AclData => self.on_acl_packet(tx, packet.get_payload()),
            PacketKind::Command => {
                log::warn!("received a command packet from the controller, dropping it")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHandler;

    impl l2cap::ChannelHandler for NullHandler {
        fn on_pdu(&mut self, _: &mut l2cap::Link<'_>, _: l2cap::ChannelIdentifier, _: &[u8]) {}
    }

    fn peripheral_host() -> HostController {
        let mut advertising_data = AdvertisingData::new();
        advertising_data
            .try_push(crate::gap::advertise::AssignedTypes::Flags, &[0x06])
            .unwrap();

        let mut scan_response_data = AdvertisingData::new();
        scan_response_data
            .try_push(
                crate::gap::advertise::AssignedTypes::ShortenedLocalName,
                b"test",
            )
            .unwrap();

        HostController::peripheral(NullHandler, advertising_data, scan_response_data)
    }

    /// Pop the next queued packet and check it is the expected command, then feed back a
    /// Command Complete event carrying the given return parameters.
    fn expect_and_complete(
        host: &mut HostController,
        tx: &mut PacketQueue,
        opcode: u16,
        parameter: &[u8],
        return_parameters: &[u8],
    ) {
        let packet = tx.next_packet().expect("no command was queued");

        assert_eq!(PacketKind::Command, packet.get_kind());

        let mut expected = Vec::new();
        expected.extend_from_slice(&opcode.to_le_bytes());
        expected.push(parameter.len() as u8);
        expected.extend_from_slice(parameter);

        assert_eq!(
            expected,
            packet.get_payload(),
            "unexpected parameters for opcode {:#06x}",
            opcode
        );

        let mut event_params = vec![0x01];
        event_params.extend_from_slice(&opcode.to_le_bytes());
        event_params.extend_from_slice(return_parameters);

        let mut payload = vec![0x0E, event_params.len() as u8];
        payload.extend_from_slice(&event_params);

        host.on_packet_received(tx, HciPacket::new(PacketKind::Event, payload));
    }

    fn version_4_0_return() -> Vec<u8> {
        vec![0x00, 0x06, 0x00, 0x00, 0x06, 0x0F, 0x00, 0x00, 0x00]
    }

    #[test]
    fn hci_packet_codec_round_trip() {
        let packet = HciPacket::new(PacketKind::Command, vec![0x03, 0x0C, 0x00]);
        let bytes = packet.to_bytes();

        assert_eq!(vec![0x01, 0x03, 0x0C, 0x00], bytes);
        assert_eq!(packet, HciPacket::from_bytes(&bytes).unwrap());
    }

    #[test]
    fn hci_packet_codec_rejects_bad_lengths() {
        // Event declaring 3 parameter bytes but carrying 1
        assert_eq!(
            Err(PacketError::Malformed("event parameter length")),
            HciPacket::from_bytes(&[0x04, 0x0E, 0x03, 0x00])
        );

        // ACL data declaring 2 data bytes but carrying 3
        assert_eq!(
            Err(PacketError::Malformed("ACL data length")),
            HciPacket::from_bytes(&[0x02, 0x40, 0x00, 0x02, 0x00, 0xAA, 0xBB, 0xCC])
        );

        assert_eq!(
            Err(PacketError::UnknownPacketKind(0x03)),
            HciPacket::from_bytes(&[0x03, 0x00])
        );

        assert_eq!(Err(PacketError::Empty), HciPacket::from_bytes(&[]));
    }

    #[test]
    fn acl_data_packet_round_trip() {
        let handle = ConnectionHandle::try_from(0x0040).unwrap();

        let acl = HciAclData::new(
            handle,
            AclPacketBoundary::FirstNonFlushable,
            vec![0xAA, 0xBB],
        );

        let packet = acl.clone().into_packet();

        assert_eq!(PacketKind::AclData, packet.get_kind());
        assert_eq!(&[0x40, 0x00, 0x02, 0x00, 0xAA, 0xBB], packet.get_payload());

        assert_eq!(
            acl,
            HciAclData::try_from_packet_payload(packet.get_payload()).unwrap()
        );
    }

    #[test]
    fn acl_data_rejects_reserved_boundary_flag() {
        // Boundary bits 0b11 are not valid for a 4.0 controller
        let payload = [0x40, 0x30, 0x01, 0x00, 0xAA];

        assert_eq!(
            Err(HciAclPacketError::InvalidPacketBoundaryFlag(0x3)),
            HciAclData::try_from_packet_payload(&payload)
        );
    }

    #[test]
    fn duplicate_opcode_is_rejected() {
        let mut host = HostController::central();
        let mut tx = PacketQueue::new();

        host.queue_command(&mut tx, TestCommand, Box::new(|_, _, _| ()))
            .unwrap();

        assert_eq!(
            Err(HostError::CommandAlreadyQueued(0x0C03)),
            host.queue_command(&mut tx, TestCommand, Box::new(|_, _, _| ()))
        );
    }

    #[derive(Clone, Copy)]
    struct TestCommand;

    impl CommandParameter for TestCommand {
        const COMMAND: opcodes::HciCommand =
            opcodes::HciCommand::ControllerAndBaseband(opcodes::ControllerAndBaseband::Reset);
        fn parameter(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    #[test]
    fn orphan_command_complete_is_dropped() {
        let mut host = HostController::central();
        let mut tx = PacketQueue::new();

        // Command complete for an opcode that was never queued
        let payload = vec![0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00];

        host.on_packet_received(&mut tx, HciPacket::new(PacketKind::Event, payload));

        assert!(!tx.has_packets());
        assert!(!tx.is_stopped());
    }

    #[test]
    fn peripheral_startup_queues_the_exact_command_history() {
        let mut host = peripheral_host();
        let mut tx = PacketQueue::new();

        host.start(&mut tx).unwrap();

        expect_and_complete(&mut host, &mut tx, 0x0C03, &[], &[0x00]);

        let event_mask = events::event_mask(events::Events::default_mask_events());
        expect_and_complete(&mut host, &mut tx, 0x0C01, &event_mask.to_le_bytes(), &[0x00]);

        expect_and_complete(&mut host, &mut tx, 0x1001, &[], &version_4_0_return());

        let le_mask = events::le_event_mask(events::LEMeta::default_mask_events());
        expect_and_complete(&mut host, &mut tx, 0x2001, &le_mask.to_le_bytes(), &[0x00]);

        expect_and_complete(&mut host, &mut tx, 0x0C6D, &[0x01, 0x00], &[0x00]);

        let adv_params = [
            0x00, 0x08, // minimum interval
            0x00, 0x08, // maximum interval
            0x00, // connectable undirected
            0x00, // own address public
            0x00, // peer address public
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // peer address
            0x07, // all three channels
            0x00, // no filter policy
        ];
        expect_and_complete(&mut host, &mut tx, 0x2006, &adv_params, &[0x00]);

        let mut adv_data = vec![0x03, 0x02, 0x01, 0x06];
        adv_data.resize(32, 0);
        expect_and_complete(&mut host, &mut tx, 0x2008, &adv_data, &[0x00]);

        let mut scan_rsp = vec![0x06, 0x05, 0x08];
        scan_rsp.extend_from_slice(b"test");
        scan_rsp.resize(32, 0);
        expect_and_complete(&mut host, &mut tx, 0x2009, &scan_rsp, &[0x00]);

        expect_and_complete(&mut host, &mut tx, 0x200A, &[0x01], &[0x00]);

        assert!(!tx.has_packets(), "no commands expected after startup");
        assert!(!tx.is_stopped());
    }

    #[test]
    fn startup_aborts_on_a_legacy_controller() {
        let mut host = peripheral_host();
        let mut tx = PacketQueue::new();

        host.start(&mut tx).unwrap();

        expect_and_complete(&mut host, &mut tx, 0x0C03, &[], &[0x00]);

        let event_mask = events::event_mask(events::Events::default_mask_events());
        expect_and_complete(&mut host, &mut tx, 0x0C01, &event_mask.to_le_bytes(), &[0x00]);

        // HCI version 5 is Bluetooth 3.0 + HS
        let version_3_0 = [0x00, 0x05, 0x00, 0x00, 0x05, 0x0F, 0x00, 0x00, 0x00];
        expect_and_complete(&mut host, &mut tx, 0x1001, &[], &version_3_0);

        assert!(!tx.has_packets(), "no further commands after the abort");
        assert!(tx.is_stopped(), "the transport must be stopped");
    }

    #[test]
    fn startup_aborts_on_a_command_failure() {
        let mut host = peripheral_host();
        let mut tx = PacketQueue::new();

        host.start(&mut tx).unwrap();

        // Reset fails with Hardware Failure
        expect_and_complete(&mut host, &mut tx, 0x0C03, &[], &[0x03]);

        assert!(!tx.has_packets());
        assert!(tx.is_stopped());
    }

    #[test]
    fn central_startup_scans_instead_of_advertising() {
        let mut host = HostController::central();
        let mut tx = PacketQueue::new();

        host.start(&mut tx).unwrap();

        expect_and_complete(&mut host, &mut tx, 0x0C03, &[], &[0x00]);

        let event_mask = events::event_mask(events::Events::default_mask_events());
        expect_and_complete(&mut host, &mut tx, 0x0C01, &event_mask.to_le_bytes(), &[0x00]);

        expect_and_complete(&mut host, &mut tx, 0x1001, &[], &version_4_0_return());

        // The central adds the advertising report subevent to the LE mask
        let le_mask = events::le_event_mask(&[
            events::LEMeta::ConnectionComplete,
            events::LEMeta::ConnectionUpdateComplete,
            events::LEMeta::AdvertisingReport,
        ]);
        expect_and_complete(&mut host, &mut tx, 0x2001, &le_mask.to_le_bytes(), &[0x00]);

        expect_and_complete(&mut host, &mut tx, 0x0C6D, &[0x01, 0x00], &[0x00]);

        let scan_params = [0x01, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00];
        expect_and_complete(&mut host, &mut tx, 0x200B, &scan_params, &[0x00]);

        expect_and_complete(&mut host, &mut tx, 0x200C, &[0x01, 0x00], &[0x00]);

        assert!(!tx.has_packets());
        assert!(!tx.is_stopped());
    }

    #[test]
    fn connected_peripheral_answers_att_requests() {
        use crate::gatt;

        let mut builder = gatt::ServerBuilder::new();
        builder.add_gap_service("ble-host", 0);

        let server = builder.make_server(None);

        let mut host = HostController::peripheral(
            server,
            AdvertisingData::new(),
            AdvertisingData::new(),
        );
        let mut tx = PacketQueue::new();

        // LE Connection Complete: slave role, handle 0x0040
        let connection_event = vec![
            0x3E, 0x13, 0x01, 0x00, 0x40, 0x00, 0x01, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
            0x50, 0x00, 0x00, 0x00, 0xC8, 0x00, 0x01,
        ];

        host.on_packet_received(&mut tx, HciPacket::new(PacketKind::Event, connection_event));

        // An ATT Exchange MTU request riding a complete ACL frame
        let request = vec![
            0x40, 0x20, 0x07, 0x00, // handle 0x0040, first fragment, 7 bytes
            0x03, 0x00, 0x04, 0x00, // L2CAP: 3 byte PDU for the ATT channel
            0x02, 0x00, 0x02, // Exchange MTU request, client MTU 512
        ];

        host.on_packet_received(&mut tx, HciPacket::new(PacketKind::AclData, request.clone()));

        let response = tx.next_packet().expect("no ATT response was queued");

        assert_eq!(PacketKind::AclData, response.get_kind());
        // The server was built at the minimum MTU, so 23 wins the negotiation
        assert_eq!(
            &[0x40, 0x00, 0x07, 0x00, 0x03, 0x00, 0x04, 0x00, 0x03, 0x17, 0x00],
            response.get_payload()
        );

        // After the disconnection the connection is gone and its data is dropped
        let disconnection_event = vec![0x05, 0x04, 0x00, 0x40, 0x00, 0x13];

        host.on_packet_received(&mut tx, HciPacket::new(PacketKind::Event, disconnection_event));
        host.on_packet_received(&mut tx, HciPacket::new(PacketKind::AclData, request));

        assert!(!tx.has_packets());
    }

    #[test]
    fn advertising_reports_reach_the_handler_once_per_record() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut host = HostController::central();
        let mut tx = PacketQueue::new();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);

        host.set_advertising_report_handler(move |report| {
            seen_clone.borrow_mut().push(report.address);
        });

        let payload = vec![
            0x3E, 0x19, 0x02, 0x02, // two reports
            0x00, 0x00, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x03, 0x02, 0x01, 0x06, 0xC5, 0x04,
            0x01, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x00, 0x7F,
        ];

        host.on_packet_received(&mut tx, HciPacket::new(PacketKind::Event, payload));

        assert_eq!(
            vec![
                [0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F],
                [0x11, 0x12, 0x13, 0x14, 0x15, 0x16]
            ],
            *seen.borrow()
        );
    }
}
