//! LE advertising commands

pub mod set_advertising_parameters {
    use crate::hci::le::common::OwnAddressType;
    use crate::hci::*;
    use crate::BluetoothDeviceAddress;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::LEController(opcodes::LEController::SetAdvertisingParameters);

    /// Advertising Type
    ///
    /// Enumeration for the 'Advertising Type' advertising parameter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum AdvertisingType {
        ConnectableAndScannableUndirectedAdvertising,
        ConnectableHighDutyCycleDirectedAdvertising,
        ScannableUndirectedAdvertising,
        NonConnectableUndirectedAdvertising,
    }

    impl AdvertisingType {
        fn into_val(self) -> u8 {
            match self {
                AdvertisingType::ConnectableAndScannableUndirectedAdvertising => 0x00,
                AdvertisingType::ConnectableHighDutyCycleDirectedAdvertising => 0x01,
                AdvertisingType::ScannableUndirectedAdvertising => 0x02,
                AdvertisingType::NonConnectableUndirectedAdvertising => 0x03,
            }
        }
    }

    impl Default for AdvertisingType {
        fn default() -> Self {
            AdvertisingType::ConnectableAndScannableUndirectedAdvertising
        }
    }

    /// Peer address type
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum PeerAddressType {
        PublicAddress,
        RandomAddress,
    }

    impl PeerAddressType {
        fn into_val(self) -> u8 {
            match self {
                PeerAddressType::PublicAddress => 0x00,
                PeerAddressType::RandomAddress => 0x01,
            }
        }
    }

    impl Default for PeerAddressType {
        fn default() -> Self {
            PeerAddressType::PublicAddress
        }
    }

    /// Advertising channels
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum AdvertisingChannel {
        Channel37,
        Channel38,
        Channel39,
    }

    impl AdvertisingChannel {
        fn into_val(self) -> u8 {
            match self {
                AdvertisingChannel::Channel37 => 0x01,
                AdvertisingChannel::Channel38 => 0x02,
                AdvertisingChannel::Channel39 => 0x04,
            }
        }

        pub fn default_channels() -> &'static [AdvertisingChannel] {
            &[
                AdvertisingChannel::Channel37,
                AdvertisingChannel::Channel38,
                AdvertisingChannel::Channel39,
            ]
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum AdvertisingFilterPolicy {
        AllDevices,
        AllConnectionRequestsWhitelistedDeviceScanRequests,
        AllScanRequestsWhitelistedDeviceConnectionRequests,
        WhitelistedDevices,
    }

    impl AdvertisingFilterPolicy {
        fn into_val(self) -> u8 {
            match self {
                AdvertisingFilterPolicy::AllDevices => 0x00,
                AdvertisingFilterPolicy::AllConnectionRequestsWhitelistedDeviceScanRequests => 0x01,
                AdvertisingFilterPolicy::AllScanRequestsWhitelistedDeviceConnectionRequests => 0x02,
                AdvertisingFilterPolicy::WhitelistedDevices => 0x03,
            }
        }
    }

    impl Default for AdvertisingFilterPolicy {
        fn default() -> Self {
            AdvertisingFilterPolicy::AllDevices
        }
    }

    /// All the parameters of the advertising parameters command
    ///
    /// The default values are the ones from the Bluetooth Core specification, except for the
    /// peer address which has no default and is set to zero.
    #[derive(Debug, Clone)]
    pub struct AdvertisingParameters<'a> {
        pub minimum_advertising_interval: u16,
        pub maximum_advertising_interval: u16,
        pub advertising_type: AdvertisingType,
        pub own_address_type: OwnAddressType,
        pub peer_address_type: PeerAddressType,
        pub peer_address: BluetoothDeviceAddress,
        pub advertising_channel_map: &'a [AdvertisingChannel],
        pub advertising_filter_policy: AdvertisingFilterPolicy,
    }

    impl<'a> Default for AdvertisingParameters<'a> {
        fn default() -> Self {
            AdvertisingParameters {
                minimum_advertising_interval: 0x0800,
                maximum_advertising_interval: 0x0800,
                advertising_type: AdvertisingType::default(),
                own_address_type: OwnAddressType::default(),
                peer_address_type: PeerAddressType::default(),
                peer_address: [0u8; 6],
                advertising_channel_map: AdvertisingChannel::default_channels(),
                advertising_filter_policy: AdvertisingFilterPolicy::default(),
            }
        }
    }

    impl<'a> CommandParameter for AdvertisingParameters<'a> {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            let mut parameter = Vec::with_capacity(15);

            parameter.extend_from_slice(&self.minimum_advertising_interval.to_le_bytes());
            parameter.extend_from_slice(&self.maximum_advertising_interval.to_le_bytes());
            parameter.push(self.advertising_type.into_val());
            parameter.push(self.own_address_type.into_val());
            parameter.push(self.peer_address_type.into_val());
            parameter.extend_from_slice(&self.peer_address);
            parameter.push(
                self.advertising_channel_map
                    .iter()
                    .fold(0u8, |map, c| map | c.into_val()),
            );
            parameter.push(self.advertising_filter_policy.into_val());

            parameter
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        parameters: AdvertisingParameters,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        host.queue_command(tx, parameters, completion)
    }
}

pub mod set_advertising_data {
    use crate::gap::advertise::AdvertisingData;
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::LEController(opcodes::LEController::SetAdvertisingData);

    struct Parameter {
        length: u8,
        data: [u8; 31],
    }

    impl CommandParameter for Parameter {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            let mut parameter = Vec::with_capacity(32);

            parameter.push(self.length);
            parameter.extend_from_slice(&self.data);

            parameter
        }
    }

    /// The parameter block is a fixed 32 bytes: the significant length followed by the data
    /// zero padded out to 31 bytes.
    fn parameter_from(advertising_data: &AdvertisingData) -> Parameter {
        let significant = advertising_data.data();

        let mut data = [0u8; 31];
        data[..significant.len()].copy_from_slice(significant);

        Parameter {
            length: significant.len() as u8,
            data,
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        advertising_data: &AdvertisingData,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        host.queue_command(tx, parameter_from(advertising_data), completion)
    }
}

pub mod set_scan_response_data {
    use crate::gap::advertise::AdvertisingData;
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::LEController(opcodes::LEController::SetScanResponseData);

    struct Parameter {
        length: u8,
        data: [u8; 31],
    }

    impl CommandParameter for Parameter {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            let mut parameter = Vec::with_capacity(32);

            parameter.push(self.length);
            parameter.extend_from_slice(&self.data);

            parameter
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        scan_response_data: &AdvertisingData,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        let significant = scan_response_data.data();

        let mut data = [0u8; 31];
        data[..significant.len()].copy_from_slice(significant);

        let parameter = Parameter {
            length: significant.len() as u8,
            data,
        };

        host.queue_command(tx, parameter, completion)
    }
}

pub mod set_advertising_enable {
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::LEController(opcodes::LEController::SetAdvertisingEnable);

    #[derive(Clone, Copy)]
    struct Parameter {
        enable: bool,
    }

    impl CommandParameter for Parameter {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            vec![self.enable as u8]
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        enable: bool,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        host.queue_command(tx, Parameter { enable }, completion)
    }
}
