//! LE scanning commands

pub mod set_scan_parameters {
    use crate::hci::le::common::OwnAddressType;
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::LEController(opcodes::LEController::SetScanParameters);

    /// Whether the scanner sends scan requests
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LEScanType {
        /// Only listen for advertising packets
        PassiveScanning,
        /// Request scan response data from advertisers
        ActiveScanning,
    }

    impl LEScanType {
        fn into_val(self) -> u8 {
            match self {
                LEScanType::PassiveScanning => 0x00,
                LEScanType::ActiveScanning => 0x01,
            }
        }
    }

    impl Default for LEScanType {
        fn default() -> Self {
            LEScanType::PassiveScanning
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ScanningFilterPolicy {
        AllDevices,
        WhitelistedDevices,
    }

    impl ScanningFilterPolicy {
        fn into_val(self) -> u8 {
            match self {
                ScanningFilterPolicy::AllDevices => 0x00,
                ScanningFilterPolicy::WhitelistedDevices => 0x01,
            }
        }
    }

    impl Default for ScanningFilterPolicy {
        fn default() -> Self {
            ScanningFilterPolicy::AllDevices
        }
    }

    /// The parameters of the scan parameters command
    ///
    /// Defaults are the Bluetooth Core specification defaults: passive scanning with a 10 ms
    /// interval and window.
    #[derive(Debug, Clone)]
    pub struct ScanningParameters {
        pub scan_type: LEScanType,
        pub scan_interval: u16,
        pub scan_window: u16,
        pub own_address_type: OwnAddressType,
        pub scanning_filter_policy: ScanningFilterPolicy,
    }

    impl Default for ScanningParameters {
        fn default() -> Self {
            ScanningParameters {
                scan_type: LEScanType::default(),
                scan_interval: 0x0010,
                scan_window: 0x0010,
                own_address_type: OwnAddressType::default(),
                scanning_filter_policy: ScanningFilterPolicy::default(),
            }
        }
    }

    impl CommandParameter for ScanningParameters {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            let mut parameter = Vec::with_capacity(7);

            parameter.push(self.scan_type.into_val());
            parameter.extend_from_slice(&self.scan_interval.to_le_bytes());
            parameter.extend_from_slice(&self.scan_window.to_le_bytes());
            parameter.push(self.own_address_type.into_val());
            parameter.push(self.scanning_filter_policy.into_val());

            parameter
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        parameters: ScanningParameters,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        host.queue_command(tx, parameters, completion)
    }
}

pub mod set_scan_enable {
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::LEController(opcodes::LEController::SetScanEnable);

    #[derive(Clone, Copy)]
    struct Parameter {
        enable: bool,
        filter_duplicates: bool,
    }

    impl CommandParameter for Parameter {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            vec![self.enable as u8, self.filter_duplicates as u8]
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        enable: bool,
        filter_duplicates: bool,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        let parameter = Parameter {
            enable,
            filter_duplicates,
        };

        host.queue_command(tx, parameter, completion)
    }
}
