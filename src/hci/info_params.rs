//! Informational parameter commands

/// Read the version information of the local controller
///
/// The HCI version byte is what the startup sequences use to reject controllers older than
/// Bluetooth 4.0.
pub mod read_local_version_information {
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand = opcodes::HciCommand::InformationParameters(
        opcodes::InformationParameters::ReadLocalSupportedVersionInformation,
    );

    /// The HCI version value assigned to Bluetooth 4.0
    pub const HCI_VERSION_4_0: u8 = 6;

    #[derive(Clone, Copy)]
    struct Parameter;

    impl CommandParameter for Parameter {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    /// Version information returned by the controller
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VersionInformation {
        pub hci_version: u8,
        pub hci_revision: u16,
        pub lmp_version: u8,
        pub manufacturer_name: u16,
        pub lmp_subversion: u16,
    }

    impl VersionInformation {
        /// Parse the return parameters following the status byte
        pub fn try_from(return_parameters: &[u8]) -> Result<Self, HostError> {
            if return_parameters.len() != 8 {
                return Err(HostError::InvalidReturnParameters(
                    "ReadLocalVersionInformation",
                ));
            }

            Ok(VersionInformation {
                hci_version: return_parameters[0],
                hci_revision: <u16>::from_le_bytes([return_parameters[1], return_parameters[2]]),
                lmp_version: return_parameters[3],
                manufacturer_name: <u16>::from_le_bytes([
                    return_parameters[4],
                    return_parameters[5],
                ]),
                lmp_subversion: <u16>::from_le_bytes([
                    return_parameters[6],
                    return_parameters[7],
                ]),
            })
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        host.queue_command(tx, Parameter, completion)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn version_information_parses() {
            let raw = [0x06, 0x22, 0x11, 0x06, 0x0F, 0x00, 0x33, 0x22];

            let info = VersionInformation::try_from(&raw).unwrap();

            assert_eq!(HCI_VERSION_4_0, info.hci_version);
            assert_eq!(0x1122, info.hci_revision);
            assert_eq!(0x000F, info.manufacturer_name);
            assert_eq!(0x2233, info.lmp_subversion);
        }

        #[test]
        fn short_return_parameters_are_rejected() {
            assert!(VersionInformation::try_from(&[0x06, 0x22]).is_err());
        }
    }
}
