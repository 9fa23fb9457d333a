//! Controller and Baseband commands

/// Reset the controller
///
/// This resets the controller and the link layer, dropping any state left over from a previous
/// host. It is always the first command of a startup sequence.
pub mod reset {
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::ControllerAndBaseband(opcodes::ControllerAndBaseband::Reset);

    #[derive(Clone, Copy)]
    struct Parameter;

    impl CommandParameter for Parameter {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            Vec::new()
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        host.queue_command(tx, Parameter, completion)
    }
}

/// Enable events
///
/// The controller only forwards events whose bit is set in the event mask. Bit `code - 1`
/// enables the event with that code.
pub mod set_event_mask {
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::ControllerAndBaseband(opcodes::ControllerAndBaseband::SetEventMask);

    struct Parameter {
        mask: u64,
    }

    impl CommandParameter for Parameter {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            self.mask.to_le_bytes().to_vec()
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        enabled_events: &[events::Events],
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        let parameter = Parameter {
            mask: events::event_mask(enabled_events),
        };

        host.queue_command(tx, parameter, completion)
    }
}

/// Tell the controller that the host supports LE
///
/// Required on 4.0 controllers before any LE link level traffic. The second flag enables
/// simultaneous LE and BR/EDR to the same peer, which this host never requests.
pub mod write_le_host_supported {
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand = opcodes::HciCommand::ControllerAndBaseband(
        opcodes::ControllerAndBaseband::WriteLEHostSupported,
    );

    #[derive(Clone, Copy)]
    struct Parameter {
        le_supported_host: bool,
        simultaneous_le_host: bool,
    }

    impl CommandParameter for Parameter {
        const COMMAND: opcodes::HciCommand = COMMAND;
        fn parameter(&self) -> Vec<u8> {
            vec![
                self.le_supported_host as u8,
                self.simultaneous_le_host as u8,
            ]
        }
    }

    pub fn queue(
        host: &mut HostController,
        tx: &mut PacketQueue,
        le_supported_host: bool,
        simultaneous_le_host: bool,
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        let parameter = Parameter {
            le_supported_host,
            simultaneous_le_host,
        };

        host.queue_command(tx, parameter, completion)
    }
}
