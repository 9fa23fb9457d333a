//! Mandatory LE controller commands

/// Enable LE Meta subevents
///
/// Like the baseband event mask, but for the subevents delivered inside the LE Meta event.
/// Receiving advertising reports requires the `AdvertisingReport` subevent bit.
pub mod set_event_mask {
    use crate::hci::*;

    const COMMAND: opcodes::HciCommand =
        opcodes::HciCommand::LEController(opcodes::LEController::SetEventMask);

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
        enabled_sub_events: &[events::LEMeta],
        completion: CommandCompletion,
    ) -> Result<(), HostError> {
        let parameter = Parameter {
            mask: events::le_event_mask(enabled_sub_events),
        };

        host.queue_command(tx, parameter, completion)
    }
}
