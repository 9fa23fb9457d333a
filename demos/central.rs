//! Scan for advertising devices and print each report, resolving assigned numbers to their
//! names when the `uuids.json` table is next to the manifest.
//!
//! Needs the CAP_NET_RAW capability (or root) to open the raw HCI socket of device 0.

use ble_host::assigned::AssignedNumbers;
use ble_host::gap::advertise::AdStructIter;
use ble_host::hci::unix::HciSocket;
use ble_host::hci::HostController;
use ble_host::UUID;

fn main() {
    env_logger::init();

    let assigned_numbers =
        AssignedNumbers::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/uuids.json")).ok();

    let mut host = HostController::central();

    host.set_advertising_report_handler(move |report| {
        let rssi = match report.rssi {
            Some(rssi) => format!("{} dBm", rssi),
            None => "unavailable".to_string(),
        };

        println!("{:02x?} (RSSI {})", report.address, rssi);

        for item in AdStructIter::new(&report.data) {
            match item {
                Ok((0x02, uuids)) | Ok((0x03, uuids)) => {
                    for raw in uuids.chunks(2).filter(|c| c.len() == 2) {
                        let uuid = UUID::from_u16(u16::from_le_bytes([raw[0], raw[1]]));

                        match &assigned_numbers {
                            Some(numbers) => println!("    service {}", numbers.label(uuid)),
                            None => println!("    service {}", uuid),
                        }
                    }
                }
                Ok((0x08, name)) | Ok((0x09, name)) => {
                    println!("    name {:?}", String::from_utf8_lossy(name))
                }
                Ok((tag, value)) => println!("    type {:#04x}: {:02x?}", tag, value),
                Err(e) => {
                    println!("    bad advertising data: {}", e);
                    break;
                }
            }
        }
    });

    let mut socket = HciSocket::open(0).expect("cannot open HCI device 0");

    host.start(socket.packet_queue())
        .expect("cannot queue the first startup command");

    if let Err(e) = socket.run(&mut host) {
        eprintln!("transport failed: {}", e);
        std::process::exit(1);
    }
}
