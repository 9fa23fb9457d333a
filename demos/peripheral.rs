//! Advertise as a connectable peripheral and serve a small GATT database.
//!
//! Needs the CAP_NET_RAW capability (or root) to open the raw HCI socket of device 0.

use ble_host::gap::advertise::{AdvertisingData, AssignedTypes};
use ble_host::gatt::characteristic::Properties;
use ble_host::gatt::ServerBuilder;
use ble_host::hci::unix::HciSocket;
use ble_host::hci::HostController;
use ble_host::UUID;

const VENDOR_SERVICE: UUID = UUID::from_u128(0xFFFFFFFF_FFFF_FFFF_FFFF_FFFFFFFFFFF0);

fn main() {
    env_logger::init();

    let mut advertising_data = AdvertisingData::new();

    advertising_data
        .try_push(AssignedTypes::Flags, &[0x06])
        .expect("advertising data too long");
    advertising_data
        .try_push(
            AssignedTypes::IncompleteListOf128bitServiceClassUUIDs,
            &u128::from(VENDOR_SERVICE).to_le_bytes(),
        )
        .expect("advertising data too long");

    let mut scan_response_data = AdvertisingData::new();

    scan_response_data
        .try_push(AssignedTypes::ShortenedLocalName, b"test")
        .expect("scan response data too long");

    let mut server_builder = ServerBuilder::new();

    server_builder.add_gap_service("test", 0);

    server_builder
        .new_service(UUID::from_u16(0x180F), true)
        .into_characteristics_adder()
        .build_characteristic(
            vec![Properties::Read],
            UUID::from_u16(0x2A19),
            vec![100],
            false,
        )
        .finish_characteristic()
        .finish_service();

    server_builder
        .new_service(VENDOR_SERVICE, true)
        .into_characteristics_adder()
        .build_characteristic(
            vec![Properties::Read, Properties::Write],
            UUID::from_u128(0xFFFFFFFF_FFFF_FFFF_FFFF_FFFFFFFFFFF1),
            vec![0x00],
            true,
        )
        .finish_characteristic()
        .finish_service();

    let server = server_builder.make_server(256);

    let mut host = HostController::peripheral(server, advertising_data, scan_response_data);

    let mut socket = HciSocket::open(0).expect("cannot open HCI device 0");

    host.start(socket.packet_queue())
        .expect("cannot queue the first startup command");

    if let Err(e) = socket.run(&mut host) {
        eprintln!("transport failed: {}", e);
        std::process::exit(1);
    }
}
