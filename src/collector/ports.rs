//! Serial port discovery.

use tokio_serial::{SerialPortInfo, SerialPortType};

use crate::error::Result;

/// Serial ports currently present on the host.
///
/// # Errors
///
/// Returns `Io` if the platform enumeration fails.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = tokio_serial::available_ports().map_err(std::io::Error::from)?;
    Ok(ports)
}

/// One-line description, e.g. `/dev/ttyACM0 - Board in FS mode (MicroPython)`.
pub fn describe(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial device");
            match usb.manufacturer.as_deref() {
                Some(manufacturer) => format!("{} - {} ({})", port.port_name, product, manufacturer),
                None => format!("{} - {}", port.port_name, product),
            }
        }
        SerialPortType::PciPort => format!("{} - PCI serial port", port.port_name),
        SerialPortType::BluetoothPort => format!("{} - Bluetooth serial port", port.port_name),
        SerialPortType::Unknown => format!("{} - n/a", port.port_name),
    }
}
