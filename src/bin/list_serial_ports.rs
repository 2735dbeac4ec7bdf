//! Prints the serial ports available on this host.

use anyhow::Result;

use sensor_telemetry::collector::ports::{describe, list_serial_ports};

fn main() -> Result<()> {
    println!("Available ports");

    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No ports available");
    }

    for port in &ports {
        println!("{}", describe(port));
    }

    Ok(())
}
