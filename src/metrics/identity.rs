//! Device identity: the hardware-unique id as colon-delimited hex.

use std::fs;
use std::path::Path;

use crate::error::{Result, TelemetryError};

/// Renders bytes as lowercase hex pairs joined by `:`.
///
/// # Examples
///
/// ```
/// use sensor_telemetry::metrics::identity::to_colon_hex;
///
/// assert_eq!(to_colon_hex(&[0xe6, 0x61, 0x41, 0x04]), "e6:61:41:04");
/// ```
pub fn to_colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parses hex text into bytes, ignoring `:` and `-` separators.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text
        .trim()
        .bytes()
        .filter(|b| *b != b':' && *b != b'-')
        .collect();

    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(TelemetryError::Hardware(format!(
            "Invalid hex identifier '{}'",
            text.trim()
        )));
    }

    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| {
                    TelemetryError::Hardware(format!("Invalid hex identifier '{}'", text.trim()))
                })
        })
        .collect()
}

/// Number of leading bytes of a machine-id file used as the unique id.
pub const UNIQUE_ID_LEN: usize = 8;

/// Reads the hardware unique id from a hex file (`/etc/machine-id`,
/// `/sys/firmware/devicetree/base/serial-number`, ...) and renders its first
/// [`UNIQUE_ID_LEN`] bytes as colon-delimited hex.
pub fn read_machine_unique_id<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        TelemetryError::Hardware(format!("Failed to read machine id {}: {}", path.display(), e))
    })?;
    // Device-tree strings carry a trailing NUL
    let bytes = parse_hex(contents.trim_end_matches('\0'))?;
    let len = bytes.len().min(UNIQUE_ID_LEN);
    Ok(to_colon_hex(&bytes[..len]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_colon_hex_rendering() {
        let id = [0xe6, 0x61, 0x41, 0x04, 0x03, 0x24, 0xab, 0x36];
        assert_eq!(to_colon_hex(&id), "e6:61:41:04:03:24:ab:36");
        assert_eq!(to_colon_hex(&[]), "");
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(parse_hex("e6:61:4").is_err());
        assert!(parse_hex("zz:61:41:04").is_err());
        assert!(parse_hex("").is_err());
        assert_eq!(parse_hex("E6-61\n").unwrap(), vec![0xe6, 0x61]);
    }

    #[test]
    fn test_read_machine_id_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "e66141040324ab36ffeeddccbbaa9988").unwrap();

        let id = read_machine_unique_id(file.path()).unwrap();
        assert_eq!(id, "e6:61:41:04:03:24:ab:36");
    }

    #[test]
    fn test_read_device_tree_serial_with_nul() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"00000000a1b2c3d4\0").unwrap();

        let id = read_machine_unique_id(file.path()).unwrap();
        assert_eq!(id, "00:00:00:00:a1:b2:c3:d4");
    }
}
