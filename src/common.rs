//! Well-known UUIDs and parsing of the UUID strings peripherals and firmware
//! documentation use.
//!
//! Peripherals may report UUIDs in either case and vendors often document
//! only the 16-bit short form, so every string goes through [`parse_uuid`]
//! before being compared.

use btleplug::api::bleuuid::{uuid_from_u16, uuid_from_u32};
use uuid::Uuid;

use crate::{Error, Result};

pub mod services {
    use btleplug::api::bleuuid::uuid_from_u16;
    use uuid::Uuid;

    /// Data service of the "MyBLESim" iOS peripheral simulator.
    pub const BLE_SIM_DATA: Uuid = uuid_from_u16(0x9800);
}

pub mod characteristics {
    use btleplug::api::bleuuid::uuid_from_u16;
    use uuid::Uuid;

    /// Characteristic the player firmware exposes its on/off state on.
    pub const PLAYER_STATE: Uuid = uuid_from_u16(0x2A3D);
    /// First data characteristic of the "MyBLESim" simulator (0x9801..=0x9805).
    pub const BLE_SIM_VALUE: Uuid = uuid_from_u16(0x9801);
}

/// Parse a full 128-bit UUID or a 16/32-bit short form (`"9801"`, `"2A3D"`).
///
/// Short forms are expanded onto the Bluetooth base UUID.
pub fn parse_uuid(value: &str) -> Result<Uuid> {
    let trimmed = value.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    match short.len() {
        4 => u16::from_str_radix(short, 16)
            .map(uuid_from_u16)
            .map_err(|_| Error::InvalidUuid(value.to_string())),
        8 => u32::from_str_radix(short, 16)
            .map(uuid_from_u32)
            .map_err(|_| Error::InvalidUuid(value.to_string())),
        _ => Uuid::parse_str(trimmed).map_err(|_| Error::InvalidUuid(value.to_string())),
    }
}

/// Compare two UUID strings after normalization.
pub fn same_uuid(a: &str, b: &str) -> bool {
    matches!((parse_uuid(a), parse_uuid(b)), (Ok(a), Ok(b)) if a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casing_does_not_matter() {
        let upper = parse_uuid("00002A3D-0000-1000-8000-00805F9B34FB").unwrap();
        let lower = parse_uuid("00002a3d-0000-1000-8000-00805f9b34fb").unwrap();
        assert_eq!(upper, lower);
        assert!(same_uuid(
            "00002a3d-0000-1000-8000-00805f9b34fb",
            "00002A3D-0000-1000-8000-00805F9B34FB"
        ));
    }

    #[test]
    fn short_forms_expand_onto_base_uuid() {
        assert_eq!(
            parse_uuid("2a3d").unwrap(),
            parse_uuid("00002A3D-0000-1000-8000-00805F9B34FB").unwrap()
        );
        assert_eq!(
            parse_uuid("9801").unwrap().to_string(),
            "00009801-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(parse_uuid("0x9800").unwrap(), uuid_from_u16(0x9800));
        assert_eq!(parse_uuid("00009800").unwrap(), uuid_from_u16(0x9800));
    }

    #[test]
    fn constants_match_their_documented_strings() {
        assert_eq!(
            characteristics::PLAYER_STATE,
            parse_uuid("00002A3D-0000-1000-8000-00805F9B34FB").unwrap()
        );
        assert_eq!(services::BLE_SIM_DATA, parse_uuid("9800").unwrap());
        assert_eq!(characteristics::BLE_SIM_VALUE, parse_uuid("9801").unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_uuid("98zz"), Err(Error::InvalidUuid(_))));
        assert!(matches!(parse_uuid("not-a-uuid"), Err(Error::InvalidUuid(_))));
        assert!(!same_uuid("9800", "nope"));
    }
}
