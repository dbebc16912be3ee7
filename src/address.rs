use crate::AgError;

/// A Bluetooth Device Address (`BD_ADDR`) wrapper for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Format the address as a colon-separated hex string
    #[must_use]
    pub fn format_hex(&self) -> heapless::String<17> {
        let mut result = heapless::String::new();
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                result.push(':').ok();
            }
            let hex_chars = [
                '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
            ];
            result.push(hex_chars[(byte >> 4) as usize]).ok();
            result.push(hex_chars[(byte & 0x0F) as usize]).ok();
        }
        result
    }

    /// Parse a Bluetooth address from a colon-separated hex string
    ///
    /// # Errors
    /// Returns `AgError::InvalidAddress` if the string is not exactly 17
    /// characters long or contains invalid characters
    pub fn from_hex(hex: &str) -> Result<Self, AgError> {
        if hex.len() != 17 || !hex.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return Err(AgError::InvalidAddress);
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in hex.split(':').enumerate() {
            if i >= 6 || byte.len() != 2 {
                return Err(AgError::InvalidAddress);
            }
            bytes[i] = u8::from_str_radix(byte, 16).map_err(|_| AgError::InvalidAddress)?;
        }
        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for BluetoothAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; 6] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = AgError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        BluetoothAddress::from_hex(hex)
    }
}

impl TryFrom<&[u8]> for BluetoothAddress {
    type Error = AgError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() == 6 {
            let mut addr = [0u8; 6];
            addr.copy_from_slice(bytes);
            Ok(BluetoothAddress(addr))
        } else {
            Err(AgError::InvalidAddress)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hex() {
        let addr = BluetoothAddress::new([0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        assert_eq!(addr.format_hex().as_str(), "12:34:56:78:9A:BC");
    }

    #[test]
    fn test_from_hex_round_trip() {
        let addr = BluetoothAddress::from_hex("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(addr.as_bytes(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr.format_hex().as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_from_hex_rejects_malformed() {
        for bad in ["AA:BB:CC:DD:EE", "AA:BB:CC:DD:EE:GG", "AABBCCDDEEFF"] {
            assert_eq!(
                BluetoothAddress::from_hex(bad),
                Err(AgError::InvalidAddress)
            );
        }
    }

    #[test]
    fn test_try_from_slice() {
        let addr = BluetoothAddress::try_from(&[1u8, 2, 3, 4, 5, 6][..]).unwrap();
        assert_eq!(addr, BluetoothAddress::new([1, 2, 3, 4, 5, 6]));
        assert!(BluetoothAddress::try_from(&[1u8, 2, 3][..]).is_err());
    }
}
