use std::fmt::Display;

use sha2::{Digest, Sha256};


/// The provided string is not a 64-character hexadecimal SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSha256HexError;


#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sha256Hash {
    data: [u8; 32],
}

impl Sha256Hash {
    /// Calculate SHA-256 (SHA-2, not SHA-3) of the provided byte slice.
    pub fn calculate(bytes: &[u8]) -> Self {
        let raw_data = <Sha256 as Digest>::digest(bytes);

        Self {
            data: raw_data.into(),
        }
    }

    /// Parses a lowercase or uppercase hexadecimal digest,
    /// e.g. as stored in a `char(64)` metadata column.
    pub fn try_from_hex_str(hex: &str) -> Result<Self, InvalidSha256HexError> {
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(InvalidSha256HexError);
        }

        let mut data = [0u8; 32];
        for (index, byte) in data.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16)
                .map_err(|_| InvalidSha256HexError)?;
        }

        Ok(Self { data })
    }

    pub fn to_hex_string(&self) -> String {
        self.to_string()
    }
}

impl Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.data {
            write!(f, "{:02x}", byte)?;
        }

        Ok(())
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn calculates_known_digest() {
        let hash = Sha256Hash::calculate(b"hello");

        assert_eq!(
            hash.to_hex_string(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn hex_round_trip() {
        let hash = Sha256Hash::calculate(b"round trip");
        let reparsed = Sha256Hash::try_from_hex_str(&hash.to_hex_string()).unwrap();

        assert_eq!(hash, reparsed);
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(Sha256Hash::try_from_hex_str("abc").is_err());
        assert!(Sha256Hash::try_from_hex_str(&"zz".repeat(32)).is_err());
    }
}
