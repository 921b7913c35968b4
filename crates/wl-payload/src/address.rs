use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE},
};

use crate::{PayloadError, from_hex, to_hex};

const BOUNCEABLE_TAG: u8 = 0x11;
const NON_BOUNCEABLE_TAG: u8 = 0x51;
const TEST_FLAG: u8 = 0x80;

/// A standard (`addr_std`) account address: workchain plus 256-bit account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub workchain: i8,
    pub hash: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FriendlyFlags {
    pub bounceable: bool,
    pub test_only: bool,
    pub url_safe: bool,
}

impl Default for FriendlyFlags {
    fn default() -> Self {
        Self {
            bounceable: false,
            test_only: false,
            url_safe: true,
        }
    }
}

impl Address {
    /// Accepts either the raw `wc:hex` form or a 48-character user-friendly form.
    pub fn parse(input: &str) -> Result<Self, PayloadError> {
        let input = input.trim();
        if input.contains(':') {
            Self::parse_raw(input)
        } else {
            Self::parse_friendly(input).map(|(address, _)| address)
        }
    }

    pub fn parse_raw(input: &str) -> Result<Self, PayloadError> {
        let invalid = || PayloadError::InvalidAddress(input.to_owned());

        let (workchain, hash) = input.split_once(':').ok_or_else(invalid)?;
        let workchain: i8 = workchain.parse().map_err(|_| invalid())?;
        let bytes = from_hex(hash).ok_or_else(invalid)?;
        let hash: [u8; 32] = bytes.try_into().map_err(|_| invalid())?;

        Ok(Self { workchain, hash })
    }

    pub fn parse_friendly(input: &str) -> Result<(Self, FriendlyFlags), PayloadError> {
        let invalid = |reason: &str| PayloadError::InvalidAddress(format!("{input}: {reason}"));

        if input.len() != 48 {
            return Err(invalid("expected 48 characters"));
        }

        let url_safe = input.contains('-') || input.contains('_');
        let engine = if url_safe { &URL_SAFE } else { &STANDARD };
        let bytes = engine
            .decode(input.as_bytes())
            .map_err(|_| invalid("not base64"))?;
        if bytes.len() != 36 {
            return Err(invalid("expected 36 bytes"));
        }

        let expected = crc16(&bytes[..34]);
        if bytes[34..36] != expected.to_be_bytes() {
            return Err(invalid("checksum mismatch"));
        }

        let mut tag = bytes[0];
        let test_only = tag & TEST_FLAG != 0;
        tag &= !TEST_FLAG;
        let bounceable = match tag {
            BOUNCEABLE_TAG => true,
            NON_BOUNCEABLE_TAG => false,
            _ => return Err(invalid("unknown tag")),
        };

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);

        Ok((
            Self {
                workchain: bytes[1] as i8,
                hash,
            },
            FriendlyFlags {
                bounceable,
                test_only,
                url_safe,
            },
        ))
    }

    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, to_hex(&self.hash))
    }

    pub fn to_friendly(&self, flags: FriendlyFlags) -> String {
        let mut tag = if flags.bounceable {
            BOUNCEABLE_TAG
        } else {
            NON_BOUNCEABLE_TAG
        };
        if flags.test_only {
            tag |= TEST_FLAG;
        }

        let mut bytes = Vec::with_capacity(36);
        bytes.push(tag);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        bytes.extend_from_slice(&crc16(&bytes).to_be_bytes());

        if flags.url_safe {
            URL_SAFE.encode(bytes)
        } else {
            STANDARD.encode(bytes)
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_friendly(FriendlyFlags::default()))
    }
}

/// Friendly form of a session address, or the input unchanged when it is not a
/// parseable address. Session addresses are opaque to the connector.
pub fn display_address(raw: &str) -> String {
    match Address::parse(raw) {
        Ok(address) => address.to_friendly(FriendlyFlags::default()),
        Err(_) => raw.to_owned(),
    }
}

/// `UQAb...cdef` style abbreviation used on the connect button.
pub fn short_form(raw: &str) -> String {
    let friendly = display_address(raw);
    let chars: Vec<char> = friendly.chars().collect();
    if chars.len() <= 12 {
        return friendly;
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

// CRC16/XMODEM
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "0:83dfd552e63729b472fcbcc8c45ebcc6691702558b68ec7527e1ba403a0f31a8";

    #[test]
    fn crc16_xmodem_check_value() {
        assert_eq!(crc16(b"123456789"), 0x31c3);
    }

    #[test]
    fn raw_parse_rejects_garbage() {
        assert!(Address::parse_raw("0:abc...123").is_err());
        assert!(Address::parse_raw("zero:00").is_err());
        assert!(Address::parse_raw(RAW).is_ok());
    }

    #[test]
    fn friendly_form_carries_flags() {
        let address = Address::parse(RAW).unwrap();

        let bounceable = address.to_friendly(FriendlyFlags {
            bounceable: true,
            test_only: false,
            url_safe: true,
        });
        assert_eq!(bounceable.len(), 48);
        assert!(bounceable.starts_with("EQ"));

        let non_bounceable = address.to_friendly(FriendlyFlags::default());
        assert!(non_bounceable.starts_with("UQ"));

        let (parsed, flags) = Address::parse_friendly(&bounceable).unwrap();
        assert_eq!(parsed, address);
        assert!(flags.bounceable);
        assert!(!flags.test_only);
        assert_eq!(parsed.to_raw(), RAW);
    }

    #[test]
    fn friendly_parse_detects_corruption() {
        let address = Address::parse(RAW).unwrap();
        let mut friendly = address.to_friendly(FriendlyFlags::default());
        friendly.replace_range(10..11, if &friendly[10..11] == "A" { "B" } else { "A" });
        assert!(Address::parse_friendly(&friendly).is_err());
    }

    #[test]
    fn display_falls_back_to_opaque_strings() {
        assert_eq!(display_address("0:abc...123"), "0:abc...123");
        assert_eq!(short_form("0:abc...123"), "0:abc...123");

        let short = short_form(RAW);
        assert!(short.starts_with("UQ"));
        assert_eq!(short.len(), 11);
    }
}
