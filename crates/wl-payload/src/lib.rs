//! Typed payload building for wallet transaction requests.
//!
//! Payloads are assembled with [`CellBuilder`] into immutable [`Cell`] trees,
//! validated while they are built, and serialized as a bag of cells before
//! they are attached to a transaction message.

pub mod address;
pub mod cell;
pub mod jetton;

pub use address::{Address, FriendlyFlags, display_address, short_form};
pub use cell::{Cell, CellBuilder, MAX_CELL_BITS, MAX_CELL_REFS};
pub use jetton::{JettonTransfer, ShopPurchase, text_comment};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("cell overflow: {needed} bits requested, {available} available")]
    BitOverflow { needed: usize, available: usize },

    #[error("cell overflow: at most {MAX_CELL_REFS} references per cell")]
    RefOverflow,

    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: u128, bits: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub(crate) fn to_hex(input: &[u8]) -> String {
    let mut output = String::with_capacity(input.len() * 2);
    for byte in input {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub(crate) fn from_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(input.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_helpers_agree() {
        let bytes = [0x00, 0x0f, 0xab, 0xff];
        assert_eq!(to_hex(&bytes), "000fabff");
        assert_eq!(from_hex("000FABff"), Some(bytes.to_vec()));
        assert_eq!(from_hex("abc"), None);
        assert_eq!(from_hex("zz"), None);
    }
}
