use wl_api_types::TransactionMessage;

use crate::{Address, Cell, CellBuilder, PayloadError};

pub const JETTON_TRANSFER_OP: u32 = 0x0f8a_7ea5;
pub const TEXT_COMMENT_OP: u32 = 0;

/// TON attached to a jetton transfer to pay for its execution (0.05 TON).
pub const TRANSFER_ATTACHED_NANOTONS: u128 = 50_000_000;

#[derive(Debug, Clone)]
pub struct JettonTransfer {
    pub query_id: u64,
    /// Jetton amount in base units.
    pub amount: u128,
    pub destination: Address,
    pub response_destination: Option<Address>,
    pub forward_ton_amount: u128,
    pub forward_payload: Option<Cell>,
}

impl JettonTransfer {
    pub fn to_cell(&self) -> Result<Cell, PayloadError> {
        CellBuilder::new()
            .store_uint(JETTON_TRANSFER_OP as u64, 32)?
            .store_uint(self.query_id, 64)?
            .store_coins(self.amount)?
            .store_address(Some(&self.destination))?
            .store_address(self.response_destination.as_ref())?
            .store_maybe_ref(None)?
            .store_coins(self.forward_ton_amount)?
            .store_maybe_ref(self.forward_payload.clone())?
            .end_cell()
    }

    /// Message to the sender's own jetton wallet carrying this transfer.
    pub fn to_message(
        &self,
        jetton_wallet: &Address,
        attached_nanotons: u128,
    ) -> Result<TransactionMessage, PayloadError> {
        Ok(TransactionMessage {
            address: jetton_wallet.to_raw(),
            amount: attached_nanotons.to_string(),
            payload: Some(self.to_cell()?.to_boc_base64()),
            state_init: None,
        })
    }
}

pub fn text_comment(text: &str) -> Result<Cell, PayloadError> {
    CellBuilder::new()
        .store_uint(TEXT_COMMENT_OP as u64, 32)?
        .store_string_tail(text)?
        .end_cell()
}

/// A shop item bought by paying jettons to the shop's recipient address.
///
/// The forward payload comment `"<telegram user id>:<item id>"` lets the shop
/// backend attribute the incoming transfer to a player and item.
#[derive(Debug, Clone)]
pub struct ShopPurchase {
    pub item_id: u32,
    pub telegram_user_id: i64,
    pub price: u128,
    pub recipient: Address,
    pub buyer: Address,
    pub query_id: u64,
}

impl ShopPurchase {
    pub fn transfer(&self) -> Result<JettonTransfer, PayloadError> {
        let comment = format!("{}:{}", self.telegram_user_id, self.item_id);
        Ok(JettonTransfer {
            query_id: self.query_id,
            amount: self.price,
            destination: self.recipient,
            response_destination: Some(self.buyer),
            forward_ton_amount: 1,
            forward_payload: Some(text_comment(&comment)?),
        })
    }

    pub fn to_message(&self, jetton_wallet: &Address) -> Result<TransactionMessage, PayloadError> {
        self.transfer()?
            .to_message(jetton_wallet, TRANSFER_ATTACHED_NANOTONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(byte: u8) -> Address {
        Address {
            workchain: 0,
            hash: [byte; 32],
        }
    }

    #[test]
    fn transfer_layout() {
        let transfer = JettonTransfer {
            query_id: 0,
            amount: 100,
            destination: address(1),
            response_destination: Some(address(2)),
            forward_ton_amount: 1,
            forward_payload: None,
        };
        let cell = transfer.to_cell().unwrap();

        // op + query id + coins(4+8) + 2 * addr_std(267) + maybe(1) + coins(4+8) + maybe(1)
        assert_eq!(cell.bit_len(), 32 + 64 + 12 + 267 * 2 + 1 + 12 + 1);
        assert!(cell.refs().is_empty());

        let op_bits: Vec<bool> = (0..32).map(|i| cell.bit(i).unwrap()).collect();
        let op = op_bits.iter().fold(0u32, |acc, bit| (acc << 1) | *bit as u32);
        assert_eq!(op, JETTON_TRANSFER_OP);
    }

    #[test]
    fn comment_starts_with_zero_op() {
        let cell = text_comment("42:3").unwrap();
        assert_eq!(cell.bit_len(), 32 + 4 * 8);
        assert!((0..32).all(|i| cell.bit(i) == Some(false)));
    }

    #[test]
    fn purchase_message_targets_jetton_wallet() {
        let purchase = ShopPurchase {
            item_id: 3,
            telegram_user_id: 777,
            price: 1_000,
            recipient: address(9),
            buyer: address(5),
            query_id: 11,
        };
        let jetton_wallet = address(7);

        let message = purchase.to_message(&jetton_wallet).unwrap();
        assert_eq!(message.address, jetton_wallet.to_raw());
        assert_eq!(message.amount, "50000000");
        let payload = message.payload.unwrap();
        assert!(payload.starts_with("te6c"));

        let transfer = purchase.transfer().unwrap();
        let cell = transfer.to_cell().unwrap();
        assert_eq!(cell.refs().len(), 1);
        assert_eq!(cell.refs()[0], text_comment("777:3").unwrap());
    }
}
