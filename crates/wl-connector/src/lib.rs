//! Wallet session management over a bridge.
//!
//! A [`Connector`] owns at most one live wallet session per process. It turns
//! bridge events into status transitions, persists what is needed to restore
//! the session silently after a restart, and correlates transaction requests
//! with the wallet's answers.

mod config;
mod connector;
mod error;
mod mediator;
mod persistence;
mod source;
mod status;

pub use config::{ConnectorConfig, DEFAULT_MANIFEST_URL, DEFAULT_STORAGE_KEY};
pub use connector::{Connector, ConnectorSlot};
pub use error::ConnectError;
pub use mediator::{RequestMediator, RequestState, SEND_TRANSACTION_METHOD};
pub use source::{
    MYTONWALLET_BRIDGE_URL, MYTONWALLET_LINK, TELEGRAM_WALLET_LINK, TONAPI_BRIDGE_URL,
    TONKEEPER_LINK, resolve,
};
pub use status::{StatusChange, StatusHub, StatusStream, Subscription};
