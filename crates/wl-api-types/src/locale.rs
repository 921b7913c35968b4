//! Static text and style lookup for the connect-wallet button.
//!
//! Extend by adding a `Language` variant and its `Locale` table below.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
}

impl Language {
    /// Unknown language codes fall back to English.
    pub fn parse(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "ru" => Language::Ru,
            _ => Language::En,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Locale {
    pub connect_wallet: &'static str,
    pub disconnect_wallet: &'static str,
    pub copy_address: &'static str,
    pub address_copied: &'static str,
}

const EN: Locale = Locale {
    connect_wallet: "Connect Wallet",
    disconnect_wallet: "Disconnect",
    copy_address: "Copy address",
    address_copied: "Address copied!",
};

const RU: Locale = Locale {
    connect_wallet: "Подключить кошелёк",
    disconnect_wallet: "Отключить",
    copy_address: "Скопировать адрес",
    address_copied: "Адрес скопирован!",
};

pub fn locale(language: Language) -> &'static Locale {
    match language {
        Language::En => &EN,
        Language::Ru => &RU,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Light,
    Dark,
}

pub const WHITE: &str = "#ffffff";
pub const BLACK: &str = "#000000";

impl Style {
    pub fn text_color(self) -> &'static str {
        match self {
            Style::Light => BLACK,
            Style::Dark => WHITE,
        }
    }

    pub fn background_color(self) -> &'static str {
        match self {
            Style::Light => WHITE,
            Style::Dark => BLACK,
        }
    }
}

// ── Button design ──

pub struct ButtonDesign {
    pub horizontal_padding: u32,
    pub vertical_padding: u32,
    pub font_family: &'static str,
    pub font_size: u32,
    pub dropdown_top_margin: u32,
    pub dropdown_padding: u32,
    pub dropdown_width: u32,
    pub dropdown_item_height: u32,
}

pub const BUTTON_DESIGN: ButtonDesign = ButtonDesign {
    horizontal_padding: 16,
    vertical_padding: 11,
    font_family: "Segoe UI, San Francisco, Roboto, sans-serif",
    font_size: 15,
    dropdown_top_margin: 12,
    dropdown_padding: 8,
    dropdown_width: 256,
    dropdown_item_height: 40,
};
