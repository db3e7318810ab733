use em_api_types::UiState;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum ButtonState {
    Connect,
    Mint,
    Minting,
}

impl ButtonState {
    pub fn label(self) -> &'static str {
        match self {
            ButtonState::Connect => "Connect to Wallet",
            ButtonState::Mint => "Mint NFT",
            ButtonState::Minting => "Minting.....",
        }
    }

    pub fn enabled(self) -> bool {
        !matches!(self, ButtonState::Minting)
    }
}

/// Pure projection of [`UiState`] onto what the screen shows.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ViewModel {
    pub button: ButtonState,
    pub progress: String,
    pub account_label: Option<String>,
}

impl ViewModel {
    pub fn render(state: &UiState, total_supply: u64) -> Self {
        let button = match (&state.account, state.minting) {
            (None, _) => ButtonState::Connect,
            (Some(_), false) => ButtonState::Mint,
            (Some(_), true) => ButtonState::Minting,
        };
        Self {
            button,
            progress: format!("{}/{} NFTs minted so far", state.mint_count, total_supply),
            account_label: state.account.as_ref().map(|account| account.short()),
        }
    }
}

impl fmt::Display for ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.account_label {
            Some(account) => writeln!(f, "wallet: {account}")?,
            None => writeln!(f, "wallet: not connected")?,
        }
        let hint = if self.button.enabled() { "" } else { " (disabled)" };
        writeln!(f, "[ {} ]{hint}", self.button.label())?;
        write!(f, "{}", self.progress)
    }
}
