use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

const ADDRESS_PREFIX: &str = "0x";
const ADDRESS_BYTES: usize = 20;

/// Wallet address in the format: 0x<40 lowercase hex characters>
///
/// Generated once per node from the OS random source. Peers treat it as an
/// opaque string; nothing checks that it belongs to a registered identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Generate a fresh address from 20 bytes of OS entropy
    pub fn generate() -> Self {
        let mut bytes = [0u8; ADDRESS_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(format!("{}{}", ADDRESS_PREFIX, hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for WalletAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
