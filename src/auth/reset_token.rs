//! Password-reset codes.
//!
//! The plaintext code is mailed to the user and never stored. The store
//! keeps an HMAC-SHA-256 digest keyed with a server secret, so lookups
//! stay deterministic while a leaked table alone cannot be brute-forced.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use time::{Duration, OffsetDateTime};

type HmacSha256 = Hmac<Sha256>;

/// Random bytes per code; hex encoding doubles the length.
const CODE_BYTES: usize = 3;

/// How long an issued code stays valid.
pub const RESET_TOKEN_TTL: Duration = Duration::minutes(10);

#[derive(Clone)]
pub struct ResetTokenHasher {
    mac: HmacSha256,
}

impl std::fmt::Debug for ResetTokenHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetTokenHasher").finish_non_exhaustive()
    }
}

/// A freshly generated code with the values to persist.
pub struct IssuedResetToken {
    pub plaintext: String,
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

impl ResetTokenHasher {
    pub fn new(secret: &[u8]) -> anyhow::Result<Self> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("reset token key: {e}"))?;
        Ok(Self { mac })
    }

    pub fn hash(&self, token: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn issue(&self, now: OffsetDateTime) -> IssuedResetToken {
        let mut bytes = [0u8; CODE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let plaintext = hex::encode(bytes);
        IssuedResetToken {
            hash: self.hash(&plaintext),
            plaintext,
            expires_at: now + RESET_TOKEN_TTL,
        }
    }
}
