//! At-rest encryption for persisted session files.
//!
//! AES-256-CTR with a random IV, authenticated by HMAC-SHA256 over the
//! version, IV and ciphertext (encrypt-then-MAC). Cipher and MAC keys are
//! derived from a per-installation 32-byte master key.

use aes::cipher::{KeyIvInit, StreamCipher};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fs;
use std::io::Write;
use std::path::Path;

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const ENVELOPE_VERSION: u8 = 1;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Encrypted file contents, serialized as JSON.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    v: u8,
    iv: String,
    ct: String,
    tag: String,
}

/// Whether `data` is an encrypted envelope rather than legacy plaintext.
pub fn is_encrypted(data: &[u8]) -> bool {
    serde_json::from_slice::<Envelope>(data).is_ok()
}

/// Seals and opens envelopes with keys derived from one master key.
#[derive(Clone)]
pub struct Sealer {
    enc_key: [u8; KEY_LEN],
    mac_key: [u8; KEY_LEN],
}

impl Sealer {
    pub fn from_master_key(master: &[u8; KEY_LEN]) -> Self {
        Self {
            enc_key: derive(master, b"enc"),
            mac_key: derive(master, b"mac"),
        }
    }

    /// Load the master key at `path`, generating it (mode 0600) if absent
    /// or corrupt. The flag is set when a new key was generated, in which
    /// case nothing sealed before can be opened.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if path.exists() {
            let bytes = fs::read(path).context("Failed to read store key")?;
            match <[u8; KEY_LEN]>::try_from(bytes.as_slice()) {
                Ok(master) => return Ok((Self::from_master_key(&master), false)),
                Err(_) => {
                    tracing::warn!(
                        "Store key {} has the wrong length ({} bytes), generating a new one",
                        path.display(),
                        bytes.len()
                    );
                    // Recreated below so the new file gets owner-only mode.
                    fs::remove_file(path).context("Failed to remove corrupt store key")?;
                }
            }
        }
        Ok((Self::generate(path)?, true))
    }

    fn generate(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create store directory")?;
        }
        let mut master = [0u8; KEY_LEN];
        getrandom::getrandom(&mut master)
            .map_err(|e| anyhow::anyhow!("OS CSPRNG failed: {}", e))?;

        let mut file = owner_only_file(path).context("Failed to create store key")?;
        file.write_all(&master).context("Failed to write store key")?;
        tracing::info!("Generated new store key at {}", path.display());
        Ok(Self::from_master_key(&master))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; IV_LEN];
        getrandom::getrandom(&mut iv).map_err(|e| anyhow::anyhow!("OS CSPRNG failed: {}", e))?;

        let mut ciphertext = plaintext.to_vec();
        let mut cipher = Aes256Ctr::new((&self.enc_key).into(), (&iv).into());
        cipher.apply_keystream(&mut ciphertext);

        let tag = self.tag(&iv, &ciphertext);
        let envelope = Envelope {
            v: ENVELOPE_VERSION,
            iv: STANDARD.encode(iv),
            ct: STANDARD.encode(&ciphertext),
            tag: STANDARD.encode(tag),
        };
        serde_json::to_vec(&envelope).context("Failed to serialize envelope")
    }

    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        let envelope: Envelope =
            serde_json::from_slice(data).context("Not an encrypted envelope")?;
        if envelope.v != ENVELOPE_VERSION {
            bail!("Unsupported envelope version {}", envelope.v);
        }

        let iv: [u8; IV_LEN] = STANDARD
            .decode(&envelope.iv)
            .context("Bad envelope IV")?
            .try_into()
            .ok()
            .context("Envelope IV has the wrong length")?;
        let mut ciphertext = STANDARD.decode(&envelope.ct).context("Bad envelope body")?;
        let tag = STANDARD.decode(&envelope.tag).context("Bad envelope tag")?;

        let mut mac = self.mac();
        mac.update(&[ENVELOPE_VERSION]);
        mac.update(&iv);
        mac.update(&ciphertext);
        mac.verify_slice(&tag)
            .map_err(|_| anyhow::anyhow!("Envelope authentication failed"))?;

        let mut cipher = Aes256Ctr::new((&self.enc_key).into(), (&iv).into());
        cipher.apply_keystream(&mut ciphertext);
        Ok(ciphertext)
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.mac_key).expect("HMAC key length is valid")
    }

    fn tag(&self, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Vec<u8> {
        let mut mac = self.mac();
        mac.update(&[ENVELOPE_VERSION]);
        mac.update(iv);
        mac.update(ciphertext);
        mac.finalize().into_bytes().to_vec()
    }
}

fn derive(master: &[u8; KEY_LEN], label: &[u8]) -> [u8; KEY_LEN] {
    let mut mac = HmacSha256::new_from_slice(master).expect("HMAC key length is valid");
    mac.update(label);
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&mac.finalize().into_bytes());
    key
}

/// Create (truncating) a file readable only by the owner.
pub(crate) fn owner_only_file(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
