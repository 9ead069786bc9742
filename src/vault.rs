//! 与令牌有效期绑定的短期凭据缓存。
//!
//! 登录时以进程内 AES-256-GCM 密钥加密密码，按用户名存放，随令牌一同过期；
//! 文件操作仅在单次远端会话期间解密使用。

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    #[error("no credentials cached for this session")]
    Missing,
    #[error("failed to seal credentials")]
    Encrypt,
    #[error("failed to open sealed credentials")]
    Decrypt,
}

/// 内存中的密码：释放时清零，从不打印。
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

struct SealedEntry {
    nonce: [u8; 12],
    ciphertext: Vec<u8>,
    expires_at: i64,
}

pub struct CredentialVault {
    cipher: Aes256Gcm,
    entries: Mutex<HashMap<String, SealedEntry>>,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialVault")
    }
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVault {
    /// 以新的随机密钥创建凭据库，重启后不保留任何内容。
    pub fn new() -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut key[..]);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..])),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn store(
        &self,
        username: &str,
        secret: &Secret,
        expires_at: i64,
    ) -> Result<(), VaultError> {
        let mut nonce = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                seal_plaintext(username, secret.expose()).as_slice(),
            )
            .map_err(|_| VaultError::Encrypt)?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            username.to_string(),
            SealedEntry {
                nonce,
                ciphertext,
                expires_at,
            },
        );
        Ok(())
    }

    /// 返回缓存的密码；`now` 已过期时顺带移除。
    pub async fn resolve(&self, username: &str, now: i64) -> Result<Secret, VaultError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(username) else {
            return Err(VaultError::Missing);
        };
        if now >= entry.expires_at {
            entries.remove(username);
            return Err(VaultError::Missing);
        }
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(&entry.nonce), entry.ciphertext.as_ref())
                .map_err(|_| VaultError::Decrypt)?,
        );
        let (owner, password) = open_plaintext(&plaintext).ok_or(VaultError::Decrypt)?;
        if owner != username {
            return Err(VaultError::Decrypt);
        }
        Ok(Secret::new(password))
    }

    pub async fn prune_expired(&self, now: i64) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// 明文格式 `username \0 password`，将密文绑定到其键。
fn seal_plaintext(username: &str, password: &str) -> Zeroizing<Vec<u8>> {
    let mut buf = Vec::with_capacity(username.len() + password.len() + 1);
    buf.extend_from_slice(username.as_bytes());
    buf.push(0);
    buf.extend_from_slice(password.as_bytes());
    Zeroizing::new(buf)
}

fn open_plaintext(buf: &[u8]) -> Option<(&str, String)> {
    let split = buf.iter().position(|byte| *byte == 0)?;
    let owner = std::str::from_utf8(&buf[..split]).ok()?;
    let password = std::str::from_utf8(&buf[split + 1..]).ok()?;
    Some((owner, password.to_string()))
}
