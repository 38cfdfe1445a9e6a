//! 按用户保存的第三方 API 凭证
//!
//! 读多写少：执行动作时并发读取，注册 / 删除时独占写。凭证始终作为参数显式传递，不设进程级全局 Key。

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tokio::sync::RwLock;

/// Stripe 操作要求的凭证作用域
pub const STRIPE_SCOPE: &str = "stripe";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("user id cannot be empty")]
    EmptyUserId,

    #[error("api key cannot be empty")]
    EmptySecret,

    #[error("no credential found for user {0}")]
    NotFound(String),
}

/// 单个凭证：作用域 + 密钥（Debug 输出不包含密钥）
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    scope: String,
    secret: String,
}

impl Credential {
    pub fn new(scope: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            secret: secret.into(),
        }
    }

    pub fn stripe(secret: impl Into<String>) -> Self {
        Self::new(STRIPE_SCOPE, secret)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("scope", &self.scope)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<String, Credential>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册（或替换）用户凭证
    pub async fn put(&self, user_id: &str, credential: Credential) -> Result<(), CredentialError> {
        if user_id.is_empty() {
            return Err(CredentialError::EmptyUserId);
        }
        if credential.secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        self.entries
            .write()
            .await
            .insert(user_id.to_string(), credential);
        Ok(())
    }

    pub async fn get(&self, user_id: &str) -> Result<Credential, CredentialError> {
        if user_id.is_empty() {
            return Err(CredentialError::EmptyUserId);
        }
        self.entries
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(user_id.to_string()))
    }

    /// 删除用户凭证，返回是否确实存在过
    pub async fn remove(&self, user_id: &str) -> Result<bool, CredentialError> {
        if user_id.is_empty() {
            return Err(CredentialError::EmptyUserId);
        }
        Ok(self.entries.write().await.remove(user_id).is_some())
    }
}
