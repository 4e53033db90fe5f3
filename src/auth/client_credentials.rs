//! OAuth2 客户端凭证模式
//!
//! 令牌在本地缓存到过期前，`refresh` 总是向服务端重新申请

use crate::auth::types::AccessToken;
use crate::oss::provider::{CredentialProvider, ProviderError};
use crate::oss::types::TokenResponse;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{debug, info, warn};

/// 令牌接口相对路径
pub const TOKEN_PATH: &str = "/authentication/v2/token";

/// 客户端凭证鉴权
pub struct ClientCredentialsAuth {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    /// 缓存的令牌
    cached: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for ClientCredentialsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsAuth")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsAuth {
    /// 创建鉴权器
    ///
    /// # 参数
    /// * `base_url` - 服务根地址，令牌接口为 `{base_url}/authentication/v2/token`
    /// * `scopes` - 申请的权限范围，如 `data:read data:write`
    pub fn new(
        client: Client,
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            client,
            token_url: format!("{}{}", base_url.trim_end_matches('/'), TOKEN_PATH),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes,
            cached: Mutex::new(None),
        }
    }

    /// 向令牌接口申请新令牌并写入缓存
    async fn fetch_token(&self) -> Result<String, ProviderError> {
        debug!("申请访问令牌: client_id={}", self.client_id);

        let scope = self.scopes.join(" ");
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", scope.as_str())])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            // 凭证本身被拒绝，不能再当作令牌过期处理，否则会反复刷新
            warn!("申请访问令牌失败: status={}, body={}", status, text);
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let token_response: TokenResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Decode(e.to_string()))?;
        let token = AccessToken::from_response(token_response);
        info!("访问令牌已更新，有效期 {} 秒", token.expires_in);

        let value = token.access_token.clone();
        *self.cached.lock() = Some(token);
        Ok(value)
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsAuth {
    async fn access_token(&self) -> Result<String, ProviderError> {
        let cached = self
            .cached
            .lock()
            .as_ref()
            .filter(|t| !t.is_expired())
            .map(|t| t.access_token.clone());

        match cached {
            Some(token) => Ok(token),
            None => self.fetch_token().await,
        }
    }

    async fn refresh(&self, expired: &str) -> Result<String, ProviderError> {
        // 缓存已被其他调用者换新时直接复用
        let newer = self
            .cached
            .lock()
            .as_ref()
            .filter(|t| t.access_token != expired && !t.is_expired())
            .map(|t| t.access_token.clone());

        match newer {
            Some(token) => Ok(token),
            None => self.fetch_token().await,
        }
    }
}
