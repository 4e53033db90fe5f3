// 认证模块数据类型定义

use crate::oss::types::TokenResponse;
use serde::{Deserialize, Serialize};

/// 提前视为过期的秒数，避免令牌在请求途中失效
pub const EXPIRY_SKEW_SECS: i64 = 60;

/// 访问令牌
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// 令牌内容
    pub access_token: String,
    /// 令牌类型（通常为 Bearer）
    pub token_type: String,
    /// 签发时间戳（秒）
    pub issued_at: i64,
    /// 有效期（秒）
    pub expires_in: u64,
}

impl AccessToken {
    /// 从令牌接口响应创建
    pub fn from_response(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            issued_at: chrono::Utc::now().timestamp(),
            expires_in: response.expires_in,
        }
    }

    /// 过期时间戳（秒）
    pub fn expires_at(&self) -> i64 {
        self.issued_at + self.expires_in as i64
    }

    /// 在给定时间点是否已过期（含提前量）
    pub fn is_expired_at(&self, now: i64) -> bool {
        now + EXPIRY_SKEW_SECS >= self.expires_at()
    }

    /// 当前是否已过期
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(issued_at: i64, expires_in: u64) -> AccessToken {
        AccessToken {
            access_token: "t".to_string(),
            token_type: "Bearer".to_string(),
            issued_at,
            expires_in,
        }
    }

    #[test]
    fn test_expiry_with_skew() {
        let t = token(1_000, 3_600);
        assert_eq!(t.expires_at(), 4_600);
        assert!(!t.is_expired_at(1_000));
        assert!(!t.is_expired_at(4_539));
        // 进入提前量窗口即视为过期
        assert!(t.is_expired_at(4_540));
        assert!(t.is_expired_at(5_000));
    }

    #[test]
    fn test_zero_lifetime_is_expired() {
        let t = token(chrono::Utc::now().timestamp(), 0);
        assert!(t.is_expired());
    }

    #[test]
    fn test_from_response_defaults_bearer() {
        let t = AccessToken::from_response(TokenResponse {
            access_token: "abc".to_string(),
            token_type: None,
            expires_in: 3599,
        });
        assert_eq!(t.token_type, "Bearer");
        assert_eq!(t.expires_in, 3599);
        assert!(!t.is_expired());
    }
}
