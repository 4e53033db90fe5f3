// 认证模块
//
// 提供 OAuth2 客户端凭证模式的访问令牌获取与刷新

pub mod client_credentials;
pub mod types;

pub use client_credentials::ClientCredentialsAuth;
pub use types::AccessToken;
