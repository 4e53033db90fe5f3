// 访问令牌管理
//
// 所有需要令牌的接口调用都经由 CredentialStore::call：
// 令牌过期时通过刷新协调器换新（同一代只刷新一次），其他错误原样返回

use crate::common::{RefreshCoordinator, Versioned};
use crate::oss::provider::{CredentialProvider, ProviderError};
use crate::transfer::error::TransferError;
use crate::transfer::types::{TransferPhase, TransferState};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 单次传输持有的令牌
pub(crate) struct CredentialStore {
    provider: Arc<dyn CredentialProvider>,
    coordinator: RefreshCoordinator<String>,
    /// 单次调用允许的令牌刷新次数
    max_refresh: u32,
}

impl CredentialStore {
    /// 获取初始令牌
    pub async fn acquire(
        provider: Arc<dyn CredentialProvider>,
        max_refresh: u32,
        cancel: &CancellationToken,
    ) -> Result<Self, TransferError> {
        ensure_not_cancelled(cancel)?;
        let token = provider
            .access_token()
            .await
            .map_err(TransferError::Provider)?;

        Ok(Self {
            provider,
            coordinator: RefreshCoordinator::new(token),
            max_refresh,
        })
    }

    /// 当前令牌
    pub fn current(&self) -> Versioned<String> {
        self.coordinator.current()
    }

    /// 实际刷新次数
    pub fn refresh_count(&self) -> u64 {
        self.coordinator.refresh_count()
    }

    /// 带令牌执行一次接口调用
    ///
    /// - 令牌过期：刷新后重试；刷新本身失败也计入刷新次数，
    ///   超过 `max_refresh` 次返回 `CredentialRefreshExhausted`
    /// - 其他错误：转换为 `TransferError::Provider`，不重试
    pub async fn call<T, F, Fut>(
        &self,
        state: &TransferState,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, TransferError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut refreshes = 0u32;
        let mut credential = self.current();
        // 上次刷新失败的原因；为 Some 时跳过接口调用直接再次刷新
        let mut refresh_failure: Option<String> = None;

        loop {
            ensure_not_cancelled(cancel)?;

            let message = match refresh_failure.take() {
                Some(message) => message,
                None => match op(credential.value.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(ProviderError::CredentialExpired(message)) => message,
                    Err(e) => return Err(TransferError::Provider(e)),
                },
            };

            if refreshes >= self.max_refresh {
                error!("访问令牌已过期，刷新次数已用尽 ({})", self.max_refresh);
                return Err(TransferError::CredentialRefreshExhausted {
                    attempts: refreshes,
                    last: message,
                });
            }
            refreshes += 1;

            ensure_not_cancelled(cancel)?;
            let previous_phase = state.phase();
            state.enter(TransferPhase::RefreshingCredential);
            info!(
                "访问令牌已过期，刷新令牌 ({}/{})",
                refreshes, self.max_refresh
            );

            let provider = self.provider.clone();
            match self
                .coordinator
                .refresh_if_stale(credential.generation, |expired| async move {
                    provider.refresh(&expired).await
                })
                .await
            {
                Ok(fresh) => credential = fresh,
                Err(e) => {
                    warn!("刷新访问令牌失败 ({}/{}): {}", refreshes, self.max_refresh, e);
                    refresh_failure = Some(e.to_string());
                }
            }
            state.enter(previous_phase);
        }
    }
}

/// 取消检查
pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), TransferError> {
    if cancel.is_cancelled() {
        Err(TransferError::Cancelled)
    } else {
        Ok(())
    }
}
