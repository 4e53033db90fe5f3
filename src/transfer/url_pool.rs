// 上传签名链接池
//
// 按分片索引保存当前有效的签名链接，以及本次上传会话的 uploadKey。
// 由编排器独占，外层用异步互斥锁保护：只有持锁者可以请求新批次。

use crate::oss::types::SignedUrlBatch;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Default)]
pub(crate) struct UrlPool {
    /// 分片索引 -> 签名链接
    urls: BTreeMap<u64, String>,
    /// 分片上传会话标识（首批分配后全程复用）
    upload_key: Option<String>,
    /// 已请求的批次数
    batches: u64,
}

impl UrlPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分片对应的签名链接
    pub fn url_for(&self, index: u64) -> Option<&str> {
        self.urls.get(&index).map(String::as_str)
    }

    pub fn upload_key(&self) -> Option<&str> {
        self.upload_key.as_deref()
    }

    /// 已请求的批次数
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// 写入新批次
    pub fn absorb(&mut self, batch: SignedUrlBatch) {
        self.batches += 1;

        match (&self.upload_key, batch.upload_key) {
            (None, key) => self.upload_key = key,
            (Some(current), Some(returned)) if *current != returned => {
                // 会话只能有一个，保留首个 uploadKey
                warn!("服务端返回了不同的 uploadKey，继续使用原会话");
            }
            _ => {}
        }

        let first = batch.first_part_index;
        for (offset, url) in batch.urls.into_iter().enumerate() {
            self.urls.insert(first + offset as u64, url);
        }
    }

    /// 整批作废（链接过期），保留 uploadKey
    pub fn invalidate(&mut self) {
        self.urls.clear();
    }

    /// 分片成功后释放链接
    pub fn release(&mut self, index: u64) {
        self.urls.remove(&index);
    }

    /// 仅当 `expired` 仍是该分片的当前链接时作废整批
    ///
    /// # 返回
    /// - `true`: 已作废，需要请求新批次
    /// - `false`: 链接已被其他任务刷新
    pub fn invalidate_if_current(&mut self, index: u64, expired: &str) -> bool {
        if self.url_for(index) == Some(expired) {
            self.invalidate();
            true
        } else {
            false
        }
    }
}
