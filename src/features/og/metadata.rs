use reqwest::Client;
use serde::Deserialize;

use crate::config::UpstreamConfig;
use crate::error::AppError;

use super::reporter::{ErrorReporter, Phase};
use super::types::MetadataSnapshot;

#[derive(Debug, Deserialize)]
struct CrateResponse {
    #[serde(rename = "crate")]
    krate: CrateInfo,
}

#[derive(Debug, Deserialize)]
struct CrateInfo {
    #[serde(default)]
    max_version: Option<String>,
    #[serde(default)]
    newest_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    tag_name: String,
}

/// 并发获取 crates.io 最新版本与 GitHub 最新 release tag。
///
/// 全有或全无：任一请求失败时两个字段都退化为 `"?"`，不保留另一侧的成功结果。
pub struct MetadataAggregator {
    client: Client,
    crate_api_url: String,
    release_api_url: String,
    reporter: ErrorReporter,
}

impl MetadataAggregator {
    pub fn new(client: Client, cfg: &UpstreamConfig, reporter: ErrorReporter) -> Self {
        Self {
            client,
            crate_api_url: cfg.crate_api_url.clone(),
            release_api_url: cfg.release_api_url.clone(),
            reporter,
        }
    }

    /// 永不失败；失败时上报一次 `data-fetch` 并返回占位快照。
    pub async fn fetch(&self, client_id: &str) -> MetadataSnapshot {
        let result = self.try_fetch().await;
        self.settle(result, client_id)
    }

    /// 两个请求并发发出并合并等待，任一失败即整体失败。
    pub async fn try_fetch(&self) -> Result<MetadataSnapshot, AppError> {
        let (crate_version, github_tag) =
            tokio::try_join!(self.fetch_crate_version(), self.fetch_release_tag())?;
        Ok(MetadataSnapshot {
            crate_version,
            github_tag,
        })
    }

    /// 把获取结果落定为快照（失败路径负责上报）
    pub fn settle(
        &self,
        result: Result<MetadataSnapshot, AppError>,
        client_id: &str,
    ) -> MetadataSnapshot {
        match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let err = AppError::MetadataUnavailable(e.to_string());
                self.reporter.report(Phase::DataFetch, &err, client_id);
                MetadataSnapshot::placeholder()
            }
        }
    }

    async fn fetch_crate_version(&self) -> Result<String, AppError> {
        let resp = self
            .client
            .get(&self.crate_api_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?;
        let body: CrateResponse = resp.json().await?;
        body.krate
            .max_version
            .or(body.krate.newest_version)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Network("crates.io 响应缺少版本字段".to_string()))
    }

    async fn fetch_release_tag(&self) -> Result<String, AppError> {
        let resp = self
            .client
            .get(&self.release_api_url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?;
        let body: ReleaseResponse = resp.json().await?;
        if body.tag_name.is_empty() {
            return Err(AppError::Network("GitHub release 缺少 tag_name".to_string()));
        }
        Ok(body.tag_name)
    }
}
