use anyhow::Result;
use kube::{
    api::Api,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use polwatch_core::Report;
use tracing::debug;

use crate::{mapping::report_from_object, ReportKey, ReportSource, SourceError};

pub const GROUP: &str = "openreports.io";
pub const VERSION: &str = "v1alpha1";

/// Reads openreports `Report` (namespaced) and `ClusterReport` objects from the API server.
#[derive(Clone)]
pub struct KubeReportSource {
    client: Client,
    reports: ApiResource,
    cluster_reports: ApiResource,
}

impl KubeReportSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reports: ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(GROUP, VERSION, "Report"), "reports"),
            cluster_reports: ApiResource::from_gvk_with_plural(
                &GroupVersionKind::gvk(GROUP, VERSION, "ClusterReport"),
                "clusterreports",
            ),
        }
    }

    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Api over all namespaced reports.
    pub fn reports_api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &self.reports)
    }

    pub fn reports_in(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.reports)
    }

    pub fn cluster_reports_api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &self.cluster_reports)
    }
}

#[async_trait::async_trait]
impl ReportSource for KubeReportSource {
    async fn get(&self, key: &ReportKey) -> Result<Report, SourceError> {
        let api: Api<DynamicObject> = if key.namespace.is_empty() {
            self.cluster_reports_api()
        } else {
            self.reports_in(&key.namespace)
        };
        let obj = api.get(&key.name).await.map_err(classify)?;
        debug!(key = %key, "fetched report object");
        report_from_object(&obj).map_err(|e| SourceError::Other(format!("{:#}", e)))
    }
}

/// Timeouts, throttling and unavailability are worth retrying; a 404 means the object is gone.
pub(crate) fn classify(err: kube::Error) -> SourceError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => SourceError::NotFound,
            408 | 429 | 500 | 503 | 504 => SourceError::Transient(resp.message),
            _ => SourceError::Other(resp.message),
        },
        kube::Error::HyperError(e) => SourceError::Transient(e.to_string()),
        kube::Error::Service(e) => SourceError::Transient(e.to_string()),
        other => SourceError::Other(other.to_string()),
    }
}
