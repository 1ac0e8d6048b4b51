use std::collections::BTreeSet;

use anyhow::Context;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{credential::TokenProvider, environment::Endpoints};

use super::{ApiError, DnsZoneApi, Precondition, RecordSetRef, TxtRecordSet};

const API_VERSION: &str = "2018-05-01";

/// Azure DNS record set client speaking the resource manager REST API.
#[derive(Debug)]
pub struct AzureDnsClient {
    http: Client,
    base_url: String,
    tokens: TokenProvider,
}

#[derive(Debug, Deserialize, Serialize)]
struct RecordSet {
    #[serde(default, skip_serializing)]
    etag: Option<String>,
    properties: RecordSetProperties,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RecordSetProperties {
    #[serde(rename = "TTL", default, skip_serializing_if = "Option::is_none")]
    ttl: Option<u32>,
    #[serde(rename = "TXTRecords", default)]
    txt_records: Vec<TxtRecord>,
}

#[derive(Debug, Deserialize, Serialize)]
struct TxtRecord {
    value: Vec<String>,
}

impl AzureDnsClient {
    pub fn new(endpoints: Endpoints, tokens: TokenProvider) -> anyhow::Result<Self> {
        Self::with_base_url(endpoints.resource_manager, tokens)
    }

    /// Client against a custom resource manager URL.
    pub fn with_base_url(base_url: &str, tokens: TokenProvider) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to create http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn record_url(&self, record: &RecordSetRef<'_>) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/dnsZones/{}/TXT/{}?api-version={API_VERSION}",
            self.base_url, record.subscription_id, record.resource_group, record.zone, record.name
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let token = self.tokens.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .context("dns api request failed")?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ApiError::NotFound,
            StatusCode::PRECONDITION_FAILED => ApiError::Conflict(body),
            _ => anyhow::anyhow!("azure dns api returned {status}: {body}").into(),
        })
    }
}

fn with_precondition(request: RequestBuilder, precondition: Precondition) -> RequestBuilder {
    match precondition {
        Precondition::Matches(etag) => request.header(header::IF_MATCH, etag),
        Precondition::Absent => request.header(header::IF_NONE_MATCH, "*"),
        Precondition::Any => request,
    }
}

impl DnsZoneApi for AzureDnsClient {
    async fn get_txt(&self, record: &RecordSetRef<'_>) -> Result<TxtRecordSet, ApiError> {
        debug!("reading TXT record {record}");
        let response = self.send(self.http.get(self.record_url(record))).await?;
        let record_set: RecordSet = response
            .json()
            .await
            .context("failed to parse record set")?;
        Ok(TxtRecordSet {
            values: record_set
                .properties
                .txt_records
                .into_iter()
                // Long values are split into 255 byte strings.
                .map(|r| r.value.concat())
                .collect(),
            etag: record_set.etag,
        })
    }

    async fn put_txt(
        &self,
        record: &RecordSetRef<'_>,
        ttl: u32,
        values: &BTreeSet<String>,
        precondition: Precondition,
    ) -> Result<(), ApiError> {
        debug!("writing TXT record {record}: {values:?}");
        let body = RecordSet {
            etag: None,
            properties: RecordSetProperties {
                ttl: Some(ttl),
                txt_records: values
                    .iter()
                    .map(|v| TxtRecord {
                        value: vec![v.clone()],
                    })
                    .collect(),
            },
        };
        let request = self.http.put(self.record_url(record)).json(&body);
        self.send(with_precondition(request, precondition)).await?;
        Ok(())
    }

    async fn delete_txt(
        &self,
        record: &RecordSetRef<'_>,
        precondition: Precondition,
    ) -> Result<(), ApiError> {
        debug!("deleting TXT record {record}");
        let request = self.http.delete(self.record_url(record));
        self.send(with_precondition(request, precondition)).await?;
        Ok(())
    }
}
