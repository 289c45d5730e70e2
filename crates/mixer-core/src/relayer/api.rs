//! relayer http api: status, job creation, job polling

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{MixerError, Result};

/// network a relayer says it serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetId {
    Any,
    Chain(u64),
}

/// `GET /status` payload, reduced to what selection and fees use
#[derive(Debug, Clone, PartialEq)]
pub struct RelayerStatus {
    pub reward_account: String,
    pub net_id: NetId,
    /// percent of the withdrawn amount
    pub service_fee: f64,
    /// token price in native-coin base units, keyed by lowercase currency
    pub eth_prices: HashMap<String, String>,
    pub healthy: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    reward_account: Option<String>,
    net_id: Option<Value>,
    tornado_service_fee: Option<Value>,
    #[serde(default)]
    eth_prices: HashMap<String, Value>,
    health: Option<Value>,
}

impl RelayerStatus {
    pub fn from_json(value: Value) -> Result<Self> {
        let raw: RawStatus = serde_json::from_value(value)
            .map_err(|e| MixerError::Relayer(format!("malformed status: {}", e)))?;

        let reward_account = raw
            .reward_account
            .filter(|a| !a.is_empty())
            .ok_or_else(|| MixerError::Relayer("status has no reward account".into()))?;

        let net_id = match raw.net_id {
            Some(Value::String(s)) if s == "*" => NetId::Any,
            Some(Value::String(s)) => NetId::Chain(
                s.parse()
                    .map_err(|_| MixerError::Relayer(format!("bad netId {}", s)))?,
            ),
            Some(Value::Number(n)) => NetId::Chain(
                n.as_u64()
                    .ok_or_else(|| MixerError::Relayer(format!("bad netId {}", n)))?,
            ),
            _ => return Err(MixerError::Relayer("status has no netId".into())),
        };

        let service_fee = match raw.tornado_service_fee {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .filter(|f: &f64| f.is_finite() && *f >= 0.0)
        .ok_or_else(|| MixerError::Relayer("status has no service fee".into()))?;

        let eth_prices = raw
            .eth_prices
            .into_iter()
            .filter_map(|(k, v)| {
                let price = match v {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some((k.to_lowercase(), price))
            })
            .collect();

        // relayers report "true" as a string
        let healthy = match raw.health.as_ref().and_then(|h| h.get("status")) {
            Some(Value::String(s)) => s == "true",
            Some(Value::Bool(b)) => *b,
            _ => false,
        };

        Ok(Self {
            reward_account,
            net_id,
            service_fee,
            eth_prices,
            healthy,
        })
    }

    pub fn serves(&self, chain_id: u64) -> bool {
        match self.net_id {
            NetId::Any => true,
            NetId::Chain(id) => id == chain_id,
        }
    }

    /// price of one whole token in native base units
    pub fn price_of(&self, currency: &str) -> Option<BigUint> {
        self.eth_prices
            .get(&currency.to_lowercase())
            .and_then(|p| p.parse::<BigUint>().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Accepted,
    Sent,
    Mined,
    Confirmed,
    Failed,
    Unknown,
}

impl JobState {
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "QUEUED" => JobState::Queued,
            "ACCEPTED" => JobState::Accepted,
            "SENT" => JobState::Sent,
            "MINED" => JobState::Mined,
            "CONFIRMED" => JobState::Confirmed,
            "FAILED" => JobState::Failed,
            _ => JobState::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Confirmed | JobState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub status: String,
    pub state: JobState,
    pub tx_hash: Option<String>,
    pub confirmations: u64,
    pub failed_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJob {
    #[serde(default)]
    status: String,
    tx_hash: Option<String>,
    confirmations: Option<Value>,
    failed_reason: Option<String>,
}

impl JobStatus {
    pub fn from_json(value: Value) -> Result<Self> {
        let raw: RawJob = serde_json::from_value(value)
            .map_err(|e| MixerError::Relayer(format!("malformed job status: {}", e)))?;
        let confirmations = match raw.confirmations {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        };
        Ok(Self {
            state: JobState::parse(&raw.status),
            status: raw.status,
            tx_hash: raw.tx_hash.filter(|h| !h.is_empty()),
            confirmations,
            failed_reason: raw.failed_reason,
        })
    }
}

/// body of `POST /v1/tornadoWithdraw`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalRequest {
    pub contract: String,
    pub proof: String,
    pub args: [String; 6],
}

#[async_trait]
pub trait RelayerApi: Send + Sync {
    async fn status(&self, origin: &str) -> Result<RelayerStatus>;

    /// returns the job id
    async fn submit_withdrawal(&self, origin: &str, request: &WithdrawalRequest) -> Result<String>;

    async fn job(&self, origin: &str, id: &str) -> Result<JobStatus>;
}

#[derive(Clone)]
pub struct RelayerClient {
    client: Client,
}

impl RelayerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MixerError::Relayer(e.to_string()))?;
        Ok(Self { client })
    }

    async fn get_json(&self, url: String) -> Result<Value> {
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| MixerError::Relayer(e.to_string()))?
            .error_for_status()
            .map_err(|e| MixerError::Relayer(e.to_string()))?
            .json()
            .await
            .map_err(|e| MixerError::Relayer(e.to_string()))
    }
}

#[async_trait]
impl RelayerApi for RelayerClient {
    async fn status(&self, origin: &str) -> Result<RelayerStatus> {
        let body = self.get_json(format!("{}/status", origin)).await?;
        RelayerStatus::from_json(body)
    }

    async fn submit_withdrawal(&self, origin: &str, request: &WithdrawalRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/tornadoWithdraw", origin))
            .json(request)
            .send()
            .await
            .map_err(|e| MixerError::Relayer(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| MixerError::Relayer(e.to_string()))?;
        if !status.is_success() {
            let reason = body.get("error").cloned().unwrap_or(body);
            return Err(MixerError::Relayer(format!("withdrawal rejected ({}): {}", status, reason)));
        }

        body.get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| MixerError::Relayer("no job id in response".into()))
    }

    async fn job(&self, origin: &str, id: &str) -> Result<JobStatus> {
        let body = self.get_json(format!("{}/v1/jobs/{}", origin, id)).await?;
        JobStatus::from_json(body)
    }
}

/// scheme://host[:port] of a relayer url; bare hostnames get https
pub fn relayer_origin(input: &str) -> Result<String> {
    let input = input.trim();
    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| MixerError::Validation(format!("invalid relayer url {}: {}", input, e)))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(MixerError::Validation(format!("invalid relayer url {}", input)));
    }
    Ok(url.origin().ascii_serialization())
}
