//! Content addressing for snapshots, plus best-effort remote durability.
//!
//! The address stored anywhere in the system is always the CIDv1 computed
//! here from the exact bytes. Remote pinning services only add copies.

use crate::error::{RadarError, Result};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// CIDv1 header: version 1, raw codec, sha2-256 multihash of 32 bytes.
const CID_PREFIX: [u8; 4] = [0x01, 0x55, 0x12, 0x20];
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

const PINATA_ENDPOINT: &str = "https://api.pinata.cloud/pinning/pinJSONToIPFS";
const DEFAULT_IRYS_NODE: &str = "https://node2.irys.xyz";
const PIN_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

pub fn compute_cid_v1(content: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(CID_PREFIX.len() + 32);
    bytes.extend_from_slice(&CID_PREFIX);
    bytes.extend_from_slice(&Sha256::digest(content));
    format!("b{}", base32_lower(&bytes))
}

/// RFC 4648 base32, lowercase, no padding (multibase `b`).
fn base32_lower(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for &byte in input {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Serialize a snapshot the one way its address is computed from.
pub fn snapshot_bytes(snapshot: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(snapshot)?)
}

#[derive(Debug, Clone)]
struct PinataKeys {
    api_key: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
struct IpfsAddResponse {
    #[serde(rename = "Hash")]
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PinataResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IrysResponse {
    id: Option<String>,
}

pub struct Pinner {
    http: Option<Client>,
    ipfs_api: Option<String>,
    pinata: Option<PinataKeys>,
}

impl Pinner {
    /// `IPFS_API` enables a local node; `PINATA_API_KEY` + `PINATA_SECRET_KEY` enable Pinata.
    pub fn from_env() -> Result<Self> {
        let ipfs_api = non_empty_env("IPFS_API").map(|url| url.trim_end_matches('/').to_string());
        let pinata = match (non_empty_env("PINATA_API_KEY"), non_empty_env("PINATA_SECRET_KEY")) {
            (Some(api_key), Some(secret)) => Some(PinataKeys { api_key, secret }),
            _ => None,
        };

        let http = if ipfs_api.is_some() || pinata.is_some() {
            Some(build_client(PIN_TIMEOUT)?)
        } else {
            None
        };

        log::debug!(
            "Pinning: local node {}, Pinata {}",
            if ipfs_api.is_some() { "on" } else { "off" },
            if pinata.is_some() { "on" } else { "off" }
        );
        Ok(Self { http, ipfs_api, pinata })
    }

    /// Address computation only.
    pub fn local_only() -> Self {
        Self {
            http: None,
            ipfs_api: None,
            pinata: None,
        }
    }

    /// Pin `snapshot` and return its CIDv1. Remote failures are logged, never returned.
    pub async fn pin(&self, snapshot: &Value) -> Result<String> {
        let bytes = snapshot_bytes(snapshot)?;
        let cid = compute_cid_v1(&bytes);

        let Some(http) = &self.http else {
            log::debug!("No pinning service configured, computed {cid}");
            return Ok(cid);
        };

        if let Some(api) = &self.ipfs_api {
            match pin_to_node(http, api, bytes.clone()).await {
                Ok(remote) => log::info!("Pinned {cid} to IPFS node (node reports {remote})"),
                Err(e) => log::debug!("Local IPFS pin failed: {e}"),
            }
        }

        if let Some(keys) = &self.pinata {
            match pin_to_pinata(http, keys, snapshot).await {
                Ok(remote) => log::info!("Pinned {cid} to Pinata (Pinata reports {remote})"),
                Err(e) => log::warn!("Pinata pin failed: {e}"),
            }
        }

        Ok(cid)
    }
}

async fn pin_to_node(
    http: &Client,
    api: &str,
    bytes: Vec<u8>,
) -> std::result::Result<String, String> {
    let part = Part::bytes(bytes).file_name("snapshot.json");
    let resp = http
        .post(format!("{api}/api/v0/add"))
        .multipart(Form::new().part("file", part))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("status {}", resp.status()));
    }
    let body: IpfsAddResponse = resp.json().await.map_err(|e| e.to_string())?;
    body.hash.ok_or_else(|| "response without Hash".to_string())
}

async fn pin_to_pinata(
    http: &Client,
    keys: &PinataKeys,
    snapshot: &Value,
) -> std::result::Result<String, String> {
    let resp = http
        .post(PINATA_ENDPOINT)
        .header("pinata_api_key", &keys.api_key)
        .header("pinata_secret_api_key", &keys.secret)
        .json(&json!({ "pinataContent": snapshot }))
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("status {}", resp.status()));
    }
    let body: PinataResponse = resp.json().await.map_err(|e| e.to_string())?;
    body.ipfs_hash.ok_or_else(|| "response without IpfsHash".to_string())
}

/// Permanent storage through an Irys bundler node.
pub struct ArweaveUploader {
    http: Client,
    node: String,
    api_key: String,
}

impl ArweaveUploader {
    /// `None` when `BUNDLR_API_KEY` is unset. `IRYS_NODE` overrides the node.
    pub fn from_env() -> Result<Option<Self>> {
        let Some(api_key) = non_empty_env("BUNDLR_API_KEY") else {
            log::debug!("No BUNDLR_API_KEY configured, Arweave uploads disabled");
            return Ok(None);
        };
        let node = non_empty_env("IRYS_NODE").unwrap_or_else(|| DEFAULT_IRYS_NODE.to_string());

        Ok(Some(Self {
            http: build_client(UPLOAD_TIMEOUT)?,
            node: node.trim_end_matches('/').to_string(),
            api_key,
        }))
    }

    /// Returns the transaction id, or `None` when the upload did not go through.
    pub async fn upload(&self, snapshot: &Value) -> Option<String> {
        let body = match snapshot_bytes(snapshot) {
            Ok(body) => body,
            Err(e) => {
                log::debug!("Arweave snapshot serialization failed: {e}");
                return None;
            }
        };

        let result = self
            .http
            .post(format!("{}/tx", self.node))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await;

        let resp = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                log::debug!("Arweave upload failed: status {}", resp.status());
                return None;
            }
            Err(e) => {
                log::debug!("Arweave upload failed: {e}");
                return None;
            }
        };

        match resp.json::<IrysResponse>().await {
            Ok(IrysResponse { id: Some(id) }) => {
                log::info!("Posted to Arweave: {id}");
                Some(id)
            }
            Ok(_) => None,
            Err(e) => {
                log::debug!("Arweave response unreadable: {e}");
                None
            }
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RadarError::config(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_matches_rfc4648_vectors() {
        assert_eq!(base32_lower(b""), "");
        assert_eq!(base32_lower(b"f"), "my");
        assert_eq!(base32_lower(b"fo"), "mzxq");
        assert_eq!(base32_lower(b"foo"), "mzxw6");
        assert_eq!(base32_lower(b"foob"), "mzxw6yq");
        assert_eq!(base32_lower(b"fooba"), "mzxw6ytb");
        assert_eq!(base32_lower(b"foobar"), "mzxw6ytboi");
    }

    #[test]
    fn cid_of_known_content() {
        assert_eq!(
            compute_cid_v1(b""),
            "bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku"
        );
        assert_eq!(
            compute_cid_v1(b"hello"),
            "bafkreibm6jg3ux5qumhcn2b3flc3tyu6dmlb4xa7u5bf44yegnrjhc4yeq"
        );
    }

    #[test]
    fn cid_is_deterministic_and_content_sensitive() {
        let a = compute_cid_v1(b"{\"a\":1}");
        assert_eq!(a, compute_cid_v1(b"{\"a\":1}"));
        assert_ne!(a, compute_cid_v1(b"{\"a\":2}"));
        assert!(a.starts_with("bafkrei"));
        assert_eq!(a.len(), 59);
    }

    #[tokio::test]
    async fn local_only_pinner_returns_the_snapshot_address() {
        let snapshot = json!({ "full_name": "a/b", "velocity_score": 42.0 });
        let cid = Pinner::local_only().pin(&snapshot).await.unwrap();
        assert_eq!(cid, compute_cid_v1(&snapshot_bytes(&snapshot).unwrap()));
    }
}
