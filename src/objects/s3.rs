//! S3 object store.
//!
//! Talks to the S3 REST API directly with AWS Signature Version 4. Credentials
//! come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and optionally
//! `AWS_SESSION_TOKEN`.
//!
//! AWS endpoints use virtual-hosted addressing (`<bucket>.s3.<region>.amazonaws.com`).
//! A custom `endpoint_url` (MinIO, LocalStack) uses path-style addressing
//! (`<endpoint>/<bucket>/<key>`).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};

use kbchat_core::objects::ObjectStore;

use crate::config::S3StorageConfig;

type HmacSha256 = Hmac<Sha256>;

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3ObjectStore {
    config: S3StorageConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

/// Where a request goes and what gets signed.
struct Target {
    scheme: &'static str,
    host: String,
    /// Canonical URI, already percent-encoded.
    path: String,
}

impl S3ObjectStore {
    pub fn from_env(config: S3StorageConfig) -> Result<Self> {
        Ok(Self {
            config,
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::new(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.prefix, key)
    }

    fn target(&self, key: Option<&str>) -> Target {
        let encoded_key = key
            .map(|k| k.split('/').map(uri_encode).collect::<Vec<_>>().join("/"))
            .unwrap_or_default();

        match &self.config.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                Target {
                    scheme,
                    host,
                    path: format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key),
                }
            }
            None => Target {
                scheme: "https",
                host: format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                path: format!("/{}", encoded_key),
            },
        }
    }

    /// Send a SigV4-signed request and return the response.
    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(String, String)],
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let target = self.target(key);
        let payload_hash = hex_sha256(&body);
        let now = Utc::now();

        let mut sorted = query.to_vec();
        sorted.sort();
        let canonical_querystring = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let (authorization, amz_date) = sign(
            &self.creds,
            &self.config.region,
            now,
            method.as_str(),
            &target,
            &canonical_querystring,
            &payload_hash,
        );

        let mut url = format!("{}://{}{}", target.scheme, target.host, target.path);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(token) = &self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if let Some(ct) = content_type {
            req = req.header("Content-Type", ct);
        }

        req.body(body)
            .send()
            .await
            .map_err(|e| anyhow!("S3 request to s3://{} failed: {}", self.config.bucket, e))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let full = self.full_key(key);
        let resp = self
            .send(Method::PUT, Some(&full), &[], bytes.to_vec(), Some(content_type))
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                full,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full = self.full_key(key);
        let resp = self.send(Method::GET, Some(&full), &[], Vec::new(), None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", resp.status(), full);
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full = self.full_key(key);
        let resp = self
            .send(Method::DELETE, Some(&full), &[], Vec::new(), None)
            .await?;
        // S3 answers 204 whether or not the key existed.
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            bail!("S3 DeleteObject failed (HTTP {}) for key '{}'", resp.status(), full);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !full_prefix.is_empty() {
                query.push(("prefix".to_string(), full_prefix.clone()));
            }
            if let Some(token) = &continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let resp = self.send(Method::GET, None, &query, Vec::new(), None).await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let page = parse_list_response(&resp.text().await?)?;
            for key in page.keys {
                if let Some(stripped) = key.strip_prefix(&self.config.prefix) {
                    keys.push(stripped.to_string());
                }
            }

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}

// ============ SigV4 ============

/// Build the `Authorization` header value and the `x-amz-date` it was signed with.
fn sign(
    creds: &AwsCredentials,
    region: &str,
    now: DateTime<Utc>,
    method: &str,
    target: &Target,
    canonical_querystring: &str,
    payload_hash: &str,
) -> (String, String) {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host", target.host.clone()),
        ("x-amz-content-sha256", payload_hash.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, target.path, canonical_querystring, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );
    (authorization, amz_date)
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this constructor cannot fail.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; everything but `A-Z a-z 0-9 - _ . ~` is escaped.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

// ============ ListObjectsV2 ============

struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_response(xml: &str) -> Result<ListPage> {
    let mut reader = Reader::from_str(xml);
    let mut page = ListPage {
        keys: Vec::new(),
        is_truncated: false,
        next_token: None,
    };
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape()?.into_owned();
                match path.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
                    [.., "Contents", "Key"] if !text.ends_with('/') => page.keys.push(text),
                    [_, "IsTruncated"] => page.is_truncated = text == "true",
                    [_, "NextContinuationToken"] => page.next_token = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Invalid ListObjectsV2 response: {}", e),
            _ => {}
        }
    }

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_key_matches_aws_example() {
        // Example from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("FIFO guide.pdf"), "FIFO%20guide.pdf");
        assert_eq!(uri_encode("a~b_c-d.e"), "a~b_c-d.e");
    }

    #[test]
    fn test_parse_list_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>kb</Name>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok==</NextContinuationToken>
  <Contents><Key>kbchat/documents/a/x.pdf</Key><Size>10</Size></Contents>
  <Contents><Key>kbchat/documents/</Key><Size>0</Size></Contents>
  <Contents><Key>kbchat/documents/b/y &amp; z.txt</Key><Size>3</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert_eq!(
            page.keys,
            vec!["kbchat/documents/a/x.pdf", "kbchat/documents/b/y & z.txt"]
        );
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("tok=="));
    }

    #[test]
    fn test_path_style_for_custom_endpoint() {
        let store = S3ObjectStore {
            config: S3StorageConfig {
                bucket: "kb".to_string(),
                region: "us-east-1".to_string(),
                prefix: String::new(),
                endpoint_url: Some("http://localhost:9000/".to_string()),
            },
            creds: AwsCredentials {
                access_key_id: "a".to_string(),
                secret_access_key: "b".to_string(),
                session_token: None,
            },
            client: reqwest::Client::new(),
        };
        let t = store.target(Some("documents/x/a b.txt"));
        assert_eq!(t.scheme, "http");
        assert_eq!(t.host, "localhost:9000");
        assert_eq!(t.path, "/kb/documents/x/a%20b.txt");
    }
}
