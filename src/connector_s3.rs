//! S3-compatible object-store connector.
//!
//! Lists objects under a bucket prefix with `ListObjectsV2`, keeps keys
//! matching the source's text patterns, and downloads each object. Requests
//! are signed with AWS Signature V4 using only `hmac` + `sha2`.
//!
//! # Configuration
//!
//! ```toml
//! [[sources]]
//! type = "object_store"
//! name = "runbooks"
//! bucket = "acme-docs"
//! prefix = "engineering/runbooks/"
//! region = "us-east-1"
//! file_patterns = ["md", "txt"]
//! max_keys = 5000
//! # endpoint_url = "http://localhost:9000"   # MinIO, LocalStack
//! ```
//!
//! Credentials come from the source's `credentials` table or, when absent,
//! from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, and the optional
//! `AWS_SESSION_TOKEN`.
//!
//! Object bodies are passed to the indexer as text. Binary formats are
//! rejected when the configuration is loaded, and an object whose bytes are
//! not valid UTF-8 is skipped with a warning.
//!
//! With `endpoint_url` set, requests use path-style addressing
//! (`{endpoint}/{bucket}/{key}`); otherwise virtual-hosted style
//! (`https://{bucket}.s3.{region}.amazonaws.com/{key}`).

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use ragbox_core::models::{Metadata, SourceDocument};

use crate::config::{ObjectStoreCredentials, ObjectStoreSource};
use crate::connector_url::USER_AGENT;
use crate::patterns::FilePatterns;
use crate::traits::{Connector, SourceContext};

type HmacSha256 = Hmac<Sha256>;

/// Page size requested from `ListObjectsV2` (the service maximum).
const LIST_PAGE_SIZE: usize = 1000;

pub struct ObjectStoreConnector {
    ctx: SourceContext,
    config: ObjectStoreSource,
}

impl ObjectStoreConnector {
    pub fn new(ctx: SourceContext, config: ObjectStoreSource) -> Self {
        Self { ctx, config }
    }
}

#[async_trait]
impl Connector for ObjectStoreConnector {
    fn name(&self) -> &str {
        &self.ctx.name
    }

    fn description(&self) -> &str {
        "List and download text objects from an S3-compatible bucket"
    }

    fn connector_type(&self) -> &str {
        "object_store"
    }

    async fn scan(&self) -> Result<Vec<SourceDocument>> {
        let creds = match &self.config.credentials {
            Some(c) => AwsCredentials::from_config(c),
            None => AwsCredentials::from_env()?,
        };
        let client = S3Client::new(&self.config, creds)?;
        let patterns = FilePatterns::new(&self.config.file_patterns)?;

        let objects = client.list_objects(self.config.max_keys).await?;
        let mut documents = Vec::new();

        for obj in &objects {
            let rel_key = relative_key(&self.config.prefix, &obj.key);
            if !patterns.is_match(&rel_key) {
                continue;
            }

            let bytes = client.get_object(&obj.key).await?;
            let content = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(source = %self.ctx.name, key = %obj.key, "skipping object that is not UTF-8 text");
                    continue;
                }
            };

            let mut metadata = Metadata::new();
            metadata.insert("bucket".to_string(), self.config.bucket.clone());
            metadata.insert("key".to_string(), obj.key.clone());
            metadata.insert("etag".to_string(), obj.etag.clone());
            metadata.insert("size".to_string(), obj.size.to_string());
            if let Some(modified) = obj.last_modified {
                metadata.insert("modified_at".to_string(), modified.to_rfc3339());
            }

            documents.push(self.ctx.document(&obj.key, content, metadata));
        }

        documents.sort_by(|a, b| a.document_id.cmp(&b.document_id));
        debug!(
            source = %self.ctx.name,
            listed = objects.len(),
            documents = documents.len(),
            "object store scanned"
        );
        Ok(documents)
    }
}

/// Key relative to the configured prefix, used for pattern matching.
fn relative_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        return key.to_string();
    }
    let prefix = prefix.trim_end_matches('/');
    key.strip_prefix(prefix)
        .map(|s| s.trim_start_matches('/').to_string())
        .unwrap_or_else(|| key.to_string())
}

// ============ Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_config(creds: &ObjectStoreCredentials) -> Self {
        Self {
            access_key_id: creds.access_key_id.clone(),
            secret_access_key: creds.secret_access_key.clone(),
            session_token: creds.session_token.clone(),
        }
    }

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

// ============ Client ============

#[derive(Debug, Clone, PartialEq)]
struct S3Object {
    key: String,
    last_modified: Option<DateTime<Utc>>,
    /// Entity tag, stripped of surrounding quotes.
    etag: String,
    size: u64,
}

struct S3Client {
    http: reqwest::Client,
    creds: AwsCredentials,
    scheme: String,
    /// `host[:port]`, exactly as sent in the `Host` header.
    host: String,
    /// Path prefix for path-style addressing (`/{bucket}`), empty otherwise.
    bucket_path: String,
    bucket: String,
    prefix: String,
    region: String,
}

impl S3Client {
    fn new(config: &ObjectStoreSource, creds: AwsCredentials) -> Result<Self> {
        let (scheme, host, bucket_path) = match &config.endpoint_url {
            Some(endpoint) => {
                let url = Url::parse(endpoint)
                    .with_context(|| format!("invalid endpoint_url '{}'", endpoint))?;
                let host = url
                    .host_str()
                    .ok_or_else(|| anyhow!("endpoint_url '{}' has no host", endpoint))?;
                let host = match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                (
                    url.scheme().to_string(),
                    host,
                    format!("/{}", uri_encode(&config.bucket)),
                )
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", config.bucket, config.region),
                String::new(),
            ),
        };

        Ok(Self {
            http: reqwest::Client::builder().user_agent(USER_AGENT).build()?,
            creds,
            scheme,
            host,
            bucket_path,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            region: config.region.clone(),
        })
    }

    /// List objects under the prefix, following continuation tokens until
    /// the listing ends or `max_keys` objects were collected.
    async fn list_objects(&self, max_keys: Option<usize>) -> Result<Vec<S3Object>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let remaining = max_keys.map(|m| m.saturating_sub(objects.len()));
            if remaining == Some(0) {
                break;
            }
            let page_size = remaining.unwrap_or(LIST_PAGE_SIZE).min(LIST_PAGE_SIZE);

            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), page_size.to_string()),
            ];
            if !self.prefix.is_empty() {
                query.push(("prefix".to_string(), self.prefix.clone()));
            }
            if let Some(token) = &continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }

            let path = if self.bucket_path.is_empty() {
                "/".to_string()
            } else {
                self.bucket_path.clone()
            };
            let resp = self.signed_get(&path, query).await.with_context(|| {
                format!("failed to list s3://{}/{}", self.bucket, self.prefix)
            })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml_body = resp.text().await?;
            let (batch, is_truncated, next_token) = parse_list_objects_response(&xml_body);
            objects.extend(batch);

            match next_token {
                Some(token) if is_truncated => continuation_token = Some(token),
                _ => break,
            }
        }

        if let Some(max) = max_keys {
            objects.truncate(max);
        }
        Ok(objects)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let path = format!("{}/{}", self.bucket_path, encoded_key);

        let resp = self
            .signed_get(&path, Vec::new())
            .await
            .with_context(|| format!("failed to get s3://{}/{}", self.bucket, key))?;
        if !resp.status().is_success() {
            bail!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            );
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// Send a SigV4-signed GET for an already URI-encoded `path`.
    async fn signed_get(
        &self,
        path: &str,
        mut query: Vec<(String, String)>,
    ) -> Result<reqwest::Response> {
        query.sort();
        let canonical_query = query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let signed = sign_request(
            &self.creds,
            &self.region,
            &self.host,
            path,
            &canonical_query,
            Utc::now(),
        )?;

        let url = if canonical_query.is_empty() {
            format!("{}://{}{}", self.scheme, self.host, path)
        } else {
            format!("{}://{}{}?{}", self.scheme, self.host, path, canonical_query)
        };

        let mut req = self.http.get(&url);
        for (name, value) in signed {
            req = req.header(name, value);
        }
        Ok(req.send().await?)
    }
}

// ============ AWS SigV4 ============

/// Headers (besides `host`) that make a GET request carry a valid
/// Signature V4.
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    host: &str,
    canonical_uri: &str,
    canonical_query: &str,
    now: DateTime<Utc>,
) -> Result<Vec<(&'static str, String)>> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(b"");

    let mut headers = vec![
        ("host", host.to_string()),
        ("x-amz-content-sha256", payload_hash.clone()),
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
        "GET\n{}\n{}\n{}\n{}\n{}",
        canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3")?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    let mut out: Vec<(&'static str, String)> = headers
        .into_iter()
        .filter(|(k, _)| *k != "host")
        .collect();
    out.push(("authorization", authorization));
    Ok(out)
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| anyhow!("invalid HMAC key length"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything but `A-Z a-z 0-9 - _ . ~`.
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

// ============ ListObjectsV2 XML ============

/// Objects, truncation flag, and continuation token from one listing page.
/// Directory placeholder keys (ending in `/`) are dropped.
fn parse_list_objects_response(xml: &str) -> (Vec<S3Object>, bool, Option<String>) {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key")
            .map(|k| xml_unescape(&k))
            .unwrap_or_default();
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        objects.push(S3Object {
            key,
            last_modified: extract_xml_value(block, "LastModified")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            etag: extract_xml_value(block, "ETag")
                .map(|e| xml_unescape(&e).trim_matches('"').to_string())
                .unwrap_or_default(),
            size: extract_xml_value(block, "Size")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        });
    }

    (objects, is_truncated, next_token)
}

/// Text content of the first `<tag>` (non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

fn xml_unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn signing_key_matches_aws_example() {
        // Published example from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )
        .unwrap();
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn signed_headers_cover_session_token() {
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("token".to_string()),
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let headers = sign_request(&creds, "eu-west-1", "localhost:9000", "/b", "list-type=2", now)
            .unwrap();

        let auth = &headers.iter().find(|(k, _)| *k == "authorization").unwrap().1;
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240501/eu-west-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token, Signature="
        ));
        assert!(headers.iter().any(|(k, v)| *k == "x-amz-date" && v == "20240501T120000Z"));
        assert!(!headers.iter().any(|(k, _)| *k == "host"));
    }

    #[test]
    fn parses_listing_page() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc==</NextContinuationToken>
  <Contents>
    <Key>runbooks/</Key><Size>0</Size>
  </Contents>
  <Contents>
    <Key>runbooks/db &amp; cache.md</Key>
    <LastModified>2024-01-02T03:04:05.000Z</LastModified>
    <ETag>&quot;9b2cf535f27731c974343645a3985328&quot;</ETag>
    <Size>42</Size>
  </Contents>
</ListBucketResult>"#;

        let (objects, truncated, token) = parse_list_objects_response(xml);
        assert!(truncated);
        assert_eq!(token.as_deref(), Some("abc=="));
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "runbooks/db & cache.md");
        assert_eq!(objects[0].etag, "9b2cf535f27731c974343645a3985328");
        assert_eq!(objects[0].size, 42);
        assert!(objects[0].last_modified.is_some());
    }

    #[test]
    fn relative_keys_strip_prefix() {
        assert_eq!(relative_key("runbooks/", "runbooks/db.md"), "db.md");
        assert_eq!(relative_key("", "a/b.md"), "a/b.md");
        assert_eq!(relative_key("other", "a/b.md"), "a/b.md");
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(uri_encode("a b/c~d"), "a%20b%2Fc~d");
    }
}
