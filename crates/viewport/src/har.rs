//! Minimal HAR 1.2 model assembled from `Network.*` protocol events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Har {
    pub log: HarLog,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarLog {
    pub version: String,
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarCreator {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    pub started_date_time: DateTime<Utc>,
    /// Total elapsed time in milliseconds, -1 while in flight.
    pub time: f64,
    pub request: HarRequest,
    pub response: HarResponse,
    pub timings: HarTimings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub headers: Vec<HarHeader>,
    pub header_size: i64,
    pub body_size: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    pub status: i64,
    pub status_text: String,
    pub http_version: String,
    pub headers: Vec<HarHeader>,
    pub content: HarContent,
    pub header_size: i64,
    pub body_size: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarHeader {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    pub size: i64,
    pub mime_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HarTimings {
    pub send: f64,
    pub wait: f64,
    pub receive: f64,
}

impl Har {
    pub fn new() -> Self {
        Self {
            log: HarLog {
                version: "1.2".to_string(),
                creator: HarCreator {
                    name: "openbrowser".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                entries: Vec::new(),
            },
        }
    }
}

impl Default for Har {
    fn default() -> Self {
        Self::new()
    }
}

impl HarEntry {
    pub fn started(method: String, url: String, headers: Vec<HarHeader>) -> Self {
        Self {
            started_date_time: Utc::now(),
            time: -1.0,
            request: HarRequest {
                method,
                url,
                http_version: "HTTP/1.1".to_string(),
                headers,
                header_size: -1,
                body_size: -1,
            },
            response: HarResponse {
                status: 0,
                status_text: String::new(),
                http_version: "HTTP/1.1".to_string(),
                headers: Vec::new(),
                content: HarContent {
                    size: -1,
                    mime_type: String::new(),
                },
                header_size: -1,
                body_size: -1,
            },
            timings: HarTimings {
                send: 0.0,
                wait: -1.0,
                receive: -1.0,
            },
        }
    }
}

pub fn headers_from_json(value: &serde_json::Value) -> Vec<HarHeader> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(name, v)| HarHeader {
                    name: name.clone(),
                    value: v.as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_har_12_shape() {
        let mut har = Har::new();
        har.log.entries.push(HarEntry::started(
            "GET".into(),
            "https://example.com/".into(),
            vec![],
        ));
        let json = serde_json::to_value(&har).expect("serialize");
        assert_eq!(json["log"]["version"], "1.2");
        assert_eq!(json["log"]["entries"][0]["request"]["method"], "GET");
        assert!(json["log"]["entries"][0]["startedDateTime"].is_string());
    }
}
