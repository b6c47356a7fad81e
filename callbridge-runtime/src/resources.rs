// Copyright 2025 Callbridge (https://github.com/callbridge/callbridge)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! URI-addressed store for byte and text content.
//!
//! Blob results land here instead of traveling inline; the caller gets a
//! URI and reads the content back through the resource boundary. Entries
//! expire on their own TTL, enforced by the cache.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::ResourceStoreConfig;

/// Resource tokens are `"res_"` plus twelve hex characters.
pub const RESOURCE_ID_PREFIX: &str = "res_";

fn next_resource_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", RESOURCE_ID_PREFIX, &hex[..12])
}

/// Sniff a content type from leading magic bytes, falling back to UTF-8
/// text detection.
pub fn sniff_content_type(content: &[u8]) -> &'static str {
    if content.starts_with(b"\x89PNG") {
        "image/png"
    } else if content.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if content.starts_with(b"%PDF") {
        "application/pdf"
    } else if std::str::from_utf8(content).is_ok() {
        "text/plain"
    } else {
        "application/octet-stream"
    }
}

/// Stored content, split by whether it decodes as text.
#[derive(Debug, Clone)]
pub enum ResourceContent {
    Text(String),
    Binary(Vec<u8>),
}

impl ResourceContent {
    pub fn len(&self) -> usize {
        match self {
            ResourceContent::Text(text) => text.len(),
            ResourceContent::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct ResourceEntry {
    content: ResourceContent,
    content_type: String,
    created_at: DateTime<Utc>,
}

/// What the resource-read boundary returns. Binary content arrives
/// base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReading {
    pub content: String,
    pub content_type: String,
    /// Whether `content` is base64-encoded binary rather than raw text.
    #[serde(default)]
    pub base64: bool,
}

/// One row of the resource listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub uri: String,
    pub content_type: String,
    pub size: usize,
    pub created_at: DateTime<Utc>,
}

/// TTL-bounded store of resources addressed by URI.
pub struct ResourceStore {
    cache: Cache<String, Arc<ResourceEntry>>,
    base_url: String,
}

impl ResourceStore {
    pub fn new(config: &ResourceStoreConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.ttl())
            .build();
        Self {
            cache,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Store content and return its URI.
    pub fn store(&self, content: ResourceContent, content_type: impl Into<String>) -> String {
        let token = next_resource_id();
        let entry = Arc::new(ResourceEntry {
            content,
            content_type: content_type.into(),
            created_at: Utc::now(),
        });
        debug!(
            resource = %token,
            content_type = %entry.content_type,
            size = entry.content.len(),
            "stored resource"
        );
        self.cache.insert(token.clone(), entry);
        format!("{}/{}", self.base_url, token)
    }

    /// Resolve a URI (or bare token) to its content.
    pub fn read(&self, uri: &str) -> Option<ResourceReading> {
        let token = self.token_of(uri)?;
        let entry = self.cache.get(&token)?;
        Some(match &entry.content {
            ResourceContent::Text(text) => ResourceReading {
                content: text.clone(),
                content_type: entry.content_type.clone(),
                base64: false,
            },
            ResourceContent::Binary(bytes) => ResourceReading {
                content: general_purpose::STANDARD.encode(bytes),
                content_type: entry.content_type.clone(),
                base64: true,
            },
        })
    }

    /// Enumerate live resources, ordered by URI.
    pub fn list(&self) -> Vec<ResourceInfo> {
        self.cache.run_pending_tasks();
        let mut listed: Vec<ResourceInfo> = self
            .cache
            .iter()
            .map(|(token, entry)| ResourceInfo {
                uri: format!("{}/{}", self.base_url, token),
                content_type: entry.content_type.clone(),
                size: entry.content.len(),
                created_at: entry.created_at,
            })
            .collect();
        listed.sort_by(|a, b| a.uri.cmp(&b.uri));
        listed
    }

    pub fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn token_of(&self, uri: &str) -> Option<String> {
        uri.strip_prefix(&self.base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(str::to_string)
            .or_else(|| {
                uri.starts_with(RESOURCE_ID_PREFIX)
                    .then(|| uri.to_string())
            })
    }
}

impl std::fmt::Debug for ResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("base_url", &self.base_url)
            .finish()
    }
}
