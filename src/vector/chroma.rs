/// Chroma HTTP client implementing `VectorIndex`
///
/// Talks to the Chroma REST API (v1 routes, tenant/database scoped). Collections
/// are addressed by name; each call resolves the name to Chroma's collection id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{VectorHit, VectorIndex, VectorIndexError};
use crate::config::VectorConfig;
use crate::search::{CorpusItem, Metadata, MetadataFilter};

const CORPUS_PAGE_SIZE: usize = 1000;

// --- HTTP request/response structs ---

#[derive(Deserialize)]
struct CollectionInfo {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    query_embeddings: Vec<&'a [f32]>,
    n_results: usize,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    where_clause: Option<Value>,
    include: [&'static str; 4],
}

#[derive(Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<serde_json::Map<String, Value>>>>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<Vec<f32>>>>,
}

#[derive(Serialize)]
struct GetRequest {
    include: [&'static str; 2],
    limit: usize,
    offset: usize,
}

#[derive(Deserialize)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<serde_json::Map<String, Value>>>>,
}

/// Chroma-backed vector index.
pub struct ChromaVectorIndex {
    client: reqwest::Client,
    base_url: String,
    tenant: String,
    database: String,
}

impl ChromaVectorIndex {
    pub fn new(config: &VectorConfig) -> Self {
        ChromaVectorIndex {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tenant: config.tenant.clone(),
            database: config.database.clone(),
        }
    }

    fn scope(&self) -> [(&str, &str); 2] {
        [("tenant", self.tenant.as_str()), ("database", self.database.as_str())]
    }

    /// Resolve a collection name to its Chroma id.
    async fn collection_id(&self, name: &str) -> Result<String, VectorIndexError> {
        let url = format!("{}/api/v1/collections/{}", self.base_url, name);
        let response = self
            .client
            .get(&url)
            .query(&self.scope())
            .send()
            .await
            .map_err(|e| VectorIndexError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Older Chroma servers answer a missing collection with a 500 + ValueError.
            if status.as_u16() == 404 || body.contains("does not exist") {
                return Err(VectorIndexError::CollectionNotFound(name.to_string()));
            }
            return Err(VectorIndexError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let info: CollectionInfo = response
            .json()
            .await
            .map_err(|e| VectorIndexError::Decode(e.to_string()))?;
        Ok(info.id)
    }

    async fn post_json<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<R, VectorIndexError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| VectorIndexError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(VectorIndexError::Api { status, message: body });
        }

        response
            .json()
            .await
            .map_err(|e| VectorIndexError::Decode(e.to_string()))
    }
}

/// Translate an exact-match filter into a Chroma `where` clause.
///
/// One pair is a plain object; several are combined under `$and`.
pub fn where_clause(filter: &MetadataFilter) -> Option<Value> {
    match filter.len() {
        0 => None,
        1 => filter.iter().next().map(|(k, v)| json!({ k: v })),
        _ => {
            let clauses: Vec<Value> = filter.iter().map(|(k, v)| json!({ k: v })).collect();
            Some(json!({ "$and": clauses }))
        }
    }
}

/// Flatten Chroma metadata values (strings, numbers, bools) to strings.
fn to_metadata(raw: Option<serde_json::Map<String, Value>>) -> Metadata {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| {
            let value = match v {
                Value::String(s) => s,
                Value::Null => return None,
                other => other.to_string(),
            };
            Some((k, value))
        })
        .collect()
}

impl QueryResponse {
    /// Unpack the first (and only) query row into hits.
    fn into_hits(self) -> Result<Vec<VectorHit>, VectorIndexError> {
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let distances = self
            .distances
            .and_then(|d| d.into_iter().next())
            .ok_or_else(|| VectorIndexError::Decode("query response is missing distances".to_string()))?;
        if distances.len() != ids.len() {
            return Err(VectorIndexError::Decode(format!(
                "{} ids but {} distances",
                ids.len(),
                distances.len()
            )));
        }

        let mut documents = self.documents.and_then(|d| d.into_iter().next()).unwrap_or_default().into_iter();
        let mut metadatas = self.metadatas.and_then(|m| m.into_iter().next()).unwrap_or_default().into_iter();
        let mut embeddings = self.embeddings.and_then(|e| e.into_iter().next()).unwrap_or_default().into_iter();

        Ok(ids
            .into_iter()
            .zip(distances)
            .map(|(id, distance)| VectorHit {
                id,
                distance,
                document: documents.next().flatten(),
                metadata: to_metadata(metadatas.next().flatten()),
                embedding: embeddings.next(),
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for ChromaVectorIndex {
    async fn knn_query(
        &self,
        collection: &str,
        query_embedding: &[f32],
        n: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorHit>, VectorIndexError> {
        let id = self.collection_id(collection).await?;
        let url = format!("{}/api/v1/collections/{}/query", self.base_url, id);
        let request = QueryRequest {
            query_embeddings: vec![query_embedding],
            n_results: n,
            where_clause: where_clause(filter),
            include: ["documents", "metadatas", "distances", "embeddings"],
        };

        let response: QueryResponse = self.post_json(&url, &request).await?;
        response.into_hits()
    }

    async fn fetch_corpus(&self, collection: &str) -> Result<Vec<CorpusItem>, VectorIndexError> {
        let id = self.collection_id(collection).await?;
        let url = format!("{}/api/v1/collections/{}/get", self.base_url, id);

        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let request = GetRequest {
                include: ["documents", "metadatas"],
                limit: CORPUS_PAGE_SIZE,
                offset,
            };
            let page: GetResponse = self.post_json(&url, &request).await?;
            let count = page.ids.len();

            let mut documents = page.documents.unwrap_or_default().into_iter();
            let mut metadatas = page.metadatas.unwrap_or_default().into_iter();
            for doc_id in page.ids {
                items.push(CorpusItem {
                    id: doc_id,
                    text: documents.next().flatten().unwrap_or_default(),
                    metadata: to_metadata(metadatas.next().flatten()),
                });
            }

            if count < CORPUS_PAGE_SIZE {
                break;
            }
            offset += count;
        }

        tracing::debug!(collection, count = items.len(), "Fetched corpus from Chroma");
        Ok(items)
    }

    async fn list_collections(&self) -> Result<Vec<String>, VectorIndexError> {
        let url = format!("{}/api/v1/collections", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&self.scope())
            .send()
            .await
            .map_err(|e| VectorIndexError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VectorIndexError::Api { status, message: body });
        }

        let collections: Vec<CollectionInfo> = response
            .json()
            .await
            .map_err(|e| VectorIndexError::Decode(e.to_string()))?;
        Ok(collections.into_iter().map(|c| c.name).collect())
    }
}
