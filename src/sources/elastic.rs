use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::AppResult;
use crate::config::SourceConfig;
use crate::error::AppError;
use crate::model::{DocumentType, EmbeddingRecord};
use crate::sources::snippet;
use crate::sources::traits::VectorSource;

const ADAPTER: &str = "elasticsearch";

/// How long the point in time stays open between two page requests.
const KEEP_ALIVE: &str = "1m";

#[derive(Debug, Deserialize)]
struct PitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    /// The cluster may hand back a newer point-in-time id with every page.
    #[serde(default)]
    pit_id: Option<String>,
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    total: Option<TotalHits>,
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct TotalHits {
    value: usize,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: StoredEmbedding,
    /// Sort values of this hit, the cursor for the next page.
    #[serde(default)]
    sort: Option<Vec<Value>>,
}

/// Document shape of the `vector_embeddings` index.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEmbedding {
    id: String,
    reference_id: String,
    document_type: DocumentType,
    embedding: Vec<f32>,
    #[serde(default)]
    cluster_id: Option<i64>,
    #[serde(default)]
    content_preview: Option<String>,
}

impl From<StoredEmbedding> for EmbeddingRecord {
    fn from(stored: StoredEmbedding) -> Self {
        EmbeddingRecord {
            id: stored.id,
            reference_id: stored.reference_id,
            document_type: stored.document_type,
            vector: stored.embedding,
            cluster_id: stored.cluster_id,
            preview: stored.content_preview.filter(|p| !p.is_empty()),
        }
    }
}

struct Page {
    records: Vec<EmbeddingRecord>,
    total: Option<usize>,
    pit_id: Option<String>,
    cursor: Option<Vec<Value>>,
}

/// Reads the whole index through a point in time, paging with `search_after`.
///
/// `from`/`size` paging stops at the index's result window (10 000 hits by
/// default), a cursor does not.
#[derive(Clone)]
pub struct ElasticVectorSource {
    client: reqwest::Client,
    pit_url: String,
    search_url: String,
    close_url: String,
    page_size: usize,
}

impl ElasticVectorSource {
    pub fn new(client: reqwest::Client, config: &SourceConfig) -> Self {
        Self {
            client,
            pit_url: config.pit_url(),
            search_url: config.pit_search_url(),
            close_url: config.pit_close_url(),
            page_size: config.page_size.max(1),
        }
    }

    fn unavailable(reason: impl Into<String>) -> AppError {
        AppError::SourceUnavailable {
            adapter: ADAPTER,
            reason: reason.into(),
        }
    }

    /// Send `req` and decode a successful JSON body into `T`.
    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder, what: &str) -> AppResult<T> {
        let resp = req
            .send()
            .await
            .map_err(|e| Self::unavailable(format!("{what} request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Self::unavailable(format!("failed to read {what} response body: {e}")))?;
        if !status.is_success() {
            return Err(Self::unavailable(format!(
                "{what} returned {status}: {}",
                snippet(&text)
            )));
        }

        let de = &mut serde_json::Deserializer::from_str(&text);
        serde_path_to_error::deserialize(de).map_err(|e| {
            Self::unavailable(format!(
                "malformed {what} response at {}: {}",
                e.path(),
                e.inner()
            ))
        })
    }

    async fn open_pit(&self) -> AppResult<String> {
        let req = self
            .client
            .post(&self.pit_url)
            .query(&[("keep_alive", KEEP_ALIVE)]);
        let pit: PitResponse = self.send(req, "point-in-time").await?;
        trace!("Opened point in time {}", pit.id);
        Ok(pit.id)
    }

    /// Release the point in time. A failure only costs server memory until the
    /// keep-alive runs out, so it is logged and otherwise ignored.
    async fn close_pit(&self, pit_id: &str) {
        let result = self
            .client
            .delete(&self.close_url)
            .json(&json!({ "id": pit_id }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => trace!("Closed point in time"),
            Ok(resp) => debug!("Closing point in time returned {}", resp.status()),
            Err(e) => debug!("Closing point in time failed: {e}"),
        }
    }

    /// Fetch one page after `cursor`. `_shard_doc` makes the sort total, so no
    /// hit can repeat or go missing across pages.
    #[tracing::instrument(name = "Fetching embedding page", level = "trace", skip(self, pit_id))]
    async fn fetch_page(&self, pit_id: &str, cursor: Option<&[Value]>) -> AppResult<Page> {
        let mut body = json!({
            "size": self.page_size,
            "track_total_hits": true,
            "query": { "match_all": {} },
            "pit": { "id": pit_id, "keep_alive": KEEP_ALIVE },
            "sort": [
                { "referenceId": { "order": "asc" } },
                { "documentType": { "order": "asc" } },
                { "_shard_doc": { "order": "asc" } }
            ]
        });
        if let Some(cursor) = cursor {
            body["search_after"] = json!(cursor);
        }

        let req = self.client.post(&self.search_url).json(&body);
        let parsed: SearchResponse = self.send(req, "search").await?;
        let total = parsed.hits.total.map(|t| t.value);
        let cursor = parsed.hits.hits.last().and_then(|hit| hit.sort.clone());
        let records = parsed
            .hits
            .hits
            .into_iter()
            .map(|hit| EmbeddingRecord::from(hit.source))
            .collect();
        Ok(Page {
            records,
            total,
            pit_id: parsed.pit_id,
            cursor,
        })
    }

    /// Follow the cursor until a short page or the reported total. `pit_id` is
    /// kept current so the caller closes the latest one.
    async fn collect(&self, pit_id: &mut String) -> AppResult<Vec<EmbeddingRecord>> {
        let mut records = Vec::new();
        let mut cursor: Option<Vec<Value>> = None;
        loop {
            let page = self.fetch_page(pit_id, cursor.as_deref()).await?;
            if let Some(id) = page.pit_id {
                *pit_id = id;
            }
            let page_len = page.records.len();
            records.extend(page.records);
            trace!("Fetched page of {} records ({} so far)", page_len, records.len());

            let reached_total = page.total.is_some_and(|t| records.len() >= t);
            if page_len < self.page_size || reached_total {
                break;
            }
            cursor = match page.cursor {
                Some(next) => Some(next),
                None => return Err(Self::unavailable("full page without sort values")),
            };
        }
        Ok(records)
    }

    #[tracing::instrument(name = "Fetching embeddings", level = "info", skip(self))]
    async fn fetch_all(&self) -> AppResult<Vec<EmbeddingRecord>> {
        let mut pit_id = self.open_pit().await?;
        let result = self.collect(&mut pit_id).await;
        self.close_pit(&pit_id).await;

        let records = result?;
        debug!("Fetched {} embedding records", records.len());
        Ok(records)
    }
}

impl VectorSource for ElasticVectorSource {
    fn fetch_embeddings(&self) -> BoxFuture<'_, AppResult<Vec<EmbeddingRecord>>> {
        self.fetch_all().boxed()
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Mock, ServerGuard};

    use super::*;

    fn hit(id: usize, doc_type: &str) -> Value {
        json!({
            "_index": "vector_embeddings",
            "_id": format!("emb-{id}"),
            "_source": {
                "id": format!("emb-{id}"),
                "referenceId": format!("doc-{id}"),
                "documentType": doc_type,
                "embedding": [0.1, 0.2, 0.3],
                "clusterId": id as i64 % 2,
                "contentPreview": "{1:F01BANKBEBBAXXX}"
            },
            "sort": [format!("doc-{id}"), doc_type, id]
        })
    }

    fn page(pit_id: &str, hits: Vec<Value>, total: usize) -> String {
        json!({
            "pit_id": pit_id,
            "hits": { "total": { "value": total, "relation": "eq" }, "hits": hits }
        })
        .to_string()
    }

    fn source(url: &str, page_size: usize) -> ElasticVectorSource {
        let config = SourceConfig {
            store_url: url.to_string(),
            page_size,
            ..Default::default()
        };
        ElasticVectorSource::new(reqwest::Client::new(), &config)
    }

    async fn open_pit(server: &mut ServerGuard, pit_id: &str) -> Mock {
        server
            .mock("POST", "/vector_embeddings/_pit")
            .match_query(Matcher::UrlEncoded("keep_alive".into(), KEEP_ALIVE.into()))
            .with_status(200)
            .with_body(json!({ "id": pit_id }).to_string())
            .create_async()
            .await
    }

    async fn close_pit(server: &mut ServerGuard, pit_id: &str) -> Mock {
        server
            .mock("DELETE", "/_pit")
            .match_body(Matcher::PartialJson(json!({ "id": pit_id })))
            .with_status(200)
            .with_body(r#"{"succeeded": true, "num_freed": 1}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn second_page_continues_after_the_last_sort_values() {
        let mut server = mockito::Server::new_async().await;
        let opened = open_pit(&mut server, "pit-1").await;
        let first = server
            .mock("POST", "/_search")
            .match_body(Matcher::PartialJson(json!({ "size": 2, "pit": { "id": "pit-1" } })))
            .with_status(200)
            .with_body(page("pit-2", vec![hit(1, "MESSAGE"), hit(2, "TEMPLATE")], 3))
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/_search")
            .match_body(Matcher::PartialJson(json!({
                "size": 2,
                "pit": { "id": "pit-2" },
                "search_after": ["doc-2", "TEMPLATE", 2]
            })))
            .with_status(200)
            .with_body(page("pit-2", vec![hit(3, "MESSAGE")], 3))
            .expect(1)
            .create_async()
            .await;
        let closed = close_pit(&mut server, "pit-2").await;

        let records = source(&server.url(), 2).fetch_embeddings().await.unwrap();

        opened.assert_async().await;
        first.assert_async().await;
        second.assert_async().await;
        closed.assert_async().await;
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, "emb-1");
        assert_eq!(records[1].document_type, DocumentType::Template);
        assert_eq!(records[2].reference_id, "doc-3");
        assert_eq!(records[2].vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(records[0].cluster_id, Some(1));
    }

    #[tokio::test]
    async fn requests_never_use_offsets() {
        let mut server = mockito::Server::new_async().await;
        let _opened = open_pit(&mut server, "pit-1").await;
        let with_offset = server
            .mock("POST", "/_search")
            .match_body(Matcher::Regex(r#""from""#.to_string()))
            .expect(0)
            .create_async()
            .await;
        let _search = server
            .mock("POST", "/_search")
            .with_status(200)
            .with_body(page("pit-1", vec![hit(1, "MESSAGE")], 1))
            .create_async()
            .await;
        let _closed = close_pit(&mut server, "pit-1").await;

        let records = source(&server.url(), 1000).fetch_embeddings().await.unwrap();

        with_offset.assert_async().await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn full_last_page_stops_at_reported_total() {
        let mut server = mockito::Server::new_async().await;
        let _opened = open_pit(&mut server, "pit-1").await;
        let only = server
            .mock("POST", "/_search")
            .with_status(200)
            .with_body(page("pit-1", vec![hit(1, "MESSAGE"), hit(2, "MESSAGE")], 2))
            .expect(1)
            .create_async()
            .await;
        let _closed = close_pit(&mut server, "pit-1").await;

        let records = source(&server.url(), 2).fetch_embeddings().await.unwrap();

        only.assert_async().await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn empty_index_is_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _opened = open_pit(&mut server, "pit-1").await;
        let _m = server
            .mock("POST", "/_search")
            .with_status(200)
            .with_body(page("pit-1", vec![], 0))
            .create_async()
            .await;
        let _closed = close_pit(&mut server, "pit-1").await;

        let records = source(&server.url(), 10).fetch_embeddings().await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_source_unavailable_and_still_closes() {
        let mut server = mockito::Server::new_async().await;
        let _opened = open_pit(&mut server, "pit-1").await;
        let _m = server
            .mock("POST", "/_search")
            .with_status(503)
            .with_body("cluster_block_exception")
            .create_async()
            .await;
        let closed = close_pit(&mut server, "pit-1").await;

        let err = source(&server.url(), 10)
            .fetch_embeddings()
            .await
            .unwrap_err();
        closed.assert_async().await;
        match err {
            AppError::SourceUnavailable { adapter, reason } => {
                assert_eq!(adapter, "elasticsearch");
                assert!(reason.contains("503"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn refused_point_in_time_is_source_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/vector_embeddings/_pit")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("index_not_found_exception")
            .create_async()
            .await;

        let err = source(&server.url(), 10)
            .fetch_embeddings()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable { .. }));
        assert!(err.to_string().contains("404"), "{err}");
    }

    #[tokio::test]
    async fn full_page_without_sort_values_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _opened = open_pit(&mut server, "pit-1").await;
        let mut unsorted = hit(1, "MESSAGE");
        unsorted.as_object_mut().unwrap().remove("sort");
        let _m = server
            .mock("POST", "/_search")
            .with_status(200)
            .with_body(page("pit-1", vec![unsorted], 5))
            .create_async()
            .await;
        let _closed = close_pit(&mut server, "pit-1").await;

        let err = source(&server.url(), 1).fetch_embeddings().await.unwrap_err();
        assert!(err.to_string().contains("sort values"), "{err}");
    }

    #[tokio::test]
    async fn malformed_record_names_the_bad_field() {
        let mut server = mockito::Server::new_async().await;
        let _opened = open_pit(&mut server, "pit-1").await;
        let body = json!({ "hits": { "hits": [ { "_source": {
            "id": "emb-1",
            "referenceId": "doc-1",
            "documentType": "MESSAGE",
            "embedding": "not-a-vector"
        } } ] } });
        let _m = server
            .mock("POST", "/_search")
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await;
        let _closed = close_pit(&mut server, "pit-1").await;

        let err = source(&server.url(), 10)
            .fetch_embeddings()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable { .. }));
        assert!(err.to_string().contains("embedding"), "{err}");
    }

    #[tokio::test]
    async fn unreachable_store_is_source_unavailable() {
        let err = source("http://127.0.0.1:9", 10)
            .fetch_embeddings()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable { .. }));
    }
}
