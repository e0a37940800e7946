//! HTTP surface of a node
//!
//! Routes:
//! - `POST /index/{index}/query?{raw}` — submit a query, body = query text
//! - `POST /recalculate-caches` — trigger a cache rebuild, 204 on success
//! - `GET /status` — the node's current cluster view

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use super::ClusterState;
use crate::types::OutputBuffer;

/// Build the route tree for one server
pub(crate) fn routes(
    cluster: Arc<RwLock<ClusterState>>,
    log: OutputBuffer,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let cluster_filter = warp::any().map(move || Arc::clone(&cluster));
    let log_filter = warp::any().map(move || log.clone());

    let query = warp::path!("index" / String / "query")
        .and(warp::post())
        .and(raw_query())
        .and(warp::body::bytes())
        .and(log_filter.clone())
        .and_then(handle_query);

    let recalculate = warp::path!("recalculate-caches")
        .and(warp::post())
        .and(log_filter)
        .and_then(handle_recalculate);

    let status = warp::path!("status")
        .and(warp::get())
        .and(cluster_filter)
        .and_then(handle_status);

    query.or(recalculate).or(status)
}

/// Raw query string, or empty when the request carries none
fn raw_query() -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::query::raw().or_else(|_| async { Ok::<(String,), Rejection>((String::new(),)) })
}

async fn handle_query(
    index: String,
    raw: String,
    body: Bytes,
    log: OutputBuffer,
) -> Result<impl Reply, Infallible> {
    let query = String::from_utf8_lossy(&body);
    log.write_line(&format!("query index={} raw={} q={}", index, raw, query));

    // Canned result shapes per query family; the query engine itself is
    // out of scope for the harness.
    let response = if query.trim_start().starts_with("Bitmap") {
        serde_json::json!({ "results": [ { "attrs": {}, "bits": [] } ] })
    } else {
        serde_json::json!({ "results": [ true ] })
    };

    Ok(warp::reply::json(&response))
}

async fn handle_recalculate(log: OutputBuffer) -> Result<impl Reply, Infallible> {
    log.write_line("recalculate caches");
    Ok(warp::reply::with_status(
        warp::reply(),
        StatusCode::NO_CONTENT,
    ))
}

async fn handle_status(cluster: Arc<RwLock<ClusterState>>) -> Result<impl Reply, Infallible> {
    let status = cluster.read().await.status();
    Ok(warp::reply::json(&status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_returns_results_json() {
        let cluster = Arc::new(RwLock::new(ClusterState::default()));
        let log = OutputBuffer::new();
        let routes = routes(cluster, log.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/index/foo/query?")
            .body("Bitmap(frame=x, rowID=1)")
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert!(parsed["results"].is_array());
        assert!(log.contents().contains("index=foo"));
    }

    #[tokio::test]
    async fn test_recalculate_caches_is_no_content() {
        let cluster = Arc::new(RwLock::new(ClusterState::default()));
        let routes = routes(cluster, OutputBuffer::new());

        let resp = warp::test::request()
            .method("POST")
            .path("/recalculate-caches")
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.body().is_empty());
    }

    #[tokio::test]
    async fn test_status_reflects_cluster_state() {
        use crate::types::{MembershipMode, NodeUri};

        let cluster = Arc::new(RwLock::new(ClusterState::default()));
        {
            let mut state = cluster.write().await;
            state.mode = MembershipMode::Dynamic;
            state.coordinator = Some(NodeUri::new("127.0.0.1", 10101));
        }
        let routes = routes(cluster, OutputBuffer::new());

        let resp = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let status: crate::types::ClusterStatus = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(status.mode, MembershipMode::Dynamic);
        assert_eq!(status.coordinator, Some(NodeUri::new("127.0.0.1", 10101)));
    }
}
