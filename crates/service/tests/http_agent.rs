//! Integration tests for the HTTP publishing agent and verification target

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use ::common::collection::digest;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use service::{
    AgentError, BeginRequest, HttpPublishingAgent, HttpVerificationTarget, PublishingAgent,
    UploadBody, VerificationTarget,
};
use url::Url;

#[derive(Debug, Clone)]
struct Call {
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

type Calls = Arc<Mutex<Vec<Call>>>;

async fn record(State(calls): State<Calls>, uri: Uri, body: Bytes) -> (StatusCode, String) {
    let parsed = Url::parse(&format!("http://agent{}", uri)).unwrap();
    let call = Call {
        path: parsed.path().to_string(),
        query: parsed.query_pairs().into_owned().collect(),
        body: body.to_vec(),
    };
    let failing = call.query.get("uri").map(String::as_str) == Some("/broken.json");
    calls.lock().push(call);
    if failing {
        (StatusCode::INTERNAL_SERVER_ERROR, "disk full".to_string())
    } else {
        (StatusCode::OK, String::new())
    }
}

async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{}", addr)).unwrap()
}

async fn agent_server() -> (HttpPublishingAgent, Calls) {
    common::init_tracing();
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let url = serve(Router::new().fallback(record).with_state(calls.clone())).await;
    (HttpPublishingAgent::new(&url).unwrap(), calls)
}

#[tokio::test]
async fn test_agent_protocol() {
    let (agent, calls) = agent_server().await;
    let begin = BeginRequest {
        transaction_id: "tx-1".to_string(),
        collection_id: "budget-2024".to_string(),
        wrapped_key: Some("d3JhcHBlZA==".to_string()),
        salt: Some("c2FsdA==".to_string()),
    };

    agent.begin(&begin).await.unwrap();
    agent
        .upload(
            "tx-1",
            "/economy/data.json",
            UploadBody::from_bytes(&b"ciphertext"[..]),
        )
        .await
        .unwrap();
    agent.commit("tx-1", "/economy/data.json").await.unwrap();
    agent.delete("tx-1", "/economy/old.json").await.unwrap();
    agent.end("tx-1").await.unwrap();

    let calls = calls.lock();
    let paths: Vec<&str> = calls.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["/begin", "/publish", "/commit", "/delete", "/end"]);

    let sent: BeginRequest = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(sent, begin);

    assert_eq!(calls[1].query["transactionId"], "tx-1");
    assert_eq!(calls[1].query["uri"], "/economy/data.json");
    assert_eq!(calls[1].body, b"ciphertext");
    assert_eq!(calls[4].query["transactionId"], "tx-1");
}

#[tokio::test]
async fn test_agent_error_status() {
    let (agent, _calls) = agent_server().await;
    let err = agent.commit("tx-1", "/broken.json").await.unwrap_err();
    match err {
        AgentError::HttpStatus(status, body) => {
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(body, "disk full");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_agent_unreachable() {
    // nothing listens on the discard port
    let agent = HttpPublishingAgent::new(&Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
    assert!(matches!(
        agent.end("tx-1").await,
        Err(AgentError::Reqwest(_))
    ));
}

#[tokio::test]
async fn test_website_target() {
    let router = Router::new().route(
        "/economy/data.json",
        get(|| async { "{\"total\": 42}" }),
    );
    let url = serve(router).await;
    let target = HttpVerificationTarget::new(&url).unwrap();

    let observed = target.fetch("/economy/data.json").await.unwrap().unwrap();
    let (sha, size) = digest(b"{\"total\": 42}");
    assert_eq!(observed.sha, sha);
    assert_eq!(observed.size, size);

    assert!(target.fetch("/economy/missing.json").await.unwrap().is_none());
}

#[tokio::test]
async fn test_agent_streams_large_upload() {
    let (agent, calls) = agent_server().await;
    let content: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();

    let (sender, body) = UploadBody::channel(2);
    let chunks: Vec<Vec<u8>> = content.chunks(64 * 1024).map(<[u8]>::to_vec).collect();
    tokio::spawn(async move {
        for chunk in chunks {
            sender.send(Ok(Bytes::from(chunk))).await.unwrap();
        }
    });
    agent.upload("tx-1", "/economy/big.bin", body).await.unwrap();

    let calls = calls.lock();
    assert_eq!(calls[0].path, "/publish");
    assert_eq!(calls[0].body, content);
}

#[tokio::test]
async fn test_agent_upload_fails_on_producer_error() {
    let (agent, _calls) = agent_server().await;
    let (sender, body) = UploadBody::channel(2);
    sender.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
    sender
        .send(Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        .await
        .unwrap();
    drop(sender);

    assert!(agent.upload("tx-1", "/economy/big.bin", body).await.is_err());
}
