//! Integration tests for the conversational retrieval pipeline.
//!
//! These exercise the full ask flow — keyword extraction, index search,
//! grounded synthesis — against a wiremock HTTP server standing in for the
//! Ollama API, so the pipeline is verified without a live model.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chronicle::assistant::RetrievalAgent;
use chronicle::config::{AssistantConfig, SearchConfig};
use chronicle::error::ChronicleError;
use chronicle::providers::{GenerateRequest, GenerateService, OllamaClient};
use chronicle::store::{EventInput, EventStore};

fn agent_for(server: &MockServer, store: EventStore) -> RetrievalAgent {
    let llm = Arc::new(OllamaClient::new(
        server.uri(),
        "llama3.2".to_string(),
        Duration::from_secs(1),
    ));
    let config = AssistantConfig {
        base_url: server.uri(),
        request_timeout_secs: 5,
        load_timeout_secs: 5,
        ..Default::default()
    };
    RetrievalAgent::new(llm, store, config)
}

fn store_with_event(title: &str, description: &str) -> EventStore {
    let store = EventStore::open_in_memory(SearchConfig::default()).unwrap();
    store
        .create_event(EventInput {
            title: title.to_string(),
            description: description.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 10, 3, 9, 0, 0).unwrap(),
            timeline: "personal".to_string(),
            tags: None,
            actor: None,
            audio_file: None,
        })
        .unwrap();
    store
}

async fn mock_healthy(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn two_stage_pipeline_answers_with_cited_source() {
    let server = MockServer::start().await;
    mock_healthy(&server).await;

    // Stage 1: extraction reduces the question to query terms.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("Extract search keywords"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "response": "bank OR loan" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    // Stage 3: synthesis sees the retrieved event in its context.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("EVENTS IN THIS TIMELINE"))
        .and(body_string_contains("Bank call"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({ "response": "The Bank call on 2025-10-03 covered the loan terms." }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with_event("Bank call", "loan refinancing discussion");
    let agent = agent_for(&server, store);

    let result = agent
        .ask("what did the bank say about the loan?", None, &[])
        .await
        .unwrap();

    assert!(result.answer.contains("loan terms"));
    assert_eq!(result.search_results, 1);
    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].title, "Bank call");
    assert!(result.timing.total_ms >= result.timing.synthesize_ms);
}

#[tokio::test]
async fn unavailable_service_short_circuits_before_stage_one() {
    let server = MockServer::start().await;
    // Health probe fails; no generate call may be attempted.
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "x" })))
        .expect(0)
        .mount(&server)
        .await;

    let store = store_with_event("Bank call", "loan refinancing discussion");
    let agent = agent_for(&server, store);

    let status = agent.status().await;
    assert!(!status.available);
    assert!(status.reason.is_some());

    let err = agent.ask("anything?", None, &[]).await.unwrap_err();
    assert!(matches!(err, ChronicleError::ServiceUnavailable { .. }));
}

#[tokio::test]
async fn zero_results_still_synthesizes_a_grounded_non_answer() {
    let server = MockServer::start().await;
    mock_healthy(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("Extract search keywords"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "response": "zzzznomatch" })),
        )
        .mount(&server)
        .await;

    // The synthesis prompt must carry the no-matches instruction.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("no matching events were found"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({ "response": "I don't see any events about that in this timeline." }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with_event("Bank call", "loan refinancing discussion");
    let agent = agent_for(&server, store);

    let result = agent.ask("any skydiving lessons?", None, &[]).await.unwrap();
    assert_eq!(result.search_results, 0);
    assert!(result.sources.is_empty());
    assert!(result.answer.contains("don't see any events"));
}

#[tokio::test]
async fn empty_extraction_falls_back_to_verbatim_question() {
    let server = MockServer::start().await;
    mock_healthy(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("Extract search keywords"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "" })))
        .mount(&server)
        .await;

    // The verbatim question still finds the event through the sanitizer's
    // OR rewrite, so synthesis sees it.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("Relevant events:"))
        .and(body_string_contains("Bank call"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({ "response": "You called the bank about refinancing (Bank call)." }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with_event("Bank call", "loan refinancing discussion");
    let agent = agent_for(&server, store);

    let result = agent.ask("bank refinancing?", None, &[]).await.unwrap();
    assert_eq!(result.search_results, 1);
    assert_eq!(result.sources.len(), 1);
}

#[tokio::test]
async fn first_generate_gets_load_timeout_then_tightens() {
    let server = MockServer::start().await;
    // Every generate takes 2s: within the 3s load timeout, past the 1s
    // request timeout that applies once the model is warm.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "OK" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let store = store_with_event("Bank call", "loan refinancing discussion");
    let llm = Arc::new(OllamaClient::new(
        server.uri(),
        "llama3.2".to_string(),
        Duration::from_secs(1),
    ));
    let config = AssistantConfig {
        base_url: server.uri(),
        request_timeout_secs: 1,
        load_timeout_secs: 3,
        ..Default::default()
    };
    let agent = RetrievalAgent::new(llm, store, config);

    agent.warmup().await.unwrap();

    let err = agent.warmup().await.unwrap_err();
    assert!(matches!(err, ChronicleError::Timeout { .. }));
}

#[tokio::test]
async fn generate_distinguishes_timeout_from_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "late" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(
        server.uri(),
        "llama3.2".to_string(),
        Duration::from_secs(1),
    );
    let request = |timeout| GenerateRequest {
        prompt: "hello".to_string(),
        max_tokens: 8,
        temperature: 0.0,
        context_window: 2048,
        timeout,
    };

    let err = client
        .generate(request(Duration::from_millis(200)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChronicleError::Timeout { .. }));

    // A refused connection is unavailable, not a timeout.
    let dead = OllamaClient::new(
        "http://127.0.0.1:1".to_string(),
        "llama3.2".to_string(),
        Duration::from_secs(1),
    );
    let err = dead
        .generate(request(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChronicleError::ServiceUnavailable { .. }));
}

#[tokio::test]
async fn multiple_timelines_without_filter_asks_for_one() {
    let server = MockServer::start().await;
    mock_healthy(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "x" })))
        .expect(0)
        .mount(&server)
        .await;

    let store = store_with_event("Bank call", "loan refinancing discussion");
    store
        .create_event(EventInput {
            title: "Council hearing".to_string(),
            description: String::new(),
            timestamp: Utc.with_ymd_and_hms(2025, 10, 4, 9, 0, 0).unwrap(),
            timeline: "town".to_string(),
            tags: None,
            actor: None,
            audio_file: None,
        })
        .unwrap();
    let agent = agent_for(&server, store);

    let result = agent.ask("what happened?", None, &[]).await.unwrap();
    assert!(result.answer.contains("personal"));
    assert!(result.answer.contains("town"));
    assert_eq!(result.search_results, 0);
}

#[tokio::test]
async fn timeline_filter_excludes_other_timelines() {
    let server = MockServer::start().await;
    mock_healthy(&server).await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("Extract search keywords"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "hearing" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("no matching events were found"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({ "response": "I don't see any events about that in this timeline." }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    // The only matching event lives in the "town" timeline; filtering to
    // "personal" must leave the snippet set empty.
    let store = store_with_event("Groceries", "weekly shop");
    store
        .create_event(EventInput {
            title: "Council hearing".to_string(),
            description: "zoning hearing notes".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 10, 4, 9, 0, 0).unwrap(),
            timeline: "town".to_string(),
            tags: None,
            actor: None,
            audio_file: None,
        })
        .unwrap();
    let agent = agent_for(&server, store);

    let result = agent
        .ask("any hearings?", Some("personal"), &[])
        .await
        .unwrap();
    assert_eq!(result.search_results, 0);
}
