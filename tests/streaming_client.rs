mod support;

use std::time::{Duration, Instant};

use axum::http::{header, StatusCode};
use axum::routing::post;
use axum::Router;
use chat_relay::client::{ClientError, RelayClient, StreamOptions};
use chat_relay::models::{ChatContext, ChatMessage, Role};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use support::{test_app, upstream_failure, StubGateway};

async fn serve(router: Router) -> RelayClient {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    RelayClient::new(&format!("http://{addr}")).unwrap()
}

fn question(text: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::new(Role::User, text)]
}

#[tokio::test]
async fn fragments_accumulate_into_one_message() {
    let app = test_app(StubGateway::replying(&["He", "llo"]));
    let client = serve(app.router.clone()).await;

    let mut seen = Vec::new();
    let reply = client
        .post_streaming(&question("Hi"), &StreamOptions::default(), &CancellationToken::new(), |snapshot, fragment| {
            seen.push((fragment.to_string(), snapshot.content.clone().unwrap_or_default()));
        })
        .await
        .unwrap();

    assert_eq!(
        seen,
        vec![("He".to_string(), "He".to_string()), ("llo".to_string(), "Hello".to_string())]
    );
    assert_eq!(reply.content.as_deref(), Some("Hello"));
    assert_eq!(reply.role.as_deref(), Some("assistant"));
    assert!(reply.id.is_some());
    assert!(reply.created_date_time.is_some());
}

#[tokio::test]
async fn cancelling_stops_the_stream_and_releases_the_upstream() {
    let fragments: Vec<String> = (0..200).map(|i| format!("w{i} ")).collect();
    let fragments: Vec<&str> = fragments.iter().map(String::as_str).collect();
    let app = test_app(StubGateway::replying(&fragments).with_delay(Duration::from_millis(20)));
    let client = serve(app.router.clone()).await;
    let cancel = CancellationToken::new();

    let mut callbacks = 0;
    let result = client
        .post_streaming(&question("Count"), &StreamOptions::default(), &cancel, |_, _| {
            callbacks += 1;
            if callbacks == 2 {
                cancel.cancel();
            }
        })
        .await;

    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert_eq!(callbacks, 2);

    let started = Instant::now();
    while !app.gateway.released() && started.elapsed() < Duration::from_secs(3) {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(app.gateway.released(), "upstream stream was not dropped after the client left");
}

#[tokio::test]
async fn cancelling_during_pacing_returns_promptly() {
    let app = test_app(StubGateway::replying(&["a", "b", "c"]));
    let client = serve(app.router.clone()).await;
    let cancel = CancellationToken::new();
    let options = StreamOptions::paced(Duration::from_secs(30));

    let started = Instant::now();
    let result = client
        .post_streaming(&question("Hi"), &options, &cancel, |_, _| cancel.cancel())
        .await;

    assert!(matches!(result, Err(ClientError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn pacing_delays_each_frame() {
    let app = test_app(StubGateway::replying(&["a", "b", "c"]));
    let client = serve(app.router.clone()).await;

    let started = Instant::now();
    let reply = client
        .post_streaming(
            &question("Hi"),
            &StreamOptions::paced(Duration::from_millis(40)),
            &CancellationToken::new(),
            |_, _| {},
        )
        .await
        .unwrap();

    assert_eq!(reply.content.as_deref(), Some("abc"));
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn in_band_error_is_a_stream_failure() {
    let app = test_app(StubGateway::failing_after(&["He", "llo"], 1, upstream_failure));
    let client = serve(app.router.clone()).await;

    let mut seen = Vec::new();
    let result = client
        .post_streaming(&question("Hi"), &StreamOptions::default(), &CancellationToken::new(), |_, fragment| {
            seen.push(fragment.to_string())
        })
        .await;

    match result {
        Err(ClientError::Stream(problem)) => assert_eq!(problem.status, 502),
        other => panic!("expected an in-band failure, got {other:?}"),
    }
    assert_eq!(seen, vec!["He".to_string()]);
}

#[tokio::test]
async fn error_status_is_raised_before_any_frame() {
    let app = test_app(StubGateway::replying(&["unused"]));
    let client = serve(app.router.clone()).await;

    let mut callbacks = 0;
    let result = client
        .post_streaming(&[], &StreamOptions::default(), &CancellationToken::new(), |_, _| callbacks += 1)
        .await;

    match result {
        Err(ClientError::Status { status, problem }) => {
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(problem.map(|p| p.status), Some(400));
        }
        other => panic!("expected a status error, got {other:?}"),
    }
    assert_eq!(callbacks, 0);
    assert_eq!(app.gateway.calls(), 0);
}

#[tokio::test]
async fn stream_without_done_is_truncated() {
    let router = Router::new().route(
        "/openaimodel/streaming",
        post(|| async {
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                "data: {\"content\":\"partial\"}\n\n",
            )
        }),
    );
    let client = serve(router).await;

    let mut seen = Vec::new();
    let result = client
        .post_streaming(&question("Hi"), &StreamOptions::default(), &CancellationToken::new(), |_, fragment| {
            seen.push(fragment.to_string())
        })
        .await;

    assert!(matches!(result, Err(ClientError::Truncated)));
    assert_eq!(seen, vec!["partial".to_string()]);
}

#[tokio::test]
async fn metadata_only_frames_reach_the_callback() {
    let router = Router::new().route(
        "/openaimodel/streaming",
        post(|| async {
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                concat!(
                    "data: {\"id\":\"m1\",\"role\":\"assistant\",\"content\":\"\"}\n\n",
                    "data: {\"content\":\"\"}\n\n",
                    "data: {\"content\":\"Hi\"}\n\n",
                    "data: [DONE]\n\n",
                ),
            )
        }),
    );
    let client = serve(router).await;

    let mut seen = Vec::new();
    let reply = client
        .post_streaming(&question("Hi"), &StreamOptions::default(), &CancellationToken::new(), |snapshot, fragment| {
            seen.push((snapshot.id.clone(), fragment.to_string()))
        })
        .await
        .unwrap();

    assert_eq!(
        seen,
        vec![(Some("m1".to_string()), String::new()), (Some("m1".to_string()), "Hi".to_string())]
    );
    assert_eq!(reply.content.as_deref(), Some("Hi"));
}

#[tokio::test]
async fn non_streaming_reply_and_topics_round_trip() {
    let app = test_app(StubGateway::replying(&["Paris."]));
    let client = serve(app.router.clone()).await.with_user_id("alice");

    let ask = ChatMessage::new(Role::User, "Capital of France?");
    let reply = client.post(std::slice::from_ref(&ask)).await.unwrap();
    assert_eq!(reply.content.as_deref(), Some("Paris."));

    let topic = ChatContext::start(None, ask, reply);
    client.save_topic(&topic).await.unwrap();

    let topics = client.get_topics().await.unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0].id, topic.id);
    assert_eq!(topics[0].user_id.as_deref(), Some("alice"));
    assert_eq!(topics[0].title.as_deref(), Some("Capital of France?"));

    client.delete_topic(&topic).await.unwrap();
    assert!(client.get_topics().await.unwrap().is_empty());

    match client.delete_topic(&topic).await {
        Err(ClientError::Status { status, .. }) => assert_eq!(status, StatusCode::NOT_FOUND),
        other => panic!("expected 404, got {other:?}"),
    }
}
