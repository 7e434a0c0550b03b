//! End-to-end flows: mutations on one connection reach every stream of the
//! same session, and nothing else.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, BodyDataStream};
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use tide_core::{Mutation, SessionId};
use tide_server::render::FragmentKind;
use tide_server::{
    Address, Fragment, JsonRenderer, MutationService, Relay, StateStore, StreamManager, TideServer,
};
use tide_settings::TideSettings;
use tide_store::TodoStore;

const WAIT: Duration = Duration::from_secs(2);

struct Pipeline {
    relay: Relay,
    streams: StreamManager,
    mutations: MutationService,
}

fn pipeline() -> Pipeline {
    let store = StateStore::new(TodoStore::in_memory().unwrap());
    let relay = Relay::new(16);
    Pipeline {
        streams: StreamManager::new(store.clone(), relay.clone(), Arc::new(JsonRenderer)),
        mutations: MutationService::new(store, relay.clone()),
        relay,
    }
}

async fn wait_for_subscribers(relay: &Relay, session: &SessionId, count: usize) {
    let address = Address::for_session(session);
    tokio::time::timeout(WAIT, async {
        while relay.subscriber_count(&address) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

async fn next_fragment(rx: &mut mpsc::Receiver<Fragment>) -> Fragment {
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

fn view(fragment: &Fragment) -> Value {
    assert_eq!(fragment.kind, FragmentKind::State);
    serde_json::from_str(&fragment.body).unwrap()
}

fn open(
    p: &Pipeline,
    session: &SessionId,
) -> (mpsc::Receiver<Fragment>, CancellationToken, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let streams = p.streams.clone();
    let session = session.clone();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        let _ = streams.run(session, tx, token).await;
    });
    (rx, cancel, handle)
}

// ─── Pipeline ───

#[tokio::test]
async fn fresh_session_sees_seed_then_toggle_reaches_every_stream() {
    let p = pipeline();
    let session = SessionId::new();

    let (mut first, cancel_first, h1) = open(&p, &session);
    let initial = view(&next_fragment(&mut first).await);
    assert_eq!(initial["items"].as_array().unwrap().len(), 5);
    assert_eq!(initial["items"][0]["completed"], true);

    let (mut second, cancel_second, h2) = open(&p, &session);
    let _ = next_fragment(&mut second).await;
    wait_for_subscribers(&p.relay, &session, 2).await;

    let _ = p
        .mutations
        .apply(&session, Mutation::Toggle { index: 0 })
        .await
        .unwrap();

    // Item 0 is seeded completed, so the toggle reopens it.
    for rx in [&mut first, &mut second] {
        let updated = view(&next_fragment(rx).await);
        assert_eq!(updated["items"][0]["completed"], false);
        assert_eq!(updated["remaining"], 5);
        for i in 1..5 {
            assert_eq!(updated["items"][i], initial["items"][i]);
        }
    }

    cancel_first.cancel();
    cancel_second.cancel();
    h1.await.unwrap();
    h2.await.unwrap();
    assert_eq!(p.relay.subscriber_count(&Address::for_session(&session)), 0);
}

#[tokio::test]
async fn create_pushes_state_then_toast() {
    let p = pipeline();
    let session = SessionId::new();
    let (mut rx, cancel, handle) = open(&p, &session);
    let _ = next_fragment(&mut rx).await;
    wait_for_subscribers(&p.relay, &session, 1).await;

    let _ = p
        .mutations
        .apply(
            &session,
            Mutation::Edit {
                index: -1,
                text: "Write tests".into(),
            },
        )
        .await
        .unwrap();

    let state = view(&next_fragment(&mut rx).await);
    assert_eq!(state["items"][5]["text"], "Write tests");
    let toast = next_fragment(&mut rx).await;
    assert_eq!(toast.kind, FragmentKind::Toast);
    assert!(toast.body.contains("Todo created"));

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn other_sessions_stay_quiet() {
    let p = pipeline();
    let watched = SessionId::new();
    let other = SessionId::new();
    let (mut rx, cancel, handle) = open(&p, &watched);
    let _ = next_fragment(&mut rx).await;
    wait_for_subscribers(&p.relay, &watched, 1).await;

    let _ = p.mutations.apply(&other, Mutation::Reset).await.unwrap();

    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err()
    );
    cancel.cancel();
    handle.await.unwrap();
}

// ─── HTTP ───

fn request(method: &str, uri: &str, session: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, format!("connections={session}"))
        .body(Body::empty())
        .unwrap()
}

/// Read SSE frames until one named `event` arrives; return its data envelope.
async fn next_event(body: &mut BodyDataStream, event: &str) -> Value {
    let marker = format!("event: {event}\n");
    let mut buf = String::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let chunk = body.next().await.unwrap().unwrap();
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(end) = buf.find("\n\n") {
                let frame: String = buf.drain(..end + 2).collect();
                if !frame.contains(&marker) {
                    continue;
                }
                let data = frame
                    .lines()
                    .find_map(|l| l.strip_prefix("data: "))
                    .unwrap();
                return serde_json::from_str::<Value>(data).unwrap();
            }
        }
    })
    .await
    .unwrap()
}

fn body_json(envelope: &Value) -> Value {
    serde_json::from_str(envelope["body"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn http_toggle_reaches_both_sse_streams() {
    let server = TideServer::new(&TideSettings::default(), TodoStore::in_memory().unwrap());
    let router = server.router();
    let session = "sess_http_flow";

    let mut a = router
        .clone()
        .oneshot(request("GET", "/api/todos/updates", session))
        .await
        .unwrap()
        .into_body()
        .into_data_stream();
    let mut b = router
        .clone()
        .oneshot(request("GET", "/api/todos/updates", session))
        .await
        .unwrap()
        .into_body()
        .into_data_stream();

    for body in [&mut a, &mut b] {
        let envelope = next_event(body, "state").await;
        assert_eq!(envelope["target"], "todos-container");
        assert_eq!(body_json(&envelope)["items"][0]["completed"], true);
    }
    let id = SessionId::parse(session).unwrap();
    wait_for_subscribers(&server.state().relay, &id, 2).await;

    let resp = router
        .clone()
        .oneshot(request("POST", "/api/todos/0/toggle", session))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    for body in [&mut a, &mut b] {
        let envelope = next_event(body, "state").await;
        assert_eq!(body_json(&envelope)["items"][0]["completed"], false);
    }

    let resp = router
        .oneshot(request("PUT", "/api/todos/reset", session))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let _ = next_event(&mut a, "state").await;
    let toast = next_event(&mut a, "toast").await;
    assert_eq!(toast["target"], "toast-container");
    assert!(toast["body"].as_str().unwrap().contains("Todos reset"));

    drop(a);
    drop(b);
    assert!(server.shutdown_handle().graceful_shutdown(WAIT).await);
}
