//! End-to-end tests against a real WebSocket follow-up server and a mocked
//! intake endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sehat_client::link::LinkTiming;
use sehat_client::{
    ConnectionState, DiagnosisFlowController, DiagnosisStep, DuplexLink, GatewayConfig,
    LinkConfig, LinkNotice, RequestGateway, SessionObserver, WsConnector,
};
use sehat_core::{BackoffPolicy, Failure, Gender, PatientIntake, Question, SessionId};

const TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Follow-up server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum ServerSaw {
    Answer { session_id: String, text: String },
    Close(Option<u16>),
}

#[derive(Clone)]
struct ServerState {
    connections: Arc<AtomicUsize>,
    /// Connections closed by the server right after sending the question.
    drop_first: usize,
    saw: mpsc::UnboundedSender<ServerSaw>,
}

async fn followup(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_script(socket, session_id, state))
}

async fn run_script(mut socket: WebSocket, session_id: String, state: ServerState) {
    let n = state.connections.fetch_add(1, Ordering::SeqCst);
    let question = json!({
        "question": "Fever duration?",
        "options": [
            { "key": "A", "value": "1 day" },
            { "key": "B", "value": "3+ days" }
        ]
    });
    if socket
        .send(Message::Text(question.to_string().into()))
        .await
        .is_err()
    {
        return;
    }
    if n < state.drop_first {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let _ = state.saw.send(ServerSaw::Answer {
                    session_id: session_id.clone(),
                    text: text.as_str().to_owned(),
                });
                let done = json!({ "completionMessage": "done", "status": "ready_for_diagnosis" });
                let _ = socket.send(Message::Text(done.to_string().into())).await;
            }
            Message::Close(frame) => {
                let _ = state.saw.send(ServerSaw::Close(frame.map(|f| f.code)));
                return;
            }
            _ => {}
        }
    }
}

/// Boot the follow-up server; returns its address and what it observes.
async fn boot_server(drop_first: usize) -> (SocketAddr, mpsc::UnboundedReceiver<ServerSaw>) {
    let (saw, saw_rx) = mpsc::unbounded_channel();
    let state = ServerState {
        connections: Arc::new(AtomicUsize::new(0)),
        drop_first,
        saw,
    };
    let app = Router::new()
        .route("/followup/{session_id}", get(followup))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, saw_rx)
}

async fn mock_intake(session_id: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/symptom"))
        .and(body_json(json!({
            "name": "A",
            "age": 30,
            "gender": "male",
            "symptoms": "fever"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "session_id": session_id })))
        .expect(1)
        .mount(&server)
        .await;
    server
}

// ─────────────────────────────────────────────────────────────────────────────
// Observer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seen {
    Question(Question),
    Complete(String),
    Error(Failure),
    Status(bool),
}

struct Recorder(mpsc::UnboundedSender<Seen>);

impl SessionObserver for Recorder {
    fn on_question(&self, question: &Question) {
        let _ = self.0.send(Seen::Question(question.clone()));
    }
    fn on_complete(&self, message: &str) {
        let _ = self.0.send(Seen::Complete(message.to_owned()));
    }
    fn on_error(&self, failure: &Failure) {
        let _ = self.0.send(Seen::Error(failure.clone()));
    }
    fn on_connection_status(&self, open: bool) {
        let _ = self.0.send(Seen::Status(open));
    }
}

fn controller(api: &MockServer, ws: SocketAddr) -> DiagnosisFlowController {
    let gateway = RequestGateway::new(GatewayConfig {
        base_url: api.uri(),
        chat_url: api.uri(),
        request_timeout: TIMEOUT,
        max_retries: 0,
        backoff: BackoffPolicy::new(10, 40),
    })
    .unwrap();
    let link = LinkConfig {
        endpoint: format!("ws://{ws}"),
        timing: LinkTiming::default(),
        max_reconnect_attempts: 3,
        reconnect_policy: BackoffPolicy::new(10, 40),
    };
    DiagnosisFlowController::new(gateway, Arc::new(WsConnector), link)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap()
}

fn intake() -> PatientIntake {
    PatientIntake::new("A", 30, Gender::Male, "fever")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn intake_follow_up_and_completion() {
    let api = mock_intake("s1").await;
    let (ws, mut server_saw) = boot_server(0).await;
    let mut flow = controller(&api, ws);
    let (tx, mut seen) = mpsc::unbounded_channel();

    let session_id = flow.submit_intake(&intake(), Arc::new(Recorder(tx))).await.unwrap();
    assert_eq!(session_id, SessionId::from("s1"));
    assert_eq!(flow.step(), DiagnosisStep::FollowUp);

    assert_eq!(next(&mut seen).await, Seen::Status(true));
    let Seen::Question(question) = next(&mut seen).await else {
        panic!("expected a question");
    };
    assert_eq!(question.text, "Fever duration?");
    assert_eq!(question.options.len(), 2);
    assert_eq!(question.option("b").map(|o| o.label.as_str()), Some("3+ days"));

    let turn = flow.answer("B").await.unwrap();
    assert_eq!(turn.answer.as_deref(), Some("B"));
    assert_eq!(
        next(&mut server_saw).await,
        ServerSaw::Answer {
            session_id: "s1".into(),
            text: r#"{"answer":"B"}"#.into()
        }
    );

    timeout(TIMEOUT, flow.wait_for_completion()).await.unwrap().unwrap();
    assert_eq!(flow.step(), DiagnosisStep::Report);
    assert_eq!(next(&mut seen).await, Seen::Complete("done".into()));
    assert_eq!(next(&mut server_saw).await, ServerSaw::Close(Some(1000)));

    let history = flow.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.turns()[0].answer.as_deref(), Some("B"));
    let session = flow.session().unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Closed);

    // on_complete fires once and nothing follows it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(seen.try_recv().is_err());
}

#[tokio::test]
async fn redelivered_question_after_server_drop_fires_once() {
    let api = mock_intake("s2").await;
    let (ws, mut server_saw) = boot_server(1).await;
    let mut flow = controller(&api, ws);
    let (tx, mut seen) = mpsc::unbounded_channel();

    let _ = flow.submit_intake(&intake(), Arc::new(Recorder(tx))).await.unwrap();

    assert_eq!(next(&mut seen).await, Seen::Status(true));
    assert!(matches!(next(&mut seen).await, Seen::Question(_)));
    assert_eq!(next(&mut seen).await, Seen::Status(false));
    assert_eq!(next(&mut seen).await, Seen::Status(true));

    // The second connection re-sends the same question; it is dropped.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(seen.try_recv().is_err());
    let turn = flow.answer("A").await.unwrap();
    assert_eq!(turn.question.text, "Fever duration?");
    assert_matches_answer(next(&mut server_saw).await, "s2", r#"{"answer":"A"}"#);

    timeout(TIMEOUT, flow.wait_for_completion()).await.unwrap().unwrap();
    assert_eq!(next(&mut seen).await, Seen::Complete("done".into()));
    assert_eq!(flow.history().await.unwrap().len(), 1);
}

fn assert_matches_answer(saw: ServerSaw, session_id: &str, text: &str) {
    assert_eq!(
        saw,
        ServerSaw::Answer {
            session_id: session_id.into(),
            text: text.into()
        }
    );
}

#[tokio::test]
async fn unreachable_endpoint_exhausts_reconnects() {
    let config = LinkConfig {
        endpoint: "ws://127.0.0.1:1".into(),
        timing: LinkTiming::default(),
        max_reconnect_attempts: 2,
        reconnect_policy: BackoffPolicy::new(10, 40),
    };
    let (link, mut notices) = DuplexLink::new(Arc::new(WsConnector), config);
    link.open(SessionId::from("s3"));

    assert_eq!(
        next(&mut notices).await,
        LinkNotice::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(10)
        }
    );
    assert_eq!(
        next(&mut notices).await,
        LinkNotice::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(20)
        }
    );
    assert_eq!(
        next(&mut notices).await,
        LinkNotice::ConnectivityExhausted { attempts: 2 }
    );
    assert_eq!(next(&mut notices).await, LinkNotice::Closed);
    assert_eq!(link.state(), ConnectionState::Closed);
}
