//! Remote store and room sessions against a real store server.

use std::time::Duration;

use quizduel_client::session::{AnswerOutcome, JoinOutcome, RoomSession, StartOutcome, WriteStrategy};
use quizduel_client::store::{DocumentStore, RemoteStore};
use quizduel_server::config::ServerConfig;
use quizduel_shared::catalog::QUESTIONS;
use quizduel_shared::config::QuizConfig;
use quizduel_shared::document::{FieldOp, Guard};
use quizduel_shared::protocol::ErrorCode;
use quizduel_shared::room::Stage;
use quizduel_shared::view::RoomView;
use serde_json::json;
use tokio::net::TcpListener;

async fn start_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig::default();
    let store = quizduel_server::store::DocumentStore::new(config.max_document_bytes);
    let app = quizduel_server::build_app(&config, store);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn wait_for_stage(session: &mut RoomSession<RemoteStore>, stage: Stage) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.stage() != Some(stage) {
            assert!(session.next_change().await, "subscription ended");
        }
    })
    .await
    .expect("stage change not observed");
}

#[tokio::test]
async fn crud_and_guards_over_websocket() {
    let url = start_server().await;
    let store = RemoteStore::connect(&url).await.unwrap();
    assert!(!store.server_version().is_empty());

    assert_eq!(store.get("R").await.unwrap(), None);
    let doc = store
        .create("R", vec![FieldOp::set(["stage"], json!("lobby"))])
        .await
        .unwrap();
    assert_eq!(doc["stage"], "lobby");

    let err = store.create("R", vec![]).await.unwrap_err();
    assert!(err.is(ErrorCode::AlreadyExists));

    let err = store
        .update(
            "R",
            vec![Guard::equals(["stage"], json!("quiz"))],
            vec![FieldOp::set(["stage"], json!("results"))],
        )
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::PreconditionFailed));

    let doc = store
        .update("R", vec![], vec![FieldOp::increment(["n"], 2)])
        .await
        .unwrap();
    assert_eq!(doc["n"], 2);
    assert_eq!(store.get("R").await.unwrap().unwrap()["n"], 2);
}

#[tokio::test]
async fn subscription_sees_other_clients_writes() {
    let url = start_server().await;
    let a = RemoteStore::connect(&url).await.unwrap();
    let b = RemoteStore::connect(&url).await.unwrap();

    let mut sub = a.subscribe("R").await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.doc, None);

    b.set("R", vec![FieldOp::set(["stage"], json!("lobby"))])
        .await
        .unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.key, "R");
    assert_eq!(next.doc.unwrap()["stage"], "lobby");
}

#[tokio::test]
async fn two_players_play_a_question() {
    let url = start_server().await;
    let mut ali = RoomSession::new(
        RemoteStore::connect(&url).await.unwrap(),
        QUESTIONS,
        QuizConfig::default(),
        WriteStrategy::PerKey,
    );
    let mut sam = RoomSession::new(
        RemoteStore::connect(&url).await.unwrap(),
        QUESTIONS,
        QuizConfig::default(),
        WriteStrategy::PerKey,
    );

    assert_eq!(ali.join_room("BIO123", "Ali").await.unwrap(), JoinOutcome::Created);
    assert_eq!(sam.join_room("BIO123", "Sam").await.unwrap(), JoinOutcome::Joined);

    tokio::time::timeout(Duration::from_secs(5), async {
        while ali.snapshot().map_or(0, |r| r.players().len()) < 2 {
            assert!(ali.next_change().await);
        }
    })
    .await
    .expect("Sam's join not observed");

    assert_eq!(ali.start_quiz(false).await.unwrap(), StartOutcome::Started);
    wait_for_stage(&mut ali, Stage::Quiz).await;
    wait_for_stage(&mut sam, Stage::Quiz).await;

    assert!(matches!(
        ali.submit_answer(2).await.unwrap(),
        AnswerOutcome::Recorded { correct: true, .. }
    ));
    assert!(matches!(
        sam.submit_answer(0).await.unwrap(),
        AnswerOutcome::Recorded { correct: false, .. }
    ));

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let RoomView::Quiz(q) = ali.view() {
                if q.revealed() && q.scores.iter().any(|s| s.name == "Ali" && s.score == 1) {
                    break;
                }
            }
            assert!(ali.next_change().await);
        }
    })
    .await
    .expect("reveal not observed");
}

#[tokio::test]
async fn connect_refuses_bad_urls() {
    assert!(RemoteStore::connect("ftp://127.0.0.1/").await.is_err());
    // Nothing listens on port 1.
    assert!(RemoteStore::connect("ws://127.0.0.1:1/ws").await.is_err());
}
