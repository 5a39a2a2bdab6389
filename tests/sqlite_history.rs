#![cfg(feature = "persistence")]

use std::sync::Arc;

use persona_bot::{
    Dispatcher, Exchange, HistoryStore, InboundEvent, Sender, SqliteDatabase, StubModel,
    StubWeather,
};
use tempfile::TempDir;

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("chatbot.db").display())
}

#[tokio::test]
async fn history_survives_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let url = database_url(&dir);

    {
        let db = SqliteDatabase::connect(&url).await.unwrap();
        let store = db.history(5);
        for i in 1..=6 {
            store
                .append_exchange(42, &format!("U{i}"), &format!("B{i}"))
                .await
                .unwrap();
        }
    }

    let db = SqliteDatabase::connect(&url).await.unwrap();
    let history = db.history(5).get_history(42).await.unwrap();
    let expected: Vec<Exchange> = (2..=6)
        .map(|i| Exchange::new(format!("U{i}"), format!("B{i}")))
        .collect();
    assert_eq!(history, expected);
    assert!(db.history(5).get_history(43).await.unwrap().is_empty());
}

#[tokio::test]
async fn capacity_is_a_parameter_not_a_schema_constant() {
    let db = SqliteDatabase::connect("sqlite::memory:").await.unwrap();
    let store = db.history(2);
    for i in 1..=4 {
        store
            .append_exchange(1, &format!("U{i}"), &format!("B{i}"))
            .await
            .unwrap();
    }
    assert_eq!(
        store.get_history(1).await.unwrap(),
        vec![Exchange::new("U3", "B3"), Exchange::new("U4", "B4")]
    );

    // A wider view over the same rows only sees what was kept.
    assert_eq!(db.history(5).get_history(1).await.unwrap().len(), 2);
}

#[tokio::test]
async fn dispatcher_writes_audit_and_history_to_sqlite() {
    let db = SqliteDatabase::connect("sqlite::memory:").await.unwrap();
    let history = Arc::new(db.history(5));
    let audit = Arc::new(db.audit_log());
    let dispatcher = Dispatcher::new(
        history.clone(),
        audit.clone(),
        StubModel::new(vec!["biryani, obviously".into()]),
        StubWeather::new().into_shared(),
    );

    let reply = dispatcher
        .handle(&InboundEvent::new(42, 42, "/okayayuss favourite food?"))
        .await;
    assert_eq!(reply.as_deref(), Some("biryani, obviously"));

    assert_eq!(
        history.get_history(42).await.unwrap(),
        vec![Exchange::new("favourite food?", "biryani, obviously")]
    );
    let entries = audit.messages_for(42).await.unwrap();
    let tags: Vec<Sender> = entries.iter().map(|entry| entry.sender).collect();
    assert_eq!(tags, vec![Sender::User, Sender::Bot]);
}
