use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fluxline::{ProcedureStatus, Value, WireTag};
use tokio::sync::oneshot;

use crate::connect;
use crate::mock::{
    handler, Invocation, MockResponse, MockServer, MockTable, TAG_INT64, TAG_STRING, TAG_VARBINARY,
};

fn as_str(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => panic!("expected a string parameter, got {other:?}"),
    }
}

#[tokio::test]
async fn select_on_empty_table() {
    let server = MockServer::spawn(handler(|inv| {
        assert_eq!(inv.procedure, "Select");
        assert_eq!(as_str(&inv.params[0]), "English");
        MockResponse::success().with_table(MockTable::new(&[
            ("HELLO", TAG_STRING),
            ("WORLD", TAG_STRING),
        ]))
    }))
    .await;
    let client = connect(&server).await;

    let response = client
        .execute("Select", vec![Value::from("English")])
        .await
        .unwrap();
    assert_eq!(response.status(), ProcedureStatus::Success);
    let table = response.first_table().unwrap();
    assert_eq!(table.row_count(), 0);
    assert!(!table.has_data());
    assert_eq!(table.column_count(), 2);

    client.close().await;
}

#[tokio::test]
async fn insert_then_select() {
    let rows = Arc::new(Mutex::new(Vec::<(String, String, String)>::new()));
    let state = rows.clone();
    let server = MockServer::spawn(handler(move |inv| match &*inv.procedure {
        "Insert" => {
            let mut rows = state.lock().unwrap();
            rows.push((
                as_str(&inv.params[0]),
                as_str(&inv.params[1]),
                as_str(&inv.params[2]),
            ));
            MockResponse::success().with_table(
                MockTable::new(&[("modified_tuples", TAG_INT64)]).row(vec![Value::Int64(1)]),
            )
        }
        "Select" => {
            let language = as_str(&inv.params[0]);
            let mut table = MockTable::new(&[("HELLO", TAG_STRING), ("WORLD", TAG_STRING)]);
            for (hello, world, lang) in state.lock().unwrap().iter() {
                if *lang == language {
                    table = table.row(vec![
                        Value::String(hello.clone()),
                        Value::String(world.clone()),
                    ]);
                }
            }
            MockResponse::success().with_table(table)
        }
        other => panic!("unexpected procedure {other}"),
    }))
    .await;
    let client = connect(&server).await;

    let greetings = [
        ("Hello", "World", "English"),
        ("Bonjour", "Monde", "French"),
        ("Hola", "Mundo", "Spanish"),
        ("Hej", "Verden", "Danish"),
        ("Ciao", "Mondo", "Italian"),
    ];
    let mut pending = Vec::new();
    for (hello, world, language) in greetings {
        pending.push(
            client
                .call("Insert", vec![hello.into(), world.into(), language.into()])
                .await
                .unwrap(),
        );
    }
    for call in pending {
        call.wait().await.unwrap();
    }

    let response = client
        .execute("Select", vec!["Spanish".into()])
        .await
        .unwrap();
    let table = response.first_table().unwrap();
    assert_eq!(table.row_count(), 1);
    assert_eq!(table.get::<String>(0, 0).unwrap(), "Hola");
    assert_eq!(table.get::<String>(1, 0).unwrap(), "Mundo");

    client.close().await;
}

// deterministic stand-in for a compressed payload
fn opaque_bytes(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

#[tokio::test]
async fn put_get_binary_value() {
    let store = Arc::new(Mutex::new(HashMap::<String, Vec<u8>>::new()));
    let state = store.clone();
    let server = MockServer::spawn(handler(move |inv| match &*inv.procedure {
        "Put" => {
            let key = as_str(&inv.params[0]);
            let Value::Varbinary(bytes) = &inv.params[1] else {
                panic!("expected varbinary value");
            };
            state.lock().unwrap().insert(key, bytes.clone());
            MockResponse::success()
        }
        "Get" => {
            let key = as_str(&inv.params[0]);
            let value = state.lock().unwrap().get(&key).cloned();
            MockResponse::success().with_table(
                MockTable::new(&[("KEY", TAG_STRING), ("VALUE", TAG_VARBINARY)]).row(vec![
                    Value::String(key),
                    value.map(Value::Varbinary).unwrap_or(Value::Null),
                ]),
            )
        }
        other => panic!("unexpected procedure {other}"),
    }))
    .await;
    let client = connect(&server).await;

    let payload = opaque_bytes(1024);
    client
        .execute("Put", vec!["greetings".into(), payload.clone().into()])
        .await
        .unwrap();
    let response = client.execute("Get", vec!["greetings".into()]).await.unwrap();
    let table = response.first_table().unwrap();
    assert_eq!(table.row_count(), 1);
    let stored: Vec<u8> = table.get(1, 0).unwrap();
    assert_eq!(stored, payload);
    assert_eq!(stored.len(), 1024);

    client.close().await;
}

#[tokio::test]
async fn votes_over_limit_get_rejected_app_status() {
    const MAX_VOTES_PER_PHONE: i64 = 3;
    let votes = Arc::new(Mutex::new(HashMap::<i64, i64>::new()));
    let state = votes.clone();
    let server = MockServer::spawn(handler(move |inv| {
        assert_eq!(inv.procedure, "Vote");
        let Value::Int64(phone) = &inv.params[0] else {
            panic!("expected a phone number");
        };
        let mut votes = state.lock().unwrap();
        let count = votes.entry(*phone).or_insert(0);
        *count += 1;
        let accepted = *count <= MAX_VOTES_PER_PHONE;
        MockResponse::success().with_app_status(if accepted { 0 } else { 2 })
    }))
    .await;
    let client = connect(&server).await;

    let mut statuses = Vec::new();
    for _ in 0..5 {
        let response = client
            .execute(
                "Vote",
                vec![
                    Value::Int64(5_087_003_142),
                    Value::Int32(1),
                    Value::Int64(MAX_VOTES_PER_PHONE),
                ],
            )
            .await
            .unwrap();
        statuses.push(response.app_status().unwrap());
    }
    assert_eq!(statuses, vec![0, 0, 0, 2, 2]);

    client.close().await;
}

#[tokio::test]
async fn parameters_cross_the_wire_intact() {
    let seen = Arc::new(Mutex::new(None::<Invocation>));
    let state = seen.clone();
    let server = MockServer::spawn(handler(move |inv| {
        *state.lock().unwrap() = Some(inv.clone());
        MockResponse::success()
    }))
    .await;
    let client = connect(&server).await;

    let params = vec![
        Value::Int8(-4),
        Value::Int64(1 << 40),
        Value::Float64(2.75),
        Value::from("param"),
        Value::Null,
        Value::array(
            WireTag::String,
            vec![Value::String("a".into()), Value::Null],
        ),
        Value::array(WireTag::Int32, vec![Value::Int32(9), Value::Null]),
    ];
    client.execute("Echo", params.clone()).await.unwrap();

    let invocation = seen.lock().unwrap().take().unwrap();
    assert_eq!(invocation.procedure, "Echo");
    assert_eq!(invocation.timeout_hint_ms, -1);
    assert_eq!(invocation.params, params);

    client.close().await;
}

#[tokio::test]
async fn callback_completion() {
    let server = MockServer::spawn(handler(|_| {
        MockResponse::success()
            .with_table(MockTable::new(&[("N", TAG_INT64)]).row(vec![Value::Int64(12)]))
    }))
    .await;
    let client = connect(&server).await;

    let (tx, rx) = oneshot::channel();
    client
        .call_with_callback("Count", vec![], move |outcome| {
            let n: i64 = outcome.unwrap().first_table().unwrap().get(0, 0).unwrap();
            let _ = tx.send(n);
        })
        .await
        .unwrap();
    assert_eq!(rx.await.unwrap(), 12);

    client.close().await;
}
