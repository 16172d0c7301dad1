//! An in-process server speaking the native wire protocol, used by the
//! scenario tests. Frames are encoded and decoded by hand here, on purpose:
//! the crate's own codec is never used to validate itself.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fluxline::{Decimal, Timestamp, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const PROTOCOL_VERSION: u8 = 0;

pub const TAG_INT8: i8 = 3;
pub const TAG_INT16: i8 = 4;
pub const TAG_INT32: i8 = 5;
pub const TAG_INT64: i8 = 6;
pub const TAG_FLOAT64: i8 = 8;
pub const TAG_STRING: i8 = 9;
pub const TAG_TIMESTAMP: i8 = 11;
pub const TAG_DECIMAL: i8 = 22;
pub const TAG_VARBINARY: i8 = 25;
pub const TAG_ARRAY: i8 = -99;

const FIELD_APP_STATUS: u8 = 0x80;
const FIELD_APP_STATUS_STRING: u8 = 0x40;
const FIELD_STATUS_STRING: u8 = 0x20;

/// A decoded procedure invocation as the server saw it.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub handle: i64,
    pub procedure: String,
    pub timeout_hint_ms: i32,
    pub params: Vec<Value>,
}

#[derive(Clone, Default)]
pub struct MockTable {
    pub columns: Vec<(String, i8)>,
    pub rows: Vec<Vec<Value>>,
}

impl MockTable {
    pub fn new(columns: &[(&str, i8)]) -> Self {
        MockTable {
            columns: columns
                .iter()
                .map(|(name, tag)| (name.to_string(), *tag))
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, row: Vec<Value>) -> Self {
        assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
        self
    }
}

#[derive(Clone)]
pub struct MockResponse {
    pub status: i8,
    pub status_string: Option<String>,
    pub app_status: Option<i8>,
    pub app_status_string: Option<String>,
    pub tables: Vec<MockTable>,
    pub delay: Option<Duration>,
    pub override_handle: Option<i64>,
    pub drop_reply: bool,
    pub raw_bytes: Option<Vec<u8>>,
}

impl MockResponse {
    pub fn success() -> Self {
        MockResponse {
            status: 1,
            status_string: None,
            app_status: None,
            app_status_string: None,
            tables: Vec::new(),
            delay: None,
            override_handle: None,
            drop_reply: false,
            raw_bytes: None,
        }
    }

    pub fn failure(status: i8, message: &str) -> Self {
        MockResponse {
            status,
            status_string: Some(message.to_string()),
            ..Self::success()
        }
    }

    /// Never answer this invocation.
    pub fn dropped() -> Self {
        MockResponse {
            drop_reply: true,
            ..Self::success()
        }
    }

    /// Send these bytes verbatim instead of a well-formed response.
    pub fn raw(bytes: Vec<u8>) -> Self {
        MockResponse {
            raw_bytes: Some(bytes),
            ..Self::success()
        }
    }

    pub fn with_table(mut self, table: MockTable) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_app_status(mut self, app_status: i8) -> Self {
        self.app_status = Some(app_status);
        self
    }

    pub fn with_app_status_string(mut self, s: &str) -> Self {
        self.app_status_string = Some(s.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_handle(mut self, handle: i64) -> Self {
        self.override_handle = Some(handle);
        self
    }
}

pub type Handler = Arc<dyn Fn(&Invocation) -> MockResponse + Send + Sync>;

pub fn handler(f: impl Fn(&Invocation) -> MockResponse + Send + Sync + 'static) -> Handler {
    Arc::new(f)
}

pub struct MockServer {
    addr: SocketAddr,
}

impl MockServer {
    pub async fn spawn(handler: Handler) -> MockServer {
        Self::spawn_with_auth(0, handler).await
    }

    pub async fn spawn_with_auth(auth_result: i8, handler: Handler) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve(stream, handler.clone(), auth_result));
            }
        });
        MockServer { addr }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }
}

async fn serve(stream: TcpStream, handler: Handler, auth_result: i8) {
    let (mut read, mut write) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    tokio::spawn(async move {
        while let Some(buf) = rx.recv().await {
            if write.write_all(&buf).await.is_err() || write.flush().await.is_err() {
                return;
            }
        }
    });

    let Some(login) = read_frame(&mut read).await else {
        return;
    };
    check_login(login).await;
    let _ = tx.send(login_reply(auth_result).await).await;
    if auth_result != 0 {
        return;
    }

    while let Some(payload) = read_frame(&mut read).await {
        let invocation = parse_invocation(payload).await;
        let response = handler(&invocation);
        if response.drop_reply {
            continue;
        }
        let bytes = match &response.raw_bytes {
            Some(raw) => raw.clone(),
            None => {
                let handle = response.override_handle.unwrap_or(invocation.handle);
                encode_response(handle, &response).await
            }
        };
        match response.delay {
            Some(delay) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(bytes).await;
                });
            }
            None => {
                let _ = tx.send(bytes).await;
            }
        }
    }
}

/// Reads one frame and returns the payload with the version byte stripped,
/// or `None` when the peer went away.
async fn read_frame(read: &mut (impl AsyncRead + Unpin)) -> Option<Vec<u8>> {
    let length = read.read_i32().await.ok()?;
    assert!(length >= 1, "impossible frame length {length}");
    let mut buf = vec![0u8; length as usize];
    read.read_exact(&mut buf).await.ok()?;
    assert_eq!(buf[0], PROTOCOL_VERSION, "unexpected protocol version");
    Some(buf[1..].to_vec())
}

fn frame(payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.extend_from_slice(&(payload.len() as i32 + 1).to_be_bytes());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&payload);
    out
}

async fn check_login(payload: Vec<u8>) {
    let mut cursor = Cursor::new(payload);
    let service = read_string(&mut cursor).await.expect("null service string");
    assert_eq!(service, "database");
    let _user = read_string(&mut cursor).await.expect("null username");
    let mut digest = [0u8; 20];
    cursor.read_exact(&mut digest).await.unwrap();
    assert_eq!(
        cursor.position() as usize,
        cursor.get_ref().len(),
        "trailing bytes in login frame"
    );
}

async fn login_reply(auth_result: i8) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_i8(auth_result).await.unwrap();
    if auth_result == 0 {
        payload.write_i32(3).await.unwrap(); // host id
        payload.write_i64(7_000_001).await.unwrap(); // connection id
        payload.write_i64(1_700_000_000_000).await.unwrap(); // instance timestamp
        payload.write_u32(0x7f00_0001).await.unwrap(); // leader 127.0.0.1
        write_string(&mut payload, Some("mock-server 1.0")).await;
    }
    frame(payload)
}

async fn parse_invocation(payload: Vec<u8>) -> Invocation {
    let mut cursor = Cursor::new(payload);
    let handle = cursor.read_i64().await.unwrap();
    let procedure = read_string(&mut cursor).await.expect("null procedure name");
    let timeout_hint_ms = cursor.read_i32().await.unwrap();
    let count = cursor.read_i16().await.unwrap();
    assert!(count >= 0);
    let mut params = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let tag = cursor.read_i8().await.unwrap();
        if tag == TAG_ARRAY {
            let element_tag = cursor.read_i8().await.unwrap();
            let elements = cursor.read_i16().await.unwrap();
            assert!(elements >= 0);
            let mut values = Vec::with_capacity(elements as usize);
            for _ in 0..elements {
                values.push(decode_scalar(&mut cursor, element_tag).await);
            }
            params.push(Value::Array(
                fluxline::WireTag::from_i8(element_tag).unwrap(),
                values,
            ));
        } else {
            params.push(decode_scalar(&mut cursor, tag).await);
        }
    }
    assert_eq!(
        cursor.position() as usize,
        cursor.get_ref().len(),
        "trailing bytes in invocation"
    );
    Invocation {
        handle,
        procedure,
        timeout_hint_ms,
        params,
    }
}

async fn decode_scalar(cursor: &mut Cursor<Vec<u8>>, tag: i8) -> Value {
    match tag {
        TAG_INT8 => match cursor.read_i8().await.unwrap() {
            i8::MIN => Value::Null,
            v => Value::Int8(v),
        },
        TAG_INT16 => match cursor.read_i16().await.unwrap() {
            i16::MIN => Value::Null,
            v => Value::Int16(v),
        },
        TAG_INT32 => match cursor.read_i32().await.unwrap() {
            i32::MIN => Value::Null,
            v => Value::Int32(v),
        },
        TAG_INT64 => match cursor.read_i64().await.unwrap() {
            i64::MIN => Value::Null,
            v => Value::Int64(v),
        },
        TAG_FLOAT64 => {
            let v = cursor.read_f64().await.unwrap();
            if v == -1.7e308 {
                Value::Null
            } else {
                Value::Float64(v)
            }
        }
        TAG_TIMESTAMP => match cursor.read_i64().await.unwrap() {
            i64::MIN => Value::Null,
            v => Value::Timestamp(Timestamp::from_micros(v)),
        },
        TAG_DECIMAL => match cursor.read_i128().await.unwrap() {
            i128::MIN => Value::Null,
            v => Value::Decimal(Decimal::from_scaled(v)),
        },
        TAG_STRING => match read_string(cursor).await {
            Some(v) => Value::String(v),
            None => Value::Null,
        },
        TAG_VARBINARY => match read_bytes(cursor).await {
            Some(v) => Value::Varbinary(v),
            None => Value::Null,
        },
        other => panic!("unexpected parameter tag {other}"),
    }
}

async fn read_bytes(cursor: &mut (impl AsyncRead + Unpin)) -> Option<Vec<u8>> {
    let length = cursor.read_i32().await.unwrap();
    if length < 0 {
        assert_eq!(length, -1);
        return None;
    }
    let mut buf = vec![0u8; length as usize];
    cursor.read_exact(&mut buf).await.unwrap();
    Some(buf)
}

async fn read_string(cursor: &mut (impl AsyncRead + Unpin)) -> Option<String> {
    read_bytes(cursor)
        .await
        .map(|buf| String::from_utf8(buf).unwrap())
}

async fn write_string(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(value) => {
            buf.write_i32(value.len() as i32).await.unwrap();
            buf.write_all(value.as_bytes()).await.unwrap();
        }
        None => buf.write_i32(-1).await.unwrap(),
    }
}

async fn encode_value(buf: &mut Vec<u8>, tag: i8, value: &Value) {
    match (tag, value) {
        (TAG_INT8, Value::Int8(v)) => buf.write_i8(*v).await.unwrap(),
        (TAG_INT8, Value::Null) => buf.write_i8(i8::MIN).await.unwrap(),
        (TAG_INT16, Value::Int16(v)) => buf.write_i16(*v).await.unwrap(),
        (TAG_INT16, Value::Null) => buf.write_i16(i16::MIN).await.unwrap(),
        (TAG_INT32, Value::Int32(v)) => buf.write_i32(*v).await.unwrap(),
        (TAG_INT32, Value::Null) => buf.write_i32(i32::MIN).await.unwrap(),
        (TAG_INT64, Value::Int64(v)) => buf.write_i64(*v).await.unwrap(),
        (TAG_INT64, Value::Null) => buf.write_i64(i64::MIN).await.unwrap(),
        (TAG_FLOAT64, Value::Float64(v)) => buf.write_f64(*v).await.unwrap(),
        (TAG_FLOAT64, Value::Null) => buf.write_f64(-1.7e308).await.unwrap(),
        (TAG_TIMESTAMP, Value::Timestamp(v)) => buf.write_i64(v.micros()).await.unwrap(),
        (TAG_TIMESTAMP, Value::Null) => buf.write_i64(i64::MIN).await.unwrap(),
        (TAG_DECIMAL, Value::Decimal(v)) => buf.write_i128(v.scaled()).await.unwrap(),
        (TAG_DECIMAL, Value::Null) => buf.write_i128(i128::MIN).await.unwrap(),
        (TAG_STRING, Value::String(v)) => write_string(buf, Some(v)).await,
        (TAG_STRING, Value::Null) => write_string(buf, None).await,
        (TAG_VARBINARY, Value::Varbinary(v)) => {
            buf.write_i32(v.len() as i32).await.unwrap();
            buf.write_all(v).await.unwrap();
        }
        (TAG_VARBINARY, Value::Null) => buf.write_i32(-1).await.unwrap(),
        (tag, value) => panic!("cannot encode {value:?} under tag {tag}"),
    }
}

async fn encode_table(buf: &mut Vec<u8>, table: &MockTable) {
    let mut meta = Vec::new();
    meta.write_i8(0).await.unwrap(); // table status
    meta.write_i16(table.columns.len() as i16).await.unwrap();
    for (_, tag) in &table.columns {
        meta.write_i8(*tag).await.unwrap();
    }
    for (name, _) in &table.columns {
        write_string(&mut meta, Some(name)).await;
    }

    let mut body = Vec::new();
    body.write_i32(table.rows.len() as i32).await.unwrap();
    for row in &table.rows {
        let mut row_buf = Vec::new();
        for ((_, tag), value) in table.columns.iter().zip(row) {
            encode_value(&mut row_buf, *tag, value).await;
        }
        body.write_i32(row_buf.len() as i32).await.unwrap();
        body.write_all(&row_buf).await.unwrap();
    }

    buf.write_i32(4 + meta.len() as i32 + body.len() as i32)
        .await
        .unwrap();
    buf.write_i32(meta.len() as i32).await.unwrap();
    buf.write_all(&meta).await.unwrap();
    buf.write_all(&body).await.unwrap();
}

async fn encode_response(handle: i64, response: &MockResponse) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.write_i64(handle).await.unwrap();
    let mut fields = 0u8;
    if response.app_status.is_some() {
        fields |= FIELD_APP_STATUS;
    }
    if response.app_status_string.is_some() {
        fields |= FIELD_APP_STATUS_STRING;
    }
    if response.status_string.is_some() {
        fields |= FIELD_STATUS_STRING;
    }
    payload.write_u8(fields).await.unwrap();
    if let Some(app_status) = response.app_status {
        payload.write_i8(app_status).await.unwrap();
    }
    if let Some(s) = &response.app_status_string {
        write_string(&mut payload, Some(s)).await;
    }
    payload.write_i8(response.status).await.unwrap();
    if let Some(s) = &response.status_string {
        write_string(&mut payload, Some(s)).await;
    }
    payload.write_i32(1).await.unwrap(); // cluster round trip
    payload.write_i16(response.tables.len() as i16).await.unwrap();
    for table in &response.tables {
        encode_table(&mut payload, table).await;
    }
    frame(payload)
}

/// A frame carrying a protocol version the client does not speak.
pub fn bogus_version_frame() -> Vec<u8> {
    vec![0, 0, 0, 2, 9, 0]
}
