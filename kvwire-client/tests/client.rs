use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use kvwire_client::commands::{self, SetOptions};
use kvwire_client::model::MemberScore;
use kvwire_client::{CachingOptions, CachingState, ClientConfig, KVClient};
use kvwire_common::{CommandMode, CommandPacket, KvError, ResultType, Value};

fn spawn_server(
    expected_commands: usize,
    handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream),
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(eof)?;
    if line.first() != Some(&b'*') {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(eof)?;
        if line.first() != Some(&b'$') {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn eof() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof")
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    if data.is_empty() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "empty"));
    }
    let mut value = 0usize;
    for &b in data {
        if !b.is_ascii_digit() {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "digit"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as usize);
    }
    Ok(value)
}

fn write_raw(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

fn write_simple(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("+{}\r\n", msg).as_bytes());
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(format!("${}\r\n", data.len()).as_bytes());
    let _ = stream.write_all(data);
    write_raw(stream, b"\r\n");
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    write_raw(stream, format!(":{}\r\n", value).as_bytes());
}

fn args_text(args: &[Vec<u8>]) -> Vec<String> {
    args.iter()
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn client_with_addr(addr: String) -> KVClient {
    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::default()
    };
    KVClient::with_config(config).expect("client")
}

#[test]
fn client_set_get_roundtrip() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args_text(&args), ["SET", "key", "value", "PX", "1500"]);
            write_simple(stream, "OK");
        } else {
            assert_eq!(args_text(&args), ["GET", "key"]);
            write_bulk(stream, b"value");
        }
    });

    let client = client_with_addr(addr);
    let options = SetOptions {
        expire: Some(Duration::from_millis(1500)),
        ..SetOptions::default()
    };
    // Plain SET answers +OK, which projects as text.
    let previous = client.set("key", b"value", options).expect("set");
    assert_eq!(previous.as_deref(), Some("OK"));
    let value = client.get("key").expect("get");
    assert_eq!(value.as_deref(), Some("value"));
}

#[test]
fn missing_key_is_none() {
    let addr = spawn_server(2, |idx, _args, stream| {
        if idx == 0 {
            write_raw(stream, b"$-1\r\n");
        } else {
            write_raw(stream, b"*3\r\n$1\r\na\r\n$-1\r\n$1\r\nc\r\n");
        }
    });

    let client = client_with_addr(addr);
    assert_eq!(client.get("missing").expect("get"), None);
    let values = client.mget(&["a", "b", "c"]).expect("mget");
    assert_eq!(values, vec![Some("a".to_string()), None, Some("c".to_string())]);
}

#[test]
fn hgetall_accepts_both_protocols() {
    let addr = spawn_server(2, |idx, args, stream| {
        assert_eq!(args_text(&args), ["HGETALL", "h"]);
        if idx == 0 {
            write_raw(stream, b"*4\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n");
        } else {
            write_raw(stream, b"%2\r\n$1\r\na\r\n:1\r\n$1\r\nb\r\n:2\r\n");
        }
    });

    let client = client_with_addr(addr);
    let expected = vec![
        ("a".to_string(), "1".to_string()),
        ("b".to_string(), "2".to_string()),
    ];
    assert_eq!(client.hgetall("h").expect("resp2"), expected);
    assert_eq!(client.hgetall("h").expect("resp3"), expected);
}

#[test]
fn zrange_pairs_flat_scores() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args_text(&args), ["ZRANGE", "z", "0", "-1", "WITHSCORES"]);
        write_raw(stream, b"*4\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$3\r\n2.5\r\n");
    });

    let client = client_with_addr(addr);
    let members = client.zrange_with_scores("z", 0, -1).expect("zrange");
    assert_eq!(
        members,
        vec![
            MemberScore { member: "a".to_string(), score: 1.0 },
            MemberScore { member: "b".to_string(), score: 2.5 },
        ]
    );
}

#[test]
fn server_error_keeps_connection() {
    let addr = spawn_server(2, |idx, _args, stream| {
        if idx == 0 {
            write_raw(stream, b"-WRONGTYPE Operation against a key\r\n");
        } else {
            write_integer(stream, 2);
        }
    });

    let client = client_with_addr(addr);
    match client.get("key") {
        Err(KvError::Server(message)) => assert!(message.starts_with("WRONGTYPE")),
        other => panic!("unexpected reply: {:?}", other),
    }
    assert_eq!(client.del(&["a", "b"]).expect("del"), 2);
}

#[test]
fn call_with_explicit_result_type() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args_text(&args), ["SCAN", "0", "MATCH", "k*"]);
        write_raw(stream, b"*2\r\n$2\r\n42\r\n*0\r\n");
    });

    let client = client_with_addr(addr);
    let page: (u64, Vec<String>) = {
        let page = client
            .call::<kvwire_client::model::ScanPage<Vec<String>>>(
                commands::scan(0, Some("k*"), None, None),
                ResultType::SCAN | ResultType::ARRAY | ResultType::STRING,
            )
            .expect("scan");
        (page.cursor, page.page)
    };
    assert_eq!(page, (42, Vec::new()));
}

#[test]
fn without_result_skips_read() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args_text(&args), ["CLIENT", "REPLY", "SKIP"]);
        } else {
            write_integer(stream, 9);
        }
    });

    let client = client_with_addr(addr);
    let packet = CommandPacket::new("CLIENT")
        .sub_command("REPLY")
        .arg("SKIP")
        .mode(CommandMode::WITHOUT_RESULT);
    assert_eq!(client.execute(&packet).expect("skip"), Value::Null);
    assert_eq!(client.client_id().expect("id"), 9);
}

#[test]
fn blocking_command_outlives_read_timeout() {
    let addr = spawn_server(1, |_idx, args, stream| {
        assert_eq!(args_text(&args)[0], "BLPOP");
        thread::sleep(Duration::from_millis(400));
        write_raw(stream, b"*2\r\n$1\r\nq\r\n$3\r\njob\r\n");
    });

    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let client = KVClient::with_config(config).expect("client");
    let popped = client
        .blpop(&["q"], Duration::from_secs(1))
        .expect("blpop")
        .expect("value");
    assert_eq!(popped.key, "q");
    assert_eq!(popped.value, "job");
}

static HOOK_CALLS: AtomicUsize = AtomicUsize::new(0);

#[test]
fn truncated_reply_discards_connection() {
    let addr = spawn_server(1, |_idx, _args, stream| {
        write_raw(stream, b"$5\r\nab");
    });

    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        on_error: Some(Arc::new(|_err: &KvError| {
            HOOK_CALLS.fetch_add(1, Ordering::SeqCst);
        })),
        ..ClientConfig::default()
    };
    let client = KVClient::with_config(config).expect("client");
    let err = client.get("key").expect_err("truncated");
    assert!(err.is_connection_fatal());
    assert_eq!(HOOK_CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn config_deserializes_milliseconds() {
    let config: ClientConfig = serde_json::from_str(
        r#"{
            "addr": "10.0.0.1:6380",
            "read_timeout": 250,
            "caching": { "mode": "broadcasting", "prefixes": ["user:"] }
        }"#,
    )
    .expect("config");
    assert_eq!(config.addr, "10.0.0.1:6380");
    assert_eq!(config.read_timeout, Some(Duration::from_millis(250)));
    assert_eq!(config.max_total, 16);
    assert_eq!(config.caching.expect("caching").prefixes, vec!["user:".to_string()]);
}

#[test]
fn client_side_caching_serves_and_invalidates() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    let (go_tx, go_rx) = mpsc::channel::<()>();

    let server = thread::spawn(move || {
        let (mut sub, _) = listener.accept().expect("accept subscriber");
        let mut sub_reader = BufReader::new(sub.try_clone().expect("clone"));
        let args = read_command(&mut sub_reader).expect("client id");
        assert_eq!(args_text(&args), ["CLIENT", "ID"]);
        write_integer(&mut sub, 7);
        let args = read_command(&mut sub_reader).expect("subscribe");
        assert_eq!(args_text(&args), ["SUBSCRIBE", "__redis__:invalidate"]);
        write_raw(
            &mut sub,
            b"*3\r\n$9\r\nsubscribe\r\n$20\r\n__redis__:invalidate\r\n:1\r\n",
        );

        let (mut conn, _) = listener.accept().expect("accept pooled");
        let mut reader = BufReader::new(conn.try_clone().expect("clone"));
        let args = read_command(&mut reader).expect("tracking");
        assert_eq!(
            args_text(&args),
            ["CLIENT", "TRACKING", "ON", "REDIRECT", "7", "NOLOOP"]
        );
        write_simple(&mut conn, "OK");

        let args = read_command(&mut reader).expect("first get");
        assert_eq!(args_text(&args), ["GET", "k"]);
        write_bulk(&mut conn, b"v1");

        go_rx.recv().expect("go");
        write_raw(
            &mut sub,
            b"*3\r\n$7\r\nmessage\r\n$20\r\n__redis__:invalidate\r\n*1\r\n$1\r\nk\r\n",
        );

        let args = read_command(&mut reader).expect("second get");
        assert_eq!(args_text(&args), ["GET", "k"]);
        write_bulk(&mut conn, b"v2");
    });

    let config = ClientConfig {
        addr,
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_secs(2)),
        caching: Some(CachingOptions::default()),
        ..ClientConfig::default()
    };
    let client = KVClient::with_config(config).expect("client");
    let caching = client.caching().expect("caching");
    assert_eq!(caching.state(), CachingState::Active);
    assert_eq!(caching.redirect_id(), Some(7));

    assert_eq!(client.get("k").expect("miss").as_deref(), Some("v1"));
    // Served locally; the server expects no second GET yet.
    assert_eq!(client.get("k").expect("hit").as_deref(), Some("v1"));
    assert_eq!(caching.store().len(), 1);

    go_tx.send(()).expect("signal");
    let deadline = Instant::now() + Duration::from_secs(2);
    while !caching.store().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(caching.store().is_empty());

    assert_eq!(client.get("k").expect("refetch").as_deref(), Some("v2"));
    server.join().expect("server");
}

#[test]
fn rejected_tracking_closes_client() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut sub, _) = listener.accept().expect("accept subscriber");
        let mut sub_reader = BufReader::new(sub.try_clone().expect("clone"));
        read_command(&mut sub_reader).expect("client id");
        write_integer(&mut sub, 3);
        read_command(&mut sub_reader).expect("subscribe");
        write_raw(
            &mut sub,
            b"*3\r\n$9\r\nsubscribe\r\n$20\r\n__redis__:invalidate\r\n:1\r\n",
        );

        let (mut conn, _) = listener.accept().expect("accept pooled");
        let mut reader = BufReader::new(conn.try_clone().expect("clone"));
        read_command(&mut reader).expect("tracking");
        write_raw(&mut conn, b"-ERR tracking disabled\r\n");
    });

    let config = ClientConfig {
        addr,
        caching: Some(CachingOptions::default()),
        ..ClientConfig::default()
    };
    match KVClient::with_config(config) {
        Err(KvError::Server(message)) => assert!(message.contains("tracking disabled")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("activation should fail"),
    }
}
