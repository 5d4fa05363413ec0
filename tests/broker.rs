use bytes::BytesMut;
use std::net::SocketAddr;
use tab_broker::broker::{self, Broker};
use tab_broker::command::Command;
use tab_broker::config::BrokerConfig;
use tab_broker::encoder::{frame_capacity, mask_payload, write_header};
use tab_broker::frame::OpCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

const HANDSHAKE: &[u8] = b"GET / HTTP/1.1\r\n\
    Host: x\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Key: AAAAAAAAAAAAAAAAAAAAAA==\r\n\
    Sec-WebSocket-Version: 13\r\n\
    \r\n";

const HANDSHAKE_REPLY: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Accept: ICX+Yqv66kxgM0FcWaLWlFLwTAI=\r\n\
    \r\n";

async fn start_broker() -> Broker {
    // port 0 on both listeners, so tests never collide
    broker::start(BrokerConfig::default()).await.unwrap()
}

/// Handshake with the broker, retrying while a previous upstream's
/// teardown is still releasing the slot.
async fn connect_upstream(addr: SocketAddr) -> TcpStream {
    for _ in 0..100 {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(HANDSHAKE).await.unwrap();
        let mut reply = vec![0u8; HANDSHAKE_REPLY.len()];
        match stream.read_exact(&mut reply).await {
            Ok(_) => {
                assert_eq!(reply, HANDSHAKE_REPLY);
                return stream;
            }
            Err(_) => sleep(Duration::from_millis(10)).await,
        }
    }
    panic!("upstream slot never freed");
}

/// Admission is gated on the dispatcher having processed UpstreamConnected,
/// which races the 101 reply; a refused socket EOFs immediately while an
/// admitted one stays silent, so probe and retry.
async fn connect_client(addr: SocketAddr) -> TcpStream {
    for _ in 0..100 {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut probe = [0u8; 1];
        match timeout(Duration::from_millis(50), stream.read(&mut probe)).await {
            Err(_) => return stream,
            Ok(Ok(0)) | Ok(Err(_)) => sleep(Duration::from_millis(10)).await,
            Ok(Ok(n)) => panic!("unexpected {} bytes while probing admission", n),
        }
    }
    panic!("client admission kept being refused");
}

fn masked_frame(opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let mask = [0x11, 0x22, 0x33, 0x44];
    let mut buf = BytesMut::with_capacity(frame_capacity(payload.len(), true));
    write_header(&mut buf, true, opcode, Some(mask), payload.len());
    let header = buf.len();
    buf.extend_from_slice(payload);
    mask_payload(&mut buf, mask, header);
    buf.to_vec()
}

fn masked_command(command: &Command<'_>) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(command.encoded_len());
    command.encode_into(&mut payload);
    masked_frame(OpCode::Binary, &payload)
}

/// Read one unmasked frame off the upstream socket, returning the raw
/// first header byte and the payload.
async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[1] & 0x80, 0, "broker frames must be unmasked");
    let mut len = (head[1] & 0x7F) as usize;
    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await.unwrap();
        len = u16::from_be_bytes(ext) as usize;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).await.unwrap();
        len = u64::from_be_bytes(ext) as usize;
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    (head[0], payload)
}

#[tokio::test]
async fn test_minimal_handshake() {
    let broker = start_broker().await;
    // connect_upstream asserts the verbatim 101 response
    let _upstream = connect_upstream(broker.upstream_addr()).await;
}

#[tokio::test]
async fn test_handshake_rejection_frees_the_slot() {
    let broker = start_broker().await;

    let mut bad = TcpStream::connect(broker.upstream_addr()).await.unwrap();
    bad.write_all(b"GET /chat HTTP/1.1\r\n").await.unwrap();
    let mut reply = Vec::new();
    bad.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, b"HTTP/1.1 404 Not Found\r\n");

    // the failed attempt released the upstream slot
    let _upstream = connect_upstream(broker.upstream_addr()).await;
}

#[tokio::test]
async fn test_ping_echoed_as_pong() {
    let broker = start_broker().await;
    let mut upstream = connect_upstream(broker.upstream_addr()).await;

    upstream
        .write_all(&[0x89, 0x84, 1, 2, 3, 4, 1, 2, 3, 4])
        .await
        .unwrap();
    let mut pong = [0u8; 6];
    upstream.read_exact(&mut pong).await.unwrap();
    assert_eq!(pong, [0x8A, 0x04, 0, 0, 0, 0]);
}

#[tokio::test]
async fn test_close_echoed_then_socket_closed() {
    let broker = start_broker().await;
    let mut upstream = connect_upstream(broker.upstream_addr()).await;

    upstream.write_all(&masked_frame(OpCode::Close, b"")).await.unwrap();
    let mut rest = Vec::new();
    upstream.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, [0x88, 0x00]);
}

#[tokio::test]
async fn test_hello_then_forward() {
    let broker = start_broker().await;
    let mut upstream = connect_upstream(broker.upstream_addr()).await;

    let mut client = connect_client(broker.client_addr()).await;
    client
        .write_all(b"HELLO\ntest client\nmessage 1\nmessage 2\nmessage 3\n")
        .await
        .unwrap();

    let (first, payload) = read_frame(&mut upstream).await;
    assert_eq!(first, 0x82, "Hello arrives as a final Binary frame");
    match Command::decode(&payload).unwrap() {
        Command::Hello { id, name } => {
            assert_eq!(id, 1);
            assert_eq!(name, b"test client");
        }
        other => panic!("expected Hello, got {:?}", other),
    }

    // the forwarded bytes may arrive in one Send or several, depending on
    // how TCP chunked the client's write
    let mut forwarded = Vec::new();
    while forwarded.len() < 30 {
        let (first, payload) = read_frame(&mut upstream).await;
        assert_eq!(first, 0x82);
        match Command::decode(&payload).unwrap() {
            Command::Send { id, command } => {
                assert_eq!(id, 1);
                forwarded.extend_from_slice(command);
            }
            other => panic!("expected Send, got {:?}", other),
        }
    }
    assert_eq!(forwarded, b"message 1\nmessage 2\nmessage 3\n");
}

#[tokio::test]
async fn test_upstream_reply_routed_to_client() {
    let broker = start_broker().await;
    let mut upstream = connect_upstream(broker.upstream_addr()).await;

    let mut client = connect_client(broker.client_addr()).await;
    client.write_all(b"HELLO\ntest client\n").await.unwrap();

    // wait for registration so id 1 exists before replying
    let (_, payload) = read_frame(&mut upstream).await;
    assert!(matches!(
        Command::decode(&payload).unwrap(),
        Command::Hello { id: 1, .. }
    ));

    upstream
        .write_all(&masked_command(&Command::Send {
            id: 1,
            command: b"reply\n",
        }))
        .await
        .unwrap();

    let mut reply = [0u8; 6];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"reply\n");
}

#[tokio::test]
async fn test_goodbye_sent_when_client_leaves() {
    let broker = start_broker().await;
    let mut upstream = connect_upstream(broker.upstream_addr()).await;

    let mut client = connect_client(broker.client_addr()).await;
    client.write_all(b"HELLO\nshortlived\n").await.unwrap();
    let (_, payload) = read_frame(&mut upstream).await;
    assert!(matches!(
        Command::decode(&payload).unwrap(),
        Command::Hello { id: 1, .. }
    ));

    drop(client);

    let (_, payload) = read_frame(&mut upstream).await;
    assert!(matches!(
        Command::decode(&payload).unwrap(),
        Command::Goodbye { id: 1 }
    ));
}

#[tokio::test]
async fn test_second_upstream_refused() {
    let broker = start_broker().await;
    let _upstream = connect_upstream(broker.upstream_addr()).await;

    // accepted, then closed with no HTTP response at all
    let mut second = TcpStream::connect(broker.upstream_addr()).await.unwrap();
    let mut out = Vec::new();
    second.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_client_refused_without_upstream() {
    let broker = start_broker().await;

    let mut client = TcpStream::connect(broker.client_addr()).await.unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_invalid_hello_closes_client() {
    let broker = start_broker().await;
    let _upstream = connect_upstream(broker.upstream_addr()).await;

    let mut client = connect_client(broker.client_addr()).await;
    client.write_all(b"GOODBYE\n").await.unwrap();
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_upstream_loss_drops_clients() {
    let broker = start_broker().await;
    let mut upstream = connect_upstream(broker.upstream_addr()).await;

    let mut client = connect_client(broker.client_addr()).await;
    client.write_all(b"HELLO\ndoomed\n").await.unwrap();
    let (_, payload) = read_frame(&mut upstream).await;
    assert!(matches!(
        Command::decode(&payload).unwrap(),
        Command::Hello { .. }
    ));

    drop(upstream);

    // no more outbound traffic on the client socket, just the close
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_stop_tears_everything_down() {
    let broker = start_broker().await;
    let mut upstream = connect_upstream(broker.upstream_addr()).await;
    let upstream_addr = broker.upstream_addr();

    broker.stop().await;
    timeout(Duration::from_secs(5), broker.join())
        .await
        .expect("dispatcher did not exit");

    let mut out = Vec::new();
    upstream.read_to_end(&mut out).await.unwrap();
    assert!(out.is_empty());

    // the listener goes away with the rest; its task may still be winding
    // down, so poll until connects fail
    let mut refused = false;
    for _ in 0..100 {
        match TcpStream::connect(upstream_addr).await {
            Err(_) => {
                refused = true;
                break;
            }
            Ok(_) => sleep(Duration::from_millis(10)).await,
        }
    }
    assert!(refused, "upstream listener still accepting after stop");
}
