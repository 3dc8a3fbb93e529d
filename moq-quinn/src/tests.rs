use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use moq_proto::{
    ControlMessage, Decode, DecodeError, Encode, Group, ParameterType, Parameters, SessionClient,
    SessionErrorCode, SessionServer, StreamType, Version,
};

use crate::{IncomingSession, Server, ServerError, TrackContext, ALPN_H3, ALPN_MOQ};

fn certificate() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_der = CertificateDer::from(cert.cert);
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
    (cert_der, key)
}

fn server_endpoint(cert: &CertificateDer<'static>, key: PrivateKeyDer<'static>) -> quinn::Endpoint {
    let mut tls = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert.clone()], key)
    .unwrap();

    tls.alpn_protocols = vec![ALPN_MOQ.to_vec(), ALPN_H3.to_vec()];

    let config: quinn::crypto::rustls::QuicServerConfig = tls.try_into().unwrap();
    let config = quinn::ServerConfig::with_crypto(Arc::new(config));

    quinn::Endpoint::server(config, "127.0.0.1:0".parse().unwrap()).unwrap()
}

fn client_endpoint(cert: &CertificateDer<'static>, alpn: &[u8]) -> quinn::Endpoint {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(cert.clone()).unwrap();

    let mut tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS13])
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();

    tls.alpn_protocols = vec![alpn.to_vec()];

    let config = quinn::crypto::rustls::QuicClientConfig::try_from(tls).unwrap();
    let config = quinn::ClientConfig::new(Arc::new(config));

    let mut endpoint = quinn::Endpoint::client("127.0.0.1:0".parse().unwrap()).unwrap();
    endpoint.set_default_client_config(config);
    endpoint
}

// Buffer chunks from the stream until one full message decodes.
async fn decode_msg<T: Decode>(recv: &mut quinn::RecvStream, buf: &mut Vec<u8>) -> T {
    loop {
        let mut cursor = std::io::Cursor::new(&buf[..]);
        match T::decode(&mut cursor) {
            Ok(msg) => {
                let size = cursor.position() as usize;
                buf.drain(..size);
                return msg;
            }
            Err(DecodeError::UnexpectedEnd) => {}
            Err(err) => panic!("decode error: {err}"),
        }

        let chunk = recv
            .read_chunk(usize::MAX, true)
            .await
            .unwrap()
            .expect("stream ended mid-message");
        buf.extend_from_slice(&chunk.bytes);
    }
}

// A hand-rolled native MOQ client: connect, run the setup exchange, keep the
// session stream around.
struct TestClient {
    conn: quinn::Connection,
    // Dropping this half would FIN the session stream, ending the session.
    #[allow(dead_code)]
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    buf: Vec<u8>,
    setup: SessionServer,
}

impl TestClient {
    async fn connect(endpoint: &quinn::Endpoint, addr: std::net::SocketAddr, path: &str) -> Self {
        let conn = endpoint.connect(addr, "localhost").unwrap().await.unwrap();
        let (mut send, mut recv) = conn.open_bi().await.unwrap();

        let mut parameters = Parameters::new();
        parameters.set_string(ParameterType::PATH, path);

        let mut msg = Vec::new();
        StreamType::SESSION.encode(&mut msg);
        SessionClient {
            versions: vec![Version::CURRENT],
            parameters,
        }
        .encode(&mut msg);
        send.write_all(&msg).await.unwrap();

        let mut buf = Vec::new();
        let setup: SessionServer = decode_msg(&mut recv, &mut buf).await;

        Self {
            conn,
            send,
            recv,
            buf,
            setup,
        }
    }
}

// A handler that records the request path and parks until the peer leaves.
fn park_handler(paths: mpsc::UnboundedSender<String>) -> impl crate::SetupHandler {
    move |incoming: IncomingSession| {
        let paths = paths.clone();
        async move {
            let path = incoming.path().to_string();
            let session = incoming.accept_session(Parameters::new()).await?;
            paths.send(path).ok();
            session.closed().await;
            Ok(())
        }
    }
}

#[tokio::test]
async fn setup_native() {
    let (cert, key) = certificate();
    let endpoint = server_endpoint(&cert, key);
    let addr = endpoint.local_addr().unwrap();

    let (paths_tx, mut paths_rx) = mpsc::unbounded_channel();
    let server = Server::builder().with_handler(park_handler(paths_tx)).build();

    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(endpoint).await }
    });

    let client = client_endpoint(&cert, ALPN_MOQ);
    let tc = TestClient::connect(&client, addr, "/live/demo").await;

    assert_eq!(tc.setup.version, Version::CURRENT);
    assert_eq!(paths_rx.recv().await.as_deref(), Some("/live/demo"));

    tc.conn.close(quinn::VarInt::from_u32(0), b"done");
    server.close().await.unwrap();

    assert!(matches!(serve.await.unwrap(), Err(ServerError::Closed)));
}

#[tokio::test]
async fn group_echo_over_network() {
    let (cert, key) = certificate();
    let endpoint = server_endpoint(&cert, key);
    let addr = endpoint.local_addr().unwrap();

    let (frames_tx, frames_rx) = oneshot::channel::<Vec<Vec<u8>>>();
    let frames_tx = Arc::new(Mutex::new(Some(frames_tx)));

    // Accept one group from the client, echoing its frames into a second
    // group opened back at them.
    let handler = move |incoming: IncomingSession| {
        let frames_tx = frames_tx.clone();
        async move {
            let session = incoming.accept_session(Parameters::new()).await?;
            let track = TrackContext::new();

            let mut reader = session.accept_group(&track).await?;
            assert_eq!(
                reader.info(),
                Group {
                    subscribe_id: 7,
                    sequence: 1
                }
            );

            let mut frames = Vec::new();
            while let Some(frame) = reader.read_frame().await? {
                frames.push(frame.to_vec());
            }

            let mut writer = session
                .open_group(
                    &track,
                    Group {
                        subscribe_id: 7,
                        sequence: 2,
                    },
                )
                .await?;
            for frame in &frames {
                writer.write_frame(frame).await?;
            }
            writer.close().ok();

            if let Some(tx) = frames_tx.lock().unwrap().take() {
                tx.send(frames).ok();
            }

            session.closed().await;
            Ok(())
        }
    };

    let server = Server::builder().with_handler(handler).build();
    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(endpoint).await }
    });

    let client = client_endpoint(&cert, ALPN_MOQ);
    let tc = TestClient::connect(&client, addr, "/echo").await;

    // Send a group: identity header then three length-prefixed frames.
    let mut send = tc.conn.open_uni().await.unwrap();
    let mut msg = Vec::new();
    moq_proto::DataStreamType::GROUP.encode(&mut msg);
    Group {
        subscribe_id: 7,
        sequence: 1,
    }
    .encode(&mut msg);
    msg.extend_from_slice(&[0x01, 0xaa]); // frame [aa]
    msg.extend_from_slice(&[0x00]); // frame []
    msg.extend_from_slice(&[0x02, 0xbb, 0xcc]); // frame [bb, cc]
    send.write_all(&msg).await.unwrap();
    send.finish().unwrap();

    let expected = vec![vec![0xaa], vec![], vec![0xbb, 0xcc]];
    assert_eq!(frames_rx.await.unwrap(), expected);

    // Read the echoed group back and check the exact bytes.
    let mut recv = tc.conn.accept_uni().await.unwrap();
    let echoed = recv.read_to_end(1024).await.unwrap();

    let mut wire = Vec::new();
    moq_proto::DataStreamType::GROUP.encode(&mut wire);
    Group {
        subscribe_id: 7,
        sequence: 2,
    }
    .encode(&mut wire);
    wire.extend_from_slice(&[0x01, 0xaa, 0x00, 0x02, 0xbb, 0xcc]);
    assert_eq!(echoed, wire);

    tc.conn.close(quinn::VarInt::from_u32(0), b"done");
    server.close().await.unwrap();
    serve.await.unwrap().ok();
}

#[tokio::test]
async fn graceful_shutdown() {
    let (cert, key) = certificate();
    let endpoint = server_endpoint(&cert, key);
    let addr = endpoint.local_addr().unwrap();

    let (paths_tx, mut paths_rx) = mpsc::unbounded_channel();
    let server = Server::builder().with_handler(park_handler(paths_tx)).build();

    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(endpoint).await }
    });

    let client = client_endpoint(&cert, ALPN_MOQ);
    let mut tc = TestClient::connect(&client, addr, "/drain").await;
    paths_rx.recv().await.unwrap();

    // A cooperative client: close as soon as GOAWAY arrives.
    let cooperative = tokio::spawn(async move {
        let msg: ControlMessage = decode_msg(&mut tc.recv, &mut tc.buf).await;
        assert!(matches!(msg, ControlMessage::GoAway(_)));
        tc.conn
            .close(quinn::VarInt::from_u32(0), b"draining as requested");
    });

    server
        .shutdown(tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap();
    cooperative.await.unwrap();

    // Shutdown is idempotent and sticky.
    assert!(matches!(
        server.shutdown(std::future::pending()).await,
        Err(ServerError::Closed)
    ));
    assert!(matches!(server.close().await, Err(ServerError::Closed)));

    assert!(matches!(serve.await.unwrap(), Err(ServerError::Closed)));
}

#[tokio::test]
async fn shutdown_deadline_exceeded() {
    let (cert, key) = certificate();
    let endpoint = server_endpoint(&cert, key);
    let addr = endpoint.local_addr().unwrap();

    let (paths_tx, mut paths_rx) = mpsc::unbounded_channel();
    let server = Server::builder().with_handler(park_handler(paths_tx)).build();

    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(endpoint).await }
    });

    let client = client_endpoint(&cert, ALPN_MOQ);
    let tc = TestClient::connect(&client, addr, "/stubborn").await;
    paths_rx.recv().await.unwrap();

    // This client never reacts to GOAWAY; the deadline has to fire.
    let start = Instant::now();
    server
        .shutdown(tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));

    let reason = tc.conn.closed().await;
    match reason {
        quinn::ConnectionError::ApplicationClosed(frame) => {
            assert_eq!(
                frame.error_code,
                quinn::VarInt::from_u32(SessionErrorCode::GOAWAY_TIMEOUT.into())
            );
        }
        other => panic!("unexpected close reason: {other:?}"),
    }

    serve.await.unwrap().ok();
}

#[tokio::test]
async fn close_without_sessions() {
    let (cert, key) = certificate();
    let endpoint = server_endpoint(&cert, key);

    let server = Server::builder().build();
    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(endpoint).await }
    });

    // Give the accept loop a moment to register.
    tokio::time::sleep(Duration::from_millis(10)).await;

    server.close().await.unwrap();
    assert!(matches!(server.close().await, Err(ServerError::Closed)));
    assert!(matches!(serve.await.unwrap(), Err(ServerError::Closed)));
}

#[tokio::test]
async fn setup_timeout() {
    let (cert, key) = certificate();
    let endpoint = server_endpoint(&cert, key);
    let addr = endpoint.local_addr().unwrap();

    let server = Server::builder()
        .with_setup_timeout(Duration::from_millis(50))
        .build();
    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(endpoint).await }
    });

    // Connect but never open the session stream.
    let client = client_endpoint(&cert, ALPN_MOQ);
    let conn = client.connect(addr, "localhost").unwrap().await.unwrap();

    let reason = conn.closed().await;
    match reason {
        quinn::ConnectionError::ApplicationClosed(frame) => {
            assert_eq!(
                frame.error_code,
                quinn::VarInt::from_u32(SessionErrorCode::PROTOCOL_VIOLATION.into())
            );
        }
        other => panic!("unexpected close reason: {other:?}"),
    }

    server.close().await.unwrap();
    serve.await.unwrap().ok();
}

#[tokio::test]
async fn webtransport_upgrade() {
    let (cert, key) = certificate();
    let endpoint = server_endpoint(&cert, key);
    let addr = endpoint.local_addr().unwrap();

    let (paths_tx, mut paths_rx) = mpsc::unbounded_channel();
    let server = Server::builder().with_handler(park_handler(paths_tx)).build();

    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(endpoint).await }
    });

    let client = client_endpoint(&cert, ALPN_H3);
    let conn = client.connect(addr, "localhost").unwrap().await.unwrap();

    // h3 SETTINGS, both directions.
    let mut settings_send = conn.open_uni().await.unwrap();
    let mut settings = web_transport_proto::Settings::default();
    settings.enable_webtransport(1);
    let mut buf = Vec::new();
    settings.encode(&mut buf);
    settings_send.write_all(&buf).await.unwrap();

    let mut settings_recv = conn.accept_uni().await.unwrap();
    let mut buf = Vec::new();
    loop {
        let chunk = settings_recv
            .read_chunk(usize::MAX, true)
            .await
            .unwrap()
            .expect("settings stream ended");
        buf.extend_from_slice(&chunk.bytes);

        let mut cursor = std::io::Cursor::new(&buf);
        match web_transport_proto::Settings::decode(&mut cursor) {
            Ok(settings) => {
                assert!(settings.supports_webtransport() > 0);
                break;
            }
            Err(web_transport_proto::SettingsError::UnexpectedEnd) => continue,
            Err(err) => panic!("settings decode error: {err}"),
        }
    }

    // The CONNECT request; its stream ID becomes the session ID.
    let (mut connect_send, mut connect_recv) = conn.open_bi().await.unwrap();
    let request = web_transport_proto::ConnectRequest {
        url: Url::parse("https://localhost/broadcast/room1").unwrap(),
    };
    let mut buf = Vec::new();
    request.encode(&mut buf);
    connect_send.write_all(&buf).await.unwrap();

    let mut buf = Vec::new();
    loop {
        let chunk = connect_recv
            .read_chunk(usize::MAX, true)
            .await
            .unwrap()
            .expect("connect stream ended");
        buf.extend_from_slice(&chunk.bytes);

        let mut cursor = std::io::Cursor::new(&buf);
        match web_transport_proto::ConnectResponse::decode(&mut cursor) {
            Ok(response) => {
                assert_eq!(response.status, http::StatusCode::OK);
                break;
            }
            Err(web_transport_proto::ConnectError::UnexpectedEnd) => continue,
            Err(err) => panic!("connect decode error: {err}"),
        }
    }

    // The MOQ session stream, wrapped in the WebTransport bidi header.
    let (mut send, mut recv) = conn.open_bi().await.unwrap();
    let mut msg = Vec::new();
    web_transport_proto::Frame::WEBTRANSPORT.encode(&mut msg);
    web_transport_proto::VarInt::from_u32(0).encode(&mut msg); // CONNECT stream ID
    StreamType::SESSION.encode(&mut msg);
    SessionClient {
        versions: vec![Version::CURRENT],
        parameters: Parameters::new(),
    }
    .encode(&mut msg);
    send.write_all(&msg).await.unwrap();

    let mut buf = Vec::new();
    let setup: SessionServer = decode_msg(&mut recv, &mut buf).await;
    assert_eq!(setup.version, Version::CURRENT);

    // The URL path is authoritative, not the (absent) PATH parameter.
    assert_eq!(paths_rx.recv().await.as_deref(), Some("/broadcast/room1"));

    conn.close(quinn::VarInt::from_u32(0), b"done");
    server.close().await.unwrap();
    serve.await.unwrap().ok();
}
