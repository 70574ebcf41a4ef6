//! End-to-end tests over real loopback TCP.

use std::time::Duration;

use bytes::Bytes;
use castpoint_core::{AudioFormat, BufferPool, EventLoop, MountpointSettings, ServerHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);

fn start(pool: &BufferPool, mount: MountpointSettings) -> (ServerHandle, JoinHandle<()>) {
    let (event_loop, handle) = EventLoop::bind(
        "127.0.0.1:0".parse().unwrap(),
        pool.clone(),
        AudioFormat::default(),
        mount,
    )
    .unwrap();
    (handle, tokio::spawn(event_loop.run()))
}

async fn request(handle: &ServerHandle, request: &[u8]) -> TcpStream {
    let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
    client.write_all(request).await.unwrap();
    client
}

/// Reads until at least `len` bytes arrived after the response head.
async fn read_response(client: &mut TcpStream, body_len: usize) -> (String, Vec<u8>) {
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = received.windows(4).position(|w| w == b"\r\n\r\n") {
            let body_start = end + 4;
            if received.len() >= body_start + body_len {
                let head = String::from_utf8_lossy(&received[..body_start]).into_owned();
                return (head, received[body_start..].to_vec());
            }
        }
        let n = timeout(DEADLINE, client.read(&mut chunk))
            .await
            .expect("server answered in time")
            .unwrap();
        assert!(n > 0, "connection closed after {} bytes", received.len());
        received.extend_from_slice(&chunk[..n]);
    }
}

async fn read_to_close(client: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    timeout(DEADLINE, client.read_to_end(&mut received))
        .await
        .expect("server closed in time")
        .unwrap();
    received
}

#[tokio::test]
async fn streams_audio_with_inline_title() {
    let pool = BufferPool::new(16);
    let mount = MountpointSettings {
        station_name: "Loopback FM".to_string(),
        metadata_period: 1000,
        initial_burst_size: 100_000,
        ..Default::default()
    };
    let (handle, server) = start(&pool, mount);
    handle.set_stream_title("Test Title").unwrap();

    let audio: Vec<u8> = (0..4000).map(|i| (i % 251) as u8).collect();
    pool.push(Bytes::from(audio.clone()));

    let mut client = request(&handle, b"GET / HTTP/1.1\r\nIcy-MetaData: 1\r\n\r\n").await;
    // 4000 audio bytes, one 33-byte title block and three empty blocks
    let (head, body) = read_response(&mut client, 4036).await;

    assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(head.contains("Content-Type: audio/mpeg\r\n"));
    assert!(head.contains("icy-name:Loopback FM\r\n"));
    assert!(head.contains("icy-metaint:1000\r\n"));

    assert_eq!(&body[..1000], &audio[..1000]);
    assert_eq!(body[1000], 2);
    assert!(body[1001..].starts_with(b"StreamTitle='Test Title';"));
    assert_eq!(&body[1033..2033], &audio[1000..2000]);
    assert_eq!(body[2033], 0);
    assert_eq!(&body[2034..3034], &audio[2000..3000]);
    assert_eq!(body[3034], 0);
    assert_eq!(&body[3035..4035], &audio[3000..4000]);
    assert_eq!(body[4035], 0);

    handle.shutdown().unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn plain_client_gets_raw_audio() {
    let pool = BufferPool::new(16);
    let (handle, server) = start(&pool, MountpointSettings::default());
    handle.set_stream_title("Not Sent").unwrap();

    let audio: Vec<u8> = (0..20_000).map(|i| (i % 199) as u8).collect();
    pool.push(Bytes::from(audio.clone()));

    let mut client = request(&handle, b"GET / HTTP/1.0\r\n\r\n").await;
    let (head, body) = read_response(&mut client, audio.len()).await;

    assert!(!head.contains("icy-metaint"));
    assert_eq!(body, audio);

    handle.shutdown().unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn new_client_evicts_the_old_one() {
    let pool = BufferPool::new(16);
    let (handle, server) = start(&pool, MountpointSettings::default());

    let mut first = request(&handle, b"GET / HTTP/1.1\r\n\r\n").await;
    let (head, _) = read_response(&mut first, 0).await;
    assert!(head.starts_with("HTTP/1.0 200 OK"));

    let mut second = request(&handle, b"GET / HTTP/1.1\r\n\r\n").await;
    let (head, _) = read_response(&mut second, 0).await;
    assert!(head.starts_with("HTTP/1.0 200 OK"));

    read_to_close(&mut first).await;

    handle.shutdown().unwrap();
    server.await.unwrap();
    read_to_close(&mut second).await;
}

#[tokio::test]
async fn wrong_path_is_refused() {
    let pool = BufferPool::new(16);
    let (handle, server) = start(&pool, MountpointSettings::default());

    let mut client = request(&handle, b"GET /admin HTTP/1.1\r\n\r\n").await;
    let response = String::from_utf8(read_to_close(&mut client).await).unwrap();
    assert!(response.starts_with("HTTP/1.0 401 Unauthorized\r\n"));
    assert!(response.contains("Content-Type: text/html"));

    handle.shutdown().unwrap();
    server.await.unwrap();
}
