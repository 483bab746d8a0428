use crate::{
    common::{asf_header, chunk, init_logger, packets, padded, test_config},
    AssertWrapper,
};
use mmsnet::{asf::ChunkType, MmsError, StreamType, Transport};
use wiremock::{
    matchers::{header, method, path},
    Match, Mock, MockServer, Request, ResponseTemplate,
};

/// Matches the second request of an ASF session, which starts the media.
struct PlayRequest;

impl Match for PlayRequest {
    fn matches(&self, request: &Request) -> bool {
        request
            .headers
            .get_all("pragma")
            .iter()
            .any(|value| value.to_str().is_ok_and(|value| value.contains("xPlayStrm=1")))
    }
}

fn header_response(header: &[u8], features: Option<&str>) -> ResponseTemplate {
    let template = ResponseTemplate::new(200)
        .set_body_raw(chunk(ChunkType::Header, 0, header), "video/x-ms-asf");
    match features {
        Some(features) => template.insert_header("Pragma", features),
        None => template,
    }
}

/// The header chunk followed by one data chunk per packet. `after_first` goes right after
/// the first data chunk.
fn media_body(header: &[u8], after_first: &[u8]) -> Vec<u8> {
    let mut body = chunk(ChunkType::Header, 0, header);
    for (i, packet) in packets().iter().enumerate() {
        body.extend(chunk(ChunkType::Data, i as u32 + 1, packet));
        if i == 0 {
            body.extend_from_slice(after_first);
        }
    }
    body.extend(chunk(ChunkType::EndOfTransfer, 4, &[]));
    body
}

fn media_response(header: &[u8], features: Option<&str>) -> ResponseTemplate {
    let template =
        ResponseTemplate::new(200).set_body_raw(media_body(header, &[]), "video/x-ms-asf");
    match features {
        Some(features) => template.insert_header("Pragma", features),
        None => template,
    }
}

async fn mount_asf(server: &MockServer, mock_path: &str, header: &[u8], features: Option<&str>) {
    Mock::given(method("GET"))
        .and(path(mock_path))
        .and(PlayRequest)
        .respond_with(media_response(header, features))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(mock_path))
        .respond_with(header_response(header, features))
        .mount(server)
        .await;
}

/// Serve `header` on the first request and `body` once the media is requested.
async fn mount_asf_body(server: &MockServer, mock_path: &str, header: &[u8], body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(mock_path))
        .and(PlayRequest)
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "video/x-ms-asf"))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(mock_path))
        .respond_with(header_response(header, None))
        .mount(server)
        .await;
}

async fn read_all(stream: &mut mmsnet::MediaStream) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 100];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn test_prerecorded_without_features() -> anyhow::Result<()> {
    init_logger();
    let server = MockServer::start().await;
    let header = asf_header(false);
    mount_asf(&server, "/clip.asf", &header, None).await;

    let url = format!("{}/clip.asf", server.uri());
    let mut stream = mmsnet::open(&url, &test_config()).await?;
    assert_eq!(stream.stream_type(), StreamType::Prerecorded);
    assert_eq!(stream.info().transport, Transport::Http);
    let info_header = stream.info().header.as_ref().assert_success();
    assert_eq!(info_header.packet_size, 64);

    let mut expected = header.clone();
    expected.extend(padded(&packets()));
    assert_eq!(read_all(&mut stream).await?, expected);

    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 2);
    assert!(!PlayRequest.matches(&requests[0]));
    assert!(PlayRequest.matches(&requests[1]));

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn test_broadcast_is_live() -> anyhow::Result<()> {
    init_logger();
    let server = MockServer::start().await;
    let header = asf_header(true);
    mount_asf(&server, "/live", &header, Some("features=\"seekable,broadcast\"")).await;

    let url = format!("{}/live", server.uri());
    let mut stream = mmsnet::open(&url, &test_config()).await?;
    assert_eq!(stream.stream_type(), StreamType::Live);
    assert_eq!(
        stream.info().selection.map(|s| (s.audio, s.video)),
        Some((Some(1), Some(2)))
    );

    // the tunnelled stream cannot restart elsewhere
    let err = stream.seek(1_000_000).await.unwrap_err();
    assert!(matches!(err, MmsError::UnsupportedSeek));
    assert_eq!(stream.position(), 0);

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn test_play_request_selects_streams() -> anyhow::Result<()> {
    init_logger();
    let server = MockServer::start().await;
    mount_asf(&server, "/clip.asf", &asf_header(false), None).await;

    let mut config = test_config();
    config.bandwidth = Some(100_000);
    let url = format!("{}/clip.asf", server.uri());
    let mut stream = mmsnet::open(&url, &config).await?;

    // 32k audio leaves room for the 96k video only when audio is dropped
    let selection = stream.info().selection.assert_success();
    assert_eq!(selection.video, Some(2));
    assert_eq!(selection.audio, None);

    let requests = server.received_requests().await.assert_success();
    let pragmas: Vec<String> = requests[1]
        .headers
        .get_all("pragma")
        .iter()
        .filter_map(|value| value.to_str().ok().map(str::to_string))
        .collect();
    assert!(pragmas.contains(&"stream-switch-entry=ffff:2:0 ".to_string()));
    assert!(pragmas.contains(&"stream-switch-count=1".to_string()));
    assert!(pragmas.iter().any(|p| p.contains("request-context=2")));

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn test_redirect_is_followed_once() -> anyhow::Result<()> {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/path", server.uri())),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/path"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("plain words", "text/plain"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/old", server.uri());
    let mut stream = mmsnet::open(&url, &test_config()).await?;
    assert_eq!(stream.stream_type(), StreamType::PlainText);
    assert_eq!(read_all(&mut stream).await?, b"plain words");

    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].url.path(), "/path");

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let url = format!("{}/loop", server.uri());
    let err = mmsnet::open(&url, &test_config()).await.err().assert_success();
    assert!(matches!(err, MmsError::TooManyRedirects(6)));

    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 6);
}

#[tokio::test]
async fn test_authentication_retry() -> anyhow::Result<()> {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("let me in", "text/plain"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let url = format!("{}/secret", server.uri());
    let err = mmsnet::open(&url, &test_config()).await.err().assert_success();
    // nothing left to try for plain http
    assert!(matches!(err, MmsError::NoUsableProtocol { .. }));

    let mut config = test_config();
    config.username = Some("user".to_string());
    config.password = Some("pass".to_string());
    let mut stream = mmsnet::open(&url, &config).await?;
    assert_eq!(read_all(&mut stream).await?, b"let me in");
    stream.close().await;

    // the retry is the second request of its attempt
    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 3);
    let context = |request: &Request| {
        request
            .headers
            .get_all("pragma")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.contains("request-context=2"))
    };
    assert!(!context(&requests[1]));
    assert!(context(&requests[2]));
    assert!(requests[2].headers.get("authorization").is_some());
    Ok(())
}

#[tokio::test]
async fn test_html_is_not_a_stream() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>not a stream at all</body></html>", "text/html"),
        )
        .mount(&server)
        .await;

    let url = format!("{}/page", server.uri());
    let err = mmsnet::open(&url, &test_config()).await.err().assert_success();
    match err {
        MmsError::NoUsableProtocol { last, .. } => {
            assert!(matches!(last.as_deref(), Some(MmsError::ProtocolMismatch(_))));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_clear_chunk_mid_stream_is_dropped() -> anyhow::Result<()> {
    init_logger();
    let server = MockServer::start().await;
    let header = asf_header(false);
    let clear = chunk(ChunkType::Clear, 9, &[]);
    mount_asf_body(&server, "/clip.asf", &header, media_body(&header, &clear)).await;

    let url = format!("{}/clip.asf", server.uri());
    let mut stream = mmsnet::open(&url, &test_config()).await?;

    let mut expected = header.clone();
    expected.extend(padded(&packets()));
    assert_eq!(read_all(&mut stream).await?, expected);

    stream.close().await;
    Ok(())
}

#[tokio::test]
async fn test_size_confirmation_mismatch_is_fatal() -> anyhow::Result<()> {
    init_logger();
    let server = MockServer::start().await;
    let header = asf_header(false);
    let mut broken = chunk(ChunkType::Data, 9, &[0xDD; 10]);
    broken[10..12].copy_from_slice(&99u16.to_le_bytes());
    mount_asf_body(&server, "/clip.asf", &header, media_body(&header, &broken)).await;

    let url = format!("{}/clip.asf", server.uri());
    let mut stream = mmsnet::open(&url, &test_config()).await?;

    let mut expected = header.clone();
    expected.extend(padded(&packets()[..1]));
    let mut delivered = Vec::new();
    let mut buf = [0u8; 100];
    let err = loop {
        match stream.read(&mut buf).await {
            Ok(0) => panic!("stream ended without the framing error"),
            Ok(n) => delivered.extend_from_slice(&buf[..n]),
            Err(e) => break e,
        }
    };
    match err {
        MmsError::Framing(message) => assert!(message.contains("confirmation"), "{message}"),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(delivered, expected);

    stream.close().await;
    Ok(())
}
