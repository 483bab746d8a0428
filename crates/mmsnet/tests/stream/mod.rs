use crate::{
    common::{init_logger, test_config},
    AssertWrapper,
};
use mmsnet::{asf::HEADER_OBJECT, CacheConfig, StreamConfig, StreamType};
use std::io::{Read, Seek, SeekFrom};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// A body that starts like an ASF file, so it is passed through as a plain stream.
fn plain_asf_body(len: usize) -> Vec<u8> {
    let mut body = HEADER_OBJECT.0.to_vec();
    body.extend((body.len()..len).map(|i| (i % 241) as u8));
    body
}

fn small_cache_config() -> StreamConfig {
    StreamConfig {
        cache: CacheConfig {
            size: 1024,
            sector_size: 256,
            fill_threshold: 128,
            prefill: 20,
        },
        ..test_config()
    }
}

async fn mount_file(server: &MockServer, body: &[u8]) {
    let skip = 15_000;
    Mock::given(method("GET"))
        .and(path("/file.asf"))
        .and(header("range", format!("bytes={skip}-").as_str()))
        .respond_with(
            ResponseTemplate::new(206).set_body_raw(body[skip..].to_vec(), "application/x-octet"),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file.asf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), "application/x-octet"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_plain_stream_reseeks_with_range() -> anyhow::Result<()> {
    init_logger();
    let server = MockServer::start().await;
    let body = plain_asf_body(20_000);
    mount_file(&server, &body).await;

    let url = format!("{}/file.asf", server.uri());
    let mut stream = mmsnet::open(&url, &small_cache_config()).await?;
    assert_eq!(stream.stream_type(), StreamType::PlainText);
    assert!(stream.info().header.is_none());

    let mut buf = [0u8; 100];
    let n = stream.read(&mut buf).await?;
    assert_eq!(&buf[..n], &body[..n]);

    stream.seek(15_000).await?;
    assert_eq!(stream.position(), 15_000);
    let mut rest = Vec::new();
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        rest.extend_from_slice(&buf[..n]);
    }
    assert_eq!(rest, &body[15_000..]);

    let requests = server.received_requests().await.assert_success();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].headers.get("range").is_some());

    stream.close().await;
    Ok(())
}

#[test]
fn test_blocking_read_and_seek() -> anyhow::Result<()> {
    init_logger();
    let runtime = tokio::runtime::Runtime::new()?;
    let body = plain_asf_body(20_000);

    let (server, stream) = runtime.block_on(async {
        let server = MockServer::start().await;
        mount_file(&server, &body).await;
        let url = format!("{}/file.asf", server.uri());
        let stream = mmsnet::open(&url, &small_cache_config()).await;
        (server, stream)
    });
    let mut stream = stream?.into_blocking(runtime.handle().clone());
    assert_eq!(stream.get_ref().stream_type(), StreamType::PlainText);

    let mut head = [0u8; 16];
    stream.read_exact(&mut head)?;
    assert_eq!(head, HEADER_OBJECT.0);

    // backwards inside the buffer
    assert_eq!(stream.seek(SeekFrom::Current(-8))?, 8);
    let mut again = [0u8; 8];
    stream.read_exact(&mut again)?;
    assert_eq!(again, HEADER_OBJECT.0[8..]);

    assert_eq!(stream.seek(SeekFrom::Start(15_000))?, 15_000);
    let mut tail = Vec::new();
    stream.read_to_end(&mut tail)?;
    assert_eq!(tail, &body[15_000..]);

    stream.seek(SeekFrom::End(0)).assert_error();
    stream.seek(SeekFrom::Current(-1_000_000)).assert_error();

    let mut inner = stream.into_inner();
    runtime.block_on(inner.close());
    drop(server);
    Ok(())
}
