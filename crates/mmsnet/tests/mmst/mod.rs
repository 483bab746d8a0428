use crate::{
    common::{asf_header, init_logger, packets, padded, test_config},
    AssertWrapper,
};
use mmsnet::{
    mmst::command::{encode_command, CommandFrame, COMMAND_PREFIX_SIZE},
    MmsError, StreamType, Transport,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

const KEEPALIVE: u16 = 0x1B;
const END_OF_STREAM: u16 = 0x1E;
const STREAM_CHANGE: u16 = 0x21;

async fn read_command(socket: &mut TcpStream) -> anyhow::Result<CommandFrame> {
    let mut prefix = [0u8; COMMAND_PREFIX_SIZE];
    socket.read_exact(&mut prefix).await?;
    let length = u32::from_le_bytes([prefix[8], prefix[9], prefix[10], prefix[11]]) as usize;
    let mut body = vec![0u8; length + 4];
    socket.read_exact(&mut body).await?;
    Ok(CommandFrame::decode_body(&body)?)
}

async fn send_command(socket: &mut TcpStream, command: u16) -> anyhow::Result<()> {
    socket
        .write_all(&encode_command(0, command, 0, 0, &[]))
        .await?;
    Ok(())
}

/// `[sequence][type][flags][length + 8]` followed by the payload.
fn packet(sequence: u32, kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = sequence.to_le_bytes().to_vec();
    out.push(kind);
    out.push(0);
    out.extend(((payload.len() + 8) as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Options for the scripted server.
#[derive(Clone, Copy, Default)]
struct Script {
    keepalives_before_header: usize,
    broadcast: bool,
    oversized_packet: bool,
    /// A command the client has no meaning for, sent after the packets.
    unknown_command: Option<u16>,
}

/// Serve one MMS session and return the commands received, in order.
async fn serve(script: Script) -> anyhow::Result<(u16, JoinHandle<anyhow::Result<Vec<u16>>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await?;
        let mut received = Vec::new();

        // connect info, transport info, file request
        for answer in [0x01, 0x02, 0x06] {
            received.push(read_command(&mut socket).await?.command);
            send_command(&mut socket, answer).await?;
        }

        // header request
        received.push(read_command(&mut socket).await?.command);
        for _ in 0..script.keepalives_before_header {
            send_command(&mut socket, KEEPALIVE).await?;
        }
        let header = asf_header(script.broadcast);
        let (first, second) = header.split_at(header.len() / 2);
        socket.write_all(&packet(0, 0x02, first)).await?;
        socket.write_all(&packet(1, 0x02, second)).await?;

        // keepalive echoes, then the stream selection
        loop {
            let command = read_command(&mut socket).await?.command;
            received.push(command);
            if command != KEEPALIVE {
                break;
            }
        }
        send_command(&mut socket, STREAM_CHANGE).await?;

        // start playing
        received.push(read_command(&mut socket).await?.command);
        for (i, payload) in packets().iter().enumerate() {
            socket.write_all(&packet(i as u32, 0x04, payload)).await?;
            if i == 0 {
                send_command(&mut socket, STREAM_CHANGE).await?;
            }
        }
        if script.oversized_packet {
            socket.write_all(&packet(9, 0x04, &[0xEE; 100])).await?;
        }
        if let Some(command) = script.unknown_command {
            send_command(&mut socket, command).await?;
        }
        // the client may already have hung up after a framing error
        let _ = send_command(&mut socket, END_OF_STREAM).await;

        // hold the connection until the client hangs up, which may be a reset
        let mut rest = Vec::new();
        let _ = socket.read_to_end(&mut rest).await;
        Ok(received)
    });

    Ok((port, task))
}

async fn read_all(stream: &mut mmsnet::MediaStream) -> mmsnet::MmsResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 50];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn test_keepalives_before_header_are_echoed() -> anyhow::Result<()> {
    init_logger();
    let (port, server) = serve(Script {
        keepalives_before_header: 3,
        ..Default::default()
    })
    .await?;

    let url = format!("mmst://127.0.0.1:{port}/media/clip.asf");
    let mut stream = mmsnet::open(&url, &test_config()).await?;
    assert_eq!(stream.info().transport, Transport::Mmst);
    assert_eq!(stream.stream_type(), StreamType::Prerecorded);

    let mut expected = asf_header(false);
    expected.extend(padded(&packets()));
    assert_eq!(read_all(&mut stream).await?, expected);
    stream.close().await;

    let received = server.await??;
    assert_eq!(
        received,
        vec![0x01, 0x02, 0x05, 0x15, KEEPALIVE, KEEPALIVE, KEEPALIVE, 0x33, 0x07]
    );
    Ok(())
}

#[tokio::test]
async fn test_broadcast_session_is_live() -> anyhow::Result<()> {
    init_logger();
    let (port, server) = serve(Script {
        broadcast: true,
        ..Default::default()
    })
    .await?;

    let url = format!("mmst://127.0.0.1:{port}/live");
    let mut stream = mmsnet::open(&url, &test_config()).await?;
    assert_eq!(stream.stream_type(), StreamType::Live);
    assert!(matches!(
        stream.seek(10_000_000).await,
        Err(MmsError::UnsupportedSeek)
    ));

    // a seek inside what is buffered still works
    let mut buf = [0u8; 16];
    stream.read(&mut buf).await?;
    stream.seek(4).await?;
    assert_eq!(stream.position(), 4);
    stream.close().await;

    let received = server.await??;
    assert_eq!(received, vec![0x01, 0x02, 0x05, 0x15, 0x33, 0x07]);
    Ok(())
}

/// Read until the stream fails, returning what was delivered before the error.
async fn read_until_error(stream: &mut mmsnet::MediaStream) -> (Vec<u8>, MmsError) {
    let mut delivered = Vec::new();
    let mut buf = [0u8; 50];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => panic!("stream ended without an error"),
            Ok(n) => delivered.extend_from_slice(&buf[..n]),
            Err(e) => return (delivered, e),
        }
    }
}

#[tokio::test]
async fn test_oversized_packet_is_a_framing_error() -> anyhow::Result<()> {
    init_logger();
    let (port, server) = serve(Script {
        oversized_packet: true,
        ..Default::default()
    })
    .await?;

    let url = format!("mmst://127.0.0.1:{port}/clip.asf");
    let mut stream = mmsnet::open(&url, &test_config()).await?;

    let mut expected = asf_header(false);
    expected.extend(padded(&packets()));
    let (delivered, err) = read_until_error(&mut stream).await;
    assert!(matches!(err, MmsError::Framing(_)));
    assert_eq!(delivered, expected);
    stream.close().await;

    server.await?.assert_success();
    Ok(())
}

#[tokio::test]
async fn test_unknown_command_during_playback_is_fatal() -> anyhow::Result<()> {
    init_logger();
    let (port, server) = serve(Script {
        unknown_command: Some(0x40),
        ..Default::default()
    })
    .await?;

    let url = format!("mmst://127.0.0.1:{port}/clip.asf");
    let mut stream = mmsnet::open(&url, &test_config()).await?;

    let mut expected = asf_header(false);
    expected.extend(padded(&packets()));
    let (delivered, err) = read_until_error(&mut stream).await;
    match err {
        MmsError::Framing(message) => assert!(message.contains("0x40"), "{message}"),
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(delivered, expected);
    stream.close().await;

    server.await?.assert_success();
    Ok(())
}
