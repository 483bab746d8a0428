use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use clap::Parser;
use mmsnet::{CacheConfig, MediaStream, StreamConfig};
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Parser, Debug, Clone)]
#[clap(version, author)]
/// Dump an ASF stream served over MMS or HTTP.
pub struct MmsDumpArgs {
    /// Stream address, e.g. mms://host/path or http://host/path.asf
    url: String,

    /// Output file path. Writes to stdout when omitted.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Debug output
    #[clap(long, alias = "debug")]
    verbose: bool,

    /// Only print what the server announced, then exit
    #[clap(long)]
    info: bool,

    /// Bandwidth cap in bits per second used to pick streams
    #[clap(short, long)]
    bandwidth: Option<u32>,

    /// Force the audio stream id
    #[clap(long)]
    audio_id: Option<u16>,

    /// Force the video stream id
    #[clap(long)]
    video_id: Option<u16>,

    /// User name sent when the server asks for authentication
    #[clap(long, env = "MMSDUMP_USER")]
    username: Option<String>,

    /// Password sent when the server asks for authentication
    #[clap(long, env = "MMSDUMP_PASSWORD")]
    password: Option<String>,

    /// Connect timeout in seconds
    #[clap(long, default_value = "10")]
    connect_timeout: u64,

    /// Read timeout in seconds
    #[clap(long, default_value = "30")]
    read_timeout: u64,

    /// Read-ahead cache size in KiB
    #[clap(long, default_value = "512")]
    cache: usize,

    /// Stop after this many bytes
    #[clap(long)]
    limit: Option<u64>,
}

impl MmsDumpArgs {
    fn config(&self) -> StreamConfig {
        StreamConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            read_timeout: Duration::from_secs(self.read_timeout),
            bandwidth: self.bandwidth,
            audio_id: self.audio_id,
            video_id: self.video_id,
            username: self.username.clone(),
            password: self.password.clone(),
            cache: CacheConfig {
                size: self.cache * 1024,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn print_info(stream: &MediaStream) {
    let info = stream.info();
    eprintln!("Transport: {:?}", info.transport);
    eprintln!("Stream type: {:?}", info.stream_type);
    if let Some(header) = &info.header {
        eprintln!("Packet size: {}", header.packet_size);
        eprintln!("Preroll: {} ms", header.preroll);
        for stream in &header.streams {
            eprintln!(
                "Stream {}: {:?} at {} bit/s",
                stream.id, stream.kind, stream.bitrate
            );
        }
    }
    if let Some(selection) = info.selection {
        eprintln!(
            "Selected audio {:?}, video {:?}",
            selection.audio, selection.video
        );
    }
    if let Some(description) = stream.description() {
        eprintln!("Title: {}", description.title);
        eprintln!("Author: {}", description.author);
        eprintln!("Copyright: {}", description.copyright);
    }
}

async fn dump<W>(stream: &mut MediaStream, output: &mut W, limit: Option<u64>) -> anyhow::Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let want = match limit {
            Some(limit) => (limit - written).min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        if want == 0 {
            break;
        }

        let n = stream.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        output.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    output.flush().await?;
    Ok(written)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = MmsDumpArgs::parse();
    if args.verbose {
        pretty_env_logger::formatted_builder()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        pretty_env_logger::init();
    }

    let mut stream = mmsnet::open(&args.url, &args.config())
        .await
        .with_context(|| format!("Failed to open {}", args.url))?;
    print_info(&stream);
    if args.info {
        stream.close().await;
        return Ok(());
    }

    let written = match &args.output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            dump(&mut stream, &mut file, args.limit).await
        }
        None => dump(&mut stream, &mut tokio::io::stdout(), args.limit).await,
    };
    stream.close().await;

    let written = written?;
    log::info!("Wrote {written} bytes");
    Ok(())
}
