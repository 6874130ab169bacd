use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use futures::TryStreamExt as _;
use hopwire::{FrameDecoder, MAX_FRAME_SIZE};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

/// Prints the frames contained in a captured hopwire byte stream
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Largest accepted payload in bytes
    #[arg(long, default_value_t = MAX_FRAME_SIZE - 1)]
    max_frame_size: u32,

    /// Number of payload bytes to print
    #[arg(short, long, default_value_t = 16)]
    preview: usize,

    /// Increase log verbosity, may be repeated
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// File containing serialized frames, standard input is read if omitted
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Args {
        max_frame_size,
        preview,
        verbose,
        input,
    } = Args::parse();
    hopwire_cli::tracing::init(verbose);

    let input: Box<dyn AsyncRead + Send + Unpin> = if let Some(path) = input {
        debug!(path = %path.display(), "opening input");
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("failed to open `{}`", path.display()))?;
        Box::new(file)
    } else {
        debug!("reading standard input");
        Box::new(tokio::io::stdin())
    };

    let mut frames = FramedRead::new(input, FrameDecoder::new(max_frame_size));
    let mut n = 0usize;
    while let Some(frame) = frames
        .try_next()
        .await
        .with_context(|| format!("failed to decode frame #{n}"))?
    {
        let data = frame.data();
        let shown = &data[..data.len().min(preview)];
        println!(
            "#{n} type={} size={} idents={} data={shown:02x?}{}",
            frame.kind(),
            frame.size(),
            frame.num_ident(),
            if shown.len() < data.len() { "..." } else { "" },
        );
        for (i, ident) in frame.idents().enumerate() {
            println!("    hop {i}: {ident}");
        }
        n += 1;
    }
    info!(frames = n, "reached end of input");
    Ok(())
}
