//! Reads packet log lines from stdin and prints the valid messages

use chrono::{DateTime, Local};
use futures::StreamExt;
use tokio_util::codec::FramedRead;

use ramses_rf::protocol::{parse_line, LineCodec};
use ramses_rf::util::init_logging;

#[tokio::main]
async fn main() -> ramses_rf::Result<()> {
    init_logging();

    let mut lines = FramedRead::new(tokio::io::stdin(), LineCodec::new());
    let (mut valid, mut dropped) = (0usize, 0usize);

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line, std::time::SystemTime::now()) {
            Some(msg) => {
                let dtm: DateTime<Local> = msg.timestamp().into();
                println!("{} {}", dtm.format("%Y-%m-%dT%H:%M:%S%.6f"), msg);
                valid += 1;
            }
            None => dropped += 1,
        }
    }

    tracing::info!("{} messages parsed, {} lines dropped", valid, dropped);
    Ok(())
}
