//! Reference tabserver client.
//!
//! Opens with `HELLO\n<name>\n`, then relays stdin to the broker verbatim
//! and prints whatever the upstream routes back.
//!
//! Usage: `cargo run --example line_client -- 127.0.0.1:7000 my-name`

use std::env;
use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> io::Result<()> {
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7000".to_string());
    let name = env::args().nth(2).unwrap_or_else(|| "demo".to_string());

    let mut stream = TcpStream::connect(&addr).await?;
    stream
        .write_all(format!("HELLO\n{}\n", name).as_bytes())
        .await?;

    let (mut read_half, mut write_half) = stream.into_split();
    let to_broker = tokio::spawn(async move {
        let mut stdin = io::stdin();
        let _ = io::copy(&mut stdin, &mut write_half).await;
    });

    let mut stdout = io::stdout();
    io::copy(&mut read_half, &mut stdout).await?;
    to_broker.abort();
    Ok(())
}
