#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;
mod table;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    args::Args::parse_and_run().await
}
