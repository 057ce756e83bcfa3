//! The hashserver command line binary.

#![allow(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    hashserver::hashserver_main().await
}
