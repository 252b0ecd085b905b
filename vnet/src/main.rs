use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    vnet::cli::run().await
}
