#[tokio::main]
async fn main() {
    if let Err(err) = hostctl::rpc::server::run_stdio().await {
        eprintln!("hostctl: {}", err);
        std::process::exit(1);
    }
}
