#[tokio::main]
async fn main() {
    shop_server::start_server().await;
}
