mod query_tests;

use lazy_static::lazy_static;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    // テストの前に一度だけ実行したい処理
    // tracing_subscriberの初期化
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

const SOURCE_ID: &str = "example";

lazy_static! {
    pub static ref CDN_BASE: String =
        std::env::var("MEDIA_FINDER_TEST_CDN").unwrap_or_else(|_| "https://cdn.example.com".to_string());
}
