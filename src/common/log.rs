use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

const LOG_ENV: &str = "AP_LOG";

/// Installs the global subscriber. `AP_LOG` wins over `RUST_LOG`; both fall
/// back to `info`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let tree = HierarchicalLayer::default()
        .with_writer(std::io::stderr)
        .with_indent_lines(true)
        .with_targets(true);

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = Registry::default().with(filter).with(tree).try_init();
}
