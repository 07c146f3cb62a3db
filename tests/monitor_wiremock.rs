mod support;

use std::sync::Arc;

use rakumon::credentials::MemoryCredentialStore;
use rakumon::outcome::Outcome;
use rakumon::scheduler::{DirectFactory, Monitor};
use rakumon::store::{JsonFileStore, ReadingStore};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One scheduler tick over the real direct transport: fetch, persist,
/// re-read the stored value.
#[tokio::test]
async fn tick_over_the_direct_transport_persists_the_reading() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dashboard"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(support::DASHBOARD_HTML, "text/html"),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let readings = Arc::new(JsonFileStore::with_path(dir.path().join("readings.json")));

    let config = support::portal_config(&server.uri());
    let monitor = Monitor::new(
        config.clone(),
        Arc::new(MemoryCredentialStore::with_credentials(support::credentials())),
        readings.clone(),
        Arc::new(DirectFactory::new(config)),
    );

    let outcome = monitor.tick(&CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, Outcome::Success(_)));

    let stored = readings.latest().await.unwrap().unwrap();
    assert_eq!(stored.gigabytes, 19.5);
}
