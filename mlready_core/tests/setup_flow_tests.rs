use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use mlready_core::probe::{CapabilityKind, CapabilityStatus};
use mlready_core::{
    aggregate, ArtifactFetcher, ArtifactSpec, CapabilityProber, FetchConfig, FetchResult,
    ReadinessReport,
};

/// Prober returning a fixed report, as a stand-in for the real environment.
struct StaticProber {
    report: ReadinessReport,
}

#[async_trait]
impl CapabilityProber for StaticProber {
    async fn probe(&self) -> ReadinessReport {
        self.report.clone()
    }
}

fn workstation_without_model() -> StaticProber {
    let mut report = ReadinessReport::new();
    report.insert(
        "python3",
        CapabilityKind::Runtime,
        CapabilityStatus::Ready("Python 3.10.12".into()),
    );
    report.insert(
        "cuda",
        CapabilityKind::Accelerator,
        CapabilityStatus::Missing("no CUDA device".into()),
    );
    report.insert(
        "PyTorch",
        CapabilityKind::Library,
        CapabilityStatus::Ready("2.1.0".into()),
    );
    report.insert(
        "pretrained model",
        CapabilityKind::Artifact,
        CapabilityStatus::Missing("no pretrained model found".into()),
    );
    StaticProber { report }
}

fn fast_config() -> FetchConfig {
    FetchConfig {
        retry_base_delay: Duration::from_millis(10),
        ..FetchConfig::default()
    }
}

#[tokio::test]
async fn missing_model_is_fetched_and_verdict_passes_with_gpu_warning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![42u8; 4096]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let spec = ArtifactSpec::new(
        "pretrained model",
        format!("{}/model.pt", server.uri()),
        dir.path().join("pretrained_models").join("model.pt"),
    )
    .unwrap()
    .with_minimum_size(1024);

    let report = workstation_without_model().probe().await;
    assert!(report.needs_artifact());

    let fetcher = ArtifactFetcher::new(fast_config()).unwrap();
    let fetch = fetcher.ensure(&spec).await;
    assert!(matches!(fetch, FetchResult::Downloaded { size: 4096, .. }));

    let verdict = aggregate(&report, Some(&fetch));
    assert!(verdict.success, "errors: {:?}", verdict.errors);
    assert_eq!(verdict.warnings.len(), 1);
    assert!(verdict.warnings[0].starts_with("cuda"));
}

#[tokio::test]
async fn failed_fetch_fails_the_verdict_with_manual_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let spec = ArtifactSpec::new(
        "pretrained model",
        format!("{}/model.pt", server.uri()),
        dir.path().join("model.pt"),
    )
    .unwrap();

    let report = workstation_without_model().probe().await;
    let fetcher = ArtifactFetcher::new(fast_config()).unwrap();
    let fetch = fetcher.ensure(&spec).await;

    let verdict = aggregate(&report, Some(&fetch));
    assert!(!verdict.success);
    assert!(verdict.errors[0].contains("Download it manually"));
    assert!(verdict.errors[0].contains(spec.url()));
}

#[test]
fn results_serialize_with_outcome_tag() {
    let fetch = FetchResult::Downloaded {
        path: "models/model.bin".into(),
        size: 41_943_040,
    };
    let json = serde_json::to_value(&fetch).unwrap();
    assert_eq!(json["outcome"], "downloaded");
    assert_eq!(json["size"], 41_943_040);
}
