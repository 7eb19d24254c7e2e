//! Integration tests for RecognitionEngine load recovery
//!
//! The inference capability is mocked; model roots are real directories so forced
//! re-resolution and eviction run against the filesystem.

mod common;

use async_trait::async_trait;
use camino::Utf8Path;
use common::{
    MOBILE_DET, MOBILE_REC, SERVER_DET, SERVER_REC, raw_line, resolver_for, root_with_both_pairs,
    temp_root,
};
use deepread_ocr::error::OcrError;
use deepread_ocr::models::{ModelPair, OFFICIAL_MODELS_DIR};
use deepread_ocr::services::{
    CapabilityError, OCR_CAPABILITY, ProbeOutcome, RawLine, RecognitionEngine, Recognizer,
};
use mockall::mock;
use std::sync::Arc;

mock! {
    pub Capability {}

    #[async_trait]
    impl Recognizer for Capability {
        async fn load(&self, pair: &ModelPair, verify_dependencies: bool) -> Result<(), CapabilityError>;
        async fn predict(&self, pair: &ModelPair, image: &Utf8Path) -> Result<Vec<RawLine>, CapabilityError>;
        async fn probe(&self, capability: &str) -> ProbeOutcome;
    }
}

fn dependency_check() -> CapabilityError {
    CapabilityError::DependencyCheck {
        capability: OCR_CAPABILITY.to_string(),
    }
}

fn mismatch(requested: &str, declared: &str) -> CapabilityError {
    CapabilityError::ModelMismatch {
        requested: Some(requested.to_string()),
        declared: Some(declared.to_string()),
        artifact: None,
    }
}

fn one_line() -> Vec<RawLine> {
    vec![raw_line("Invoice", 10.0, 10.0, 200.0, 20.0)]
}

#[tokio::test]
async fn test_dependency_probe_recovers_load() {
    let (_temp, root) = root_with_both_pairs();
    let mut capability = MockCapability::new();
    capability
        .expect_load()
        .withf(|_, verify| *verify)
        .times(1)
        .returning(|_, _| Err(dependency_check()));
    capability
        .expect_probe()
        .withf(|capability| capability == OCR_CAPABILITY)
        .times(1)
        .returning(|_| ProbeOutcome::Usable);
    capability
        .expect_load()
        .withf(|_, verify| !*verify)
        .times(1)
        .returning(|_, _| Ok(()));
    capability
        .expect_predict()
        .times(1)
        .returning(|_, _| Ok(one_line()));

    let engine = RecognitionEngine::new(resolver_for(&root), Arc::new(capability));
    let lines = engine.process(Utf8Path::new("/tmp/page1.png")).await.unwrap();

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].text(), "Invoice");
    assert_eq!(engine.resolver().recoveries(), 0);
}

#[tokio::test]
async fn test_dependency_probe_reports_missing_packages() {
    let (_temp, root) = root_with_both_pairs();
    let mut capability = MockCapability::new();
    capability
        .expect_load()
        .withf(|_, verify| *verify)
        .times(1)
        .returning(|_, _| Err(dependency_check()));
    capability
        .expect_probe()
        .times(1)
        .returning(|_| ProbeOutcome::Missing(vec!["paddlex[ocr]".to_string()]));
    capability.expect_predict().never();

    let engine = RecognitionEngine::new(resolver_for(&root), Arc::new(capability));
    let err = engine.process(Utf8Path::new("/tmp/page1.png")).await.unwrap_err();

    match &err {
        OcrError::EngineDependency { capability, missing } => {
            assert_eq!(capability, OCR_CAPABILITY);
            assert_eq!(missing, &vec!["paddlex[ocr]".to_string()]);
        }
        other => panic!("expected EngineDependency, got {:?}", other),
    }
    assert!(err.to_string().contains("paddlex[ocr]"));
}

#[tokio::test]
async fn test_mismatch_recovers_once_onto_remaining_pair() {
    let (_temp, root) = root_with_both_pairs();
    let mut capability = MockCapability::new();
    capability
        .expect_load()
        .withf(|pair, _| pair.recognizer.name == SERVER_REC)
        .times(1)
        .returning(|_, _| Err(mismatch(SERVER_REC, MOBILE_REC)));
    capability
        .expect_load()
        .withf(|pair, _| pair.recognizer.name == MOBILE_REC)
        .times(1)
        .returning(|_, _| Ok(()));
    capability
        .expect_predict()
        .withf(|pair, _| pair.detector.name == MOBILE_DET)
        .times(1)
        .returning(|_, _| Ok(one_line()));

    let engine = RecognitionEngine::new(resolver_for(&root), Arc::new(capability));
    let lines = engine.process(Utf8Path::new("/tmp/page1.png")).await.unwrap();

    assert_eq!(lines.len(), 1);
    assert_eq!(engine.resolver().recoveries(), 1);

    let loaded = engine.loaded_pair().await.unwrap();
    assert_eq!(loaded.detector.name, MOBILE_DET);
    assert_eq!(loaded.recognizer.name, MOBILE_REC);
    assert!(loaded.is_single_rooted());

    // the mismatched member was evicted, its sibling kept
    assert!(!root.join(OFFICIAL_MODELS_DIR).join(SERVER_REC).exists());
    assert!(root.join(OFFICIAL_MODELS_DIR).join(SERVER_DET).exists());
}

#[tokio::test]
async fn test_persistent_mismatch_is_reported_after_one_recovery() {
    let (_temp, root) = root_with_both_pairs();
    let mut capability = MockCapability::new();
    capability
        .expect_load()
        .times(2)
        .returning(|pair, _| Err(mismatch(&pair.recognizer.name, "PP-OCRv4_server_rec")));
    capability.expect_predict().never();

    let engine = RecognitionEngine::new(resolver_for(&root), Arc::new(capability));
    let err = engine.process(Utf8Path::new("/tmp/page1.png")).await.unwrap_err();

    assert_eq!(err.kind(), "engine_model_mismatch");
    assert!(err.to_string().contains("PP-OCRv4_server_rec"));
    assert_eq!(engine.resolver().recoveries(), 1);
    assert!(engine.loaded_pair().await.is_none());
}

#[tokio::test]
async fn test_runtime_failure_does_not_touch_resolver() {
    let (_temp, root) = root_with_both_pairs();
    let mut capability = MockCapability::new();
    capability.expect_load().times(1).returning(|_, _| Ok(()));
    capability
        .expect_predict()
        .times(1)
        .returning(|_, _| Err(CapabilityError::Runtime("out of memory".to_string())));

    let engine = RecognitionEngine::new(resolver_for(&root), Arc::new(capability));
    let err = engine.process(Utf8Path::new("/tmp/page1.png")).await.unwrap_err();

    assert!(matches!(err, OcrError::EngineRuntime(ref detail) if detail == "out of memory"));
    assert!(err.is_page_level());
    assert_eq!(engine.resolver().recoveries(), 0);
    // the loaded pair stays usable for the next page
    assert!(engine.loaded_pair().await.is_some());
}

#[tokio::test]
async fn test_predict_mismatch_unloads_pair() {
    let (_temp, root) = root_with_both_pairs();
    let mut capability = MockCapability::new();
    capability.expect_load().times(1).returning(|_, _| Ok(()));
    capability
        .expect_predict()
        .times(1)
        .returning(|_, _| Err(mismatch(SERVER_DET, MOBILE_DET)));

    let engine = RecognitionEngine::new(resolver_for(&root), Arc::new(capability));
    let err = engine.process(Utf8Path::new("/tmp/page1.png")).await.unwrap_err();

    assert_eq!(err.kind(), "engine_model_mismatch");
    assert!(engine.loaded_pair().await.is_none());
}

#[tokio::test]
async fn test_invalid_lines_are_dropped() {
    let (_temp, root) = root_with_both_pairs();
    let mut capability = MockCapability::new();
    capability.expect_load().returning(|_, _| Ok(()));
    capability.expect_predict().returning(|_, _| {
        Ok(vec![
            raw_line("kept", 0.0, 0.0, 50.0, 10.0),
            RawLine {
                text: "degenerate".to_string(),
                confidence: 0.8,
                polygon: vec![[0.0, 0.0], [5.0, 5.0]],
            },
            RawLine {
                text: "nan".to_string(),
                confidence: f32::NAN,
                polygon: vec![[0.0, 0.0], [5.0, 0.0], [5.0, 5.0], [0.0, 5.0]],
            },
        ])
    });

    let engine = RecognitionEngine::new(resolver_for(&root), Arc::new(capability));
    let lines = engine.process(Utf8Path::new("/tmp/page1.png")).await.unwrap();

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].text(), "kept");
}

#[tokio::test]
async fn test_empty_root_fails_resolution_without_loading() {
    let (_temp, root) = temp_root();
    let mut capability = MockCapability::new();
    capability.expect_load().never();

    let engine = RecognitionEngine::new(resolver_for(&root), Arc::new(capability));
    let err = engine.process(Utf8Path::new("/tmp/page1.png")).await.unwrap_err();

    assert_eq!(err.kind(), "model_resolution");
    assert!(!err.is_page_level());
}
