mod common;

use futures::future::join_all;
use std::sync::Arc;

use common::{coordinator, reference, standard_config, FakeConnector, FakeFactory, Gate};
use voxgate_core::engine::{
    BackendMode, Device, DeviceHint, EngineVariant, HandleKind, ResourceConfig, ResourceState, Synthesizer,
    VoiceFilter,
};
use voxgate_core::error::CoordinatorError;

#[tokio::test]
async fn concurrent_loads_construct_exactly_once() {
    let gate = Arc::new(Gate::default());
    let factory = FakeFactory::gated(Arc::clone(&gate));
    let coordinator = Arc::new(coordinator(Arc::clone(&factory), false, FakeConnector::healthy()));

    let first = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.load(standard_config()).await })
    };
    gate.entered.notified().await;

    let rivals = join_all((0..8).map(|_| coordinator.load(standard_config()))).await;
    for result in rivals {
        let err = result.unwrap_err();
        assert_eq!(err, CoordinatorError::Busy("Model is currently loading. Please wait.".into()));
    }

    gate.release.notify_one();
    let report = first.await.unwrap().unwrap();
    assert_eq!(report.message, "Model loaded successfully (standard backend)");
    assert_eq!(factory.count(), 1);
    assert_eq!(coordinator.status().state, ResourceState::Loaded);
}

#[tokio::test]
async fn every_mutator_is_busy_while_loading() {
    let gate = Arc::new(Gate::default());
    let factory = FakeFactory::gated(Arc::clone(&gate));
    let coordinator = Arc::new(coordinator(Arc::clone(&factory), false, FakeConnector::healthy()));

    let load = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.load(standard_config()).await })
    };
    gate.entered.notified().await;

    // Readers still answer while the load is in flight.
    let status = coordinator.status();
    assert_eq!(status.state, ResourceState::Loading);
    assert_eq!(status.config.as_ref(), Some(&standard_config()));
    assert!(coordinator.get_handle().is_none());

    assert_eq!(coordinator.unload().await.unwrap_err().kind(), "busy");
    assert_eq!(coordinator.restart().await.unwrap_err().kind(), "busy");
    assert_eq!(coordinator.set_backend_mode(BackendMode::Local).await.unwrap_err().kind(), "busy");
    assert_eq!(coordinator.disconnect_remote().await.unwrap_err().kind(), "busy");
    assert_eq!(
        coordinator.connect_remote("https://remote.test", "t").await.unwrap_err().kind(),
        "busy"
    );
    // Health refresh stays available and reports no remote.
    assert_eq!(coordinator.refresh_remote_health().await, None);

    gate.release.notify_one();
    load.await.unwrap().unwrap();
    assert!(coordinator.get_handle().is_some());
}

#[tokio::test]
async fn unload_clears_state_and_tears_down() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());

    coordinator.load(standard_config()).await.unwrap();
    let engine = factory.engine(0);

    let report = coordinator.unload().await.unwrap();
    assert_eq!(report.message, "Model unloaded successfully");
    let status = coordinator.status();
    assert_eq!(status.state, ResourceState::Unloaded);
    assert!(status.config.is_none());
    assert!(status.plan.is_none());
    assert!(status.error.is_none());
    assert!(!status.local_loaded);
    assert!(coordinator.get_handle().is_none());
    assert!(engine.is_torn_down());

    assert_eq!(coordinator.unload().await.unwrap().message, "Model already unloaded");
}

#[tokio::test]
async fn restart_needs_a_prior_successful_load() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());

    let err = coordinator.restart().await.unwrap_err();
    assert_eq!(
        err,
        CoordinatorError::Precondition("No model configuration available. Please load a model first.".into())
    );
    assert_eq!(coordinator.status().state, ResourceState::Unloaded);

    coordinator.load(standard_config()).await.unwrap();
    coordinator.unload().await.unwrap();
    assert_eq!(coordinator.restart().await.unwrap_err().kind(), "precondition");
    assert_eq!(factory.count(), 1);
}

#[tokio::test]
async fn restart_rebuilds_with_the_loaded_configuration() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());
    let config = standard_config().with_device(DeviceHint::Cpu);

    coordinator.load(config.clone()).await.unwrap();
    let report = coordinator.restart().await.unwrap();
    assert!(report.message.starts_with("Model restarted successfully"));

    assert_eq!(factory.count(), 2);
    assert!(factory.engine(0).is_torn_down());
    assert!(!factory.engine(1).is_torn_down());
    assert_eq!(factory.configs.lock()[1], config);
    assert_eq!(coordinator.status().config, Some(config));
}

#[tokio::test]
async fn gpu_hint_without_gpu_falls_back_to_cpu() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());

    coordinator
        .load(standard_config().with_device(DeviceHint::Cuda))
        .await
        .unwrap();

    let status = coordinator.status();
    assert_eq!(status.state, ResourceState::Loaded);
    let plan = status.plan.unwrap();
    assert_eq!(plan.variant, EngineVariant::Standard);
    assert_eq!(plan.backbone_device, Device::Cpu);
    assert_eq!(plan.codec_device, Device::Cpu);
}

#[tokio::test]
async fn gpu_host_selects_the_accelerated_runtime() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), true, FakeConnector::healthy());

    let report = coordinator.load(standard_config()).await.unwrap();
    assert_eq!(report.message, "Model loaded successfully (accelerated backend)");
    let plan = coordinator.status().plan.unwrap();
    assert_eq!(plan.backbone_device, Device::Cuda);
    assert_eq!(coordinator.get_handle().unwrap().kind(), HandleKind::Local(EngineVariant::Accelerated));
}

#[tokio::test]
async fn second_load_keeps_the_first_configuration() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());

    coordinator.load(standard_config()).await.unwrap();
    let other = ResourceConfig::new("pnnbao-ump/VieNeu-TTS-q4-gguf", "neuphonic/neucodec-onnx-decoder");
    let report = coordinator.load(other).await.unwrap();

    assert_eq!(report.message, "Model already loaded");
    assert_eq!(coordinator.status().config, Some(standard_config()));
    assert_eq!(factory.count(), 1);
}

#[tokio::test]
async fn failed_load_reports_and_can_be_retried() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());

    factory.fail_next("CUDA out of memory");
    let err = coordinator.load(standard_config()).await.unwrap_err();
    assert_eq!(err, CoordinatorError::Construction("CUDA out of memory".into()));
    assert_eq!(err.to_string(), "Failed to load model: CUDA out of memory");

    let status = coordinator.status();
    assert_eq!(status.state, ResourceState::Error);
    assert_eq!(status.error.as_deref(), Some("CUDA out of memory"));
    assert!(coordinator.get_handle().is_none());

    factory.succeed();
    coordinator.load(standard_config()).await.unwrap();
    let status = coordinator.status();
    assert_eq!(status.state, ResourceState::Loaded);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn in_flight_handle_outlives_unload() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());
    coordinator.load(standard_config()).await.unwrap();

    let handle = coordinator.get_handle().unwrap();
    handle.infer("trước khi gỡ", &reference()).await.unwrap();

    coordinator.unload().await.unwrap();
    assert!(coordinator.get_handle().is_none());

    // The object is still alive, but its resources are gone.
    assert!(matches!(handle.kind(), HandleKind::Local(_)));
    assert!(handle.infer("sau khi gỡ", &reference()).await.is_err());
}

#[tokio::test]
async fn quantized_backbone_narrows_the_voice_list() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());

    coordinator
        .load(ResourceConfig::new("pnnbao-ump/VieNeu-TTS-q4-gguf", "neuphonic/neucodec-onnx-decoder"))
        .await
        .unwrap();
    let status = coordinator.status();
    assert_eq!(status.plan.unwrap().variant, EngineVariant::Quantized);
    assert_eq!(status.voices, VoiceFilter::Only(common::quantized_voices()));
    assert!(!status.voices.allows("Huong"));

    // Remote serving lifts the restriction.
    coordinator.connect_remote("https://remote.test", "t").await.unwrap();
    coordinator.set_backend_mode(BackendMode::Remote).await.unwrap();
    assert_eq!(coordinator.status().voices, VoiceFilter::All);
}

#[tokio::test]
async fn remote_mode_follows_remote_health() {
    let factory = FakeFactory::new();
    let connector = FakeConnector::healthy();
    let coordinator = coordinator(Arc::clone(&factory), false, Arc::clone(&connector));

    assert_eq!(
        coordinator.set_backend_mode(BackendMode::Remote).await.unwrap_err().kind(),
        "precondition"
    );

    coordinator.load(standard_config()).await.unwrap();
    let report = coordinator.connect_remote("https://remote.test/", "secret").await.unwrap();
    assert_eq!(report.message, "Connected to remote backend at https://remote.test");
    // Connecting alone does not change the serving path.
    assert!(!coordinator.get_handle().unwrap().is_remote());

    coordinator.set_backend_mode(BackendMode::Remote).await.unwrap();
    assert!(coordinator.get_handle().unwrap().is_remote());
    assert_eq!(coordinator.status().backend_label(), "remote");

    connector.set_healthy(false);
    assert_eq!(coordinator.refresh_remote_health().await, Some(false));
    let status = coordinator.status();
    assert_eq!(status.mode, BackendMode::Remote);
    assert!(!status.serving_remote());
    assert!(!coordinator.get_handle().unwrap().is_remote(), "falls back to local");

    connector.set_healthy(true);
    assert_eq!(coordinator.refresh_remote_health().await, Some(true));
    assert!(coordinator.get_handle().unwrap().is_remote());

    let report = coordinator.disconnect_remote().await.unwrap();
    assert_eq!(
        report.message,
        "Disconnected from remote backend at https://remote.test; switched to local backend"
    );
    assert_eq!(coordinator.status().mode, BackendMode::Local);
    assert!(coordinator.status().remote.is_none());
}

#[tokio::test]
async fn unhealthy_remote_is_not_connected() {
    let factory = FakeFactory::new();
    let connector = Arc::new(FakeConnector::default());
    let coordinator = coordinator(Arc::clone(&factory), false, Arc::clone(&connector));

    let err = coordinator.connect_remote("https://remote.test", "secret").await.unwrap_err();
    assert_eq!(err.kind(), "remote_unhealthy");
    assert!(err.to_string().contains("connection refused"));
    assert!(coordinator.status().remote.is_none());
    assert_eq!(coordinator.refresh_remote_health().await, None);
}

#[tokio::test]
async fn local_mode_is_allowed_without_a_model() {
    let factory = FakeFactory::new();
    let coordinator = coordinator(Arc::clone(&factory), false, FakeConnector::healthy());

    coordinator.connect_remote("https://remote.test", "t").await.unwrap();
    coordinator.set_backend_mode(BackendMode::Remote).await.unwrap();
    assert!(coordinator.get_handle().unwrap().is_remote());

    let report = coordinator.set_backend_mode(BackendMode::Local).await.unwrap();
    assert_eq!(report.message, "Switched to local backend; no local model is loaded yet");
    assert!(coordinator.get_handle().is_none());
    assert_eq!(
        coordinator.set_backend_mode(BackendMode::Local).await.unwrap().message,
        "Backend mode is already local"
    );
}

#[tokio::test]
async fn health_refresh_runs_alongside_a_load() {
    let gate = Arc::new(Gate::default());
    let factory = FakeFactory::gated(Arc::clone(&gate));
    let connector = FakeConnector::healthy();
    let coordinator = Arc::new(coordinator(Arc::clone(&factory), false, Arc::clone(&connector)));
    coordinator.connect_remote("https://remote.test", "t").await.unwrap();

    let load = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.load(standard_config()).await })
    };
    gate.entered.notified().await;

    connector.set_healthy(false);
    assert_eq!(coordinator.refresh_remote_health().await, Some(false));
    let status = coordinator.status();
    assert_eq!(status.state, ResourceState::Loading);
    assert!(!status.remote_healthy());

    gate.release.notify_one();
    load.await.unwrap().unwrap();

    // The load's own publish keeps the refreshed health.
    let status = coordinator.status();
    assert_eq!(status.state, ResourceState::Loaded);
    assert!(!status.remote_healthy());
    assert!(coordinator.unload().await.is_ok());
}
