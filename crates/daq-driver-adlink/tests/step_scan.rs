//! Step scans: software-synchronized acquisitions against the simulated card.
//!
//! Each test walks the controller through the same call sequence the scan
//! engine uses (load, pre-start, start, poll state, read).

use std::sync::Arc;
use std::time::Duration;

use daq_driver_adlink::{
    AcqSynch, AdlinkAiController, AdlinkConfig, AdlinkError, AiDevice, HwState, MockAiDevice,
    State, TriggerSource,
};
use serde_json::json;

const DEVICE: &str = "lab/adlink/ai-01";

async fn setup(mock: Arc<MockAiDevice>, config: AdlinkConfig) -> AdlinkAiController {
    let mut ctrl = AdlinkAiController::new(config, mock).await.unwrap();
    for axis in 1..=3 {
        ctrl.add_device(axis).unwrap();
    }
    ctrl.set_synchronization(AcqSynch::SoftwareTrigger);
    ctrl
}

async fn start_step(ctrl: &mut AdlinkAiController, integration_time: f64) {
    ctrl.load_one(1, integration_time, 1, 0.0).await.unwrap();
    for axis in 1..=3 {
        assert!(ctrl.pre_start_one(axis).unwrap());
    }
    ctrl.start_all().await.unwrap();
    for axis in 1..=3 {
        ctrl.start_one(axis).unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn software_step_reads_one_point_per_axis() {
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut ctrl = setup(mock.clone(), AdlinkConfig::new(DEVICE)).await;

    start_step(&mut ctrl, 0.2).await;
    let trigger = mock.trigger_config().unwrap();
    assert_eq!(trigger.source, TriggerSource::Software);
    assert_eq!(trigger.num_triggers, 1);
    assert_eq!(trigger.samples_per_trigger, 200);

    // Still integrating
    ctrl.state_all().await.unwrap();
    let (state, status) = ctrl.state_one(2).unwrap();
    assert_eq!(state, State::Moving);
    assert_eq!(status, "The Adlink is acquiring");

    tokio::time::sleep(Duration::from_millis(200)).await;
    ctrl.state_all().await.unwrap();
    assert_eq!(ctrl.state_one(1).unwrap().0, State::On);

    ctrl.read_all().await.unwrap();
    assert_eq!(ctrl.read_one(1).unwrap(), vec![vec![0.2]]);
    assert_eq!(
        ctrl.read_one(2).unwrap(),
        vec![vec![MockAiDevice::signal(0, 0)]]
    );
    assert_eq!(
        ctrl.read_one(3).unwrap(),
        vec![vec![MockAiDevice::signal(1, 0)]]
    );
    assert_eq!(
        ctrl.get_axis_extra_par(3, "sd").unwrap(),
        json!(MockAiDevice::noise(1))
    );
}

#[tokio::test(start_paused = true)]
async fn reading_before_the_card_is_ready_fails() {
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut ctrl = setup(mock, AdlinkConfig::new(DEVICE)).await;

    start_step(&mut ctrl, 1.0).await;
    ctrl.state_all().await.unwrap();
    ctrl.read_all().await.unwrap();
    assert!(!ctrl.has_new_data());

    let err = ctrl.read_one(2).unwrap_err();
    assert!(matches!(err, AdlinkError::AcquisitionIncomplete(HwState::Running)));
    assert!(err.to_string().contains("did not finish correctly"));
}

#[tokio::test(start_paused = true)]
async fn consecutive_steps_stop_and_clear_between_loads() {
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut ctrl = setup(mock.clone(), AdlinkConfig::new(DEVICE)).await;

    for _ in 0..3 {
        start_step(&mut ctrl, 0.1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctrl.state_all().await.unwrap();
        ctrl.read_all().await.unwrap();
        assert_eq!(ctrl.read_one(1).unwrap(), vec![vec![0.1]]);
    }

    // First load found the card in STANDBY; the next two stopped it from ON
    assert_eq!(mock.stop_count(), 2);
    assert_eq!(mock.clear_count(), 3);
    assert_eq!(mock.current_timeout(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn formula_is_applied_to_software_reads() {
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut ctrl = setup(mock, AdlinkConfig::new(DEVICE)).await;
    ctrl.set_axis_extra_par(2, "Formula", json!("(VALUE * 10.0) + 1.0"))
        .unwrap();

    start_step(&mut ctrl, 0.1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    ctrl.state_all().await.unwrap();
    ctrl.read_all().await.unwrap();

    let expected = MockAiDevice::signal(0, 0) * 10.0 + 1.0;
    let value = ctrl.read_one(2).unwrap()[0][0];
    assert!((value - expected).abs() < 1e-12);
    // Axis 3 keeps the identity formula
    assert_eq!(
        ctrl.read_one(3).unwrap(),
        vec![vec![MockAiDevice::signal(1, 0)]]
    );
}

#[tokio::test(start_paused = true)]
async fn start_is_retried_until_running() {
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut ctrl = setup(mock.clone(), AdlinkConfig::new(DEVICE)).await;
    ctrl.load_one(1, 0.5, 1, 0.0).await.unwrap();
    ctrl.pre_start_one(2).unwrap();

    mock.fail_next_starts(2);
    ctrl.start_all().await.unwrap();
    assert_eq!(mock.start_count(), 3);
    assert_eq!(ctrl.hw_state(), HwState::Running);

    let s = Duration::from_secs;
    assert_eq!(
        mock.timeout_history(),
        vec![s(3), s(15), s(10), s(3), s(15), s(10), s(3), s(15), s(3)]
    );
}

#[tokio::test(start_paused = true)]
async fn start_failure_is_an_error_unless_skipped() {
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut config = AdlinkConfig::new(DEVICE);
    config.skip_start = false;
    let mut ctrl = setup(mock.clone(), config).await;
    ctrl.load_one(1, 0.5, 1, 0.0).await.unwrap();

    mock.fail_next_starts(3);
    let err = ctrl.start_all().await.unwrap_err();
    assert!(err
        .to_string()
        .starts_with("StartAll: Unable to start acquisition on the device"));
    assert!(matches!(
        err.root(),
        AdlinkError::StartFailed { attempts: 3, .. }
    ));
    assert_eq!(mock.current_timeout(), Duration::from_secs(3));

    // Default configuration tolerates it
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut ctrl = setup(mock.clone(), AdlinkConfig::new(DEVICE)).await;
    ctrl.load_one(1, 0.5, 1, 0.0).await.unwrap();
    mock.fail_next_starts(3);
    ctrl.start_all().await.unwrap();
    assert_eq!(mock.start_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn points_per_step_is_ignored_in_software_mode() {
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut ctrl = setup(mock.clone(), AdlinkConfig::new(DEVICE)).await;
    ctrl.set_par("PointsPerStep", json!(5)).unwrap();

    ctrl.load_one(1, 0.1, 1, 0.0).await.unwrap();
    assert_eq!(mock.trigger_config().unwrap().num_triggers, 1);
}

#[tokio::test(start_paused = true)]
async fn abort_stops_the_card() {
    let mock = Arc::new(MockAiDevice::new(DEVICE).with_sample_rate(1000.0));
    let mut ctrl = setup(mock.clone(), AdlinkConfig::new(DEVICE)).await;
    start_step(&mut ctrl, 1.0).await;

    ctrl.abort_one(1).await.unwrap();
    assert_eq!(mock.state().await.unwrap(), HwState::Standby);
    assert_eq!(ctrl.last_index_read(), -1);

    // Aborting an idle card does not stop it again
    let stops = mock.stop_count();
    ctrl.abort_one(1).await.unwrap();
    assert_eq!(mock.stop_count(), stops);
}
