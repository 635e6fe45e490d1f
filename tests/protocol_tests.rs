use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::json;
use tempfile::TempDir;

use pinhub::{
    COMMANDS, CommandEngine, DEFAULT_CYCLE_MS, DuplicatePins, EdgeDispatcher, GlobalConfig,
    Message, NO_ERROR, MockLineProvider, PinRegistry, PublicSnapshot,
};

const SAMPLE: &str = r#"
AllowRename Yes

GPIO 5
    Mode=Output
    Logic=Normal
    Boot=Off
    HName="Relay A"

GPIO 6
    Mode=Output
    Logic=Invert
    Boot=On
    HName="Relay B"

GPIO 7
    Mode=Input
    Logic=Invert
    Pull=High
    HName="Door sensor"
"#;

struct Harness {
    engine: Arc<CommandEngine>,
    provider: MockLineProvider,
    edges: Arc<EdgeDispatcher>,
    config_path: PathBuf,
    _dir: TempDir,
}

fn harness(text: &str) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let config_path = dir.path().join("pinhub.conf");
    std::fs::write(&config_path, text).expect("write config");

    let config = GlobalConfig::load_from_file(&config_path, DuplicatePins::default()).unwrap();
    let provider = MockLineProvider::default();
    let edges = Arc::new(EdgeDispatcher::new(16));
    let registry = PinRegistry::bind(config, &provider, edges.clone(), &config_path).unwrap();
    let engine = Arc::new(CommandEngine::new(
        Arc::new(Mutex::new(registry)),
        "testhost",
    ));

    Harness {
        engine,
        provider,
        edges,
        config_path,
        _dir: dir,
    }
}

fn req(msg_type: &str, arg1: Option<&str>, arg2: Option<&str>) -> Message {
    Message {
        arg1: arg1.map(str::to_string),
        arg2: arg2.map(str::to_string),
        ..Message::request(msg_type)
    }
}

fn snapshot_of(resp: &Message) -> PublicSnapshot {
    serde_json::from_value(resp.state.clone().expect("response state")).expect("snapshot state")
}

#[actix_rt::test]
async fn set_on_reads_on_for_both_polarities() {
    let h = harness(SAMPLE);

    for id in ["5", "6"] {
        let resp = h.engine.execute(req("SetGPIO", Some(id), Some("On"))).await;
        assert_eq!(resp.error, NO_ERROR);
        let resp = h.engine.execute(req("ReadGPIO", Some(id), None)).await;
        assert_eq!(resp.arg2.as_deref(), Some("On"));

        let resp = h.engine.execute(req("SetGPIO", Some(id), Some("Off"))).await;
        assert_eq!(resp.error, NO_ERROR);
        let resp = h.engine.execute(req("ReadGPIO", Some(id), None)).await;
        assert_eq!(resp.arg2.as_deref(), Some("Off"));
    }

    // "On" drives opposite electrical levels for opposite wiring.
    h.engine.execute(req("SetGPIO", Some("5"), Some("On"))).await;
    h.engine.execute(req("SetGPIO", Some("6"), Some("On"))).await;
    assert_eq!(h.provider.level(5), Some(1));
    assert_eq!(h.provider.level(6), Some(0));
}

#[actix_rt::test]
async fn high_and_low_are_absolute_electrical_levels() {
    let h = harness(SAMPLE);

    for id in [5u8, 6] {
        let arg = id.to_string();
        let resp = h
            .engine
            .execute(req("SetGPIO", Some(&arg), Some("High")))
            .await;
        assert_eq!(resp.error, NO_ERROR);
        assert_eq!(h.provider.level(id), Some(1));

        h.engine.execute(req("SetGPIO", Some(&arg), Some("low"))).await;
        assert_eq!(h.provider.level(id), Some(0));
    }
}

#[actix_rt::test]
async fn toggle_twice_restores_reported_label() {
    let h = harness(SAMPLE);

    let before = h.engine.execute(req("ReadGPIO", Some("6"), None)).await;
    let flipped = h.engine.execute(req("ToggleGPIO", Some("6"), None)).await;
    assert_eq!(flipped.error, NO_ERROR);
    assert_ne!(flipped.arg2, before.arg2);

    let restored = h.engine.execute(req("ToggleGPIO", Some("6"), None)).await;
    assert_eq!(restored.arg2, before.arg2);
}

#[actix_rt::test]
async fn set_on_input_pin_fails_without_hardware_write() {
    let h = harness(SAMPLE);

    let resp = h.engine.execute(req("SetGPIO", Some("7"), Some("On"))).await;
    assert_eq!(resp.error, "Pin 7 is not an output device");
    assert!(!h.provider.ops().iter().any(|op| op.starts_with("write 7")));
}

#[actix_rt::test]
async fn unrecognized_set_value_is_rejected() {
    let h = harness(SAMPLE);

    let level_before = h.provider.level(5);
    let resp = h
        .engine
        .execute(req("SetGPIO", Some("5"), Some("maybe")))
        .await;
    assert_eq!(resp.error, "Unrecognized set value: maybe");
    assert_eq!(h.provider.level(5), level_before);
}

#[actix_rt::test]
async fn hardware_write_failure_is_reported_not_fatal() {
    let h = harness(SAMPLE);

    h.provider.fail_writes(5, true);
    let level_before = h.provider.level(5);
    let resp = h.engine.execute(req("SetGPIO", Some("5"), Some("On"))).await;
    assert_eq!(resp.error, "GPIO error: injected write failure on pin 5");
    assert_eq!(h.provider.level(5), level_before);

    // The command failed, not the server: the pin recovers once the
    // hardware does.
    h.provider.fail_writes(5, false);
    let resp = h.engine.execute(req("SetGPIO", Some("5"), Some("On"))).await;
    assert_eq!(resp.error, NO_ERROR);
    assert_eq!(h.provider.level(5), Some(1));
}

#[actix_rt::test]
async fn read_failure_leaves_pin_unsampled() {
    let h = harness(SAMPLE);

    h.provider.fail_reads(7, true);
    let resp = h.engine.execute(req("ReadGPIO", Some("7"), None)).await;
    assert!(resp.error.starts_with("GPIO error"), "{}", resp.error);

    // The registry-wide refresh skips the failing pin but samples the rest.
    let snapshot = snapshot_of(&h.engine.execute(req("GetGPIOInfo", None, None)).await);
    let unreadable = snapshot.pins.iter().find(|p| p.id == 7).unwrap();
    assert!(unreadable.value.is_none());
    assert!(
        snapshot
            .pins
            .iter()
            .filter(|p| p.id != 7)
            .all(|p| p.value.is_some())
    );
}

#[actix_rt::test]
async fn unknown_pin_is_reported() {
    let h = harness(SAMPLE);

    let resp = h.engine.execute(req("ReadGPIO", Some("12"), None)).await;
    assert_eq!(resp.error, "Pin not found: 12");
}

#[actix_rt::test]
async fn cycle_waits_then_turns_back_on() {
    let h = harness(SAMPLE);
    assert_eq!(DEFAULT_CYCLE_MS, 6000);

    let start = Instant::now();
    let resp = h
        .engine
        .execute(req("CycleGPIO", Some("5"), Some("100")))
        .await;
    assert_eq!(resp.error, NO_ERROR);
    assert!(start.elapsed().as_millis() >= 100);

    let resp = h.engine.execute(req("ReadGPIO", Some("5"), None)).await;
    assert_eq!(resp.arg2.as_deref(), Some("On"));
}

#[actix_rt::test]
async fn cycle_off_phase_failure_skips_on_phase() {
    let h = harness(SAMPLE);

    let resp = h
        .engine
        .execute(req("CycleGPIO", Some("7"), Some("50")))
        .await;
    assert_eq!(resp.error, "Pin 7 is not an output device");
    assert!(!h.provider.ops().iter().any(|op| op.starts_with("write 7")));
}

#[actix_rt::test]
async fn cycle_rejects_malformed_delay() {
    let h = harness(SAMPLE);

    let resp = h
        .engine
        .execute(req("CycleGPIO", Some("5"), Some("soon")))
        .await;
    assert!(resp.error.starts_with("Invalid value"), "{}", resp.error);
}

#[actix_rt::test]
async fn rename_persists_and_round_trips() {
    let h = harness(SAMPLE);

    let resp = h
        .engine
        .execute(req("SetUName", Some("5"), Some("Pump")))
        .await;
    assert_eq!(resp.error, NO_ERROR);

    // The new name is observable both in memory and in the persisted text.
    let snapshot = snapshot_of(&h.engine.execute(req("GetGPIOInfo", None, None)).await);
    assert_eq!(snapshot.pins[0].uname, "Pump");

    let reloaded = GlobalConfig::load_from_file(&h.config_path, DuplicatePins::default()).unwrap();
    assert_eq!(reloaded.pins[&5].uname, "Pump");
    assert_eq!(reloaded.pins[&5].hname, "Relay A");
}

#[actix_rt::test]
async fn rename_disallowed_leaves_config_untouched() {
    let h = harness("AllowRename No\n\nGPIO 5\n    Mode=Output\n    HName=\"Relay A\"\n");

    let resp = h
        .engine
        .execute(req("SetUName", Some("5"), Some("Pump")))
        .await;
    assert_eq!(resp.error, "Renaming disallowed");

    let reloaded = GlobalConfig::load_from_file(&h.config_path, DuplicatePins::default()).unwrap();
    assert_eq!(reloaded.pins[&5].uname, "GPIO5");
}

#[actix_rt::test]
async fn persistence_failure_rolls_back_nothing() {
    // Registry pointed at an unwritable path: memory must stay untouched.
    let config = GlobalConfig::parse("GPIO 5\n    Mode=Output\n", DuplicatePins::default()).unwrap();
    let provider = MockLineProvider::default();
    let registry = PinRegistry::bind(
        config,
        &provider,
        Arc::new(EdgeDispatcher::new(8)),
        "/nonexistent/dir/pinhub.conf",
    )
    .unwrap();
    let engine = CommandEngine::new(Arc::new(Mutex::new(registry)), "testhost");

    let resp = engine.execute(req("SetUName", Some("5"), Some("Pump"))).await;
    assert!(resp.error.starts_with("Persistence error"), "{}", resp.error);

    let snapshot = snapshot_of(&engine.execute(req("GetGPIOInfo", None, None)).await);
    assert_eq!(snapshot.pins[0].uname, "GPIO5");
}

#[actix_rt::test]
async fn bulk_rename_applies_to_every_supplied_pin() {
    let h = harness(SAMPLE);

    let mut request = req("SetGPIOInfo", None, None);
    request.state = Some(json!({
        "SysName": "testhost",
        "AllowRename": true,
        "Pins": [
            { "ID": 5, "UName": "Left", "UDesc": "left relay" },
            { "ID": 6, "UName": "Right", "UDesc": "right relay" },
            { "ID": 30, "UName": "Ghost", "UDesc": "not configured" }
        ]
    }));
    let resp = h.engine.execute(request).await;
    assert_eq!(resp.error, NO_ERROR);

    let snapshot = snapshot_of(&resp);
    assert_eq!(snapshot.pins[0].uname, "Left");
    assert_eq!(snapshot.pins[1].udesc, "right relay");

    let reloaded = GlobalConfig::load_from_file(&h.config_path, DuplicatePins::default()).unwrap();
    assert_eq!(reloaded.pins[&6].uname, "Right");
    assert!(!reloaded.pins.contains_key(&30));
}

#[actix_rt::test]
async fn snapshot_is_sorted_and_covers_only_configured_pins() {
    let h = harness(SAMPLE);

    let snapshot = snapshot_of(&h.engine.execute(req("GetGPIOInfo", None, None)).await);
    assert_eq!(snapshot.sys_name, "testhost");
    assert!(snapshot.allow_rename);

    let ids: Vec<u8> = snapshot.pins.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![5, 6, 7]);
    // Every pin has been sampled by the refresh that built the snapshot.
    assert!(snapshot.pins.iter().all(|p| p.value.is_some()));
    // Input pin 7 idles high with inverted wiring, so it reads Off.
    assert_eq!(
        snapshot.pins[2].value.map(|v| v.to_string()),
        Some("Off".to_string())
    );
}

#[actix_rt::test]
async fn unknown_request_type_still_reports_state() {
    let h = harness(SAMPLE);

    let resp = h.engine.execute(req("Reboot", None, None)).await;
    assert_eq!(resp.error, "Unknown request type: Reboot");
    let snapshot = snapshot_of(&resp);
    assert_eq!(snapshot.pins.len(), 3);
}

#[actix_rt::test]
async fn list_commands_returns_static_list() {
    let h = harness(SAMPLE);

    let resp = h.engine.execute(req("ListCommands", None, None)).await;
    assert_eq!(resp.error, NO_ERROR);
    let names: Vec<String> = serde_json::from_value(resp.state.unwrap()).unwrap();
    let expected: Vec<String> = COMMANDS.iter().map(|s| s.to_string()).collect();
    assert_eq!(names, expected);
}

#[actix_rt::test]
async fn input_edge_event_reaches_subscribers() {
    let h = harness(SAMPLE);

    let mut rx = h.edges.subscribe();
    // Pin 7 idles at its pull-up level; an external pull to ground is an edge.
    h.provider.set_level(7, 0);

    let event = rx.try_recv().expect("edge event");
    assert_eq!(event.pin_id, 7);
    assert_eq!(event.level, 0);

    // Inverted wiring: electrical low reads as On.
    let resp = h.engine.execute(req("ReadGPIO", Some("7"), None)).await;
    assert_eq!(resp.arg2.as_deref(), Some("On"));
}
