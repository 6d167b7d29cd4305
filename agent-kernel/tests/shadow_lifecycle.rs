use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_config::{AgentTimings, ArchiveConfig, PreloadConfig, ServiceConfig, ServiceTimings, TopicConfig};
use agent_kernel::{
    AgentShadow, InMemoryBus, ShadowContext, StateId, TransitionRecord, Transport,
};
use agent_memory::{LogEntry, MessageKind};
use agent_primitives::{Gid, Health, LogLevel, StatType};
use bytes::Bytes;
use serde_json::{Value, json};

const ONBOARDING_TOPIC: &str = "/hippodamia/onboarding/550e8400";

fn config() -> ServiceConfig {
    ServiceConfig {
        topics: TopicConfig {
            activity_base: "/hippodamia".into(),
            command_end: "/hippodamia/commands/end".into(),
            command_reonboarding: "/hippodamia/commands/reonboarding".into(),
            command_ping_on_request: "/hippodamia/commands/ping".into(),
            command_config_on_request: "/hippodamia/commands/config".into(),
            command_runtime_on_request: "/hippodamia/commands/runtime".into(),
            heartbeat: "/hippodamia/heartbeat".into(),
        },
        service_timings: ServiceTimings {
            onboarding_timeout: Some(Duration::from_secs(30)),
            active_timeout: Some(Duration::from_secs(60)),
            inactive_timeout: Some(Duration::from_secs(120)),
        },
        agent_timings: AgentTimings::default(),
        archive: ArchiveConfig::default(),
    }
}

fn onboarding_request() -> Value {
    json!({
        "uuid": "550e8400-e29b-11d4-a716-446655440000",
        "onboarding-topic": ONBOARDING_TOPIC,
        "protocol-version": 1,
        "timestamp": "2026-10-19T08:00:00Z",
        "identifier": {
            "type": "copreus",
            "module": "copreus.drivers.dht",
            "version": "0.4.0",
            "name": "climate",
            "location": "flat",
            "room": "kitchen",
            "device": "dht22",
            "description": "temperature and humidity",
            "host-name": "rpi-kitchen",
            "node-id": "00-07-E9-AB-CD-EF",
            "ips": ["192.168.0.17"],
            "config-hash": "cf23df2207d99a74fbe169e3eba035e633b65d94"
        }
    })
}

struct Harness {
    bus: Arc<InMemoryBus>,
    shadow: AgentShadow,
}

impl Harness {
    fn spontaneous(gid: &str) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let context = ShadowContext::new(config(), bus.clone()).unwrap();
        let shadow = AgentShadow::new(&context, Some(gid), None).unwrap();
        shadow.start().unwrap();
        Self { bus, shadow }
    }

    fn preloaded(gid: &str, necessity: &str) -> Self {
        let bus = Arc::new(InMemoryBus::new());
        let context = ShadowContext::new(config(), bus.clone()).unwrap();
        let preload = PreloadConfig {
            gid: Some(gid.into()),
            necessity: Some(necessity.into()),
            ..PreloadConfig::default()
        };
        let shadow = AgentShadow::new(&context, None, Some(&preload)).unwrap();
        shadow.start().unwrap();
        Self { bus, shadow }
    }

    async fn onboard(&self, session: u64) {
        self.shadow
            .process_onboarding_request(&onboarding_request(), session)
            .unwrap();
        wait_for(|| self.shadow.get_state_id() == StateId::Active).await;
    }

    fn send(&self, topic: &str, payload: Value) {
        self.bus
            .publish(topic, Bytes::from(payload.to_string()))
            .unwrap();
    }

    fn ping(&self, session: u64) {
        let topic = self.shadow.activity_topics().ping.clone();
        self.send(&topic, json!({"session": session, "service-uptime": 42.0}));
    }
}

/// Yields to the runtime until `condition` holds, advancing the paused clock
/// in small steps.
async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "condition not reached");
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn onboarding_request_completes_handshake() {
    let harness = Harness::spontaneous("42");
    assert_eq!(harness.shadow.get_state_id(), StateId::Onboarding);
    assert!(!harness.shadow.is_receiving());

    harness.onboard(7).await;

    let responses = harness.bus.published_on(ONBOARDING_TOPIC);
    assert_eq!(responses.len(), 1);
    let response: Value = serde_json::from_slice(&responses[0]).unwrap();
    assert_eq!(response["gid"], "42");
    assert_eq!(response["session"], 7);
    assert_eq!(response["uuid"], "550e8400-e29b-11d4-a716-446655440000");
    assert_eq!(response["topics-activity"]["ping"], "/hippodamia/42/ping");
    assert_eq!(response["topics-commands"]["reonboarding"], "/hippodamia/commands/reonboarding");
    assert_eq!(response["timings"]["expect-heartbeat"], 120);

    assert!(harness.shadow.is_receiving());
    for (_, topic) in harness.shadow.activity_topics().iter() {
        assert_eq!(harness.bus.subscriber_count(topic), 1, "{topic}");
    }
    assert_eq!(harness.shadow.health(), Health::Green);
    assert_eq!(harness.shadow.properties().identity().host_name.as_deref(), Some("rpi-kitchen"));
}

#[tokio::test(start_paused = true)]
async fn liveness_keeps_the_agent_active() {
    let harness = Harness::spontaneous("42");
    harness.onboard(1).await;

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(50)).await;
        harness.ping(1);
    }
    settle().await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Active);
    assert!(harness.bus.published_on("/hippodamia/commands/reonboarding").is_empty());
    assert_eq!(harness.shadow.properties().service_uptime(), Some(42.0));
}

#[tokio::test(start_paused = true)]
async fn silence_then_traffic_resuscitates() {
    let harness = Harness::spontaneous("42");
    harness.onboard(1).await;

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Active);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Inactive);
    assert_eq!(harness.shadow.health(), Health::Yellow);

    let topic = harness.shadow.activity_topics().runtime.clone();
    harness.send(&topic, json!({"service-uptime": 61.0}));
    wait_for(|| harness.shadow.get_state_id() == StateId::Active).await;
    assert_eq!(harness.shadow.health(), Health::Green);
}

#[tokio::test(start_paused = true)]
async fn prolonged_silence_reaches_error() {
    let harness = Harness::spontaneous("42");
    harness.onboard(1).await;

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Inactive);
    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Error);

    assert_eq!(harness.shadow.health(), Health::Red);
    let general = harness.shadow.get_string_stats(StatType::General);
    assert!(general.contains(r#""health": "RED""#), "{general}");
    assert!(general.contains(r#""id": "ERROR""#), "{general}");

    // late traffic brings a missing agent back
    harness.ping(1);
    wait_for(|| harness.shadow.get_state_id() == StateId::Active).await;
}

#[tokio::test(start_paused = true)]
async fn missed_onboarding_deadline_reaches_error() {
    let harness = Harness::spontaneous("42");
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Onboarding);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Error);
    assert!(harness.bus.published_on(ONBOARDING_TOPIC).is_empty());

    // a late onboarding request is still honoured
    harness.onboard(3).await;
    assert_eq!(harness.bus.published_on(ONBOARDING_TOPIC).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn archivation_is_idempotent_and_final() {
    let harness = Harness::spontaneous("42");
    harness.onboard(1).await;

    harness.shadow.prepare_for_archivation().unwrap();
    assert_eq!(harness.shadow.get_state_id(), StateId::Archived);
    assert!(!harness.shadow.state_machine().is_running());
    assert!(!harness.shadow.is_receiving());
    for (_, topic) in harness.shadow.activity_topics().iter() {
        assert_eq!(harness.bus.subscriber_count(topic), 0, "{topic}");
    }

    harness.shadow.prepare_for_archivation().unwrap();
    assert_eq!(harness.shadow.get_state_id(), StateId::Archived);

    // traffic after archivation changes nothing
    assert!(harness.shadow.process_onboarding_request(&onboarding_request(), 2).is_err());
    assert_eq!(harness.shadow.properties().session(), Some(1));
    assert_eq!(
        harness.shadow.message_archive().counter(MessageKind::OnboardingRequest),
        1
    );
    assert_eq!(harness.bus.published_on(ONBOARDING_TOPIC).len(), 1);
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Archived);
}

#[tokio::test(start_paused = true)]
async fn end_message_offboards_and_stops_reception() {
    let harness = Harness::spontaneous("42");
    harness.onboard(1).await;

    let topic = harness.shadow.activity_topics().end.clone();
    harness.send(&topic, json!({"reason": "shutdown"}));
    wait_for(|| harness.shadow.get_state_id() == StateId::Stopped).await;
    assert!(!harness.shadow.is_receiving());
    assert_eq!(harness.bus.subscriber_count(&topic), 0);
    assert_eq!(harness.shadow.health(), Health::Green);

    let pings = harness.shadow.message_archive().counter(MessageKind::Ping);
    harness.ping(1);
    settle().await;
    assert_eq!(harness.shadow.message_archive().counter(MessageKind::Ping), pings);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Stopped);

    harness.onboard(2).await;
    assert!(harness.shadow.is_receiving());
}

#[tokio::test(start_paused = true)]
async fn stop_offboards_when_possible() {
    let harness = Harness::spontaneous("42");
    harness.onboard(1).await;
    harness.shadow.stop();
    assert_eq!(harness.shadow.get_state_id(), StateId::Stopped);
    assert!(!harness.shadow.is_receiving());
    harness.shadow.stop();

    let archived = Harness::spontaneous("43");
    archived.shadow.prepare_for_archivation().unwrap();
    archived.shadow.stop();
    assert_eq!(archived.shadow.get_state_id(), StateId::Archived);
}

#[tokio::test(start_paused = true)]
async fn session_mismatch_triggers_reonboarding_request() {
    let harness = Harness::spontaneous("42");
    harness.onboard(5).await;
    harness.ping(4);
    settle().await;

    let requests = harness.bus.published_on("/hippodamia/commands/reonboarding");
    assert_eq!(requests.len(), 1);
    let request: Value = serde_json::from_slice(&requests[0]).unwrap();
    assert_eq!(request, json!({"request": "reonboarding", "gid": "42"}));
    assert_eq!(harness.shadow.get_state_id(), StateId::Active);
}

#[tokio::test(start_paused = true)]
async fn required_preloaded_agent_goes_missing() {
    let harness = Harness::preloaded("boiler", "required");
    assert_eq!(harness.shadow.get_state_id(), StateId::Inactive);
    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Error);

    harness.shadow.stop();
    assert_eq!(harness.shadow.get_state_id(), StateId::Stopped);
    assert_eq!(harness.shadow.health(), Health::Yellow);
}

#[tokio::test(start_paused = true)]
async fn optional_preloaded_agent_may_stay_away() {
    let harness = Harness::preloaded("garden", "optional");
    tokio::time::sleep(Duration::from_secs(3_600)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Inactive);

    harness.onboard(1).await;
    assert_eq!(harness.shadow.health(), Health::Green);
}

#[tokio::test(start_paused = true)]
async fn reonboarding_leaves_a_single_timer() {
    let harness = Harness::spontaneous("42");
    harness.onboard(1).await;
    for session in 2..=4 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        harness
            .shadow
            .process_onboarding_request(&onboarding_request(), session)
            .unwrap();
        settle().await;
    }
    assert_eq!(harness.shadow.properties().session(), Some(4));
    assert_eq!(harness.bus.published_on(ONBOARDING_TOPIC).len(), 4);

    tokio::time::sleep(Duration::from_secs(55)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Active);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.shadow.get_state_id(), StateId::Inactive);

    let stats = harness.shadow.state_machine().get_stats();
    assert_eq!(stats.transitions(), 5);
    assert_eq!(stats.stale_timeouts(), 0);
    let last = stats.history.last().unwrap();
    assert_eq!((last.from, last.to), (StateId::Active, StateId::Inactive));
}

#[tokio::test(start_paused = true)]
async fn observers_follow_transitions_and_logs() {
    let harness = Harness::spontaneous("42");
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&transitions);
    harness
        .shadow
        .register_state_transition_event_observer(Arc::new(move |gid: &Gid, record: &TransitionRecord| {
            sink.lock().unwrap().push((gid.to_string(), record.from, record.to));
        }));
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    harness
        .shadow
        .register_log_event_observer(Arc::new(move |entry: &LogEntry| {
            sink.lock().unwrap().push(entry.level);
        }));

    harness.onboard(1).await;
    let topic = harness.shadow.activity_topics().logger.clone();
    harness.send(&topic, json!({"level": "CRITICAL", "message": "sensor on fire"}));
    settle().await;

    assert_eq!(
        *transitions.lock().unwrap(),
        vec![("42".to_owned(), StateId::Onboarding, StateId::Active)]
    );
    assert_eq!(*lines.lock().unwrap(), vec![LogLevel::Critical]);
    assert_eq!(harness.shadow.health(), Health::Red);
    assert_eq!(harness.shadow.acknowledge_log(), 1);
    assert_eq!(harness.shadow.health(), Health::Green);
}
