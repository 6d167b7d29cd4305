//! Simulated fleet: a handful of agents talk to their shadows over an
//! in-memory bus while the monitor tracks their lifecycle.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_config::{PreloadConfig, ServiceConfig};
use agent_kernel::{
    AgentShadow, InMemoryBus, ShadowContext, TracingTransitionObserver, Transport,
};
use agent_primitives::StatType;
use agent_telemetry::{TelemetryConfig, init_tracing};
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_CONFIG: &str = r#"{
    "topics": {
        "activity-base": "/fleet-sim/agents",
        "command-end": "/fleet-sim/commands/end",
        "command-reonboarding": "/fleet-sim/commands/reonboarding",
        "command-ping-on-request": "/fleet-sim/commands/ping",
        "command-config-on-request": "/fleet-sim/commands/config",
        "command-runtime-on-request": "/fleet-sim/commands/runtime",
        "heartbeat": "/fleet-sim/heartbeat"
    },
    "service-timings": {
        "onboarding-timeout": 2.0,
        "active-timeout": 3.0,
        "inactive-timeout": 4.0
    },
    "agent-timings": {
        "send-ping": 1,
        "send-runtime": 2,
        "send-config": 5,
        "expect-heartbeat": 5
    }
}"#;

#[derive(Parser, Debug)]
#[command(name = "fleet-sim", version, about = "Simulate a small agent fleet")]
struct Args {
    /// Service configuration file; a short-timeout built-in config is used otherwise.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to run the simulation.
    #[arg(long, default_value = "12")]
    seconds: u64,

    /// Section of the final statistics to print.
    #[arg(long, default_value = "general")]
    stats: StatType,

    /// Default log directive when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log: String,
}

/// Behaviour of a simulated agent.
#[derive(Debug, Clone, Copy)]
enum Behaviour {
    /// Pings until the simulation ends.
    Steady,
    /// Stops talking after a few seconds.
    Silent { after: u64 },
    /// Reports an error log line once.
    Noisy,
    /// Sends an end message after a few seconds.
    Leaving { after: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&TelemetryConfig::new(&args.log))?;

    let config = match &args.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::from_json_str(DEFAULT_CONFIG)?,
    };
    let bus = Arc::new(InMemoryBus::new());
    let context = ShadowContext::new(config, bus.clone()).context("invalid service configuration")?;

    let mut shadows = Vec::new();
    for (gid, behaviour) in [
        ("thermostat", Behaviour::Steady),
        ("doorbell", Behaviour::Silent { after: 3 }),
        ("camera", Behaviour::Noisy),
        ("sprinkler", Behaviour::Leaving { after: 4 }),
    ] {
        let shadow = Arc::new(AgentShadow::new(&context, Some(gid), None)?);
        shadow.register_state_transition_event_observer(Arc::new(TracingTransitionObserver));
        shadow.start()?;
        tokio::spawn(simulate(bus.clone(), Arc::clone(&shadow), behaviour));
        shadows.push(shadow);
    }

    let preload = PreloadConfig {
        gid: Some("boiler".into()),
        name: Some("boiler controller".into()),
        location: Some("basement".into()),
        necessity: Some("required".into()),
        ..PreloadConfig::default()
    };
    let boiler = Arc::new(AgentShadow::new(&context, None, Some(&preload))?);
    boiler.start()?;
    shadows.push(boiler);

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(args.seconds)) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            info!("interrupted");
        }
    }

    for shadow in &shadows {
        info!(gid = %shadow.gid(), state = %shadow.get_state_id(), health = shadow.health().name(), "final state");
        println!("== {} ==\n{}", shadow.gid(), shadow.get_string_stats(args.stats));
    }
    for shadow in &shadows {
        shadow.prepare_for_archivation()?;
    }
    info!(published = bus.published().len(), "simulation finished");
    Ok(())
}

async fn simulate(bus: Arc<InMemoryBus>, shadow: Arc<AgentShadow>, behaviour: Behaviour) {
    if let Err(err) = run_agent(&bus, &shadow, behaviour).await {
        warn!(gid = %shadow.gid(), %err, "simulated agent failed");
    }
}

async fn run_agent(bus: &InMemoryBus, shadow: &AgentShadow, behaviour: Behaviour) -> Result<()> {
    let gid = shadow.gid().to_string();
    let onboarding_topic = format!("/fleet-sim/onboarding/{gid}");
    let response: Arc<Mutex<Option<Value>>> = Arc::default();
    let inbox = Arc::clone(&response);
    bus.subscribe(
        &onboarding_topic,
        Arc::new(move |payload: &[u8]| {
            if let Ok(value) = serde_json::from_slice(payload) {
                *inbox.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(value);
            }
        }),
        false,
    )?;

    let request = json!({
        "uuid": Uuid::new_v4(),
        "onboarding-topic": onboarding_topic,
        "protocol-version": 1,
        "timestamp": "2026-10-19T08:00:00Z",
        "identifier": {
            "type": "fleet-sim",
            "module": format!("fleet_sim.{gid}"),
            "version": env!("CARGO_PKG_VERSION"),
            "name": gid,
            "location": "simulation",
            "room": "lab",
            "device": gid,
            "description": "simulated agent",
            "host-name": "localhost",
            "node-id": "00-00-00-00-00-00",
            "ips": ["127.0.0.1"],
            "config-hash": "0"
        }
    });
    shadow.process_onboarding_request(&request, 1)?;

    let response = loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let received = response.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(response) = received {
            break response;
        }
    };
    let session = response["session"].as_u64().context("response without session")?;
    let topic = |kind: &str| -> Result<String> {
        response["topics-activity"][kind]
            .as_str()
            .map(str::to_owned)
            .with_context(|| format!("response without {kind} topic"))
    };
    let (ping, logger, end) = (topic("ping")?, topic("logger")?, topic("end")?);
    let interval = response["timings"]["send-ping"].as_u64().unwrap_or(1);

    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    loop {
        ticker.tick().await;
        let elapsed = started.elapsed();
        let uptime = elapsed.as_secs_f64();
        match behaviour {
            Behaviour::Silent { after } if elapsed >= Duration::from_secs(after) => return Ok(()),
            Behaviour::Leaving { after } if elapsed >= Duration::from_secs(after) => {
                publish(bus, &end, &json!({"uptime": uptime}))?;
                return Ok(());
            }
            Behaviour::Noisy if elapsed.as_secs() == 2 => {
                let line = json!({"level": "ERROR", "message": "frame grabber timed out", "service-uptime": uptime});
                publish(bus, &logger, &line)?;
            }
            _ => {}
        }
        publish(bus, &ping, &json!({"session": session, "service-uptime": uptime}))?;
    }
}

fn publish(bus: &InMemoryBus, topic: &str, payload: &Value) -> Result<()> {
    bus.publish(topic, Bytes::from(payload.to_string()))?;
    Ok(())
}
