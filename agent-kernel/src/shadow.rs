//! Server-side shadow of one monitored agent.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use agent_config::{
    AgentTimings, ConfigError, PreloadConfig, ServiceConfig, ServiceTimings, ShadowOrigin,
};
use agent_memory::{
    LogArchive, LogArchiveConfig, LogEntry, LogEventObserver, MessageArchive, MessageKind,
};
use agent_primitives::{Gid, Health, StatType};
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{Event, LifecycleError, LifecycleHooks, StateId, StateTable};
use crate::machine::{MachineError, StateMachine, TransitionObserver};
use crate::properties::Properties;
use crate::queue::QueueError;
use crate::stats::{GeneralStats, MicroServiceStats, ShadowStats, render};
use crate::transport::{TopicHandler, Transport, TransportError};
use crate::wire::{
    self, ActivityMessage, ActivityTopics, CommandRequest, CommandTopics, LoggerMessage,
    OnboardingRequest, OnboardingResponse, PingMessage, ValidationError,
};

/// Shared dependencies handed to every shadow.
#[derive(Clone)]
pub struct ShadowContext {
    config: Arc<ServiceConfig>,
    transport: Arc<dyn Transport>,
}

impl ShadowContext {
    /// Validates `config` and bundles it with the transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    pub fn new(config: ServiceConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            transport,
        })
    }

    /// Returns the service configuration.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

impl fmt::Debug for ShadowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Operator command addressed to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask the agent for an immediate ping.
    PingOnRequest,
    /// Ask the agent for an immediate runtime message.
    RuntimeOnRequest,
    /// Ask the agent for an immediate config message.
    ConfigOnRequest,
    /// Ask the agent to onboard again.
    Reonboarding,
    /// Ask the agent to shut down.
    End,
}

impl Command {
    /// Returns the request name carried in the payload.
    #[must_use]
    pub const fn request(self) -> &'static str {
        match self {
            Self::PingOnRequest => "ping_on_request",
            Self::RuntimeOnRequest => "runtime_on_request",
            Self::ConfigOnRequest => "config_on_request",
            Self::Reonboarding => "reonboarding",
            Self::End => "end",
        }
    }

    fn topic(self, topics: &CommandTopics) -> &str {
        match self {
            Self::PingOnRequest => &topics.ping_on_request,
            Self::RuntimeOnRequest => &topics.runtime_on_request,
            Self::ConfigOnRequest => &topics.config_on_request,
            Self::Reonboarding => &topics.reonboarding,
            Self::End => &topics.end,
        }
    }
}

/// Errors produced by an [`AgentShadow`].
#[derive(Debug, Error)]
pub enum ShadowError {
    /// Construction inputs were invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An inbound payload failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The state table could not be built.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    /// The state machine refused an operation.
    #[error(transparent)]
    Machine(#[from] MachineError),
    /// The bus refused a publish.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// An outbound payload could not be encoded.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    /// Archivation did not land in ARCHIVED.
    #[error("agent {gid}: transition to ARCHIVED failed, current state {state}")]
    Invariant {
        /// Agent identifier.
        gid: Gid,
        /// State the machine is in instead.
        state: StateId,
    },
}

/// Result alias for shadow operations.
pub type ShadowResult<T> = Result<T, ShadowError>;

/// Subscriptions to the agent's activity topics.
struct Reception {
    gid: Gid,
    transport: Arc<dyn Transport>,
    routes: Vec<(String, TopicHandler)>,
    active: AtomicBool,
}

impl Reception {
    fn activate(&self) {
        info!(gid = %self.gid, "activating message reception");
        for (topic, handler) in &self.routes {
            debug!(gid = %self.gid, topic = %topic, "subscribing");
            if let Err(err) = self.transport.subscribe(topic, Arc::clone(handler), true) {
                warn!(gid = %self.gid, topic = %topic, %err, "subscription failed");
            }
        }
        self.active.store(true, Ordering::Release);
    }

    fn deactivate(&self) {
        info!(gid = %self.gid, "deactivating message reception");
        for (topic, handler) in &self.routes {
            debug!(gid = %self.gid, topic = %topic, "unsubscribing");
            if let Err(err) = self.transport.unsubscribe(topic, handler, true) {
                warn!(gid = %self.gid, topic = %topic, %err, "unsubscription failed");
            }
        }
        self.active.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Side effects the lifecycle states trigger on the shadow.
struct ShadowHooks {
    properties: Arc<Properties>,
    log_archive: Arc<LogArchive>,
    reception: Arc<Reception>,
    transport: Arc<dyn Transport>,
    topics: ActivityTopics,
    commands: CommandTopics,
    timings: AgentTimings,
}

impl ShadowHooks {
    fn respond(&self) -> ShadowResult<()> {
        let gid = self.properties.gid();
        let identity = self.properties.identity();
        let (Some(uuid), Some(topic), Some(session)) =
            (identity.uuid, identity.onboarding_topic, self.properties.session())
        else {
            warn!(gid = %gid, "no onboarding request to respond to");
            return Ok(());
        };
        let response = OnboardingResponse {
            uuid,
            gid: gid.clone(),
            session,
            topics_activity: self.topics.clone(),
            topics_commands: self.commands.clone(),
            timings: self.timings,
        };
        let payload = serde_json::to_vec(&response)?;
        debug!(gid = %gid, topic = %topic, session, "sending onboarding response");
        self.transport.publish(&topic, Bytes::from(payload))?;
        Ok(())
    }
}

impl LifecycleHooks for ShadowHooks {
    fn send_onboarding_response(&self) {
        if let Err(err) = self.respond() {
            warn!(gid = %self.properties.gid(), %err, "onboarding response not sent");
        }
    }

    fn activate_receive(&self) {
        self.reception.activate();
    }

    fn deactivate_receive(&self) {
        self.reception.deactivate();
    }

    fn set_state_health(&self, health: Health) {
        self.properties.set_state_health(health);
    }

    fn reset_log_level(&self) {
        self.log_archive.reset_max_level();
    }
}

struct ShadowInner {
    properties: Arc<Properties>,
    topics: ActivityTopics,
    commands: CommandTopics,
    service_timings: ServiceTimings,
    message_archive: MessageArchive,
    log_archive: Arc<LogArchive>,
    reception: Arc<Reception>,
    transport: Arc<dyn Transport>,
    machine: StateMachine,
}

type Route = fn(&ShadowInner, &[u8]) -> ShadowResult<()>;

fn route(weak: &Weak<ShadowInner>, kind: MessageKind, handle: Route) -> TopicHandler {
    let weak = weak.clone();
    Arc::new(move |payload: &[u8]| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if let Err(err) = handle(inner.as_ref(), payload) {
            warn!(gid = %inner.properties.gid(), %kind, %err, "activity message rejected");
        }
    })
}

impl ShadowInner {
    fn gid(&self) -> &Gid {
        self.properties.gid()
    }

    fn handle_ping(&self, payload: &[u8]) -> ShadowResult<()> {
        debug!(gid = %self.gid(), "received ping");
        let (ping, raw) = wire::decode::<PingMessage>(MessageKind::Ping, payload)?;
        self.check_session(ping.session);
        self.message_archive.archive_ping(raw);
        self.properties.set_service_uptime(ping.service_uptime);
        self.register_liveness();
        Ok(())
    }

    fn handle_runtime(&self, payload: &[u8]) -> ShadowResult<()> {
        debug!(gid = %self.gid(), "received runtime");
        let (runtime, raw) = wire::decode::<ActivityMessage>(MessageKind::Runtime, payload)?;
        self.message_archive.archive_runtime(raw);
        self.properties.set_service_uptime(runtime.service_uptime);
        self.register_liveness();
        Ok(())
    }

    fn handle_config(&self, payload: &[u8]) -> ShadowResult<()> {
        debug!(gid = %self.gid(), "received config");
        let (config, raw) = wire::decode::<ActivityMessage>(MessageKind::Config, payload)?;
        self.message_archive.archive_config(raw);
        self.properties.set_service_uptime(config.service_uptime);
        self.register_liveness();
        Ok(())
    }

    fn handle_logger(&self, payload: &[u8]) -> ShadowResult<()> {
        debug!(gid = %self.gid(), "received logger");
        let (line, raw) = wire::decode::<LoggerMessage>(MessageKind::Logger, payload)?;
        self.message_archive.archive_logger(raw.clone());
        if let Some(uptime) = line.service_uptime {
            self.properties.set_service_uptime(uptime);
        }
        self.log_archive.add(LogEntry::new(line.level, line.message, raw));
        self.register_liveness();
        Ok(())
    }

    fn handle_end(&self, payload: &[u8]) -> ShadowResult<()> {
        debug!(gid = %self.gid(), "received end");
        let (_, raw) = wire::decode::<Value>(MessageKind::End, payload)?;
        self.message_archive.archive_end(raw);
        self.machine.operate_async(Event::Offboarding)?;
        Ok(())
    }

    /// Folds traffic into the lifecycle: pushes back the ACTIVE timeout, or
    /// raises REGULAR_MESSAGE in any other state.
    fn register_liveness(&self) {
        if self.machine.restart_timeout_if(StateId::Active) {
            debug!(gid = %self.gid(), "active; timeout restarted");
            return;
        }
        debug!(gid = %self.gid(), "not active; posting regular message");
        if let Err(err) = self.machine.operate_async(Event::RegularMessage) {
            debug!(gid = %self.gid(), %err, "regular message dropped");
        }
    }

    fn check_session(&self, session: u64) {
        let expected = self.properties.session();
        if expected == Some(session) {
            return;
        }
        warn!(gid = %self.gid(), ?expected, received = session, "session mismatch; requesting reonboarding");
        if let Err(err) = self.send_command(Command::Reonboarding) {
            warn!(gid = %self.gid(), %err, "reonboarding request not sent");
        }
    }

    fn send_command(&self, command: Command) -> ShadowResult<()> {
        let request = CommandRequest {
            request: command.request(),
            gid: self.gid(),
        };
        let payload = serde_json::to_vec(&request)?;
        let topic = command.topic(&self.commands);
        info!(gid = %self.gid(), topic, request = command.request(), "sending command");
        self.transport.publish(topic, Bytes::from(payload))?;
        Ok(())
    }
}

/// Tracks one agent: identity, archives, lifecycle, and bus subscriptions.
///
/// Constructed from a [`ShadowContext`] plus either the gid of a
/// self-announcing agent or the preload entry of an expected one. The
/// shadow is inert until [`AgentShadow::start`].
pub struct AgentShadow {
    inner: Arc<ShadowInner>,
}

impl AgentShadow {
    /// Creates a shadow from exactly one of `gid` and `preload`.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Config`] when both or neither are given, the
    /// gid is invalid, or the preload necessity is not REQUIRED/OPTIONAL.
    pub fn new(
        context: &ShadowContext,
        gid: Option<&str>,
        preload: Option<&PreloadConfig>,
    ) -> ShadowResult<Self> {
        let origin = ShadowOrigin::resolve(gid, preload)?;
        Self::with_origin(context, &origin)
    }

    /// Creates a shadow for an already resolved origin.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Lifecycle`] if the state table is inconsistent.
    pub fn with_origin(context: &ShadowContext, origin: &ShadowOrigin) -> ShadowResult<Self> {
        let config = context.config();
        let table = StateTable::lifecycle(&config.service_timings, origin.necessity())?;
        let properties = Arc::new(Properties::new(origin));
        let gid = properties.gid().clone();
        let archive = config.archive;

        let sink = Arc::clone(&properties);
        let log_archive = Arc::new(LogArchive::new(
            LogArchiveConfig::new(archive.log_capacity)
                .with_thresholds(archive.log_yellow_threshold, archive.log_red_threshold),
            Arc::new(move |health: Health| sink.set_log_health(health)),
        ));
        let topics = ActivityTopics::new(&config.topics.activity_base, &gid);
        let commands = CommandTopics::from(&config.topics);
        let transport = Arc::clone(context.transport());

        let inner = Arc::new_cyclic(|weak: &Weak<ShadowInner>| {
            let routes = vec![
                (topics.ping.clone(), route(weak, MessageKind::Ping, ShadowInner::handle_ping)),
                (topics.runtime.clone(), route(weak, MessageKind::Runtime, ShadowInner::handle_runtime)),
                (topics.config.clone(), route(weak, MessageKind::Config, ShadowInner::handle_config)),
                (topics.end.clone(), route(weak, MessageKind::End, ShadowInner::handle_end)),
                (topics.logger.clone(), route(weak, MessageKind::Logger, ShadowInner::handle_logger)),
            ];
            let reception = Arc::new(Reception {
                gid: gid.clone(),
                transport: Arc::clone(&transport),
                routes,
                active: AtomicBool::new(false),
            });
            let hooks = Arc::new(ShadowHooks {
                properties: Arc::clone(&properties),
                log_archive: Arc::clone(&log_archive),
                reception: Arc::clone(&reception),
                transport: Arc::clone(&transport),
                topics: topics.clone(),
                commands: commands.clone(),
                timings: config.agent_timings,
            });
            let machine = StateMachine::new(gid.clone(), table, hooks, archive.transition_history);
            ShadowInner {
                properties,
                topics,
                commands,
                service_timings: config.service_timings,
                message_archive: MessageArchive::new(archive.message_capacity),
                log_archive,
                reception,
                transport,
                machine,
            }
        });

        info!(
            gid = %inner.gid(),
            necessity = inner.properties.necessity().name(),
            state = %inner.machine.get_state_id(),
            "agent shadow created"
        );
        Ok(Self { inner })
    }

    /// Starts timers and the event consumer.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Machine`] outside a tokio runtime or when
    /// already started.
    pub fn start(&self) -> ShadowResult<()> {
        self.inner.machine.start()?;
        Ok(())
    }

    /// Offboards the agent if its state allows it, then stops the machine.
    pub fn stop(&self) {
        match self.inner.machine.try_operate(Event::Offboarding) {
            Ok(Some(outcome)) => debug!(gid = %self.gid(), ?outcome, "offboarded on stop"),
            Ok(None) => debug!(gid = %self.gid(), "state has no offboarding transition"),
            Err(err) => warn!(gid = %self.gid(), %err, "offboarding on stop failed"),
        }
        self.inner.machine.stop();
    }

    /// Moves the shadow to ARCHIVED, stops it, and drops all subscriptions.
    ///
    /// Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Invariant`] if the machine is not in ARCHIVED
    /// afterwards.
    pub fn prepare_for_archivation(&self) -> ShadowResult<()> {
        info!(gid = %self.gid(), "preparing for archivation");
        let outcome = self.inner.machine.operate(Event::Archive);
        let state = self.get_state_id();
        if state != StateId::Archived {
            error!(gid = %self.gid(), %state, ?outcome, "archivation did not reach ARCHIVED");
            return Err(ShadowError::Invariant {
                gid: self.gid().clone(),
                state,
            });
        }
        self.inner.machine.stop();
        self.inner.reception.deactivate();
        info!(gid = %self.gid(), "archivation prepared");
        Ok(())
    }

    /// Processes a validated onboarding request and starts `session`.
    ///
    /// The request is archived and ONBOARDING_REQUEST is queued; the
    /// handshake runs on the consumer task. A stopped shadow refuses the
    /// request before touching properties or archives.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Validation`] when required fields are missing
    /// and [`ShadowError::Machine`] when the shadow was stopped.
    pub fn process_onboarding_request(&self, message: &Value, session: u64) -> ShadowResult<()> {
        let request: OnboardingRequest = wire::interpret(MessageKind::OnboardingRequest, message)?;
        if !self.inner.machine.accepts_events() {
            warn!(gid = %self.gid(), session, "onboarding request refused by stopped shadow");
            return Err(MachineError::Queue(QueueError::Closed).into());
        }
        info!(gid = %self.gid(), session, uuid = %request.uuid, "processing onboarding request");
        self.inner.properties.apply_onboarding(&request, session);
        self.inner.message_archive.archive_request(message.clone());
        self.inner.machine.operate_async(Event::OnboardingRequest)?;
        Ok(())
    }

    /// Handles a ping payload as if received on the ping topic.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Validation`] for invalid payloads.
    pub fn handle_ping(&self, payload: &[u8]) -> ShadowResult<()> {
        self.inner.handle_ping(payload)
    }

    /// Handles a runtime payload.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Validation`] for invalid payloads.
    pub fn handle_runtime(&self, payload: &[u8]) -> ShadowResult<()> {
        self.inner.handle_runtime(payload)
    }

    /// Handles a config payload.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Validation`] for invalid payloads.
    pub fn handle_config(&self, payload: &[u8]) -> ShadowResult<()> {
        self.inner.handle_config(payload)
    }

    /// Handles a forwarded log line.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Validation`] for invalid payloads.
    pub fn handle_logger(&self, payload: &[u8]) -> ShadowResult<()> {
        self.inner.handle_logger(payload)
    }

    /// Handles an end payload; queues OFFBOARDING.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Validation`] for non-JSON payloads and
    /// [`ShadowError::Machine`] when the shadow was stopped.
    pub fn handle_end(&self, payload: &[u8]) -> ShadowResult<()> {
        self.inner.handle_end(payload)
    }

    /// Publishes `command` on its command topic.
    ///
    /// # Errors
    ///
    /// Returns [`ShadowError::Transport`] when the bus refuses the message.
    pub fn send_command(&self, command: Command) -> ShadowResult<()> {
        self.inner.send_command(command)
    }

    /// Acknowledges forwarded logs: clears the severity watermark and restores
    /// log health. Returns the number of log lines received so far.
    pub fn acknowledge_log(&self) -> u64 {
        info!(gid = %self.gid(), "log acknowledged");
        self.inner.log_archive.reset_max_level();
        self.inner.log_archive.counter()
    }

    /// Returns the agent identifier.
    #[must_use]
    pub fn gid(&self) -> &Gid {
        self.inner.gid()
    }

    /// Returns the active lifecycle state.
    #[must_use]
    pub fn get_state_id(&self) -> StateId {
        self.inner.machine.get_state_id()
    }

    /// Returns the overall health.
    #[must_use]
    pub fn health(&self) -> Health {
        self.inner.properties.health()
    }

    /// Returns the property record.
    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.inner.properties
    }

    /// Returns the message archive.
    #[must_use]
    pub fn message_archive(&self) -> &MessageArchive {
        &self.inner.message_archive
    }

    /// Returns the log archive.
    #[must_use]
    pub fn log_archive(&self) -> &LogArchive {
        &self.inner.log_archive
    }

    /// Returns the state machine.
    #[must_use]
    pub fn state_machine(&self) -> &StateMachine {
        &self.inner.machine
    }

    /// Returns the agent's activity topics.
    #[must_use]
    pub fn activity_topics(&self) -> &ActivityTopics {
        &self.inner.topics
    }

    /// Returns `true` while subscribed to the activity topics.
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        self.inner.reception.is_active()
    }

    /// Registers an observer for committed state transitions.
    pub fn register_state_transition_event_observer(&self, observer: Arc<dyn TransitionObserver>) {
        info!(gid = %self.gid(), "registering transition observer");
        self.inner.machine.register_state_transition_event_observer(observer);
    }

    /// Registers an observer for archived log lines.
    pub fn register_log_event_observer(&self, observer: Arc<dyn LogEventObserver>) {
        info!(gid = %self.gid(), "registering log observer");
        self.inner.log_archive.register_log_event_observer(observer);
    }

    /// Collects every statistics section.
    #[must_use]
    pub fn get_stats(&self) -> ShadowStats {
        let inner = &self.inner;
        let identity = inner.properties.identity();
        let messages = inner.message_archive.get_stats(false);
        let general = GeneralStats {
            micro_service: MicroServiceStats {
                name: identity.name,
                module: identity.module,
                agent_type: identity.agent_type,
                uptime: inner.properties.service_uptime(),
                session: inner.properties.session(),
                health: inner.properties.health(),
            },
            active_state: inner.machine.get_stats_active_state(),
            message_stats: messages.iter().map(|(kind, stats)| (*kind, stats.counter)).collect(),
            topics: inner.topics.clone(),
            timings: inner.service_timings,
        };
        ShadowStats {
            general,
            states: inner.machine.get_state_stats(),
            state_machine: inner.machine.get_stats(),
            properties: inner.properties.get_stats(),
            messages,
            logger: inner.log_archive.get_stats(false),
        }
    }

    /// Renders the sections selected by `stat_type` as text.
    #[must_use]
    pub fn get_string_stats(&self, stat_type: StatType) -> String {
        render(&self.get_stats(), stat_type)
    }
}

impl fmt::Debug for AgentShadow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentShadow")
            .field("gid", self.gid())
            .field("state", &self.get_state_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryBus;
    use crate::wire::fixtures;
    use agent_config::{ArchiveConfig, TopicConfig};
    use serde_json::json;
    use std::time::Duration;

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
                onboarding_timeout: Some(Duration::from_secs(60)),
                active_timeout: Some(Duration::from_secs(120)),
                inactive_timeout: Some(Duration::from_secs(180)),
            },
            agent_timings: AgentTimings::default(),
            archive: ArchiveConfig::default(),
        }
    }

    fn context() -> (ShadowContext, Arc<InMemoryBus>) {
        let bus = Arc::new(InMemoryBus::new());
        let context = ShadowContext::new(config(), bus.clone()).unwrap();
        (context, bus)
    }

    #[test]
    fn construction_requires_exactly_one_identity() {
        let (context, _) = context();
        let preload = PreloadConfig {
            gid: Some("known".into()),
            necessity: Some("required".into()),
            ..PreloadConfig::default()
        };
        assert!(matches!(
            AgentShadow::new(&context, None, None),
            Err(ShadowError::Config(ConfigError::MissingIdentity))
        ));
        assert!(matches!(
            AgentShadow::new(&context, Some("x"), Some(&preload)),
            Err(ShadowError::Config(ConfigError::AmbiguousIdentity))
        ));

        let spontaneous = PreloadConfig {
            necessity: Some("spontaneous".into()),
            ..preload.clone()
        };
        assert!(matches!(
            AgentShadow::new(&context, None, Some(&spontaneous)),
            Err(ShadowError::Config(ConfigError::InvalidNecessity(_)))
        ));

        let shadow = AgentShadow::new(&context, None, Some(&preload)).unwrap();
        assert_eq!(shadow.get_state_id(), StateId::Inactive);
        assert_eq!(shadow.health(), Health::Yellow);
    }

    #[test]
    fn session_mismatch_requests_reonboarding_and_still_archives() {
        let (context, bus) = context();
        let shadow = AgentShadow::new(&context, Some("7"), None).unwrap();
        shadow
            .handle_ping(br#"{"session": 5, "service-uptime": 12.5}"#)
            .unwrap();

        let requests = bus.published_on("/hippodamia/commands/reonboarding");
        assert_eq!(requests.len(), 1);
        let request: Value = serde_json::from_slice(&requests[0]).unwrap();
        assert_eq!(request, json!({"request": "reonboarding", "gid": "7"}));
        assert_eq!(shadow.message_archive().counter(MessageKind::Ping), 1);
        assert_eq!(shadow.properties().service_uptime(), Some(12.5));
    }

    #[test]
    fn invalid_payloads_are_not_archived() {
        let (context, _) = context();
        let shadow = AgentShadow::new(&context, Some("7"), None).unwrap();
        assert!(matches!(
            shadow.handle_runtime(b"not json"),
            Err(ShadowError::Validation(ValidationError::Malformed { .. }))
        ));
        assert!(matches!(
            shadow.handle_config(br#"{"uptime": 1}"#),
            Err(ShadowError::Validation(ValidationError::Invalid { .. }))
        ));
        let mut request = fixtures::onboarding_request();
        request.as_object_mut().unwrap().remove("uuid");
        assert!(shadow.process_onboarding_request(&request, 1).is_err());

        let archive = shadow.message_archive();
        for kind in MessageKind::ALL {
            assert_eq!(archive.counter(kind), 0, "{kind}");
        }
        assert_eq!(shadow.properties().session(), None);
    }

    #[test]
    fn commands_go_to_their_topics() {
        let (context, bus) = context();
        let shadow = AgentShadow::new(&context, Some("7"), None).unwrap();
        shadow.send_command(Command::PingOnRequest).unwrap();
        shadow.send_command(Command::End).unwrap();

        let ping: Value =
            serde_json::from_slice(&bus.published_on("/hippodamia/commands/ping")[0]).unwrap();
        assert_eq!(ping["request"], "ping_on_request");
        assert_eq!(bus.published_on("/hippodamia/commands/end").len(), 1);
    }

    #[test]
    fn severe_logs_degrade_health_until_acknowledged() {
        let (context, _) = context();
        let shadow = AgentShadow::new(&context, Some("7"), None).unwrap();
        shadow
            .handle_logger(br#"{"level": "ERROR", "message": "sensor lost"}"#)
            .unwrap();
        assert_eq!(shadow.properties().log_health(), Health::Red);
        assert_eq!(shadow.health(), Health::Red);

        assert_eq!(shadow.acknowledge_log(), 1);
        assert_eq!(shadow.properties().log_health(), Health::Green);
        assert_eq!(shadow.health(), Health::Yellow);
    }

    #[test]
    fn string_stats_select_sections() {
        let (context, _) = context();
        let shadow = AgentShadow::new(&context, Some("7"), None).unwrap();
        let general = shadow.get_string_stats(StatType::General);
        assert!(general.starts_with("general:\n"));
        assert!(!general.contains("state-machine:"));

        let all = shadow.get_string_stats(StatType::All);
        for heading in ["general:", "state-machine:", "properties: @", "logger:", "messages:"] {
            assert!(all.contains(heading), "missing {heading}");
        }
    }
}
