//! The supervisor: one owning value, one thread, one loop.
//!
//! Each [`Supervisor::tick`] drains at most one packet per producer channel,
//! polls the event line the mission is waiting for, takes at most one
//! inbound packet from the link and runs whatever periodic work is due.
//! Nothing in a tick blocks except debounce sampling and operator commands,
//! and the burn-wire is dropped before any command that may take long.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pioneers_frame::{decode, ids, ClearScope, Command, Node, Packet};
use pioneers_producer::{ProducerHandle, StopPolicy};
use pioneers_transport::{RemoteLink, SerialLink, TcpLink, TransportError};
use tracing::{debug, error, info, warn};

use crate::burnwire::{BurnCompletion, BurnWire};
use crate::camera::{Camera, CommandCamera, NoCamera};
use crate::clock::{Clock, Periodic};
use crate::config::{FlightConfig, LinkConfig, PinConfig, ProducerSpec, StorageConfig};
use crate::gpio::{Debounce, GpioError, InputPin, OutputPin, SysfsGpio};
use crate::host::{clear_files, HostControl, ShellHost};
use crate::peerlog::PeerLog;
use crate::selftest::{self, CheckResult};
use crate::state::{Action, Event, Mission, MissionState, Signal};
use crate::status::{Severity, StatusReporter};

/// The pins the supervisor owns.
pub struct Hardware {
    pub lift_off: Box<dyn InputPin>,
    pub start_of_experiment: Box<dyn InputPin>,
    pub start_of_data_storage: Box<dyn InputPin>,
    pub burn_wire: Box<dyn OutputPin>,
}

impl Hardware {
    /// Export the configured pins through sysfs. The burn-wire comes up low.
    pub fn sysfs(pins: &PinConfig) -> Result<Self, GpioError> {
        let gpio = SysfsGpio::new(&pins.sysfs_root);
        Ok(Self {
            burn_wire: Box::new(gpio.output(pins.burn_wire)?),
            lift_off: Box::new(gpio.input(pins.lift_off)?),
            start_of_experiment: Box::new(gpio.input(pins.start_of_experiment)?),
            start_of_data_storage: Box::new(gpio.input(pins.start_of_data_storage)?),
        })
    }
}

/// Read the flight-mode strap once, if one is configured. A strap pulled low
/// enables flight mode.
pub fn read_flight_mode_strap<C: Clock>(
    pins: &PinConfig,
    debounce: &Debounce,
    clock: &C,
) -> Result<Option<bool>, GpioError> {
    let Some(pin) = pins.flight_mode_strap else {
        return Ok(None);
    };
    let mut input = SysfsGpio::new(&pins.sysfs_root).input(pin)?;
    debounce.asserted(&mut input, clock).map(Some)
}

/// Build the configured link, if any. Nothing is opened until `connect`.
pub fn link_from_config(link: &LinkConfig) -> Option<Box<dyn RemoteLink>> {
    match link {
        LinkConfig::None => None,
        LinkConfig::TcpServer { address } => Some(Box::new(TcpLink::server(address.clone()))),
        LinkConfig::TcpClient { address } => Some(Box::new(TcpLink::client(address.clone()))),
        LinkConfig::Serial { path, baud } => Some(Box::new(SerialLink::new(path.clone(), *baud))),
    }
}

pub fn camera_from_config(config: &FlightConfig) -> Box<dyn Camera> {
    match &config.camera.command {
        Some(argv) if !argv.is_empty() => Box::new(CommandCamera::new(
            argv.clone(),
            &config.storage.video_dir,
            config.timing.stop_policy(),
        )),
        _ => Box::new(NoCamera),
    }
}

/// Why [`Supervisor::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Termination signal.
    Stopped,
    Reboot,
    Shutdown,
    /// Rebuilt; the caller should start the new binary.
    Restart,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Producer packets sent on the link.
    pub forwarded: u64,
    /// Producer packets the link could not take.
    pub link_dropped: u64,
    /// Inbound non-command packets written to the peer log.
    pub peer_packets: u64,
    pub commands: u64,
    /// Inbound packets that failed to decode or parse.
    pub malformed: u64,
    pub restarts: u64,
}

#[derive(Debug)]
struct ProducerSlot {
    spec: ProducerSpec,
    handle: Option<ProducerHandle>,
}

pub struct Supervisor<C: Clock> {
    clock: C,
    node: Node,
    mission: Mission,
    debounce: Debounce,
    tick_interval: Duration,
    stop_policy: StopPolicy,
    storage: StorageConfig,

    lift_off: Box<dyn InputPin>,
    start_of_experiment: Box<dyn InputPin>,
    start_of_data_storage: Box<dyn InputPin>,
    input_fault: bool,
    burn_wire: BurnWire,

    link: Option<Box<dyn RemoteLink>>,
    camera: Box<dyn Camera>,
    host: Box<dyn HostControl>,
    worker_exe: PathBuf,
    producers: Vec<ProducerSlot>,
    producers_expected: bool,

    reporter: StatusReporter,
    peer_log: PeerLog,
    supervision: Periodic,
    heartbeat: Periodic,
    reconnect: Periodic,
    started: bool,
    outcome: Option<RunOutcome>,
    stats: SupervisorStats,
}

impl<C: Clock> Supervisor<C> {
    /// A supervisor with no link, no camera and shell host commands; use the
    /// `with_*` methods or [`Supervisor::from_config`] for the rest.
    pub fn new(config: &FlightConfig, clock: C, hardware: Hardware) -> Self {
        let timing = &config.timing;
        let worker_exe =
            std::env::current_exe().unwrap_or_else(|_| PathBuf::from(env!("CARGO_PKG_NAME")));
        let producers = config
            .producers()
            .into_iter()
            .map(|spec| ProducerSlot { spec, handle: None })
            .collect();

        Self {
            clock,
            node: config.node,
            mission: Mission::new(config.flight_mode),
            debounce: timing.debounce(),
            tick_interval: timing.tick(),
            stop_policy: timing.stop_policy(),
            storage: config.storage.clone(),
            lift_off: hardware.lift_off,
            start_of_experiment: hardware.start_of_experiment,
            start_of_data_storage: hardware.start_of_data_storage,
            input_fault: false,
            burn_wire: BurnWire::new(hardware.burn_wire, timing.burn()),
            link: None,
            camera: Box::new(NoCamera),
            host: Box::new(ShellHost::new(config.host.clone())),
            worker_exe,
            producers,
            producers_expected: false,
            reporter: StatusReporter::new(config.node),
            peer_log: PeerLog::new(config.storage.data_dir.join("peer_backup.txt")),
            supervision: Periodic::new(timing.supervision()),
            heartbeat: Periodic::new(timing.heartbeat()),
            reconnect: Periodic::new(timing.reconnect()),
            started: false,
            outcome: None,
            stats: SupervisorStats::default(),
        }
    }

    /// Everything wired from `config`: link, camera and host commands.
    pub fn from_config(config: &FlightConfig, clock: C, hardware: Hardware) -> Self {
        let mut supervisor = Self::new(config, clock, hardware).with_camera(camera_from_config(config));
        supervisor.link = link_from_config(&config.link);
        supervisor
    }

    pub fn with_link(mut self, link: Box<dyn RemoteLink>) -> Self {
        self.link = Some(link);
        self
    }

    pub fn with_camera(mut self, camera: Box<dyn Camera>) -> Self {
        self.camera = camera;
        self
    }

    pub fn with_host(mut self, host: Box<dyn HostControl>) -> Self {
        self.host = host;
        self
    }

    pub fn with_producers(mut self, specs: Vec<ProducerSpec>) -> Self {
        self.producers = specs
            .into_iter()
            .map(|spec| ProducerSlot { spec, handle: None })
            .collect();
        self
    }

    /// Binary that provides the `produce` subcommand for built-in workers.
    pub fn with_worker_exe(mut self, exe: impl Into<PathBuf>) -> Self {
        self.worker_exe = exe.into();
        self
    }

    pub fn with_burn_completion(mut self, completion: Box<dyn BurnCompletion>) -> Self {
        self.burn_wire.set_completion(completion);
        self
    }

    pub fn state(&self) -> MissionState {
        self.mission.state()
    }

    pub fn flight_mode(&self) -> bool {
        self.mission.flight_mode()
    }

    pub fn burn_wire(&self) -> &BurnWire {
        &self.burn_wire
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    /// Pids of running producers, by name.
    pub fn producer_pids(&self) -> Vec<(String, u32)> {
        self.producers
            .iter()
            .filter_map(|slot| {
                slot.handle
                    .as_ref()
                    .map(|handle| (slot.spec.name.clone(), handle.pid()))
            })
            .collect()
    }

    /// Drive the burn-wire low, announce boot and try the link once.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.burn_wire.force_low();
        self.reconnect.arm(self.clock.now());
        self.try_connect();
        info!(
            node = ?self.node,
            flight_mode = self.mission.flight_mode(),
            producers = self.producers.len(),
            "supervisor started"
        );
        self.report(Severity::Info, "boot");
    }

    /// Run until a termination request or an operator command ends the
    /// mission. The burn-wire is low and every child stopped on return.
    pub fn run(&mut self, stop: &AtomicBool) -> RunOutcome {
        self.start();
        while self.outcome.is_none() {
            if stop.load(Ordering::SeqCst) {
                info!(state = %self.mission.state(), "termination requested");
                self.outcome = Some(RunOutcome::Stopped);
                break;
            }
            self.tick();
            self.clock.sleep(self.tick_interval);
        }
        self.shutdown();
        self.outcome.unwrap_or(RunOutcome::Stopped)
    }

    /// One pass of the loop.
    pub fn tick(&mut self) {
        self.drain_producers();
        self.poll_inputs();
        self.poll_link();
        self.run_periodic();
        // Whatever ran above may have taken a while.
        self.poll_burn();
    }

    /// Terminate the mission: burn-wire low, children stopped, link closed.
    /// Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.burn_wire.force_low();
        if self.mission.state() != MissionState::Terminated {
            self.apply(Event::Terminate);
        }
        if let Some(link) = self.link.as_mut() {
            link.close();
        }
    }

    /// Execute an operator command synchronously.
    pub fn dispatch(&mut self, command: Command) {
        self.stats.commands += 1;
        info!(%command, state = %self.mission.state(), "command received");
        match command {
            Command::Reboot => {
                self.terminate(RunOutcome::Reboot);
                if let Err(err) = self.host.reboot() {
                    self.report(Severity::Fatal, &format!("reboot: {err}"));
                }
            }
            Command::Shutdown => {
                self.terminate(RunOutcome::Shutdown);
                if let Err(err) = self.host.shutdown() {
                    self.report(Severity::Fatal, &format!("shutdown: {err}"));
                }
            }
            Command::SetFlightMode(on) => {
                self.mission.set_flight_mode(on);
                self.report(Severity::Info, if on { "flight on" } else { "flight off" });
            }
            Command::SelfTest => {
                self.cut_burn("test");
                let checks = self.self_test();
                for check in &checks {
                    self.report(check.status.severity(), &check.short());
                }
                let overall = selftest::overall(&checks);
                self.report(overall.severity(), &format!("test {}", overall.as_str()));
            }
            Command::ClearFiles(scope) => self.clear(scope),
            Command::RebuildAndRestart => {
                // Restart even if the rebuild fails; the old binary comes back.
                self.terminate(RunOutcome::Restart);
                if let Err(err) = self.host.rebuild() {
                    warn!(error = %err, "rebuild failed");
                    self.report(Severity::Error, "rebuild failed");
                }
            }
        }
    }

    /// Delete stored files. Running producers are stopped first and started
    /// again afterwards with fresh files; the peer log is kept.
    fn clear(&mut self, scope: ClearScope) {
        self.cut_burn("clear");
        let touches_data = matches!(scope, ClearScope::All | ClearScope::Data);
        let restart = touches_data && self.producers.iter().any(|slot| slot.handle.is_some());
        if restart {
            self.stop_running_producers();
        }

        let peer_log = self.peer_log.path().to_path_buf();
        match clear_files(&self.storage, scope, &[peer_log.as_path()]) {
            Ok(removed) => self.report(Severity::Info, &format!("clear {removed}")),
            Err(err) => {
                warn!(error = %err, "clear failed");
                self.report(Severity::Error, "clear failed");
            }
        }

        if restart && self.producers_expected {
            for index in 0..self.producers.len() {
                self.spawn_producer(index);
            }
        }
    }

    /// End a burn early ahead of work that could outlast its deadline.
    fn cut_burn(&mut self, reason: &str) {
        if self.burn_wire.is_burning() {
            self.burn_wire.force_low();
            warn!(reason, "burn-wire cut short");
            self.report(Severity::Error, &format!("burn cut {reason}"));
        }
    }

    /// Pre-flight checks against the live hardware and link.
    pub fn self_test(&mut self) -> Vec<CheckResult> {
        let mut checks = selftest::check_storage(&self.storage);
        checks.push(selftest::check_input("LO", self.lift_off.as_mut()));
        checks.push(selftest::check_input("SOE", self.start_of_experiment.as_mut()));
        checks.push(selftest::check_input("SODS", self.start_of_data_storage.as_mut()));
        checks.push(selftest::check_link(self.link.as_deref()));
        for slot in &self.producers {
            checks.push(selftest::check_producer(&slot.spec, &self.worker_exe));
        }
        checks
    }

    fn terminate(&mut self, outcome: RunOutcome) {
        self.burn_wire.force_low();
        self.apply(Event::Terminate);
        self.outcome.get_or_insert(outcome);
    }

    fn apply(&mut self, event: Event) {
        let from = self.mission.state();
        let (to, actions) = self.mission.update(event);
        if actions.is_empty() {
            return;
        }
        info!(from = %from, state = %to, "mission state changed");
        for action in actions {
            self.run_action(action);
        }
    }

    fn run_action(&mut self, action: Action) {
        let now = self.clock.now();
        debug!(?action, "running transition action");
        match action {
            Action::ForceBurnLow => self.burn_wire.force_low(),
            Action::FireBurnWire => {
                if let Err(err) = self.burn_wire.fire(now) {
                    self.report(Severity::Fatal, &format!("burn: {err}"));
                }
            }
            Action::StartCamera => {
                if let Err(err) = self.camera.start() {
                    warn!(error = %err, "camera failed to start");
                    self.report(Severity::Error, "camera failed");
                }
            }
            Action::StopCamera => {
                if let Err(err) = self.camera.stop() {
                    warn!(error = %err, "camera failed to stop");
                }
            }
            Action::StartProducers => {
                self.producers_expected = true;
                for index in 0..self.producers.len() {
                    self.spawn_producer(index);
                }
            }
            Action::StopProducers => self.stop_producers(),
            Action::StartSupervision => self.supervision.arm(now),
            Action::StopSupervision => self.supervision.disarm(),
            Action::StartHeartbeat => self.heartbeat.arm(now),
            Action::StopHeartbeat => self.heartbeat.disarm(),
            Action::AnnounceState => {
                let label = self.mission.state().label();
                self.report(Severity::Info, label);
            }
        }
    }

    fn spawn_producer(&mut self, index: usize) {
        let slot = &mut self.producers[index];
        let config = slot
            .spec
            .process_config(&self.worker_exe, self.node, &self.storage.data_dir);
        match ProducerHandle::spawn(config) {
            Ok(handle) => slot.handle = Some(handle),
            Err(err) => {
                let name = slot.spec.name.clone();
                slot.handle = None;
                error!(producer = %name, error = %err, "producer failed to start");
                self.report(Severity::Error, &format!("{name} spawn"));
            }
        }
    }

    fn stop_producers(&mut self) {
        self.producers_expected = false;
        self.stop_running_producers();
    }

    fn stop_running_producers(&mut self) {
        for slot in &mut self.producers {
            let Some(mut handle) = slot.handle.take() else {
                continue;
            };
            match handle.stop(&self.stop_policy) {
                Ok(liveness) => info!(producer = %slot.spec.name, ?liveness, "producer stopped"),
                Err(err) => error!(producer = %slot.spec.name, error = %err, "producer stop failed"),
            }
        }
    }

    /// Check every producer; respawn any that are gone.
    fn supervise(&mut self) {
        if !self.producers_expected || !self.mission.state().supervises_producers() {
            return;
        }
        for index in 0..self.producers.len() {
            let slot = &mut self.producers[index];
            let name = slot.spec.name.clone();
            match slot.handle.as_mut() {
                Some(handle) => {
                    if handle.check_liveness().is_running() {
                        continue;
                    }
                    match handle.exit_error() {
                        Some(err) => error!(producer = %name, error = %err, "producer exited"),
                        None => warn!(producer = %name, liveness = ?handle.liveness(), "producer exited"),
                    }
                }
                None => debug!(producer = %name, "retrying producer start"),
            }
            self.stats.restarts += 1;
            self.report(Severity::Error, &format!("{name} restart"));
            self.spawn_producer(index);
        }
    }

    fn drain_producers(&mut self) {
        for index in 0..self.producers.len() {
            let Some(handle) = self.producers[index].handle.as_mut() else {
                continue;
            };
            match handle.poll_packet() {
                Ok(Some(packet)) => self.forward(&packet),
                Ok(None) | Err(TransportError::Closed) => {}
                Err(err) => warn!(producer = %handle.name(), error = %err, "channel read failed"),
            }
        }
    }

    fn forward(&mut self, packet: &Packet) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if !link.is_connected() {
            return;
        }
        match link.send(packet) {
            Ok(()) => self.stats.forwarded += 1,
            Err(TransportError::WouldBlock) => self.stats.link_dropped += 1,
            Err(err) => {
                self.stats.link_dropped += 1;
                warn!(link = %link.describe(), error = %err, "link lost while forwarding");
                link.close();
            }
        }
    }

    fn poll_inputs(&mut self) {
        let Some(signal) = self.mission.state().awaited_signal() else {
            return;
        };
        let pin = match signal {
            Signal::LiftOff => self.lift_off.as_mut(),
            Signal::StartOfExperiment => self.start_of_experiment.as_mut(),
            Signal::StartOfDataStorage => self.start_of_data_storage.as_mut(),
        };
        match self.debounce.asserted(pin, &self.clock) {
            Ok(asserted) => {
                self.input_fault = false;
                if asserted {
                    info!(signal = signal.label(), "event line asserted");
                    self.apply(Event::Signal(signal));
                }
            }
            Err(err) => {
                if !self.input_fault {
                    self.input_fault = true;
                    error!(signal = signal.label(), error = %err, "event line unreadable");
                    self.report(Severity::Error, &format!("{} gpio", signal.label()));
                }
            }
        }
    }

    fn poll_link(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        match link.recv() {
            Ok(Some(packet)) => self.handle_inbound(&packet),
            Ok(None) => {}
            Err(err) => {
                warn!(link = %link.describe(), error = %err, "link lost");
                link.close();
            }
        }
    }

    fn handle_inbound(&mut self, packet: &Packet) {
        let message = match decode(packet) {
            Ok(message) => message,
            Err(err) => {
                self.stats.malformed += 1;
                warn!(error = %err, "dropping inbound packet");
                return;
            }
        };
        if !ids::is_command(message.id) {
            self.stats.peer_packets += 1;
            debug!(id = message.id, index = message.index, "peer packet");
            self.peer_log.record(&message);
            return;
        }
        match Command::parse(&message) {
            Ok(command) => self.dispatch(command),
            Err(err) => {
                self.stats.malformed += 1;
                warn!(error = %err, "dropping command");
                self.report(Severity::Error, "bad command");
            }
        }
    }

    fn poll_burn(&mut self) {
        if let Some(outcome) = self.burn_wire.poll(self.clock.now()) {
            self.report(Severity::Info, &format!("burn {outcome:?}"));
        }
    }

    fn run_periodic(&mut self) {
        self.poll_burn();
        let now = self.clock.now();
        if self.supervision.due(now) {
            self.supervise();
        }
        if self.heartbeat.due(now) {
            self.report(Severity::Info, &format!("hb {}", now.as_secs()));
        }
        if self.reconnect.due(now) {
            self.try_connect();
        }
    }

    fn try_connect(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if link.is_connected() {
            return;
        }
        match link.connect() {
            Ok(()) if link.is_connected() => info!(link = %link.describe(), "link up"),
            Ok(()) => debug!(link = %link.describe(), "link waiting for peer"),
            Err(err) => debug!(link = %link.describe(), error = %err, "link connect failed"),
        }
    }

    /// Log, then mirror to the link when it is up.
    fn report(&mut self, severity: Severity, text: &str) {
        let packet = match self.reporter.status(severity, text) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, "failed to build status packet");
                return;
            }
        };
        if let Some(link) = self.link.as_mut() {
            if link.is_connected() {
                if let Err(err) = link.send(&packet) {
                    debug!(error = %err, "status not sent");
                }
            }
        }
    }
}

impl<C: Clock> Drop for Supervisor<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
