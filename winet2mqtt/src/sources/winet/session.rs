//! Protocol state machine of a Winet connection.
//!
//! The session does no I/O. The driver feeds it transport and timer events
//! and carries out the [`Command`]s it returns. Device registry and status
//! table outlive reconnects, everything else is per connection.

use super::config::WinetConfig;
use super::device::Device;
use super::mapping::{map_direct, map_realtime};
use super::messages::{
    ConnectData, DeviceListData, DirectData, Envelope, FrameError, LoginData, Payload,
    RealtimeData, Request, Service, LOGIN_SUCCESS, NOTICE_IDLE_TIMEOUT,
};
use super::properties::Properties;
use super::scheduler::{Scheduler, Tick};
use super::stages::is_pollable;
use super::watchdog::Watchdog;
use crate::diagnostics::{ReconnectReason, Reporter};
use crate::status::{Reading, StatusTable};
use log::{debug, error, info};
use serde_json::Value;
use std::time::Instant;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingHandshake,
    Authenticating,
    Discovering,
    Polling,
    Faulted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(Request),
    /// Every registered device went through all its stages
    RoundComplete,
    Reconnect(ReconnectReason),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("winet rejected the login (result code {0})")]
    AuthRejected(i64),
}

pub struct Session {
    lang: String,
    username: String,
    password: String,
    lookup: Properties,
    reporter: Box<dyn Reporter>,

    state: SessionState,
    token: String,
    version: Option<u8>,
    scheduler: Scheduler,
    watchdog: Watchdog,

    devices: Vec<Device>,
    status: StatusTable,
}

impl Session {
    pub fn new(config: &WinetConfig, lookup: Properties, reporter: Box<dyn Reporter>) -> Self {
        Self {
            lang: config.lang.clone(),
            username: config.username().to_string(),
            password: config.password().to_string(),
            lookup,
            reporter,
            state: SessionState::Disconnected,
            token: String::new(),
            version: None,
            scheduler: Scheduler::default(),
            watchdog: Watchdog::new(config.frequency()),
            devices: Vec::new(),
            status: StatusTable::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn status(&self) -> &StatusTable {
        &self.status
    }

    /// Called once every publisher saw the current snapshot.
    pub fn mark_delivered(&mut self) {
        self.status.mark_delivered();
    }

    /// Builds the wire packet for `request` with the current token.
    pub fn packet(&self, request: &Request) -> Value {
        request.to_packet(&self.lang, &self.token)
    }

    pub fn report_error(&mut self, category: &str, detail: &str) {
        self.reporter.error(category, detail);
    }

    pub fn report_reconnect(&mut self, reason: ReconnectReason) {
        self.reporter.reconnect(reason);
    }

    /// Drops all per-connection state. Registry and status table are kept.
    pub fn reset(&mut self) {
        self.token.clear();
        self.version = None;
        self.scheduler.reset();
        self.watchdog.reset();
        if self.state != SessionState::Faulted {
            self.state = SessionState::Disconnected;
        }
    }

    pub fn on_connecting(&mut self) {
        self.state = SessionState::Connecting;
    }

    pub fn on_open(&mut self, now: Instant) -> Vec<Command> {
        self.watchdog.arm(now);
        self.state = SessionState::AwaitingHandshake;
        vec![Command::Send(Request::Connect)]
    }

    /// Scan timer. Starts a new round when none is running, and counts a
    /// skip when the last request is still unanswered.
    pub fn on_scan_timer(&mut self) -> Vec<Command> {
        if self.state != SessionState::Polling {
            return Vec::new();
        }
        if self.scheduler.in_flight().is_some() || !self.scheduler.is_active() {
            return self.scan();
        }
        Vec::new()
    }

    pub fn on_watchdog_timer(&mut self, now: Instant) -> Vec<Command> {
        if self.watchdog.is_silent(now) {
            error!("No data from Winet for too long, reconnecting");
            return self.fault(ReconnectReason::Silence);
        }
        Vec::new()
    }

    pub fn on_frame(&mut self, text: &str, now: Instant) -> Result<Vec<Command>, SessionError> {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Invalid message: {e}: {text}");
                self.reporter.error("invalid_message", text);
                return Ok(Vec::new());
            }
        };
        self.watchdog.frame_received(now);
        debug!("received {}", envelope.result_data.service);

        if envelope.is_internal_abnormal() {
            error!("Winet disconnect: Internal Error");
            self.reporter.error("internal_error", text);
            return Ok(self.fault(ReconnectReason::InternalError));
        }

        // a rejected login may come without a token, so the result code is
        // checked before the payload
        if envelope.service() == Some(Service::Login) && envelope.result_code != LOGIN_SUCCESS {
            error!("Failed to authenticate: {text}");
            self.reporter.error("login_rejected", text);
            self.state = SessionState::Faulted;
            return Err(SessionError::AuthRejected(envelope.result_code));
        }

        let commands = match envelope.payload() {
            Ok(Payload::Connect(data)) => self.on_connect(data),
            Ok(Payload::Login(data)) => self.on_login(data),
            Ok(Payload::DeviceList(data)) => self.on_device_list(data),
            Ok(Payload::Real(data)) | Ok(Payload::RealBattery(data)) => {
                self.on_realtime(data, now)
            }
            Ok(Payload::Direct(data)) => self.on_direct(data, now),
            Ok(Payload::Notice) => self.on_notice(envelope.result_code, text),
            Err(FrameError::UnknownService(service)) => {
                error!("Received unknown message ({service}): {text}");
                self.reporter.error("unknown_message", text);
                Vec::new()
            }
            Err(e) => self.on_invalid_payload(e, text),
        };
        Ok(commands)
    }

    fn on_invalid_payload(&mut self, e: FrameError, text: &str) -> Vec<Command> {
        error!("Invalid message: {e}: {text}");
        let FrameError::Payload { service, .. } = e else {
            return Vec::new();
        };
        self.reporter
            .error(&format!("invalid_{}", service.name()), text);

        match service {
            // the reply answered the outstanding request, but its content is
            // lost and later replies can no longer be attributed safely
            Service::Real | Service::RealBattery => {
                self.scheduler.take_in_flight();
                self.fault(ReconnectReason::MalformedPollReply)
            }
            Service::Direct => {
                self.scheduler.take_in_flight();
                self.scan()
            }
            _ => Vec::new(),
        }
    }

    fn on_connect(&mut self, data: ConnectData) -> Vec<Command> {
        let version = if data.force_modify_passwd.is_some() {
            info!("Running a newer firmware version");
            2
        } else {
            info!("Running an older firmware version");
            1
        };
        self.version = Some(version);
        self.reporter.version_detected(version);

        self.token = data.token.to_string();
        self.state = SessionState::Authenticating;
        info!("Connected to Winet, logging in");

        vec![Command::Send(Request::Login {
            username: self.username.clone(),
            password: self.password.clone(),
        })]
    }

    fn on_login(&mut self, data: LoginData) -> Vec<Command> {
        let Some(token) = data.token else {
            error!("Authenticated token is missing");
            self.reporter.error("missing_token", "login");
            return Vec::new();
        };
        info!("Authenticated successfully");

        self.token = token.to_string();
        self.state = SessionState::Discovering;
        vec![Command::Send(Request::DeviceList)]
    }

    fn on_device_list(&mut self, data: DeviceListData) -> Vec<Command> {
        for mut device in data.list {
            if !is_pollable(device.dev_type) {
                info!(
                    "Skipping device: {} ({}), type {}",
                    device.dev_name, device.dev_sn, device.dev_type
                );
                continue;
            }

            device.sanitize();
            if self.devices.iter().any(|d| d.dev_sn == device.dev_sn) {
                continue;
            }
            info!("Detected device: {} ({})", device.dev_model, device.dev_sn);
            self.status.register(device.dev_id);
            self.devices.push(device);
        }

        self.state = SessionState::Polling;
        self.scan()
    }

    fn on_realtime(&mut self, data: RealtimeData, now: Instant) -> Vec<Command> {
        let readings = map_realtime(&data.list, &self.lookup);
        self.on_poll_reply(readings, now)
    }

    fn on_direct(&mut self, data: DirectData, now: Instant) -> Vec<Command> {
        let readings = map_direct(&data.list, &self.lookup);
        self.on_poll_reply(readings, now)
    }

    fn on_poll_reply(&mut self, readings: Vec<Reading>, now: Instant) -> Vec<Command> {
        let Some(dev_id) = self.scheduler.take_in_flight() else {
            error!("Received poll data without a current device");
            self.reporter.error("unexpected_poll_reply", "no device in flight");
            return Vec::new();
        };
        self.watchdog.reset_skips();

        let mut updated = 0;
        for reading in readings {
            if self.status.update(dev_id, reading, now) {
                updated += 1;
            }
        }
        debug!("device {dev_id}: {updated} readings updated");

        self.scan()
    }

    fn on_notice(&mut self, result_code: i64, text: &str) -> Vec<Command> {
        if result_code == NOTICE_IDLE_TIMEOUT {
            info!("Websocket got timed out");
            return self.fault(ReconnectReason::IdleTimeout);
        }
        error!("Received notice {result_code}: {text}");
        self.reporter.error("notice", text);
        Vec::new()
    }

    /// Runs the poll scheduler once.
    fn scan(&mut self) -> Vec<Command> {
        match self.scheduler.next(&self.devices) {
            Tick::Busy(dev_id) => {
                info!("Skipping scan, in flight device: {dev_id}");
                if self.watchdog.record_skip() {
                    error!("Watchdog triggered, reconnecting");
                    return self.fault(ReconnectReason::StuckRequest);
                }
                Vec::new()
            }
            Tick::Poll { dev_id, stage } => vec![Command::Send(Request::Poll {
                stage,
                dev_id,
                nonce: chrono::Utc::now().timestamp_millis(),
            })],
            Tick::RoundComplete => vec![Command::RoundComplete],
            Tick::Idle => {
                debug!("No devices to poll");
                Vec::new()
            }
        }
    }

    fn fault(&mut self, reason: ReconnectReason) -> Vec<Command> {
        self.state = SessionState::Faulted;
        vec![Command::Reconnect(reason)]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sources::winet::stages::Stage;
    use crate::status::Value;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    const CONNECT: &str = include_str!("../../../test/frames/connect_v2.json");
    const CONNECT_V1: &str = include_str!("../../../test/frames/connect_v1.json");
    const LOGIN: &str = include_str!("../../../test/frames/login.json");
    const DEVICE_LIST: &str = include_str!("../../../test/frames/devicelist.json");
    const REAL: &str = include_str!("../../../test/frames/real.json");
    const DIRECT: &str = include_str!("../../../test/frames/direct.json");

    #[derive(Clone, Default)]
    struct Recorder {
        errors: Rc<RefCell<Vec<String>>>,
        versions: Rc<RefCell<Vec<u8>>>,
    }

    impl Reporter for Recorder {
        fn error(&mut self, category: &str, _detail: &str) {
            self.errors.borrow_mut().push(category.to_string());
        }

        fn version_detected(&mut self, version: u8) {
            self.versions.borrow_mut().push(version);
        }
    }

    fn session() -> (Session, Recorder) {
        let recorder = Recorder::default();
        let lookup = [
            ("I18N_COMMON_TOTAL_DCPOWER", "Total DC Power"),
            ("I18N_COMMON_DEVICE_STATUS", "Running Status"),
            ("I18N_COMMON_RUNNING", "Running"),
        ]
        .into_iter()
        .collect();
        let session = Session::new(
            &WinetConfig::default(),
            lookup,
            Box::new(recorder.clone()),
        );
        (session, recorder)
    }

    fn frame(service: &str, fields: &str) -> String {
        format!(r#"{{"result_code":1,"result_msg":"success","result_data":{{"service":"{service}"{fields}}}}}"#)
    }

    fn empty_real() -> String {
        frame("real", r#","list":[],"count":0"#)
    }

    fn empty_battery() -> String {
        frame("real_battery", r#","list":[],"count":0"#)
    }

    /// Brings a session through handshake, login and discovery.
    fn polling_session() -> (Session, Recorder, Instant) {
        let (mut session, recorder) = session();
        let now = Instant::now();
        session.on_connecting();
        session.on_open(now);
        session.on_frame(CONNECT, now).unwrap();
        session.on_frame(LOGIN, now).unwrap();
        session.on_frame(DEVICE_LIST, now).unwrap();
        (session, recorder, now)
    }

    fn polled(commands: &[Command]) -> Vec<(u32, Stage)> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::Send(Request::Poll { dev_id, stage, .. }) => Some((*dev_id, *stage)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_handshake() {
        let (mut session, recorder) = session();
        let now = Instant::now();
        session.on_connecting();
        assert_eq!(session.state(), SessionState::Connecting);

        assert_eq!(session.on_open(now), vec![Command::Send(Request::Connect)]);
        assert_eq!(session.state(), SessionState::AwaitingHandshake);

        let commands = session.on_frame(CONNECT, now).unwrap();
        assert_eq!(
            commands,
            vec![Command::Send(Request::Login {
                username: "admin".into(),
                password: "pw8888".into(),
            })]
        );
        assert_eq!(session.state(), SessionState::Authenticating);
        assert_eq!(session.version(), Some(2));
        assert_eq!(*recorder.versions.borrow(), vec![2]);
        let packet = session.packet(&Request::DeviceList);
        assert_eq!(packet["token"], "3c9f6c6e-0b5d-4a5e-9a41-6f1f0d8a2b77");

        let commands = session.on_frame(LOGIN, now).unwrap();
        assert_eq!(commands, vec![Command::Send(Request::DeviceList)]);
        assert_eq!(session.state(), SessionState::Discovering);
        let packet = session.packet(&Request::DeviceList);
        assert_eq!(packet["token"], "9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d");
        assert_eq!(packet["lang"], "en_us");
    }

    #[test]
    fn test_older_firmware_version() {
        let (mut session, _) = session();
        session.on_open(Instant::now());
        session.on_frame(CONNECT_V1, Instant::now()).unwrap();
        assert_eq!(session.version(), Some(1));
    }

    #[test]
    fn test_invalid_handshake_is_dropped() {
        let (mut session, recorder) = session();
        let now = Instant::now();
        session.on_open(now);

        let commands = session
            .on_frame(&frame("connect", r#","token":"not-a-uuid","uid":1"#), now)
            .unwrap();
        assert!(commands.is_empty());
        assert_eq!(session.state(), SessionState::AwaitingHandshake);
        assert_eq!(*recorder.errors.borrow(), vec!["invalid_connect"]);

        let commands = session.on_frame("not json", now).unwrap();
        assert!(commands.is_empty());
        assert_eq!(recorder.errors.borrow()[1], "invalid_message");
    }

    #[test]
    fn test_login_rejected() {
        let (mut session, _) = session();
        let now = Instant::now();
        session.on_open(now);
        session.on_frame(CONNECT, now).unwrap();

        let rejected = r#"{"result_code":0,"result_msg":"I18N_COMMON_LOGIN_FAIL","result_data":{"service":"login"}}"#;
        let err = session.on_frame(rejected, now).unwrap_err();
        assert!(matches!(err, SessionError::AuthRejected(0)));
        assert_eq!(session.state(), SessionState::Faulted);
    }

    #[test]
    fn test_discovery_skips_unpollable_devices() {
        let (session, _, _) = polling_session();

        let serials: Vec<_> = session.devices().iter().map(|d| d.dev_sn.as_str()).collect();
        assert_eq!(serials, vec!["A2207123456", "C2301998877"]);
        assert_eq!(session.status().len(), 2);
        assert!(session.status().device(2).is_none());
        assert_eq!(session.state(), SessionState::Polling);
    }

    #[test]
    fn test_discovery_starts_polling() {
        let (mut session, _) = session();
        let now = Instant::now();
        session.on_open(now);
        session.on_frame(CONNECT, now).unwrap();
        session.on_frame(LOGIN, now).unwrap();

        let commands = session.on_frame(DEVICE_LIST, now).unwrap();
        assert_eq!(polled(&commands), vec![(1, Stage::Real)]);
    }

    #[test]
    fn test_full_round() {
        let (mut session, _, now) = polling_session();

        let mut order = vec![(1, Stage::Real)];
        let mut round_completions = 0;
        let replies = [
            REAL.to_string(),
            empty_battery(),
            DIRECT.to_string(),
            empty_real(),
        ];
        for reply in replies {
            let commands = session.on_frame(&reply, now).unwrap();
            order.extend(polled(&commands));
            round_completions += commands
                .iter()
                .filter(|c| **c == Command::RoundComplete)
                .count();
        }

        assert_eq!(
            order,
            vec![
                (1, Stage::Real),
                (1, Stage::RealBattery),
                (1, Stage::Direct),
                (3, Stage::Real),
            ]
        );
        assert_eq!(round_completions, 1);

        let hybrid = session.status().device(1).unwrap();
        assert_eq!(
            hybrid.get("total_dc_power").unwrap().value,
            Value::Number(4.52)
        );
        assert_eq!(
            hybrid.get("running_status").unwrap().value,
            Value::Text("Running".into())
        );
        assert_eq!(
            hybrid.get("mppt_total_power").unwrap().value,
            Value::Number(102.0)
        );
        assert!(session.status().device(3).unwrap().is_empty());

        // a tick after the round starts the next one
        let commands = session.on_scan_timer();
        assert_eq!(polled(&commands), vec![(1, Stage::Real)]);
    }

    #[test]
    fn test_scan_timer_waits_for_discovery() {
        let (mut session, _) = session();
        session.on_open(Instant::now());
        assert!(session.on_scan_timer().is_empty());
    }

    #[test]
    fn test_stuck_request_watchdog() {
        let (mut session, _, _) = polling_session();

        for _ in 0..5 {
            assert!(session.on_scan_timer().is_empty());
        }
        assert_eq!(
            session.on_scan_timer(),
            vec![Command::Reconnect(ReconnectReason::StuckRequest)]
        );
        assert_eq!(session.state(), SessionState::Faulted);
    }

    #[test]
    fn test_reply_resets_stuck_counter() {
        let (mut session, _, now) = polling_session();

        for _ in 0..5 {
            assert!(session.on_scan_timer().is_empty());
        }
        session.on_frame(&empty_real(), now).unwrap();
        for _ in 0..5 {
            assert!(session.on_scan_timer().is_empty());
        }
    }

    #[test]
    fn test_silence_watchdog() {
        let (mut session, _, now) = polling_session();

        assert!(session.on_watchdog_timer(now + Duration::from_secs(60)).is_empty());
        assert_eq!(
            session.on_watchdog_timer(now + Duration::from_secs(61)),
            vec![Command::Reconnect(ReconnectReason::Silence)]
        );
    }

    #[test]
    fn test_malformed_realtime_reconnects() {
        let (mut session, recorder, now) = polling_session();

        let commands = session
            .on_frame(&frame("real", r#","list":"oops","count":1"#), now)
            .unwrap();
        assert_eq!(
            commands,
            vec![Command::Reconnect(ReconnectReason::MalformedPollReply)]
        );
        assert_eq!(recorder.errors.borrow().last().unwrap(), "invalid_real");
    }

    #[test]
    fn test_malformed_direct_continues() {
        let (mut session, recorder, now) = polling_session();
        session.on_frame(&empty_real(), now).unwrap();
        session.on_frame(&empty_battery(), now).unwrap();

        let commands = session
            .on_frame(&frame("direct", r#","list":[{"name":"MPPT1"}],"count":1"#), now)
            .unwrap();
        assert_eq!(polled(&commands), vec![(3, Stage::Real)]);
        assert_eq!(recorder.errors.borrow().last().unwrap(), "invalid_direct");
    }

    #[test]
    fn test_poll_reply_without_request() {
        let (mut session, recorder, now) = polling_session();
        session.on_frame(&empty_real(), now).unwrap();
        session.on_frame(&empty_battery(), now).unwrap();
        session.on_frame(DIRECT, now).unwrap();
        session.on_frame(&empty_real(), now).unwrap();

        // round is complete, nothing is in flight
        let commands = session.on_frame(&empty_real(), now).unwrap();
        assert!(commands.is_empty());
        assert_eq!(
            recorder.errors.borrow().last().unwrap(),
            "unexpected_poll_reply"
        );
    }

    #[test]
    fn test_notices() {
        let (mut session, recorder, now) = polling_session();

        let notice = r#"{"result_code":200,"result_data":{"service":"notice"}}"#;
        assert!(session.on_frame(notice, now).unwrap().is_empty());
        assert_eq!(recorder.errors.borrow().last().unwrap(), "notice");

        let timeout = r#"{"result_code":100,"result_data":{"service":"notice"}}"#;
        assert_eq!(
            session.on_frame(timeout, now).unwrap(),
            vec![Command::Reconnect(ReconnectReason::IdleTimeout)]
        );
    }

    #[test]
    fn test_internal_abnormal_reconnects() {
        let (mut session, _, now) = polling_session();
        let abnormal = r#"{"result_code":0,"result_msg":"I18N_COMMON_INTER_ABNORMAL","result_data":{"service":"real"}}"#;
        assert_eq!(
            session.on_frame(abnormal, now).unwrap(),
            vec![Command::Reconnect(ReconnectReason::InternalError)]
        );
    }

    #[test]
    fn test_unknown_service_is_ignored() {
        let (mut session, recorder, now) = polling_session();
        let commands = session
            .on_frame(&frame("param", r#","list":[]"#), now)
            .unwrap();
        assert!(commands.is_empty());
        assert_eq!(session.state(), SessionState::Polling);
        assert_eq!(
            recorder.errors.borrow().last().unwrap(),
            "unknown_message"
        );
        // the outstanding request is untouched
        assert!(session.on_scan_timer().is_empty());
    }

    #[test]
    fn test_registry_survives_reconnect() {
        let (mut session, _, now) = polling_session();
        session.on_frame(REAL, now).unwrap();
        session.on_frame(&empty_battery(), now).unwrap();
        session.on_frame(DIRECT, now).unwrap();
        session.on_frame(&empty_real(), now).unwrap();
        session.mark_delivered();

        session.on_scan_timer();
        let commands = session.on_watchdog_timer(now + Duration::from_secs(120));
        assert_eq!(commands, vec![Command::Reconnect(ReconnectReason::Silence)]);
        session.reset();
        assert_eq!(session.version(), None);
        assert_eq!(session.packet(&Request::Connect)["token"], "");

        let now = now + Duration::from_secs(150);
        session.on_connecting();
        session.on_open(now);
        session.on_frame(CONNECT, now).unwrap();
        session.on_frame(LOGIN, now).unwrap();
        let commands = session.on_frame(DEVICE_LIST, now).unwrap();

        assert_eq!(session.devices().len(), 2);
        assert_eq!(session.status().len(), 2);
        assert_eq!(polled(&commands), vec![(1, Stage::Real)]);

        let hybrid = session.status().device(1).unwrap();
        let total = hybrid.get("total_dc_power").unwrap();
        assert_eq!(total.value, Value::Number(4.52));
        assert!(!total.dirty);
    }
}
