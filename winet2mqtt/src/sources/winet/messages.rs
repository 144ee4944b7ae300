//! Wire format of the Winet websocket API.
//!
//! Every inbound frame is an envelope `{result_code, result_msg?, result_data}`
//! whose `result_data.service` names the payload type. Responses carry no
//! request id; they are matched to requests by send order only.

use super::device::Device;
use super::stages::Stage;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub const INTERNAL_ABNORMAL: &str = "I18N_COMMON_INTER_ABNORMAL";
pub const LOGIN_SUCCESS: i64 = 1;
pub const NOTICE_IDLE_TIMEOUT: i64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Service {
    Connect,
    Login,
    DeviceList,
    Real,
    RealBattery,
    Direct,
    Notice,
}

impl Service {
    pub fn name(self) -> &'static str {
        match self {
            Service::Connect => "connect",
            Service::Login => "login",
            Service::DeviceList => "devicelist",
            Service::Real => "real",
            Service::RealBattery => "real_battery",
            Service::Direct => "direct",
            Service::Notice => "notice",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "connect" => Service::Connect,
            "login" => Service::Login,
            "devicelist" => Service::DeviceList,
            "real" => Service::Real,
            "real_battery" => Service::RealBattery,
            "direct" => Service::Direct,
            "notice" => Service::Notice,
            _ => return None,
        })
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("unknown service '{0}'")]
    UnknownService(String),
    #[error("malformed {} payload: {source}", .service.name())]
    Payload {
        service: Service,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultData {
    pub service: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub result_code: i64,
    #[serde(default)]
    pub result_msg: Option<String>,
    pub result_data: ResultData,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Envelope)
    }

    pub fn is_internal_abnormal(&self) -> bool {
        self.result_msg.as_deref() == Some(INTERNAL_ABNORMAL)
    }

    pub fn service(&self) -> Option<Service> {
        Service::from_name(&self.result_data.service)
    }

    /// Validates `result_data` against the schema of its service.
    pub fn payload(&self) -> Result<Payload, FrameError> {
        let service = self
            .service()
            .ok_or_else(|| FrameError::UnknownService(self.result_data.service.clone()))?;

        let fields = Value::Object(self.result_data.fields.clone());
        let payload_error = |source| FrameError::Payload { service, source };

        Ok(match service {
            Service::Connect => {
                Payload::Connect(serde_json::from_value(fields).map_err(payload_error)?)
            }
            Service::Login => Payload::Login(serde_json::from_value(fields).map_err(payload_error)?),
            Service::DeviceList => {
                Payload::DeviceList(serde_json::from_value(fields).map_err(payload_error)?)
            }
            Service::Real => Payload::Real(serde_json::from_value(fields).map_err(payload_error)?),
            Service::RealBattery => {
                Payload::RealBattery(serde_json::from_value(fields).map_err(payload_error)?)
            }
            Service::Direct => {
                Payload::Direct(serde_json::from_value(fields).map_err(payload_error)?)
            }
            Service::Notice => Payload::Notice,
        })
    }
}

/// Validated `result_data`, one variant per service.
#[derive(Debug, Clone)]
pub enum Payload {
    Connect(ConnectData),
    Login(LoginData),
    DeviceList(DeviceListData),
    Real(RealtimeData),
    RealBattery(RealtimeData),
    Direct(DirectData),
    Notice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectData {
    pub token: Uuid,
    pub uid: i64,
    #[serde(default)]
    pub tips_disable: Option<i64>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Only sent by newer firmware
    #[serde(default, rename = "forceModifyPasswd")]
    pub force_modify_passwd: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    #[serde(default)]
    pub token: Option<Uuid>,
    #[serde(default)]
    pub uid: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceListData {
    pub list: Vec<Device>,
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeItem {
    pub data_name: String,
    pub data_value: String,
    pub data_unit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeData {
    pub list: Vec<RealtimeItem>,
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectItem {
    pub name: String,
    pub voltage: String,
    pub voltage_unit: String,
    pub current: String,
    pub current_unit: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectData {
    pub list: Vec<DirectItem>,
    pub count: i64,
}

/// Outbound requests. `lang` and `token` are added when the packet is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect,
    Login { username: String, password: String },
    DeviceList,
    Poll { stage: Stage, dev_id: u32, nonce: i64 },
}

impl Request {
    pub fn service(&self) -> Service {
        match self {
            Request::Connect => Service::Connect,
            Request::Login { .. } => Service::Login,
            Request::DeviceList => Service::DeviceList,
            Request::Poll { stage, .. } => stage.service(),
        }
    }

    pub fn to_packet(&self, lang: &str, token: &str) -> Value {
        let mut packet = json!({
            "lang": lang,
            "token": token,
            "service": self.service().name(),
        });
        let extra = match self {
            Request::Connect => json!({}),
            Request::Login { username, password } => json!({
                "username": username,
                "passwd": password,
            }),
            Request::DeviceList => json!({
                "type": "0",
                "is_check_token": "0",
            }),
            Request::Poll { dev_id, nonce, .. } => json!({
                "dev_id": dev_id.to_string(),
                "time123456": nonce,
            }),
        };
        if let (Some(packet), Value::Object(extra)) = (packet.as_object_mut(), extra) {
            packet.extend(extra);
        }
        packet
    }
}
