use serde::{Deserialize, Serialize};

/// A sub-device reported by the `devicelist` service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Device {
    pub dev_id: u32,
    pub dev_sn: String,
    pub dev_name: String,
    pub dev_model: String,
    pub dev_type: u32,
    pub link_status: i64,
    pub init_status: i64,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub dev_code: Option<i64>,
    // sic, this is how the device spells it
    #[serde(default)]
    pub dev_procotol: Option<i64>,
    #[serde(default)]
    pub inv_type: Option<i64>,
    #[serde(default)]
    pub port_name: Option<String>,
    #[serde(default)]
    pub phys_addr: Option<String>,
    #[serde(default)]
    pub logc_addr: Option<String>,
    #[serde(default)]
    pub dev_special: Option<String>,
}

impl Device {
    /// Strips everything but ASCII alphanumerics from model and serial, so
    /// both can be embedded in topics and identifiers.
    pub fn sanitize(&mut self) {
        self.dev_model = alphanumeric(&self.dev_model);
        self.dev_sn = alphanumeric(&self.dev_sn);
    }

    /// `<model>_<serial>`, optionally with the serial replaced by an alias.
    pub fn slug(&self, serial_alias: Option<&str>) -> String {
        format!(
            "{}_{}",
            self.dev_model,
            serial_alias.unwrap_or(&self.dev_sn)
        )
    }
}

fn alphanumeric(s: &str) -> String {
    s.chars().filter(char::is_ascii_alphanumeric).collect()
}

#[cfg(test)]
pub(crate) fn test_device(dev_id: u32, dev_sn: &str, dev_type: u32) -> Device {
    Device {
        dev_id,
        dev_sn: dev_sn.into(),
        dev_name: format!("Device {dev_id}"),
        dev_model: "SH10RT".into(),
        dev_type,
        link_status: 1,
        init_status: 1,
        id: None,
        dev_code: None,
        dev_procotol: None,
        inv_type: None,
        port_name: None,
        phys_addr: None,
        logc_addr: None,
        dev_special: None,
    }
}
