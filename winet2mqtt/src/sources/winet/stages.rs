use super::messages::Service;

/// One poll sub-request within a device's polling sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Primary telemetry
    Real,
    /// Per-string/MPPT telemetry
    Direct,
    /// Battery telemetry
    RealBattery,
}

impl Stage {
    pub fn service(self) -> Service {
        match self {
            Stage::Real => Service::Real,
            Stage::Direct => Service::Direct,
            Stage::RealBattery => Service::RealBattery,
        }
    }
}

const REAL_ONLY: &[Stage] = &[Stage::Real];
const REAL_DIRECT: &[Stage] = &[Stage::Real, Stage::Direct];
const HYBRID: &[Stage] = &[Stage::Real, Stage::RealBattery, Stage::Direct];

/// Polling stages for a device type code. Types without stages are not polled
/// and never get registered.
pub fn stages_for(dev_type: u32) -> &'static [Stage] {
    match dev_type {
        0 | 21 => REAL_DIRECT,
        35 => HYBRID,
        8 | 11 | 13 | 14 | 15 | 18 | 20 | 23 | 24 | 25 | 34 | 36 | 37 | 44 | 46 | 47 | 48 => {
            REAL_ONLY
        }
        _ => &[],
    }
}

pub fn is_pollable(dev_type: u32) -> bool {
    !stages_for(dev_type).is_empty()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hybrid_inverter_stages() {
        assert_eq!(
            stages_for(35),
            &[Stage::Real, Stage::RealBattery, Stage::Direct]
        );
    }

    #[test]
    fn test_string_inverter_stages() {
        assert_eq!(stages_for(0), &[Stage::Real, Stage::Direct]);
        assert_eq!(stages_for(21), &[Stage::Real, Stage::Direct]);
    }

    #[test]
    fn test_unknown_types_are_not_pollable() {
        assert!(is_pollable(8));
        assert!(is_pollable(48));
        assert!(!is_pollable(1));
        assert!(!is_pollable(99));
    }

    #[test]
    fn test_stage_services() {
        assert_eq!(Stage::Real.service().name(), "real");
        assert_eq!(Stage::RealBattery.service().name(), "real_battery");
        assert_eq!(Stage::Direct.service().name(), "direct");
    }
}
