use crate::sources::winet::Device;
use crate::status::StatusTable;

/// Receives the device registry and status table after every polling round.
/// Readings still marked dirty have changed since the previous round.
pub trait MetricPublisher {
    fn publish(&mut self, devices: &[Device], status: &StatusTable);
}
