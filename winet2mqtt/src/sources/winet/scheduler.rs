use super::device::Device;
use super::stages::{stages_for, Stage};
use std::collections::VecDeque;

/// Outcome of one scheduler invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// A request for this device is still outstanding; nothing was sent.
    Busy(u32),
    /// Send the next stage for this device. It is now in flight.
    Poll { dev_id: u32, stage: Stage },
    /// The last stage of the last device finished.
    RoundComplete,
    /// Nothing is registered yet.
    Idle,
}

/// Round-robin over the registered devices, one stage request at a time.
#[derive(Debug, Default)]
pub struct Scheduler {
    current: Option<u32>,
    stages: VecDeque<Stage>,
    in_flight: Option<u32>,
}

impl Scheduler {
    pub fn next(&mut self, devices: &[Device]) -> Tick {
        if let Some(dev_id) = self.in_flight {
            return Tick::Busy(dev_id);
        }

        match self.current {
            None => {
                let Some(first) = devices.first() else {
                    return Tick::Idle;
                };
                self.activate(first);
            }
            Some(current) if self.stages.is_empty() => {
                let next = devices
                    .iter()
                    .position(|d| d.dev_id == current)
                    .map_or(0, |i| i + 1);
                match devices.get(next) {
                    Some(device) => self.activate(device),
                    None => {
                        self.current = None;
                        return Tick::RoundComplete;
                    }
                }
            }
            Some(_) => {}
        }

        let (Some(dev_id), Some(stage)) = (self.current, self.stages.pop_front()) else {
            return Tick::Idle;
        };
        self.in_flight = Some(dev_id);
        Tick::Poll { dev_id, stage }
    }

    fn activate(&mut self, device: &Device) {
        self.current = Some(device.dev_id);
        self.stages = stages_for(device.dev_type).iter().copied().collect();
    }

    /// Clears and returns the device whose reply just arrived.
    pub fn take_in_flight(&mut self) -> Option<u32> {
        self.in_flight.take()
    }

    pub fn in_flight(&self) -> Option<u32> {
        self.in_flight
    }

    /// Whether a round is in progress.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
