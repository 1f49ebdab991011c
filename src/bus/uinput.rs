//! Linux bus emulation on top of uinput.
//!
//! There is no ViGEmBus on Linux, so each attached target becomes its own
//! uinput device laid out like an xpad-driven Xbox 360 pad. The native codes
//! mirror what ViGEmBus would answer in the same situation.

use super::{BusDriver, RawTarget};
use crate::error::{BusError, ErrorCode, VIGEM_ERROR_NONE};
use crate::report::{buttons, XusbReport, TRIGGER_MAX};
use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AbsInfo, AbsoluteAxisCode, AttributeSet, BusType, EventType, InputEvent, InputId, KeyCode,
    SynchronizationCode, SynchronizationEvent, UinputAbsSetup,
};
use std::collections::HashMap;
use std::io;

const UINPUT_PATH: &str = "/dev/uinput";
const DEVICE_NAME: &str = "Microsoft X-Box 360 pad";
const VENDOR_ID: u16 = 0x045e;
const PRODUCT_ID: u16 = 0x028e;
const VERSION: u16 = 0x0110;

const BUTTON_KEYS: [(u16, KeyCode); 11] = [
    (buttons::A, KeyCode::BTN_SOUTH),
    (buttons::B, KeyCode::BTN_EAST),
    (buttons::X, KeyCode::BTN_NORTH),
    (buttons::Y, KeyCode::BTN_WEST),
    (buttons::LEFT_SHOULDER, KeyCode::BTN_TL),
    (buttons::RIGHT_SHOULDER, KeyCode::BTN_TR),
    (buttons::BACK, KeyCode::BTN_SELECT),
    (buttons::START, KeyCode::BTN_START),
    (buttons::LEFT_THUMB, KeyCode::BTN_THUMBL),
    (buttons::RIGHT_THUMB, KeyCode::BTN_THUMBR),
    (buttons::GUIDE, KeyCode::BTN_MODE),
];

#[derive(Default)]
struct Target {
    device: Option<VirtualDevice>,
    last: XusbReport,
}

pub struct UinputBus {
    max_targets: usize,
    connected: bool,
    next_id: usize,
    targets: HashMap<usize, Target>,
}

impl UinputBus {
    pub fn new(max_targets: usize) -> Self {
        Self {
            max_targets,
            connected: false,
            next_id: 1,
            targets: HashMap::new(),
        }
    }

    fn attached(&self) -> usize {
        self.targets
            .values()
            .filter(|target| target.device.is_some())
            .count()
    }
}

impl BusDriver for UinputBus {
    fn name(&self) -> &'static str {
        "uinput"
    }

    fn connect(&mut self) -> ErrorCode {
        if self.connected {
            return BusError::BusAlreadyConnected.code();
        }
        if let Err(e) = std::fs::OpenOptions::new().write(true).open(UINPUT_PATH) {
            log::error!("Cannot open {}: {}", UINPUT_PATH, e);
            return match e.kind() {
                io::ErrorKind::NotFound => BusError::BusNotFound.code(),
                _ => BusError::BusAccessFailed.code(),
            };
        }
        self.connected = true;
        VIGEM_ERROR_NONE
    }

    fn disconnect(&mut self) {
        for target in self.targets.values_mut() {
            target.device = None;
        }
        self.connected = false;
    }

    fn target_alloc(&mut self) -> Option<RawTarget> {
        let id = self.next_id;
        self.next_id += 1;
        self.targets.insert(id, Target::default());
        Some(RawTarget::from_raw(id))
    }

    fn target_free(&mut self, target: RawTarget) {
        if self.targets.remove(&target.as_raw()).is_none() {
            log::warn!("uinput: free of unknown target {}", target.as_raw());
        }
    }

    fn target_add(&mut self, target: RawTarget) -> ErrorCode {
        if !self.connected {
            return BusError::BusInvalidHandle.code();
        }
        let attached = self.attached();
        let Some(slot) = self.targets.get_mut(&target.as_raw()) else {
            return BusError::InvalidTarget.code();
        };
        if slot.device.is_some() {
            return BusError::AlreadyConnected.code();
        }
        if attached >= self.max_targets {
            return BusError::NoFreeSlot.code();
        }
        match create_virtual_device() {
            Ok(device) => {
                slot.device = Some(device);
                slot.last = XusbReport::default();
                log::debug!("uinput: target {} attached", target.as_raw());
                VIGEM_ERROR_NONE
            }
            Err(e) => {
                log::error!("uinput: cannot create virtual pad: {}", e);
                BusError::BusAccessFailed.code()
            }
        }
    }

    fn target_remove(&mut self, target: RawTarget) -> ErrorCode {
        if !self.connected {
            return BusError::BusInvalidHandle.code();
        }
        let Some(slot) = self.targets.get_mut(&target.as_raw()) else {
            return BusError::InvalidTarget.code();
        };
        // Dropping the device closes its fd, which destroys it.
        match slot.device.take() {
            Some(_) => VIGEM_ERROR_NONE,
            None => BusError::TargetNotPluggedIn.code(),
        }
    }

    fn target_update(&mut self, target: RawTarget, report: &XusbReport) -> ErrorCode {
        if !self.connected {
            return BusError::BusInvalidHandle.code();
        }
        let Some(slot) = self.targets.get_mut(&target.as_raw()) else {
            return BusError::TargetUninitialized.code();
        };
        let Some(device) = slot.device.as_mut() else {
            return BusError::TargetNotPluggedIn.code();
        };

        let events = diff_events(&slot.last, report);
        if events.is_empty() {
            return VIGEM_ERROR_NONE;
        }
        let result = device.emit(&events).and_then(|_| {
            device.emit(&[SynchronizationEvent::new(SynchronizationCode::SYN_REPORT, 0).into()])
        });
        match result {
            Ok(()) => {
                slot.last = *report;
                VIGEM_ERROR_NONE
            }
            Err(e) => {
                log::error!("uinput: emit failed for target {}: {}", target.as_raw(), e);
                BusError::BusAccessFailed.code()
            }
        }
    }
}

fn create_virtual_device() -> io::Result<VirtualDevice> {
    let mut keys = AttributeSet::<KeyCode>::new();
    for (_, key) in BUTTON_KEYS {
        keys.insert(key);
    }

    let stick = AbsInfo::new(0, -32768, 32767, 16, 128, 0);
    let trigger = trigger_axis();
    let hat = AbsInfo::new(0, -1, 1, 0, 0, 0);

    VirtualDeviceBuilder::new()?
        .name(DEVICE_NAME)
        .input_id(InputId::new(BusType::BUS_USB, VENDOR_ID, PRODUCT_ID, VERSION))
        .with_keys(&keys)?
        .with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisCode::ABS_X, stick))?
        .with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisCode::ABS_Y, stick))?
        .with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisCode::ABS_RX, stick))?
        .with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisCode::ABS_RY, stick))?
        .with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisCode::ABS_Z, trigger))?
        .with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisCode::ABS_RZ, trigger))?
        .with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisCode::ABS_HAT0X, hat))?
        .with_absolute_axis(&UinputAbsSetup::new(AbsoluteAxisCode::ABS_HAT0Y, hat))?
        .build()
}

// Declared with the encoder's range so a full pull reads as full travel.
fn trigger_axis() -> AbsInfo {
    AbsInfo::new(0, 0, i32::from(TRIGGER_MAX), 0, 0, 0)
}

fn hat(mask: u16, negative: u16, positive: u16) -> i32 {
    i32::from(mask & positive != 0) - i32::from(mask & negative != 0)
}

/// Events needed to move a pad from `prev` to `next`, without the trailing SYN.
fn diff_events(prev: &XusbReport, next: &XusbReport) -> Vec<InputEvent> {
    let mut events = Vec::new();

    for (bit, key) in BUTTON_KEYS {
        let pressed = next.buttons & bit != 0;
        if pressed != (prev.buttons & bit != 0) {
            events.push(InputEvent::new(EventType::KEY.0, key.0, i32::from(pressed)));
        }
    }

    // xpad reports the Y axes inverted relative to XInput.
    let axes = |r: &XusbReport| {
        [
            (AbsoluteAxisCode::ABS_X, i32::from(r.thumb_lx)),
            (AbsoluteAxisCode::ABS_Y, i32::from(!r.thumb_ly)),
            (AbsoluteAxisCode::ABS_RX, i32::from(r.thumb_rx)),
            (AbsoluteAxisCode::ABS_RY, i32::from(!r.thumb_ry)),
            (AbsoluteAxisCode::ABS_Z, i32::from(r.left_trigger)),
            (AbsoluteAxisCode::ABS_RZ, i32::from(r.right_trigger)),
            (
                AbsoluteAxisCode::ABS_HAT0X,
                hat(r.buttons, buttons::DPAD_LEFT, buttons::DPAD_RIGHT),
            ),
            (
                AbsoluteAxisCode::ABS_HAT0Y,
                hat(r.buttons, buttons::DPAD_UP, buttons::DPAD_DOWN),
            ),
        ]
    };
    for ((axis, before), (_, after)) in axes(prev).into_iter().zip(axes(next)) {
        if before != after {
            events.push(InputEvent::new(EventType::ABSOLUTE.0, axis.0, after));
        }
    }

    events
}
