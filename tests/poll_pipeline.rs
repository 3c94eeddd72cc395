//! End-to-end runs of the poll pipeline against a scripted backend

use padmapper::controller::axis::ThrottleMode;
use padmapper::controller::backend::{BackendError, DeviceDescriptor, DeviceId, DeviceMode, InputBackend, RawEvent};
use padmapper::controller::hat::HatDirection;
use padmapper::controller::input_daemon::{DaemonNotification, InputDaemon};
use padmapper::controller::registry::DeviceRegistry;
use padmapper::mapping::button::ControlOrigin;
use padmapper::mapping::engine::ActionEngine;
use padmapper::mapping::mouse::{MouseCurve, MouseMode, MouseSettings};
use padmapper::mapping::output::{ChannelOutput, OutputAction};
use padmapper::mapping::slot::{MouseDirection, Slot};
use padmapper::mapping::tuning::OutputTuningConfig;
use padmapper::mapping::turbo::TurboSettings;
use padmapper::persistence::{
    AxisConfig, ButtonConfig, DeviceProfile, DirectionButtons, IndexedButton, SetProfile, VDPadConfig,
};
use proptest::prelude::*;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Clone)]
struct ScriptedDevice {
    descriptor: DeviceDescriptor,
    game_controller: bool,
    fail_open: bool,
}

/// Shared state the test keeps after handing the backend to the daemon
#[derive(Clone, Default)]
struct Script {
    devices: Arc<Mutex<Vec<ScriptedDevice>>>,
    events: Arc<Mutex<VecDeque<RawEvent>>>,
    closed: Arc<Mutex<Vec<DeviceId>>>,
}

impl Script {
    fn push(&self, events: impl IntoIterator<Item = RawEvent>) {
        self.events.lock().expect("events").extend(events);
    }

    fn plug(&self, device: ScriptedDevice) {
        self.devices.lock().expect("devices").push(device);
    }

    fn unplug(&self, id: DeviceId) {
        self.devices
            .lock()
            .expect("devices")
            .retain(|device| device.descriptor.id != id);
    }
}

struct ScriptedBackend {
    script: Script,
}

impl ScriptedBackend {
    fn device(&self, index: usize) -> Option<ScriptedDevice> {
        self.script.devices.lock().expect("devices").get(index).cloned()
    }
}

impl InputBackend for ScriptedBackend {
    fn device_count(&mut self) -> usize {
        self.script.devices.lock().expect("devices").len()
    }

    fn device_guid(&self, index: usize) -> Option<String> {
        self.device(index).map(|device| device.descriptor.guid)
    }

    fn is_game_controller(&self, index: usize) -> bool {
        self.device(index).map_or(false, |device| device.game_controller)
    }

    fn open_device(&mut self, index: usize, mode: DeviceMode) -> Result<DeviceDescriptor, BackendError> {
        let device = self
            .device(index)
            .ok_or_else(|| BackendError::OpenFailed(format!("no device at {}", index)))?;
        if device.fail_open {
            return Err(BackendError::OpenFailed(format!("{} refused to open", device.descriptor.name)));
        }
        Ok(DeviceDescriptor {
            index,
            mode,
            ..device.descriptor
        })
    }

    fn instance_id(&self, index: usize) -> Option<DeviceId> {
        self.device(index).map(|device| device.descriptor.id)
    }

    fn poll_event(&mut self) -> Option<RawEvent> {
        self.script.events.lock().expect("events").pop_front()
    }

    fn close_device(&mut self, device: DeviceId) {
        self.script.closed.lock().expect("closed").push(device);
    }
}

fn scripted_device(id: usize, num_axes: usize, num_buttons: usize, num_hats: usize) -> ScriptedDevice {
    ScriptedDevice {
        descriptor: DeviceDescriptor {
            id: DeviceId(id),
            index: 0,
            name: format!("Scripted pad {}", id),
            guid: format!("{:032x}", id),
            mode: DeviceMode::Joystick,
            num_axes,
            num_buttons,
            num_hats,
        },
        game_controller: false,
        fail_open: false,
    }
}

fn profile(set: SetProfile) -> DeviceProfile {
    DeviceProfile {
        name: "Scripted".to_string(),
        guid: None,
        fallback: true,
        sets: vec![set],
    }
}

struct Rig {
    daemon: InputDaemon,
    script: Script,
    actions: mpsc::UnboundedReceiver<OutputAction>,
    notifications: mpsc::UnboundedReceiver<DaemonNotification>,
    start: Instant,
}

impl Rig {
    fn new(devices: Vec<ScriptedDevice>, profiles: Vec<DeviceProfile>) -> Self {
        let script = Script::default();
        for device in devices {
            script.plug(device);
        }
        let (output_tx, actions) = mpsc::unbounded_channel();
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let engine = ActionEngine::new(
            Box::new(ChannelOutput::new(output_tx)),
            OutputTuningConfig::default().into_snapshot(),
        );
        let backend = ScriptedBackend { script: script.clone() };
        let daemon = InputDaemon::new(Box::new(backend), DeviceRegistry::new(profiles, Vec::new()), engine)
            .with_notifier(notify_tx);
        Self {
            daemon,
            script,
            actions,
            notifications,
            start: Instant::now(),
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.start + Duration::from_millis(ms)
    }

    fn poll(&mut self, ms: u64, events: impl IntoIterator<Item = RawEvent>) {
        self.script.push(events);
        let now = self.at(ms);
        self.daemon.fire_due_timers(now);
        self.daemon.poll(now);
    }

    fn run_timers_until(&mut self, ms: u64) {
        for step in 0..=ms {
            self.daemon.fire_due_timers(self.at(step));
        }
    }

    fn drain(&mut self) -> Vec<OutputAction> {
        std::iter::from_fn(|| self.actions.try_recv().ok()).collect()
    }

    fn drain_notifications(&mut self) -> Vec<DaemonNotification> {
        std::iter::from_fn(|| self.notifications.try_recv().ok()).collect()
    }
}

fn key(code: u32, pressed: bool) -> OutputAction {
    OutputAction::Key { code, pressed }
}

fn axis(device: usize, axis: usize, value: i32) -> RawEvent {
    RawEvent::AxisMotion {
        device: DeviceId(device),
        axis,
        value,
    }
}

fn button(device: usize, button: usize, pressed: bool) -> RawEvent {
    RawEvent::Button {
        device: DeviceId(device),
        button,
        pressed,
    }
}

#[test]
fn axis_samples_cross_the_dead_zone() {
    let set = SetProfile {
        axes: vec![AxisConfig {
            index: 0,
            dead_zone: 8000,
            positive: ButtonConfig::keys(&[30]),
            ..Default::default()
        }],
        ..Default::default()
    };
    let mut rig = Rig::new(vec![scripted_device(1, 1, 0, 0)], vec![profile(set)]);
    rig.daemon.refresh_devices(rig.at(0));

    let mut observed = Vec::new();
    for (step, sample) in [0, 8001, 20000, 0].into_iter().enumerate() {
        rig.poll(step as u64 * 10, [axis(1, 0, sample)]);
        let state = rig
            .daemon
            .registry()
            .device(DeviceId(1))
            .and_then(|device| device.axis(0))
            .expect("axis");
        observed.push((state.is_currently_active(), state.current_distance()));
    }

    let active: Vec<bool> = observed.iter().map(|(active, _)| *active).collect();
    assert_eq!(active, vec![false, true, true, false]);
    assert!(observed[1].1 > 0.0);
    assert!(observed[2].1 > observed[1].1);
    assert_eq!(observed[3].1, 0.0);
    assert_eq!(rig.drain(), vec![key(30, true), key(30, false)]);
}

#[test]
fn constant_turbo_fires_three_extra_cycles_in_350ms() {
    let set = SetProfile {
        buttons: vec![IndexedButton {
            index: 0,
            button: ButtonConfig {
                turbo: Some(TurboSettings::constant(100)),
                ..ButtonConfig::keys(&[57])
            },
        }],
        ..Default::default()
    };
    let mut rig = Rig::new(vec![scripted_device(1, 0, 1, 0)], vec![profile(set)]);
    rig.daemon.refresh_devices(rig.at(0));

    rig.poll(0, [button(1, 0, true)]);
    rig.run_timers_until(349);
    rig.poll(350, [button(1, 0, false)]);
    rig.run_timers_until(1000);

    let actions = rig.drain();
    let downs = actions.iter().filter(|a| **a == key(57, true)).count();
    let ups = actions.iter().filter(|a| **a == key(57, false)).count();
    assert_eq!(downs, 4);
    assert_eq!(ups, 4);
    assert_eq!(actions.last(), Some(&key(57, false)));
}

#[test]
fn failed_open_is_skipped() {
    let mut broken = scripted_device(2, 2, 4, 1);
    broken.fail_open = true;
    let mut rig = Rig::new(vec![scripted_device(1, 2, 4, 1), broken], Vec::new());

    assert_eq!(rig.daemon.refresh_devices(rig.at(0)), 1);
    assert_eq!(rig.daemon.registry().len(), 1);
    assert!(rig.daemon.registry().contains(DeviceId(1)));
    assert!(rig
        .drain_notifications()
        .contains(&DaemonNotification::DevicesRefreshed { count: 1 }));

    // Refreshing again must not register anything twice
    assert_eq!(rig.daemon.refresh_devices(rig.at(10)), 1);
}

#[test]
fn spring_button_returns_cursor_on_release() {
    let set = SetProfile {
        buttons: vec![IndexedButton {
            index: 0,
            button: ButtonConfig {
                mouse: MouseSettings {
                    mode: MouseMode::Spring,
                    curve: MouseCurve::Linear,
                    ..Default::default()
                },
                ..ButtonConfig::with_slots(vec![Slot::MouseMove {
                    direction: MouseDirection::Right,
                }])
            },
        }],
        ..Default::default()
    };
    let mut rig = Rig::new(vec![scripted_device(1, 0, 1, 0)], vec![profile(set)]);
    rig.daemon.refresh_devices(rig.at(0));

    rig.poll(0, [button(1, 0, true)]);
    rig.run_timers_until(20);
    assert_eq!(rig.drain(), vec![OutputAction::CursorMove { dx: 200, dy: 0 }]);

    rig.poll(30, [button(1, 0, false)]);
    rig.run_timers_until(60);
    assert_eq!(rig.drain(), vec![OutputAction::CursorMove { dx: -200, dy: 0 }]);
    assert!(!rig.daemon.engine().mouse.is_active());
}

fn trigger_profile() -> DeviceProfile {
    let trigger = |index, code| AxisConfig {
        index,
        throttle: ThrottleMode::PositiveHalf,
        positive: ButtonConfig::keys(&[code]),
        ..Default::default()
    };
    profile(SetProfile {
        axes: vec![trigger(0, 40), trigger(1, 41)],
        ..Default::default()
    })
}

#[test]
fn unplug_batch_does_not_press_triggers() {
    let mut rig = Rig::new(vec![scripted_device(1, 2, 0, 0)], vec![trigger_profile()]);
    rig.daemon.refresh_devices(rig.at(0));

    rig.script.push([axis(1, 0, 0), axis(1, 1, 0)]);
    let report = rig.daemon.poll(rig.at(10));

    assert_eq!(report.rewritten, 2);
    assert!(rig.drain().is_empty());
    let device = rig.daemon.registry().device(DeviceId(1)).expect("device");
    assert!(!device.axis(0).expect("axis").is_currently_active());
    assert!(!device.axis(1).expect("axis").is_currently_active());
}

#[test]
fn partial_centered_batch_is_real_input() {
    let mut rig = Rig::new(vec![scripted_device(1, 2, 0, 0)], vec![trigger_profile()]);
    rig.daemon.refresh_devices(rig.at(0));

    rig.script.push([axis(1, 0, 0)]);
    let report = rig.daemon.poll(rig.at(10));

    assert_eq!(report.rewritten, 0);
    assert_eq!(rig.drain(), vec![key(40, true)]);
}

#[test]
fn removing_a_device_releases_held_keys() {
    let set = SetProfile {
        buttons: vec![IndexedButton {
            index: 0,
            button: ButtonConfig {
                turbo: Some(TurboSettings::constant(100)),
                ..ButtonConfig::keys(&[57])
            },
        }],
        ..Default::default()
    };
    let mut rig = Rig::new(vec![scripted_device(1, 0, 1, 0)], vec![profile(set)]);
    rig.daemon.refresh_devices(rig.at(0));
    rig.drain_notifications();

    rig.poll(0, [button(1, 0, true)]);
    rig.script.unplug(DeviceId(1));
    rig.poll(20, [RawEvent::DeviceRemoved { device: DeviceId(1) }]);

    assert_eq!(rig.drain(), vec![key(57, true), key(57, false)]);
    assert!(rig.daemon.registry().is_empty());
    assert_eq!(rig.script.closed.lock().expect("closed").as_slice(), &[DeviceId(1)]);
    assert_eq!(
        rig.drain_notifications(),
        vec![DaemonNotification::DeviceRemoved { device: DeviceId(1) }]
    );

    // Turbo timers of the removed button are gone
    rig.run_timers_until(500);
    assert!(rig.drain().is_empty());

    // Late events for the removed device are dropped
    rig.poll(600, [button(1, 0, false)]);
    assert!(rig.drain().is_empty());
}

#[test]
fn hot_plugged_device_is_opened() {
    let mut rig = Rig::new(Vec::new(), Vec::new());
    assert_eq!(rig.daemon.refresh_devices(rig.at(0)), 0);

    rig.script.plug(scripted_device(5, 2, 4, 1));
    rig.poll(10, [RawEvent::DeviceAdded { index: 0 }]);

    assert!(rig.daemon.registry().contains(DeviceId(5)));
    assert!(rig.drain_notifications().contains(&DaemonNotification::DeviceAdded {
        device: DeviceId(5),
        name: "Scripted pad 5".to_string(),
    }));
}

fn vdpad_profile() -> DeviceProfile {
    profile(SetProfile {
        buttons: vec![
            IndexedButton {
                index: 0,
                button: ButtonConfig::keys(&[1]),
            },
            IndexedButton {
                index: 1,
                button: ButtonConfig::keys(&[2]),
            },
        ],
        vdpads: vec![VDPadConfig {
            up: Some(ControlOrigin::Plain { index: 0 }),
            right: Some(ControlOrigin::Plain { index: 1 }),
            buttons: DirectionButtons {
                up: ButtonConfig::keys(&[103]),
                right: ButtonConfig::keys(&[106]),
                ..Default::default()
            },
            ..Default::default()
        }],
        ..Default::default()
    })
}

#[test]
fn vdpad_diagonal_and_mid_press_unbind() {
    let mut rig = Rig::new(vec![scripted_device(1, 0, 2, 0)], vec![vdpad_profile()]);
    rig.daemon.refresh_devices(rig.at(0));

    rig.poll(10, [button(1, 0, true), button(1, 1, true)]);
    assert_eq!(rig.drain(), vec![key(103, true), key(106, true)]);
    let diagonal = HatDirection::Up.mask() | HatDirection::Right.mask();
    let device = rig.daemon.registry().device(DeviceId(1)).expect("device");
    assert_eq!(device.active().vdpads()[0].dpad().value(), diagonal);

    rig.daemon
        .bind_vdpad(DeviceId(1), 0, HatDirection::Right, None, rig.at(20))
        .expect("unbind");
    assert_eq!(rig.drain(), vec![key(106, false)]);

    rig.poll(30, [button(1, 0, false), button(1, 1, false)]);
    assert_eq!(rig.drain(), vec![key(103, false)]);
}

#[test]
fn unknown_vdpad_binding_is_rejected() {
    let mut rig = Rig::new(vec![scripted_device(1, 0, 2, 0)], vec![vdpad_profile()]);
    rig.daemon.refresh_devices(rig.at(0));

    let missing = Some(ControlOrigin::Plain { index: 9 });
    assert!(rig
        .daemon
        .bind_vdpad(DeviceId(1), 0, HatDirection::Down, missing, rig.at(5))
        .is_err());
    assert!(rig
        .daemon
        .bind_vdpad(DeviceId(1), 3, HatDirection::Down, None, rig.at(5))
        .is_err());
}

fn pairing_profile() -> DeviceProfile {
    profile(SetProfile {
        buttons: vec![
            IndexedButton {
                index: 0,
                button: ButtonConfig::keys(&[10]),
            },
            IndexedButton {
                index: 1,
                button: ButtonConfig::keys(&[10, 11]),
            },
            IndexedButton {
                index: 2,
                button: ButtonConfig {
                    toggle: true,
                    ..ButtonConfig::keys(&[12])
                },
            },
            IndexedButton {
                index: 3,
                button: ButtonConfig {
                    turbo: Some(TurboSettings::constant(40)),
                    ..ButtonConfig::keys(&[13])
                },
            },
        ],
        ..Default::default()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_key_down_is_paired(steps in prop::collection::vec((0usize..4, any::<bool>(), 0u64..60), 1..40)) {
        let mut rig = Rig::new(vec![scripted_device(1, 0, 4, 0)], vec![pairing_profile()]);
        rig.daemon.refresh_devices(rig.at(0));

        let mut ms = 0;
        for (index, pressed, gap) in steps {
            ms += gap;
            rig.poll(ms, [button(1, index, pressed)]);
        }
        rig.daemon.shutdown(rig.at(ms + 1));

        let mut balance: HashMap<u32, i64> = HashMap::new();
        for action in rig.drain() {
            if let OutputAction::Key { code, pressed } = action {
                let entry = balance.entry(code).or_default();
                *entry += if pressed { 1 } else { -1 };
                prop_assert!(*entry >= 0, "release of {} without press", code);
            }
        }
        prop_assert!(balance.values().all(|count| *count == 0), "unpaired keys: {:?}", balance);
    }
}
