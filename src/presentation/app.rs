use crate::domain::console::{ConsoleController, Navigation};
use crate::domain::devices::DeviceList;
use crate::domain::models::{
    AppEvent, DeviceAddress, GattEvent, MessageSeverity, ScanEvent, StatusMessage,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::BluetoothHandle;
use crate::infrastructure::logging::LoggingGuard;
use crate::presentation::components::Components;
use crate::presentation::tabs::settings::UuidDraft;
use crate::presentation::theme::{configure_theme, ConsolePalette};
use eframe::egui;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Splash { until: Instant },
    Devices,
    Console,
}

pub struct BleSerialApp {
    // Services
    pub(crate) settings: SettingsService,
    pub(crate) bluetooth: BluetoothHandle,
    pub(crate) events_rx: mpsc::UnboundedReceiver<AppEvent>,

    // Navigation
    pub(crate) screen: Screen,
    pub(crate) console: Option<ConsoleController>,

    // Scanning
    pub(crate) is_scanning: bool,
    pub(crate) devices: DeviceList,

    // UI State
    pub(crate) status_message: Option<StatusMessage>,
    pub(crate) show_settings: bool,
    pub(crate) uuid_draft: UuidDraft,
    pub(crate) is_dark_mode: bool,

    // Logging guard
    pub(crate) _logging_guard: Option<LoggingGuard>,
}

impl BleSerialApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        settings: SettingsService,
        logging_guard: Option<LoggingGuard>,
    ) -> Self {
        configure_theme(&cc.egui_ctx, settings.get().dark_mode);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (bluetooth, status_message) = match BluetoothHandle::spawn(settings.get(), event_tx) {
            Ok(handle) => (handle, None),
            Err(e) => {
                error!("Failed to start the Bluetooth worker: {}", e);
                // A handle with no worker behind it; every command reports ServiceStopped
                let (command_tx, _) = mpsc::unbounded_channel();
                (
                    BluetoothHandle::new(command_tx),
                    Some(StatusMessage::new(
                        format!("Bluetooth unavailable: {}", e),
                        MessageSeverity::Error,
                    )),
                )
            }
        };

        let mut app = Self::from_parts(settings, bluetooth, event_rx, logging_guard);
        app.status_message = status_message;
        app
    }

    pub(crate) fn from_parts(
        settings: SettingsService,
        bluetooth: BluetoothHandle,
        events_rx: mpsc::UnboundedReceiver<AppEvent>,
        logging_guard: Option<LoggingGuard>,
    ) -> Self {
        let splash = Duration::from_millis(settings.get().splash_duration_ms);
        let uuid_draft = UuidDraft::from_settings(settings.get());
        let is_dark_mode = settings.get().dark_mode;

        Self {
            settings,
            bluetooth,
            events_rx,
            screen: Screen::Splash {
                until: Instant::now() + splash,
            },
            console: None,
            is_scanning: false,
            devices: DeviceList::new(),
            status_message: None,
            show_settings: false,
            uuid_draft,
            is_dark_mode,
            _logging_guard: logging_guard,
        }
    }

    /// Leave the splash screen once its time is up.
    pub(crate) fn tick(&mut self, now: Instant) {
        if let Screen::Splash { until } = self.screen {
            if now >= until {
                self.screen = Screen::Devices;
            }
        }
    }

    pub(crate) fn process_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                AppEvent::Scan(event) => self.on_scan_event(event),
                AppEvent::Gatt(event) => self.on_gatt_event(event),
                AppEvent::LogMessage(msg) => {
                    if msg.severity == MessageSeverity::Error {
                        warn!("{}", msg.message);
                    }
                    self.status_message = Some(msg);
                }
            }
        }
    }

    fn on_scan_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Started => self.is_scanning = true,
            ScanEvent::CandidateDevice(device) => {
                self.devices.upsert(device);
            }
            ScanEvent::Stopped => self.is_scanning = false,
        }
    }

    fn on_gatt_event(&mut self, event: GattEvent) {
        if let GattEvent::Connected { address } = &event {
            let name = self
                .console
                .as_ref()
                .filter(|c| c.address() == address)
                .and_then(|c| c.name().map(str::to_string));
            if let Err(e) = self.settings.record_connection(address, name.as_deref()) {
                error!("Failed to remember {}: {}", address, e);
            }
        }

        let Some(console) = self.console.as_mut() else {
            return;
        };
        if console.handle_event(&event, &mut self.bluetooth) == Navigation::Finished {
            self.close_console();
        }
    }

    pub(crate) fn toggle_scan(&mut self) {
        let result = if self.is_scanning {
            self.bluetooth.stop_scan()
        } else {
            self.devices.clear();
            self.bluetooth.start_scan(self.settings.get().scan_timeout())
        };
        if let Err(e) = result {
            self.status_message = Some(StatusMessage::new(
                format!("Scan failed: {}", e),
                MessageSeverity::Error,
            ));
        }
    }

    pub(crate) fn open_console(&mut self, address: DeviceAddress, name: Option<String>) {
        if self.is_scanning {
            if let Err(e) = self.bluetooth.stop_scan() {
                error!("Failed to stop scan: {}", e);
            }
        }
        info!("Opening console for {}", address);
        self.console = Some(ConsoleController::new(
            address,
            name,
            self.settings.get().uart_profile(),
        ));
        self.screen = Screen::Console;
    }

    pub(crate) fn connect_pressed(&mut self) {
        if let Some(console) = self.console.as_mut() {
            console.connect_pressed(&mut self.bluetooth);
        }
    }

    pub(crate) fn send_pressed(&mut self) {
        if let Some(console) = self.console.as_mut() {
            console.send(&mut self.bluetooth);
        }
    }

    pub(crate) fn back_pressed(&mut self) {
        let finished = match self.console.as_mut() {
            Some(console) => console.back_pressed(&mut self.bluetooth) == Navigation::Finished,
            None => true,
        };
        if finished {
            self.close_console();
        }
    }

    fn close_console(&mut self) {
        self.console = None;
        self.screen = Screen::Devices;
    }

    fn toggle_theme(&mut self, ctx: &egui::Context) {
        self.is_dark_mode = !self.is_dark_mode;
        configure_theme(ctx, self.is_dark_mode);
        self.settings.get_mut().dark_mode = self.is_dark_mode;
        if let Err(e) = self.settings.save() {
            error!("Failed to save settings: {}", e);
        }
    }

    fn render_splash(&self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(ui.available_height() / 3.0);
                ui.label(egui::RichText::new("BLE Serial Console").size(32.0).strong());
                ui.add_space(10.0);
                ui.label("Nordic UART over Bluetooth Low Energy");
                ui.add_space(20.0);
                ui.spinner();
            });
        });
    }
}

impl eframe::App for BleSerialApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_events();
        self.tick(Instant::now());

        // The worker cannot wake the UI, so poll
        ctx.request_repaint_after(Duration::from_millis(50));

        if let Screen::Splash { .. } = self.screen {
            self.render_splash(ctx);
            return;
        }

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.label(egui::RichText::new("BLE Serial Console").strong());
                ui.separator();
                ui.toggle_value(&mut self.show_settings, "Settings");

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let switch_icon = if self.is_dark_mode {
                        "☀ Light"
                    } else {
                        "🌙 Dark"
                    };
                    if ui.button(switch_icon).clicked() {
                        self.toggle_theme(ctx);
                    }
                });
            });
        });

        egui::TopBottomPanel::bottom("status_panel").show(ctx, |ui| {
            let palette = ConsolePalette::new(self.is_dark_mode);
            match &self.status_message {
                Some(msg) => Components::status_line(ui, &palette, msg),
                None => {
                    ui.label(egui::RichText::new("Ready").color(palette.muted));
                }
            }
        });

        if self.show_settings {
            let mut open = true;
            egui::Window::new("Settings")
                .open(&mut open)
                .default_width(460.0)
                .show(ctx, |ui| crate::presentation::tabs::settings::render(self, ui));
            self.show_settings &= open;
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.set_max_width(800.0);
                ui.add_space(10.0);

                use crate::presentation::tabs;
                match self.screen {
                    Screen::Devices => tabs::devices::render(self, ui),
                    Screen::Console => tabs::console::render(self, ui),
                    Screen::Splash { .. } => {}
                }
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{BluetoothCommand, DiscoveredDevice};
    use tempfile::TempDir;

    struct Harness {
        app: BleSerialApp,
        events: mpsc::UnboundedSender<AppEvent>,
        commands: mpsc::UnboundedReceiver<BluetoothCommand>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let settings = SettingsService::with_path(dir.path().join("settings.json"));
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let app = BleSerialApp::from_parts(settings, BluetoothHandle::new(command_tx), events_rx, None);
        Harness {
            app,
            events,
            commands,
            _dir: dir,
        }
    }

    fn device(address: &str, name: Option<&str>, rssi: i16) -> DiscoveredDevice {
        DiscoveredDevice {
            address: address.parse().unwrap(),
            name: name.map(str::to_string),
            rssi,
            advertisement: Vec::new(),
        }
    }

    fn drain(commands: &mut mpsc::UnboundedReceiver<BluetoothCommand>) -> Vec<BluetoothCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = commands.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn test_splash_gives_way_to_device_list() {
        let mut h = harness();
        assert!(matches!(h.app.screen, Screen::Splash { .. }));
        h.app.tick(Instant::now() + Duration::from_secs(10));
        assert_eq!(h.app.screen, Screen::Devices);
    }

    #[test]
    fn test_scan_results_are_deduplicated() {
        let mut h = harness();
        h.events.send(AppEvent::Scan(ScanEvent::Started)).unwrap();
        for rssi in [-70, -60] {
            h.events
                .send(AppEvent::Scan(ScanEvent::CandidateDevice(device(
                    "C0:FF:EE:00:00:01",
                    Some("UART Echo"),
                    rssi,
                ))))
                .unwrap();
        }
        h.app.process_events();

        assert!(h.app.is_scanning);
        assert_eq!(h.app.devices.len(), 1);

        h.events.send(AppEvent::Scan(ScanEvent::Stopped)).unwrap();
        h.app.process_events();
        assert!(!h.app.is_scanning);
    }

    #[test]
    fn test_scan_toggle_clears_list_on_start() {
        let mut h = harness();
        h.app.devices.upsert(device("C0:FF:EE:00:00:01", None, -50));

        h.app.toggle_scan();
        assert!(h.app.devices.is_empty());
        assert!(matches!(
            drain(&mut h.commands).as_slice(),
            [BluetoothCommand::StartScan { .. }]
        ));

        h.app.is_scanning = true;
        h.app.toggle_scan();
        assert!(matches!(
            drain(&mut h.commands).as_slice(),
            [BluetoothCommand::StopScan]
        ));
    }

    #[test]
    fn test_selecting_a_device_stops_scan_and_opens_console() {
        let mut h = harness();
        h.app.is_scanning = true;

        h.app
            .open_console("C0:FF:EE:00:00:01".parse().unwrap(), Some("UART Echo".into()));

        assert_eq!(h.app.screen, Screen::Console);
        assert!(matches!(
            drain(&mut h.commands).as_slice(),
            [BluetoothCommand::StopScan]
        ));
        let console = h.app.console.as_ref().unwrap();
        assert_eq!(console.title(), "Device : UART Echo [C0:FF:EE:00:00:01]");
    }

    #[test]
    fn test_connection_is_remembered_and_discovery_requested() {
        let mut h = harness();
        let address: DeviceAddress = "C0:FF:EE:00:00:01".parse().unwrap();
        h.app.open_console(address.clone(), Some("UART Echo".into()));

        h.events
            .send(AppEvent::Gatt(GattEvent::Connected {
                address: address.clone(),
            }))
            .unwrap();
        h.app.process_events();

        let settings = h.app.settings.get();
        assert_eq!(settings.last_connected_address.as_ref(), Some(&address));
        assert_eq!(settings.known_devices[0].name.as_deref(), Some("UART Echo"));
        assert!(matches!(
            drain(&mut h.commands).as_slice(),
            [BluetoothCommand::DiscoverServices]
        ));
    }

    #[test]
    fn test_back_while_connected_waits_for_disconnect() {
        let mut h = harness();
        let address: DeviceAddress = "C0:FF:EE:00:00:01".parse().unwrap();
        h.app.open_console(address.clone(), None);
        h.events
            .send(AppEvent::Gatt(GattEvent::Connected {
                address: address.clone(),
            }))
            .unwrap();
        h.app.process_events();
        drain(&mut h.commands);

        h.app.back_pressed();
        assert_eq!(h.app.screen, Screen::Console);
        assert!(matches!(
            drain(&mut h.commands).as_slice(),
            [BluetoothCommand::Disconnect]
        ));

        h.events
            .send(AppEvent::Gatt(GattEvent::Disconnected { address }))
            .unwrap();
        h.app.process_events();
        assert_eq!(h.app.screen, Screen::Devices);
        assert!(h.app.console.is_none());
    }

    #[test]
    fn test_back_while_idle_leaves_immediately() {
        let mut h = harness();
        h.app.open_console("C0:FF:EE:00:00:04".parse().unwrap(), None);
        h.app.back_pressed();
        assert_eq!(h.app.screen, Screen::Devices);
    }

    #[test]
    fn test_stopped_worker_surfaces_an_error() {
        let mut h = harness();
        drop(h.commands);
        h.app.toggle_scan();
        let msg = h.app.status_message.as_ref().unwrap();
        assert_eq!(msg.severity, MessageSeverity::Error);
    }
}
