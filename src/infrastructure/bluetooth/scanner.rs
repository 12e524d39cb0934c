//! BLE Scanner Module
//!
//! Timed advertisement scanning. Results go to a [`ScanResultsConsumer`];
//! de-duplication is the consumer's job.

use crate::domain::models::{AppEvent, DiscoveredDevice, ScanEvent};
use crate::infrastructure::bluetooth::platform::ScanPlatform;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receiver of scan results
pub trait ScanResultsConsumer: Send {
    fn candidate_device(&mut self, device: DiscoveredDevice);
    fn scanning_started(&mut self);
    fn scanning_stopped(&mut self);
}

impl ScanResultsConsumer for mpsc::UnboundedSender<AppEvent> {
    fn candidate_device(&mut self, device: DiscoveredDevice) {
        let _ = self.send(AppEvent::Scan(ScanEvent::CandidateDevice(device)));
    }

    fn scanning_started(&mut self) {
        let _ = self.send(AppEvent::Scan(ScanEvent::Started));
    }

    fn scanning_stopped(&mut self) {
        let _ = self.send(AppEvent::Scan(ScanEvent::Stopped));
    }
}

struct ActiveScan {
    consumer: Box<dyn ScanResultsConsumer>,
    deadline: Instant,
}

/// BLE Scanner
pub struct Scanner<P: ScanPlatform + ?Sized = dyn ScanPlatform> {
    platform: Box<P>,
    active: Option<ActiveScan>,
}

impl<P: ScanPlatform + ?Sized> Scanner<P> {
    pub fn new(platform: Box<P>) -> Self {
        Self {
            platform,
            active: None,
        }
    }

    /// Start discovery and stop automatically after `timeout`.
    ///
    /// Ignored while a scan is running. Abandoned silently (after asking
    /// for the capability) when scanning is not permitted.
    pub fn start_scanning(&mut self, consumer: Box<dyn ScanResultsConsumer>, timeout: Duration) {
        if !self.platform.scan_permitted() {
            warn!("Scan permission missing, requesting it");
            self.platform.request_scan_permission();
            return;
        }
        if !self.platform.adapter_enabled() {
            warn!("Bluetooth adapter is off, scan abandoned");
            return;
        }
        if self.active.is_some() {
            debug!("Already scanning so ignoring start request");
            return;
        }

        if let Err(e) = self.platform.start_scan() {
            warn!("Failed to start scan: {}", e);
            return;
        }

        info!("Scanning for {:?}", timeout);
        let mut consumer = consumer;
        consumer.scanning_started();
        self.active = Some(ActiveScan {
            consumer,
            deadline: Instant::now() + timeout,
        });
    }

    /// Stop discovery now. No-op when idle.
    pub fn stop_scanning(&mut self) {
        if let Some(mut scan) = self.active.take() {
            info!("Stopping scanning");
            self.platform.stop_scan();
            scan.consumer.scanning_stopped();
        }
    }

    /// Forward an advertisement while a scan is active.
    pub fn handle_advertisement(&mut self, device: DiscoveredDevice) {
        match self.active.as_mut() {
            Some(scan) => scan.consumer.candidate_device(device),
            None => debug!("Advertisement from {} outside scan window", device.address),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|scan| scan.deadline)
    }

    /// Stop the scan if its deadline has passed. Returns true if it stopped.
    pub fn poll_timeout(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(deadline) if now >= deadline => {
                self.stop_scanning();
                true
            }
            _ => false,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    pub fn platform(&self) -> &P {
        &self.platform
    }
}

impl<P: ScanPlatform + ?Sized> Drop for Scanner<P> {
    fn drop(&mut self) {
        self.stop_scanning();
    }
}
