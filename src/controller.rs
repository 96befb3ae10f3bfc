//! Drives a rundown against the configured devices.
//!
//! Every action is sent to the item's device and mirrored to every connected
//! shadow device. Disconnected devices are skipped.

use crate::config::{Config, DelayType};
use crate::rundown::{Action, ItemState, Rundown, RundownError, RundownItem};
use parking_lot::Mutex;
use playout_client::{ClientError, DeviceManager};
use playout_protocol::Command;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Frame rate assumed when a channel has no configured video format.
const FALLBACK_FRAME_RATE: f64 = 25.0;

struct Entry {
    item: RundownItem,
    state: Arc<Mutex<ItemState>>,
    /// Delayed play waiting to fire.
    pending: Option<JoinHandle<()>>,
}

impl Entry {
    fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }
}

pub struct Controller {
    config: Arc<Config>,
    devices: Arc<DeviceManager>,
    entries: Vec<Entry>,
    selected: usize,
}

impl Controller {
    pub fn new(config: Arc<Config>, devices: Arc<DeviceManager>, rundown: Rundown) -> Self {
        for item in &rundown.items {
            if config.device(&item.device).is_none() {
                tracing::warn!(device = %item.device, item = %item.title(), "item uses an unknown device");
            }
        }
        let entries = rundown
            .items
            .into_iter()
            .map(|item| Entry {
                item,
                state: Arc::new(Mutex::new(ItemState::default())),
                pending: None,
            })
            .collect();
        Self {
            config,
            devices,
            entries,
            selected: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn item(&self, index: usize) -> Option<&RundownItem> {
        self.entries.get(index).map(|e| &e.item)
    }

    pub fn state(&self, index: usize) -> Option<ItemState> {
        self.entries.get(index).map(|e| *e.state.lock())
    }

    /// Whether the item has a delayed play waiting to fire.
    pub fn is_pending(&self, index: usize) -> bool {
        self.entries
            .get(index)
            .and_then(|e| e.pending.as_ref())
            .is_some_and(|h| !h.is_finished())
    }

    pub fn select(&mut self, index: usize) -> Result<(), RundownError> {
        if index >= self.entries.len() {
            return Err(RundownError::NoSuchItem(index));
        }
        self.selected = index;
        Ok(())
    }

    pub fn up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn down(&mut self) {
        if self.selected + 1 < self.entries.len() {
            self.selected += 1;
        }
    }

    /// Runs `action` on the selected item.
    pub async fn execute(&mut self, action: Action) -> Result<(), RundownError> {
        self.execute_on(self.selected, action).await
    }

    pub async fn execute_on(&mut self, index: usize, action: Action) -> Result<(), RundownError> {
        let delay = match self.entries.get(index) {
            Some(entry) => self.play_delay(&entry.item),
            None => return Err(RundownError::NoSuchItem(index)),
        };
        let entry = &mut self.entries[index];

        match action {
            Action::Play if entry.item.trigger_on_next => {
                tracing::debug!(item = %entry.item.title(), "item waits for next");
                return Ok(());
            }
            Action::Next if !entry.item.trigger_on_next => return Ok(()),
            Action::Play if !delay.is_zero() => {
                entry.cancel_pending();
                tracing::debug!(item = %entry.item.title(), ?delay, "play scheduled");
                let devices = self.devices.clone();
                let item = entry.item.clone();
                let state = entry.state.clone();
                entry.pending = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = apply(&devices, &item, &state, Action::Play).await {
                        tracing::warn!(item = %item.title(), error = %e, "delayed play failed");
                    }
                }));
                return Ok(());
            }
            Action::Stop | Action::Clear | Action::ClearVideolayer | Action::ClearChannel => {
                if entry.cancel_pending() {
                    tracing::debug!(item = %entry.item.title(), "delayed play cancelled");
                }
            }
            _ => {}
        }

        apply(&self.devices, &entry.item, &entry.state, action).await
    }

    fn play_delay(&self, item: &RundownItem) -> Duration {
        match self.config.playout.delay_type {
            DelayType::Milliseconds => Duration::from_millis(item.delay),
            DelayType::Frames => {
                let fps = self
                    .config
                    .device(&item.device)
                    .and_then(|d| d.frames_per_second(item.channel))
                    .unwrap_or_else(|| {
                        tracing::warn!(
                            device = %item.device,
                            channel = item.channel,
                            "no video format for channel, assuming {} fps",
                            FALLBACK_FRAME_RATE
                        );
                        FALLBACK_FRAME_RATE
                    });
                frames_to_duration(item.delay, fps)
            }
        }
    }

    /// One line per item, the selected one marked.
    pub fn list(&self) -> String {
        let mut out = String::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let marker = if index == self.selected { '>' } else { ' ' };
            let item = &entry.item;
            let _ = writeln!(
                out,
                "{} {:>3}  {:<8} {:<24} {:<10} {}-{}  {}{}{}",
                marker,
                index,
                item.kind,
                item.title(),
                item.device,
                item.channel,
                item.layer,
                *entry.state.lock(),
                if self.is_pending(index) { " (scheduled)" } else { "" },
                if item.trigger_on_next { "  [next]" } else { "" },
            );
        }
        out
    }

    /// Connection state of every device.
    pub fn status(&self) -> String {
        let mut out = String::new();
        for name in self.devices.names() {
            if let Ok(device) = self.devices.get(&name) {
                let _ = writeln!(
                    out,
                    "{:<10} {:<22} {}{}",
                    device.name,
                    device.endpoint.to_string(),
                    device.client.state(),
                    if device.shadow { "  (shadow)" } else { "" },
                );
            }
        }
        out
    }
}

/// `floor(delay * 1000 / fps)` milliseconds.
pub fn frames_to_duration(frames: u64, fps: f64) -> Duration {
    if fps <= 0.0 {
        return Duration::ZERO;
    }
    let ms = (frames as f64 * (1000.0 / fps)).floor();
    Duration::from_millis(ms as u64)
}

/// Sends an action's commands and updates the item state.
async fn apply(
    devices: &DeviceManager,
    item: &RundownItem,
    state: &Mutex<ItemState>,
    action: Action,
) -> Result<(), RundownError> {
    let current = *state.lock();
    let commands = item.commands(action, current)?;
    if commands.is_empty() {
        return Ok(());
    }

    tracing::info!(item = %item.title(), %action, device = %item.device, "executing");
    send(devices, &item.device, &commands).await?;
    *state.lock() = current.after(action);
    Ok(())
}

/// Sends `commands` to the primary device, then mirrors them to every
/// connected shadow device. The primary's first error is returned after the
/// shadows have been served; shadow failures are only logged.
async fn send(
    devices: &DeviceManager,
    primary: &str,
    commands: &[Command],
) -> Result<(), ClientError> {
    let device = devices.get(primary)?;
    let mut result = Ok(());
    if device.is_connected() {
        for command in commands {
            if let Err(e) = device.client.execute(command.clone()).await {
                tracing::warn!(device = primary, error = %e, "command failed");
                result = Err(e);
                break;
            }
        }
    } else {
        tracing::warn!(device = primary, "device not connected, skipping");
    }

    for shadow in devices.shadows() {
        if shadow.name == primary || !shadow.is_connected() {
            continue;
        }
        for command in commands {
            if let Err(e) = shadow.client.execute(command.clone()).await {
                tracing::warn!(device = %shadow.name, error = %e, "shadow command failed");
                break;
            }
        }
    }
    result
}
