/*!
    persisted loop settings and engine timing configuration

    settings are read from and written back to an opaque key-value [SettingsStore], so the persisted format stays up to the host.
*/

use core::time::Duration;
use crate::frame::{TimeoutClass, MAX_ADDRESS};


/// key-value storage the settings are persisted in
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<i32>;
    fn put(&mut self, key: &str, value: i32);
}

#[cfg(feature = "std")]
impl SettingsStore for std::collections::HashMap<std::string::String, i32> {
    fn get(&self, key: &str) -> Option<i32> {
        std::collections::HashMap::get(self, key).copied()
    }
    fn put(&mut self, key: &str, value: i32) {
        self.insert(key.into(), value);
    }
}

pub mod keys {
    pub const SELECTED: &str = "hpil.selected";
    pub const PRINTER: &str = "hpil.printer";
    pub const DISK: &str = "hpil.disk";
    pub const PLOTTER: &str = "hpil.plotter";
    pub const MANUAL_IO: &str = "hpil.manual_io";
}


/// address assignment for a device role (printer, disk, plotter)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum DeviceRole {
    /// no explicit address, use the selected device or discover one
    #[default]
    Default,
    /// role explicitly switched off
    Disabled,
    /// explicit loop address
    Address(u8),
}
impl DeviceRole {
    /// decode the persisted integer form: -1 disabled, 0 default, else an address
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::Disabled),
            0 => Some(Self::Default),
            1 ..= 30 => Some(Self::Address(code as u8)),
            _ => None,
        }
    }
    pub fn code(self) -> i32 {
        match self {
            Self::Disabled => -1,
            Self::Default => 0,
            Self::Address(address) => i32::from(address),
        }
    }
}


/// loop settings persisted between sessions
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LoopSettings {
    /// device addressed by generic commands
    pub selected: u8,
    pub printer: DeviceRole,
    pub disk: DeviceRole,
    pub plotter: DeviceRole,
    /// manual addressing: device roles are not searched on the loop
    pub manual_io: bool,
}
impl LoopSettings {
    /// read settings from the store, missing or invalid entries keep their default
    pub fn load(store: &impl SettingsStore) -> Self {
        let mut settings = Self::default();
        if let Some(selected) = store.get(keys::SELECTED)
            .and_then(|code| u8::try_from(code).ok())
            .filter(|&address| address <= MAX_ADDRESS)
            {settings.selected = selected}
        let role = |key| store.get(key).and_then(DeviceRole::from_code).unwrap_or_default();
        settings.printer = role(keys::PRINTER);
        settings.disk = role(keys::DISK);
        settings.plotter = role(keys::PLOTTER);
        settings.manual_io = store.get(keys::MANUAL_IO).is_some_and(|v| v != 0);
        settings
    }
    /// write all settings to the store
    pub fn save(&self, store: &mut impl SettingsStore) {
        store.put(keys::SELECTED, i32::from(self.selected));
        store.put(keys::PRINTER, self.printer.code());
        store.put(keys::DISK, self.disk.code());
        store.put(keys::PLOTTER, self.plotter.code());
        store.put(keys::MANUAL_IO, i32::from(self.manual_io));
    }
}


/// frame round trip timeouts and polling interval used by the worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// identify frames
    pub identify: Duration,
    /// first interface clear
    pub interface_clear: Duration,
    /// added to `interface_clear` for each retry already spent
    pub interface_clear_step: Duration,
    /// command frames
    pub command: Duration,
    /// data and ready frames, a device may take long before answering
    pub data: Duration,
    /// delay between two read attempts while a frame is travelling the loop
    pub poll: Duration,
}
impl Default for Timeouts {
    fn default() -> Self {
        Self {
            identify: Duration::from_millis(250),
            interface_clear: Duration::from_millis(500),
            interface_clear_step: Duration::from_millis(100),
            command: Duration::from_millis(1000),
            data: Duration::from_millis(3000),
            poll: Duration::from_millis(10),
        }
    }
}
impl Timeouts {
    /// round trip timeout for a frame class, `retries` is the number of interface clear attempts already spent
    pub fn of(&self, class: TimeoutClass, retries: u32) -> Duration {
        match class {
            TimeoutClass::Identify => self.identify,
            TimeoutClass::InterfaceClear => self.interface_clear + self.interface_clear_step * retries,
            TimeoutClass::Command => self.command,
            TimeoutClass::Data => self.data,
        }
    }
    /// number of read attempts fitting in the given timeout
    pub fn attempts(&self, timeout: Duration) -> u32 {
        if self.poll.is_zero()
            {return 0}
        u32::try_from(timeout.as_millis() / self.poll.as_millis().max(1)).unwrap_or(u32::MAX)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Store(heapless::Vec<(heapless::String<16>, i32), 8>);
    impl SettingsStore for Store {
        fn get(&self, key: &str) -> Option<i32> {
            self.0.iter().find(|(k, _)| k.as_str() == key).map(|&(_, value)| value)
        }
        fn put(&mut self, key: &str, value: i32) {
            match self.0.iter_mut().find(|(k, _)| k.as_str() == key) {
                Some(entry) => entry.1 = value,
                None => self.0.push((key.try_into().unwrap(), value)).unwrap(),
            }
        }
    }

    #[test]
    fn persisted() {
        let mut store = Store::default();
        assert_eq!(LoopSettings::load(&store), LoopSettings::default());

        let settings = LoopSettings {
            selected: 3,
            printer: DeviceRole::Disabled,
            disk: DeviceRole::Address(2),
            manual_io: true,
            ..Default::default()
        };
        settings.save(&mut store);
        assert_eq!(store.get(keys::PRINTER), Some(-1));
        assert_eq!(LoopSettings::load(&store), settings);

        // out of range entries keep their default
        store.put(keys::SELECTED, 31);
        store.put(keys::DISK, 40);
        let loaded = LoopSettings::load(&store);
        assert_eq!(loaded.selected, 0);
        assert_eq!(loaded.disk, DeviceRole::Default);
    }

    #[test]
    fn timeout_escalation() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.of(TimeoutClass::InterfaceClear, 0), Duration::from_millis(500));
        assert_eq!(timeouts.of(TimeoutClass::InterfaceClear, 3), Duration::from_millis(800));
        assert_eq!(timeouts.of(TimeoutClass::Data, 3), timeouts.data);
        assert_eq!(timeouts.attempts(Duration::from_millis(500)), 50);

        let polling_off = Timeouts {poll: Duration::ZERO, ..Default::default()};
        assert_eq!(polling_off.attempts(Duration::from_millis(500)), 0);
    }
}
