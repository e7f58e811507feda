//! Driver discovery, loading, and the serialized call surface.
//!
//! Exactly one driver is active per service. Discovery scans the
//! `drivers/` directory next to the executable; each subdirectory holds a
//! platform-named library, and the first one that loads, registers,
//! validates, initializes, and reports a connected device wins.
//!
//! The host is always used behind a mutex: the frame task takes it once
//! per tick, the control task per input query. Drivers therefore never see
//! concurrent calls.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{info, warn};

use ox_driver_api::{
    read_fixed_str, OxComponentResult, OxDeviceInfo, OxDeviceState, OxDisplayProperties,
    OxDriverCallbacks, OxDriverRegisterFn, OxPose, OxSubmittedFrame, OxTrackingCapabilities,
    DRIVER_LIBRARY_NAME, OX_DRIVER_REGISTER_SYMBOL, OX_MAX_DEVICES,
};
use ox_protocol::TextureInfo;

use crate::{Result, ServiceError};

/// Owned strings from [`OxDeviceInfo`].
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    pub name: String,
    pub manufacturer: String,
    pub serial: String,
}

pub struct DriverHost {
    callbacks: OxDriverCallbacks,
    // kept alive for the life of the host; dropped after shutdown()
    library: Option<Library>,
}

impl DriverHost {
    /// Scan a drivers directory; first connected driver wins.
    pub fn discover(drivers_dir: &Path) -> Result<Self> {
        if !drivers_dir.is_dir() {
            return Err(ServiceError::DriversDirMissing(drivers_dir.to_owned()));
        }
        info!(dir = %drivers_dir.display(), "scanning for drivers");

        let mut entries: Vec<PathBuf> = std::fs::read_dir(drivers_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        entries.sort();

        for dir in entries {
            let library_path = dir.join(DRIVER_LIBRARY_NAME);
            match Self::load(&library_path) {
                Ok(host) => {
                    if host.is_device_connected() {
                        info!(driver = %host.device_identity().name, "driver loaded");
                        return Ok(host);
                    }
                    info!(path = %library_path.display(), "driver loaded but device not connected");
                }
                Err(err) => {
                    warn!(path = %library_path.display(), %err, "skipping driver");
                }
            }
        }

        Err(ServiceError::NoConnectedDriver)
    }

    /// Load one driver library, resolve its register symbol, and bring it
    /// up.
    pub fn load(library_path: &Path) -> Result<Self> {
        let library = unsafe { Library::new(library_path) }
            .map_err(|e| ServiceError::DriverLoad(e.to_string()))?;

        let mut callbacks = OxDriverCallbacks::default();
        let registered = unsafe {
            let register: libloading::Symbol<OxDriverRegisterFn> = library
                .get(OX_DRIVER_REGISTER_SYMBOL)
                .map_err(|e| ServiceError::DriverLoad(e.to_string()))?;
            register(&mut callbacks)
        };
        if registered != 1 {
            return Err(ServiceError::DriverRejected("registration failed"));
        }

        Self::bring_up(callbacks, Some(library))
    }

    /// Register a driver whose callbacks already live in this process.
    /// Used by tests and embedded setups.
    pub fn from_callbacks(callbacks: OxDriverCallbacks) -> Result<Self> {
        Self::bring_up(callbacks, None)
    }

    fn bring_up(callbacks: OxDriverCallbacks, library: Option<Library>) -> Result<Self> {
        if callbacks.initialize.is_none()
            || callbacks.shutdown.is_none()
            || callbacks.is_device_connected.is_none()
            || callbacks.get_device_info.is_none()
            || callbacks.get_display_properties.is_none()
            || callbacks.get_tracking_capabilities.is_none()
            || callbacks.update_view_pose.is_none()
        {
            return Err(ServiceError::DriverRejected("missing required callbacks"));
        }

        let host = Self { callbacks, library };
        let initialized = unsafe { (host.callbacks.initialize.expect("validated"))() };
        if initialized != 1 {
            return Err(ServiceError::DriverRejected("initialization failed"));
        }
        Ok(host)
    }

    pub fn is_device_connected(&self) -> bool {
        unsafe { (self.callbacks.is_device_connected.expect("validated"))() == 1 }
    }

    pub fn device_identity(&self) -> DeviceIdentity {
        let mut info = OxDeviceInfo::default();
        unsafe { (self.callbacks.get_device_info.expect("validated"))(&mut info) };
        DeviceIdentity {
            name: read_fixed_str(&info.name).to_owned(),
            manufacturer: read_fixed_str(&info.manufacturer).to_owned(),
            serial: read_fixed_str(&info.serial).to_owned(),
        }
    }

    pub fn display_properties(&self) -> OxDisplayProperties {
        let mut props = OxDisplayProperties::default();
        unsafe { (self.callbacks.get_display_properties.expect("validated"))(&mut props) };
        props
    }

    pub fn tracking_capabilities(&self) -> OxTrackingCapabilities {
        let mut caps = OxTrackingCapabilities::default();
        unsafe { (self.callbacks.get_tracking_capabilities.expect("validated"))(&mut caps) };
        caps
    }

    pub fn update_view_pose(&self, predicted_time: i64, eye_index: u32) -> OxPose {
        let mut pose = OxPose::default();
        unsafe {
            (self.callbacks.update_view_pose.expect("validated"))(
                predicted_time,
                eye_index,
                &mut pose,
            )
        };
        pose
    }

    pub fn supports_devices(&self) -> bool {
        self.callbacks.update_devices.is_some()
    }

    /// Fill `out` with the driver's tracked devices; returns the count.
    pub fn update_devices(
        &self,
        predicted_time: i64,
        out: &mut [OxDeviceState; OX_MAX_DEVICES],
    ) -> usize {
        let Some(update) = self.callbacks.update_devices else {
            return 0;
        };
        let mut count = 0u32;
        unsafe { update(predicted_time, out.as_mut_ptr(), &mut count) };
        (count as usize).min(OX_MAX_DEVICES)
    }

    pub fn input_boolean(
        &self,
        predicted_time: i64,
        user_path: &str,
        component_path: &str,
    ) -> Option<bool> {
        let get = self.callbacks.get_input_state_boolean?;
        let user = CString::new(user_path).ok()?;
        let component = CString::new(component_path).ok()?;
        let mut value = 0u32;
        let result = unsafe {
            get(
                predicted_time,
                user.as_ptr().cast(),
                component.as_ptr().cast(),
                &mut value,
            )
        };
        (result == OxComponentResult::Available).then_some(value != 0)
    }

    pub fn input_float(
        &self,
        predicted_time: i64,
        user_path: &str,
        component_path: &str,
    ) -> Option<f32> {
        let get = self.callbacks.get_input_state_float?;
        let user = CString::new(user_path).ok()?;
        let component = CString::new(component_path).ok()?;
        let mut value = 0f32;
        let result = unsafe {
            get(
                predicted_time,
                user.as_ptr().cast(),
                component.as_ptr().cast(),
                &mut value,
            )
        };
        (result == OxComponentResult::Available).then_some(value)
    }

    pub fn input_vector2(
        &self,
        predicted_time: i64,
        user_path: &str,
        component_path: &str,
    ) -> Option<(f32, f32)> {
        let get = self.callbacks.get_input_state_vector2f?;
        let user = CString::new(user_path).ok()?;
        let component = CString::new(component_path).ok()?;
        let (mut x, mut y) = (0f32, 0f32);
        let result = unsafe {
            get(
                predicted_time,
                user.as_ptr().cast(),
                component.as_ptr().cast(),
                &mut x,
                &mut y,
            )
        };
        (result == OxComponentResult::Available).then_some((x, y))
    }

    /// Profiles the driver claims to support. Drivers without the callback
    /// are assumed to speak the simple controller profile.
    pub fn interaction_profiles(&self) -> Vec<String> {
        let Some(get) = self.callbacks.get_interaction_profiles else {
            return vec!["/interaction_profiles/khr/simple_controller".to_owned()];
        };

        let mut pointers: [*const u8; 8] = [std::ptr::null(); 8];
        let count = unsafe { get(pointers.as_mut_ptr(), pointers.len() as u32) };
        let mut profiles = Vec::new();
        for &ptr in pointers.iter().take((count as usize).min(pointers.len())) {
            if ptr.is_null() {
                continue;
            }
            let s = unsafe { std::ffi::CStr::from_ptr(ptr.cast()) };
            if let Ok(s) = s.to_str() {
                profiles.push(s.to_owned());
            }
        }
        if profiles.is_empty() {
            profiles.push("/interaction_profiles/khr/simple_controller".to_owned());
        }
        profiles
    }

    pub fn supports_frame_submit(&self) -> bool {
        self.callbacks.submit_frame.is_some()
    }

    /// Forward one submitted eye texture to the driver.
    pub fn submit_frame(&self, eye_index: u32, info: TextureInfo, pixels: &[u8]) {
        let Some(submit) = self.callbacks.submit_frame else {
            return;
        };
        let frame = OxSubmittedFrame {
            eye_index,
            width: info.width,
            height: info.height,
            format: info.format,
            data_size: pixels.len() as u32,
            pixel_data: pixels.as_ptr(),
        };
        unsafe { submit(&frame) };
    }
}

impl Drop for DriverHost {
    fn drop(&mut self) {
        if let Some(shutdown) = self.callbacks.shutdown {
            unsafe { shutdown() };
        }
        // release the library handle after the driver has shut down
        self.library.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_callbacks_are_rejected() {
        let callbacks = OxDriverCallbacks::default();
        assert!(matches!(
            DriverHost::from_callbacks(callbacks),
            Err(ServiceError::DriverRejected(_))
        ));
    }

    #[test]
    fn discover_on_empty_dir_finds_nothing() {
        let dir = std::env::temp_dir().join(format!("ox_drivers_empty_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(matches!(
            DriverHost::discover(&dir),
            Err(ServiceError::NoConnectedDriver)
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn discover_on_missing_dir_fails() {
        let dir = std::env::temp_dir().join(format!("ox_drivers_missing_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        assert!(matches!(
            DriverHost::discover(&dir),
            Err(ServiceError::DriversDirMissing(_))
        ));
    }
}
