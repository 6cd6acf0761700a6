//! Default-device selection via the undocumented IPolicyConfig interface.
//!
//! Windows has no documented API for setting the default endpoint;
//! IPolicyConfig has been stable since Windows 7 and is what every device
//! switcher uses. Only `SetDefaultEndpoint` is called here; the preceding
//! vtable slots are pinned as explicit no-op declarations so the one live
//! method sits at the correct offset.

use crate::device::{AudioError, DeviceRole};
use crate::enumerator::to_wide;
use windows::core::{IUnknown, GUID, HRESULT, PCWSTR};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};

/// IPolicyConfig (undocumented but stable).
///
/// Ten methods precede `SetDefaultEndpoint` in the real vtable; each is
/// declared by name-and-position only and must never be called.
#[windows::core::interface("F8679F50-850A-41CF-9C72-430F290290C8")]
pub unsafe trait IPolicyConfig: IUnknown {
    fn reserved1(&self) -> HRESULT;
    fn reserved2(&self) -> HRESULT;
    fn reserved3(&self) -> HRESULT;
    fn reserved4(&self) -> HRESULT;
    fn reserved5(&self) -> HRESULT;
    fn reserved6(&self) -> HRESULT;
    fn reserved7(&self) -> HRESULT;
    fn reserved8(&self) -> HRESULT;
    fn reserved9(&self) -> HRESULT;
    fn reserved10(&self) -> HRESULT;

    fn SetDefaultEndpoint(&self, device_id: PCWSTR, role: u32) -> HRESULT;
}

// PolicyConfigClient CLSID
const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

/// Set the device as the default for one role.
///
/// The policy object is created, used once, and released per call; nothing
/// is cached across calls. COM must be initialized on the calling thread.
pub fn set_default_device(device_id: &str, role: DeviceRole) -> Result<(), AudioError> {
    unsafe {
        let policy_config: IPolicyConfig =
            CoCreateInstance(&CLSID_POLICY_CONFIG_CLIENT, None, CLSCTX_ALL)
                .map_err(|e| AudioError::control_surface("PolicyConfig create", e))?;

        let wide = to_wide(device_id);
        policy_config
            .SetDefaultEndpoint(PCWSTR(wide.as_ptr()), role as u32)
            .ok()
            .map_err(|e| AudioError::control_surface("SetDefaultEndpoint", e))?;

        Ok(())
    }
}

/// Set the device as the default for both Console and Communications.
///
/// Roles are set in sequence; a failure on the first leaves the second
/// untouched and propagates.
pub fn set_default_device_for_all_roles(device_id: &str) -> Result<(), AudioError> {
    set_default_device(device_id, DeviceRole::Console)?;
    set_default_device(device_id, DeviceRole::Communications)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtable_places_set_default_endpoint_after_ten_slots() {
        // IUnknown contributes three slots; ten declarations pad to slot 13.
        let expected = 14 * std::mem::size_of::<usize>();
        assert_eq!(std::mem::size_of::<IPolicyConfig_Vtbl>(), expected);
    }
}
