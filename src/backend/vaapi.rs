// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VAAPI driver, calling directly into libva.

use std::ffi::c_void;
use std::ffi::CStr;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::raw::c_int;
use std::os::raw::c_uint;
use std::path::Path;

use anyhow::anyhow;
use anyhow::Context as AnyhowContext;

use crate::backend::BufferId;
use crate::backend::BufferKind;
use crate::backend::ConfigId;
use crate::backend::ContextId;
use crate::backend::DisplayHandle;
use crate::backend::SurfaceId;
use crate::backend::VaDriver;
use crate::backend::VaEntrypoint;
use crate::backend::VaProfile;
use crate::status::VaError;
use crate::status::VaResult;
use crate::status::VaStatus;
use crate::Resolution;

mod ffi;

fn raw(display: DisplayHandle) -> ffi::VADisplay {
    display.as_raw() as ffi::VADisplay
}

fn check(status: ffi::VAStatus) -> VaResult<()> {
    VaStatus(status).check()
}

/// Converts `value` to the integer type libva expects, failing with `ERROR_INVALID_PARAMETER`
/// instead of wrapping.
fn to_c<T, U: TryFrom<T>>(value: T) -> VaResult<U> {
    U::try_from(value).map_err(|_| VaError::from(VaStatus::ERROR_INVALID_PARAMETER))
}

/// A VA display opened on a DRM render node, terminated when dropped.
pub struct VaapiDisplay {
    handle: DisplayHandle,
    // Must outlive the display.
    _drm_file: File,
}

impl VaapiDisplay {
    /// Opens and initializes a VA display on the DRM render node at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let drm_file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        // Safe because the fd is valid for as long as `drm_file` lives, which we keep alongside
        // the display.
        let display = unsafe { ffi::vaGetDisplayDRM(drm_file.as_raw_fd()) };
        let handle = DisplayHandle::new(display as usize)
            .ok_or_else(|| anyhow!("vaGetDisplayDRM returned no display for {}", path.display()))?;

        let mut major: c_int = 0;
        let mut minor: c_int = 0;
        // Safe because `display` is a valid VADisplay and the version pointers are valid.
        let status = unsafe { ffi::vaInitialize(display, &mut major, &mut minor) };
        if status != VaStatus::SUCCESS.0 {
            // Safe because `vaErrorStr` returns a pointer to a static, null-terminated string.
            let err_str = unsafe { CStr::from_ptr(ffi::vaErrorStr(status)) };
            return Err(anyhow!("vaInitialize failed: {}", err_str.to_string_lossy()));
        }
        log::debug!("Initialized VA-API {}.{} on {}", major, minor, path.display());

        Ok(Self {
            handle,
            _drm_file: drm_file,
        })
    }

    pub fn handle(&self) -> DisplayHandle {
        self.handle
    }
}

impl Drop for VaapiDisplay {
    fn drop(&mut self) {
        // Safe because `handle` was initialized by `vaInitialize` in `open`.
        let status = unsafe { ffi::vaTerminate(raw(self.handle)) };
        if let Err(e) = check(status) {
            log::error!("vaTerminate failed: {}", e);
        }
    }
}

/// [`VaDriver`] implementation that forwards every call to libva.
///
/// The displays passed to its methods must be initialized and outlive the objects created on
/// them.
#[derive(Default)]
pub struct VaapiDriver;

impl VaapiDriver {
    pub fn new() -> Self {
        Self
    }
}

impl VaDriver for VaapiDriver {
    fn query_config_profiles(&mut self, display: DisplayHandle) -> VaResult<Vec<VaProfile>> {
        // Safe because `display` is a valid VADisplay.
        let max = unsafe { ffi::vaMaxNumProfiles(raw(display)) };
        let mut profiles = vec![0; max.max(0) as usize];
        let mut count = max;

        // Safe because `profiles` has room for `max` entries.
        check(unsafe {
            ffi::vaQueryConfigProfiles(raw(display), profiles.as_mut_ptr(), &mut count)
        })?;
        profiles.truncate(count.max(0) as usize);

        Ok(profiles)
    }

    fn query_config_entrypoints(
        &mut self,
        display: DisplayHandle,
        profile: VaProfile,
    ) -> VaResult<Vec<VaEntrypoint>> {
        // Safe because `display` is a valid VADisplay.
        let max = unsafe { ffi::vaMaxNumEntrypoints(raw(display)) };
        let mut entrypoints = vec![0; max.max(0) as usize];
        let mut count = max;

        // Safe because `entrypoints` has room for `max` entries.
        check(unsafe {
            ffi::vaQueryConfigEntrypoints(
                raw(display),
                profile,
                entrypoints.as_mut_ptr(),
                &mut count,
            )
        })?;
        entrypoints.truncate(count.max(0) as usize);

        Ok(entrypoints)
    }

    fn create_config(
        &mut self,
        display: DisplayHandle,
        profile: VaProfile,
        entrypoint: VaEntrypoint,
        rt_format: u32,
    ) -> VaResult<ConfigId> {
        let mut attrib = ffi::VAConfigAttrib {
            type_: ffi::VA_CONFIG_ATTRIB_RT_FORMAT,
            value: rt_format,
        };
        let mut config_id = 0;

        // Safe because `attrib` and `config_id` are valid for the duration of the call.
        check(unsafe {
            ffi::vaCreateConfig(
                raw(display),
                profile,
                entrypoint,
                &mut attrib,
                1,
                &mut config_id,
            )
        })?;

        Ok(ConfigId(config_id))
    }

    fn destroy_config(&mut self, display: DisplayHandle, config: ConfigId) -> VaResult<()> {
        // Safe because `display` is a valid VADisplay.
        check(unsafe { ffi::vaDestroyConfig(raw(display), config.0) })
    }

    fn create_context(
        &mut self,
        display: DisplayHandle,
        config: ConfigId,
        coded_resolution: Resolution,
    ) -> VaResult<ContextId> {
        let width: c_int = to_c(coded_resolution.width)?;
        let height: c_int = to_c(coded_resolution.height)?;
        let mut context_id = 0;

        // Safe because a null render target list is valid when its length is zero.
        check(unsafe {
            ffi::vaCreateContext(
                raw(display),
                config.0,
                width,
                height,
                ffi::VA_PROGRESSIVE,
                std::ptr::null_mut(),
                0,
                &mut context_id,
            )
        })?;

        Ok(ContextId(context_id))
    }

    fn destroy_context(&mut self, display: DisplayHandle, context: ContextId) -> VaResult<()> {
        // Safe because `display` is a valid VADisplay.
        check(unsafe { ffi::vaDestroyContext(raw(display), context.0) })
    }

    fn create_buffer(
        &mut self,
        display: DisplayHandle,
        context: ContextId,
        kind: BufferKind,
        element_size: usize,
        num_elements: usize,
        data: Option<&[u8]>,
    ) -> VaResult<BufferId> {
        if let Some(data) = data {
            if data.len() != element_size * num_elements {
                return Err(VaStatus::ERROR_INVALID_PARAMETER.into());
            }
        }
        let element_size: c_uint = to_c(element_size)?;
        let num_elements: c_uint = to_c(num_elements)?;
        // libva copies `data` into the buffer and never writes through the pointer.
        let data_ptr = data.map_or(std::ptr::null_mut(), |d| d.as_ptr() as *mut c_void);
        let mut buffer_id = 0;

        // Safe because `data_ptr` is either null or points to `element_size * num_elements`
        // readable bytes.
        check(unsafe {
            ffi::vaCreateBuffer(
                raw(display),
                context.0,
                kind as ffi::VABufferType,
                element_size,
                num_elements,
                data_ptr,
                &mut buffer_id,
            )
        })?;

        Ok(BufferId(buffer_id))
    }

    fn map_buffer(
        &mut self,
        display: DisplayHandle,
        buffer: BufferId,
        size: usize,
    ) -> VaResult<&mut [u8]> {
        let mut ptr: *mut c_void = std::ptr::null_mut();

        // Safe because `ptr` is valid for the duration of the call.
        check(unsafe { ffi::vaMapBuffer(raw(display), buffer.0, &mut ptr) })?;

        if size == 0 {
            return Ok(&mut []);
        }
        if ptr.is_null() {
            return Err(VaStatus::ERROR_OPERATION_FAILED.into());
        }

        // Safe because libva mapped at least `size` bytes for this buffer, and the mapping stays
        // valid until `vaUnmapBuffer` which cannot be called while the returned slice borrows
        // the driver.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, size) })
    }

    fn unmap_buffer(&mut self, display: DisplayHandle, buffer: BufferId) -> VaResult<()> {
        // Safe because `display` is a valid VADisplay.
        check(unsafe { ffi::vaUnmapBuffer(raw(display), buffer.0) })
    }

    fn destroy_buffer(&mut self, display: DisplayHandle, buffer: BufferId) -> VaResult<()> {
        // Safe because `display` is a valid VADisplay.
        check(unsafe { ffi::vaDestroyBuffer(raw(display), buffer.0) })
    }

    fn begin_picture(
        &mut self,
        display: DisplayHandle,
        context: ContextId,
        target: SurfaceId,
    ) -> VaResult<()> {
        // Safe because `display` is a valid VADisplay.
        check(unsafe { ffi::vaBeginPicture(raw(display), context.0, target.0) })
    }

    fn render_picture(
        &mut self,
        display: DisplayHandle,
        context: ContextId,
        buffers: &[BufferId],
    ) -> VaResult<()> {
        let mut ids = buffers.iter().map(|b| b.0).collect::<Vec<_>>();
        let num_buffers: c_int = to_c(ids.len())?;

        // Safe because `ids` holds `num_buffers` valid entries.
        check(unsafe {
            ffi::vaRenderPicture(raw(display), context.0, ids.as_mut_ptr(), num_buffers)
        })
    }

    fn end_picture(&mut self, display: DisplayHandle, context: ContextId) -> VaResult<()> {
        // Safe because `display` is a valid VADisplay.
        check(unsafe { ffi::vaEndPicture(raw(display), context.0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::supports_profile;
    use crate::backend::VA_ENTRYPOINT_VLD;

    /// `VAProfileMPEG2Main`.
    const MPEG2_MAIN: VaProfile = 1;

    #[test]
    fn oversized_values_are_rejected() {
        assert_eq!(to_c::<u32, c_int>(1920).unwrap(), 1920);
        assert_eq!(
            to_c::<u32, c_int>(u32::MAX).unwrap_err().status(),
            VaStatus::ERROR_INVALID_PARAMETER
        );
    }

    #[test]
    fn oversized_resolution_is_rejected_before_calling_libva() {
        let mut driver = VaapiDriver::new();
        // Never dereferenced, as the resolution is checked first.
        let display = DisplayHandle::new(0x1000).unwrap();

        let err = driver
            .create_context(display, ConfigId(0), Resolution::from((u32::MAX, 1080)))
            .unwrap_err();
        assert_eq!(err.kind(), crate::status::VaErrorKind::InvalidArgument);
    }

    #[test]
    // Ignore this test by default as it requires libva-compatible hardware.
    #[ignore]
    fn query_profiles() {
        let _ = env_logger::try_init();

        let display = VaapiDisplay::open("/dev/dri/renderD128").unwrap();
        let mut driver = VaapiDriver::new();

        assert!(!driver.query_config_profiles(display.handle()).unwrap().is_empty());
        let _ = supports_profile(&mut driver, display.handle(), MPEG2_MAIN, VA_ENTRYPOINT_VLD)
            .unwrap();
    }
}
