// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared code for hardware backends.
//!
//! A backend is a provider of hardware-accelerated decoding, most likely VAAPI. The decode session
//! only talks to it through the [`VaDriver`] trait, which mirrors the small subset of libva entry
//! points needed to allocate buffers and submit them for decoding.

use std::num::NonZeroUsize;

use enumn::N;

use crate::status::VaResult;
use crate::Resolution;

pub mod dummy;
#[cfg(feature = "vaapi")]
pub mod vaapi;

/// Value libva uses for "no object" in all of its ID namespaces.
pub const VA_INVALID_ID: u32 = 0xffff_ffff;

/// `VAEntrypointVLD`, the slice-level decoding entrypoint.
pub const VA_ENTRYPOINT_VLD: VaEntrypoint = 1;

/// Raw `VAProfile` value.
pub type VaProfile = i32;
/// Raw `VAEntrypoint` value.
pub type VaEntrypoint = u32;

/// Opaque handle to an initialized VA display. Never null.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DisplayHandle(NonZeroUsize);

impl DisplayHandle {
    /// Wraps a raw `VADisplay` value, returning `None` for a null display.
    pub fn new(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(Self)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

macro_rules! va_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns `None` if `raw` is `VA_INVALID_ID`.
            pub fn new(raw: u32) -> Option<Self> {
                (raw != VA_INVALID_ID).then_some(Self(raw))
            }
        }
    };
}

va_id!(
    /// `VABufferID`.
    BufferId
);
va_id!(
    /// `VAContextID`.
    ContextId
);
va_id!(
    /// `VAConfigID`.
    ConfigId
);
va_id!(
    /// `VASurfaceID`.
    SurfaceId
);

/// The `VABufferType`s this crate allocates.
///
/// Raw `VABufferType` values, e.g. read back from driver traces, can be converted with
/// `BufferKind::n`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, N)]
#[repr(u32)]
pub enum BufferKind {
    PictureParameter = 0,
    IqMatrix = 1,
    BitPlane = 2,
    SliceParameter = 4,
    SliceData = 5,
}

/// The subset of libva used to allocate decode buffers and submit them to the hardware.
///
/// Every method takes the display it operates on, so a single driver can serve several
/// sessions. Calls for a given context are expected to come from one thread of control.
pub trait VaDriver {
    /// Returns all the profiles supported by `display`.
    fn query_config_profiles(&mut self, display: DisplayHandle) -> VaResult<Vec<VaProfile>>;

    /// Returns all the entrypoints supported by `display` for `profile`.
    fn query_config_entrypoints(
        &mut self,
        display: DisplayHandle,
        profile: VaProfile,
    ) -> VaResult<Vec<VaEntrypoint>>;

    fn create_config(
        &mut self,
        display: DisplayHandle,
        profile: VaProfile,
        entrypoint: VaEntrypoint,
        rt_format: u32,
    ) -> VaResult<ConfigId>;

    fn destroy_config(&mut self, display: DisplayHandle, config: ConfigId) -> VaResult<()>;

    fn create_context(
        &mut self,
        display: DisplayHandle,
        config: ConfigId,
        coded_resolution: Resolution,
    ) -> VaResult<ContextId>;

    fn destroy_context(&mut self, display: DisplayHandle, context: ContextId) -> VaResult<()>;

    /// Creates a buffer of `num_elements` elements of `element_size` bytes each. If `data` is
    /// provided, it is copied into the buffer and must be exactly that size.
    fn create_buffer(
        &mut self,
        display: DisplayHandle,
        context: ContextId,
        kind: BufferKind,
        element_size: usize,
        num_elements: usize,
        data: Option<&[u8]>,
    ) -> VaResult<BufferId>;

    /// Maps the first `size` bytes of `buffer` into the address space of the process. The
    /// mapping remains valid on the hardware side until [`VaDriver::unmap_buffer`] is called.
    fn map_buffer(
        &mut self,
        display: DisplayHandle,
        buffer: BufferId,
        size: usize,
    ) -> VaResult<&mut [u8]>;

    fn unmap_buffer(&mut self, display: DisplayHandle, buffer: BufferId) -> VaResult<()>;

    fn destroy_buffer(&mut self, display: DisplayHandle, buffer: BufferId) -> VaResult<()>;

    fn begin_picture(
        &mut self,
        display: DisplayHandle,
        context: ContextId,
        target: SurfaceId,
    ) -> VaResult<()>;

    fn render_picture(
        &mut self,
        display: DisplayHandle,
        context: ContextId,
        buffers: &[BufferId],
    ) -> VaResult<()>;

    /// Ends the operation started by [`VaDriver::begin_picture`]. Decoding proceeds
    /// asynchronously after this returns.
    fn end_picture(&mut self, display: DisplayHandle, context: ContextId) -> VaResult<()>;
}

impl<D: VaDriver + ?Sized> VaDriver for &mut D {
    fn query_config_profiles(&mut self, display: DisplayHandle) -> VaResult<Vec<VaProfile>> {
        (**self).query_config_profiles(display)
    }

    fn query_config_entrypoints(
        &mut self,
        display: DisplayHandle,
        profile: VaProfile,
    ) -> VaResult<Vec<VaEntrypoint>> {
        (**self).query_config_entrypoints(display, profile)
    }

    fn create_config(
        &mut self,
        display: DisplayHandle,
        profile: VaProfile,
        entrypoint: VaEntrypoint,
        rt_format: u32,
    ) -> VaResult<ConfigId> {
        (**self).create_config(display, profile, entrypoint, rt_format)
    }

    fn destroy_config(&mut self, display: DisplayHandle, config: ConfigId) -> VaResult<()> {
        (**self).destroy_config(display, config)
    }

    fn create_context(
        &mut self,
        display: DisplayHandle,
        config: ConfigId,
        coded_resolution: Resolution,
    ) -> VaResult<ContextId> {
        (**self).create_context(display, config, coded_resolution)
    }

    fn destroy_context(&mut self, display: DisplayHandle, context: ContextId) -> VaResult<()> {
        (**self).destroy_context(display, context)
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
        (**self).create_buffer(display, context, kind, element_size, num_elements, data)
    }

    fn map_buffer(
        &mut self,
        display: DisplayHandle,
        buffer: BufferId,
        size: usize,
    ) -> VaResult<&mut [u8]> {
        (**self).map_buffer(display, buffer, size)
    }

    fn unmap_buffer(&mut self, display: DisplayHandle, buffer: BufferId) -> VaResult<()> {
        (**self).unmap_buffer(display, buffer)
    }

    fn destroy_buffer(&mut self, display: DisplayHandle, buffer: BufferId) -> VaResult<()> {
        (**self).destroy_buffer(display, buffer)
    }

    fn begin_picture(
        &mut self,
        display: DisplayHandle,
        context: ContextId,
        target: SurfaceId,
    ) -> VaResult<()> {
        (**self).begin_picture(display, context, target)
    }

    fn render_picture(
        &mut self,
        display: DisplayHandle,
        context: ContextId,
        buffers: &[BufferId],
    ) -> VaResult<()> {
        (**self).render_picture(display, context, buffers)
    }

    fn end_picture(&mut self, display: DisplayHandle, context: ContextId) -> VaResult<()> {
        (**self).end_picture(display, context)
    }
}

/// Returns whether `display` can decode `profile` through `entrypoint`.
pub fn supports_profile<D: VaDriver + ?Sized>(
    driver: &mut D,
    display: DisplayHandle,
    profile: VaProfile,
    entrypoint: VaEntrypoint,
) -> VaResult<bool> {
    if !driver.query_config_profiles(display)?.contains(&profile) {
        return Ok(false);
    }

    Ok(driver.query_config_entrypoints(display, profile)?.contains(&entrypoint))
}

#[cfg(test)]
mod tests {
    use super::dummy::DummyDriver;
    use super::*;

    #[test]
    fn null_display_is_rejected() {
        assert!(DisplayHandle::new(0).is_none());
        assert_eq!(DisplayHandle::new(0x1000).unwrap().as_raw(), 0x1000);
    }

    #[test]
    fn invalid_id_maps_to_none() {
        assert_eq!(BufferId::new(VA_INVALID_ID), None);
        assert_eq!(SurfaceId::new(3), Some(SurfaceId(3)));
    }

    #[test]
    fn buffer_kind_raw_values() {
        assert_eq!(BufferKind::n(0), Some(BufferKind::PictureParameter));
        assert_eq!(BufferKind::n(4), Some(BufferKind::SliceParameter));
        assert_eq!(BufferKind::n(5), Some(BufferKind::SliceData));
        assert_eq!(BufferKind::n(3), None);
    }

    #[test]
    fn profile_support() {
        let mut driver = DummyDriver::new();
        let display = DummyDriver::display();

        assert!(supports_profile(&mut driver, display, 1, VA_ENTRYPOINT_VLD).unwrap());
        assert!(!supports_profile(&mut driver, display, 1, 6).unwrap());
        assert!(!supports_profile(&mut driver, display, 42, VA_ENTRYPOINT_VLD).unwrap());
    }
}
