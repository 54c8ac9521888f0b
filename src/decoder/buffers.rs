// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-frame table of hardware buffers.
//!
//! Each buffer reference is an `Option<BufferHandle>`: `None` means no buffer, and destroying a
//! buffer always goes through `Option::take` so the same buffer can never be released twice.

use crate::backend::BufferId;
use crate::backend::BufferKind;
use crate::backend::ContextId;
use crate::backend::DisplayHandle;
use crate::backend::VaDriver;
use crate::decoder::AllocError;

/// A live hardware buffer owned by a decode session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferHandle {
    id: BufferId,
    kind: BufferKind,
    size: usize,
    mapped: bool,
}

impl BufferHandle {
    pub(crate) fn new(id: BufferId, kind: BufferKind, size: usize) -> Self {
        Self {
            id,
            kind,
            size,
            mapped: false,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the buffer is currently mapped into the process.
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

/// Creates a `size`-byte buffer of type `kind`, stores it into `slot` and maps it.
///
/// A buffer already present in `slot` is released first. If the buffer is created but cannot be
/// mapped, it is kept in `slot` (unmapped) so the next teardown releases it.
pub(crate) fn allocate<'a, D: VaDriver + ?Sized>(
    driver: &'a mut D,
    display: DisplayHandle,
    context: ContextId,
    slot: &mut Option<BufferHandle>,
    kind: BufferKind,
    size: usize,
) -> Result<&'a mut [u8], AllocError> {
    if slot.is_some() {
        log::warn!("{:?} buffer allocated twice in the same frame", kind);
        destroy(driver, display, slot);
    }

    let id = driver
        .create_buffer(display, context, kind, size, 1, None)
        .map_err(|source| AllocError::Create { kind, source })?;
    let handle = slot.insert(BufferHandle::new(id, kind, size));

    let data = driver
        .map_buffer(display, id, size)
        .map_err(|source| AllocError::Map { kind, source })?;
    handle.mapped = true;

    log::debug!("allocated {:?} buffer {:?} ({} bytes)", kind, id, size);
    Ok(data)
}

/// Unmaps `handle` if it is mapped. Failures are logged, as the buffer is going away or being
/// handed to the hardware anyway.
pub(crate) fn unmap<D: VaDriver + ?Sized>(
    driver: &mut D,
    display: DisplayHandle,
    handle: &mut BufferHandle,
) {
    if !handle.mapped {
        return;
    }

    if let Err(e) = driver.unmap_buffer(display, handle.id) {
        log::warn!("failed to unmap {:?} buffer {:?}: {}", handle.kind, handle.id, e);
    }
    handle.mapped = false;
}

/// Releases the buffer in `slot`, if any, and leaves `slot` empty. A no-op on an empty slot.
pub(crate) fn destroy<D: VaDriver + ?Sized>(
    driver: &mut D,
    display: DisplayHandle,
    slot: &mut Option<BufferHandle>,
) {
    if let Some(mut handle) = slot.take() {
        release(driver, display, &mut handle);
    }
}

fn release<D: VaDriver + ?Sized>(
    driver: &mut D,
    display: DisplayHandle,
    handle: &mut BufferHandle,
) {
    unmap(driver, display, handle);
    if let Err(e) = driver.destroy_buffer(display, handle.id) {
        log::warn!("failed to destroy {:?} buffer {:?}: {}", handle.kind, handle.id, e);
    }
}

/// All the hardware buffers created for the frame being decoded.
#[derive(Debug, Default)]
pub(crate) struct FrameBuffers {
    pub(crate) pic_param: Option<BufferHandle>,
    pub(crate) iq_matrix: Option<BufferHandle>,
    pub(crate) bitplane: Option<BufferHandle>,
    /// Slice parameter and slice data buffers, in submission order.
    pub(crate) slices: Vec<BufferHandle>,
}

impl FrameBuffers {
    /// Destroys every buffer of the frame and releases the slice buffer list.
    pub(crate) fn release_all<D: VaDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        display: DisplayHandle,
    ) {
        destroy(driver, display, &mut self.pic_param);
        destroy(driver, display, &mut self.iq_matrix);
        destroy(driver, display, &mut self.bitplane);

        for mut handle in std::mem::take(&mut self.slices) {
            release(driver, display, &mut handle);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pic_param.is_none()
            && self.iq_matrix.is_none()
            && self.bitplane.is_none()
            && self.slices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::Call;
    use crate::backend::dummy::DummyDriver;
    use crate::backend::dummy::Op;
    use crate::backend::VA_ENTRYPOINT_VLD;
    use crate::status::VaStatus;
    use crate::Resolution;

    fn setup() -> (DummyDriver, DisplayHandle, ContextId) {
        let mut driver = DummyDriver::new();
        let display = DummyDriver::display();
        let config = driver.create_config(display, 1, VA_ENTRYPOINT_VLD, 1).unwrap();
        let context = driver
            .create_context(display, config, Resolution::from((16, 16)))
            .unwrap();
        (driver, display, context)
    }

    #[test]
    fn allocate_maps_writable_memory() {
        let (mut driver, display, context) = setup();
        let mut slot = None;

        let data = allocate(
            &mut driver,
            display,
            context,
            &mut slot,
            BufferKind::PictureParameter,
            4,
        )
        .unwrap();
        data.copy_from_slice(&[1, 2, 3, 4]);

        let handle = slot.unwrap();
        assert!(handle.is_mapped());
        assert_eq!(handle.size(), 4);
        assert_eq!(driver.buffer(handle.id()).unwrap().data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn create_failure_leaves_slot_empty() {
        let (mut driver, display, context) = setup();
        let mut slot = None;

        driver.fail_next(
            Op::CreateBuffer(BufferKind::IqMatrix),
            VaStatus::ERROR_ALLOCATION_FAILED,
        );
        let err = allocate(&mut driver, display, context, &mut slot, BufferKind::IqMatrix, 8)
            .unwrap_err();
        assert!(matches!(err, AllocError::Create { kind: BufferKind::IqMatrix, .. }));
        assert!(slot.is_none());
        assert_eq!(driver.live_buffers(), 0);
    }

    #[test]
    fn map_failure_keeps_buffer_for_teardown() {
        let (mut driver, display, context) = setup();
        let mut slot = None;

        driver.fail_next(Op::MapBuffer, VaStatus::ERROR_INVALID_BUFFER);
        let err = allocate(&mut driver, display, context, &mut slot, BufferKind::BitPlane, 8)
            .unwrap_err();
        assert!(matches!(err, AllocError::Map { kind: BufferKind::BitPlane, .. }));

        let handle = slot.unwrap();
        assert!(!handle.is_mapped());
        assert_eq!(driver.live_buffers(), 1);

        destroy(&mut driver, display, &mut slot);
        assert!(slot.is_none());
        assert_eq!(driver.live_buffers(), 0);
    }

    #[test]
    fn destroy_is_idempotent() {
        let (mut driver, display, context) = setup();
        let mut slot = None;

        allocate(
            &mut driver,
            display,
            context,
            &mut slot,
            BufferKind::PictureParameter,
            4,
        )
        .unwrap();
        let id = slot.unwrap().id();

        driver.clear_calls();
        destroy(&mut driver, display, &mut slot);
        destroy(&mut driver, display, &mut slot);
        // Mapped buffers are unmapped before being destroyed, and only once.
        assert_eq!(driver.calls(), &[Call::UnmapBuffer(id), Call::DestroyBuffer(id)]);
    }

    #[test]
    fn reallocation_releases_previous_buffer() {
        let (mut driver, display, context) = setup();
        let mut slot = None;

        allocate(
            &mut driver,
            display,
            context,
            &mut slot,
            BufferKind::PictureParameter,
            4,
        )
        .unwrap();
        let first = slot.unwrap().id();
        allocate(
            &mut driver,
            display,
            context,
            &mut slot,
            BufferKind::PictureParameter,
            4,
        )
        .unwrap();

        assert_ne!(slot.unwrap().id(), first);
        assert!(driver.buffer(first).is_none());
        assert_eq!(driver.live_buffers(), 1);
    }

    #[test]
    fn release_all_empties_the_frame() {
        let (mut driver, display, context) = setup();
        let mut frame = FrameBuffers::default();

        allocate(
            &mut driver,
            display,
            context,
            &mut frame.pic_param,
            BufferKind::PictureParameter,
            4,
        )
        .unwrap();
        allocate(
            &mut driver,
            display,
            context,
            &mut frame.iq_matrix,
            BufferKind::IqMatrix,
            4,
        )
        .unwrap();
        let id = driver
            .create_buffer(display, context, BufferKind::SliceData, 16, 1, None)
            .unwrap();
        frame.slices.push(BufferHandle::new(id, BufferKind::SliceData, 16));
        assert!(!frame.is_empty());

        frame.release_all(&mut driver, display);
        assert!(frame.is_empty());
        assert_eq!(frame.slices.capacity(), 0);
        assert_eq!(driver.live_buffers(), 0);

        // Releasing again issues no driver call.
        driver.clear_calls();
        frame.release_all(&mut driver, display);
        assert!(driver.calls().is_empty());
    }
}
