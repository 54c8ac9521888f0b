// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy driver whose only purpose is to let the decode session run so we
//! can test it in isolation.
//!
//! Buffers live in host memory, every call is recorded, and any operation can be made to fail
//! once with a given status.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;

use bytes::Bytes;
use bytes::BytesMut;

use crate::backend::BufferId;
use crate::backend::BufferKind;
use crate::backend::ConfigId;
use crate::backend::ContextId;
use crate::backend::DisplayHandle;
use crate::backend::SurfaceId;
use crate::backend::VaDriver;
use crate::backend::VaEntrypoint;
use crate::backend::VaProfile;
use crate::backend::VA_ENTRYPOINT_VLD;
use crate::status::VaError;
use crate::status::VaResult;
use crate::status::VaStatus;
use crate::Resolution;

/// Operations that can be made to fail with [`DummyDriver::fail_next`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    CreateConfig,
    CreateContext,
    CreateBuffer(BufferKind),
    MapBuffer,
    UnmapBuffer,
    DestroyBuffer,
    BeginPicture,
    RenderPicture,
    EndPicture,
}

/// A driver call, as recorded by [`DummyDriver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    QueryProfiles,
    QueryEntrypoints(VaProfile),
    CreateConfig(ConfigId),
    DestroyConfig(ConfigId),
    CreateContext(ContextId),
    DestroyContext(ContextId),
    CreateBuffer(BufferKind, BufferId),
    MapBuffer(BufferId),
    UnmapBuffer(BufferId),
    DestroyBuffer(BufferId),
    BeginPicture(SurfaceId),
    RenderPicture(Vec<BufferId>),
    EndPicture,
}

pub struct DummyBuffer {
    pub kind: BufferKind,
    pub element_size: usize,
    pub num_elements: usize,
    pub mapped: bool,
    data: BytesMut,
}

impl DummyBuffer {
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Snapshot of a buffer at the time it was passed to `render_picture`.
#[derive(Clone, Debug)]
pub struct RenderedBuffer {
    pub id: BufferId,
    pub kind: BufferKind,
    pub element_size: usize,
    pub num_elements: usize,
    pub data: Bytes,
}

/// A complete begin/render/end sequence.
#[derive(Clone, Debug)]
pub struct Submission {
    pub target: SurfaceId,
    /// One entry per `render_picture` call, in call order.
    pub batches: Vec<Vec<RenderedBuffer>>,
}

pub struct DummyDriver {
    next_id: u32,
    profiles: BTreeMap<VaProfile, Vec<VaEntrypoint>>,
    configs: BTreeSet<ConfigId>,
    contexts: BTreeSet<ContextId>,
    buffers: BTreeMap<BufferId, DummyBuffer>,
    failures: Vec<(Op, VaStatus)>,
    calls: Vec<Call>,
    current: Option<Submission>,
    submissions: Vec<Submission>,
}

impl Default for DummyDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyDriver {
    /// Creates a driver advertising slice-level decoding for profiles 0 to 13.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            profiles: (0..14).map(|p| (p, vec![VA_ENTRYPOINT_VLD])).collect(),
            configs: Default::default(),
            contexts: Default::default(),
            buffers: Default::default(),
            failures: Default::default(),
            calls: Default::default(),
            current: None,
            submissions: Default::default(),
        }
    }

    /// Display handle to use with this driver. Its value is not checked.
    pub fn display() -> DisplayHandle {
        DisplayHandle(NonZeroUsize::MIN)
    }

    /// Makes the next call to `op` fail with `status`.
    pub fn fail_next(&mut self, op: Op, status: VaStatus) {
        self.failures.push((op, status));
    }

    /// Declares a context created outside of this driver, as a client would supply one.
    pub fn register_context(&mut self, context: ContextId) {
        self.contexts.insert(context);
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    pub fn buffer(&self, id: BufferId) -> Option<&DummyBuffer> {
        self.buffers.get(&id)
    }

    /// Number of buffers created and not destroyed yet.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub fn live_configs(&self) -> usize {
        self.configs.len()
    }

    fn check_failure(&mut self, op: Op) -> VaResult<()> {
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(pos) => Err(VaError::from(self.failures.remove(pos).1)),
            None => Ok(()),
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl VaDriver for DummyDriver {
    fn query_config_profiles(&mut self, _: DisplayHandle) -> VaResult<Vec<VaProfile>> {
        self.calls.push(Call::QueryProfiles);
        Ok(self.profiles.keys().copied().collect())
    }

    fn query_config_entrypoints(
        &mut self,
        _: DisplayHandle,
        profile: VaProfile,
    ) -> VaResult<Vec<VaEntrypoint>> {
        self.calls.push(Call::QueryEntrypoints(profile));
        self.profiles
            .get(&profile)
            .cloned()
            .ok_or_else(|| VaError::from(VaStatus::ERROR_UNSUPPORTED_PROFILE))
    }

    fn create_config(
        &mut self,
        _: DisplayHandle,
        profile: VaProfile,
        entrypoint: VaEntrypoint,
        _rt_format: u32,
    ) -> VaResult<ConfigId> {
        self.check_failure(Op::CreateConfig)?;
        match self.profiles.get(&profile) {
            None => return Err(VaStatus::ERROR_UNSUPPORTED_PROFILE.into()),
            Some(entrypoints) if !entrypoints.contains(&entrypoint) => {
                return Err(VaStatus::ERROR_UNSUPPORTED_ENTRYPOINT.into())
            }
            Some(_) => (),
        }

        let config = ConfigId(self.alloc_id());
        self.configs.insert(config);
        self.calls.push(Call::CreateConfig(config));
        Ok(config)
    }

    fn destroy_config(&mut self, _: DisplayHandle, config: ConfigId) -> VaResult<()> {
        self.calls.push(Call::DestroyConfig(config));
        if !self.configs.remove(&config) {
            return Err(VaStatus::ERROR_INVALID_CONFIG.into());
        }
        Ok(())
    }

    fn create_context(
        &mut self,
        _: DisplayHandle,
        config: ConfigId,
        _coded_resolution: Resolution,
    ) -> VaResult<ContextId> {
        self.check_failure(Op::CreateContext)?;
        if !self.configs.contains(&config) {
            return Err(VaStatus::ERROR_INVALID_CONFIG.into());
        }

        let context = ContextId(self.alloc_id());
        self.contexts.insert(context);
        self.calls.push(Call::CreateContext(context));
        Ok(context)
    }

    fn destroy_context(&mut self, _: DisplayHandle, context: ContextId) -> VaResult<()> {
        self.calls.push(Call::DestroyContext(context));
        if !self.contexts.remove(&context) {
            return Err(VaStatus::ERROR_INVALID_CONTEXT.into());
        }
        Ok(())
    }

    fn create_buffer(
        &mut self,
        _: DisplayHandle,
        context: ContextId,
        kind: BufferKind,
        element_size: usize,
        num_elements: usize,
        data: Option<&[u8]>,
    ) -> VaResult<BufferId> {
        self.check_failure(Op::CreateBuffer(kind))?;
        if !self.contexts.contains(&context) {
            return Err(VaStatus::ERROR_INVALID_CONTEXT.into());
        }

        let size = element_size * num_elements;
        let data = match data {
            Some(data) if data.len() != size => {
                return Err(VaStatus::ERROR_INVALID_PARAMETER.into())
            }
            Some(data) => BytesMut::from(data),
            None => BytesMut::zeroed(size),
        };

        let id = BufferId(self.alloc_id());
        self.buffers.insert(
            id,
            DummyBuffer {
                kind,
                element_size,
                num_elements,
                mapped: false,
                data,
            },
        );
        self.calls.push(Call::CreateBuffer(kind, id));
        Ok(id)
    }

    fn map_buffer(
        &mut self,
        _: DisplayHandle,
        buffer: BufferId,
        size: usize,
    ) -> VaResult<&mut [u8]> {
        self.check_failure(Op::MapBuffer)?;
        self.calls.push(Call::MapBuffer(buffer));
        let buf = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| VaError::from(VaStatus::ERROR_INVALID_BUFFER))?;
        if size > buf.data.len() {
            return Err(VaStatus::ERROR_INVALID_PARAMETER.into());
        }

        buf.mapped = true;
        Ok(&mut buf.data[..size])
    }

    fn unmap_buffer(&mut self, _: DisplayHandle, buffer: BufferId) -> VaResult<()> {
        self.check_failure(Op::UnmapBuffer)?;
        self.calls.push(Call::UnmapBuffer(buffer));
        let buf = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| VaError::from(VaStatus::ERROR_INVALID_BUFFER))?;
        if !buf.mapped {
            return Err(VaStatus::ERROR_OPERATION_FAILED.into());
        }

        buf.mapped = false;
        Ok(())
    }

    fn destroy_buffer(&mut self, _: DisplayHandle, buffer: BufferId) -> VaResult<()> {
        self.calls.push(Call::DestroyBuffer(buffer));
        // A failed destroy still releases the buffer, like most drivers do.
        let removed = self.buffers.remove(&buffer);
        self.check_failure(Op::DestroyBuffer)?;
        match removed {
            Some(_) => Ok(()),
            None => Err(VaStatus::ERROR_INVALID_BUFFER.into()),
        }
    }

    fn begin_picture(
        &mut self,
        _: DisplayHandle,
        context: ContextId,
        target: SurfaceId,
    ) -> VaResult<()> {
        self.check_failure(Op::BeginPicture)?;
        self.calls.push(Call::BeginPicture(target));
        if !self.contexts.contains(&context) {
            return Err(VaStatus::ERROR_INVALID_CONTEXT.into());
        }
        if self.current.is_some() {
            return Err(VaStatus::ERROR_OPERATION_FAILED.into());
        }

        self.current = Some(Submission {
            target,
            batches: Vec::new(),
        });
        Ok(())
    }

    fn render_picture(
        &mut self,
        _: DisplayHandle,
        _: ContextId,
        buffers: &[BufferId],
    ) -> VaResult<()> {
        self.check_failure(Op::RenderPicture)?;
        self.calls.push(Call::RenderPicture(buffers.to_vec()));

        let mut batch = Vec::with_capacity(buffers.len());
        for id in buffers {
            let buf = self
                .buffers
                .get(id)
                .ok_or_else(|| VaError::from(VaStatus::ERROR_INVALID_BUFFER))?;
            // The hardware cannot consume a buffer the CPU still has mapped.
            if buf.mapped {
                return Err(VaStatus::ERROR_INVALID_BUFFER.into());
            }
            batch.push(RenderedBuffer {
                id: *id,
                kind: buf.kind,
                element_size: buf.element_size,
                num_elements: buf.num_elements,
                data: buf.data.clone().freeze(),
            });
        }

        let current = self
            .current
            .as_mut()
            .ok_or_else(|| VaError::from(VaStatus::ERROR_OPERATION_FAILED))?;
        current.batches.push(batch);
        Ok(())
    }

    fn end_picture(&mut self, _: DisplayHandle, _: ContextId) -> VaResult<()> {
        self.check_failure(Op::EndPicture)?;
        self.calls.push(Call::EndPicture);
        let submission = self
            .current
            .take()
            .ok_or_else(|| VaError::from(VaStatus::ERROR_OPERATION_FAILED))?;
        self.submissions.push(submission);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with_context() -> (DummyDriver, ContextId) {
        let mut driver = DummyDriver::new();
        let display = DummyDriver::display();
        let config = driver.create_config(display, 1, VA_ENTRYPOINT_VLD, 1).unwrap();
        let context = driver
            .create_context(display, config, Resolution::from((16, 16)))
            .unwrap();
        (driver, context)
    }

    #[test]
    fn buffer_lifecycle() {
        let (mut driver, context) = driver_with_context();
        let display = DummyDriver::display();

        let id = driver
            .create_buffer(display, context, BufferKind::PictureParameter, 8, 1, None)
            .unwrap();
        driver.map_buffer(display, id, 8).unwrap().copy_from_slice(b"abcdefgh");
        assert!(driver.buffer(id).unwrap().mapped);
        driver.unmap_buffer(display, id).unwrap();
        assert_eq!(driver.buffer(id).unwrap().data(), b"abcdefgh");

        driver.destroy_buffer(display, id).unwrap();
        assert_eq!(driver.live_buffers(), 0);
        // Double destruction is caught.
        assert_eq!(
            driver.destroy_buffer(display, id).unwrap_err().status(),
            VaStatus::ERROR_INVALID_BUFFER
        );
    }

    #[test]
    fn mapped_buffers_cannot_be_rendered() {
        let (mut driver, context) = driver_with_context();
        let display = DummyDriver::display();

        let id = driver
            .create_buffer(display, context, BufferKind::PictureParameter, 4, 1, None)
            .unwrap();
        driver.map_buffer(display, id, 4).unwrap();
        driver.begin_picture(display, context, SurfaceId(0)).unwrap();
        assert!(driver.render_picture(display, context, &[id]).is_err());
    }

    #[test]
    fn injected_failure_fires_once() {
        let (mut driver, context) = driver_with_context();
        let display = DummyDriver::display();

        driver.fail_next(
            Op::CreateBuffer(BufferKind::SliceData),
            VaStatus::ERROR_ALLOCATION_FAILED,
        );
        // Other buffer kinds are not affected.
        assert!(driver
            .create_buffer(display, context, BufferKind::SliceParameter, 12, 1, None)
            .is_ok());
        assert_eq!(
            driver
                .create_buffer(display, context, BufferKind::SliceData, 1, 4, None)
                .unwrap_err()
                .status(),
            VaStatus::ERROR_ALLOCATION_FAILED
        );
        assert!(driver
            .create_buffer(display, context, BufferKind::SliceData, 1, 4, None)
            .is_ok());
    }

    #[test]
    fn data_size_must_match() {
        let (mut driver, context) = driver_with_context();
        let display = DummyDriver::display();

        assert!(driver
            .create_buffer(display, context, BufferKind::SliceData, 4, 1, Some(&[0u8; 3]))
            .is_err());
    }

    #[test]
    fn unknown_context_is_rejected() {
        let mut driver = DummyDriver::new();
        let display = DummyDriver::display();

        assert_eq!(
            driver
                .create_buffer(display, ContextId(99), BufferKind::SliceData, 1, 1, None)
                .unwrap_err()
                .status(),
            VaStatus::ERROR_INVALID_CONTEXT
        );
        driver.register_context(ContextId(99));
        assert!(driver
            .create_buffer(display, ContextId(99), BufferKind::SliceData, 1, 1, None)
            .is_ok());
    }
}
