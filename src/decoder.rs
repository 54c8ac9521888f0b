// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode sessions.
//!
//! A [`DecodeSession`] binds a VA display and context to a stream, and manages the buffers of one
//! frame at a time. A frame is decoded by:
//!
//! 1. Allocating and filling the picture parameters, and optionally the inverse quantization
//!    matrix and bitplane ([`DecodeSession::alloc_pic_param`] and friends),
//! 2. Appending every slice of the frame in bitstream order ([`DecodeSession::alloc_slice`]),
//! 3. Submitting the frame with [`DecodeSession::finish_frame`], or with the individual
//!    [`DecodeSession::commit_slices`], [`DecodeSession::render_picture`] and
//!    [`DecodeSession::end_frame`] steps.
//!
//! [`DecodeSession::end_frame`] must run after every frame, whether it could be submitted or not.

pub mod buffers;
pub mod slices;

use std::collections::TryReserveError;

use thiserror::Error;

use crate::backend::supports_profile;
use crate::backend::BufferId;
use crate::backend::BufferKind;
use crate::backend::ConfigId;
use crate::backend::ContextId;
use crate::backend::DisplayHandle;
use crate::backend::SurfaceId;
use crate::backend::VaDriver;
use crate::config::ConfigError;
use crate::config::PipelineFlags;
use crate::config::PipelineParams;
use crate::config::StreamParams;
use crate::decoder::buffers::BufferHandle;
use crate::decoder::buffers::FrameBuffers;
use crate::decoder::slices::SliceAccumulator;
use crate::decoder::slices::SliceParams;
use crate::decoder::slices::SLICE_PARAM_BASE_SIZE;
use crate::status::VaError;

/// Error returned when the buffers of a frame cannot be allocated.
#[derive(Error, Debug)]
pub enum AllocError {
    #[error("failed to create {kind:?} buffer: {source}")]
    Create { kind: BufferKind, source: VaError },
    #[error("failed to map {kind:?} buffer: {source}")]
    Map { kind: BufferKind, source: VaError },
    #[error("out of host memory")]
    HostMemory(#[from] TryReserveError),
    #[error("slice data does not fit in a single buffer")]
    SliceTooLarge,
}

/// Error returned when a frame cannot be submitted to the hardware.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("failed to begin picture: {0}")]
    Begin(#[source] VaError),
    #[error("failed to render picture parameters: {0}")]
    RenderPicture(#[source] VaError),
    #[error("failed to render slices: {0}")]
    RenderSlices(#[source] VaError),
    #[error("failed to end picture: {0}")]
    End(#[source] VaError),
}

/// Error returned by [`DecodeSession::finish_frame`].
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Hardware context a session decodes into.
#[derive(Debug)]
enum SessionContext {
    /// Created by the client, who keeps ownership.
    External(ContextId),
    /// Created by the session, and destroyed along with it.
    Owned { config: ConfigId, context: ContextId },
}

impl SessionContext {
    fn id(&self) -> ContextId {
        match self {
            SessionContext::External(context) => *context,
            SessionContext::Owned { context, .. } => *context,
        }
    }
}

/// Decoding state for one stream, and the buffers of the frame being decoded.
pub struct DecodeSession<D: VaDriver> {
    driver: D,
    display: DisplayHandle,
    flags: PipelineFlags,
    context: SessionContext,
    frame: FrameBuffers,
    slices: SliceAccumulator,
}

impl<D: VaDriver> DecodeSession<D> {
    /// Creates a session decoding the stream described by `stream` on the display of `params`.
    ///
    /// If `params` names a context, it is used as-is. Otherwise a config and context are created
    /// for `stream` and destroyed when the session is dropped.
    pub fn new(
        mut driver: D,
        params: &PipelineParams,
        stream: &StreamParams,
    ) -> Result<Self, ConfigError> {
        let display = params.display().ok_or(ConfigError::NoDisplay)?;
        if stream.slice_param_size < SLICE_PARAM_BASE_SIZE {
            return Err(ConfigError::SliceParamSize {
                size: stream.slice_param_size,
                min: SLICE_PARAM_BASE_SIZE,
            });
        }

        let context = match params.context() {
            Some(context) => {
                log::debug!("using client context {:?}", context);
                SessionContext::External(context)
            }
            None => Self::create_context(&mut driver, display, params.flags(), stream)?,
        };

        Ok(Self {
            driver,
            display,
            flags: params.flags(),
            context,
            frame: Default::default(),
            slices: SliceAccumulator::new(stream.slice_param_size),
        })
    }

    fn create_context(
        driver: &mut D,
        display: DisplayHandle,
        flags: PipelineFlags,
        stream: &StreamParams,
    ) -> Result<SessionContext, ConfigError> {
        if !supports_profile(driver, display, stream.profile, stream.entrypoint)? {
            if !flags.contains(PipelineFlags::ALLOW_PROFILE_MISMATCH) {
                return Err(ConfigError::UnsupportedProfile {
                    profile: stream.profile,
                    entrypoint: stream.entrypoint,
                });
            }
            log::warn!(
                "profile {} is not advertised for entrypoint {}, trying anyway",
                stream.profile,
                stream.entrypoint
            );
        }

        let rt_format = stream.pixel_format.rt_format()?;
        let config = driver.create_config(display, stream.profile, stream.entrypoint, rt_format)?;
        let context = match driver.create_context(display, config, stream.coded_resolution) {
            Ok(context) => context,
            Err(e) => {
                if let Err(destroy_err) = driver.destroy_config(display, config) {
                    log::warn!("failed to destroy config {:?}: {}", config, destroy_err);
                }
                return Err(e.into());
            }
        };

        log::debug!(
            "created context {:?} for profile {} at {}x{} ({:?})",
            context,
            stream.profile,
            stream.coded_resolution.width,
            stream.coded_resolution.height,
            stream.pixel_format
        );
        Ok(SessionContext::Owned { config, context })
    }

    pub fn display(&self) -> DisplayHandle {
        self.display
    }

    /// Context the frames are decoded into.
    pub fn context(&self) -> ContextId {
        self.context.id()
    }

    /// Whether the context has been created by the session.
    pub fn owns_context(&self) -> bool {
        matches!(self.context, SessionContext::Owned { .. })
    }

    pub fn flags(&self) -> PipelineFlags {
        self.flags
    }

    pub fn slice_param_size(&self) -> usize {
        self.slices.record_size()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn pic_param(&self) -> Option<&BufferHandle> {
        self.frame.pic_param.as_ref()
    }

    pub fn iq_matrix(&self) -> Option<&BufferHandle> {
        self.frame.iq_matrix.as_ref()
    }

    pub fn bitplane(&self) -> Option<&BufferHandle> {
        self.frame.bitplane.as_ref()
    }

    /// Slice buffers committed so far for the current frame, in submission order.
    pub fn committed_buffers(&self) -> &[BufferHandle] {
        &self.frame.slices
    }

    /// Number of slices appended since the last commit.
    pub fn pending_slices(&self) -> usize {
        self.slices.pending_slices()
    }

    /// Number of slice data bytes appended since the last commit.
    pub fn pending_bytes(&self) -> usize {
        self.slices.pending_bytes()
    }

    /// Whether the current frame holds no buffer and no pending slice.
    pub fn is_frame_empty(&self) -> bool {
        self.frame.is_empty() && self.slices.pending_slices() == 0
    }

    /// Allocates the picture parameter buffer of the frame and returns its `size` bytes for the
    /// codec to fill.
    pub fn alloc_pic_param(&mut self, size: usize) -> Result<&mut [u8], AllocError> {
        buffers::allocate(
            &mut self.driver,
            self.display,
            self.context.id(),
            &mut self.frame.pic_param,
            BufferKind::PictureParameter,
            size,
        )
    }

    /// Allocates the inverse quantization matrix buffer of the frame.
    pub fn alloc_iq_matrix(&mut self, size: usize) -> Result<&mut [u8], AllocError> {
        buffers::allocate(
            &mut self.driver,
            self.display,
            self.context.id(),
            &mut self.frame.iq_matrix,
            BufferKind::IqMatrix,
            size,
        )
    }

    /// Allocates the bitplane buffer of the frame.
    pub fn alloc_bitplane(&mut self, size: usize) -> Result<&mut [u8], AllocError> {
        buffers::allocate(
            &mut self.driver,
            self.display,
            self.context.id(),
            &mut self.frame.bitplane,
            BufferKind::BitPlane,
            size,
        )
    }

    /// Appends the slice whose data is `payload` to the frame.
    ///
    /// `payload` must point into the bitstream buffer, as slices that directly follow each other
    /// in memory share their hardware buffers. The returned record has its common header filled,
    /// and the codec is expected to fill the rest.
    pub fn alloc_slice(&mut self, payload: &[u8]) -> Result<SliceParams<'_>, AllocError> {
        self.slices.append(
            &mut self.driver,
            self.display,
            self.context.id(),
            &mut self.frame.slices,
            payload,
        )
    }

    /// Turns the pending slices into hardware buffers. Does nothing if there are none.
    pub fn commit_slices(&mut self) -> Result<(), AllocError> {
        self.slices.commit(
            &mut self.driver,
            self.display,
            self.context.id(),
            &mut self.frame.slices,
        )
    }

    /// Submits the frame for decoding into `surface`.
    ///
    /// Slices that have not been committed are not submitted. Returns immediately if no picture
    /// parameters have been allocated for this frame.
    pub fn render_picture(&mut self, surface: SurfaceId) -> Result<(), SubmitError> {
        let display = self.display;
        let context = self.context.id();
        let driver = &mut self.driver;
        let frame = &mut self.frame;

        if frame.pic_param.is_none() {
            log::debug!("no picture parameters, not rendering into {:?}", surface);
            return Ok(());
        }

        let mut picture = Vec::with_capacity(3);
        for handle in [&mut frame.pic_param, &mut frame.iq_matrix, &mut frame.bitplane]
            .into_iter()
            .flatten()
        {
            buffers::unmap(driver, display, handle);
            picture.push(handle.id());
        }
        let slices = frame.slices.iter().map(|h| h.id()).collect::<Vec<BufferId>>();

        driver
            .begin_picture(display, context, surface)
            .map_err(SubmitError::Begin)?;
        driver
            .render_picture(display, context, &picture)
            .map_err(SubmitError::RenderPicture)?;
        driver
            .render_picture(display, context, &slices)
            .map_err(SubmitError::RenderSlices)?;
        driver
            .end_picture(display, context)
            .map_err(SubmitError::End)?;

        log::debug!(
            "submitted {} picture and {} slice buffers for {:?}",
            picture.len(),
            slices.len(),
            surface
        );
        Ok(())
    }

    /// Releases all the buffers of the current frame and drops its pending slices.
    pub fn end_frame(&mut self) {
        self.frame.release_all(&mut self.driver, self.display);
        self.slices.reset();
    }

    /// Commits the pending slices, submits the frame for decoding into `surface`, and ends the
    /// frame whatever the outcome.
    pub fn finish_frame(&mut self, surface: SurfaceId) -> Result<(), FrameError> {
        let res = self
            .commit_slices()
            .map_err(FrameError::from)
            .and_then(|()| self.render_picture(surface).map_err(FrameError::from));
        if let Err(e) = &res {
            log::error!("failed to decode frame into {:?}: {}", surface, e);
        }

        self.end_frame();
        res
    }
}

impl<D: VaDriver> Drop for DecodeSession<D> {
    fn drop(&mut self) {
        self.end_frame();

        if let SessionContext::Owned { config, context } = self.context {
            if let Err(e) = self.driver.destroy_context(self.display, context) {
                log::error!("failed to destroy context {:?}: {}", context, e);
            }
            if let Err(e) = self.driver.destroy_config(self.display, config) {
                log::error!("failed to destroy config {:?}: {}", config, e);
            }
        }
    }
}

/// Entry point of a client: collects the pipeline parameters, then runs a [`DecodeSession`] with
/// them.
pub struct HwAccel<D: VaDriver> {
    params: PipelineParams,
    session: Option<DecodeSession<D>>,
}

impl<D: VaDriver> Default for HwAccel<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: VaDriver> HwAccel<D> {
    pub fn new() -> Self {
        Self {
            params: Default::default(),
            session: None,
        }
    }

    /// Binds the VA display `display` to the future session, with `flags` and any other parameter
    /// in `extra`. `display` and `flags` take precedence over the same keys in `extra`.
    ///
    /// Fails with [`ConfigError::InvalidCallPoint`] once the session has been started, and with
    /// [`ConfigError::NoDisplay`] if `display` is null.
    pub fn set_pipeline_params(
        &mut self,
        display: usize,
        flags: PipelineFlags,
        extra: &[(&str, &str)],
    ) -> Result<(), ConfigError> {
        if self.session.is_some() {
            log::error!("pipeline parameters set while a session is running");
            return Err(ConfigError::InvalidCallPoint);
        }
        let display = DisplayHandle::new(display).ok_or(ConfigError::NoDisplay)?;

        let mut params = self.params.clone();
        params.apply(extra.iter().copied())?;
        params.set_flags(flags);
        params.set_display(display);

        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// Starts the session for `stream` using the current pipeline parameters.
    pub fn init(
        &mut self,
        driver: D,
        stream: &StreamParams,
    ) -> Result<&mut DecodeSession<D>, ConfigError> {
        if self.session.is_some() {
            return Err(ConfigError::InvalidCallPoint);
        }

        let session = DecodeSession::new(driver, &self.params, stream)?;
        Ok(self.session.insert(session))
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&DecodeSession<D>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut DecodeSession<D>> {
        self.session.as_mut()
    }

    /// Stops the session, releasing its hardware resources. Pipeline parameters can be set again
    /// afterwards.
    pub fn uninit(&mut self) {
        self.session = None;
    }
}
