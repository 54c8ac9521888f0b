// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Configuration of a decode session.
//!
//! [`PipelineParams`] binds a VA display (and optionally a client-owned VA context) to a session.
//! It can be built programmatically or from key/value pairs, using the `flags`, `display` and
//! `context` keys. [`StreamParams`] describes the stream being decoded.

use std::ops::BitOr;

use thiserror::Error;

use crate::backend::ContextId;
use crate::backend::DisplayHandle;
use crate::backend::VaEntrypoint;
use crate::backend::VaProfile;
use crate::backend::VA_ENTRYPOINT_VLD;
use crate::status::VaError;
use crate::PixelFormat;
use crate::Resolution;

/// Key for the pipeline flags (`u32`).
pub const PARAM_FLAGS: &str = "flags";
/// Key for the VA display (pointer-sized integer, `0` meaning none).
pub const PARAM_DISPLAY: &str = "display";
/// Key for a client-owned VA context id (`u32`, `VA_INVALID_ID` meaning none).
///
/// If set, the client allocates and owns the context, and the session never destroys it.
pub const PARAM_CONTEXT: &str = "context";

/// Error returned while configuring a session.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("pipeline parameters can only be set before the hardware session is started")]
    InvalidCallPoint,
    #[error("no valid VA display supplied")]
    NoDisplay,
    #[error("invalid value {value:?} for pipeline parameter {key:?}")]
    InvalidParamValue { key: String, value: String },
    #[error("slice parameter records must be at least {min} bytes, got {size}")]
    SliceParamSize { size: usize, min: usize },
    #[error("profile {profile} is not supported through entrypoint {entrypoint}")]
    UnsupportedProfile {
        profile: VaProfile,
        entrypoint: VaEntrypoint,
    },
    #[error(transparent)]
    Va(#[from] VaError),
}

/// Flags altering how a stream is mapped to the hardware.
///
/// Only `ALLOW_PROFILE_MISMATCH` is acted upon by the session. The other flags are carried to the
/// codec producer through [`crate::decoder::DecodeSession::flags`], as they affect how it selects
/// the profile and output format of the stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineFlags(pub u32);

impl PipelineFlags {
    pub const NONE: Self = Self(0);
    /// Decode even if the stream level exceeds what the hardware advertises.
    pub const IGNORE_LEVEL: Self = Self(1 << 0);
    /// Allow output formats with more than 8 bits per component.
    pub const ALLOW_HIGH_DEPTH: Self = Self(1 << 1);
    /// Go on with session setup even if the hardware does not list the stream's profile.
    pub const ALLOW_PROFILE_MISMATCH: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PipelineFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Parses an unsigned integer in decimal, or in hexadecimal with a `0x` prefix. Returns `None` if
/// `value` is malformed or does not fit in `T`.
fn parse_uint<T: TryFrom<u64>>(value: &str) -> Option<T> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => value.parse::<u64>().ok()?,
    };

    T::try_from(parsed).ok()
}

/// Parameters binding a session to a VA display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineParams {
    flags: PipelineFlags,
    display: Option<DisplayHandle>,
    context: Option<ContextId>,
}

impl PipelineParams {
    pub fn new() -> Self {
        Default::default()
    }

    /// Builds parameters from key/value pairs. See [`PipelineParams::set`].
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = Self::new();
        params.apply(pairs)?;
        Ok(params)
    }

    /// Sets the parameter `key` from its string representation.
    ///
    /// Unknown keys are ignored so that parameters meant for other components can be passed
    /// through the same list.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidParamValue {
            key: key.to_owned(),
            value: value.to_owned(),
        };

        match key {
            PARAM_FLAGS => self.flags = PipelineFlags(parse_uint(value).ok_or_else(invalid)?),
            PARAM_DISPLAY => {
                self.display = DisplayHandle::new(parse_uint(value).ok_or_else(invalid)?)
            }
            PARAM_CONTEXT => {
                self.context = ContextId::new(parse_uint(value).ok_or_else(invalid)?)
            }
            _ => log::debug!("ignoring unknown pipeline parameter {:?}", key),
        }

        Ok(())
    }

    /// Applies every pair of `pairs` in order. Stops at the first invalid value.
    pub fn apply<'a, I>(&mut self, pairs: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs.into_iter().try_for_each(|(key, value)| self.set(key, value))
    }

    pub fn with_display(mut self, display: DisplayHandle) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_flags(mut self, flags: PipelineFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_context(mut self, context: ContextId) -> Self {
        self.context = Some(context);
        self
    }

    pub fn flags(&self) -> PipelineFlags {
        self.flags
    }

    pub fn display(&self) -> Option<DisplayHandle> {
        self.display
    }

    /// Client-owned context to decode with, if any.
    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub(crate) fn set_flags(&mut self, flags: PipelineFlags) {
        self.flags = flags;
    }

    pub(crate) fn set_display(&mut self, display: DisplayHandle) {
        self.display = Some(display);
    }
}

/// Description of the stream a session decodes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamParams {
    pub profile: VaProfile,
    pub entrypoint: VaEntrypoint,
    /// Format the decoded surfaces are allocated in.
    pub pixel_format: PixelFormat,
    pub coded_resolution: Resolution,
    /// Size of one codec-specific slice parameter record, e.g.
    /// `sizeof(VASliceParameterBufferMPEG2)`.
    pub slice_param_size: usize,
}

impl StreamParams {
    /// Slice-level decoding of `profile` into NV12 surfaces.
    pub fn new(profile: VaProfile, coded_resolution: Resolution, slice_param_size: usize) -> Self {
        Self {
            profile,
            entrypoint: VA_ENTRYPOINT_VLD,
            pixel_format: PixelFormat::Nv12,
            coded_resolution,
            slice_param_size,
        }
    }
}
