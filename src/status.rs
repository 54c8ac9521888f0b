// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VA status codes and their translation into a small generic error taxonomy.

use std::fmt;

use thiserror::Error;

/// Raw status returned by every libva entry point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VaStatus(pub i32);

impl VaStatus {
    pub const SUCCESS: Self = Self(0x00);
    pub const ERROR_OPERATION_FAILED: Self = Self(0x01);
    pub const ERROR_ALLOCATION_FAILED: Self = Self(0x02);
    pub const ERROR_INVALID_DISPLAY: Self = Self(0x03);
    pub const ERROR_INVALID_CONFIG: Self = Self(0x04);
    pub const ERROR_INVALID_CONTEXT: Self = Self(0x05);
    pub const ERROR_INVALID_SURFACE: Self = Self(0x06);
    pub const ERROR_INVALID_BUFFER: Self = Self(0x07);
    pub const ERROR_INVALID_IMAGE: Self = Self(0x08);
    pub const ERROR_INVALID_SUBPICTURE: Self = Self(0x09);
    pub const ERROR_ATTR_NOT_SUPPORTED: Self = Self(0x0a);
    pub const ERROR_MAX_NUM_EXCEEDED: Self = Self(0x0b);
    pub const ERROR_UNSUPPORTED_PROFILE: Self = Self(0x0c);
    pub const ERROR_UNSUPPORTED_ENTRYPOINT: Self = Self(0x0d);
    pub const ERROR_UNSUPPORTED_RT_FORMAT: Self = Self(0x0e);
    pub const ERROR_UNSUPPORTED_BUFFERTYPE: Self = Self(0x0f);
    pub const ERROR_SURFACE_BUSY: Self = Self(0x10);
    pub const ERROR_FLAG_NOT_SUPPORTED: Self = Self(0x11);
    pub const ERROR_INVALID_PARAMETER: Self = Self(0x12);
    pub const ERROR_RESOLUTION_NOT_SUPPORTED: Self = Self(0x13);
    pub const ERROR_UNIMPLEMENTED: Self = Self(0x14);
    pub const ERROR_SURFACE_IN_DISPLAYING: Self = Self(0x15);
    pub const ERROR_INVALID_IMAGE_FORMAT: Self = Self(0x16);
    pub const ERROR_DECODING_ERROR: Self = Self(0x17);
    pub const ERROR_ENCODING_ERROR: Self = Self(0x18);
    pub const ERROR_INVALID_VALUE: Self = Self(0x19);
    pub const ERROR_HW_BUSY: Self = Self(0x22);
    pub const ERROR_TIMEDOUT: Self = Self(0x26);
    pub const ERROR_UNKNOWN: Self = Self(0xffff_ffff_u32 as i32);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Returns `Ok(())` if this status is successful, and an error otherwise.
    pub fn check(self) -> VaResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(VaError::from(self))
        }
    }

    /// Short description of the status, in the spirit of `vaErrorStr`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SUCCESS => "success (no error)",
            Self::ERROR_OPERATION_FAILED => "operation failed",
            Self::ERROR_ALLOCATION_FAILED => "resource allocation failed",
            Self::ERROR_INVALID_DISPLAY => "invalid VADisplay",
            Self::ERROR_INVALID_CONFIG => "invalid VAConfigID",
            Self::ERROR_INVALID_CONTEXT => "invalid VAContextID",
            Self::ERROR_INVALID_SURFACE => "invalid VASurfaceID",
            Self::ERROR_INVALID_BUFFER => "invalid VABufferID",
            Self::ERROR_INVALID_IMAGE => "invalid VAImageID",
            Self::ERROR_INVALID_SUBPICTURE => "invalid VASubpictureID",
            Self::ERROR_ATTR_NOT_SUPPORTED => "attribute not supported",
            Self::ERROR_MAX_NUM_EXCEEDED => "list argument exceeds maximum number",
            Self::ERROR_UNSUPPORTED_PROFILE => "the requested VAProfile is not supported",
            Self::ERROR_UNSUPPORTED_ENTRYPOINT => "the requested VAEntryPoint is not supported",
            Self::ERROR_UNSUPPORTED_RT_FORMAT => "the requested RT Format is not supported",
            Self::ERROR_UNSUPPORTED_BUFFERTYPE => "the requested VABufferType is not supported",
            Self::ERROR_SURFACE_BUSY => "surface is in use",
            Self::ERROR_FLAG_NOT_SUPPORTED => "flag not supported",
            Self::ERROR_INVALID_PARAMETER => "invalid parameter",
            Self::ERROR_RESOLUTION_NOT_SUPPORTED => "resolution not supported",
            Self::ERROR_UNIMPLEMENTED => "the requested function is not implemented",
            Self::ERROR_SURFACE_IN_DISPLAYING => "surface is in displaying (may by overlay)",
            Self::ERROR_INVALID_IMAGE_FORMAT => "invalid VAImageFormat",
            Self::ERROR_DECODING_ERROR => "internal decoding error",
            Self::ERROR_ENCODING_ERROR => "internal encoding error",
            Self::ERROR_INVALID_VALUE => "an invalid/unsupported value was supplied",
            Self::ERROR_HW_BUSY => "HW busy now",
            Self::ERROR_TIMEDOUT => "operation timed out",
            _ => "unknown libva error",
        }
    }
}

impl fmt::Display for VaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: {}", self.0, self.as_str())
    }
}

/// Generic classes of failure a VA status can be folded into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VaErrorKind {
    Unsupported,
    InvalidArgument,
    OutOfMemory,
    NotImplemented,
    Busy,
    Unknown,
}

impl From<VaStatus> for VaErrorKind {
    fn from(status: VaStatus) -> Self {
        match status {
            VaStatus::ERROR_OPERATION_FAILED => VaErrorKind::Unsupported,
            VaStatus::ERROR_INVALID_DISPLAY
            | VaStatus::ERROR_INVALID_CONFIG
            | VaStatus::ERROR_INVALID_CONTEXT
            | VaStatus::ERROR_INVALID_SURFACE
            | VaStatus::ERROR_INVALID_BUFFER
            | VaStatus::ERROR_INVALID_IMAGE
            | VaStatus::ERROR_INVALID_SUBPICTURE
            | VaStatus::ERROR_INVALID_PARAMETER
            | VaStatus::ERROR_INVALID_VALUE => VaErrorKind::InvalidArgument,
            VaStatus::ERROR_ALLOCATION_FAILED => VaErrorKind::OutOfMemory,
            VaStatus::ERROR_UNIMPLEMENTED => VaErrorKind::NotImplemented,
            VaStatus::ERROR_SURFACE_BUSY => VaErrorKind::Busy,
            _ => VaErrorKind::Unknown,
        }
    }
}

/// A failed VA call.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("VA-API error {status} ({kind:?})")]
pub struct VaError {
    status: VaStatus,
    kind: VaErrorKind,
}

impl VaError {
    pub fn status(&self) -> VaStatus {
        self.status
    }

    pub fn kind(&self) -> VaErrorKind {
        self.kind
    }
}

impl From<VaStatus> for VaError {
    fn from(status: VaStatus) -> Self {
        Self {
            status,
            kind: VaErrorKind::from(status),
        }
    }
}

/// Result type returned by driver methods.
pub type VaResult<T> = Result<T, VaError>;
