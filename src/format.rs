// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Mapping between decoded pixel formats and the VA render target formats and fourccs used to
//! allocate surfaces for them.

use std::fmt;
use std::str::FromStr;

use crate::status::VaError;
use crate::status::VaStatus;

pub const VA_RT_FORMAT_YUV420: u32 = 0x0000_0001;
pub const VA_RT_FORMAT_YUV422: u32 = 0x0000_0002;
pub const VA_RT_FORMAT_YUV444: u32 = 0x0000_0004;
pub const VA_RT_FORMAT_YUV400: u32 = 0x0000_0010;

/// A FourCC code, stored the way `VA_FOURCC` packs it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl Fourcc {
    pub const fn from_bytes(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

/// Pixel formats a decoded frame can be requested in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    Yuv420p,
    Nv12,
    Yuv422p,
    Yuyv422,
    Uyvy422,
    Yuv444p,
    /// Valid output format that has no VA counterpart in this crate.
    P010,
}

impl FromStr for PixelFormat {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gray8" | "GRAY8" => Ok(PixelFormat::Gray8),
            "yuv420p" | "i420" | "I420" => Ok(PixelFormat::Yuv420p),
            "nv12" | "NV12" => Ok(PixelFormat::Nv12),
            "yuv422p" | "422h" | "422H" => Ok(PixelFormat::Yuv422p),
            "yuyv422" | "yuyv" | "YUYV" => Ok(PixelFormat::Yuyv422),
            "uyvy422" | "uyvy" | "UYVY" => Ok(PixelFormat::Uyvy422),
            "yuv444p" | "444p" | "444P" => Ok(PixelFormat::Yuv444p),
            "p010" | "P010" => Ok(PixelFormat::P010),
            _ => Err("unrecognized pixel format. Valid values: gray8, yuv420p, nv12, yuv422p, yuyv422, uyvy422, yuv444p, p010"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct FormatMap {
    pixel_format: PixelFormat,
    rt_format: u32,
    fourcc: Fourcc,
}

static FORMAT_MAP: [FormatMap; 7] = [
    FormatMap {
        pixel_format: PixelFormat::Gray8,
        rt_format: VA_RT_FORMAT_YUV400,
        fourcc: Fourcc::from_bytes(b"Y800"),
    },
    FormatMap {
        pixel_format: PixelFormat::Yuv420p,
        rt_format: VA_RT_FORMAT_YUV420,
        fourcc: Fourcc::from_bytes(b"I420"),
    },
    FormatMap {
        pixel_format: PixelFormat::Nv12,
        rt_format: VA_RT_FORMAT_YUV420,
        fourcc: Fourcc::from_bytes(b"NV12"),
    },
    FormatMap {
        pixel_format: PixelFormat::Yuv422p,
        rt_format: VA_RT_FORMAT_YUV422,
        fourcc: Fourcc::from_bytes(b"422H"),
    },
    FormatMap {
        pixel_format: PixelFormat::Yuyv422,
        rt_format: VA_RT_FORMAT_YUV422,
        fourcc: Fourcc::from_bytes(b"YUYV"),
    },
    FormatMap {
        pixel_format: PixelFormat::Uyvy422,
        rt_format: VA_RT_FORMAT_YUV422,
        fourcc: Fourcc::from_bytes(b"UYVY"),
    },
    FormatMap {
        pixel_format: PixelFormat::Yuv444p,
        rt_format: VA_RT_FORMAT_YUV444,
        fourcc: Fourcc::from_bytes(b"444P"),
    },
];

fn lookup(pixel_format: PixelFormat) -> Result<&'static FormatMap, VaError> {
    FORMAT_MAP
        .iter()
        .find(|entry| entry.pixel_format == pixel_format)
        .ok_or_else(|| VaError::from(VaStatus::ERROR_UNIMPLEMENTED))
}

impl PixelFormat {
    /// Returns the VA render target (chroma) format surfaces of this format are allocated with.
    pub fn rt_format(self) -> Result<u32, VaError> {
        lookup(self).map(|entry| entry.rt_format)
    }

    /// Returns the VA fourcc describing the memory layout of this format.
    pub fn fourcc(self) -> Result<Fourcc, VaError> {
        lookup(self).map(|entry| entry.fourcc)
    }
}
