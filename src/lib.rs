// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware decode buffer management for VA-API.
//!
//! This crate takes care of the part of hardware-accelerated decoding that sits between a codec
//! parser and the VA driver: it allocates and maps the per-picture parameter buffers, accumulates
//! slice parameters and slice data across calls, submits everything to the hardware in the order
//! it expects, and releases all the per-frame buffers once the frame has been submitted.
//!
//! The starting point is [`decoder::DecodeSession`], which is created from a
//! [`config::PipelineParams`] describing the VA display to use, and a
//! [`config::StreamParams`] describing the stream. All hardware access goes through the
//! [`backend::VaDriver`] trait.

pub mod backend;
pub mod config;
pub mod decoder;
pub mod format;
pub mod status;

pub use format::PixelFormat;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(value: Resolution) -> Self {
        (value.width, value.height)
    }
}
