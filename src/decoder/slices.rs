// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Accumulation of slice parameters and slice data for the current frame.
//!
//! Slices whose payloads directly follow each other in the source bitstream are packed into a
//! single pair of slice parameter and slice data buffers. When a slice does not start where the
//! previous one ended, the pending slices are committed to the hardware first and a new pair is
//! started.

use byteorder::ByteOrder;
use byteorder::NativeEndian;

use crate::backend::BufferKind;
use crate::backend::ContextId;
use crate::backend::DisplayHandle;
use crate::backend::VaDriver;
use crate::decoder::buffers::BufferHandle;
use crate::decoder::AllocError;

/// Size of the header shared by all codec slice parameter records (`VASliceParameterBufferBase`).
pub const SLICE_PARAM_BASE_SIZE: usize = 12;

/// `VA_SLICE_DATA_FLAG_ALL`: the whole slice is in the buffer.
pub const VA_SLICE_DATA_FLAG_ALL: u32 = 0;

/// Common header of a slice parameter record.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceRecord {
    /// Number of bytes of the slice in the slice data buffer.
    pub size: u32,
    /// Offset of the slice in the slice data buffer.
    pub offset: u32,
    pub flag: u32,
}

impl SliceRecord {
    /// Reads the header at the start of `bytes`, or returns `None` if `bytes` is too short.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SLICE_PARAM_BASE_SIZE {
            return None;
        }

        Some(Self {
            size: NativeEndian::read_u32(&bytes[0..4]),
            offset: NativeEndian::read_u32(&bytes[4..8]),
            flag: NativeEndian::read_u32(&bytes[8..12]),
        })
    }

    fn write(&self, bytes: &mut [u8]) {
        NativeEndian::write_u32(&mut bytes[0..4], self.size);
        NativeEndian::write_u32(&mut bytes[4..8], self.offset);
        NativeEndian::write_u32(&mut bytes[8..12], self.flag);
    }
}

/// Slice parameter record of a freshly appended slice.
///
/// The common header is already filled. The codec fills the fields that follow it.
pub struct SliceParams<'a> {
    bytes: &'a mut [u8],
}

impl<'a> SliceParams<'a> {
    pub fn record(&self) -> SliceRecord {
        // The record is always at least `SLICE_PARAM_BASE_SIZE` bytes.
        SliceRecord::parse(&self.bytes[..]).unwrap_or_default()
    }

    /// The codec-specific part of the record, right after the common header.
    pub fn codec_fields_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[SLICE_PARAM_BASE_SIZE..]
    }

    /// The whole record, header included.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut *self.bytes
    }
}

#[derive(Debug)]
pub(crate) struct SliceAccumulator {
    record_size: usize,
    /// `slice_count` records of `record_size` bytes.
    params: Vec<u8>,
    slice_count: usize,
    /// Payloads of the pending slices. Its length is always the sum of their sizes.
    data: Vec<u8>,
    /// Source address of the first pending payload.
    base: Option<usize>,
}

impl SliceAccumulator {
    /// `record_size` must be at least `SLICE_PARAM_BASE_SIZE`.
    pub(crate) fn new(record_size: usize) -> Self {
        debug_assert!(record_size >= SLICE_PARAM_BASE_SIZE);

        Self {
            record_size,
            params: Vec::new(),
            slice_count: 0,
            data: Vec::new(),
            base: None,
        }
    }

    pub(crate) fn record_size(&self) -> usize {
        self.record_size
    }

    pub(crate) fn pending_slices(&self) -> usize {
        self.slice_count
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.data.len()
    }

    /// Adds `payload` to the pending slices and returns its parameter record.
    ///
    /// If `payload` is not contiguous with the pending slices in the source bitstream, these are
    /// committed into `committed` first.
    pub(crate) fn append<D: VaDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        display: DisplayHandle,
        context: ContextId,
        committed: &mut Vec<BufferHandle>,
        payload: &[u8],
    ) -> Result<SliceParams<'_>, AllocError> {
        let addr = payload.as_ptr() as usize;

        if let Some(base) = self.base {
            if base.wrapping_add(self.data.len()) != addr {
                log::debug!(
                    "slice at {:#x} is not contiguous with {:#x}, committing {} slices",
                    addr,
                    base.wrapping_add(self.data.len()),
                    self.slice_count
                );
                self.commit(driver, display, context, committed)?;
            }
        }

        let offset = u32::try_from(self.data.len()).map_err(|_| AllocError::SliceTooLarge)?;
        let size = u32::try_from(payload.len()).map_err(|_| AllocError::SliceTooLarge)?;
        if offset.checked_add(size).is_none() {
            return Err(AllocError::SliceTooLarge);
        }

        // Reserve everything first so a failure leaves the pending state untouched.
        self.params.try_reserve(self.record_size)?;
        self.data.try_reserve(payload.len())?;

        self.base.get_or_insert(addr);
        self.data.extend_from_slice(payload);

        let start = self.params.len();
        self.params.resize(start + self.record_size, 0);
        let record = &mut self.params[start..];
        SliceRecord {
            size,
            offset,
            flag: VA_SLICE_DATA_FLAG_ALL,
        }
        .write(record);
        self.slice_count += 1;

        Ok(SliceParams { bytes: record })
    }

    /// Creates the slice parameter and slice data buffers for the pending slices and appends
    /// them to `committed`, parameters first. Does nothing if no slice is pending.
    ///
    /// Each buffer is added to `committed` as soon as it is created, so a failure to create the
    /// second one leaves the first one to the frame teardown.
    pub(crate) fn commit<D: VaDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        display: DisplayHandle,
        context: ContextId,
        committed: &mut Vec<BufferHandle>,
    ) -> Result<(), AllocError> {
        if self.slice_count == 0 {
            return Ok(());
        }

        committed.try_reserve(2)?;

        let params = driver
            .create_buffer(
                display,
                context,
                BufferKind::SliceParameter,
                self.record_size,
                self.slice_count,
                Some(&self.params),
            )
            .map_err(|source| AllocError::Create {
                kind: BufferKind::SliceParameter,
                source,
            })?;
        committed.push(BufferHandle::new(params, BufferKind::SliceParameter, self.params.len()));
        let slice_count = std::mem::take(&mut self.slice_count);
        self.params.clear();

        let data_size = self.data.len();
        let data = driver.create_buffer(
            display,
            context,
            BufferKind::SliceData,
            data_size,
            1,
            Some(&self.data),
        );
        self.data.clear();
        self.base = None;
        let data = data.map_err(|source| AllocError::Create {
            kind: BufferKind::SliceData,
            source,
        })?;
        committed.push(BufferHandle::new(data, BufferKind::SliceData, data_size));

        log::debug!(
            "committed {} slices ({} bytes) into buffers {:?} and {:?}",
            slice_count,
            data_size,
            params,
            data
        );
        Ok(())
    }

    /// Drops all pending slices. Storage is kept for the next frame.
    pub(crate) fn reset(&mut self) {
        self.params.clear();
        self.slice_count = 0;
        self.data.clear();
        self.base = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDriver;
    use crate::backend::dummy::Op;
    use crate::backend::BufferId;
    use crate::backend::VA_ENTRYPOINT_VLD;
    use crate::status::VaStatus;
    use crate::Resolution;

    /// Size of `VASliceParameterBufferMPEG2`.
    const MPEG2_SLICE_PARAM_SIZE: usize = 28;

    fn setup() -> (DummyDriver, DisplayHandle, ContextId) {
        let mut driver = DummyDriver::new();
        let display = DummyDriver::display();
        let config = driver.create_config(display, 1, VA_ENTRYPOINT_VLD, 1).unwrap();
        let context = driver
            .create_context(display, config, Resolution::from((16, 16)))
            .unwrap();
        (driver, display, context)
    }

    fn full_slice(size: u32, offset: u32) -> SliceRecord {
        SliceRecord {
            size,
            offset,
            flag: VA_SLICE_DATA_FLAG_ALL,
        }
    }

    fn bitstream(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    fn records(driver: &DummyDriver, id: BufferId) -> Vec<SliceRecord> {
        driver
            .buffer(id)
            .unwrap()
            .data()
            .chunks(MPEG2_SLICE_PARAM_SIZE)
            .map(|r| SliceRecord::parse(r).unwrap())
            .collect()
    }

    #[test]
    fn contiguous_slices_share_one_buffer_pair() {
        let _ = env_logger::try_init();

        let (mut driver, display, context) = setup();
        let mut acc = SliceAccumulator::new(MPEG2_SLICE_PARAM_SIZE);
        let mut committed = Vec::new();
        let stream = bitstream(450);

        let mut offsets = Vec::new();
        for range in [0..100, 100..300, 300..450] {
            let params = acc
                .append(&mut driver, display, context, &mut committed, &stream[range])
                .unwrap();
            offsets.push(params.record().offset);
        }
        assert_eq!(offsets, [0, 100, 300]);
        assert_eq!(acc.pending_slices(), 3);
        assert_eq!(acc.pending_bytes(), 450);
        assert!(committed.is_empty());

        acc.commit(&mut driver, display, context, &mut committed).unwrap();
        assert_eq!(acc.pending_slices(), 0);
        assert_eq!(acc.pending_bytes(), 0);

        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].kind(), BufferKind::SliceParameter);
        assert_eq!(committed[1].kind(), BufferKind::SliceData);

        let params = driver.buffer(committed[0].id()).unwrap();
        assert_eq!(params.element_size, MPEG2_SLICE_PARAM_SIZE);
        assert_eq!(params.num_elements, 3);
        assert_eq!(
            records(&driver, committed[0].id()),
            [
                full_slice(100, 0),
                full_slice(200, 100),
                full_slice(150, 300)
            ]
        );

        let data = driver.buffer(committed[1].id()).unwrap();
        assert_eq!(data.data(), &stream[..]);
        assert_eq!(committed[1].size(), 450);
    }

    #[test]
    fn discontiguous_slice_commits_pending_ones() {
        let (mut driver, display, context) = setup();
        let mut acc = SliceAccumulator::new(MPEG2_SLICE_PARAM_SIZE);
        let mut committed = Vec::new();
        let stream = bitstream(400);

        acc.append(&mut driver, display, context, &mut committed, &stream[0..100])
            .unwrap();
        // Skips 50 bytes of the source.
        let params = acc
            .append(&mut driver, display, context, &mut committed, &stream[150..230])
            .unwrap();
        // The second slice starts a new data buffer.
        assert_eq!(params.record().offset, 0);
        assert_eq!(params.record().size, 80);

        // The first slice has been committed on its own.
        assert_eq!(committed.len(), 2);
        assert_eq!(driver.buffer(committed[0].id()).unwrap().num_elements, 1);
        assert_eq!(driver.buffer(committed[1].id()).unwrap().data(), &stream[0..100]);
        assert_eq!(acc.pending_slices(), 1);
        assert_eq!(acc.pending_bytes(), 80);

        // The next contiguous slice joins the second one.
        acc.append(&mut driver, display, context, &mut committed, &stream[230..300])
            .unwrap();
        acc.commit(&mut driver, display, context, &mut committed).unwrap();

        assert_eq!(committed.len(), 4);
        assert_eq!(
            committed.iter().map(|h| h.kind()).collect::<Vec<_>>(),
            [
                BufferKind::SliceParameter,
                BufferKind::SliceData,
                BufferKind::SliceParameter,
                BufferKind::SliceData,
            ]
        );
        assert_eq!(
            records(&driver, committed[2].id()),
            [full_slice(80, 0), full_slice(70, 80)]
        );
        assert_eq!(driver.buffer(committed[3].id()).unwrap().data(), &stream[150..300]);
    }

    #[test]
    fn commit_without_slices_is_a_noop() {
        let (mut driver, display, context) = setup();
        let mut acc = SliceAccumulator::new(SLICE_PARAM_BASE_SIZE);
        let mut committed = Vec::new();

        driver.clear_calls();
        acc.commit(&mut driver, display, context, &mut committed).unwrap();
        assert!(committed.is_empty());
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn codec_fields_are_submitted() {
        let (mut driver, display, context) = setup();
        let mut acc = SliceAccumulator::new(MPEG2_SLICE_PARAM_SIZE);
        let mut committed = Vec::new();
        let stream = bitstream(10);

        let mut params = acc
            .append(&mut driver, display, context, &mut committed, &stream)
            .unwrap();
        assert_eq!(
            params.codec_fields_mut().len(),
            MPEG2_SLICE_PARAM_SIZE - SLICE_PARAM_BASE_SIZE
        );
        params.codec_fields_mut().fill(0xaa);
        assert_eq!(params.as_mut_bytes().len(), MPEG2_SLICE_PARAM_SIZE);

        acc.commit(&mut driver, display, context, &mut committed).unwrap();
        let submitted = driver.buffer(committed[0].id()).unwrap().data();
        assert!(submitted[SLICE_PARAM_BASE_SIZE..].iter().all(|b| *b == 0xaa));
        assert_eq!(SliceRecord::parse(submitted).unwrap().size, 10);
    }

    #[test]
    fn params_failure_keeps_pending_slices() {
        let (mut driver, display, context) = setup();
        let mut acc = SliceAccumulator::new(MPEG2_SLICE_PARAM_SIZE);
        let mut committed = Vec::new();
        let stream = bitstream(64);

        acc.append(&mut driver, display, context, &mut committed, &stream)
            .unwrap();
        driver.fail_next(
            Op::CreateBuffer(BufferKind::SliceParameter),
            VaStatus::ERROR_ALLOCATION_FAILED,
        );
        let err = acc
            .commit(&mut driver, display, context, &mut committed)
            .unwrap_err();
        assert!(matches!(
            err,
            AllocError::Create { kind: BufferKind::SliceParameter, .. }
        ));
        assert!(committed.is_empty());
        assert_eq!(acc.pending_slices(), 1);
        assert_eq!(acc.pending_bytes(), 64);
    }

    #[test]
    fn data_failure_leaves_params_to_teardown() {
        let (mut driver, display, context) = setup();
        let mut acc = SliceAccumulator::new(MPEG2_SLICE_PARAM_SIZE);
        let mut committed = Vec::new();
        let stream = bitstream(64);

        acc.append(&mut driver, display, context, &mut committed, &stream)
            .unwrap();
        driver.fail_next(
            Op::CreateBuffer(BufferKind::SliceData),
            VaStatus::ERROR_ALLOCATION_FAILED,
        );
        let err = acc
            .commit(&mut driver, display, context, &mut committed)
            .unwrap_err();
        assert!(matches!(err, AllocError::Create { kind: BufferKind::SliceData, .. }));

        // The parameter buffer is tracked so it can be released.
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].kind(), BufferKind::SliceParameter);
        assert_eq!(driver.live_buffers(), 1);
        assert_eq!(acc.pending_slices(), 0);
        assert_eq!(acc.pending_bytes(), 0);
    }

    #[test]
    fn failed_auto_commit_rejects_slice() {
        let (mut driver, display, context) = setup();
        let mut acc = SliceAccumulator::new(MPEG2_SLICE_PARAM_SIZE);
        let mut committed = Vec::new();
        let stream = bitstream(200);

        acc.append(&mut driver, display, context, &mut committed, &stream[0..50])
            .unwrap();
        driver.fail_next(
            Op::CreateBuffer(BufferKind::SliceParameter),
            VaStatus::ERROR_ALLOCATION_FAILED,
        );
        assert!(acc
            .append(&mut driver, display, context, &mut committed, &stream[100..150])
            .is_err());
        assert_eq!(acc.pending_slices(), 1);
        assert_eq!(acc.pending_bytes(), 50);
    }

    #[test]
    fn reset_drops_pending_slices() {
        let (mut driver, display, context) = setup();
        let mut acc = SliceAccumulator::new(MPEG2_SLICE_PARAM_SIZE);
        let mut committed = Vec::new();
        let stream = bitstream(32);

        acc.append(&mut driver, display, context, &mut committed, &stream[..16])
            .unwrap();
        acc.reset();
        assert_eq!(acc.pending_slices(), 0);
        assert_eq!(acc.pending_bytes(), 0);

        // The next slice starts a new run, even if it follows the dropped one.
        driver.clear_calls();
        let params = acc
            .append(&mut driver, display, context, &mut committed, &stream[16..])
            .unwrap();
        assert_eq!(params.record().offset, 0);
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn short_record_does_not_parse() {
        assert_eq!(SliceRecord::parse(&[0u8; 11]), None);
        assert!(SliceRecord::parse(&[0u8; 12]).is_some());
    }
}
