use embassy_futures::block_on;
use embassy_time::{Duration, Instant};

use crate::{
    driver::Notify, sync::PendingResult, AsyncCrc, CrcError, CrcParams, CrcResult,
    GdmaCrcChannel,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// How long [AsyncCrc::calc_blocking] waits for the result.
pub enum BlockingTimeout {
    Forever,
    /// Check once and give up, if the result isn't there yet.
    Poll,
    After(Duration),
}
impl From<i32> for BlockingTimeout {
    /// Negative values wait forever and zero only polls once.
    fn from(timeout_ms: i32) -> Self {
        match timeout_ms {
            i32::MIN..=-1 => Self::Forever,
            0 => Self::Poll,
            timeout_ms => Self::After(Duration::from_millis(timeout_ms as u64)),
        }
    }
}

impl<C: GdmaCrcChannel> AsyncCrc<C> {
    /// Submit a request, whose result is delivered through one of the completion signals.
    ///
    /// The signals are shared by all waiters, so this fails with [CrcError::NoFreeTransaction]
    /// if none is free.
    fn calc_signaled(
        &self,
        data: &'static [u8],
        params: &CrcParams,
    ) -> CrcResult<PendingResult<'_>> {
        let Some((index, signal)) = self.claim_signal() else {
            return Err(CrcError::NoFreeTransaction);
        };
        if let Err(err) =
            unsafe { self.submit(data.as_ptr(), data.len(), params, Notify::Signal(index)) }
        {
            signal.release();
            return Err(err);
        }
        Ok(PendingResult::new(signal))
    }
    /// Calculate the CRC of `data` and wait for the result.
    ///
    /// A negative `timeout_ms` waits forever, zero only checks once. If the timeout expires, the
    /// calculation still runs to completion in the background.
    pub fn calc_blocking(
        &self,
        data: &'static [u8],
        params: &CrcParams,
        timeout_ms: i32,
    ) -> CrcResult<u32> {
        self.calc_blocking_with_timeout(data, params, timeout_ms.into())
    }
    /// Same as [AsyncCrc::calc_blocking], but with a typed timeout.
    ///
    /// A bounded timeout busy waits against [Instant], so it works without an executor.
    pub fn calc_blocking_with_timeout(
        &self,
        data: &'static [u8],
        params: &CrcParams,
        timeout: BlockingTimeout,
    ) -> CrcResult<u32> {
        if self.channel().in_isr_context() {
            return Err(CrcError::IsrContext);
        }
        let mut pending = self.calc_signaled(data, params)?;
        match timeout {
            BlockingTimeout::Forever => Some(block_on(pending.wait())),
            BlockingTimeout::Poll => pending.try_take(),
            BlockingTimeout::After(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    if let Some(crc_result) = pending.try_take() {
                        break Some(crc_result);
                    }
                    if Instant::now() >= deadline {
                        break None;
                    }
                    core::hint::spin_loop();
                }
            }
        }
        .ok_or(CrcError::Timeout)
    }
    /// Calculate the CRC of `data` and asynchronously wait for the result.
    ///
    /// Dropping the future doesn't cancel the calculation.
    pub async fn calc_async(&self, data: &'static [u8], params: &CrcParams) -> CrcResult<u32> {
        let mut pending = self.calc_signaled(data, params)?;
        Ok(pending.wait().await)
    }
}
