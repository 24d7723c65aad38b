use core::{future::poll_fn, task::Poll};

use portable_atomic::{AtomicU32, AtomicU8, Ordering};

use atomic_waker::AtomicWaker;

/// A reusable signal carrying a CRC result from the EOF interrupt to a waiting task.
///
/// The driver keeps a pool of these. A waiter claims one before submitting its request and
/// frees it once it took the result. If the waiter gives up first, the signal is abandoned and
/// freed by the interrupt, when the result arrives.
pub(crate) struct CompletionSignal {
    state: AtomicU8,
    result: AtomicU32,
    waker: AtomicWaker,
}
impl CompletionSignal {
    const FREE: u8 = 0;
    const PENDING: u8 = 1;
    const DONE: u8 = 2;
    const ABANDONED: u8 = 3;
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(Self::FREE),
            result: AtomicU32::new(0),
            waker: AtomicWaker::new(),
        }
    }
    /// Claim the signal for one request.
    pub fn try_claim(&self) -> bool {
        self.state
            .compare_exchange(
                Self::FREE,
                Self::PENDING,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }
    /// Free a claimed signal, that will never be raised.
    pub fn release(&self) {
        self.state.store(Self::FREE, Ordering::Release);
    }
    #[cfg(test)]
    pub fn is_free(&self) -> bool {
        self.state.load(Ordering::Acquire) == Self::FREE
    }
    /// Raise the signal.
    ///
    /// Returns true, if a waiting task was woken.
    pub fn signal(&self, crc_result: u32) -> bool {
        self.result.store(crc_result, Ordering::Relaxed);
        if self.state.swap(Self::DONE, Ordering::AcqRel) == Self::ABANDONED {
            // Nobody is waiting anymore.
            self.state.store(Self::FREE, Ordering::Release);
            return false;
        }
        match self.waker.take() {
            Some(waker) => {
                waker.wake();
                true
            }
            None => false,
        }
    }
}

/// The waiting side of a claimed [CompletionSignal].
///
/// Dropping this before the result was taken abandons the signal.
pub(crate) struct PendingResult<'a> {
    signal: &'a CompletionSignal,
    taken: bool,
}
impl<'a> PendingResult<'a> {
    /// The signal must have been claimed and the request submitted.
    pub fn new(signal: &'a CompletionSignal) -> Self {
        Self {
            signal,
            taken: false,
        }
    }
    /// Take the result and free the signal, if it was raised.
    pub fn try_take(&mut self) -> Option<u32> {
        if self.taken
            || self.signal.state.load(Ordering::Acquire) != CompletionSignal::DONE
        {
            return None;
        }
        let crc_result = self.signal.result.load(Ordering::Relaxed);
        self.taken = true;
        self.signal.release();
        Some(crc_result)
    }
    /// Wait for the signal to be raised and take the result.
    pub async fn wait(&mut self) -> u32 {
        poll_fn(|cx| {
            if let Some(crc_result) = self.try_take() {
                return Poll::Ready(crc_result);
            }
            self.signal.waker.register(cx.waker());
            // The signal may have been raised, before we registered the waker.
            match self.try_take() {
                Some(crc_result) => Poll::Ready(crc_result),
                None => Poll::Pending,
            }
        })
        .await
    }
}
impl Drop for PendingResult<'_> {
    fn drop(&mut self) {
        if self.taken {
            return;
        }
        if self
            .signal
            .state
            .compare_exchange(
                CompletionSignal::PENDING,
                CompletionSignal::ABANDONED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            // The result arrived after we last looked.
            self.signal.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use embassy_futures::block_on;

    use super::*;

    fn claimed() -> CompletionSignal {
        let signal = CompletionSignal::new();
        assert!(signal.try_claim());
        signal
    }

    #[test]
    fn take_frees_signal() {
        let signal = claimed();
        assert!(!signal.try_claim());
        let mut pending = PendingResult::new(&signal);
        assert_eq!(pending.try_take(), None);
        assert!(!signal.signal(0xb8));
        assert_eq!(pending.try_take(), Some(0xb8));
        assert_eq!(pending.try_take(), None);
        drop(pending);
        assert!(signal.is_free());
        assert!(signal.try_claim());
    }

    #[test]
    fn abandoned_signal_is_freed_by_completion() {
        let signal = claimed();
        drop(PendingResult::new(&signal));
        // Still owned by the request in flight.
        assert!(!signal.is_free());
        assert!(!signal.try_claim());
        assert!(!signal.signal(0xa9b2));
        assert!(signal.is_free());
    }

    #[test]
    fn abandoning_after_completion_frees_signal() {
        let signal = claimed();
        let pending = PendingResult::new(&signal);
        signal.signal(0xb7);
        drop(pending);
        assert!(signal.is_free());
    }

    #[test]
    fn stale_result_is_not_seen_by_next_claim() {
        let signal = claimed();
        drop(PendingResult::new(&signal));
        signal.signal(0x1111);
        assert!(signal.try_claim());
        let mut pending = PendingResult::new(&signal);
        assert_eq!(pending.try_take(), None);
        signal.signal(0x2222);
        assert_eq!(pending.try_take(), Some(0x2222));
    }

    #[test]
    fn wait_returns_result_from_other_thread() {
        let signal = Arc::new(claimed());
        let signaller = {
            let signal = signal.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                signal.signal(0xa9b2);
            })
        };
        assert_eq!(block_on(PendingResult::new(&signal).wait()), 0xa9b2);
        signaller.join().unwrap();
        assert!(signal.is_free());
    }

    #[test]
    fn wait_completes_immediately_if_already_signaled() {
        let signal = claimed();
        signal.signal(0x692f_6c7e);
        assert_eq!(block_on(PendingResult::new(&signal).wait()), 0x692f_6c7e);
    }
}
