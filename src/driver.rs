use alloc::{boxed::Box, collections::VecDeque, vec::Vec};
use core::{cell::RefCell, mem, ptr::NonNull};

use embassy_sync::blocking_mutex;
use portable_atomic::{AtomicU8, Ordering};

use crate::{
    sync::CompletionSignal, AlignmentConstraints, ChannelError, CrcError, CrcParams, CrcResult,
    DefaultRawMutex, DescriptorChain, EofEvent, GdmaCrcChannel, StrategyConfig, TransferConfig,
    DEFAULT_BACKLOG, DESCRIPTOR_BUFFER_MAX_SIZE,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Configuration for [AsyncCrc::install].
pub struct Config {
    /// The maximum amount of transactions, that can be pending at the same time.
    ///
    /// Zero selects [DEFAULT_BACKLOG].
    pub backlog: u32,
    /// Maximum DMA burst size in bytes. Zero disables bursts, otherwise this must be a power of
    /// two.
    pub dma_burst_size: usize,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            backlog: 0,
            dma_burst_size: 16,
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// The state of the driver.
pub enum CrcFsm {
    /// No transfer is running.
    Idle = 0,
    /// A transfer is running on the hardware.
    Run = 1,
    /// Someone is deciding, what to do next.
    Wait = 2,
}
impl CrcFsm {
    const fn from_bits(bits: u8) -> Self {
        match bits {
            1 => Self::Run,
            2 => Self::Wait,
            _ => Self::Idle,
        }
    }
    const fn into_bits(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Identifies an installed driver by the channel it runs on.
pub struct DriverId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Passed to an [IsrCallback], once the calculation is done.
pub struct CrcEvent {
    /// The final CRC, right aligned in the lower `width` bits.
    pub crc_result: u32,
    /// The driver, that calculated the CRC.
    pub driver: DriverId,
}

/// A callback, which is invoked from interrupt context, once a calculation completes.
///
/// Implementations must not block. The return value indicates, whether a higher priority task
/// was woken. Zero sized callbacks, like [IsrFn] around a plain function or a closure capturing
/// nothing, can be submitted without allocating.
pub trait IsrCallback: Send + 'static {
    fn on_crc_done(self: Box<Self>, event: &CrcEvent) -> bool;
}
/// Wraps a closure, so it can be used as an [IsrCallback].
pub struct IsrFn<F>(pub F);
impl<F> IsrCallback for IsrFn<F>
where
    F: FnOnce(&CrcEvent) -> bool + Send + 'static,
{
    fn on_crc_done(self: Box<Self>, event: &CrcEvent) -> bool {
        (self.0)(event)
    }
}

/// Move `value` to the heap, reporting allocation failure instead of aborting.
///
/// Zero sized values don't allocate.
fn try_box<T>(value: T) -> CrcResult<Box<T>> {
    let mut slot = Vec::new();
    slot.try_reserve_exact(1).map_err(|_| CrcError::NoMemory)?;
    slot.push(value);
    let slot = Box::into_raw(slot.into_boxed_slice());
    // SAFETY: A boxed slice of exactly one element has the same layout as a box of the element.
    Ok(unsafe { Box::from_raw(slot.cast::<T>()) })
}

/// Who is told about the result of a transaction.
pub(crate) enum Notify {
    Nobody,
    Callback(Box<dyn IsrCallback>),
    /// A task waiting on the completion signal with this index.
    Signal(usize),
}

/// One CRC request and the descriptors covering its buffer.
struct Transaction {
    chain: DescriptorChain,
    data: *const u8,
    length: usize,
    params: CrcParams,
    notify: Notify,
}
// The buffer is only read, and the caller guarantees it outlives the transaction.
unsafe impl Send for Transaction {}
impl Transaction {
    const fn new() -> Self {
        Self {
            chain: DescriptorChain::new(),
            data: core::ptr::null(),
            length: 0,
            params: CrcParams::new(0, 0),
            notify: Notify::Nobody,
        }
    }
}

/// Every transaction is either idle, ready or the current one.
///
/// Moving a transaction between them doesn't move its descriptors.
struct TransactionQueues {
    idle: VecDeque<Transaction>,
    ready: VecDeque<Transaction>,
    current: Option<Transaction>,
}

/// Asynchronous CRC calculation over a GDMA channel.
///
/// Requests are queued and processed one after the other in the order they were submitted.
/// Completion is reported from interrupt context through an [IsrCallback].
pub struct AsyncCrc<C: GdmaCrcChannel> {
    channel: C,
    id: DriverId,
    fsm: AtomicU8,
    queues: blocking_mutex::Mutex<DefaultRawMutex, RefCell<TransactionQueues>>,
    signals: Vec<CompletionSignal>,
    alignment: AlignmentConstraints,
    backlog: usize,
}
impl<C: GdmaCrcChannel> AsyncCrc<C> {
    /// Install the driver on the channel.
    ///
    /// This allocates all transactions and completion signals upfront and brings up the
    /// channel. If anything fails, the channel is disconnected again.
    pub fn install(config: &Config, mut channel: C) -> CrcResult<Self> {
        let backlog = match config.backlog {
            0 => DEFAULT_BACKLOG,
            backlog => backlog,
        } as usize;
        if config.dma_burst_size != 0 && !config.dma_burst_size.is_power_of_two() {
            return Err(CrcError::InvalidBurstSize(config.dma_burst_size));
        }

        let mut idle = VecDeque::new();
        let mut ready = VecDeque::new();
        let mut signals = Vec::new();
        idle.try_reserve_exact(backlog)
            .and_then(|_| ready.try_reserve_exact(backlog))
            .and_then(|_| signals.try_reserve_exact(backlog))
            .map_err(|_| CrcError::NoMemory)?;
        idle.extend((0..backlog).map(|_| Transaction::new()));
        signals.extend((0..backlog).map(|_| CompletionSignal::new()));

        channel.reset();
        if let Err(err) = channel.connect_m2m() {
            warn!("Failed to connect DMA channel.");
            return Err(err.into());
        }
        channel.apply_strategy(&StrategyConfig {
            owner_check: true,
            auto_update_desc: true,
            eof_till_data_popped: false,
        });
        if let Err(err) = channel.config_transfer(&TransferConfig {
            max_data_burst_size: config.dma_burst_size,
            access_ext_mem: true,
        }) {
            warn!("Failed to configure DMA transfer.");
            channel.disconnect();
            return Err(err.into());
        }
        let alignment = channel.alignment_constraints();
        if alignment.internal > DESCRIPTOR_BUFFER_MAX_SIZE
            || alignment.external > DESCRIPTOR_BUFFER_MAX_SIZE
        {
            warn!("DMA channel requires an alignment larger than a descriptor.");
            channel.disconnect();
            return Err(ChannelError::UnsupportedAlignment.into());
        }

        let id = DriverId(channel.channel_id());
        debug!(
            "Installed CRC driver {} with a backlog of {}. Alignment internal: {} external: {}",
            id.0,
            backlog,
            alignment.internal,
            alignment.external
        );
        Ok(Self {
            channel,
            id,
            fsm: AtomicU8::new(CrcFsm::Idle.into_bits()),
            queues: blocking_mutex::Mutex::new(RefCell::new(TransactionQueues {
                idle,
                ready,
                current: None,
            })),
            signals,
            alignment,
            backlog,
        })
    }
    /// Uninstall the driver.
    ///
    /// If a transaction is still running or pending, the driver is handed back together with
    /// [CrcError::Busy].
    pub fn uninstall(self) -> Result<(), (Self, CrcError)> {
        if self.is_busy() {
            debug!("Refusing to uninstall busy CRC driver {}.", self.id.0);
            return Err((self, CrcError::Busy));
        }
        debug!("Uninstalling CRC driver {}.", self.id.0);
        Ok(())
    }

    /// Calculate the CRC of `data` and invoke `callback` from interrupt context once done.
    ///
    /// This never blocks. If all transactions are in use, [CrcError::NoFreeTransaction] is
    /// returned. A callback, that isn't zero sized, is moved to the heap and
    /// [CrcError::NoMemory] is returned if that fails.
    pub fn calc<F: IsrCallback>(
        &self,
        data: &'static [u8],
        params: &CrcParams,
        callback: F,
    ) -> CrcResult<()> {
        let callback = try_box(callback)?;
        unsafe { self.calc_raw(data.as_ptr(), data.len(), params, Some(callback)) }
    }
    /// Calculate the CRC of `data` without being notified about the result.
    pub fn calc_detached(&self, data: &'static [u8], params: &CrcParams) -> CrcResult<()> {
        unsafe { self.calc_raw(data.as_ptr(), data.len(), params, None) }
    }
    /// Calculate the CRC of `length` bytes at `data`.
    ///
    /// SAFETY:
    /// The buffer must stay alive and unmodified, until the callback was invoked. Without a
    /// callback, it must outlive the driver.
    pub unsafe fn calc_raw(
        &self,
        data: *const u8,
        length: usize,
        params: &CrcParams,
        callback: Option<Box<dyn IsrCallback>>,
    ) -> CrcResult<()> {
        let notify = callback.map_or(Notify::Nobody, Notify::Callback);
        unsafe { self.submit(data, length, params, notify) }
    }
    /// Queue a request and try to start it.
    ///
    /// SAFETY:
    /// Same as for [AsyncCrc::calc_raw].
    pub(crate) unsafe fn submit(
        &self,
        data: *const u8,
        length: usize,
        params: &CrcParams,
        notify: Notify,
    ) -> CrcResult<()> {
        let Some(data) = NonNull::new(data.cast_mut()) else {
            return Err(CrcError::InvalidArgument);
        };
        if length == 0 {
            return Err(CrcError::InvalidArgument);
        }
        let Some(mut transaction) = self
            .queues
            .lock(|queues| queues.borrow_mut().idle.pop_front())
        else {
            return Err(CrcError::NoFreeTransaction);
        };
        transaction.data = data.as_ptr().cast_const();
        transaction.length = length;
        transaction.params = *params;
        transaction.notify = notify;

        // The descriptors from a failed attempt stay in the chain and are rebuilt on the next use.
        if let Err(err) = unsafe { self.prepare_transaction(&mut transaction, data) } {
            transaction.notify = Notify::Nobody;
            self.queues
                .lock(|queues| queues.borrow_mut().idle.push_back(transaction));
            return Err(err);
        }
        trace!(
            "Queueing CRC{} over {} bytes on driver {}.",
            params.width,
            length,
            self.id.0
        );
        self.queues
            .lock(|queues| queues.borrow_mut().ready.push_back(transaction));
        self.try_start_pending_transaction();
        Ok(())
    }
    /// Validate the request and build the descriptor chain for it.
    unsafe fn prepare_transaction(
        &self,
        transaction: &mut Transaction,
        data: NonNull<u8>,
    ) -> CrcResult<()> {
        let bus = self.channel.bus();
        transaction.params.validate(bus.max_crc_bit_width())?;

        let address = data.as_ptr().cast_const();
        let buffer_alignment = if self.channel.is_internal_memory(address) {
            self.alignment.internal
        } else {
            self.alignment.external
        }
        .max(1);
        if address as usize % buffer_alignment != 0 {
            return Err(CrcError::MisalignedBuffer {
                alignment: buffer_alignment,
            });
        }
        unsafe {
            transaction
                .chain
                .mount(data, transaction.length, buffer_alignment)?
        };
        debug_assert!(transaction
            .chain
            .head()
            .is_some_and(|head| head.as_ptr() as usize % bus.descriptor_alignment() == 0));

        if self.channel.cache_line_size(address) > 0 {
            self.channel.cache_writeback(address, transaction.length);
        }
        Ok(())
    }
    /// Start the next ready transaction, if the hardware is free.
    ///
    /// This may be called from interrupt context.
    fn try_start_pending_transaction(&self) {
        loop {
            if self
                .fsm
                .compare_exchange(
                    CrcFsm::Idle.into_bits(),
                    CrcFsm::Wait.into_bits(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_err()
            {
                // Whoever owns the FSM will pick up the ready queue.
                return;
            }
            let next = self
                .queues
                .lock(|queues| queues.borrow_mut().ready.pop_front());
            if let Some(mut transaction) = next {
                if let Some(head) = transaction.chain.head() {
                    self.channel
                        .configure_crc(&transaction.params.calculator_config());
                    self.channel.reset();
                    self.queues
                        .lock(|queues| queues.borrow_mut().current = Some(transaction));
                    self.fsm.store(CrcFsm::Run.into_bits(), Ordering::SeqCst);
                    trace!("Starting CRC transfer on driver {}.", self.id.0);
                    unsafe { self.channel.start(head) };
                    return;
                }
                // Prepared transactions always have descriptors.
                transaction.notify = Notify::Nobody;
                self.queues
                    .lock(|queues| queues.borrow_mut().idle.push_back(transaction));
            }
            self.fsm.store(CrcFsm::Idle.into_bits(), Ordering::SeqCst);
            // A transaction may have been queued, after we found the queue empty, but before we
            // released the FSM.
            if self.queues.lock(|queues| queues.borrow().ready.is_empty()) {
                return;
            }
        }
    }
    /// Handle the EOF interrupt of the channel.
    ///
    /// This has to be called from the TX EOF interrupt handler of the channel. It returns true,
    /// if a higher priority task was woken.
    pub fn on_transfer_eof(&self, event: EofEvent) -> bool {
        let mut need_yield = false;
        if event.normal_eof {
            let raw_result = self.channel.crc_result();
            if self
                .fsm
                .compare_exchange(
                    CrcFsm::Run.into_bits(),
                    CrcFsm::Wait.into_bits(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                match self.queues.lock(|queues| queues.borrow_mut().current.take()) {
                    Some(mut transaction) => {
                        let crc_result = transaction.params.finalize(raw_result);
                        trace!(
                            "CRC transfer on driver {} done. Result: {}",
                            self.id.0,
                            crc_result
                        );
                        match mem::replace(&mut transaction.notify, Notify::Nobody) {
                            Notify::Callback(callback) => {
                                need_yield = callback.on_crc_done(&CrcEvent {
                                    crc_result,
                                    driver: self.id,
                                });
                            }
                            Notify::Signal(index) => {
                                if let Some(signal) = self.signals.get(index) {
                                    need_yield = signal.signal(crc_result);
                                }
                            }
                            Notify::Nobody => {}
                        }
                        self.queues
                            .lock(|queues| queues.borrow_mut().idle.push_back(transaction));
                    }
                    None => warn!("CRC driver {} was running without a transaction.", self.id.0),
                }
                self.fsm.store(CrcFsm::Idle.into_bits(), Ordering::SeqCst);
            } else {
                warn!("Spurious EOF on CRC driver {}.", self.id.0);
            }
        }
        self.try_start_pending_transaction();
        need_yield
    }

    /// Claim a free completion signal for a waiting task.
    pub(crate) fn claim_signal(&self) -> Option<(usize, &CompletionSignal)> {
        self.signals
            .iter()
            .enumerate()
            .find(|(_, signal)| signal.try_claim())
    }

    /// The current state of the state machine.
    pub fn fsm_state(&self) -> CrcFsm {
        CrcFsm::from_bits(self.fsm.load(Ordering::SeqCst))
    }
    /// The amount of transactions available for new requests.
    pub fn idle_count(&self) -> usize {
        self.queues.lock(|queues| queues.borrow().idle.len())
    }
    /// The amount of transactions waiting for the hardware.
    pub fn pending_count(&self) -> usize {
        self.queues.lock(|queues| queues.borrow().ready.len())
    }
    /// Check if a transaction is running or pending.
    pub fn is_busy(&self) -> bool {
        self.fsm_state() != CrcFsm::Idle || self.pending_count() != 0
    }
    /// The amount of transactions, that were allocated at install.
    pub fn backlog(&self) -> usize {
        self.backlog
    }
    /// The id reported in every [CrcEvent] of this driver.
    pub fn id(&self) -> DriverId {
        self.id
    }
    /// The channel the driver was installed on.
    pub fn channel(&self) -> &C {
        &self.channel
    }
    #[cfg(test)]
    /// The amount of completion signals, that no waiter holds.
    pub(crate) fn free_signal_count(&self) -> usize {
        self.signals.iter().filter(|signal| signal.is_free()).count()
    }
    #[cfg(test)]
    /// The sum of descriptors, that all idle transactions can hold without allocating.
    pub(crate) fn idle_descriptor_capacity(&self) -> usize {
        self.queues.lock(|queues| {
            queues
                .borrow()
                .idle
                .iter()
                .map(|transaction| transaction.chain.capacity())
                .sum()
        })
    }
}
impl<C: GdmaCrcChannel> Drop for AsyncCrc<C> {
    fn drop(&mut self) {
        if self.is_busy() {
            warn!(
                "Dropping CRC driver {} with transactions in flight.",
                self.id.0
            );
        }
        self.channel.reset();
        self.channel.disconnect();
    }
}
