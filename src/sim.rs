//! A software model of a GDMA channel with a CRC calculator.
//!
//! Starting a transfer only records the descriptor chain. The CRC is computed, once the transfer
//! is completed through [step], which then invokes the EOF handler of the driver, the same way the
//! interrupt would.
use std::{
    cell::Cell,
    ops::Range,
    ptr::NonNull,
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{
    AlignmentConstraints, AsyncCrc, ChannelError, CrcCalculatorConfig, CrcParams, DmaDescriptor,
    EofEvent, GdmaBus, GdmaCrcChannel, StrategyConfig, TransferConfig,
};

std::thread_local! {
    static IN_ISR: Cell<bool> = const { Cell::new(false) };
}

/// Run `f` as if it was running in interrupt context.
pub fn with_isr_context<R>(f: impl FnOnce() -> R) -> R {
    let previous = IN_ISR.with(|in_isr| in_isr.replace(true));
    let result = f();
    IN_ISR.with(|in_isr| in_isr.set(previous));
    result
}

#[derive(Default)]
/// Counters of what happened on a [SimGdma].
pub struct SimStats {
    starts: AtomicUsize,
    completions: AtomicUsize,
    violations: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    resets: AtomicUsize,
    writebacks: AtomicUsize,
}
impl SimStats {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
    /// How often the calculator was configured, reset or started while a transfer was running.
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
    pub fn writebacks(&self) -> usize {
        self.writebacks.load(Ordering::SeqCst)
    }
}

struct PendingTransfer(NonNull<DmaDescriptor>);
// The chain stays alive until the driver handled the EOF.
unsafe impl Send for PendingTransfer {}

#[derive(Default)]
struct Engine {
    connected: bool,
    strategy: Option<StrategyConfig>,
    transfer: Option<TransferConfig>,
    calculator: Option<CrcCalculatorConfig>,
    pending: Option<PendingTransfer>,
    result: u32,
}

/// A simulated GDMA channel.
pub struct SimGdma {
    bus: GdmaBus,
    channel_id: u32,
    alignment: AlignmentConstraints,
    external_memory: Option<Range<usize>>,
    cache_line_size: usize,
    fail_connect: bool,
    fail_transfer_config: bool,
    engine: Mutex<Engine>,
    stats: Arc<SimStats>,
}
impl SimGdma {
    pub fn new(bus: GdmaBus) -> Self {
        Self {
            bus,
            channel_id: 0,
            alignment: AlignmentConstraints {
                internal: 4,
                external: 16,
            },
            external_memory: None,
            cache_line_size: 0,
            fail_connect: false,
            fail_transfer_config: false,
            engine: Mutex::new(Engine::default()),
            stats: Arc::new(SimStats::default()),
        }
    }
    pub fn with_channel_id(mut self, channel_id: u32) -> Self {
        self.channel_id = channel_id;
        self
    }
    pub fn with_alignment(mut self, alignment: AlignmentConstraints) -> Self {
        self.alignment = alignment;
        self
    }
    /// Treat addresses in `range` as external memory.
    pub fn with_external_memory(mut self, range: Range<usize>) -> Self {
        self.external_memory = Some(range);
        self
    }
    pub fn with_cache_line_size(mut self, cache_line_size: usize) -> Self {
        self.cache_line_size = cache_line_size;
        self
    }
    /// Make connecting to a memory to memory trigger fail.
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }
    /// Make configuring the transfer fail.
    pub fn failing_transfer_config(mut self) -> Self {
        self.fail_transfer_config = true;
        self
    }
    /// The counters of this channel, which stay accessible after the channel is dropped.
    pub fn probe(&self) -> Arc<SimStats> {
        self.stats.clone()
    }
    fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
    pub fn is_connected(&self) -> bool {
        self.engine().connected
    }
    pub fn strategy(&self) -> Option<StrategyConfig> {
        self.engine().strategy
    }
    pub fn transfer_config(&self) -> Option<TransferConfig> {
        self.engine().transfer
    }
    pub fn has_pending_transfer(&self) -> bool {
        self.engine().pending.is_some()
    }
    /// Run the pending transfer through the calculator.
    ///
    /// Returns false, if no transfer was pending.
    fn finish_transfer(&self) -> bool {
        let mut engine = self.engine();
        let Some(PendingTransfer(head)) = engine.pending.take() else {
            return false;
        };
        let Some(config) = engine.calculator else {
            return false;
        };
        let owner_check = engine.strategy.is_some_and(|strategy| strategy.owner_check);
        let mut calculator = Calculator::new(&config);
        let mut next = Some(head);
        while let Some(descriptor) = next {
            let descriptor = unsafe { descriptor.as_ref() };
            let header = descriptor.header();
            if owner_check && !header.dma_owned() {
                break;
            }
            unsafe { descriptor.buffer() }
                .iter()
                .for_each(|byte| calculator.feed(*byte));
            if header.suc_eof() {
                break;
            }
            next = descriptor.next();
        }
        engine.result = calculator.value();
        self.stats.completions.fetch_add(1, Ordering::SeqCst);
        true
    }
    fn check_idle(&self, engine: &Engine) {
        if engine.pending.is_some() {
            self.stats.violations.fetch_add(1, Ordering::SeqCst);
        }
    }
}
impl GdmaCrcChannel for SimGdma {
    fn bus(&self) -> GdmaBus {
        self.bus
    }
    fn channel_id(&self) -> u32 {
        self.channel_id
    }
    fn reset(&self) {
        let engine = self.engine();
        self.check_idle(&engine);
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
    }
    fn connect_m2m(&mut self) -> Result<(), ChannelError> {
        if self.fail_connect {
            return Err(ChannelError::ConnectFailed);
        }
        self.engine().connected = true;
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn disconnect(&mut self) {
        self.engine().connected = false;
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
    }
    fn apply_strategy(&mut self, strategy: &StrategyConfig) {
        self.engine().strategy = Some(*strategy);
    }
    fn config_transfer(&mut self, config: &TransferConfig) -> Result<(), ChannelError> {
        if self.fail_transfer_config {
            return Err(ChannelError::InvalidTransferConfig);
        }
        self.engine().transfer = Some(*config);
        Ok(())
    }
    fn alignment_constraints(&self) -> AlignmentConstraints {
        self.alignment
    }
    fn is_internal_memory(&self, address: *const u8) -> bool {
        !self
            .external_memory
            .as_ref()
            .is_some_and(|range| range.contains(&(address as usize)))
    }
    fn cache_line_size(&self, _address: *const u8) -> usize {
        self.cache_line_size
    }
    fn cache_writeback(&self, _address: *const u8, _length: usize) {
        self.stats.writebacks.fetch_add(1, Ordering::SeqCst);
    }
    fn configure_crc(&self, config: &CrcCalculatorConfig) {
        let mut engine = self.engine();
        self.check_idle(&engine);
        engine.calculator = Some(*config);
    }
    unsafe fn start(&self, head: NonNull<DmaDescriptor>) {
        let mut engine = self.engine();
        self.check_idle(&engine);
        engine.pending = Some(PendingTransfer(head));
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
    }
    fn crc_result(&self) -> u32 {
        self.engine().result
    }
    fn in_isr_context(&self) -> bool {
        IN_ISR.with(Cell::get)
    }
}

/// The bit serial CRC calculator in front of the DMA.
///
/// The value is kept right aligned in the lower `bit_width` bits.
struct Calculator {
    value: u32,
    polynomial: u32,
    mask: u32,
    top_bit: u32,
    reverse_input: bool,
}
impl Calculator {
    fn new(config: &CrcCalculatorConfig) -> Self {
        let bit_width = u32::from(config.bit_width).clamp(1, 32);
        let mask = u32::MAX >> (32 - bit_width);
        Self {
            value: config.init_value & mask,
            polynomial: config.polynomial & mask,
            mask,
            top_bit: 1 << (bit_width - 1),
            reverse_input: config.reverse_data_mask,
        }
    }
    fn feed(&mut self, byte: u8) {
        let byte = if self.reverse_input {
            byte.reverse_bits()
        } else {
            byte
        };
        for bit in (0..8).rev() {
            let feedback = (self.value & self.top_bit != 0) ^ ((byte >> bit) & 1 != 0);
            self.value = (self.value << 1) & self.mask;
            if feedback {
                self.value ^= self.polynomial;
            }
        }
    }
    fn value(&self) -> u32 {
        self.value
    }
}

/// Calculate the CRC of `data` in software, including the output transformations.
pub fn software_crc(params: &CrcParams, data: &[u8]) -> u32 {
    let mut calculator = Calculator::new(&params.calculator_config());
    data.iter().for_each(|byte| calculator.feed(*byte));
    params.finalize(calculator.value())
}

/// Complete the pending transfer and run the EOF handler in simulated interrupt context.
///
/// Returns false, if no transfer was pending.
pub fn step(driver: &AsyncCrc<SimGdma>) -> bool {
    if !driver.channel().finish_transfer() {
        return false;
    }
    with_isr_context(|| driver.on_transfer_eof(EofEvent { normal_eof: true }));
    true
}
/// Complete transfers until the driver is idle and return how many there were.
pub fn drain(driver: &AsyncCrc<SimGdma>) -> usize {
    let mut completed = 0;
    while step(driver) {
        completed += 1;
    }
    completed
}

/// A thread acting as the EOF interrupt.
///
/// Every transfer completes `latency` after it was noticed. The thread stops when this is dropped.
pub struct IrqThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}
impl IrqThread {
    pub fn spawn(driver: Arc<AsyncCrc<SimGdma>>, latency: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    if driver.channel().has_pending_transfer() {
                        if !latency.is_zero() {
                            thread::sleep(latency);
                        }
                        step(&driver);
                    } else {
                        thread::sleep(Duration::from_micros(20));
                    }
                }
            })
        };
        Self {
            stop,
            handle: Some(handle),
        }
    }
}
impl Drop for IrqThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
