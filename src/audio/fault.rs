//! Error reporting and callback fault containment
//!
//! A hardware callback must never unwind into the audio backend. Each callback
//! body runs inside [`guarded`] (or [`guarded_output`]); a panic is turned into a [`CallbackFault`]
//! pushed onto a lock-free queue, and the block is output as silence. The
//! control thread drains the queue on its next tick and forwards the faults to
//! the [`ErrorReporter`], so nothing is formatted or logged on the audio thread.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};

/// Receives diagnostics from the audio components.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> ErrorReporter for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Default reporter, writes through the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, message: &str) {
        log::error!("Audio error: {}", message);
    }
}

/// A failure that happened on a hardware callback thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackFault {
    CapturePanicked,
    PlaybackPanicked,
}

impl fmt::Display for CallbackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackFault::CapturePanicked => {
                write!(f, "input callback panicked, block dropped")
            }
            CallbackFault::PlaybackPanicked => {
                write!(f, "output callback panicked, block replaced by silence")
            }
        }
    }
}

const DEFAULT_FAULT_CAPACITY: usize = 64;

/// Producer side of a [`FaultQueue`], moved into stream callbacks.
#[derive(Clone)]
pub struct FaultSender {
    producer: Arc<Mutex<ringbuf::HeapProd<CallbackFault>>>,
    dropped: Arc<AtomicU64>,
}

impl FaultSender {
    /// Never blocks. If the queue is full (or the producer is busy) the fault is
    /// only counted.
    pub fn send(&self, fault: CallbackFault) {
        let pushed = match self.producer.try_lock() {
            Ok(mut producer) => producer.try_push(fault).is_ok(),
            Err(_) => false,
        };
        if !pushed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Bounded single-consumer queue of callback faults, drained by the control thread
pub struct FaultQueue {
    consumer: ringbuf::HeapCons<CallbackFault>,
    sender: FaultSender,
}

impl FaultQueue {
    pub fn new(capacity: usize) -> Self {
        let rb = HeapRb::<CallbackFault>::new(capacity.max(1));
        let (producer, consumer) = rb.split();

        Self {
            consumer,
            sender: FaultSender {
                producer: Arc::new(Mutex::new(producer)),
                dropped: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    pub fn sender(&self) -> FaultSender {
        self.sender.clone()
    }

    /// Forwards every pending fault to `reporter`. Returns how many faults were
    /// reported, including the ones that overflowed the queue.
    pub fn drain(&mut self, reporter: &dyn ErrorReporter) -> usize {
        let mut reported = 0;
        while let Some(fault) = self.consumer.try_pop() {
            reporter.report(&fault.to_string());
            reported += 1;
        }

        let dropped = self.sender.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            reporter.report(&format!("{} more callback fault(s) were dropped", dropped));
            reported += dropped as usize;
        }
        reported
    }
}

impl Default for FaultQueue {
    fn default() -> Self {
        Self::new(DEFAULT_FAULT_CAPACITY)
    }
}

/// Runs one callback body, turning a panic into a queued fault.
///
/// Returns false if the body panicked; the caller then outputs a neutral block.
pub(crate) fn guarded<F: FnOnce()>(sender: &FaultSender, fault: CallbackFault, body: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(()) => true,
        Err(_) => {
            sender.send(fault);
            false
        }
    }
}

/// [`guarded`] for an output callback: if `body` panics, `out` is zeroed
/// so the device plays silence instead of whatever was partly written.
pub(crate) fn guarded_output<F>(
    sender: &FaultSender,
    fault: CallbackFault,
    out: &mut [f32],
    body: F,
) -> bool
where
    F: FnOnce(&mut [f32]),
{
    let rendered = guarded(sender, fault, || body(&mut *out));
    if !rendered {
        out.fill(0.0);
    }
    rendered
}
