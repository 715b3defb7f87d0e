//! Cooperative stop request shared by the periodic tasks

use core::cell::RefCell;
use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

/// Distinct tasks that can wait at once before older wakers are flushed.
const MAX_WAITERS: usize = 8;

/// One-way stop flag
///
/// Tasks check it between cycles, so a cycle that has started always runs to
/// completion and the commit sequence is never left half-updated. Waiting
/// tasks are woken by [`Shutdown::request`] itself.
pub struct Shutdown {
    requested: AtomicBool,
    waiters: Mutex<CriticalSectionRawMutex, RefCell<MultiWakerRegistration<MAX_WAITERS>>>,
}

impl Shutdown {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            waiters: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        self.waiters.lock(|waiters| waiters.borrow_mut().wake());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            if self.is_requested() {
                return Poll::Ready(());
            }
            self.waiters
                .lock(|waiters| waiters.borrow_mut().register(cx.waker()));
            // A request landing between the check and the registration has
            // already run its wake; look again.
            if self.is_requested() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
