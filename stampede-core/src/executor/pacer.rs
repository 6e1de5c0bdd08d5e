use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Hands due iteration starts to arrival-rate workers, growing the pool up to `max_vus`.
#[derive(Debug)]
pub(crate) struct ArrivalPacer {
    state: Mutex<PacerState>,
    max_vus: u64,
    dropped_total: AtomicU64,
    notify: Notify,
}

#[derive(Debug, Default)]
struct PacerState {
    /// Admitted starts not yet claimed by a worker.
    pending: u64,
    /// Workers currently inside an iteration.
    busy: u64,
    allocated: u64,
    done: bool,
}

/// What one `admit` call decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Admission {
    /// New workers the caller must spawn.
    pub(crate) spawn: u64,
    pub(crate) dropped: u64,
}

impl ArrivalPacer {
    pub(crate) fn new(pre_allocated_vus: u64, max_vus: u64) -> Self {
        Self {
            state: Mutex::new(PacerState {
                allocated: pre_allocated_vus,
                ..PacerState::default()
            }),
            max_vus,
            dropped_total: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    pub(crate) fn allocated(&self) -> u64 {
        self.state.lock().allocated
    }

    pub(crate) fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Admit `due` starts: idle workers first, then new workers, else drop.
    pub(crate) fn admit(&self, due: u64) -> Admission {
        let mut out = Admission::default();
        {
            let mut st = self.state.lock();
            if st.done {
                return out;
            }
            for _ in 0..due {
                let idle = st.allocated.saturating_sub(st.busy + st.pending);
                if idle > 0 {
                    st.pending += 1;
                } else if st.allocated < self.max_vus {
                    st.allocated += 1;
                    st.pending += 1;
                    out.spawn += 1;
                } else {
                    out.dropped += 1;
                }
            }
        }

        if out.dropped != 0 {
            self.dropped_total.fetch_add(out.dropped, Ordering::Relaxed);
        }
        if due > out.dropped {
            self.notify.notify_waiters();
        }
        out
    }

    /// Wait for an admitted start. Returns `false` once the pacer is finished.
    pub(crate) async fn claim(&self) -> bool {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Registered before the state check so a concurrent admit cannot be missed.
            notified.as_mut().enable();

            {
                let mut st = self.state.lock();
                if st.done {
                    return false;
                }
                if st.pending > 0 {
                    st.pending -= 1;
                    st.busy += 1;
                    return true;
                }
            }

            notified.await;
        }
    }

    pub(crate) fn release(&self) {
        let mut st = self.state.lock();
        st.busy = st.busy.saturating_sub(1);
    }

    /// Stop handing out starts. Unclaimed starts are discarded.
    pub(crate) fn finish(&self) {
        {
            let mut st = self.state.lock();
            st.done = true;
            st.pending = 0;
        }
        self.notify.notify_waiters();
    }
}
