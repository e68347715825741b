//! Trigger sources and the polling thread that drives them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::Core::error::{PipelineError, PipelineResult, TriggerLinkError};
use crate::Pipeline::producer::TriggerHandle;

/// The trigger interface of the crate, as seen by the polling thread.
pub trait TriggerSource: Send {
    /// Presence check, run at arm when the pipeline polls for triggers.
    fn probe(&mut self) -> Result<(), TriggerLinkError> {
        Ok(())
    }

    fn enable(&mut self) {}

    fn disable(&mut self) {}

    /// Sequence id of the next pending trigger, if any. Must not block.
    fn poll(&mut self) -> Result<Option<u64>, TriggerLinkError>;
}

/// Thread that turns pending triggers into `on_trigger` calls.
///
/// A link error is reported to the pipeline as a fatal fault and ends the
/// thread; it is never retried here.
pub(crate) struct TriggerPoller {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Box<dyn TriggerSource>>,
}

impl TriggerPoller {
    pub(crate) fn spawn(
        mut source: Box<dyn TriggerSource>,
        handle: TriggerHandle,
        idle: Duration,
    ) -> PipelineResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("trigger-poll".to_string())
            .spawn(move || {
                source.enable();
                while !flag.load(Ordering::Acquire) {
                    match source.poll() {
                        Ok(Some(event_id)) => {
                            handle.on_trigger(event_id);
                        }
                        Ok(None) => thread::sleep(idle),
                        Err(e) => {
                            handle.report_link_lost(e.to_string());
                            break;
                        }
                    }
                }
                source.disable();
                debug!("Trigger polling thread exiting");
                source
            })?;
        Ok(Self { stop, thread })
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the thread and take the trigger source back.
    pub(crate) fn join(self) -> PipelineResult<Box<dyn TriggerSource>> {
        self.request_stop();
        self.thread
            .join()
            .map_err(|_| PipelineError::TriggerThreadPanicked)
    }
}
