//! The capture orchestration task.
//!
//! Four steps, strictly sequential: install the agent's log sink, start
//! capture, wait for a key, release. Each remote thread is awaited to
//! completion before the next is created, so the target never runs two
//! agent calls at once. A non-zero exit code carries the OS-meaningful
//! failure out of the target and aborts the task.

use tracing::{debug, info};

use recc_common::OwnedHandle;
use recc_inject::{call_agent, RemoteArg};

use crate::awaiters::{ConsoleAwaiter, ThreadAwaiter};
use crate::error::{ClientError, ClientResult};
use crate::sched::SignalContext;

const ENTRY_LOG: &str = "recc_log";
const ENTRY_CAPTURE: &str = "recc_capture";
const ENTRY_RELEASE: &str = "recc_release";

/// State carried across the orchestration's suspension points.
pub struct CaptureTask {
    process: OwnedHandle,
    agent_path: Vec<u16>,
    api: String,
    format: String,
    out_path: Vec<u16>,
    log_path: Vec<u16>,
}

impl CaptureTask {
    pub fn new(
        process: OwnedHandle,
        agent_path: Vec<u16>,
        api: String,
        format: String,
        out_path: Vec<u16>,
        log_path: Vec<u16>,
    ) -> Self {
        Self {
            process,
            agent_path,
            api,
            format,
            out_path,
            log_path,
        }
    }

    /// Dispatches the first step and schedules the rest behind it.
    pub fn start(self, ctx: &mut SignalContext) -> ClientResult<()> {
        debug!("installing agent log sink");
        let thread = call_agent(
            &self.process,
            false,
            &self.agent_path,
            ENTRY_LOG,
            &[RemoteArg::Wide(self.log_path.clone())],
        )?;
        ThreadAwaiter::install(ctx, thread, move |ctx, code| {
            check_exit(ENTRY_LOG, code)?;
            self.on_logged(ctx)
        });
        Ok(())
    }

    fn on_logged(self, ctx: &mut SignalContext) -> ClientResult<()> {
        debug!(api = %self.api, format = %self.format, "starting capture");
        let thread = call_agent(
            &self.process,
            false,
            &self.agent_path,
            ENTRY_CAPTURE,
            &[
                RemoteArg::Wide(self.out_path.clone()),
                RemoteArg::Bytes(self.api.clone().into_bytes()),
                RemoteArg::Bytes(self.format.clone().into_bytes()),
            ],
        )?;
        ThreadAwaiter::install(ctx, thread, move |ctx, code| {
            check_exit(ENTRY_CAPTURE, code)?;
            self.on_capturing(ctx)
        });
        Ok(())
    }

    fn on_capturing(self, ctx: &mut SignalContext) -> ClientResult<()> {
        eprintln!("Press any key to release ...");
        ConsoleAwaiter::install(ctx, move |ctx| self.on_key(ctx))
    }

    fn on_key(self, ctx: &mut SignalContext) -> ClientResult<()> {
        debug!("releasing capture");
        let thread = call_agent(&self.process, true, &self.agent_path, ENTRY_RELEASE, &[])?;
        ThreadAwaiter::install(ctx, thread, move |_ctx, code| {
            check_exit(ENTRY_RELEASE, code)?;
            info!("capture released, agent unloaded");
            // Keep the target handle alive until the very end.
            drop(self.process);
            Ok(())
        });
        Ok(())
    }
}

fn check_exit(entry: &'static str, code: u32) -> ClientResult<()> {
    if code != 0 {
        return Err(ClientError::RemoteThread { entry, code });
    }
    Ok(())
}
