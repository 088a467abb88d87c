//! recc: records the audio output of another application.
//!
//! The controller locates the target, injects `recc_agent.dll` through
//! one-shot remote-call stubs and drives it: log sink, capture, key wait,
//! release. Pipe sinks forward the agent's output and log to the
//! controller's standard streams on request.

#[cfg(windows)]
mod awaiters;
#[cfg(windows)]
mod capture_task;
mod cli;
#[cfg(windows)]
mod error;
mod pipe;
#[cfg(windows)]
mod sched;
#[cfg(windows)]
mod target;

use clap::Parser;

use cli::Cli;

#[cfg(windows)]
use windows::Win32::System::Console::{STD_ERROR_HANDLE, STD_OUTPUT_HANDLE};

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recc=warn,recc_inject=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(windows)]
fn main() {
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err} (code 0x{:08X})", err.code());
            std::process::exit(-1);
        }
    }
}

#[cfg(windows)]
fn run() -> error::ClientResult<i32> {
    use clap::CommandFactory;

    let args = Cli::parse();
    if !args.has_target() {
        eprint!("{}", Cli::command().render_help());
        return Ok(0);
    }

    let process = match &args.window {
        Some(fragment) => target::process_from_window(fragment)?,
        None => target::process_from_id(args.pid.unwrap_or_default())?,
    };
    if !process.is_valid() {
        eprintln!("There is no such (64-bit) process.");
        return Ok(-1);
    }

    let mut ctx = sched::SignalContext::new();
    let controller_pid = std::process::id();

    let out_path = if args.output == cli::STD_STREAM {
        let name = pipe::data_pipe_name(controller_pid);
        pipe::PipeSink::spawn(&mut ctx, &name, std_handle(STD_OUTPUT_HANDLE)?)?;
        recc_common::to_wide(&name)
    } else {
        absolute_wide(&args.output)?
    };

    let log_path = if args.log == cli::STD_STREAM {
        let name = pipe::log_pipe_name(controller_pid);
        pipe::PipeSink::spawn(&mut ctx, &name, std_handle(STD_ERROR_HANDLE)?)?;
        recc_common::to_wide(&name)
    } else {
        absolute_wide(&args.log)?
    };

    let task = capture_task::CaptureTask::new(
        process,
        agent_path()?,
        args.api,
        args.format,
        out_path,
        log_path,
    );
    task.start(&mut ctx)?;
    ctx.run()?;
    Ok(0)
}

/// The agent DLL sits next to the controller executable.
#[cfg(windows)]
fn agent_path() -> error::ClientResult<Vec<u16>> {
    use std::os::windows::ffi::OsStrExt;

    let exe = std::env::current_exe().map_err(|source| error::ClientError::Path {
        path: "<current exe>".into(),
        source,
    })?;
    let path = exe.with_file_name("recc_agent.dll");
    Ok(path.as_os_str().encode_wide().collect())
}

/// Relative user paths are pinned to the working directory before they
/// travel into the target, which resolves against its own directory.
#[cfg(windows)]
fn absolute_wide(path: &str) -> error::ClientResult<Vec<u16>> {
    use std::os::windows::ffi::OsStrExt;

    let absolute = std::path::absolute(path).map_err(|source| error::ClientError::Path {
        path: path.to_owned(),
        source,
    })?;
    Ok(absolute.as_os_str().encode_wide().collect())
}

#[cfg(windows)]
fn std_handle(
    which: windows::Win32::System::Console::STD_HANDLE,
) -> error::ClientResult<windows::Win32::Foundation::HANDLE> {
    unsafe { windows::Win32::System::Console::GetStdHandle(which) }
        .map_err(|e| recc_common::Win32Error::api("GetStdHandle", e).into())
}

#[cfg(not(windows))]
fn main() {
    init_logging();
    // Argument validation still runs everywhere; the actual recorder
    // drives Win32 process injection and needs a Windows host.
    let _ = Cli::parse();
    eprintln!("recc records through Win32 process injection and only runs on 64-bit Windows.");
    std::process::exit(-1);
}
