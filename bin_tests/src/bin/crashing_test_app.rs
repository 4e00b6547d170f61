// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Installs the crash handlers from the environment (`CRASH_REPORT_DIR`, `CRASH_REPORT_URL`, ...)
//! then descends `outer → middle → inner` and dies the way the first argument asks:
//! - `segv`: invalid memory read
//! - `abort`: `std::process::abort`
//! - `raise <signum>`: `raise(signum)`
//! - `disabled`: like `segv`, with reporting disabled beforehand

#[cfg(not(unix))]
fn main() {}

#[cfg(unix)]
fn main() -> anyhow::Result<()> {
    unix::main()
}

#[cfg(unix)]
mod unix {
    use anyhow::Context;
    use std::env;
    use tracing_subscriber::EnvFilter;

    #[derive(Clone, Copy)]
    enum Mode {
        Segv,
        Abort,
        Raise(libc::c_int),
    }

    #[inline(never)]
    unsafe fn read_null() {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            std::arch::asm!("mov eax, [0]", options(nostack));
        }

        #[cfg(target_arch = "aarch64")]
        {
            std::arch::asm!("mov x0, #0", "ldr x1, [x0]", options(nostack));
        }

        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        {
            libc::raise(libc::SIGSEGV);
        }
    }

    #[inline(never)]
    fn inner(mode: Mode) {
        match mode {
            Mode::Segv => unsafe { read_null() },
            Mode::Abort => std::process::abort(),
            Mode::Raise(signum) => unsafe {
                libc::raise(signum);
            },
        }
    }

    #[inline(never)]
    fn middle(mode: Mode) {
        inner(mode);
        std::hint::black_box(());
    }

    #[inline(never)]
    fn outer(mode: Mode) {
        middle(mode);
        std::hint::black_box(());
    }

    #[inline(never)]
    pub fn main() -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();

        let mut args = env::args().skip(1);
        let mode = args.next().context("Unexpected number of arguments 1")?;
        let mode = match mode.as_str() {
            "segv" | "disabled" => Mode::Segv,
            "abort" => Mode::Abort,
            "raise" => {
                let signum = args.next().context("Unexpected number of arguments 2")?;
                Mode::Raise(signum.parse().context("signal number")?)
            }
            other => anyhow::bail!("unknown mode {other:?}"),
        };
        anyhow::ensure!(args.next().is_none(), "unexpected extra arguments");

        crashtrace::init_from_env()?;
        if env::args().nth(1).as_deref() == Some("disabled") {
            crashtrace::disable();
        }

        outer(mode);
        anyhow::bail!("survived the fault")
    }
}
