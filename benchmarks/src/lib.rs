//! # stresslab benchmarks
//!
//! Binaries driving the stresslab core against the loopback transport:
//!
//! - **stress_test**: endless endpoint churn until Ctrl-C or `--duration`
//! - **push_samples**: single-pair push/pull throughput
//!
//! Both can dump their final report as JSON for run-to-run comparison.

pub mod output;

use std::io::{self, BufRead, Write};

pub use output::{print_churn_summary, print_throughput_report, write_json_report, RunReport};

/// Install `env_logger` with a default filter, no timestamps and no targets.
pub fn init_logging(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// True when the binary was started without any arguments, e.g. by double
/// clicking it.
pub fn launched_without_args() -> bool {
    std::env::args_os().len() == 1
}

/// Print the exit prompt to `out` and block until a line (or EOF) arrives
/// on `input`.
pub fn wait_for_enter<R: BufRead, W: Write>(input: &mut R, out: &mut W) -> io::Result<()> {
    writeln!(out, "Press [Enter] to exit")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_wait_for_enter_consumes_one_line() {
        let mut input = Cursor::new(b"\nleftover\n".to_vec());
        let mut out = Vec::new();
        wait_for_enter(&mut input, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Press [Enter] to exit\n");
        assert_eq!(input.position(), 1);
    }

    #[test]
    fn test_wait_for_enter_returns_on_eof() {
        let mut input = Cursor::new(Vec::new());
        let mut out = Vec::new();
        wait_for_enter(&mut input, &mut out).unwrap();
        assert!(!out.is_empty());
    }
}
