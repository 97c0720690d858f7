//! Measure the initialization, execution, and closing phases of a federate.

use crate::Error;
use std::{path::Path, time::Instant};

/// Default file written when timing output is requested.
pub const FILE: &str = "timeDataLogging.csv";

/// Timing file of the federate `name` when several federates share a working directory.
pub fn named(name: &str) -> String {
    format!("timeDataLogging_{name}.csv")
}

/// Header row of the timing file.
pub const HEADER: &str = "Initialization time,Execution time,Closing time";

/// Returns the CPU time consumed by this process, in seconds.
#[cfg(unix)]
pub fn cpu_time() -> f64 {
    let mut spec = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `spec` is a valid, writable `timespec` for the duration of the call.
    let result = unsafe { libc::clock_gettime(libc::CLOCK_PROCESS_CPUTIME_ID, &mut spec) };
    if result != 0 {
        return 0.0;
    }
    spec.tv_sec as f64 + spec.tv_nsec as f64 / 1e9
}

/// Returns the CPU time consumed by this process, in seconds.
#[cfg(not(unix))]
pub fn cpu_time() -> f64 {
    0.0
}

/// Duration of a phase, in seconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Phase {
    pub cpu: f64,
    pub wall: f64,
}

/// Measures consecutive phases.
pub struct Stopwatch {
    cpu: f64,
    wall: Instant,
}

impl Stopwatch {
    pub fn start() -> Self {
        Self {
            cpu: cpu_time(),
            wall: Instant::now(),
        }
    }

    /// Returns the phase since the last lap (or start) and begins the next one.
    pub fn lap(&mut self) -> Phase {
        let cpu = cpu_time();
        let wall = Instant::now();
        let phase = Phase {
            cpu: (cpu - self.cpu).max(0.0),
            wall: wall.duration_since(self.wall).as_secs_f64(),
        };
        self.cpu = cpu;
        self.wall = wall;
        phase
    }
}

/// Durations of every phase of a federate run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Timings {
    pub initialization: Phase,
    pub execution: Phase,
    pub closing: Phase,
}

impl Timings {
    /// Render as CSV: a header, then CPU seconds, then wall-clock seconds.
    pub fn to_csv(&self) -> String {
        format!(
            "{HEADER}\n{:.4},{:.4},{:.4}\n{:.4},{:.4},{:.4}\n",
            self.initialization.cpu,
            self.execution.cpu,
            self.closing.cpu,
            self.initialization.wall,
            self.execution.wall,
            self.closing.wall,
        )
    }

    pub fn write(&self, path: &Path) -> Result<(), Error> {
        std::fs::write(path, self.to_csv())?;
        Ok(())
    }
}
