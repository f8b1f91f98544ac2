//! Result handling.

use crate::error::MachError;
use crate::mach::Mach;

/// Receives every machine exactly once after it has finished executing
/// (halted, crashed, or errored). Without a handler installed at build
/// time there is no run queue and any fork or branch fails.
///
/// Returning an error cancels the rest of the run; it becomes the value
/// [`Mach::run`](crate::Mach::run) returns.
pub trait Handler {
    fn handle(&mut self, m: &mut Mach) -> Result<(), MachError>;
}

impl<F> Handler for F
where
    F: FnMut(&mut Mach) -> Result<(), MachError>,
{
    fn handle(&mut self, m: &mut Mach) -> Result<(), MachError> {
        self(m)
    }
}
