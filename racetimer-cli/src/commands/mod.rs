//! Subcommand implementations for racetimer-migrate

pub mod apply;
pub mod checksums;
pub mod inspect;
pub mod scaffold;

pub use apply::{run_down, run_up, DownArgs};
pub use checksums::{run_backfill, run_rebaseline};
pub use inspect::{run_check, run_status, ReportArgs};
pub use scaffold::{run_new, NewArgs};
