//! Phase 2: both stores are written, legacy first. Reads still come from the
//! legacy store while the unified store catches up; unified write failures are
//! only logged.

use dualwrite_core::Role;

use crate::{Mode, ModeStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct Mode2;

impl ModeStrategy for Mode2 {
    fn mode(&self) -> Mode { Mode::Two }

    fn read_adapter(&self) -> Role { Role::Source }

    fn write_order(&self) -> &'static [Role] { &[Role::Source, Role::Target] }

    fn is_mirror_failure_fatal(&self, _role: Role) -> bool { false }
}
