//! Phase 3: the unified store is trusted. It serves reads and takes writes
//! first; the legacy store is kept as a best-effort mirror so the migration
//! can still be rolled back.

use dualwrite_core::Role;

use crate::{Mode, ModeStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct Mode3;

impl ModeStrategy for Mode3 {
    fn mode(&self) -> Mode { Mode::Three }

    fn read_adapter(&self) -> Role { Role::Target }

    fn write_order(&self) -> &'static [Role] { &[Role::Target, Role::Source] }

    fn is_mirror_failure_fatal(&self, _role: Role) -> bool { false }
}
