//! Phase 4: migration done, legacy store retired.

use dualwrite_core::Role;

use crate::{Mode, ModeStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct Mode4;

impl ModeStrategy for Mode4 {
    fn mode(&self) -> Mode { Mode::Four }

    fn read_adapter(&self) -> Role { Role::Target }

    fn write_order(&self) -> &'static [Role] { &[Role::Target] }

    fn is_mirror_failure_fatal(&self, _role: Role) -> bool { false }
}
