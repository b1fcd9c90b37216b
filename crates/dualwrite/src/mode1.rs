//! Phase 1: before migration. Only the legacy store is read and written.

use dualwrite_core::Role;

use crate::{Mode, ModeStrategy};

#[derive(Debug, Clone, Copy, Default)]
pub struct Mode1;

impl ModeStrategy for Mode1 {
    fn mode(&self) -> Mode { Mode::One }

    fn read_adapter(&self) -> Role { Role::Source }

    fn write_order(&self) -> &'static [Role] { &[Role::Source] }

    fn is_mirror_failure_fatal(&self, _role: Role) -> bool { false }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_only() {
        assert_eq!(Mode1.read_adapter(), Role::Source);
        assert_eq!(Mode1.write_order(), &[Role::Source]);
        assert!(!Mode1.mirrors_writes());
    }
}
