// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Creation and continuation option flags. Small `u8`-backed newtypes with
//! associated `const` flags and `BitOr`, rather than a `bitflags` dependency.

use std::ops::{BitOr, BitOrAssign};

macro_rules! flag_set {
    ($name:ident { $($flag:ident = $bit:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name(u8);

        impl $name {
            $(pub const $flag: Self = Self($bit);)+

            pub const NONE: Self = Self(0);

            pub const fn bits(self) -> u8 {
                self.0
            }

            pub const fn from_bits(bits: u8) -> Self {
                Self(bits)
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

flag_set!(CreationOptions {
    NONE_EXPLICIT = 0,
    PREFER_FAIRNESS = 1 << 0,
    LONG_RUNNING = 1 << 1,
    ATTACHED_TO_PARENT = 1 << 2,
    DENY_CHILD_ATTACH = 1 << 3,
    HIDE_SCHEDULER = 1 << 4,
    RUN_CONTINUATIONS_ASYNCHRONOUSLY = 1 << 5,
});

flag_set!(ContinuationOptions {
    NONE_EXPLICIT = 0,
    EXECUTE_SYNCHRONOUSLY = 1 << 0,
    LAZY_CANCELLATION = 1 << 1,
    ATTACHED_TO_PARENT = 1 << 2,
    RUN_CONTINUATIONS_ASYNCHRONOUSLY = 1 << 3,
    NOT_ON_RAN_TO_COMPLETION = 1 << 4,
    NOT_ON_FAULTED = 1 << 5,
    NOT_ON_CANCELED = 1 << 6,
});

impl ContinuationOptions {
    /// Convenience union matching the `OnlyOnFaulted` shorthand.
    pub const ONLY_ON_FAULTED: Self =
        Self(Self::NOT_ON_RAN_TO_COMPLETION.0 | Self::NOT_ON_CANCELED.0);
    pub const ONLY_ON_CANCELED: Self =
        Self(Self::NOT_ON_RAN_TO_COMPLETION.0 | Self::NOT_ON_FAULTED.0);
    pub const ONLY_ON_RAN_TO_COMPLETION: Self =
        Self(Self::NOT_ON_FAULTED.0 | Self::NOT_ON_CANCELED.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_options_compose() {
        let opts = CreationOptions::LONG_RUNNING | CreationOptions::ATTACHED_TO_PARENT;
        assert!(opts.contains(CreationOptions::LONG_RUNNING));
        assert!(opts.contains(CreationOptions::ATTACHED_TO_PARENT));
        assert!(!opts.contains(CreationOptions::DENY_CHILD_ATTACH));
    }

    #[test]
    fn only_on_faulted_excludes_the_other_two_terminals() {
        let opts = ContinuationOptions::ONLY_ON_FAULTED;
        assert!(opts.contains(ContinuationOptions::NOT_ON_RAN_TO_COMPLETION));
        assert!(opts.contains(ContinuationOptions::NOT_ON_CANCELED));
        assert!(!opts.contains(ContinuationOptions::NOT_ON_FAULTED));
    }
}
