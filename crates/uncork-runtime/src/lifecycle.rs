use crate::RuntimeError;
use std::fmt;

/// States of a per-user overlay instance.
///
/// `Purged` is terminal: the user explicitly deleted their data directory.
/// Package removal never purges; it only forces `Mounted -> Unmounted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Uninitialized,
    Mounted,
    Unmounted,
    Purged,
}

impl fmt::Display for OverlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
            Self::Purged => "purged",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: OverlayState, to: OverlayState) -> Result<(), RuntimeError> {
    use OverlayState::{Mounted, Purged, Uninitialized, Unmounted};

    let valid = matches!(
        (from, to),
        // First launch, or a second concurrent launch observing "already mounted".
        (Uninitialized | Unmounted | Mounted, Mounted)
            // Launcher cleanup or forced removal; unmounting the never-mounted
            // or already-unmounted is success, to tolerate cleanup races.
            | (Uninitialized | Mounted | Unmounted, Unmounted)
            // Explicit user-data deletion from anywhere but beyond the grave.
            | (Uninitialized | Mounted | Unmounted, Purged)
    );

    if valid {
        Ok(())
    } else {
        Err(RuntimeError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(OverlayState::Uninitialized, OverlayState::Mounted).is_ok());
        assert!(validate_transition(OverlayState::Mounted, OverlayState::Unmounted).is_ok());
        assert!(validate_transition(OverlayState::Unmounted, OverlayState::Mounted).is_ok());
        // Idempotent unmount (removal racing launcher cleanup).
        assert!(validate_transition(OverlayState::Unmounted, OverlayState::Unmounted).is_ok());
        assert!(validate_transition(OverlayState::Uninitialized, OverlayState::Unmounted).is_ok());
        // Second instance sees the mount already up.
        assert!(validate_transition(OverlayState::Mounted, OverlayState::Mounted).is_ok());
        // Purge from anywhere.
        assert!(validate_transition(OverlayState::Uninitialized, OverlayState::Purged).is_ok());
        assert!(validate_transition(OverlayState::Mounted, OverlayState::Purged).is_ok());
        assert!(validate_transition(OverlayState::Unmounted, OverlayState::Purged).is_ok());
    }

    #[test]
    fn purged_is_terminal() {
        assert!(validate_transition(OverlayState::Purged, OverlayState::Mounted).is_err());
        assert!(validate_transition(OverlayState::Purged, OverlayState::Unmounted).is_err());
        assert!(validate_transition(OverlayState::Purged, OverlayState::Uninitialized).is_err());
        assert!(validate_transition(OverlayState::Purged, OverlayState::Purged).is_err());
    }

    #[test]
    fn no_transition_back_to_uninitialized() {
        assert!(validate_transition(OverlayState::Mounted, OverlayState::Uninitialized).is_err());
        assert!(validate_transition(OverlayState::Unmounted, OverlayState::Uninitialized).is_err());
    }
}
