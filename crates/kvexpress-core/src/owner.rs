//! Owner name -> numeric uid/gid resolution.
//!
//! Kept behind a trait so platforms without POSIX ownership (or tests that
//! cannot chown to arbitrary users) can plug in [`FixedOwners`].

use crate::error::ApplyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerIds {
    pub uid: u32,
    pub gid: u32,
}

pub trait OwnerResolver: Send + Sync {
    /// Resolve `owner` (a user name) to ids. `None` means "whoever runs us".
    fn resolve(&self, owner: Option<&str>) -> Result<OwnerIds, ApplyError>;
}

/// Always answers with the same ids, whatever name is asked for.
#[derive(Debug, Clone, Copy)]
pub struct FixedOwners(pub OwnerIds);

impl OwnerResolver for FixedOwners {
    fn resolve(&self, _owner: Option<&str>) -> Result<OwnerIds, ApplyError> {
        Ok(self.0)
    }
}

/// Resolves names through the system user database.
///
/// The group is the user's primary group.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOwners;

#[cfg(unix)]
impl SystemOwners {
    /// Effective ids of the running process.
    pub fn current() -> OwnerIds {
        OwnerIds {
            uid: nix::unistd::geteuid().as_raw(),
            gid: nix::unistd::getegid().as_raw(),
        }
    }
}

#[cfg(unix)]
impl OwnerResolver for SystemOwners {
    fn resolve(&self, owner: Option<&str>) -> Result<OwnerIds, ApplyError> {
        let name = match owner.map(str::trim) {
            None | Some("") => return Ok(Self::current()),
            Some(name) => name,
        };
        match nix::unistd::User::from_name(name) {
            Ok(Some(user)) => Ok(OwnerIds {
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
            }),
            Ok(None) => Err(ApplyError::ResolveOwner {
                owner: name.to_string(),
                message: "no such user".to_string(),
            }),
            Err(e) => Err(ApplyError::ResolveOwner {
                owner: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_owners_ignore_the_name() {
        let ids = OwnerIds { uid: 42, gid: 7 };
        let r = FixedOwners(ids);
        assert_eq!(r.resolve(Some("nobody")).unwrap(), ids);
        assert_eq!(r.resolve(None).unwrap(), ids);
    }

    #[cfg(unix)]
    #[test]
    fn no_owner_resolves_to_current_process() {
        let ids = SystemOwners.resolve(None).unwrap();
        assert_eq!(ids, SystemOwners::current());
        assert_eq!(SystemOwners.resolve(Some("  ")).unwrap(), ids);
    }

    #[cfg(unix)]
    #[test]
    fn unknown_user_is_a_resolution_error() {
        let err = SystemOwners
            .resolve(Some("kvexpress-no-such-user-4f2a"))
            .unwrap_err();
        assert!(matches!(err, ApplyError::ResolveOwner { .. }));
    }
}
