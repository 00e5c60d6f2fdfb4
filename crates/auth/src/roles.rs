use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for RBAC, written `<scope>:<access>`.
///
/// `access` is a set of letters (`r`, `w`); `ui:rw` grants read and write on
/// the `ui` scope. A role without `:` is a bare scope with no access letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scope(&self) -> &str {
        self.0.split_once(':').map_or(&*self.0, |(scope, _)| scope)
    }

    pub fn access(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, access)| access)
    }

    /// Same scope, and every access letter `required` asks for is granted here.
    pub fn satisfies(&self, required: &Role) -> bool {
        self.scope() == required.scope() && required.access().chars().all(|c| self.access().contains(c))
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_scope_and_access() {
        let role = Role::new("ui:rw");
        assert_eq!(role.scope(), "ui");
        assert_eq!(role.access(), "rw");

        let bare = Role::new("ui");
        assert_eq!(bare.scope(), "ui");
        assert_eq!(bare.access(), "");
    }

    #[test]
    fn write_access_needs_the_letter() {
        let required = Role::new("ui:rw");
        assert!(Role::new("ui:rw").satisfies(&required));
        assert!(Role::new("ui:wr").satisfies(&required));
        assert!(!Role::new("ui:r").satisfies(&required));
        assert!(!Role::new("layout:rw").satisfies(&required));
        assert!(Role::new("ui:rw").satisfies(&Role::new("ui:r")));
    }
}
