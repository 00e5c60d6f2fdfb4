use citylayout_auth::Role;
use citylayout_core::OwnerId;

/// Account context for a request (authenticated identity + roles).
///
/// Inserted by the auth middleware; the owner of every layout written in the
/// request comes from here, never from the request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    owner: OwnerId,
    roles: Vec<Role>,
}

impl AccountContext {
    pub fn new(owner: OwnerId, roles: Vec<Role>) -> Self {
        Self { owner, roles }
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    /// True if any held role covers `required`.
    pub fn has_role(&self, required: &Role) -> bool {
        self.roles.iter().any(|r| r.satisfies(required))
    }
}
