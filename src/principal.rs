/// The identity a reindex run is invoked under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    /// A known repository user.
    User { name: String },
    /// An identity of a kind the repository does not recognize.
    Unrecognized(String),
}

/// Resolves the calling principal and its administrative rights.
pub trait PrincipalResolver {
    fn current_principal(&self) -> Principal;

    fn is_administrator(&self, principal: &Principal) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized(Principal),
    Unauthorized,
}

impl Authorization {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }
}

/// Admit only recognized users holding the administrator role.
///
/// Checked once per run, before any enumeration or mutation.
pub fn authorize(resolver: &dyn PrincipalResolver) -> Authorization {
    let principal = resolver.current_principal();
    match principal {
        Principal::User { .. } if resolver.is_administrator(&principal) => {
            Authorization::Authorized(principal)
        }
        _ => Authorization::Unauthorized,
    }
}
