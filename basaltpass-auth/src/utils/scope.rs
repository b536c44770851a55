//! Scope vocabulary and set arithmetic over space-delimited scope strings.

pub const OPENID: &str = "openid";
pub const PROFILE: &str = "profile";
pub const EMAIL: &str = "email";
pub const PHONE: &str = "phone";
pub const OFFLINE_ACCESS: &str = "offline_access";

/// Umbrella scope: implies every `s2s.<resource>.read`.
pub const S2S_READ: &str = "s2s.read";
pub const S2S_USER_READ: &str = "s2s.user.read";
pub const S2S_USER_WRITE: &str = "s2s.user.write";
pub const S2S_RBAC_READ: &str = "s2s.rbac.read";
pub const S2S_WALLET_READ: &str = "s2s.wallet.read";
pub const S2S_MESSAGES_READ: &str = "s2s.messages.read";
pub const S2S_PRODUCTS_READ: &str = "s2s.products.read";

/// Scopes that describe an end user and only make sense on user grants.
pub const USER_SCOPES: &[&str] = &[OPENID, PROFILE, EMAIL, PHONE, OFFLINE_ACCESS];

pub const KNOWN_SCOPES: &[&str] = &[
    OPENID,
    PROFILE,
    EMAIL,
    PHONE,
    OFFLINE_ACCESS,
    S2S_READ,
    S2S_USER_READ,
    S2S_USER_WRITE,
    S2S_RBAC_READ,
    S2S_WALLET_READ,
    S2S_MESSAGES_READ,
    S2S_PRODUCTS_READ,
];

/// Registered on a client when the creator supplies none.
pub const DEFAULT_CLIENT_SCOPES: &[&str] = &[OPENID, PROFILE, EMAIL];

/// Split a space-delimited scope parameter, dropping duplicates but keeping order.
pub fn parse_scope(raw: &str) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in raw.split_whitespace() {
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

pub fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}

pub fn is_known(scope: &str) -> bool {
    KNOWN_SCOPES.contains(&scope)
}

pub fn is_s2s(scope: &str) -> bool {
    scope.starts_with("s2s.")
}

pub fn contains(scopes: &[String], scope: &str) -> bool {
    scopes.iter().any(|s| s == scope)
}

/// `requested ⊆ allowed`, by exact string comparison.
pub fn is_subset(requested: &[String], allowed: &[String]) -> bool {
    requested.iter().all(|r| contains(allowed, r))
}

/// `a ∩ b`, in the order of `a`.
pub fn intersect(a: &[String], b: &[String]) -> Vec<String> {
    a.iter().filter(|s| contains(b, s)).cloned().collect()
}

/// Whether a granted scope set satisfies `required`, honouring the `s2s.read` umbrella.
pub fn satisfies(granted: &[String], required: &str) -> bool {
    if contains(granted, required) {
        return true;
    }
    is_s2s(required) && required.ends_with(".read") && contains(granted, S2S_READ)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_scope_dedups_and_trims() {
        assert_eq!(parse_scope("  openid email openid  "), v(&["openid", "email"]));
        assert!(parse_scope("").is_empty());
    }

    #[test]
    fn test_subset_is_exact() {
        let allowed = v(&["openid", "profile", "email"]);
        assert!(is_subset(&v(&["openid", "email"]), &allowed));
        assert!(!is_subset(&v(&["openid", "Email"]), &allowed));
        assert!(is_subset(&[], &allowed));
    }

    #[test]
    fn test_intersection_keeps_order() {
        let a = v(&["s2s.rbac.read", "openid", "s2s.user.read"]);
        let b = v(&["s2s.user.read", "s2s.rbac.read"]);
        assert_eq!(intersect(&a, &b), v(&["s2s.rbac.read", "s2s.user.read"]));
    }

    #[test]
    fn test_umbrella_read_scope() {
        let granted = v(&[S2S_READ]);
        assert!(satisfies(&granted, S2S_USER_READ));
        assert!(satisfies(&granted, S2S_RBAC_READ));
        assert!(!satisfies(&granted, S2S_USER_WRITE));

        let narrow = v(&[S2S_USER_READ]);
        assert!(satisfies(&narrow, S2S_USER_READ));
        assert!(!satisfies(&narrow, S2S_RBAC_READ));
    }
}
