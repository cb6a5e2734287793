//! Header line showing who is signed in.

use ideavault_types::Identity;

/// What the header shows for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionBanner {
    SignedIn { email: String },
    SignedOut,
}

impl SessionBanner {
    pub fn from_identity(identity: Option<&Identity>) -> Self {
        match identity {
            Some(identity) => Self::SignedIn { email: identity.email.clone() },
            None => Self::SignedOut,
        }
    }

    /// Actions offered next to the banner text.
    pub fn actions(&self) -> &'static [&'static str] {
        match self {
            Self::SignedIn { .. } => &["logout"],
            Self::SignedOut => &["login", "register"],
        }
    }
}

impl std::fmt::Display for SessionBanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SignedIn { email } => write!(f, "Welcome, {email}"),
            Self::SignedOut => f.write_str("Not signed in. Use login or register."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_text() {
        let amy = Identity::new("u1", "amy@example.com");
        let banner = SessionBanner::from_identity(Some(&amy));
        assert_eq!(banner.to_string(), "Welcome, amy@example.com");
        assert_eq!(banner.actions(), &["logout"]);

        let banner = SessionBanner::from_identity(None);
        assert_eq!(banner, SessionBanner::SignedOut);
        assert_eq!(banner.actions(), &["login", "register"]);
    }
}
