use crate::security::session_store::TokenPair;
use crate::transport::RequestOptions;

/// Per-request authentication class, derived from [`RequestOptions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Never carries a token; a 401 never triggers renewal.
    Public,
    /// Carries the token when one is stored; a 401 never triggers renewal.
    Hybrid,
    /// Auth required; a 401 is renewal-eligible.
    Private,
}

impl Classification {
    pub fn of(options: &RequestOptions) -> Self {
        match (options.requires_auth, options.send_auth_if_present) {
            (true, _) => Classification::Private,
            (false, true) => Classification::Hybrid,
            (false, false) => Classification::Public,
        }
    }

    pub fn requires_auth(self) -> bool {
        matches!(self, Classification::Private)
    }
}

/// The bearer credential to attach, if any.
///
/// A missing token on a private request is not an error here: the request
/// goes out unauthenticated and the server decides.
pub fn bearer_for<'a>(options: &RequestOptions, tokens: &'a TokenPair) -> Option<&'a str> {
    match Classification::of(options) {
        Classification::Public => None,
        Classification::Hybrid | Classification::Private => tokens.access.as_deref(),
    }
}
