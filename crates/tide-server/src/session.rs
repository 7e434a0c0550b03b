//! Session identity resolution from the request cookie.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::debug;

use tide_core::SessionId;
use tide_settings::SessionSettings;

/// A resolved session plus the cookie to set, if one was issued.
#[derive(Clone, Debug)]
pub struct ResolvedSession {
    /// Session the request belongs to.
    pub id: SessionId,
    /// Cookie to return when the id was freshly minted.
    pub issued: Option<Cookie<'static>>,
}

impl ResolvedSession {
    /// Add the issued cookie, if any, to `jar`.
    pub fn apply(self, jar: CookieJar) -> (CookieJar, SessionId) {
        let jar = match self.issued {
            Some(cookie) => jar.add(cookie),
            None => jar,
        };
        (jar, self.id)
    }
}

/// Maps a request to a session id.
pub trait SessionResolver: Send + Sync {
    /// Resolve the session for a request's cookies.
    fn resolve(&self, jar: &CookieJar) -> ResolvedSession;
}

/// Reads the session id from a cookie and mints one when absent or invalid.
#[derive(Clone, Debug)]
pub struct CookieSessionResolver {
    cookie_name: String,
    max_age_secs: i64,
    secure: bool,
}

impl CookieSessionResolver {
    /// Build from settings.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            cookie_name: settings.cookie_name.clone(),
            max_age_secs: i64::try_from(settings.cookie_max_age_secs).unwrap_or(i64::MAX),
            secure: settings.secure_cookie,
        }
    }

    /// Name of the cookie this resolver reads and writes.
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    fn issue(&self, id: &SessionId) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), id.as_str().to_owned()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .max_age(cookie::time::Duration::seconds(self.max_age_secs))
            .build()
    }
}

impl SessionResolver for CookieSessionResolver {
    fn resolve(&self, jar: &CookieJar) -> ResolvedSession {
        if let Some(id) = jar
            .get(&self.cookie_name)
            .and_then(|c| SessionId::parse(c.value()))
        {
            return ResolvedSession { id, issued: None };
        }
        let id = SessionId::new();
        debug!(session_id = %id, "issuing new session");
        ResolvedSession {
            issued: Some(self.issue(&id)),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> CookieSessionResolver {
        CookieSessionResolver::from_settings(&SessionSettings::default())
    }

    #[test]
    fn missing_cookie_issues_new_session() {
        let resolved = resolver().resolve(&CookieJar::new());
        let cookie = resolved.issued.unwrap();
        assert_eq!(cookie.name(), "connections");
        assert_eq!(cookie.value(), resolved.id.as_str());
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.max_age(),
            Some(cookie::time::Duration::seconds(2_592_000))
        );
    }

    #[test]
    fn existing_cookie_is_reused() {
        let jar = CookieJar::new().add(Cookie::new("connections", "sess_existing"));
        let resolved = resolver().resolve(&jar);
        assert_eq!(resolved.id.as_str(), "sess_existing");
        assert!(resolved.issued.is_none());
    }

    #[test]
    fn malformed_cookie_is_replaced() {
        let jar = CookieJar::new().add(Cookie::new("connections", "bad value;"));
        let resolved = resolver().resolve(&jar);
        assert_ne!(resolved.id.as_str(), "bad value;");
        assert!(resolved.issued.is_some());
    }

    #[test]
    fn resolution_is_stable_once_cookie_is_stored() {
        let r = resolver();
        let (jar, first) = r.resolve(&CookieJar::new()).apply(CookieJar::new());
        let (_, second) = r.resolve(&jar).apply(jar.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn secure_flag_follows_settings() {
        let settings = SessionSettings {
            secure_cookie: true,
            ..SessionSettings::default()
        };
        let resolved =
            CookieSessionResolver::from_settings(&settings).resolve(&CookieJar::new());
        assert_eq!(resolved.issued.unwrap().secure(), Some(true));
    }
}
