//! Tenant-derived session cookies.
//!
//! The default tenant uses a bare `token` cookie; every other tenant gets
//! `qlt_<prefix>` so that sessions for different tenants served off one
//! base domain never collide.

use axum_extra::extract::cookie::{Cookie, SameSite};

use crate::config::{CookieConfig, DEFAULT_TENANT};

/// Cookie name for the default tenant.
pub const DEFAULT_COOKIE_NAME: &str = "token";

/// Characters of the tenant id used in the cookie name.
const TENANT_PREFIX_LEN: usize = 8;

/// The session cookie name for a tenant.
pub fn cookie_name(tenant: &str) -> String {
    if tenant == DEFAULT_TENANT {
        return DEFAULT_COOKIE_NAME.to_string();
    }
    let prefix: String = tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(TENANT_PREFIX_LEN)
        .collect();
    format!("qlt_{prefix}")
}

/// Build the session cookie: HttpOnly, root path, Max-Age of the session
/// lifetime. With a base cookie domain configured the cookie is issued
/// cross-site (Domain, SameSite=None, Secure).
pub fn session_cookie(
    tenant: &str,
    value: String,
    config: &CookieConfig,
    max_age_seconds: u64,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(cookie_name(tenant), value);
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_max_age(time::Duration::seconds(max_age_seconds as i64));

    match config.base_domain {
        Some(ref domain) => {
            cookie.set_domain(domain.clone());
            cookie.set_same_site(SameSite::None);
            cookie.set_secure(true);
        }
        None => {
            cookie.set_same_site(SameSite::Lax);
        }
    }

    cookie
}

/// A cookie that clears the tenant's session cookie on the client.
pub fn removal_cookie(tenant: &str, config: &CookieConfig) -> Cookie<'static> {
    let mut cookie = session_cookie(tenant, String::new(), config, 0);
    cookie.set_max_age(time::Duration::ZERO);
    cookie
}
