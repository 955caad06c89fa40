//! Authenticated site session management.
//!
//! The pricing site invalidates sessions aggressively and its login markup
//! varies between rendering modes, so authentication is a cascade: restore a
//! persisted cookie jar while it is fresh, verify liveness against the home
//! page, and only then fall back to a full login. Failure to authenticate is
//! not fatal — extraction degrades to empty rows, which remain valuable.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use reqwest::cookie::Jar;
use reqwest::header::SET_COOKIE;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{ScrapeConfig, ScrapeError};

mod selectors {
    use super::*;

    pub static LOGOUT_AFFORDANCE: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("a#logout, a[href*='logout'], form[action*='logout']").unwrap()
    });

    pub static ANY_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

    pub static LOGIN_FORM_BY_ID: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("form#login").unwrap());

    pub static LOGIN_FORM_BY_ACTION: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("form[action*='login']").unwrap());

    pub static ANY_FORM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("form").unwrap());

    pub static PASSWORD_INPUT: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("input[type='password']").unwrap());

    pub static TEXT_INPUT: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("input[type='text'], input[type='email'], input:not([type])").unwrap());
}

/// Localized logout-link texts checked when no structural marker matches.
const LOGOUT_TEXTS: &[&str] = &["выйти", "выход", "log out", "logout", "sign out"];

/// Credential input names tried in order.
const LOGIN_FIELD_NAMES: &[&str] = &["email", "login", "username"];

/// One cookie captured from the site, as persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    path: String,
}

/// On-disk cookie jar with its freshness timestamp.
#[derive(Debug, Serialize, Deserialize)]
struct CookieFile {
    saved_at: DateTime<Utc>,
    cookies: Vec<StoredCookie>,
}

/// An opened site session. The client carries the cookie jar either way;
/// `authenticated` tells the caller whether login-gated data can be expected.
pub struct Session {
    pub client: Client,
    pub authenticated: bool,
}

pub struct SessionManager {
    config: Arc<ScrapeConfig>,
}

impl SessionManager {
    pub fn new(config: Arc<ScrapeConfig>) -> Self {
        Self { config }
    }

    /// Open a session against the site: restore cookies, verify, log in if
    /// needed, and persist the refreshed jar on success.
    pub async fn ensure_logged_in(&self) -> Result<Session, ScrapeError> {
        let jar = Arc::new(Jar::default());
        let restored = self.restore_cookies(&jar).await;

        let client = ClientBuilder::new()
            .timeout(self.config.nav_timeout)
            .user_agent(&self.config.user_agent)
            .cookie_provider(jar.clone())
            .build()?;

        if restored {
            if let Some(html) = fetch_page(&client, self.config.base_url.clone()).await {
                if find_authenticated_marker(&html) {
                    debug!("restored session is still live");
                    return Ok(Session {
                        client,
                        authenticated: true,
                    });
                }
            }
            debug!("restored session is stale, logging in again");
        }

        let authenticated = self.login(&client, &jar).await;
        Ok(Session {
            client,
            authenticated,
        })
    }

    async fn login(&self, client: &Client, jar: &Arc<Jar>) -> bool {
        let login_url = match self.config.base_url.join(&self.config.login_path) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "invalid login path");
                return false;
            }
        };

        let Some(login_html) = fetch_page(client, login_url.clone()).await else {
            warn!("login page is unreachable");
            return false;
        };

        // `Html` is not `Send`; scope it so the future stays spawnable.
        let form = {
            let document = Html::parse_document(&login_html);
            let Some(form) = find_login_form(&document, &login_url) else {
                warn!("no login form found on login page");
                return false;
            };
            form
        };

        // A redirect-free client makes Set-Cookie headers of the login
        // response observable; it shares the jar with the main client.
        let mut captured = Vec::new();
        let post_client = match ClientBuilder::new()
            .timeout(self.config.nav_timeout)
            .user_agent(&self.config.user_agent)
            .cookie_provider(jar.clone())
            .redirect(Policy::none())
            .build()
        {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "failed to build login client");
                return false;
            }
        };

        let params = [
            (form.login_field.as_str(), self.config.username.as_str()),
            (form.password_field.as_str(), self.config.password.as_str()),
        ];
        match post_client.post(form.action.clone()).form(&params).send().await {
            Ok(response) => {
                let domain = form.action.host_str().unwrap_or_default().to_string();
                for header in response.headers().get_all(SET_COOKIE) {
                    if let Ok(raw) = header.to_str() {
                        if let Some(cookie) = parse_set_cookie(raw, &domain) {
                            captured.push(cookie);
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "login submission failed");
                return false;
            }
        }

        let Some(home) = fetch_page(client, self.config.base_url.clone()).await else {
            return false;
        };
        let authenticated = find_authenticated_marker(&home);
        if authenticated {
            self.persist_cookies(captured).await;
        } else {
            warn!("login did not produce an authenticated session");
        }
        authenticated
    }

    /// Inject persisted cookies into the jar when the file is younger than
    /// the configured TTL. Returns whether anything usable was restored.
    async fn restore_cookies(&self, jar: &Jar) -> bool {
        let path = self.cookie_path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => return false,
        };

        let file: CookieFile = match serde_json::from_slice(&raw) {
            Ok(file) => file,
            Err(err) => {
                warn!(error = %err, "discarding unreadable cookie file");
                return false;
            }
        };

        let age = Utc::now().signed_duration_since(file.saved_at);
        let ttl = chrono::Duration::from_std(self.config.session_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(12));
        if age > ttl || file.cookies.is_empty() {
            debug!("persisted session is past its TTL");
            return false;
        }

        for cookie in &file.cookies {
            let header = format!(
                "{}={}; Domain={}; Path={}",
                cookie.name, cookie.value, cookie.domain, cookie.path
            );
            jar.add_cookie_str(&header, &self.config.base_url);
        }
        true
    }

    async fn persist_cookies(&self, cookies: Vec<StoredCookie>) {
        if cookies.is_empty() {
            return;
        }
        let path = self.cookie_path();
        if let Some(parent) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %err, "failed to create session directory");
                return;
            }
        }

        let file = CookieFile {
            saved_at: Utc::now(),
            cookies,
        };
        match serde_json::to_vec_pretty(&file) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&path, bytes).await {
                    warn!(error = %err, "failed to persist session cookies");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize session cookies"),
        }
    }

    fn cookie_path(&self) -> PathBuf {
        self.config.session_file.clone()
    }
}

async fn fetch_page(client: &Client, url: Url) -> Option<String> {
    let response = match client.get(url.clone()).send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(url = %url, error = %err, "page fetch failed");
            return None;
        }
    };
    if !response.status().is_success() {
        debug!(url = %url, status = %response.status(), "page fetch not successful");
        return None;
    }
    response.text().await.ok()
}

/// Authenticated-state marker cascade: structural logout affordances first,
/// then localized link text, since the markup is not guaranteed stable.
pub fn find_authenticated_marker(html: &str) -> bool {
    let document = Html::parse_document(html);

    if document.select(&selectors::LOGOUT_AFFORDANCE).next().is_some() {
        return true;
    }

    document.select(&selectors::ANY_LINK).any(|link| {
        let text = link.text().collect::<String>().trim().to_lowercase();
        LOGOUT_TEXTS.iter().any(|t| text == *t)
    })
}

/// A located login form, resolved to absolute action and field names.
#[derive(Debug, PartialEq)]
pub struct LoginForm {
    pub action: Url,
    pub login_field: String,
    pub password_field: String,
}

/// Login-form discovery cascade: by id, by action, then any form carrying a
/// password input.
pub fn find_login_form(document: &Html, page_url: &Url) -> Option<LoginForm> {
    let candidates = document
        .select(&selectors::LOGIN_FORM_BY_ID)
        .chain(document.select(&selectors::LOGIN_FORM_BY_ACTION))
        .chain(document.select(&selectors::ANY_FORM));

    for form in candidates {
        let Some(password) = form.select(&selectors::PASSWORD_INPUT).next() else {
            continue;
        };
        let password_field = password
            .value()
            .attr("name")
            .unwrap_or("password")
            .to_string();

        let login_field = form
            .select(&selectors::TEXT_INPUT)
            .filter_map(|input| input.value().attr("name"))
            .find(|name| LOGIN_FIELD_NAMES.contains(&name.to_lowercase().as_str()))
            .or_else(|| {
                form.select(&selectors::TEXT_INPUT)
                    .find_map(|input| input.value().attr("name"))
            })
            .unwrap_or("login")
            .to_string();

        let action = match form.value().attr("action") {
            Some(action) if !action.is_empty() => page_url.join(action).ok()?,
            _ => page_url.clone(),
        };

        return Some(LoginForm {
            action,
            login_field,
            password_field,
        });
    }

    None
}

/// Minimal Set-Cookie parser: name=value plus Domain/Path attributes.
fn parse_set_cookie(raw: &str, default_domain: &str) -> Option<StoredCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut domain = default_domain.to_string();
    let mut path = "/".to_string();
    for attr in parts {
        if let Some((key, val)) = attr.split_once('=') {
            match key.trim().to_lowercase().as_str() {
                "domain" => domain = val.trim().trim_start_matches('.').to_string(),
                "path" => path = val.trim().to_string(),
                _ => {}
            }
        }
    }

    Some(StoredCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn detects_structural_logout_marker() {
        assert!(find_authenticated_marker(
            r#"<nav><a href="/account/logout">…</a></nav>"#
        ));
        assert!(!find_authenticated_marker(
            r#"<nav><a href="/login">Войти</a></nav>"#
        ));
    }

    #[test]
    fn detects_localized_logout_text() {
        assert!(find_authenticated_marker(
            r#"<a href="/exit" class="nav-btn">Выйти</a>"#
        ));
        assert!(find_authenticated_marker(r#"<a href="/x">Log out</a>"#));
    }

    #[test]
    fn finds_form_by_id_first() {
        let base = Url::parse("https://site.test/login").unwrap();
        let html = r#"
            <form action="/subscribe"><input name="email"></form>
            <form id="login" action="/session">
              <input type="text" name="username">
              <input type="password" name="pwd">
            </form>
        "#;
        let form = find_login_form(&doc(html), &base).unwrap();
        assert_eq!(form.action.path(), "/session");
        assert_eq!(form.login_field, "username");
        assert_eq!(form.password_field, "pwd");
    }

    #[test]
    fn falls_back_to_any_form_with_password() {
        let base = Url::parse("https://site.test/login").unwrap();
        let html = r#"
            <form>
              <input name="user_email">
              <input type="password" name="user_password">
            </form>
        "#;
        let form = find_login_form(&doc(html), &base).unwrap();
        assert_eq!(form.action.path(), "/login");
        assert_eq!(form.login_field, "user_email");
        assert_eq!(form.password_field, "user_password");
    }

    #[test]
    fn rejects_pages_without_credential_forms() {
        let base = Url::parse("https://site.test/").unwrap();
        let html = r#"<form action="/search"><input name="q"></form>"#;
        assert!(find_login_form(&doc(html), &base).is_none());
    }

    #[test]
    fn parses_set_cookie_attributes() {
        let cookie =
            parse_set_cookie("sid=abc123; Domain=.site.test; Path=/; HttpOnly", "site.test")
                .unwrap();
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.domain, "site.test");
        assert_eq!(cookie.path, "/");

        assert!(parse_set_cookie("=oops", "site.test").is_none());
    }
}
