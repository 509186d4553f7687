use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    Form,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::app::AppState;
use crate::db::{Database, NewUser, UserRecord};

/// Credential data received from the login form
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    /// Username for login
    pub username: String,

    /// Password in plaintext (only transmitted, never stored)
    pub password: String,
}

/// Signup form data
///
/// Field names match the original `user_creds` columns.
#[derive(Debug, Serialize, Deserialize)]
pub struct SignupForm {
    /// First name (must be purely alphabetic)
    pub first_name: String,

    /// Last name (must be purely alphabetic)
    pub last_name: String,

    /// Desired username (unique)
    pub username: String,

    /// Password (at least 6 characters)
    pub password: String,
}

/// The authenticated identity attached to gated requests
///
/// Inserted into request extensions by [`require_auth`] so page and API
/// handlers can read who is calling without touching the session table.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Username of the authenticated user
    pub username: String,

    /// Random identifier assigned at signup
    pub user_uid: String,
}

/// Per-browser-session state
///
/// A session exists before login too: the auth gate uses it to remember
/// the path an unauthenticated visitor asked for, so the login flow can
/// return them there afterwards.
#[derive(Debug, Clone)]
pub struct Session {
    /// Username, once authenticated
    pub username: Option<String>,

    /// User identifier, once authenticated
    pub user_uid: Option<String>,

    /// Whether this browser session has logged in
    pub authenticated: bool,

    /// Protected path requested before the redirect to the login page
    pub referrer_path: Option<String>,

    /// Time when the session expires
    pub expires_at: SystemTime,
}

/// Global sessions storage
///
/// Stores all active browser sessions in a thread-safe map.
lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z]+$").unwrap();
}

// Constants
const SESSION_COOKIE: &str = "session";
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds
const MIN_PASSWORD_LEN: usize = 6;

fn fresh_session() -> Session {
    Session {
        username: None,
        user_uid: None,
        authenticated: false,
        referrer_path: None,
        expires_at: SystemTime::now() + Duration::from_secs(SESSION_DURATION),
    }
}

fn live(session: &Session) -> bool {
    session.expires_at > SystemTime::now()
}

/// Create a new anonymous session
///
/// # Returns
/// * `String` - A unique session ID
pub fn create_session() -> String {
    let session_id = Uuid::new_v4().to_string();
    let mut sessions = SESSIONS.write().unwrap();
    sessions.insert(session_id.clone(), fresh_session());
    session_id
}

/// Validate a session
///
/// Only an authenticated, unexpired session yields a user; anything else
/// (unknown id, anonymous session, expired entry) behaves like no cookie.
///
/// # Arguments
/// * `session_id` - The session ID to validate
///
/// # Returns
/// * `Option<CurrentUser>` - The identity for the session if valid
pub fn validate_session(session_id: &str) -> Option<CurrentUser> {
    let sessions = SESSIONS.read().unwrap();
    let session = sessions.get(session_id)?;

    if !session.authenticated || !live(session) {
        return None;
    }

    Some(CurrentUser {
        username: session.username.clone()?,
        user_uid: session.user_uid.clone()?,
    })
}

/// Remember the path an unauthenticated visitor asked for
///
/// Reuses the visitor's existing session when the cookie still maps to a
/// live entry, otherwise creates one.
///
/// # Arguments
/// * `session_id` - Session id from the cookie, if any
/// * `path` - The protected path that was requested
///
/// # Returns
/// * `String` - The session ID now carrying the referrer path
pub fn remember_referrer(session_id: Option<&str>, path: &str) -> String {
    let mut sessions = SESSIONS.write().unwrap();

    if let Some(id) = session_id {
        if let Some(session) = sessions.get_mut(id) {
            if live(session) {
                session.referrer_path = Some(path.to_string());
                return id.to_string();
            }
        }
    }

    let mut session = fresh_session();
    session.referrer_path = Some(path.to_string());
    let session_id = Uuid::new_v4().to_string();
    sessions.insert(session_id.clone(), session);
    session_id
}

/// Mark a browser session as authenticated
///
/// The visitor's existing session is upgraded in place (keeping and
/// consuming its remembered referrer path); a missing or dead session is
/// replaced with a fresh authenticated one.
///
/// # Arguments
/// * `session_id` - Session id from the cookie, if any
/// * `username` - Authenticated username
/// * `user_uid` - Authenticated user identifier
///
/// # Returns
/// * `(String, Option<String>)` - The session ID and the referrer path
///   remembered before login, taken exactly once
pub fn authenticate_session(
    session_id: Option<&str>,
    username: &str,
    user_uid: &str,
) -> (String, Option<String>) {
    let mut sessions = SESSIONS.write().unwrap();

    if let Some(id) = session_id {
        if let Some(session) = sessions.get_mut(id) {
            if live(session) {
                session.username = Some(username.to_string());
                session.user_uid = Some(user_uid.to_string());
                session.authenticated = true;
                session.expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);
                let referrer = session.referrer_path.take();
                return (id.to_string(), referrer);
            }
        }
    }

    let mut session = fresh_session();
    session.username = Some(username.to_string());
    session.user_uid = Some(user_uid.to_string());
    session.authenticated = true;
    let session_id = Uuid::new_v4().to_string();
    sessions.insert(session_id.clone(), session);
    (session_id, None)
}

/// Drop a session (logout)
pub fn destroy_session(session_id: &str) {
    let mut sessions = SESSIONS.write().unwrap();
    sessions.remove(session_id);
}

/// Register a new user
///
/// Validates the signup form the way the original app did (alphabetic
/// names, minimum password length), hashes the password and inserts the
/// row with a freshly generated user id.
///
/// # Arguments
/// * `db` - Credential store
/// * `form` - Signup form data
///
/// # Returns
/// * `Result<(), String>` - Success or a user-facing error message
///
/// # Errors
/// * Returns an error if any field fails validation, the username is
///   already taken, or the insert fails
pub fn register_user(db: &Database, form: &SignupForm) -> Result<(), String> {
    if form.first_name.is_empty()
        || form.last_name.is_empty()
        || form.username.is_empty()
        || form.password.is_empty()
    {
        return Err("All fields are required".to_string());
    }

    if !NAME_RE.is_match(&form.first_name) || !NAME_RE.is_match(&form.last_name) {
        return Err("Not a valid name".to_string());
    }

    if form.password.len() < MIN_PASSWORD_LEN {
        return Err("Password must be at least 6 characters".to_string());
    }

    // Check if username already exists
    match db.find_by_username(&form.username) {
        Ok(Some(_)) => return Err("Username already exists".to_string()),
        Ok(None) => {}
        Err(_) => return Err("Failed to access user database".to_string()),
    }

    let password_hash = hash_password(&form.password)?;
    let user = NewUser {
        first_name: form.first_name.clone(),
        last_name: form.last_name.clone(),
        username: form.username.clone(),
        password_hash,
        user_uid: Uuid::new_v4().to_string(),
    };

    db.insert_user(&user)
        .map_err(|_| "Failed to create user".to_string())
}

/// Verify user credentials
///
/// Looks the row up by username alone (bound as a parameter) and checks
/// the password against the stored Argon2 hash.
///
/// # Arguments
/// * `db` - Credential store
/// * `username` - Username to verify
/// * `password` - Password to verify
///
/// # Returns
/// * `Result<Option<UserRecord>, String>` - The user's row if the
///   credentials are valid, `None` if they are not
pub fn verify_user(
    db: &Database,
    username: &str,
    password: &str,
) -> Result<Option<UserRecord>, String> {
    let record = db
        .find_by_username(username)
        .map_err(|_| "Failed to access user database".to_string())?;

    match record {
        Some(record) => {
            if verify_password(password, &record.password_hash)? {
                Ok(Some(record))
            } else {
                Ok(None)
            }
        }
        None => Ok(None),
    }
}

/// Hash a password using Argon2
///
/// # Arguments
/// * `password` - The plaintext password to hash
///
/// # Errors
/// * Returns an error if the password hashing fails
fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    match argon2.hash_password(password.as_bytes(), &salt) {
        Ok(hash) => Ok(hash.to_string()),
        Err(_) => Err("Password hashing failed".to_string()),
    }
}

/// Verify a password against a stored hash
///
/// # Arguments
/// * `password` - The plaintext password to verify
/// * `hash` - The stored password hash to check against
///
/// # Errors
/// * Returns an error if the hash is in an invalid format
fn verify_password(password: &str, hash: &str) -> Result<bool, String> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(hash) => hash,
        Err(_) => return Err("Invalid password hash format".to_string()),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(_) => Ok(true),
        Err(_) => Ok(false), // Password didn't match
    }
}

fn session_cookie(session_id: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, session_id);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie
}

fn cookie_session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

// Web handler functions below

/// Serve the login page HTML
///
/// An already-authenticated visitor is sent back to the home page.
pub async fn serve_login_page(jar: CookieJar) -> Response {
    if let Some(id) = cookie_session_id(&jar) {
        if validate_session(&id).is_some() {
            return Redirect::to("/").into_response();
        }
    }
    Html(include_str!("./static/login.html")).into_response()
}

/// Serve the signup page HTML
pub async fn serve_signup_page() -> Html<&'static str> {
    Html(include_str!("./static/signup.html"))
}

/// Handle user login requests
///
/// Processes login form submissions, validates credentials against the
/// database, and on success sends the user back to the page they
/// originally asked for (or the home page).
///
/// # Arguments
/// * `state` - Shared application state (credential store)
/// * `jar` - Cookie jar carrying the session cookie
/// * `credentials` - Form data containing the username and password
#[axum::debug_handler]
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(credentials): Form<UserCredentials>,
) -> Response {
    match verify_user(&state.db, &credentials.username, &credentials.password) {
        Ok(Some(record)) => {
            let existing = cookie_session_id(&jar);
            let (session_id, referrer) =
                authenticate_session(existing.as_deref(), &record.username, &record.user_uid);
            log::info!("user '{}' logged in", record.username);

            // Go back to where the user wanted to go
            let target = referrer.unwrap_or_else(|| "/".to_string());
            (jar.add(session_cookie(session_id)), Redirect::to(&target)).into_response()
        }
        Ok(None) => Redirect::to("/login?error=Wrong+username+or+password").into_response(),
        Err(e) => {
            log::error!("login failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error").into_response()
        }
    }
}

/// Handle user registration
///
/// Processes signup form submissions and creates a new user account.
///
/// # Arguments
/// * `state` - Shared application state (credential store)
/// * `form` - Form data containing the signup fields
///
/// # Returns
/// * `Redirect` - To the login page on success, back to the signup page
///   with the error in the query string otherwise
pub async fn handle_signup(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SignupForm>,
) -> Redirect {
    match register_user(&state.db, &form) {
        Ok(()) => {
            log::info!("new user '{}' registered", form.username);
            Redirect::to("/login?registered=true")
        }
        Err(e) => Redirect::to(&format!("/signup?error={}", urlencoding::encode(&e))),
    }
}

/// Handle user logout
///
/// Drops the server-side session, clears the cookie and redirects to the
/// login page.
pub async fn handle_logout(jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(id) = cookie_session_id(&jar) {
        destroy_session(&id);
    }
    (jar.add(session_cookie(String::new())), Redirect::to("/login"))
}

/// Authentication middleware
///
/// Runs before every protected page handler: a valid authenticated
/// session passes through with its [`CurrentUser`] attached; anyone else
/// has the requested path remembered in their session and is redirected
/// to the login page.
///
/// # Arguments
/// * `jar` - Cookie jar containing session information
/// * `request` - The incoming request
/// * `next` - Next middleware in the chain
pub async fn require_auth(
    jar: CookieJar,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    // First, if a valid session exists, allow the request.
    if let Some(id) = cookie_session_id(&jar) {
        if let Some(user) = validate_session(&id) {
            request.extensions_mut().insert(user);
            return next.run(request).await;
        }
    }

    // Remember where the user wanted to go, then bounce to the login page.
    let path = request.uri().path().to_string();
    let existing = cookie_session_id(&jar);
    let session_id = remember_referrer(existing.as_deref(), &path);

    (jar.add(session_cookie(session_id)), Redirect::to("/login")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(username: &str, password: &str) -> SignupForm {
        SignupForm {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("hunter22", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_verify_password_bad_hash() {
        assert!(verify_password("anything", "not-a-hash").is_err());
    }

    #[test]
    fn test_register_validations() {
        let db = Database::open_in_memory().unwrap();

        let mut form = signup("ada", "secret1");
        form.first_name = String::new();
        assert_eq!(
            register_user(&db, &form).unwrap_err(),
            "All fields are required"
        );

        let mut form = signup("ada", "secret1");
        form.last_name = "L0velace".to_string();
        assert_eq!(register_user(&db, &form).unwrap_err(), "Not a valid name");

        let form = signup("ada", "short");
        assert_eq!(
            register_user(&db, &form).unwrap_err(),
            "Password must be at least 6 characters"
        );
    }

    #[test]
    fn test_register_and_verify_user() {
        let db = Database::open_in_memory().unwrap();
        register_user(&db, &signup("ada", "secret1")).unwrap();

        let record = verify_user(&db, "ada", "secret1").unwrap().unwrap();
        assert_eq!(record.username, "ada");
        assert!(!record.user_uid.is_empty());
        // Plaintext never reaches the database
        assert_ne!(record.password_hash, "secret1");

        assert!(verify_user(&db, "ada", "wrongpass").unwrap().is_none());
        assert!(verify_user(&db, "ghost", "secret1").unwrap().is_none());
    }

    #[test]
    fn test_register_duplicate_username() {
        let db = Database::open_in_memory().unwrap();
        register_user(&db, &signup("ada", "secret1")).unwrap();
        assert_eq!(
            register_user(&db, &signup("ada", "other-secret")).unwrap_err(),
            "Username already exists"
        );
    }

    #[test]
    fn test_anonymous_session_is_not_authenticated() {
        let id = create_session();
        assert!(validate_session(&id).is_none());
    }

    #[test]
    fn test_referrer_round_trip() {
        // Gate remembers the path, login consumes it exactly once
        let id = remember_referrer(None, "/account");
        let (id, referrer) = authenticate_session(Some(&id), "ada", "uid-1");
        assert_eq!(referrer.as_deref(), Some("/account"));

        let user = validate_session(&id).unwrap();
        assert_eq!(user.username, "ada");
        assert_eq!(user.user_uid, "uid-1");

        // A second authentication finds no stale referrer
        let (_, referrer) = authenticate_session(Some(&id), "ada", "uid-1");
        assert!(referrer.is_none());
    }

    #[test]
    fn test_referrer_reuses_live_session() {
        let id = create_session();
        let same = remember_referrer(Some(&id), "/");
        assert_eq!(id, same);
    }

    #[test]
    fn test_destroy_session() {
        let (id, _) = authenticate_session(None, "ada", "uid-2");
        assert!(validate_session(&id).is_some());
        destroy_session(&id);
        assert!(validate_session(&id).is_none());
    }

    #[test]
    fn test_expired_session_rejected() {
        let session_id = Uuid::new_v4().to_string();
        {
            let mut sessions = SESSIONS.write().unwrap();
            sessions.insert(
                session_id.clone(),
                Session {
                    username: Some("ada".to_string()),
                    user_uid: Some("uid-3".to_string()),
                    authenticated: true,
                    referrer_path: None,
                    expires_at: SystemTime::now() - Duration::from_secs(1),
                },
            );
        }
        assert!(validate_session(&session_id).is_none());

        // An expired session is replaced, not reused, by the gate
        let new_id = remember_referrer(Some(&session_id), "/account");
        assert_ne!(new_id, session_id);
    }
}
