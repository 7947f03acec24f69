//! In-memory user directory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::identity::{AccessToken, IdentityError, NewUser, User, UserExtractor, MIN_PASSWORD_LEN};
use crate::observability::classify::{
    AuthenticationExtractor, AuthorizationExtractor, ResultExtractor, SecurityEventExtractor,
    TokenExtractor,
};
use crate::observability::descriptor::OperationDescriptor;
use crate::observability::envelope::Envelope;
use crate::observability::privacy::is_email_shaped;
use crate::observability::telemetry::Telemetry;

/// Default lifetime of access tokens.
pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct Store {
    users: HashMap<Uuid, User>,
    emails: HashMap<String, Uuid>,
}

impl Store {
    fn by_email(&self, email: &str) -> Option<&User> {
        self.emails.get(&email.to_ascii_lowercase()).and_then(|id| self.users.get(id))
    }

    fn get_mut(&mut self, id: &Uuid) -> Result<&mut User, IdentityError> {
        self.users.get_mut(id).ok_or(IdentityError::NotFound)
    }
}

struct Envelopes {
    login: Envelope,
    create: Envelope,
    activate: Envelope,
    deactivate: Envelope,
    change_password: Envelope,
    access_token: Envelope,
    lock_account: Envelope,
}

/// Users, each operation wrapped in its own envelope.
pub struct UserDirectory {
    store: RwLock<Store>,
    telemetry: Arc<Telemetry>,
    envelopes: Envelopes,
    token_ttl: Duration,
    unavailable: AtomicBool,
}

impl UserDirectory {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        let envelopes = Envelopes {
            login: telemetry.envelope(OperationDescriptor::authentication("login")),
            create: telemetry.envelope(OperationDescriptor::user_operation("create")),
            activate: telemetry.envelope(OperationDescriptor::user_operation("activate")),
            deactivate: telemetry.envelope(OperationDescriptor::user_operation("deactivate")),
            change_password: telemetry
                .envelope(OperationDescriptor::password_operation("change", true)),
            access_token: telemetry
                .envelope(OperationDescriptor::token_operation("generate", "access")),
            lock_account: telemetry
                .envelope(OperationDescriptor::security_event("account_locked", "high")),
        };
        Self {
            store: RwLock::new(Store::default()),
            telemetry,
            envelopes,
            token_ttl: ACCESS_TOKEN_TTL,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Simulate a storage outage: every operation fails with a storage error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), IdentityError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IdentityError::Storage("directory unavailable".into()));
        }
        Ok(())
    }

    /// `Ok(None)` when the credentials do not match.
    pub async fn authenticate_user(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, IdentityError> {
        let extractor = AuthenticationExtractor::for_email(email);
        self.envelopes
            .login
            .run(&extractor, async {
                self.check_available()?;
                let mut store = self.store.write().await;
                let Some(id) = store.by_email(email).map(|u| u.id) else {
                    return Ok(None);
                };
                let user = store.get_mut(&id)?;
                if user.locked {
                    return Err(IdentityError::AccountLocked);
                }
                if !user.active {
                    return Err(IdentityError::AccountInactive);
                }
                if !user.password_matches(password) {
                    return Ok(None);
                }
                user.last_login = Some(Utc::now());
                Ok(Some(user.clone()))
            })
            .await
    }

    pub async fn create_user(&self, request: NewUser) -> Result<User, IdentityError> {
        let extractor = UserExtractor::registering(&request.email);
        self.envelopes
            .create
            .run(&extractor, async {
                self.check_available()?;
                if !is_email_shaped(&request.email) {
                    return Err(IdentityError::InvalidEmail);
                }
                if request.password.len() < MIN_PASSWORD_LEN {
                    return Err(IdentityError::WeakPassword);
                }
                let key = request.email.to_ascii_lowercase();
                let mut store = self.store.write().await;
                if store.emails.contains_key(&key) {
                    return Err(IdentityError::AlreadyExists);
                }
                let user = User::new(
                    request.email.clone(),
                    request.display_name.clone(),
                    request.password.clone(),
                    request.roles.clone(),
                );
                store.emails.insert(key, user.id);
                store.users.insert(user.id, user.clone());
                Ok(user)
            })
            .await
    }

    pub async fn activate_user(&self, user_id: Uuid) -> Result<User, IdentityError> {
        self.set_active(&self.envelopes.activate, user_id, true).await
    }

    pub async fn deactivate_user(&self, user_id: Uuid) -> Result<User, IdentityError> {
        self.set_active(&self.envelopes.deactivate, user_id, false).await
    }

    async fn set_active(
        &self,
        envelope: &Envelope,
        user_id: Uuid,
        active: bool,
    ) -> Result<User, IdentityError> {
        envelope
            .run(&UserExtractor::targeting(user_id), async {
                self.check_available()?;
                let mut store = self.store.write().await;
                let user = store.get_mut(&user_id)?;
                user.active = active;
                Ok(user.clone())
            })
            .await
    }

    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new: &str,
    ) -> Result<(), IdentityError> {
        let extractor = ResultExtractor::new().attribute("user_id", user_id);
        self.envelopes
            .change_password
            .run(&extractor, async {
                self.check_available()?;
                let mut store = self.store.write().await;
                let user = store.get_mut(&user_id)?;
                if !user.password_matches(current) {
                    return Err(IdentityError::InvalidPassword);
                }
                if new.len() < MIN_PASSWORD_LEN {
                    return Err(IdentityError::WeakPassword);
                }
                user.set_password(new.to_string());
                Ok(())
            })
            .await
    }

    pub async fn create_access_token(&self, user_id: Uuid) -> Result<AccessToken, IdentityError> {
        let ttl = self.token_ttl;
        let extractor = TokenExtractor::new(user_id.to_string(), Some(ttl));
        self.envelopes
            .access_token
            .run(&extractor, async {
                self.check_available()?;
                let store = self.store.read().await;
                let user = store.users.get(&user_id).ok_or(IdentityError::NotFound)?;
                if user.locked {
                    return Err(IdentityError::AccountLocked);
                }
                if !user.active {
                    return Err(IdentityError::AccountInactive);
                }
                Ok(AccessToken {
                    user_id,
                    value: Uuid::new_v4().simple().to_string(),
                    expires_in: ttl,
                })
            })
            .await
    }

    /// Granted when the user holds any of `required_roles` (or `admin`), or
    /// when nothing is required.
    pub async fn check_permission(
        &self,
        user_id: Uuid,
        resource: &'static str,
        action: &'static str,
        required_roles: &[&str],
    ) -> Result<bool, IdentityError> {
        let held: Vec<String> = {
            let store = self.store.read().await;
            store.users.get(&user_id).map(|u| u.roles.clone()).unwrap_or_default()
        };
        let held_refs: Vec<&str> = held.iter().map(String::as_str).collect();
        let extractor =
            AuthorizationExtractor::new(user_id.to_string()).roles(required_roles, &held_refs);

        let envelope = self
            .telemetry
            .envelope(OperationDescriptor::authorization(resource, action));
        envelope
            .run(&extractor, async {
                self.check_available()?;
                let store = self.store.read().await;
                let user = store.users.get(&user_id).ok_or(IdentityError::NotFound)?;
                if !user.active || user.locked {
                    return Ok(false);
                }
                Ok(required_roles.is_empty()
                    || user.has_role("admin")
                    || required_roles.iter().any(|r| user.has_role(r)))
            })
            .await
    }

    /// `Ok(false)` if the account was already locked.
    pub async fn lock_account(&self, user_id: Uuid) -> Result<bool, IdentityError> {
        let extractor = SecurityEventExtractor::for_user(user_id.to_string());
        self.envelopes
            .lock_account
            .run(&extractor, async {
                self.check_available()?;
                let mut store = self.store.write().await;
                let user = store.get_mut(&user_id)?;
                if user.locked {
                    return Ok(false);
                }
                user.locked = true;
                Ok(true)
            })
            .await
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDirectory")
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}
