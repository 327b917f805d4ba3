use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{
    auth::{
        password::{PasswordHasher, SALT_LEN},
        repo::CredentialStore,
        repo_types::NewUser,
        token::TokenIssuer,
    },
    error::ServiceError,
};

/// Sign-up data after upstream validation. The password is plaintext here
/// and nowhere after `sign_up`.
pub struct NewAccount {
    pub login: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
}

/// Sign-up and sign-in. Keeps no session state between calls.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn CredentialStore>,
    tokens: Arc<dyn TokenIssuer>,
    hasher: PasswordHasher,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        tokens: Arc<dyn TokenIssuer>,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
        }
    }

    #[instrument(skip(self, account), fields(login = %account.login))]
    pub async fn sign_up(&self, account: NewAccount) -> Result<(), ServiceError> {
        let salt = PasswordHasher::generate_salt();
        let password_hash = self.hasher.derive(&account.password, &salt)?;

        let user = NewUser {
            login: account.login,
            full_name: account.full_name,
            email: account.email,
            password_hash,
            password_salt: salt,
        };
        let id = self.store.create_user(&user).await.map_err(|e| {
            warn!(error = %e, "create user failed");
            ServiceError::from(e)
        })?;

        info!(user_id = id, "user registered");
        Ok(())
    }

    /// Verifies the credentials and asks the token service for a token.
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, login: &str, password: &str) -> Result<String, ServiceError> {
        let salt = match self.store.find_by_login(login).await? {
            Some(user) => user.password_salt,
            // Unknown login: still pay for one derivation.
            None => vec![0u8; SALT_LEN],
        };
        let password_hash = self.hasher.derive(password, &salt)?;

        if !self.store.user_registered(login, &password_hash).await? {
            warn!("sign in with wrong credentials");
            return Err(ServiceError::InvalidCredentials);
        }

        let token = self
            .tokens
            .issue_token(login)
            .await
            .map_err(ServiceError::RemoteUnavailable)?;
        info!("user signed in");
        Ok(token)
    }
}
