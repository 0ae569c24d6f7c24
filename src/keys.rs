//! Local key management
//!
//! One RSA key pair per local actor, generated lazily on first signing
//! need and persisted through the host identity provider. Regeneration
//! only happens on an explicit force flag.

use std::sync::Arc;

use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::sync::Mutex;

use crate::error::{FederationError, Result};
use crate::host::{IdentityProvider, KeyPair};
use crate::resolver::{ActorDocument, ActorResolver};

/// RSA modulus size for generated local keys.
const KEY_BITS: usize = 2048;

/// Material needed to sign one outbound request
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    /// Key id advertised in the Signature header (`actor_uri#main-key`)
    pub key_id: String,
    /// PEM-encoded private key
    pub private_key_pem: String,
}

/// Key pairs for local actors
pub struct KeyStore {
    identity: Arc<dyn IdentityProvider>,
    // Serializes first-use generation so concurrent callers cannot both
    // generate and persist different pairs for the same actor.
    generate_lock: Mutex<()>,
}

impl KeyStore {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            identity,
            generate_lock: Mutex::new(()),
        }
    }

    /// Get the key pair for a local actor, generating one on first use.
    ///
    /// With `force` set, a fresh pair replaces the persisted one.
    pub async fn get_or_create(&self, actor_id: &str, force: bool) -> Result<KeyPair> {
        if !force {
            if let Some(pair) = self.identity.load_keypair(actor_id).await? {
                return Ok(pair);
            }
        }

        let _guard = self.generate_lock.lock().await;

        // Another caller may have generated while we waited on the lock.
        if !force {
            if let Some(pair) = self.identity.load_keypair(actor_id).await? {
                return Ok(pair);
            }
        }

        tracing::info!(actor_id = %actor_id, force = force, "Generating RSA key pair");

        let pair = tokio::task::spawn_blocking(generate_keypair)
            .await
            .map_err(|e| FederationError::Internal(anyhow::anyhow!("keygen task failed: {e}")))??;

        self.identity.store_keypair(actor_id, &pair).await?;
        Ok(pair)
    }

    /// Signing material for a local actor's outbound requests.
    pub async fn signing_identity(&self, actor_id: &str) -> Result<SigningIdentity> {
        let actor = self.identity.local_actor(actor_id).await?;
        let pair = self.get_or_create(actor_id, false).await?;

        Ok(SigningIdentity {
            key_id: actor.key_id(),
            private_key_pem: pair.private_pem,
        })
    }
}

/// Generate a PEM-encoded 2048-bit RSA key pair.
fn generate_keypair() -> Result<KeyPair> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
        .map_err(|e| FederationError::KeyEncoding(format!("key generation failed: {e}")))?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| FederationError::KeyEncoding(format!("private key encoding failed: {e}")))?
        .to_string();
    let public_pem = public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| FederationError::KeyEncoding(format!("public key encoding failed: {e}")))?;

    Ok(KeyPair {
        public_pem,
        private_pem,
    })
}

/// Public key of a remote actor, via the resolver.
///
/// Fails with `NoPublicKey` when the actor document lacks
/// `publicKey.publicKeyPem`; resolution failures propagate unchanged.
pub async fn remote_public_key(resolver: &ActorResolver, actor_uri: &str) -> Result<String> {
    let document = resolver.resolve(actor_uri).await?;
    let actor = ActorDocument::parse(&document)?;

    actor
        .public_key_pem
        .ok_or_else(|| FederationError::NoPublicKey(actor_uri.to_string()))
}
