//! In-process ed25519 wallet account.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::RwLock;
use rand_core::OsRng;
use tracing::debug;
use wlk_proto::Transaction;

use crate::errors::ActionError;
use crate::responder::WalletAccount;
use crate::types::PublicKey;

/// A single-key wallet. Starts logged out; trusts no domain unless told to.
pub struct LocalWallet {
    signing: SigningKey,
    authenticated: AtomicBool,
    trust_all: bool,
    trusted: RwLock<HashSet<String>>,
}

impl LocalWallet {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    fn from_signing_key(signing: SigningKey) -> Self {
        Self {
            signing,
            authenticated: AtomicBool::new(false),
            trust_all: false,
            trusted: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_trust_all(mut self) -> Self {
        self.trust_all = true;
        self
    }

    /// Account key, whether or not the user is logged in.
    pub fn key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key().to_bytes())
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    pub fn trust_domain(&self, domain: impl Into<String>) {
        self.trusted.write().insert(domain.into());
    }

    fn require_login(&self) -> Result<(), ActionError> {
        if self.authenticated.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ActionError::Unauthenticated)
        }
    }
}

#[async_trait]
impl WalletAccount for LocalWallet {
    fn public_key(&self) -> Option<PublicKey> {
        self.authenticated.load(Ordering::SeqCst).then(|| self.key())
    }

    async fn confirm_trust(&self, _app: &str, domain: &str) -> Result<bool, ActionError> {
        self.require_login()?;
        Ok(self.trust_all || self.trusted.read().contains(domain))
    }

    async fn sign_message(&self, message: &[u8]) -> Result<[u8; 64], ActionError> {
        self.require_login()?;
        Ok(self.signing.sign(message).to_bytes())
    }

    async fn sign_transaction(&self, mut transaction: Transaction) -> Result<Transaction, ActionError> {
        self.require_login()?;
        let key = self.key();
        let index = transaction
            .signer_index(key.as_bytes())
            .ok_or_else(|| ActionError::Failed("account is not a signer of this transaction".into()))?;
        let signature = self.signing.sign(transaction.message()).to_bytes();
        transaction
            .set_signature(index, signature)
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        debug!(signer = %key, slot = index, "transaction signed");
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};
    use wlk_proto::transaction::{compile_message, MessageHeader};

    use super::*;

    #[tokio::test]
    async fn logged_out_wallet_refuses() {
        let wallet = LocalWallet::generate();
        assert_eq!(wallet.public_key(), None);
        assert_eq!(wallet.sign_message(b"x").await, Err(ActionError::Unauthenticated));
    }

    #[tokio::test]
    async fn message_signature_verifies() {
        let wallet = LocalWallet::from_seed([9u8; 32]);
        wallet.set_authenticated(true);
        let sig = wallet.sign_message(b"hello").await.unwrap();
        let vk = VerifyingKey::from_bytes(wallet.key().as_bytes()).unwrap();
        assert!(vk.verify(b"hello", &Signature::from_bytes(&sig)).is_ok());
    }

    #[tokio::test]
    async fn signs_only_own_slot() {
        let wallet = LocalWallet::from_seed([5u8; 32]);
        wallet.set_authenticated(true);
        let header = MessageHeader {
            num_required_signatures: 2,
            num_readonly_signed: 0,
            num_readonly_unsigned: 0,
        };
        let message = compile_message(false, header, &[[1u8; 32], *wallet.key().as_bytes()], [0u8; 32]);
        let tx = Transaction::new_unsigned(message, false).unwrap();

        let signed = wallet.sign_transaction(tx).await.unwrap();
        assert_eq!(signed.signatures()[0], [0u8; 64]);
        assert_ne!(signed.signatures()[1], [0u8; 64]);

        let other = compile_message(false, header, &[[1u8; 32], [2u8; 32]], [0u8; 32]);
        let err = wallet
            .sign_transaction(Transaction::new_unsigned(other, false).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Failed(_)));
    }

    #[tokio::test]
    async fn trust_list() {
        let wallet = LocalWallet::generate();
        wallet.set_authenticated(true);
        wallet.trust_domain("https://a.example");
        assert!(wallet.confirm_trust("A", "https://a.example").await.unwrap());
        assert!(!wallet.confirm_trust("B", "https://b.example").await.unwrap());
    }
}
