use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::pkcs8::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// How a client holds its key material, which decides the verification path.
///
/// Browser clients export their public key through the platform key-import
/// mechanism and present it as base64 SPKI DER; headless clients present the
/// raw 32-byte key hex-encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientKind {
    Browser,
    Headless,
}

/// An actor's Ed25519 keypair. The derived identity string, not the key
/// itself, is what the rest of the system uses as actor identifier.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore a keypair from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Load a keypair from a hex-encoded secret key file
    pub fn load(path: &Path) -> Result<Self, IdentityError> {
        let hex_str = std::fs::read_to_string(path)
            .map_err(|e| IdentityError::KeyFile(format!("{}: {e}", path.display())))?;
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| IdentityError::BadEncoding(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self::from_secret_bytes(&secret))
    }

    /// Persist the secret key hex-encoded
    pub fn save(&self, path: &Path) -> Result<(), IdentityError> {
        std::fs::write(path, hex::encode(self.signing_key.as_bytes()))
            .map_err(|e| IdentityError::KeyFile(format!("{}: {e}", path.display())))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The public key as it appears in a connection attempt for the given
    /// client kind.
    pub fn public_key_material(&self, kind: ClientKind) -> Result<String, IdentityError> {
        match kind {
            ClientKind::Headless => Ok(hex::encode(self.signing_key.verifying_key().to_bytes())),
            ClientKind::Browser => {
                let der = self
                    .signing_key
                    .verifying_key()
                    .to_public_key_der()
                    .map_err(|e| IdentityError::BadEncoding(e.to_string()))?;
                Ok(BASE64.encode(der.as_bytes()))
            }
        }
    }

    /// Sign arbitrary data, returning a base64 signature
    pub fn sign(&self, data: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(data);
        BASE64.encode(signature.to_bytes())
    }
}

/// Hash of the public key material as used in identity strings
pub fn identity_hash(public_key_material: &str) -> String {
    blake3::hash(public_key_material.as_bytes())
        .to_hex()
        .to_string()
}

/// Durable actor identifier: `hash(public_key) + ":" + nick`
pub fn identity_string(public_key_material: &str, nick: &str) -> String {
    format!("{}:{}", identity_hash(public_key_material), nick)
}

/// Split an identity string into its hash and (optional) nick parts
pub fn split_identity(identity: &str) -> (&str, Option<&str>) {
    match identity.split_once(':') {
        Some((hash, nick)) => (hash, Some(nick)),
        None => (identity, None),
    }
}

fn decode_verifying_key(
    public_key_material: &str,
    kind: ClientKind,
) -> Result<VerifyingKey, IdentityError> {
    match kind {
        ClientKind::Headless => {
            let bytes = hex::decode(public_key_material)
                .map_err(|e| IdentityError::BadEncoding(e.to_string()))?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyBytes)?;
            VerifyingKey::from_bytes(&arr).map_err(|_| IdentityError::InvalidKeyBytes)
        }
        ClientKind::Browser => {
            let der = BASE64
                .decode(public_key_material)
                .map_err(|e| IdentityError::BadEncoding(e.to_string()))?;
            VerifyingKey::from_public_key_der(&der).map_err(|_| IdentityError::InvalidKeyBytes)
        }
    }
}

/// Verify a base64 challenge signature against the claimed public key.
///
/// Malformed keys or signatures count as verification failure rather than
/// an error: the caller only needs to know whether to trust the claimant.
pub fn verify_signature(
    public_key_material: &str,
    signature_b64: &str,
    data: &str,
    kind: ClientKind,
) -> bool {
    let Ok(verifying_key) = decode_verifying_key(public_key_material, kind) else {
        return false;
    };
    let Ok(sig_bytes) = BASE64.decode(signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    verifying_key.verify(data.as_bytes(), &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_string_shape() {
        let keypair = Keypair::generate();
        let material = keypair.public_key_material(ClientKind::Headless).unwrap();
        let identity = identity_string(&material, "alice");
        let (hash, nick) = split_identity(&identity);
        assert_eq!(hash, identity_hash(&material));
        assert_eq!(nick, Some("alice"));
    }

    #[test]
    fn test_identity_hash_deterministic() {
        let keypair = Keypair::generate();
        let material = keypair.public_key_material(ClientKind::Headless).unwrap();
        assert_eq!(identity_hash(&material), identity_hash(&material));
    }

    #[test]
    fn test_sign_verify_headless() {
        let keypair = Keypair::generate();
        let material = keypair.public_key_material(ClientKind::Headless).unwrap();
        let signature = keypair.sign(b"challenge-data");

        assert!(verify_signature(
            &material,
            &signature,
            "challenge-data",
            ClientKind::Headless
        ));
        assert!(!verify_signature(
            &material,
            &signature,
            "other-data",
            ClientKind::Headless
        ));
    }

    #[test]
    fn test_sign_verify_browser() {
        let keypair = Keypair::generate();
        let material = keypair.public_key_material(ClientKind::Browser).unwrap();
        let signature = keypair.sign(b"challenge-data");

        assert!(verify_signature(
            &material,
            &signature,
            "challenge-data",
            ClientKind::Browser
        ));
    }

    #[test]
    fn test_kind_mismatch_fails() {
        let keypair = Keypair::generate();
        let material = keypair.public_key_material(ClientKind::Browser).unwrap();
        let signature = keypair.sign(b"challenge-data");

        // A DER key presented through the headless path must not verify
        assert!(!verify_signature(
            &material,
            &signature,
            "challenge-data",
            ClientKind::Headless
        ));
    }

    #[test]
    fn test_keypair_roundtrip() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_secret_bytes(keypair.signing_key.as_bytes());
        assert_eq!(
            keypair.verifying_key().to_bytes(),
            restored.verifying_key().to_bytes()
        );
    }

    #[test]
    fn test_split_identity_without_nick() {
        assert_eq!(split_identity("abcdef"), ("abcdef", None));
    }
}
