// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Node identity: ed25519 key pairs and the signed message envelope.
//!
//! A node's id on the wire is the base64 of its public signing key. The
//! consensus core consumes messages that are already authenticated; this
//! module is where that authentication happens.
use crate::{
    core_types::{GenericNodeId, Value},
    msg::Message,
};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use ed25519_dalek::{
    Signature, Signer, SigningKey, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH,
};
use rand::rngs::OsRng;
use sha3::{Digest, Sha3_512};
use thiserror::Error;

/// An ed25519 signing key pair.
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a key pair at random.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Derive a key pair from a secret phrase. The key generation needs 32
    /// bytes of entropy; the hash of the phrase provides it, so the same
    /// phrase always yields the same pair.
    pub fn from_secret_phrase(phrase: &str) -> Self {
        let digest = Sha3_512::digest(phrase.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest[..32]);
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// The transportable version of the public key, as unpadded base64.
    pub fn public_key(&self) -> String {
        STANDARD_NO_PAD.encode(self.signing.verifying_key().as_bytes())
    }

    /// Sign a utf8 message, returning the signature as unpadded base64.
    pub fn sign(&self, message: &str) -> String {
        let signature = self.signing.sign(message.as_bytes());
        STANDARD_NO_PAD.encode(signature.to_bytes())
    }
}

/// Verify a detached signature. The message is utf8; the key and signature
/// are unpadded base64. Undecodable or wrong-length inputs simply fail
/// verification.
pub fn verify(public_key: &str, message: &str, signature: &str) -> bool {
    let Ok(pub_bytes) = STANDARD_NO_PAD.decode(public_key) else {
        return false;
    };
    let Ok(pub_array) = <[u8; PUBLIC_KEY_LENGTH]>::try_from(pub_bytes.as_slice()) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&pub_array) else {
        return false;
    };
    let Ok(sig_bytes) = STANDARD_NO_PAD.decode(signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    verifying.verify(message.as_bytes(), &signature).is_ok()
}

/// Things that can go wrong turning bytes from the network back into a
/// verified envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The envelope didn't have the `e:signer:signature:payload` shape.
    #[error("malformed envelope")]
    Malformed,

    /// The signature did not verify against the signer and payload.
    #[error("signature verification failed")]
    BadSignature,

    /// The payload was not a valid message.
    #[error("invalid message payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A message together with the signer's public key and a signature over the
/// serialized payload. Serializes as `e:<signer>:<signature>:<payload>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignedEnvelope<V: Value, ID: GenericNodeId = String> {
    signer: String,
    signature: String,
    serialized: String,
    message: Message<V, ID>,
}

impl<V: Value, ID: GenericNodeId> SignedEnvelope<V, ID> {
    /// Sign `message` with `keypair`.
    pub fn new(keypair: &KeyPair, message: Message<V, ID>) -> Result<Self, EnvelopeError> {
        let serialized = serde_json::to_string(&message)?;
        let signature = keypair.sign(&serialized);
        Ok(Self {
            signer: keypair.public_key(),
            signature,
            serialized,
            message,
        })
    }

    /// The signer's public key, base64.
    pub fn signer(&self) -> &str {
        &self.signer
    }

    /// The signature, base64.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// The signed message.
    pub fn message(&self) -> &Message<V, ID> {
        &self.message
    }

    /// The wire form of this envelope.
    pub fn serialize(&self) -> String {
        format!("e:{}:{}:{}", self.signer, self.signature, self.serialized)
    }

    /// Parse and verify an envelope. The signature is checked before the
    /// payload is even parsed.
    pub fn from_serialized(s: &str) -> Result<Self, EnvelopeError> {
        let mut parts = s.splitn(4, ':');
        let (Some("e"), Some(signer), Some(signature), Some(payload)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(EnvelopeError::Malformed);
        };
        if !verify(signer, payload, signature) {
            return Err(EnvelopeError::BadSignature);
        }
        let message = serde_json::from_str(payload)?;
        Ok(Self {
            signer: signer.to_string(),
            signature: signature.to_string(),
            serialized: payload.to_string(),
            message,
        })
    }
}

#[cfg(test)]
mod keypair_tests {
    use super::*;
    use crate::{msg::InfoMsg, quorum_set::QuorumSlice};

    #[test]
    fn sign_and_verify_round_trip() {
        let keypair = KeyPair::from_secret_phrase("foo");
        let signature = keypair.sign("hello");
        assert!(verify(&keypair.public_key(), "hello", &signature));

        // The wrong message fails.
        assert!(!verify(&keypair.public_key(), "goodbye", &signature));

        // A different signature of the correct length fails.
        let other = keypair.sign("something else entirely");
        assert_eq!(other.len(), signature.len());
        assert!(!verify(&keypair.public_key(), "hello", &other));

        // A public key that decodes to the wrong length fails.
        let short_key = STANDARD_NO_PAD.encode([7u8; 31]);
        assert!(!verify(&short_key, "hello", &signature));

        // Garbage that isn't base64 at all fails.
        assert!(!verify("???", "hello", &signature));
        assert!(!verify(&keypair.public_key(), "hello", "???"));
    }

    #[test]
    fn phrase_derivation_is_deterministic() {
        let a = KeyPair::from_secret_phrase("foo");
        let b = KeyPair::from_secret_phrase("foo");
        let c = KeyPair::from_secret_phrase("bar");
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn envelope_round_trip() {
        let keypair = KeyPair::from_secret_phrase("foo");
        let message: Message<String> = Message::Nominate(crate::msg::NominateMsg {
            I: 4,
            Nom: vec!["hello".to_string()],
            Acc: vec![],
            D: QuorumSlice::new(vec![keypair.public_key()], 1),
        });

        let envelope = SignedEnvelope::new(&keypair, message.clone()).unwrap();
        let wire = envelope.serialize();
        let parsed = SignedEnvelope::<String>::from_serialized(&wire).unwrap();

        assert_eq!(parsed.signer(), envelope.signer());
        assert_eq!(parsed.signature(), envelope.signature());
        assert_eq!(parsed.message(), &message);
    }

    #[test]
    fn tampered_envelope_fails() {
        let keypair = KeyPair::from_secret_phrase("foo");
        let message: Message<String> = Message::Info(InfoMsg { I: 4 });
        let envelope = SignedEnvelope::new(&keypair, message).unwrap();

        let wire = envelope.serialize();
        let tampered = wire.replace(r#""I":4"#, r#""I":5"#);
        assert_ne!(wire, tampered);
        match SignedEnvelope::<String>::from_serialized(&tampered) {
            Err(EnvelopeError::BadSignature) => {}
            other => panic!("expected a bad signature, got {other:?}"),
        }

        match SignedEnvelope::<String>::from_serialized("not an envelope") {
            Err(EnvelopeError::Malformed) => {}
            other => panic!("expected a malformed error, got {other:?}"),
        }
    }
}
