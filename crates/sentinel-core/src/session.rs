//! Session key exchange protocol and packet sealing.
//!
//! One [`SessionCrypto`] instance owns the node's key material end to end:
//! a secp256r1 keypair, the peer's imported public key, and the symmetric
//! session key derived from the ECDH shared secret. The derived secret is
//! passed through SHA-256 before use as the AEAD key; this is a deliberate
//! KDF stage that decorrelates the cipher key from the raw curve output.
//!
//! Lifecycle: `NoKeypair → HasKeypair → HasKeypair+Peer → Ready`.
//! Regenerating the local keypair always drops the peer key and the session
//! key, so a stale session can never outlive the keypair it was derived
//! from. Import and derivation are one logical step: importing a peer key
//! derives immediately when a local keypair exists.
//!
//! Every sealed packet carries a fresh random 96-bit nonce drawn from the
//! CSPRNG. Nonce uniqueness is a property of construction, not convention:
//! there is no code path that reuses or increments a previous nonce.

use alloc::string::String;
use alloc::vec::Vec;

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce, Tag};
use data_encoding::{BASE64, HEXUPPER, HEXUPPER_PERMISSIVE};
use p256::elliptic_curve::generic_array::GenericArray;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey, SecretKey};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror_no_std::Error;

/// Raw (untagged SEC1) public key length on secp256r1.
pub const PUBLIC_KEY_LEN: usize = 64;
/// Hex form of [`PUBLIC_KEY_LEN`].
pub const PUBLIC_KEY_HEX_LEN: usize = 128;
/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Attempts at rejection-sampling a scalar before the RNG is declared broken.
const KEYGEN_ATTEMPTS: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("random source failure")]
    Rng,
    #[error("no local keypair generated")]
    NoKeypair,
    #[error("no peer public key imported")]
    NoPeerKey,
    #[error("peer public key has invalid length or encoding")]
    PeerKeyFormat,
    #[error("peer public key is not a valid curve point")]
    InvalidPeerKey,
    #[error("session key not derived")]
    NotReady,
    #[error("cipher operation failed")]
    Cipher,
    #[error("packet field is not valid base64 or has the wrong length")]
    PacketFormat,
    #[error("packet authentication failed")]
    AuthFailed,
    #[error("packet JSON malformed")]
    Json,
}

/// Wire form of one sealed telemetry payload.
///
/// All three binary fields are standard-alphabet base64 with padding; `iv`
/// decodes to exactly 12 bytes and `tag` to exactly 16. A packet is only
/// ever constructed fully populated.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPacket {
    pub from: String,
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

impl EncryptedPacket {
    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|_| SessionError::Json)
    }

    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        serde_json::from_str(json).map_err(|_| SessionError::Json)
    }
}

/// Key material and sealing operations for one peer session.
///
/// Generic over the random source so the firmware can hand in the hardware
/// TRNG while tests and the simulator use OS entropy.
pub struct SessionCrypto<R> {
    rng: R,
    local: Option<SecretKey>,
    /// Cached untagged SEC1 encoding of the local public key.
    local_public: Option<[u8; PUBLIC_KEY_LEN]>,
    peer: Option<PublicKey>,
    session_key: Option<[u8; 32]>,
}

impl<R: RngCore + CryptoRng> SessionCrypto<R> {
    /// New instance with no key material. Call [`generate_keypair`] before
    /// exporting or sealing anything.
    ///
    /// [`generate_keypair`]: Self::generate_keypair
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            local: None,
            local_public: None,
            peer: None,
            session_key: None,
        }
    }

    /// Create a fresh local keypair, dropping the peer key and any derived
    /// session key.
    ///
    /// Scalars are rejection-sampled from the CSPRNG; a failing random
    /// source is reported as [`SessionError::Rng`] rather than silently
    /// producing a weak key.
    pub fn generate_keypair(&mut self) -> Result<(), SessionError> {
        let mut candidate = [0u8; 32];
        for _ in 0..KEYGEN_ATTEMPTS {
            self.rng
                .try_fill_bytes(&mut candidate)
                .map_err(|_| SessionError::Rng)?;

            if let Ok(secret) = SecretKey::from_bytes(GenericArray::from_slice(&candidate)) {
                let point = secret.public_key().to_encoded_point(false);
                let mut public = [0u8; PUBLIC_KEY_LEN];
                // Skip the 0x04 uncompressed-point tag.
                public.copy_from_slice(&point.as_bytes()[1..]);

                self.local = Some(secret);
                self.local_public = Some(public);
                self.peer = None;
                self.session_key = None;
                return Ok(());
            }
        }
        // Only reachable if the RNG keeps producing out-of-range scalars.
        Err(SessionError::Rng)
    }

    /// The 64-byte local public key. Pure.
    pub fn public_key(&self) -> Result<&[u8; PUBLIC_KEY_LEN], SessionError> {
        self.local_public.as_ref().ok_or(SessionError::NoKeypair)
    }

    /// Uppercase hex encoding of the local public key. Pure.
    pub fn public_key_hex(&self) -> Result<String, SessionError> {
        Ok(HEXUPPER.encode(self.public_key()?))
    }

    /// Import the peer's raw 64-byte public key and immediately derive the
    /// session key if a local keypair exists.
    ///
    /// Importing before any keypair was generated stores the key and
    /// succeeds; the session simply stays not ready.
    pub fn import_peer_public_key(&mut self, raw: &[u8]) -> Result<(), SessionError> {
        if raw.len() != PUBLIC_KEY_LEN {
            return Err(SessionError::PeerKeyFormat);
        }

        let point = EncodedPoint::from_untagged_bytes(GenericArray::from_slice(raw));
        let peer = Option::<PublicKey>::from(PublicKey::from_encoded_point(&point))
            .ok_or(SessionError::InvalidPeerKey)?;

        self.peer = Some(peer);
        self.session_key = None;

        if self.local.is_some() {
            self.derive_session_key()?;
        }
        Ok(())
    }

    /// Import a 128-character hex peer public key (either case accepted).
    pub fn import_peer_public_key_hex(&mut self, hex: &str) -> Result<(), SessionError> {
        if hex.len() != PUBLIC_KEY_HEX_LEN {
            return Err(SessionError::PeerKeyFormat);
        }
        let raw = HEXUPPER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|_| SessionError::PeerKeyFormat)?;
        self.import_peer_public_key(&raw)
    }

    /// Compute the ECDH shared secret and pass it through the SHA-256 KDF to
    /// obtain the symmetric session key.
    pub fn derive_session_key(&mut self) -> Result<(), SessionError> {
        let secret = self.local.as_ref().ok_or(SessionError::NoKeypair)?;
        let peer = self.peer.as_ref().ok_or(SessionError::NoPeerKey)?;

        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        let key: [u8; 32] = Sha256::digest(shared.raw_secret_bytes()).into();
        self.session_key = Some(key);
        Ok(())
    }

    /// True only when a session key has been derived from the current local
    /// keypair and the current peer key.
    pub fn is_ready(&self) -> bool {
        self.session_key.is_some()
    }

    /// Authenticate-and-encrypt `plaintext` under the session key with a
    /// fresh random nonce, returning the fully populated wire packet.
    pub fn seal(&mut self, plaintext: &[u8], sender: &str) -> Result<EncryptedPacket, SessionError> {
        let key = self.session_key.ok_or(SessionError::NotReady)?;

        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .try_fill_bytes(&mut nonce)
            .map_err(|_| SessionError::Rng)?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| SessionError::Cipher)?;

        Ok(EncryptedPacket {
            from: String::from(sender),
            ciphertext: BASE64.encode(&buffer),
            iv: BASE64.encode(&nonce),
            tag: BASE64.encode(&tag),
        })
    }

    /// Decrypt and authenticate a packet sealed under the same session key.
    ///
    /// Fails closed: any tampering with ciphertext or tag yields
    /// [`SessionError::AuthFailed`] and no plaintext.
    pub fn open(&self, packet: &EncryptedPacket) -> Result<Vec<u8>, SessionError> {
        let key = self.session_key.ok_or(SessionError::NotReady)?;

        let nonce = BASE64
            .decode(packet.iv.as_bytes())
            .map_err(|_| SessionError::PacketFormat)?;
        let tag = BASE64
            .decode(packet.tag.as_bytes())
            .map_err(|_| SessionError::PacketFormat)?;
        let mut buffer = BASE64
            .decode(packet.ciphertext.as_bytes())
            .map_err(|_| SessionError::PacketFormat)?;
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(SessionError::PacketFormat);
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut buffer,
                Tag::from_slice(&tag),
            )
            .map_err(|_| SessionError::AuthFailed)?;
        Ok(buffer)
    }
}
